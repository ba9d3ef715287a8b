use std::{
    fmt,
    future::Future,
    sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use shared::protocol::{Identity, LoginRequest, SignupRequest, TokenResponse};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};
use zeroize::Zeroize;

use crate::{
    error::ClientError,
    storage::{PersistedSession, SessionStorage, StorageError},
    ClientEvent,
};

pub const LOGIN_FALLBACK_MESSAGE: &str = "Помилка входу";
pub const SIGNUP_FALLBACK_MESSAGE: &str = "Помилка реєстрації";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Uninitialized,
    Restoring,
    Authenticated,
    Unauthenticated,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionStatus::Uninitialized => "uninitialized",
            SessionStatus::Restoring => "restoring",
            SessionStatus::Authenticated => "authenticated",
            SessionStatus::Unauthenticated => "unauthenticated",
        };
        f.write_str(label)
    }
}

/// Bearer credential. Never printed, wiped from memory when dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialToken(String);

impl CredentialToken {
    pub fn parse(raw: impl Into<String>) -> Result<Self, ClientError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.chars().any(char::is_whitespace) {
            return Err(ClientError::Decode(
                "service returned an empty or malformed access token".into(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CredentialToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CredentialToken(***)")
    }
}

impl Drop for CredentialToken {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenValidity {
    /// Not a JWT we can read; trusted until the service says otherwise.
    Opaque,
    Valid { expires_at: DateTime<Utc> },
    Expired { expired_at: DateTime<Utc> },
    Malformed,
}

/// Classifies a persisted token without contacting the service. Only the
/// `exp` claim of a JWT is inspected; the signature is the service's business.
pub fn classify_token(token: &str, now: DateTime<Utc>) -> TokenValidity {
    let token = token.trim();
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return TokenValidity::Malformed;
    }

    let segments = token.split('.').collect::<Vec<_>>();
    if segments.len() != 3 {
        return TokenValidity::Opaque;
    }
    let Ok(payload) = URL_SAFE_NO_PAD.decode(segments[1].trim_end_matches('=')) else {
        return TokenValidity::Opaque;
    };
    let Ok(claims) = serde_json::from_slice::<serde_json::Value>(&payload) else {
        return TokenValidity::Opaque;
    };
    let Some(exp) = claims.get("exp").and_then(serde_json::Value::as_i64) else {
        return TokenValidity::Opaque;
    };
    let Some(expires_at) = Utc.timestamp_opt(exp, 0).single() else {
        return TokenValidity::Malformed;
    };

    if expires_at <= now {
        TokenValidity::Expired {
            expired_at: expires_at,
        }
    } else {
        TokenValidity::Valid { expires_at }
    }
}

/// Read-only view of the session at one point in time.
#[derive(Debug, Clone)]
pub struct Session {
    pub status: SessionStatus,
    pub token: Option<CredentialToken>,
    pub identity: Option<Identity>,
    pub last_error: Option<String>,
}

impl Session {
    fn uninitialized() -> Self {
        Self {
            status: SessionStatus::Uninitialized,
            token: None,
            identity: None,
            last_error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.status == SessionStatus::Authenticated
    }
}

/// Network half of login/signup, implemented by the gateway.
#[async_trait]
pub trait AuthApi: Send + Sync {
    async fn exchange_credentials(&self, request: &LoginRequest)
        -> Result<TokenResponse, ClientError>;
    async fn create_account(&self, request: &SignupRequest) -> Result<TokenResponse, ClientError>;
    async fn fetch_identity(&self, token: &str) -> Result<Identity, ClientError>;
}

pub struct SessionStore {
    state: RwLock<Session>,
    storage: Arc<dyn SessionStorage>,
    auth_gate: Mutex<()>,
    events: broadcast::Sender<ClientEvent>,
}

impl SessionStore {
    pub fn new(storage: Arc<dyn SessionStorage>, events: broadcast::Sender<ClientEvent>) -> Self {
        Self {
            state: RwLock::new(Session::uninitialized()),
            storage,
            auth_gate: Mutex::new(()),
            events,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Session> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Session> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> Session {
        self.read().clone()
    }

    pub fn status(&self) -> SessionStatus {
        self.read().status
    }

    pub fn is_authenticated(&self) -> bool {
        self.status() == SessionStatus::Authenticated
    }

    pub fn token(&self) -> Option<CredentialToken> {
        self.read().token.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.read().identity.clone()
    }

    pub fn last_error(&self) -> Option<String> {
        self.read().last_error.clone()
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = std::mem::replace(&mut self.write().status, status);
        if previous != status {
            let _ = self.events.send(ClientEvent::SessionChanged(status));
        }
    }

    /// Resolves the persisted session once. Later calls return the current
    /// status without touching storage.
    pub fn restore(&self) -> SessionStatus {
        {
            let mut guard = self.write();
            if guard.status != SessionStatus::Uninitialized {
                return guard.status;
            }
            guard.status = SessionStatus::Restoring;
        }

        let restored = match self.storage.load() {
            Ok(Some(persisted)) => self.accept_persisted(persisted),
            Ok(None) => None,
            Err(StorageError::Malformed(reason)) => {
                warn!(reason = %reason, "session: discarding malformed persisted session");
                self.clear_storage();
                None
            }
            Err(err) => {
                warn!("session: failed to read persisted session: {err}");
                None
            }
        };

        match restored {
            Some((token, identity)) => {
                info!(email = %identity.email, "session: restored persisted session");
                {
                    let mut guard = self.write();
                    guard.token = Some(token);
                    guard.identity = Some(identity);
                }
                self.set_status(SessionStatus::Authenticated);
                SessionStatus::Authenticated
            }
            None => {
                self.set_status(SessionStatus::Unauthenticated);
                SessionStatus::Unauthenticated
            }
        }
    }

    fn accept_persisted(&self, persisted: PersistedSession) -> Option<(CredentialToken, Identity)> {
        let validity = classify_token(&persisted.access_token, Utc::now());
        match validity {
            TokenValidity::Malformed => {
                warn!("session: persisted token is malformed");
                self.clear_storage();
                return None;
            }
            TokenValidity::Expired { expired_at } => {
                info!(%expired_at, "session: persisted token expired");
                self.clear_storage();
                return None;
            }
            TokenValidity::Opaque | TokenValidity::Valid { .. } => {}
        }
        if !is_well_formed_identity(&persisted.user) {
            warn!("session: persisted identity is missing an email");
            self.clear_storage();
            return None;
        }
        let token = CredentialToken::parse(persisted.access_token.clone()).ok()?;
        Some((token, persisted.user))
    }

    pub async fn login(
        &self,
        api: &dyn AuthApi,
        email: &str,
        password: &str,
    ) -> Result<Identity, ClientError> {
        let request = LoginRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
        };
        self.authenticate(
            "log in",
            LOGIN_FALLBACK_MESSAGE,
            api,
            api.exchange_credentials(&request),
        )
        .await
    }

    pub async fn signup(
        &self,
        api: &dyn AuthApi,
        email: &str,
        password: &str,
        display_name: &str,
    ) -> Result<Identity, ClientError> {
        let request = SignupRequest {
            email: email.trim().to_string(),
            password: password.to_string(),
            name: display_name.trim().to_string(),
        };
        self.authenticate(
            "sign up",
            SIGNUP_FALLBACK_MESSAGE,
            api,
            api.create_account(&request),
        )
        .await
    }

    /// Two-step credential flow shared by login and signup. Nothing is
    /// persisted until both the token exchange and the identity fetch have
    /// succeeded.
    async fn authenticate<F>(
        &self,
        operation: &'static str,
        fallback: &str,
        api: &dyn AuthApi,
        exchange: F,
    ) -> Result<Identity, ClientError>
    where
        F: Future<Output = Result<TokenResponse, ClientError>>,
    {
        let Ok(_gate) = self.auth_gate.try_lock() else {
            info!(operation, "session: rejected overlapping authentication attempt");
            return Err(ClientError::AuthInProgress);
        };

        {
            let mut guard = self.write();
            if guard.status != SessionStatus::Unauthenticated {
                return Err(ClientError::InvalidTransition {
                    operation,
                    status: guard.status,
                });
            }
            guard.last_error = None;
        }

        let outcome = async {
            let response = exchange.await?;
            let token = CredentialToken::parse(response.access_token)?;
            let identity = api.fetch_identity(token.expose()).await?;
            if !is_well_formed_identity(&identity) {
                return Err(ClientError::Decode(
                    "identity record is missing an email".into(),
                ));
            }
            self.storage
                .save(&PersistedSession {
                    access_token: token.expose().to_string(),
                    user: identity.clone(),
                })
                .map_err(|err| ClientError::Storage(err.to_string()))?;
            Ok((token, identity))
        }
        .await;

        match outcome {
            Ok((token, identity)) => {
                {
                    let mut guard = self.write();
                    guard.token = Some(token);
                    guard.identity = Some(identity.clone());
                    guard.last_error = None;
                }
                self.set_status(SessionStatus::Authenticated);
                info!(operation, email = %identity.email, "session: authenticated");
                Ok(identity)
            }
            Err(err) => {
                let message = user_facing_message(&err, fallback);
                warn!(operation, error = %err, "session: authentication failed");
                self.write().last_error = Some(message.clone());
                Err(ClientError::Rejected { message })
            }
        }
    }

    /// Explicit sign-out. Never fails and needs no network.
    pub fn logout(&self) {
        let was_authenticated = self.teardown(None);
        if was_authenticated {
            info!("session: logged out");
        }
    }

    /// Forced invalidation after the service rejected the credential.
    /// Returns whether a believed-valid session was demoted.
    pub fn invalidate(&self, detail: Option<&str>) -> bool {
        let reason = detail.unwrap_or("session expired").to_string();
        let was_authenticated = self.teardown(Some(reason.clone()));
        if was_authenticated {
            warn!(reason = %reason, "session: invalidated by server");
            let _ = self.events.send(ClientEvent::SessionInvalidated { reason });
        }
        was_authenticated
    }

    fn teardown(&self, last_error: Option<String>) -> bool {
        self.clear_storage();
        let was_authenticated = {
            let mut guard = self.write();
            let was_authenticated = guard.status == SessionStatus::Authenticated;
            guard.token = None;
            guard.identity = None;
            guard.last_error = last_error;
            was_authenticated
        };
        self.set_status(SessionStatus::Unauthenticated);
        was_authenticated
    }

    fn clear_storage(&self) {
        if let Err(err) = self.storage.clear() {
            warn!("session: failed to clear persisted session: {err}");
        }
    }
}

fn is_well_formed_identity(identity: &Identity) -> bool {
    !identity.email.trim().is_empty()
}

fn user_facing_message(err: &ClientError, fallback: &str) -> String {
    match err {
        ClientError::Unauthorized { detail } | ClientError::Http { detail, .. } => detail
            .clone()
            .unwrap_or_else(|| fallback.to_string()),
        _ => fallback.to_string(),
    }
}

#[derive(Debug, Clone, Default)]
pub struct LoginForm {
    pub email: String,
    pub password: String,
}

impl LoginForm {
    pub fn validate(&self) -> Result<(), ClientError> {
        validate_email(&self.email)?;
        require("password", &self.password)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SignupForm {
    pub name: String,
    pub email: String,
    pub password: String,
    pub confirm_password: String,
}

impl SignupForm {
    pub fn validate(&self) -> Result<(), ClientError> {
        require("name", &self.name)?;
        validate_email(&self.email)?;
        require("password", &self.password)?;
        if self.password != self.confirm_password {
            return Err(ClientError::Validation("Паролі не співпадають".into()));
        }
        Ok(())
    }
}

fn require(field: &str, value: &str) -> Result<(), ClientError> {
    if value.trim().is_empty() {
        return Err(ClientError::Validation(format!("{field} is required")));
    }
    Ok(())
}

fn validate_email(email: &str) -> Result<(), ClientError> {
    require("email", email)?;
    let email = email.trim();
    let valid = email
        .split_once('@')
        .map(|(local, domain)| {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.starts_with('.')
                && !domain.ends_with('.')
                && !email.chars().any(char::is_whitespace)
        })
        .unwrap_or(false);
    if !valid {
        return Err(ClientError::Validation(format!(
            "'{email}' is not a valid email address"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/session_tests.rs"]
mod tests;
