use super::*;
use crate::storage::MemorySessionStorage;
use chrono::Duration;
use tokio::sync::{oneshot, Notify};

struct FakeAuthApi {
    token: Result<String, ClientError>,
    identity: Result<Identity, ClientError>,
    exchange_started: Notify,
    release_exchange: Mutex<Option<oneshot::Receiver<()>>>,
    seen_tokens: Mutex<Vec<String>>,
}

impl FakeAuthApi {
    fn ok(token: &str) -> Self {
        Self {
            token: Ok(token.to_string()),
            identity: Ok(Identity::new("Ірина", "iryna@example.com")),
            exchange_started: Notify::new(),
            release_exchange: Mutex::new(None),
            seen_tokens: Mutex::new(Vec::new()),
        }
    }

    fn rejecting(err: ClientError) -> Self {
        let mut api = Self::ok("unused");
        api.token = Err(err);
        api
    }

    fn with_identity_error(mut self, err: ClientError) -> Self {
        self.identity = Err(err);
        self
    }

    fn gated(self, release: oneshot::Receiver<()>) -> Self {
        Self {
            release_exchange: Mutex::new(Some(release)),
            ..self
        }
    }

    async fn exchange(&self) -> Result<TokenResponse, ClientError> {
        self.exchange_started.notify_one();
        let release = self.release_exchange.lock().await.take();
        if let Some(release) = release {
            let _ = release.await;
        }
        self.token.clone().map(|access_token| TokenResponse {
            access_token,
            token_type: Some("bearer".into()),
        })
    }
}

#[async_trait]
impl AuthApi for FakeAuthApi {
    async fn exchange_credentials(
        &self,
        _request: &LoginRequest,
    ) -> Result<TokenResponse, ClientError> {
        self.exchange().await
    }

    async fn create_account(&self, request: &SignupRequest) -> Result<TokenResponse, ClientError> {
        assert!(!request.name.is_empty());
        self.exchange().await
    }

    async fn fetch_identity(&self, token: &str) -> Result<Identity, ClientError> {
        self.seen_tokens.lock().await.push(token.to_string());
        self.identity.clone()
    }
}

fn store_with(storage: Arc<MemorySessionStorage>) -> SessionStore {
    let (events, _) = broadcast::channel(16);
    SessionStore::new(storage, events)
}

fn restored_store() -> (SessionStore, Arc<MemorySessionStorage>) {
    let storage = Arc::new(MemorySessionStorage::new());
    let store = store_with(Arc::clone(&storage));
    assert_eq!(store.restore(), SessionStatus::Unauthenticated);
    (store, storage)
}

fn jwt_with_exp(exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(format!(r#"{{"sub":"iryna@example.com","exp":{exp}}}"#));
    format!("{header}.{payload}.signature")
}

fn persisted(token: &str) -> PersistedSession {
    PersistedSession {
        access_token: token.to_string(),
        user: Identity::new("Ірина", "iryna@example.com"),
    }
}

#[test]
fn restore_without_persisted_session_is_unauthenticated() {
    let (store, _) = restored_store();
    let session = store.snapshot();
    assert_eq!(session.status, SessionStatus::Unauthenticated);
    assert!(session.token.is_none());
    assert!(session.identity.is_none());
}

#[test]
fn restore_runs_only_once() {
    let storage = Arc::new(MemorySessionStorage::new());
    let store = store_with(Arc::clone(&storage));
    assert_eq!(store.restore(), SessionStatus::Unauthenticated);

    storage.save(&persisted("late-token")).expect("save");
    assert_eq!(store.restore(), SessionStatus::Unauthenticated);
    assert!(store.token().is_none());
}

#[test]
fn restore_accepts_opaque_token_with_identity() {
    let storage = Arc::new(MemorySessionStorage::with_session(persisted("opaque-token")));
    let store = store_with(storage);

    assert_eq!(store.status(), SessionStatus::Uninitialized);
    assert_eq!(store.restore(), SessionStatus::Authenticated);
    assert_eq!(store.token().expect("token").expose(), "opaque-token");
    assert_eq!(store.identity().expect("identity").email, "iryna@example.com");
}

#[test]
fn restore_rejects_expired_jwt_and_clears_storage() {
    let expired = jwt_with_exp((Utc::now() - Duration::hours(1)).timestamp());
    let storage = Arc::new(MemorySessionStorage::with_session(persisted(&expired)));
    let store = store_with(Arc::clone(&storage));

    assert_eq!(store.restore(), SessionStatus::Unauthenticated);
    assert!(storage.snapshot().is_none());
}

#[test]
fn restore_rejects_identity_without_email() {
    let mut session = persisted("opaque-token");
    session.user.email = " ".into();
    let storage = Arc::new(MemorySessionStorage::with_session(session));
    let store = store_with(Arc::clone(&storage));

    assert_eq!(store.restore(), SessionStatus::Unauthenticated);
    assert!(storage.snapshot().is_none());
}

#[test]
fn classifies_tokens() {
    let now = Utc::now();
    let future = (now + Duration::days(7)).timestamp();
    assert!(matches!(
        classify_token(&jwt_with_exp(future), now),
        TokenValidity::Valid { .. }
    ));
    assert!(matches!(
        classify_token(&jwt_with_exp(now.timestamp() - 5), now),
        TokenValidity::Expired { .. }
    ));
    assert_eq!(classify_token("plain-opaque-token", now), TokenValidity::Opaque);
    assert_eq!(classify_token("a.b.c", now), TokenValidity::Opaque);
    assert_eq!(classify_token("  ", now), TokenValidity::Malformed);
    assert_eq!(classify_token("has space", now), TokenValidity::Malformed);
}

#[tokio::test]
async fn login_persists_token_and_identity_together() {
    let (store, storage) = restored_store();
    let api = FakeAuthApi::ok("issued-token");

    let identity = store
        .login(&api, " iryna@example.com ", "secret")
        .await
        .expect("login");

    assert_eq!(identity.email, "iryna@example.com");
    let session = store.snapshot();
    assert_eq!(session.status, SessionStatus::Authenticated);
    assert_eq!(session.token.expect("token").expose(), "issued-token");
    assert!(session.identity.is_some());
    assert!(session.last_error.is_none());
    assert_eq!(storage.snapshot(), Some(persisted("issued-token")));
    assert_eq!(*api.seen_tokens.lock().await, vec!["issued-token".to_string()]);
}

#[tokio::test]
async fn signup_follows_the_same_two_step_protocol() {
    let (store, storage) = restored_store();
    let api = FakeAuthApi::ok("fresh-token");

    store
        .signup(&api, "iryna@example.com", "secret", "Ірина")
        .await
        .expect("signup");

    assert!(store.is_authenticated());
    assert_eq!(
        storage.snapshot().map(|s| s.access_token),
        Some("fresh-token".to_string())
    );
}

#[tokio::test]
async fn rejected_login_records_service_message() {
    let (store, storage) = restored_store();
    let api = FakeAuthApi::rejecting(ClientError::Unauthorized {
        detail: Some("Incorrect email or password".into()),
    });

    let err = store
        .login(&api, "iryna@example.com", "wrong")
        .await
        .expect_err("login should fail");

    assert!(matches!(
        err,
        ClientError::Rejected { ref message } if message == "Incorrect email or password"
    ));
    assert_eq!(store.status(), SessionStatus::Unauthenticated);
    assert_eq!(
        store.last_error().as_deref(),
        Some("Incorrect email or password")
    );
    assert!(storage.snapshot().is_none());
}

#[tokio::test]
async fn transport_failure_uses_fallback_message() {
    let (store, _) = restored_store();
    let api = FakeAuthApi::rejecting(ClientError::Transport("connection refused".into()));

    let err = store
        .login(&api, "iryna@example.com", "secret")
        .await
        .expect_err("login should fail");
    assert_eq!(err.to_string(), LOGIN_FALLBACK_MESSAGE);

    let api = FakeAuthApi::rejecting(ClientError::http(500, None));
    let err = store
        .signup(&api, "iryna@example.com", "secret", "Ірина")
        .await
        .expect_err("signup should fail");
    assert_eq!(err.to_string(), SIGNUP_FALLBACK_MESSAGE);
    assert_eq!(store.last_error().as_deref(), Some(SIGNUP_FALLBACK_MESSAGE));
}

#[tokio::test]
async fn identity_fetch_failure_persists_nothing() {
    let (store, storage) = restored_store();
    let api = FakeAuthApi::ok("issued-token").with_identity_error(ClientError::http(
        500,
        Some("database unavailable".into()),
    ));

    let err = store
        .login(&api, "iryna@example.com", "secret")
        .await
        .expect_err("login should fail");

    assert_eq!(err.to_string(), "database unavailable");
    assert_eq!(store.status(), SessionStatus::Unauthenticated);
    assert!(store.token().is_none());
    assert!(storage.snapshot().is_none());
}

#[tokio::test]
async fn overlapping_login_is_rejected_while_first_is_in_flight() {
    let (store, storage) = restored_store();
    let (release_tx, release_rx) = oneshot::channel();
    let api = FakeAuthApi::ok("first-token").gated(release_rx);

    let first = store.login(&api, "iryna@example.com", "secret");
    let second = async {
        api.exchange_started.notified().await;
        let result = store.login(&api, "iryna@example.com", "secret").await;
        let _ = release_tx.send(());
        result
    };
    let (first, second) = tokio::join!(first, second);

    assert!(first.is_ok());
    assert!(matches!(second, Err(ClientError::AuthInProgress)));
    assert_eq!(
        storage.snapshot().map(|s| s.access_token),
        Some("first-token".to_string())
    );
}

#[tokio::test]
async fn login_while_authenticated_is_an_invalid_transition() {
    let storage = Arc::new(MemorySessionStorage::with_session(persisted("opaque-token")));
    let store = store_with(storage);
    store.restore();

    let err = store
        .login(&FakeAuthApi::ok("other"), "iryna@example.com", "secret")
        .await
        .expect_err("already authenticated");
    assert!(matches!(
        err,
        ClientError::InvalidTransition {
            status: SessionStatus::Authenticated,
            ..
        }
    ));
    assert_eq!(store.token().expect("token").expose(), "opaque-token");
}

#[tokio::test]
async fn login_before_restore_is_an_invalid_transition() {
    let store = store_with(Arc::new(MemorySessionStorage::new()));
    let err = store
        .login(&FakeAuthApi::ok("t"), "iryna@example.com", "secret")
        .await
        .expect_err("not restored");
    assert!(matches!(
        err,
        ClientError::InvalidTransition {
            status: SessionStatus::Uninitialized,
            ..
        }
    ));
}

#[tokio::test]
async fn logout_is_idempotent() {
    let (store, storage) = restored_store();
    store
        .login(&FakeAuthApi::ok("issued-token"), "iryna@example.com", "secret")
        .await
        .expect("login");

    store.logout();
    assert_eq!(store.status(), SessionStatus::Unauthenticated);
    assert!(storage.snapshot().is_none());

    store.logout();
    assert_eq!(store.status(), SessionStatus::Unauthenticated);
    assert!(store.token().is_none());
    assert!(storage.snapshot().is_none());
}

#[test]
fn invalidate_announces_only_demoted_sessions() {
    let storage = Arc::new(MemorySessionStorage::with_session(persisted("opaque-token")));
    let (events, mut rx) = broadcast::channel(16);
    let store = SessionStore::new(Arc::clone(&storage) as Arc<dyn SessionStorage>, events);
    store.restore();

    assert!(store.invalidate(Some("Could not validate credentials")));
    assert!(!store.invalidate(None));

    assert_eq!(store.status(), SessionStatus::Unauthenticated);
    assert!(storage.snapshot().is_none());

    let mut invalidations = 0;
    while let Ok(event) = rx.try_recv() {
        if let ClientEvent::SessionInvalidated { reason } = event {
            assert_eq!(reason, "Could not validate credentials");
            invalidations += 1;
        }
    }
    assert_eq!(invalidations, 1);
}

#[test]
fn credential_token_debug_is_redacted() {
    let token = CredentialToken::parse("super-secret").expect("token");
    assert_eq!(format!("{token:?}"), "CredentialToken(***)");
    assert!(CredentialToken::parse("").is_err());
}

#[test]
fn signup_form_rejects_password_mismatch_before_any_call() {
    let form = SignupForm {
        name: "Ірина".into(),
        email: "iryna@example.com".into(),
        password: "secret".into(),
        confirm_password: "secreT".into(),
    };
    assert!(matches!(form.validate(), Err(ClientError::Validation(_))));

    let form = SignupForm {
        confirm_password: "secret".into(),
        ..form
    };
    assert!(form.validate().is_ok());
}

#[test]
fn login_form_requires_plausible_email_and_password() {
    let valid = LoginForm {
        email: "iryna@example.com".into(),
        password: "secret".into(),
    };
    assert!(valid.validate().is_ok());

    for email in ["", "iryna", "@example.com", "iryna@", "iryna@.com", "i ryna@example.com"] {
        let form = LoginForm {
            email: email.into(),
            ..valid.clone()
        };
        assert!(form.validate().is_err(), "accepted {email:?}");
    }

    let form = LoginForm {
        password: "   ".into(),
        ..valid
    };
    assert!(form.validate().is_err());
}
