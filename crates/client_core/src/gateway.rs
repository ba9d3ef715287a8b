use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use shared::{
    error::ErrorBody,
    protocol::{
        Identity, LessonRangeQuery, LessonRecord, LoginRequest, NewStudent, SignupRequest,
        StudentRecord, TokenResponse,
    },
};
use tracing::{debug, warn};
use url::Url;

use crate::{
    calendar::{ScheduleSource, VisibleRange},
    config::ClientSettings,
    error::ClientError,
    session::{AuthApi, SessionStore},
    students::StudentSource,
};

const LOGIN_PATH: &str = "auth/login";
const SIGNUP_PATH: &str = "auth/signup";
const IDENTITY_PATH: &str = "auth/me";
const LESSONS_PATH: &str = "lessons/";
const STUDENTS_PATH: &str = "students/";

/// Which credential a request carries.
#[derive(Debug, Clone, Copy)]
pub enum Credential<'a> {
    /// Whatever the session store currently holds, if anything.
    Session,
    /// A token that is not yet part of the session (identity fetch during login).
    Explicit(&'a str),
}

/// The only way this crate talks to the service. Every call goes through
/// [`Gateway::decorate`] on the way out and [`Gateway::classify`] on the way
/// back; the 401 rule lives in `classify` and nowhere else.
pub struct Gateway {
    http: Client,
    base_url: Url,
    session: Arc<SessionStore>,
}

impl Gateway {
    pub fn new(settings: &ClientSettings, session: Arc<SessionStore>) -> Result<Arc<Self>, ClientError> {
        let base_url = settings
            .base_url()
            .map_err(|err| ClientError::Validation(format!("{err:#}")))?;
        let http = Client::builder()
            .timeout(settings.request_timeout())
            .build()
            .map_err(|err| ClientError::Transport(format!("failed to build http client: {err}")))?;
        Ok(Arc::new(Self {
            http,
            base_url,
            session,
        }))
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|err| ClientError::Validation(format!("invalid endpoint path '{path}': {err}")))
    }

    fn decorate(&self, request: RequestBuilder, credential: Credential<'_>) -> RequestBuilder {
        match credential {
            Credential::Explicit(token) => request.bearer_auth(token),
            Credential::Session => match self.session.token() {
                Some(token) => request.bearer_auth(token.expose()),
                None => request,
            },
        }
    }

    async fn classify(&self, response: Response) -> Result<Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().clone();
        let body = response.bytes().await.unwrap_or_default();
        let detail = ErrorBody::message_from_bytes(&body);

        if status == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "gateway: service rejected credentials");
            self.session.invalidate(detail.as_deref());
            return Err(ClientError::Unauthorized { detail });
        }

        debug!(url = %url, status = status.as_u16(), "gateway: request failed");
        Err(ClientError::http(status.as_u16(), detail))
    }

    /// Sends a request built against this gateway's client and returns the
    /// successful response.
    pub async fn execute(
        &self,
        request: RequestBuilder,
        credential: Credential<'_>,
    ) -> Result<Response, ClientError> {
        let response = self.decorate(request, credential).send().await?;
        debug!(
            url = %response.url(),
            status = response.status().as_u16(),
            "gateway: response received"
        );
        self.classify(response).await
    }

    async fn decode<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }

    pub async fn get_json<T, Q>(
        &self,
        path: &str,
        query: Option<&Q>,
        credential: Credential<'_>,
    ) -> Result<T, ClientError>
    where
        T: DeserializeOwned,
        Q: Serialize + ?Sized,
    {
        let mut request = self.http.get(self.endpoint(path)?);
        if let Some(query) = query {
            request = request.query(query);
        }
        let response = self.execute(request, credential).await?;
        Self::decode(response).await
    }

    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let request = self.http.post(self.endpoint(path)?).json(body);
        let response = self.execute(request, Credential::Session).await?;
        Self::decode(response).await
    }

    pub async fn lessons_in_range(
        &self,
        range: &VisibleRange,
    ) -> Result<Vec<LessonRecord>, ClientError> {
        let query = LessonRangeQuery {
            start: range.start_str().to_string(),
            end: range.end_str().to_string(),
        };
        self.get_json(LESSONS_PATH, Some(&query), Credential::Session)
            .await
    }

    pub async fn list_students(&self) -> Result<Vec<StudentRecord>, ClientError> {
        self.get_json::<_, ()>(STUDENTS_PATH, None, Credential::Session)
            .await
    }

    pub async fn create_student(&self, student: &NewStudent) -> Result<StudentRecord, ClientError> {
        self.post_json(STUDENTS_PATH, student).await
    }
}

#[async_trait]
impl AuthApi for Gateway {
    async fn exchange_credentials(
        &self,
        request: &LoginRequest,
    ) -> Result<TokenResponse, ClientError> {
        self.post_json(LOGIN_PATH, request).await
    }

    async fn create_account(&self, request: &SignupRequest) -> Result<TokenResponse, ClientError> {
        self.post_json(SIGNUP_PATH, request).await
    }

    async fn fetch_identity(&self, token: &str) -> Result<Identity, ClientError> {
        self.get_json::<_, ()>(IDENTITY_PATH, None, Credential::Explicit(token))
            .await
    }
}

#[async_trait]
impl ScheduleSource for Gateway {
    async fn lessons_in_range(
        &self,
        range: &VisibleRange,
    ) -> Result<Vec<LessonRecord>, ClientError> {
        Gateway::lessons_in_range(self, range).await
    }
}

#[async_trait]
impl StudentSource for Gateway {
    async fn list_students(&self) -> Result<Vec<StudentRecord>, ClientError> {
        Gateway::list_students(self).await
    }

    async fn create_student(&self, student: &NewStudent) -> Result<StudentRecord, ClientError> {
        Gateway::create_student(self, student).await
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
