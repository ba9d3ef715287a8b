use shared::error::ErrorCode;
use thiserror::Error;

use crate::session::SessionStatus;

#[derive(Debug, Clone, Error)]
pub enum ClientError {
    /// Login or signup was refused; `message` is ready to show to the user.
    #[error("{message}")]
    Rejected { message: String },
    #[error("session rejected by server: {}", .detail.as_deref().unwrap_or("unauthorized"))]
    Unauthorized { detail: Option<String> },
    #[error("server returned HTTP {status}: {}", .detail.as_deref().unwrap_or("no details"))]
    Http {
        status: u16,
        code: ErrorCode,
        detail: Option<String>,
    },
    #[error("request failed: {0}")]
    Transport(String),
    #[error("unexpected response payload: {0}")]
    Decode(String),
    #[error("{0}")]
    Validation(String),
    #[error("authentication already in progress")]
    AuthInProgress,
    #[error("cannot {operation} while session is {status}")]
    InvalidTransition {
        operation: &'static str,
        status: SessionStatus,
    },
    #[error("session storage failure: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn http(status: u16, detail: Option<String>) -> Self {
        ClientError::Http {
            status,
            code: ErrorCode::from_status(status),
            detail,
        }
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ClientError::Unauthorized { .. })
    }

    /// The message the service attached to a failed response, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ClientError::Unauthorized { detail } | ClientError::Http { detail, .. } => {
                detail.as_deref()
            }
            ClientError::Rejected { message } => Some(message),
            _ => None,
        }
    }

    /// Remote failures are the ones a retry might fix; local ones will not.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            ClientError::Unauthorized { .. }
                | ClientError::Http { .. }
                | ClientError::Transport(_)
                | ClientError::Decode(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ClientError::Decode(err.to_string())
        } else if err.is_timeout() {
            ClientError::Transport(format!("request timed out: {err}"))
        } else {
            ClientError::Transport(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}
