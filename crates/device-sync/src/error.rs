//! Errors raised while talking to a Tandem server, and how the scheduler
//! should react to each.

use tandem_core::errors::RemoteError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, DeviceSyncError>;

/// What a caller should do after a failed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Failures of a request against the Tandem server.
#[derive(Debug, Error)]
pub enum DeviceSyncError {
    /// Transport failure: connect, timeout or a broken body stream
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body or request payload did not match its schema
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Non-success response; `message` comes from the error body when present.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Caller supplied something the server could never accept
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// No token stored, or the server rejected it
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Local file could not be read or written
    #[error("File error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceSyncError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Timeouts, throttling and 5xx are worth another attempt; a rejected
    /// token needs the user to sign in again.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } => classify_status(*status),
            Self::Http(_) | Self::Io(_) => ApiRetryClass::Retryable,
            Self::Json(_) | Self::InvalidRequest(_) => ApiRetryClass::Permanent,
            Self::Auth(_) => ApiRetryClass::ReauthRequired,
        }
    }
}

fn classify_status(status: u16) -> ApiRetryClass {
    match status {
        401 | 403 => ApiRetryClass::ReauthRequired,
        408 | 409 | 423 | 425 | 429 | 500..=599 => ApiRetryClass::Retryable,
        _ => ApiRetryClass::Permanent,
    }
}

impl From<DeviceSyncError> for tandem_core::Error {
    fn from(err: DeviceSyncError) -> Self {
        let status = err.status_code();
        let message = err.to_string();
        let remote = match err.retry_class() {
            ApiRetryClass::Retryable => RemoteError {
                retryable: true,
                status,
                message,
            },
            ApiRetryClass::Permanent | ApiRetryClass::ReauthRequired => {
                RemoteError::permanent(status, message)
            }
        };
        tandem_core::Error::Remote(remote)
    }
}
