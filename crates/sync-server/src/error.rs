use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncServerError>;

#[derive(Debug, Error)]
pub enum SyncServerError {
    #[error("Record source failed: {0}")]
    Source(#[from] tandem_core::Error),

    #[error("Invalid client message: {0}")]
    InvalidMessage(#[from] serde_json::Error),

    #[error("Connection {0} is closed")]
    ConnectionClosed(String),
}
