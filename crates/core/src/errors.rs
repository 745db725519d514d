//! Error types shared by every Tandem crate.

use thiserror::Error;

/// Result alias used across the core crate and its storage implementations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Database operation failed: {0}")]
    Database(#[from] DatabaseError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Mutation failed: {0}")]
    Mutation(#[from] MutationError),

    #[error("Validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

/// Failure reported by the remote API. `retryable` mirrors the transport's
/// retry classification so handlers can tell a dropped connection from a
/// rejected request.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct RemoteError {
    pub retryable: bool,
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            retryable: true,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            retryable: false,
            status,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    #[error("Writer is unavailable: {0}")]
    WriterUnavailable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failures of the replicated document engine. Corrupt state never decodes
/// into attributes.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Document {id} has corrupt state: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Update for document {id} could not be applied: {reason}")]
    InvalidUpdate { id: String, reason: String },
}

#[derive(Debug, Error)]
pub enum MutationError {
    #[error("Gave up on {entity} {id} after {attempts} conflicting writes")]
    ConflictRetriesExhausted {
        entity: &'static str,
        id: String,
        attempts: usize,
    },

    #[error("Node {0} has no parent but its type requires one")]
    MissingParent(String),

    #[error("Node {0} already exists")]
    AlreadyExists(String),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid attributes for {node_type}: {message}")]
    InvalidAttributes { node_type: String, message: String },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Ancestor chain of {0} is cyclic or too deep")]
    MalformedAncestry(String),
}

impl Error {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Permission and validation failures are final; retrying cannot fix them.
    pub fn is_permanent(&self) -> bool {
        match self {
            Self::PermissionDenied(_) | Self::Validation(_) | Self::NotFound(_) => true,
            Self::Remote(remote) => !remote.retryable,
            _ => false,
        }
    }
}
