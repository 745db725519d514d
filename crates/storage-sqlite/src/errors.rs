//! Storage errors and their mapping onto the core error type.

use tandem_core::errors::{DatabaseError, Error};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("Connection failed: {0}")]
    Connection(#[from] diesel::ConnectionError),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Writer closed: {0}")]
    WriterClosed(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        let message = err.to_string();
        let database = match err {
            StorageError::Query(_) => DatabaseError::QueryFailed(message),
            StorageError::Connection(_) | StorageError::Pool(_) => {
                DatabaseError::ConnectionFailed(message)
            }
            StorageError::Migration(_) => DatabaseError::MigrationFailed(message),
            StorageError::WriterClosed(_) => DatabaseError::WriterUnavailable(message),
            StorageError::Corrupt(_) => DatabaseError::Internal(message),
        };
        Error::Database(database)
    }
}
