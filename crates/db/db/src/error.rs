use artifacthub_core::PolicyError;
use thiserror::Error;

/// Errors from database and transaction operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    InvalidPolicy(#[from] PolicyError),

    #[error("backend error: {0}")]
    Backend(String),
}
