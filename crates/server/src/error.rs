use thiserror::Error;

use artifacthub_db::DbError;
use artifacthub_storage::StorageError;

/// Errors that can occur while starting the cleanup process.
#[derive(Debug, Error)]
pub enum ServerError {
    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// An I/O error (e.g. reading the config file).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] DbError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
