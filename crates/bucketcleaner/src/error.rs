use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use artifacthub_core::{DeletedScope, PolicyError};
use artifacthub_db::DbError;
use artifacthub_queue::QueueError;
use artifacthub_storage::StorageError;

/// Errors from cleaning one artifact bucket.
#[derive(Debug, Error)]
pub enum CleanerError {
    #[error("artifact {0} not found")]
    NotFound(Uuid),

    #[error("bucket already cleaned today: {0}")]
    AlreadyCleanedToday(Uuid),

    #[error("invalid clean request: {0}")]
    InvalidRequest(#[from] serde_json::Error),

    #[error("destroying bucket {bucket} timed out after {timeout:?}")]
    DestroyTimedOut { bucket: String, timeout: Duration },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] DbError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl CleanerError {
    /// Expected outcomes the worker acknowledges instead of retrying.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::AlreadyCleanedToday(_))
    }
}

/// Errors from one scheduling tick.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Database(#[from] DbError),
}

/// Errors from removing the artifacts of a deleted workflow or pipeline.
#[derive(Debug, Error)]
pub enum DeletionError {
    #[error("invalid deletion event: {0}")]
    InvalidEvent(#[from] serde_json::Error),

    #[error("{scope} deletion event carries an unusable id {id:?}")]
    InvalidScopeId { scope: DeletedScope, id: String },

    #[error("invalid artifact store id {0:?}")]
    InvalidArtifactId(String),

    #[error("artifact store {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Database(#[from] DbError),
}

/// Errors from administrative artifact operations.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("artifact {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    InvalidPolicy(#[from] PolicyError),

    #[error(transparent)]
    Database(DbError),
}

impl From<DbError> for AdminError {
    fn from(e: DbError) -> Self {
        match e {
            DbError::InvalidPolicy(policy) => Self::InvalidPolicy(policy),
            other => Self::Database(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn skips_are_recognized() {
        assert!(CleanerError::NotFound(Uuid::nil()).is_skip());
        assert!(CleanerError::AlreadyCleanedToday(Uuid::nil()).is_skip());
        assert!(!CleanerError::Storage(StorageError::NoMoreObjects).is_skip());
    }

    #[test]
    fn policy_errors_surface_through_the_database() {
        let err = AdminError::from(DbError::InvalidPolicy(PolicyError::AgeTooShort { age: 5 }));
        assert!(matches!(err, AdminError::InvalidPolicy(PolicyError::AgeTooShort { age: 5 })));
    }
}
