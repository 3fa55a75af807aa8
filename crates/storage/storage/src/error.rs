use thiserror::Error;

/// Canonical storage errors every backend translates its failures into.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A path iterator has been exhausted.
    #[error("no more objects")]
    NoMoreObjects,

    #[error("bucket does not exist: {0}")]
    MissingBucket(String),

    /// Any other backend failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}
