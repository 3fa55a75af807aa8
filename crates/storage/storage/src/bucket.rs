use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::StorageError;
use crate::types::{BucketOptions, ListOptions, Page, PathItem};

/// Lazily yields the entries of a listing.
#[async_trait]
pub trait PathIterator: Send {
    /// Produce the next entry.
    ///
    /// Fails with [`StorageError::NoMoreObjects`] once the listing is
    /// exhausted.
    async fn next(&mut self) -> Result<PathItem, StorageError>;

    /// True only after `next` has returned [`StorageError::NoMoreObjects`].
    fn done(&self) -> bool;

    /// Drain the iterator, returning the number of entries seen.
    async fn count(&mut self) -> Result<usize, StorageError> {
        let mut count = 0;
        loop {
            match self.next().await {
                Ok(_) => count += 1,
                Err(StorageError::NoMoreObjects) => return Ok(count),
                Err(e) => return Err(e),
            }
        }
    }
}

/// Cursor-based paging over the objects under a prefix.
#[async_trait]
pub trait ObjectPager: Send {
    /// Fetch the next page. A page without a `next_token` is the last one.
    async fn next_page(&mut self) -> Result<Page, StorageError>;
}

/// Operations on the objects owned by one artifact.
///
/// Every path is relative to [`BucketOptions::path_prefix`].
#[async_trait]
pub trait Bucket: Send + Sync {
    fn options(&self) -> &BucketOptions;

    async fn list_path(&self, options: ListOptions)
    -> Result<Box<dyn PathIterator>, StorageError>;

    async fn list_objects_with_pagination(
        &self,
        options: ListOptions,
    ) -> Result<Box<dyn ObjectPager>, StorageError>;

    /// Best-effort bulk delete. Paths that do not exist are ignored.
    async fn delete_objects(&self, paths: &[String]) -> Result<(), StorageError>;

    /// Delete a file, or everything below the path when it is a directory.
    async fn delete_path(&self, path: &str) -> Result<(), StorageError> {
        if self.is_file(path).await? {
            self.delete_file(path).await
        } else {
            self.delete_dir(path).await
        }
    }

    /// Delete every object below `path`. The empty path empties the bucket.
    async fn delete_dir(&self, path: &str) -> Result<(), StorageError>;

    async fn delete_file(&self, path: &str) -> Result<(), StorageError>;

    /// The empty path is never a file.
    async fn is_file(&self, path: &str) -> Result<bool, StorageError>;

    /// The empty path is always a directory.
    async fn is_dir(&self, path: &str) -> Result<bool, StorageError>;

    async fn create_object(&self, path: &str, content: Bytes) -> Result<(), StorageError>;

    /// Remove the bucket itself. Shared buckets that still hold objects of
    /// other artifacts are left in place.
    async fn destroy(&self) -> Result<(), StorageError>;
}

/// Entry point of a storage backend.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Create a new bucket and return its name.
    async fn create_bucket(&self) -> Result<String, StorageError>;

    fn bucket(&self, options: &BucketOptions) -> Arc<dyn Bucket>;

    /// Delete every object under the prefix, then the bucket.
    ///
    /// Destroying a bucket that is already gone succeeds.
    async fn destroy_bucket(&self, options: &BucketOptions) -> Result<(), StorageError> {
        let bucket = self.bucket(options);
        match bucket.delete_dir("").await {
            Ok(()) | Err(StorageError::MissingBucket(_)) => {}
            Err(e) => return Err(e),
        }
        bucket.destroy().await
    }
}

/// A [`PathIterator`] over entries that were listed up front.
#[derive(Debug, Default)]
pub struct BufferedPathIterator {
    entries: VecDeque<PathItem>,
    done: bool,
}

impl BufferedPathIterator {
    pub fn new(entries: impl IntoIterator<Item = PathItem>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
            done: false,
        }
    }
}

#[async_trait]
impl PathIterator for BufferedPathIterator {
    async fn next(&mut self) -> Result<PathItem, StorageError> {
        if let Some(entry) = self.entries.pop_front() {
            return Ok(entry);
        }
        self.done = true;
        Err(StorageError::NoMoreObjects)
    }

    fn done(&self) -> bool {
        self.done
    }
}
