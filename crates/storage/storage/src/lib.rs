//! Storage abstraction for artifact buckets.
//!
//! A [`StorageClient`] hands out [`Bucket`] handles scoped to one artifact's
//! path prefix. Paths passed to a bucket are relative to that prefix, and
//! listings return them the same way. Backends translate their failures
//! into [`StorageError`]; the [`testing`] module holds the conformance
//! suite every backend runs.

pub mod bucket;
pub mod error;
pub mod testing;
pub mod types;

pub use bucket::{Bucket, BufferedPathIterator, ObjectPager, PathIterator, StorageClient};
pub use error::StorageError;
pub use types::{BucketOptions, ListOptions, Page, PathItem, dir_prefix};
