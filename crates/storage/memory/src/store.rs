//! In-memory storage backend with helpers for seeding aged objects.

use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use artifacthub_core::ResumeToken;
use artifacthub_storage::{
    Bucket, BucketOptions, BufferedPathIterator, ListOptions, ObjectPager, Page, PathItem,
    PathIterator, StorageClient, StorageError, dir_prefix,
};

/// Objects returned per page when the caller does not ask for fewer.
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone)]
struct StoredObject {
    size: u64,
    modified: DateTime<Utc>,
}

impl StoredObject {
    fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.modified).to_std().unwrap_or(Duration::ZERO)
    }
}

type Objects = BTreeMap<String, StoredObject>;

/// In-memory implementation of [`StorageClient`].
///
/// Buckets are ordered maps keyed by the full object key, so pagination
/// tokens are simply the last key returned. Deleting already returned
/// objects never shifts the cursor.
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    buckets: Arc<DashMap<String, Objects>>,
    page_size: usize,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(DashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Cap every page at `page_size` objects.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Create a bucket with a known name. Existing buckets are left as is.
    pub fn create_bucket_named(&self, name: &str) {
        self.buckets.entry(name.to_owned()).or_default();
    }

    /// Store an object whose last modification was `age` ago, creating the
    /// bucket if needed.
    pub fn insert_with_age(&self, options: &BucketOptions, path: &str, age: Duration) {
        let modified = Utc::now() - chrono::Duration::from_std(age).unwrap_or_default();
        self.buckets
            .entry(options.name.clone())
            .or_default()
            .insert(
                options.full_key(path),
                StoredObject {
                    size: 1024,
                    modified,
                },
            );
    }

    pub fn bucket_exists(&self, name: &str) -> bool {
        self.buckets.contains_key(name)
    }

    /// Number of objects under the bucket prefix.
    pub fn object_count(&self, options: &BucketOptions) -> usize {
        let prefix = options.full_key("");
        self.buckets.get(&options.name).map_or(0, |objects| {
            objects.keys().filter(|k| k.starts_with(&prefix)).count()
        })
    }

    fn memory_bucket(&self, options: &BucketOptions) -> MemoryBucket {
        MemoryBucket {
            buckets: Arc::clone(&self.buckets),
            options: options.clone(),
            page_size: self.page_size,
        }
    }
}

#[async_trait]
impl StorageClient for MemoryStorage {
    async fn create_bucket(&self) -> Result<String, StorageError> {
        let name = format!("artifacthub-{}", uuid::Uuid::new_v4().simple());
        self.create_bucket_named(&name);
        Ok(name)
    }

    fn bucket(&self, options: &BucketOptions) -> Arc<dyn Bucket> {
        Arc::new(self.memory_bucket(options))
    }
}

/// Handle on one bucket prefix of a [`MemoryStorage`].
#[derive(Debug, Clone)]
pub struct MemoryBucket {
    buckets: Arc<DashMap<String, Objects>>,
    options: BucketOptions,
    page_size: usize,
}

impl MemoryBucket {
    fn missing(&self) -> StorageError {
        StorageError::MissingBucket(self.options.name.clone())
    }

    fn with_objects<T>(&self, f: impl FnOnce(&Objects) -> T) -> Result<T, StorageError> {
        let objects = self
            .buckets
            .get(&self.options.name)
            .ok_or_else(|| self.missing())?;
        Ok(f(&objects))
    }

    fn with_objects_mut<T>(&self, f: impl FnOnce(&mut Objects) -> T) -> Result<T, StorageError> {
        let mut objects = self
            .buckets
            .get_mut(&self.options.name)
            .ok_or_else(|| self.missing())?;
        Ok(f(&mut objects))
    }

    /// Full key prefix of a bucket-relative directory.
    fn full_dir(&self, path: &str) -> String {
        self.options.full_key(&dir_prefix(path))
    }
}

#[async_trait]
impl Bucket for MemoryBucket {
    fn options(&self) -> &BucketOptions {
        &self.options
    }

    async fn list_path(
        &self,
        options: ListOptions,
    ) -> Result<Box<dyn PathIterator>, StorageError> {
        let prefix = self.full_dir(&options.path);
        let now = Utc::now();

        let entries = self.with_objects(|objects| {
            let mut directories = BTreeSet::new();
            let mut entries = Vec::new();
            for (key, object) in objects.range::<str, _>(start_bound(&prefix, None)) {
                if !key.starts_with(&prefix) {
                    break;
                }
                let rest = &key[prefix.len()..];
                match rest.find('/') {
                    Some(slash) if options.use_delimiter => {
                        directories.insert(format!("{prefix}{}", &rest[..=slash]));
                    }
                    _ => entries.push(PathItem::file(
                        self.options.relative_path(key),
                        object.age(now),
                        object.size,
                    )),
                }
            }
            entries.extend(
                directories
                    .iter()
                    .map(|dir| PathItem::directory(self.options.relative_path(dir))),
            );
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            entries
        })?;

        Ok(Box::new(BufferedPathIterator::new(entries)))
    }

    async fn list_objects_with_pagination(
        &self,
        options: ListOptions,
    ) -> Result<Box<dyn ObjectPager>, StorageError> {
        Ok(Box::new(MemoryObjectPager {
            bucket: self.clone(),
            prefix: self.full_dir(&options.path),
            page_size: options.page_size(self.page_size).min(self.page_size),
            cursor: options.pagination_token.map(ResumeToken::into_inner),
        }))
    }

    async fn delete_objects(&self, paths: &[String]) -> Result<(), StorageError> {
        self.with_objects_mut(|objects| {
            for path in paths {
                objects.remove(&self.options.full_key(path));
            }
        })
    }

    async fn delete_dir(&self, path: &str) -> Result<(), StorageError> {
        let prefix = self.full_dir(path);
        self.with_objects_mut(|objects| objects.retain(|key, _| !key.starts_with(&prefix)))
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        let key = self.options.full_key(path);
        self.with_objects_mut(|objects| {
            objects.remove(&key);
        })
    }

    async fn is_file(&self, path: &str) -> Result<bool, StorageError> {
        if path.is_empty() {
            return Ok(false);
        }
        let key = self.options.full_key(path);
        self.with_objects(|objects| objects.contains_key(&key))
    }

    async fn is_dir(&self, path: &str) -> Result<bool, StorageError> {
        if path.is_empty() {
            return Ok(true);
        }
        let prefix = self.full_dir(path);
        self.with_objects(|objects| {
            objects
                .range::<str, _>(start_bound(&prefix, None))
                .next()
                .is_some_and(|(key, _)| key.starts_with(&prefix))
        })
    }

    async fn create_object(&self, path: &str, content: Bytes) -> Result<(), StorageError> {
        let key = self.options.full_key(path);
        self.with_objects_mut(|objects| {
            objects.insert(
                key,
                StoredObject {
                    size: content.len() as u64,
                    modified: Utc::now(),
                },
            );
        })
    }

    async fn destroy(&self) -> Result<(), StorageError> {
        self.buckets
            .remove_if(&self.options.name, |_, objects| objects.is_empty());
        Ok(())
    }
}

/// Start bound for a scan under `prefix`, resuming strictly after `cursor`.
fn start_bound<'a>(prefix: &'a str, cursor: Option<&'a str>) -> (Bound<&'a str>, Bound<&'a str>) {
    match cursor {
        Some(cursor) if cursor >= prefix => (Bound::Excluded(cursor), Bound::Unbounded),
        _ => (Bound::Included(prefix), Bound::Unbounded),
    }
}

struct MemoryObjectPager {
    bucket: MemoryBucket,
    prefix: String,
    page_size: usize,
    cursor: Option<String>,
}

#[async_trait]
impl ObjectPager for MemoryObjectPager {
    async fn next_page(&mut self) -> Result<Page, StorageError> {
        let now = Utc::now();
        let prefix = self.prefix.clone();
        let cursor = self.cursor.clone();
        let page_size = self.page_size;

        let (objects, last_key, has_more) = self.bucket.with_objects(|objects| {
            let mut matching = objects
                .range::<str, _>(start_bound(&prefix, cursor.as_deref()))
                .take_while(|(key, _)| key.starts_with(&prefix));

            let mut page = Vec::with_capacity(page_size);
            let mut last_key = None;
            for (key, object) in matching.by_ref().take(page_size) {
                page.push(PathItem::file(
                    self.bucket.options.relative_path(key),
                    object.age(now),
                    object.size,
                ));
                last_key = Some(key.clone());
            }
            (page, last_key, matching.next().is_some())
        })?;

        let next_token = if has_more {
            last_key.clone().and_then(ResumeToken::new)
        } else {
            None
        };
        if let Some(key) = last_key {
            self.cursor = Some(key);
        }

        Ok(Page {
            objects,
            next_token,
        })
    }
}
