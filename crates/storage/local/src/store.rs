//! Filesystem storage backend.
//!
//! Each bucket is a directory below the configured root and each object key
//! is a relative file path inside it. Listings walk the tree in key order,
//! so the last key returned works as a pagination cursor. Object age is
//! taken from the file's modification time.

use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use artifacthub_core::ResumeToken;
use artifacthub_storage::{
    Bucket, BucketOptions, BufferedPathIterator, ListOptions, ObjectPager, Page, PathItem,
    PathIterator, StorageClient, StorageError, dir_prefix,
};

/// Objects returned per page when the caller does not ask for fewer.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

fn backend(e: &io::Error) -> StorageError {
    StorageError::Backend(e.to_string())
}

/// Object keys are UTF-8. A file whose name is not cannot be addressed by a
/// key, so listing it is an error rather than a lossy key.
fn entry_name(entry: &tokio::fs::DirEntry) -> Result<String, StorageError> {
    entry.file_name().into_string().map_err(|raw| {
        let lossy = raw.to_string_lossy().into_owned();
        warn!(path = %entry.path().display(), "object name is not valid UTF-8");
        StorageError::Backend(format!("object name is not valid UTF-8: {lossy}"))
    })
}

/// Filesystem-backed implementation of [`StorageClient`].
///
/// Every bucket is a directory under `root` and every object a file below
/// it. Object age is derived from the file modification time.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: Arc<PathBuf>,
}

impl LocalStorage {
    /// Use `root` as the parent directory of all buckets, creating it if
    /// needed.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| backend(&e))?;
        Ok(Self {
            root: Arc::new(root),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl StorageClient for LocalStorage {
    async fn create_bucket(&self) -> Result<String, StorageError> {
        let name = format!("artifacthub-{}", uuid::Uuid::new_v4().simple());
        tokio::fs::create_dir_all(self.root.join(&name))
            .await
            .map_err(|e| backend(&e))?;
        debug!(bucket = %name, "created local bucket");
        Ok(name)
    }

    fn bucket(&self, options: &BucketOptions) -> Arc<dyn Bucket> {
        Arc::new(LocalBucket {
            bucket_root: self.root.join(&options.name),
            options: options.clone(),
        })
    }
}

/// Handle on one bucket prefix of a [`LocalStorage`].
#[derive(Debug, Clone)]
pub struct LocalBucket {
    bucket_root: PathBuf,
    options: BucketOptions,
}

/// A file found while walking a bucket, keyed by its full object key.
struct FileEntry {
    key: String,
    age: Duration,
    size: u64,
}

impl LocalBucket {
    async fn ensure_exists(&self) -> Result<(), StorageError> {
        match tokio::fs::metadata(&self.bucket_root).await {
            Ok(meta) if meta.is_dir() => Ok(()),
            Ok(_) => Err(StorageError::MissingBucket(self.options.name.clone())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StorageError::MissingBucket(self.options.name.clone()))
            }
            Err(e) => Err(backend(&e)),
        }
    }

    /// Resolve a full object key to a path inside the bucket directory.
    fn resolve(&self, key: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(key.trim_end_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::Backend(format!("invalid object key: {key}")));
        }
        Ok(self.bucket_root.join(relative))
    }

    fn full_dir(&self, path: &str) -> String {
        self.options.full_key(&dir_prefix(path))
    }

    /// Every file below the full key prefix `dir`, sorted by key.
    async fn walk(&self, dir: &str) -> Result<Vec<FileEntry>, StorageError> {
        let now = SystemTime::now();
        let mut files = Vec::new();
        let mut pending = vec![(self.resolve(dir)?, dir.to_owned())];

        while let Some((path, key_prefix)) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&path).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(backend(&e)),
            };

            while let Some(entry) = entries.next_entry().await.map_err(|e| backend(&e))? {
                let name = entry_name(&entry)?;
                let meta = entry.metadata().await.map_err(|e| backend(&e))?;
                let key = format!("{key_prefix}{name}");
                if meta.is_dir() {
                    pending.push((entry.path(), format!("{key}/")));
                } else {
                    let modified = meta.modified().map_err(|e| backend(&e))?;
                    files.push(FileEntry {
                        key,
                        age: now.duration_since(modified).unwrap_or(Duration::ZERO),
                        size: meta.len(),
                    });
                }
            }
        }

        files.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(files)
    }

    /// Immediate children of the full key prefix `dir`, sorted by key.
    async fn children(&self, dir: &str) -> Result<Vec<PathItem>, StorageError> {
        let now = SystemTime::now();
        let mut items = Vec::new();
        let mut entries = match tokio::fs::read_dir(self.resolve(dir)?).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(items),
            Err(e) => return Err(backend(&e)),
        };

        while let Some(entry) = entries.next_entry().await.map_err(|e| backend(&e))? {
            let name = entry_name(&entry)?;
            let meta = entry.metadata().await.map_err(|e| backend(&e))?;
            let key = format!("{dir}{name}");
            if meta.is_dir() {
                items.push(PathItem::directory(format!(
                    "{}/",
                    self.options.relative_path(&key)
                )));
            } else {
                let modified = meta.modified().map_err(|e| backend(&e))?;
                items.push(PathItem::file(
                    self.options.relative_path(&key),
                    now.duration_since(modified).unwrap_or(Duration::ZERO),
                    meta.len(),
                ));
            }
        }

        items.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(items)
    }

    /// Remove empty directories from `path` upwards, stopping at the bucket.
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.bucket_root || !dir.starts_with(&self.bucket_root) {
                break;
            }
            // Fails on non-empty directories, which ends the walk.
            if tokio::fs::remove_dir(dir).await.is_err() {
                break;
            }
            current = dir.parent();
        }
    }

    async fn remove_file(&self, key: &str) -> Result<(), StorageError> {
        let path = self.resolve(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                self.prune_empty_parents(&path).await;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(backend(&e)),
        }
    }
}

#[async_trait]
impl Bucket for LocalBucket {
    fn options(&self) -> &BucketOptions {
        &self.options
    }

    async fn list_path(
        &self,
        options: ListOptions,
    ) -> Result<Box<dyn PathIterator>, StorageError> {
        self.ensure_exists().await?;
        let dir = self.full_dir(&options.path);

        let items = if options.use_delimiter {
            self.children(&dir).await?
        } else {
            self.walk(&dir)
                .await?
                .into_iter()
                .map(|f| PathItem::file(self.options.relative_path(&f.key), f.age, f.size))
                .collect()
        };

        Ok(Box::new(BufferedPathIterator::new(items)))
    }

    async fn list_objects_with_pagination(
        &self,
        options: ListOptions,
    ) -> Result<Box<dyn ObjectPager>, StorageError> {
        Ok(Box::new(LocalObjectPager {
            bucket: self.clone(),
            dir: self.full_dir(&options.path),
            page_size: options.page_size(DEFAULT_PAGE_SIZE),
            cursor: options.pagination_token.map(ResumeToken::into_inner),
        }))
    }

    async fn delete_objects(&self, paths: &[String]) -> Result<(), StorageError> {
        self.ensure_exists().await?;
        for path in paths {
            self.remove_file(&self.options.full_key(path)).await?;
        }
        Ok(())
    }

    async fn delete_dir(&self, path: &str) -> Result<(), StorageError> {
        self.ensure_exists().await?;
        let dir = self.full_dir(path);

        if dir.is_empty() {
            // The whole bucket: remove its contents, keep the directory.
            let mut entries = tokio::fs::read_dir(&self.bucket_root)
                .await
                .map_err(|e| backend(&e))?;
            while let Some(entry) = entries.next_entry().await.map_err(|e| backend(&e))? {
                let meta = entry.metadata().await.map_err(|e| backend(&e))?;
                let result = if meta.is_dir() {
                    tokio::fs::remove_dir_all(entry.path()).await
                } else {
                    tokio::fs::remove_file(entry.path()).await
                };
                result.map_err(|e| backend(&e))?;
            }
            return Ok(());
        }

        let target = self.resolve(&dir)?;
        match tokio::fs::remove_dir_all(&target).await {
            Ok(()) => {
                self.prune_empty_parents(&target).await;
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(backend(&e)),
        }
    }

    async fn delete_file(&self, path: &str) -> Result<(), StorageError> {
        self.ensure_exists().await?;
        self.remove_file(&self.options.full_key(path)).await
    }

    async fn is_file(&self, path: &str) -> Result<bool, StorageError> {
        if path.is_empty() {
            return Ok(false);
        }
        self.ensure_exists().await?;
        match tokio::fs::metadata(self.resolve(&self.options.full_key(path))?).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(backend(&e)),
        }
    }

    async fn is_dir(&self, path: &str) -> Result<bool, StorageError> {
        if path.is_empty() {
            return Ok(true);
        }
        self.ensure_exists().await?;
        match tokio::fs::metadata(self.resolve(&self.full_dir(path))?).await {
            Ok(meta) => Ok(meta.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(backend(&e)),
        }
    }

    async fn create_object(&self, path: &str, content: Bytes) -> Result<(), StorageError> {
        self.ensure_exists().await?;
        let target = self.resolve(&self.options.full_key(path))?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| backend(&e))?;
        }
        tokio::fs::write(&target, &content)
            .await
            .map_err(|e| backend(&e))
    }

    async fn destroy(&self) -> Result<(), StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.bucket_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(backend(&e)),
        };

        // Shared buckets still holding other prefixes stay.
        if entries
            .next_entry()
            .await
            .map_err(|e| backend(&e))?
            .is_some()
        {
            debug!(bucket = %self.options.name, "bucket not empty, keeping it");
            return Ok(());
        }

        match tokio::fs::remove_dir(&self.bucket_root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(backend(&e)),
        }
    }
}

struct LocalObjectPager {
    bucket: LocalBucket,
    dir: String,
    page_size: usize,
    cursor: Option<String>,
}

#[async_trait]
impl ObjectPager for LocalObjectPager {
    async fn next_page(&mut self) -> Result<Page, StorageError> {
        self.bucket.ensure_exists().await?;
        let files = self.bucket.walk(&self.dir).await?;

        let cursor = self.cursor.clone();
        let mut remaining = files
            .into_iter()
            .filter(move |f| cursor.as_deref().is_none_or(|c| f.key.as_str() > c));
        let page: Vec<FileEntry> = remaining.by_ref().take(self.page_size).collect();
        let has_more = remaining.next().is_some();

        let last_key = page.last().map(|f| f.key.clone());
        let objects = page
            .into_iter()
            .map(|f| PathItem::file(self.bucket.options.relative_path(&f.key), f.age, f.size))
            .collect();

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
