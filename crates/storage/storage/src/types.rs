use std::time::Duration;

use artifacthub_core::ResumeToken;

/// Identifies the bucket (and key prefix inside it) owned by one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BucketOptions {
    pub name: String,
    /// Key prefix inside a shared bucket. Empty when the artifact owns the
    /// whole bucket.
    pub path_prefix: String,
}

impl BucketOptions {
    pub fn new(name: impl Into<String>, path_prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path_prefix: path_prefix.into(),
        }
    }

    /// Map a bucket-relative path to its full object key.
    pub fn full_key(&self, path: &str) -> String {
        if self.path_prefix.is_empty() {
            path.to_owned()
        } else {
            format!("{}/{path}", self.path_prefix)
        }
    }

    /// Strip the bucket prefix from a full object key.
    pub fn relative_path<'a>(&self, key: &'a str) -> &'a str {
        if self.path_prefix.is_empty() {
            return key;
        }
        key.strip_prefix(&self.path_prefix)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(key)
    }
}

/// Options for listing and paging objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListOptions {
    /// Directory to list, relative to the bucket prefix. Always treated as
    /// ending in `/`; empty lists the whole bucket.
    pub path: String,
    /// Maximum keys per backend request. Zero uses the backend default.
    pub max_keys: usize,
    /// Yield immediate children only, one entry per sub-directory.
    pub use_delimiter: bool,
    /// Cursor to resume paging from.
    pub pagination_token: Option<ResumeToken>,
}

impl ListOptions {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys;
        self
    }

    #[must_use]
    pub fn with_delimiter(mut self) -> Self {
        self.use_delimiter = true;
        self
    }

    #[must_use]
    pub fn starting_at(mut self, token: Option<ResumeToken>) -> Self {
        self.pagination_token = token;
        self
    }

    /// Page size to use, falling back to `default` when unset.
    pub fn page_size(&self, default: usize) -> usize {
        if self.max_keys == 0 {
            default
        } else {
            self.max_keys
        }
    }
}

/// Normalize a directory path so it ends in `/`. The empty path stays empty.
pub fn dir_prefix(path: &str) -> String {
    if path.is_empty() || path.ends_with('/') {
        path.to_owned()
    } else {
        format!("{path}/")
    }
}

/// One entry produced by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathItem {
    /// Path relative to the bucket prefix. Directories end in `/`.
    pub path: String,
    pub is_directory: bool,
    /// Time since last modification. Absent for directories.
    pub age: Option<Duration>,
    pub size: u64,
}

impl PathItem {
    pub fn file(path: impl Into<String>, age: Duration, size: u64) -> Self {
        Self {
            path: path.into(),
            is_directory: false,
            age: Some(age),
            size,
        }
    }

    pub fn directory(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            is_directory: true,
            age: None,
            size: 0,
        }
    }
}

/// One page of objects.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub objects: Vec<PathItem>,
    /// Cursor for the next page; `None` once the listing is exhausted.
    pub next_token: Option<ResumeToken>,
}
