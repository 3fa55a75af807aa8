use std::time::Duration;

use serde::Deserialize;

use artifacthub_bucketcleaner::CleanerConfig;
use artifacthub_bucketcleaner::config::{DEFAULT_PAGE_SIZE, DEFAULT_PAGES_PER_INVOCATION};

/// Configuration for the clean request consumers.
#[derive(Debug, Deserialize)]
pub struct WorkerSection {
    /// Whether this process consumes clean requests.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Number of concurrent consumers.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Listing pages processed per request before a continuation is published.
    #[serde(default = "default_pages_per_invocation")]
    pub pages_per_invocation: usize,
    /// Objects requested per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Upper bound on destroying an emptied bucket (seconds).
    #[serde(default = "default_destroy_timeout")]
    pub destroy_timeout_seconds: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            concurrency: default_concurrency(),
            pages_per_invocation: default_pages_per_invocation(),
            page_size: default_page_size(),
            destroy_timeout_seconds: default_destroy_timeout(),
        }
    }
}

impl WorkerSection {
    pub fn cleaner_config(&self) -> CleanerConfig {
        CleanerConfig {
            pages_per_invocation: self.pages_per_invocation,
            page_size: self.page_size,
            destroy_timeout: Duration::from_secs(self.destroy_timeout_seconds),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_pages_per_invocation() -> usize {
    DEFAULT_PAGES_PER_INVOCATION
}

fn default_page_size() -> usize {
    DEFAULT_PAGE_SIZE
}

fn default_destroy_timeout() -> u64 {
    60
}
