use std::time::Duration;

/// Default number of storage pages one clean request may process.
pub const DEFAULT_PAGES_PER_INVOCATION: usize = 100;

/// Default maximum number of keys per storage page.
pub const DEFAULT_PAGE_SIZE: usize = 1000;

/// Tunables for a [`BatchCleaner`](crate::BatchCleaner).
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// Pages processed before the cleaner hands back a continuation.
    pub pages_per_invocation: usize,
    /// Maximum number of keys requested per storage page.
    pub page_size: usize,
    /// Wall-clock limit on destroying an emptied bucket.
    pub destroy_timeout: Duration,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            pages_per_invocation: DEFAULT_PAGES_PER_INVOCATION,
            page_size: DEFAULT_PAGE_SIZE,
            destroy_timeout: Duration::from_secs(60),
        }
    }
}

/// Tunables for the [`Scheduler`](crate::Scheduler).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between scheduling ticks.
    pub tick_interval: Duration,
    /// Maximum number of artifacts scheduled per tick.
    pub batch_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}
