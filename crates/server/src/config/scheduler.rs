use std::time::Duration;

use serde::Deserialize;

use artifacthub_bucketcleaner::SchedulerConfig;

/// Configuration for the cleaning scheduler.
#[derive(Debug, Deserialize)]
pub struct SchedulerSection {
    /// Whether this process runs the scheduler loop.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// How often to look for due artifacts (seconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_seconds: u64,
    /// Maximum number of artifacts scheduled per tick.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            tick_interval_seconds: default_tick_interval(),
            batch_size: default_batch_size(),
        }
    }
}

impl SchedulerSection {
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            tick_interval: Duration::from_secs(self.tick_interval_seconds.max(1)),
            batch_size: self.batch_size,
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_tick_interval() -> u64 {
    60
}

fn default_batch_size() -> usize {
    SchedulerConfig::default().batch_size
}
