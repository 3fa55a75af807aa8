use serde::Deserialize;

use artifacthub_queue::DEFAULT_MAX_ATTEMPTS;

/// Configuration for the clean request queue.
#[derive(Debug, Deserialize)]
pub struct QueueSection {
    /// Deliveries attempted before a request is dead-lettered.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
