use serde::Deserialize;

/// Configuration for the workflow and pipeline deletion consumers.
#[derive(Debug, Deserialize)]
pub struct DeletionSection {
    /// Whether this process consumes deletion events.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Concurrent consumers per event kind.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for DeletionSection {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            concurrency: default_concurrency(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_concurrency() -> usize {
    1
}
