mod database;
mod deletion;
mod logging;
mod queue;
mod scheduler;
mod storage;
mod worker;

#[cfg(test)]
mod tests;

pub use database::*;
pub use deletion::*;
pub use logging::*;
pub use queue::*;
pub use scheduler::*;
pub use storage::*;
pub use worker::*;

use std::path::Path;

use serde::Deserialize;

use crate::error::ServerError;

/// Top-level configuration for the cleanup process, loaded from a TOML file.
#[derive(Debug, Default, Deserialize)]
pub struct ArtifactHubConfig {
    /// Metadata database holding artifacts and retention policies.
    #[serde(default)]
    pub database: DatabaseConfig,
    /// Object storage holding the artifact buckets.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Periodic scheduling of cleaning episodes.
    #[serde(default)]
    pub scheduler: SchedulerSection,
    /// Queue consumers running the batch cleaner.
    #[serde(default)]
    pub worker: WorkerSection,
    /// Consumers for upstream workflow and pipeline deletions.
    #[serde(default)]
    pub deletion: DeletionSection,
    /// Clean request queue.
    #[serde(default)]
    pub queue: QueueSection,
    /// Log output.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ArtifactHubConfig {
    /// Parse a configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Config`] if the document is not valid TOML or
    /// does not match the expected shape.
    pub fn parse(contents: &str) -> Result<Self, ServerError> {
        toml::from_str(contents).map_err(|e| ServerError::Config(e.to_string()))
    }

    /// Load the configuration at `path`, falling back to defaults when the
    /// file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }
}
