//! Retention-driven cleanup of artifact buckets.
//!
//! The [`Scheduler`] finds artifacts due for cleaning and publishes a fresh
//! [`CleanRequest`](artifacthub_core::CleanRequest) for each. A [`Worker`]
//! consumes requests, runs the [`BatchCleaner`] over a bounded number of
//! storage pages, and publishes a continuation carrying the resume token
//! until the bucket has been swept to the end.
//!
//! Deletion workers react to upstream workflow and pipeline deletions by
//! removing the deleted scope's directory from its bucket.

pub mod admin;
pub mod cleaner;
pub mod config;
pub mod deletion;
pub mod error;
pub mod metrics;
pub mod scheduler;
pub mod worker;

pub use admin::ArtifactAdmin;
pub use cleaner::{BatchCleaner, CleaningOutcome, CleaningReport, RunStats, SWEEP_ROOT};
pub use config::{CleanerConfig, SchedulerConfig};
pub use deletion::{DeletionWorker, PipelineDeletionWorker, WorkflowDeletionWorker};
pub use error::{AdminError, CleanerError, DeletionError, SchedulerError};
pub use metrics::{CleanerMetrics, MetricsSnapshot};
pub use scheduler::Scheduler;
pub use worker::{WorkOutcome, Worker};
