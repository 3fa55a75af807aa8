use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, info, warn};

use artifacthub_core::{CleanRequest, ROUTING_KEY};
use artifacthub_db::{Database, advisory_lock_key};
use artifacthub_queue::{Delivery, MessageHandler, Publisher, QueueError};

use crate::cleaner::{BatchCleaner, CleaningOutcome, CleaningReport};
use crate::error::CleanerError;
use crate::metrics::CleanerMetrics;

/// What a worker did with one clean request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// Another worker holds the artifact; the request was dropped.
    LockContended,
    Cleaned(CleaningReport),
}

/// Consumes clean requests and drives the [`BatchCleaner`].
///
/// Each request runs in its own transaction under a per-artifact advisory
/// lock. A continuation is published only after the transaction commits.
pub struct Worker {
    db: Arc<dyn Database>,
    publisher: Arc<dyn Publisher>,
    cleaner: BatchCleaner,
    metrics: Arc<CleanerMetrics>,
}

impl Worker {
    pub fn new(
        db: Arc<dyn Database>,
        publisher: Arc<dyn Publisher>,
        cleaner: BatchCleaner,
        metrics: Arc<CleanerMetrics>,
    ) -> Self {
        Self {
            db,
            publisher,
            cleaner,
            metrics,
        }
    }

    /// Clean one slice of the requested bucket.
    ///
    /// # Errors
    ///
    /// Propagates cleaner errors, including the skip outcomes
    /// [`CleanerError::NotFound`] and [`CleanerError::AlreadyCleanedToday`].
    pub async fn clean_bucket(&self, request: &CleanRequest) -> Result<WorkOutcome, CleanerError> {
        let id = request.artifact_bucket_id;

        let mut tx = self.db.begin().await?;
        if !tx.try_advisory_lock(&advisory_lock_key(id)).await? {
            debug!(artifact_id = %id, "artifact is locked by another worker, skipping");
            self.metrics.increment_lock_contended();
            tx.rollback().await?;
            return Ok(WorkOutcome::LockContended);
        }

        // Dropping the transaction on error rolls it back.
        let report = self.cleaner.run(tx.as_mut(), request, Utc::now()).await?;
        tx.commit().await?;

        info!(
            artifact_id = %id,
            pages = report.stats.pages,
            visited = report.stats.visited,
            deleted = report.stats.deleted,
            pagination_ended = report.stats.pagination_ended,
            destroyed = report.stats.destroyed,
            "bucket cleaning run finished"
        );

        if let CleaningOutcome::Continue(ref token) = report.outcome {
            let next = CleanRequest::resume(id, token.clone());
            self.publisher
                .publish(ROUTING_KEY, next.to_bytes()?)
                .await
                .inspect_err(|e| {
                    warn!(artifact_id = %id, error = %e, "failed to schedule next cleaning cycle");
                })?;
            self.metrics.increment_continuations_published();
        }

        Ok(WorkOutcome::Cleaned(report))
    }
}

#[async_trait]
impl MessageHandler for Worker {
    async fn handle(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let request = CleanRequest::from_bytes(&delivery.body).map_err(|e| {
            warn!(
                body = %String::from_utf8_lossy(&delivery.body),
                error = %e,
                "failed to parse clean request"
            );
            QueueError::Handler(CleanerError::from(e).to_string())
        })?;
        let id = request.artifact_bucket_id;

        match self.clean_bucket(&request).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_skip() => {
                if matches!(e, CleanerError::NotFound(_)) {
                    self.metrics.increment_bucket_not_found();
                } else {
                    self.metrics.increment_already_cleaned();
                }
                info!(artifact_id = %id, reason = %e, "skipping clean request");
                Ok(())
            }
            Err(e) => {
                self.metrics.increment_worker_failures();
                error!(artifact_id = %id, error = %e, "failed to clean bucket");
                Err(QueueError::Handler(e.to_string()))
            }
        }
    }
}
