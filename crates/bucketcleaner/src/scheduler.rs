use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::time::interval;
use tracing::{error, info, warn};

use artifacthub_core::{CleanRequest, ROUTING_KEY};
use artifacthub_db::Database;
use artifacthub_queue::Publisher;

use crate::config::SchedulerConfig;
use crate::error::SchedulerError;
use crate::metrics::CleanerMetrics;

/// Starts cleaning episodes for artifacts that are due.
///
/// Each tick locks a batch of due policies, publishes a fresh clean request
/// for each, and marks the whole batch as scheduled in the same transaction.
/// Concurrent schedulers never select the same policy.
pub struct Scheduler {
    db: Arc<dyn Database>,
    publisher: Arc<dyn Publisher>,
    config: SchedulerConfig,
    metrics: Arc<CleanerMetrics>,
}

impl Scheduler {
    pub fn new(
        db: Arc<dyn Database>,
        publisher: Arc<dyn Publisher>,
        config: SchedulerConfig,
        metrics: Arc<CleanerMetrics>,
    ) -> Self {
        Self {
            db,
            publisher,
            config,
            metrics,
        }
    }

    /// Run one scheduling tick. Returns the number of requests published.
    ///
    /// Publish failures are logged and counted; the batch is still marked as
    /// scheduled.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Database`] if the batch cannot be selected or
    /// marked.
    pub async fn schedule_work(&self, now: DateTime<Utc>) -> Result<usize, SchedulerError> {
        self.metrics.increment_scheduler_ticks();

        let mut tx = self.db.begin().await?;
        let ids = tx.lock_due_for_cleaning(now, self.config.batch_size).await?;
        if ids.is_empty() {
            tx.commit().await?;
            return Ok(0);
        }

        info!(batch_size = ids.len(), "scheduling bucket cleaning");

        let mut published = 0;
        for &id in &ids {
            let body = match CleanRequest::start(id).to_bytes() {
                Ok(body) => body,
                Err(e) => {
                    warn!(artifact_id = %id, error = %e, "failed to encode clean request");
                    self.metrics.increment_publish_failures();
                    continue;
                }
            };
            match self.publisher.publish(ROUTING_KEY, body).await {
                Ok(()) => {
                    published += 1;
                    self.metrics.increment_requests_scheduled();
                }
                Err(e) => {
                    warn!(artifact_id = %id, error = %e, "failed to schedule cleaning");
                    self.metrics.increment_publish_failures();
                }
            }
        }

        tx.set_scheduled_for_cleaning_at(&ids, now).await?;
        tx.commit().await?;
        Ok(published)
    }

    /// Run scheduling ticks until shutdown is signaled.
    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) {
        info!(
            tick_interval = ?self.config.tick_interval,
            batch_size = self.config.batch_size,
            "bucket cleaner scheduler starting"
        );

        let mut ticker = interval(self.config.tick_interval);
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("bucket cleaner scheduler received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(e) = self.schedule_work(Utc::now()).await {
                        self.metrics.increment_scheduler_failures();
                        error!(error = %e, "error while scheduling cleaning work");
                    }
                }
            }
        }
    }
}
