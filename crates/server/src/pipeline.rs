use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

use artifacthub_bucketcleaner::{
    BatchCleaner, CleanerMetrics, DeletionWorker, PipelineDeletionWorker, Scheduler,
    SchedulerError, Worker, WorkflowDeletionWorker,
};
use artifacthub_core::{DeletedScope, ROUTING_KEY, ScopeDeleted};
use artifacthub_db::Database;
use artifacthub_queue::{MemoryBroker, MessageHandler, Publisher, QueueError};
use artifacthub_storage::StorageClient;

use crate::config::ArtifactHubConfig;

/// The scheduler, the cleaning and deletion workers, and the queue they share.
pub struct Pipeline {
    pub broker: MemoryBroker,
    pub metrics: Arc<CleanerMetrics>,
    pub scheduler: Scheduler,
    pub worker: Arc<Worker>,
    pub workflow_deletions: Arc<WorkflowDeletionWorker>,
    pub pipeline_deletions: Arc<PipelineDeletionWorker>,
}

impl Pipeline {
    pub fn new(
        config: &ArtifactHubConfig,
        db: Arc<dyn Database>,
        storage: Arc<dyn StorageClient>,
    ) -> Self {
        let broker = MemoryBroker::new(config.queue.max_attempts);
        let metrics = Arc::new(CleanerMetrics::default());

        let scheduler = Scheduler::new(
            Arc::clone(&db),
            Arc::new(broker.clone()),
            config.scheduler.scheduler_config(),
            Arc::clone(&metrics),
        );
        let workflow_deletions = Arc::new(DeletionWorker::new(
            Arc::clone(&db),
            Arc::clone(&storage),
            Arc::clone(&metrics),
        ));
        let pipeline_deletions = Arc::new(DeletionWorker::new(
            Arc::clone(&db),
            Arc::clone(&storage),
            Arc::clone(&metrics),
        ));
        let cleaner = BatchCleaner::new(
            storage,
            config.worker.cleaner_config(),
            Arc::clone(&metrics),
        );
        let worker = Arc::new(Worker::new(
            db,
            Arc::new(broker.clone()),
            cleaner,
            Arc::clone(&metrics),
        ));

        Self {
            broker,
            metrics,
            scheduler,
            worker,
            workflow_deletions,
            pipeline_deletions,
        }
    }

    /// Spawn `concurrency` queue consumers driving the worker.
    pub fn spawn_workers(
        &self,
        concurrency: usize,
        tracker: &TaskTracker,
        cancel: &CancellationToken,
    ) {
        let handler: Arc<dyn MessageHandler> = Arc::clone(&self.worker) as Arc<dyn MessageHandler>;
        self.broker
            .spawn_consumers(ROUTING_KEY, &handler, concurrency, tracker, cancel);
        info!(concurrency, "bucket cleaner workers started");
    }

    /// Spawn `concurrency` consumers for each kind of deletion event.
    pub fn spawn_deletion_workers(
        &self,
        concurrency: usize,
        tracker: &TaskTracker,
        cancel: &CancellationToken,
    ) {
        for scope in [DeletedScope::Workflow, DeletedScope::Pipeline] {
            let handler = self.deletion_handler(scope);
            self.broker
                .spawn_consumers(scope.routing_key(), &handler, concurrency, tracker, cancel);
        }
        info!(concurrency, "deletion workers started");
    }

    fn deletion_handler(&self, scope: DeletedScope) -> Arc<dyn MessageHandler> {
        match scope {
            DeletedScope::Workflow => {
                Arc::clone(&self.workflow_deletions) as Arc<dyn MessageHandler>
            }
            DeletedScope::Pipeline => {
                Arc::clone(&self.pipeline_deletions) as Arc<dyn MessageHandler>
            }
        }
    }

    /// Publish `event` and process its routing key until empty. Returns the
    /// number of deliveries made; a failed event ends up dead-lettered.
    pub async fn delete_now<E: ScopeDeleted>(&self, event: &E) -> Result<usize, QueueError> {
        let scope = E::SCOPE;
        let body = event.to_bytes().map_err(|e| QueueError::Publish {
            routing_key: scope.routing_key().to_owned(),
            reason: e.to_string(),
        })?;
        self.broker.publish(scope.routing_key(), body).await?;

        let handler = self.deletion_handler(scope);
        let deliveries = self
            .broker
            .drain(scope.routing_key(), handler.as_ref())
            .await;
        info!(%scope, deliveries, "deletion event processed");
        Ok(deliveries)
    }

    /// Run one scheduling tick and process every resulting request,
    /// continuations included. Returns the number of deliveries made.
    pub async fn schedule_once(&self) -> Result<usize, SchedulerError> {
        let scheduled = self.scheduler.schedule_work(Utc::now()).await?;
        let deliveries = self.broker.drain(ROUTING_KEY, self.worker.as_ref()).await;
        info!(scheduled, deliveries, "scheduling pass finished");
        Ok(deliveries)
    }
}
