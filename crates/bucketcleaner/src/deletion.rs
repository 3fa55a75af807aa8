//! Consumers for upstream workflow and pipeline deletion events.
//!
//! A deleted workflow or pipeline leaves its files under
//! `artifacts/workflows/<id>/` or `artifacts/pipelines/<id>/` in the bucket
//! of its artifact store. The worker removes that directory right away
//! instead of waiting for retention rules to expire it.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use artifacthub_core::{PipelineDeleted, ScopeDeleted, WorkflowDeleted};
use artifacthub_db::Database;
use artifacthub_queue::{Delivery, MessageHandler, QueueError};
use artifacthub_storage::{BucketOptions, StorageClient, StorageError};

use crate::error::DeletionError;
use crate::metrics::CleanerMetrics;

pub type WorkflowDeletionWorker = DeletionWorker<WorkflowDeleted>;
pub type PipelineDeletionWorker = DeletionWorker<PipelineDeleted>;

/// Removes the files of one kind of deleted scope.
pub struct DeletionWorker<E> {
    db: Arc<dyn Database>,
    storage: Arc<dyn StorageClient>,
    metrics: Arc<CleanerMetrics>,
    _event: PhantomData<fn() -> E>,
}

impl<E: ScopeDeleted> DeletionWorker<E> {
    pub fn new(
        db: Arc<dyn Database>,
        storage: Arc<dyn StorageClient>,
        metrics: Arc<CleanerMetrics>,
    ) -> Self {
        Self {
            db,
            storage,
            metrics,
            _event: PhantomData,
        }
    }

    /// Delete the scope's directory from its artifact store.
    ///
    /// Returns the deleted bucket-relative path, or `None` when the scope has
    /// no artifact store.
    ///
    /// # Errors
    ///
    /// Returns [`DeletionError::InvalidScopeId`] for an empty id or one that
    /// is not a single path segment, [`DeletionError::NotFound`] when the
    /// artifact store does not exist, and storage or database failures.
    pub async fn delete_scope(&self, event: &E) -> Result<Option<String>, DeletionError> {
        let scope = E::SCOPE;
        let scope_id = event.scope_id();
        if !is_path_segment(scope_id) {
            return Err(DeletionError::InvalidScopeId {
                scope,
                id: scope_id.to_owned(),
            });
        }

        let store_id = event.artifact_store_id();
        if store_id.is_empty() {
            return Ok(None);
        }
        let artifact_id = Uuid::parse_str(store_id)
            .map_err(|_| DeletionError::InvalidArtifactId(store_id.to_owned()))?;

        let mut tx = self.db.begin().await?;
        let artifact = tx.find_artifact(artifact_id).await?;
        tx.rollback().await?;
        let artifact = artifact.ok_or(DeletionError::NotFound(artifact_id))?;

        let path = scope.path(scope_id);
        let bucket = self.storage.bucket(&BucketOptions::new(
            artifact.bucket_name,
            artifact.idempotency_token,
        ));
        match bucket.delete_path(&path).await {
            Ok(()) => {}
            Err(StorageError::MissingBucket(name)) => {
                debug!(bucket = %name, path = %path, "bucket is gone, nothing to delete");
            }
            Err(e) => return Err(e.into()),
        }
        Ok(Some(path))
    }
}

/// Ids become one directory name: `..` or a slash would widen the delete.
fn is_path_segment(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains('/')
}

#[async_trait]
impl<E: ScopeDeleted> MessageHandler for DeletionWorker<E> {
    async fn handle(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let scope = E::SCOPE;
        let event = E::from_bytes(&delivery.body).map_err(|e| {
            warn!(
                %scope,
                body = %String::from_utf8_lossy(&delivery.body),
                error = %e,
                "failed to parse deletion event"
            );
            self.metrics.increment_deletion_failures();
            QueueError::Handler(DeletionError::from(e).to_string())
        })?;
        let scope_id = event.scope_id();

        match self.delete_scope(&event).await {
            Ok(Some(path)) => {
                self.metrics.increment_paths_deleted(scope);
                info!(%scope, scope_id, path = %path, "deleted artifacts of removed scope");
                Ok(())
            }
            Ok(None) => {
                self.metrics.increment_deletions_skipped();
                info!(%scope, scope_id, "no artifact store, skipping");
                Ok(())
            }
            Err(e) => {
                self.metrics.increment_deletion_failures();
                error!(
                    %scope,
                    scope_id,
                    artifact_store_id = event.artifact_store_id(),
                    error = %e,
                    "failed to delete artifacts of removed scope"
                );
                Err(QueueError::Handler(e.to_string()))
            }
        }
    }
}
