//! One bounded cleaning pass over an artifact bucket.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use artifacthub_core::{Artifact, CleanRequest, PolicyMatcher, ResumeToken};
use artifacthub_db::Transaction;
use artifacthub_storage::{
    Bucket, BucketOptions, ListOptions, ObjectPager, Page, StorageClient, StorageError,
};

use crate::config::CleanerConfig;
use crate::error::CleanerError;
use crate::metrics::CleanerMetrics;

/// Every swept object lives under this prefix.
pub const SWEEP_ROOT: &str = "artifacts/";

/// How a cleaner run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleaningOutcome {
    /// The bucket was swept to the end.
    Done,
    /// The emptied bucket and its artifact rows were removed.
    Destroyed,
    /// The page budget ran out; resume from the token.
    Continue(ResumeToken),
}

/// Counters for a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    pub pages: usize,
    pub visited: usize,
    pub deleted: usize,
    pub pagination_ended: bool,
    pub destroyed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleaningReport {
    pub outcome: CleaningOutcome,
    pub stats: RunStats,
}

/// Applies an artifact's retention policy to a bounded slice of its bucket.
///
/// One run fetches at most `pages_per_invocation` pages starting at the
/// request's token, deletes the objects whose rule matched, and records the
/// result on the caller's transaction. An artifact pending deletion whose
/// bucket is already empty at the start of a sweep is destroyed instead.
pub struct BatchCleaner {
    storage: Arc<dyn StorageClient>,
    config: CleanerConfig,
    metrics: Arc<CleanerMetrics>,
}

impl BatchCleaner {
    pub fn new(
        storage: Arc<dyn StorageClient>,
        config: CleanerConfig,
        metrics: Arc<CleanerMetrics>,
    ) -> Self {
        Self {
            storage,
            config,
            metrics,
        }
    }

    /// Run one cleaning pass for `request` inside `tx`.
    ///
    /// # Errors
    ///
    /// Returns [`CleanerError::NotFound`] when the artifact or its policy is
    /// missing, [`CleanerError::AlreadyCleanedToday`] when the bucket was swept
    /// within the last day, and storage or database errors otherwise. On error
    /// the caller must discard the transaction.
    pub async fn run(
        &self,
        tx: &mut dyn Transaction,
        request: &CleanRequest,
        now: DateTime<Utc>,
    ) -> Result<CleaningReport, CleanerError> {
        self.metrics.increment_cleaner_runs();
        let id = request.artifact_bucket_id;

        let policy = tx
            .find_retention_policy(id)
            .await?
            .ok_or(CleanerError::NotFound(id))?;
        let artifact = tx
            .find_artifact(id)
            .await?
            .ok_or(CleanerError::NotFound(id))?;

        if policy.is_cleaned_in_last_24_hours(now) {
            return Err(CleanerError::AlreadyCleanedToday(id));
        }

        let options = BucketOptions::new(
            artifact.bucket_name.clone(),
            artifact.idempotency_token.clone(),
        );
        let sweep = Sweep {
            bucket: self.storage.bucket(&options),
            matcher: policy.matcher(),
            may_destroy: request.is_fresh() && artifact.is_pending_deletion(),
        };

        let list = ListOptions::new(SWEEP_ROOT)
            .with_max_keys(self.config.page_size)
            .starting_at(request.pagination_token.clone());
        let mut pager = match sweep.bucket.list_objects_with_pagination(list).await {
            Ok(pager) => Some(pager),
            Err(StorageError::MissingBucket(name)) if sweep.may_destroy => {
                warn!(artifact_id = %id, bucket = %name, "bucket already gone");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let mut stats = RunStats::default();
        let mut token = None;
        for _ in 0..self.config.pages_per_invocation.max(1) {
            let first_page = stats.pages == 0;
            let page = next_page(pager.as_deref_mut(), first_page && sweep.may_destroy).await?;
            stats.pages += 1;
            self.metrics.increment_page_visits();

            if first_page && sweep.may_destroy && page.objects.is_empty() {
                self.destroy(tx, &artifact, &options).await?;
                stats.destroyed = true;
                return Ok(CleaningReport {
                    outcome: CleaningOutcome::Destroyed,
                    stats,
                });
            }

            self.clean_page(&sweep, &page, &mut stats).await?;

            token = page.next_token;
            if token.is_none() {
                stats.pagination_ended = true;
                break;
            }
        }

        let outcome = match token {
            None => {
                tx.mark_cleaned(id, now).await?;
                self.metrics.increment_sweeps_completed();
                CleaningOutcome::Done
            }
            Some(token) => {
                tx.set_scheduled_for_cleaning_at(&[id], now).await?;
                CleaningOutcome::Continue(token)
            }
        };
        Ok(CleaningReport { outcome, stats })
    }

    async fn clean_page(
        &self,
        sweep: &Sweep,
        page: &Page,
        stats: &mut RunStats,
    ) -> Result<(), CleanerError> {
        let expired: Vec<String> = page
            .objects
            .iter()
            .filter(|object| !object.is_directory)
            .filter(|object| {
                sweep
                    .matcher
                    .is_matching(&object.path, object.age.unwrap_or_default())
            })
            .map(|object| object.path.clone())
            .collect();

        stats.visited += page.objects.len();
        self.metrics.add_object_visits(page.objects.len() as u64);

        if !expired.is_empty() {
            sweep.bucket.delete_objects(&expired).await?;
        }
        stats.deleted += expired.len();
        self.metrics.add_objects_deleted(expired.len() as u64);
        Ok(())
    }

    async fn destroy(
        &self,
        tx: &mut dyn Transaction,
        artifact: &Artifact,
        options: &BucketOptions,
    ) -> Result<(), CleanerError> {
        info!(
            artifact_id = %artifact.id,
            bucket = %artifact.bucket_name,
            "bucket is empty and its artifact is deleted, destroying"
        );

        let timeout = self.config.destroy_timeout;
        match tokio::time::timeout(timeout, self.storage.destroy_bucket(options)).await {
            Ok(Ok(()) | Err(StorageError::MissingBucket(_))) => {}
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => {
                return Err(CleanerError::DestroyTimedOut {
                    bucket: artifact.bucket_name.clone(),
                    timeout,
                });
            }
        }

        tx.destroy_artifact(artifact.id).await?;
        self.metrics.increment_buckets_destroyed();
        info!(artifact_id = %artifact.id, "artifact storage fully destroyed");
        Ok(())
    }
}

struct Sweep {
    bucket: Arc<dyn Bucket>,
    matcher: PolicyMatcher,
    may_destroy: bool,
}

/// Fetch the next page. A missing pager, or a bucket that vanished before
/// the first page of a destroyable sweep, reads as an empty final page.
async fn next_page(
    pager: Option<&mut (dyn ObjectPager + 'static)>,
    tolerate_missing: bool,
) -> Result<Page, CleanerError> {
    let Some(pager) = pager else {
        return Ok(Page::default());
    };
    match pager.next_page().await {
        Ok(page) => Ok(page),
        Err(StorageError::MissingBucket(_)) if tolerate_missing => Ok(Page::default()),
        Err(e) => Err(e.into()),
    }
}
