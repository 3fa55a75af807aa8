use std::sync::atomic::{AtomicU64, Ordering};

use artifacthub_core::DeletedScope;

/// Atomic counters tracking cleaner, worker, scheduler and deletion activity.
///
/// All counters use relaxed ordering. For a consistent point-in-time view,
/// call [`snapshot`](Self::snapshot).
#[derive(Debug, Default)]
pub struct CleanerMetrics {
    /// Batch cleaner invocations.
    pub cleaner_runs: AtomicU64,
    /// Storage pages fetched.
    pub page_visits: AtomicU64,
    /// Objects inspected against a retention policy.
    pub object_visits: AtomicU64,
    /// Objects deleted because a rule matched.
    pub objects_deleted: AtomicU64,
    /// Sweeps that reached the end of their bucket.
    pub sweeps_completed: AtomicU64,
    /// Buckets destroyed after their artifact was deleted.
    pub buckets_destroyed: AtomicU64,
    /// Continuation requests published by workers.
    pub continuations_published: AtomicU64,
    /// Deliveries dropped because another worker held the artifact lock.
    pub lock_contended: AtomicU64,
    /// Deliveries for artifacts that no longer exist.
    pub bucket_not_found: AtomicU64,
    /// Deliveries for buckets cleaned within the last day.
    pub already_cleaned: AtomicU64,
    /// Deliveries that failed and were handed back to the queue.
    pub worker_failures: AtomicU64,
    /// Scheduler ticks run.
    pub scheduler_ticks: AtomicU64,
    /// Scheduler ticks that failed.
    pub scheduler_failures: AtomicU64,
    /// Fresh clean requests published by the scheduler.
    pub requests_scheduled: AtomicU64,
    /// Clean requests the scheduler failed to publish.
    pub publish_failures: AtomicU64,
    /// Deleted workflows whose artifacts were removed.
    pub workflow_paths_deleted: AtomicU64,
    /// Deleted pipelines whose artifacts were removed.
    pub pipeline_paths_deleted: AtomicU64,
    /// Deletion events for scopes without an artifact store.
    pub deletions_skipped: AtomicU64,
    /// Deletion events that failed and were handed back to the queue.
    pub deletion_failures: AtomicU64,
}

impl CleanerMetrics {
    pub fn increment_cleaner_runs(&self) {
        self.cleaner_runs.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_page_visits(&self) {
        self.page_visits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_object_visits(&self, n: u64) {
        self.object_visits.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_objects_deleted(&self, n: u64) {
        self.objects_deleted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_sweeps_completed(&self) {
        self.sweeps_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_buckets_destroyed(&self) {
        self.buckets_destroyed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_continuations_published(&self) {
        self.continuations_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_lock_contended(&self) {
        self.lock_contended.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_bucket_not_found(&self) {
        self.bucket_not_found.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_already_cleaned(&self) {
        self.already_cleaned.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_worker_failures(&self) {
        self.worker_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_scheduler_ticks(&self) {
        self.scheduler_ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_scheduler_failures(&self) {
        self.scheduler_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_requests_scheduled(&self) {
        self.requests_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_publish_failures(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_paths_deleted(&self, scope: DeletedScope) {
        let counter = match scope {
            DeletedScope::Workflow => &self.workflow_paths_deleted,
            DeletedScope::Pipeline => &self.pipeline_paths_deleted,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deletions_skipped(&self) {
        self.deletions_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_deletion_failures(&self) {
        self.deletion_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a point-in-time snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cleaner_runs: self.cleaner_runs.load(Ordering::Relaxed),
            page_visits: self.page_visits.load(Ordering::Relaxed),
            object_visits: self.object_visits.load(Ordering::Relaxed),
            objects_deleted: self.objects_deleted.load(Ordering::Relaxed),
            sweeps_completed: self.sweeps_completed.load(Ordering::Relaxed),
            buckets_destroyed: self.buckets_destroyed.load(Ordering::Relaxed),
            continuations_published: self.continuations_published.load(Ordering::Relaxed),
            lock_contended: self.lock_contended.load(Ordering::Relaxed),
            bucket_not_found: self.bucket_not_found.load(Ordering::Relaxed),
            already_cleaned: self.already_cleaned.load(Ordering::Relaxed),
            worker_failures: self.worker_failures.load(Ordering::Relaxed),
            scheduler_ticks: self.scheduler_ticks.load(Ordering::Relaxed),
            scheduler_failures: self.scheduler_failures.load(Ordering::Relaxed),
            requests_scheduled: self.requests_scheduled.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            workflow_paths_deleted: self.workflow_paths_deleted.load(Ordering::Relaxed),
            pipeline_paths_deleted: self.pipeline_paths_deleted.load(Ordering::Relaxed),
            deletions_skipped: self.deletions_skipped.load(Ordering::Relaxed),
            deletion_failures: self.deletion_failures.load(Ordering::Relaxed),
        }
    }
}

/// A plain data snapshot of [`CleanerMetrics`] at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub cleaner_runs: u64,
    pub page_visits: u64,
    pub object_visits: u64,
    pub objects_deleted: u64,
    pub sweeps_completed: u64,
    pub buckets_destroyed: u64,
    pub continuations_published: u64,
    pub lock_contended: u64,
    pub bucket_not_found: u64,
    pub already_cleaned: u64,
    pub worker_failures: u64,
    pub scheduler_ticks: u64,
    pub scheduler_failures: u64,
    pub requests_scheduled: u64,
    pub publish_failures: u64,
    pub workflow_paths_deleted: u64,
    pub pipeline_paths_deleted: u64,
    pub deletions_skipped: u64,
    pub deletion_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metrics_are_zero() {
        assert_eq!(CleanerMetrics::default().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn increments_show_in_snapshot() {
        let m = CleanerMetrics::default();
        m.increment_cleaner_runs();
        m.increment_cleaner_runs();
        m.add_object_visits(5);
        m.add_objects_deleted(2);
        m.increment_lock_contended();

        let snap = m.snapshot();
        assert_eq!(snap.cleaner_runs, 2);
        assert_eq!(snap.object_visits, 5);
        assert_eq!(snap.objects_deleted, 2);
        assert_eq!(snap.lock_contended, 1);
        assert_eq!(snap.scheduler_ticks, 0);
    }

    #[test]
    fn deleted_paths_are_counted_per_scope() {
        let m = CleanerMetrics::default();
        m.increment_paths_deleted(DeletedScope::Workflow);
        m.increment_paths_deleted(DeletedScope::Workflow);
        m.increment_paths_deleted(DeletedScope::Pipeline);

        let snap = m.snapshot();
        assert_eq!(snap.workflow_paths_deleted, 2);
        assert_eq!(snap.pipeline_paths_deleted, 1);
    }
}
