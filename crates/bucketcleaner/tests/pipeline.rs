use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use artifacthub_bucketcleaner::{
    ArtifactAdmin, BatchCleaner, CleanerConfig, CleanerError, CleanerMetrics, CleaningOutcome,
    Scheduler, SchedulerConfig, WorkOutcome, Worker,
};
use artifacthub_core::{
    Artifact, CleanRequest, ROUTING_KEY, ResumeToken, RetentionPolicyRuleItem,
    RetentionPolicyRules,
};
use artifacthub_db::{Database, advisory_lock_key};
use artifacthub_db_memory::MemoryDatabase;
use artifacthub_queue::{Delivery, MemoryBroker, MessageHandler, Publisher, QueueError};
use artifacthub_storage::{Bucket, BucketOptions, StorageClient, StorageError};
use artifacthub_storage_memory::MemoryStorage;

const DAY: u64 = 86_400;

fn days(n: u64) -> Duration {
    Duration::from_secs(n * DAY)
}

fn rules(items: &[(&str, u64)]) -> RetentionPolicyRules {
    RetentionPolicyRules::new(
        items
            .iter()
            .map(|(selector, age)| RetentionPolicyRuleItem::new(*selector, *age))
            .collect(),
    )
}

struct Harness {
    db: MemoryDatabase,
    storage: MemoryStorage,
    broker: MemoryBroker,
    metrics: Arc<CleanerMetrics>,
    admin: ArtifactAdmin,
    worker: Worker,
}

impl Harness {
    fn new() -> Self {
        Self::with_paging(MemoryStorage::new(), 10)
    }

    fn with_paging(storage: MemoryStorage, pages_per_invocation: usize) -> Self {
        Self::build(
            storage.clone(),
            Arc::new(storage),
            pages_per_invocation,
            None,
        )
    }

    /// `client` is what the cleaner talks to; `storage` is inspected by
    /// the test. Continuations go to `continuations` when given, otherwise
    /// back onto the harness broker.
    fn build(
        storage: MemoryStorage,
        client: Arc<dyn StorageClient>,
        pages_per_invocation: usize,
        continuations: Option<Arc<dyn Publisher>>,
    ) -> Self {
        let db = MemoryDatabase::new();
        let broker = MemoryBroker::new(2);
        let metrics = Arc::new(CleanerMetrics::default());
        let cleaner = BatchCleaner::new(
            client,
            CleanerConfig {
                pages_per_invocation,
                ..CleanerConfig::default()
            },
            Arc::clone(&metrics),
        );
        let worker = Worker::new(
            Arc::new(db.clone()),
            continuations.unwrap_or_else(|| Arc::new(broker.clone())),
            cleaner,
            Arc::clone(&metrics),
        );
        Self {
            admin: ArtifactAdmin::new(Arc::new(db.clone())),
            db,
            storage,
            broker,
            metrics,
            worker,
        }
    }

    fn scheduler(&self, batch_size: usize) -> Scheduler {
        Scheduler::new(
            Arc::new(self.db.clone()),
            Arc::new(self.broker.clone()),
            SchedulerConfig {
                batch_size,
                ..SchedulerConfig::default()
            },
            Arc::clone(&self.metrics),
        )
    }

    /// An artifact whose test results expire after a week and everything
    /// else after a month.
    async fn artifact(&self) -> (Artifact, BucketOptions) {
        let artifact = self
            .admin
            .create_artifact("artifacthub-shared", &Uuid::new_v4().to_string())
            .await
            .unwrap();
        self.admin
            .update_retention_policy(
                artifact.id,
                rules(&[("/**/*", 30 * DAY)]),
                rules(&[("/test-results/**/*", 7 * DAY)]),
                rules(&[("/test-results/**/*", 7 * DAY)]),
            )
            .await
            .unwrap();
        let options = BucketOptions::new(
            artifact.bucket_name.clone(),
            artifact.idempotency_token.clone(),
        );
        (artifact, options)
    }

    async fn clean(&self, artifact: &Artifact) -> Result<WorkOutcome, CleanerError> {
        self.worker
            .clean_bucket(&CleanRequest::start(artifact.id))
            .await
    }

    async fn pretend_cleaned_days_ago(&self, artifact: &Artifact, n: i64) {
        let mut tx = self.db.begin().await.unwrap();
        tx.mark_cleaned(artifact.id, Utc::now() - chrono::Duration::days(n))
            .await
            .unwrap();
        tx.commit().await.unwrap();
    }
}

fn report(outcome: WorkOutcome) -> artifacthub_bucketcleaner::CleaningReport {
    match outcome {
        WorkOutcome::Cleaned(report) => report,
        WorkOutcome::LockContended => panic!("expected the worker to acquire the lock"),
    }
}

#[tokio::test]
async fn deletes_old_files_from_active_bucket() {
    let h = Harness::new();
    let (artifact, options) = h.artifact().await;
    let id = Uuid::new_v4();
    for (path, age) in [
        (format!("artifacts/projects/{id}/docker/b.txt"), days(10)),
        (format!("artifacts/workflows/{id}/test-results/a.txt"), days(10)),
        (format!("artifacts/workflows/{id}/test-results/b.txt"), days(1)),
        (format!("artifacts/jobs/{id}/test-results/a.txt"), days(10)),
        (format!("artifacts/jobs/{id}/test-results/b.txt"), days(1)),
    ] {
        h.storage.insert_with_age(&options, &path, age);
    }

    let report = report(h.clean(&artifact).await.unwrap());
    assert_eq!(report.outcome, CleaningOutcome::Done);
    assert_eq!(report.stats.visited, 5);
    assert_eq!(report.stats.deleted, 2);
    assert!(report.stats.pagination_ended);
    assert!(!report.stats.destroyed);
    assert_eq!(h.storage.object_count(&options), 3);

    let policy = h
        .admin
        .find_retention_policy_or_empty(artifact.id)
        .await
        .unwrap();
    assert!(policy.last_cleaned_at.is_some());
    assert!(h.broker.is_empty(ROUTING_KEY), "finished sweeps publish nothing");
}

#[tokio::test]
async fn does_not_destroy_empty_active_bucket() {
    let h = Harness::new();
    let (artifact, options) = h.artifact().await;
    h.storage.create_bucket_named(&options.name);

    let report = report(h.clean(&artifact).await.unwrap());
    assert_eq!(report.outcome, CleaningOutcome::Done);
    assert_eq!(report.stats.visited, 0);
    assert!(!report.stats.destroyed);
    assert!(h.storage.bucket_exists(&options.name));
    assert_eq!(h.db.artifact_count(), 1);
}

#[tokio::test]
async fn second_run_within_a_day_is_skipped() {
    let h = Harness::new();
    let (artifact, options) = h.artifact().await;
    h.storage.create_bucket_named(&options.name);

    h.clean(&artifact).await.unwrap();
    let again = h.clean(&artifact).await;
    assert!(matches!(again, Err(CleanerError::AlreadyCleanedToday(id)) if id == artifact.id));
}

#[tokio::test]
async fn empties_then_destroys_deleted_artifact() {
    let h = Harness::new();
    let (artifact, options) = h.artifact().await;
    h.admin
        .request_artifact_destruction(artifact.id)
        .await
        .unwrap();
    let id = Uuid::new_v4();
    for path in [
        format!("artifacts/projects/{id}/docker/b.txt"),
        format!("artifacts/workflows/{id}/test-results/a.txt"),
        format!("artifacts/workflows/{id}/test-results/b.txt"),
        format!("artifacts/jobs/{id}/test-results/a.txt"),
        format!("artifacts/jobs/{id}/test-results/b.txt"),
    ] {
        h.storage.insert_with_age(&options, &path, days(10));
    }

    // The first sweep only empties the bucket.
    let first = report(h.clean(&artifact).await.unwrap());
    assert_eq!(first.outcome, CleaningOutcome::Done);
    assert_eq!(first.stats.visited, 5);
    assert_eq!(first.stats.deleted, 5);
    assert!(!first.stats.destroyed);
    assert_eq!(h.storage.object_count(&options), 0);

    // A day later the empty bucket and its rows are removed.
    h.pretend_cleaned_days_ago(&artifact, 2).await;
    let second = report(h.clean(&artifact).await.unwrap());
    assert_eq!(second.outcome, CleaningOutcome::Destroyed);
    assert_eq!(second.stats.visited, 0);
    assert!(second.stats.destroyed);
    assert!(!h.storage.bucket_exists(&options.name));

    let mut tx = h.db.begin().await.unwrap();
    assert!(tx.find_artifact(artifact.id).await.unwrap().is_none());
    assert!(tx.find_retention_policy(artifact.id).await.unwrap().is_none());
    assert_eq!(h.metrics.snapshot().buckets_destroyed, 1);
}

#[tokio::test]
async fn destroy_only_happens_at_the_start_of_a_sweep() {
    let h = Harness::new();
    let (artifact, options) = h.artifact().await;
    h.admin
        .request_artifact_destruction(artifact.id)
        .await
        .unwrap();
    h.storage.create_bucket_named(&options.name);

    let token = ResumeToken::new(options.full_key("artifacts/jobs/zzz")).unwrap();
    let outcome = h
        .worker
        .clean_bucket(&CleanRequest::resume(artifact.id, token))
        .await
        .unwrap();
    let report = report(outcome);
    assert_eq!(report.outcome, CleaningOutcome::Done);
    assert!(!report.stats.destroyed);
    assert_eq!(h.db.artifact_count(), 1);
}

#[tokio::test]
async fn missing_bucket_of_deleted_artifact_still_finishes_destruction() {
    let h = Harness::new();
    let (artifact, _) = h.artifact().await;
    h.admin
        .request_artifact_destruction(artifact.id)
        .await
        .unwrap();

    let report = report(h.clean(&artifact).await.unwrap());
    assert_eq!(report.outcome, CleaningOutcome::Destroyed);
    assert_eq!(h.db.artifact_count(), 0);
}

#[tokio::test]
async fn missing_bucket_of_active_artifact_is_an_error() {
    let h = Harness::new();
    let (artifact, _) = h.artifact().await;

    let result = h.clean(&artifact).await;
    assert!(matches!(
        result,
        Err(CleanerError::Storage(StorageError::MissingBucket(_)))
    ));
    let policy = h
        .admin
        .find_retention_policy_or_empty(artifact.id)
        .await
        .unwrap();
    assert!(policy.last_cleaned_at.is_none(), "failed runs roll back");
}

#[tokio::test(start_paused = true)]
async fn slow_destroy_times_out_and_keeps_the_artifact() {
    let storage = MemoryStorage::new();
    let h = Harness::build(storage.clone(), Arc::new(SlowDestroy(storage)), 10, None);
    let (artifact, options) = h.artifact().await;
    h.admin
        .request_artifact_destruction(artifact.id)
        .await
        .unwrap();
    h.storage.create_bucket_named(&options.name);

    let result = h.clean(&artifact).await;
    assert!(matches!(
        result,
        Err(CleanerError::DestroyTimedOut { bucket, timeout })
            if bucket == artifact.bucket_name && timeout == Duration::from_secs(60)
    ));
    assert_eq!(h.db.artifact_count(), 1, "rows outlive a failed destroy");
    assert!(h.storage.bucket_exists(&options.name));
    assert_eq!(h.metrics.snapshot().buckets_destroyed, 0);

    let policy = h
        .admin
        .find_retention_policy_or_empty(artifact.id)
        .await
        .unwrap();
    assert!(policy.last_cleaned_at.is_none());
}

#[tokio::test]
async fn unpublished_continuation_keeps_committed_progress() {
    let closed = MemoryBroker::new(2);
    closed.close();
    let storage = MemoryStorage::new().with_page_size(1);
    let h = Harness::build(storage.clone(), Arc::new(storage), 1, Some(Arc::new(closed)));
    let (artifact, options) = h.artifact().await;
    for name in ["a", "b", "c", "d"] {
        let path = format!("artifacts/projects/p/{name}.txt");
        h.storage.insert_with_age(&options, &path, days(40));
    }

    let direct = h.clean(&artifact).await;
    assert!(matches!(
        direct,
        Err(CleanerError::Queue(QueueError::Closed))
    ));
    assert_eq!(h.storage.object_count(&options), 3, "the page was committed");

    h.broker
        .publish(ROUTING_KEY, CleanRequest::start(artifact.id).to_bytes().unwrap())
        .await
        .unwrap();
    assert_eq!(h.broker.drain(ROUTING_KEY, &h.worker).await, 2);
    assert_eq!(h.broker.dead_letter_count(), 1);
    assert_eq!(h.storage.object_count(&options), 1);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.worker_failures, 2);
    assert_eq!(snapshot.continuations_published, 0);
    assert_eq!(snapshot.sweeps_completed, 0);

    let policy = h
        .admin
        .find_retention_policy_or_empty(artifact.id)
        .await
        .unwrap();
    assert!(policy.last_cleaned_at.is_none(), "the sweep never finished");
    assert!(policy.scheduled_for_cleaning_at.is_some());
}

#[tokio::test]
async fn continuations_sweep_the_whole_bucket() {
    // Two objects per page and two pages per request.
    let h = Harness::with_paging(MemoryStorage::new().with_page_size(2), 2);
    let (artifact, options) = h.artifact().await;
    let id = Uuid::new_v4();
    for i in 0..11 {
        let path = format!("artifacts/jobs/{id}/test-results/old-{i:02}.xml");
        h.storage.insert_with_age(&options, &path, days(10));
    }
    for i in 0..3 {
        let path = format!("artifacts/jobs/{id}/test-results/new-{i:02}.xml");
        h.storage.insert_with_age(&options, &path, days(1));
    }

    h.broker
        .publish(ROUTING_KEY, CleanRequest::start(artifact.id).to_bytes().unwrap())
        .await
        .unwrap();
    let deliveries = h.broker.drain(ROUTING_KEY, &h.worker).await;

    assert_eq!(deliveries, 4, "14 objects at 4 per request take 4 requests");
    assert_eq!(h.storage.object_count(&options), 3);
    assert_eq!(h.broker.dead_letter_count(), 0);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.continuations_published, 3);
    assert_eq!(snapshot.object_visits, 14);
    assert_eq!(snapshot.objects_deleted, 11);
    assert_eq!(snapshot.sweeps_completed, 1);

    let policy = h
        .admin
        .find_retention_policy_or_empty(artifact.id)
        .await
        .unwrap();
    assert!(policy.last_cleaned_at.is_some());
    assert!(policy.scheduled_for_cleaning_at.is_some());
}

#[tokio::test]
async fn locked_artifact_is_skipped() {
    let h = Harness::new();
    let (artifact, options) = h.artifact().await;
    h.storage
        .insert_with_age(&options, "artifacts/projects/p/old.txt", days(40));

    let mut holder = h.db.begin().await.unwrap();
    assert!(
        holder
            .try_advisory_lock(&advisory_lock_key(artifact.id))
            .await
            .unwrap()
    );

    let outcome = h.clean(&artifact).await.unwrap();
    assert_eq!(outcome, WorkOutcome::LockContended);
    assert_eq!(h.storage.object_count(&options), 1);
    assert_eq!(h.metrics.snapshot().lock_contended, 1);

    holder.rollback().await.unwrap();
    report(h.clean(&artifact).await.unwrap());
    assert_eq!(h.storage.object_count(&options), 0);
}

#[tokio::test]
async fn skip_outcomes_are_acknowledged() {
    let h = Harness::new();
    let (artifact, options) = h.artifact().await;
    h.storage.create_bucket_named(&options.name);
    h.clean(&artifact).await.unwrap();

    for id in [Uuid::new_v4(), artifact.id] {
        h.broker
            .publish(ROUTING_KEY, CleanRequest::start(id).to_bytes().unwrap())
            .await
            .unwrap();
    }
    assert_eq!(h.broker.drain(ROUTING_KEY, &h.worker).await, 2);
    assert_eq!(h.broker.dead_letter_count(), 0);

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.bucket_not_found, 1);
    assert_eq!(snapshot.already_cleaned, 1);
    assert_eq!(snapshot.worker_failures, 0);
}

#[tokio::test]
async fn malformed_requests_are_dead_lettered() {
    let h = Harness::new();
    h.broker
        .publish(ROUTING_KEY, b"not json".to_vec())
        .await
        .unwrap();

    assert_eq!(h.broker.drain(ROUTING_KEY, &h.worker).await, 2);
    let dead = h.broker.take_dead_letters();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].delivery.body, b"not json");
}

#[tokio::test]
async fn failed_runs_are_retried_by_the_queue() {
    let h = Harness::new();
    let (artifact, _) = h.artifact().await;

    let delivery = Delivery::new(
        ROUTING_KEY,
        CleanRequest::start(artifact.id).to_bytes().unwrap(),
    );
    assert!(h.worker.handle(&delivery).await.is_err());
    assert_eq!(h.metrics.snapshot().worker_failures, 1);
}

#[tokio::test]
async fn scheduler_publishes_due_artifacts_once() {
    let h = Harness::new();
    let (first, _) = h.artifact().await;
    let (second, _) = h.artifact().await;
    let (recent, _) = h.artifact().await;
    h.pretend_cleaned_days_ago(&recent, 0).await;

    let scheduler = h.scheduler(10);
    assert_eq!(scheduler.schedule_work(Utc::now()).await.unwrap(), 2);
    assert_eq!(h.broker.len(ROUTING_KEY), 2);
    assert_eq!(scheduler.schedule_work(Utc::now()).await.unwrap(), 0);

    let recorder = RecordingHandler::default();
    assert_eq!(h.broker.drain(ROUTING_KEY, &recorder).await, 2);
    let scheduled = recorder.0.into_inner().unwrap();
    let mut expected = vec![first.id, second.id];
    expected.sort();
    let mut ids: Vec<_> = scheduled.iter().map(|r| r.artifact_bucket_id).collect();
    ids.sort();
    assert_eq!(ids, expected);
    assert!(scheduled.iter().all(CleanRequest::is_fresh));
}

#[tokio::test]
async fn scheduler_marks_batch_even_when_publishing_fails() {
    let h = Harness::new();
    let (artifact, _) = h.artifact().await;
    let closed = MemoryBroker::new(2);
    closed.close();
    let scheduler = Scheduler::new(
        Arc::new(h.db.clone()),
        Arc::new(closed),
        SchedulerConfig::default(),
        Arc::clone(&h.metrics),
    );

    assert_eq!(scheduler.schedule_work(Utc::now()).await.unwrap(), 0);
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.publish_failures, 1);
    assert_eq!(snapshot.requests_scheduled, 0);

    let policy = h
        .admin
        .find_retention_policy_or_empty(artifact.id)
        .await
        .unwrap();
    assert!(policy.scheduled_for_cleaning_at.is_some());

    // Not due again until a day has passed.
    assert_eq!(h.scheduler(10).schedule_work(Utc::now()).await.unwrap(), 0);
    assert!(h.broker.is_empty(ROUTING_KEY));
}

#[tokio::test]
async fn scheduler_respects_batch_size() {
    let h = Harness::new();
    for _ in 0..3 {
        h.artifact().await;
    }

    let scheduler = h.scheduler(2);
    assert_eq!(scheduler.schedule_work(Utc::now()).await.unwrap(), 2);
    assert_eq!(scheduler.schedule_work(Utc::now()).await.unwrap(), 1);
    assert_eq!(scheduler.schedule_work(Utc::now()).await.unwrap(), 0);
}

#[tokio::test]
async fn concurrent_schedulers_publish_one_request() {
    let h = Harness::new();
    h.artifact().await;

    let first = h.scheduler(10);
    let second = h.scheduler(10);
    let now = Utc::now();
    let (a, b) = tokio::join!(first.schedule_work(now), second.schedule_work(now));

    assert_eq!(a.unwrap() + b.unwrap(), 1);
    assert_eq!(h.broker.len(ROUTING_KEY), 1);
}

#[tokio::test]
async fn scheduled_requests_flow_through_the_worker() {
    let h = Harness::new();
    let (artifact, options) = h.artifact().await;
    h.storage
        .insert_with_age(&options, "artifacts/projects/p/stale.txt", days(31));
    h.storage
        .insert_with_age(&options, "artifacts/projects/p/fresh.txt", days(2));

    h.scheduler(10).schedule_work(Utc::now()).await.unwrap();
    assert_eq!(h.broker.drain(ROUTING_KEY, &h.worker).await, 1);

    assert_eq!(h.storage.object_count(&options), 1);
    let policy = h
        .admin
        .find_retention_policy_or_empty(artifact.id)
        .await
        .unwrap();
    assert!(policy.last_cleaned_at.is_some());
}

#[tokio::test]
async fn scheduler_loop_stops_on_shutdown() {
    let h = Harness::new();
    h.artifact().await;
    let scheduler = h.scheduler(10);
    let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

    let run = scheduler.run(shutdown_rx);
    let stop = async {
        // The first tick fires immediately.
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(()).await.unwrap();
    };
    tokio::time::timeout(Duration::from_secs(1), async { tokio::join!(run, stop) })
        .await
        .expect("scheduler should stop");

    assert_eq!(h.broker.len(ROUTING_KEY), 1);
    assert!(h.metrics.snapshot().scheduler_ticks >= 1);
}

/// Collects parsed requests instead of cleaning.
#[derive(Default)]
struct RecordingHandler(Mutex<Vec<CleanRequest>>);

#[async_trait::async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, delivery: &Delivery) -> Result<(), QueueError> {
        let request = CleanRequest::from_bytes(&delivery.body)
            .map_err(|e| QueueError::Handler(e.to_string()))?;
        self.0.lock().unwrap().push(request);
        Ok(())
    }
}

/// Memory storage whose bucket destruction never finishes in time.
struct SlowDestroy(MemoryStorage);

#[async_trait::async_trait]
impl StorageClient for SlowDestroy {
    async fn create_bucket(&self) -> Result<String, StorageError> {
        self.0.create_bucket().await
    }

    fn bucket(&self, options: &BucketOptions) -> Arc<dyn Bucket> {
        self.0.bucket(options)
    }

    async fn destroy_bucket(&self, options: &BucketOptions) -> Result<(), StorageError> {
        tokio::time::sleep(Duration::from_secs(120)).await;
        self.0.destroy_bucket(options).await
    }
}
