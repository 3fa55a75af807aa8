//! Conformance suite shared by the database backends.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use uuid::Uuid;

use artifacthub_core::{
    Artifact, ArtifactState, RetentionPolicy, RetentionPolicyRuleItem, RetentionPolicyRules,
};

use crate::database::Database;
use crate::error::DbError;

/// Whole-second timestamps survive every backend's precision.
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(0)
}

fn seven_day_policy(artifact_id: Uuid) -> RetentionPolicy {
    RetentionPolicy {
        project_rules: RetentionPolicyRules::new(vec![RetentionPolicyRuleItem::new(
            "/**/*",
            7 * 86_400,
        )]),
        ..RetentionPolicy::empty(artifact_id)
    }
}

/// Insert a fresh artifact with a seven-day project policy and commit.
async fn seed(db: &dyn Database) -> Result<Artifact, DbError> {
    let artifact = Artifact::new("conformance-bucket", Uuid::new_v4().to_string(), now());
    let mut tx = db.begin().await?;
    tx.insert_artifact(&artifact).await?;
    tx.upsert_retention_policy(&seven_day_policy(artifact.id))
        .await?;
    tx.commit().await?;
    Ok(artifact)
}

/// Run the full database conformance test suite.
///
/// Call this from your backend's test module with a fresh database.
///
/// # Errors
///
/// Returns an error if any database call fails unexpectedly.
pub async fn run_database_conformance_tests(db: &dyn Database) -> Result<(), DbError> {
    test_find_missing(db).await?;
    test_insert_and_find_artifact(db).await?;
    test_mark_artifact_deleted(db).await?;
    test_policy_upsert(db).await?;
    test_invalid_policy_rejected(db).await?;
    test_policy_requires_artifact(db).await?;
    test_rollback_discards_writes(db).await?;
    test_uncommitted_writes_are_isolated(db).await?;
    test_advisory_lock(db).await?;
    test_lock_due_for_cleaning(db).await?;
    test_mark_cleaned(db).await?;
    test_destroy_artifact(db).await?;
    Ok(())
}

async fn test_find_missing(db: &dyn Database) -> Result<(), DbError> {
    let mut tx = db.begin().await?;
    assert!(tx.find_artifact(Uuid::new_v4()).await?.is_none());
    assert!(tx.find_retention_policy(Uuid::new_v4()).await?.is_none());
    tx.rollback().await
}

async fn test_insert_and_find_artifact(db: &dyn Database) -> Result<(), DbError> {
    let artifact = seed(db).await?;
    let mut tx = db.begin().await?;
    let found = tx.find_artifact(artifact.id).await?;
    assert_eq!(found.as_ref(), Some(&artifact));
    tx.rollback().await
}

async fn test_mark_artifact_deleted(db: &dyn Database) -> Result<(), DbError> {
    let artifact = seed(db).await?;
    let deleted_at = now();

    let mut tx = db.begin().await?;
    tx.mark_artifact_deleted(artifact.id, deleted_at).await?;
    tx.commit().await?;

    // A second request keeps the first timestamp.
    let mut tx = db.begin().await?;
    tx.mark_artifact_deleted(artifact.id, deleted_at + Duration::hours(1))
        .await?;
    let found = tx.find_artifact(artifact.id).await?;
    assert_eq!(
        found.map(|a| a.state),
        Some(ArtifactState::PendingDeletion { since: deleted_at })
    );

    let missing = tx.mark_artifact_deleted(Uuid::new_v4(), deleted_at).await;
    assert!(
        matches!(missing, Err(DbError::NotFound(_))),
        "deleting a missing artifact should fail with NotFound"
    );
    tx.rollback().await
}

async fn test_policy_upsert(db: &dyn Database) -> Result<(), DbError> {
    let artifact = seed(db).await?;
    let cleaned_at = now();

    let mut tx = db.begin().await?;
    tx.mark_cleaned(artifact.id, cleaned_at).await?;
    tx.commit().await?;

    let mut replacement = RetentionPolicy::empty(artifact.id);
    replacement.job_rules = RetentionPolicyRules::delete_everything();

    let mut tx = db.begin().await?;
    let stored = tx.upsert_retention_policy(&replacement).await?;
    assert!(stored.project_rules.is_empty(), "rules should be replaced");
    assert_eq!(stored.job_rules, RetentionPolicyRules::delete_everything());
    assert_eq!(
        stored.last_cleaned_at,
        Some(cleaned_at),
        "updating rules keeps cleanup timestamps"
    );

    let reloaded = tx.find_retention_policy(artifact.id).await?;
    assert_eq!(reloaded.as_ref(), Some(&stored));
    tx.commit().await
}

async fn test_invalid_policy_rejected(db: &dyn Database) -> Result<(), DbError> {
    let artifact = seed(db).await?;
    let mut invalid = RetentionPolicy::empty(artifact.id);
    invalid.workflow_rules = RetentionPolicyRules::new(vec![RetentionPolicyRuleItem::new("/*", 60)]);

    let mut tx = db.begin().await?;
    let result = tx.upsert_retention_policy(&invalid).await;
    assert!(
        matches!(result, Err(DbError::InvalidPolicy(_))),
        "invalid rules should be rejected"
    );
    let stored = tx.find_retention_policy(artifact.id).await?;
    assert_eq!(
        stored.map(|p| p.project_rules),
        Some(seven_day_policy(artifact.id).project_rules),
        "rejected update leaves the policy untouched"
    );
    tx.rollback().await
}

async fn test_policy_requires_artifact(db: &dyn Database) -> Result<(), DbError> {
    let orphan = seven_day_policy(Uuid::new_v4());

    let mut tx = db.begin().await?;
    let result = tx.upsert_retention_policy(&orphan).await;
    assert!(
        matches!(result, Err(DbError::NotFound(_))),
        "a policy needs an existing artifact"
    );
    tx.rollback().await?;

    let mut tx = db.begin().await?;
    assert!(tx.find_retention_policy(orphan.artifact_id).await?.is_none());
    tx.rollback().await
}

async fn test_rollback_discards_writes(db: &dyn Database) -> Result<(), DbError> {
    let artifact = Artifact::new("conformance-bucket", "rollback", now());

    let mut tx = db.begin().await?;
    tx.insert_artifact(&artifact).await?;
    assert!(
        tx.find_artifact(artifact.id).await?.is_some(),
        "a transaction sees its own writes"
    );
    tx.rollback().await?;

    let mut tx = db.begin().await?;
    tx.insert_artifact(&artifact).await?;
    drop(tx);

    let mut tx = db.begin().await?;
    assert!(tx.find_artifact(artifact.id).await?.is_none());
    tx.rollback().await
}

async fn test_uncommitted_writes_are_isolated(db: &dyn Database) -> Result<(), DbError> {
    let artifact = Artifact::new("conformance-bucket", "isolated", now());

    let mut writer = db.begin().await?;
    writer.insert_artifact(&artifact).await?;

    let mut reader = db.begin().await?;
    assert!(reader.find_artifact(artifact.id).await?.is_none());
    reader.rollback().await?;

    writer.commit().await?;

    let mut reader = db.begin().await?;
    assert!(reader.find_artifact(artifact.id).await?.is_some());
    reader.rollback().await
}

async fn test_advisory_lock(db: &dyn Database) -> Result<(), DbError> {
    let key = Uuid::new_v4().to_string();

    let mut first = db.begin().await?;
    assert!(first.try_advisory_lock(&key).await?);
    assert!(first.try_advisory_lock(&key).await?, "locks are re-entrant");

    let mut second = db.begin().await?;
    assert!(!second.try_advisory_lock(&key).await?);
    assert!(second.try_advisory_lock(&Uuid::new_v4().to_string()).await?);
    second.rollback().await?;

    first.commit().await?;

    let mut third = db.begin().await?;
    assert!(third.try_advisory_lock(&key).await?, "commit releases the lock");
    third.rollback().await?;

    let mut fourth = db.begin().await?;
    assert!(fourth.try_advisory_lock(&key).await?, "rollback releases the lock");
    fourth.rollback().await
}

async fn test_lock_due_for_cleaning(db: &dyn Database) -> Result<(), DbError> {
    let now = now();

    // Mark everything left over from earlier tests as scheduled.
    let mut tx = db.begin().await?;
    let leftovers = tx.lock_due_for_cleaning(now, 10_000).await?;
    tx.set_scheduled_for_cleaning_at(&leftovers, now).await?;
    tx.commit().await?;

    let never = seed(db).await?;
    let scheduled_long_ago = seed(db).await?;
    let scheduled_recently = seed(db).await?;
    let cleaned_recently = seed(db).await?;

    let mut tx = db.begin().await?;
    tx.set_scheduled_for_cleaning_at(&[scheduled_long_ago.id], now - Duration::days(2))
        .await?;
    tx.set_scheduled_for_cleaning_at(&[scheduled_recently.id], now - Duration::hours(2))
        .await?;
    tx.mark_cleaned(cleaned_recently.id, now - Duration::hours(3))
        .await?;
    tx.commit().await?;

    let mut tx = db.begin().await?;
    let mut due = tx.lock_due_for_cleaning(now, 10).await?;
    due.sort();
    let mut expected = vec![never.id, scheduled_long_ago.id];
    expected.sort();
    assert_eq!(due, expected, "only policies idle for a day are due");

    let limited = tx.lock_due_for_cleaning(now, 1).await?;
    assert_eq!(limited.len(), 1, "limit caps the batch");

    tx.set_scheduled_for_cleaning_at(&due, now).await?;
    tx.commit().await?;

    let mut tx = db.begin().await?;
    assert!(
        tx.lock_due_for_cleaning(now, 10).await?.is_empty(),
        "scheduled policies are no longer due"
    );
    tx.rollback().await
}

async fn test_mark_cleaned(db: &dyn Database) -> Result<(), DbError> {
    let artifact = seed(db).await?;
    let at = now();

    let mut tx = db.begin().await?;
    tx.mark_cleaned(artifact.id, at).await?;
    tx.commit().await?;

    let mut tx = db.begin().await?;
    let policy = tx.find_retention_policy(artifact.id).await?;
    let stored = tx.find_artifact(artifact.id).await?;
    assert_eq!(policy.and_then(|p| p.last_cleaned_at), Some(at));
    assert_eq!(stored.and_then(|a| a.last_cleaned_at), Some(at));
    tx.rollback().await
}

async fn test_destroy_artifact(db: &dyn Database) -> Result<(), DbError> {
    let artifact = seed(db).await?;

    let mut tx = db.begin().await?;
    tx.destroy_artifact(artifact.id).await?;
    tx.commit().await?;

    let mut tx = db.begin().await?;
    assert!(tx.find_artifact(artifact.id).await?.is_none());
    assert!(tx.find_retention_policy(artifact.id).await?.is_none());
    // Destroying twice is harmless.
    tx.destroy_artifact(artifact.id).await?;
    tx.rollback().await
}
