use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use artifacthub_core::{Artifact, RetentionPolicy};

use crate::error::DbError;

/// Advisory lock key serializing work on one artifact.
pub fn advisory_lock_key(artifact_id: Uuid) -> String {
    artifact_id.to_string()
}

/// A database holding artifacts and their retention policies.
#[async_trait]
pub trait Database: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError>;
}

/// One open transaction.
///
/// Writes become visible to other transactions on [`Transaction::commit`].
/// Dropping a transaction without committing rolls it back and releases
/// every lock it holds.
#[async_trait]
pub trait Transaction: Send {
    /// Try to take a transaction-scoped advisory lock without blocking.
    ///
    /// Returns `false` when another transaction holds it. The lock is
    /// released when this transaction ends.
    async fn try_advisory_lock(&mut self, key: &str) -> Result<bool, DbError>;

    async fn insert_artifact(&mut self, artifact: &Artifact) -> Result<(), DbError>;

    async fn find_artifact(&mut self, id: Uuid) -> Result<Option<Artifact>, DbError>;

    /// Soft-delete an artifact. Fails with [`DbError::NotFound`] when it does
    /// not exist. Already deleted artifacts keep their original timestamp.
    async fn mark_artifact_deleted(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    async fn find_retention_policy(
        &mut self,
        artifact_id: Uuid,
    ) -> Result<Option<RetentionPolicy>, DbError>;

    /// Validate and store the rule lists of `policy`.
    ///
    /// Creates the policy when the artifact has none. An existing policy only
    /// has its rules replaced; cleanup timestamps are kept. Returns the
    /// stored policy.
    async fn upsert_retention_policy(
        &mut self,
        policy: &RetentionPolicy,
    ) -> Result<RetentionPolicy, DbError>;

    /// Lock up to `limit` policies due for cleaning at `now`.
    ///
    /// A policy is due when neither `scheduled_for_cleaning_at` nor
    /// `last_cleaned_at` falls within the day before `now`. The selected rows
    /// stay locked against concurrent selection until this transaction ends.
    /// Returns the artifact ids.
    async fn lock_due_for_cleaning(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, DbError>;

    async fn set_scheduled_for_cleaning_at(
        &mut self,
        artifact_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<(), DbError>;

    /// Record a completed sweep on both the policy and the artifact.
    async fn mark_cleaned(&mut self, artifact_id: Uuid, at: DateTime<Utc>) -> Result<(), DbError>;

    /// Remove the artifact and its retention policy.
    async fn destroy_artifact(&mut self, artifact_id: Uuid) -> Result<(), DbError>;

    async fn commit(self: Box<Self>) -> Result<(), DbError>;

    async fn rollback(self: Box<Self>) -> Result<(), DbError>;
}
