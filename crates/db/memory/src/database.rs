//! In-memory database backend.
//!
//! Committed state lives in one mutex-guarded pair of tables. A transaction
//! records an op log and reads through a copy of the committed tables with
//! its own ops replayed, so nothing it writes is visible elsewhere before
//! commit.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tokio::sync::OwnedMutexGuard;
use uuid::Uuid;

use artifacthub_core::{Artifact, ArtifactState, RetentionPolicy};
use artifacthub_db::{Database, DbError, Transaction};

#[derive(Debug, Default, Clone)]
struct Tables {
    artifacts: HashMap<Uuid, Artifact>,
    /// Keyed by artifact id.
    policies: HashMap<Uuid, RetentionPolicy>,
}

/// A buffered write, applied to the shared tables on commit.
#[derive(Debug, Clone)]
enum Op {
    InsertArtifact(Artifact),
    MarkDeleted(Uuid, DateTime<Utc>),
    UpsertPolicy(RetentionPolicy),
    SetScheduled(Vec<Uuid>, DateTime<Utc>),
    MarkCleaned(Uuid, DateTime<Utc>),
    Destroy(Uuid),
}

impl Tables {
    fn apply(&mut self, op: &Op) {
        match op {
            Op::InsertArtifact(artifact) => {
                self.artifacts.insert(artifact.id, artifact.clone());
            }
            Op::MarkDeleted(id, at) => {
                if let Some(artifact) = self.artifacts.get_mut(id)
                    && !artifact.is_pending_deletion()
                {
                    artifact.state = ArtifactState::PendingDeletion { since: *at };
                }
            }
            Op::UpsertPolicy(policy) => match self.policies.get_mut(&policy.artifact_id) {
                Some(existing) => {
                    existing.project_rules = policy.project_rules.clone();
                    existing.workflow_rules = policy.workflow_rules.clone();
                    existing.job_rules = policy.job_rules.clone();
                }
                None => {
                    self.policies.insert(policy.artifact_id, policy.clone());
                }
            },
            Op::SetScheduled(ids, at) => {
                for id in ids {
                    if let Some(policy) = self.policies.get_mut(id) {
                        policy.scheduled_for_cleaning_at = Some(*at);
                    }
                }
            }
            Op::MarkCleaned(id, at) => {
                if let Some(policy) = self.policies.get_mut(id) {
                    policy.last_cleaned_at = Some(*at);
                }
                if let Some(artifact) = self.artifacts.get_mut(id) {
                    artifact.last_cleaned_at = Some(*at);
                }
            }
            Op::Destroy(id) => {
                self.artifacts.remove(id);
                self.policies.remove(id);
            }
        }
    }
}

#[derive(Debug, Default)]
struct Shared {
    tables: Mutex<Tables>,
    /// Advisory lock key to the id of the holding transaction.
    advisory_locks: DashMap<String, u64>,
    /// Held by the transaction that last selected due policies.
    due_lock: Arc<tokio::sync::Mutex<()>>,
    next_tx: AtomicU64,
}

impl Shared {
    fn tables(&self) -> Result<MutexGuard<'_, Tables>, DbError> {
        self.tables
            .lock()
            .map_err(|_| DbError::Backend("memory tables lock poisoned".to_owned()))
    }
}

/// In-memory implementation of [`Database`].
///
/// Transactions buffer their writes and apply them on commit, so uncommitted
/// changes are only visible to the transaction that made them. Selecting due
/// policies takes a database-wide lock held until the transaction ends, which
/// serializes concurrent schedulers the way row locks do.
///
/// Intended for tests and single-process deployments.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    /// Create a new, empty database.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of committed artifacts.
    pub fn artifact_count(&self) -> usize {
        self.shared
            .tables()
            .map(|tables| tables.artifacts.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let id = self.shared.next_tx.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(MemoryTransaction {
            id,
            shared: Arc::clone(&self.shared),
            ops: Vec::new(),
            held_locks: HashSet::new(),
            due_guard: None,
        }))
    }
}

/// A transaction on a [`MemoryDatabase`].
pub struct MemoryTransaction {
    id: u64,
    shared: Arc<Shared>,
    ops: Vec<Op>,
    held_locks: HashSet<String>,
    due_guard: Option<OwnedMutexGuard<()>>,
}

impl MemoryTransaction {
    /// Committed state with this transaction's writes applied.
    fn view(&self) -> Result<Tables, DbError> {
        let mut tables = self.shared.tables()?.clone();
        for op in &self.ops {
            tables.apply(op);
        }
        Ok(tables)
    }

    fn release(&mut self) {
        for key in self.held_locks.drain() {
            self.shared
                .advisory_locks
                .remove_if(&key, |_, owner| *owner == self.id);
        }
        self.due_guard = None;
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        self.release();
    }
}

fn idle_for_a_day(at: Option<DateTime<Utc>>, cutoff: DateTime<Utc>) -> bool {
    at.is_none_or(|at| at < cutoff)
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn try_advisory_lock(&mut self, key: &str) -> Result<bool, DbError> {
        let owner = *self
            .shared
            .advisory_locks
            .entry(key.to_owned())
            .or_insert(self.id);
        if owner != self.id {
            return Ok(false);
        }
        self.held_locks.insert(key.to_owned());
        Ok(true)
    }

    async fn insert_artifact(&mut self, artifact: &Artifact) -> Result<(), DbError> {
        if self.view()?.artifacts.contains_key(&artifact.id) {
            return Err(DbError::Backend(format!(
                "artifact {} already exists",
                artifact.id
            )));
        }
        self.ops.push(Op::InsertArtifact(artifact.clone()));
        Ok(())
    }

    async fn find_artifact(&mut self, id: Uuid) -> Result<Option<Artifact>, DbError> {
        Ok(self.view()?.artifacts.remove(&id))
    }

    async fn mark_artifact_deleted(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if !self.view()?.artifacts.contains_key(&id) {
            return Err(DbError::NotFound(format!("artifact {id}")));
        }
        self.ops.push(Op::MarkDeleted(id, at));
        Ok(())
    }

    async fn find_retention_policy(
        &mut self,
        artifact_id: Uuid,
    ) -> Result<Option<RetentionPolicy>, DbError> {
        Ok(self.view()?.policies.remove(&artifact_id))
    }

    async fn upsert_retention_policy(
        &mut self,
        policy: &RetentionPolicy,
    ) -> Result<RetentionPolicy, DbError> {
        policy.validate()?;
        if !self.view()?.artifacts.contains_key(&policy.artifact_id) {
            return Err(DbError::NotFound(format!("artifact {}", policy.artifact_id)));
        }
        self.ops.push(Op::UpsertPolicy(policy.clone()));
        self.view()?
            .policies
            .remove(&policy.artifact_id)
            .ok_or_else(|| DbError::NotFound(format!("policy for {}", policy.artifact_id)))
    }

    async fn lock_due_for_cleaning(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, DbError> {
        if self.due_guard.is_none() {
            let guard = Arc::clone(&self.shared.due_lock).lock_owned().await;
            self.due_guard = Some(guard);
        }

        let cutoff = now - Duration::days(1);
        let mut due: Vec<_> = self
            .view()?
            .policies
            .into_values()
            .filter(|p| {
                idle_for_a_day(p.scheduled_for_cleaning_at, cutoff)
                    && idle_for_a_day(p.last_cleaned_at, cutoff)
            })
            .map(|p| (p.scheduled_for_cleaning_at, p.artifact_id))
            .collect();
        due.sort_unstable();
        Ok(due.into_iter().take(limit).map(|(_, id)| id).collect())
    }

    async fn set_scheduled_for_cleaning_at(
        &mut self,
        artifact_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        self.ops.push(Op::SetScheduled(artifact_ids.to_vec(), at));
        Ok(())
    }

    async fn mark_cleaned(&mut self, artifact_id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        self.ops.push(Op::MarkCleaned(artifact_id, at));
        Ok(())
    }

    async fn destroy_artifact(&mut self, artifact_id: Uuid) -> Result<(), DbError> {
        self.ops.push(Op::Destroy(artifact_id));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), DbError> {
        {
            let mut tables = self.shared.tables()?;
            for op in &self.ops {
                tables.apply(op);
            }
        }
        self.ops.clear();
        self.release();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), DbError> {
        self.ops.clear();
        self.release();
        Ok(())
    }
}
