//! PostgreSQL backend built on a shared `sqlx` pool.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres};
use tracing::debug;
use uuid::Uuid;

use artifacthub_core::{Artifact, ArtifactState, RetentionPolicy, RetentionPolicyRules};
use artifacthub_db::{Database, DbError, Transaction};

use crate::config::PostgresConfig;
use crate::migrations;

/// Build `PgConnectOptions` from a [`PostgresConfig`], applying SSL settings
/// when configured.
pub(crate) fn build_connect_options(
    config: &PostgresConfig,
) -> Result<sqlx::postgres::PgConnectOptions, DbError> {
    let mut options: sqlx::postgres::PgConnectOptions = config
        .url
        .parse()
        .map_err(|e: sqlx::Error| DbError::Connection(e.to_string()))?;

    if let Some(ref mode) = config.ssl_mode {
        let ssl_mode = match mode.as_str() {
            "disable" => sqlx::postgres::PgSslMode::Disable,
            "prefer" => sqlx::postgres::PgSslMode::Prefer,
            "require" => sqlx::postgres::PgSslMode::Require,
            "verify-ca" => sqlx::postgres::PgSslMode::VerifyCa,
            "verify-full" => sqlx::postgres::PgSslMode::VerifyFull,
            other => {
                return Err(DbError::Connection(format!("unknown ssl_mode: {other}")));
            }
        };
        options = options.ssl_mode(ssl_mode);
    }

    if let Some(ref path) = config.ssl_root_cert {
        options = options.ssl_root_cert(path);
    }

    if let Some(ref path) = config.ssl_cert {
        options = options.ssl_client_cert(path);
    }

    if let Some(ref path) = config.ssl_key {
        options = options.ssl_client_key(path);
    }

    Ok(options)
}

fn backend(e: sqlx::Error) -> DbError {
    DbError::Backend(e.to_string())
}

type ArtifactRow = (
    Uuid,
    String,
    String,
    DateTime<Utc>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

fn artifact_from_row(row: ArtifactRow) -> Artifact {
    let (id, bucket_name, idempotency_token, created, last_cleaned_at, deleted_at) = row;
    Artifact {
        id,
        bucket_name,
        idempotency_token,
        created,
        last_cleaned_at,
        state: ArtifactState::from_deleted_at(deleted_at),
    }
}

type PolicyRow = (
    Uuid,
    Uuid,
    Json<RetentionPolicyRules>,
    Json<RetentionPolicyRules>,
    Json<RetentionPolicyRules>,
    Option<DateTime<Utc>>,
    Option<DateTime<Utc>>,
);

const POLICY_COLUMNS: &str = "id, artifact_id, project_level_policies, \
     workflow_level_policies, job_level_policies, \
     scheduled_for_cleaning_at, last_cleaned_at";

fn policy_from_row(row: PolicyRow) -> RetentionPolicy {
    let (id, artifact_id, project, workflow, job, scheduled_for_cleaning_at, last_cleaned_at) = row;
    RetentionPolicy {
        id,
        artifact_id,
        project_rules: project.0,
        workflow_rules: workflow.0,
        job_rules: job.0,
        scheduled_for_cleaning_at,
        last_cleaned_at,
    }
}

/// PostgreSQL-backed implementation of [`Database`].
///
/// Advisory locks use `pg_try_advisory_xact_lock(hashtext(key))` and are
/// released when the transaction ends. The scheduler's due scan holds row
/// locks via `SELECT ... FOR UPDATE`.
pub struct PostgresDatabase {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresDatabase {
    /// Connect to `PostgreSQL` and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Connection`] if pool creation fails, or
    /// [`DbError::Backend`] if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, DbError> {
        let connect_options = build_connect_options(&config)?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(connect_options)
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;

        Self::from_pool(pool, config).await
    }

    /// Create a `PostgresDatabase` from an existing pool and config.
    ///
    /// Runs migrations on creation.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, DbError> {
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(backend)?;
        debug!(schema = %config.schema, prefix = %config.table_prefix, "migrations applied");

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl Database for PostgresDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, DbError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| DbError::Connection(e.to_string()))?;
        Ok(Box::new(PostgresTransaction {
            tx,
            config: Arc::clone(&self.config),
        }))
    }
}

/// A transaction on a [`PostgresDatabase`]. Dropping it rolls back.
pub struct PostgresTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
    config: Arc<PostgresConfig>,
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn try_advisory_lock(&mut self, key: &str) -> Result<bool, DbError> {
        let (acquired,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_xact_lock(hashtext($1))")
            .bind(key)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(acquired)
    }

    async fn insert_artifact(&mut self, artifact: &Artifact) -> Result<(), DbError> {
        let table = self.config.artifacts_table();
        let query = format!(
            "INSERT INTO {table} \
             (id, bucket_name, idempotency_token, created, last_cleaned_at, deleted_at) \
             VALUES ($1, $2, $3, $4, $5, $6)"
        );
        sqlx::query(&query)
            .bind(artifact.id)
            .bind(&artifact.bucket_name)
            .bind(&artifact.idempotency_token)
            .bind(artifact.created)
            .bind(artifact.last_cleaned_at)
            .bind(artifact.state.deleted_at())
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn find_artifact(&mut self, id: Uuid) -> Result<Option<Artifact>, DbError> {
        let table = self.config.artifacts_table();
        let query = format!(
            "SELECT id, bucket_name, idempotency_token, created, last_cleaned_at, deleted_at \
             FROM {table} WHERE id = $1"
        );
        let row: Option<ArtifactRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(row.map(artifact_from_row))
    }

    async fn mark_artifact_deleted(
        &mut self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        let table = self.config.artifacts_table();
        let query =
            format!("UPDATE {table} SET deleted_at = COALESCE(deleted_at, $2) WHERE id = $1");
        let result = sqlx::query(&query)
            .bind(id)
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        if result.rows_affected() == 0 {
            return Err(DbError::NotFound(format!("artifact {id}")));
        }
        Ok(())
    }

    async fn find_retention_policy(
        &mut self,
        artifact_id: Uuid,
    ) -> Result<Option<RetentionPolicy>, DbError> {
        let table = self.config.retention_policies_table();
        let query = format!("SELECT {POLICY_COLUMNS} FROM {table} WHERE artifact_id = $1");
        let row: Option<PolicyRow> = sqlx::query_as(&query)
            .bind(artifact_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(row.map(policy_from_row))
    }

    async fn upsert_retention_policy(
        &mut self,
        policy: &RetentionPolicy,
    ) -> Result<RetentionPolicy, DbError> {
        policy.validate()?;

        let table = self.config.retention_policies_table();
        let query = format!(
            "INSERT INTO {table} \
             (id, artifact_id, project_level_policies, \
              workflow_level_policies, job_level_policies, \
              scheduled_for_cleaning_at, last_cleaned_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             ON CONFLICT (artifact_id) DO UPDATE \
             SET project_level_policies = EXCLUDED.project_level_policies, \
                 workflow_level_policies = EXCLUDED.workflow_level_policies, \
                 job_level_policies = EXCLUDED.job_level_policies, \
                 updated_at = NOW() \
             RETURNING {POLICY_COLUMNS}"
        );
        let row: PolicyRow = sqlx::query_as(&query)
            .bind(policy.id)
            .bind(policy.artifact_id)
            .bind(Json(&policy.project_rules))
            .bind(Json(&policy.workflow_rules))
            .bind(Json(&policy.job_rules))
            .bind(policy.scheduled_for_cleaning_at)
            .bind(policy.last_cleaned_at)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| {
                if e.as_database_error()
                    .is_some_and(|d| d.is_foreign_key_violation())
                {
                    DbError::NotFound(format!("artifact {}", policy.artifact_id))
                } else {
                    backend(e)
                }
            })?;
        Ok(policy_from_row(row))
    }

    async fn lock_due_for_cleaning(
        &mut self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Uuid>, DbError> {
        let table = self.config.retention_policies_table();
        let query = format!(
            "SELECT artifact_id FROM {table} \
             WHERE (scheduled_for_cleaning_at IS NULL \
                    OR scheduled_for_cleaning_at < $1 - interval '1 day') \
               AND (last_cleaned_at IS NULL OR last_cleaned_at < $1 - interval '1 day') \
             ORDER BY scheduled_for_cleaning_at NULLS FIRST, artifact_id \
             LIMIT $2 \
             FOR UPDATE"
        );
        let rows: Vec<(Uuid,)> = sqlx::query_as(&query)
            .bind(now)
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn set_scheduled_for_cleaning_at(
        &mut self,
        artifact_ids: &[Uuid],
        at: DateTime<Utc>,
    ) -> Result<(), DbError> {
        if artifact_ids.is_empty() {
            return Ok(());
        }
        let table = self.config.retention_policies_table();
        let query = format!(
            "UPDATE {table} SET scheduled_for_cleaning_at = $1, updated_at = NOW() \
             WHERE artifact_id = ANY($2)"
        );
        sqlx::query(&query)
            .bind(at)
            .bind(artifact_ids)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn mark_cleaned(&mut self, artifact_id: Uuid, at: DateTime<Utc>) -> Result<(), DbError> {
        let policies = self.config.retention_policies_table();
        let artifacts = self.config.artifacts_table();

        let update_policy = format!(
            "UPDATE {policies} SET last_cleaned_at = $2, updated_at = NOW() \
             WHERE artifact_id = $1"
        );
        sqlx::query(&update_policy)
            .bind(artifact_id)
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;

        let update_artifact = format!("UPDATE {artifacts} SET last_cleaned_at = $2 WHERE id = $1");
        sqlx::query(&update_artifact)
            .bind(artifact_id)
            .bind(at)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn destroy_artifact(&mut self, artifact_id: Uuid) -> Result<(), DbError> {
        let policies = self.config.retention_policies_table();
        let artifacts = self.config.artifacts_table();

        sqlx::query(&format!("DELETE FROM {policies} WHERE artifact_id = $1"))
            .bind(artifact_id)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        sqlx::query(&format!("DELETE FROM {artifacts} WHERE id = $1"))
            .bind(artifact_id)
            .execute(&mut *self.tx)
            .await
            .map_err(backend)?;
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), DbError> {
        self.tx.commit().await.map_err(backend)
    }

    async fn rollback(self: Box<Self>) -> Result<(), DbError> {
        self.tx.rollback().await.map_err(backend)
    }
}
