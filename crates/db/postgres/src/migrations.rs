use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating required tables if they do not exist.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let artifacts_table = config.artifacts_table();
    let policies_table = config.retention_policies_table();

    let create_artifacts = format!(
        "CREATE TABLE IF NOT EXISTS {artifacts_table} (
            id UUID PRIMARY KEY,
            bucket_name TEXT NOT NULL,
            idempotency_token TEXT NOT NULL,
            created TIMESTAMPTZ NOT NULL,
            last_cleaned_at TIMESTAMPTZ,
            deleted_at TIMESTAMPTZ
        )"
    );

    let create_policies = format!(
        "CREATE TABLE IF NOT EXISTS {policies_table} (
            id UUID PRIMARY KEY,
            artifact_id UUID NOT NULL UNIQUE
                REFERENCES {artifacts_table} (id) ON DELETE CASCADE,
            project_level_policies JSONB NOT NULL DEFAULT '{{}}',
            workflow_level_policies JSONB NOT NULL DEFAULT '{{}}',
            job_level_policies JSONB NOT NULL DEFAULT '{{}}',
            scheduled_for_cleaning_at TIMESTAMPTZ,
            last_cleaned_at TIMESTAMPTZ,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )"
    );

    // Supports the scheduler's due scan.
    let create_due_idx = format!(
        "CREATE INDEX IF NOT EXISTS {}retention_due_idx \
         ON {policies_table} (scheduled_for_cleaning_at, last_cleaned_at)",
        config.table_prefix
    );

    sqlx::query(&create_artifacts).execute(pool).await?;
    sqlx::query(&create_policies).execute(pool).await?;
    sqlx::query(&create_due_idx).execute(pool).await?;

    Ok(())
}
