use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use artifacthub_core::{Artifact, RetentionPolicy, RetentionPolicyRules};
use artifacthub_db::{Database, DbError};

use crate::error::AdminError;

/// Model-level operations that create artifacts and feed the cleanup
/// pipeline.
pub struct ArtifactAdmin {
    db: Arc<dyn Database>,
}

impl ArtifactAdmin {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    pub async fn create_artifact(
        &self,
        bucket_name: &str,
        idempotency_token: &str,
    ) -> Result<Artifact, AdminError> {
        let artifact = Artifact::new(bucket_name, idempotency_token, Utc::now());
        let mut tx = self.db.begin().await?;
        tx.insert_artifact(&artifact).await?;
        tx.commit().await?;
        info!(artifact_id = %artifact.id, bucket = %bucket_name, "artifact created");
        Ok(artifact)
    }

    /// Validate and store the artifact's rule lists, creating its policy if
    /// needed.
    pub async fn update_retention_policy(
        &self,
        artifact_id: Uuid,
        project: RetentionPolicyRules,
        workflow: RetentionPolicyRules,
        job: RetentionPolicyRules,
    ) -> Result<RetentionPolicy, AdminError> {
        let policy = RetentionPolicy::new(artifact_id, project, workflow, job)?;

        let mut tx = self.db.begin().await?;
        if tx.find_artifact(artifact_id).await?.is_none() {
            return Err(AdminError::NotFound(artifact_id));
        }
        let stored = tx.upsert_retention_policy(&policy).await?;
        tx.commit().await?;
        Ok(stored)
    }

    /// The stored policy, or an empty one that retains everything.
    pub async fn find_retention_policy_or_empty(
        &self,
        artifact_id: Uuid,
    ) -> Result<RetentionPolicy, AdminError> {
        let mut tx = self.db.begin().await?;
        let policy = tx.find_retention_policy(artifact_id).await?;
        tx.rollback().await?;
        Ok(policy.unwrap_or_else(|| RetentionPolicy::empty(artifact_id)))
    }

    /// Mark the artifact for deletion and replace its rules with ones that
    /// expire everything. The cleanup pipeline empties and then destroys the
    /// bucket; storage is not touched here.
    pub async fn request_artifact_destruction(&self, artifact_id: Uuid) -> Result<(), AdminError> {
        let mut tx = self.db.begin().await?;
        match tx.mark_artifact_deleted(artifact_id, Utc::now()).await {
            Err(DbError::NotFound(_)) => return Err(AdminError::NotFound(artifact_id)),
            other => other?,
        }

        let policy = RetentionPolicy::new(
            artifact_id,
            RetentionPolicyRules::delete_everything(),
            RetentionPolicyRules::delete_everything(),
            RetentionPolicyRules::delete_everything(),
        )?;
        tx.upsert_retention_policy(&policy).await?;
        tx.commit().await?;

        info!(artifact_id = %artifact_id, "artifact scheduled for destruction");
        Ok(())
    }
}
