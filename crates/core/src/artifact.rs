use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle state of an artifact store.
///
/// A destroy request only moves the artifact to `PendingDeletion`; storage is
/// emptied and the row removed later by the cleanup pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ArtifactState {
    Active,
    PendingDeletion { since: DateTime<Utc> },
}

impl ArtifactState {
    /// Build the state from the nullable `deleted_at` column.
    pub fn from_deleted_at(deleted_at: Option<DateTime<Utc>>) -> Self {
        match deleted_at {
            Some(since) => Self::PendingDeletion { since },
            None => Self::Active,
        }
    }

    /// The value stored in the `deleted_at` column.
    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Active => None,
            Self::PendingDeletion { since } => Some(*since),
        }
    }
}

/// One logical artifact store backed by a storage bucket.
///
/// When the bucket is shared, the artifact owns the key prefix named by its
/// idempotency token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub bucket_name: String,
    /// Client-supplied token, also the path prefix inside a shared bucket.
    pub idempotency_token: String,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub last_cleaned_at: Option<DateTime<Utc>>,
    pub state: ArtifactState,
}

impl Artifact {
    /// Create a new active artifact with a fresh identifier.
    pub fn new(
        bucket_name: impl Into<String>,
        idempotency_token: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            bucket_name: bucket_name.into(),
            idempotency_token: idempotency_token.into(),
            created: now,
            last_cleaned_at: None,
            state: ArtifactState::Active,
        }
    }

    pub fn is_pending_deletion(&self) -> bool {
        matches!(self.state, ArtifactState::PendingDeletion { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deleted_at_maps_onto_state() {
        let now = Utc::now();
        assert_eq!(ArtifactState::from_deleted_at(None), ArtifactState::Active);
        let state = ArtifactState::from_deleted_at(Some(now));
        assert_eq!(state, ArtifactState::PendingDeletion { since: now });
        assert_eq!(state.deleted_at(), Some(now));
        assert_eq!(ArtifactState::Active.deleted_at(), None);
    }

    #[test]
    fn new_artifact_is_active() {
        let artifact = Artifact::new("bucket-1", "token-1", Utc::now());
        assert!(!artifact.is_pending_deletion());
        assert!(artifact.last_cleaned_at.is_none());
        assert_eq!(artifact.idempotency_token, "token-1");
    }

    #[test]
    fn state_serializes_with_tag() {
        let json = serde_json::to_value(ArtifactState::Active).unwrap();
        assert_eq!(json, serde_json::json!({"state": "active"}));
    }
}
