//! Events announcing that a workflow or pipeline was deleted upstream.
//!
//! Each event names the deleted scope and the artifact store holding its
//! files. The deletion workers remove `artifacts/<scope>s/<id>/` from that
//! store's bucket.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Which kind of upstream entity was deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeletedScope {
    Workflow,
    Pipeline,
}

impl DeletedScope {
    /// Routing key the scope's deletion events arrive on.
    pub fn routing_key(self) -> &'static str {
        match self {
            Self::Workflow => "workflow.deleted",
            Self::Pipeline => "pipeline.deleted",
        }
    }

    /// Bucket-relative directory holding the files of scope `id`.
    pub fn path(self, id: &str) -> String {
        let dir = match self {
            Self::Workflow => "workflows",
            Self::Pipeline => "pipelines",
        };
        format!("artifacts/{dir}/{id}/")
    }
}

impl fmt::Display for DeletedScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workflow => f.write_str("workflow"),
            Self::Pipeline => f.write_str("pipeline"),
        }
    }
}

/// A deletion event for one [`DeletedScope`].
pub trait ScopeDeleted: Serialize + DeserializeOwned + Send + Sync + 'static {
    const SCOPE: DeletedScope;

    /// Id of the deleted workflow or pipeline. Empty when the producer sent
    /// none.
    fn scope_id(&self) -> &str;

    /// Id of the artifact store holding the scope's files. Empty when the
    /// scope never had one.
    fn artifact_store_id(&self) -> &str;

    fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    fn from_bytes(body: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(body)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowDeleted {
    #[serde(default)]
    pub workflow_id: String,
    #[serde(default)]
    pub artifact_store_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl WorkflowDeleted {
    pub fn new(workflow_id: impl Into<String>, artifact_store_id: impl Into<String>) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            artifact_store_id: artifact_store_id.into(),
            deleted_at: Some(Utc::now()),
        }
    }
}

impl ScopeDeleted for WorkflowDeleted {
    const SCOPE: DeletedScope = DeletedScope::Workflow;

    fn scope_id(&self) -> &str {
        &self.workflow_id
    }

    fn artifact_store_id(&self) -> &str {
        &self.artifact_store_id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineDeleted {
    #[serde(default)]
    pub pipeline_id: String,
    #[serde(default)]
    pub artifact_store_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl PipelineDeleted {
    pub fn new(pipeline_id: impl Into<String>, artifact_store_id: impl Into<String>) -> Self {
        Self {
            pipeline_id: pipeline_id.into(),
            artifact_store_id: artifact_store_id.into(),
            deleted_at: Some(Utc::now()),
        }
    }
}

impl ScopeDeleted for PipelineDeleted {
    const SCOPE: DeletedScope = DeletedScope::Pipeline;

    fn scope_id(&self) -> &str {
        &self.pipeline_id
    }

    fn artifact_store_id(&self) -> &str {
        &self.artifact_store_id
    }
}
