pub mod artifact;
pub mod error;
pub mod events;
pub mod matcher;
pub mod request;
pub mod retention;
pub mod selector;

pub use artifact::{Artifact, ArtifactState};
pub use error::PolicyError;
pub use events::{DeletedScope, PipelineDeleted, ScopeDeleted, WorkflowDeleted};
pub use matcher::{PolicyMatcher, RuleCategory};
pub use request::{CleanRequest, ROUTING_KEY, ResumeToken};
pub use retention::{
    MAX_RULES, MAX_SELECTOR_LEN, MIN_AGE_SECONDS, RetentionPolicy, RetentionPolicyRuleItem,
    RetentionPolicyRules,
};
pub use selector::Selector;
