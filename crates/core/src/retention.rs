use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PolicyError;
use crate::matcher::{PolicyMatcher, RuleCategory};

/// Maximum number of rules in a single category.
pub const MAX_RULES: usize = 10;

/// Maximum selector length in bytes.
pub const MAX_SELECTOR_LEN: usize = 100;

/// Minimum rule age: one day.
pub const MIN_AGE_SECONDS: u64 = 24 * 3600;

/// One glob selector together with the minimum age before deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicyRuleItem {
    /// Glob relative to the project, workflow or job directory.
    pub selector: String,
    /// Minimum object age in seconds.
    pub age: u64,
}

impl RetentionPolicyRuleItem {
    pub fn new(selector: impl Into<String>, age: u64) -> Self {
        Self {
            selector: selector.into(),
            age,
        }
    }
}

/// Ordered rule list of one category, stored as `{"rules": [...]}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicyRules {
    #[serde(default)]
    pub rules: Vec<RetentionPolicyRuleItem>,
}

impl RetentionPolicyRules {
    pub fn new(rules: Vec<RetentionPolicyRuleItem>) -> Self {
        Self { rules }
    }

    /// The rule list installed when an artifact is destroyed: every object
    /// older than the minimum age is removed.
    pub fn delete_everything() -> Self {
        Self::new(vec![RetentionPolicyRuleItem::new("/**/*", MIN_AGE_SECONDS)])
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        if self.rules.len() > MAX_RULES {
            return Err(PolicyError::TooManyRules {
                count: self.rules.len(),
            });
        }

        for rule in &self.rules {
            if rule.selector.len() > MAX_SELECTOR_LEN {
                return Err(PolicyError::SelectorTooLong {
                    selector: rule.selector.clone(),
                });
            }
            if rule.age < MIN_AGE_SECONDS {
                return Err(PolicyError::AgeTooShort { age: rule.age });
            }
        }

        Ok(())
    }
}

/// Retention rules of one artifact, plus the cleanup bookkeeping columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub id: Uuid,
    pub artifact_id: Uuid,
    #[serde(default)]
    pub project_rules: RetentionPolicyRules,
    #[serde(default)]
    pub workflow_rules: RetentionPolicyRules,
    #[serde(default)]
    pub job_rules: RetentionPolicyRules,
    /// Last time a sweep was queued or continued for this policy.
    #[serde(default)]
    pub scheduled_for_cleaning_at: Option<DateTime<Utc>>,
    /// Last time a sweep ran to completion.
    #[serde(default)]
    pub last_cleaned_at: Option<DateTime<Utc>>,
}

impl RetentionPolicy {
    /// Build a validated policy for `artifact_id`.
    pub fn new(
        artifact_id: Uuid,
        project_rules: RetentionPolicyRules,
        workflow_rules: RetentionPolicyRules,
        job_rules: RetentionPolicyRules,
    ) -> Result<Self, PolicyError> {
        let policy = Self {
            project_rules,
            workflow_rules,
            job_rules,
            ..Self::empty(artifact_id)
        };
        policy.validate()?;
        Ok(policy)
    }

    /// A policy with no rules: nothing is ever cleaned.
    pub fn empty(artifact_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            artifact_id,
            project_rules: RetentionPolicyRules::default(),
            workflow_rules: RetentionPolicyRules::default(),
            job_rules: RetentionPolicyRules::default(),
            scheduled_for_cleaning_at: None,
            last_cleaned_at: None,
        }
    }

    /// Validate all three rule lists.
    pub fn validate(&self) -> Result<(), PolicyError> {
        RuleCategory::ALL
            .into_iter()
            .try_for_each(|category| self.rules(category).validate())
    }

    pub fn rules(&self, category: RuleCategory) -> &RetentionPolicyRules {
        match category {
            RuleCategory::Project => &self.project_rules,
            RuleCategory::Workflow => &self.workflow_rules,
            RuleCategory::Job => &self.job_rules,
        }
    }

    /// Replace the rule lists after validating them.
    ///
    /// On error the policy is left untouched.
    pub fn replace_rules(
        &mut self,
        project_rules: RetentionPolicyRules,
        workflow_rules: RetentionPolicyRules,
        job_rules: RetentionPolicyRules,
    ) -> Result<(), PolicyError> {
        project_rules.validate()?;
        workflow_rules.validate()?;
        job_rules.validate()?;
        self.project_rules = project_rules;
        self.workflow_rules = workflow_rules;
        self.job_rules = job_rules;
        Ok(())
    }

    /// Compile the selectors once for repeated matching.
    pub fn matcher(&self) -> PolicyMatcher {
        PolicyMatcher::new(self)
    }

    /// Convenience wrapper compiling the matcher for a single lookup.
    pub fn is_matching(&self, path: &str, age: Duration) -> bool {
        self.matcher().is_matching(path, age)
    }

    /// Whether a sweep completed within the 24 hours before `now`.
    pub fn is_cleaned_in_last_24_hours(&self, now: DateTime<Utc>) -> bool {
        self.last_cleaned_at
            .is_some_and(|at| at > now - chrono::Duration::hours(24))
    }
}
