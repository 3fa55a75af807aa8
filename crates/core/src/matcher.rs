//! Decides whether an object may be deleted under a retention policy.
//!
//! The object path picks the rule category. Rules inside a category are
//! tried in order.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::retention::{RetentionPolicy, RetentionPolicyRules};
use crate::selector::Selector;

/// The level a retention rule list applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleCategory {
    Project,
    Workflow,
    Job,
}

impl RuleCategory {
    pub const ALL: [Self; 3] = [Self::Project, Self::Workflow, Self::Job];

    /// Object-path prefix owned by this category.
    pub fn root(self) -> &'static str {
        match self {
            Self::Project => "artifacts/projects/",
            Self::Workflow => "artifacts/workflows/",
            Self::Job => "artifacts/jobs/",
        }
    }

    /// Pick the category owning `path`, if any.
    pub fn from_path(path: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|category| path.starts_with(category.root()))
    }

    /// Selectors are written relative to the directory of a single
    /// project, workflow or job, so the identifier component is globbed.
    fn selector_prefix(self) -> &'static str {
        match self {
            Self::Project => "artifacts/projects/**",
            Self::Workflow => "artifacts/workflows/**",
            Self::Job => "artifacts/jobs/**",
        }
    }
}

impl fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Project => "project",
            Self::Workflow => "workflow",
            Self::Job => "job",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    /// `None` when the selector failed to compile; such a rule never matches.
    selector: Option<Selector>,
    age: Duration,
}

impl CompiledRule {
    fn matches(&self, path: &str) -> bool {
        self.selector.as_ref().is_some_and(|s| s.is_match(path))
    }
}

/// Retention rules of one policy with every selector compiled up front.
#[derive(Debug, Clone)]
pub struct PolicyMatcher {
    project: Vec<CompiledRule>,
    workflow: Vec<CompiledRule>,
    job: Vec<CompiledRule>,
}

impl PolicyMatcher {
    pub fn new(policy: &RetentionPolicy) -> Self {
        Self {
            project: compile(RuleCategory::Project, &policy.project_rules),
            workflow: compile(RuleCategory::Workflow, &policy.workflow_rules),
            job: compile(RuleCategory::Job, &policy.job_rules),
        }
    }

    /// Whether the object at `path`, aged `age`, is eligible for deletion.
    ///
    /// Only the rule list of the category owning the path is consulted. The
    /// first rule whose selector matches decides; later rules are ignored.
    /// Paths matching no rule are retained.
    pub fn is_matching(&self, path: &str, age: Duration) -> bool {
        let Some(category) = RuleCategory::from_path(path) else {
            return false;
        };

        self.rules(category)
            .iter()
            .find(|rule| rule.matches(path))
            .is_some_and(|rule| age > rule.age)
    }

    fn rules(&self, category: RuleCategory) -> &[CompiledRule] {
        match category {
            RuleCategory::Project => &self.project,
            RuleCategory::Workflow => &self.workflow,
            RuleCategory::Job => &self.job,
        }
    }
}

fn compile(category: RuleCategory, rules: &RetentionPolicyRules) -> Vec<CompiledRule> {
    rules
        .rules
        .iter()
        .map(|rule| {
            let pattern = format!("{}{}", category.selector_prefix(), rule.selector);
            CompiledRule {
                selector: Selector::compile(&pattern).ok(),
                age: Duration::from_secs(rule.age),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retention::RetentionPolicyRuleItem;
    use uuid::Uuid;

    const DAY: u64 = 86_400;

    fn days(n: u64) -> Duration {
        Duration::from_secs(n * DAY)
    }

    fn policy() -> RetentionPolicy {
        RetentionPolicy::new(
            Uuid::new_v4(),
            RetentionPolicyRules::new(vec![
                RetentionPolicyRuleItem::new("/test-results/**/*", 12 * DAY),
                RetentionPolicyRuleItem::new("/**/*", 7 * DAY),
            ]),
            RetentionPolicyRules::new(vec![RetentionPolicyRuleItem::new("/*", 4 * DAY)]),
            RetentionPolicyRules::default(),
        )
        .unwrap()
    }

    #[test]
    fn category_from_path() {
        assert_eq!(
            RuleCategory::from_path("artifacts/projects/p/a.txt"),
            Some(RuleCategory::Project)
        );
        assert_eq!(
            RuleCategory::from_path("artifacts/jobs/j/a.txt"),
            Some(RuleCategory::Job)
        );
        assert_eq!(RuleCategory::from_path("artifacts/other/a.txt"), None);
        assert_eq!(RuleCategory::from_path("projects/p/a.txt"), None);
    }

    #[test]
    fn first_matching_rule_wins() {
        let matcher = policy().matcher();

        // Covered by the 12 day test-results rule, not the broader 7 day one.
        assert!(!matcher.is_matching("artifacts/projects/p1/test-results/a.txt", days(8)));
        assert!(matcher.is_matching("artifacts/projects/p1/test-results/a.txt", days(13)));

        assert!(matcher.is_matching("artifacts/projects/p1/other/a.txt", days(8)));
        assert!(!matcher.is_matching("artifacts/projects/p1/other/a.txt", days(6)));
    }

    #[test]
    fn age_must_strictly_exceed_rule_age() {
        let matcher = policy().matcher();
        assert!(!matcher.is_matching("artifacts/projects/p1/a.txt", days(7)));
        assert!(matcher.is_matching(
            "artifacts/projects/p1/a.txt",
            days(7) + Duration::from_secs(1)
        ));
    }

    #[test]
    fn workflow_rules_apply_below_workflow_directory() {
        let matcher = policy().matcher();
        assert!(matcher.is_matching("artifacts/workflows/w1/a.txt", days(5)));
        assert!(!matcher.is_matching("artifacts/workflows/w1/a.txt", days(3)));
        // The leading `**` in the category root absorbs nested directories.
        assert!(matcher.is_matching("artifacts/workflows/w1/deep/a.txt", days(5)));
    }

    #[test]
    fn categories_are_isolated() {
        let matcher = policy().matcher();
        // No job rules: job paths are always retained.
        assert!(!matcher.is_matching("artifacts/jobs/j1/a.txt", days(365)));
        // Paths outside any category are retained.
        assert!(!matcher.is_matching("other/a.txt", days(365)));
    }

    #[test]
    fn invalid_selector_never_matches() {
        let mut policy = policy();
        policy.job_rules = RetentionPolicyRules::new(vec![
            RetentionPolicyRuleItem::new("/[broken", DAY),
            RetentionPolicyRuleItem::new("/**/*", 2 * DAY),
        ]);
        let matcher = policy.matcher();
        assert!(matcher.is_matching("artifacts/jobs/j1/a.txt", days(3)));
        assert!(!matcher.is_matching("artifacts/jobs/j1/a.txt", Duration::from_secs(DAY + 1)));
    }
}
