use thiserror::Error;

use crate::retention::{MAX_RULES, MAX_SELECTOR_LEN};

/// Validation errors for retention policies and their selectors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("retention policy must have less than {max} rules", max = MAX_RULES)]
    TooManyRules { count: usize },

    #[error(
        "retention policy selector length must be less than {max} long",
        max = MAX_SELECTOR_LEN
    )]
    SelectorTooLong { selector: String },

    #[error("retention policy age can't be shorter than a day")]
    AgeTooShort { age: u64 },

    #[error("invalid selector pattern {pattern:?}: {reason}")]
    InvalidSelector { pattern: String, reason: String },
}
