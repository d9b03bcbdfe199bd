//! Reverse delete rules between record classes.

use serde::{Deserialize, Serialize};

/// What happens to referencing records when a referenced record is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DeleteRule {
    /// Leave the reference dangling.
    #[default]
    DoNothing,
    /// Unset the referencing field.
    Nullify,
    /// Remove the referencing records as well.
    Cascade,
    /// Refuse the removal while references exist.
    Deny,
    /// Remove the key from a list of references, keeping the referencing record.
    Pull,
}

impl DeleteRule {
    /// Short upper-case name used in log and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeleteRule::DoNothing => "DO_NOTHING",
            DeleteRule::Nullify => "NULLIFY",
            DeleteRule::Cascade => "CASCADE",
            DeleteRule::Deny => "DENY",
            DeleteRule::Pull => "PULL",
        }
    }
}

/// A rule registered on a referenced class by a class that references it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseRule {
    /// Key of the class holding the reference field.
    pub referencing_class: String,
    /// Name of the reference field.
    pub field: String,
    /// Policy to apply.
    pub rule: DeleteRule,
}

impl ReverseRule {
    /// Create a reverse rule.
    pub fn new(
        referencing_class: impl Into<String>,
        field: impl Into<String>,
        rule: DeleteRule,
    ) -> Self {
        Self {
            referencing_class: referencing_class.into(),
            field: field.into(),
            rule,
        }
    }
}
