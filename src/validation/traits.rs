//! Change validator trait definition

use crate::model::Change;
use crate::Result;

/// Trait for checking proposed changes before a commit is accepted
///
/// Implementations can wrap:
/// - Game-rule services (stat limits, class/spell legality)
/// - Content policies
/// - Structural checks (the default)
///
/// A failing check must return `Error::Validation`; the engine then
/// rejects the whole commit.
pub trait ChangeValidator: Send + Sync {
    /// Check a single change
    fn validate(&self, change: &Change) -> Result<()>;

    /// Check every change of a commit.
    /// Default implementation stops at the first failure.
    fn validate_all(&self, changes: &[Change]) -> Result<()> {
        changes.iter().try_for_each(|c| self.validate(c))
    }

    /// Identifier used in logs
    fn name(&self) -> &str;
}
