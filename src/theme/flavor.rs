//! Flavor text regeneration for themed snapshots

use crate::model::{FieldValue, VersionNode};

/// Fields that describe how an entity looks or reads rather than how it plays
pub const DEFAULT_FLAVOR_FIELDS: &[&str] = &[
    "name",
    "description",
    "appearance",
    "flavor",
    "lore",
];

/// Trait for producing theme-specific flavor when an entity is adapted
///
/// Implementations can wrap:
/// - Text generation services
/// - Curated per-theme lookup tables
/// - Deterministic templates (the default)
pub trait FlavorGenerator: Send + Sync {
    /// Whether `field` is flavor. Everything else is mechanical and is
    /// carried across themes untouched.
    fn is_flavor(&self, field: &str) -> bool {
        DEFAULT_FLAVOR_FIELDS.contains(&field)
    }

    /// New value of a flavor field of `node` under `new_theme`
    fn regenerate(
        &self,
        node: &VersionNode,
        field: &str,
        current: &FieldValue,
        new_theme: &str,
    ) -> FieldValue;

    /// Identifier used in logs
    fn name(&self) -> &str;
}

/// Tags existing flavor text with the new theme
#[derive(Clone, Debug, Default)]
pub struct ThemeTagFlavor;

impl FlavorGenerator for ThemeTagFlavor {
    fn regenerate(
        &self,
        node: &VersionNode,
        _field: &str,
        current: &FieldValue,
        new_theme: &str,
    ) -> FieldValue {
        let base = current.as_str().unwrap_or(node.entity_id.as_str());
        let base = base
            .strip_suffix(&format!(" ({})", node.theme))
            .unwrap_or(base);
        FieldValue::from(format!("{} ({})", base, new_theme))
    }

    fn name(&self) -> &str {
        "theme-tag"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::EntityType;

    #[test]
    fn test_theme_tag_replaces_previous_tag() {
        let node = VersionNode::new("sword", EntityType::Equipment, "fantasy", 1)
            .with_field("name", "Moonblade (fantasy)");
        let flavor = ThemeTagFlavor;

        let renamed = flavor.regenerate(&node, "name", node.field("name").unwrap(), "noir");
        assert_eq!(renamed, FieldValue::from("Moonblade (noir)"));

        let from_id = flavor.regenerate(&node, "lore", &FieldValue::null(), "noir");
        assert_eq!(from_id, FieldValue::from("sword (noir)"));
    }

    #[test]
    fn test_default_flavor_split() {
        let flavor = ThemeTagFlavor;
        assert!(flavor.is_flavor("description"));
        assert!(!flavor.is_flavor("damage"));
    }
}
