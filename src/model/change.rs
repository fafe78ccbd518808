//! Field-level changes - the payload of every commit

use super::{FieldValue, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of entity a change or version node refers to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Character,
    Equipment,
    Spell,
    Species,
    Class,
    Feat,
    Background,
    Chapter,
    Campaign,
}

impl EntityType {
    pub const ALL: [EntityType; 9] = [
        EntityType::Character,
        EntityType::Equipment,
        EntityType::Spell,
        EntityType::Species,
        EntityType::Class,
        EntityType::Feat,
        EntityType::Background,
        EntityType::Chapter,
        EntityType::Campaign,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Character => "character",
            EntityType::Equipment => "equipment",
            EntityType::Spell => "spell",
            EntityType::Species => "species",
            EntityType::Class => "class",
            EntityType::Feat => "feat",
            EntityType::Background => "background",
            EntityType::Chapter => "chapter",
            EntityType::Campaign => "campaign",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        EntityType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| crate::Error::Validation(format!("unknown entity type '{}'", s)))
    }
}

/// Identity of one field of one entity; the unit of conflict detection
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FieldKey {
    pub entity_type: EntityType,
    pub entity_id: String,
    pub field_name: String,
}

impl FieldKey {
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        field_name: impl Into<String>,
    ) -> Self {
        FieldKey {
            entity_type,
            entity_id: entity_id.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for FieldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}.{}", self.entity_type, self.entity_id, self.field_name)
    }
}

/// A single field-level change.
///
/// `commit_id` is `Hash::ZERO` while the change is only proposed and is
/// filled in once the owning commit's id is known.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Change {
    pub commit_id: Hash,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub field_name: String,
    pub old_value: FieldValue,
    pub new_value: FieldValue,
}

impl Change {
    /// Propose a change (not yet owned by a commit)
    pub fn new(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        field_name: impl Into<String>,
        old_value: impl Into<FieldValue>,
        new_value: impl Into<FieldValue>,
    ) -> Self {
        Change {
            commit_id: Hash::ZERO,
            entity_id: entity_id.into(),
            entity_type,
            field_name: field_name.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }

    /// Propose setting a field that had no prior value
    pub fn set(
        entity_type: EntityType,
        entity_id: impl Into<String>,
        field_name: impl Into<String>,
        new_value: impl Into<FieldValue>,
    ) -> Self {
        Self::new(
            entity_type,
            entity_id,
            field_name,
            FieldValue::null(),
            new_value,
        )
    }

    pub fn key(&self) -> FieldKey {
        FieldKey::new(self.entity_type, self.entity_id.clone(), self.field_name.clone())
    }

    /// Sort key used for canonical ordering inside a commit
    pub(crate) fn sort_key(&self) -> (EntityType, &str, &str) {
        (self.entity_type, &self.entity_id, &self.field_name)
    }
}

/// A field both sides of a merge changed to different values
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub key: FieldKey,
    /// Value as of the common ancestor
    pub base_value: FieldValue,
    /// Value on the branch being merged into
    pub ours: FieldValue,
    /// Value on the branch being merged
    pub theirs: FieldValue,
}

impl fmt::Display for FieldConflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ours={} theirs={}", self.key, self.ours, self.theirs)
    }
}
