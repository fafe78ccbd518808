//! Version node - one themed snapshot of a versionable entity

use super::{EntityType, FieldValue, Hash, Metadata};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a version node
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        NodeId(id.into())
    }

    /// Derive a node id from its identity and the store sequence number
    pub fn derive(entity_type: EntityType, entity_id: &str, theme: &str, seq: u64) -> Self {
        let hash = Hash::digest_many(&[
            b"node",
            entity_type.as_str().as_bytes(),
            entity_id.as_bytes(),
            theme.as_bytes(),
            &seq.to_le_bytes(),
        ]);
        NodeId(hash.to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the node is stored
    pub fn storage_key(&self) -> Hash {
        Hash::digest_many(&[b"node", self.0.as_bytes()])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

impl From<&NodeId> for NodeId {
    fn from(id: &NodeId) -> Self {
        id.clone()
    }
}

/// A themed snapshot of an entity.
///
/// Nodes are immutable. A theme change produces a new node linked to the
/// old one by a `Parent` edge, or severed from it by a `Root` edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionNode {
    pub id: NodeId,
    pub entity_id: String,
    pub entity_type: EntityType,
    pub theme: String,
    /// Snapshot fields (e.g. `damage`, `description`)
    pub metadata: Metadata,
}

impl VersionNode {
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: EntityType,
        theme: impl Into<String>,
        seq: u64,
    ) -> Self {
        let entity_id = entity_id.into();
        let theme = theme.into();
        VersionNode {
            id: NodeId::derive(entity_type, &entity_id, &theme, seq),
            entity_id,
            entity_type,
            theme,
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.metadata.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_ids_differ_by_sequence() {
        let a = VersionNode::new("sword", EntityType::Equipment, "fantasy", 1);
        let b = VersionNode::new("sword", EntityType::Equipment, "fantasy", 2);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.as_str().len(), 64, "ids keep the full digest");
    }

    #[test]
    fn test_node_fields() {
        let node = VersionNode::new("sword", EntityType::Equipment, "fantasy", 1)
            .with_field("damage", "1d8");
        assert_eq!(node.field("damage"), Some(&FieldValue::from("1d8")));
        assert!(node.field("weight").is_none());
    }
}
