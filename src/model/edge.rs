//! Version edge - a typed relationship between version nodes

use super::{Hash, NodeId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Edge kind classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Lineage: `source` is the previous snapshot of `target`
    Parent,
    /// Lineage reset: `target` starts a fresh lineage; `source` is the
    /// snapshot it replaced
    Root,
    /// Character has the item equipped
    Equipped,
    /// Character owns the item
    Owns,
    /// Character knows the spell
    Knows,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Parent => "parent",
            EdgeKind::Root => "root",
            EdgeKind::Equipped => "equipped",
            EdgeKind::Owns => "owns",
            EdgeKind::Knows => "knows",
        }
    }

    /// Ancestry edges shape the lineage DAG
    pub fn is_lineage(&self) -> bool {
        matches!(self, EdgeKind::Parent | EdgeKind::Root)
    }

    /// Ownership/knowledge edges are projected by state resolution
    pub fn is_holding(&self) -> bool {
        matches!(self, EdgeKind::Equipped | EdgeKind::Owns | EdgeKind::Knows)
    }
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EdgeKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "parent" => Ok(EdgeKind::Parent),
            "root" => Ok(EdgeKind::Root),
            "equipped" => Ok(EdgeKind::Equipped),
            "owns" => Ok(EdgeKind::Owns),
            "knows" => Ok(EdgeKind::Knows),
            other => Err(crate::Error::Validation(format!(
                "unknown edge kind '{}'",
                other
            ))),
        }
    }
}

/// Unique identifier for an edge
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EdgeId(pub String);

impl EdgeId {
    pub fn derive(source: &NodeId, target: &NodeId, kind: EdgeKind, seq: u64) -> Self {
        let hash = Hash::digest_many(&[
            b"edge",
            source.as_str().as_bytes(),
            target.as_str().as_bytes(),
            kind.as_str().as_bytes(),
            &seq.to_le_bytes(),
        ]);
        EdgeId(hash.to_hex())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn storage_key(&self) -> Hash {
        Hash::digest_many(&[b"edge", self.0.as_bytes()])
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An edge connecting two version nodes.
///
/// Edges are never edited. An edge is in effect at every commit that has
/// `commit_id` in its ancestry; a later edge for the same relationship
/// supersedes it, and a `retracted` edge ends the relationship.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    pub kind: EdgeKind,
    /// Commit as of which the edge holds
    pub commit_id: Hash,
    /// Tombstone: the relationship ends at `commit_id`
    pub retracted: bool,
    /// Store-assigned insertion order
    pub seq: u64,
}

impl VersionEdge {
    pub fn new(source: NodeId, target: NodeId, kind: EdgeKind, commit_id: Hash, seq: u64) -> Self {
        VersionEdge {
            id: EdgeId::derive(&source, &target, kind, seq),
            source,
            target,
            kind,
            commit_id,
            retracted: false,
            seq,
        }
    }

    pub fn retraction(
        source: NodeId,
        target: NodeId,
        kind: EdgeKind,
        commit_id: Hash,
        seq: u64,
    ) -> Self {
        let mut edge = Self::new(source, target, kind, commit_id, seq);
        edge.retracted = true;
        edge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_creation() {
        let edge = VersionEdge::new(
            NodeId::new("char"),
            NodeId::new("sword"),
            EdgeKind::Owns,
            Hash::digest(b"c1"),
            7,
        );
        assert_eq!(edge.kind, EdgeKind::Owns);
        assert!(!edge.retracted);
        assert_eq!(edge.seq, 7);
    }

    #[test]
    fn test_edge_ids_are_unique_per_sequence() {
        let a = EdgeId::derive(&NodeId::new("a"), &NodeId::new("b"), EdgeKind::Parent, 1);
        let b = EdgeId::derive(&NodeId::new("a"), &NodeId::new("b"), EdgeKind::Parent, 2);
        let c = EdgeId::derive(&NodeId::new("b"), &NodeId::new("a"), EdgeKind::Parent, 1);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.as_str().len(), 64, "ids keep the full digest");
    }

    #[test]
    fn test_edge_kind_classes() {
        assert!(EdgeKind::Parent.is_lineage());
        assert!(EdgeKind::Root.is_lineage());
        assert!(EdgeKind::Knows.is_holding());
        assert!(!EdgeKind::Owns.is_lineage());
        assert_eq!("EQUIPPED".parse::<EdgeKind>().unwrap(), EdgeKind::Equipped);
    }
}
