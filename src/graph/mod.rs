//! Version graph: themed snapshots of entities and how they relate
//!
//! Lineage edges (`Parent`, `Root`) record how snapshots replace each other
//! and are checked for cycles and single parentage on insert. Holding edges
//! (`Owns`, `Equipped`, `Knows`) are stamped with a commit and projected by
//! [`resolve_current_state`].

mod projection;
mod version_graph;

pub use projection::{resolve_current_state, CharacterState, HeldItem};
pub use version_graph::{is_lineage_ancestor, lineage, replaced_by_root, VersionGraph};

pub(crate) use version_graph::{add_edge_in, add_node_in};
