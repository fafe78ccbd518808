//! Persistence layer
//!
//! Commits, version nodes and version edges are immutable records stored as
//! zstd-compressed bincode blobs in a single append-only file. Branches are
//! the only mutable records and live in a table rewritten on every sync.
//!
//! Reads go through a [`Snapshot`], which sees one consistent state. Writes
//! are staged in a [`Transaction`] and published all at once, so a failed
//! operation never leaves partial records behind.

mod blob;
mod file_store;
mod txn;

pub use blob::{Blob, BlobType};
pub use file_store::{ObjectStore, Snapshot};
pub use txn::Transaction;

use crate::model::{Branch, BranchId, Commit, EntityType, Hash, NodeId, VersionEdge, VersionNode};
use crate::Result;

/// Read access to stored records.
///
/// Implemented by committed snapshots and by open transactions (which also
/// see their own staged writes), so graph walks run the same way on both.
pub trait RecordSource {
    fn get_commit(&self, id: &Hash) -> Result<Commit>;

    fn has_commit(&self, id: &Hash) -> bool;

    fn branch(&self, id: &BranchId) -> Result<Branch>;

    fn branch_by_name(&self, name: &str) -> Option<Branch>;

    fn branches(&self) -> Vec<Branch>;

    fn node(&self, id: &NodeId) -> Result<VersionNode>;

    fn has_node(&self, id: &NodeId) -> bool {
        self.node(id).is_ok()
    }

    /// All nodes recorded for an entity, in insertion order
    fn nodes_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Vec<VersionNode>;

    /// Edges whose source is `id`
    fn edges_out(&self, id: &NodeId) -> Vec<VersionEdge>;

    /// Edges whose target is `id`
    fn edges_in(&self, id: &NodeId) -> Vec<VersionEdge>;
}
