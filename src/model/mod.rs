//! Core data model types for lineage_db

mod branch;
mod change;
mod commit;
mod edge;
mod hash;
mod node;
mod value;

pub use branch::{Branch, BranchId, BranchKind, BranchState};
pub use change::{Change, EntityType, FieldConflict, FieldKey};
pub use commit::Commit;
pub use edge::{EdgeId, EdgeKind, VersionEdge};
pub use hash::Hash;
pub use node::{NodeId, VersionNode};
pub use value::{FieldValue, Metadata};

/// Current time as unix millis
pub(crate) fn now_millis() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};

    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
