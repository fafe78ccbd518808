//! # lineage_db
//!
//! A branchable, mergeable version graph for tabletop characters and
//! campaigns.
//!
//! lineage_db keeps an append-only history of field-level changes modeled
//! after git, plus a graph of themed entity snapshots, so a character's
//! state can be reconstructed at any commit on any branch.
//!
//! ## Core Concepts
//!
//! - **Commits**: Immutable, content-addressed sets of field changes
//! - **Branches**: Named heads, advanced by append, fast-forward or merge
//! - **Version nodes**: Themed snapshots of characters, items and spells
//! - **Version edges**: Lineage (`Parent`, `Root`) and holdings
//!   (`Owns`, `Equipped`, `Knows`), each valid from a commit onwards
//! - **Theme transitions**: Atomic moves of a character and its gear into a
//!   new theme
//!
//! ## Example
//!
//! ```ignore
//! use lineage_db::{Change, Database, EntityType, NewCommit};
//!
//! let db = Database::open_or_create("campaign.lineage")?;
//! let main = db.main_branch()?;
//! let commit = db.create_commit(NewCommit::new(
//!     main.head_commit_id,
//!     main.id.clone(),
//!     vec![Change::set(EntityType::Character, "aria", "hp", 12)],
//!     "dm",
//!     "Aria joins the party",
//! ))?;
//! ```

pub mod config;
pub mod graph;
pub mod model;
pub mod ops;
pub mod store;
pub mod theme;
pub mod validation;

mod database;
mod error;

pub use config::Config;
pub use database::{Database, MAIN_BRANCH};
pub use error::{Error, Result};
pub use graph::{CharacterState, HeldItem};
pub use model::{
    Branch, BranchId, BranchKind, BranchState, Change, Commit, EdgeKind, EntityType,
    FieldConflict, FieldKey, FieldValue, Hash, Metadata, NodeId, VersionEdge, VersionNode,
};
pub use ops::{Diff, MergeOutcome, MergePlan, NewCommit};
pub use store::ObjectStore;
pub use theme::{
    EquipmentStrategy, FlavorGenerator, ThemeTransitionRequest, TransitionReport, TransitionState,
};
pub use validation::{ChangeValidator, FnValidator, StructuralValidator};

/// Database version for format compatibility
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"LINEAGDB";
