//! Error types for lineage_db

use crate::model::FieldConflict;
use thiserror::Error;

/// Result type alias for lineage_db operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in lineage_db operations
#[derive(Error, Debug)]
pub enum Error {
    /// The branch head moved since the caller last read it. Re-read and retry.
    #[error("Conflict on branch {branch}: expected head {expected}, found {actual}")]
    Conflict {
        branch: String,
        expected: String,
        actual: String,
    },

    #[error("Merge conflict on {} field(s)", .0.len())]
    MergeConflict(Vec<FieldConflict>),

    #[error("Cycle detected: {0}")]
    Cycle(String),

    #[error("Node {0} already has a root edge")]
    DuplicateRoot(String),

    #[error("Lineage error: {0}")]
    Lineage(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Branch already exists: {0}")]
    BranchExists(String),

    #[error("Branch is archived: {0}")]
    BranchArchived(String),

    #[error("Invalid fork: {0}")]
    InvalidFork(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corruption detected: {0}")]
    Corruption(String),

    #[error("Database already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid database file: {0}")]
    InvalidFile(String),

    #[error("Version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("Config error: {0}")]
    Config(String),
}

impl Error {
    /// Whether the caller can recover by re-reading state and retrying
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. })
    }

    /// Conflicting fields carried by a merge conflict, if any
    pub fn conflicts(&self) -> Option<&[FieldConflict]> {
        match self {
            Error::MergeConflict(conflicts) => Some(conflicts),
            _ => None,
        }
    }
}
