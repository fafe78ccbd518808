//! Branch type - a named, mutable pointer into the commit DAG

use super::{now_millis, Hash};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identifier of a branch, derived from its (unique) name
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BranchId(pub String);

impl BranchId {
    pub fn new(id: impl Into<String>) -> Self {
        BranchId(id.into())
    }

    /// Derive the id for a branch name
    pub fn for_name(name: &str) -> Self {
        let hash = Hash::digest_many(&[b"branch", name.as_bytes()]);
        BranchId(hash.to_hex()[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BranchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for BranchId {
    fn from(s: &str) -> Self {
        BranchId(s.to_string())
    }
}

impl From<&BranchId> for BranchId {
    fn from(id: &BranchId) -> Self {
        id.clone()
    }
}

/// Descriptive kind of a branch; no engine behavior depends on it
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchKind {
    Main,
    Alternate,
    WhatIf,
}

impl FromStr for BranchKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "main" => Ok(BranchKind::Main),
            "alternate" | "alt" => Ok(BranchKind::Alternate),
            "whatif" | "what-if" | "what_if" => Ok(BranchKind::WhatIf),
            other => Err(crate::Error::Validation(format!(
                "unknown branch kind '{}'",
                other
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BranchState {
    Active,
    Merged,
    Archived,
}

/// A line of development
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub kind: BranchKind,
    pub state: BranchState,
    /// Branch this one forked from (None for the main line)
    pub base_branch_id: Option<BranchId>,
    /// Commit the branch was created at; the head always descends from it
    pub fork_commit_id: Hash,
    pub head_commit_id: Hash,
    /// Unix millis
    pub created_at: u64,
}

impl Branch {
    pub fn new(
        name: impl Into<String>,
        kind: BranchKind,
        base_branch_id: Option<BranchId>,
        fork_commit_id: Hash,
    ) -> Self {
        let name = name.into();
        Branch {
            id: BranchId::for_name(&name),
            name,
            kind,
            state: BranchState::Active,
            base_branch_id,
            fork_commit_id,
            head_commit_id: fork_commit_id,
            created_at: now_millis(),
        }
    }

    pub fn is_archived(&self) -> bool {
        self.state == BranchState::Archived
    }
}
