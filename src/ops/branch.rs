//! Branch registry operations

use super::commit::conflict;
use super::history::is_ancestor;
use crate::model::{Branch, BranchId, BranchKind, BranchState, Hash};
use crate::store::{ObjectStore, RecordSource, Transaction};
use crate::{Error, Result};
use tracing::{debug, info, warn};

/// Create a branch inside an open transaction
pub(crate) fn create_branch_in(
    txn: &mut Transaction<'_>,
    name: &str,
    kind: BranchKind,
    base: Option<&BranchId>,
    from_commit: Hash,
) -> Result<Branch> {
    if name.trim().is_empty() {
        return Err(Error::Validation("branch name must not be empty".into()));
    }
    if txn.branch_by_name(name).is_some() {
        return Err(Error::BranchExists(name.to_string()));
    }
    if !txn.has_commit(&from_commit) {
        return Err(Error::NotFound(format!("commit {}", from_commit.short())));
    }

    if let Some(base_id) = base {
        let base_branch = txn.branch(base_id)?;
        if !is_ancestor(&*txn, from_commit, base_branch.head_commit_id)? {
            warn!(branch = name, base = %base_branch.name, "fork point off base history");
            return Err(Error::InvalidFork(format!(
                "commit {} is not in the history of branch {}",
                from_commit.short(),
                base_branch.name
            )));
        }
    }

    let branch = Branch::new(name, kind, base.cloned(), from_commit);
    txn.put_branch(branch.clone());
    Ok(branch)
}

/// Move a branch head forward inside an open transaction
pub(crate) fn fast_forward_in(
    txn: &mut Transaction<'_>,
    branch_id: &BranchId,
    new_head: Hash,
) -> Result<Branch> {
    let mut branch = txn.branch(branch_id)?;
    if branch.is_archived() {
        return Err(Error::BranchArchived(branch.name));
    }
    if !txn.has_commit(&new_head) {
        return Err(Error::NotFound(format!("commit {}", new_head.short())));
    }
    if branch.head_commit_id == new_head {
        return Ok(branch);
    }
    if !is_ancestor(&*txn, branch.head_commit_id, new_head)? {
        warn!(branch = %branch.name, target = %new_head.short(), "not a fast-forward");
        return Err(conflict(&branch, new_head));
    }

    debug!(
        branch = %branch.name,
        from = %branch.head_commit_id.short(),
        to = %new_head.short(),
        "fast-forward"
    );
    branch.head_commit_id = new_head;
    txn.put_branch(branch.clone());
    Ok(branch)
}

/// Change a branch's lifecycle state inside an open transaction
pub(crate) fn set_state_in(
    txn: &mut Transaction<'_>,
    branch_id: &BranchId,
    state: BranchState,
) -> Result<Branch> {
    let mut branch = txn.branch(branch_id)?;
    if branch.state != state {
        branch.state = state;
        txn.put_branch(branch.clone());
    }
    Ok(branch)
}

/// Manages branches and their heads
pub struct BranchRegistry<'a> {
    store: &'a ObjectStore,
}

impl<'a> BranchRegistry<'a> {
    pub fn new(store: &'a ObjectStore) -> Self {
        BranchRegistry { store }
    }

    /// Create a branch whose head starts at `from_commit`.
    ///
    /// With a base branch, `from_commit` must be in the base head's history.
    pub fn create_branch(
        &self,
        name: &str,
        kind: BranchKind,
        base: Option<&BranchId>,
        from_commit: Hash,
    ) -> Result<Branch> {
        let branch = self
            .store
            .transaction(|txn| create_branch_in(txn, name, kind, base, from_commit))?;
        info!(branch = %branch.name, at = %from_commit.short(), "created branch");
        Ok(branch)
    }

    /// Archive a branch; archiving twice is a no-op
    pub fn archive(&self, branch_id: &BranchId) -> Result<Branch> {
        self.store.transaction(|txn| {
            let branch = txn.branch(branch_id)?;
            if branch.kind == BranchKind::Main {
                return Err(Error::InvalidState(format!(
                    "main branch {} cannot be archived",
                    branch.name
                )));
            }
            let branch = set_state_in(txn, branch_id, BranchState::Archived)?;
            info!(branch = %branch.name, "archived branch");
            Ok(branch)
        })
    }

    /// Move the head to a descendant of the current head
    pub fn fast_forward(&self, branch_id: &BranchId, new_head: Hash) -> Result<Branch> {
        self.store
            .transaction(|txn| fast_forward_in(txn, branch_id, new_head))
    }

    pub fn get_head(&self, branch_id: &BranchId) -> Result<Hash> {
        Ok(self.get_branch(branch_id)?.head_commit_id)
    }

    pub fn get_branch(&self, branch_id: &BranchId) -> Result<Branch> {
        self.store.snapshot().branch(branch_id)
    }

    pub fn branch_by_name(&self, name: &str) -> Result<Branch> {
        self.store
            .snapshot()
            .branch_by_name(name)
            .ok_or_else(|| Error::NotFound(format!("branch {}", name)))
    }

    /// All branches, oldest first
    pub fn list_branches(&self) -> Vec<Branch> {
        let mut branches = self.store.snapshot().branches();
        branches.sort_by(|a, b| {
            (a.created_at, &a.name).cmp(&(b.created_at, &b.name))
        });
        branches
    }
}
