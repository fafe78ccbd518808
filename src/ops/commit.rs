//! Appending commits to branches

use crate::model::{Branch, BranchId, Change, Commit, FieldValue, Hash, Metadata};
use crate::store::{ObjectStore, RecordSource, Transaction};
use crate::validation::ChangeValidator;
use crate::{Error, Result};
use std::collections::HashSet;
use tracing::{debug, warn};

/// A commit proposed for a branch
#[derive(Clone, Debug)]
pub struct NewCommit {
    /// Head the caller last saw; must still be the branch head
    pub parent: Hash,
    pub branch_id: BranchId,
    pub changes: Vec<Change>,
    pub author: String,
    pub message: String,
    pub metadata: Metadata,
}

impl NewCommit {
    pub fn new(
        parent: Hash,
        branch_id: BranchId,
        changes: Vec<Change>,
        author: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        NewCommit {
            parent,
            branch_id,
            changes,
            author: author.into(),
            message: message.into(),
            metadata: Metadata::new(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Reject empty change sets, repeated fields, and anything the validator refuses
pub(crate) fn check_changes(changes: &[Change], validator: &dyn ChangeValidator) -> Result<()> {
    if changes.is_empty() {
        return Err(Error::Validation("a commit needs at least one change".into()));
    }

    let mut seen = HashSet::new();
    for change in changes {
        if !seen.insert(change.key()) {
            return Err(Error::Validation(format!(
                "{} is changed more than once",
                change.key()
            )));
        }
    }

    validator.validate_all(changes).inspect_err(|e| {
        warn!(validator = validator.name(), error = %e, "changes rejected");
    })
}

pub(crate) fn conflict(branch: &Branch, expected: Hash) -> Error {
    Error::Conflict {
        branch: branch.name.clone(),
        expected: expected.short(),
        actual: branch.head_commit_id.short(),
    }
}

/// Append a commit inside an open transaction.
///
/// Replaying a commit that is already the branch head returns it unchanged.
pub(crate) fn append_in(
    txn: &mut Transaction<'_>,
    validator: &dyn ChangeValidator,
    request: NewCommit,
) -> Result<Commit> {
    check_changes(&request.changes, validator)?;

    let mut branch = txn.branch(&request.branch_id)?;
    if branch.is_archived() {
        return Err(Error::BranchArchived(branch.name));
    }

    let mut commit = Commit::child(
        request.parent,
        branch.id.clone(),
        request.changes,
        request.author,
        request.message,
    );
    commit.metadata = request.metadata;

    if branch.head_commit_id == commit.id {
        debug!(commit = %commit.id.short(), branch = %branch.name, "replayed commit");
        return txn.get_commit(&commit.id);
    }
    if branch.head_commit_id != request.parent {
        warn!(branch = %branch.name, "stale parent on append");
        return Err(conflict(&branch, request.parent));
    }

    branch.head_commit_id = commit.id;
    txn.put_commit(commit.clone());
    txn.put_branch(branch);

    debug!(
        commit = %commit.id.short(),
        changes = commit.changes.len(),
        "appended commit"
    );
    Ok(commit)
}

/// Reads and appends against the commit DAG
pub struct CommitLog<'a> {
    store: &'a ObjectStore,
    validator: &'a dyn ChangeValidator,
}

impl<'a> CommitLog<'a> {
    pub fn new(store: &'a ObjectStore, validator: &'a dyn ChangeValidator) -> Self {
        CommitLog { store, validator }
    }

    /// Validate, store and publish a commit, advancing its branch head
    pub fn append(&self, request: NewCommit) -> Result<Commit> {
        self.store
            .transaction(|txn| append_in(txn, self.validator, request))
    }

    pub fn get(&self, id: &Hash) -> Result<Commit> {
        self.store.snapshot().get_commit(id)
    }

    /// Up to `limit` commits reachable from a branch head, nearest first
    pub fn log(&self, branch_id: &BranchId, limit: Option<usize>) -> Result<Vec<Commit>> {
        let snap = self.store.snapshot();
        let head = snap.branch(branch_id)?.head_commit_id;
        super::history::log(&snap, head, limit)
    }

    pub fn is_ancestor(&self, ancestor: Hash, descendant: Hash) -> Result<bool> {
        super::history::is_ancestor(&self.store.snapshot(), ancestor, descendant)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BranchKind, EntityType};
    use crate::validation::{FnValidator, StructuralValidator};
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, ObjectStore, Branch) {
        let dir = tempdir().unwrap();
        let store = ObjectStore::create(dir.path().join("test.lineage")).unwrap();
        let main = Branch::new("main", BranchKind::Main, None, Hash::ZERO);
        let genesis = Commit::genesis(main.id.clone());
        let main = Branch {
            fork_commit_id: genesis.id,
            head_commit_id: genesis.id,
            ..main
        };
        store
            .transaction(|txn| {
                txn.put_commit(genesis);
                txn.put_branch(main.clone());
                Ok(())
            })
            .unwrap();
        (dir, store, main)
    }

    fn hp(value: i64) -> Vec<Change> {
        vec![Change::set(EntityType::Character, "aria", "hp", value)]
    }

    #[test]
    fn test_append_advances_head() {
        let (_dir, store, main) = setup();
        let validator = StructuralValidator::default();
        let log = CommitLog::new(&store, &validator);

        let c1 = log
            .append(NewCommit::new(main.head_commit_id, main.id.clone(), hp(10), "dm", "one"))
            .unwrap();
        let c2 = log
            .append(NewCommit::new(c1.id, main.id.clone(), hp(12), "dm", "two"))
            .unwrap();

        assert_eq!(c2.parents, vec![c1.id]);
        assert_eq!(store.snapshot().branch(&main.id).unwrap().head_commit_id, c2.id);
        assert!(c2.changes.iter().all(|c| c.commit_id == c2.id));

        let entries = log.log(&main.id, None).unwrap();
        assert_eq!(entries.len(), 3);
        assert!(log.is_ancestor(c1.id, c2.id).unwrap());
    }

    #[test]
    fn test_append_is_idempotent() {
        let (_dir, store, main) = setup();
        let validator = StructuralValidator::default();
        let log = CommitLog::new(&store, &validator);

        let request = NewCommit::new(main.head_commit_id, main.id.clone(), hp(10), "dm", "one");
        let first = log.append(request.clone()).unwrap();
        let count = store.object_count();
        let again = log.append(request.with_metadata("retry", true)).unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(store.object_count(), count);
    }

    #[test]
    fn test_stale_parent_conflicts() {
        let (_dir, store, main) = setup();
        let validator = StructuralValidator::default();
        let log = CommitLog::new(&store, &validator);

        log.append(NewCommit::new(main.head_commit_id, main.id.clone(), hp(10), "dm", "a"))
            .unwrap();
        let err = log
            .append(NewCommit::new(main.head_commit_id, main.id.clone(), hp(11), "dm", "b"))
            .unwrap_err();

        assert!(matches!(err, Error::Conflict { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_rejected_changes_write_nothing() {
        let (_dir, store, main) = setup();
        let validator = FnValidator::new("no-negative-hp", |c: &Change| {
            match c.new_value.as_json().as_i64() {
                Some(v) if v < 0 => Err("hp below zero".to_string()),
                _ => Ok(()),
            }
        });
        let log = CommitLog::new(&store, &validator);
        let before = store.object_count();

        let err = log
            .append(NewCommit::new(main.head_commit_id, main.id.clone(), hp(-3), "dm", "bad"))
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(store.object_count(), before);
        assert_eq!(
            store.snapshot().branch(&main.id).unwrap().head_commit_id,
            main.head_commit_id
        );
    }

    #[test]
    fn test_duplicate_and_empty_changes_rejected() {
        let (_dir, store, main) = setup();
        let validator = StructuralValidator::default();
        let log = CommitLog::new(&store, &validator);

        let mut doubled = hp(10);
        doubled.extend(hp(11));
        let dup = log.append(NewCommit::new(main.head_commit_id, main.id.clone(), doubled, "dm", "x"));
        let empty = log.append(NewCommit::new(main.head_commit_id, main.id.clone(), vec![], "dm", "x"));

        assert!(matches!(dup, Err(Error::Validation(_))));
        assert!(matches!(empty, Err(Error::Validation(_))));
    }

    #[test]
    fn test_archived_branch_rejects_append() {
        let (_dir, store, main) = setup();
        let alt = Branch::new("alt", BranchKind::Alternate, None, main.head_commit_id);
        let archived = Branch {
            state: crate::model::BranchState::Archived,
            ..alt
        };
        store
            .transaction(|txn| {
                txn.put_branch(archived.clone());
                Ok(())
            })
            .unwrap();

        let validator = StructuralValidator::default();
        let log = CommitLog::new(&store, &validator);
        let err = log
            .append(NewCommit::new(archived.head_commit_id, archived.id.clone(), hp(1), "dm", "x"))
            .unwrap_err();
        assert!(matches!(err, Error::BranchArchived(_)));
    }
}
