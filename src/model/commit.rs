//! Commit type - an immutable, content-addressed set of changes

use super::{now_millis, BranchId, Change, FieldValue, Hash, Metadata};
use serde::{Deserialize, Serialize};

const COMMIT_DOMAIN: &[u8] = b"lineage-commit-v1";

/// A commit is an immutable record of changes applied atomically.
///
/// Like git commits, these form a DAG: ordinary commits have one parent,
/// merge commits two, and only the genesis commit has none. The id is a
/// function of the parents and the canonical change set alone, so
/// resubmitting the same logical change yields the same commit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Commit {
    pub id: Hash,
    pub parents: Vec<Hash>,
    /// Branch the commit was first recorded on
    pub branch_id: BranchId,
    pub author: String,
    pub message: String,
    /// Unix millis
    pub timestamp: u64,
    pub metadata: Metadata,
    /// Changes in canonical order
    pub changes: Vec<Change>,
}

impl Commit {
    /// Build a commit, canonicalizing the change order and stamping ids
    pub fn new(
        parents: Vec<Hash>,
        branch_id: BranchId,
        mut changes: Vec<Change>,
        author: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        changes.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));
        let id = Self::compute_id(&parents, &changes);
        for change in &mut changes {
            change.commit_id = id;
        }

        Commit {
            id,
            parents,
            branch_id,
            author: author.into(),
            message: message.into(),
            timestamp: now_millis(),
            metadata: Metadata::new(),
            changes,
        }
    }

    /// The root commit every repository starts from
    pub fn genesis(branch_id: BranchId) -> Self {
        Self::new(vec![], branch_id, vec![], "lineage", "Genesis")
    }

    /// Create a commit with a single parent
    pub fn child(
        parent: Hash,
        branch_id: BranchId,
        changes: Vec<Change>,
        author: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(vec![parent], branch_id, changes, author, message)
    }

    /// Create a two-parent merge commit
    pub fn merge(
        ours: Hash,
        theirs: Hash,
        branch_id: BranchId,
        changes: Vec<Change>,
        author: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(vec![ours, theirs], branch_id, changes, author, message)
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Deterministic id over `(parents, changes)`.
    ///
    /// Changes are hashed in canonical order regardless of input order;
    /// `commit_id`, author, message, timestamp and metadata never
    /// contribute.
    pub fn compute_id(parents: &[Hash], changes: &[Change]) -> Hash {
        let mut sorted: Vec<&Change> = changes.iter().collect();
        sorted.sort_by(|a, b| a.sort_key().cmp(&b.sort_key()));

        let mut hasher = blake3::Hasher::new();
        let mut feed = |bytes: &[u8]| {
            hasher.update(&(bytes.len() as u64).to_le_bytes());
            hasher.update(bytes);
        };

        feed(COMMIT_DOMAIN);
        feed(&(parents.len() as u64).to_le_bytes());
        for parent in parents {
            feed(parent.as_bytes());
        }
        feed(&(sorted.len() as u64).to_le_bytes());
        for change in sorted {
            feed(change.entity_type.as_str().as_bytes());
            feed(change.entity_id.as_bytes());
            feed(change.field_name.as_bytes());
            feed(change.old_value.to_canonical().as_bytes());
            feed(change.new_value.to_canonical().as_bytes());
        }

        Hash::from_bytes(*hasher.finalize().as_bytes())
    }

    pub fn is_genesis(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_merge(&self) -> bool {
        self.parents.len() > 1
    }
}
