//! High-level Database API
//!
//! This module provides the main entry point for interacting with lineage_db.

use crate::graph::{resolve_current_state, CharacterState, VersionGraph};
use crate::model::{
    Branch, BranchId, BranchKind, Commit, EdgeKind, EntityType, FieldKey, FieldValue, Hash,
    Metadata, NodeId, VersionEdge, VersionNode,
};
use crate::ops::{
    self, create_branch_in, BranchRegistry, CommitLog, Diff, MergeOutcome, MergePlan,
    MergeRequest, NewCommit,
};
use crate::store::{ObjectStore, RecordSource, Snapshot};
use crate::theme::{
    FlavorGenerator, ThemeTagFlavor, ThemeTransition, ThemeTransitionRequest, TransitionPlan,
    TransitionReport,
};
use crate::validation::{ChangeValidator, StructuralValidator};
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Name of the branch every repository starts with
pub const MAIN_BRANCH: &str = "main";

/// The main database interface
///
/// Provides a convenient API for:
/// - Recording commits of field-level changes on branches
/// - Branching, fast-forwarding and merging
/// - Version nodes and edges for themed entities
/// - Projecting a character's state at any commit
/// - Theme transitions
///
/// Every method takes `&self`; share a `Database` across threads with
/// `Arc`. Concurrent appends to the same branch are resolved optimistically:
/// the loser gets a retryable [`Error::Conflict`].
pub struct Database {
    store: ObjectStore,
    validator: Arc<dyn ChangeValidator>,
    flavor: Arc<dyn FlavorGenerator>,
}

impl Database {
    fn with_store(store: ObjectStore) -> Self {
        Database {
            store,
            validator: Arc::new(StructuralValidator::default()),
            flavor: Arc::new(ThemeTagFlavor),
        }
    }

    /// Create a new database at the given path, with a genesis commit on `main`.
    ///
    /// Fails with [`Error::AlreadyExists`] rather than overwrite a file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        let store = ObjectStore::create(path)?;
        let genesis = store.transaction(|txn| {
            let genesis = Commit::genesis(BranchId::for_name(MAIN_BRANCH));
            txn.put_commit(genesis.clone());
            create_branch_in(txn, MAIN_BRANCH, BranchKind::Main, None, genesis.id)?;
            Ok(genesis)
        })?;
        store.sync()?;
        info!(path = %store.path().display(), genesis = %genesis.id.short(), "initialized repository");
        Ok(Self::with_store(store))
    }

    /// Open an existing database
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let store = ObjectStore::open(path)?;
        if store.snapshot().branch_by_name(MAIN_BRANCH).is_none() {
            return Err(Error::InvalidFile(format!(
                "{} has no {} branch",
                store.path().display(),
                MAIN_BRANCH
            )));
        }
        Ok(Self::with_store(store))
    }

    /// Open or create a database
    pub fn open_or_create(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            Self::open(path)
        } else {
            Self::create(path)
        }
    }

    /// Set the validator every commit must pass
    pub fn with_validator(mut self, validator: impl ChangeValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Set the generator used when adapting items to a new theme
    pub fn with_flavor(mut self, flavor: impl FlavorGenerator + 'static) -> Self {
        self.flavor = Arc::new(flavor);
        self
    }

    /// A consistent read view for the walks in [`crate::ops`] and
    /// [`crate::graph`].
    ///
    /// Drop it before calling any writing method on the same thread.
    pub fn snapshot(&self) -> Snapshot<'_> {
        self.store.snapshot()
    }

    fn commits(&self) -> CommitLog<'_> {
        CommitLog::new(&self.store, self.validator.as_ref())
    }

    fn branches(&self) -> BranchRegistry<'_> {
        BranchRegistry::new(&self.store)
    }

    fn graph(&self) -> VersionGraph<'_> {
        VersionGraph::new(&self.store)
    }

    // === Commit Operations ===

    /// Validate and append a commit, advancing its branch head.
    ///
    /// `request.parent` must be the current head. Replaying the commit that
    /// is already the head returns it without writing anything.
    pub fn create_commit(&self, request: NewCommit) -> Result<Commit> {
        self.commits().append(request)
    }

    pub fn get_commit(&self, id: &Hash) -> Result<Commit> {
        self.commits().get(id)
    }

    /// Up to `limit` commits reachable from `start`, breadth-first
    pub fn ancestors(&self, start: Hash, limit: Option<usize>) -> Result<Vec<Commit>> {
        ops::log(&self.store.snapshot(), start, limit)
    }

    /// History of a branch, head first
    pub fn log(&self, branch: &BranchId, limit: Option<usize>) -> Result<Vec<Commit>> {
        self.commits().log(branch, limit)
    }

    pub fn is_ancestor(&self, ancestor: Hash, descendant: Hash) -> Result<bool> {
        self.commits().is_ancestor(ancestor, descendant)
    }

    /// Fields of an entity as of a commit
    pub fn entity_fields(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        at: Hash,
    ) -> Result<BTreeMap<String, FieldValue>> {
        ops::entity_fields_at(&self.store.snapshot(), at, entity_type, entity_id)
    }

    // === Branch Operations ===

    pub fn create_branch(
        &self,
        name: &str,
        kind: BranchKind,
        base: Option<&BranchId>,
        from_commit: Hash,
    ) -> Result<Branch> {
        self.branches().create_branch(name, kind, base, from_commit)
    }

    pub fn archive_branch(&self, branch: &BranchId) -> Result<Branch> {
        self.branches().archive(branch)
    }

    pub fn fast_forward(&self, branch: &BranchId, new_head: Hash) -> Result<Branch> {
        self.branches().fast_forward(branch, new_head)
    }

    pub fn get_head(&self, branch: &BranchId) -> Result<Hash> {
        self.branches().get_head(branch)
    }

    pub fn get_branch(&self, branch: &BranchId) -> Result<Branch> {
        self.branches().get_branch(branch)
    }

    pub fn branch_by_name(&self, name: &str) -> Result<Branch> {
        self.branches().branch_by_name(name)
    }

    /// Look a branch up by name, falling back to its id
    pub fn find_branch(&self, name_or_id: &str) -> Result<Branch> {
        self.branch_by_name(name_or_id)
            .or_else(|_| self.get_branch(&BranchId::new(name_or_id)))
    }

    pub fn main_branch(&self) -> Result<Branch> {
        self.branch_by_name(MAIN_BRANCH)
    }

    pub fn list_branches(&self) -> Vec<Branch> {
        self.branches().list_branches()
    }

    // === Version Graph Operations ===

    pub fn add_node(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        theme: &str,
    ) -> Result<VersionNode> {
        self.add_node_with_metadata(entity_id, entity_type, theme, Metadata::new())
    }

    pub fn add_node_with_metadata(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        theme: &str,
        metadata: Metadata,
    ) -> Result<VersionNode> {
        self.graph().add_node(entity_id, entity_type, theme, metadata)
    }

    pub fn get_node(&self, id: &NodeId) -> Result<VersionNode> {
        self.graph().node(id)
    }

    /// All nodes of an entity, oldest first
    pub fn nodes_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Vec<VersionNode> {
        self.store.snapshot().nodes_for_entity(entity_type, entity_id)
    }

    pub fn add_edge(
        &self,
        source: &NodeId,
        target: &NodeId,
        kind: EdgeKind,
        at_commit: Hash,
    ) -> Result<VersionEdge> {
        self.graph().add_edge(source, target, kind, at_commit)
    }

    /// End an ownership, equipment or knowledge relationship as of `at_commit`
    pub fn retract_edge(
        &self,
        source: &NodeId,
        target: &NodeId,
        kind: EdgeKind,
        at_commit: Hash,
    ) -> Result<VersionEdge> {
        self.graph().retract_edge(source, target, kind, at_commit)
    }

    /// The node and its `Parent` ancestors, newest first
    pub fn lineage(&self, node: &NodeId) -> Result<Vec<VersionNode>> {
        self.graph().lineage(node)
    }

    /// Project a character's state as of a commit
    pub fn resolve_current_state(
        &self,
        character: &NodeId,
        at_commit: Hash,
    ) -> Result<CharacterState> {
        resolve_current_state(&self.store.snapshot(), character, at_commit)
    }

    // === Merge Operations ===

    pub fn find_common_ancestor(&self, a: Hash, b: Hash) -> Result<Hash> {
        ops::find_common_ancestor(&self.store.snapshot(), a, b)
    }

    /// Net field changes from `base` to `head`
    pub fn diff(&self, base: Hash, head: Hash) -> Result<Diff> {
        ops::diff(&self.store.snapshot(), base, head)
    }

    /// Preview merging `source` into `target` without writing
    pub fn plan_merge(&self, target: &BranchId, source: &BranchId) -> Result<MergePlan> {
        let snap = self.store.snapshot();
        let ours = snap.branch(target)?.head_commit_id;
        let theirs = snap.branch(source)?.head_commit_id;
        ops::plan_merge(&snap, ours, theirs)
    }

    /// Merge `source` into `target`.
    ///
    /// Conflicting fields need an entry in `resolutions`; otherwise the merge
    /// fails with [`Error::MergeConflict`] listing every conflict.
    pub fn merge_branches(
        &self,
        target: &BranchId,
        source: &BranchId,
        resolutions: HashMap<FieldKey, FieldValue>,
        author: &str,
        message: &str,
    ) -> Result<MergeOutcome> {
        ops::merge_branches(
            &self.store,
            self.validator.as_ref(),
            MergeRequest {
                target: target.clone(),
                source: source.clone(),
                resolutions,
                author: author.to_string(),
                message: message.to_string(),
            },
        )
    }

    // === Theme Transitions ===

    fn transitions(&self) -> ThemeTransition<'_> {
        ThemeTransition::new(&self.store, self.validator.as_ref(), self.flavor.as_ref())
    }

    /// Validate a theme transition without writing
    pub fn plan_transition(&self, request: &ThemeTransitionRequest) -> Result<TransitionPlan> {
        self.transitions().dry_run(request)
    }

    /// Move a character and the listed items into a new theme atomically
    pub fn transition_theme(&self, request: &ThemeTransitionRequest) -> Result<TransitionReport> {
        self.transitions().transition(request)
    }

    // === Maintenance ===

    /// Number of stored records
    pub fn object_count(&self) -> usize {
        self.store.object_count()
    }

    /// Flush the index and branch table to disk
    pub fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }
}
