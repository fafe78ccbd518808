//! Write transactions with staged records

use super::file_store::{ObjectStore, Snapshot};
use super::RecordSource;
use crate::model::{Branch, BranchId, Commit, EntityType, Hash, NodeId, VersionEdge, VersionNode};
use crate::{Error, Result};
use parking_lot::MutexGuard;
use std::collections::HashMap;

/// Records written by a transaction but not yet published
#[derive(Default)]
pub(crate) struct Staged {
    pub(crate) commits: Vec<Commit>,
    pub(crate) nodes: Vec<VersionNode>,
    pub(crate) edges: Vec<VersionEdge>,
    pub(crate) branches: HashMap<BranchId, Branch>,
    pub(crate) next_seq: u64,
}

/// An exclusive write transaction.
///
/// Reads see committed state plus this transaction's own writes. Dropping
/// the transaction without calling [`commit`](Transaction::commit)
/// discards every staged record.
pub struct Transaction<'a> {
    store: &'a ObjectStore,
    writer: MutexGuard<'a, ()>,
    snapshot: Snapshot<'a>,
    staged: Staged,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(
        store: &'a ObjectStore,
        writer: MutexGuard<'a, ()>,
        snapshot: Snapshot<'a>,
    ) -> Self {
        let next_seq = snapshot.next_seq();
        Transaction {
            store,
            writer,
            snapshot,
            staged: Staged {
                next_seq,
                ..Staged::default()
            },
        }
    }

    /// Allocate the next store sequence number
    pub fn next_seq(&mut self) -> u64 {
        let seq = self.staged.next_seq;
        self.staged.next_seq += 1;
        seq
    }

    /// Stage a commit; already-stored commits are ignored
    pub fn put_commit(&mut self, commit: Commit) {
        if !self.has_commit(&commit.id) {
            self.staged.commits.push(commit);
        }
    }

    pub fn put_node(&mut self, node: VersionNode) {
        self.staged.nodes.push(node);
    }

    pub fn put_edge(&mut self, edge: VersionEdge) {
        self.staged.edges.push(edge);
    }

    /// Stage a new or updated branch record
    pub fn put_branch(&mut self, branch: Branch) {
        self.staged.branches.insert(branch.id.clone(), branch);
    }

    /// Whether anything has been staged
    pub fn is_empty(&self) -> bool {
        self.staged.commits.is_empty()
            && self.staged.nodes.is_empty()
            && self.staged.edges.is_empty()
            && self.staged.branches.is_empty()
    }

    /// Publish all staged records atomically
    pub fn commit(self) -> Result<()> {
        let Transaction {
            store,
            writer,
            snapshot,
            staged,
        } = self;

        drop(snapshot);
        let result = store.publish(staged);
        drop(writer);
        result
    }
}

impl RecordSource for Transaction<'_> {
    fn get_commit(&self, id: &Hash) -> Result<Commit> {
        match self.staged.commits.iter().find(|c| &c.id == id) {
            Some(commit) => Ok(commit.clone()),
            None => self.snapshot.get_commit(id),
        }
    }

    fn has_commit(&self, id: &Hash) -> bool {
        self.staged.commits.iter().any(|c| &c.id == id) || self.snapshot.has_commit(id)
    }

    fn branch(&self, id: &BranchId) -> Result<Branch> {
        match self.staged.branches.get(id) {
            Some(branch) => Ok(branch.clone()),
            None => self.snapshot.branch(id),
        }
    }

    fn branch_by_name(&self, name: &str) -> Option<Branch> {
        self.staged
            .branches
            .values()
            .find(|b| b.name == name)
            .cloned()
            .or_else(|| self.snapshot.branch_by_name(name))
    }

    fn branches(&self) -> Vec<Branch> {
        let mut branches: Vec<Branch> = self
            .snapshot
            .branches()
            .into_iter()
            .filter(|b| !self.staged.branches.contains_key(&b.id))
            .collect();
        branches.extend(self.staged.branches.values().cloned());
        branches
    }

    fn node(&self, id: &NodeId) -> Result<VersionNode> {
        match self.staged.nodes.iter().find(|n| &n.id == id) {
            Some(node) => Ok(node.clone()),
            None => self
                .snapshot
                .node(id)
                .map_err(|_| Error::NotFound(format!("node {}", id))),
        }
    }

    fn nodes_for_entity(&self, entity_type: EntityType, entity_id: &str) -> Vec<VersionNode> {
        let mut nodes = self.snapshot.nodes_for_entity(entity_type, entity_id);
        nodes.extend(
            self.staged
                .nodes
                .iter()
                .filter(|n| n.entity_type == entity_type && n.entity_id == entity_id)
                .cloned(),
        );
        nodes
    }

    fn edges_out(&self, id: &NodeId) -> Vec<VersionEdge> {
        let mut edges = self.snapshot.edges_out(id);
        edges.extend(self.staged.edges.iter().filter(|e| &e.source == id).cloned());
        edges
    }

    fn edges_in(&self, id: &NodeId) -> Vec<VersionEdge> {
        let mut edges = self.snapshot.edges_in(id);
        edges.extend(self.staged.edges.iter().filter(|e| &e.target == id).cloned());
        edges
    }
}
