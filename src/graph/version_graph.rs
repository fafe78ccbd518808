//! Version nodes and the edges between them

use crate::model::{EdgeKind, EntityType, Hash, Metadata, NodeId, VersionEdge, VersionNode};
use crate::store::{ObjectStore, RecordSource, Transaction};
use crate::{Error, Result};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, warn};

/// Record a new node inside an open transaction
pub(crate) fn add_node_in(
    txn: &mut Transaction<'_>,
    entity_id: &str,
    entity_type: EntityType,
    theme: &str,
    metadata: Metadata,
) -> Result<VersionNode> {
    if entity_id.trim().is_empty() {
        return Err(Error::Validation("node entity id must not be empty".into()));
    }
    if theme.trim().is_empty() {
        return Err(Error::Validation(format!(
            "node for {} needs a theme",
            entity_id
        )));
    }

    let seq = txn.next_seq();
    let node = VersionNode::new(entity_id, entity_type, theme, seq).with_metadata(metadata);
    txn.put_node(node.clone());
    debug!(node = %node.id, entity = entity_id, theme, "added node");
    Ok(node)
}

/// Whether `ancestor` is reachable from `node` over incoming `Parent` edges
pub fn is_lineage_ancestor<S: RecordSource + ?Sized>(
    source: &S,
    ancestor: &NodeId,
    node: &NodeId,
) -> bool {
    let mut queue = VecDeque::from([node.clone()]);
    let mut visited = HashSet::from([node.clone()]);

    while let Some(current) = queue.pop_front() {
        if &current == ancestor {
            return true;
        }
        for edge in source.edges_in(&current) {
            if edge.kind == EdgeKind::Parent && visited.insert(edge.source.clone()) {
                queue.push_back(edge.source);
            }
        }
    }
    false
}

fn check_lineage_edge<S: RecordSource + ?Sized>(
    source: &S,
    from: &VersionNode,
    to: &VersionNode,
    kind: EdgeKind,
) -> Result<()> {
    if from.id == to.id {
        return Err(Error::Cycle(format!("node {} cannot descend from itself", to.id)));
    }
    if from.entity_type != to.entity_type {
        return Err(Error::Lineage(format!(
            "{} node {} cannot descend from {} node {}",
            to.entity_type, to.id, from.entity_type, from.id
        )));
    }

    let incoming = source.edges_in(&to.id);
    let has_root = incoming.iter().any(|e| e.kind == EdgeKind::Root);
    let has_parent = incoming.iter().any(|e| e.kind == EdgeKind::Parent);

    match kind {
        EdgeKind::Parent => {
            if is_lineage_ancestor(source, &to.id, &from.id) {
                return Err(Error::Cycle(format!(
                    "node {} is already an ancestor of {}",
                    to.id, from.id
                )));
            }
            if has_root {
                return Err(Error::Lineage(format!(
                    "node {} starts a fresh lineage",
                    to.id
                )));
            }
            if has_parent {
                return Err(Error::Lineage(format!(
                    "node {} already has a parent",
                    to.id
                )));
            }
        }
        EdgeKind::Root => {
            if has_root {
                return Err(Error::DuplicateRoot(to.id.to_string()));
            }
            if has_parent {
                return Err(Error::Lineage(format!(
                    "node {} already has a parent and cannot be re-rooted",
                    to.id
                )));
            }
        }
        _ => {}
    }
    Ok(())
}

fn check_holding_edge(from: &VersionNode, to: &VersionNode, kind: EdgeKind) -> Result<()> {
    if from.entity_type != EntityType::Character {
        return Err(Error::Validation(format!(
            "{} edges start at a character, not {} {}",
            kind, from.entity_type, from.entity_id
        )));
    }
    let expected = match kind {
        EdgeKind::Knows => EntityType::Spell,
        _ => EntityType::Equipment,
    };
    if to.entity_type != expected {
        return Err(Error::Validation(format!(
            "{} edges point at {}, not {} {}",
            kind, expected, to.entity_type, to.entity_id
        )));
    }
    Ok(())
}

fn new_edge_in(
    txn: &mut Transaction<'_>,
    source: &NodeId,
    target: &NodeId,
    kind: EdgeKind,
    at_commit: Hash,
    retracted: bool,
) -> Result<VersionEdge> {
    let from = txn.node(source)?;
    let to = txn.node(target)?;
    if !txn.has_commit(&at_commit) {
        return Err(Error::NotFound(format!("commit {}", at_commit.short())));
    }

    let checked = if kind.is_lineage() {
        check_lineage_edge(&*txn, &from, &to, kind)
    } else {
        check_holding_edge(&from, &to, kind)
    };
    if let Err(e) = checked {
        warn!(%kind, %source, %target, error = %e, "edge rejected");
        return Err(e);
    }

    let seq = txn.next_seq();
    let edge = if retracted {
        VersionEdge::retraction(source.clone(), target.clone(), kind, at_commit, seq)
    } else {
        VersionEdge::new(source.clone(), target.clone(), kind, at_commit, seq)
    };
    txn.put_edge(edge.clone());
    debug!(edge = %edge.id, %kind, retracted, "added edge");
    Ok(edge)
}

/// Record an edge inside an open transaction
pub(crate) fn add_edge_in(
    txn: &mut Transaction<'_>,
    source: &NodeId,
    target: &NodeId,
    kind: EdgeKind,
    at_commit: Hash,
) -> Result<VersionEdge> {
    new_edge_in(txn, source, target, kind, at_commit, false)
}

/// Record a tombstone ending an ownership relationship as of `at_commit`
pub(crate) fn retract_edge_in(
    txn: &mut Transaction<'_>,
    source: &NodeId,
    target: &NodeId,
    kind: EdgeKind,
    at_commit: Hash,
) -> Result<VersionEdge> {
    if !kind.is_holding() {
        return Err(Error::Validation(format!(
            "{} edges are permanent and cannot be retracted",
            kind
        )));
    }
    new_edge_in(txn, source, target, kind, at_commit, true)
}

/// Nodes on the `Parent` chain ending at `node`, newest first.
///
/// The walk stops at the first node without a parent, including a node
/// whose lineage was reset by a `Root` edge.
pub fn lineage<S: RecordSource + ?Sized>(source: &S, node: &NodeId) -> Result<Vec<VersionNode>> {
    let mut chain = vec![source.node(node)?];
    let mut visited = HashSet::from([node.clone()]);

    loop {
        let Some(current) = chain.last() else { break };
        let parent = source
            .edges_in(&current.id)
            .into_iter()
            .find(|e| e.kind == EdgeKind::Parent);

        match parent {
            Some(edge) if visited.insert(edge.source.clone()) => {
                chain.push(source.node(&edge.source)?);
            }
            Some(edge) => {
                return Err(Error::Corruption(format!(
                    "parent cycle through node {}",
                    edge.source
                )));
            }
            None => break,
        }
    }
    Ok(chain)
}

/// The node a `Root` edge says `node` replaced, if any
pub fn replaced_by_root<S: RecordSource + ?Sized>(source: &S, node: &NodeId) -> Option<NodeId> {
    source
        .edges_in(node)
        .into_iter()
        .find(|e| e.kind == EdgeKind::Root)
        .map(|e| e.source)
}

/// Reads and writes against the version graph
pub struct VersionGraph<'a> {
    store: &'a ObjectStore,
}

impl<'a> VersionGraph<'a> {
    pub fn new(store: &'a ObjectStore) -> Self {
        VersionGraph { store }
    }

    pub fn add_node(
        &self,
        entity_id: &str,
        entity_type: EntityType,
        theme: &str,
        metadata: Metadata,
    ) -> Result<VersionNode> {
        self.store
            .transaction(|txn| add_node_in(txn, entity_id, entity_type, theme, metadata))
    }

    pub fn add_edge(
        &self,
        source: &NodeId,
        target: &NodeId,
        kind: EdgeKind,
        at_commit: Hash,
    ) -> Result<VersionEdge> {
        self.store
            .transaction(|txn| add_edge_in(txn, source, target, kind, at_commit))
    }

    pub fn retract_edge(
        &self,
        source: &NodeId,
        target: &NodeId,
        kind: EdgeKind,
        at_commit: Hash,
    ) -> Result<VersionEdge> {
        self.store
            .transaction(|txn| retract_edge_in(txn, source, target, kind, at_commit))
    }

    pub fn node(&self, id: &NodeId) -> Result<VersionNode> {
        self.store.snapshot().node(id)
    }

    pub fn lineage(&self, node: &NodeId) -> Result<Vec<VersionNode>> {
        lineage(&self.store.snapshot(), node)
    }
}
