//! Character state as of a commit
//!
//! Nothing here writes: the state is projected from commits, nodes and
//! edges every time it is asked for.

use crate::model::{
    EdgeKind, EntityType, FieldValue, Hash, NodeId, VersionEdge, VersionNode,
};
use crate::ops::{commit_distances, entity_fields_at, is_ancestor};
use crate::store::RecordSource;
use crate::{Error, Result};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};

/// An item or spell held by a character
#[derive(Clone, Debug, Serialize)]
pub struct HeldItem {
    pub node: VersionNode,
    /// Field values as of the resolved commit
    pub fields: BTreeMap<String, FieldValue>,
    /// Commit of the edge that put the item in place
    pub since: Hash,
}

/// Everything known about a character at one commit
#[derive(Clone, Debug, Serialize)]
pub struct CharacterState {
    pub at_commit: Hash,
    /// Latest node of the character's lineage valid at `at_commit`
    pub node: VersionNode,
    pub fields: BTreeMap<String, FieldValue>,
    pub owned: Vec<HeldItem>,
    pub equipped: Vec<HeldItem>,
    pub known_spells: Vec<HeldItem>,
}

impl CharacterState {
    pub fn theme(&self) -> &str {
        &self.node.theme
    }

    pub fn owns(&self, entity_id: &str) -> Option<&HeldItem> {
        self.owned.iter().find(|h| h.node.entity_id == entity_id)
    }

    pub fn is_equipped(&self, entity_id: &str) -> bool {
        self.equipped.iter().any(|h| h.node.entity_id == entity_id)
    }

    pub fn knows(&self, entity_id: &str) -> bool {
        self.known_spells.iter().any(|h| h.node.entity_id == entity_id)
    }
}

/// Edges in effect at a commit, ranked by how recent they are there
struct EdgeRanker {
    distances: HashMap<Hash, usize>,
}

impl EdgeRanker {
    fn is_valid(&self, edge: &VersionEdge) -> bool {
        self.distances.contains_key(&edge.commit_id)
    }

    /// Nearer commit first, then later insertion
    fn rank(&self, edge: &VersionEdge) -> (usize, std::cmp::Reverse<u64>) {
        let distance = self
            .distances
            .get(&edge.commit_id)
            .copied()
            .unwrap_or(usize::MAX);
        (distance, std::cmp::Reverse(edge.seq))
    }

    /// The winning valid edge among `edges`.
    ///
    /// An edge whose commit is an ancestor of another candidate's commit is
    /// superseded no matter how short its path to the resolved commit is;
    /// distance only orders edges from unrelated lines of history.
    fn best<'e, S: RecordSource + ?Sized>(
        &self,
        source: &S,
        edges: impl IntoIterator<Item = &'e VersionEdge>,
    ) -> Result<Option<&'e VersionEdge>> {
        let valid: Vec<&VersionEdge> = edges.into_iter().filter(|e| self.is_valid(e)).collect();
        let latest = latest_commits(source, valid.iter().map(|e| e.commit_id))?;
        Ok(valid
            .into_iter()
            .filter(|e| latest.contains(&e.commit_id))
            .min_by_key(|e| self.rank(e)))
    }
}

/// Commits not in the history of any other commit of the set
fn latest_commits<S: RecordSource + ?Sized>(
    source: &S,
    commits: impl IntoIterator<Item = Hash>,
) -> Result<HashSet<Hash>> {
    let distinct: Vec<Hash> = commits
        .into_iter()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    if distinct.len() < 2 {
        return Ok(distinct.into_iter().collect());
    }

    let mut latest = HashSet::with_capacity(distinct.len());
    'candidates: for &commit in &distinct {
        for &other in &distinct {
            if other != commit && is_ancestor(source, commit, other)? {
                continue 'candidates;
            }
        }
        latest.insert(commit);
    }
    Ok(latest)
}

/// Follow valid outgoing `Parent` edges to the newest node of the lineage
fn current_node<S: RecordSource + ?Sized>(
    source: &S,
    ranker: &EdgeRanker,
    start: VersionNode,
) -> Result<VersionNode> {
    let mut current = start;
    let mut visited = HashSet::from([current.id.clone()]);

    loop {
        let edges = source.edges_out(&current.id);
        let next = ranker.best(source, edges.iter().filter(|e| e.kind == EdgeKind::Parent))?;
        match next {
            Some(edge) if visited.insert(edge.target.clone()) => {
                current = source.node(&edge.target)?;
            }
            Some(edge) => {
                return Err(Error::Corruption(format!(
                    "parent cycle through node {}",
                    edge.target
                )));
            }
            None => return Ok(current),
        }
    }
}

/// Holding edges that win for each `(kind, held entity)` at the commit
fn holdings<S: RecordSource + ?Sized>(
    source: &S,
    ranker: &EdgeRanker,
    character: &VersionNode,
) -> Result<Vec<(EdgeKind, VersionEdge, VersionNode)>> {
    let mut candidates: HashMap<(EdgeKind, EntityType, String), Vec<(VersionEdge, VersionNode)>> =
        HashMap::new();

    for node in source.nodes_for_entity(EntityType::Character, &character.entity_id) {
        for edge in source.edges_out(&node.id) {
            if !edge.kind.is_holding() || !ranker.is_valid(&edge) {
                continue;
            }
            let target = source.node(&edge.target)?;
            candidates
                .entry((edge.kind, target.entity_type, target.entity_id.clone()))
                .or_default()
                .push((edge, target));
        }
    }

    let mut winners = Vec::new();
    for ((kind, _, _), entries) in candidates {
        let Some(winner) = ranker.best(source, entries.iter().map(|(edge, _)| edge))? else {
            continue;
        };
        let winner = winner.id.clone();
        if let Some((edge, target)) = entries.into_iter().find(|(edge, _)| edge.id == winner) {
            if !edge.retracted {
                winners.push((kind, edge, target));
            }
        }
    }
    winners.sort_by(|a, b| a.2.entity_id.cmp(&b.2.entity_id));
    Ok(winners)
}

/// Project a character's state as of `at_commit`.
///
/// An edge is in effect when its commit is in `at_commit`'s history. For
/// each held entity, edges superseded by a descendant commit drop out; of
/// the rest the edge whose commit is nearest to `at_commit` wins, ties going
/// to the later edge. A winning tombstone means the entity is no longer
/// held. Ownership recorded on any node of the character counts.
pub fn resolve_current_state<S: RecordSource + ?Sized>(
    source: &S,
    character: &NodeId,
    at_commit: Hash,
) -> Result<CharacterState> {
    let start = source.node(character)?;
    if start.entity_type != EntityType::Character {
        return Err(Error::Validation(format!(
            "node {} is a {}, not a character",
            character, start.entity_type
        )));
    }

    let ranker = EdgeRanker {
        distances: commit_distances(source, at_commit)?,
    };

    let node = current_node(source, &ranker, start)?;
    let fields = entity_fields_at(source, at_commit, EntityType::Character, &node.entity_id)?;

    let mut state = CharacterState {
        at_commit,
        node,
        fields,
        owned: Vec::new(),
        equipped: Vec::new(),
        known_spells: Vec::new(),
    };

    for (kind, edge, target) in holdings(source, &ranker, &state.node)? {
        let held = HeldItem {
            fields: entity_fields_at(source, at_commit, target.entity_type, &target.entity_id)?,
            node: target,
            since: edge.commit_id,
        };
        match kind {
            EdgeKind::Owns => state.owned.push(held),
            EdgeKind::Equipped => state.equipped.push(held),
            EdgeKind::Knows => state.known_spells.push(held),
            EdgeKind::Parent | EdgeKind::Root => {}
        }
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::VersionGraph;
    use crate::model::{BranchId, Change, Commit, Metadata};
    use crate::store::ObjectStore;
    use tempfile::tempdir;

    struct Fixture {
        _dir: tempfile::TempDir,
        store: ObjectStore,
        c1: Commit,
        c2: Commit,
        side: Commit,
    }

    /// genesis <- c1 <- c2, with `side` forked from c1
    fn setup() -> Fixture {
        let dir = tempdir().unwrap();
        let store = ObjectStore::create(dir.path().join("p.lineage")).unwrap();
        let main = BranchId::for_name("main");
        let genesis = Commit::genesis(main.clone());
        let c1 = Commit::child(
            genesis.id,
            main.clone(),
            vec![
                Change::set(EntityType::Character, "aria", "hp", 10i64),
                Change::set(EntityType::Equipment, "sword", "damage", "1d8"),
            ],
            "dm",
            "c1",
        );
        let c2 = Commit::child(
            c1.id,
            main.clone(),
            vec![Change::set(EntityType::Character, "aria", "hp", 14i64)],
            "dm",
            "c2",
        );
        let side = Commit::child(
            c1.id,
            main,
            vec![Change::set(EntityType::Character, "aria", "hp", 3i64)],
            "dm",
            "side",
        );
        store
            .transaction(|txn| {
                for c in [&genesis, &c1, &c2, &side] {
                    txn.put_commit(c.clone());
                }
                Ok(())
            })
            .unwrap();
        Fixture {
            _dir: dir,
            store,
            c1,
            c2,
            side,
        }
    }

    fn node(graph: &VersionGraph<'_>, id: &str, ty: EntityType, theme: &str) -> VersionNode {
        graph.add_node(id, ty, theme, Metadata::new()).unwrap()
    }

    #[test]
    fn test_state_follows_commit_history() {
        let fx = setup();
        let graph = VersionGraph::new(&fx.store);
        let hero = node(&graph, "aria", EntityType::Character, "fantasy");
        let sword = node(&graph, "sword", EntityType::Equipment, "fantasy");
        let bolt = node(&graph, "firebolt", EntityType::Spell, "fantasy");

        graph.add_edge(&hero.id, &sword.id, EdgeKind::Owns, fx.c1.id).unwrap();
        graph.add_edge(&hero.id, &sword.id, EdgeKind::Equipped, fx.c1.id).unwrap();
        graph.add_edge(&hero.id, &bolt.id, EdgeKind::Knows, fx.c2.id).unwrap();
        graph.retract_edge(&hero.id, &sword.id, EdgeKind::Equipped, fx.side.id).unwrap();

        let snap = fx.store.snapshot();

        let at_c1 = resolve_current_state(&snap, &hero.id, fx.c1.id).unwrap();
        assert_eq!(at_c1.fields["hp"], FieldValue::from(10i64));
        assert!(at_c1.owns("sword").is_some());
        assert!(at_c1.is_equipped("sword"));
        assert!(!at_c1.knows("firebolt"));
        assert_eq!(at_c1.owned[0].fields["damage"], FieldValue::from("1d8"));

        let at_c2 = resolve_current_state(&snap, &hero.id, fx.c2.id).unwrap();
        assert_eq!(at_c2.fields["hp"], FieldValue::from(14i64));
        assert!(at_c2.knows("firebolt"));
        assert!(at_c2.is_equipped("sword"));

        let on_side = resolve_current_state(&snap, &hero.id, fx.side.id).unwrap();
        assert_eq!(on_side.fields["hp"], FieldValue::from(3i64));
        assert!(on_side.owns("sword").is_some());
        assert!(!on_side.is_equipped("sword"));
    }

    #[test]
    fn test_nearer_edge_replaces_item_node() {
        let fx = setup();
        let graph = VersionGraph::new(&fx.store);
        let hero = node(&graph, "aria", EntityType::Character, "fantasy");
        let hero_noir = node(&graph, "aria", EntityType::Character, "noir");
        let old_sword = node(&graph, "sword", EntityType::Equipment, "fantasy");
        let new_sword = node(&graph, "sword", EntityType::Equipment, "noir");

        graph.add_edge(&hero.id, &old_sword.id, EdgeKind::Owns, fx.c1.id).unwrap();
        graph.add_edge(&hero.id, &hero_noir.id, EdgeKind::Parent, fx.c2.id).unwrap();
        graph.add_edge(&old_sword.id, &new_sword.id, EdgeKind::Parent, fx.c2.id).unwrap();
        graph.add_edge(&hero_noir.id, &new_sword.id, EdgeKind::Owns, fx.c2.id).unwrap();

        let snap = fx.store.snapshot();

        let before = resolve_current_state(&snap, &hero.id, fx.c1.id).unwrap();
        assert_eq!(before.node.id, hero.id);
        assert_eq!(before.owned.len(), 1);
        assert_eq!(before.owned[0].node.id, old_sword.id);

        let after = resolve_current_state(&snap, &hero.id, fx.c2.id).unwrap();
        assert_eq!(after.node.id, hero_noir.id);
        assert_eq!(after.theme(), "noir");
        assert_eq!(after.owned.len(), 1);
        assert_eq!(after.owned[0].node.id, new_sword.id);

        // The side branch never saw the transition
        let side = resolve_current_state(&snap, &hero_noir.id, fx.side.id).unwrap();
        assert_eq!(side.owned[0].node.id, old_sword.id);
    }

    #[test]
    fn test_resolve_rejects_non_character_nodes() {
        let fx = setup();
        let graph = VersionGraph::new(&fx.store);
        let sword = node(&graph, "sword", EntityType::Equipment, "fantasy");

        let err = resolve_current_state(&fx.store.snapshot(), &sword.id, fx.c1.id).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
