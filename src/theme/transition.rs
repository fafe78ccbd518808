//! Theme transitions: moving a character and its gear into a new theme
//!
//! A transition is planned against the branch head without writing
//! anything, then executed in a single store transaction. Any failure in
//! either step leaves the store untouched.

use super::flavor::FlavorGenerator;
use crate::graph::{add_edge_in, add_node_in, resolve_current_state, CharacterState, HeldItem};
use crate::model::{
    Branch, BranchId, Change, Commit, EdgeKind, EntityType, FieldValue, Hash, Metadata, NodeId,
    VersionNode,
};
use crate::ops::{append_in, commit_conflict, NewCommit};
use crate::store::{ObjectStore, RecordSource, Transaction};
use crate::validation::ChangeValidator;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info, warn};

/// What happens to one held item when the character changes theme
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentStrategy {
    /// Fresh node with mechanical fields only, severed from the old lineage
    ThemeReset,
    /// New node descending from the old one, flavor regenerated
    AdaptNew,
    /// Same node, re-recorded as held at the transition commit
    KeepCurrent,
}

impl EquipmentStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentStrategy::ThemeReset => "theme_reset",
            EquipmentStrategy::AdaptNew => "adapt_new",
            EquipmentStrategy::KeepCurrent => "keep_current",
        }
    }
}

impl fmt::Display for EquipmentStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EquipmentStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "theme_reset" | "reset" => Ok(EquipmentStrategy::ThemeReset),
            "adapt_new" | "adapt" => Ok(EquipmentStrategy::AdaptNew),
            "keep_current" | "keep" => Ok(EquipmentStrategy::KeepCurrent),
            other => Err(Error::Validation(format!(
                "unknown equipment strategy '{}'",
                other
            ))),
        }
    }
}

/// Progress of a transition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum TransitionState {
    Validating,
    Resetting,
    Adapting,
    Committed,
    Failed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EquipmentTransition {
    /// Node the character currently holds
    pub node: NodeId,
    pub strategy: EquipmentStrategy,
}

#[derive(Clone, Debug)]
pub struct ThemeTransitionRequest {
    pub character_node: NodeId,
    pub new_theme: String,
    pub chapter_id: String,
    pub equipment: Vec<EquipmentTransition>,
    pub branch: BranchId,
    /// Fail with a conflict unless the branch head is still this commit
    pub expected_head: Option<Hash>,
    pub author: String,
}

impl ThemeTransitionRequest {
    pub fn new(
        character_node: impl Into<NodeId>,
        new_theme: impl Into<String>,
        chapter_id: impl Into<String>,
        branch: BranchId,
        author: impl Into<String>,
    ) -> Self {
        ThemeTransitionRequest {
            character_node: character_node.into(),
            new_theme: new_theme.into(),
            chapter_id: chapter_id.into(),
            equipment: Vec::new(),
            branch,
            expected_head: None,
            author: author.into(),
        }
    }

    pub fn with_item(mut self, node: impl Into<NodeId>, strategy: EquipmentStrategy) -> Self {
        self.equipment.push(EquipmentTransition {
            node: node.into(),
            strategy,
        });
        self
    }

    pub fn expecting(mut self, head: Hash) -> Self {
        self.expected_head = Some(head);
        self
    }
}

/// One item of a validated transition
#[derive(Clone, Debug)]
pub struct PlannedItem {
    pub strategy: EquipmentStrategy,
    pub held: HeldItem,
    /// `Owns` for equipment, `Knows` for spells
    pub holding: EdgeKind,
    pub equipped: bool,
}

/// A transition that passed validation against `head`
#[derive(Clone, Debug)]
pub struct TransitionPlan {
    pub branch: Branch,
    pub head: Hash,
    pub character: CharacterState,
    pub items: Vec<PlannedItem>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ItemOutcome {
    pub entity_id: String,
    pub entity_type: EntityType,
    pub strategy: EquipmentStrategy,
    pub old_node: NodeId,
    pub new_node: NodeId,
}

#[derive(Clone, Debug, Serialize)]
pub struct TransitionReport {
    /// Final state, always `Committed` for a returned report
    pub state: TransitionState,
    /// States passed through, in order
    pub states: Vec<TransitionState>,
    pub commit: Commit,
    pub old_character_node: NodeId,
    pub character_node: NodeId,
    pub items: Vec<ItemOutcome>,
}

fn invalid(msg: String) -> Error {
    Error::Validation(msg)
}

/// Validate a transition against the current branch head without writing.
pub fn plan_transition<S: RecordSource + ?Sized>(
    source: &S,
    request: &ThemeTransitionRequest,
) -> Result<TransitionPlan> {
    let branch = source.branch(&request.branch)?;
    if branch.is_archived() {
        return Err(Error::BranchArchived(branch.name));
    }
    let head = branch.head_commit_id;
    if let Some(expected) = request.expected_head {
        if expected != head {
            return Err(commit_conflict(&branch, expected));
        }
    }

    if request.new_theme.trim().is_empty() {
        return Err(invalid("new theme must not be empty".into()));
    }
    if request.chapter_id.trim().is_empty() {
        return Err(invalid("a transition belongs to a chapter".into()));
    }

    let character = resolve_current_state(source, &request.character_node, head)?;
    if character.node.id != request.character_node {
        return Err(invalid(format!(
            "character node {} is superseded by {}",
            request.character_node, character.node.id
        )));
    }
    if character.theme() == request.new_theme {
        return Err(invalid(format!(
            "character {} is already in theme {}",
            character.node.entity_id, request.new_theme
        )));
    }

    let mut seen_nodes = HashSet::new();
    let mut seen_entities = HashSet::new();
    let mut items = Vec::with_capacity(request.equipment.len());

    for item in &request.equipment {
        if !seen_nodes.insert(item.node.clone()) {
            return Err(invalid(format!("node {} is listed twice", item.node)));
        }
        let node = source.node(&item.node)?;
        if !seen_entities.insert((node.entity_type, node.entity_id.clone())) {
            return Err(invalid(format!(
                "{} {} is listed twice",
                node.entity_type, node.entity_id
            )));
        }

        let (holding, held) = match node.entity_type {
            EntityType::Equipment => (EdgeKind::Owns, character.owns(&node.entity_id)),
            EntityType::Spell => (
                EdgeKind::Knows,
                character
                    .known_spells
                    .iter()
                    .find(|h| h.node.entity_id == node.entity_id),
            ),
            other => {
                return Err(invalid(format!(
                    "{} {} cannot change theme with a character",
                    other, node.entity_id
                )))
            }
        };
        let Some(held) = held else {
            return Err(invalid(format!(
                "{} is not held by character {}",
                node.entity_id, character.node.entity_id
            )));
        };
        if held.node.id != node.id {
            return Err(invalid(format!(
                "node {} of {} is superseded by {}",
                node.id, node.entity_id, held.node.id
            )));
        }
        if item.strategy != EquipmentStrategy::KeepCurrent && node.theme == request.new_theme {
            return Err(invalid(format!(
                "{} is already in theme {}",
                node.entity_id, request.new_theme
            )));
        }

        items.push(PlannedItem {
            strategy: item.strategy,
            equipped: character.is_equipped(&node.entity_id),
            held: held.clone(),
            holding,
        });
    }

    Ok(TransitionPlan {
        branch,
        head,
        character,
        items,
    })
}

/// Runs theme transitions against a store
pub struct ThemeTransition<'a> {
    store: &'a ObjectStore,
    validator: &'a dyn ChangeValidator,
    flavor: &'a dyn FlavorGenerator,
}

impl<'a> ThemeTransition<'a> {
    pub fn new(
        store: &'a ObjectStore,
        validator: &'a dyn ChangeValidator,
        flavor: &'a dyn FlavorGenerator,
    ) -> Self {
        ThemeTransition {
            store,
            validator,
            flavor,
        }
    }

    /// Validate a transition without writing anything
    pub fn dry_run(&self, request: &ThemeTransitionRequest) -> Result<TransitionPlan> {
        plan_transition(&self.store.snapshot(), request)
    }

    /// Plan and apply a transition atomically
    pub fn transition(&self, request: &ThemeTransitionRequest) -> Result<TransitionReport> {
        let mut states = vec![TransitionState::Validating];

        let result = self.store.transaction(|txn| {
            let plan = plan_transition(&*txn, request)?;
            debug!(
                character = %plan.character.node.entity_id,
                items = plan.items.len(),
                "transition validated"
            );
            self.execute(txn, request, &plan, &mut states)
        });

        match result {
            Ok(mut report) => {
                states.push(TransitionState::Committed);
                report.state = TransitionState::Committed;
                report.states = states;
                info!(
                    character = %report.character_node,
                    theme = %request.new_theme,
                    chapter = %request.chapter_id,
                    commit = %report.commit.id.short(),
                    "theme transition committed"
                );
                Ok(report)
            }
            Err(e) => {
                let during = states.last().copied().unwrap_or(TransitionState::Validating);
                warn!(state = ?TransitionState::Failed, ?during, error = %e, "theme transition failed");
                Err(e)
            }
        }
    }

    fn execute(
        &self,
        txn: &mut Transaction<'_>,
        request: &ThemeTransitionRequest,
        plan: &TransitionPlan,
        states: &mut Vec<TransitionState>,
    ) -> Result<TransitionReport> {
        let theme = request.new_theme.as_str();
        let old_character = &plan.character.node;

        states.push(TransitionState::Resetting);
        let new_character = add_node_in(
            txn,
            &old_character.entity_id,
            EntityType::Character,
            theme,
            self.adapt_metadata(old_character, theme),
        )?;

        let mut new_nodes: Vec<Option<VersionNode>> = Vec::with_capacity(plan.items.len());
        for item in &plan.items {
            let old = &item.held.node;
            let node = match item.strategy {
                EquipmentStrategy::ThemeReset => Some(add_node_in(
                    txn,
                    &old.entity_id,
                    old.entity_type,
                    theme,
                    self.mechanical_metadata(old),
                )?),
                _ => None,
            };
            new_nodes.push(node);
        }

        states.push(TransitionState::Adapting);
        for (item, slot) in plan.items.iter().zip(new_nodes.iter_mut()) {
            if item.strategy == EquipmentStrategy::AdaptNew {
                let old = &item.held.node;
                *slot = Some(add_node_in(
                    txn,
                    &old.entity_id,
                    old.entity_type,
                    theme,
                    self.adapt_metadata(old, theme),
                )?);
            }
        }

        let changes = transition_changes(plan, theme, &new_character, &new_nodes);
        let counts = |s: EquipmentStrategy| plan.items.iter().filter(|i| i.strategy == s).count();
        let summary = serde_json::json!({
            "from": old_character.theme,
            "to": theme,
            "reset": counts(EquipmentStrategy::ThemeReset),
            "adapted": counts(EquipmentStrategy::AdaptNew),
            "kept": counts(EquipmentStrategy::KeepCurrent),
        });
        let commit = append_in(
            txn,
            self.validator,
            NewCommit::new(
                plan.head,
                plan.branch.id.clone(),
                changes,
                request.author.as_str(),
                format!(
                    "{} moves from {} to {}",
                    old_character.entity_id, old_character.theme, theme
                ),
            )
            .with_metadata("chapter_id", request.chapter_id.as_str())
            .with_metadata("summary", summary),
        )?;

        add_edge_in(txn, &old_character.id, &new_character.id, EdgeKind::Parent, commit.id)?;

        let mut outcomes = Vec::with_capacity(plan.items.len());
        for (item, new_node) in plan.items.iter().zip(&new_nodes) {
            let old = &item.held.node;
            let held_id = new_node.as_ref().map_or(&old.id, |n| &n.id);

            match item.strategy {
                EquipmentStrategy::ThemeReset => {
                    add_edge_in(txn, &old.id, held_id, EdgeKind::Root, commit.id)?;
                }
                EquipmentStrategy::AdaptNew => {
                    add_edge_in(txn, &old.id, held_id, EdgeKind::Parent, commit.id)?;
                }
                EquipmentStrategy::KeepCurrent => {}
            }
            add_edge_in(txn, &new_character.id, held_id, item.holding, commit.id)?;
            if item.equipped {
                add_edge_in(txn, &new_character.id, held_id, EdgeKind::Equipped, commit.id)?;
            }

            debug!(item = %old.entity_id, strategy = %item.strategy, node = %held_id, "item relineaged");
            outcomes.push(ItemOutcome {
                entity_id: old.entity_id.clone(),
                entity_type: old.entity_type,
                strategy: item.strategy,
                old_node: old.id.clone(),
                new_node: held_id.clone(),
            });
        }

        Ok(TransitionReport {
            state: TransitionState::Adapting,
            states: Vec::new(),
            commit,
            old_character_node: old_character.id.clone(),
            character_node: new_character.id,
            items: outcomes,
        })
    }

    fn mechanical_metadata(&self, node: &VersionNode) -> Metadata {
        node.metadata
            .iter()
            .filter(|(field, _)| !self.flavor.is_flavor(field))
            .map(|(field, value)| (field.clone(), value.clone()))
            .collect()
    }

    fn adapt_metadata(&self, node: &VersionNode, theme: &str) -> Metadata {
        node.metadata
            .iter()
            .map(|(field, value)| {
                let value = if self.flavor.is_flavor(field) {
                    self.flavor.regenerate(node, field, value, theme)
                } else {
                    value.clone()
                };
                (field.clone(), value)
            })
            .collect()
    }
}

/// `theme` and `version_node` changes recorded by the transition commit
fn transition_changes(
    plan: &TransitionPlan,
    theme: &str,
    new_character: &VersionNode,
    new_nodes: &[Option<VersionNode>],
) -> Vec<Change> {
    let old_character = &plan.character.node;
    let old_theme = plan
        .character
        .fields
        .get("theme")
        .cloned()
        .unwrap_or_else(|| FieldValue::from(old_character.theme.as_str()));

    let mut changes = vec![
        Change::new(
            EntityType::Character,
            old_character.entity_id.as_str(),
            "theme",
            old_theme,
            theme,
        ),
        Change::new(
            EntityType::Character,
            old_character.entity_id.as_str(),
            "version_node",
            old_character.id.as_str(),
            new_character.id.as_str(),
        ),
    ];

    for (item, new_node) in plan.items.iter().zip(new_nodes) {
        if let Some(node) = new_node {
            let old = &item.held.node;
            changes.push(Change::new(
                old.entity_type,
                old.entity_id.as_str(),
                "version_node",
                old.id.as_str(),
                node.id.as_str(),
            ));
        }
    }
    changes
}
