//! Three-way merges between branches

use super::branch::{fast_forward_in, set_state_in};
use super::commit::{check_changes, conflict};
use super::diff::{diff, Diff};
use super::history::is_ancestor;
use crate::model::{
    Branch, BranchId, BranchState, Change, Commit, FieldConflict, FieldKey, FieldValue, Hash,
};
use crate::store::{ObjectStore, RecordSource};
use crate::validation::ChangeValidator;
use crate::{Error, Result};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};

/// Nearest common ancestor of two commits.
///
/// Walks back from both commits one level at a time. The first level at
/// which some commit has been reached from both sides decides; ties go to
/// the lowest combined depth, then to the lowest id.
pub fn find_common_ancestor<S: RecordSource + ?Sized>(
    source: &S,
    a: Hash,
    b: Hash,
) -> Result<Hash> {
    if a == b {
        return Ok(a);
    }

    let mut seen_a = HashMap::from([(a, 0usize)]);
    let mut seen_b = HashMap::from([(b, 0usize)]);
    let mut frontier_a = vec![a];
    let mut frontier_b = vec![b];
    let mut depth = 0;

    loop {
        let best = seen_a
            .iter()
            .filter_map(|(id, da)| seen_b.get(id).map(|db| (da + db, *id)))
            .min();
        if let Some((_, id)) = best {
            return Ok(id);
        }

        if frontier_a.is_empty() && frontier_b.is_empty() {
            return Err(Error::NotFound(format!(
                "common ancestor of {} and {}",
                a.short(),
                b.short()
            )));
        }

        depth += 1;
        frontier_a = expand(source, &frontier_a, &mut seen_a, depth)?;
        frontier_b = expand(source, &frontier_b, &mut seen_b, depth)?;
    }
}

fn expand<S: RecordSource + ?Sized>(
    source: &S,
    frontier: &[Hash],
    seen: &mut HashMap<Hash, usize>,
    depth: usize,
) -> Result<Vec<Hash>> {
    let mut next = Vec::new();
    for id in frontier {
        for parent in source.get_commit(id)?.parents {
            if !seen.contains_key(&parent) {
                seen.insert(parent, depth);
                next.push(parent);
            }
        }
    }
    Ok(next)
}

/// The outcome of comparing two heads against their common ancestor.
///
/// A field counts as changed on a side when any commit on that side touched
/// it, even if it was later set back to its base value. Such a field still
/// conflicts with a different value from the other side.
#[derive(Clone, Debug)]
pub struct MergePlan {
    pub base: Hash,
    /// Head of the branch being merged into
    pub ours: Hash,
    /// Head of the branch being merged
    pub theirs: Hash,
    /// Fields that merge cleanly, with their merged values
    pub merged: Vec<Change>,
    pub conflicts: Vec<FieldConflict>,
}

impl MergePlan {
    pub fn is_clean(&self) -> bool {
        self.conflicts.is_empty()
    }

    /// Changes of the merge commit once every conflict is resolved.
    ///
    /// Resolutions for fields that are not in conflict are ignored.
    pub fn resolve(&self, resolutions: &HashMap<FieldKey, FieldValue>) -> Result<Vec<Change>> {
        let unresolved: Vec<FieldConflict> = self
            .conflicts
            .iter()
            .filter(|c| !resolutions.contains_key(&c.key))
            .cloned()
            .collect();
        if !unresolved.is_empty() {
            return Err(Error::MergeConflict(unresolved));
        }

        let conflicting: HashSet<&FieldKey> = self.conflicts.iter().map(|c| &c.key).collect();
        for key in resolutions.keys().filter(|k| !conflicting.contains(k)) {
            warn!(field = %key, "ignoring resolution for a field without conflict");
        }

        let mut changes = self.merged.clone();
        changes.extend(self.conflicts.iter().map(|c| {
            Change::new(
                c.key.entity_type,
                c.key.entity_id.clone(),
                c.key.field_name.clone(),
                c.ours.clone(),
                resolutions[&c.key].clone(),
            )
        }));
        Ok(changes)
    }
}

/// Compare `theirs` into `ours` without writing anything.
///
/// Every field changed on either side since the common ancestor appears in
/// the plan, so a merge commit built from it restates the full merged
/// state of the diverged fields.
pub fn plan_merge<S: RecordSource + ?Sized>(source: &S, ours: Hash, theirs: Hash) -> Result<MergePlan> {
    let base = find_common_ancestor(source, ours, theirs)?;
    let our_diff = diff(source, base, ours)?;
    let their_diff = diff(source, base, theirs)?;
    Ok(combine(base, ours, theirs, &our_diff, &their_diff))
}

fn combine(base: Hash, ours: Hash, theirs: Hash, our_diff: &Diff, their_diff: &Diff) -> MergePlan {
    let mut by_key: BTreeMap<FieldKey, (Option<&Change>, Option<&Change>)> = BTreeMap::new();
    for change in &our_diff.changes {
        by_key.entry(change.key()).or_default().0 = Some(change);
    }
    for change in &their_diff.changes {
        by_key.entry(change.key()).or_default().1 = Some(change);
    }

    let mut merged = Vec::new();
    let mut conflicts = Vec::new();

    for (key, sides) in by_key {
        match sides {
            (Some(o), Some(t)) if o.new_value != t.new_value => conflicts.push(FieldConflict {
                key,
                base_value: o.old_value.clone(),
                ours: o.new_value.clone(),
                theirs: t.new_value.clone(),
            }),
            (Some(o), _) => merged.push(Change::new(
                key.entity_type,
                key.entity_id,
                key.field_name,
                o.new_value.clone(),
                o.new_value.clone(),
            )),
            (None, Some(t)) => merged.push(Change::new(
                key.entity_type,
                key.entity_id,
                key.field_name,
                t.old_value.clone(),
                t.new_value.clone(),
            )),
            (None, None) => {}
        }
    }

    MergePlan {
        base,
        ours,
        theirs,
        merged,
        conflicts,
    }
}

/// What a merge did
#[derive(Clone, Debug)]
pub enum MergeOutcome {
    /// The source head was already in the target's history
    UpToDate { head: Hash },
    /// The target head moved forward to the source head
    FastForward { from: Hash, to: Hash },
    /// A two-parent merge commit was recorded on the target
    Merged(Commit),
}

impl MergeOutcome {
    /// Target head after the merge
    pub fn head(&self) -> Hash {
        match self {
            MergeOutcome::UpToDate { head } => *head,
            MergeOutcome::FastForward { to, .. } => *to,
            MergeOutcome::Merged(commit) => commit.id,
        }
    }
}

/// Parameters of a branch merge
#[derive(Clone, Debug)]
pub struct MergeRequest {
    pub target: BranchId,
    pub source: BranchId,
    pub resolutions: HashMap<FieldKey, FieldValue>,
    pub author: String,
    pub message: String,
}

fn check_mergeable(target: &Branch, source: &Branch) -> Result<()> {
    if target.id == source.id {
        return Err(Error::InvalidState(format!(
            "cannot merge branch {} into itself",
            target.name
        )));
    }
    for branch in [target, source] {
        if branch.is_archived() {
            return Err(Error::BranchArchived(branch.name.clone()));
        }
    }
    Ok(())
}

/// Merge `source` into `target`.
///
/// The plan is computed from a snapshot; the write transaction then checks
/// that neither head moved in between and fails with a retryable conflict
/// if one did.
pub fn merge_branches(
    store: &ObjectStore,
    validator: &dyn ChangeValidator,
    request: MergeRequest,
) -> Result<MergeOutcome> {
    let (target, source, plan) = {
        let snap = store.snapshot();
        let target = snap.branch(&request.target)?;
        let source = snap.branch(&request.source)?;
        check_mergeable(&target, &source)?;

        let ours = target.head_commit_id;
        let theirs = source.head_commit_id;
        let plan = if is_ancestor(&snap, theirs, ours)? || is_ancestor(&snap, ours, theirs)? {
            None
        } else {
            Some(plan_merge(&snap, ours, theirs)?)
        };
        (target, source, plan)
    };

    let changes = plan
        .as_ref()
        .map(|p| p.resolve(&request.resolutions))
        .transpose()
        .inspect_err(|_| {
            warn!(target = %target.name, source = %source.name, "merge has unresolved conflicts");
        })?;
    if let Some(changes) = &changes {
        check_changes(changes, validator)?;
    }

    let outcome = store.transaction(|txn| {
        let current_target = txn.branch(&target.id)?;
        let current_source = txn.branch(&source.id)?;
        if current_target.head_commit_id != target.head_commit_id {
            return Err(conflict(&current_target, target.head_commit_id));
        }
        if current_source.head_commit_id != source.head_commit_id {
            return Err(conflict(&current_source, source.head_commit_id));
        }
        check_mergeable(&current_target, &current_source)?;

        let ours = target.head_commit_id;
        let theirs = source.head_commit_id;

        let outcome = match changes {
            None if is_ancestor(&*txn, theirs, ours)? => {
                return Ok(MergeOutcome::UpToDate { head: ours });
            }
            None => {
                fast_forward_in(txn, &target.id, theirs)?;
                MergeOutcome::FastForward {
                    from: ours,
                    to: theirs,
                }
            }
            Some(changes) => {
                let commit = Commit::merge(
                    ours,
                    theirs,
                    target.id.clone(),
                    changes,
                    request.author,
                    request.message,
                )
                .with_metadata("merged_branch", source.name.as_str());
                let mut head = current_target;
                head.head_commit_id = commit.id;
                txn.put_commit(commit.clone());
                txn.put_branch(head);
                MergeOutcome::Merged(commit)
            }
        };

        set_state_in(txn, &source.id, BranchState::Merged)?;
        Ok(outcome)
    })?;

    info!(
        target = %target.name,
        source = %source.name,
        head = %outcome.head().short(),
        "merged branch"
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BranchKind, EntityType};
    use crate::validation::StructuralValidator;
    use tempfile::tempdir;

    fn set(field: &str, value: i64) -> Change {
        Change::set(EntityType::Character, "aria", field, value)
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: ObjectStore,
        main: Branch,
        alt: Branch,
        c1: Commit,
    }

    /// main and alt both start at c1 (hp=10, str=14)
    fn setup() -> Fixture {
        let dir = tempdir().unwrap();
        let store = ObjectStore::create(dir.path().join("m.lineage")).unwrap();
        let main_id = BranchId::for_name("main");
        let genesis = Commit::genesis(main_id.clone());
        let c1 = Commit::child(genesis.id, main_id, vec![set("hp", 10), set("str", 14)], "dm", "c1");

        let mut main = Branch::new("main", BranchKind::Main, None, genesis.id);
        main.head_commit_id = c1.id;
        let alt = Branch::new("alt", BranchKind::Alternate, Some(main.id.clone()), c1.id);

        store
            .transaction(|txn| {
                txn.put_commit(genesis);
                txn.put_commit(c1.clone());
                txn.put_branch(main.clone());
                txn.put_branch(alt.clone());
                Ok(())
            })
            .unwrap();

        Fixture {
            _dir: dir,
            store,
            main,
            alt,
            c1,
        }
    }

    fn advance(store: &ObjectStore, branch: &BranchId, changes: Vec<Change>) -> Commit {
        store
            .transaction(|txn| {
                let mut b = txn.branch(branch)?;
                let commit = Commit::child(b.head_commit_id, b.id.clone(), changes, "dm", "edit");
                b.head_commit_id = commit.id;
                txn.put_commit(commit.clone());
                txn.put_branch(b);
                Ok(commit)
            })
            .unwrap()
    }

    fn request(fx: &Fixture, resolutions: HashMap<FieldKey, FieldValue>) -> MergeRequest {
        MergeRequest {
            target: fx.main.id.clone(),
            source: fx.alt.id.clone(),
            resolutions,
            author: "dm".into(),
            message: "merge alt".into(),
        }
    }

    #[test]
    fn test_common_ancestor_of_diverged_heads() {
        let fx = setup();
        let c2 = advance(&fx.store, &fx.main.id, vec![set("hp", 12)]);
        let c3 = advance(&fx.store, &fx.alt.id, vec![set("str", 16)]);
        let snap = fx.store.snapshot();

        assert_eq!(find_common_ancestor(&snap, c2.id, c3.id).unwrap(), fx.c1.id);
        assert_eq!(find_common_ancestor(&snap, c2.id, fx.c1.id).unwrap(), fx.c1.id);
        assert_eq!(find_common_ancestor(&snap, c3.id, c3.id).unwrap(), c3.id);
    }

    #[test]
    fn test_clean_merge_records_two_parents() {
        let fx = setup();
        let c2 = advance(&fx.store, &fx.main.id, vec![set("hp", 12)]);
        let c3 = advance(&fx.store, &fx.alt.id, vec![set("str", 16)]);
        let validator = StructuralValidator::default();

        let outcome = merge_branches(&fx.store, &validator, request(&fx, HashMap::new())).unwrap();
        let MergeOutcome::Merged(commit) = outcome else {
            panic!("expected a merge commit");
        };
        assert_eq!(commit.parents, vec![c2.id, c3.id]);
        assert_eq!(commit.changes.len(), 2);

        let snap = fx.store.snapshot();
        assert_eq!(snap.branch(&fx.main.id).unwrap().head_commit_id, commit.id);
        assert_eq!(snap.branch(&fx.alt.id).unwrap().state, BranchState::Merged);
    }

    #[test]
    fn test_conflict_requires_resolution() {
        let fx = setup();
        advance(&fx.store, &fx.main.id, vec![set("hp", 12)]);
        advance(&fx.store, &fx.alt.id, vec![set("hp", 8)]);
        let validator = StructuralValidator::default();

        let err = merge_branches(&fx.store, &validator, request(&fx, HashMap::new())).unwrap_err();
        let conflicts = err.conflicts().unwrap();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].ours, FieldValue::from(12i64));
        assert_eq!(conflicts[0].theirs, FieldValue::from(8i64));
        assert_eq!(conflicts[0].base_value, FieldValue::from(10i64));

        let key = FieldKey::new(EntityType::Character, "aria", "hp");
        let resolutions = HashMap::from([(key.clone(), FieldValue::from(9i64))]);
        let outcome = merge_branches(&fx.store, &validator, request(&fx, resolutions)).unwrap();
        let MergeOutcome::Merged(commit) = outcome else {
            panic!("expected a merge commit");
        };
        let hp = commit.changes.iter().find(|c| c.key() == key).unwrap();
        assert_eq!(hp.new_value, FieldValue::from(9i64));
    }

    #[test]
    fn test_fast_forward_and_up_to_date() {
        let fx = setup();
        let c2 = advance(&fx.store, &fx.alt.id, vec![set("hp", 11)]);
        let validator = StructuralValidator::default();

        let outcome = merge_branches(&fx.store, &validator, request(&fx, HashMap::new())).unwrap();
        assert!(matches!(outcome, MergeOutcome::FastForward { to, .. } if to == c2.id));

        let again = merge_branches(&fx.store, &validator, request(&fx, HashMap::new())).unwrap();
        assert!(matches!(again, MergeOutcome::UpToDate { head } if head == c2.id));
    }

    #[test]
    fn test_field_set_back_to_base_still_conflicts() {
        let fx = setup();
        advance(&fx.store, &fx.main.id, vec![set("hp", 12)]);
        let ours = advance(&fx.store, &fx.main.id, vec![set("hp", 10)]);
        let theirs = advance(&fx.store, &fx.alt.id, vec![set("hp", 8)]);

        let plan = plan_merge(&fx.store.snapshot(), ours.id, theirs.id).unwrap();
        assert_eq!(plan.conflicts.len(), 1);
        assert_eq!(plan.conflicts[0].ours, FieldValue::from(10i64));
        assert_eq!(plan.conflicts[0].base_value, FieldValue::from(10i64));
        assert_eq!(plan.conflicts[0].theirs, FieldValue::from(8i64));
    }

    #[test]
    fn test_same_value_on_both_sides_is_not_a_conflict() {
        let fx = setup();
        advance(&fx.store, &fx.main.id, vec![set("hp", 12)]);
        advance(&fx.store, &fx.alt.id, vec![set("hp", 12)]);
        let snap = fx.store.snapshot();

        let ours = snap.branch(&fx.main.id).unwrap().head_commit_id;
        let theirs = snap.branch(&fx.alt.id).unwrap().head_commit_id;
        let plan = plan_merge(&snap, ours, theirs).unwrap();
        assert!(plan.is_clean());
        assert_eq!(plan.merged.len(), 1);
    }
}
