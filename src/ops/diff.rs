//! Field-level diffs between commits

use super::history::{ancestor_set, field_values_at};
use crate::model::{Change, EntityType, FieldKey, FieldValue, Hash};
use crate::store::RecordSource;
use crate::Result;
use std::collections::{BTreeSet, HashSet, VecDeque};

/// Net field changes from one commit to another.
///
/// Each entry's `old_value` is the value as of `base` and `new_value` the
/// value as of `head`. A field that was touched and then set back keeps its
/// entry with equal old and new values.
#[derive(Clone, Debug)]
pub struct Diff {
    pub base: Hash,
    pub head: Hash,
    /// Sorted by field key
    pub changes: Vec<Change>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, key: &FieldKey) -> Option<&Change> {
        self.changes
            .binary_search_by(|c| c.key().cmp(key))
            .ok()
            .map(|i| &self.changes[i])
    }

    pub fn keys(&self) -> impl Iterator<Item = FieldKey> + '_ {
        self.changes.iter().map(|c| c.key())
    }

    /// Changes touching one entity
    pub fn for_entity<'d>(
        &'d self,
        entity_type: EntityType,
        entity_id: &'d str,
    ) -> impl Iterator<Item = &'d Change> + 'd {
        self.changes
            .iter()
            .filter(move |c| c.entity_type == entity_type && c.entity_id == entity_id)
    }

    /// Entries whose value actually differs
    pub fn effective(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter().filter(|c| c.old_value != c.new_value)
    }
}

/// Commits reachable from `head` but not from `base`
pub fn commits_between<S: RecordSource + ?Sized>(
    source: &S,
    base: Hash,
    head: Hash,
) -> Result<Vec<Hash>> {
    let excluded = ancestor_set(source, base)?;
    let mut queue = VecDeque::from([head]);
    let mut visited = HashSet::from([head]);
    let mut found = Vec::new();

    while let Some(id) = queue.pop_front() {
        if excluded.contains(&id) {
            continue;
        }
        let commit = source.get_commit(&id)?;
        found.push(id);
        for parent in commit.parents {
            if visited.insert(parent) {
                queue.push_back(parent);
            }
        }
    }
    Ok(found)
}

/// Diff `head` against `base`.
///
/// Fields are collected from every commit in
/// `ancestors(head) \ ancestors(base)`; `base` need not be an ancestor of
/// `head`.
pub fn diff<S: RecordSource + ?Sized>(source: &S, base: Hash, head: Hash) -> Result<Diff> {
    let mut touched = BTreeSet::new();
    for id in commits_between(source, base, head)? {
        for change in source.get_commit(&id)?.changes {
            touched.insert(change.key());
        }
    }

    if touched.is_empty() {
        return Ok(Diff {
            base,
            head,
            changes: Vec::new(),
        });
    }

    let old = field_values_at(source, base, |k| touched.contains(k))?;
    let mut new = field_values_at(source, head, |k| touched.contains(k))?;

    let changes = touched
        .into_iter()
        .map(|key| {
            let old_value = old.get(&key).cloned().unwrap_or_else(FieldValue::null);
            let new_value = new.remove(&key).unwrap_or_else(FieldValue::null);
            Change::new(
                key.entity_type,
                key.entity_id,
                key.field_name,
                old_value,
                new_value,
            )
        })
        .collect();

    Ok(Diff {
        base,
        head,
        changes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BranchId, Commit};
    use crate::store::ObjectStore;
    use tempfile::tempdir;

    fn set(entity: &str, field: &str, value: i64) -> Change {
        Change::set(EntityType::Character, entity, field, value)
    }

    #[test]
    fn test_diff_reports_net_values() {
        let dir = tempdir().unwrap();
        let store = ObjectStore::create(dir.path().join("d.lineage")).unwrap();
        let main = BranchId::for_name("main");

        let genesis = Commit::genesis(main.clone());
        let c1 = Commit::child(genesis.id, main.clone(), vec![set("aria", "hp", 10)], "dm", "c1");
        let c2 = Commit::child(
            c1.id,
            main.clone(),
            vec![set("aria", "hp", 14), set("aria", "str", 16)],
            "dm",
            "c2",
        );
        let c3 = Commit::child(c2.id, main.clone(), vec![set("aria", "hp", 10)], "dm", "c3");
        store
            .transaction(|txn| {
                for c in [&genesis, &c1, &c2, &c3] {
                    txn.put_commit(c.clone());
                }
                Ok(())
            })
            .unwrap();

        let snap = store.snapshot();
        let d = diff(&snap, c1.id, c3.id).unwrap();
        assert_eq!(d.len(), 2);

        let hp = d.get(&FieldKey::new(EntityType::Character, "aria", "hp")).unwrap();
        assert_eq!(hp.old_value, FieldValue::from(10i64));
        assert_eq!(hp.new_value, FieldValue::from(10i64));

        let strength = d.get(&FieldKey::new(EntityType::Character, "aria", "str")).unwrap();
        assert!(strength.old_value.is_null());
        assert_eq!(d.effective().count(), 1);
        assert_eq!(d.for_entity(EntityType::Character, "aria").count(), 2);

        assert!(diff(&snap, c3.id, c3.id).unwrap().is_empty());
        assert_eq!(commits_between(&snap, c1.id, c3.id).unwrap(), vec![c3.id, c2.id]);
    }
}
