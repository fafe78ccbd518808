//! Commit history walks
//!
//! All walks are iterative breadth-first searches over parent pointers with
//! a visited set, so they stay stack-safe on deep histories and terminate
//! even if the stored graph were malformed.

use crate::model::{Commit, EntityType, FieldKey, FieldValue, Hash};
use crate::store::RecordSource;
use crate::Result;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Lazy breadth-first walk over a commit and its ancestors.
///
/// Yields the starting commit first and never yields a commit twice.
/// Cloning the iterator restarts nothing: the clone continues from the same
/// position; call [`ancestors`] again to start over.
pub struct Ancestors<'a, S: RecordSource + ?Sized> {
    source: &'a S,
    queue: VecDeque<(Hash, usize)>,
    visited: HashSet<Hash>,
    failed: bool,
}

impl<S: RecordSource + ?Sized> Clone for Ancestors<'_, S> {
    fn clone(&self) -> Self {
        Ancestors {
            source: self.source,
            queue: self.queue.clone(),
            visited: self.visited.clone(),
            failed: self.failed,
        }
    }
}

impl<'a, S: RecordSource + ?Sized> Ancestors<'a, S> {
    fn new(source: &'a S, start: Hash) -> Self {
        let mut visited = HashSet::new();
        visited.insert(start);
        Ancestors {
            source,
            queue: VecDeque::from([(start, 0)]),
            visited,
            failed: false,
        }
    }

    /// Pair each commit with its distance from the start
    pub fn with_depth(self) -> AncestorsWithDepth<'a, S> {
        AncestorsWithDepth(self)
    }

    fn next_entry(&mut self) -> Option<Result<(Commit, usize)>> {
        if self.failed {
            return None;
        }
        let (id, depth) = self.queue.pop_front()?;

        let commit = match self.source.get_commit(&id) {
            Ok(commit) => commit,
            Err(e) => {
                self.failed = true;
                return Some(Err(e));
            }
        };

        for parent in &commit.parents {
            if self.visited.insert(*parent) {
                self.queue.push_back((*parent, depth + 1));
            }
        }

        Some(Ok((commit, depth)))
    }
}

impl<S: RecordSource + ?Sized> Iterator for Ancestors<'_, S> {
    type Item = Result<Commit>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().map(|r| r.map(|(commit, _)| commit))
    }
}

/// [`Ancestors`] yielding `(commit, depth)`
pub struct AncestorsWithDepth<'a, S: RecordSource + ?Sized>(Ancestors<'a, S>);

impl<S: RecordSource + ?Sized> Iterator for AncestorsWithDepth<'_, S> {
    type Item = Result<(Commit, usize)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.0.next_entry()
    }
}

/// Walk `start` and its ancestors
pub fn ancestors<S: RecordSource + ?Sized>(source: &S, start: Hash) -> Ancestors<'_, S> {
    Ancestors::new(source, start)
}

/// Ids of `start` and all of its ancestors.
///
/// Parent pointers are followed without loading unrelated data twice.
pub fn ancestor_set<S: RecordSource + ?Sized>(source: &S, start: Hash) -> Result<HashSet<Hash>> {
    Ok(commit_distances(source, start)?.into_keys().collect())
}

/// Shortest distance from `start` to each of its ancestors (inclusive)
pub fn commit_distances<S: RecordSource + ?Sized>(
    source: &S,
    start: Hash,
) -> Result<HashMap<Hash, usize>> {
    let mut distances = HashMap::new();
    for entry in ancestors(source, start).with_depth() {
        let (commit, depth) = entry?;
        distances.insert(commit.id, depth);
    }
    Ok(distances)
}

/// Whether `ancestor` is `descendant` or one of its ancestors
pub fn is_ancestor<S: RecordSource + ?Sized>(
    source: &S,
    ancestor: Hash,
    descendant: Hash,
) -> Result<bool> {
    for commit in ancestors(source, descendant) {
        if commit?.id == ancestor {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Up to `limit` commits reachable from `head`, nearest first
pub fn log<S: RecordSource + ?Sized>(
    source: &S,
    head: Hash,
    limit: Option<usize>,
) -> Result<Vec<Commit>> {
    ancestors(source, head)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

/// Field values as of `at`, restricted to keys accepted by `filter`.
///
/// For each field the nearest change in breadth-first order wins. Merge
/// commits restate every merged field, so the nearest change is always the
/// one in effect.
pub fn field_values_at<S, F>(
    source: &S,
    at: Hash,
    filter: F,
) -> Result<BTreeMap<FieldKey, FieldValue>>
where
    S: RecordSource + ?Sized,
    F: Fn(&FieldKey) -> bool,
{
    let mut values = BTreeMap::new();
    for commit in ancestors(source, at) {
        for change in commit?.changes {
            let key = change.key();
            if filter(&key) && !values.contains_key(&key) {
                values.insert(key, change.new_value);
            }
        }
    }
    Ok(values)
}

/// Fields of one entity as of `at`, keyed by field name
pub fn entity_fields_at<S: RecordSource + ?Sized>(
    source: &S,
    at: Hash,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<BTreeMap<String, FieldValue>> {
    let values = field_values_at(source, at, |key| {
        key.entity_type == entity_type && key.entity_id == entity_id
    })?;
    Ok(values
        .into_iter()
        .map(|(key, value)| (key.field_name, value))
        .collect())
}
