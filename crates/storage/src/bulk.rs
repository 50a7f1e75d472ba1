//! Batch items and the annotate merge-join.
//!
//! The reconcilers compare a sorted in-memory batch against the ordered
//! rows already on disk with a single forward pass. The pass lives here as
//! a pure function so the "advance until the key matches or exceeds" step
//! is testable without any I/O.

use obs_common::{ArchiveError, ArchiveResult};

/// Conflict policy for a reconciliation call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Overwrite values that differ, insert missing ones.
    Update,
    /// Insert missing values only; existing rows keep their stored value.
    Ignore,
    /// Fail before any mutation if an existing value differs.
    Error,
}

/// One pending variable in a reconciliation batch. Never touches the
/// database itself; it records intent and final outcome.
#[derive(Debug, Clone)]
pub struct Item<K> {
    pub key: K,
    /// New value, in its textual storage form.
    pub value: String,
    /// Resolved fact row id, set once the item is matched or inserted.
    pub id: Option<i64>,
    pub needs_update: bool,
    pub updated: bool,
    pub needs_insert: bool,
    pub inserted: bool,
}

impl<K> Item<K> {
    pub fn new(key: K, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            id: None,
            needs_update: false,
            updated: false,
            needs_insert: false,
            inserted: false,
        }
    }
}

/// Image of one fact row already on disk.
#[derive(Debug, Clone)]
pub struct Existing<K> {
    pub key: K,
    pub id: i64,
    pub value: String,
}

/// Outcome counts of an annotate pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Summary {
    pub matched_same: usize,
    pub matched_different: usize,
    pub unmatched: usize,
}

/// Walk `items` and `existing` together, each exactly once, classifying
/// every item as matched (same or different value) or unmatched.
///
/// Both sequences must be non-decreasing by key; a violation is a
/// consistency error. Matched items record the row id; `needs_update` is
/// set only when the stored value differs textually. Duplicate keys inside
/// the batch match the same database row.
pub fn annotate<K: Ord>(items: &mut [Item<K>], existing: &[Existing<K>]) -> ArchiveResult<Summary> {
    if let Some(pos) = first_disorder(items.iter().map(|i| &i.key)) {
        return Err(ArchiveError::consistency(format!(
            "reconciliation batch not sorted at position {}",
            pos
        )));
    }
    if let Some(pos) = first_disorder(existing.iter().map(|e| &e.key)) {
        return Err(ArchiveError::consistency(format!(
            "database rows not ordered at position {}",
            pos
        )));
    }

    let mut summary = Summary::default();
    let mut cursor = 0;
    for item in items.iter_mut() {
        while cursor < existing.len() && existing[cursor].key < item.key {
            cursor += 1;
        }
        match existing.get(cursor) {
            Some(row) if row.key == item.key => {
                item.id = Some(row.id);
                if row.value != item.value {
                    item.needs_update = true;
                    summary.matched_different += 1;
                } else {
                    summary.matched_same += 1;
                }
            }
            _ => {
                item.needs_insert = true;
                summary.unmatched += 1;
            }
        }
    }
    Ok(summary)
}

/// Index of the first element smaller than its predecessor, if any.
fn first_disorder<'a, K: Ord + 'a>(keys: impl Iterator<Item = &'a K>) -> Option<usize> {
    let mut prev: Option<&K> = None;
    for (idx, key) in keys.enumerate() {
        if let Some(p) = prev {
            if key < p {
                return Some(idx);
            }
        }
        prev = Some(key);
    }
    None
}
