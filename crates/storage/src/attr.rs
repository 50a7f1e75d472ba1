//! Bulk attribute reconciliation.
//!
//! Same merge pattern as the value reconciler, keyed by
//! (fact row id, attribute code). Attribute rows have no surrogate key of
//! their own; an item's id stays the parent `id_data`. Only rows whose
//! `id_data` appears in the batch are read or written.

use obs_common::{ArchiveError, ArchiveResult, Varcode};
use tracing::debug;

use crate::bulk::{annotate, Existing, Item, UpdateMode};
use crate::connection::{ColTy, SqlTransaction, SqlVal};

/// Which fact table the attributes belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttrTarget {
    /// Attributes of timestamped values (`attr` table).
    Values,
    /// Attributes of station-constant values (`station_attr` table).
    StationValues,
}

impl AttrTarget {
    pub(crate) fn table(self) -> &'static str {
        match self {
            AttrTarget::Values => "attr",
            AttrTarget::StationValues => "station_attr",
        }
    }
}

/// Merge key of one attribute row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AttrKey {
    pub id_data: i64,
    pub code: Varcode,
}

/// A batch of pending attributes, possibly spanning several fact rows.
#[derive(Debug, Default)]
pub struct AttrBatch {
    pub items: Vec<Item<AttrKey>>,
}

impl AttrBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, id_data: i64, code: Varcode, value: impl Into<String>) {
        self.items.push(Item::new(AttrKey { id_data, code }, value));
    }
}

/// Reconcile a batch of quality-control attributes against one attribute
/// table.
pub async fn reconcile(
    tx: &mut dyn SqlTransaction,
    target: AttrTarget,
    batch: &mut AttrBatch,
    mode: UpdateMode,
) -> ArchiveResult<()> {
    if batch.items.is_empty() {
        return Ok(());
    }
    batch.items.sort_by(|a, b| a.key.cmp(&b.key));

    // Distinct parent ids, already in ascending order after the item sort.
    let mut ids: Vec<i64> = batch.items.iter().map(|i| i.key.id_data).collect();
    ids.dedup();

    // Ids are integers from our own resolution path, safe to inline.
    let id_list = ids
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let select = format!(
        "SELECT id_data, type, value FROM {} WHERE id_data IN ({}) ORDER BY id_data, type",
        target.table(),
        id_list
    );
    let rows = tx
        .query(&select, &[], &[ColTy::BigInt, ColTy::Int, ColTy::Text])
        .await?;
    let existing = rows
        .iter()
        .map(|row| {
            let id_data = row.bigint(0)?;
            Ok(Existing {
                id: id_data,
                key: AttrKey {
                    id_data,
                    code: row.varcode(1)?,
                },
                value: row.text(2)?.to_string(),
            })
        })
        .collect::<ArchiveResult<Vec<_>>>()?;

    let summary = annotate(&mut batch.items, &existing)?;
    debug!(
        table = target.table(),
        same = summary.matched_same,
        different = summary.matched_different,
        new = summary.unmatched,
        "annotated attribute batch"
    );

    if mode == UpdateMode::Error && summary.matched_different > 0 {
        return Err(ArchiveError::consistency(format!(
            "refusing to overwrite {} existing attributes in {}",
            summary.matched_different,
            target.table()
        )));
    }

    let update = format!(
        "UPDATE {} SET value = ? WHERE id_data = ? AND type = ?",
        target.table()
    );
    let insert = format!(
        "INSERT INTO {} (id_data, type, value) VALUES (?, ?, ?)",
        target.table()
    );
    for item in batch.items.iter_mut() {
        if item.needs_update && mode == UpdateMode::Update {
            tx.execute(
                &update,
                &[
                    SqlVal::Text(item.value.clone()),
                    SqlVal::BigInt(item.key.id_data),
                    SqlVal::Int(i32::from(item.key.code.0)),
                ],
            )
            .await?;
            item.updated = true;
        }
        if item.needs_insert {
            tx.execute(
                &insert,
                &[
                    SqlVal::BigInt(item.key.id_data),
                    SqlVal::Int(i32::from(item.key.code.0)),
                    SqlVal::Text(item.value.clone()),
                ],
            )
            .await?;
            item.inserted = true;
        }
        item.id = Some(item.key.id_data);
    }
    Ok(())
}
