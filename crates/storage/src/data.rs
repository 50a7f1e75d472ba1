//! Bulk value reconciliation.
//!
//! Takes a batch of pending variables sharing one outer context, merges it
//! against the fact rows already on disk and issues the minimal set of
//! INSERT/UPDATE statements under the requested conflict policy.

use chrono::NaiveDateTime;
use obs_common::{ArchiveError, ArchiveResult, Varcode};
use tracing::debug;

use crate::bulk::{annotate, Existing, Item, UpdateMode};
use crate::connection::{ColTy, SqlTransaction, SqlVal};

/// Merge key of one timestamped value within its context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DataKey {
    pub id_levtr: i64,
    pub code: Varcode,
}

/// A batch of pending values sharing one (station, report, datetime)
/// context.
#[derive(Debug)]
pub struct DataBatch {
    pub id_station: i64,
    pub id_report: i64,
    pub datetime: NaiveDateTime,
    pub items: Vec<Item<DataKey>>,
}

impl DataBatch {
    pub fn new(id_station: i64, id_report: i64, datetime: NaiveDateTime) -> Self {
        Self {
            id_station,
            id_report,
            datetime,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, id_levtr: i64, code: Varcode, value: impl Into<String>) {
        self.items.push(Item::new(DataKey { id_levtr, code }, value));
    }
}

const SELECT_CONTEXT: &str = "SELECT id, id_levtr, id_var, value FROM data \
     WHERE id_station = ? AND id_report = ? AND datetime = ? \
     ORDER BY id_levtr, id_var";
const UPDATE_BY_ID: &str = "UPDATE data SET value = ? WHERE id = ?";
const INSERT: &str = "INSERT INTO data (id_station, id_report, id_levtr, datetime, id_var, value) \
     VALUES (?, ?, ?, ?, ?, ?)";

/// Reconcile a batch of timestamped values. Every item ends updated,
/// inserted or unchanged, and carries the id of its fact row.
pub async fn reconcile(
    tx: &mut dyn SqlTransaction,
    batch: &mut DataBatch,
    mode: UpdateMode,
) -> ArchiveResult<()> {
    if batch.items.is_empty() {
        return Ok(());
    }
    batch.items.sort_by(|a, b| a.key.cmp(&b.key));

    let rows = tx
        .query(
            SELECT_CONTEXT,
            &[
                SqlVal::BigInt(batch.id_station),
                SqlVal::BigInt(batch.id_report),
                SqlVal::DateTime(batch.datetime),
            ],
            &[ColTy::BigInt, ColTy::BigInt, ColTy::Int, ColTy::Text],
        )
        .await?;
    let existing = rows
        .iter()
        .map(|row| {
            Ok(Existing {
                id: row.bigint(0)?,
                key: DataKey {
                    id_levtr: row.bigint(1)?,
                    code: row.varcode(2)?,
                },
                value: row.text(3)?.to_string(),
            })
        })
        .collect::<ArchiveResult<Vec<_>>>()?;

    let summary = annotate(&mut batch.items, &existing)?;
    debug!(
        station = batch.id_station,
        report = batch.id_report,
        same = summary.matched_same,
        different = summary.matched_different,
        new = summary.unmatched,
        "annotated value batch"
    );

    if mode == UpdateMode::Error && summary.matched_different > 0 {
        return Err(ArchiveError::consistency(format!(
            "refusing to overwrite {} existing values for station {} report {} at {}",
            summary.matched_different, batch.id_station, batch.id_report, batch.datetime
        )));
    }

    for item in batch.items.iter_mut() {
        if item.needs_update && mode == UpdateMode::Update {
            let id = item.id.ok_or_else(|| {
                ArchiveError::consistency("item marked for update without a row id".to_string())
            })?;
            tx.execute(
                UPDATE_BY_ID,
                &[SqlVal::Text(item.value.clone()), SqlVal::BigInt(id)],
            )
            .await?;
            item.updated = true;
        }
        if item.needs_insert {
            let id = tx
                .insert_returning_id(
                    INSERT,
                    &[
                        SqlVal::BigInt(batch.id_station),
                        SqlVal::BigInt(batch.id_report),
                        SqlVal::BigInt(item.key.id_levtr),
                        SqlVal::DateTime(batch.datetime),
                        SqlVal::Int(i32::from(item.key.code.0)),
                        SqlVal::Text(item.value.clone()),
                    ],
                )
                .await?;
            item.id = Some(id);
            item.inserted = true;
        }
    }
    Ok(())
}

/// A batch of pending station-constant values for one station.
#[derive(Debug)]
pub struct StationDataBatch {
    pub id_station: i64,
    pub items: Vec<Item<Varcode>>,
}

impl StationDataBatch {
    pub fn new(id_station: i64) -> Self {
        Self {
            id_station,
            items: Vec::new(),
        }
    }

    pub fn push(&mut self, code: Varcode, value: impl Into<String>) {
        self.items.push(Item::new(code, value));
    }
}

const SELECT_STATION_CONTEXT: &str =
    "SELECT id, code, value FROM station_data WHERE id_station = ? ORDER BY code";
const UPDATE_STATION_BY_ID: &str = "UPDATE station_data SET value = ? WHERE id = ?";
const INSERT_STATION: &str =
    "INSERT INTO station_data (id_station, code, value) VALUES (?, ?, ?)";

/// Reconcile a batch of station-constant values, keyed by varcode alone.
pub async fn reconcile_station(
    tx: &mut dyn SqlTransaction,
    batch: &mut StationDataBatch,
    mode: UpdateMode,
) -> ArchiveResult<()> {
    if batch.items.is_empty() {
        return Ok(());
    }
    batch.items.sort_by(|a, b| a.key.cmp(&b.key));

    let rows = tx
        .query(
            SELECT_STATION_CONTEXT,
            &[SqlVal::BigInt(batch.id_station)],
            &[ColTy::BigInt, ColTy::Int, ColTy::Text],
        )
        .await?;
    let existing = rows
        .iter()
        .map(|row| {
            Ok(Existing {
                id: row.bigint(0)?,
                key: row.varcode(1)?,
                value: row.text(2)?.to_string(),
            })
        })
        .collect::<ArchiveResult<Vec<_>>>()?;

    let summary = annotate(&mut batch.items, &existing)?;
    if mode == UpdateMode::Error && summary.matched_different > 0 {
        return Err(ArchiveError::consistency(format!(
            "refusing to overwrite {} existing station values for station {}",
            summary.matched_different, batch.id_station
        )));
    }

    for item in batch.items.iter_mut() {
        if item.needs_update && mode == UpdateMode::Update {
            let id = item.id.ok_or_else(|| {
                ArchiveError::consistency("item marked for update without a row id".to_string())
            })?;
            tx.execute(
                UPDATE_STATION_BY_ID,
                &[SqlVal::Text(item.value.clone()), SqlVal::BigInt(id)],
            )
            .await?;
            item.updated = true;
        }
        if item.needs_insert {
            let id = tx
                .insert_returning_id(
                    INSERT_STATION,
                    &[
                        SqlVal::BigInt(batch.id_station),
                        SqlVal::Int(i32::from(item.key.0)),
                        SqlVal::Text(item.value.clone()),
                    ],
                )
                .await?;
            item.id = Some(id);
            item.inserted = true;
        }
    }
    Ok(())
}
