//! Report network reference table (repinfo).
//!
//! Maps a short memo string to a numeric id and priority. Memo resolution
//! follows the same probe-cache, select, insert-with-retry pattern as the
//! dimension resolvers.

use obs_common::{ArchiveError, ArchiveResult};
use tracing::debug;

use crate::connection::{ColTy, SqlTransaction, SqlVal};
use crate::state::State;

const SELECT_BY_MEMO: &str = "SELECT id FROM repinfo WHERE memo = ?";
const INSERT: &str = "INSERT INTO repinfo (memo, description, prio) VALUES (?, ?, ?)";

/// One repinfo row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepinfoEntry {
    pub id: i64,
    pub memo: String,
    pub description: String,
    pub prio: i32,
}

/// Default report networks seeded into an empty archive, with their
/// customary priorities.
pub fn default_entries() -> &'static [(&'static str, &'static str, i32)] {
    &[
        ("synop", "Synoptic reports", 101),
        ("metar", "Metar reports", 81),
        ("temp", "Radiosonde soundings", 101),
        ("pilot", "Pilot soundings", 101),
        ("buoy", "Buoy reports", 131),
        ("ship", "Ship reports", 11),
        ("airep", "Aircraft reports", 41),
        ("amdar", "AMDAR aircraft reports", 41),
        ("acars", "ACARS aircraft reports", 41),
        ("pollution", "Air quality measurements", 199),
        ("satellite", "Satellite-derived values", 21),
        ("generic", "Generic data", 1000),
    ]
}

/// Look up a report id by memo. Never creates rows.
pub async fn get_id(
    tx: &mut dyn SqlTransaction,
    state: &mut State,
    memo: &str,
) -> ArchiveResult<i64> {
    if let Some(id) = state.find_report(memo) {
        return Ok(id);
    }
    match select_id(tx, memo).await? {
        Some(id) => {
            state.add_report(memo, id);
            Ok(id)
        }
        None => Err(ArchiveError::not_found(format!("report {:?}", memo))),
    }
}

/// Look up a report id by memo, creating an entry with priority 0 if the
/// memo is unknown.
pub async fn obtain_id(
    tx: &mut dyn SqlTransaction,
    state: &mut State,
    memo: &str,
) -> ArchiveResult<i64> {
    if let Some(id) = state.find_report(memo) {
        return Ok(id);
    }
    if let Some(id) = select_id(tx, memo).await? {
        state.add_report(memo, id);
        return Ok(id);
    }

    let params = [
        SqlVal::Text(memo.to_string()),
        SqlVal::Text(memo.to_string()),
        SqlVal::Int(0),
    ];
    match tx.insert_returning_id(INSERT, &params).await {
        Ok(id) => {
            debug!(id, memo, "created repinfo entry");
            state.add_report(memo, id);
            Ok(id)
        }
        Err(err) if err.is_duplicate_key() => match select_id(tx, memo).await? {
            Some(id) => {
                state.add_report(memo, id);
                Ok(id)
            }
            None => Err(ArchiveError::consistency(format!(
                "report {:?} reported as duplicate on insert but absent on re-select",
                memo
            ))),
        },
        Err(err) => Err(err),
    }
}

/// List all report networks, ordered by id.
pub async fn all(tx: &mut dyn SqlTransaction) -> ArchiveResult<Vec<RepinfoEntry>> {
    let rows = tx
        .query(
            "SELECT id, memo, description, prio FROM repinfo ORDER BY id",
            &[],
            &[ColTy::BigInt, ColTy::Text, ColTy::Text, ColTy::Int],
        )
        .await?;
    rows.iter()
        .map(|row| {
            Ok(RepinfoEntry {
                id: row.bigint(0)?,
                memo: row.text(1)?.to_string(),
                description: row.text(2)?.to_string(),
                prio: row.int(3)?,
            })
        })
        .collect()
}

async fn select_id(tx: &mut dyn SqlTransaction, memo: &str) -> ArchiveResult<Option<i64>> {
    let rows = tx
        .query(
            SELECT_BY_MEMO,
            &[SqlVal::Text(memo.to_string())],
            &[ColTy::BigInt],
        )
        .await?;
    match rows.len() {
        0 => Ok(None),
        1 => Ok(Some(rows[0].bigint(0)?)),
        n => Err(ArchiveError::consistency(format!(
            "repinfo memo {:?} matches {} rows",
            memo, n
        ))),
    }
}
