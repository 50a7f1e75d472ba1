//! Level/time-range dimension resolver.
//!
//! Same contract shape as the station resolver, keyed by the full
//! 7-integer (level, time range) tuple.

use obs_common::{ArchiveError, ArchiveResult, Level, Trange};
use tracing::debug;

use crate::connection::{ColTy, SqlTransaction, SqlVal};
use crate::state::{Entry, LevTrDesc, State};

const SELECT_BY_DESC: &str = "SELECT id FROM levtr \
     WHERE ltype1 = ? AND l1 = ? AND ltype2 = ? AND l2 = ? \
       AND pind = ? AND p1 = ? AND p2 = ?";
const SELECT_BY_ID: &str =
    "SELECT ltype1, l1, ltype2, l2, pind, p1, p2 FROM levtr WHERE id = ?";
const INSERT: &str = "INSERT INTO levtr (ltype1, l1, ltype2, l2, pind, p1, p2) \
     VALUES (?, ?, ?, ?, ?, ?, ?)";

fn desc_params(desc: &LevTrDesc) -> [SqlVal; 7] {
    [
        SqlVal::Int(desc.level.ltype1),
        SqlVal::Int(desc.level.l1),
        SqlVal::Int(desc.level.ltype2),
        SqlVal::Int(desc.level.l2),
        SqlVal::Int(desc.trange.pind),
        SqlVal::Int(desc.trange.p1),
        SqlVal::Int(desc.trange.p2),
    ]
}

/// Look up a levtr id by descriptor. Never creates rows.
pub async fn get_id(
    tx: &mut dyn SqlTransaction,
    state: &mut State,
    desc: &LevTrDesc,
) -> ArchiveResult<i64> {
    if let Some(entry) = state.find_levtr(desc) {
        return Ok(entry.id);
    }
    match select_id(tx, desc).await? {
        Some(id) => state.add_levtr(*desc, Entry { id, is_new: false }),
        None => Err(ArchiveError::not_found(format!("levtr ({})", desc))),
    }
}

/// Look up a levtr id by descriptor, creating the row if absent.
pub async fn obtain_id(
    tx: &mut dyn SqlTransaction,
    state: &mut State,
    desc: &LevTrDesc,
) -> ArchiveResult<i64> {
    if let Some(entry) = state.find_levtr(desc) {
        return Ok(entry.id);
    }
    if let Some(id) = select_id(tx, desc).await? {
        return state.add_levtr(*desc, Entry { id, is_new: false });
    }

    match tx.insert_returning_id(INSERT, &desc_params(desc)).await {
        Ok(id) => {
            debug!(id, %desc, "created levtr");
            state.add_levtr(*desc, Entry { id, is_new: true })
        }
        Err(err) if err.is_duplicate_key() => match select_id(tx, desc).await? {
            Some(id) => state.add_levtr(*desc, Entry { id, is_new: false }),
            None => Err(ArchiveError::consistency(format!(
                "levtr ({}) reported as duplicate on insert but absent on re-select",
                desc
            ))),
        },
        Err(err) => Err(err),
    }
}

/// Reverse lookup by surrogate key, transaction cache first.
pub async fn lookup(
    tx: &mut dyn SqlTransaction,
    state: &mut State,
    id: i64,
) -> ArchiveResult<LevTrDesc> {
    if let Some(desc) = state.levtr_by_id(id) {
        return Ok(*desc);
    }
    let rows = tx
        .query(SELECT_BY_ID, &[SqlVal::BigInt(id)], &[ColTy::Int; 7])
        .await?;
    let row = match rows.first() {
        Some(row) => row,
        None => return Err(ArchiveError::not_found(format!("levtr id {}", id))),
    };
    let desc = LevTrDesc {
        level: Level::new(row.int(0)?, row.int(1)?, row.int(2)?, row.int(3)?),
        trange: Trange::new(row.int(4)?, row.int(5)?, row.int(6)?),
    };
    state.add_levtr(desc, Entry { id, is_new: false })?;
    Ok(desc)
}

async fn select_id(tx: &mut dyn SqlTransaction, desc: &LevTrDesc) -> ArchiveResult<Option<i64>> {
    let rows = tx
        .query(SELECT_BY_DESC, &desc_params(desc), &[ColTy::BigInt])
        .await?;
    match rows.len() {
        0 => Ok(None),
        1 => Ok(Some(rows[0].bigint(0)?)),
        n => Err(ArchiveError::consistency(format!(
            "levtr unique key ({}) matches {} rows",
            desc, n
        ))),
    }
}
