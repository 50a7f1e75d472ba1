//! Station dimension resolver.
//!
//! Obtains, creates and reverse-looks-up station rows. The cache is probed
//! first, then the database by the full unique key; creation goes through
//! SELECT then INSERT, with a duplicate-key failure treated as "a
//! concurrent writer just created the row".

use obs_common::{ArchiveError, ArchiveResult, Coords};
use tracing::debug;

use crate::connection::{ColTy, SqlTransaction, SqlVal};
use crate::state::{Entry, State, StationDesc};

const SELECT_WITH_IDENT: &str =
    "SELECT id FROM station WHERE report = ? AND lat = ? AND lon = ? AND ident = ?";
const SELECT_WITHOUT_IDENT: &str =
    "SELECT id FROM station WHERE report = ? AND lat = ? AND lon = ? AND ident IS NULL";
const SELECT_BY_ID: &str = "SELECT report, lat, lon, ident FROM station WHERE id = ?";
const INSERT: &str = "INSERT INTO station (report, lat, lon, ident) VALUES (?, ?, ?, ?)";

/// Look up a station id by descriptor. Never creates rows.
pub async fn get_id(
    tx: &mut dyn SqlTransaction,
    state: &mut State,
    desc: &StationDesc,
) -> ArchiveResult<i64> {
    if let Some(entry) = state.find_station(desc) {
        return Ok(entry.id);
    }
    match select_id(tx, desc).await? {
        Some(id) => state.add_station(desc.clone(), Entry { id, is_new: false }),
        None => Err(ArchiveError::not_found(format!("station ({})", desc))),
    }
}

/// Look up a station id by descriptor, creating the row if absent.
pub async fn obtain_id(
    tx: &mut dyn SqlTransaction,
    state: &mut State,
    desc: &StationDesc,
) -> ArchiveResult<i64> {
    if let Some(entry) = state.find_station(desc) {
        return Ok(entry.id);
    }
    if let Some(id) = select_id(tx, desc).await? {
        return state.add_station(desc.clone(), Entry { id, is_new: false });
    }

    let params = [
        SqlVal::BigInt(desc.report),
        SqlVal::Int(desc.coords.lat),
        SqlVal::Int(desc.coords.lon),
        match &desc.ident {
            Some(ident) => SqlVal::Text(ident.clone()),
            None => SqlVal::Null,
        },
    ];
    match tx.insert_returning_id(INSERT, &params).await {
        Ok(id) => {
            debug!(id, %desc, "created station");
            state.add_station(desc.clone(), Entry { id, is_new: true })
        }
        Err(err) if err.is_duplicate_key() => {
            // A concurrent writer created the row between our SELECT and
            // INSERT; the discovered id is the authoritative one.
            match select_id(tx, desc).await? {
                Some(id) => state.add_station(desc.clone(), Entry { id, is_new: false }),
                None => Err(ArchiveError::consistency(format!(
                    "station ({}) reported as duplicate on insert but absent on re-select",
                    desc
                ))),
            }
        }
        Err(err) => Err(err),
    }
}

/// Reverse lookup by surrogate key, transaction cache first.
pub async fn lookup(
    tx: &mut dyn SqlTransaction,
    state: &mut State,
    id: i64,
) -> ArchiveResult<StationDesc> {
    if let Some(desc) = state.station_by_id(id) {
        return Ok(desc.clone());
    }
    let rows = tx
        .query(
            SELECT_BY_ID,
            &[SqlVal::BigInt(id)],
            &[ColTy::BigInt, ColTy::Int, ColTy::Int, ColTy::OptText],
        )
        .await?;
    let row = match rows.first() {
        Some(row) => row,
        None => return Err(ArchiveError::not_found(format!("station id {}", id))),
    };
    let desc = StationDesc {
        report: row.bigint(0)?,
        coords: Coords::new(row.int(1)?, row.int(2)?),
        ident: row.opt_text(3)?.map(str::to_string),
    };
    state.add_station(desc.clone(), Entry { id, is_new: false })?;
    Ok(desc)
}

/// SELECT on the full unique key. `ident IS NULL` is a distinct branch
/// from `ident = ?`. More than one row means the unique index is violated
/// or missing.
async fn select_id(
    tx: &mut dyn SqlTransaction,
    desc: &StationDesc,
) -> ArchiveResult<Option<i64>> {
    let rows = match &desc.ident {
        Some(ident) => {
            tx.query(
                SELECT_WITH_IDENT,
                &[
                    SqlVal::BigInt(desc.report),
                    SqlVal::Int(desc.coords.lat),
                    SqlVal::Int(desc.coords.lon),
                    SqlVal::Text(ident.clone()),
                ],
                &[ColTy::BigInt],
            )
            .await?
        }
        None => {
            tx.query(
                SELECT_WITHOUT_IDENT,
                &[
                    SqlVal::BigInt(desc.report),
                    SqlVal::Int(desc.coords.lat),
                    SqlVal::Int(desc.coords.lon),
                ],
                &[ColTy::BigInt],
            )
            .await?
        }
    };
    match rows.len() {
        0 => Ok(None),
        1 => Ok(Some(rows[0].bigint(0)?)),
        n => Err(ArchiveError::consistency(format!(
            "station unique key ({}) matches {} rows",
            desc, n
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::SqlRow;
    use async_trait::async_trait;

    /// Backend double for the lost-race interleaving: the first SELECT
    /// misses, the INSERT reports a unique violation and the re-SELECT
    /// serves the row a concurrent writer created in between.
    struct ContendedBackend {
        selects: usize,
        inserts: usize,
    }

    #[async_trait]
    impl SqlTransaction for ContendedBackend {
        async fn execute(&mut self, _sql: &str, _params: &[SqlVal]) -> ArchiveResult<u64> {
            Ok(0)
        }

        async fn query(
            &mut self,
            _sql: &str,
            _params: &[SqlVal],
            _shape: &[ColTy],
        ) -> ArchiveResult<Vec<SqlRow>> {
            self.selects += 1;
            if self.selects == 1 {
                Ok(Vec::new())
            } else {
                Ok(vec![SqlRow(vec![SqlVal::BigInt(42)])])
            }
        }

        async fn insert_returning_id(
            &mut self,
            sql: &str,
            _params: &[SqlVal],
        ) -> ArchiveResult<i64> {
            self.inserts += 1;
            Err(ArchiveError::DuplicateKey {
                statement: sql.to_string(),
                message: "unique constraint violated".to_string(),
            })
        }

        async fn commit(self: Box<Self>) -> ArchiveResult<()> {
            Ok(())
        }

        async fn rollback(self: Box<Self>) -> ArchiveResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_obtain_id_recovers_from_lost_insert_race() {
        let mut tx = ContendedBackend {
            selects: 0,
            inserts: 0,
        };
        let mut state = State::new();
        let desc = StationDesc {
            report: 1,
            coords: Coords::from_degrees(44.5, 11.3),
            ident: Some("LFPW".to_string()),
        };

        let id = obtain_id(&mut tx, &mut state, &desc).await.unwrap();
        assert_eq!(id, 42);
        assert_eq!(tx.selects, 2);
        assert_eq!(tx.inserts, 1);
        // The row was created by the other writer, not this transaction.
        assert_eq!(
            state.find_station(&desc),
            Some(Entry { id: 42, is_new: false })
        );
    }
}
