//! Filter/cursor read layer.
//!
//! Compiles a structured filter into one joined SELECT and streams the
//! denormalised rows back. Not part of the reconciliation core; callers
//! that need richer planning sit on top of this.

use chrono::NaiveDateTime;
use obs_common::{ArchiveResult, Coords, Level, Trange, Varcode};

use crate::attr::AttrTarget;
use crate::connection::{ColTy, SqlTransaction, SqlVal};

/// Filter for timestamped values.
#[derive(Debug, Default, Clone)]
pub struct DataQuery {
    pub report: Option<String>,
    pub station_id: Option<i64>,
    pub ident: Option<String>,
    /// Inclusive scaled-integer latitude range.
    pub lat_range: Option<(i32, i32)>,
    /// Inclusive scaled-integer longitude range.
    pub lon_range: Option<(i32, i32)>,
    pub datetime_min: Option<NaiveDateTime>,
    pub datetime_max: Option<NaiveDateTime>,
    pub level: Option<Level>,
    pub trange: Option<Trange>,
    pub varcodes: Vec<Varcode>,
}

/// One row streamed back from a data query, carrying its full context.
#[derive(Debug, Clone, PartialEq)]
pub struct DataResult {
    pub id_data: i64,
    pub id_station: i64,
    pub report: String,
    pub coords: Coords,
    pub ident: Option<String>,
    pub level: Level,
    pub trange: Trange,
    pub datetime: NaiveDateTime,
    pub code: Varcode,
    pub value: String,
}

const DATA_SELECT: &str = "SELECT d.id, d.id_station, r.memo, s.lat, s.lon, s.ident, \
            lt.ltype1, lt.l1, lt.ltype2, lt.l2, lt.pind, lt.p1, lt.p2, \
            d.datetime, d.id_var, d.value \
     FROM data d \
     JOIN station s ON s.id = d.id_station \
     JOIN repinfo r ON r.id = d.id_report \
     JOIN levtr lt ON lt.id = d.id_levtr";

const DATA_ORDER: &str = " ORDER BY d.id_station, d.datetime, d.id_levtr, d.id_var";

const DATA_SHAPE: &[ColTy] = &[
    ColTy::BigInt,
    ColTy::BigInt,
    ColTy::Text,
    ColTy::Int,
    ColTy::Int,
    ColTy::OptText,
    ColTy::Int,
    ColTy::Int,
    ColTy::Int,
    ColTy::Int,
    ColTy::Int,
    ColTy::Int,
    ColTy::Int,
    ColTy::DateTime,
    ColTy::Int,
    ColTy::Text,
];

fn data_where(query: &DataQuery, sql: &mut String, params: &mut Vec<SqlVal>) {
    let mut clauses: Vec<String> = Vec::new();

    if let Some(report) = &query.report {
        clauses.push("r.memo = ?".to_string());
        params.push(SqlVal::Text(report.clone()));
    }
    if let Some(id) = query.station_id {
        clauses.push("d.id_station = ?".to_string());
        params.push(SqlVal::BigInt(id));
    }
    if let Some(ident) = &query.ident {
        clauses.push("s.ident = ?".to_string());
        params.push(SqlVal::Text(ident.clone()));
    }
    if let Some((min, max)) = query.lat_range {
        clauses.push("s.lat >= ? AND s.lat <= ?".to_string());
        params.push(SqlVal::Int(min));
        params.push(SqlVal::Int(max));
    }
    if let Some((min, max)) = query.lon_range {
        clauses.push("s.lon >= ? AND s.lon <= ?".to_string());
        params.push(SqlVal::Int(min));
        params.push(SqlVal::Int(max));
    }
    if let Some(min) = query.datetime_min {
        clauses.push("d.datetime >= ?".to_string());
        params.push(SqlVal::DateTime(min));
    }
    if let Some(max) = query.datetime_max {
        clauses.push("d.datetime <= ?".to_string());
        params.push(SqlVal::DateTime(max));
    }
    if let Some(level) = query.level {
        clauses.push("lt.ltype1 = ? AND lt.l1 = ? AND lt.ltype2 = ? AND lt.l2 = ?".to_string());
        params.push(SqlVal::Int(level.ltype1));
        params.push(SqlVal::Int(level.l1));
        params.push(SqlVal::Int(level.ltype2));
        params.push(SqlVal::Int(level.l2));
    }
    if let Some(trange) = query.trange {
        clauses.push("lt.pind = ? AND lt.p1 = ? AND lt.p2 = ?".to_string());
        params.push(SqlVal::Int(trange.pind));
        params.push(SqlVal::Int(trange.p1));
        params.push(SqlVal::Int(trange.p2));
    }
    if !query.varcodes.is_empty() {
        let placeholders = vec!["?"; query.varcodes.len()].join(", ");
        clauses.push(format!("d.id_var IN ({})", placeholders));
        for code in &query.varcodes {
            params.push(SqlVal::Int(i32::from(code.0)));
        }
    }

    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
}

/// Run a data query, returning rows ordered by
/// (station, datetime, levtr, varcode).
pub async fn run_data_query(
    tx: &mut dyn SqlTransaction,
    query: &DataQuery,
) -> ArchiveResult<Vec<DataResult>> {
    let mut sql = DATA_SELECT.to_string();
    let mut params = Vec::new();
    data_where(query, &mut sql, &mut params);
    sql.push_str(DATA_ORDER);

    let rows = tx.query(&sql, &params, DATA_SHAPE).await?;
    rows.iter()
        .map(|row| {
            Ok(DataResult {
                id_data: row.bigint(0)?,
                id_station: row.bigint(1)?,
                report: row.text(2)?.to_string(),
                coords: Coords::new(row.int(3)?, row.int(4)?),
                ident: row.opt_text(5)?.map(str::to_string),
                level: Level::new(row.int(6)?, row.int(7)?, row.int(8)?, row.int(9)?),
                trange: Trange::new(row.int(10)?, row.int(11)?, row.int(12)?),
                datetime: row.datetime(13)?,
                code: row.varcode(14)?,
                value: row.text(15)?.to_string(),
            })
        })
        .collect()
}

/// Delete the fact rows matched by a data query together with their
/// attributes. Returns the number of deleted fact rows.
pub async fn remove_data(tx: &mut dyn SqlTransaction, query: &DataQuery) -> ArchiveResult<u64> {
    let mut sql = "SELECT d.id FROM data d \
         JOIN station s ON s.id = d.id_station \
         JOIN repinfo r ON r.id = d.id_report \
         JOIN levtr lt ON lt.id = d.id_levtr"
        .to_string();
    let mut params = Vec::new();
    data_where(query, &mut sql, &mut params);

    let rows = tx.query(&sql, &params, &[ColTy::BigInt]).await?;
    let ids = rows
        .iter()
        .map(|row| row.bigint(0))
        .collect::<ArchiveResult<Vec<_>>>()?;

    let mut removed = 0u64;
    for chunk in ids.chunks(256) {
        let id_list = chunk
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        tx.execute(
            &format!("DELETE FROM attr WHERE id_data IN ({})", id_list),
            &[],
        )
        .await?;
        removed += tx
            .execute(&format!("DELETE FROM data WHERE id IN ({})", id_list), &[])
            .await?;
    }
    Ok(removed)
}

/// Filter for station dimension rows.
#[derive(Debug, Default, Clone)]
pub struct StationQuery {
    pub report: Option<String>,
    pub ident: Option<String>,
    pub lat_range: Option<(i32, i32)>,
    pub lon_range: Option<(i32, i32)>,
}

/// One station row with its report memo resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct StationResult {
    pub id: i64,
    pub report: String,
    pub coords: Coords,
    pub ident: Option<String>,
}

/// Run a station query, ordered by id.
pub async fn run_station_query(
    tx: &mut dyn SqlTransaction,
    query: &StationQuery,
) -> ArchiveResult<Vec<StationResult>> {
    let mut sql = "SELECT s.id, r.memo, s.lat, s.lon, s.ident \
         FROM station s JOIN repinfo r ON r.id = s.report"
        .to_string();
    let mut params = Vec::new();

    let mut clauses = Vec::new();
    if let Some(report) = &query.report {
        clauses.push("r.memo = ?".to_string());
        params.push(SqlVal::Text(report.clone()));
    }
    if let Some(ident) = &query.ident {
        clauses.push("s.ident = ?".to_string());
        params.push(SqlVal::Text(ident.clone()));
    }
    if let Some((min, max)) = query.lat_range {
        clauses.push("s.lat >= ? AND s.lat <= ?".to_string());
        params.push(SqlVal::Int(min));
        params.push(SqlVal::Int(max));
    }
    if let Some((min, max)) = query.lon_range {
        clauses.push("s.lon >= ? AND s.lon <= ?".to_string());
        params.push(SqlVal::Int(min));
        params.push(SqlVal::Int(max));
    }
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    sql.push_str(" ORDER BY s.id");

    let rows = tx
        .query(
            &sql,
            &params,
            &[
                ColTy::BigInt,
                ColTy::Text,
                ColTy::Int,
                ColTy::Int,
                ColTy::OptText,
            ],
        )
        .await?;
    rows.iter()
        .map(|row| {
            Ok(StationResult {
                id: row.bigint(0)?,
                report: row.text(1)?.to_string(),
                coords: Coords::new(row.int(2)?, row.int(3)?),
                ident: row.opt_text(4)?.map(str::to_string),
            })
        })
        .collect()
}

/// Station-constant values of one station.
pub async fn station_values(
    tx: &mut dyn SqlTransaction,
    id_station: i64,
) -> ArchiveResult<Vec<(i64, Varcode, String)>> {
    let rows = tx
        .query(
            "SELECT id, code, value FROM station_data WHERE id_station = ? ORDER BY code",
            &[SqlVal::BigInt(id_station)],
            &[ColTy::BigInt, ColTy::Int, ColTy::Text],
        )
        .await?;
    rows.iter()
        .map(|row| {
            Ok((
                row.bigint(0)?,
                row.varcode(1)?,
                row.text(2)?.to_string(),
            ))
        })
        .collect()
}

/// Attributes of one fact row, ordered by attribute code.
pub async fn attrs_for(
    tx: &mut dyn SqlTransaction,
    target: AttrTarget,
    id_data: i64,
) -> ArchiveResult<Vec<(Varcode, String)>> {
    let sql = format!(
        "SELECT type, value FROM {} WHERE id_data = ? ORDER BY type",
        target.table()
    );
    let rows = tx
        .query(&sql, &[SqlVal::BigInt(id_data)], &[ColTy::Int, ColTy::Text])
        .await?;
    rows.iter()
        .map(|row| Ok((row.varcode(0)?, row.text(1)?.to_string())))
        .collect()
}
