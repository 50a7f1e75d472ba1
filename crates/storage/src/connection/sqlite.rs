//! SQLite backend.

use async_trait::async_trait;
use obs_common::{ArchiveError, ArchiveResult};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::debug;

use super::{map_sqlx_err, ColTy, SqlConnection, SqlRow, SqlTransaction, SqlVal, TABLES_DROP_ORDER};

/// Archive schema in SQLite dialect.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS repinfo (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    memo TEXT NOT NULL,
    description TEXT NOT NULL,
    prio INTEGER NOT NULL,
    UNIQUE(memo)
);

CREATE TABLE IF NOT EXISTS station (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    report INTEGER NOT NULL REFERENCES repinfo(id),
    lat INTEGER NOT NULL,
    lon INTEGER NOT NULL,
    ident TEXT,
    UNIQUE(report, lat, lon, ident)
);

CREATE INDEX IF NOT EXISTS idx_station_coords ON station(lat, lon);

CREATE TABLE IF NOT EXISTS levtr (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ltype1 INTEGER NOT NULL,
    l1 INTEGER NOT NULL,
    ltype2 INTEGER NOT NULL,
    l2 INTEGER NOT NULL,
    pind INTEGER NOT NULL,
    p1 INTEGER NOT NULL,
    p2 INTEGER NOT NULL,
    UNIQUE(ltype1, l1, ltype2, l2, pind, p1, p2)
);

CREATE TABLE IF NOT EXISTS station_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    id_station INTEGER NOT NULL REFERENCES station(id),
    code INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(id_station, code)
);

CREATE TABLE IF NOT EXISTS data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    id_station INTEGER NOT NULL REFERENCES station(id),
    id_report INTEGER NOT NULL REFERENCES repinfo(id),
    id_levtr INTEGER NOT NULL REFERENCES levtr(id),
    datetime DATETIME NOT NULL,
    id_var INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(id_station, datetime, id_levtr, id_report, id_var)
);

CREATE INDEX IF NOT EXISTS idx_data_context ON data(id_station, id_report, datetime);

CREATE TABLE IF NOT EXISTS attr (
    id_data INTEGER NOT NULL REFERENCES data(id),
    type INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(id_data, type)
);

CREATE TABLE IF NOT EXISTS station_attr (
    id_data INTEGER NOT NULL REFERENCES station_data(id),
    type INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(id_data, type)
)
"#;

const SETTINGS_DDL: &str =
    "CREATE TABLE IF NOT EXISTS dballe_settings (key TEXT PRIMARY KEY, value TEXT NOT NULL)";

pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Open a pool on `sqlite://path` or `sqlite::memory:`, creating the
    /// database file if missing.
    pub async fn connect(url: &str) -> ArchiveResult<Self> {
        let opts = SqliteConnectOptions::from_str(url)
            .map_err(|e| map_sqlx_err(url, e))?
            .create_if_missing(true);

        // An in-memory database exists per connection: the pool must be a
        // single connection or every acquire would see an empty database.
        let memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool = SqlitePoolOptions::new()
            .max_connections(if memory { 1 } else { 5 })
            .min_connections(if memory { 1 } else { 0 })
            .connect_with(opts)
            .await
            .map_err(|e| map_sqlx_err(url, e))?;

        debug!(url, "opened sqlite archive");
        Ok(Self { pool })
    }
}

type SqliteQuery<'q> = sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;

fn bind_vals<'q>(mut q: SqliteQuery<'q>, params: &'q [SqlVal]) -> SqliteQuery<'q> {
    for p in params {
        q = match p {
            SqlVal::Null => q.bind(None::<String>),
            SqlVal::Int(v) => q.bind(*v),
            SqlVal::BigInt(v) => q.bind(*v),
            SqlVal::Text(s) => q.bind(s.as_str()),
            SqlVal::DateTime(dt) => q.bind(*dt),
        };
    }
    q
}

fn decode_row(row: &SqliteRow, shape: &[ColTy]) -> ArchiveResult<SqlRow> {
    let mut out = Vec::with_capacity(shape.len());
    for (idx, ty) in shape.iter().enumerate() {
        let val = match ty {
            ColTy::Int => SqlVal::Int(get(row, idx)?),
            ColTy::BigInt => SqlVal::BigInt(get(row, idx)?),
            ColTy::Text => SqlVal::Text(get(row, idx)?),
            ColTy::OptText => match get::<Option<String>>(row, idx)? {
                Some(s) => SqlVal::Text(s),
                None => SqlVal::Null,
            },
            ColTy::DateTime => SqlVal::DateTime(get(row, idx)?),
        };
        out.push(val);
    }
    Ok(SqlRow(out))
}

fn get<'r, T>(row: &'r SqliteRow, idx: usize) -> ArchiveResult<T>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get::<T, _>(idx)
        .map_err(|e| ArchiveError::consistency(format!("unexpected row shape at column {}: {}", idx, e)))
}

#[async_trait]
impl SqlConnection for SqliteBackend {
    fn scheme(&self) -> &'static str {
        "sqlite"
    }

    async fn begin(&self) -> ArchiveResult<Box<dyn SqlTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("BEGIN", e))?;
        Ok(Box::new(SqliteTx { tx }))
    }

    async fn execute(&self, sql: &str, params: &[SqlVal]) -> ArchiveResult<u64> {
        let res = bind_vals(sqlx::query(sql), params)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(sql, e))?;
        Ok(res.rows_affected())
    }

    async fn query(
        &self,
        sql: &str,
        params: &[SqlVal],
        shape: &[ColTy],
    ) -> ArchiveResult<Vec<SqlRow>> {
        let rows = bind_vals(sqlx::query(sql), params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(sql, e))?;
        rows.iter().map(|r| decode_row(r, shape)).collect()
    }

    async fn has_table(&self, name: &str) -> ArchiveResult<bool> {
        let sql = "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?";
        let count: i64 = sqlx::query_scalar(sql)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(sql, e))?;
        Ok(count > 0)
    }

    async fn ensure_schema(&self) -> ArchiveResult<()> {
        for statement in SCHEMA_SQL.split(';') {
            let trimmed = statement.trim();
            if !trimmed.is_empty() {
                self.execute(trimmed, &[]).await?;
            }
        }
        Ok(())
    }

    async fn wipe_schema(&self) -> ArchiveResult<()> {
        for table in TABLES_DROP_ORDER {
            self.execute(&format!("DROP TABLE IF EXISTS {}", table), &[])
                .await?;
        }
        Ok(())
    }

    async fn settings_get(&self, key: &str) -> ArchiveResult<Option<String>> {
        if !self.has_table("dballe_settings").await? {
            return Ok(None);
        }
        let sql = "SELECT value FROM dballe_settings WHERE key = ?";
        let rows = self
            .query(sql, &[SqlVal::Text(key.to_string())], &[ColTy::Text])
            .await?;
        match rows.first() {
            Some(row) => Ok(Some(row.text(0)?.to_string())),
            None => Ok(None),
        }
    }

    async fn settings_set(&self, key: &str, value: &str) -> ArchiveResult<()> {
        self.execute(SETTINGS_DDL, &[]).await?;
        self.execute(
            "INSERT INTO dballe_settings (key, value) VALUES (?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            &[
                SqlVal::Text(key.to_string()),
                SqlVal::Text(value.to_string()),
            ],
        )
        .await?;
        Ok(())
    }
}

struct SqliteTx {
    tx: sqlx::Transaction<'static, sqlx::Sqlite>,
}

#[async_trait]
impl SqlTransaction for SqliteTx {
    async fn execute(&mut self, sql: &str, params: &[SqlVal]) -> ArchiveResult<u64> {
        let res = bind_vals(sqlx::query(sql), params)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_err(sql, e))?;
        Ok(res.rows_affected())
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[SqlVal],
        shape: &[ColTy],
    ) -> ArchiveResult<Vec<SqlRow>> {
        let rows = bind_vals(sqlx::query(sql), params)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_err(sql, e))?;
        rows.iter().map(|r| decode_row(r, shape)).collect()
    }

    async fn insert_returning_id(&mut self, sql: &str, params: &[SqlVal]) -> ArchiveResult<i64> {
        let stmt = format!("{} RETURNING id", sql);
        let row = bind_vals(sqlx::query(&stmt), params)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_err(&stmt, e))?;
        get(&row, 0)
    }

    async fn commit(self: Box<Self>) -> ArchiveResult<()> {
        self.tx.commit().await.map_err(|e| map_sqlx_err("COMMIT", e))
    }

    async fn rollback(self: Box<Self>) -> ArchiveResult<()> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_err("ROLLBACK", e))
    }
}
