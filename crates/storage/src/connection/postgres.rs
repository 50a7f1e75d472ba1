//! PostgreSQL backend.
//!
//! Rewrites the core's `?` placeholders to `$n` and uses `RETURNING id`
//! for id-after-insert.

use async_trait::async_trait;
use obs_common::{ArchiveError, ArchiveResult};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::debug;

use super::{map_sqlx_err, ColTy, SqlConnection, SqlRow, SqlTransaction, SqlVal, TABLES_DROP_ORDER};

/// Archive schema in PostgreSQL dialect.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS repinfo (
    id BIGSERIAL PRIMARY KEY,
    memo TEXT NOT NULL,
    description TEXT NOT NULL,
    prio INTEGER NOT NULL,
    UNIQUE(memo)
);

CREATE TABLE IF NOT EXISTS station (
    id BIGSERIAL PRIMARY KEY,
    report BIGINT NOT NULL REFERENCES repinfo(id),
    lat INTEGER NOT NULL,
    lon INTEGER NOT NULL,
    ident TEXT,
    UNIQUE(report, lat, lon, ident)
);

CREATE INDEX IF NOT EXISTS idx_station_coords ON station(lat, lon);

CREATE TABLE IF NOT EXISTS levtr (
    id BIGSERIAL PRIMARY KEY,
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
    id BIGSERIAL PRIMARY KEY,
    id_station BIGINT NOT NULL REFERENCES station(id),
    code INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(id_station, code)
);

CREATE TABLE IF NOT EXISTS data (
    id BIGSERIAL PRIMARY KEY,
    id_station BIGINT NOT NULL REFERENCES station(id),
    id_report BIGINT NOT NULL REFERENCES repinfo(id),
    id_levtr BIGINT NOT NULL REFERENCES levtr(id),
    datetime TIMESTAMP NOT NULL,
    id_var INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(id_station, datetime, id_levtr, id_report, id_var)
);

CREATE INDEX IF NOT EXISTS idx_data_context ON data(id_station, id_report, datetime);

CREATE TABLE IF NOT EXISTS attr (
    id_data BIGINT NOT NULL REFERENCES data(id),
    type INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(id_data, type)
);

CREATE TABLE IF NOT EXISTS station_attr (
    id_data BIGINT NOT NULL REFERENCES station_data(id),
    type INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE(id_data, type)
)
"#;

const SETTINGS_DDL: &str =
    "CREATE TABLE IF NOT EXISTS dballe_settings (key TEXT PRIMARY KEY, value TEXT NOT NULL)";

/// Rewrite `?` placeholders to PostgreSQL's `$1`, `$2`, ...
///
/// Core SQL never contains a literal question mark, so a plain character
/// scan is sufficient.
pub(crate) fn numbered_placeholders(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len() + 8);
    let mut n = 0u32;
    for ch in sql.chars() {
        if ch == '?' {
            n += 1;
            out.push('$');
            out.push_str(&n.to_string());
        } else {
            out.push(ch);
        }
    }
    out
}

pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub async fn connect(url: &str) -> ArchiveResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_err(url, e))?;
        debug!("opened postgresql archive");
        Ok(Self { pool })
    }
}

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

fn bind_vals<'q>(mut q: PgQuery<'q>, params: &'q [SqlVal]) -> PgQuery<'q> {
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

fn decode_row(row: &PgRow, shape: &[ColTy]) -> ArchiveResult<SqlRow> {
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

fn get<'r, T>(row: &'r PgRow, idx: usize) -> ArchiveResult<T>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get::<T, _>(idx)
        .map_err(|e| ArchiveError::consistency(format!("unexpected row shape at column {}: {}", idx, e)))
}

#[async_trait]
impl SqlConnection for PgBackend {
    fn scheme(&self) -> &'static str {
        "postgresql"
    }

    async fn begin(&self) -> ArchiveResult<Box<dyn SqlTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("BEGIN", e))?;
        Ok(Box::new(PgTx { tx }))
    }

    async fn execute(&self, sql: &str, params: &[SqlVal]) -> ArchiveResult<u64> {
        let stmt = numbered_placeholders(sql);
        let res = bind_vals(sqlx::query(&stmt), params)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(&stmt, e))?;
        Ok(res.rows_affected())
    }

    async fn query(
        &self,
        sql: &str,
        params: &[SqlVal],
        shape: &[ColTy],
    ) -> ArchiveResult<Vec<SqlRow>> {
        let stmt = numbered_placeholders(sql);
        let rows = bind_vals(sqlx::query(&stmt), params)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(&stmt, e))?;
        rows.iter().map(|r| decode_row(r, shape)).collect()
    }

    async fn has_table(&self, name: &str) -> ArchiveResult<bool> {
        let sql = "SELECT EXISTS(SELECT 1 FROM information_schema.tables \
                   WHERE table_schema = current_schema() AND table_name = $1)";
        let exists: bool = sqlx::query_scalar(sql)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_sqlx_err(sql, e))?;
        Ok(exists)
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
        let rows = self
            .query(
                "SELECT value FROM dballe_settings WHERE key = ?",
                &[SqlVal::Text(key.to_string())],
                &[ColTy::Text],
            )
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
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            &[
                SqlVal::Text(key.to_string()),
                SqlVal::Text(value.to_string()),
            ],
        )
        .await?;
        Ok(())
    }
}

struct PgTx {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

#[async_trait]
impl SqlTransaction for PgTx {
    async fn execute(&mut self, sql: &str, params: &[SqlVal]) -> ArchiveResult<u64> {
        let stmt = numbered_placeholders(sql);
        let res = bind_vals(sqlx::query(&stmt), params)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_err(&stmt, e))?;
        Ok(res.rows_affected())
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[SqlVal],
        shape: &[ColTy],
    ) -> ArchiveResult<Vec<SqlRow>> {
        let stmt = numbered_placeholders(sql);
        let rows = bind_vals(sqlx::query(&stmt), params)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_err(&stmt, e))?;
        rows.iter().map(|r| decode_row(r, shape)).collect()
    }

    async fn insert_returning_id(&mut self, sql: &str, params: &[SqlVal]) -> ArchiveResult<i64> {
        // A failed statement aborts the whole PostgreSQL transaction, so
        // the INSERT runs under a savepoint: on a unique violation the
        // savepoint is rolled back and the transaction stays usable for
        // the resolvers' re-SELECT.
        sqlx::query("SAVEPOINT insert_row")
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_err("SAVEPOINT insert_row", e))?;

        let stmt = format!("{} RETURNING id", numbered_placeholders(sql));
        match bind_vals(sqlx::query(&stmt), params)
            .fetch_one(&mut *self.tx)
            .await
        {
            Ok(row) => {
                sqlx::query("RELEASE SAVEPOINT insert_row")
                    .execute(&mut *self.tx)
                    .await
                    .map_err(|e| map_sqlx_err("RELEASE SAVEPOINT insert_row", e))?;
                get(&row, 0)
            }
            Err(err) => {
                let mapped = map_sqlx_err(&stmt, err);
                sqlx::query("ROLLBACK TO SAVEPOINT insert_row")
                    .execute(&mut *self.tx)
                    .await
                    .map_err(|e| map_sqlx_err("ROLLBACK TO SAVEPOINT insert_row", e))?;
                Err(mapped)
            }
        }
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_rewrite() {
        assert_eq!(
            numbered_placeholders("SELECT id FROM station WHERE report = ? AND lat = ?"),
            "SELECT id FROM station WHERE report = $1 AND lat = $2"
        );
        assert_eq!(numbered_placeholders("SELECT 1"), "SELECT 1");
    }

    #[test]
    fn test_placeholder_rewrite_is_position_correct() {
        let sql = numbered_placeholders("INSERT INTO t (a, b, c) VALUES (?, ?, ?)");
        assert_eq!(sql, "INSERT INTO t (a, b, c) VALUES ($1, $2, $3)");
    }
}
