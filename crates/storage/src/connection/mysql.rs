//! MySQL backend.
//!
//! Uses native `?` placeholders and `last_insert_id()` for
//! id-after-insert. Columns that participate in unique indexes are
//! `VARCHAR` because MySQL cannot index unbounded `TEXT`.

use async_trait::async_trait;
use obs_common::{ArchiveError, ArchiveResult};
use sqlx::mysql::{MySqlPoolOptions, MySqlRow};
use sqlx::{MySqlPool, Row};
use tracing::debug;

use super::{map_sqlx_err, ColTy, SqlConnection, SqlRow, SqlTransaction, SqlVal, TABLES_DROP_ORDER};

/// Archive schema in MySQL dialect.
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS repinfo (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    memo VARCHAR(30) NOT NULL,
    description VARCHAR(255) NOT NULL,
    prio INTEGER NOT NULL,
    UNIQUE INDEX (memo)
);

CREATE TABLE IF NOT EXISTS station (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    report BIGINT NOT NULL,
    lat INTEGER NOT NULL,
    lon INTEGER NOT NULL,
    ident VARCHAR(64),
    UNIQUE INDEX (report, lat, lon, ident),
    INDEX (lat, lon),
    FOREIGN KEY (report) REFERENCES repinfo(id)
);

CREATE TABLE IF NOT EXISTS levtr (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    ltype1 INTEGER NOT NULL,
    l1 INTEGER NOT NULL,
    ltype2 INTEGER NOT NULL,
    l2 INTEGER NOT NULL,
    pind INTEGER NOT NULL,
    p1 INTEGER NOT NULL,
    p2 INTEGER NOT NULL,
    UNIQUE INDEX (ltype1, l1, ltype2, l2, pind, p1, p2)
);

CREATE TABLE IF NOT EXISTS station_data (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    id_station BIGINT NOT NULL,
    code INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE INDEX (id_station, code),
    FOREIGN KEY (id_station) REFERENCES station(id)
);

CREATE TABLE IF NOT EXISTS data (
    id BIGINT NOT NULL AUTO_INCREMENT PRIMARY KEY,
    id_station BIGINT NOT NULL,
    id_report BIGINT NOT NULL,
    id_levtr BIGINT NOT NULL,
    datetime DATETIME(6) NOT NULL,
    id_var INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE INDEX (id_station, datetime, id_levtr, id_report, id_var),
    INDEX (id_station, id_report, datetime),
    FOREIGN KEY (id_station) REFERENCES station(id),
    FOREIGN KEY (id_report) REFERENCES repinfo(id),
    FOREIGN KEY (id_levtr) REFERENCES levtr(id)
);

CREATE TABLE IF NOT EXISTS attr (
    id_data BIGINT NOT NULL,
    type INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE INDEX (id_data, type),
    FOREIGN KEY (id_data) REFERENCES data(id)
);

CREATE TABLE IF NOT EXISTS station_attr (
    id_data BIGINT NOT NULL,
    type INTEGER NOT NULL,
    value TEXT NOT NULL,
    UNIQUE INDEX (id_data, type),
    FOREIGN KEY (id_data) REFERENCES station_data(id)
)
"#;

const SETTINGS_DDL: &str = "CREATE TABLE IF NOT EXISTS dballe_settings \
    (`key` VARCHAR(64) NOT NULL PRIMARY KEY, value TEXT NOT NULL)";

pub struct MySqlBackend {
    pool: MySqlPool,
}

impl MySqlBackend {
    pub async fn connect(url: &str) -> ArchiveResult<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| map_sqlx_err(url, e))?;
        debug!("opened mysql archive");
        Ok(Self { pool })
    }
}

type MySqlQuery<'q> = sqlx::query::Query<'q, sqlx::MySql, sqlx::mysql::MySqlArguments>;

fn bind_vals<'q>(mut q: MySqlQuery<'q>, params: &'q [SqlVal]) -> MySqlQuery<'q> {
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

fn decode_row(row: &MySqlRow, shape: &[ColTy]) -> ArchiveResult<SqlRow> {
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

fn get<'r, T>(row: &'r MySqlRow, idx: usize) -> ArchiveResult<T>
where
    T: sqlx::Decode<'r, sqlx::MySql> + sqlx::Type<sqlx::MySql>,
{
    row.try_get::<T, _>(idx)
        .map_err(|e| ArchiveError::consistency(format!("unexpected row shape at column {}: {}", idx, e)))
}

#[async_trait]
impl SqlConnection for MySqlBackend {
    fn scheme(&self) -> &'static str {
        "mysql"
    }

    async fn begin(&self) -> ArchiveResult<Box<dyn SqlTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_err("BEGIN", e))?;
        Ok(Box::new(MySqlTx { tx }))
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
        let sql = "SELECT COUNT(*) FROM information_schema.tables \
                   WHERE table_schema = DATABASE() AND table_name = ?";
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
        let rows = self
            .query(
                "SELECT value FROM dballe_settings WHERE `key` = ?",
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
            "INSERT INTO dballe_settings (`key`, value) VALUES (?, ?) \
             ON DUPLICATE KEY UPDATE value = VALUES(value)",
            &[
                SqlVal::Text(key.to_string()),
                SqlVal::Text(value.to_string()),
            ],
        )
        .await?;
        Ok(())
    }
}

struct MySqlTx {
    tx: sqlx::Transaction<'static, sqlx::MySql>,
}

#[async_trait]
impl SqlTransaction for MySqlTx {
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
        let res = bind_vals(sqlx::query(sql), params)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_err(sql, e))?;
        let id = res.last_insert_id();
        if id == 0 {
            return Err(ArchiveError::consistency(format!(
                "no autoincrement id produced by `{}`",
                sql
            )));
        }
        Ok(id as i64)
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
