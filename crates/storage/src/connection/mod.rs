//! SQL connection capability.
//!
//! The core never issues dialect-specific SQL: it writes parameterized
//! statements with `?` placeholders and leaves placeholder style, DDL
//! types, id-after-insert strategy and unique-violation detection to one
//! backend module per engine.

pub mod mysql;
pub mod postgres;
pub mod sqlite;

use async_trait::async_trait;
use chrono::NaiveDateTime;
use obs_common::{ArchiveError, ArchiveResult, Varcode};
use std::sync::Arc;

/// One bound parameter or decoded column value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlVal {
    Null,
    Int(i32),
    BigInt(i64),
    Text(String),
    DateTime(NaiveDateTime),
}

/// Expected column types for decoding a result row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColTy {
    Int,
    BigInt,
    Text,
    /// Nullable text column; NULL decodes to [`SqlVal::Null`].
    OptText,
    DateTime,
}

/// One decoded result row.
#[derive(Debug, Clone)]
pub struct SqlRow(pub Vec<SqlVal>);

impl SqlRow {
    fn col(&self, idx: usize) -> ArchiveResult<&SqlVal> {
        self.0.get(idx).ok_or_else(|| {
            ArchiveError::consistency(format!(
                "row has {} columns, column {} requested",
                self.0.len(),
                idx
            ))
        })
    }

    pub fn int(&self, idx: usize) -> ArchiveResult<i32> {
        match self.col(idx)? {
            SqlVal::Int(v) => Ok(*v),
            other => Err(shape_error(idx, "integer", other)),
        }
    }

    pub fn bigint(&self, idx: usize) -> ArchiveResult<i64> {
        match self.col(idx)? {
            SqlVal::BigInt(v) => Ok(*v),
            SqlVal::Int(v) => Ok(i64::from(*v)),
            other => Err(shape_error(idx, "bigint", other)),
        }
    }

    pub fn text(&self, idx: usize) -> ArchiveResult<&str> {
        match self.col(idx)? {
            SqlVal::Text(s) => Ok(s.as_str()),
            other => Err(shape_error(idx, "text", other)),
        }
    }

    pub fn opt_text(&self, idx: usize) -> ArchiveResult<Option<&str>> {
        match self.col(idx)? {
            SqlVal::Text(s) => Ok(Some(s.as_str())),
            SqlVal::Null => Ok(None),
            other => Err(shape_error(idx, "nullable text", other)),
        }
    }

    pub fn datetime(&self, idx: usize) -> ArchiveResult<NaiveDateTime> {
        match self.col(idx)? {
            SqlVal::DateTime(dt) => Ok(*dt),
            other => Err(shape_error(idx, "datetime", other)),
        }
    }

    /// Integer column holding a packed variable code. Values outside the
    /// 16-bit code space are a consistency error, never truncated.
    pub fn varcode(&self, idx: usize) -> ArchiveResult<Varcode> {
        let v = self.int(idx)?;
        u16::try_from(v).map(Varcode).map_err(|_| {
            ArchiveError::consistency(format!(
                "column {} holds {} which is not a valid variable code",
                idx, v
            ))
        })
    }
}

fn shape_error(idx: usize, expected: &str, got: &SqlVal) -> ArchiveError {
    ArchiveError::consistency(format!(
        "unexpected row shape: column {} should be {}, got {:?}",
        idx, expected, got
    ))
}

/// An open connection to one backend, usable outside a transaction and as
/// a factory for transactions.
#[async_trait]
pub trait SqlConnection: Send + Sync {
    /// URL scheme this backend was opened with, for diagnostics.
    fn scheme(&self) -> &'static str;

    /// Start a backend transaction.
    async fn begin(&self) -> ArchiveResult<Box<dyn SqlTransaction>>;

    /// Execute a statement outside any explicit transaction.
    async fn execute(&self, sql: &str, params: &[SqlVal]) -> ArchiveResult<u64>;

    /// Run a query outside any explicit transaction.
    async fn query(
        &self,
        sql: &str,
        params: &[SqlVal],
        shape: &[ColTy],
    ) -> ArchiveResult<Vec<SqlRow>>;

    /// Whether a table exists in the connected database.
    async fn has_table(&self, name: &str) -> ArchiveResult<bool>;

    /// Create all archive tables that do not exist yet.
    async fn ensure_schema(&self) -> ArchiveResult<()>;

    /// Drop all archive tables, settings included.
    async fn wipe_schema(&self) -> ArchiveResult<()>;

    /// Read a settings value. An absent settings table reads as `None`.
    async fn settings_get(&self, key: &str) -> ArchiveResult<Option<String>>;

    /// Write a settings value, creating the settings table on demand.
    async fn settings_set(&self, key: &str, value: &str) -> ArchiveResult<()>;
}

/// An open backend transaction. Dropping without commit rolls back.
#[async_trait]
pub trait SqlTransaction: Send {
    async fn execute(&mut self, sql: &str, params: &[SqlVal]) -> ArchiveResult<u64>;

    async fn query(
        &mut self,
        sql: &str,
        params: &[SqlVal],
        shape: &[ColTy],
    ) -> ArchiveResult<Vec<SqlRow>>;

    /// Run an INSERT and return the id of the new row, using whichever
    /// primitive the backend offers (`RETURNING` or `last_insert_id`).
    async fn insert_returning_id(&mut self, sql: &str, params: &[SqlVal]) -> ArchiveResult<i64>;

    async fn commit(self: Box<Self>) -> ArchiveResult<()>;

    async fn rollback(self: Box<Self>) -> ArchiveResult<()>;
}

/// Archive tables in drop order (dependents first).
pub(crate) const TABLES_DROP_ORDER: &[&str] = &[
    "attr",
    "station_attr",
    "data",
    "station_data",
    "station",
    "levtr",
    "repinfo",
    "dballe_settings",
];

/// Open a connection, selecting the backend from the URL scheme.
///
/// Supported: `sqlite:`, `postgresql:`/`postgres:`, `mysql:`. `odbc:` is
/// recognised but not implemented.
pub async fn connect(url: &str) -> ArchiveResult<Arc<dyn SqlConnection>> {
    let scheme = url.split(':').next().unwrap_or("");
    match scheme {
        "sqlite" => Ok(Arc::new(sqlite::SqliteBackend::connect(url).await?)),
        "postgresql" | "postgres" => Ok(Arc::new(postgres::PgBackend::connect(url).await?)),
        "mysql" => Ok(Arc::new(mysql::MySqlBackend::connect(url).await?)),
        "odbc" => Err(ArchiveError::Unimplemented(
            "ODBC connections are not available in this build".to_string(),
        )),
        _ => Err(ArchiveError::Invalid(format!(
            "unrecognised connection URL: {:?}",
            url
        ))),
    }
}

/// Map an sqlx failure to the archive taxonomy, keeping the statement text.
pub(crate) fn map_sqlx_err(statement: &str, err: sqlx::Error) -> ArchiveError {
    if let sqlx::Error::Database(ref db) = err {
        if db.is_unique_violation() {
            return ArchiveError::DuplicateKey {
                statement: statement.to_string(),
                message: db.message().to_string(),
            };
        }
    }
    ArchiveError::Backend {
        statement: statement.to_string(),
        message: err.to_string(),
    }
}
