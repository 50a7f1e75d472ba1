//! Archive facade.
//!
//! Owns the backend connection, manages schema lifecycle and hands out
//! transactions. All data access goes through [`crate::Transaction`].

use std::sync::Arc;

use obs_common::{ArchiveError, ArchiveResult};
use tracing::info;

use crate::connection::{self, ColTy, SqlConnection, SqlVal};
use crate::repinfo;
use crate::transaction::Transaction;

/// Version of the table layout this build reads and writes.
pub const SCHEMA_VERSION: &str = "7";

const SETTING_SCHEMA_VERSION: &str = "schema_version";

#[derive(Clone)]
pub struct Archive {
    conn: Arc<dyn SqlConnection>,
}

impl Archive {
    /// Open an archive from a connection URL without touching the schema.
    pub async fn connect(url: &str) -> ArchiveResult<Self> {
        let conn = connection::connect(url).await?;
        Ok(Self { conn })
    }

    pub fn from_connection(conn: Arc<dyn SqlConnection>) -> Self {
        Self { conn }
    }

    /// Create any missing tables, seed the default report networks into an
    /// empty repinfo table and stamp the schema version. Safe to call on an
    /// archive that is already initialised.
    pub async fn init(&self) -> ArchiveResult<()> {
        self.conn.ensure_schema().await?;

        let rows = self
            .conn
            .query("SELECT COUNT(*) FROM repinfo", &[], &[ColTy::BigInt])
            .await?;
        if rows.first().map(|r| r.bigint(0)).transpose()?.unwrap_or(0) == 0 {
            for (memo, description, prio) in repinfo::default_entries() {
                self.conn
                    .execute(
                        "INSERT INTO repinfo (memo, description, prio) VALUES (?, ?, ?)",
                        &[
                            SqlVal::Text(memo.to_string()),
                            SqlVal::Text(description.to_string()),
                            SqlVal::Int(*prio),
                        ],
                    )
                    .await?;
            }
            info!(
                networks = repinfo::default_entries().len(),
                "seeded default report networks"
            );
        }

        self.conn
            .settings_set(SETTING_SCHEMA_VERSION, SCHEMA_VERSION)
            .await?;
        Ok(())
    }

    /// Stored schema version, if the archive has been initialised.
    pub async fn schema_version(&self) -> ArchiveResult<Option<String>> {
        self.conn.settings_get(SETTING_SCHEMA_VERSION).await
    }

    /// Fail unless the stored schema version matches this build.
    pub async fn check_schema(&self) -> ArchiveResult<()> {
        match self.schema_version().await? {
            Some(v) if v == SCHEMA_VERSION => Ok(()),
            Some(v) => Err(ArchiveError::consistency(format!(
                "archive has schema version {:?}, this build requires {:?}",
                v, SCHEMA_VERSION
            ))),
            None => Err(ArchiveError::consistency(
                "archive is not initialised".to_string(),
            )),
        }
    }

    /// Drop every archive table and re-initialise from scratch.
    pub async fn reset(&self) -> ArchiveResult<()> {
        self.conn.wipe_schema().await?;
        self.init().await
    }

    /// Start a transaction with a fresh dimension cache.
    pub async fn transaction(&self) -> ArchiveResult<Transaction> {
        Ok(Transaction::new(self.conn.begin().await?))
    }

    pub fn connection(&self) -> &Arc<dyn SqlConnection> {
        &self.conn
    }
}
