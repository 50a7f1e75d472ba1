//! Storage core for the observation archive.
//!
//! Provides the schema-versioned SQL abstraction behind the archive:
//! - connection capability with one backend module per engine
//!   (SQLite, PostgreSQL, MySQL)
//! - transaction-scoped dimension cache and id resolvers for stations,
//!   level/time-range descriptors and report networks
//! - bulk value/attribute reconciliation with configurable conflict policy
//! - thin filter/cursor query layer

pub mod archive;
pub mod attr;
pub mod bulk;
pub mod connection;
pub mod data;
pub mod levtr;
pub mod query;
pub mod repinfo;
pub mod state;
pub mod station;
pub mod transaction;

pub use archive::Archive;
pub use attr::{AttrBatch, AttrKey, AttrTarget};
pub use bulk::{Item, UpdateMode};
pub use connection::{connect, ColTy, SqlConnection, SqlRow, SqlTransaction, SqlVal};
pub use data::{DataBatch, DataKey, StationDataBatch};
pub use query::{DataQuery, DataResult, StationQuery, StationResult};
pub use state::{LevTrDesc, State, StationDesc};
pub use transaction::Transaction;
