//! Archive transaction.
//!
//! Owns one dimension cache and one backend transaction. The resolvers and
//! reconcilers borrow both for the duration of each call; nothing outlives
//! the transaction. Dropping without commit rolls back.

use chrono::NaiveDateTime;
use obs_common::{ArchiveResult, Varcode};
use tracing::debug;

use crate::attr::{self, AttrBatch, AttrTarget};
use crate::bulk::UpdateMode;
use crate::connection::SqlTransaction;
use crate::data::{self, DataBatch, StationDataBatch};
use crate::query::{self, DataQuery, DataResult, StationQuery, StationResult};
use crate::repinfo::{self, RepinfoEntry};
use crate::state::{LevTrDesc, State, StationDesc};
use crate::{levtr, station};

/// Fact and attribute tables in delete order; repinfo is never touched.
const REMOVE_ALL_ORDER: &[&str] = &[
    "attr",
    "station_attr",
    "data",
    "station_data",
    "station",
    "levtr",
];

pub struct Transaction {
    tx: Box<dyn SqlTransaction>,
    state: State,
}

impl Transaction {
    pub(crate) fn new(tx: Box<dyn SqlTransaction>) -> Self {
        Self {
            tx,
            state: State::new(),
        }
    }

    /// Commit the backend transaction. The cache is discarded.
    pub async fn commit(self) -> ArchiveResult<()> {
        self.tx.commit().await
    }

    /// Roll back explicitly. Dropping the transaction has the same effect.
    pub async fn rollback(self) -> ArchiveResult<()> {
        self.tx.rollback().await
    }

    /// Drop the dimension cache without ending the transaction. Used when
    /// the database content changed underneath (e.g. after `remove_all`)
    /// and later resolutions must re-validate against the database.
    pub fn clear_cached_state(&mut self) {
        self.state.clear();
    }

    /// Empty all fact and dimension tables except repinfo.
    pub async fn remove_all(&mut self) -> ArchiveResult<()> {
        for table in REMOVE_ALL_ORDER {
            self.tx.execute(&format!("DELETE FROM {}", table), &[]).await?;
        }
        debug!("removed all archive data");
        self.state.clear();
        Ok(())
    }

    // === Dimension resolution ===

    /// Resolve a report memo to its repinfo id, failing if unknown.
    pub async fn get_report_id(&mut self, memo: &str) -> ArchiveResult<i64> {
        repinfo::get_id(&mut *self.tx, &mut self.state, memo).await
    }

    /// Resolve a report memo to its repinfo id, creating it if unknown.
    pub async fn obtain_report_id(&mut self, memo: &str) -> ArchiveResult<i64> {
        repinfo::obtain_id(&mut *self.tx, &mut self.state, memo).await
    }

    /// List all report networks.
    pub async fn report_entries(&mut self) -> ArchiveResult<Vec<RepinfoEntry>> {
        repinfo::all(&mut *self.tx).await
    }

    /// Resolve a station descriptor to its id, failing if absent.
    pub async fn get_station_id(&mut self, desc: &StationDesc) -> ArchiveResult<i64> {
        station::get_id(&mut *self.tx, &mut self.state, desc).await
    }

    /// Resolve a station descriptor to its id, creating the row if absent.
    pub async fn obtain_station_id(&mut self, desc: &StationDesc) -> ArchiveResult<i64> {
        station::obtain_id(&mut *self.tx, &mut self.state, desc).await
    }

    /// Reverse station lookup by id, transaction cache first.
    pub async fn station_by_id(&mut self, id: i64) -> ArchiveResult<StationDesc> {
        station::lookup(&mut *self.tx, &mut self.state, id).await
    }

    /// Resolve a level/time-range descriptor to its id, failing if absent.
    pub async fn get_levtr_id(&mut self, desc: &LevTrDesc) -> ArchiveResult<i64> {
        levtr::get_id(&mut *self.tx, &mut self.state, desc).await
    }

    /// Resolve a level/time-range descriptor, creating the row if absent.
    pub async fn obtain_levtr_id(&mut self, desc: &LevTrDesc) -> ArchiveResult<i64> {
        levtr::obtain_id(&mut *self.tx, &mut self.state, desc).await
    }

    /// Reverse levtr lookup by id, transaction cache first.
    pub async fn levtr_by_id(&mut self, id: i64) -> ArchiveResult<LevTrDesc> {
        levtr::lookup(&mut *self.tx, &mut self.state, id).await
    }

    // === Bulk reconciliation ===

    /// Reconcile a batch of timestamped values against the data table.
    pub async fn insert_data(
        &mut self,
        batch: &mut DataBatch,
        mode: UpdateMode,
    ) -> ArchiveResult<()> {
        data::reconcile(&mut *self.tx, batch, mode).await
    }

    /// Reconcile a batch of station-constant values.
    pub async fn insert_station_data(
        &mut self,
        batch: &mut StationDataBatch,
        mode: UpdateMode,
    ) -> ArchiveResult<()> {
        data::reconcile_station(&mut *self.tx, batch, mode).await
    }

    /// Reconcile a batch of quality-control attributes.
    pub async fn insert_attrs(
        &mut self,
        target: AttrTarget,
        batch: &mut AttrBatch,
        mode: UpdateMode,
    ) -> ArchiveResult<()> {
        attr::reconcile(&mut *self.tx, target, batch, mode).await
    }

    // === Queries ===

    pub async fn query_data(&mut self, query: &DataQuery) -> ArchiveResult<Vec<DataResult>> {
        query::run_data_query(&mut *self.tx, query).await
    }

    pub async fn query_stations(
        &mut self,
        query: &StationQuery,
    ) -> ArchiveResult<Vec<StationResult>> {
        query::run_station_query(&mut *self.tx, query).await
    }

    /// Station-constant values of one station.
    pub async fn query_station_values(
        &mut self,
        id_station: i64,
    ) -> ArchiveResult<Vec<(i64, Varcode, String)>> {
        query::station_values(&mut *self.tx, id_station).await
    }

    /// Attributes of one fact row.
    pub async fn attrs_for(
        &mut self,
        target: AttrTarget,
        id_data: i64,
    ) -> ArchiveResult<Vec<(Varcode, String)>> {
        query::attrs_for(&mut *self.tx, target, id_data).await
    }

    /// Delete the fact rows matched by a query, attributes included.
    pub async fn remove_data(&mut self, query: &DataQuery) -> ArchiveResult<u64> {
        query::remove_data(&mut *self.tx, query).await
    }

    /// Resolve the full dimension context of one observation message and
    /// return an empty [`DataBatch`] ready for its variables.
    pub async fn open_context(
        &mut self,
        memo: &str,
        coords: obs_common::Coords,
        ident: Option<String>,
        datetime: NaiveDateTime,
    ) -> ArchiveResult<DataBatch> {
        let id_report = self.obtain_report_id(memo).await?;
        let id_station = self
            .obtain_station_id(&StationDesc {
                report: id_report,
                coords,
                ident,
            })
            .await?;
        Ok(DataBatch::new(id_station, id_report, datetime))
    }
}
