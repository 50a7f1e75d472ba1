//! Transaction-scoped dimension cache.
//!
//! Pure in-memory maps from descriptor to resolved row id; no I/O. One
//! `State` lives inside each [`Transaction`](crate::Transaction) and is
//! discarded at commit/rollback.

use obs_common::{ArchiveError, ArchiveResult, Coords, Level, Trange};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Candidate (not yet resolved) form of a station dimension row, compared
/// by value and used as the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StationDesc {
    /// Resolved repinfo id of the report network.
    pub report: i64,
    pub coords: Coords,
    /// Mobile station identifier; `None` means fixed station and is a
    /// distinct uniqueness group from any non-null ident.
    pub ident: Option<String>,
}

impl fmt::Display for StationDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.ident {
            Some(ident) => write!(f, "report {} at {} ident {:?}", self.report, self.coords, ident),
            None => write!(f, "report {} at {}", self.report, self.coords),
        }
    }
}

/// Candidate form of a level/time-range dimension row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LevTrDesc {
    pub level: Level,
    pub trange: Trange,
}

impl fmt::Display for LevTrDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "level {} trange {}", self.level, self.trange)
    }
}

/// A resolved cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub id: i64,
    /// Whether the row was created in the current transaction. Decides if
    /// station/level metadata must still be written in full.
    pub is_new: bool,
}

/// The dimension cache: descriptor → (id, is_new) for stations and
/// level/time-range entries, with reverse id → descriptor indexes, plus
/// the memo → repinfo id map.
#[derive(Debug, Default)]
pub struct State {
    stations: HashMap<StationDesc, Entry>,
    stations_by_id: HashMap<i64, StationDesc>,
    levtrs: HashMap<LevTrDesc, Entry>,
    levtrs_by_id: HashMap<i64, LevTrDesc>,
    reports: HashMap<String, i64>,
}

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a resolved station. Re-adding the same descriptor refreshes
    /// the entry; an id already cached with a different descriptor is a
    /// consistency violation.
    pub fn add_station(&mut self, desc: StationDesc, entry: Entry) -> ArchiveResult<i64> {
        if let Some(existing) = self.stations_by_id.get(&entry.id) {
            if *existing != desc {
                return Err(ArchiveError::consistency(format!(
                    "station id {} cached as ({}) but resolved again as ({})",
                    entry.id, existing, desc
                )));
            }
        }
        self.stations_by_id.insert(entry.id, desc.clone());
        self.stations.insert(desc, entry);
        Ok(entry.id)
    }

    pub fn find_station(&self, desc: &StationDesc) -> Option<Entry> {
        self.stations.get(desc).copied()
    }

    pub fn station_by_id(&self, id: i64) -> Option<&StationDesc> {
        self.stations_by_id.get(&id)
    }

    /// Record a resolved level/time-range entry, with the same id
    /// collision rule as stations.
    pub fn add_levtr(&mut self, desc: LevTrDesc, entry: Entry) -> ArchiveResult<i64> {
        if let Some(existing) = self.levtrs_by_id.get(&entry.id) {
            if *existing != desc {
                return Err(ArchiveError::consistency(format!(
                    "levtr id {} cached as ({}) but resolved again as ({})",
                    entry.id, existing, desc
                )));
            }
        }
        self.levtrs_by_id.insert(entry.id, desc);
        self.levtrs.insert(desc, entry);
        Ok(entry.id)
    }

    pub fn find_levtr(&self, desc: &LevTrDesc) -> Option<Entry> {
        self.levtrs.get(desc).copied()
    }

    pub fn levtr_by_id(&self, id: i64) -> Option<&LevTrDesc> {
        self.levtrs_by_id.get(&id)
    }

    pub fn add_report(&mut self, memo: &str, id: i64) {
        self.reports.insert(memo.to_string(), id);
    }

    pub fn find_report(&self, memo: &str) -> Option<i64> {
        self.reports.get(memo).copied()
    }

    /// Drop everything learned so far. Subsequent resolutions re-derive
    /// ids and `is_new` flags from the database.
    pub fn clear(&mut self) {
        self.stations.clear();
        self.stations_by_id.clear();
        self.levtrs.clear();
        self.levtrs_by_id.clear();
        self.reports.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obs_common::{Coords, Level, Trange};

    fn desc(lat: f64) -> StationDesc {
        StationDesc {
            report: 1,
            coords: Coords::from_degrees(lat, 11.0),
            ident: None,
        }
    }

    #[test]
    fn test_station_round_trip() {
        let mut state = State::new();
        let d = desc(44.0);
        state
            .add_station(d.clone(), Entry { id: 7, is_new: true })
            .unwrap();
        assert_eq!(state.find_station(&d), Some(Entry { id: 7, is_new: true }));
        assert_eq!(state.station_by_id(7), Some(&d));
        assert_eq!(state.find_station(&desc(45.0)), None);
    }

    #[test]
    fn test_ident_is_part_of_the_key() {
        let mut state = State::new();
        let fixed = desc(44.0);
        let mobile = StationDesc {
            ident: Some("WMO123".to_string()),
            ..fixed.clone()
        };
        state
            .add_station(fixed.clone(), Entry { id: 1, is_new: false })
            .unwrap();
        state
            .add_station(mobile.clone(), Entry { id: 2, is_new: false })
            .unwrap();
        assert_eq!(state.find_station(&fixed).unwrap().id, 1);
        assert_eq!(state.find_station(&mobile).unwrap().id, 2);
    }

    #[test]
    fn test_id_collision_is_consistency_error() {
        let mut state = State::new();
        state
            .add_station(desc(44.0), Entry { id: 7, is_new: false })
            .unwrap();
        let err = state
            .add_station(desc(45.0), Entry { id: 7, is_new: false })
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Consistency(_)));
    }

    #[test]
    fn test_levtr_round_trip_and_clear() {
        let mut state = State::new();
        let d = LevTrDesc {
            level: Level::single(103, 2000),
            trange: Trange::instant(),
        };
        state.add_levtr(d, Entry { id: 3, is_new: true }).unwrap();
        state.add_report("synop", 1);
        assert_eq!(state.find_levtr(&d).unwrap().id, 3);
        assert_eq!(state.levtr_by_id(3), Some(&d));
        assert_eq!(state.find_report("synop"), Some(1));

        state.clear();
        assert_eq!(state.find_levtr(&d), None);
        assert_eq!(state.levtr_by_id(3), None);
        assert_eq!(state.find_report("synop"), None);
    }
}
