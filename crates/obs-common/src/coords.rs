//! Station coordinates stored as scaled integers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Scale factor between degrees and the stored integer representation.
const SCALE: f64 = 100_000.0;

/// A latitude/longitude pair stored as integer hundred-thousandths of a
/// degree, matching the database representation exactly so coordinate
/// comparisons are never subject to floating point rounding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Coords {
    /// Latitude in 1/100000 of a degree, positive north.
    pub lat: i32,
    /// Longitude in 1/100000 of a degree, normalised to [-180.0, 180.0).
    pub lon: i32,
}

impl Coords {
    /// Create from scaled integer values. Longitude is normalised.
    pub fn new(lat: i32, lon: i32) -> Self {
        Self {
            lat,
            lon: normalise_lon(lon),
        }
    }

    /// Create from coordinates in degrees.
    pub fn from_degrees(lat: f64, lon: f64) -> Self {
        Self::new((lat * SCALE).round() as i32, (lon * SCALE).round() as i32)
    }

    /// Latitude in degrees.
    pub fn dlat(&self) -> f64 {
        f64::from(self.lat) / SCALE
    }

    /// Longitude in degrees.
    pub fn dlon(&self) -> f64 {
        f64::from(self.lon) / SCALE
    }
}

/// Bring a scaled longitude into [-180.0, 180.0) degrees.
fn normalise_lon(lon: i32) -> i32 {
    let full = 360 * 100_000i64;
    let half = 180 * 100_000i64;
    let mut v = i64::from(lon) % full;
    if v >= half {
        v -= full;
    } else if v < -half {
        v += full;
    }
    v as i32
}

impl fmt::Display for Coords {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.5},{:.5}", self.dlat(), self.dlon())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_degrees_round_trip() {
        let c = Coords::from_degrees(44.5, 11.34);
        assert_eq!(c.lat, 4_450_000);
        assert_eq!(c.lon, 1_134_000);
        assert!((c.dlat() - 44.5).abs() < 1e-9);
        assert!((c.dlon() - 11.34).abs() < 1e-9);
    }

    #[test]
    fn test_lon_normalisation() {
        assert_eq!(Coords::from_degrees(0.0, 180.0).lon, -18_000_000);
        assert_eq!(Coords::from_degrees(0.0, -180.0).lon, -18_000_000);
        assert_eq!(Coords::from_degrees(0.0, 360.0).lon, 0);
        assert_eq!(Coords::from_degrees(0.0, 190.0).lon, -17_000_000);
        assert_eq!(Coords::from_degrees(0.0, -190.0).lon, 17_000_000);
    }

    #[test]
    fn test_display() {
        let c = Coords::from_degrees(44.5, 11.34);
        assert_eq!(c.to_string(), "44.50000,11.34000");
    }
}
