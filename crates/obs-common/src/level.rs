//! Vertical level and time range descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Sentinel for an absent integer component of a level or time range.
pub const MISSING_INT: i32 = i32::MAX;

/// A vertical level or layer. For a single level only `ltype1`/`l1` are
/// meaningful and the second pair holds [`MISSING_INT`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Level {
    /// Type of the first level, from the WMO level type table.
    pub ltype1: i32,
    /// Value of the first level, in type-dependent units.
    pub l1: i32,
    /// Type of the second level delimiting a layer.
    pub ltype2: i32,
    /// Value of the second level.
    pub l2: i32,
}

impl Level {
    /// Create a layer between two levels.
    pub fn new(ltype1: i32, l1: i32, ltype2: i32, l2: i32) -> Self {
        Self {
            ltype1,
            l1,
            ltype2,
            l2,
        }
    }

    /// Create a single level with no second bound.
    pub fn single(ltype1: i32, l1: i32) -> Self {
        Self::new(ltype1, l1, MISSING_INT, MISSING_INT)
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        fmt_component(f, self.ltype1)?;
        write!(f, ",")?;
        fmt_component(f, self.l1)?;
        write!(f, ",")?;
        fmt_component(f, self.ltype2)?;
        write!(f, ",")?;
        fmt_component(f, self.l2)?;
        write!(f, ")")
    }
}

/// A time range descriptor: statistical processing indicator plus the two
/// time periods it refers to, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Trange {
    /// Time range indicator, from the WMO time range table.
    pub pind: i32,
    /// Time offset of the observation from the reference time, in seconds.
    pub p1: i32,
    /// Duration of the period the value covers, in seconds.
    pub p2: i32,
}

impl Trange {
    pub fn new(pind: i32, p1: i32, p2: i32) -> Self {
        Self { pind, p1, p2 }
    }

    /// The conventional descriptor for an instantaneous value.
    pub fn instant() -> Self {
        Self::new(254, 0, 0)
    }
}

impl fmt::Display for Trange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        fmt_component(f, self.pind)?;
        write!(f, ",")?;
        fmt_component(f, self.p1)?;
        write!(f, ",")?;
        fmt_component(f, self.p2)?;
        write!(f, ")")
    }
}

fn fmt_component(f: &mut fmt::Formatter<'_>, v: i32) -> fmt::Result {
    if v == MISSING_INT {
        write!(f, "-")
    } else {
        write!(f, "{}", v)
    }
}
