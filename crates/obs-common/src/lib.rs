//! Common types shared across the observation archive crates.

pub mod coords;
pub mod error;
pub mod level;
pub mod varcode;

pub use coords::Coords;
pub use error::{ArchiveError, ArchiveResult};
pub use level::{Level, Trange, MISSING_INT};
pub use varcode::Varcode;
