//! WMO B-table variable codes.

use crate::error::{ArchiveError, ArchiveResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A WMO table B variable code, packed F·X·Y into 16 bits: 2 bits for the
/// table letter (B, R, C, D), 6 bits for the category, 8 bits for the
/// entry number. `B01002` is F=0, X=1, Y=2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Varcode(pub u16);

const F_LETTERS: [char; 4] = ['B', 'R', 'C', 'D'];

impl Varcode {
    /// Pack a code from its F, X, Y parts. Parts out of range are masked.
    pub fn from_parts(f: u16, x: u16, y: u16) -> Self {
        Varcode(((f & 0x3) << 14) | ((x & 0x3f) << 8) | (y & 0xff))
    }

    /// Table letter index (0 = B).
    pub fn f(&self) -> u16 {
        self.0 >> 14
    }

    /// Category (XX part).
    pub fn x(&self) -> u16 {
        (self.0 >> 8) & 0x3f
    }

    /// Entry number (YYY part).
    pub fn y(&self) -> u16 {
        self.0 & 0xff
    }
}

impl FromStr for Varcode {
    type Err = ArchiveError;

    fn from_str(s: &str) -> ArchiveResult<Self> {
        let bad = || ArchiveError::Invalid(format!("malformed variable code: {:?}", s));
        let mut chars = s.chars();
        let letter = chars.next().ok_or_else(bad)?;
        let f = F_LETTERS
            .iter()
            .position(|&l| l == letter.to_ascii_uppercase())
            .ok_or_else(bad)? as u16;
        let digits = chars.as_str();
        if digits.len() != 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(bad());
        }
        let x: u16 = digits[..2].parse().map_err(|_| bad())?;
        let y: u16 = digits[2..].parse().map_err(|_| bad())?;
        if x > 63 || y > 255 {
            return Err(bad());
        }
        Ok(Varcode::from_parts(f, x, y))
    }
}

impl fmt::Display for Varcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{:02}{:03}",
            F_LETTERS[self.f() as usize],
            self.x(),
            self.y()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let code: Varcode = "B01002".parse().unwrap();
        assert_eq!(code.f(), 0);
        assert_eq!(code.x(), 1);
        assert_eq!(code.y(), 2);
        assert_eq!(code.to_string(), "B01002");

        let temp: Varcode = "B12101".parse().unwrap();
        assert_eq!(temp.to_string(), "B12101");
        assert!(code < temp);
    }

    #[test]
    fn test_lowercase_letter_accepted() {
        let code: Varcode = "b01002".parse().unwrap();
        assert_eq!(code.to_string(), "B01002");
    }

    #[test]
    fn test_malformed_codes_rejected() {
        for bad in ["", "B1002", "B010020", "X01002", "B99002", "Bxxyyy"] {
            assert!(bad.parse::<Varcode>().is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn test_packing_matches_bufr_layout() {
        assert_eq!(Varcode::from_parts(0, 1, 2).0, (1 << 8) | 2);
        assert_eq!(Varcode::from_parts(3, 63, 255).0, u16::MAX);
    }
}
