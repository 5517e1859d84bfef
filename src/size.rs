//! Byte-size value type.
//!
//! `Size` is a plain count of bytes. It can be parsed from strings such as
//! `"3 MiB"` or `"100 KB"` and multiplied without silent truncation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// An integral number of bytes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Size(u64);

impl Size {
    pub const ZERO: Size = Size(0);

    pub const B: Size = Size(1);
    pub const KB: Size = Size(1000);
    pub const KIB: Size = Size(1024);
    pub const MB: Size = Size(1000 * 1000);
    pub const MIB: Size = Size(1024 * 1024);
    pub const GB: Size = Size(1000 * 1000 * 1000);
    pub const GIB: Size = Size(1024 * 1024 * 1024);

    pub const fn from_bytes(bytes: u64) -> Self {
        Size(bytes)
    }

    pub const fn bytes(self) -> u64 {
        self.0
    }

    /// Coarse MiB value for reporting.
    pub fn as_mib_f64(self) -> f64 {
        self.0 as f64 / Self::MIB.0 as f64
    }

    /// Multiplies by `factor`, returning `None` instead of wrapping.
    pub fn checked_mul(self, factor: u64) -> Option<Size> {
        self.0.checked_mul(factor).map(Size)
    }

    /// Parses strings like `"7 GiB"`.
    ///
    /// The numeric part must be a run of decimal digits and the unit one of
    /// `B`, `b`, `KB`, `kB`, `KiB`, `kiB`, `MB`, `MiB`, `GB` or `GiB`.
    /// Results that do not fit in a signed 64-bit integer are rejected.
    pub fn parse(s: &str) -> Result<Size, SizeError> {
        let s = s.trim();
        let digits_end = s
            .char_indices()
            .find(|(_, c)| !c.is_ascii_digit())
            .map(|(i, _)| i)
            .unwrap_or(s.len());
        if digits_end == 0 {
            return Err(SizeError::MissingNumber);
        }

        let (number, unit) = s.split_at(digits_end);
        let number: i64 = number
            .parse()
            .map_err(|_| SizeError::Overflow(s.to_string()))?;

        let unit = unit.trim();
        let multiplier =
            unit_multiplier(unit).ok_or_else(|| SizeError::UnknownUnit(unit.to_string()))?;

        // The multipliers all fit in i64, so the signed product detects overflow.
        number
            .checked_mul(multiplier.0 as i64)
            .map(|bytes| Size(bytes as u64))
            .ok_or_else(|| SizeError::Overflow(s.to_string()))
    }
}

fn unit_multiplier(unit: &str) -> Option<Size> {
    let size = match unit {
        "B" | "b" => Size::B,
        "KB" | "kB" => Size::KB,
        "KiB" | "kiB" => Size::KIB,
        "MB" => Size::MB,
        "MiB" => Size::MIB,
        "GB" => Size::GB,
        "GiB" => Size::GIB,
        _ => return None,
    };
    Some(size)
}

impl FromStr for Size {
    type Err = SizeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Size::parse(s)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} B", self.0)
    }
}

impl From<u64> for Size {
    fn from(bytes: u64) -> Self {
        Size(bytes)
    }
}

/// Errors returned by [`Size::parse`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SizeError {
    #[error("missing number")]
    MissingNumber,

    #[error("unknown unit: {0:?}")]
    UnknownUnit(String),

    #[error("size overflows 64-bit range: {0}")]
    Overflow(String),
}
