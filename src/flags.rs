//! Range flags
//!
//! Options accepted by `keys`/`values`/`items`, combinable with `|`.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use crate::error::{Result, StoreError};

/// Bit set of range options
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RangeFlags(u32);

impl RangeFlags {
    /// Make the end bound inclusive
    pub const INCLUDE_END: RangeFlags = RangeFlags(0x01);

    /// Emit entries in descending key order
    pub const DESCENDING: RangeFlags = RangeFlags(0x02);

    const ALL: u32 = Self::INCLUDE_END.0 | Self::DESCENDING.0;

    /// No options: start-inclusive, end-exclusive, ascending
    pub const fn empty() -> Self {
        RangeFlags(0)
    }

    /// Build from a raw integer, rejecting unknown bits
    pub fn from_bits(bits: u32) -> Result<Self> {
        if bits & !Self::ALL != 0 {
            return Err(StoreError::InvalidArgument(format!(
                "unknown range flags: {:#x}",
                bits & !Self::ALL
            )));
        }
        Ok(RangeFlags(bits))
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: RangeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn include_end(self) -> bool {
        self.contains(Self::INCLUDE_END)
    }

    pub const fn descending(self) -> bool {
        self.contains(Self::DESCENDING)
    }
}

impl BitOr for RangeFlags {
    type Output = RangeFlags;

    fn bitor(self, rhs: RangeFlags) -> RangeFlags {
        RangeFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for RangeFlags {
    fn bitor_assign(&mut self, rhs: RangeFlags) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for RangeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.include_end() {
            names.push("INCLUDE_END");
        }
        if self.descending() {
            names.push("DESCENDING");
        }
        if names.is_empty() {
            write!(f, "RangeFlags(empty)")
        } else {
            write!(f, "RangeFlags({})", names.join(" | "))
        }
    }
}
