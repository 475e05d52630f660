//! Virtual address newtype with hex parsing and checked arithmetic

use super::error::{MemoryError, MemoryResult};
use super::PointerWidth;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A virtual address inside the target process
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(pub usize);

impl Address {
    /// Creates a new address from a usize value
    pub const fn new(value: usize) -> Self {
        Address(value)
    }

    /// Creates a null address (0x0)
    pub const fn null() -> Self {
        Address(0)
    }

    pub const fn is_null(&self) -> bool {
        self.0 == 0
    }

    /// Checks if the address is aligned to the specified boundary
    pub const fn is_aligned(&self, alignment: usize) -> bool {
        alignment != 0 && self.0 % alignment == 0
    }

    /// Aligns the address down to a power-of-two boundary
    pub const fn align_down(&self, alignment: usize) -> Self {
        if alignment == 0 {
            return *self;
        }
        Address(self.0 & !(alignment - 1))
    }

    /// Aligns the address up to a power-of-two boundary, saturating at the top
    pub const fn align_up(&self, alignment: usize) -> Self {
        if alignment == 0 {
            return *self;
        }
        match self.0.checked_add(alignment - 1) {
            Some(v) => Address(v & !(alignment - 1)),
            None => Address(usize::MAX & !(alignment - 1)),
        }
    }

    /// Adds a signed offset, returning `None` on overflow
    pub fn checked_offset(&self, offset: i64) -> Option<Self> {
        let offset = isize::try_from(offset).ok()?;
        self.0.checked_add_signed(offset).map(Address)
    }

    /// Adds an unsigned byte count, returning `None` on overflow
    pub fn checked_add(&self, size: usize) -> Option<Self> {
        self.0.checked_add(size).map(Address)
    }

    /// Distance from `base` to this address, if this address is not below it
    pub fn offset_from(&self, base: Address) -> Option<usize> {
        self.0.checked_sub(base.0)
    }

    /// Returns the raw usize value
    pub const fn as_usize(&self) -> usize {
        self.0
    }

    pub const fn as_u64(&self) -> u64 {
        self.0 as u64
    }

    /// Whether the value falls in the user-mode range for the given pointer width
    pub fn is_user_space(&self, width: PointerWidth) -> bool {
        let value = self.0 as u64;
        match width {
            PointerWidth::Four => (0x10000..=0x7FFF_FFFF).contains(&value),
            PointerWidth::Eight => (0x10000..=0x7FFF_FFFF_FFFF).contains(&value),
        }
    }

    /// Formats the address at the natural width of the target
    pub fn display_for(&self, width: PointerWidth) -> String {
        match width {
            PointerWidth::Four => format!("0x{:08X}", self.0),
            PointerWidth::Eight => format!("0x{:016X}", self.0),
        }
    }

    /// Parses an address, rejecting values below `min_valid`
    pub fn parse_checked(s: &str, min_valid: usize) -> MemoryResult<Self> {
        let address: Address = s.parse()?;
        if address.0 < min_valid {
            return Err(MemoryError::InvalidAddress(format!(
                "{} is below the minimum valid address 0x{:X}",
                address, min_valid
            )));
        }
        Ok(address)
    }
}

impl FromStr for Address {
    type Err = MemoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(MemoryError::InvalidAddress("empty address".to_string()));
        }

        let value = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            usize::from_str_radix(hex, 16)
        } else if let Some(hex) = s.strip_prefix('$') {
            usize::from_str_radix(hex, 16)
        } else if s.chars().any(|c| c.is_ascii_alphabetic()) {
            // Letters only make sense as hex digits
            usize::from_str_radix(s, 16)
        } else {
            s.parse::<usize>().or_else(|_| usize::from_str_radix(s, 16))
        };

        value
            .map(Address::new)
            .map_err(|_| MemoryError::InvalidAddress(s.to_string()))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:016X}", self.0)
    }
}

impl fmt::LowerHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

impl From<usize> for Address {
    fn from(value: usize) -> Self {
        Address::new(value)
    }
}

impl From<Address> for usize {
    fn from(address: Address) -> Self {
        address.0
    }
}
