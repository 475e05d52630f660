//! Process-level facts: pointer width and loaded modules

use super::Address;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Pointer width of the attached process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PointerWidth {
    /// 32-bit process
    Four,
    /// 64-bit process
    Eight,
}

impl PointerWidth {
    /// Width of the machine this crate was compiled for
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "32") {
            PointerWidth::Four
        } else {
            PointerWidth::Eight
        }
    }

    pub const fn bytes(&self) -> usize {
        match self {
            PointerWidth::Four => 4,
            PointerWidth::Eight => 8,
        }
    }

    /// Decodes a little-endian pointer from the start of `bytes`
    pub fn decode(&self, bytes: &[u8]) -> Option<usize> {
        match self {
            PointerWidth::Four => {
                let raw: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
                Some(u32::from_le_bytes(raw) as usize)
            }
            PointerWidth::Eight => {
                let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
                usize::try_from(u64::from_le_bytes(raw)).ok()
            }
        }
    }

    /// Little-endian encoding of `value`, or `None` if it does not fit
    pub fn encode(&self, value: usize) -> Option<Vec<u8>> {
        match self {
            PointerWidth::Four => u32::try_from(value).ok().map(|v| v.to_le_bytes().to_vec()),
            PointerWidth::Eight => Some((value as u64).to_le_bytes().to_vec()),
        }
    }
}

impl fmt::Display for PointerWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit", self.bytes() * 8)
    }
}

/// Information about a loaded module in a process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleInfo {
    pub name: String,
    pub path: PathBuf,
    pub base_address: Address,
    pub size: usize,
}

impl ModuleInfo {
    /// Creates a new ModuleInfo
    pub fn new(name: impl Into<String>, base_address: Address, size: usize) -> Self {
        ModuleInfo {
            name: name.into(),
            path: PathBuf::new(),
            base_address,
            size,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = path.into();
        self
    }

    /// Gets the end address of the module (exclusive)
    pub fn end_address(&self) -> Address {
        Address::new(self.base_address.as_usize().saturating_add(self.size))
    }

    /// Checks if an address is within this module
    pub fn contains_address(&self, address: Address) -> bool {
        address >= self.base_address && address < self.end_address()
    }

    /// Case-insensitive name comparison, the way loaders treat module names
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}
