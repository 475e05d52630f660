//! Memory regions of the target process
//!
//! A region is an immutable snapshot of one span of the address space with
//! uniform protection. Regions are re-enumerated on demand and carry no
//! identity across calls.

pub mod filter;
pub mod protection;

pub use filter::RegionFilter;
pub use protection::Protection;

use crate::core::types::{Address, RegionRef};
use serde::{Deserialize, Serialize};

/// Commit state of a memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionState {
    /// Memory is committed and accessible
    Committed,
    /// Memory is reserved but not committed
    Reserved,
    /// Memory is free/unallocated
    Free,
}

/// Backing type of a memory region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionType {
    /// Private (anonymous) memory
    Private,
    /// Mapped memory (file mapping)
    Mapped,
    /// Image memory (executable/DLL)
    Image,
}

/// One region of the target's virtual address space
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub base_address: Address,
    pub size: usize,
    pub protection: Protection,
    pub state: RegionState,
    pub region_type: RegionType,
    /// Backing file, when the platform reports one
    pub path: Option<String>,
}

impl MemoryRegion {
    /// Committed private region with the given protection
    pub fn new(base_address: Address, size: usize, protection: Protection) -> Self {
        MemoryRegion {
            base_address,
            size,
            protection,
            state: RegionState::Committed,
            region_type: RegionType::Private,
            path: None,
        }
    }

    pub fn with_type(mut self, region_type: RegionType) -> Self {
        self.region_type = region_type;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Get the end address of the region (exclusive)
    pub fn end_address(&self) -> Address {
        Address::new(self.base_address.as_usize().saturating_add(self.size))
    }

    /// Check if an address is within this region
    pub fn contains(&self, address: Address) -> bool {
        address >= self.base_address && address < self.end_address()
    }

    /// Check if `[address, address + size)` lies entirely within this region
    pub fn contains_range(&self, address: Address, size: usize) -> bool {
        match address.checked_add(size) {
            Some(end) => self.contains(address) && end <= self.end_address(),
            None => false,
        }
    }

    pub fn is_committed(&self) -> bool {
        self.state == RegionState::Committed
    }

    /// Committed and readable
    pub fn is_readable(&self) -> bool {
        self.is_committed() && self.protection.is_readable()
    }

    pub fn is_writable(&self) -> bool {
        self.protection.is_writable()
    }

    pub fn is_executable(&self) -> bool {
        self.protection.is_executable()
    }

    /// Compact reference stored on scan results
    pub fn region_ref(&self) -> RegionRef {
        RegionRef {
            base_address: self.base_address,
            size: self.size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_bounds() {
        let region = MemoryRegion::new(Address::new(0x1000), 0x1000, Protection::read_write());
        assert_eq!(region.end_address(), Address::new(0x2000));
        assert!(region.contains(Address::new(0x1FFF)));
        assert!(!region.contains(Address::new(0x2000)));
        assert!(region.contains_range(Address::new(0x1F00), 0x100));
        assert!(!region.contains_range(Address::new(0x1F00), 0x101));
    }

    #[test]
    fn test_readability_requires_commit() {
        let mut region = MemoryRegion::new(Address::new(0x1000), 0x1000, Protection::read_only());
        assert!(region.is_readable());
        region.state = RegionState::Reserved;
        assert!(!region.is_readable());
    }

    #[test]
    fn test_region_state_equality() {
        assert_eq!(RegionState::Committed, RegionState::Committed);
        assert_ne!(RegionState::Committed, RegionState::Reserved);
        assert_ne!(RegionType::Private, RegionType::Image);
    }
}
