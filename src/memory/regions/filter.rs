//! Region filtering
//!
//! Scanners and the reverse pointer search pick the regions they walk
//! through a [`RegionFilter`] rather than ad-hoc predicates.

use super::{MemoryRegion, RegionState, RegionType};
use crate::core::types::Address;

/// Filter for memory regions, built up with chained setters
#[derive(Debug, Clone, Default)]
pub struct RegionFilter {
    pub min_size: Option<usize>,
    pub max_size: Option<usize>,
    pub state: Option<RegionState>,
    pub region_type: Option<RegionType>,
    pub readable_only: bool,
    pub writable_only: bool,
    pub executable_only: bool,
    pub exclude_executable: bool,
    pub address_range: Option<(Address, Address)>,
}

impl RegionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_size(mut self, size: usize) -> Self {
        self.min_size = Some(size);
        self
    }

    pub fn with_max_size(mut self, size: usize) -> Self {
        self.max_size = Some(size);
        self
    }

    pub fn with_state(mut self, state: RegionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_type(mut self, region_type: RegionType) -> Self {
        self.region_type = Some(region_type);
        self
    }

    pub fn readable(mut self) -> Self {
        self.readable_only = true;
        self
    }

    pub fn writable(mut self) -> Self {
        self.writable_only = true;
        self
    }

    pub fn executable(mut self) -> Self {
        self.executable_only = true;
        self
    }

    pub fn non_executable(mut self) -> Self {
        self.exclude_executable = true;
        self
    }

    /// Keep regions overlapping `[start, end)`
    pub fn with_address_range(mut self, start: Address, end: Address) -> Self {
        self.address_range = Some((start, end));
        self
    }

    pub fn matches(&self, region: &MemoryRegion) -> bool {
        if let Some(min) = self.min_size {
            if region.size < min {
                return false;
            }
        }

        if let Some(max) = self.max_size {
            if region.size > max {
                return false;
            }
        }

        if let Some(state) = self.state {
            if region.state != state {
                return false;
            }
        }

        if let Some(region_type) = self.region_type {
            if region.region_type != region_type {
                return false;
            }
        }

        if self.readable_only && !region.is_readable() {
            return false;
        }

        if self.writable_only && !region.is_writable() {
            return false;
        }

        if self.executable_only && !region.is_executable() {
            return false;
        }

        if self.exclude_executable && region.is_executable() {
            return false;
        }

        if let Some((start, end)) = self.address_range {
            if region.end_address() <= start || region.base_address >= end {
                return false;
            }
        }

        true
    }

    pub fn apply<'a, I>(&self, regions: I) -> Vec<MemoryRegion>
    where
        I: IntoIterator<Item = &'a MemoryRegion>,
    {
        regions
            .into_iter()
            .filter(|region| self.matches(region))
            .cloned()
            .collect()
    }

    /// Total bytes covered by matching regions
    pub fn total_size(&self, regions: &[MemoryRegion]) -> usize {
        regions
            .iter()
            .filter(|region| self.matches(region))
            .map(|region| region.size)
            .sum()
    }
}

/// Common filter presets
pub mod presets {
    use super::*;

    /// Readable regions, the default for value and pattern scans
    pub fn scannable() -> RegionFilter {
        RegionFilter::new().readable()
    }

    /// Readable data regions; candidate pointer holders for reverse search
    pub fn pointer_holders() -> RegionFilter {
        RegionFilter::new().readable().non_executable()
    }

    /// Readable code, used for prologue scans
    pub fn executable_code() -> RegionFilter {
        RegionFilter::new().readable().executable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::regions::Protection;

    fn region(base: usize, size: usize, protection: Protection) -> MemoryRegion {
        MemoryRegion::new(Address::new(base), size, protection)
    }

    #[test]
    fn test_filter_builder() {
        let filter = RegionFilter::new()
            .with_min_size(4096)
            .with_max_size(1024 * 1024)
            .readable()
            .writable();

        assert_eq!(filter.min_size, Some(4096));
        assert_eq!(filter.max_size, Some(1024 * 1024));
        assert!(filter.readable_only);
        assert!(filter.writable_only);
    }

    #[test]
    fn test_filter_matching() {
        let data = region(0x1000, 8192, Protection::read_write());
        let code = region(0x10000, 4096, Protection::read_execute());

        let filter = RegionFilter::new()
            .with_min_size(4096)
            .readable()
            .with_state(RegionState::Committed);
        assert!(filter.matches(&data));
        assert!(filter.matches(&code));

        assert!(!presets::executable_code().matches(&data));
        assert!(presets::executable_code().matches(&code));
        assert!(presets::pointer_holders().matches(&data));
        assert!(!presets::pointer_holders().matches(&code));
    }

    #[test]
    fn test_address_range_overlap() {
        let data = region(0x1000, 0x1000, Protection::read_only());
        let filter = RegionFilter::new().with_address_range(Address::new(0x1800), Address::new(0x3000));
        assert!(filter.matches(&data));

        let filter = RegionFilter::new().with_address_range(Address::new(0x2000), Address::new(0x3000));
        assert!(!filter.matches(&data));
    }

    #[test]
    fn test_total_size() {
        let regions = vec![
            region(0x1000, 0x1000, Protection::read_only()),
            region(0x3000, 0x2000, Protection::no_access()),
            region(0x8000, 0x3000, Protection::read_write()),
        ];
        assert_eq!(presets::scannable().total_size(&regions), 0x4000);
        assert_eq!(presets::scannable().apply(&regions).len(), 2);
    }
}
