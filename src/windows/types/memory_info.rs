//! MEMORY_BASIC_INFORMATION to [`MemoryRegion`] conversion

use crate::core::types::Address;
use crate::memory::regions::{MemoryRegion, Protection, RegionState, RegionType};
use winapi::um::winnt::MEMORY_BASIC_INFORMATION;

const MEM_COMMIT: u32 = 0x1000;
const MEM_RESERVE: u32 = 0x2000;
const MEM_IMAGE: u32 = 0x100_0000;
const MEM_MAPPED: u32 = 0x4_0000;

/// Plain copy of MEMORY_BASIC_INFORMATION without raw pointers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryBasicInfo {
    pub base_address: Address,
    pub region_size: usize,
    pub state: u32,
    pub protect: u32,
    pub type_flags: u32,
}

impl From<MEMORY_BASIC_INFORMATION> for MemoryBasicInfo {
    fn from(mbi: MEMORY_BASIC_INFORMATION) -> Self {
        MemoryBasicInfo {
            base_address: Address::new(mbi.BaseAddress as usize),
            region_size: mbi.RegionSize,
            state: mbi.State,
            protect: mbi.Protect,
            type_flags: mbi.Type,
        }
    }
}

impl MemoryBasicInfo {
    pub fn end(&self) -> usize {
        self.base_address.as_usize().saturating_add(self.region_size)
    }

    pub fn state(&self) -> RegionState {
        match self.state {
            MEM_COMMIT => RegionState::Committed,
            MEM_RESERVE => RegionState::Reserved,
            _ => RegionState::Free,
        }
    }

    pub fn region_type(&self) -> RegionType {
        match self.type_flags {
            MEM_IMAGE => RegionType::Image,
            MEM_MAPPED => RegionType::Mapped,
            _ => RegionType::Private,
        }
    }

    pub fn to_region(&self) -> MemoryRegion {
        let mut region = MemoryRegion::new(
            self.base_address,
            self.region_size,
            Protection::from_page_flags(self.protect),
        )
        .with_type(self.region_type());
        region.state = self.state();
        region
    }
}
