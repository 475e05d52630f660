//! Read-only view of a process address space
//!
//! Every analysis in this crate reads through [`MemorySource`]. A live
//! process implements it through [`crate::process::ProcessHandle`];
//! [`MemoryImage`] implements it over owned buffers so the same code paths
//! run against synthetic memory and captured images.

use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo, PointerWidth};
use crate::memory::regions::{MemoryRegion, Protection};
use std::sync::Arc;

/// Source of target memory
pub trait MemorySource: Send + Sync {
    /// Reads exactly `size` bytes at `address`
    fn read_bytes(&self, address: Address, size: usize) -> MemoryResult<Vec<u8>>;

    /// Enumerates the committed regions of the address space, ordered by base address
    fn regions(&self) -> MemoryResult<Vec<MemoryRegion>>;

    /// Pointer width of the target, fixed for the lifetime of the source
    fn pointer_width(&self) -> PointerWidth;

    /// Loaded modules, if the source knows about any
    fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        Ok(Vec::new())
    }
}

impl<S: MemorySource + ?Sized> MemorySource for &S {
    fn read_bytes(&self, address: Address, size: usize) -> MemoryResult<Vec<u8>> {
        (**self).read_bytes(address, size)
    }

    fn regions(&self) -> MemoryResult<Vec<MemoryRegion>> {
        (**self).regions()
    }

    fn pointer_width(&self) -> PointerWidth {
        (**self).pointer_width()
    }

    fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        (**self).modules()
    }
}

impl<S: MemorySource + ?Sized> MemorySource for Arc<S> {
    fn read_bytes(&self, address: Address, size: usize) -> MemoryResult<Vec<u8>> {
        (**self).read_bytes(address, size)
    }

    fn regions(&self) -> MemoryResult<Vec<MemoryRegion>> {
        (**self).regions()
    }

    fn pointer_width(&self) -> PointerWidth {
        (**self).pointer_width()
    }

    fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        (**self).modules()
    }
}

impl<S: MemorySource + ?Sized> MemorySource for Box<S> {
    fn read_bytes(&self, address: Address, size: usize) -> MemoryResult<Vec<u8>> {
        (**self).read_bytes(address, size)
    }

    fn regions(&self) -> MemoryResult<Vec<MemoryRegion>> {
        (**self).regions()
    }

    fn pointer_width(&self) -> PointerWidth {
        (**self).pointer_width()
    }

    fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        (**self).modules()
    }
}

#[derive(Debug, Clone)]
struct Segment {
    region: MemoryRegion,
    data: Vec<u8>,
}

/// An address space held in memory: non-overlapping regions with their bytes
#[derive(Debug, Clone)]
pub struct MemoryImage {
    segments: Vec<Segment>,
    modules: Vec<ModuleInfo>,
    width: PointerWidth,
}

impl MemoryImage {
    pub fn new(width: PointerWidth) -> Self {
        MemoryImage {
            segments: Vec::new(),
            modules: Vec::new(),
            width,
        }
    }

    /// Single read-write region holding `data` at `base`
    pub fn from_bytes(base: Address, data: Vec<u8>, width: PointerWidth) -> Self {
        MemoryImage::new(width).with_region(base, data, Protection::read_write())
    }

    /// Adds a region; regions that overlap an existing one are rejected
    pub fn with_region(mut self, base: Address, data: Vec<u8>, protection: Protection) -> Self {
        // Builder form; overlaps are dropped rather than reported
        let _ = self.add_region(MemoryRegion::new(base, data.len(), protection), data);
        self
    }

    pub fn with_module(mut self, module: ModuleInfo) -> Self {
        self.modules.push(module);
        self
    }

    /// Adds a region described by `region` and backed by `data`
    pub fn add_region(&mut self, region: MemoryRegion, data: Vec<u8>) -> MemoryResult<()> {
        if region.size != data.len() || region.size == 0 {
            return Err(MemoryError::InvalidArgument(format!(
                "region at {} declares {} bytes but {} were supplied",
                region.base_address,
                region.size,
                data.len()
            )));
        }
        let overlaps = self.segments.iter().any(|s| {
            region.base_address < s.region.end_address() && s.region.base_address < region.end_address()
        });
        if overlaps {
            return Err(MemoryError::InvalidArgument(format!(
                "region at {} overlaps an existing region",
                region.base_address
            )));
        }
        let index = self
            .segments
            .partition_point(|s| s.region.base_address < region.base_address);
        self.segments.insert(index, Segment { region, data });
        Ok(())
    }

    /// Overwrites bytes of the image, typically to simulate the target changing
    /// between two snapshots
    pub fn patch(&mut self, address: Address, bytes: &[u8]) -> MemoryResult<()> {
        let segment = self
            .segments
            .iter_mut()
            .find(|s| s.region.contains_range(address, bytes.len()))
            .ok_or_else(|| MemoryError::read_failed(address, "patch outside any region"))?;
        let start = address.as_usize() - segment.region.base_address.as_usize();
        segment.data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.segments.iter().map(|s| s.data.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    fn segment_for(&self, address: Address) -> Option<&Segment> {
        let index = self
            .segments
            .partition_point(|s| s.region.base_address <= address);
        let segment = self.segments.get(index.checked_sub(1)?)?;
        segment.region.contains(address).then_some(segment)
    }
}

impl MemorySource for MemoryImage {
    fn read_bytes(&self, address: Address, size: usize) -> MemoryResult<Vec<u8>> {
        let segment = self
            .segment_for(address)
            .ok_or_else(|| MemoryError::read_failed(address, "address is not mapped"))?;
        if !segment.region.is_readable() {
            return Err(MemoryError::read_failed(address, "region is not readable"));
        }
        if !segment.region.contains_range(address, size) {
            return Err(MemoryError::read_failed(
                address,
                format!("{} bytes run past the end of the region", size),
            ));
        }
        let start = address.as_usize() - segment.region.base_address.as_usize();
        Ok(segment.data[start..start + size].to_vec())
    }

    fn regions(&self) -> MemoryResult<Vec<MemoryRegion>> {
        Ok(self.segments.iter().map(|s| s.region.clone()).collect())
    }

    fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        Ok(self.modules.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image() -> MemoryImage {
        MemoryImage::new(PointerWidth::Eight)
            .with_region(Address::new(0x10000), vec![0xAA; 0x100], Protection::read_write())
            .with_region(Address::new(0x20000), vec![0xBB; 0x100], Protection::no_access())
    }

    #[test]
    fn test_read_inside_region() {
        let image = image();
        let bytes = image.read_bytes(Address::new(0x10010), 4).unwrap();
        assert_eq!(bytes, vec![0xAA; 4]);
    }

    #[test]
    fn test_read_failures() {
        let image = image();
        assert!(image.read_bytes(Address::new(0x30000), 4).is_err());
        assert!(image.read_bytes(Address::new(0x20000), 4).is_err());
        assert!(image.read_bytes(Address::new(0x100FE), 4).is_err());
    }

    #[test]
    fn test_regions_sorted() {
        let image = MemoryImage::new(PointerWidth::Four)
            .with_region(Address::new(0x5000), vec![0; 16], Protection::read_only())
            .with_region(Address::new(0x1000), vec![0; 16], Protection::read_only());
        let bases: Vec<_> = image.regions().unwrap().iter().map(|r| r.base_address).collect();
        assert_eq!(bases, vec![Address::new(0x1000), Address::new(0x5000)]);
    }

    #[test]
    fn test_overlap_rejected() {
        let mut image = image();
        let region = MemoryRegion::new(Address::new(0x10080), 0x100, Protection::read_only());
        assert!(image.add_region(region, vec![0; 0x100]).is_err());
    }

    #[test]
    fn test_patch() {
        let mut image = image();
        image.patch(Address::new(0x10000), &[1, 2, 3]).unwrap();
        assert_eq!(image.read_bytes(Address::new(0x10000), 4).unwrap(), vec![1, 2, 3, 0xAA]);
        assert!(image.patch(Address::new(0x100FF), &[1, 2]).is_err());
    }
}
