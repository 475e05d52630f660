//! `/proc/<pid>/maps` parsing
//!
//! Line format:
//! address           perms offset  dev   inode   pathname
//! 00400000-00452000 r-xp 00000000 08:02 173521  /usr/bin/ls

use crate::core::types::{Address, ModuleInfo};
use crate::memory::regions::{MemoryRegion, Protection, RegionType};
use std::collections::BTreeMap;
use std::path::Path;

/// Parses the whole maps file; malformed lines are skipped
pub fn parse_maps(content: &str) -> Vec<MemoryRegion> {
    let mut regions: Vec<MemoryRegion> = content.lines().filter_map(parse_map_line).collect();
    regions.sort_by_key(|r| r.base_address);

    // A file with an executable mapping is a loaded image; every mapping of it
    // is part of that image
    let images: Vec<String> = regions
        .iter()
        .filter(|r| r.is_executable())
        .filter_map(|r| r.path.clone())
        .collect();
    for region in &mut regions {
        if let Some(path) = &region.path {
            if images.contains(path) {
                region.region_type = RegionType::Image;
            }
        }
    }
    regions
}

fn parse_map_line(line: &str) -> Option<MemoryRegion> {
    let mut parts = line.split_whitespace();

    let (start, end) = parts.next()?.split_once('-')?;
    let start = usize::from_str_radix(start, 16).ok()?;
    let end = usize::from_str_radix(end, 16).ok()?;
    if end <= start {
        return None;
    }

    let protection = Protection::from_perms(parts.next()?);
    let _offset = parts.next()?;
    let _device = parts.next()?;
    let inode: u64 = parts.next()?.parse().ok()?;

    // Remaining is the pathname, which may contain spaces
    let pathname = parts.collect::<Vec<_>>().join(" ");

    let mut region = MemoryRegion::new(Address::new(start), end - start, protection);
    if pathname.starts_with('/') && inode != 0 {
        region = region.with_type(RegionType::Mapped).with_path(pathname);
    } else if !pathname.is_empty() {
        // [heap], [stack], [vdso] and friends
        region = region.with_path(pathname);
    }
    Some(region)
}

/// Groups image regions by backing file into modules, ordered by base address
pub fn modules_from_regions(regions: &[MemoryRegion]) -> Vec<ModuleInfo> {
    let mut spans: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
    for region in regions.iter().filter(|r| r.region_type == RegionType::Image) {
        let Some(path) = region.path.as_deref() else {
            continue;
        };
        let start = region.base_address.as_usize();
        let end = region.end_address().as_usize();
        spans
            .entry(path)
            .and_modify(|(lo, hi)| {
                *lo = (*lo).min(start);
                *hi = (*hi).max(end);
            })
            .or_insert((start, end));
    }

    let mut modules: Vec<ModuleInfo> = spans
        .into_iter()
        .map(|(path, (lo, hi))| {
            let name = Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string());
            ModuleInfo::new(name, Address::new(lo), hi - lo).with_path(path)
        })
        .collect();
    modules.sort_by_key(|m| m.base_address);
    modules
}
