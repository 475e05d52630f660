//! Pointer chains: forward resolution and reverse search
//!
//! Forward resolution of a chain with N offsets performs N-1 dereferences and
//! one final addition; any failed or null dereference leaves the chain
//! unresolved. Reverse search is a level-synchronous BFS over the implicit
//! graph "bytes at X encode address Y", bounded by depth, per-level frontier
//! size and total recorded steps.

use crate::config::{Config, PointerConfig};
use crate::core::types::{Address, CancellationToken, MemoryResult, Outcome, PointerWidth};
use crate::memory::reader::{MemoryReader, ReadLimits};
use crate::memory::regions::{filter::presets, MemoryRegion};
use crate::memory::source::MemorySource;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::{debug, info};

/// Chunk size used while sweeping regions for pointer slots
const SWEEP_CHUNK: usize = 1024 * 1024;

/// A base address plus the offsets walked from it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointerChain {
    pub base: Address,
    pub offsets: Vec<i64>,
    /// Final address, or `None` if any dereference failed
    pub resolved: Option<Address>,
}

impl PointerChain {
    pub fn new(base: Address, offsets: Vec<i64>) -> Self {
        PointerChain {
            base,
            offsets,
            resolved: None,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.resolved.is_some()
    }

    /// Number of dereferences the chain performs
    pub fn depth(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }
}

fn fmt_offset(offset: i64) -> String {
    if offset < 0 {
        format!(" - 0x{:X}", offset.unsigned_abs())
    } else {
        format!(" + 0x{:X}", offset)
    }
}

impl fmt::Display for PointerChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut text = format!("0x{:X}", self.base.as_usize());
        if let Some((last, derefs)) = self.offsets.split_last() {
            for &offset in derefs {
                text = format!("[{}{}]", text, fmt_offset(offset));
            }
            if *last != 0 || derefs.is_empty() {
                text.push_str(&fmt_offset(*last));
            }
        }
        match self.resolved {
            Some(address) => write!(f, "{} -> 0x{:X}", text, address.as_usize()),
            None => write!(f, "{} -> unresolved", text),
        }
    }
}

/// One edge found by the reverse search: the pointer-width value stored at
/// `pointer_address` equals `points_to`, a member of the previous level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStep {
    pub depth: usize,
    pub pointer_address: Address,
    pub points_to: Address,
}

/// Bounds for a reverse search
#[derive(Debug, Clone)]
pub struct PointerSearchOptions {
    pub max_depth: usize,
    /// Total steps recorded across all levels
    pub max_results: usize,
    /// New frontier entries kept per level (lowest addresses first)
    pub frontier_cap: usize,
    /// Only consider pointer slots aligned to the pointer width
    pub aligned: bool,
    pub parallel: bool,
}

impl Default for PointerSearchOptions {
    fn default() -> Self {
        let config = Config::default();
        let mut options = PointerSearchOptions::from(&config.pointers);
        options.parallel = config.scanner.parallel;
        options
    }
}

impl From<&PointerConfig> for PointerSearchOptions {
    fn from(config: &PointerConfig) -> Self {
        PointerSearchOptions {
            max_depth: config.max_depth,
            max_results: config.max_results,
            frontier_cap: config.frontier_cap,
            aligned: config.aligned,
            parallel: true,
        }
    }
}

/// Everything the reverse search found
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointerSearchReport {
    pub target: Address,
    /// Steps ordered by depth, then pointer address
    pub steps: Vec<ChainStep>,
    /// Levels actually searched
    pub levels_searched: usize,
    /// `max_results` stopped the search
    pub truncated: bool,
    /// Some level produced more new entries than `frontier_cap`
    pub frontier_capped: bool,
}

impl PointerSearchReport {
    pub fn at_depth(&self, depth: usize) -> impl Iterator<Item = &ChainStep> {
        self.steps.iter().filter(move |s| s.depth == depth)
    }

    /// Full chains ending at the target, one per recorded step.
    ///
    /// Each chain starts at the step's pointer address and follows recorded
    /// edges down to depth 1, so it has `depth + 1` zero offsets and resolves
    /// forward to the target while memory is unchanged.
    pub fn chains(&self) -> Vec<PointerChain> {
        let by_address: HashMap<(usize, Address), &ChainStep> = self
            .steps
            .iter()
            .map(|s| ((s.depth, s.pointer_address), s))
            .collect();

        self.steps
            .iter()
            .filter_map(|step| {
                let mut current = step;
                while current.depth > 1 {
                    current = by_address.get(&(current.depth - 1, current.points_to))?;
                }
                (current.points_to == self.target).then(|| PointerChain {
                    base: step.pointer_address,
                    offsets: vec![0; step.depth + 1],
                    resolved: Some(self.target),
                })
            })
            .collect()
    }
}

/// Forward and reverse pointer resolution over any [`MemorySource`]
pub struct PointerResolver<'a, S: MemorySource + ?Sized> {
    reader: MemoryReader<'a, S>,
    source: &'a S,
    cancel: CancellationToken,
}

impl<'a, S: MemorySource + ?Sized> PointerResolver<'a, S> {
    pub fn new(source: &'a S, limits: ReadLimits) -> Self {
        PointerResolver {
            reader: MemoryReader::new(source, limits),
            source,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn pointer_width(&self) -> PointerWidth {
        self.source.pointer_width()
    }

    /// Resolves `base` through `offsets`. An empty offset list resolves to
    /// `base`; a failed or null dereference resolves to `None`.
    pub fn resolve(&self, base: Address, offsets: &[i64]) -> Option<Address> {
        let Some((last, derefs)) = offsets.split_last() else {
            return Some(base);
        };
        let mut current = base;
        for &offset in derefs {
            let slot = current.checked_offset(offset)?;
            let next = match self.reader.read_pointer(slot) {
                Ok(next) => next,
                Err(e) => {
                    debug!("chain broke reading {}: {}", slot, e);
                    return None;
                }
            };
            if next.is_null() {
                debug!("chain broke at null pointer stored at {}", slot);
                return None;
            }
            current = next;
        }
        current.checked_offset(*last)
    }

    pub fn resolve_chain(&self, base: Address, offsets: Vec<i64>) -> PointerChain {
        let resolved = self.resolve(base, &offsets);
        PointerChain {
            base,
            offsets,
            resolved,
        }
    }

    /// Re-resolves an existing chain against current memory
    pub fn refresh(&self, chain: &PointerChain) -> PointerChain {
        self.resolve_chain(chain.base, chain.offsets.clone())
    }

    /// Searches for chains of pointers that lead to `target`.
    ///
    /// Level 1 finds slots holding `target`; level k finds slots holding any
    /// address recorded at level k-1. Only readable, non-executable regions
    /// are swept.
    pub fn find_chains(
        &self,
        target: Address,
        options: &PointerSearchOptions,
    ) -> MemoryResult<Outcome<PointerSearchReport>> {
        let width = self.pointer_width();
        let regions = presets::pointer_holders()
            .with_min_size(width.bytes())
            .apply(&self.source.regions()?);

        let mut report = PointerSearchReport {
            target,
            ..Default::default()
        };
        let mut visited: HashSet<Address> = HashSet::from([target]);
        let mut frontier: HashSet<usize> = HashSet::from([target.as_usize()]);

        for depth in 1..=options.max_depth {
            if frontier.is_empty() {
                break;
            }
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            let remaining = options.max_results.saturating_sub(report.steps.len());
            if remaining == 0 {
                report.truncated = true;
                break;
            }

            let sweep = |region: &MemoryRegion| {
                self.sweep_region(region, &frontier, width, options.aligned, depth)
            };
            let per_region: Vec<Vec<ChainStep>> = if options.parallel && regions.len() > 1 {
                regions.par_iter().map(sweep).collect()
            } else {
                regions.iter().map(sweep).collect()
            };
            if self.cancel.is_cancelled() {
                return Ok(Outcome::Cancelled);
            }
            report.levels_searched = depth;

            let mut found: Vec<ChainStep> = per_region
                .into_iter()
                .flatten()
                .filter(|step| visited.insert(step.pointer_address))
                .collect();
            found.sort_by_key(|s| s.pointer_address);
            if found.len() > remaining {
                found.truncate(remaining);
                report.truncated = true;
            }

            let mut next: Vec<usize> = found.iter().map(|s| s.pointer_address.as_usize()).collect();
            if next.len() > options.frontier_cap {
                next.truncate(options.frontier_cap);
                report.frontier_capped = true;
            }
            debug!(
                "pointer level {}: {} steps, {} in next frontier",
                depth,
                found.len(),
                next.len()
            );
            report.steps.extend(found);
            frontier = next.into_iter().collect();
            if report.truncated {
                break;
            }
        }

        info!(
            "pointer search for {} found {} steps over {} levels",
            target,
            report.steps.len(),
            report.levels_searched
        );
        Ok(Outcome::Completed(report))
    }

    fn sweep_region(
        &self,
        region: &MemoryRegion,
        frontier: &HashSet<usize>,
        width: PointerWidth,
        aligned: bool,
        depth: usize,
    ) -> Vec<ChainStep> {
        let size = width.bytes();
        let chunk = SWEEP_CHUNK.min(self.reader.limits().max_read_size).max(size);
        let step = chunk - size + 1;
        let stride = if aligned { size } else { 1 };
        let mut steps = Vec::new();

        let mut offset = 0;
        while offset + size <= region.size {
            if self.cancel.is_cancelled() {
                break;
            }
            let len = chunk.min(region.size - offset);
            let last = offset + len >= region.size;
            let accept = if last { len } else { step };
            let base = region.base_address.as_usize() + offset;

            match self.reader.read_bytes(Address::new(base), len) {
                Ok(bytes) => {
                    let first = if aligned { (size - base % size) % size } else { 0 };
                    let mut i = first;
                    while i < accept && i + size <= bytes.len() {
                        if let Some(value) = width.decode(&bytes[i..]) {
                            if frontier.contains(&value) {
                                steps.push(ChainStep {
                                    depth,
                                    pointer_address: Address::new(base + i),
                                    points_to: Address::new(value),
                                });
                            }
                        }
                        i += stride;
                    }
                }
                Err(e) => debug!("skipping {} bytes at 0x{:X}: {}", len, base, e),
            }
            if last {
                break;
            }
            offset += step;
        }
        steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::regions::Protection;
    use crate::memory::source::MemoryImage;

    const BASE: usize = 0x10000;

    /// 0x10000 -> 0x10100 -> (0x10200 + 0x8) = target 0x10208
    fn chain_image() -> MemoryImage {
        let mut data = vec![0u8; 0x400];
        data[0x10..0x18].copy_from_slice(&(BASE as u64 + 0x100).to_le_bytes());
        data[0x120..0x128].copy_from_slice(&(BASE as u64 + 0x200).to_le_bytes());
        data[0x208..0x20C].copy_from_slice(&1234u32.to_le_bytes());
        MemoryImage::from_bytes(Address::new(BASE), data, PointerWidth::Eight)
    }

    fn resolver(image: &MemoryImage) -> PointerResolver<'_, MemoryImage> {
        PointerResolver::new(image, ReadLimits::default())
    }

    #[test]
    fn test_forward_resolution() {
        let image = chain_image();
        let resolver = resolver(&image);

        assert_eq!(resolver.resolve(Address::new(BASE), &[]), Some(Address::new(BASE)));
        assert_eq!(
            resolver.resolve(Address::new(BASE), &[0x10]),
            Some(Address::new(BASE + 0x10))
        );
        assert_eq!(
            resolver.resolve(Address::new(BASE), &[0x10, 0x20, 0x8]),
            Some(Address::new(BASE + 0x208))
        );
    }

    #[test]
    fn test_broken_chain_is_unresolved() {
        let image = chain_image();
        let resolver = resolver(&image);

        // Slot 0x30 holds null
        assert_eq!(resolver.resolve(Address::new(BASE), &[0x30, 0x0]), None);
        // Dereference outside any region
        assert_eq!(resolver.resolve(Address::new(0x90000), &[0x0, 0x0]), None);

        let chain = resolver.resolve_chain(Address::new(BASE), vec![0x30, 0x0]);
        assert!(!chain.is_valid());
        assert!(chain.to_string().ends_with("unresolved"));
    }

    #[test]
    fn test_resolution_is_idempotent() {
        let image = chain_image();
        let resolver = resolver(&image);
        let first = resolver.resolve_chain(Address::new(BASE), vec![0x10, 0x20, 0x8]);
        let second = resolver.refresh(&first);
        assert_eq!(first, second);
    }

    #[test]
    fn test_chain_display() {
        let chain = PointerChain {
            base: Address::new(0x400000),
            offsets: vec![0x10, 0x20, -0x8],
            resolved: Some(Address::new(0x1234)),
        };
        assert_eq!(chain.to_string(), "[[0x400000 + 0x10] + 0x20] - 0x8 -> 0x1234");

        let plain = PointerChain {
            base: Address::new(0x400000),
            offsets: vec![0x10],
            resolved: Some(Address::new(0x400010)),
        };
        assert_eq!(plain.to_string(), "0x400000 + 0x10 -> 0x400010");
    }

    #[test]
    fn test_reverse_search_levels() {
        let image = chain_image();
        let resolver = resolver(&image);
        let target = Address::new(BASE + 0x200);

        let report = resolver
            .find_chains(target, &PointerSearchOptions::default())
            .unwrap()
            .completed()
            .unwrap();

        let level1: Vec<_> = report.at_depth(1).collect();
        assert_eq!(level1.len(), 1);
        assert_eq!(level1[0].pointer_address, Address::new(BASE + 0x120));

        // Level 2 looks for the exact slot address, which nothing stores
        assert_eq!(report.at_depth(2).count(), 0);
    }

    #[test]
    fn test_no_phantom_edges() {
        let mut data = vec![0u8; 0x200];
        let target = BASE as u64 + 0x100;
        data[0x00..0x08].copy_from_slice(&target.to_le_bytes());
        data[0x08..0x10].copy_from_slice(&target.to_le_bytes());
        data[0x40..0x48].copy_from_slice(&(BASE as u64).to_le_bytes());
        data[0x48..0x50].copy_from_slice(&(BASE as u64 + 0x40).to_le_bytes());
        let image = MemoryImage::from_bytes(Address::new(BASE), data, PointerWidth::Eight);
        let resolver = resolver(&image);

        let report = resolver
            .find_chains(Address::new(BASE + 0x100), &PointerSearchOptions::default())
            .unwrap()
            .completed()
            .unwrap();

        let mut frontier: HashSet<Address> = HashSet::from([report.target]);
        for depth in 1..=report.levels_searched {
            let level: Vec<_> = report.at_depth(depth).collect();
            for step in &level {
                assert!(frontier.contains(&step.points_to));
            }
            frontier = level.iter().map(|s| s.pointer_address).collect();
        }

        for chain in report.chains() {
            assert_eq!(resolver.resolve(chain.base, &chain.offsets), Some(report.target));
        }
        assert_eq!(report.chains().len(), report.steps.len());
    }

    #[test]
    fn test_executable_regions_ignored() {
        let target = 0x20000u64;
        let image = MemoryImage::new(PointerWidth::Eight)
            .with_region(Address::new(0x10000), target.to_le_bytes().to_vec(), Protection::read_execute())
            .with_region(Address::new(0x20000), vec![0; 16], Protection::read_write());
        let report = resolver(&image)
            .find_chains(Address::new(0x20000), &PointerSearchOptions::default())
            .unwrap()
            .completed()
            .unwrap();
        assert!(report.steps.is_empty());
    }

    #[test]
    fn test_alignment_option() {
        let mut data = vec![0u8; 0x40];
        data[0x03..0x0B].copy_from_slice(&(BASE as u64 + 0x30).to_le_bytes());
        let image = MemoryImage::from_bytes(Address::new(BASE), data, PointerWidth::Eight);
        let resolver = resolver(&image);
        let target = Address::new(BASE + 0x30);

        let mut options = PointerSearchOptions::default();
        let strict = resolver.find_chains(target, &options).unwrap().completed().unwrap();
        assert!(strict.steps.is_empty());

        options.aligned = false;
        let loose = resolver.find_chains(target, &options).unwrap().completed().unwrap();
        assert_eq!(loose.steps.len(), 1);
        assert_eq!(loose.steps[0].pointer_address, Address::new(BASE + 0x3));
    }

    #[test]
    fn test_result_and_frontier_caps() {
        let target = BASE as u64 + 0x800;
        let mut data = vec![0u8; 0x1000];
        for slot in 0..32 {
            data[slot * 8..slot * 8 + 8].copy_from_slice(&target.to_le_bytes());
        }
        let image = MemoryImage::from_bytes(Address::new(BASE), data, PointerWidth::Eight);
        let resolver = resolver(&image);

        let mut options = PointerSearchOptions::default();
        options.max_results = 5;
        let report = resolver
            .find_chains(Address::new(BASE + 0x800), &options)
            .unwrap()
            .completed()
            .unwrap();
        assert_eq!(report.steps.len(), 5);
        assert!(report.truncated);
        assert_eq!(report.steps[0].pointer_address, Address::new(BASE));

        let mut options = PointerSearchOptions::default();
        options.frontier_cap = 4;
        let report = resolver
            .find_chains(Address::new(BASE + 0x800), &options)
            .unwrap()
            .completed()
            .unwrap();
        assert!(report.frontier_capped);
        assert_eq!(report.at_depth(1).count(), 32);
    }
}
