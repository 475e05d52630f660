//! Memory operations over a read-only [`MemorySource`]
//!
//! This module provides:
//! - Region enumeration and filtering
//! - Bounded, typed reads
//! - Value, range and wildcard-pattern scanning
//! - Pointer-chain resolution and reverse search
//! - Snapshots, diffs and progressive scans

pub mod pointer;
pub mod reader;
pub mod regions;
pub mod scanner;
pub mod snapshot;
pub mod source;

pub use pointer::{ChainStep, PointerChain, PointerResolver, PointerSearchOptions, PointerSearchReport};
pub use crate::core::types::StringEncoding;
pub use reader::{MemoryReader, ReadLimits};
pub use regions::{MemoryRegion, Protection, RegionFilter, RegionState, RegionType};
pub use scanner::{Pattern, ScanOptions, Scanner};
pub use snapshot::{diff_bytes, ScanFilter, Snapshot, SnapshotDiff, SnapshotEngine};
pub use source::{MemoryImage, MemorySource};
