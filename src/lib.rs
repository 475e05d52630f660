//! Read-only process memory introspection
//!
//! Scanning, pointer-chain resolution, snapshots, structure inference,
//! symbol resolution and cheat-table files, all reading through the
//! [`memory::MemorySource`] seam so the same code runs against a live
//! process or an in-memory image.

pub mod analysis;
pub mod config;
pub mod core;
pub mod memory;
pub mod process;
pub mod symbols;
pub mod table;

#[cfg(target_os = "linux")]
pub mod linux;
#[cfg(windows)]
pub mod windows;

// Re-export main types from core module
pub use core::types::{
    Address, CancellationToken, ErrorKind, MemoryError, MemoryResult, MemoryValue, ModuleInfo, Outcome,
    PointerWidth, ProcessId, ScanReport, ScanResult, StringEncoding, ValueType,
};

pub use memory::{MemoryImage, MemoryReader, MemorySource, PointerChain, PointerResolver, Scanner};
pub use process::{AccessLevel, ProcessHandle, Session};
pub use symbols::SymbolResolver;
pub use table::CheatTable;
