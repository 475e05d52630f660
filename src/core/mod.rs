//! Core module containing fundamental types
//!
//! This module provides the foundational building blocks used throughout
//! the crate: addresses, memory values, scan results, pointer width and
//! the error types.

pub mod types;

pub use types::{
    Address, CancellationToken, MemoryError, MemoryResult, MemoryValue, ModuleInfo, Outcome,
    PointerWidth, ScanReport, ScanResult, ValueType,
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
