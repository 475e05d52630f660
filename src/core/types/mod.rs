//! Core type definitions
//!
//! Address wrappers, typed memory values, scan results, process facts,
//! cancellation and the error taxonomy shared by every subsystem.

mod address;
mod cancel;
mod error;
mod process_info;
mod scan_result;
mod value;

pub use address::Address;
pub use cancel::{CancellationToken, Outcome};
pub use error::{ErrorKind, MemoryError, MemoryResult};
pub use process_info::{ModuleInfo, PointerWidth};
pub use scan_result::{RegionRef, ScanReport, ScanResult};
pub use value::{MemoryValue, StringEncoding, ValueType};

// Common type aliases
pub type ProcessId = u32;
pub type Size = usize;
