//! Windows backend for process memory access
//!
//! Provides safe wrappers around the Windows API calls used to open a
//! process, walk its address space, list its modules and read its memory.
//! All unsafe FFI calls are contained within this module.

pub mod bindings;
pub mod process;
pub mod types;

pub use process::{RegionWalk, WindowsProcess};
pub use types::{MemoryBasicInfo, OwnedHandle};
