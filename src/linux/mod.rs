//! Linux backend for process memory access
//!
//! Regions and modules come from `/proc/<pid>/maps`; reads go through
//! positioned reads on `/proc/<pid>/mem`, so concurrent readers never share
//! a file cursor.

pub mod maps;
pub mod process;

pub use process::LinuxProcess;
