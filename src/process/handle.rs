//! Process handle management
//!
//! A [`ProcessHandle`] is the single owner of the OS resource bound to one
//! process. It implements [`MemorySource`], so every analysis reads through
//! it the same way it reads through an in-memory image.

use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo, PointerWidth};
use crate::memory::regions::MemoryRegion;
use crate::memory::source::MemorySource;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

#[cfg(windows)]
mod sys {
    use super::AccessLevel;
    use crate::core::types::MemoryResult;
    use crate::memory::regions::MemoryRegion;
    pub use crate::windows::WindowsProcess as Target;
    use crate::windows::process::{FULL_ACCESS, READ_ACCESS};

    pub fn open(pid: u32, access: AccessLevel) -> MemoryResult<Target> {
        let rights = match access {
            AccessLevel::ReadOnly => READ_ACCESS,
            AccessLevel::Full => FULL_ACCESS,
        };
        Target::open(pid, rights)
    }

    pub fn regions(target: &Target) -> MemoryResult<Box<dyn Iterator<Item = MemoryRegion> + '_>> {
        Ok(Box::new(target.regions()))
    }

    pub fn close(target: Target) -> MemoryResult<()> {
        target.close()
    }
}

#[cfg(target_os = "linux")]
mod sys {
    use super::AccessLevel;
    use crate::core::types::MemoryResult;
    pub use crate::linux::LinuxProcess as Target;
    use crate::memory::regions::MemoryRegion;

    pub fn open(pid: u32, _access: AccessLevel) -> MemoryResult<Target> {
        Target::open(pid)
    }

    pub fn regions(target: &Target) -> MemoryResult<Box<dyn Iterator<Item = MemoryRegion> + '_>> {
        Ok(Box::new(target.regions()?.into_iter()))
    }

    pub fn close(target: Target) -> MemoryResult<()> {
        drop(target);
        Ok(())
    }
}

#[cfg(not(any(windows, target_os = "linux")))]
mod sys {
    use super::AccessLevel;
    use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo, PointerWidth};
    use crate::memory::regions::MemoryRegion;

    fn unsupported() -> MemoryError {
        MemoryError::UnsupportedOperation(format!(
            "process access is not available on {}",
            std::env::consts::OS
        ))
    }

    #[derive(Debug)]
    pub enum Target {}

    impl Target {
        pub fn is_attachable(_pid: u32) -> bool {
            false
        }

        pub fn read(&self, _address: Address, _size: usize) -> MemoryResult<Vec<u8>> {
            match *self {}
        }

        pub fn pointer_width(&self) -> MemoryResult<PointerWidth> {
            match *self {}
        }

        pub fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
            match *self {}
        }
    }

    pub fn open(_pid: u32, _access: AccessLevel) -> MemoryResult<Target> {
        Err(unsupported())
    }

    pub fn regions(target: &Target) -> MemoryResult<Box<dyn Iterator<Item = MemoryRegion> + '_>> {
        match *target {}
    }

    pub fn close(target: Target) -> MemoryResult<()> {
        match target {}
    }
}

/// Rights requested when opening a process
///
/// Memory writes are never performed regardless of the level; `Full` only
/// widens the rights the OS handle is opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AccessLevel {
    /// Query and read rights only
    #[default]
    ReadOnly,
    /// All rights the platform grants
    Full,
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessLevel::ReadOnly => write!(f, "read-only"),
            AccessLevel::Full => write!(f, "full"),
        }
    }
}

/// Owned handle to one process
pub struct ProcessHandle {
    target: sys::Target,
    pid: u32,
    access: AccessLevel,
    width: PointerWidth,
}

impl ProcessHandle {
    /// Opens `pid` and determines its pointer width once
    pub fn open(pid: u32, access: AccessLevel) -> MemoryResult<Self> {
        if pid == 0 {
            return Err(MemoryError::InvalidArgument("PID 0 cannot be opened".to_string()));
        }

        let target = sys::open(pid, access)?;
        let width = target.pointer_width()?;
        info!("Opened process {} ({}, {})", pid, access, width);

        Ok(ProcessHandle {
            target,
            pid,
            access,
            width,
        })
    }

    /// Opens `pid` with read rights only
    pub fn open_read_only(pid: u32) -> MemoryResult<Self> {
        Self::open(pid, AccessLevel::ReadOnly)
    }

    /// Whether `pid` could currently be opened for reading
    pub fn is_attachable(pid: u32) -> bool {
        pid != 0 && sys::Target::is_attachable(pid)
    }

    /// Releases the OS resource; borrowed readers must have returned first
    pub fn close(self) -> MemoryResult<()> {
        debug!("Closing process {}", self.pid);
        sys::close(self.target)
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn access(&self) -> AccessLevel {
        self.access
    }

    /// Lazily enumerates every region, committed or not
    ///
    /// Each call restarts the walk against the current state of the target.
    pub fn region_iter(&self) -> MemoryResult<Box<dyn Iterator<Item = MemoryRegion> + '_>> {
        sys::regions(&self.target)
    }
}

impl MemorySource for ProcessHandle {
    fn read_bytes(&self, address: Address, size: usize) -> MemoryResult<Vec<u8>> {
        self.target.read(address, size)
    }

    fn regions(&self) -> MemoryResult<Vec<MemoryRegion>> {
        Ok(self.region_iter()?.filter(|r| r.is_committed()).collect())
    }

    fn pointer_width(&self) -> PointerWidth {
        self.width
    }

    fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        self.target.modules()
    }
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("access", &self.access)
            .field("width", &self.width)
            .finish()
    }
}

impl fmt::Display for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Process {} ({}, {})", self.pid, self.access, self.width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pid_zero_rejected() {
        let err = ProcessHandle::open(0, AccessLevel::ReadOnly).unwrap_err();
        assert!(matches!(err, MemoryError::InvalidArgument(_)));
        assert!(!ProcessHandle::is_attachable(0));
    }

    #[test]
    fn test_access_level_display() {
        assert_eq!(AccessLevel::default(), AccessLevel::ReadOnly);
        assert_eq!(AccessLevel::ReadOnly.to_string(), "read-only");
        assert_eq!(AccessLevel::Full.to_string(), "full");
    }

    #[cfg(any(windows, target_os = "linux"))]
    #[test]
    #[cfg_attr(miri, ignore = "FFI not supported in Miri")]
    fn test_open_current_process() {
        let pid = std::process::id();
        assert!(ProcessHandle::is_attachable(pid));

        let handle = ProcessHandle::open_read_only(pid).unwrap();
        assert_eq!(handle.pid(), pid);
        assert_eq!(handle.pointer_width(), PointerWidth::native());

        let marker: u64 = 0xFEED_FACE_CAFE_BEEF;
        let address = Address::new(&marker as *const u64 as usize);
        let bytes = handle.read_bytes(address, 8).unwrap();
        assert_eq!(bytes, marker.to_le_bytes());

        let regions = handle.regions().unwrap();
        assert!(regions.iter().all(|r| r.is_committed()));
        assert!(regions.iter().any(|r| r.contains(address)));

        assert!(handle.to_string().starts_with(&format!("Process {}", pid)));
        handle.close().unwrap();
    }
}
