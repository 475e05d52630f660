//! Process HANDLE owned together with the pid and rights it was opened with

use crate::core::types::MemoryResult;
use crate::windows::bindings::kernel32;
use std::mem::ManuallyDrop;
use tracing::{debug, trace};
use winapi::um::winnt::HANDLE;

/// Open process handle; closed when dropped or through [`OwnedHandle::close`]
pub struct OwnedHandle {
    raw: HANDLE,
    pid: u32,
    rights: u32,
}

impl OwnedHandle {
    /// Opens `pid` with the `rights` access mask
    pub fn open(pid: u32, rights: u32) -> MemoryResult<Self> {
        let raw = kernel32::open_process(pid, rights)?;
        trace!("opened handle {:p} for process {} (rights 0x{:X})", raw, pid, rights);
        Ok(OwnedHandle { raw, pid, rights })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Access mask passed to `OpenProcess`
    pub fn rights(&self) -> u32 {
        self.rights
    }

    pub(crate) fn raw(&self) -> HANDLE {
        self.raw
    }

    /// Closes the handle now, reporting a failed close instead of ignoring it
    pub fn close(self) -> MemoryResult<()> {
        let this = ManuallyDrop::new(self);
        unsafe { kernel32::close_handle(this.raw) }
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        if let Err(e) = unsafe { kernel32::close_handle(self.raw) } {
            debug!("closing handle for process {}: {}", self.pid, e);
        }
    }
}

// Reads through a process handle are independent of the calling thread
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}
