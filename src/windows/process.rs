//! Process memory backend over OpenProcess / ReadProcessMemory

use crate::core::types::{Address, MemoryResult, ModuleInfo, PointerWidth};
use crate::memory::regions::MemoryRegion;
use crate::windows::bindings::{kernel32, psapi};
use crate::windows::types::{MemoryBasicInfo, OwnedHandle};
use tracing::debug;

/// PROCESS_QUERY_INFORMATION | PROCESS_VM_READ
pub const READ_ACCESS: u32 = 0x0400 | 0x0010;
/// PROCESS_ALL_ACCESS
pub const FULL_ACCESS: u32 = 0x1F_FFFF;

pub struct WindowsProcess {
    handle: OwnedHandle,
}

impl WindowsProcess {
    pub fn open(pid: u32, desired_access: u32) -> MemoryResult<Self> {
        Ok(WindowsProcess {
            handle: OwnedHandle::open(pid, desired_access)?,
        })
    }

    /// Whether a read-only handle could be opened right now
    pub fn is_attachable(pid: u32) -> bool {
        OwnedHandle::open(pid, READ_ACCESS).is_ok_and(|handle| handle.close().is_ok())
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid()
    }

    pub fn close(self) -> MemoryResult<()> {
        self.handle.close()
    }

    pub fn read(&self, address: Address, size: usize) -> MemoryResult<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        unsafe { kernel32::read_process_memory(self.handle.raw(), address.as_usize(), &mut buffer)? };
        Ok(buffer)
    }

    pub fn pointer_width(&self) -> MemoryResult<PointerWidth> {
        if PointerWidth::native() == PointerWidth::Four {
            return Ok(PointerWidth::Four);
        }
        let wow64 = unsafe { kernel32::is_wow64_process(self.handle.raw())? };
        Ok(if wow64 {
            PointerWidth::Four
        } else {
            PointerWidth::Eight
        })
    }

    /// Walks the address space with VirtualQueryEx, one region per call
    pub fn regions(&self) -> RegionWalk<'_> {
        RegionWalk {
            process: self,
            next: 0,
            done: false,
        }
    }

    pub fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        let raw = self.handle.raw();
        let handles = unsafe { psapi::enum_process_modules(raw)? };
        let mut modules = Vec::with_capacity(handles.len());

        for module in handles {
            let info = match unsafe { psapi::get_module_information(raw, module) } {
                Ok(info) => info,
                Err(e) => {
                    debug!("Skipping module {:p}: {}", module, e);
                    continue;
                }
            };
            let name = unsafe { psapi::get_module_base_name(raw, module) }
                .unwrap_or_else(|_| format!("module_{:X}", info.lpBaseOfDll as usize));
            let path = unsafe { psapi::get_module_file_name(raw, module) }.unwrap_or_default();

            modules.push(
                ModuleInfo::new(
                    name,
                    Address::new(info.lpBaseOfDll as usize),
                    info.SizeOfImage as usize,
                )
                .with_path(path),
            );
        }

        modules.sort_by_key(|m| m.base_address);
        Ok(modules)
    }
}

/// Lazy region walk; restart by calling [`WindowsProcess::regions`] again
pub struct RegionWalk<'a> {
    process: &'a WindowsProcess,
    next: usize,
    done: bool,
}

impl Iterator for RegionWalk<'_> {
    type Item = MemoryRegion;

    fn next(&mut self) -> Option<MemoryRegion> {
        if self.done {
            return None;
        }
        let mbi = unsafe { kernel32::virtual_query_ex(self.process.handle.raw(), self.next) };
        let Some(mbi) = mbi else {
            self.done = true;
            return None;
        };
        let info = MemoryBasicInfo::from(mbi);
        let end = info.end();
        if info.region_size == 0 || end <= self.next {
            self.done = true;
        } else {
            self.next = end;
        }
        Some(info.to_region())
    }
}

impl std::fmt::Debug for WindowsProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowsProcess")
            .field("pid", &self.handle.pid())
            .field("rights", &format_args!("0x{:X}", self.handle.rights()))
            .field("handle", &format_args!("{:p}", self.handle.raw()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg_attr(miri, ignore = "FFI not supported in Miri")]
    fn test_open_current_process() {
        let process = WindowsProcess::open(std::process::id(), READ_ACCESS).unwrap();
        let value = 0xC0FFEEu32;
        let bytes = process
            .read(Address::new(&value as *const u32 as usize), 4)
            .unwrap();
        assert_eq!(bytes, 0xC0FFEEu32.to_le_bytes());
        assert_eq!(process.pointer_width().unwrap(), PointerWidth::native());
        assert_eq!(process.pid(), std::process::id());
    }

    #[test]
    #[cfg_attr(miri, ignore = "FFI not supported in Miri")]
    fn test_region_walk_is_ordered() {
        let process = WindowsProcess::open(std::process::id(), READ_ACCESS).unwrap();
        let regions: Vec<_> = process.regions().collect();
        assert!(!regions.is_empty());
        assert!(regions
            .windows(2)
            .all(|w| w[0].base_address < w[1].base_address));
    }

    #[test]
    #[cfg_attr(miri, ignore = "FFI not supported in Miri")]
    fn test_modules_include_executable() {
        let process = WindowsProcess::open(std::process::id(), READ_ACCESS).unwrap();
        let modules = process.modules().unwrap();
        assert!(modules
            .iter()
            .any(|m| m.name.to_ascii_lowercase().ends_with(".exe")));
    }
}
