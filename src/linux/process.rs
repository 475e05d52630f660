//! Process memory backend over `/proc/<pid>/mem`

use super::maps::{modules_from_regions, parse_maps};
use crate::core::types::{Address, MemoryError, MemoryResult, ModuleInfo, PointerWidth};
use crate::memory::regions::MemoryRegion;
use std::fs::{self, File};
use std::io::{ErrorKind, Read};
use std::os::unix::fs::FileExt;
use tracing::debug;

const ELF_MAGIC: [u8; 4] = [0x7F, b'E', b'L', b'F'];
const ELFCLASS32: u8 = 1;
const ELFCLASS64: u8 = 2;

/// Open `/proc/<pid>/mem` plus the pid it belongs to
#[derive(Debug)]
pub struct LinuxProcess {
    pid: u32,
    mem: File,
}

impl LinuxProcess {
    /// Opens the memory file read-only; ptrace access rules apply
    pub fn open(pid: u32) -> MemoryResult<Self> {
        let path = format!("/proc/{}/mem", pid);
        let mem = File::open(&path).map_err(|e| open_error(pid, e))?;
        Ok(LinuxProcess { pid, mem })
    }

    pub fn is_attachable(pid: u32) -> bool {
        File::open(format!("/proc/{}/mem", pid)).is_ok()
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn read(&self, address: Address, size: usize) -> MemoryResult<Vec<u8>> {
        let mut buffer = vec![0u8; size];
        self.mem
            .read_exact_at(&mut buffer, address.as_u64())
            .map_err(|e| MemoryError::read_failed(address, e.to_string()))?;
        Ok(buffer)
    }

    /// Pointer width from the ELF class of the main executable
    pub fn pointer_width(&self) -> MemoryResult<PointerWidth> {
        let path = format!("/proc/{}/exe", self.pid);
        let mut header = [0u8; 5];
        let read = File::open(&path).and_then(|mut f| f.read_exact(&mut header));
        if let Err(e) = read {
            debug!("Cannot read {}: {}; assuming native width", path, e);
            return Ok(PointerWidth::native());
        }
        elf_class(&header)
    }

    pub fn regions(&self) -> MemoryResult<Vec<MemoryRegion>> {
        let path = format!("/proc/{}/maps", self.pid);
        let content = fs::read_to_string(&path).map_err(|e| open_error(self.pid, e))?;
        Ok(parse_maps(&content))
    }

    pub fn modules(&self) -> MemoryResult<Vec<ModuleInfo>> {
        Ok(modules_from_regions(&self.regions()?))
    }
}

fn elf_class(header: &[u8]) -> MemoryResult<PointerWidth> {
    if header.get(..4) != Some(&ELF_MAGIC[..]) {
        return Err(MemoryError::malformed_image("executable is not an ELF file"));
    }
    match header.get(4) {
        Some(&ELFCLASS32) => Ok(PointerWidth::Four),
        Some(&ELFCLASS64) => Ok(PointerWidth::Eight),
        other => Err(MemoryError::malformed_image(format!(
            "unknown ELF class {:?}",
            other
        ))),
    }
}

fn open_error(pid: u32, error: std::io::Error) -> MemoryError {
    match error.kind() {
        ErrorKind::NotFound => MemoryError::ProcessNotFound(format!("PID {}", pid)),
        ErrorKind::PermissionDenied => MemoryError::access_denied(pid, error.to_string()),
        _ => MemoryError::IoError(error),
    }
}
