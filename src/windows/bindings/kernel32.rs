//! Kernel32.dll bindings for process and memory queries

use crate::core::types::{MemoryError, MemoryResult};
use std::mem;
use winapi::shared::minwindef::{BOOL, FALSE, LPCVOID, LPVOID};
use winapi::um::handleapi::CloseHandle;
use winapi::um::memoryapi::{ReadProcessMemory, VirtualQueryEx};
use winapi::um::processthreadsapi::OpenProcess;
use winapi::um::winnt::{HANDLE, MEMORY_BASIC_INFORMATION};
use winapi::um::wow64apiset::IsWow64Process;

/// Safe wrapper for OpenProcess
pub fn open_process(pid: u32, desired_access: u32) -> MemoryResult<HANDLE> {
    let handle = unsafe { OpenProcess(desired_access, FALSE, pid) };
    if handle.is_null() {
        let error = std::io::Error::last_os_error();
        // ERROR_ACCESS_DENIED
        if error.raw_os_error() == Some(5) {
            Err(MemoryError::access_denied(pid, error.to_string()))
        } else {
            Err(MemoryError::ProcessNotFound(format!("PID {}: {}", pid, error)))
        }
    } else {
        Ok(handle)
    }
}

/// Safe wrapper for CloseHandle
///
/// # Safety
/// The handle must be a valid Windows handle that is not used afterwards
pub unsafe fn close_handle(handle: HANDLE) -> MemoryResult<()> {
    if handle.is_null() {
        return Ok(());
    }

    if CloseHandle(handle) == FALSE {
        Err(MemoryError::PlatformApi("CloseHandle failed".to_string()))
    } else {
        Ok(())
    }
}

/// Safe wrapper for ReadProcessMemory; succeeds only if the whole buffer was filled
///
/// # Safety
/// The handle must be a valid process handle opened with PROCESS_VM_READ
pub unsafe fn read_process_memory(
    handle: HANDLE,
    address: usize,
    buffer: &mut [u8],
) -> MemoryResult<()> {
    let mut bytes_read = 0;

    let result = ReadProcessMemory(
        handle,
        address as LPCVOID,
        buffer.as_mut_ptr() as LPVOID,
        buffer.len(),
        &mut bytes_read,
    );

    if result == FALSE {
        Err(MemoryError::read_failed(
            format!("0x{:X}", address),
            format!("ReadProcessMemory: {}", std::io::Error::last_os_error()),
        ))
    } else if bytes_read != buffer.len() {
        Err(MemoryError::read_failed(
            format!("0x{:X}", address),
            format!("partial read: {} of {} bytes", bytes_read, buffer.len()),
        ))
    } else {
        Ok(())
    }
}

/// Safe wrapper for VirtualQueryEx; `None` once `address` is past the last region
///
/// # Safety
/// The handle must be a valid process handle opened with PROCESS_QUERY_INFORMATION
pub unsafe fn virtual_query_ex(
    handle: HANDLE,
    address: usize,
) -> Option<MEMORY_BASIC_INFORMATION> {
    let mut mbi: MEMORY_BASIC_INFORMATION = mem::zeroed();

    let written = VirtualQueryEx(
        handle,
        address as LPCVOID,
        &mut mbi,
        mem::size_of::<MEMORY_BASIC_INFORMATION>(),
    );

    (written != 0).then_some(mbi)
}

/// Whether the process runs under WOW64 (a 32-bit process on 64-bit Windows)
///
/// # Safety
/// The handle must be a valid process handle
pub unsafe fn is_wow64_process(handle: HANDLE) -> MemoryResult<bool> {
    let mut wow64: BOOL = FALSE;
    if IsWow64Process(handle, &mut wow64) == FALSE {
        return Err(MemoryError::PlatformApi(format!(
            "IsWow64Process: {}",
            std::io::Error::last_os_error()
        )));
    }
    Ok(wow64 != FALSE)
}
