//! PSAPI.dll bindings for module enumeration

use crate::core::types::{MemoryError, MemoryResult};
use std::ffi::OsString;
use std::os::windows::ffi::OsStringExt;
use winapi::shared::minwindef::{FALSE, HMODULE, MAX_PATH};
use winapi::um::psapi::{
    EnumProcessModulesEx, GetModuleBaseNameW, GetModuleFileNameExW, GetModuleInformation,
    LIST_MODULES_ALL, MODULEINFO,
};
use winapi::um::winnt::HANDLE;

/// Safe wrapper for EnumProcessModulesEx, growing the buffer until every module fits
///
/// # Safety
/// The handle must be a valid process handle with query and read access
pub unsafe fn enum_process_modules(handle: HANDLE) -> MemoryResult<Vec<HMODULE>> {
    let mut modules: Vec<HMODULE> = vec![std::ptr::null_mut(); 256];

    loop {
        let mut bytes_needed = 0u32;
        let capacity = (modules.len() * std::mem::size_of::<HMODULE>()) as u32;
        let result = EnumProcessModulesEx(
            handle,
            modules.as_mut_ptr(),
            capacity,
            &mut bytes_needed,
            LIST_MODULES_ALL,
        );

        if result == FALSE {
            return Err(MemoryError::PlatformApi(format!(
                "EnumProcessModulesEx: {}",
                std::io::Error::last_os_error()
            )));
        }

        let count = bytes_needed as usize / std::mem::size_of::<HMODULE>();
        if count <= modules.len() {
            modules.truncate(count);
            return Ok(modules);
        }
        modules.resize(count, std::ptr::null_mut());
    }
}

/// Safe wrapper for GetModuleInformation
///
/// # Safety
/// The handle must be a valid process handle and module must belong to it
pub unsafe fn get_module_information(handle: HANDLE, module: HMODULE) -> MemoryResult<MODULEINFO> {
    let mut info = MODULEINFO {
        lpBaseOfDll: std::ptr::null_mut(),
        SizeOfImage: 0,
        EntryPoint: std::ptr::null_mut(),
    };

    let result = GetModuleInformation(
        handle,
        module,
        &mut info,
        std::mem::size_of::<MODULEINFO>() as u32,
    );

    if result == FALSE {
        return Err(MemoryError::PlatformApi(
            "GetModuleInformation failed".to_string(),
        ));
    }

    Ok(info)
}

/// Safe wrapper for GetModuleBaseNameW
///
/// # Safety
/// The handle must be a valid process handle and module must belong to it
pub unsafe fn get_module_base_name(handle: HANDLE, module: HMODULE) -> MemoryResult<String> {
    let mut buffer = vec![0u16; MAX_PATH];
    let length = GetModuleBaseNameW(handle, module, buffer.as_mut_ptr(), MAX_PATH as u32);
    if length == 0 {
        return Err(MemoryError::PlatformApi(
            "GetModuleBaseNameW failed".to_string(),
        ));
    }
    Ok(wide_to_string(&buffer[..length as usize]))
}

/// Safe wrapper for GetModuleFileNameExW
///
/// # Safety
/// The handle must be a valid process handle and module must belong to it
pub unsafe fn get_module_file_name(handle: HANDLE, module: HMODULE) -> MemoryResult<String> {
    let mut buffer = vec![0u16; MAX_PATH];
    let length = GetModuleFileNameExW(handle, module, buffer.as_mut_ptr(), MAX_PATH as u32);
    if length == 0 {
        return Err(MemoryError::PlatformApi(
            "GetModuleFileNameExW failed".to_string(),
        ));
    }
    Ok(wide_to_string(&buffer[..length as usize]))
}

fn wide_to_string(wide: &[u16]) -> String {
    let len = wide.iter().position(|&c| c == 0).unwrap_or(wide.len());
    OsString::from_wide(&wide[..len])
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr;

    #[test]
    #[cfg_attr(miri, ignore = "FFI not supported in Miri")]
    fn test_null_handle_operations() {
        unsafe {
            assert!(enum_process_modules(ptr::null_mut()).is_err());
            assert!(get_module_information(ptr::null_mut(), ptr::null_mut()).is_err());
            assert!(get_module_base_name(ptr::null_mut(), ptr::null_mut()).is_err());
        }
    }

    #[test]
    #[cfg_attr(miri, ignore = "FFI not supported in Miri")]
    fn test_current_process_modules() {
        unsafe {
            let current = winapi::um::processthreadsapi::GetCurrentProcess();
            let modules = enum_process_modules(current).unwrap();
            assert!(!modules.is_empty());

            let name = get_module_base_name(current, modules[0]).unwrap();
            assert!(name.to_ascii_lowercase().ends_with(".exe"));
        }
    }

    #[test]
    fn test_wide_to_string_stops_at_nul() {
        let wide: Vec<u16> = "ntdll.dll\0junk".encode_utf16().collect();
        assert_eq!(wide_to_string(&wide), "ntdll.dll");
    }
}
