//! Page protection flags, normalized across platforms

use serde::{Deserialize, Serialize};
use std::fmt;

/// Protection of a region, independent of the OS encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Protection {
    pub read: bool,
    pub write: bool,
    pub execute: bool,
    pub copy_on_write: bool,
    pub guard: bool,
}

impl Protection {
    // Windows page protection constants
    pub const PAGE_NOACCESS: u32 = 0x01;
    pub const PAGE_READONLY: u32 = 0x02;
    pub const PAGE_READWRITE: u32 = 0x04;
    pub const PAGE_WRITECOPY: u32 = 0x08;
    pub const PAGE_EXECUTE: u32 = 0x10;
    pub const PAGE_EXECUTE_READ: u32 = 0x20;
    pub const PAGE_EXECUTE_READWRITE: u32 = 0x40;
    pub const PAGE_EXECUTE_WRITECOPY: u32 = 0x80;
    pub const PAGE_GUARD: u32 = 0x100;

    pub const fn read_only() -> Self {
        Protection {
            read: true,
            write: false,
            execute: false,
            copy_on_write: false,
            guard: false,
        }
    }

    pub const fn read_write() -> Self {
        Protection {
            read: true,
            write: true,
            execute: false,
            copy_on_write: false,
            guard: false,
        }
    }

    pub const fn read_execute() -> Self {
        Protection {
            read: true,
            write: false,
            execute: true,
            copy_on_write: false,
            guard: false,
        }
    }

    pub const fn no_access() -> Self {
        Protection {
            read: false,
            write: false,
            execute: false,
            copy_on_write: false,
            guard: false,
        }
    }

    /// Decodes a Windows `PAGE_*` protection value
    pub fn from_page_flags(value: u32) -> Self {
        let base = value & 0xFF;
        let (read, write, execute, copy_on_write) = match base {
            Self::PAGE_READONLY => (true, false, false, false),
            Self::PAGE_READWRITE => (true, true, false, false),
            Self::PAGE_WRITECOPY => (true, true, false, true),
            Self::PAGE_EXECUTE => (false, false, true, false),
            Self::PAGE_EXECUTE_READ => (true, false, true, false),
            Self::PAGE_EXECUTE_READWRITE => (true, true, true, false),
            Self::PAGE_EXECUTE_WRITECOPY => (true, true, true, true),
            _ => (false, false, false, false),
        };
        Protection {
            read,
            write,
            execute,
            copy_on_write,
            guard: value & Self::PAGE_GUARD != 0,
        }
    }

    /// Decodes a `/proc/<pid>/maps` permission string such as `r-xp`
    pub fn from_perms(perms: &str) -> Self {
        let bytes = perms.as_bytes();
        Protection {
            read: bytes.first() == Some(&b'r'),
            write: bytes.get(1) == Some(&b'w'),
            execute: bytes.get(2) == Some(&b'x'),
            copy_on_write: bytes.get(3) == Some(&b'p') && bytes.get(1) == Some(&b'w'),
            guard: false,
        }
    }

    /// Readable and not a guard page
    pub fn is_readable(&self) -> bool {
        self.read && !self.guard
    }

    pub fn is_writable(&self) -> bool {
        self.write
    }

    pub fn is_executable(&self) -> bool {
        self.execute
    }
}

impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.read && !self.write && !self.execute {
            return f.write_str("---");
        }
        let mut out = String::new();
        if self.read {
            out.push('R');
        }
        if self.write {
            out.push_str(if self.copy_on_write { "C" } else { "W" });
        }
        if self.execute {
            out.push('X');
        }
        if self.guard {
            out.push_str("+G");
        }
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_flags() {
        let rw = Protection::from_page_flags(Protection::PAGE_READWRITE);
        assert!(rw.is_readable() && rw.is_writable() && !rw.is_executable());

        let rx = Protection::from_page_flags(Protection::PAGE_EXECUTE_READ);
        assert!(rx.is_readable() && rx.is_executable() && !rx.is_writable());

        let guarded = Protection::from_page_flags(Protection::PAGE_READWRITE | Protection::PAGE_GUARD);
        assert!(guarded.guard);
        assert!(!guarded.is_readable());

        let none = Protection::from_page_flags(Protection::PAGE_NOACCESS);
        assert!(!none.is_readable());

        let exec_only = Protection::from_page_flags(Protection::PAGE_EXECUTE);
        assert!(!exec_only.is_readable());
    }

    #[test]
    fn test_perms_string() {
        let text = Protection::from_perms("r-xp");
        assert_eq!(text, Protection::read_execute());

        let data = Protection::from_perms("rw-p");
        assert!(data.is_writable());
        assert!(data.copy_on_write);

        let shared = Protection::from_perms("rw-s");
        assert!(!shared.copy_on_write);

        assert!(!Protection::from_perms("---p").is_readable());
    }

    #[test]
    fn test_display() {
        assert_eq!(Protection::read_only().to_string(), "R");
        assert_eq!(Protection::read_write().to_string(), "RW");
        assert_eq!(Protection::read_execute().to_string(), "RX");
        assert_eq!(Protection::no_access().to_string(), "---");
        assert_eq!(
            Protection::from_page_flags(Protection::PAGE_EXECUTE_WRITECOPY).to_string(),
            "RCX"
        );
    }
}
