//! Error taxonomy for memory introspection

use std::fmt;
use thiserror::Error;

/// Broad category of a [`MemoryError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Cannot open or attach; fatal to the requested operation only
    Access,
    /// A single read failed; callers skip and continue
    Read,
    /// Bad argument, rejected before any I/O
    Validation,
    /// Malformed input document
    Parse,
    Io,
    Platform,
}

/// Main error type for memory operations
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Access denied to process {pid}: {reason}")]
    AccessDenied { pid: u32, reason: String },

    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    #[error("Failed to read memory at {address}: {reason}")]
    ReadFailed { address: String, reason: String },

    #[error("Invalid memory address: {0}")]
    InvalidAddress(String),

    #[error("Invalid read size {requested}: must be between 1 and {max} bytes")]
    InvalidSize { requested: usize, max: usize },

    #[error("Invalid value type: {0}")]
    InvalidValueType(String),

    #[error("Invalid value '{text}' for type {value_type}")]
    InvalidValue { text: String, value_type: String },

    #[error("Invalid pattern format: {0}")]
    InvalidPattern(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to parse cheat table: {0}")]
    TableParse(String),

    #[error("Malformed image: {0}")]
    MalformedImage(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsApiError(#[from] windows::core::Error),

    #[error("Platform API: {0}")]
    PlatformApi(String),

    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Result type alias for memory operations
pub type MemoryResult<T> = Result<T, MemoryError>;

impl MemoryError {
    /// Classifies the error into the access/read/validation/parse taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            MemoryError::ProcessNotFound(_)
            | MemoryError::AccessDenied { .. }
            | MemoryError::InvalidHandle(_) => ErrorKind::Access,
            MemoryError::ReadFailed { .. } => ErrorKind::Read,
            MemoryError::InvalidAddress(_)
            | MemoryError::InvalidSize { .. }
            | MemoryError::InvalidValueType(_)
            | MemoryError::InvalidValue { .. }
            | MemoryError::InvalidPattern(_)
            | MemoryError::InvalidArgument(_)
            | MemoryError::UnsupportedOperation(_) => ErrorKind::Validation,
            MemoryError::TableParse(_) | MemoryError::MalformedImage(_) => ErrorKind::Parse,
            MemoryError::IoError(_) | MemoryError::JsonError(_) => ErrorKind::Io,
            #[cfg(windows)]
            MemoryError::WindowsApiError(_) => ErrorKind::Platform,
            MemoryError::PlatformApi(_) => ErrorKind::Platform,
        }
    }

    /// Whether a multi-region operation may skip this failure and continue
    pub fn is_recoverable(&self) -> bool {
        self.kind() == ErrorKind::Read
    }

    /// Creates an error from the calling thread's last OS error
    #[cfg(windows)]
    pub fn last_os_error() -> Self {
        MemoryError::WindowsApiError(windows::core::Error::from_win32())
    }

    /// Creates an access denied error for a process
    pub fn access_denied(pid: u32, reason: impl Into<String>) -> Self {
        MemoryError::AccessDenied {
            pid,
            reason: reason.into(),
        }
    }

    /// Creates a read failed error
    pub fn read_failed(address: impl fmt::Display, reason: impl Into<String>) -> Self {
        MemoryError::ReadFailed {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub fn invalid_size(requested: usize, max: usize) -> Self {
        MemoryError::InvalidSize { requested, max }
    }

    pub fn invalid_value(text: impl Into<String>, value_type: impl fmt::Display) -> Self {
        MemoryError::InvalidValue {
            text: text.into(),
            value_type: value_type.to_string(),
        }
    }

    pub fn table_parse(reason: impl Into<String>) -> Self {
        MemoryError::TableParse(reason.into())
    }

    pub fn malformed_image(reason: impl Into<String>) -> Self {
        MemoryError::MalformedImage(reason.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MemoryError::InvalidAddress("0xDEADBEEF".to_string());
        assert_eq!(err.to_string(), "Invalid memory address: 0xDEADBEEF");

        let err = MemoryError::access_denied(1234, "ptrace scope");
        assert_eq!(err.to_string(), "Access denied to process 1234: ptrace scope");

        let err = MemoryError::invalid_size(0, 4096);
        assert_eq!(
            err.to_string(),
            "Invalid read size 0: must be between 1 and 4096 bytes"
        );

        let err = MemoryError::invalid_value("abc", "i32");
        assert_eq!(err.to_string(), "Invalid value 'abc' for type i32");
    }

    #[test]
    fn test_error_kinds() {
        let cases: Vec<(MemoryError, ErrorKind)> = vec![
            (MemoryError::ProcessNotFound("1".into()), ErrorKind::Access),
            (MemoryError::access_denied(1, "no"), ErrorKind::Access),
            (MemoryError::InvalidHandle("closed".into()), ErrorKind::Access),
            (MemoryError::read_failed("0x1000", "unmapped"), ErrorKind::Read),
            (MemoryError::InvalidPattern("GG".into()), ErrorKind::Validation),
            (MemoryError::invalid_size(0, 1), ErrorKind::Validation),
            (MemoryError::table_parse("unexpected eof"), ErrorKind::Parse),
            (MemoryError::malformed_image("no MZ"), ErrorKind::Parse),
        ];

        for (error, kind) in cases {
            assert_eq!(error.kind(), kind, "{}", error);
        }
    }

    #[test]
    fn test_only_read_errors_are_recoverable() {
        assert!(MemoryError::read_failed("0x1", "x").is_recoverable());
        assert!(!MemoryError::access_denied(1, "x").is_recoverable());
        assert!(!MemoryError::InvalidPattern("x".into()).is_recoverable());
    }

    #[test]
    fn test_from_implementations() {
        use std::io;

        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "test");
        let mem_err: MemoryError = io_err.into();
        assert!(matches!(mem_err, MemoryError::IoError(_)));
        assert_eq!(mem_err.kind(), ErrorKind::Io);

        let json_err = serde_json::from_str::<String>("invalid json").unwrap_err();
        let mem_err: MemoryError = json_err.into();
        assert!(matches!(mem_err, MemoryError::JsonError(_)));
    }
}
