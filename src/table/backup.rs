//! Timestamped table backups
//!
//! A backup is a byte copy of the table file placed next to it, named
//! `<file>.<YYYYmmdd_HHMMSS_mmm>.bak`. Names sort chronologically.

use crate::core::types::{MemoryError, MemoryResult};
use chrono::{DateTime, Local};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

pub const BACKUP_EXTENSION: &str = "bak";

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%3f";

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Backup location for `path` taken at `at`
pub fn backup_path(path: &Path, at: DateTime<Local>) -> PathBuf {
    path.with_file_name(format!(
        "{}.{}.{}",
        file_name(path),
        at.format(TIMESTAMP_FORMAT),
        BACKUP_EXTENSION
    ))
}

/// Copies `path` to a fresh backup and returns the backup's location
pub fn create_backup(path: &Path) -> MemoryResult<PathBuf> {
    if !path.is_file() {
        return Err(MemoryError::IoError(io::Error::new(
            io::ErrorKind::NotFound,
            format!("no table to back up at {}", path.display()),
        )));
    }

    let first = backup_path(path, Local::now());
    let mut target = first.clone();
    let mut attempt = 1;
    // Two backups inside the same millisecond
    while target.exists() {
        target = first.with_extension(format!("{}.{}", attempt, BACKUP_EXTENSION));
        attempt += 1;
    }

    fs::copy(path, &target)?;
    info!("Backed up {} to {}", path.display(), target.display());
    Ok(target)
}

/// Existing backups of `path`, oldest first
pub fn list_backups(path: &Path) -> MemoryResult<Vec<PathBuf>> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let prefix = format!("{}.", file_name(path));
    let suffix = format!(".{}", BACKUP_EXTENSION);

    let mut backups = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) && name.ends_with(&suffix) {
            backups.push(entry.path());
        }
    }
    backups.sort();
    Ok(backups)
}
