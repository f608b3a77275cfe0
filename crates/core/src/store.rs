//! Durable filesystem helpers
//!
//! Every destructive helper here is idempotent: removing something that is
//! already gone succeeds, so an interrupted operation can simply be re-run.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

/// Atomic write helper
///
/// Writes data to a temporary file in the target's directory, fsyncs it,
/// then renames it over the target and fsyncs the parent directory.
pub fn atomic_write(target: &Path, data: &[u8]) -> io::Result<()> {
    let parent = target
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "target has no parent directory"))?;
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(target).map_err(|e| e.error)?;

    sync_dir(parent)
}

/// Fsync a directory so renames and unlinks inside it are durable
#[cfg(unix)]
pub fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
pub fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

/// Remove a file, treating "already absent" as success
///
/// Returns `true` if something was removed.
pub fn remove_file_idempotent(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Remove a directory tree, treating "already absent" as success
///
/// Returns `true` if something was removed.
pub fn remove_dir_idempotent(path: &Path) -> io::Result<bool> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Total size in bytes of the regular files below `dir` (0 if absent)
pub fn dir_size(dir: &Path) -> io::Result<u64> {
    if !dir.exists() {
        return Ok(0);
    }

    let mut total = 0u64;

    for entry in WalkDir::new(dir) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            total += entry.metadata().map_err(io::Error::from)?.len();
        }
    }

    Ok(total)
}
