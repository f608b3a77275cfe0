//! Lock file management for cross-process coordination
//!
//! Locks are `flock(2)` locks on files under `<server_dir>/locks/`, so they
//! are released by the kernel when the holding process dies. The holder
//! writes its PID into the file and clears it on release; observers read
//! that PID instead of taking the lock themselves.
//!
//! Lock files are never unlinked: removing one while another process waits
//! on it would let that process lock an inode nobody else can see.

use anyhow::{Context, Result};
use pgkeep_core::{BackupId, CatalogError, CatalogResult};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// Lock file content
#[derive(Debug, Serialize, Deserialize)]
pub struct LockContent {
    pub pid: u32,
    pub started_at: u64,
}

/// An exclusively held lock file
pub struct LockFile {
    path: PathBuf,
    file: File,
}

impl LockFile {
    fn open(path: &Path) -> Result<File> {
        // Ensure locks directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create locks directory")?;
        }

        OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))
    }

    /// Try to acquire the lock without blocking
    ///
    /// Returns `None` if another holder has it.
    pub fn try_acquire(path: &Path) -> Result<Option<Self>> {
        let mut file = Self::open(path)?;

        if !try_flock_exclusive(&file)? {
            return Ok(None);
        }

        write_lock_content(&mut file)?;
        Ok(Some(Self {
            path: path.to_path_buf(),
            file,
        }))
    }

    /// Acquire the lock, waiting for the current holder to release it
    pub fn acquire(path: &Path) -> Result<Self> {
        let mut file = Self::open(path)?;
        flock_exclusive(&file)?;
        write_lock_content(&mut file)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    /// Whether a live process claims the lock at `path`
    ///
    /// Read-only: never creates the file, never takes the lock. A crashed
    /// holder leaves its PID behind, which the liveness check filters out.
    pub fn is_held(path: &Path) -> bool {
        Self::holder(path).map_or(false, |content| is_process_alive(content.pid))
    }

    /// Read who holds (or last held) the lock
    pub fn holder(path: &Path) -> Option<LockContent> {
        let mut file = File::open(path).ok()?;
        read_lock_content(&mut file).ok()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFile {
    fn drop(&mut self) {
        // Still locked here; the flock goes away when `file` closes
        let _ = self.file.set_len(0);
    }
}

/// Per-server lock serializing catalog mutations
pub struct ServerLock {
    _lock: LockFile,
}

impl ServerLock {
    pub fn path(server_dir: &Path) -> PathBuf {
        server_dir.join("locks/server.lock")
    }

    /// Block until the server lock is ours
    pub fn acquire(server: &str, server_dir: &Path) -> CatalogResult<Self> {
        let lock = LockFile::acquire(&Self::path(server_dir))
            .map_err(|e| CatalogError::storage(server, "-", "server-lock", to_io(e)))?;
        tracing::trace!("Acquired server lock for {}", server);
        Ok(Self { _lock: lock })
    }
}

/// Per-backup lock held for the whole deletion of that backup
pub struct BackupLock {
    backup_id: BackupId,
    _lock: LockFile,
}

impl BackupLock {
    pub fn path(server_dir: &Path, id: &BackupId) -> PathBuf {
        server_dir.join(format!("locks/delete-{}.lock", id))
    }

    /// Acquire without blocking; a held lock is a `Concurrency` error
    pub fn try_acquire(server: &str, server_dir: &Path, id: &BackupId) -> CatalogResult<Self> {
        let path = Self::path(server_dir, id);
        match LockFile::try_acquire(&path) {
            Ok(Some(lock)) => Ok(Self {
                backup_id: *id,
                _lock: lock,
            }),
            Ok(None) => Err(CatalogError::Concurrency {
                server: server.to_string(),
                backup_id: id.to_string(),
                holder_pid: LockFile::holder(&path).map(|c| c.pid),
            }),
            Err(e) => Err(CatalogError::storage(server, id, "backup-lock", to_io(e))),
        }
    }

    /// Whether another holder is deleting `id` right now
    pub fn is_held(server_dir: &Path, id: &BackupId) -> bool {
        LockFile::is_held(&Self::path(server_dir, id))
    }

    pub fn backup_id(&self) -> &BackupId {
        &self.backup_id
    }
}

/// Lock guarding rewrites of the WAL archive index
pub struct ArchiveLock {
    _lock: LockFile,
}

impl ArchiveLock {
    pub fn acquire(server: &str, wals_dir: &Path) -> CatalogResult<Self> {
        let lock = LockFile::acquire(&wals_dir.join("xlog.db.lock"))
            .map_err(|e| CatalogError::storage(server, "-", "archive-lock", to_io(e)))?;
        Ok(Self { _lock: lock })
    }
}

fn to_io(e: anyhow::Error) -> std::io::Error {
    match e.downcast::<std::io::Error>() {
        Ok(io) => io,
        Err(other) => std::io::Error::new(std::io::ErrorKind::Other, format!("{:#}", other)),
    }
}

/// Write lock content (PID + timestamp)
fn write_lock_content(file: &mut File) -> Result<()> {
    let content = LockContent {
        pid: std::process::id(),
        started_at: current_timestamp_ms(),
    };

    let serialized = serde_json::to_string(&content).context("Failed to serialize lock content")?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

/// Read lock content from file
fn read_lock_content(file: &mut File) -> Result<LockContent> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    let content: LockContent =
        serde_json::from_str(&contents).context("Failed to deserialize lock content")?;
    Ok(content)
}

/// Try to acquire exclusive file lock (non-blocking)
#[cfg(unix)]
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(_) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Acquire exclusive file lock, blocking
#[cfg(unix)]
fn flock_exclusive(file: &File) -> Result<()> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    loop {
        match flock(file.as_raw_fd(), FlockArg::LockExclusive) {
            Ok(_) => return Ok(()),
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(e.into()),
        }
    }
}

/// Check if a process is still running
#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Signal 0 only checks existence and permissions
    match kill(Pid::from_raw(pid as i32), None) {
        Ok(_) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        Err(_) => true,
    }
}

/// Get current timestamp in milliseconds
fn current_timestamp_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
