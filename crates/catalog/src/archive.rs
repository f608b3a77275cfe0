//! WAL archive index for one server
//!
//! `wals/xlog.db` holds one JSON line per archived file, kept sorted by
//! name. Segment files live under `wals/<timeline+log>/<name>`; history
//! files sit directly in `wals/`.

use crate::locks::ArchiveLock;
use chrono::{DateTime, Utc};
use pgkeep_core::store::{atomic_write, dir_size, remove_dir_idempotent, remove_file_idempotent};
use pgkeep_core::{wal, CatalogError, CatalogResult, DeletionStep};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Lines, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Index file name inside `wals/`
pub const XLOG_DB: &str = "xlog.db";

/// One archived WAL file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalSegment {
    pub name: String,
    pub size: u64,
    #[serde(default)]
    pub compression: Option<String>,
    pub archived_at: DateTime<Utc>,
}

impl WalSegment {
    pub fn new(name: impl Into<String>, size: u64, archived_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size,
            compression: None,
            archived_at,
        }
    }
}

/// Result of a bulk removal
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RemovalReport {
    /// Names dropped from the index
    pub removed: Vec<String>,
    pub files_removed: usize,
    /// Hash directories removed as a unit
    pub dirs_removed: usize,
    pub bytes_freed: u64,
}

/// Lazy, ordered iterator over the index
///
/// Restart from any point by asking for `segments(Some(name))` again.
pub struct Segments {
    lines: Option<Lines<BufReader<File>>>,
    from: Option<String>,
    server: String,
}

impl Iterator for Segments {
    type Item = CatalogResult<WalSegment>;

    fn next(&mut self) -> Option<Self::Item> {
        let lines = self.lines.as_mut()?;
        loop {
            let line = match lines.next()? {
                Ok(line) => line,
                Err(e) => return Some(Err(CatalogError::storage(&self.server, "-", "read-archive", e))),
            };
            if line.trim().is_empty() {
                continue;
            }

            let segment: WalSegment = match serde_json::from_str(&line) {
                Ok(s) => s,
                Err(e) => {
                    return Some(Err(CatalogError::storage(
                        &self.server,
                        "-",
                        "read-archive",
                        io::Error::new(io::ErrorKind::InvalidData, e),
                    )))
                }
            };

            if let Some(from) = &self.from {
                if segment.name.as_str() < from.as_str() {
                    continue;
                }
            }
            return Some(Ok(segment));
        }
    }
}

/// WAL archive index of a single server
pub struct WalArchiveIndex {
    server: String,
    wals_dir: PathBuf,
}

impl WalArchiveIndex {
    /// Open the archive rooted at `server_dir`, creating `wals/` if needed
    pub fn open(server: &str, server_dir: &Path) -> CatalogResult<Self> {
        let wals_dir = server_dir.join("wals");
        fs::create_dir_all(&wals_dir).map_err(|e| CatalogError::storage(server, "-", "open-archive", e))?;
        Ok(Self {
            server: server.to_string(),
            wals_dir,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn wals_dir(&self) -> &Path {
        &self.wals_dir
    }

    fn index_path(&self) -> PathBuf {
        self.wals_dir.join(XLOG_DB)
    }

    /// Where the file for `name` is stored
    pub fn segment_path(&self, name: &str) -> PathBuf {
        let dir = wal::hash_dir(name);
        if dir.is_empty() {
            self.wals_dir.join(name)
        } else {
            self.wals_dir.join(dir).join(name)
        }
    }

    /// Segments in name order, starting at `from` (inclusive) if given
    pub fn segments(&self, from: Option<&str>) -> CatalogResult<Segments> {
        let lines = match File::open(self.index_path()) {
            Ok(file) => Some(BufReader::new(file).lines()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => return Err(CatalogError::storage(&self.server, "-", "read-archive", e)),
        };

        Ok(Segments {
            lines,
            from: from.map(str::to_string),
            server: self.server.clone(),
        })
    }

    fn read_all(&self) -> CatalogResult<Vec<WalSegment>> {
        self.segments(None)?.collect()
    }

    fn write_all(&self, segments: &[WalSegment]) -> CatalogResult<()> {
        let mut buf = Vec::new();
        for segment in segments {
            serde_json::to_writer(&mut buf, segment).map_err(|e| {
                CatalogError::storage(&self.server, "-", "write-archive", io::Error::new(io::ErrorKind::InvalidData, e))
            })?;
            buf.push(b'\n');
        }
        atomic_write(&self.index_path(), &buf).map_err(|e| CatalogError::storage(&self.server, "-", "write-archive", e))
    }

    /// Whether `name` is recorded in the index
    pub fn is_present(&self, name: &str) -> CatalogResult<bool> {
        // Sorted: the first entry at or after `name` decides
        match self.segments(Some(name))?.next() {
            Some(segment) => Ok(segment?.name == name),
            None => Ok(false),
        }
    }

    /// Get the number of indexed files
    pub fn count(&self) -> CatalogResult<usize> {
        let mut n = 0;
        for segment in self.segments(None)? {
            segment?;
            n += 1;
        }
        Ok(n)
    }

    /// Record a newly archived file
    ///
    /// Appends when the name sorts last, otherwise rewrites the index in
    /// order. Re-registering a name replaces its record.
    pub fn append(&self, segment: WalSegment) -> CatalogResult<()> {
        wal::WalName::parse(&segment.name)?;
        let _lock = ArchiveLock::acquire(&self.server, &self.wals_dir)?;

        let mut all = self.read_all()?;
        let sorts_last = all.last().map_or(true, |last| last.name < segment.name);

        if sorts_last {
            let mut line = serde_json::to_vec(&segment).map_err(|e| {
                CatalogError::storage(&self.server, "-", "write-archive", io::Error::new(io::ErrorKind::InvalidData, e))
            })?;
            line.push(b'\n');

            let mut file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.index_path())
                .map_err(|e| CatalogError::storage(&self.server, "-", "write-archive", e))?;
            file.write_all(&line)
                .and_then(|_| file.sync_all())
                .map_err(|e| CatalogError::storage(&self.server, "-", "write-archive", e))?;
            return Ok(());
        }

        all.retain(|s| s.name != segment.name);
        all.push(segment);
        all.sort_by(|a, b| a.name.cmp(&b.name));
        self.write_all(&all)
    }

    /// Remove files and index entries; names already gone are skipped
    ///
    /// Files go first, so a crash can only leave index entries whose files
    /// are already gone, never unindexed files.
    pub fn remove(&self, names: &[String]) -> CatalogResult<RemovalReport> {
        let mut report = RemovalReport::default();
        if names.is_empty() {
            return Ok(report);
        }

        let _lock = ArchiveLock::acquire(&self.server, &self.wals_dir)?;
        let targets: HashSet<&str> = names.iter().map(String::as_str).collect();
        let storage_err = |e| CatalogError::storage(&self.server, "-", DeletionStep::DeletingWal, e);

        let mut by_dir: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for name in targets.iter().copied() {
            by_dir.entry(wal::hash_dir(name)).or_default().push(name);
        }

        for (dir, members) in by_dir {
            if !dir.is_empty() {
                let dir_path = self.wals_dir.join(dir);
                if !dir_path.exists() {
                    continue;
                }
                if dir_only_contains(&dir_path, &targets).map_err(storage_err)? {
                    let freed = dir_size(&dir_path).map_err(storage_err)?;
                    if remove_dir_idempotent(&dir_path).map_err(storage_err)? {
                        debug!("Removed WAL directory {}", dir_path.display());
                        report.dirs_removed += 1;
                        report.files_removed += members.len();
                        report.bytes_freed += freed;
                    }
                    continue;
                }
            }

            for name in members {
                let path = self.segment_path(name);
                let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
                if remove_file_idempotent(&path).map_err(storage_err)? {
                    report.files_removed += 1;
                    report.bytes_freed += size;
                }
            }
        }

        let all = self.read_all()?;
        let before = all.len();
        let (gone, kept): (Vec<WalSegment>, Vec<WalSegment>) =
            all.into_iter().partition(|s| targets.contains(s.name.as_str()));

        if kept.len() != before {
            self.write_all(&kept)?;
        }
        report.removed = gone.into_iter().map(|s| s.name).collect();

        info!(
            "Removed {} WAL files from server {} ({} directories, {} bytes)",
            report.removed.len(),
            self.server,
            report.dirs_removed,
            report.bytes_freed
        );
        Ok(report)
    }

    /// Sum of indexed sizes
    pub fn total_size(&self) -> CatalogResult<u64> {
        let mut total = 0;
        for segment in self.segments(None)? {
            total += segment?.size;
        }
        Ok(total)
    }
}

fn dir_only_contains(dir: &Path, targets: &HashSet<&str>) -> io::Result<bool> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        match name.to_str() {
            Some(n) if targets.contains(n) => {}
            _ => return Ok(false),
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn seg(n: u32) -> String {
        format!("{:08X}{:08X}{:08X}", 1, n / 256, n % 256)
    }

    fn archive_with(temp_dir: &TempDir, names: &[String]) -> WalArchiveIndex {
        let archive = WalArchiveIndex::open("pg1", temp_dir.path()).unwrap();
        let when = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        for name in names {
            let path = archive.segment_path(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, vec![0u8; 16]).unwrap();
            archive.append(WalSegment::new(name.clone(), 16, when)).unwrap();
        }
        archive
    }

    #[test]
    fn test_segments_are_ordered_and_restartable() {
        let temp_dir = TempDir::new().unwrap();
        let names = vec![seg(3), seg(1), seg(2), seg(5)];
        let archive = archive_with(&temp_dir, &names);

        let all: Vec<String> = archive.segments(None).unwrap().map(|s| s.unwrap().name).collect();
        assert_eq!(all, vec![seg(1), seg(2), seg(3), seg(5)]);

        let from: Vec<String> = archive
            .segments(Some(&seg(3)))
            .unwrap()
            .map(|s| s.unwrap().name)
            .collect();
        assert_eq!(from, vec![seg(3), seg(5)]);

        assert!(archive.is_present(&seg(2)).unwrap());
        assert!(!archive.is_present(&seg(4)).unwrap());
        assert_eq!(archive.count().unwrap(), 4);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let archive = archive_with(&temp_dir, &[seg(1), seg(2), seg(3)]);

        let report = archive.remove(&[seg(1), seg(2)]).unwrap();
        assert_eq!(report.removed, vec![seg(1), seg(2)]);
        assert_eq!(report.files_removed, 2);
        assert!(!archive.segment_path(&seg(1)).exists());
        assert!(archive.segment_path(&seg(3)).exists());

        // Second pass: nothing left to do, still no error
        let again = archive.remove(&[seg(1), seg(2)]).unwrap();
        assert!(again.removed.is_empty());
        assert_eq!(again.files_removed, 0);
        assert_eq!(archive.count().unwrap(), 1);
    }

    #[test]
    fn test_remove_whole_directory() {
        let temp_dir = TempDir::new().unwrap();
        // seg(1), seg(2) share hash dir 0000000100000000; seg(257) is in ...01
        let archive = archive_with(&temp_dir, &[seg(1), seg(2), seg(257)]);

        let report = archive.remove(&[seg(1), seg(2)]).unwrap();
        assert_eq!(report.dirs_removed, 1);
        assert_eq!(report.bytes_freed, 32);
        assert!(!temp_dir.path().join("wals/0000000100000000").exists());
        assert!(temp_dir.path().join("wals/0000000100000001").exists());
    }

    #[test]
    fn test_index_entry_without_file() {
        let temp_dir = TempDir::new().unwrap();
        let archive = archive_with(&temp_dir, &[seg(1), seg(2)]);

        // Simulate a crash after the file removal but before the index rewrite
        fs::remove_file(archive.segment_path(&seg(1))).unwrap();

        let report = archive.remove(&[seg(1)]).unwrap();
        assert_eq!(report.removed, vec![seg(1)]);
        assert_eq!(report.files_removed, 0);
        assert!(!archive.is_present(&seg(1)).unwrap());
    }

    #[test]
    fn test_history_files_at_root() {
        let temp_dir = TempDir::new().unwrap();
        let archive = WalArchiveIndex::open("pg1", temp_dir.path()).unwrap();
        assert_eq!(
            archive.segment_path("00000002.history"),
            temp_dir.path().join("wals/00000002.history")
        );
        assert!(archive
            .append(WalSegment::new("not-a-wal", 1, Utc::now()))
            .is_err());
    }
}
