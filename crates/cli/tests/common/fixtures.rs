//! On-disk server fixtures
//!
//! Builds a configuration file and a server directory with backups and
//! archived WAL, written through the catalog crate the way a backup run
//! leaves them.

#![allow(dead_code)]

use catalog::{Backup, BackupCatalog, BackupKind, BackupStatus, KeepTarget, WalArchiveIndex, WalSegment};
use chrono::{DateTime, Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// WAL segment name on timeline 1
pub fn seg(n: u32) -> String {
    format!("00000001{:08X}{:08X}", 0, n)
}

/// A configured server `pg1` in its own temporary directory
pub struct TestServer {
    _temp: TempDir,
    pub name: String,
    pub config_path: PathBuf,
    pub server_dir: PathBuf,
    pub now: DateTime<Utc>,
}

impl TestServer {
    /// `section` is the body of `[servers.pg1]`; `wal_count` segments are archived
    pub fn new(section: &str, wal_count: u32) -> Self {
        let temp = TempDir::new().expect("Failed to create temp dir");
        let base = temp.path().join("servers");
        let config_path = temp.path().join("pgkeep.toml");

        let config = format!(
            "[global]\nbase_directory = \"{}\"\nhook_retry_sleep_secs = 0\n\n[servers.pg1]\n{}\n",
            base.display(),
            section
        );
        fs::write(&config_path, config).expect("Failed to write config");

        let server = Self {
            name: "pg1".to_string(),
            server_dir: base.join("pg1"),
            config_path,
            now: Utc::now(),
            _temp: temp,
        };

        let archive = server.archive();
        for n in 0..wal_count {
            let path = archive.segment_path(&seg(n));
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, vec![0u8; 64]).unwrap();
            archive.append(WalSegment::new(seg(n), 64, server.now)).unwrap();
        }
        server
    }

    /// Server with a `REDUNDANCY <n>` policy and 40 archived segments
    pub fn with_redundancy(n: u32) -> Self {
        Self::new(&format!("retention_policy = \"REDUNDANCY {}\"", n), 40)
    }

    pub fn config(&self) -> &Path {
        &self.config_path
    }

    pub fn catalog(&self) -> BackupCatalog {
        BackupCatalog::open(&self.name, &self.server_dir).unwrap()
    }

    pub fn archive(&self) -> WalArchiveIndex {
        WalArchiveIndex::open(&self.name, &self.server_dir).unwrap()
    }

    /// Register a DONE backup that ended `days_ago` days ago, with its payload
    pub fn add_backup(&self, kind: BackupKind, days_ago: i64, begin: u32, parent: Option<&Backup>) -> Backup {
        let end = self.now - Duration::days(days_ago);
        let mut b = Backup::new(self.name.clone(), kind, end - Duration::hours(1));
        b.status = BackupStatus::Done;
        b.end_time = Some(end);
        b.begin_wal = Some(seg(begin));
        b.end_wal = Some(seg(begin + 1));
        b.parent_id = parent.map(|p| p.id);
        b.size = 4096;

        let catalog = self.catalog();
        catalog.insert(b.clone()).unwrap();
        let data = catalog.data_dir(&b.id);
        fs::create_dir_all(&data).unwrap();
        fs::write(data.join("base.tar"), vec![0u8; 4096]).unwrap();
        b
    }

    pub fn add_full(&self, days_ago: i64, begin: u32) -> Backup {
        self.add_backup(BackupKind::Full, days_ago, begin, None)
    }

    /// Register a backup that began `days_ago` days ago and never completed
    pub fn add_unfinished(&self, days_ago: i64, status: BackupStatus) -> Backup {
        let begin = self.now - Duration::days(days_ago);
        let mut b = Backup::new(self.name.clone(), BackupKind::Full, begin);
        b.status = status;
        if status == BackupStatus::Failed {
            b.error = Some("connection lost".to_string());
        }
        self.catalog().insert(b.clone()).unwrap();
        b
    }

    pub fn keep(&self, backup: &Backup, target: KeepTarget) {
        self.catalog().set_keep(&backup.id, target).unwrap();
    }

    pub fn has_backup(&self, backup: &Backup) -> bool {
        self.catalog().contains(&backup.id)
    }

    /// Archived segment names, oldest first
    pub fn wal_names(&self) -> Vec<String> {
        self.archive().segments(None).unwrap().map(|s| s.unwrap().name).collect()
    }
}
