//! Backup record data structures

use chrono::{DateTime, Utc};
use pgkeep_core::{wal, BackupId, CatalogError, CatalogResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of physical base backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupKind {
    /// Self-contained copy
    Full,
    /// Changes since `parent_id`; never self-contained
    Incremental,
    /// Self-contained, may share files with older backups via hard links
    Rsync,
    /// Storage-level snapshot
    Snapshot,
}

impl BackupKind {
    pub fn is_incremental(self) -> bool {
        self == BackupKind::Incremental
    }

    /// Kinds an incremental backup may be taken on top of
    pub fn can_be_parent(self) -> bool {
        matches!(self, BackupKind::Full | BackupKind::Incremental)
    }
}

/// Lifecycle status of a backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackupStatus {
    Empty,
    Started,
    WaitingForWals,
    Done,
    Failed,
    /// Catalog replication between cooperating instances
    Syncing,
}

impl BackupStatus {
    /// Whether moving from `self` to `next` respects the lifecycle
    pub fn can_transition_to(self, next: BackupStatus) -> bool {
        use BackupStatus::*;
        if self == next {
            return true;
        }
        matches!(
            (self, next),
            (Empty, Started)
                | (Empty, Syncing)
                | (Empty, Failed)
                | (Started, WaitingForWals)
                | (Started, Done)
                | (Started, Failed)
                | (WaitingForWals, Done)
                | (WaitingForWals, Failed)
                | (Syncing, Done)
                | (Syncing, Failed)
        )
    }

    /// Whether a backup in this status may still need archived WAL
    pub fn requires_wal(self) -> bool {
        !matches!(self, BackupStatus::Empty | BackupStatus::Failed)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupStatus::Empty => "EMPTY",
            BackupStatus::Started => "STARTED",
            BackupStatus::WaitingForWals => "WAITING_FOR_WALS",
            BackupStatus::Done => "DONE",
            BackupStatus::Failed => "FAILED",
            BackupStatus::Syncing => "SYNCING",
        };
        f.write_str(s)
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupKind::Full => "FULL",
            BackupKind::Incremental => "INCREMENTAL",
            BackupKind::Rsync => "RSYNC",
            BackupKind::Snapshot => "SNAPSHOT",
        };
        f.write_str(s)
    }
}

/// Archival override
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeepTarget {
    #[default]
    None,
    /// Kept for point-in-time recovery to any moment after it
    Full,
    /// Kept for recovery to its own end only
    Standalone,
}

impl KeepTarget {
    pub fn is_set(self) -> bool {
        self != KeepTarget::None
    }
}

impl fmt::Display for KeepTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            KeepTarget::None => "none",
            KeepTarget::Full => "full",
            KeepTarget::Standalone => "standalone",
        };
        f.write_str(s)
    }
}

impl FromStr for KeepTarget {
    type Err = CatalogError;

    fn from_str(s: &str) -> CatalogResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(KeepTarget::Full),
            "standalone" => Ok(KeepTarget::Standalone),
            _ => Err(CatalogError::InvalidInput(format!(
                "invalid keep target '{}' (expected full or standalone)",
                s
            ))),
        }
    }
}

/// Outcome of a retention evaluation (derived, never persisted)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetentionStatus {
    Valid,
    Obsolete,
    /// Obsolete, but already being deleted by another process
    PotentiallyObsolete,
    /// No policy applies
    None,
}

impl fmt::Display for RetentionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RetentionStatus::Valid => "VALID",
            RetentionStatus::Obsolete => "OBSOLETE",
            RetentionStatus::PotentiallyObsolete => "POTENTIALLY_OBSOLETE",
            RetentionStatus::None => "NONE",
        };
        f.write_str(s)
    }
}

/// One physical base backup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backup {
    pub id: BackupId,
    pub server: String,
    pub kind: BackupKind,
    pub status: BackupStatus,
    /// Oldest WAL a recovery from this backup could need
    pub begin_wal: Option<String>,
    pub end_wal: Option<String>,
    /// Set only for incremental backups
    pub parent_id: Option<BackupId>,
    #[serde(default)]
    pub keep: KeepTarget,
    pub begin_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Persisted before any destructive deletion step
    #[serde(default)]
    pub delete_marker: bool,
    /// Payload size in bytes
    #[serde(default)]
    pub size: u64,
    /// Failure reason for FAILED backups
    #[serde(default)]
    pub error: Option<String>,
}

impl Backup {
    /// Create an EMPTY record whose id derives from `begin_time`
    pub fn new(server: impl Into<String>, kind: BackupKind, begin_time: DateTime<Utc>) -> Self {
        Self {
            id: BackupId::at(begin_time),
            server: server.into(),
            kind,
            status: BackupStatus::Empty,
            begin_wal: None,
            end_wal: None,
            parent_id: None,
            keep: KeepTarget::None,
            begin_time,
            end_time: None,
            delete_marker: false,
            size: 0,
            error: None,
        }
    }

    pub fn is_incremental(&self) -> bool {
        self.kind.is_incremental()
    }

    /// Carries a keep annotation
    pub fn is_archival(&self) -> bool {
        self.keep.is_set()
    }

    pub fn is_done(&self) -> bool {
        self.status == BackupStatus::Done
    }

    /// Instant used for chronological ordering
    pub fn order_time(&self) -> DateTime<Utc> {
        self.end_time.unwrap_or(self.begin_time)
    }

    /// Chronological sort key (ties broken by id)
    pub fn order_key(&self) -> (DateTime<Utc>, BackupId) {
        (self.order_time(), self.id)
    }

    /// Timeline the backup was taken on, from its begin WAL
    pub fn timeline(&self) -> Option<u32> {
        self.begin_wal.as_deref().and_then(wal::timeline_of)
    }

    /// Check the parent/kind invariant that holds regardless of other records
    pub fn check_shape(&self) -> CatalogResult<()> {
        match (self.is_incremental(), self.parent_id) {
            (false, Some(parent)) => Err(CatalogError::InvalidInput(format!(
                "{} backup {} cannot have a parent ({})",
                self.kind, self.id, parent
            ))),
            (true, None) => Err(CatalogError::InvalidInput(format!(
                "incremental backup {} has no parent",
                self.id
            ))),
            (true, Some(parent)) if parent == self.id => Err(CatalogError::InvalidInput(format!(
                "backup {} cannot be its own parent",
                self.id
            ))),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, day, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_status_lifecycle() {
        use BackupStatus::*;
        assert!(Empty.can_transition_to(Started));
        assert!(Started.can_transition_to(WaitingForWals));
        assert!(WaitingForWals.can_transition_to(Done));
        assert!(Started.can_transition_to(Failed));
        assert!(Done.can_transition_to(Done));

        assert!(!Done.can_transition_to(Started));
        assert!(!Failed.can_transition_to(Done));
        assert!(!WaitingForWals.can_transition_to(Started));
    }

    #[test]
    fn test_shape_invariant() {
        let full = Backup::new("pg1", BackupKind::Full, t(1));
        assert!(full.check_shape().is_ok());

        let mut bad_full = full.clone();
        bad_full.parent_id = Some(BackupId::at(t(2)));
        assert!(bad_full.check_shape().is_err());

        let orphan = Backup::new("pg1", BackupKind::Incremental, t(3));
        assert!(orphan.check_shape().is_err());

        let mut inc = orphan.clone();
        inc.parent_id = Some(full.id);
        assert!(inc.check_shape().is_ok());
    }

    #[test]
    fn test_record_json_shape() {
        let mut b = Backup::new("pg1", BackupKind::Incremental, t(1));
        b.keep = KeepTarget::None;
        b.status = BackupStatus::WaitingForWals;
        let json = serde_json::to_string(&b).unwrap();
        assert!(json.contains("\"kind\":\"INCREMENTAL\""));
        assert!(json.contains("\"status\":\"WAITING_FOR_WALS\""));
        assert!(json.contains("\"keep\":\"none\""));

        // Older records without optional fields still load
        let minimal = format!(
            r#"{{"id":"{}","server":"pg1","kind":"FULL","status":"DONE","begin_wal":null,"end_wal":null,"parent_id":null,"begin_time":"2026-01-01T00:00:00Z","end_time":null}}"#,
            b.id
        );
        let loaded: Backup = serde_json::from_str(&minimal).unwrap();
        assert_eq!(loaded.keep, KeepTarget::None);
        assert!(!loaded.delete_marker);
    }

    #[test]
    fn test_timeline_from_begin_wal() {
        let mut b = Backup::new("pg1", BackupKind::Full, t(1));
        assert_eq!(b.timeline(), None);
        b.begin_wal = Some("000000030000000000000010".to_string());
        assert_eq!(b.timeline(), Some(3));
    }

    #[test]
    fn test_keep_target_parse() {
        assert_eq!("FULL".parse::<KeepTarget>().unwrap(), KeepTarget::Full);
        assert_eq!("standalone".parse::<KeepTarget>().unwrap(), KeepTarget::Standalone);
        assert!("none".parse::<KeepTarget>().is_err());
    }
}
