//! Backup identifiers and user-facing backup references

use crate::error::{CatalogError, CatalogResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

/// Unique, time-derived backup identifier
///
/// Wraps a ULID whose timestamp part is the backup's begin time, so ids sort
/// chronologically and remain unique within a server.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(Ulid);

impl BackupId {
    /// Generate an id for a backup starting now
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Generate an id for a backup that began at `begin_time`
    pub fn at(begin_time: DateTime<Utc>) -> Self {
        Self(Ulid::from_datetime(begin_time.into()))
    }

    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub fn ulid(&self) -> Ulid {
        self.0
    }

    /// First 8 characters, for compact display
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl Default for BackupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BackupId {
    type Err = CatalogError;

    fn from_str(s: &str) -> CatalogResult<Self> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| CatalogError::InvalidInput(format!("invalid backup id '{}': {}", s, e)))
    }
}

/// A backup reference as typed by a user
///
/// Shortcuts form a closed set and are resolved against the ordered catalog
/// before any engine operation runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackupRef {
    /// Full id
    Id(BackupId),
    /// Unique id prefix (at least 4 characters)
    Prefix(String),
    /// Newest DONE backup (`latest`, `last`)
    Latest,
    /// Oldest DONE backup (`oldest`, `first`)
    Oldest,
    /// Newest FAILED backup (`last-failed`)
    LastFailed,
}

/// Minimum length accepted for an id prefix
pub const MIN_PREFIX_LEN: usize = 4;

impl FromStr for BackupRef {
    type Err = CatalogError;

    fn from_str(s: &str) -> CatalogResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "latest" | "last" => return Ok(BackupRef::Latest),
            "oldest" | "first" => return Ok(BackupRef::Oldest),
            "last-failed" => return Ok(BackupRef::LastFailed),
            _ => {}
        }

        if let Ok(id) = s.parse::<BackupId>() {
            return Ok(BackupRef::Id(id));
        }

        if s.len() >= MIN_PREFIX_LEN && s.len() < 26 && s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Ok(BackupRef::Prefix(s.to_ascii_uppercase()));
        }

        Err(CatalogError::InvalidInput(format!(
            "unknown backup reference '{}' (expected an id, an id prefix, latest, oldest or last-failed)",
            s
        )))
    }
}

impl fmt::Display for BackupRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupRef::Id(id) => write!(f, "{}", id),
            BackupRef::Prefix(p) => write!(f, "{}", p),
            BackupRef::Latest => f.write_str("latest"),
            BackupRef::Oldest => f.write_str("oldest"),
            BackupRef::LastFailed => f.write_str("last-failed"),
        }
    }
}
