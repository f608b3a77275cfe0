//! Shared utilities for CLI commands

use anyhow::{Context, Result};
use catalog::{Backup, BackupCatalog, DeletionCoordinator, RetentionReport, RetentionStatus};
use chrono::{DateTime, Utc};
use owo_colors::OwoColorize;
use pgkeep_core::{BackupId, BackupRef, CatalogError, Config, ServerConfig};
use serde::Serialize;

/// Resolve `<server|all>` to the settings of each server
pub fn servers(config: &Config, name: &str) -> Result<Vec<ServerConfig>> {
    if name == "all" {
        let names = config.server_names();
        if names.is_empty() {
            return Err(CatalogError::Config("no servers configured".to_string()).into());
        }
        return names
            .iter()
            .map(|n| config.server(n).map_err(Into::into))
            .collect();
    }
    Ok(vec![config.server(name)?])
}

/// Open the engine for one server
pub fn open_server(server: ServerConfig) -> Result<DeletionCoordinator> {
    let name = server.name.clone();
    DeletionCoordinator::open(server).with_context(|| format!("Failed to open server '{}'", name))
}

/// Parse a backup id, prefix or shortcut
pub fn parse_ref(reference: &str) -> Result<BackupRef> {
    Ok(reference.parse::<BackupRef>()?)
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// Format timestamp as absolute time ("2024-01-03 14:30:00")
pub fn format_time(ts: Option<DateTime<Utc>>) -> String {
    match ts {
        Some(ts) => ts.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

/// Format timestamp as relative time ("2 hours ago")
pub fn format_relative_time(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let seconds = (now - ts).num_seconds();
    if seconds < 0 {
        return "in the future".to_string();
    }

    if seconds < 60 {
        format!("{} seconds ago", seconds)
    } else if seconds < 3600 {
        format!("{} minutes ago", seconds / 60)
    } else if seconds < 86400 {
        format!("{} hours ago", seconds / 3600)
    } else if seconds < 604800 {
        format!("{} days ago", seconds / 86400)
    } else {
        format!("{} weeks ago", seconds / 604800)
    }
}

/// Retention status with its display color
pub fn colored_status(status: RetentionStatus) -> String {
    let text = status.to_string();
    match status {
        RetentionStatus::Valid => text.green().to_string(),
        RetentionStatus::Obsolete => text.red().to_string(),
        RetentionStatus::PotentiallyObsolete => text.yellow().to_string(),
        RetentionStatus::None => text.dimmed().to_string(),
    }
}

/// A backup record with its derived fields, as printed by `--json`
#[derive(Debug, Serialize)]
pub struct BackupView {
    #[serde(flatten)]
    pub backup: Backup,
    pub retention_status: String,
    pub root_id: Option<BackupId>,
    pub children_ids: Vec<BackupId>,
}

impl BackupView {
    pub fn new(catalog: &BackupCatalog, report: &RetentionReport, backup: Backup) -> Self {
        let root_id = catalog.root_of(&backup.id).ok().map(|root| root.id);
        let children_ids = catalog
            .children_of(&backup.id)
            .map(|children| children.iter().map(|c| c.id).collect())
            .unwrap_or_default();
        Self {
            retention_status: report.status_of(&backup.id).to_string(),
            root_id,
            children_ids,
            backup,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
        assert_eq!(format_size(1536), "1.50 KB");
    }

    #[test]
    fn test_format_relative_time() {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(format_relative_time(now, now), "0 seconds ago");
        assert!(format_relative_time(now - Duration::hours(1), now).contains("hour"));
        assert!(format_relative_time(now - Duration::days(1), now).contains("day"));
        assert!(format_relative_time(now - Duration::days(30), now).contains("weeks"));
        assert_eq!(format_relative_time(now + Duration::days(1), now), "in the future");
    }

    #[test]
    fn test_format_time() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 30, 5).unwrap();
        assert_eq!(format_time(Some(ts)), "2026-03-01 12:30:05");
        assert_eq!(format_time(None), "-");
    }

    #[test]
    fn test_servers_all() {
        let config = Config::from_toml_str("[servers.a]\n[servers.b]\n").unwrap();
        let names: Vec<String> = servers(&config, "all").unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["a", "b"]);

        let err = servers(&config, "zz").unwrap_err();
        assert_eq!(crate::exit_code(&err), 1);

        let empty = Config::from_toml_str("").unwrap();
        assert_eq!(crate::exit_code(&servers(&empty, "all").unwrap_err()), 3);
    }

    #[test]
    fn test_parse_ref_invalid_is_input_error() {
        let err = parse_ref("x").unwrap_err();
        assert_eq!(crate::exit_code(&err), 3);
        assert_eq!(parse_ref("latest").unwrap(), BackupRef::Latest);
    }
}
