//! Error taxonomy for catalog, retention and deletion operations.

use std::fmt;
use thiserror::Error;

/// Step of a deletion at which a storage failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionStep {
    Requested,
    Marked,
    DeletingData,
    ResolvingWal,
    DeletingWal,
    Done,
}

impl fmt::Display for DeletionStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeletionStep::Requested => "requested",
            DeletionStep::Marked => "marked",
            DeletionStep::DeletingData => "deleting-data",
            DeletionStep::ResolvingWal => "resolving-wal",
            DeletionStep::DeletingWal => "deleting-wal",
            DeletionStep::Done => "done",
        };
        f.write_str(name)
    }
}

/// Catalog, retention and deletion errors.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid status transition for backup {backup_id}: {from} -> {to}")]
    InvalidTransition {
        backup_id: String,
        from: String,
        to: String,
    },

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("deletion already in progress for backup {backup_id} of server {server}{}", holder_suffix(.holder_pid))]
    Concurrency {
        server: String,
        backup_id: String,
        holder_pid: Option<u32>,
    },

    #[error("storage error on server {server} (backup {backup_id}, step {step}): {source}")]
    StorageIo {
        server: String,
        backup_id: String,
        step: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("hook script {script} stopped {phase} for server {server}")]
    HookAborted {
        server: String,
        phase: String,
        script: String,
    },
}

fn holder_suffix(pid: &Option<u32>) -> String {
    match pid {
        Some(pid) => format!(" (held by pid {})", pid),
        None => String::new(),
    }
}

impl CatalogError {
    /// Process exit code surfaced to callers
    pub fn exit_code(&self) -> i32 {
        match self {
            CatalogError::StorageIo { .. } => 2,
            CatalogError::InvalidInput(_) | CatalogError::Config(_) => 3,
            _ => 1,
        }
    }

    /// Only storage failures are retried, by the next maintenance pass.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::StorageIo { .. })
    }

    /// Storage failure with enough context to diagnose it
    ///
    /// `step` is a deletion step or a short operation name such as `load`.
    pub fn storage(
        server: &str,
        backup_id: impl fmt::Display,
        step: impl fmt::Display,
        source: std::io::Error,
    ) -> Self {
        CatalogError::StorageIo {
            server: server.to_string(),
            backup_id: backup_id.to_string(),
            step: step.to_string(),
            source,
        }
    }
}

/// Result type for catalog operations.
pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        assert_eq!(
            CatalogError::storage("pg1", "01ABC", DeletionStep::DeletingWal, io).exit_code(),
            2
        );
        assert_eq!(CatalogError::InvalidInput("x".into()).exit_code(), 3);
        assert_eq!(CatalogError::Config("x".into()).exit_code(), 3);
        assert_eq!(CatalogError::NotFound("x".into()).exit_code(), 1);
        assert_eq!(CatalogError::PolicyViolation("x".into()).exit_code(), 1);
    }

    #[test]
    fn test_concurrency_message() {
        let err = CatalogError::Concurrency {
            server: "pg1".into(),
            backup_id: "01ABC".into(),
            holder_pid: Some(42),
        };
        let msg = err.to_string();
        assert!(msg.contains("already in progress"));
        assert!(msg.contains("pid 42"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_message_has_context() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = CatalogError::storage("pg1", "01ABC", DeletionStep::DeletingData, io);
        let msg = err.to_string();
        assert!(msg.contains("pg1"));
        assert!(msg.contains("01ABC"));
        assert!(msg.contains("deleting-data"));
        assert!(err.is_retryable());
    }
}
