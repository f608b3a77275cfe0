//! Backup catalog, retention and deletion engine
//!
//! This crate provides:
//! - Backup records and the per-server catalog (JSON records, atomic writes)
//! - The WAL archive index
//! - Retention policy classification
//! - WAL unused-segment resolution
//! - Crash-safe cascading deletion and recovery of interrupted deletions
//! - Cross-process locks and hook scripts

pub mod archive;
pub mod backup;
pub mod catalog;
pub mod deletion;
pub mod hooks;
pub mod locks;
pub mod recovery;
pub mod resolver;
pub mod retention;

// Re-exports
pub use archive::{RemovalReport, WalArchiveIndex, WalSegment};
pub use backup::{Backup, BackupKind, BackupStatus, KeepTarget, RetentionStatus};
pub use catalog::BackupCatalog;
pub use deletion::{DeletionCoordinator, DeletionMode, DeletionOutcome, SweepReport};
pub use hooks::{HookOutcome, HookRunner};
pub use locks::{BackupLock, ServerLock};
pub use recovery::RecoveryReport;
pub use resolver::WalPlan;
pub use retention::{RetentionEngine, RetentionReport};
