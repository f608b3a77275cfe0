//! Core types for pgkeep
//!
//! This crate provides:
//! - Backup identifiers (ULID-based, time-derived)
//! - WAL segment naming and ordering
//! - Retention policy syntax
//! - Configuration loading
//! - The error taxonomy shared by every crate
//! - Durable filesystem helpers (atomic write, idempotent removal)

pub mod config;
pub mod error;
pub mod id;
pub mod policy;
pub mod store;
pub mod wal;

// Re-exports
pub use config::{Config, HookSettings, ServerConfig};
pub use error::{CatalogError, CatalogResult, DeletionStep};
pub use id::{BackupId, BackupRef};
pub use policy::{RetentionMode, RetentionPolicy, WindowUnit};
pub use wal::WalName;
