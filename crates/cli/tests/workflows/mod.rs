//! Workflow integration tests
//!
//! Tests for complete workflows that exercise multiple commands
//! and validate end-to-end behavior.

pub mod delete_backup;
pub mod edge_cases;
pub mod keep_lifecycle;
pub mod listing;
pub mod retention_sweep;
