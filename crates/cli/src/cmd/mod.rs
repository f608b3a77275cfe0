//! CLI command implementations

pub mod delete;
pub mod keep;
pub mod list;
pub mod show;
pub mod sweep;
