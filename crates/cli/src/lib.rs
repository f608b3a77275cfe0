//! pgkeep command-line surface
//!
//! The binary in `main.rs` only parses arguments and maps errors to exit
//! codes; the commands live here so they can be tested in-process.

pub mod cmd;
pub mod logging;
pub mod util;

use pgkeep_core::CatalogError;

/// Exit code for a failed command
///
/// The first `CatalogError` in the chain decides; anything else is a plain
/// operation failure.
pub fn exit_code(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<CatalogError>())
        .map_or(1, |e| e.exit_code() as u8)
}
