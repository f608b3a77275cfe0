//! Delete a backup and its dependents

use crate::util;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use pgkeep_core::Config;

pub async fn run(config: &Config, server: &str, backup: &str) -> Result<()> {
    // 1. Resolve settings and the backup reference
    let settings = config.server(server)?;
    let reference = util::parse_ref(backup)?;

    // 2. Run the deletion off the async runtime
    let outcome = tokio::task::spawn_blocking(move || {
        let coordinator = util::open_server(settings)?;
        coordinator.delete(&reference).map_err(anyhow::Error::from)
    })
    .await
    .context("Deletion task panicked")??;

    // 3. Display results
    println!("{}", "Deletion Complete".green().bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();
    for id in &outcome.removed_backups {
        let marker = if *id == outcome.target { "" } else { " (incremental descendant)" };
        println!("{} Deleted backup {}{}", "✓".green(), id.to_string().cyan(), marker.dimmed());
    }
    println!();
    println!("WAL files removed:   {}", outcome.removed_segments.len().to_string().yellow());
    if let Some(reason) = &outcome.wal_blocked_by {
        println!("{}", format!("WAL kept: {}", reason).dimmed());
    }
    println!("Space freed:         {}", util::format_size(outcome.bytes_freed).green());

    Ok(())
}
