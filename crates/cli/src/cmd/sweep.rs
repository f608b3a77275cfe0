//! Apply retention policies

use crate::util;
use anyhow::{Context, Result};
use catalog::SweepReport;
use owo_colors::OwoColorize;
use pgkeep_core::{CatalogError, Config};
use tracing::error;

pub async fn run(config: &Config, server: &str) -> Result<()> {
    // 1. Resolve target servers
    let servers = util::servers(config, server)?;

    // 2. Sweep every server on its own blocking task
    let mut handles = Vec::new();
    for settings in servers {
        let name = settings.name.clone();
        let handle = tokio::task::spawn_blocking(move || -> Result<SweepReport> {
            let coordinator = util::open_server(settings)?;
            Ok(coordinator.retention_sweep()?)
        });
        handles.push((name, handle));
    }

    // 3. Display results in server order
    let mut first_error: Option<anyhow::Error> = None;
    for (name, handle) in handles {
        let result = handle
            .await
            .with_context(|| format!("Retention sweep of '{}' panicked", name))?;

        match result {
            Ok(report) => {
                let failure = display(report);
                if first_error.is_none() {
                    first_error = failure.map(anyhow::Error::from);
                }
            }
            Err(e) => {
                error!("Retention sweep of server {} failed: {:#}", name, e);
                eprintln!("{} {}: {:#}", "✗".red(), name.bold(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }
    }

    match first_error {
        Some(e) => Err(e.context("Retention sweep finished with errors")),
        None => Ok(()),
    }
}

/// Print one server's report and hand back its first failure
fn display(report: SweepReport) -> Option<CatalogError> {
    println!("{} {}", "Retention sweep:".bold(), report.server.cyan());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let policy = &report.classification.policy;
    match policy.mode {
        Some(_) => println!("Policy:              {}", policy.to_string().yellow()),
        None => println!("{}", "No retention policy configured - nothing to do".dimmed()),
    }
    for warning in &report.classification.warnings {
        println!("{} {}", "!".yellow(), warning);
    }

    for outcome in &report.recovered {
        println!(
            "{} Completed interrupted deletion of {} ({} backups)",
            "✓".green(),
            outcome.target.to_string().cyan(),
            outcome.removed_backups.len()
        );
    }
    for outcome in &report.deleted {
        println!(
            "{} Deleted obsolete backup {} ({} backups, {} WAL files, {})",
            "✓".green(),
            outcome.target.to_string().cyan(),
            outcome.removed_backups.len(),
            outcome.removed_segments.len(),
            util::format_size(outcome.bytes_freed)
        );
    }
    for id in &report.skipped {
        println!("{} Skipped {}: deletion already in progress", "-".dimmed(), id.to_string().cyan());
    }
    for (id, e) in &report.failed {
        println!("{} Failed to delete {}: {}", "✗".red(), id.to_string().cyan(), e);
    }

    if report.deleted.is_empty() && report.recovered.is_empty() && report.failed.is_empty() {
        println!("{}", "No obsolete backups".dimmed());
    }
    println!();

    report.failed.into_iter().next().map(|(_, e)| e)
}
