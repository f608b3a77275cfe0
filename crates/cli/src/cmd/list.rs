//! List backups with their retention status

use crate::util::{self, BackupView};
use anyhow::{Context, Result};
use chrono::Utc;
use owo_colors::OwoColorize;
use pgkeep_core::Config;

pub async fn run(config: &Config, server: &str, json: bool) -> Result<()> {
    let servers = util::servers(config, server)?;
    let now = Utc::now();
    let mut views = Vec::new();

    for settings in servers {
        let name = settings.name.clone();
        let coordinator = util::open_server(settings)?;
        let report = coordinator.classify(now)?;
        let catalog = coordinator.catalog();
        let backups = catalog.list_backups();

        if json {
            views.extend(backups.into_iter().map(|b| BackupView::new(catalog, &report, b)));
            continue;
        }

        println!("{} {}", "Backups of".bold(), name.cyan().bold());
        println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if backups.is_empty() {
            println!("{}", "No backups".dimmed());
            println!();
            continue;
        }

        for b in &backups {
            let mut notes = Vec::new();
            if let Some(parent) = b.parent_id {
                notes.push(format!("parent {}", parent.short()));
            }
            if b.keep.is_set() {
                notes.push(format!("keep:{}", b.keep));
            }
            if b.delete_marker {
                notes.push("deleting".to_string());
            }

            println!(
                "{} {:<12} {:<17} {}  {:>10}  {} {}",
                b.id.to_string().yellow(),
                b.kind.to_string(),
                b.status.to_string(),
                util::format_time(b.end_time).dimmed(),
                util::format_size(b.size),
                util::colored_status(report.status_of(&b.id)),
                notes.join(", ").dimmed()
            );
        }
        println!();
    }

    if json {
        let text = serde_json::to_string_pretty(&views).context("Failed to serialize backups")?;
        println!("{}", text);
    }
    Ok(())
}
