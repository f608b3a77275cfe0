//! Show one backup in detail

use crate::util::{self, BackupView};
use anyhow::{Context, Result};
use chrono::Utc;
use owo_colors::OwoColorize;
use pgkeep_core::Config;

pub async fn run(config: &Config, server: &str, backup: &str, json: bool) -> Result<()> {
    let settings = config.server(server)?;
    let reference = util::parse_ref(backup)?;

    let coordinator = util::open_server(settings)?;
    let now = Utc::now();
    let report = coordinator.classify(now)?;
    let catalog = coordinator.catalog();
    let id = catalog.resolve(&reference)?;
    let view = BackupView::new(catalog, &report, catalog.get(&id)?);

    if json {
        let text = serde_json::to_string_pretty(&view).context("Failed to serialize backup")?;
        println!("{}", text);
        return Ok(());
    }

    let b = &view.backup;
    println!("{} {}", "Backup".bold(), b.id.to_string().yellow().bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Server:             {}", b.server.cyan());
    println!("Kind:               {}", b.kind);
    println!("Status:             {}", b.status);
    println!("Retention status:   {}", util::colored_status(report.status_of(&b.id)));
    println!("Keep:               {}", b.keep);
    println!();
    println!("Begin time:         {}", util::format_time(Some(b.begin_time)));
    match b.end_time {
        Some(end) => println!(
            "End time:           {} ({})",
            util::format_time(Some(end)),
            util::format_relative_time(end, now).dimmed()
        ),
        None => println!("End time:           -"),
    }
    println!("Begin WAL:          {}", b.begin_wal.as_deref().unwrap_or("-"));
    println!("End WAL:            {}", b.end_wal.as_deref().unwrap_or("-"));
    println!("Size:               {}", util::format_size(b.size));
    println!();

    let id_or_dash = |id: Option<pgkeep_core::BackupId>| id.map_or("-".to_string(), |id| id.to_string());
    println!("Parent:             {}", id_or_dash(b.parent_id));
    println!("Root:               {}", id_or_dash(view.root_id));
    if view.children_ids.is_empty() {
        println!("Children:           -");
    } else {
        for (i, child) in view.children_ids.iter().enumerate() {
            let label = if i == 0 { "Children:" } else { "" };
            println!("{:<20}{}", label, child);
        }
    }

    if b.delete_marker {
        println!();
        println!("{}", "Deletion in progress or interrupted".yellow());
    }
    if let Some(error) = &b.error {
        println!();
        println!("Error:              {}", error.red());
    }

    Ok(())
}
