//! Show, set or release the keep annotation

use crate::util;
use anyhow::Result;
use catalog::{KeepTarget, ServerLock};
use owo_colors::OwoColorize;
use pgkeep_core::Config;

/// What to do with the annotation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeepAction {
    Status,
    Release,
    /// Raw `--target` value
    Set(String),
}

pub async fn run(config: &Config, server: &str, backup: &str, action: KeepAction) -> Result<()> {
    let settings = config.server(server)?;
    let reference = util::parse_ref(backup)?;
    let target = match &action {
        KeepAction::Set(raw) => Some(raw.parse::<KeepTarget>()?),
        _ => None,
    };

    let directory = settings.directory.clone();
    let coordinator = util::open_server(settings)?;
    let catalog = coordinator.catalog();
    let id = catalog.resolve(&reference)?;
    let id_short = id.short();

    match action {
        KeepAction::Status => {
            let backup = catalog.get(&id)?;
            println!("Keep status for backup {}: {}", id.to_string().cyan(), backup.keep.to_string().yellow());
        }
        KeepAction::Release => {
            let _lock = ServerLock::acquire(server, &directory)?;
            catalog.set_keep(&id, KeepTarget::None)?;
            println!("{} Released keep on backup {}", "✓".green(), id_short.cyan());
        }
        KeepAction::Set(_) => {
            let target = target.unwrap_or(KeepTarget::None);
            let _lock = ServerLock::acquire(server, &directory)?;
            catalog.set_keep(&id, target)?;
            println!(
                "{} Backup {} kept ({})",
                "✓".green(),
                id_short.cyan(),
                target.to_string().yellow()
            );
        }
    }

    Ok(())
}
