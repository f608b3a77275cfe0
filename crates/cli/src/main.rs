//! pgkeep CLI - backup catalog and retention maintenance

use clap::error::ErrorKind;
use clap::{ArgGroup, Parser, Subcommand};
use cli_lib::{cmd, exit_code, logging};
use owo_colors::OwoColorize;
use pgkeep_core::Config;
use std::path::PathBuf;
use std::process::ExitCode;

/// pgkeep - Backup catalog, retention and WAL lifecycle for PostgreSQL servers
#[derive(Parser)]
#[command(name = "pgkeep")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file (default: $PGKEEP_CONFIG, then the user and system locations)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Delete a backup, its incremental descendants and the WAL nobody needs anymore
    Delete {
        /// Server name
        server: String,
        /// Backup id, unique id prefix, or latest / oldest / last-failed
        backup: String,
    },
    /// Apply the retention policy: delete every obsolete backup
    RetentionSweep {
        /// Server name, or "all"
        server: String,
    },
    /// Show, set or release the keep annotation of a backup
    #[command(group(ArgGroup::new("action").required(true).args(["status", "release", "target"])))]
    Keep {
        /// Server name
        server: String,
        /// Backup id, unique id prefix, or latest / oldest / last-failed
        backup: String,
        /// Print the current keep target
        #[arg(long)]
        status: bool,
        /// Remove the keep annotation
        #[arg(long)]
        release: bool,
        /// Keep the backup: full (point-in-time recovery after it) or standalone
        #[arg(long, value_name = "full|standalone")]
        target: Option<String>,
    },
    /// List backups with their retention status
    ListBackups {
        /// Server name, or "all"
        server: String,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one backup in detail
    ShowBackup {
        /// Server name
        server: String,
        /// Backup id, unique id prefix, or latest / oldest / last-failed
        backup: String,
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(3),
            };
        }
    };

    let config = match Config::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            return ExitCode::from(e.exit_code() as u8);
        }
    };

    // Initialize tracing
    let _guard = logging::init(&config.global.log_level, config.global.log_file.as_deref());

    let result = match cli.command {
        Commands::Delete { server, backup } => cmd::delete::run(&config, &server, &backup).await,
        Commands::RetentionSweep { server } => cmd::sweep::run(&config, &server).await,
        Commands::Keep { server, backup, status, release, target } => {
            let action = if status {
                cmd::keep::KeepAction::Status
            } else if release {
                cmd::keep::KeepAction::Release
            } else {
                cmd::keep::KeepAction::Set(target.unwrap_or_default())
            };
            cmd::keep::run(&config, &server, &backup, action).await
        }
        Commands::ListBackups { server, json } => cmd::list::run(&config, &server, json).await,
        Commands::ShowBackup { server, backup, json } => cmd::show::run(&config, &server, &backup, json).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::from(exit_code(&e))
        }
    }
}
