//! Exit codes and argument handling

use crate::common::cli::PgkeepCommand;
use crate::common::TestServer;
use crate::pgkeep;
use anyhow::Result;

#[test]
fn test_help_exits_zero() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let result = pgkeep!(server.config(), "--help").assert_success()?;
    assert!(result.contains_stdout("retention-sweep"));
    Ok(())
}

#[test]
fn test_unknown_command_is_usage_error() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    pgkeep!(server.config(), "frobnicate").assert_exit(3)?;
    pgkeep!(server.config(), "delete", "pg1").assert_exit(3)?;
    Ok(())
}

#[test]
fn test_bad_backup_reference() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    server.add_full(5, 2);

    let result = pgkeep!(server.config(), "delete", "pg1", "x!").assert_exit(3)?;
    assert!(result.contains_stderr("unknown backup reference"));

    // Well formed, but matches nothing
    pgkeep!(server.config(), "show-backup", "pg1", "ZZZZZZZZ").assert_exit(1)?;
    Ok(())
}

#[test]
fn test_unknown_server() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let result = pgkeep!(server.config(), "list-backups", "nope").assert_exit(1)?;
    assert!(result.contains_stderr("nope"));
    Ok(())
}

#[test]
fn test_invalid_policy_is_config_error() -> Result<()> {
    let server = TestServer::new("retention_policy = \"REDUNDANCY zero\"", 0);
    let result = pgkeep!(server.config(), "list-backups", "pg1").assert_exit(3)?;
    assert!(result.contains_stderr("retention policy"));
    Ok(())
}

#[test]
fn test_missing_config_file() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let missing = server.server_dir.join("absent.toml");
    let mut cmd = PgkeepCommand::new(&missing);
    cmd.args(&["list-backups", "pg1"]);
    cmd.assert_exit(3)?;
    Ok(())
}
