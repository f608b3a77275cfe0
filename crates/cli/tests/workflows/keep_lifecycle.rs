//! Keep annotations through the CLI

use crate::common::TestServer;
use crate::pgkeep;
use anyhow::Result;
use catalog::{BackupKind, KeepTarget};

#[test]
fn test_keep_set_status_release() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let a = server.add_full(10, 2);
    server.add_full(5, 10);
    let id = a.id.to_string();

    let result = pgkeep!(server.config(), "keep", "pg1", &id, "--status").assert_success()?;
    assert!(result.contains_stdout("none"));

    pgkeep!(server.config(), "keep", "pg1", &id, "--target", "standalone").assert_success()?;
    assert_eq!(server.catalog().get(&a.id)?.keep, KeepTarget::Standalone);

    let result = pgkeep!(server.config(), "keep", "pg1", &id, "--status").assert_success()?;
    assert!(result.contains_stdout("standalone"));

    pgkeep!(server.config(), "keep", "pg1", &id, "--release").assert_success()?;
    assert_eq!(server.catalog().get(&a.id)?.keep, KeepTarget::None);

    Ok(())
}

#[test]
fn test_kept_backup_cannot_be_deleted() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let a = server.add_full(10, 2);
    server.add_full(5, 10);
    server.keep(&a, KeepTarget::Full);

    let id = a.id.to_string();
    let result = pgkeep!(server.config(), "delete", "pg1", &id).assert_exit(1)?;
    assert!(result.contains_stderr("release it"));
    assert!(server.has_backup(&a));

    // Released, it goes like any other
    pgkeep!(server.config(), "keep", "pg1", &id, "--release").assert_success()?;
    pgkeep!(server.config(), "delete", "pg1", &id).assert_success()?;
    assert!(!server.has_backup(&a));

    Ok(())
}

#[test]
fn test_keep_rejects_incremental_and_bad_target() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let a = server.add_full(10, 2);
    let a1 = server.add_backup(BackupKind::Incremental, 9, 4, Some(&a));

    let child = a1.id.to_string();
    pgkeep!(server.config(), "keep", "pg1", &child, "--target", "full").assert_exit(1)?;

    let root = a.id.to_string();
    let result = pgkeep!(server.config(), "keep", "pg1", &root, "--target", "forever").assert_exit(3)?;
    assert!(result.contains_stderr("invalid keep target"));

    // One action is required
    pgkeep!(server.config(), "keep", "pg1", &root).assert_exit(3)?;

    Ok(())
}
