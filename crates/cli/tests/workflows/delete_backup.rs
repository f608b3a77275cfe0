//! Manual deletion: cascade, WAL cleanup and refusals

use crate::common::fixtures::seg;
use crate::common::TestServer;
use crate::pgkeep;
use anyhow::Result;
use catalog::BackupKind;

#[test]
fn test_delete_cascades_and_frees_wal() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let a = server.add_full(10, 2);
    let a1 = server.add_backup(BackupKind::Incremental, 9, 4, Some(&a));
    let b = server.add_full(5, 10);

    let id = a.id.to_string();
    let result = pgkeep!(server.config(), "delete", "pg1", &id).assert_success()?;
    assert!(result.contains_stdout("Deletion Complete"));
    assert!(result.contains_stdout(&a.id.to_string()));
    assert!(result.contains_stdout(&a1.id.to_string()));

    assert!(!server.has_backup(&a));
    assert!(!server.has_backup(&a1));
    assert!(server.has_backup(&b));
    assert!(!server.server_dir.join("base").join(a.id.to_string()).exists());

    // Everything before the survivor's begin WAL is gone, the rest stays
    let wals = server.wal_names();
    assert_eq!(wals.first(), Some(&seg(10)));
    assert_eq!(wals.len(), 30);

    Ok(())
}

#[test]
fn test_delete_twice_is_not_found() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let a = server.add_full(10, 2);
    server.add_full(5, 10);

    let id = a.id.to_string();
    pgkeep!(server.config(), "delete", "pg1", &id).assert_success()?;
    let result = pgkeep!(server.config(), "delete", "pg1", &id).assert_exit(1)?;
    assert!(result.contains_stderr("not found"));

    Ok(())
}

#[test]
fn test_delete_by_shortcut() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let a = server.add_full(10, 2);
    let b = server.add_full(5, 10);

    pgkeep!(server.config(), "delete", "pg1", "oldest").assert_success()?;
    assert!(!server.has_backup(&a));
    assert!(server.has_backup(&b));

    Ok(())
}

#[test]
fn test_delete_newer_backup_keeps_older_wal() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let a = server.add_full(10, 2);
    let b = server.add_full(5, 10);

    let id = b.id.to_string();
    pgkeep!(server.config(), "delete", "pg1", &id).assert_success()?;
    assert!(server.has_backup(&a));
    assert!(!server.has_backup(&b));

    // The older survivor still needs every segment after its begin
    let wals = server.wal_names();
    assert!(wals.contains(&seg(2)));
    assert!(wals.contains(&seg(39)));

    Ok(())
}

#[test]
fn test_delete_below_minimum_redundancy_refused() -> Result<()> {
    let server = TestServer::new("retention_policy = \"REDUNDANCY 1\"\nminimum_redundancy = 1", 20);
    let a = server.add_full(3, 2);

    let id = a.id.to_string();
    let result = pgkeep!(server.config(), "delete", "pg1", &id).assert_exit(1)?;
    assert!(result.contains_stderr("minimum redundancy"));
    assert!(server.has_backup(&a));
    assert_eq!(server.wal_names().len(), 20);

    Ok(())
}

#[test]
fn test_delete_failed_backup() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let full = server.add_full(10, 2);
    let failed = server.add_unfinished(4, catalog::BackupStatus::Failed);

    pgkeep!(server.config(), "delete", "pg1", "last-failed").assert_success()?;
    assert!(!server.has_backup(&failed));
    assert!(server.has_backup(&full));
    assert!(server.wal_names().contains(&seg(2)));

    Ok(())
}
