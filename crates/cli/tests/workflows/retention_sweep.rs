//! Retention sweeps end to end

use crate::common::fixtures::seg;
use crate::common::TestServer;
use crate::pgkeep;
use anyhow::Result;
use catalog::{BackupKind, KeepTarget};

#[test]
fn test_sweep_redundancy_deletes_oldest_chain() -> Result<()> {
    let server = TestServer::with_redundancy(2);
    let a = server.add_full(30, 2);
    let a1 = server.add_backup(BackupKind::Incremental, 29, 4, Some(&a));
    let b = server.add_full(20, 10);
    let c = server.add_full(10, 20);

    let result = pgkeep!(server.config(), "retention-sweep", "pg1").assert_success()?;
    assert!(result.contains_stdout("REDUNDANCY 2"));
    assert!(result.contains_stdout(&a.id.to_string()));

    assert!(!server.has_backup(&a));
    assert!(!server.has_backup(&a1));
    assert!(server.has_backup(&b));
    assert!(server.has_backup(&c));
    assert_eq!(server.wal_names().first(), Some(&seg(10)));

    // Nothing left to do on a second pass
    let result = pgkeep!(server.config(), "retention-sweep", "pg1").assert_success()?;
    assert!(result.contains_stdout("No obsolete backups"));

    Ok(())
}

#[test]
fn test_sweep_recovery_window() -> Result<()> {
    let server = TestServer::new("retention_policy = \"RECOVERY WINDOW OF 7 DAYS\"", 40);
    let old = server.add_full(30, 2);
    let anchor = server.add_full(10, 10);
    let recent = server.add_full(2, 20);

    pgkeep!(server.config(), "retention-sweep", "pg1").assert_success()?;

    // The newest backup before the window stays to recover its start
    assert!(!server.has_backup(&old));
    assert!(server.has_backup(&anchor));
    assert!(server.has_backup(&recent));

    Ok(())
}

#[test]
fn test_sweep_keeps_archival_backup_and_its_wal() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let kept = server.add_full(30, 2);
    let old = server.add_full(20, 10);
    let newest = server.add_full(10, 20);
    server.keep(&kept, KeepTarget::Standalone);

    pgkeep!(server.config(), "retention-sweep", "pg1").assert_success()?;
    assert!(server.has_backup(&kept));
    assert!(!server.has_backup(&old));
    assert!(server.has_backup(&newest));

    // The standalone backup keeps only its own range
    let wals = server.wal_names();
    assert!(wals.contains(&seg(2)));
    assert!(wals.contains(&seg(3)));
    assert!(!wals.contains(&seg(5)));
    assert!(!wals.contains(&seg(12)));
    assert!(wals.contains(&seg(20)));

    Ok(())
}

#[test]
fn test_sweep_without_policy_is_noop() -> Result<()> {
    let server = TestServer::new("description = \"no policy\"", 10);
    let a = server.add_full(30, 2);
    server.add_full(10, 5);

    let result = pgkeep!(server.config(), "retention-sweep", "pg1").assert_success()?;
    assert!(result.contains_stdout("No retention policy"));
    assert!(server.has_backup(&a));
    assert_eq!(server.wal_names().len(), 10);

    Ok(())
}

#[test]
fn test_sweep_all_servers() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let a = server.add_full(30, 2);
    server.add_full(10, 10);

    pgkeep!(server.config(), "retention-sweep", "all").assert_success()?;
    assert!(!server.has_backup(&a));

    Ok(())
}
