//! list-backups and show-backup output

use crate::common::TestServer;
use crate::pgkeep;
use anyhow::Result;
use catalog::{BackupKind, BackupStatus};

#[test]
fn test_list_shows_retention_status() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let a = server.add_full(20, 2);
    let b = server.add_full(10, 10);

    let result = pgkeep!(server.config(), "list-backups", "pg1").assert_success()?;
    assert!(result.contains_stdout(&a.id.to_string()));
    assert!(result.contains_stdout(&b.id.to_string()));
    assert!(result.contains_stdout("OBSOLETE"));
    assert!(result.contains_stdout("VALID"));

    // Listing never deletes
    assert!(server.has_backup(&a));

    Ok(())
}

#[test]
fn test_list_json() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let a = server.add_full(20, 2);
    let a1 = server.add_backup(BackupKind::Incremental, 19, 4, Some(&a));
    let b = server.add_full(10, 10);
    server.add_unfinished(1, BackupStatus::Failed);

    let result = pgkeep!(server.config(), "list-backups", "pg1", "--json").assert_success()?;
    let json = result.json()?;
    let entries = json.as_array().expect("array");
    assert_eq!(entries.len(), 4);

    let find = |id: String| entries.iter().find(|e| e["id"] == id.as_str()).cloned().unwrap();
    assert_eq!(find(a.id.to_string())["retention_status"], "OBSOLETE");
    assert_eq!(find(a1.id.to_string())["retention_status"], "OBSOLETE");
    assert_eq!(find(a1.id.to_string())["root_id"], a.id.to_string().as_str());
    assert_eq!(find(b.id.to_string())["retention_status"], "VALID");
    assert_eq!(find(a.id.to_string())["children_ids"][0], a1.id.to_string().as_str());

    Ok(())
}

#[test]
fn test_show_backup() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let a = server.add_full(20, 2);
    let a1 = server.add_backup(BackupKind::Incremental, 19, 4, Some(&a));

    let id = a1.id.to_string();
    let result = pgkeep!(server.config(), "show-backup", "pg1", &id).assert_success()?;
    assert!(result.contains_stdout(&a.id.to_string()));
    assert!(result.contains_stdout("INCREMENTAL"));

    let result = pgkeep!(server.config(), "show-backup", "pg1", "latest", "--json").assert_success()?;
    let json = result.json()?;
    assert_eq!(json["id"], id.as_str());
    assert_eq!(json["parent_id"], a.id.to_string().as_str());
    assert_eq!(json["retention_status"], "VALID");

    Ok(())
}

#[test]
fn test_list_empty_server() -> Result<()> {
    let server = TestServer::with_redundancy(1);
    let result = pgkeep!(server.config(), "list-backups", "pg1").assert_success()?;
    assert!(result.contains_stdout("No backups"));

    let result = pgkeep!(server.config(), "list-backups", "pg1", "--json").assert_success()?;
    assert_eq!(result.json()?, serde_json::json!([]));

    Ok(())
}
