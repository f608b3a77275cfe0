//! Backup catalog for one server
//!
//! Each backup is a JSON record at `base/<id>/backup.info`, rewritten
//! atomically on every mutation. The in-memory index is an arena keyed by id
//! and rebuilt from disk when the catalog is opened; `children_ids` is never
//! stored, it is recomputed by scanning for records whose parent is the id.

use crate::backup::{Backup, BackupStatus, KeepTarget};
use parking_lot::RwLock;
use pgkeep_core::id::BackupRef;
use pgkeep_core::store::{atomic_write, remove_dir_idempotent};
use pgkeep_core::{BackupId, CatalogError, CatalogResult};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Record file name inside a backup directory
pub const BACKUP_INFO: &str = "backup.info";

/// Payload directory inside a backup directory
pub const DATA_DIR: &str = "data";

/// Backup catalog of a single server
pub struct BackupCatalog {
    server: String,
    /// `<server_dir>/base`
    base_dir: PathBuf,
    /// Arena of records indexed by id
    records: RwLock<BTreeMap<BackupId, Backup>>,
}

impl BackupCatalog {
    /// Open the catalog rooted at `server_dir`, creating `base/` if needed
    pub fn open(server: &str, server_dir: &Path) -> CatalogResult<Self> {
        let base_dir = server_dir.join("base");
        fs::create_dir_all(&base_dir).map_err(|e| CatalogError::storage(server, "-", "open", e))?;

        let catalog = Self {
            server: server.to_string(),
            base_dir,
            records: RwLock::new(BTreeMap::new()),
        };
        catalog.reload()?;
        Ok(catalog)
    }

    /// Rebuild the in-memory index from the records on disk
    pub fn reload(&self) -> CatalogResult<()> {
        let mut records = BTreeMap::new();

        let entries =
            fs::read_dir(&self.base_dir).map_err(|e| CatalogError::storage(&self.server, "-", "load", e))?;

        for entry in entries {
            let entry = entry.map_err(|e| CatalogError::storage(&self.server, "-", "load", e))?;
            let info_path = entry.path().join(BACKUP_INFO);
            if !info_path.is_file() {
                debug!("Skipping {} (no {})", entry.path().display(), BACKUP_INFO);
                continue;
            }

            let backup = self.read_record(&info_path)?;
            records.insert(backup.id, backup);
        }

        debug!("Loaded {} backup records for server {}", records.len(), self.server);
        *self.records.write() = records;
        Ok(())
    }

    fn read_record(&self, path: &Path) -> CatalogResult<Backup> {
        let text = fs::read_to_string(path).map_err(|e| CatalogError::storage(&self.server, "-", "load", e))?;

        // A record that does not parse must not be skipped: its WAL would look unused.
        serde_json::from_str(&text).map_err(|e| {
            CatalogError::storage(
                &self.server,
                path.display(),
                "load",
                io::Error::new(io::ErrorKind::InvalidData, e),
            )
        })
    }

    fn write_record(&self, backup: &Backup) -> CatalogResult<()> {
        let data = serde_json::to_vec_pretty(backup).map_err(|e| {
            CatalogError::storage(&self.server, backup.id, "write-record", io::Error::new(io::ErrorKind::InvalidData, e))
        })?;
        atomic_write(&self.info_path(&backup.id), &data)
            .map_err(|e| CatalogError::storage(&self.server, backup.id, "write-record", e))
    }

    /// Read-modify-write one record against its on-disk state
    fn update_record<F>(&self, id: &BackupId, f: F) -> CatalogResult<Backup>
    where
        F: FnOnce(&mut Backup) -> CatalogResult<()>,
    {
        let path = self.info_path(id);
        if !path.is_file() {
            self.records.write().remove(id);
            return Err(CatalogError::NotFound(format!("backup {} of server {}", id, self.server)));
        }

        let mut backup = self.read_record(&path)?;
        f(&mut backup)?;
        self.write_record(&backup)?;

        self.records.write().insert(backup.id, backup.clone());
        Ok(backup)
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Directory holding the record and payload of a backup
    pub fn backup_dir(&self, id: &BackupId) -> PathBuf {
        self.base_dir.join(id.to_string())
    }

    pub fn data_dir(&self, id: &BackupId) -> PathBuf {
        self.backup_dir(id).join(DATA_DIR)
    }

    fn info_path(&self, id: &BackupId) -> PathBuf {
        self.backup_dir(id).join(BACKUP_INFO)
    }

    /// All backups, newest first (by end time, ties by id)
    pub fn list_backups(&self) -> Vec<Backup> {
        let mut backups: Vec<Backup> = self.records.read().values().cloned().collect();
        backups.sort_by(|a, b| b.order_key().cmp(&a.order_key()));
        backups
    }

    /// Get a backup by id
    pub fn get(&self, id: &BackupId) -> CatalogResult<Backup> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("backup {} of server {}", id, self.server)))
    }

    pub fn contains(&self, id: &BackupId) -> bool {
        self.records.read().contains_key(id)
    }

    /// Get the total number of backups
    pub fn count(&self) -> usize {
        self.records.read().len()
    }

    /// Incremental backups whose parent is `id`
    pub fn children_of(&self, id: &BackupId) -> CatalogResult<Vec<Backup>> {
        let records = self.records.read();
        if !records.contains_key(id) {
            return Err(CatalogError::NotFound(format!("backup {} of server {}", id, self.server)));
        }
        Ok(children_in(&records, id))
    }

    /// Transitive closure of `children_of`, deepest descendants first
    pub fn descendants(&self, id: &BackupId) -> CatalogResult<Vec<Backup>> {
        let records = self.records.read();
        if !records.contains_key(id) {
            return Err(CatalogError::NotFound(format!("backup {} of server {}", id, self.server)));
        }

        // Breadth-first from the root, then reversed
        let mut order = Vec::new();
        let mut seen = HashSet::new();
        let mut frontier = vec![*id];
        while let Some(current) = frontier.pop() {
            for child in children_in(&records, &current) {
                if seen.insert(child.id) {
                    frontier.insert(0, child.id);
                    order.push(child);
                }
            }
        }

        order.reverse();
        Ok(order)
    }

    /// Non-incremental ancestor at the head of the chain holding `id`
    pub fn root_of(&self, id: &BackupId) -> CatalogResult<Backup> {
        let records = self.records.read();
        root_in(&records, id, &self.server)
    }

    /// Resolve a user reference to a concrete id
    pub fn resolve(&self, reference: &BackupRef) -> CatalogResult<BackupId> {
        let newest_first = self.list_backups();
        let not_found = || CatalogError::NotFound(format!("backup '{}' of server {}", reference, self.server));

        match reference {
            BackupRef::Id(id) => {
                if self.contains(id) {
                    Ok(*id)
                } else {
                    Err(not_found())
                }
            }
            BackupRef::Latest => newest_first
                .iter()
                .find(|b| b.status == BackupStatus::Done)
                .map(|b| b.id)
                .ok_or_else(not_found),
            BackupRef::Oldest => newest_first
                .iter()
                .rev()
                .find(|b| b.status == BackupStatus::Done)
                .map(|b| b.id)
                .ok_or_else(not_found),
            BackupRef::LastFailed => newest_first
                .iter()
                .find(|b| b.status == BackupStatus::Failed)
                .map(|b| b.id)
                .ok_or_else(not_found),
            BackupRef::Prefix(prefix) => {
                let matching: Vec<BackupId> = newest_first
                    .iter()
                    .filter(|b| b.id.to_string().starts_with(prefix.as_str()))
                    .map(|b| b.id)
                    .collect();
                match matching.len() {
                    0 => Err(not_found()),
                    1 => Ok(matching[0]),
                    n => Err(CatalogError::InvalidInput(format!(
                        "ambiguous backup prefix '{}': matches {} backups",
                        prefix, n
                    ))),
                }
            }
        }
    }

    /// Register a new backup
    ///
    /// Rejects duplicate ids, parents that are missing, not older than the
    /// child or of a kind that cannot carry incrementals, and parent cycles.
    pub fn insert(&self, backup: Backup) -> CatalogResult<()> {
        backup.check_shape()?;

        {
            let records = self.records.read();
            if records.contains_key(&backup.id) || self.info_path(&backup.id).exists() {
                return Err(CatalogError::InvalidInput(format!(
                    "backup {} already exists on server {}",
                    backup.id, self.server
                )));
            }

            if let Some(parent_id) = backup.parent_id {
                let parent = records.get(&parent_id).ok_or_else(|| {
                    CatalogError::NotFound(format!("parent backup {} of server {}", parent_id, self.server))
                })?;

                if !parent.kind.can_be_parent() {
                    return Err(CatalogError::InvalidInput(format!(
                        "{} backup {} cannot be the parent of an incremental backup",
                        parent.kind, parent.id
                    )));
                }
                if parent.begin_time >= backup.begin_time || parent.id >= backup.id {
                    return Err(CatalogError::InvalidInput(format!(
                        "parent backup {} is not older than {}",
                        parent.id, backup.id
                    )));
                }

                // The chain above the parent must terminate at a root
                root_in(&records, &parent_id, &self.server)?;
            }
        }

        self.write_record(&backup)?;
        debug!("Registered backup {} ({}) on server {}", backup.id, backup.kind, self.server);
        self.records.write().insert(backup.id, backup);
        Ok(())
    }

    /// Persist a new status, enforcing the lifecycle
    pub fn update_status(&self, id: &BackupId, status: BackupStatus) -> CatalogResult<Backup> {
        self.update_record(id, |backup| {
            if !backup.status.can_transition_to(status) {
                return Err(CatalogError::InvalidTransition {
                    backup_id: backup.id.to_string(),
                    from: backup.status.to_string(),
                    to: status.to_string(),
                });
            }
            backup.status = status;
            Ok(())
        })
    }

    /// Persist the completion data of a backup and move it to `status`
    pub fn finish(
        &self,
        id: &BackupId,
        status: BackupStatus,
        end_wal: Option<String>,
        end_time: chrono::DateTime<chrono::Utc>,
        size: u64,
    ) -> CatalogResult<Backup> {
        self.update_record(id, |backup| {
            if !backup.status.can_transition_to(status) {
                return Err(CatalogError::InvalidTransition {
                    backup_id: backup.id.to_string(),
                    from: backup.status.to_string(),
                    to: status.to_string(),
                });
            }
            backup.status = status;
            backup.end_wal = end_wal;
            backup.end_time = Some(end_time);
            backup.size = size;
            Ok(())
        })
    }

    /// Add, change or release (`KeepTarget::None`) the keep annotation
    pub fn set_keep(&self, id: &BackupId, target: KeepTarget) -> CatalogResult<Backup> {
        self.update_record(id, |backup| {
            if target.is_set() {
                if backup.is_incremental() {
                    return Err(CatalogError::PolicyViolation(format!(
                        "cannot keep incremental backup {}; keep its root instead",
                        backup.id
                    )));
                }
                if backup.status != BackupStatus::Done {
                    return Err(CatalogError::PolicyViolation(format!(
                        "cannot keep backup {} with status {}; only DONE backups can be kept",
                        backup.id, backup.status
                    )));
                }
                if backup.delete_marker {
                    return Err(CatalogError::PolicyViolation(format!(
                        "cannot keep backup {}: it is being deleted",
                        backup.id
                    )));
                }
            }
            backup.keep = target;
            Ok(())
        })
    }

    /// Persist the deletion marker; safe to repeat
    pub fn mark_deleting(&self, id: &BackupId) -> CatalogResult<Backup> {
        self.update_record(id, |backup| {
            backup.delete_marker = true;
            Ok(())
        })
    }

    /// Remove the record and whatever remains of the backup directory
    pub fn remove(&self, id: &BackupId) -> CatalogResult<()> {
        let dir = self.backup_dir(id);
        if !self.contains(id) && !dir.exists() {
            return Err(CatalogError::NotFound(format!("backup {} of server {}", id, self.server)));
        }

        // Record last, so a crash before it leaves the marker on disk
        let data = self.data_dir(id);
        remove_dir_idempotent(&data).map_err(|e| CatalogError::storage(&self.server, id, "remove-record", e))?;
        pgkeep_core::store::remove_file_idempotent(&self.info_path(id))
            .map_err(|e| CatalogError::storage(&self.server, id, "remove-record", e))?;
        remove_dir_idempotent(&dir).map_err(|e| CatalogError::storage(&self.server, id, "remove-record", e))?;

        self.records.write().remove(id);
        debug!("Removed backup record {} from server {}", id, self.server);
        Ok(())
    }

    /// Backups carrying a deletion marker, roots before descendants
    pub fn marked_for_deletion(&self) -> Vec<Backup> {
        let mut marked: Vec<Backup> = self
            .records
            .read()
            .values()
            .filter(|b| b.delete_marker)
            .cloned()
            .collect();
        marked.sort_by_key(|b| (b.is_incremental(), b.order_key()));
        marked
    }

    /// Records whose parent chain is broken
    pub fn orphans(&self) -> Vec<Backup> {
        let records = self.records.read();
        let orphans: Vec<Backup> = records
            .values()
            .filter(|b| root_in(&records, &b.id, &self.server).is_err())
            .cloned()
            .collect();
        for orphan in &orphans {
            warn!("Backup {} on server {} has a broken parent chain", orphan.id, self.server);
        }
        orphans
    }
}

fn children_in(records: &BTreeMap<BackupId, Backup>, id: &BackupId) -> Vec<Backup> {
    records
        .values()
        .filter(|b| b.parent_id.as_ref() == Some(id))
        .cloned()
        .collect()
}

fn root_in(records: &BTreeMap<BackupId, Backup>, id: &BackupId, server: &str) -> CatalogResult<Backup> {
    let mut current = records
        .get(id)
        .ok_or_else(|| CatalogError::NotFound(format!("backup {} of server {}", id, server)))?;
    let mut steps = 0usize;

    while let Some(parent_id) = current.parent_id {
        steps += 1;
        if steps > records.len() {
            return Err(CatalogError::InvalidInput(format!(
                "parent chain of backup {} contains a cycle",
                id
            )));
        }
        current = records.get(&parent_id).ok_or_else(|| {
            CatalogError::NotFound(format!("parent backup {} of server {}", parent_id, server))
        })?;
    }

    Ok(current.clone())
}
