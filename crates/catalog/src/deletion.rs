//! Crash-safe cascading deletion
//!
//! A deletion walks `REQUESTED → MARKED → DELETING_DATA → RESOLVING_WAL →
//! DELETING_WAL → DONE`. The marker persisted at `MARKED` is the checkpoint:
//! a run interrupted anywhere after it is completed by the next sweep (see
//! [`DeletionCoordinator::recover_interrupted`]). Every later step is
//! idempotent, so resuming never trips over what was already removed.
//!
//! Lock order: the per-backup locks are taken first and held throughout;
//! the per-server lock is only taken for short catalog-mutation instants.
//! Policy checks are repeated under the server lock right before marking,
//! so two deletions (or a keep) racing on one server cannot both pass.
//! WAL hooks and file removal run outside it, under the archive lock.

use crate::archive::WalArchiveIndex;
use crate::backup::{Backup, RetentionStatus};
use crate::catalog::BackupCatalog;
use crate::hooks::{HookContext, HookKind, HookRunner};
use crate::locks::{BackupLock, ServerLock};
use crate::resolver::{resolve_unused, WalPlan};
use crate::retention::{RetentionEngine, RetentionReport};
use chrono::{DateTime, Utc};
use pgkeep_core::store::{dir_size, remove_dir_idempotent};
use pgkeep_core::{BackupId, BackupRef, CatalogError, CatalogResult, DeletionStep, ServerConfig};
use std::collections::HashSet;
use tracing::{debug, info, warn};

/// Why a deletion was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletionMode {
    /// Explicit user request
    Manual,
    /// OBSOLETE backup picked by a retention sweep
    Retention,
    /// Completing a deletion that was already marked
    Resume,
}

/// What a completed deletion removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionOutcome {
    pub server: String,
    pub target: BackupId,
    /// Target and descendants, in removal order
    pub removed_backups: Vec<BackupId>,
    pub removed_segments: Vec<String>,
    pub bytes_freed: u64,
    pub phase: DeletionStep,
    /// Set when surviving backups prevented any WAL removal
    pub wal_blocked_by: Option<String>,
}

/// Result of one retention sweep
#[derive(Debug)]
pub struct SweepReport {
    pub server: String,
    pub recovered: Vec<DeletionOutcome>,
    pub classification: RetentionReport,
    pub deleted: Vec<DeletionOutcome>,
    /// Backups another process was already deleting
    pub skipped: Vec<BackupId>,
    pub failed: Vec<(BackupId, CatalogError)>,
}

impl SweepReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Deletion coordinator of one server
pub struct DeletionCoordinator {
    config: ServerConfig,
    catalog: BackupCatalog,
    archive: WalArchiveIndex,
    hooks: HookRunner,
}

impl DeletionCoordinator {
    /// Open the catalog and archive of `config`'s server directory
    pub fn open(config: ServerConfig) -> CatalogResult<Self> {
        let catalog = BackupCatalog::open(&config.name, &config.directory)?;
        let archive = WalArchiveIndex::open(&config.name, &config.directory)?;
        let hooks = HookRunner::new(&config);
        Ok(Self {
            config,
            catalog,
            archive,
            hooks,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &BackupCatalog {
        &self.catalog
    }

    pub fn archive(&self) -> &WalArchiveIndex {
        &self.archive
    }

    fn server(&self) -> &str {
        &self.config.name
    }

    /// Classify the current catalog without changing anything
    pub fn classify(&self, now: DateTime<Utc>) -> CatalogResult<RetentionReport> {
        self.catalog.reload()?;
        Ok(RetentionEngine::new(self.config.policy).evaluate(&self.catalog, &self.config.directory, now))
    }

    /// Delete the backup `reference` points to, with its descendants
    pub fn delete(&self, reference: &BackupRef) -> CatalogResult<DeletionOutcome> {
        self.catalog.reload()?;
        let id = self.catalog.resolve(reference)?;
        self.delete_backup(&id, DeletionMode::Manual)
    }

    /// Run the whole state machine for `id`
    pub fn delete_backup(&self, id: &BackupId, mode: DeletionMode) -> CatalogResult<DeletionOutcome> {
        let server = self.server().to_string();

        // REQUESTED
        self.catalog.reload()?;
        self.catalog.get(id)?;
        let target_lock = BackupLock::try_acquire(&server, &self.config.directory, id)?;

        // Another process may have finished it while we waited for nothing
        self.catalog.reload()?;
        let target = self.catalog.get(id)?;
        let descendants = self.catalog.descendants(id)?;

        let mut locks = vec![target_lock];
        for child in &descendants {
            locks.push(BackupLock::try_acquire(&server, &self.config.directory, &child.id)?);
        }
        debug!("Holding {} backup locks for deletion of {}", locks.len(), id);

        // Fast refusal; repeated under the server lock before marking
        if mode != DeletionMode::Resume && !target.delete_marker {
            self.check_policy(&target)?;
        }

        let backup_id = id.to_string();
        self.hooks.run_pre(
            HookKind::Delete,
            HookContext {
                backup_id: Some(&backup_id),
                ..Default::default()
            },
        )?;

        let result = self.run_steps(&target, &descendants, mode);

        let error = result.as_ref().err().map(|e| e.to_string());
        self.hooks.run_post(
            HookKind::Delete,
            HookContext {
                backup_id: Some(&backup_id),
                error: error.as_deref(),
                ..Default::default()
            },
        );

        match &result {
            Ok(outcome) => info!(
                server = %server,
                backup_id = %id,
                phase = %DeletionStep::Done,
                "Deleted {} backups and {} WAL files ({} bytes freed)",
                outcome.removed_backups.len(),
                outcome.removed_segments.len(),
                outcome.bytes_freed
            ),
            Err(e @ CatalogError::PolicyViolation(_)) => warn!(server = %server, backup_id = %id, "Deletion refused: {}", e),
            Err(e) => warn!(server = %server, backup_id = %id, "Deletion failed, marker kept for retry: {}", e),
        }

        drop(locks);
        result
    }

    /// Refuse deletions that break a keep or the minimum redundancy
    fn check_policy(&self, target: &Backup) -> CatalogResult<()> {
        if target.is_archival() {
            return Err(CatalogError::PolicyViolation(format!(
                "backup {} is kept ({}); release it before deleting",
                target.id, target.keep
            )));
        }

        if target.is_done() && !target.is_incremental() {
            let available = self
                .catalog
                .list_backups()
                .iter()
                .filter(|b| b.is_done() && !b.is_incremental() && !b.delete_marker)
                .count();
            let floor = self.config.policy.minimum_redundancy as usize;
            if available <= floor {
                return Err(CatalogError::PolicyViolation(format!(
                    "deleting backup {} would leave {} backups on server {}, below minimum redundancy {}",
                    target.id,
                    available.saturating_sub(1),
                    self.server(),
                    floor
                )));
            }
        }
        Ok(())
    }

    fn run_steps(&self, target: &Backup, descendants: &[Backup], mode: DeletionMode) -> CatalogResult<DeletionOutcome> {
        let server = self.server();
        let id = target.id;

        // Deepest descendant first, target last
        let mut victims: Vec<BackupId> = descendants.iter().map(|b| b.id).collect();
        victims.push(id);
        let victim_set: HashSet<BackupId> = victims.iter().copied().collect();

        // MARKED
        {
            let _server_lock = ServerLock::acquire(server, &self.config.directory)?;
            self.catalog.reload()?;
            let current = self.catalog.get(&id)?;
            if mode != DeletionMode::Resume && !current.delete_marker {
                self.check_policy(&current)?;
            }
            for victim in victims.iter().rev() {
                self.catalog.mark_deleting(victim)?;
            }
        }
        info!(server = %server, backup_id = %id, phase = %DeletionStep::Marked, "Marked {} backups for deletion", victims.len());

        // DELETING_DATA
        let mut bytes_freed = 0;
        for victim in &victims {
            let data = self.catalog.data_dir(victim);
            let step_err = |e| CatalogError::storage(server, victim, DeletionStep::DeletingData, e);
            let size = if data.exists() { dir_size(&data).map_err(step_err)? } else { 0 };
            if remove_dir_idempotent(&data).map_err(step_err)? {
                bytes_freed += size;
            }
        }
        info!(server = %server, backup_id = %id, phase = %DeletionStep::DeletingData, "Removed backup data ({} bytes)", bytes_freed);

        // RESOLVING_WAL
        let plan = {
            let _server_lock = ServerLock::acquire(server, &self.config.directory)?;
            self.catalog.reload()?;
            let backups = self.catalog.list_backups();
            resolve_unused(&self.archive, target, &victim_set, &backups).map_err(|e| with_backup(e, &id))?
        };
        info!(
            server = %server,
            backup_id = %id,
            phase = %DeletionStep::ResolvingWal,
            "{} WAL files no longer needed",
            plan.unused.len()
        );

        // DELETING_WAL
        let (removed_segments, wal_bytes) = self.remove_wal(&id, &plan)?;
        bytes_freed += wal_bytes;

        // DONE
        {
            let _server_lock = ServerLock::acquire(server, &self.config.directory)?;
            for victim in &victims {
                match self.catalog.remove(victim) {
                    Ok(()) | Err(CatalogError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(DeletionOutcome {
            server: server.to_string(),
            target: id,
            removed_backups: victims,
            removed_segments,
            bytes_freed,
            phase: DeletionStep::Done,
            wal_blocked_by: plan.blocked_by,
        })
    }

    fn remove_wal(&self, id: &BackupId, plan: &WalPlan) -> CatalogResult<(Vec<String>, u64)> {
        if plan.unused.is_empty() {
            return Ok((Vec::new(), 0));
        }

        let backup_id = id.to_string();
        if self.hooks.has_wal_hooks() {
            for segment in &plan.unused {
                self.hooks.run_pre(
                    HookKind::WalDelete,
                    HookContext {
                        backup_id: Some(&backup_id),
                        segment: Some(segment),
                        error: None,
                    },
                )?;
            }
        }

        let report = self.archive.remove(&plan.unused).map_err(|e| with_backup(e, id))?;
        info!(
            server = %self.server(),
            backup_id = %id,
            phase = %DeletionStep::DeletingWal,
            "Removed {} WAL files",
            report.removed.len()
        );

        if self.hooks.has_wal_hooks() {
            for segment in &plan.unused {
                self.hooks.run_post(
                    HookKind::WalDelete,
                    HookContext {
                        backup_id: Some(&backup_id),
                        segment: Some(segment),
                        error: None,
                    },
                );
            }
        }

        Ok((report.removed, report.bytes_freed))
    }

    /// Resume interrupted deletions, then delete every OBSOLETE backup
    pub fn retention_sweep(&self) -> CatalogResult<SweepReport> {
        self.retention_sweep_at(Utc::now())
    }

    /// [`retention_sweep`](Self::retention_sweep) evaluated as of `now`
    pub fn retention_sweep_at(&self, now: DateTime<Utc>) -> CatalogResult<SweepReport> {
        let recovery = self.recover_interrupted()?;
        let mut skipped = recovery.busy;
        let mut failed = recovery.failed;

        let classification = {
            let _server_lock = ServerLock::acquire(self.server(), &self.config.directory)?;
            self.classify(now)?
        };
        for warning in &classification.warnings {
            debug!("Retention warning for {}: {}", self.server(), warning);
        }

        let backups = self.catalog.list_backups();
        let obsolete = classification.obsolete_roots(&backups);
        skipped.extend(classification.with_status(RetentionStatus::PotentiallyObsolete));
        info!(
            "Retention policy {} on server {}: {} obsolete backups",
            classification.policy,
            self.server(),
            obsolete.len()
        );

        let mut deleted = Vec::new();
        for id in obsolete {
            match self.delete_backup(&id, DeletionMode::Retention) {
                Ok(outcome) => deleted.push(outcome),
                Err(CatalogError::Concurrency { .. }) => {
                    info!("Backup {} is already being deleted, skipping", id);
                    skipped.push(id);
                }
                Err(CatalogError::NotFound(_)) => debug!("Backup {} vanished before deletion", id),
                Err(e @ CatalogError::PolicyViolation(_)) => {
                    // Newer backups only shrink the margin further
                    warn!("Stopping retention sweep of {}: {}", self.server(), e);
                    failed.push((id, e));
                    break;
                }
                Err(e) => failed.push((id, e)),
            }
        }

        Ok(SweepReport {
            server: self.server().to_string(),
            recovered: recovery.resumed,
            classification,
            deleted,
            skipped,
            failed,
        })
    }
}

/// Attach the backup id to storage errors raised without one
fn with_backup(err: CatalogError, id: &BackupId) -> CatalogError {
    match err {
        CatalogError::StorageIo {
            server,
            backup_id,
            step,
            source,
        } if backup_id == "-" => CatalogError::StorageIo {
            server,
            backup_id: id.to_string(),
            step,
            source,
        },
        other => other,
    }
}
