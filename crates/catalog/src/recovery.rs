//! Completion of deletions interrupted after their marker was persisted

use crate::deletion::{DeletionCoordinator, DeletionMode, DeletionOutcome};
use crate::locks::BackupLock;
use pgkeep_core::{BackupId, CatalogError, CatalogResult};
use tracing::{info, warn};

/// What a recovery pass did
#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub resumed: Vec<DeletionOutcome>,
    /// Marked backups whose deletion is still running elsewhere
    pub busy: Vec<BackupId>,
    pub failed: Vec<(BackupId, CatalogError)>,
}

impl DeletionCoordinator {
    /// Resume every marked deletion nobody else is running
    ///
    /// Roots are resumed before descendants, so a descendant removed by its
    /// root's cascade is simply skipped.
    pub fn recover_interrupted(&self) -> CatalogResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let catalog = self.catalog();
        catalog.reload()?;

        let marked = catalog.marked_for_deletion();
        if marked.is_empty() {
            return Ok(report);
        }
        info!(
            "Found {} interrupted deletions on server {}",
            marked.len(),
            self.config().name
        );

        for backup in marked {
            if !catalog.contains(&backup.id) {
                continue;
            }
            if BackupLock::is_held(&self.config().directory, &backup.id) {
                report.busy.push(backup.id);
                continue;
            }

            match self.delete_backup(&backup.id, DeletionMode::Resume) {
                Ok(outcome) => report.resumed.push(outcome),
                Err(CatalogError::NotFound(_)) => {}
                Err(CatalogError::Concurrency { .. }) => report.busy.push(backup.id),
                Err(e) => {
                    warn!("Could not resume deletion of backup {}: {}", backup.id, e);
                    report.failed.push((backup.id, e));
                }
            }
        }

        Ok(report)
    }
}
