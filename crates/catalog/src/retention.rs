//! Retention policy evaluation
//!
//! Only non-incremental DONE backups are counted. Archival (kept) backups are
//! always VALID and are left out of both the redundancy count and the
//! recovery-window anchor search. Incremental backups inherit the outcome of
//! the root of their chain.

use crate::backup::{Backup, RetentionStatus};
use crate::catalog::BackupCatalog;
use crate::locks::BackupLock;
use chrono::{DateTime, Utc};
use pgkeep_core::{BackupId, RetentionMode, RetentionPolicy};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use tracing::{debug, warn};

/// Classification of every backup of a server
#[derive(Debug, Clone)]
pub struct RetentionReport {
    pub policy: RetentionPolicy,
    pub statuses: BTreeMap<BackupId, RetentionStatus>,
    /// Backups newest first, as evaluated
    pub order: Vec<BackupId>,
    /// Redundancy actually applied (`max(n, minimum_redundancy)`)
    pub effective_redundancy: Option<u32>,
    /// `now - window` for recovery-window policies
    pub point_of_recoverability: Option<DateTime<Utc>>,
    /// End time of the oldest VALID non-archival backup
    pub first_recoverability_point: Option<DateTime<Utc>>,
    pub warnings: Vec<String>,
}

impl RetentionReport {
    pub fn status_of(&self, id: &BackupId) -> RetentionStatus {
        self.statuses.get(id).copied().unwrap_or(RetentionStatus::None)
    }

    /// Ids with the given status, newest first
    pub fn with_status(&self, status: RetentionStatus) -> Vec<BackupId> {
        self.order
            .iter()
            .filter(|id| self.status_of(id) == status)
            .copied()
            .collect()
    }

    /// OBSOLETE chain roots, oldest first: the deletion order of a sweep
    pub fn obsolete_roots(&self, backups: &[Backup]) -> Vec<BackupId> {
        let roots: HashSet<BackupId> = backups
            .iter()
            .filter(|b| !b.is_incremental())
            .map(|b| b.id)
            .collect();
        self.order
            .iter()
            .rev()
            .filter(|id| roots.contains(id) && self.status_of(id) == RetentionStatus::Obsolete)
            .copied()
            .collect()
    }
}

/// Retention policy engine
pub struct RetentionEngine {
    policy: RetentionPolicy,
}

impl RetentionEngine {
    /// Create an engine for the given policy
    pub fn new(policy: RetentionPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &RetentionPolicy {
        &self.policy
    }

    /// Classify the catalog, treating marked backups whose lock holder is
    /// alive as deletions already running
    pub fn evaluate(&self, catalog: &BackupCatalog, server_dir: &Path, now: DateTime<Utc>) -> RetentionReport {
        let backups = catalog.list_backups();
        let in_progress: HashSet<BackupId> = backups
            .iter()
            .filter(|b| b.delete_marker && BackupLock::is_held(server_dir, &b.id))
            .map(|b| b.id)
            .collect();
        self.classify(&backups, now, &in_progress)
    }

    /// Classify `backups` as of `now`
    ///
    /// `in_progress` holds ids another process is currently deleting; an
    /// OBSOLETE backup in that set is reported POTENTIALLY_OBSOLETE.
    pub fn classify(
        &self,
        backups: &[Backup],
        now: DateTime<Utc>,
        in_progress: &HashSet<BackupId>,
    ) -> RetentionReport {
        let mut sorted: Vec<&Backup> = backups.iter().collect();
        sorted.sort_by(|a, b| b.order_key().cmp(&a.order_key()));

        let mut report = RetentionReport {
            policy: self.policy,
            statuses: BTreeMap::new(),
            order: sorted.iter().map(|b| b.id).collect(),
            effective_redundancy: self.policy.effective_redundancy(),
            point_of_recoverability: None,
            first_recoverability_point: None,
            warnings: Vec::new(),
        };

        let mode = match self.policy.mode {
            Some(mode) => mode,
            None => {
                for b in &sorted {
                    report.statuses.insert(b.id, RetentionStatus::None);
                }
                return report;
            }
        };

        // Roots: archival ones are VALID outright, non-DONE ones are NONE
        let mut candidates: Vec<&Backup> = Vec::new();
        for b in sorted.iter().filter(|b| !b.is_incremental()) {
            if !b.is_done() {
                report.statuses.insert(b.id, RetentionStatus::None);
            } else if b.is_archival() {
                report.statuses.insert(b.id, RetentionStatus::Valid);
            } else {
                candidates.push(b);
            }
        }

        let floor = self.policy.minimum_redundancy as usize;
        let mut valid = vec![false; candidates.len()];

        match mode {
            RetentionMode::Redundancy(n) => {
                if n < self.policy.minimum_redundancy {
                    let msg = format!(
                        "retention policy REDUNDANCY {} is lower than minimum redundancy {}; keeping {}",
                        n, self.policy.minimum_redundancy, self.policy.minimum_redundancy
                    );
                    warn!("{}", msg);
                    report.warnings.push(msg);
                }
                let keep = n.max(self.policy.minimum_redundancy) as usize;
                for flag in valid.iter_mut().take(keep) {
                    *flag = true;
                }
            }
            RetentionMode::RecoveryWindow { .. } => {
                let point = mode
                    .point_of_recoverability(now)
                    .unwrap_or(DateTime::<Utc>::MIN_UTC);
                report.point_of_recoverability = Some(point);

                let mut anchored = false;
                for (i, b) in candidates.iter().enumerate() {
                    if b.order_time() >= point {
                        valid[i] = true;
                    } else if !anchored {
                        // The newest backup before the window edge keeps the edge recoverable
                        valid[i] = true;
                        anchored = true;
                    }
                }

                let mut count = valid.iter().filter(|v| **v).count();
                if count < floor {
                    debug!(
                        "Recovery window keeps {} backups, extending to minimum redundancy {}",
                        count, floor
                    );
                    for flag in valid.iter_mut() {
                        if count >= floor {
                            break;
                        }
                        if !*flag {
                            *flag = true;
                            count += 1;
                        }
                    }
                }
            }
        }

        for (i, b) in candidates.iter().enumerate() {
            let status = if valid[i] {
                report.first_recoverability_point = Some(b.order_time());
                RetentionStatus::Valid
            } else if in_progress.contains(&b.id) {
                RetentionStatus::PotentiallyObsolete
            } else {
                RetentionStatus::Obsolete
            };
            report.statuses.insert(b.id, status);
        }

        self.propagate(&sorted, &mut report);
        report
    }

    /// Give every incremental backup the outcome of its chain root
    fn propagate(&self, sorted: &[&Backup], report: &mut RetentionReport) {
        let by_id: HashMap<BackupId, &Backup> = sorted.iter().map(|b| (b.id, *b)).collect();

        for b in sorted.iter().filter(|b| b.is_incremental()) {
            let status = match find_root(&by_id, b) {
                Some(root) if root.is_archival() => RetentionStatus::Valid,
                Some(root) => report.status_of(&root.id),
                None => {
                    let msg = format!("incremental backup {} has a broken parent chain", b.id);
                    warn!("{}", msg);
                    report.warnings.push(msg);
                    RetentionStatus::None
                }
            };
            report.statuses.insert(b.id, status);
        }
    }
}

fn find_root<'a>(by_id: &HashMap<BackupId, &'a Backup>, backup: &'a Backup) -> Option<&'a Backup> {
    let mut current = backup;
    let mut steps = 0usize;
    while let Some(parent) = current.parent_id {
        steps += 1;
        if steps > by_id.len() {
            return None;
        }
        current = *by_id.get(&parent)?;
    }
    Some(current)
}
