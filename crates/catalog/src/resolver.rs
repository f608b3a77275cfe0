//! WAL unused-segment resolution
//!
//! Decides which archived WAL files become unreferenced once a backup (and
//! its incremental descendants) is gone. Only names are computed here; the
//! caller removes them through [`WalArchiveIndex::remove`] afterwards.

use crate::archive::WalArchiveIndex;
use crate::backup::{Backup, KeepTarget};
use pgkeep_core::{BackupId, CatalogResult, WalName};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Segments that can be dropped after a deletion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WalPlan {
    /// Names in archive order
    pub unused: Vec<String>,
    /// Oldest surviving backup whose `begin_wal` bounds the removal
    pub anchor: Option<BackupId>,
    /// Why nothing may be removed, when that is the case
    pub blocked_by: Option<String>,
}

impl WalPlan {
    fn blocked(reason: String) -> Self {
        debug!("No WAL removal: {}", reason);
        Self {
            unused: Vec::new(),
            anchor: None,
            blocked_by: Some(reason),
        }
    }
}

/// What the survivors of a deletion still need
struct Retained {
    /// 24-char prefix of the anchor's `begin_wal`
    anchor_begin: Option<String>,
    anchor_timeline: Option<u32>,
    /// `[begin, end]` of STANDALONE-kept backups; an open end keeps everything after begin
    standalone: Vec<(String, Option<String>)>,
    /// `begin_wal` of FULL-kept backups: everything from there on is kept
    full_kept: Vec<String>,
    /// Timelines of survivors other than the anchor's
    timelines: HashSet<u32>,
}

impl Retained {
    fn needs(&self, name: &str) -> bool {
        let parsed = match WalName::parse(name) {
            Ok(parsed) => parsed,
            Err(_) => {
                warn!("Keeping unrecognised WAL archive entry {}", name);
                return true;
            }
        };

        let prefix = match parsed.segment_prefix() {
            Some(prefix) => prefix,
            // History files are never unused
            None => return true,
        };

        if let Some(anchor) = &self.anchor_begin {
            if prefix.as_str() >= anchor.as_str() {
                return true;
            }
        }

        let in_standalone = self.standalone.iter().any(|(begin, end)| {
            prefix.as_str() >= begin.as_str() && end.as_ref().map_or(true, |end| prefix.as_str() <= end.as_str())
        });
        if in_standalone {
            return true;
        }

        if self.full_kept.iter().any(|begin| prefix.as_str() >= begin.as_str()) {
            return true;
        }

        let timeline = parsed.timeline();
        Some(timeline) != self.anchor_timeline && self.timelines.contains(&timeline)
    }
}

fn prefix_of(name: &str) -> Option<String> {
    WalName::parse(name).ok().and_then(|w| w.segment_prefix())
}

/// Compute the unused set for the deletion of `target` and `victims`
///
/// `backups` is the catalog as it stands, victims included. `names` must
/// be the archive contents in order.
pub fn plan_unused<'a, I>(target: &Backup, victims: &HashSet<BackupId>, backups: &[Backup], names: I) -> WalPlan
where
    I: IntoIterator<Item = &'a str>,
{
    let mut survivors: Vec<&Backup> = backups
        .iter()
        .filter(|b| !victims.contains(&b.id) && b.id != target.id && b.status.requires_wal())
        .collect();
    survivors.sort_by_key(|b| b.order_key());

    // A non-archival backup older than the target still needs the WAL since its begin
    if let Some(older) = survivors
        .iter()
        .find(|b| !b.is_archival() && b.order_key() < target.order_key())
    {
        return WalPlan::blocked(format!("older backup {} remains", older.id));
    }

    let mut retained = Retained {
        anchor_begin: None,
        anchor_timeline: None,
        standalone: Vec::new(),
        full_kept: Vec::new(),
        timelines: HashSet::new(),
    };

    for b in &survivors {
        let begin = match b.begin_wal.as_deref().and_then(prefix_of) {
            Some(begin) => begin,
            None => return WalPlan::blocked(format!("backup {} has no usable begin WAL", b.id)),
        };
        match b.keep {
            KeepTarget::Standalone => {
                let end = b.end_wal.as_deref().and_then(prefix_of);
                retained.standalone.push((begin, end));
            }
            KeepTarget::Full => retained.full_kept.push(begin),
            KeepTarget::None => {}
        }
        if let Some(timeline) = b.timeline() {
            retained.timelines.insert(timeline);
        }
    }

    let anchor = survivors.iter().find(|b| b.keep != KeepTarget::Standalone).copied();
    if let Some(anchor) = anchor {
        retained.anchor_begin = anchor.begin_wal.as_deref().and_then(prefix_of);
        retained.anchor_timeline = anchor.timeline();
    }

    let unused: Vec<String> = names
        .into_iter()
        .filter(|name| !retained.needs(name))
        .map(str::to_string)
        .collect();

    debug!(
        "WAL resolver: {} unused segments before {}",
        unused.len(),
        retained.anchor_begin.as_deref().unwrap_or("the end of the archive")
    );

    WalPlan {
        unused,
        anchor: anchor.map(|b| b.id),
        blocked_by: None,
    }
}

/// Resolve against the live archive index
pub fn resolve_unused(
    archive: &WalArchiveIndex,
    target: &Backup,
    victims: &HashSet<BackupId>,
    backups: &[Backup],
) -> CatalogResult<WalPlan> {
    let names: Vec<String> = archive
        .segments(None)?
        .map(|segment| segment.map(|s| s.name))
        .collect::<CatalogResult<_>>()?;
    Ok(plan_unused(target, victims, backups, names.iter().map(String::as_str)))
}
