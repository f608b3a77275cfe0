//! WAL segment naming and ordering
//!
//! Segment names use a fixed-width hex encoding
//! (`TTTTTTTTXXXXXXXXYYYYYYYY`: timeline, log, segment), so lexicographic
//! order on the name is WAL position order within a timeline.

use crate::error::{CatalogError, CatalogResult};
use std::fmt;
use std::str::FromStr;

/// Length of a plain segment name
pub const SEGMENT_NAME_LEN: usize = 24;

/// Length of the hash directory prefix (timeline + log)
pub const HASH_DIR_LEN: usize = 16;

/// A parsed WAL archive file name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WalName {
    /// Complete segment: `000000010000000000000003`
    Segment { timeline: u32, log: u32, seg: u32 },
    /// Partial segment streamed before a timeline switch
    Partial { timeline: u32, log: u32, seg: u32 },
    /// Backup label: `000000010000000000000003.00000028.backup`
    BackupLabel { timeline: u32, log: u32, seg: u32, offset: u32 },
    /// Timeline history: `00000002.history`
    History { timeline: u32 },
}

fn parse_hex(s: &str, what: &str, full: &str) -> CatalogResult<u32> {
    if s.len() != 8 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(CatalogError::InvalidInput(format!(
            "invalid {} in WAL name '{}'",
            what, full
        )));
    }
    u32::from_str_radix(s, 16)
        .map_err(|_| CatalogError::InvalidInput(format!("invalid {} in WAL name '{}'", what, full)))
}

fn parse_segment(s: &str, full: &str) -> CatalogResult<(u32, u32, u32)> {
    if s.len() != SEGMENT_NAME_LEN {
        return Err(CatalogError::InvalidInput(format!("invalid WAL name '{}'", full)));
    }
    Ok((
        parse_hex(&s[0..8], "timeline", full)?,
        parse_hex(&s[8..16], "log", full)?,
        parse_hex(&s[16..24], "segment", full)?,
    ))
}

impl WalName {
    /// Parse any WAL archive file name
    pub fn parse(name: &str) -> CatalogResult<Self> {
        if let Some(tli) = name.strip_suffix(".history") {
            let timeline = parse_hex(tli, "timeline", name)?;
            return Ok(WalName::History { timeline });
        }

        if let Some(seg) = name.strip_suffix(".partial") {
            let (timeline, log, seg) = parse_segment(seg, name)?;
            return Ok(WalName::Partial { timeline, log, seg });
        }

        if let Some(rest) = name.strip_suffix(".backup") {
            let (seg_part, offset_part) = rest
                .split_once('.')
                .ok_or_else(|| CatalogError::InvalidInput(format!("invalid WAL name '{}'", name)))?;
            let (timeline, log, seg) = parse_segment(seg_part, name)?;
            let offset = parse_hex(offset_part, "offset", name)?;
            return Ok(WalName::BackupLabel { timeline, log, seg, offset });
        }

        let (timeline, log, seg) = parse_segment(name, name)?;
        Ok(WalName::Segment { timeline, log, seg })
    }

    pub fn timeline(&self) -> u32 {
        match *self {
            WalName::Segment { timeline, .. }
            | WalName::Partial { timeline, .. }
            | WalName::BackupLabel { timeline, .. }
            | WalName::History { timeline } => timeline,
        }
    }

    pub fn is_history(&self) -> bool {
        matches!(self, WalName::History { .. })
    }

    /// The 24-character segment prefix used for range comparisons
    ///
    /// History files carry no position and return `None`.
    pub fn segment_prefix(&self) -> Option<String> {
        match *self {
            WalName::Segment { timeline, log, seg }
            | WalName::Partial { timeline, log, seg }
            | WalName::BackupLabel { timeline, log, seg, .. } => {
                Some(format!("{:08X}{:08X}{:08X}", timeline, log, seg))
            }
            WalName::History { .. } => None,
        }
    }
}

impl fmt::Display for WalName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            WalName::Segment { timeline, log, seg } => {
                write!(f, "{:08X}{:08X}{:08X}", timeline, log, seg)
            }
            WalName::Partial { timeline, log, seg } => {
                write!(f, "{:08X}{:08X}{:08X}.partial", timeline, log, seg)
            }
            WalName::BackupLabel { timeline, log, seg, offset } => {
                write!(f, "{:08X}{:08X}{:08X}.{:08X}.backup", timeline, log, seg, offset)
            }
            WalName::History { timeline } => write!(f, "{:08X}.history", timeline),
        }
    }
}

impl FromStr for WalName {
    type Err = CatalogError;

    fn from_str(s: &str) -> CatalogResult<Self> {
        WalName::parse(s)
    }
}

/// Archive subdirectory holding a file: the timeline+log prefix for
/// segment-like files, the archive root (empty) for history files
pub fn hash_dir(name: &str) -> &str {
    if name.len() >= SEGMENT_NAME_LEN && name[..SEGMENT_NAME_LEN].chars().all(|c| c.is_ascii_hexdigit()) {
        &name[..HASH_DIR_LEN]
    } else {
        ""
    }
}

/// Timeline of the segment a name points into, if it parses
pub fn timeline_of(name: &str) -> Option<u32> {
    WalName::parse(name).ok().map(|w| w.timeline())
}
