//! Retention policy syntax
//!
//! Accepted forms (case-insensitive):
//! - `REDUNDANCY <n>`
//! - `RECOVERY WINDOW OF <n> {DAYS|WEEKS|MONTHS}`

use crate::error::{CatalogError, CatalogResult};
use chrono::{DateTime, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Unit of a recovery window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WindowUnit {
    Days,
    Weeks,
    Months,
}

/// How a policy decides which backups are still required
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RetentionMode {
    /// Keep the newest `n` non-incremental backups
    Redundancy(u32),
    /// Guarantee point-in-time recovery within a trailing window
    RecoveryWindow { amount: u32, unit: WindowUnit },
}

impl RetentionMode {
    /// Oldest instant the policy must still be able to recover to
    ///
    /// `None` for redundancy policies.
    pub fn point_of_recoverability(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            RetentionMode::Redundancy(_) => None,
            RetentionMode::RecoveryWindow { amount, unit } => Some(match unit {
                WindowUnit::Days => now - Duration::days(amount as i64),
                WindowUnit::Weeks => now - Duration::weeks(amount as i64),
                WindowUnit::Months => now
                    .checked_sub_months(Months::new(amount))
                    .unwrap_or(DateTime::<Utc>::MIN_UTC),
            }),
        }
    }
}

impl FromStr for RetentionMode {
    type Err = CatalogError;

    fn from_str(s: &str) -> CatalogResult<Self> {
        let upper = s.trim().to_ascii_uppercase();
        let words: Vec<&str> = upper.split_whitespace().collect();
        let invalid = || {
            CatalogError::InvalidInput(format!(
                "invalid retention policy '{}' (expected 'REDUNDANCY <n>' or 'RECOVERY WINDOW OF <n> DAYS|WEEKS|MONTHS')",
                s.trim()
            ))
        };

        match words.as_slice() {
            ["REDUNDANCY", n] => {
                let n = parse_positive(n).ok_or_else(invalid)?;
                Ok(RetentionMode::Redundancy(n))
            }
            ["RECOVERY", "WINDOW", "OF", n, unit] => {
                let amount = parse_positive(n).ok_or_else(invalid)?;
                let unit = match *unit {
                    "DAY" | "DAYS" => WindowUnit::Days,
                    "WEEK" | "WEEKS" => WindowUnit::Weeks,
                    "MONTH" | "MONTHS" => WindowUnit::Months,
                    _ => return Err(invalid()),
                };
                Ok(RetentionMode::RecoveryWindow { amount, unit })
            }
            _ => Err(invalid()),
        }
    }
}

fn parse_positive(s: &str) -> Option<u32> {
    match s.parse::<u32>() {
        Ok(n) if n > 0 => Some(n),
        _ => None,
    }
}

impl fmt::Display for RetentionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetentionMode::Redundancy(n) => write!(f, "REDUNDANCY {}", n),
            RetentionMode::RecoveryWindow { amount, unit } => {
                let unit = match unit {
                    WindowUnit::Days => "DAYS",
                    WindowUnit::Weeks => "WEEKS",
                    WindowUnit::Months => "MONTHS",
                };
                write!(f, "RECOVERY WINDOW OF {} {}", amount, unit)
            }
        }
    }
}

impl TryFrom<String> for RetentionMode {
    type Error = CatalogError;

    fn try_from(value: String) -> CatalogResult<Self> {
        value.parse()
    }
}

impl From<RetentionMode> for String {
    fn from(mode: RetentionMode) -> Self {
        mode.to_string()
    }
}

/// Retention policy for one server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetentionPolicy {
    /// `None` disables automatic retention
    pub mode: Option<RetentionMode>,
    /// Floor on retained non-incremental backups, enforced in every mode
    pub minimum_redundancy: u32,
}

impl RetentionPolicy {
    pub fn new(mode: Option<RetentionMode>, minimum_redundancy: u32) -> Self {
        Self { mode, minimum_redundancy }
    }

    /// `max(n, minimum_redundancy)` for redundancy policies
    pub fn effective_redundancy(&self) -> Option<u32> {
        match self.mode {
            Some(RetentionMode::Redundancy(n)) => Some(n.max(self.minimum_redundancy)),
            _ => None,
        }
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.mode {
            Some(mode) => write!(f, "{} (minimum redundancy {})", mode, self.minimum_redundancy),
            None => write!(f, "none (minimum redundancy {})", self.minimum_redundancy),
        }
    }
}
