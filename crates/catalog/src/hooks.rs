//! Hook scripts around deletions
//!
//! Each extension point has a plain script, run once, and a retry script,
//! re-run until it exits with one of the terminal codes below. Scripts run
//! through `sh -c` with the context passed in `PGKEEP_*` variables.

use pgkeep_core::{CatalogError, CatalogResult, HookSettings, ServerConfig};
use std::fmt;
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Retry script exit code: proceed
pub const EXIT_SUCCESS: i32 = 0;
/// Retry script exit code: stop retrying, carry on with the operation
pub const EXIT_ABORT_CONTINUE: i32 = 62;
/// Retry script exit code: stop retrying, abort the operation
pub const EXIT_ABORT_STOP: i32 = 63;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookPhase {
    Pre,
    Post,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookPhase::Pre => f.write_str("pre"),
            HookPhase::Post => f.write_str("post"),
        }
    }
}

/// Extension point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookKind {
    /// Around the deletion of a backup
    Delete,
    /// Around the removal of one WAL file
    WalDelete,
}

impl HookKind {
    fn name(self) -> &'static str {
        match self {
            HookKind::Delete => "delete",
            HookKind::WalDelete => "wal_delete",
        }
    }
}

/// Result of a retry script
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookOutcome {
    Success,
    AbortContinue,
    AbortStop,
}

/// Values exported to the script environment
#[derive(Debug, Default, Clone, Copy)]
pub struct HookContext<'a> {
    pub backup_id: Option<&'a str>,
    pub segment: Option<&'a str>,
    pub error: Option<&'a str>,
}

/// Runs the configured scripts of one server
#[derive(Debug, Clone)]
pub struct HookRunner {
    server: String,
    settings: HookSettings,
    retry_sleep: Duration,
    max_attempts: Option<u32>,
}

impl HookRunner {
    pub fn new(config: &ServerConfig) -> Self {
        Self {
            server: config.name.clone(),
            settings: config.hooks.clone(),
            retry_sleep: config.hook_retry_sleep,
            max_attempts: config.hook_retry_max_attempts,
        }
    }

    /// Whether any WAL hook is configured; saves a loop over every segment
    pub fn has_wal_hooks(&self) -> bool {
        let s = &self.settings;
        s.pre_wal_delete_script.is_some()
            || s.pre_wal_delete_retry_script.is_some()
            || s.post_wal_delete_script.is_some()
            || s.post_wal_delete_retry_script.is_some()
    }

    fn scripts(&self, phase: HookPhase, kind: HookKind) -> (Option<&str>, Option<&str>) {
        let s = &self.settings;
        let (plain, retry) = match (phase, kind) {
            (HookPhase::Pre, HookKind::Delete) => (&s.pre_delete_script, &s.pre_delete_retry_script),
            (HookPhase::Post, HookKind::Delete) => (&s.post_delete_script, &s.post_delete_retry_script),
            (HookPhase::Pre, HookKind::WalDelete) => (&s.pre_wal_delete_script, &s.pre_wal_delete_retry_script),
            (HookPhase::Post, HookKind::WalDelete) => {
                (&s.post_wal_delete_script, &s.post_wal_delete_retry_script)
            }
        };
        (plain.as_deref(), retry.as_deref())
    }

    /// Run the pre-phase scripts: retry script first, then the plain one
    ///
    /// Fails with `HookAborted` when the retry script asks to stop.
    pub fn run_pre(&self, kind: HookKind, ctx: HookContext<'_>) -> CatalogResult<()> {
        let (plain, retry) = self.scripts(HookPhase::Pre, kind);

        if let Some(script) = retry {
            if self.run_retry(script, HookPhase::Pre, kind, ctx) == HookOutcome::AbortStop {
                return Err(CatalogError::HookAborted {
                    server: self.server.clone(),
                    phase: format!("pre_{}", kind.name()),
                    script: script.to_string(),
                });
            }
        }
        if let Some(script) = plain {
            self.run_plain(script, HookPhase::Pre, kind, ctx);
        }
        Ok(())
    }

    /// Run the post-phase scripts: plain script first, then the retry one
    pub fn run_post(&self, kind: HookKind, ctx: HookContext<'_>) {
        let (plain, retry) = self.scripts(HookPhase::Post, kind);

        if let Some(script) = plain {
            self.run_plain(script, HookPhase::Post, kind, ctx);
        }
        if let Some(script) = retry {
            if self.run_retry(script, HookPhase::Post, kind, ctx) == HookOutcome::AbortStop {
                // Nothing left to abort after the fact
                warn!(
                    "post_{}_retry_script of server {} requested a stop after the operation completed",
                    kind.name(),
                    self.server
                );
            }
        }
    }

    fn command(&self, script: &str, phase: HookPhase, kind: HookKind, retry: bool, ctx: HookContext<'_>) -> Command {
        let hook = if retry {
            format!("{}_retry_script", kind.name())
        } else {
            format!("{}_script", kind.name())
        };

        let mut cmd = Command::new("sh");
        cmd.arg("-c")
            .arg(script)
            .env("PGKEEP_PHASE", phase.to_string())
            .env("PGKEEP_HOOK", hook)
            .env("PGKEEP_SERVER", &self.server)
            .env("PGKEEP_BACKUP_ID", ctx.backup_id.unwrap_or(""))
            .env("PGKEEP_SEGMENT", ctx.segment.unwrap_or(""))
            .env("PGKEEP_ERROR", ctx.error.unwrap_or(""))
            .env("PGKEEP_RETRY", if retry { "1" } else { "0" })
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd
    }

    /// Exit code of one run, `None` if it could not be started or was killed
    fn run_once(&self, script: &str, phase: HookPhase, kind: HookKind, retry: bool, ctx: HookContext<'_>) -> Option<i32> {
        match self.command(script, phase, kind, retry, ctx).output() {
            Ok(output) => {
                if !output.stderr.is_empty() {
                    debug!("{}: {}", script, String::from_utf8_lossy(&output.stderr).trim_end());
                }
                output.status.code()
            }
            Err(e) => {
                warn!("Failed to run hook script '{}' for server {}: {}", script, self.server, e);
                None
            }
        }
    }

    fn run_plain(&self, script: &str, phase: HookPhase, kind: HookKind, ctx: HookContext<'_>) {
        debug!("Running {}_{}_script for server {}", phase, kind.name(), self.server);
        match self.run_once(script, phase, kind, false, ctx) {
            Some(0) => {}
            Some(code) => warn!("{}_{}_script '{}' exited with {}", phase, kind.name(), script, code),
            None => warn!("{}_{}_script '{}' did not exit normally", phase, kind.name(), script),
        }
    }

    /// Run until a terminal exit code or the attempt limit
    pub fn run_retry(&self, script: &str, phase: HookPhase, kind: HookKind, ctx: HookContext<'_>) -> HookOutcome {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            debug!(
                "Running {}_{}_retry_script for server {} (attempt {})",
                phase,
                kind.name(),
                self.server,
                attempt
            );

            match self.run_once(script, phase, kind, true, ctx) {
                Some(EXIT_SUCCESS) => return HookOutcome::Success,
                Some(EXIT_ABORT_CONTINUE) => {
                    info!("{}_{}_retry_script asked to continue without it", phase, kind.name());
                    return HookOutcome::AbortContinue;
                }
                Some(EXIT_ABORT_STOP) => {
                    warn!("{}_{}_retry_script asked to stop", phase, kind.name());
                    return HookOutcome::AbortStop;
                }
                Some(code) => debug!("Retry script exited with {}, retrying", code),
                None => {
                    // A script that cannot even start will not fix itself
                    return HookOutcome::AbortContinue;
                }
            }

            if self.max_attempts.map_or(false, |max| attempt >= max) {
                warn!(
                    "{}_{}_retry_script gave up after {} attempts",
                    phase,
                    kind.name(),
                    attempt
                );
                return HookOutcome::AbortContinue;
            }
            std::thread::sleep(self.retry_sleep);
        }
    }
}
