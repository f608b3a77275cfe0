//! Configuration loading
//!
//! A single TOML file with a `[global]` section and one `[servers.<name>]`
//! section per managed server. Server values override global ones.

use crate::error::{CatalogError, CatalogResult};
use crate::policy::{RetentionMode, RetentionPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the config file
pub const CONFIG_ENV: &str = "PGKEEP_CONFIG";

/// System-wide fallback location
pub const SYSTEM_CONFIG_PATH: &str = "/etc/pgkeep.toml";

/// Hook script commands, one plain and one retry form per phase
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookSettings {
    pub pre_delete_script: Option<String>,
    pub pre_delete_retry_script: Option<String>,
    pub post_delete_script: Option<String>,
    pub post_delete_retry_script: Option<String>,
    pub pre_wal_delete_script: Option<String>,
    pub pre_wal_delete_retry_script: Option<String>,
    pub post_wal_delete_script: Option<String>,
    pub post_wal_delete_retry_script: Option<String>,
}

impl HookSettings {
    /// Fill every unset script from `fallback`
    fn merged_over(&self, fallback: &HookSettings) -> HookSettings {
        let pick = |own: &Option<String>, other: &Option<String>| own.clone().or_else(|| other.clone());
        HookSettings {
            pre_delete_script: pick(&self.pre_delete_script, &fallback.pre_delete_script),
            pre_delete_retry_script: pick(&self.pre_delete_retry_script, &fallback.pre_delete_retry_script),
            post_delete_script: pick(&self.post_delete_script, &fallback.post_delete_script),
            post_delete_retry_script: pick(&self.post_delete_retry_script, &fallback.post_delete_retry_script),
            pre_wal_delete_script: pick(&self.pre_wal_delete_script, &fallback.pre_wal_delete_script),
            pre_wal_delete_retry_script: pick(
                &self.pre_wal_delete_retry_script,
                &fallback.pre_wal_delete_retry_script,
            ),
            post_wal_delete_script: pick(&self.post_wal_delete_script, &fallback.post_wal_delete_script),
            post_wal_delete_retry_script: pick(
                &self.post_wal_delete_retry_script,
                &fallback.post_wal_delete_retry_script,
            ),
        }
    }
}

/// `[global]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Parent of every server directory that does not set its own
    #[serde(default = "default_base_directory")]
    pub base_directory: PathBuf,
    /// Default retention policy (none = no automatic retention)
    #[serde(default)]
    pub retention_policy: Option<RetentionMode>,
    #[serde(default)]
    pub minimum_redundancy: u32,
    /// Pause between retry hook attempts
    #[serde(default = "default_retry_sleep_secs")]
    pub hook_retry_sleep_secs: u64,
    /// Retry hook attempt limit (0 = unbounded)
    #[serde(default)]
    pub hook_retry_max_attempts: u32,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(flatten)]
    pub hooks: HookSettings,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            base_directory: default_base_directory(),
            retention_policy: None,
            minimum_redundancy: 0,
            hook_retry_sleep_secs: default_retry_sleep_secs(),
            hook_retry_max_attempts: 0,
            log_level: default_log_level(),
            log_file: None,
            hooks: HookSettings::default(),
        }
    }
}

/// `[servers.<name>]` section
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerSection {
    #[serde(default)]
    pub description: Option<String>,
    /// Defaults to `<base_directory>/<name>`
    #[serde(default)]
    pub server_directory: Option<PathBuf>,
    #[serde(default)]
    pub retention_policy: Option<RetentionMode>,
    #[serde(default)]
    pub minimum_redundancy: Option<u32>,
    #[serde(default)]
    pub hook_retry_sleep_secs: Option<u64>,
    #[serde(default)]
    pub hook_retry_max_attempts: Option<u32>,
    #[serde(flatten)]
    pub hooks: HookSettings,
}

/// Whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub global: GlobalConfig,
    #[serde(default)]
    pub servers: BTreeMap<String, ServerSection>,
}

/// Fully resolved settings for one server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub name: String,
    pub description: Option<String>,
    pub directory: PathBuf,
    pub policy: RetentionPolicy,
    pub hooks: HookSettings,
    pub hook_retry_sleep: Duration,
    /// `None` = retry until a terminal exit code
    pub hook_retry_max_attempts: Option<u32>,
}

impl ServerConfig {
    /// Settings for a server rooted at `directory` with no hooks
    pub fn new(name: impl Into<String>, directory: impl Into<PathBuf>, policy: RetentionPolicy) -> Self {
        Self {
            name: name.into(),
            description: None,
            directory: directory.into(),
            policy,
            hooks: HookSettings::default(),
            hook_retry_sleep: Duration::from_secs(default_retry_sleep_secs()),
            hook_retry_max_attempts: None,
        }
    }
}

fn default_base_directory() -> PathBuf {
    PathBuf::from("/var/lib/pgkeep")
}

fn default_retry_sleep_secs() -> u64 {
    30
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Parse configuration from TOML text
    pub fn from_toml_str(text: &str) -> CatalogResult<Self> {
        let config: Config =
            toml::from_str(text).map_err(|e| CatalogError::Config(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `explicit`, or the first default location found
    pub fn load(explicit: Option<&Path>) -> CatalogResult<Self> {
        let path = config_file_path(explicit).ok_or_else(|| {
            CatalogError::Config(format!(
                "no configuration file found (use --config, ${} or {})",
                CONFIG_ENV, SYSTEM_CONFIG_PATH
            ))
        })?;

        let text = std::fs::read_to_string(&path)
            .map_err(|e| CatalogError::Config(format!("cannot read {}: {}", path.display(), e)))?;

        tracing::debug!("Loaded configuration from {}", path.display());
        Self::from_toml_str(&text)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> CatalogResult<()> {
        for name in self.servers.keys() {
            if name.is_empty() || name == "all" || name.contains('/') {
                return Err(CatalogError::Config(format!("invalid server name '{}'", name)));
            }
        }
        Ok(())
    }

    /// Names of every configured server, sorted
    pub fn server_names(&self) -> Vec<String> {
        self.servers.keys().cloned().collect()
    }

    /// Resolve the effective settings of one server
    pub fn server(&self, name: &str) -> CatalogResult<ServerConfig> {
        let section = self
            .servers
            .get(name)
            .ok_or_else(|| CatalogError::NotFound(format!("server '{}'", name)))?;

        let directory = section
            .server_directory
            .clone()
            .unwrap_or_else(|| self.global.base_directory.join(name));

        let mode = section.retention_policy.or(self.global.retention_policy);
        let minimum_redundancy = section
            .minimum_redundancy
            .unwrap_or(self.global.minimum_redundancy);

        let max_attempts = section
            .hook_retry_max_attempts
            .unwrap_or(self.global.hook_retry_max_attempts);

        Ok(ServerConfig {
            name: name.to_string(),
            description: section.description.clone(),
            directory,
            policy: RetentionPolicy::new(mode, minimum_redundancy),
            hooks: section.hooks.merged_over(&self.global.hooks),
            hook_retry_sleep: Duration::from_secs(
                section
                    .hook_retry_sleep_secs
                    .unwrap_or(self.global.hook_retry_sleep_secs),
            ),
            hook_retry_max_attempts: if max_attempts == 0 { None } else { Some(max_attempts) },
        })
    }
}

/// Locate the configuration file
///
/// Order: explicit path, `$PGKEEP_CONFIG`, the user config dir, `/etc/pgkeep.toml`.
pub fn config_file_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    if let Some(dir) = dirs::config_dir() {
        let candidate = dir.join("pgkeep").join("pgkeep.toml");
        if candidate.exists() {
            return Some(candidate);
        }
    }

    let system = PathBuf::from(SYSTEM_CONFIG_PATH);
    if system.exists() {
        return Some(system);
    }

    None
}
