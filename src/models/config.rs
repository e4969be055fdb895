//! Configuration model.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Digest algorithm used to verify copies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumAlgorithm {
    Md5,
    #[default]
    Sha256,
}

impl fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumAlgorithm::Md5 => write!(f, "md5"),
            ChecksumAlgorithm::Sha256 => write!(f, "sha256"),
        }
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "md5" => Ok(ChecksumAlgorithm::Md5),
            "sha256" => Ok(ChecksumAlgorithm::Sha256),
            other => Err(crate::Error::Config(format!(
                "checksum_algorithm must be md5 or sha256, got {}",
                other
            ))),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Directory holding the state database.
    pub data_dir: PathBuf,
    /// Log level: debug, info, warning, error.
    pub log_level: String,
    /// Simulate moves without touching the filesystem.
    pub dry_run: bool,
    /// Hours an undo entry stays reversible.
    pub undo_retention_hours: i64,
    /// Reject submissions that fail permission checks (otherwise warn).
    pub strict_permissions: bool,
    /// Digest algorithm for copy verification.
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Warn for moves larger than this many GiB.
    pub max_move_size_gb: u64,
    /// Seconds between reaper passes.
    pub reaper_interval_secs: u64,
    /// Fallback poll interval of the executor loop in milliseconds.
    pub poll_interval_ms: u64,
    /// Number of finished tasks reported by the queue state.
    pub completed_history_limit: usize,
    /// Pattern of array disk mount points; one `*` allowed in the last component.
    pub disk_mount_pattern: String,
    /// Share configuration directory.
    pub share_config_path: PathBuf,
    /// Pid file written by the unRAID mover.
    pub mover_pid_path: PathBuf,
    /// Hold dispatch while the mover is running.
    pub pause_while_mover_running: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            dry_run: true,
            undo_retention_hours: 24,
            strict_permissions: true,
            checksum_algorithm: ChecksumAlgorithm::Sha256,
            max_move_size_gb: 500,
            reaper_interval_secs: 300,
            poll_interval_ms: 1000,
            completed_history_limit: 50,
            disk_mount_pattern: "/mnt/disk*".to_string(),
            share_config_path: PathBuf::from("/config/shares"),
            mover_pid_path: PathBuf::from("/var/run/mover.pid"),
            pause_while_mover_running: true,
        }
    }
}

impl Config {
    /// Path of the state database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }

    /// Advisory size threshold in bytes.
    pub fn max_move_size_bytes(&self) -> u64 {
        self.max_move_size_gb.saturating_mul(1024 * 1024 * 1024)
    }

    /// Undo retention as a chrono duration.
    pub fn undo_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.undo_retention_hours)
    }

    /// Check values that would make the engine misbehave.
    pub fn validate(&self) -> crate::Result<()> {
        if self.undo_retention_hours <= 0 {
            return Err(crate::Error::Config(
                "undo_retention_hours must be positive".to_string(),
            ));
        }
        if self.reaper_interval_secs == 0 {
            return Err(crate::Error::Config(
                "reaper_interval_secs must be positive".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(crate::Error::Config(
                "poll_interval_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply `ARRAY_BALANCER_*` environment overrides.
    pub fn apply_env_overrides(&mut self) -> crate::Result<()> {
        if let Ok(dir) = std::env::var("ARRAY_BALANCER_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(value) = std::env::var("ARRAY_BALANCER_DRY_RUN") {
            self.dry_run = parse_bool(&value).ok_or_else(|| {
                crate::Error::Config(format!("ARRAY_BALANCER_DRY_RUN: invalid bool {}", value))
            })?;
        }
        if let Ok(value) = std::env::var("ARRAY_BALANCER_CHECKSUM") {
            self.checksum_algorithm = value.parse()?;
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Get the configuration directory path.
fn dirs_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("array_balancer")
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("array_balancer")
}

/// Default location of the configuration file.
pub fn default_config_path() -> PathBuf {
    dirs_config_path().join("config.toml")
}

/// Load configuration from a TOML file.
pub fn load_config_from(path: &Path) -> crate::Result<Config> {
    let content = std::fs::read_to_string(path)?;
    toml::from_str(&content)
        .map_err(|e| crate::Error::Config(format!("{}: {}", path.display(), e)))
}

/// Load configuration from the given file, or the default location if present,
/// then apply environment overrides.
pub fn load_config(path: Option<&Path>) -> crate::Result<Config> {
    let mut config = match path {
        Some(p) => load_config_from(p)?,
        None => {
            let default_path = default_config_path();
            if default_path.exists() {
                load_config_from(&default_path)?
            } else {
                Config::default()
            }
        }
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}
