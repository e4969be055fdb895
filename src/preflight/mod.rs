//! Permission checks.
//!
//! `check_all` builds the startup report (disk access, share config, app data,
//! mover status); [`gate`] holds the per-operation gate consulted before
//! every move.

pub mod gate;

pub use gate::{FsPermissionGate, PermissionGate};

use crate::core::mover::pid_dir;
use crate::models::config::Config;
use crate::utils::fs::expand_pattern;
use colored::Colorize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Checks whose failure makes the engine unsafe to run.
pub const CRITICAL_CHECKS: [&str; 3] = ["disk_read", "config_read", "appdata_write"];

/// Outcome of a single check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warning,
    Error,
}

/// Result of a single permission check.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionCheck {
    pub name: String,
    pub description: String,
    pub status: CheckStatus,
    pub error: Option<String>,
    pub details: BTreeMap<String, String>,
}

impl PermissionCheck {
    pub fn new(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            status: CheckStatus::Ok,
            error: None,
            details: BTreeMap::new(),
        }
    }

    fn warn(mut self, message: impl Into<String>) -> Self {
        self.status = CheckStatus::Warning;
        self.error = Some(message.into());
        self
    }

    fn fail(mut self, message: impl Into<String>) -> Self {
        self.status = CheckStatus::Error;
        self.error = Some(message.into());
        self
    }
}

/// Complete permission report.
#[derive(Debug, Clone, Serialize)]
pub struct PermissionReport {
    pub running_as_uid: u32,
    pub running_as_gid: u32,
    pub running_as_user: String,
    pub checks: Vec<PermissionCheck>,
}

impl PermissionReport {
    pub fn passed(&self) -> impl Iterator<Item = &PermissionCheck> {
        self.with_status(CheckStatus::Ok)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &PermissionCheck> {
        self.with_status(CheckStatus::Warning)
    }

    pub fn failed(&self) -> impl Iterator<Item = &PermissionCheck> {
        self.with_status(CheckStatus::Error)
    }

    pub fn has_critical_failures(&self) -> bool {
        self.failed()
            .any(|c| CRITICAL_CHECKS.contains(&c.name.as_str()))
    }

    pub fn all_passed(&self) -> bool {
        self.failed().next().is_none()
    }

    fn with_status(&self, status: CheckStatus) -> impl Iterator<Item = &PermissionCheck> {
        self.checks.iter().filter(move |c| c.status == status)
    }
}

/// Run every startup check.
pub fn check_all(config: &Config) -> PermissionReport {
    let disks = expand_pattern(&PathBuf::from(&config.disk_mount_pattern));
    let (uid, gid) = process_ids();

    PermissionReport {
        running_as_uid: uid,
        running_as_gid: gid,
        running_as_user: whoami::username(),
        checks: vec![
            check_disk_read(&disks),
            check_disk_write(&disks),
            check_config_read(config),
            check_appdata_write(config),
            check_mover_status(config),
        ],
    }
}

fn check_disk_read(disks: &[PathBuf]) -> PermissionCheck {
    let mut check = PermissionCheck::new("disk_read", "Read access to array disks");
    if disks.is_empty() {
        return check.warn("No disks found matching pattern");
    }

    let mut unreadable = Vec::new();
    for disk in disks {
        let key = disk.display().to_string();
        if gate::readable(disk) {
            check.details.insert(key, "readable".to_string());
        } else {
            check.details.insert(key.clone(), "NOT readable".to_string());
            unreadable.push(key);
        }
    }
    if unreadable.is_empty() {
        check
    } else {
        check.fail(format!("Cannot read: {}", unreadable.join(", ")))
    }
}

fn check_disk_write(disks: &[PathBuf]) -> PermissionCheck {
    let mut check = PermissionCheck::new("disk_write", "Write access to array disks");
    if disks.is_empty() {
        return check.warn("No disks found");
    }

    let mut unwritable = Vec::new();
    for disk in disks {
        let key = disk.display().to_string();
        if gate::writable(disk) {
            check.details.insert(key, "writable".to_string());
        } else {
            check.details.insert(key.clone(), "NOT writable".to_string());
            unwritable.push(key);
        }
    }
    if unwritable.is_empty() {
        check
    } else {
        check.fail(format!("Cannot write: {}", unwritable.join(", ")))
    }
}

fn check_config_read(config: &Config) -> PermissionCheck {
    let mut check = PermissionCheck::new("config_read", "Read access to share configs");
    let path = &config.share_config_path;
    if !path.exists() {
        return check.warn(format!("Config path not found: {}", path.display()));
    }
    if !gate::readable(path) {
        return check.fail(format!("Cannot read: {}", path.display()));
    }
    check
        .details
        .insert("path".to_string(), path.display().to_string());
    check
}

fn check_appdata_write(config: &Config) -> PermissionCheck {
    let mut check = PermissionCheck::new("appdata_write", "Write access to app data");
    let data_dir = &config.data_dir;

    if !data_dir.exists() {
        if let Err(e) = std::fs::create_dir_all(data_dir) {
            return check.fail(format!("Cannot create {}: {}", data_dir.display(), e));
        }
    }
    if !gate::writable(data_dir) {
        return check.fail(format!("Cannot write: {}", data_dir.display()));
    }

    let probe = data_dir.join(".write_test");
    if let Err(e) = std::fs::write(&probe, b"test").and_then(|_| std::fs::remove_file(&probe)) {
        return check.fail(format!("Write test failed: {}", e));
    }

    check
        .details
        .insert("path".to_string(), data_dir.display().to_string());
    check
}

fn check_mover_status(config: &Config) -> PermissionCheck {
    let mut check = PermissionCheck::new("mover_status", "Read mover status");
    let dir = pid_dir(&config.mover_pid_path);
    if !gate::readable(&dir) {
        return check.warn(format!(
            "Cannot read {} - mover detection may not work",
            dir.display()
        ));
    }
    check
        .details
        .insert("path".to_string(), config.mover_pid_path.display().to_string());
    check
}

#[cfg(unix)]
fn process_ids() -> (u32, u32) {
    (
        nix::unistd::getuid().as_raw(),
        nix::unistd::getgid().as_raw(),
    )
}

#[cfg(not(unix))]
fn process_ids() -> (u32, u32) {
    (0, 0)
}

/// Print a report.
pub fn print_report(report: &PermissionReport) {
    println!(
        "{} uid={} gid={} ({})",
        "Running as".bold(),
        report.running_as_uid,
        report.running_as_gid,
        report.running_as_user
    );
    for check in &report.checks {
        let tag = match check.status {
            CheckStatus::Ok => "[OK]".green(),
            CheckStatus::Warning => "[WARN]".yellow(),
            CheckStatus::Error => "[FAIL]".red(),
        };
        match &check.error {
            Some(error) => println!("{} {}: {}", tag, check.name.bold(), error),
            None => println!("{} {}: {}", tag, check.name.bold(), check.description),
        }
        for (key, value) in &check.details {
            println!("  {} {}: {}", "->".dimmed(), key, value);
        }
    }

    if report.has_critical_failures() {
        println!();
        println!("{}", "Critical permission checks failed".red().bold());
    }
}
