//! History, permission and recovery commands.

use crate::cli::commands::run::print_recovery;
use crate::core::engine::Engine;
use crate::models::config::Config;
use crate::models::history::OperationStatus;
use crate::preflight;
use crate::Result;
use colored::Colorize;

/// Print recent history, newest first.
pub fn history(engine: &Engine, limit: usize) -> Result<()> {
    let records = engine.history(limit)?;
    if records.is_empty() {
        println!("No history yet");
        return Ok(());
    }

    for record in &records {
        let status = match record.status {
            OperationStatus::Completed => record.status.as_str().green(),
            OperationStatus::Failed => record.status.as_str().red(),
            OperationStatus::Simulated => record.status.as_str().yellow(),
            OperationStatus::Reversed => record.status.as_str().cyan(),
        };
        let paths = match (&record.source_path, &record.dest_path) {
            (Some(source), Some(dest)) => format!("{} -> {}", source.display(), dest.display()),
            (Some(path), None) | (None, Some(path)) => path.display().to_string(),
            (None, None) => String::new(),
        };
        println!(
            "  {} {:<9} {:<15} {}",
            record.created_at.format("%Y-%m-%d %H:%M:%S"),
            status,
            record.operation,
            paths
        );
        if let Some(error) = &record.error {
            println!("      {}", error.red());
        }
    }
    Ok(())
}

/// Print the permission report; fails on critical problems.
pub fn permissions(config: &Config) -> Result<()> {
    println!("{}", "Checking permissions...".bold());
    println!();
    let report = preflight::check_all(config);
    preflight::print_report(&report);

    if report.has_critical_failures() {
        return Err(crate::Error::PermissionDenied(
            "critical permission checks failed".to_string(),
        ));
    }
    Ok(())
}

/// Run crash recovery and print what it did.
pub fn recover(engine: &Engine) -> Result<()> {
    let report = engine.recover()?;
    if report.is_clean() {
        println!("{}", "[OK] Nothing to recover".green());
    } else {
        print_recovery(&report);
    }
    Ok(())
}
