//! Undo command implementations.

use crate::core::engine::Engine;
use crate::Result;
use chrono::Utc;
use colored::Colorize;

/// List undo entries.
pub fn list(engine: &Engine, include_invalid: bool) -> Result<()> {
    let entries = engine.list_undo(include_invalid)?;
    if entries.is_empty() {
        println!("No reversible operations");
        return Ok(());
    }

    let now = Utc::now();
    for entry in &entries {
        let state = if entry.is_reversible_at(now) {
            let left = entry.expires_at - now;
            format!("valid, {}h{:02}m left", left.num_hours(), left.num_minutes() % 60).green()
        } else {
            entry
                .invalidation_reason
                .clone()
                .unwrap_or_else(|| "expired".to_string())
                .dimmed()
        };
        println!(
            "  #{:<5} {} -> {} ({} bytes) [{}]",
            entry.id,
            entry.source_path.display(),
            entry.dest_path.display(),
            entry.file_size,
            state
        );
    }
    Ok(())
}

/// Reverse one entry.
pub async fn reverse(engine: &Engine, id: i64) -> Result<()> {
    println!("{}", "[UNDO] Reversing move...".bold().cyan());
    let entry = engine.reverse_undo(id).await?;
    println!(
        "{} {} -> {}",
        "[OK] Restored".green(),
        entry.dest_path.display(),
        entry.source_path.display()
    );
    Ok(())
}

/// Run one reaper pass.
pub fn reap(engine: &Engine) -> Result<()> {
    let expired = engine.reap()?;
    println!("{} {} entr(ies) expired", "[OK]".green(), expired);
    Ok(())
}
