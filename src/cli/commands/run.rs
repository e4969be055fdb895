//! Run command implementation.

use crate::core::engine::Engine;
use crate::core::recovery::RecoveryReport;
use crate::models::task::{QueueState, TaskStatus};
use crate::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::watch;

/// Run the engine until Ctrl-C, or drain runnable tasks with `once`.
pub async fn run(engine: &Engine, once: bool) -> Result<()> {
    if engine.config().dry_run {
        println!(
            "{}",
            "[DRY-RUN] dry_run is enabled; no files will be moved".yellow()
        );
    }

    if once {
        return run_once(engine).await;
    }

    println!("{}", "[RUN] Engine running, Ctrl-C to stop".bold().cyan());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let runner = engine.clone();
    let mut handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .map_err(|e| crate::Error::other(format!("Invalid progress template: {}", e)))?,
    );
    spinner.enable_steady_tick(Duration::from_millis(120));

    let mut ticker = tokio::time::interval(Duration::from_millis(500));
    let result = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                spinner.set_message("Stopping after the current task...");
                let _ = shutdown_tx.send(true);
                break (&mut handle).await;
            }
            finished = &mut handle => break finished,
            _ = ticker.tick() => match engine.get_state() {
                Ok(state) => spinner.set_message(describe(&state)),
                Err(e) => tracing::warn!("Failed to read queue state: {}", e),
            },
        }
    };

    spinner.finish_and_clear();
    result.map_err(|e| crate::Error::other(format!("Engine task failed: {}", e)))??;
    println!("{}", "[OK] Engine stopped".green());
    Ok(())
}

async fn run_once(engine: &Engine) -> Result<()> {
    let report = engine.recover()?;
    print_recovery(&report);

    let tasks = engine.drain().await?;
    if tasks.is_empty() {
        println!("Nothing to run");
    }
    for task in &tasks {
        let outcome = match task.status {
            TaskStatus::Completed => "[OK]".green(),
            TaskStatus::Cancelled => "[CANCELLED]".yellow(),
            TaskStatus::Paused => "[PAUSED]".yellow(),
            _ => "[FAIL]".red(),
        };
        match &task.error {
            Some(error) => println!("{} task {}: {}", outcome, task.id, error),
            None => println!("{} task {} ({})", outcome, task.id, task.task_type()),
        }
    }
    Ok(())
}

/// Print a recovery report, if anything happened.
pub fn print_recovery(report: &RecoveryReport) {
    if report.is_clean() {
        return;
    }
    println!("{}", "[Recovery]".bold().yellow());
    for id in &report.interrupted_tasks {
        println!("  task {} was interrupted and marked failed", id);
    }
    for path in &report.removed_temp_files {
        println!("  removed temporary file {}", path.display());
    }
    for record in &report.moves_without_undo {
        println!(
            "  {} {} -> {} has no undo entry",
            "[WARN]".yellow(),
            record
                .source_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default(),
            record
                .dest_path
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        );
    }
    println!();
}

fn describe(state: &QueueState) -> String {
    let mut message = match &state.running {
        Some(task) => format!(
            "Task {} ({}) {} {:.0}%",
            task.id,
            task.task_type(),
            task.status,
            task.progress_percent
        ),
        None => "Idle".to_string(),
    };
    message.push_str(&format!(", {} queued", state.queued.len()));
    if state.is_paused {
        message.push_str(&format!(
            ", paused: {}",
            state.pause_reason.as_deref().unwrap_or("manual")
        ));
    }
    message
}
