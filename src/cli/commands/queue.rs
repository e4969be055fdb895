//! Queue inspection and control commands.

use crate::core::engine::Engine;
use crate::models::task::{CancelOutcome, Task, TaskDetails, TaskId, TaskStatus};
use crate::Result;
use colored::{ColoredString, Colorize};

/// Print the queue state.
pub fn show_queue(engine: &Engine, json: bool) -> Result<()> {
    let state = engine.get_state()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }

    if state.is_paused {
        println!(
            "{} {}",
            "[PAUSED]".yellow().bold(),
            state.pause_reason.as_deref().unwrap_or("no reason given")
        );
        println!();
    }

    println!("{}", "[Running]".bold().cyan());
    match &state.running {
        Some(task) => print_task_line(task),
        None => println!("  (idle)"),
    }
    println!();

    println!("{} {}", "[Queued]".bold().cyan(), state.queued.len());
    for task in &state.queued {
        print_task_line(task);
    }
    println!();

    println!("{}", "[Recently finished]".bold().cyan());
    for task in &state.completed {
        print_task_line(task);
    }
    Ok(())
}

/// Print one task in full.
pub fn show_task(engine: &Engine, id: TaskId) -> Result<()> {
    let task = engine.get_task(id)?;
    println!("{} {}", "Task".bold(), task.id);
    println!("  {} {}", "Type:".bold(), task.task_type());
    println!("  {} {}", "Status:".bold(), status_label(task.status, task.status.as_str()));
    println!("  {} {}", "Priority:".bold(), task.priority);
    println!("  {} {:.0}%", "Progress:".bold(), task.progress_percent);
    if let Some(group) = &task.correlation_group {
        println!("  {} {}", "Group:".bold(), group);
    }
    if !task.depends_on.is_empty() {
        println!("  {} {:?}", "Depends on:".bold(), task.depends_on);
    }
    if let Some(position) = task.queue_position {
        println!("  {} {}", "Position:".bold(), position);
    }
    println!("  {} {}", "Created:".bold(), task.created_at);
    if let Some(started) = task.started_at {
        println!("  {} {}", "Started:".bold(), started);
    }
    if let Some(completed) = task.completed_at {
        println!("  {} {}", "Finished:".bold(), completed);
    }
    if let Some(error) = &task.error {
        println!("  {} {}", "Error:".bold(), error.red());
    }

    match &task.details {
        TaskDetails::MoveFiles { files } => {
            println!("  {} {}", "Files:".bold(), files.len());
            for mv in files {
                println!(
                    "    {} -> {}",
                    mv.source_path.display(),
                    mv.dest_path.display()
                );
            }
        }
        TaskDetails::MoveFile {
            source_path,
            dest_path,
        }
        | TaskDetails::MoveDirectory {
            source_path,
            dest_path,
        } => {
            println!("  {} {}", "Source:".bold(), source_path.display());
            println!("  {} {}", "Dest:".bold(), dest_path.display());
        }
    }
    Ok(())
}

/// List the tasks of a correlation group.
pub fn show_group(engine: &Engine, group: &str) -> Result<()> {
    let tasks = engine.list_group(group)?;
    if tasks.is_empty() {
        println!("No tasks in group {}", group.bold());
        return Ok(());
    }
    for task in &tasks {
        print_task_line(task);
    }
    Ok(())
}

pub fn cancel(engine: &Engine, id: TaskId) -> Result<()> {
    match engine.cancel(id)? {
        CancelOutcome::Cancelled => println!("{} task {}", "[OK] Cancelled".green(), id),
        CancelOutcome::Requested => println!(
            "{} task {} will stop after its current file",
            "[OK]".green(),
            id
        ),
    }
    Ok(())
}

pub fn pause(engine: &Engine, reason: Option<&str>) -> Result<()> {
    engine.pause(reason)?;
    println!("{}", "[OK] Queue paused".green());
    Ok(())
}

pub fn resume(engine: &Engine) -> Result<()> {
    engine.resume()?;
    println!("{}", "[OK] Queue resumed".green());
    Ok(())
}

pub fn pause_task(engine: &Engine, id: TaskId) -> Result<()> {
    engine.pause_task(id)?;
    println!(
        "{} task {} will pause after its current file",
        "[OK]".green(),
        id
    );
    Ok(())
}

pub fn resume_task(engine: &Engine, id: TaskId) -> Result<()> {
    engine.resume_task(id)?;
    println!("{} task {}", "[OK] Resumed".green(), id);
    Ok(())
}

pub fn reorder(engine: &Engine, ids: &[TaskId]) -> Result<()> {
    engine.reorder(ids)?;
    println!("{} {:?}", "[OK] New order:".green(), ids);
    Ok(())
}

pub fn delete(engine: &Engine, id: TaskId) -> Result<()> {
    engine.delete_task(id)?;
    println!("{} task {}", "[OK] Deleted".green(), id);
    Ok(())
}

fn print_task_line(task: &Task) {
    let mut line = format!(
        "  #{:<5} {} {:<15} {:<7}",
        task.id,
        status_label(task.status, &format!("{:<10}", task.status.as_str())),
        task.task_type(),
        task.priority.to_string()
    );
    if task.status.holds_slot() {
        line.push_str(&format!(" {:>3.0}%", task.progress_percent));
    }
    if let Some(error) = &task.error {
        line.push_str(&format!(" {}", error.red()));
    }
    println!("{}", line);
}

fn status_label(status: TaskStatus, label: &str) -> ColoredString {
    match status {
        TaskStatus::Completed => label.green(),
        TaskStatus::Failed => label.red(),
        TaskStatus::Cancelled => label.dimmed(),
        TaskStatus::Running => label.cyan(),
        TaskStatus::Paused => label.yellow(),
        TaskStatus::Pending | TaskStatus::Queued => label.normal(),
    }
}
