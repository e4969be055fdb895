//! Startup crash recovery.
//!
//! Runs once before the executor loop starts:
//! - tasks left running or paused by a previous process are failed
//! - files those tasks already moved but never recorded get a history row
//! - orphaned temporary copies in their destination directories are deleted
//! - completed moves without an undo entry are reported, never repaired

use crate::core::history::OperationHistory;
use crate::core::queue::TaskQueue;
use crate::models::history::{NewHistoryRecord, OperationHistoryRecord, OperationStatus};
use crate::models::task::{Task, TaskDetails, TaskId, TaskStatus};
use crate::utils::fs::{find_temp_files, find_temp_files_below};
use crate::Result;
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// What startup recovery found and did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecoveryReport {
    /// Tasks failed because a previous process died while running them.
    pub interrupted_tasks: Vec<TaskId>,
    /// Orphaned temporary copies that were deleted.
    pub removed_temp_files: Vec<PathBuf>,
    /// Completed moves that cannot be reversed because their undo entry is missing.
    pub moves_without_undo: Vec<OperationHistoryRecord>,
}

impl RecoveryReport {
    pub fn is_clean(&self) -> bool {
        self.interrupted_tasks.is_empty()
            && self.removed_temp_files.is_empty()
            && self.moves_without_undo.is_empty()
    }
}

/// Bring persisted state back to a consistent starting point.
pub fn recover(queue: &TaskQueue, history: &OperationHistory) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();

    let mut stale = queue.list_by_status(TaskStatus::Running)?;
    stale.extend(queue.list_by_status(TaskStatus::Paused)?);

    for task in stale {
        tracing::warn!(
            "Task {} was {} when the previous process stopped",
            task.id,
            task.status
        );
        for record in unrecorded_moves(&task, history)? {
            tracing::warn!(
                "Task {} moved {:?} -> {:?} before stopping; recording it",
                task.id,
                record.source_path,
                record.dest_path
            );
            history.record(record)?;
        }

        let interrupted = crate::Error::io_failure("interrupted by restart");
        queue.fail(task.id, &interrupted)?;
        history.record(NewHistoryRecord {
            task_id: Some(task.id),
            operation: task.task_type().to_string(),
            source_path: None,
            dest_path: None,
            file_size: None,
            status: OperationStatus::Failed,
            duration_ms: None,
            error: Some(interrupted.task_message()),
        })?;

        for temp in orphaned_temp_files(&task) {
            match std::fs::remove_file(&temp) {
                Ok(()) => {
                    tracing::info!("Removed orphaned temporary file {:?}", temp);
                    report.removed_temp_files.push(temp);
                }
                Err(e) => tracing::warn!("Failed to remove {:?}: {}", temp, e),
            }
        }
        report.interrupted_tasks.push(task.id);
    }

    report.moves_without_undo = history.completed_moves_without_undo()?;
    for record in &report.moves_without_undo {
        tracing::warn!(
            "Move {:?} -> {:?} completed without an undo entry; it cannot be reversed",
            record.source_path,
            record.dest_path
        );
    }

    if report.is_clean() {
        tracing::debug!("Recovery: nothing to do");
    }
    Ok(report)
}

/// Explicit moves of an interrupted task that reached the disk without a
/// history row: the source is gone and the destination holds a file.
///
/// Directory tasks are skipped; their file list died with the source tree.
fn unrecorded_moves(task: &Task, history: &OperationHistory) -> Result<Vec<NewHistoryRecord>> {
    if let TaskDetails::MoveDirectory { .. } = task.details {
        return Ok(Vec::new());
    }

    let mut found = Vec::new();
    for mv in task.details.top_level_moves() {
        if mv.source_path.exists() || !mv.dest_path.is_file() {
            continue;
        }
        if history.has_completed_move(task.id, &mv.source_path, &mv.dest_path)? {
            continue;
        }
        found.push(NewHistoryRecord {
            task_id: Some(task.id),
            operation: "move".to_string(),
            file_size: std::fs::metadata(&mv.dest_path).ok().map(|m| m.len()),
            source_path: Some(mv.source_path),
            dest_path: Some(mv.dest_path),
            status: OperationStatus::Completed,
            duration_ms: None,
            error: None,
        });
    }
    Ok(found)
}

fn orphaned_temp_files(task: &Task) -> BTreeSet<PathBuf> {
    let mut found = BTreeSet::new();
    match &task.details {
        TaskDetails::MoveDirectory { dest_path, .. } => {
            found.extend(find_temp_files_below(dest_path));
        }
        details => {
            let parents: BTreeSet<PathBuf> = details
                .top_level_moves()
                .iter()
                .filter_map(|mv| mv.dest_path.parent().map(PathBuf::from))
                .collect();
            for parent in parents {
                found.extend(find_temp_files(&parent));
            }
        }
    }
    found
}
