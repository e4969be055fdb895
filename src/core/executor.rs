//! Migration executor.
//!
//! Runs one claimed task at a time:
//! - directory tasks are expanded into one move per regular file
//! - each file goes through gate -> copy/verify/rename/delete -> history row -> undo entry
//! - older undo entries touching the same paths are superseded only once a move succeeds
//! - pause and cancel requests are honoured only between files
//!
//! Any error inside a task is caught here and recorded on the task and in the
//! operation history; it never escapes to the caller's loop.

use crate::core::checksum::{ChecksumAlgorithm, ChecksumVerifier};
use crate::core::history::{elapsed_ms, OperationHistory};
use crate::core::queue::TaskQueue;
use crate::core::transfer::{digest_blocking, move_verified};
use crate::core::undo::UndoLog;
use crate::models::config::Config;
use crate::models::history::{NewHistoryRecord, OperationStatus};
use crate::models::task::{ControlRequest, FileMove, Task, TaskDetails, TaskId, TaskStatus};
use crate::models::undo::{NewUndoEntry, REASON_DRY_RUN};
use crate::preflight::{CheckStatus, PermissionGate};
use crate::utils::fs::{list_files_relative, remove_empty_dirs};
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Executor configuration.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Digest sources and record simulated entries instead of moving.
    pub dry_run: bool,
    pub checksum_algorithm: ChecksumAlgorithm,
    /// How often a paused task re-reads its control state.
    pub poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            checksum_algorithm: ChecksumAlgorithm::Sha256,
            poll_interval: Duration::from_millis(1000),
        }
    }
}

impl From<&Config> for ExecutorConfig {
    fn from(config: &Config) -> Self {
        Self {
            dry_run: config.dry_run,
            checksum_algorithm: config.checksum_algorithm,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        }
    }
}

/// One file of a task.
#[derive(Debug, Clone)]
struct PlannedMove {
    mv: FileMove,
    /// Destination directories may be created (directory tasks).
    create_parent: bool,
}

/// Result of a checkpoint.
enum Checkpoint {
    Continue,
    Cancel,
    /// Shutdown while paused; the task stays paused.
    Suspend,
}

/// How a task body ended, short of an error.
enum Flow {
    Completed,
    Cancelled,
    Suspended,
}

/// Executes migration tasks claimed from the queue.
pub struct MigrationExecutor {
    queue: TaskQueue,
    undo: UndoLog,
    history: OperationHistory,
    gate: Arc<dyn PermissionGate>,
    verifier: Arc<dyn ChecksumVerifier>,
    config: ExecutorConfig,
    shutdown: Option<watch::Receiver<bool>>,
}

impl MigrationExecutor {
    pub fn new(
        queue: TaskQueue,
        undo: UndoLog,
        history: OperationHistory,
        gate: Arc<dyn PermissionGate>,
        verifier: Arc<dyn ChecksumVerifier>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            queue,
            undo,
            history,
            gate,
            verifier,
            config,
            shutdown: None,
        }
    }

    /// Let a paused task stop waiting when `shutdown` flips to true.
    pub fn with_shutdown(mut self, shutdown: watch::Receiver<bool>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Claim and execute the next eligible task.
    ///
    /// Returns the task in its final state, or `None` if nothing was ready.
    pub async fn run_next(&self) -> Result<Option<Task>> {
        match self.queue.dequeue_next()? {
            Some(task) => Ok(Some(self.execute(task).await?)),
            None => Ok(None),
        }
    }

    /// Execute a task already moved to `running`.
    ///
    /// Only bookkeeping failures (the database itself) are returned as errors.
    pub async fn execute(&self, task: Task) -> Result<Task> {
        let started = Instant::now();
        let mut current: Option<FileMove> = None;
        tracing::info!(
            "Executing task {} ({}{})",
            task.id,
            task.task_type(),
            if self.config.dry_run { ", dry run" } else { "" }
        );

        match self.run_task(&task, &mut current).await {
            Ok(Flow::Completed) => {
                let done = self.queue.complete(task.id)?;
                tracing::info!(
                    "Task {} completed in {:.1}s",
                    task.id,
                    started.elapsed().as_secs_f64()
                );
                Ok(done)
            }
            Ok(Flow::Cancelled) => {
                let done = self.queue.cancel_running(task.id)?;
                tracing::info!("Task {} cancelled", task.id);
                Ok(done)
            }
            Ok(Flow::Suspended) => {
                tracing::warn!("Task {} left paused at shutdown", task.id);
                self.queue.get(task.id)
            }
            Err(e) => {
                tracing::error!("Task {} failed: {}", task.id, e);
                self.history.record(NewHistoryRecord {
                    task_id: Some(task.id),
                    operation: task.task_type().to_string(),
                    source_path: current.as_ref().map(|m| m.source_path.clone()),
                    dest_path: current.as_ref().map(|m| m.dest_path.clone()),
                    file_size: None,
                    status: OperationStatus::Failed,
                    duration_ms: Some(elapsed_ms(started)),
                    error: Some(e.task_message()),
                })?;
                self.queue.fail(task.id, &e)
            }
        }
    }

    async fn run_task(&self, task: &Task, current: &mut Option<FileMove>) -> Result<Flow> {
        let planned = self.plan(&task.details).await?;
        let total = planned.len();
        if total == 0 {
            tracing::info!("Task {} has no files to move", task.id);
        }

        for (index, step) in planned.iter().enumerate() {
            match self.checkpoint(task.id).await? {
                Checkpoint::Continue => {}
                Checkpoint::Cancel => return Ok(Flow::Cancelled),
                Checkpoint::Suspend => return Ok(Flow::Suspended),
            }

            *current = Some(step.mv.clone());
            tracing::debug!(
                "Task {} file {}/{}: {:?} -> {:?}",
                task.id,
                index + 1,
                total,
                step.mv.source_path,
                step.mv.dest_path
            );
            if self.config.dry_run {
                self.simulate_one(task.id, step).await?;
            } else {
                self.move_one(task.id, step).await?;
            }
            *current = None;

            let percent = (index + 1) as f64 * 100.0 / total as f64;
            self.queue.set_progress(task.id, percent)?;
        }

        if let TaskDetails::MoveDirectory { source_path, .. } = &task.details {
            if !self.config.dry_run {
                let root = source_path.clone();
                let removed = tokio::task::spawn_blocking(move || remove_empty_dirs(&root))
                    .await
                    .map_err(|e| crate::Error::other(format!("Cleanup worker failed: {}", e)))?;
                tracing::debug!("Removed {} empty source director(ies)", removed);
            }
        }

        Ok(Flow::Completed)
    }

    /// Resolve a task payload into individual file moves.
    async fn plan(&self, details: &TaskDetails) -> Result<Vec<PlannedMove>> {
        match details {
            TaskDetails::MoveFile {
                source_path,
                dest_path,
            } => Ok(vec![PlannedMove {
                mv: FileMove::new(source_path.clone(), dest_path.clone()),
                create_parent: false,
            }]),
            TaskDetails::MoveFiles { files } => Ok(files
                .iter()
                .map(|mv| PlannedMove {
                    mv: mv.clone(),
                    create_parent: false,
                })
                .collect()),
            TaskDetails::MoveDirectory {
                source_path,
                dest_path,
            } => {
                let root = source_path.clone();
                let files = tokio::task::spawn_blocking(move || list_files_relative(&root))
                    .await
                    .map_err(|e| crate::Error::other(format!("Scan worker failed: {}", e)))??;
                Ok(files
                    .into_iter()
                    .map(|relative| PlannedMove {
                        mv: FileMove::new(source_path.join(&relative), dest_path.join(&relative)),
                        create_parent: true,
                    })
                    .collect())
            }
        }
    }

    /// Observe control requests between files.
    async fn checkpoint(&self, id: TaskId) -> Result<Checkpoint> {
        match self.queue.control_request(id)? {
            None => Ok(Checkpoint::Continue),
            Some(ControlRequest::Cancel) => Ok(Checkpoint::Cancel),
            Some(ControlRequest::Pause) => {
                self.queue.mark_paused(id)?;
                tracing::info!("Task {} paused", id);
                self.wait_while_paused(id).await
            }
        }
    }

    async fn wait_while_paused(&self, id: TaskId) -> Result<Checkpoint> {
        loop {
            if self.shutting_down() {
                return Ok(Checkpoint::Suspend);
            }
            self.queue.wait_for_change(self.config.poll_interval).await;

            let task = self.queue.get(id)?;
            if task.control_request == Some(ControlRequest::Cancel) {
                return Ok(Checkpoint::Cancel);
            }
            match task.status {
                TaskStatus::Paused => continue,
                TaskStatus::Running => {
                    tracing::info!("Task {} resumed", id);
                    return Ok(Checkpoint::Continue);
                }
                other => {
                    return Err(crate::Error::InvalidTransition {
                        id,
                        from: other,
                        to: TaskStatus::Running,
                    })
                }
            }
        }
    }

    fn shutting_down(&self) -> bool {
        self.shutdown
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    fn gate(&self, source: &Path, dest: &Path) -> Result<()> {
        let check = self.gate.check_file_operation(source, dest);
        if check.status == CheckStatus::Error {
            return Err(crate::Error::PermissionDenied(check.error.unwrap_or_else(|| {
                format!("{} -> {}", source.display(), dest.display())
            })));
        }
        Ok(())
    }

    async fn move_one(&self, task_id: TaskId, step: &PlannedMove) -> Result<()> {
        let source = &step.mv.source_path;
        let dest = &step.mv.dest_path;

        if step.create_parent {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    crate::Error::io_failure(format!("Failed to create {}: {}", parent.display(), e))
                })?;
            }
        }
        self.gate(source, dest)?;
        if dest.exists() {
            return Err(crate::Error::PathConflict(format!(
                "Destination already exists: {}",
                dest.display()
            )));
        }

        let slot = self.undo.io_slot();
        let _guard = slot.lock().await;
        let started = Instant::now();
        let report = move_verified(
            source,
            dest,
            Arc::clone(&self.verifier),
            self.config.checksum_algorithm,
            None,
        )
        .await?;

        // Committed on its own so a crash before the undo entry stays detectable.
        self.history.record(NewHistoryRecord {
            task_id: Some(task_id),
            operation: "move".to_string(),
            source_path: Some(source.clone()),
            dest_path: Some(dest.clone()),
            file_size: Some(report.file_size),
            status: OperationStatus::Completed,
            duration_ms: Some(elapsed_ms(started)),
            error: None,
        })?;
        self.undo.record_superseding(NewUndoEntry::moved(
            Some(task_id),
            source.clone(),
            dest.clone(),
            report.file_size,
            report.checksum,
        ))?;
        tracing::info!("Moved {:?} -> {:?}", source, dest);
        Ok(())
    }

    /// Dry run: digest the source read-only and record a non-reversible entry.
    async fn simulate_one(&self, task_id: TaskId, step: &PlannedMove) -> Result<()> {
        let source = &step.mv.source_path;
        let dest = &step.mv.dest_path;

        if !source.is_file() {
            return Err(crate::Error::io_failure(format!(
                "Source file not found: {}",
                source.display()
            )));
        }
        if dest.exists() {
            return Err(crate::Error::PathConflict(format!(
                "Destination already exists: {}",
                dest.display()
            )));
        }
        let parent_pending = step.create_parent && !dest.parent().map(Path::exists).unwrap_or(true);
        if parent_pending {
            tracing::debug!("Would create {:?}", dest.parent().map(PathBuf::from));
        } else {
            self.gate(source, dest)?;
        }

        let started = Instant::now();
        let checksum =
            digest_blocking(source, Arc::clone(&self.verifier), self.config.checksum_algorithm)
                .await?;
        let file_size = tokio::fs::metadata(source).await?.len();

        self.undo.record_with_history(
            NewUndoEntry::moved(Some(task_id), source.clone(), dest.clone(), file_size, checksum)
                .non_reversible(REASON_DRY_RUN),
            NewHistoryRecord {
                task_id: Some(task_id),
                operation: "move".to_string(),
                source_path: Some(source.clone()),
                dest_path: Some(dest.clone()),
                file_size: Some(file_size),
                status: OperationStatus::Simulated,
                duration_ms: Some(elapsed_ms(started)),
                error: None,
            },
        )?;
        tracing::info!("[DRY RUN] Would move {:?} -> {:?}", source, dest);
        Ok(())
    }
}
