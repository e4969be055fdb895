//! Engine façade.
//!
//! Owns the database and every component built on it, and exposes the
//! operational surface used by the CLI (and by any transport layered on top).

use crate::core::checksum::{ChecksumVerifier, FileChecksummer};
use crate::core::database::Database;
use crate::core::executor::{ExecutorConfig, MigrationExecutor};
use crate::core::history::OperationHistory;
use crate::core::mover::{mover_status, MOVER_PAUSE_REASON};
use crate::core::queue::TaskQueue;
use crate::core::reaper::Reaper;
use crate::core::recovery::{self, RecoveryReport};
use crate::core::undo::UndoLog;
use crate::models::config::Config;
use crate::models::history::OperationHistoryRecord;
use crate::models::task::{
    CancelOutcome, NewTask, QueueState, Task, TaskDetails, TaskId, TaskPriority,
};
use crate::models::undo::UndoLogEntry;
use crate::preflight::{CheckStatus, FsPermissionGate, PermissionGate};
use crate::utils::fs::total_size;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// The migration engine.
#[derive(Clone)]
pub struct Engine {
    config: Config,
    queue: TaskQueue,
    undo: UndoLog,
    history: OperationHistory,
    gate: Arc<dyn PermissionGate>,
    verifier: Arc<dyn ChecksumVerifier>,
}

impl Engine {
    /// Open the state database named by `config` with the default collaborators.
    pub fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.database_path())?;
        tracing::debug!("Opened state database {:?}", config.database_path());
        Ok(Self::with_database(config, db))
    }

    pub fn with_database(config: Config, db: Database) -> Self {
        Self::with_collaborators(
            config,
            db,
            Arc::new(FsPermissionGate),
            Arc::new(FileChecksummer),
        )
    }

    /// Build an engine with explicit permission gate and checksum verifier.
    pub fn with_collaborators(
        config: Config,
        db: Database,
        gate: Arc<dyn PermissionGate>,
        verifier: Arc<dyn ChecksumVerifier>,
    ) -> Self {
        let undo = UndoLog::new(
            db.clone(),
            Arc::clone(&verifier),
            config.checksum_algorithm,
            config.undo_retention(),
        );
        Self {
            queue: TaskQueue::new(db.clone()),
            history: OperationHistory::new(db),
            undo,
            gate,
            verifier,
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    pub fn undo_log(&self) -> &UndoLog {
        &self.undo
    }

    /// Validate, permission-check and enqueue a task.
    ///
    /// With `strict_permissions` a failing check rejects the task and nothing
    /// is enqueued; otherwise the failure is only logged.
    pub fn submit(&self, task: NewTask) -> Result<TaskId> {
        task.details.validate()?;

        for mv in task.details.top_level_moves() {
            let check = self
                .gate
                .check_file_operation(&mv.source_path, &mv.dest_path);
            if check.status == CheckStatus::Error {
                let message = check.error.unwrap_or_else(|| {
                    format!("{} -> {}", mv.source_path.display(), mv.dest_path.display())
                });
                if self.config.strict_permissions {
                    return Err(crate::Error::PermissionDenied(message));
                }
                tracing::warn!("Permission check failed (not strict): {}", message);
            }

            let size = total_size(&mv.source_path);
            if size > self.config.max_move_size_bytes() {
                tracing::warn!(
                    "Move of {:?} is {:.1} GiB, above the {} GiB advisory limit",
                    mv.source_path,
                    size as f64 / (1024.0 * 1024.0 * 1024.0),
                    self.config.max_move_size_gb
                );
            }
        }

        self.queue.enqueue(task)
    }

    /// Submit from an untyped `(type, details)` pair.
    pub fn submit_raw(
        &self,
        task_type: &str,
        priority: TaskPriority,
        details: serde_json::Value,
        depends_on: Vec<TaskId>,
    ) -> Result<TaskId> {
        let details = TaskDetails::from_parts(task_type, details)?;
        self.submit(NewTask::new(details).priority(priority).depends_on(depends_on))
    }

    pub fn get_state(&self) -> Result<QueueState> {
        self.queue.get_state(self.config.completed_history_limit)
    }

    pub fn get_task(&self, id: TaskId) -> Result<Task> {
        self.queue.get(id)
    }

    pub fn list_group(&self, group: &str) -> Result<Vec<Task>> {
        self.queue.list_group(group)
    }

    pub fn delete_task(&self, id: TaskId) -> Result<()> {
        self.queue.delete_task(id)
    }

    pub fn cancel(&self, id: TaskId) -> Result<CancelOutcome> {
        self.queue.cancel(id)
    }

    pub fn pause_task(&self, id: TaskId) -> Result<()> {
        self.queue.pause_task(id)
    }

    pub fn resume_task(&self, id: TaskId) -> Result<()> {
        self.queue.resume_task(id)
    }

    pub fn reorder(&self, ids: &[TaskId]) -> Result<()> {
        self.queue.reorder(ids)
    }

    pub fn pause(&self, reason: Option<&str>) -> Result<()> {
        self.queue.pause(reason)
    }

    pub fn resume(&self) -> Result<()> {
        self.queue.resume()
    }

    pub async fn reverse_undo(&self, entry_id: i64) -> Result<UndoLogEntry> {
        self.undo.reverse(entry_id).await
    }

    pub fn list_undo(&self, include_invalid: bool) -> Result<Vec<UndoLogEntry>> {
        self.undo.list(include_invalid)
    }

    /// One reaper pass.
    pub fn reap(&self) -> Result<usize> {
        self.reaper().run_once()
    }

    pub fn history(&self, limit: usize) -> Result<Vec<OperationHistoryRecord>> {
        self.history.recent(limit)
    }

    pub fn recover(&self) -> Result<RecoveryReport> {
        recovery::recover(&self.queue, &self.history)
    }

    pub fn executor(&self) -> MigrationExecutor {
        MigrationExecutor::new(
            self.queue.clone(),
            self.undo.clone(),
            self.history.clone(),
            Arc::clone(&self.gate),
            Arc::clone(&self.verifier),
            ExecutorConfig::from(&self.config),
        )
    }

    fn reaper(&self) -> Reaper {
        Reaper::new(
            self.undo.clone(),
            Duration::from_secs(self.config.reaper_interval_secs),
        )
    }

    /// Pause dispatch while the unRAID mover runs; resume when it stops,
    /// unless someone else paused the queue in the meantime.
    pub fn sync_mover_pause(&self) -> Result<()> {
        if !self.config.pause_while_mover_running {
            return Ok(());
        }
        let status = mover_status(&self.config.mover_pid_path);
        if status.is_running {
            if !self.queue.is_paused()? {
                tracing::info!("Mover running (pid {:?}); holding dispatch", status.pid);
                self.queue.pause(Some(MOVER_PAUSE_REASON))?;
            }
        } else {
            self.queue.resume_if_reason(MOVER_PAUSE_REASON)?;
        }
        Ok(())
    }

    /// Run every task that can be dispatched now, then return them.
    pub async fn drain(&self) -> Result<Vec<Task>> {
        self.sync_mover_pause()?;
        let executor = self.executor();
        let mut finished = Vec::new();
        while let Some(task) = executor.run_next().await? {
            finished.push(task);
        }
        Ok(finished)
    }

    /// Daemon loop: recovery, reaper, then one task at a time until shutdown.
    ///
    /// Shutdown is observed between tasks only.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let report = self.recover()?;
        if !report.is_clean() {
            tracing::warn!(
                "Recovered {} interrupted task(s), removed {} temporary file(s)",
                report.interrupted_tasks.len(),
                report.removed_temp_files.len()
            );
        }

        let reaper = self.reaper().spawn(shutdown.clone());
        let executor = self.executor().with_shutdown(shutdown.clone());
        let poll_interval = executor.config().poll_interval;
        tracing::info!(
            "Engine started{}",
            if self.config.dry_run { " (dry run)" } else { "" }
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.sync_mover_pause() {
                tracing::warn!("Mover check failed: {}", e);
            }

            match executor.run_next().await {
                Ok(Some(_)) => continue,
                Ok(None) => {
                    tokio::select! {
                        _ = self.queue.wait_for_change(poll_interval) => {}
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Executor error: {}", e);
                    tokio::time::sleep(poll_interval).await;
                }
            }
        }

        tracing::info!("Engine stopping");
        reaper
            .await
            .map_err(|e| crate::Error::other(format!("Reaper task failed: {}", e)))?;
        Ok(())
    }
}
