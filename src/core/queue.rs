//! Durable task queue.
//!
//! Every operation runs as one SQLite transaction under the database mutex,
//! so a state change is committed before anyone can observe it. The queue
//! also owns the single execution slot: a task that is `running` or `paused`
//! blocks dispatch of every other task.

use crate::core::database::{delete_setting, format_ts, parse_opt_ts, parse_ts, put_setting, Database};
use crate::core::history;
use crate::models::history::{NewHistoryRecord, OperationStatus};
use crate::models::task::{
    CancelOutcome, ControlRequest, NewTask, QueueState, Task, TaskDetails, TaskId, TaskPriority,
    TaskStatus,
};
use crate::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

const PAUSED_KEY: &str = "queue_paused";
const PAUSE_REASON_KEY: &str = "queue_pause_reason";

const SELECT_TASK: &str = "SELECT id, type, status, priority, details, correlation_group, depends_on,
        created_at, started_at, completed_at, error, queue_position, control_request,
        progress_percent FROM tasks";

/// Dispatch order: reordered tasks first, then priority rank, then FIFO.
fn dispatch_order() -> String {
    let ranks: String = TaskPriority::ALL
        .iter()
        .map(|p| format!(" WHEN '{}' THEN {}", p.as_str(), p.rank()))
        .collect();
    format!(
        "ORDER BY queue_position IS NULL, queue_position,
        CASE priority{} ELSE 0 END DESC, created_at, id",
        ranks
    )
}

/// Outcome of checking a queued task's dependencies.
enum Readiness {
    Ready,
    Waiting,
    Unmet(String),
}

/// Priority/dependency ordered queue over the `tasks` table.
#[derive(Clone)]
pub struct TaskQueue {
    db: Database,
    notify: Arc<Notify>,
}

impl TaskQueue {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Persist a new task as `queued` and return its id.
    ///
    /// Dependencies are not checked here; they are resolved at dispatch.
    pub fn enqueue(&self, task: NewTask) -> Result<TaskId> {
        task.details.validate()?;
        let details = serde_json::to_string(&task.details)?;
        let depends_on = serde_json::to_string(&task.depends_on)?;

        let id = self.db.transaction(|tx| {
            tx.execute(
                "INSERT INTO tasks (type, status, priority, details, correlation_group, depends_on, created_at)
                 VALUES (?1, 'pending', ?2, ?3, ?4, ?5, ?6)",
                params![
                    task.details.task_type(),
                    task.priority.as_str(),
                    details,
                    task.correlation_group,
                    depends_on,
                    format_ts(Utc::now()),
                ],
            )?;
            let id = tx.last_insert_rowid();
            transition(tx, id, TaskStatus::Queued, None)?;
            Ok(id)
        })?;

        tracing::info!(
            "Queued task {} ({}, priority {})",
            id,
            task.details.task_type(),
            task.priority
        );
        self.notify.notify_one();
        Ok(id)
    }

    /// Claim the next eligible task, moving it to `running`.
    ///
    /// Returns `None` while the queue is paused, while another task holds the
    /// execution slot, or when nothing queued is ready. Tasks whose
    /// dependencies can no longer complete are failed on the way.
    pub fn dequeue_next(&self) -> Result<Option<Task>> {
        self.db.transaction(|tx| {
            if paused_in(tx)? {
                return Ok(None);
            }
            let active: i64 = tx.query_row(
                "SELECT COUNT(*) FROM tasks WHERE status IN ('running', 'paused')",
                [],
                |row| row.get(0),
            )?;
            if active > 0 {
                return Ok(None);
            }

            'scan: loop {
                for task in tasks_with_status(tx, TaskStatus::Queued)? {
                    match readiness(tx, &task)? {
                        Readiness::Ready => {
                            let task = transition(tx, task.id, TaskStatus::Running, None)?;
                            tracing::info!("Dispatching task {} ({})", task.id, task.task_type());
                            return Ok(Some(task));
                        }
                        Readiness::Waiting => continue,
                        Readiness::Unmet(reason) => {
                            let err = crate::Error::DependencyUnmet(reason);
                            tracing::warn!("Task {} cannot run: {}", task.id, err);
                            transition(tx, task.id, TaskStatus::Failed, Some(&err.task_message()))?;
                            history::insert(
                                tx,
                                &NewHistoryRecord {
                                    task_id: Some(task.id),
                                    operation: task.task_type().to_string(),
                                    source_path: None,
                                    dest_path: None,
                                    file_size: None,
                                    status: OperationStatus::Failed,
                                    duration_ms: None,
                                    error: Some(err.task_message()),
                                },
                            )?;
                            // A failure may make later dependents unmet too.
                            continue 'scan;
                        }
                    }
                }
                return Ok(None);
            }
        })
    }

    /// Cancel a task. Queued tasks are cancelled at once; executing tasks
    /// get a request honoured at their next checkpoint.
    pub fn cancel(&self, id: TaskId) -> Result<CancelOutcome> {
        let outcome = self.db.transaction(|tx| {
            let task = load_task(tx, id)?;
            match task.status {
                TaskStatus::Pending | TaskStatus::Queued => {
                    transition(tx, id, TaskStatus::Cancelled, None)?;
                    Ok(CancelOutcome::Cancelled)
                }
                TaskStatus::Running | TaskStatus::Paused => {
                    set_control(tx, id, Some(ControlRequest::Cancel))?;
                    Ok(CancelOutcome::Requested)
                }
                from => Err(crate::Error::InvalidTransition {
                    id,
                    from,
                    to: TaskStatus::Cancelled,
                }),
            }
        })?;
        tracing::info!("Cancel task {}: {:?}", id, outcome);
        self.notify.notify_one();
        Ok(outcome)
    }

    /// Stop dispatching new tasks. The running task is not affected.
    pub fn pause(&self, reason: Option<&str>) -> Result<()> {
        self.db.transaction(|tx| {
            put_setting(tx, PAUSED_KEY, "1")?;
            match reason {
                Some(reason) => put_setting(tx, PAUSE_REASON_KEY, reason),
                None => delete_setting(tx, PAUSE_REASON_KEY),
            }
        })?;
        tracing::info!("Queue paused{}", reason.map(|r| format!(": {}", r)).unwrap_or_default());
        Ok(())
    }

    /// Resume dispatching.
    pub fn resume(&self) -> Result<()> {
        self.db.transaction(|tx| {
            delete_setting(tx, PAUSED_KEY)?;
            delete_setting(tx, PAUSE_REASON_KEY)
        })?;
        tracing::info!("Queue resumed");
        self.notify.notify_one();
        Ok(())
    }

    /// Resume only if the queue is paused with exactly `reason`.
    pub fn resume_if_reason(&self, reason: &str) -> Result<bool> {
        let resumed = self.db.transaction(|tx| {
            if !paused_in(tx)? || pause_reason_in(tx)?.as_deref() != Some(reason) {
                return Ok(false);
            }
            delete_setting(tx, PAUSED_KEY)?;
            delete_setting(tx, PAUSE_REASON_KEY)?;
            Ok(true)
        })?;
        if resumed {
            tracing::info!("Queue resumed ({} cleared)", reason);
            self.notify.notify_one();
        }
        Ok(resumed)
    }

    pub fn is_paused(&self) -> Result<bool> {
        Ok(self.db.get_setting(PAUSED_KEY)?.is_some())
    }

    pub fn pause_reason(&self) -> Result<Option<String>> {
        if !self.is_paused()? {
            return Ok(None);
        }
        self.db.get_setting(PAUSE_REASON_KEY)
    }

    /// Give the listed queued tasks explicit positions 1..n.
    ///
    /// All ids must be queued; otherwise nothing changes.
    pub fn reorder(&self, ids: &[TaskId]) -> Result<()> {
        let mut seen = HashSet::new();
        for id in ids {
            if !seen.insert(*id) {
                return Err(crate::Error::InvalidTask(format!(
                    "task {} listed twice in reorder",
                    id
                )));
            }
        }

        self.db.transaction(|tx| {
            for &id in ids {
                let task = load_task(tx, id)?;
                if task.status != TaskStatus::Queued {
                    return Err(crate::Error::InvalidTransition {
                        id,
                        from: task.status,
                        to: TaskStatus::Queued,
                    });
                }
            }
            tx.execute(
                "UPDATE tasks SET queue_position = NULL WHERE queue_position IS NOT NULL",
                [],
            )?;
            for (position, id) in ids.iter().enumerate() {
                tx.execute(
                    "UPDATE tasks SET queue_position = ?1 WHERE id = ?2",
                    params![position as i64 + 1, id],
                )?;
            }
            Ok(())
        })?;
        tracing::info!("Reordered {} queued task(s)", ids.len());
        self.notify.notify_one();
        Ok(())
    }

    /// Ask the running task to pause at its next checkpoint.
    pub fn pause_task(&self, id: TaskId) -> Result<()> {
        self.db.transaction(|tx| {
            let task = load_task(tx, id)?;
            if task.status != TaskStatus::Running {
                return Err(crate::Error::InvalidTransition {
                    id,
                    from: task.status,
                    to: TaskStatus::Paused,
                });
            }
            // A pending cancel takes precedence.
            if task.control_request != Some(ControlRequest::Cancel) {
                set_control(tx, id, Some(ControlRequest::Pause))?;
            }
            Ok(())
        })?;
        tracing::info!("Pause requested for task {}", id);
        Ok(())
    }

    /// Resume a paused task, or withdraw a pause request not yet honoured.
    pub fn resume_task(&self, id: TaskId) -> Result<()> {
        self.db.transaction(|tx| {
            let task = load_task(tx, id)?;
            match (task.status, task.control_request) {
                (TaskStatus::Paused, _) => {
                    transition(tx, id, TaskStatus::Running, None)?;
                    Ok(())
                }
                (TaskStatus::Running, Some(ControlRequest::Pause)) => set_control(tx, id, None),
                (from, _) => Err(crate::Error::InvalidTransition {
                    id,
                    from,
                    to: TaskStatus::Running,
                }),
            }
        })?;
        tracing::info!("Resumed task {}", id);
        self.notify.notify_one();
        Ok(())
    }

    pub fn get(&self, id: TaskId) -> Result<Task> {
        let conn = self.db.lock()?;
        load_task(&conn, id)
    }

    /// Snapshot for the operational surface.
    pub fn get_state(&self, completed_limit: usize) -> Result<QueueState> {
        let conn = self.db.lock()?;
        let running = conn
            .query_row(
                &format!(
                    "{} WHERE status IN ('running', 'paused') ORDER BY id LIMIT 1",
                    SELECT_TASK
                ),
                [],
                map_task,
            )
            .optional()?;
        let queued = tasks_with_status(&conn, TaskStatus::Queued)?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE status IN ('completed', 'failed', 'cancelled')
             ORDER BY completed_at DESC, id DESC LIMIT ?1",
            SELECT_TASK
        ))?;
        let completed = stmt
            .query_map([completed_limit as i64], map_task)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let is_paused = paused_in(&conn)?;
        let pause_reason = if is_paused { pause_reason_in(&conn)? } else { None };
        Ok(QueueState {
            running,
            queued,
            completed,
            is_paused,
            pause_reason,
        })
    }

    /// All tasks sharing a correlation group, oldest first.
    pub fn list_group(&self, group: &str) -> Result<Vec<Task>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE correlation_group = ?1 ORDER BY id",
            SELECT_TASK
        ))?;
        let rows = stmt.query_map([group], map_task)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Tasks in a given status; queued tasks come back in dispatch order.
    pub fn list_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let conn = self.db.lock()?;
        tasks_with_status(&conn, status)
    }

    /// Delete a finished task. Its undo and history rows are kept with a
    /// null `task_id`.
    pub fn delete_task(&self, id: TaskId) -> Result<()> {
        self.db.transaction(|tx| {
            let task = load_task(tx, id)?;
            if !task.status.is_terminal() {
                return Err(crate::Error::InvalidTask(format!(
                    "task {} is {}; only finished tasks can be deleted",
                    id, task.status
                )));
            }
            tx.execute("DELETE FROM tasks WHERE id = ?1", [id])?;
            Ok(())
        })?;
        tracing::info!("Deleted task {}", id);
        Ok(())
    }

    /// The pending control request of a task, if any.
    pub fn control_request(&self, id: TaskId) -> Result<Option<ControlRequest>> {
        Ok(self.get(id)?.control_request)
    }

    /// `running -> paused`, honouring a pause request.
    pub fn mark_paused(&self, id: TaskId) -> Result<Task> {
        self.apply(id, TaskStatus::Paused, None)
    }

    /// `running -> completed`.
    pub fn complete(&self, id: TaskId) -> Result<Task> {
        self.apply(id, TaskStatus::Completed, None)
    }

    /// `running|paused -> failed`, storing the error as `"<Kind>: <message>"`.
    pub fn fail(&self, id: TaskId, error: &crate::Error) -> Result<Task> {
        self.apply(id, TaskStatus::Failed, Some(&error.task_message()))
    }

    /// `running|paused -> cancelled`, honouring a cancel request.
    pub fn cancel_running(&self, id: TaskId) -> Result<Task> {
        self.apply(id, TaskStatus::Cancelled, None)
    }

    /// Record per-file progress.
    pub fn set_progress(&self, id: TaskId, percent: f64) -> Result<()> {
        let conn = self.db.lock()?;
        conn.execute(
            "UPDATE tasks SET progress_percent = ?1 WHERE id = ?2",
            params![percent.clamp(0.0, 100.0), id],
        )?;
        Ok(())
    }

    /// Wake anyone blocked in [`TaskQueue::wait_for_change`].
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Wait until the queue changes in this process or `timeout` elapses.
    ///
    /// The timeout covers changes committed by other processes.
    pub async fn wait_for_change(&self, timeout: Duration) {
        let _ = tokio::time::timeout(timeout, self.notify.notified()).await;
    }

    fn apply(&self, id: TaskId, to: TaskStatus, error: Option<&str>) -> Result<Task> {
        let task = self.db.transaction(|tx| transition(tx, id, to, error))?;
        self.notify.notify_one();
        Ok(task)
    }
}

/// Compare-and-set status change along the task state machine.
fn transition(conn: &Connection, id: TaskId, to: TaskStatus, error: Option<&str>) -> Result<Task> {
    let task = load_task(conn, id)?;
    if !task.status.can_transition_to(to) {
        return Err(crate::Error::InvalidTransition {
            id,
            from: task.status,
            to,
        });
    }

    conn.execute(
        "UPDATE tasks SET
            status = ?1,
            started_at = CASE WHEN ?1 = 'running' AND started_at IS NULL THEN ?2 ELSE started_at END,
            completed_at = CASE WHEN ?3 THEN ?2 ELSE completed_at END,
            error = COALESCE(?4, error),
            control_request = CASE
                WHEN ?3 THEN NULL
                WHEN control_request = 'cancel' THEN 'cancel'
                ELSE NULL END,
            queue_position = CASE WHEN ?1 = 'queued' THEN queue_position ELSE NULL END,
            progress_percent = CASE WHEN ?1 = 'completed' THEN 100.0 ELSE progress_percent END
         WHERE id = ?5",
        params![to.as_str(), format_ts(Utc::now()), to.is_terminal(), error, id],
    )?;
    tracing::debug!("Task {}: {} -> {}", id, task.status, to);
    load_task(conn, id)
}

fn set_control(conn: &Connection, id: TaskId, request: Option<ControlRequest>) -> Result<()> {
    conn.execute(
        "UPDATE tasks SET control_request = ?1 WHERE id = ?2",
        params![request.map(|r| r.as_str()), id],
    )?;
    Ok(())
}

fn readiness(conn: &Connection, task: &Task) -> Result<Readiness> {
    let mut waiting = false;
    for &dep in &task.depends_on {
        if dep >= task.id {
            return Ok(Readiness::Unmet(format!(
                "task {} cannot depend on later task {}",
                task.id, dep
            )));
        }
        let status: Option<String> = conn
            .query_row("SELECT status FROM tasks WHERE id = ?1", [dep], |row| row.get(0))
            .optional()?;
        match status.as_deref().map(TaskStatus::from_str).transpose()? {
            None => {
                return Ok(Readiness::Unmet(format!("dependency {} does not exist", dep)));
            }
            Some(TaskStatus::Completed) => {}
            Some(status @ (TaskStatus::Failed | TaskStatus::Cancelled)) => {
                return Ok(Readiness::Unmet(format!("dependency {} is {}", dep, status)));
            }
            Some(_) => waiting = true,
        }
    }
    Ok(if waiting {
        Readiness::Waiting
    } else {
        Readiness::Ready
    })
}

fn paused_in(conn: &Connection) -> Result<bool> {
    let value: Option<String> = conn
        .query_row("SELECT value FROM settings WHERE key = ?1", [PAUSED_KEY], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(value.is_some())
}

fn pause_reason_in(conn: &Connection) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT value FROM settings WHERE key = ?1",
            [PAUSE_REASON_KEY],
            |row| row.get(0),
        )
        .optional()?)
}

fn tasks_with_status(conn: &Connection, status: TaskStatus) -> Result<Vec<Task>> {
    let order = if status == TaskStatus::Queued {
        dispatch_order()
    } else {
        "ORDER BY id".to_string()
    };
    let mut stmt = conn.prepare(&format!("{} WHERE status = ?1 {}", SELECT_TASK, order))?;
    let rows = stmt.query_map([status.as_str()], map_task)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

fn load_task(conn: &Connection, id: TaskId) -> Result<Task> {
    conn.query_row(&format!("{} WHERE id = ?1", SELECT_TASK), [id], map_task)
        .optional()?
        .ok_or(crate::Error::TaskNotFound(id))
}

fn conversion_error(
    column: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(column, rusqlite::types::Type::Text, Box::new(err))
}

fn map_task(row: &Row<'_>) -> rusqlite::Result<Task> {
    let status: String = row.get(2)?;
    let priority: String = row.get(3)?;
    let details: String = row.get(4)?;
    let depends_on: String = row.get(6)?;
    let created_at: String = row.get(7)?;
    let control: Option<String> = row.get(12)?;

    Ok(Task {
        id: row.get(0)?,
        details: serde_json::from_str::<TaskDetails>(&details).map_err(|e| conversion_error(4, e))?,
        status: TaskStatus::from_str(&status).map_err(|e| conversion_error(2, e))?,
        priority: TaskPriority::from_str(&priority).map_err(|e| conversion_error(3, e))?,
        correlation_group: row.get(5)?,
        depends_on: serde_json::from_str(&depends_on).map_err(|e| conversion_error(6, e))?,
        created_at: parse_ts(&created_at)?,
        started_at: parse_opt_ts(row.get(8)?)?,
        completed_at: parse_opt_ts(row.get(9)?)?,
        error: row.get(10)?,
        queue_position: row.get(11)?,
        control_request: control.as_deref().and_then(ControlRequest::parse),
        progress_percent: row.get(13)?,
    })
}
