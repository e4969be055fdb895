//! Append-only operation history.

use crate::core::database::{format_ts, parse_ts, Database};
use crate::models::history::{NewHistoryRecord, OperationHistoryRecord, OperationStatus};
use crate::models::task::TaskId;
use crate::Result;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Audit trail of every attempted operation.
#[derive(Clone)]
pub struct OperationHistory {
    db: Database,
}

impl OperationHistory {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a record.
    pub fn record(&self, record: NewHistoryRecord) -> Result<i64> {
        let conn = self.db.lock()?;
        insert(&conn, &record)
    }

    /// Most recent records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<OperationHistoryRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, operation, source_path, dest_path, file_size, status,
                    duration_ms, error, created_at
             FROM operation_history ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], map_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Records belonging to one task, oldest first.
    pub fn for_task(&self, task_id: TaskId) -> Result<Vec<OperationHistoryRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, task_id, operation, source_path, dest_path, file_size, status,
                    duration_ms, error, created_at
             FROM operation_history WHERE task_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map([task_id], map_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Whether a completed move of `source` to `dest` is recorded for a task.
    pub fn has_completed_move(&self, task_id: TaskId, source: &Path, dest: &Path) -> Result<bool> {
        let conn = self.db.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT id FROM operation_history
                 WHERE task_id = ?1 AND operation = 'move' AND status = 'completed'
                   AND source_path = ?2 AND dest_path = ?3
                 LIMIT 1",
                params![
                    task_id,
                    source.to_string_lossy().to_string(),
                    dest.to_string_lossy().to_string()
                ],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Completed moves with no matching undo entry.
    ///
    /// These arise from a crash between finalizing a move and recording its
    /// undo entry: the move is consistent but cannot be reversed.
    pub fn completed_moves_without_undo(&self) -> Result<Vec<OperationHistoryRecord>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT h.id, h.task_id, h.operation, h.source_path, h.dest_path, h.file_size,
                    h.status, h.duration_ms, h.error, h.created_at
             FROM operation_history h
             WHERE h.operation = 'move' AND h.status = 'completed'
               AND NOT EXISTS (
                   SELECT 1 FROM undo_log u
                   WHERE u.source_path = h.source_path AND u.dest_path = h.dest_path
                     AND (u.task_id IS h.task_id)
               )
             ORDER BY h.id",
        )?;
        let rows = stmt.query_map([], map_record)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

/// Milliseconds since `started`, saturating at `i64::MAX`.
pub fn elapsed_ms(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

pub(crate) fn insert(conn: &Connection, record: &NewHistoryRecord) -> Result<i64> {
    conn.execute(
        "INSERT INTO operation_history
            (task_id, operation, source_path, dest_path, file_size, status, duration_ms, error, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.task_id,
            record.operation,
            record.source_path.as_ref().map(|p| p.to_string_lossy().to_string()),
            record.dest_path.as_ref().map(|p| p.to_string_lossy().to_string()),
            record.file_size.map(|s| s as i64),
            record.status.as_str(),
            record.duration_ms,
            record.error,
            format_ts(Utc::now()),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn map_record(row: &Row<'_>) -> rusqlite::Result<OperationHistoryRecord> {
    let status: String = row.get(6)?;
    let created_at: String = row.get(9)?;
    Ok(OperationHistoryRecord {
        id: row.get(0)?,
        task_id: row.get(1)?,
        operation: row.get(2)?,
        source_path: row.get::<_, Option<String>>(3)?.map(PathBuf::from),
        dest_path: row.get::<_, Option<String>>(4)?.map(PathBuf::from),
        file_size: row.get::<_, Option<i64>>(5)?.map(|s| s as u64),
        status: OperationStatus::parse(&status).unwrap_or(OperationStatus::Failed),
        duration_ms: row.get(7)?,
        error: row.get(8)?,
        created_at: parse_ts(&created_at)?,
    })
}
