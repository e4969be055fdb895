//! Undo log.
//!
//! Durable ledger of reversible moves:
//! - entries are recorded once a move has reached the disk and its history row
//! - entries touching a path reused by a later completed move are invalidated
//! - entries past the retention window are invalidated by the reaper
//! - a valid entry can be played back with the same copy-verify-delete rules

use crate::core::checksum::{ChecksumAlgorithm, ChecksumVerifier};
use crate::core::database::{format_ts, parse_ts, Database};
use crate::core::history::{self, elapsed_ms};
use crate::core::transfer::{digest_blocking, move_verified};
use crate::models::history::{NewHistoryRecord, OperationStatus};
use crate::models::task::TaskId;
use crate::models::undo::{
    NewUndoEntry, UndoLogEntry, REASON_EXPIRED, REASON_REVERSED, REASON_SUPERSEDED,
};
use crate::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

const SELECT_ENTRY: &str = "SELECT id, task_id, operation, source_path, dest_path, file_size, checksum,
        executed_at, expires_at, is_valid, invalidation_reason FROM undo_log";

/// Undo log over the state database.
#[derive(Clone)]
pub struct UndoLog {
    db: Database,
    verifier: Arc<dyn ChecksumVerifier>,
    algorithm: ChecksumAlgorithm,
    retention: chrono::Duration,
    /// Serializes destructive file operations process-wide.
    io_slot: Arc<Mutex<()>>,
}

impl UndoLog {
    pub fn new(
        db: Database,
        verifier: Arc<dyn ChecksumVerifier>,
        algorithm: ChecksumAlgorithm,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            db,
            verifier,
            algorithm,
            retention,
            io_slot: Arc::new(Mutex::new(())),
        }
    }

    /// The lock every destructive file operation must hold.
    pub fn io_slot(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.io_slot)
    }

    /// Configured retention window.
    pub fn retention(&self) -> chrono::Duration {
        self.retention
    }

    /// Append an entry.
    pub fn record(&self, entry: NewUndoEntry) -> Result<UndoLogEntry> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let id = insert_entry(&tx, &entry, self.retention)?;
        let stored = load_entry(&tx, id)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Append an entry and its history record in one transaction.
    pub fn record_with_history(
        &self,
        entry: NewUndoEntry,
        record: NewHistoryRecord,
    ) -> Result<UndoLogEntry> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        let id = insert_entry(&tx, &entry, self.retention)?;
        history::insert(&tx, &record)?;
        let stored = load_entry(&tx, id)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Record a finished move and, in the same transaction, supersede valid
    /// entries whose source or destination is one of its paths.
    pub fn record_superseding(&self, entry: NewUndoEntry) -> Result<UndoLogEntry> {
        let mut conn = self.db.lock()?;
        let tx = conn.transaction()?;
        invalidate_touching(&tx, &entry.source_path, None)?;
        invalidate_touching(&tx, &entry.dest_path, None)?;
        let id = insert_entry(&tx, &entry, self.retention)?;
        let stored = load_entry(&tx, id)?;
        tx.commit()?;
        Ok(stored)
    }

    /// Invalidate every valid entry with `expires_at <= now`.
    pub fn invalidate_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.db.lock()?;
        let changed = conn.execute(
            "UPDATE undo_log SET is_valid = 0, invalidation_reason = ?1
             WHERE is_valid = 1 AND expires_at <= ?2",
            params![REASON_EXPIRED, format_ts(now)],
        )?;
        Ok(changed)
    }

    /// Fetch one entry.
    pub fn get(&self, id: i64) -> Result<UndoLogEntry> {
        let conn = self.db.lock()?;
        load_entry(&conn, id)
    }

    /// Entries ordered by `executed_at`; only reversible ones unless `include_invalid`.
    pub fn list(&self, include_invalid: bool) -> Result<Vec<UndoLogEntry>> {
        let conn = self.db.lock()?;
        let sql = if include_invalid {
            format!("{} ORDER BY executed_at, id", SELECT_ENTRY)
        } else {
            format!(
                "{} WHERE is_valid = 1 AND expires_at > ?1 ORDER BY executed_at, id",
                SELECT_ENTRY
            )
        };
        let mut stmt = conn.prepare(&sql)?;
        let rows = if include_invalid {
            stmt.query_map([], map_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            stmt.query_map([format_ts(Utc::now())], map_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(rows)
    }

    /// Entries recorded for a task, in execution order.
    pub fn for_task(&self, task_id: TaskId) -> Result<Vec<UndoLogEntry>> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(&format!(
            "{} WHERE task_id = ?1 ORDER BY executed_at, id",
            SELECT_ENTRY
        ))?;
        let rows = stmt.query_map([task_id], map_entry)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Move a file back to where an entry says it came from.
    pub async fn reverse(&self, id: i64) -> Result<UndoLogEntry> {
        let slot = self.io_slot();
        let _guard = slot.lock().await;

        let entry = self.get(id)?;
        if !entry.is_valid {
            return Err(crate::Error::AlreadyInvalid {
                id,
                reason: entry
                    .invalidation_reason
                    .clone()
                    .unwrap_or_else(|| "invalidated".to_string()),
            });
        }
        if entry.is_expired_at(Utc::now()) {
            self.mark_invalid(id, REASON_EXPIRED)?;
            return Err(crate::Error::ExpiredUndo(id));
        }

        if !entry.dest_path.is_file() {
            return Err(crate::Error::PathConflict(format!(
                "Moved file no longer exists: {}",
                entry.dest_path.display()
            )));
        }
        if entry.source_path.exists() {
            return Err(crate::Error::PathConflict(format!(
                "Original location is occupied: {}",
                entry.source_path.display()
            )));
        }
        let current =
            digest_blocking(&entry.dest_path, Arc::clone(&self.verifier), self.algorithm).await?;
        if current != entry.checksum {
            return Err(crate::Error::PathConflict(format!(
                "File modified since it was moved: {}",
                entry.dest_path.display()
            )));
        }

        if let Some(parent) = entry.source_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let started = Instant::now();
        let result = move_verified(
            &entry.dest_path,
            &entry.source_path,
            Arc::clone(&self.verifier),
            self.algorithm,
            Some(entry.checksum.clone()),
        )
        .await;
        let duration_ms = elapsed_ms(started);

        let mut record = NewHistoryRecord {
            task_id: entry.task_id,
            operation: "reverse".to_string(),
            source_path: Some(entry.dest_path.clone()),
            dest_path: Some(entry.source_path.clone()),
            file_size: Some(entry.file_size),
            status: OperationStatus::Reversed,
            duration_ms: Some(duration_ms),
            error: None,
        };

        match result {
            Ok(_) => {
                let mut conn = self.db.lock()?;
                let tx = conn.transaction()?;
                set_invalid(&tx, id, REASON_REVERSED)?;
                invalidate_touching(&tx, &entry.source_path, Some(id))?;
                invalidate_touching(&tx, &entry.dest_path, Some(id))?;
                history::insert(&tx, &record)?;
                let stored = load_entry(&tx, id)?;
                tx.commit()?;
                tracing::info!(
                    "Reversed undo entry {}: {:?} -> {:?}",
                    id,
                    entry.dest_path,
                    entry.source_path
                );
                Ok(stored)
            }
            Err(e) => {
                tracing::error!("Reversal of undo entry {} failed: {}", id, e);
                record.status = OperationStatus::Failed;
                record.error = Some(e.task_message());
                let conn = self.db.lock()?;
                history::insert(&conn, &record)?;
                Err(e)
            }
        }
    }

    fn mark_invalid(&self, id: i64, reason: &str) -> Result<()> {
        let conn = self.db.lock()?;
        set_invalid(&conn, id, reason)
    }
}

fn insert_entry(
    conn: &Connection,
    entry: &NewUndoEntry,
    retention: chrono::Duration,
) -> Result<i64> {
    let expires_at = entry.executed_at + retention;
    conn.execute(
        "INSERT INTO undo_log
            (task_id, operation, source_path, dest_path, file_size, checksum,
             executed_at, expires_at, is_valid, invalidation_reason)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            entry.task_id,
            entry.operation,
            entry.source_path.to_string_lossy().to_string(),
            entry.dest_path.to_string_lossy().to_string(),
            entry.file_size as i64,
            entry.checksum,
            format_ts(entry.executed_at),
            format_ts(expires_at),
            entry.invalid_reason.is_none(),
            entry.invalid_reason,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Supersede valid, unexpired entries touching `path`, except `keep`.
fn invalidate_touching(conn: &Connection, path: &Path, keep: Option<i64>) -> Result<usize> {
    let path = path.to_string_lossy().to_string();
    let changed = conn.execute(
        "UPDATE undo_log SET is_valid = 0, invalidation_reason = ?1
         WHERE is_valid = 1 AND expires_at > ?2
           AND (source_path = ?3 OR dest_path = ?3)
           AND (?4 IS NULL OR id != ?4)",
        params![REASON_SUPERSEDED, format_ts(Utc::now()), path, keep],
    )?;
    if changed > 0 {
        tracing::info!("Invalidated {} undo entr(ies) touching {}", changed, path);
    }
    Ok(changed)
}

fn set_invalid(conn: &Connection, id: i64, reason: &str) -> Result<()> {
    conn.execute(
        "UPDATE undo_log SET is_valid = 0, invalidation_reason = ?1
         WHERE id = ?2 AND is_valid = 1",
        params![reason, id],
    )?;
    Ok(())
}

fn load_entry(conn: &Connection, id: i64) -> Result<UndoLogEntry> {
    conn.query_row(&format!("{} WHERE id = ?1", SELECT_ENTRY), [id], map_entry)
        .optional()?
        .ok_or(crate::Error::UndoEntryNotFound(id))
}

fn map_entry(row: &Row<'_>) -> rusqlite::Result<UndoLogEntry> {
    let executed_at: String = row.get(7)?;
    let expires_at: String = row.get(8)?;
    Ok(UndoLogEntry {
        id: row.get(0)?,
        task_id: row.get(1)?,
        operation: row.get(2)?,
        source_path: PathBuf::from(row.get::<_, String>(3)?),
        dest_path: PathBuf::from(row.get::<_, String>(4)?),
        file_size: row.get::<_, i64>(5)? as u64,
        checksum: row.get(6)?,
        executed_at: parse_ts(&executed_at)?,
        expires_at: parse_ts(&expires_at)?,
        is_valid: row.get(9)?,
        invalidation_reason: row.get(10)?,
    })
}
