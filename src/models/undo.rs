//! Undo log data model.

use super::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Invalidation reason for entries past their retention window.
pub const REASON_EXPIRED: &str = "expired";
/// Invalidation reason for entries whose paths were touched again.
pub const REASON_SUPERSEDED: &str = "superseded by later operation";
/// Invalidation reason for simulated operations.
pub const REASON_DRY_RUN: &str = "dry run";
/// Invalidation reason for entries that have been undone.
pub const REASON_REVERSED: &str = "reversed";

/// A reversible record of one completed file operation.
///
/// Paths, size, checksum and `executed_at` never change once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoLogEntry {
    pub id: i64,
    /// Owning task; `None` once the task row is deleted.
    pub task_id: Option<TaskId>,
    /// Operation that was performed (e.g. "move").
    pub operation: String,
    /// Original location.
    pub source_path: PathBuf,
    /// Location after the operation.
    pub dest_path: PathBuf,
    pub file_size: u64,
    /// Content digest of the moved file.
    pub checksum: String,
    pub executed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub invalidation_reason: Option<String>,
}

impl UndoLogEntry {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether `reverse` may run at `now`.
    pub fn is_reversible_at(&self, now: DateTime<Utc>) -> bool {
        self.is_valid && !self.is_expired_at(now)
    }
}

/// Data for a new undo entry; `expires_at` is derived from the retention window.
#[derive(Debug, Clone)]
pub struct NewUndoEntry {
    pub task_id: Option<TaskId>,
    pub operation: String,
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub file_size: u64,
    pub checksum: String,
    pub executed_at: DateTime<Utc>,
    /// Recorded already invalid with this reason (dry runs).
    pub invalid_reason: Option<String>,
}

impl NewUndoEntry {
    /// A reversible move executed now.
    pub fn moved(
        task_id: Option<TaskId>,
        source_path: PathBuf,
        dest_path: PathBuf,
        file_size: u64,
        checksum: String,
    ) -> Self {
        Self {
            task_id,
            operation: "move".to_string(),
            source_path,
            dest_path,
            file_size,
            checksum,
            executed_at: Utc::now(),
            invalid_reason: None,
        }
    }

    /// Mark the entry as non-reversible from the start.
    pub fn non_reversible(mut self, reason: &str) -> Self {
        self.invalid_reason = Some(reason.to_string());
        self
    }
}
