//! Operation history data model.

use super::task::TaskId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Outcome of an attempted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Completed,
    Failed,
    /// Dry-run operation, nothing was changed.
    Simulated,
    /// An undo entry was played back.
    Reversed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Simulated => "simulated",
            OperationStatus::Reversed => "reversed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(OperationStatus::Completed),
            "failed" => Some(OperationStatus::Failed),
            "simulated" => Some(OperationStatus::Simulated),
            "reversed" => Some(OperationStatus::Reversed),
            _ => None,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only audit record of an attempted operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationHistoryRecord {
    pub id: i64,
    pub task_id: Option<TaskId>,
    pub operation: String,
    pub source_path: Option<PathBuf>,
    pub dest_path: Option<PathBuf>,
    pub file_size: Option<u64>,
    pub status: OperationStatus,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Data for a new history record.
#[derive(Debug, Clone)]
pub struct NewHistoryRecord {
    pub task_id: Option<TaskId>,
    pub operation: String,
    pub source_path: Option<PathBuf>,
    pub dest_path: Option<PathBuf>,
    pub file_size: Option<u64>,
    pub status: OperationStatus,
    pub duration_ms: Option<i64>,
    pub error: Option<String>,
}
