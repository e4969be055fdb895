//! Task data model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Task identifier, assigned monotonically by the database.
pub type TaskId = i64;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the status is final.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether the task holds the single execution slot.
    pub fn holds_slot(&self) -> bool {
        matches!(self, TaskStatus::Running | TaskStatus::Paused)
    }

    /// Edges of the task state machine.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, Queued)
                | (Pending, Cancelled)
                | (Queued, Running)
                | (Queued, Cancelled)
                | (Queued, Failed)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
                | (Paused, Failed)
                | (Paused, Cancelled)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "paused" => Ok(TaskStatus::Paused),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(crate::Error::other(format!("Unknown task status: {}", other))),
        }
    }
}

/// Task priority. Declaration order is dispatch order, lowest first.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl TaskPriority {
    pub const ALL: [TaskPriority; 4] = [
        TaskPriority::Low,
        TaskPriority::Normal,
        TaskPriority::High,
        TaskPriority::Urgent,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "low",
            TaskPriority::Normal => "normal",
            TaskPriority::High => "high",
            TaskPriority::Urgent => "urgent",
        }
    }

    /// Dispatch rank; higher dispatches first.
    pub fn rank(&self) -> i64 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Normal => 1,
            TaskPriority::High => 2,
            TaskPriority::Urgent => 3,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_lowercase().as_str() {
            "low" => Ok(TaskPriority::Low),
            "normal" => Ok(TaskPriority::Normal),
            "high" => Ok(TaskPriority::High),
            "urgent" => Ok(TaskPriority::Urgent),
            other => Err(crate::Error::InvalidTask(format!(
                "Unknown priority: {}",
                other
            ))),
        }
    }
}

/// Cooperative control request observed by the executor at safe checkpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlRequest {
    Pause,
    Cancel,
}

impl ControlRequest {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlRequest::Pause => "pause",
            ControlRequest::Cancel => "cancel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pause" => Some(ControlRequest::Pause),
            "cancel" => Some(ControlRequest::Cancel),
            _ => None,
        }
    }
}

/// A single file relocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMove {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
}

impl FileMove {
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source.into(),
            dest_path: dest.into(),
        }
    }
}

/// Typed task payload, keyed by the task `type`.
///
/// The persisted `details` column holds this enum serialized as JSON,
/// including the `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskDetails {
    /// Move one file.
    MoveFile {
        source_path: PathBuf,
        dest_path: PathBuf,
    },
    /// Move an explicit list of files, one checkpoint between each.
    MoveFiles { files: Vec<FileMove> },
    /// Move every regular file below a directory, preserving layout.
    MoveDirectory {
        source_path: PathBuf,
        dest_path: PathBuf,
    },
}

impl TaskDetails {
    pub const MOVE_FILE: &'static str = "move_file";
    pub const MOVE_FILES: &'static str = "move_files";
    pub const MOVE_DIRECTORY: &'static str = "move_directory";

    /// Build a single-file move.
    pub fn move_file(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        TaskDetails::MoveFile {
            source_path: source.into(),
            dest_path: dest.into(),
        }
    }

    /// Build a directory move.
    pub fn move_directory(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        TaskDetails::MoveDirectory {
            source_path: source.into(),
            dest_path: dest.into(),
        }
    }

    /// The `type` value persisted for this payload.
    pub fn task_type(&self) -> &'static str {
        match self {
            TaskDetails::MoveFile { .. } => Self::MOVE_FILE,
            TaskDetails::MoveFiles { .. } => Self::MOVE_FILES,
            TaskDetails::MoveDirectory { .. } => Self::MOVE_DIRECTORY,
        }
    }

    /// Parse an untyped `(type, details)` pair as received from a transport.
    pub fn from_parts(task_type: &str, details: serde_json::Value) -> crate::Result<Self> {
        let mut object = match details {
            serde_json::Value::Object(map) => map,
            other => {
                return Err(crate::Error::InvalidTask(format!(
                    "details must be an object, got {}",
                    other
                )))
            }
        };
        object.insert(
            "type".to_string(),
            serde_json::Value::String(task_type.to_string()),
        );
        serde_json::from_value(serde_json::Value::Object(object)).map_err(|e| {
            crate::Error::InvalidTask(format!("unsupported {} details: {}", task_type, e))
        })
    }

    /// Reject payloads that can never execute.
    pub fn validate(&self) -> crate::Result<()> {
        let pairs = self.top_level_moves();
        if pairs.is_empty() {
            return Err(crate::Error::InvalidTask("no files to move".to_string()));
        }
        for mv in &pairs {
            if mv.source_path.as_os_str().is_empty() || mv.dest_path.as_os_str().is_empty() {
                return Err(crate::Error::InvalidTask(
                    "source and destination paths are required".to_string(),
                ));
            }
            if mv.source_path == mv.dest_path {
                return Err(crate::Error::InvalidTask(format!(
                    "source and destination are the same: {}",
                    mv.source_path.display()
                )));
            }
        }
        Ok(())
    }

    /// The (source, dest) pairs named directly by the payload.
    ///
    /// Directory moves are reported as their root pair; they are expanded
    /// into individual files only at execution time.
    pub fn top_level_moves(&self) -> Vec<FileMove> {
        match self {
            TaskDetails::MoveFile {
                source_path,
                dest_path,
            }
            | TaskDetails::MoveDirectory {
                source_path,
                dest_path,
            } => vec![FileMove::new(source_path.clone(), dest_path.clone())],
            TaskDetails::MoveFiles { files } => files.clone(),
        }
    }
}

/// A unit of migration work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub details: TaskDetails,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_group: Option<String>,
    pub depends_on: Vec<TaskId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_position: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_request: Option<ControlRequest>,
    pub progress_percent: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Task {
    pub fn task_type(&self) -> &'static str {
        self.details.task_type()
    }
}

/// A task submission.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub details: TaskDetails,
    pub priority: TaskPriority,
    pub correlation_group: Option<String>,
    pub depends_on: Vec<TaskId>,
}

impl NewTask {
    pub fn new(details: TaskDetails) -> Self {
        Self {
            details,
            priority: TaskPriority::Normal,
            correlation_group: None,
            depends_on: Vec::new(),
        }
    }

    pub fn priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = TaskId>) -> Self {
        self.depends_on = ids.into_iter().collect();
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.correlation_group = Some(group.into());
        self
    }
}

/// Result of a cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CancelOutcome {
    /// The task was queued and is now cancelled.
    Cancelled,
    /// The task is executing; it will stop at the next safe checkpoint.
    Requested,
}

/// Snapshot of the queue for the operational surface.
#[derive(Debug, Clone, Serialize)]
pub struct QueueState {
    /// The task holding the execution slot (running or paused).
    pub running: Option<Task>,
    /// Queued tasks in dispatch order (dependency eligibility aside).
    pub queued: Vec<Task>,
    /// Most recent terminal tasks, newest first.
    pub completed: Vec<Task>,
    pub is_paused: bool,
    pub pause_reason: Option<String>,
}
