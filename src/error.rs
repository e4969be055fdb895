//! Error types for the array balancer.

use crate::models::task::{TaskId, TaskStatus};
use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the array balancer.
#[derive(Error, Debug)]
pub enum Error {
    // Permission errors
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // Integrity errors
    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("IO failure: {0}")]
    IoFailure(String),

    #[error("Path conflict: {0}")]
    PathConflict(String),

    // Queue errors
    #[error("Dependency unmet: {0}")]
    DependencyUnmet(String),

    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("Task {0} was cancelled")]
    Cancelled(TaskId),

    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Invalid task: {0}")]
    InvalidTask(String),

    // Undo errors
    #[error("Undo entry not found: {0}")]
    UndoEntryNotFound(i64),

    #[error("Undo entry {0} has expired")]
    ExpiredUndo(i64),

    #[error("Undo entry {id} is no longer valid: {reason}")]
    AlreadyInvalid { id: i64, reason: String },

    // Storage errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a generic error from a string.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        Error::Other(msg.into())
    }

    /// Create an IO failure with context.
    pub fn io_failure<S: Into<String>>(msg: S) -> Self {
        Error::IoFailure(msg.into())
    }

    /// Taxonomy name recorded alongside failed tasks and history rows.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::PermissionDenied(_) => "PermissionDenied",
            Error::ChecksumMismatch { .. } => "ChecksumMismatch",
            Error::Io(_) | Error::IoFailure(_) => "IOFailure",
            Error::PathConflict(_) => "PathConflict",
            Error::DependencyUnmet(_) => "DependencyUnmet",
            Error::TaskNotFound(_) => "TaskNotFound",
            Error::Cancelled(_) => "Cancelled",
            Error::InvalidTransition { .. } => "InvalidTransition",
            Error::InvalidTask(_) => "InvalidTask",
            Error::UndoEntryNotFound(_) => "UndoEntryNotFound",
            Error::ExpiredUndo(_) => "ExpiredUndo",
            Error::AlreadyInvalid { .. } => "AlreadyInvalid",
            Error::Database(_) => "Database",
            Error::Json(_) => "Json",
            Error::Config(_) => "Config",
            Error::Other(_) => "Other",
        }
    }

    /// The message without the kind-specific prefix of the `Display` form.
    pub fn message(&self) -> String {
        match self {
            Error::PermissionDenied(msg)
            | Error::IoFailure(msg)
            | Error::PathConflict(msg)
            | Error::DependencyUnmet(msg)
            | Error::InvalidTask(msg)
            | Error::Config(msg)
            | Error::Other(msg) => msg.clone(),
            Error::Io(e) => e.to_string(),
            Error::Database(e) => e.to_string(),
            Error::Json(e) => e.to_string(),
            other => other.to_string(),
        }
    }

    /// Message stored in `tasks.error`: `<Kind>: <message>`.
    pub fn task_message(&self) -> String {
        format!("{}: {}", self.kind(), self.message())
    }
}
