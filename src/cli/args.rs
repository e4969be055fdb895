//! Command line argument definitions.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Array Balancer - safe, reversible file migration between array disks
#[derive(Parser, Debug)]
#[command(name = "array-balancer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (default: <config dir>/array_balancer/config.toml)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Submit a migration task
    Submit {
        #[command(subcommand)]
        kind: SubmitKind,
    },

    /// Show the queue: running, queued and recently finished tasks
    Queue {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one task
    Task {
        #[arg(value_name = "TASK_ID")]
        id: i64,
    },

    /// List the tasks of a correlation group
    Group {
        #[arg(value_name = "GROUP")]
        name: String,
    },

    /// Cancel a task (running tasks stop at the next file boundary)
    Cancel {
        #[arg(value_name = "TASK_ID")]
        id: i64,
    },

    /// Stop dispatching new tasks
    Pause {
        /// Reason shown in the queue state
        #[arg(short, long)]
        reason: Option<String>,
    },

    /// Resume dispatching
    Resume,

    /// Pause the running task at its next file boundary
    PauseTask {
        #[arg(value_name = "TASK_ID")]
        id: i64,
    },

    /// Resume a paused task
    ResumeTask {
        #[arg(value_name = "TASK_ID")]
        id: i64,
    },

    /// Put queued tasks first, in the given order
    Reorder {
        #[arg(value_name = "TASK_ID", required = true)]
        ids: Vec<i64>,
    },

    /// Delete a finished task (its undo and history rows are kept)
    Delete {
        #[arg(value_name = "TASK_ID")]
        id: i64,
    },

    /// Run the engine
    Run {
        /// Run what is runnable now, then exit
        #[arg(long)]
        once: bool,
    },

    /// Inspect or play back the undo log
    Undo {
        #[command(subcommand)]
        action: UndoAction,
    },

    /// Show the operation history
    History {
        /// Number of records
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Check filesystem permissions
    Permissions,

    /// Run crash recovery without starting the engine
    Recover,
}

/// Options shared by every submission.
#[derive(Args, Debug)]
pub struct SubmitOptions {
    /// Priority: low, normal, high, urgent
    #[arg(short, long, default_value = "normal")]
    pub priority: String,

    /// Task ids that must complete first
    #[arg(short, long = "depends-on", value_name = "TASK_ID")]
    pub depends_on: Vec<i64>,

    /// Correlation group shared by related tasks
    #[arg(short, long)]
    pub group: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum SubmitKind {
    /// Move one file
    File {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        #[arg(value_name = "DEST")]
        dest: PathBuf,

        #[command(flatten)]
        options: SubmitOptions,
    },

    /// Move several files as one task
    Files {
        /// Moves given as SOURCE=DEST
        #[arg(value_name = "SOURCE=DEST", required = true)]
        pairs: Vec<String>,

        #[command(flatten)]
        options: SubmitOptions,
    },

    /// Move every file below a directory, keeping its layout
    Dir {
        #[arg(value_name = "SOURCE")]
        source: PathBuf,

        #[arg(value_name = "DEST")]
        dest: PathBuf,

        #[command(flatten)]
        options: SubmitOptions,
    },
}

#[derive(Subcommand, Debug)]
pub enum UndoAction {
    /// List undo entries
    List {
        /// Include invalid and expired entries
        #[arg(long)]
        all: bool,
    },

    /// Move a file back to where it came from
    Reverse {
        #[arg(value_name = "ENTRY_ID")]
        id: i64,
    },

    /// Expire entries past the retention window now
    Reap,
}
