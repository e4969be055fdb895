//! Submit command implementation.

use crate::cli::args::{SubmitKind, SubmitOptions};
use crate::core::engine::Engine;
use crate::models::task::{FileMove, NewTask, TaskDetails, TaskPriority};
use crate::Result;
use colored::Colorize;
use std::path::PathBuf;

/// Submit a task built from command line arguments.
pub fn submit(engine: &Engine, kind: SubmitKind) -> Result<()> {
    let (details, options) = match kind {
        SubmitKind::File {
            source,
            dest,
            options,
        } => (TaskDetails::move_file(source, dest), options),
        SubmitKind::Files { pairs, options } => {
            let files = pairs
                .iter()
                .map(|pair| parse_pair(pair))
                .collect::<Result<Vec<_>>>()?;
            (TaskDetails::MoveFiles { files }, options)
        }
        SubmitKind::Dir {
            source,
            dest,
            options,
        } => (TaskDetails::move_directory(source, dest), options),
    };

    let task = build_task(details, options)?;
    let task_type = task.details.task_type();
    let id = engine.submit(task)?;

    println!(
        "{} task {} ({})",
        "[OK] Queued".green(),
        id.to_string().bold(),
        task_type
    );
    if engine.config().dry_run {
        println!(
            "{}",
            "[DRY-RUN] dry_run is enabled; the task will be simulated".yellow()
        );
    }
    Ok(())
}

fn build_task(details: TaskDetails, options: SubmitOptions) -> Result<NewTask> {
    let priority: TaskPriority = options.priority.parse()?;
    let mut task = NewTask::new(details)
        .priority(priority)
        .depends_on(options.depends_on);
    if let Some(group) = options.group {
        task = task.group(group);
    }
    Ok(task)
}

/// Parse `SOURCE=DEST`.
fn parse_pair(pair: &str) -> Result<FileMove> {
    match pair.split_once('=') {
        Some((source, dest)) if !source.is_empty() && !dest.is_empty() => {
            Ok(FileMove::new(PathBuf::from(source), PathBuf::from(dest)))
        }
        _ => Err(crate::Error::InvalidTask(format!(
            "expected SOURCE=DEST, got {}",
            pair
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_pair() {
        let mv = parse_pair("/mnt/disk1/a=/mnt/disk2/a").unwrap();
        assert_eq!(mv.source_path, PathBuf::from("/mnt/disk1/a"));
        assert_eq!(mv.dest_path, PathBuf::from("/mnt/disk2/a"));
        assert!(parse_pair("/mnt/disk1/a").is_err());
        assert!(parse_pair("=/mnt/disk2/a").is_err());
    }

    #[test]
    fn test_build_task_rejects_unknown_priority() {
        let options = SubmitOptions {
            priority: "asap".to_string(),
            depends_on: vec![],
            group: None,
        };
        let result = build_task(TaskDetails::move_file("/a", "/b"), options);
        assert!(matches!(result, Err(crate::Error::InvalidTask(_))));
    }
}
