//! Integration tests for undo playback and expiry.

use array_balancer::core::database::Database;
use array_balancer::core::engine::Engine;
use array_balancer::core::reaper::Reaper;
use array_balancer::models::config::Config;
use array_balancer::models::history::OperationStatus;
use array_balancer::models::task::{NewTask, TaskDetails, TaskStatus};
use array_balancer::models::undo::{NewUndoEntry, REASON_EXPIRED, REASON_REVERSED};
use array_balancer::Error;
use chrono::{Duration, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

struct Setup {
    temp_dir: TempDir,
    engine: Engine,
}

impl Setup {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        fs::create_dir_all(temp_dir.path().join("disk1")).unwrap();
        fs::create_dir_all(temp_dir.path().join("disk2")).unwrap();
        let config = Config {
            data_dir: temp_dir.path().join("appdata"),
            dry_run: false,
            poll_interval_ms: 10,
            mover_pid_path: temp_dir.path().join("mover.pid"),
            ..Config::default()
        };
        let engine = Engine::with_database(config, Database::open_in_memory().unwrap());
        Self { temp_dir, engine }
    }

    fn path(&self, relative: &str) -> PathBuf {
        self.temp_dir.path().join(relative)
    }

    /// Move `name` from disk1 to disk2 and return the undo entry id.
    async fn moved(&self, name: &str, content: &[u8]) -> i64 {
        let source = self.path(&format!("disk1/{}", name));
        let dest = self.path(&format!("disk2/{}", name));
        fs::write(&source, content).unwrap();

        let id = self
            .engine
            .submit(NewTask::new(TaskDetails::move_file(&source, &dest)))
            .unwrap();
        let finished = self.engine.drain().await.unwrap();
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].status, TaskStatus::Completed);

        self.engine.undo_log().for_task(id).unwrap()[0].id
    }
}

fn record_at(setup: &Setup, source: &Path, dest: &Path, executed_at: chrono::DateTime<Utc>) -> i64 {
    let mut entry = NewUndoEntry::moved(
        None,
        source.to_path_buf(),
        dest.to_path_buf(),
        1,
        "abc".to_string(),
    );
    entry.executed_at = executed_at;
    setup.engine.undo_log().record(entry).unwrap().id
}

#[tokio::test]
async fn test_reverse_restores_original_location() {
    let setup = Setup::new();
    let entry_id = setup.moved("show.mkv", b"episode").await;

    let entry = setup.engine.reverse_undo(entry_id).await.unwrap();
    assert!(!entry.is_valid);
    assert_eq!(entry.invalidation_reason.as_deref(), Some(REASON_REVERSED));
    assert_eq!(fs::read(setup.path("disk1/show.mkv")).unwrap(), b"episode");
    assert!(!setup.path("disk2/show.mkv").exists());

    let history = setup.engine.history(10).unwrap();
    assert_eq!(history[0].status, OperationStatus::Reversed);
    assert_eq!(history[0].operation, "reverse");

    // A second reversal is refused.
    let err = setup.engine.reverse_undo(entry_id).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyInvalid { .. }));
    assert!(setup.engine.list_undo(false).unwrap().is_empty());
}

#[tokio::test]
async fn test_reverse_refuses_modified_file() {
    let setup = Setup::new();
    let entry_id = setup.moved("a.bin", b"original").await;
    fs::write(setup.path("disk2/a.bin"), b"edited after the move").unwrap();

    let err = setup.engine.reverse_undo(entry_id).await.unwrap_err();
    assert_eq!(err.kind(), "PathConflict");
    assert!(setup.path("disk2/a.bin").exists());
    assert!(!setup.path("disk1/a.bin").exists());
    assert!(setup.engine.undo_log().get(entry_id).unwrap().is_valid);
}

#[tokio::test]
async fn test_reverse_refuses_occupied_source() {
    let setup = Setup::new();
    let entry_id = setup.moved("a.bin", b"original").await;
    fs::write(setup.path("disk1/a.bin"), b"someone else").unwrap();

    let err = setup.engine.reverse_undo(entry_id).await.unwrap_err();
    assert!(matches!(err, Error::PathConflict(_)));
    assert_eq!(fs::read(setup.path("disk1/a.bin")).unwrap(), b"someone else");
    assert_eq!(fs::read(setup.path("disk2/a.bin")).unwrap(), b"original");
}

#[tokio::test]
async fn test_reverse_recreates_missing_source_directory() {
    let setup = Setup::new();
    let source_dir = setup.path("disk1/share");
    let dest_dir = setup.path("disk2/share");
    fs::create_dir_all(&source_dir).unwrap();
    fs::write(source_dir.join("a.bin"), b"one").unwrap();

    let id = setup
        .engine
        .submit(NewTask::new(TaskDetails::move_directory(&source_dir, &dest_dir)))
        .unwrap();
    setup.engine.drain().await.unwrap();
    assert!(!source_dir.exists());

    let entry_id = setup.engine.undo_log().for_task(id).unwrap()[0].id;
    setup.engine.reverse_undo(entry_id).await.unwrap();
    assert_eq!(fs::read(source_dir.join("a.bin")).unwrap(), b"one");
}

#[tokio::test]
async fn test_reaper_expires_entries_past_retention() {
    let setup = Setup::new();
    let stale = record_at(
        &setup,
        &setup.path("disk1/old"),
        &setup.path("disk2/old"),
        Utc::now() - Duration::hours(24) - Duration::seconds(1),
    );
    let fresh = record_at(
        &setup,
        &setup.path("disk1/new"),
        &setup.path("disk2/new"),
        Utc::now(),
    );

    let reaper = Reaper::new(
        setup.engine.undo_log().clone(),
        std::time::Duration::from_secs(3600),
    );
    assert_eq!(reaper.run_once().unwrap(), 1);

    let entry = setup.engine.undo_log().get(stale).unwrap();
    assert!(!entry.is_valid);
    assert_eq!(entry.invalidation_reason.as_deref(), Some(REASON_EXPIRED));
    assert!(setup.engine.undo_log().get(fresh).unwrap().is_valid);

    let err = setup.engine.reverse_undo(stale).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyInvalid { .. }));
}

#[tokio::test]
async fn test_unreaped_expired_entry_is_refused() {
    let setup = Setup::new();
    let stale = record_at(
        &setup,
        &setup.path("disk1/old"),
        &setup.path("disk2/old"),
        Utc::now() - Duration::hours(25),
    );
    assert!(setup.engine.list_undo(false).unwrap().is_empty());

    let err = setup.engine.reverse_undo(stale).await.unwrap_err();
    assert!(matches!(err, Error::ExpiredUndo(id) if id == stale));
    let entry = setup.engine.undo_log().get(stale).unwrap();
    assert_eq!(entry.invalidation_reason.as_deref(), Some(REASON_EXPIRED));
}

#[tokio::test]
async fn test_reverse_unknown_entry() {
    let setup = Setup::new();
    let err = setup.engine.reverse_undo(404).await.unwrap_err();
    assert!(matches!(err, Error::UndoEntryNotFound(404)));
}

#[tokio::test]
async fn test_deleting_task_keeps_undo_entries() {
    let setup = Setup::new();
    let entry_id = setup.moved("a.bin", b"keep").await;
    let task_id = setup.engine.undo_log().get(entry_id).unwrap().task_id.unwrap();

    setup.engine.delete_task(task_id).unwrap();
    assert!(matches!(
        setup.engine.get_task(task_id),
        Err(Error::TaskNotFound(_))
    ));

    let entry = setup.engine.undo_log().get(entry_id).unwrap();
    assert!(entry.task_id.is_none());
    assert!(entry.is_valid);
    setup.engine.reverse_undo(entry_id).await.unwrap();
    assert!(setup.path("disk1/a.bin").exists());
}

#[tokio::test]
async fn test_unfinished_task_cannot_be_deleted() {
    let setup = Setup::new();
    let source = setup.path("disk1/a.bin");
    fs::write(&source, b"x").unwrap();
    let id = setup
        .engine
        .submit(NewTask::new(TaskDetails::move_file(
            &source,
            setup.path("disk2/a.bin"),
        )))
        .unwrap();

    assert!(matches!(
        setup.engine.delete_task(id),
        Err(Error::InvalidTask(_))
    ));
}
