//! Integration tests for the migration executor.
//!
//! Uses real files under a temporary directory plus fake collaborators for
//! permission denial, corrupted copies and control requests mid-task.

use array_balancer::core::checksum::{ChecksumAlgorithm, ChecksumVerifier, FileChecksummer};
use array_balancer::core::database::Database;
use array_balancer::core::executor::{ExecutorConfig, MigrationExecutor};
use array_balancer::core::history::OperationHistory;
use array_balancer::core::queue::TaskQueue;
use array_balancer::core::undo::UndoLog;
use array_balancer::models::history::OperationStatus;
use array_balancer::models::task::{FileMove, NewTask, TaskDetails, TaskId, TaskStatus};
use array_balancer::models::undo::REASON_SUPERSEDED;
use array_balancer::preflight::{CheckStatus, FsPermissionGate, PermissionCheck, PermissionGate};
use array_balancer::utils::fs::{find_temp_files, is_temp_file};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Gate that refuses everything.
struct DenyAll;

impl PermissionGate for DenyAll {
    fn check_file_operation(&self, _source: &Path, _dest: &Path) -> PermissionCheck {
        let mut check = PermissionCheck::new("file_operation", "denied");
        check.status = CheckStatus::Error;
        check.error = Some("read-only array".to_string());
        check
    }
}

/// Verifier that reports a different digest for temporary copies.
struct CorruptCopies;

impl ChecksumVerifier for CorruptCopies {
    fn digest(&self, path: &Path, algorithm: ChecksumAlgorithm) -> array_balancer::Result<String> {
        if is_temp_file(path) {
            return Ok("corrupted".to_string());
        }
        FileChecksummer.digest(path, algorithm)
    }
}

/// What to request when the trigger file is digested.
#[derive(Clone, Copy)]
enum Trigger {
    Cancel,
    Pause,
}

/// Verifier that files a control request while a given source is in flight.
struct RequestWhileCopying {
    queue: TaskQueue,
    task_id: Arc<AtomicI64>,
    trigger: PathBuf,
    request: Trigger,
}

impl ChecksumVerifier for RequestWhileCopying {
    fn digest(&self, path: &Path, algorithm: ChecksumAlgorithm) -> array_balancer::Result<String> {
        if path == self.trigger {
            let id = self.task_id.load(Ordering::SeqCst);
            match self.request {
                Trigger::Cancel => {
                    self.queue.cancel(id)?;
                }
                Trigger::Pause => self.queue.pause_task(id)?,
            }
        }
        FileChecksummer.digest(path, algorithm)
    }
}

struct Fixture {
    _temp_dir: TempDir,
    disk1: PathBuf,
    disk2: PathBuf,
    db: Database,
    queue: TaskQueue,
    undo: UndoLog,
}

impl Fixture {
    fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let disk1 = temp_dir.path().join("disk1");
        let disk2 = temp_dir.path().join("disk2");
        fs::create_dir_all(&disk1).unwrap();
        fs::create_dir_all(&disk2).unwrap();
        let db = Database::open_in_memory().unwrap();
        Self {
            _temp_dir: temp_dir,
            disk1,
            disk2,
            queue: TaskQueue::new(db.clone()),
            undo: UndoLog::new(
                db.clone(),
                Arc::new(FileChecksummer),
                ChecksumAlgorithm::Sha256,
                chrono::Duration::hours(24),
            ),
            db,
        }
    }

    fn executor(
        &self,
        gate: Arc<dyn PermissionGate>,
        verifier: Arc<dyn ChecksumVerifier>,
    ) -> MigrationExecutor {
        MigrationExecutor::new(
            self.queue.clone(),
            self.undo.clone(),
            OperationHistory::new(self.db.clone()),
            gate,
            verifier,
            ExecutorConfig {
                dry_run: false,
                checksum_algorithm: ChecksumAlgorithm::Sha256,
                poll_interval: Duration::from_millis(10),
            },
        )
    }

    fn default_executor(&self) -> MigrationExecutor {
        self.executor(Arc::new(FsPermissionGate), Arc::new(FileChecksummer))
    }

    fn write(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.disk1.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn history(&self) -> OperationHistory {
        OperationHistory::new(self.db.clone())
    }
}

#[tokio::test]
async fn test_verified_move_completes_with_undo_entry() {
    let fx = Fixture::new();
    let payload = vec![7u8; 3 * 1024 * 1024];
    let source = fx.write("movie.mkv", &payload);
    let dest = fx.disk2.join("movie.mkv");

    let id = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::move_file(&source, &dest)))
        .unwrap();
    let task = fx.default_executor().run_next().await.unwrap().unwrap();

    assert_eq!(task.id, id);
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.completed_at.is_some());
    assert!(!source.exists());
    assert_eq!(fs::read(&dest).unwrap(), payload);

    let entries = fx.undo.for_task(id).unwrap();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert!(entry.is_valid);
    assert_eq!(entry.file_size, payload.len() as u64);
    assert_eq!(entry.expires_at - entry.executed_at, chrono::Duration::hours(24));
    assert_eq!(
        entry.checksum,
        FileChecksummer.digest(&dest, ChecksumAlgorithm::Sha256).unwrap()
    );

    let history = fx.history().for_task(id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, OperationStatus::Completed);
    assert_eq!(history[0].file_size, Some(payload.len() as u64));
}

#[tokio::test]
async fn test_checksum_mismatch_leaves_source_untouched() {
    let fx = Fixture::new();
    let source = fx.write("a.bin", b"important bytes");
    let dest = fx.disk2.join("a.bin");

    let id = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::move_file(&source, &dest)))
        .unwrap();
    let task = fx
        .executor(Arc::new(FsPermissionGate), Arc::new(CorruptCopies))
        .run_next()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().starts_with("ChecksumMismatch:"));
    assert_eq!(fs::read(&source).unwrap(), b"important bytes");
    assert!(!dest.exists());
    assert!(find_temp_files(&fx.disk2).is_empty());
    assert!(fx.undo.for_task(id).unwrap().is_empty());

    let history = fx.history().for_task(id).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, OperationStatus::Failed);
    assert_eq!(history[0].source_path.as_deref(), Some(source.as_path()));
}

#[tokio::test]
async fn test_denied_permission_touches_nothing() {
    let fx = Fixture::new();
    let source = fx.write("a.bin", b"data");
    let dest = fx.disk2.join("a.bin");

    fx.queue
        .enqueue(NewTask::new(TaskDetails::move_file(&source, &dest)))
        .unwrap();
    let task = fx
        .executor(Arc::new(DenyAll), Arc::new(FileChecksummer))
        .run_next()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(
        task.error.as_deref(),
        Some("PermissionDenied: read-only array")
    );
    assert!(source.exists());
    assert!(!dest.exists());
}

#[tokio::test]
async fn test_existing_destination_is_never_overwritten() {
    let fx = Fixture::new();
    let source = fx.write("a.bin", b"new");
    let dest = fx.disk2.join("a.bin");
    fs::write(&dest, b"old").unwrap();

    fx.queue
        .enqueue(NewTask::new(TaskDetails::move_file(&source, &dest)))
        .unwrap();
    let task = fx.default_executor().run_next().await.unwrap().unwrap();

    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().starts_with("PathConflict:"));
    assert_eq!(fs::read(&dest).unwrap(), b"old");
    assert_eq!(fs::read(&source).unwrap(), b"new");
}

#[tokio::test]
async fn test_failure_does_not_stop_later_tasks() {
    let fx = Fixture::new();
    let good = fx.write("good.bin", b"ok");

    fx.queue
        .enqueue(NewTask::new(TaskDetails::move_file(
            fx.disk1.join("missing.bin"),
            fx.disk2.join("missing.bin"),
        )))
        .unwrap();
    fx.queue
        .enqueue(NewTask::new(TaskDetails::move_file(
            &good,
            fx.disk2.join("good.bin"),
        )))
        .unwrap();

    let executor = fx.default_executor();
    let first = executor.run_next().await.unwrap().unwrap();
    let second = executor.run_next().await.unwrap().unwrap();
    assert_eq!(first.status, TaskStatus::Failed);
    assert_eq!(second.status, TaskStatus::Completed);
    assert!(executor.run_next().await.unwrap().is_none());
}

#[tokio::test]
async fn test_cancel_waits_for_in_flight_file() {
    let fx = Fixture::new();
    let files: Vec<FileMove> = ["a", "b", "c"]
        .iter()
        .map(|name| FileMove::new(fx.write(name, name.as_bytes()), fx.disk2.join(name)))
        .collect();

    let task_id = Arc::new(AtomicI64::new(0));
    let verifier = RequestWhileCopying {
        queue: fx.queue.clone(),
        task_id: Arc::clone(&task_id),
        trigger: fx.disk1.join("b"),
        request: Trigger::Cancel,
    };
    let id = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::MoveFiles {
            files: files.clone(),
        }))
        .unwrap();
    task_id.store(id, Ordering::SeqCst);

    let task = fx
        .executor(Arc::new(FsPermissionGate), Arc::new(verifier))
        .run_next()
        .await
        .unwrap()
        .unwrap();

    assert_eq!(task.status, TaskStatus::Cancelled);
    // The in-flight file finished; the next one never started.
    assert!(fx.disk2.join("a").exists());
    assert!(fx.disk2.join("b").exists());
    assert!(!fx.disk1.join("b").exists());
    assert!(fx.disk1.join("c").exists());
    assert!(!fx.disk2.join("c").exists());
    assert_eq!(fx.undo.for_task(id).unwrap().len(), 2);
    assert!((task.progress_percent - 200.0 / 3.0).abs() < 0.01);
}

#[tokio::test]
async fn test_cancel_during_last_file_loses_to_completion() {
    let fx = Fixture::new();
    let source = fx.write("only.bin", b"x");

    let task_id = Arc::new(AtomicI64::new(0));
    let verifier = RequestWhileCopying {
        queue: fx.queue.clone(),
        task_id: Arc::clone(&task_id),
        trigger: source.clone(),
        request: Trigger::Cancel,
    };
    let id = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::move_file(
            &source,
            fx.disk2.join("only.bin"),
        )))
        .unwrap();
    task_id.store(id, Ordering::SeqCst);

    let task = fx
        .executor(Arc::new(FsPermissionGate), Arc::new(verifier))
        .run_next()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.control_request.is_none());
}

#[tokio::test]
async fn test_pause_then_resume_between_files() {
    let fx = Fixture::new();
    let files: Vec<FileMove> = ["a", "b"]
        .iter()
        .map(|name| FileMove::new(fx.write(name, name.as_bytes()), fx.disk2.join(name)))
        .collect();

    let task_id = Arc::new(AtomicI64::new(0));
    let verifier = RequestWhileCopying {
        queue: fx.queue.clone(),
        task_id: Arc::clone(&task_id),
        trigger: fx.disk1.join("a"),
        request: Trigger::Pause,
    };
    let id = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::MoveFiles { files }))
        .unwrap();
    task_id.store(id, Ordering::SeqCst);

    let executor = fx.executor(Arc::new(FsPermissionGate), Arc::new(verifier));
    let handle = tokio::spawn(async move { executor.run_next().await });

    let mut paused = false;
    for _ in 0..500 {
        if fx.queue.get(id).unwrap().status == TaskStatus::Paused {
            paused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(paused, "task never paused");
    assert!(fx.disk2.join("a").exists());
    assert!(fx.disk1.join("b").exists());

    fx.queue.resume_task(id).unwrap();
    let task = handle.await.unwrap().unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(fx.disk2.join("b").exists());
}

#[tokio::test]
async fn test_cancel_while_paused() {
    let fx = Fixture::new();
    let files: Vec<FileMove> = ["a", "b"]
        .iter()
        .map(|name| FileMove::new(fx.write(name, name.as_bytes()), fx.disk2.join(name)))
        .collect();

    let task_id = Arc::new(AtomicI64::new(0));
    let verifier = RequestWhileCopying {
        queue: fx.queue.clone(),
        task_id: Arc::clone(&task_id),
        trigger: fx.disk1.join("a"),
        request: Trigger::Pause,
    };
    let id: TaskId = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::MoveFiles { files }))
        .unwrap();
    task_id.store(id, Ordering::SeqCst);

    let executor = fx.executor(Arc::new(FsPermissionGate), Arc::new(verifier));
    let handle = tokio::spawn(async move { executor.run_next().await });

    for _ in 0..500 {
        if fx.queue.get(id).unwrap().status == TaskStatus::Paused {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    fx.queue.cancel(id).unwrap();

    let task = handle.await.unwrap().unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert!(fx.disk1.join("b").exists());
}

#[tokio::test]
async fn test_later_move_supersedes_undo_entry() {
    let fx = Fixture::new();
    let source = fx.write("a.bin", b"first");
    let dest = fx.disk2.join("a.bin");
    let executor = fx.default_executor();

    let first = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::move_file(&source, &dest)))
        .unwrap();
    executor.run_next().await.unwrap().unwrap();
    let entry = fx.undo.for_task(first).unwrap().remove(0);
    assert!(entry.is_valid);

    // The moved file is removed by hand, then a new move targets the same path.
    fs::remove_file(&dest).unwrap();
    let other = fx.write("b.bin", b"second");
    fx.queue
        .enqueue(NewTask::new(TaskDetails::move_file(&other, &dest)))
        .unwrap();
    let task = executor.run_next().await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    let entry = fx.undo.get(entry.id).unwrap();
    assert!(!entry.is_valid);
    assert_eq!(entry.invalidation_reason.as_deref(), Some(REASON_SUPERSEDED));

    let valid: Vec<_> = fx
        .undo
        .list(false)
        .unwrap()
        .into_iter()
        .filter(|e| e.dest_path == dest)
        .collect();
    assert_eq!(valid.len(), 1);
}

#[tokio::test]
async fn test_moving_a_moved_file_again_supersedes_its_entry() {
    let fx = Fixture::new();
    let source = fx.write("a.bin", b"payload");
    let middle = fx.disk2.join("a.bin");
    let last = fx.disk1.join("b.bin");
    let executor = fx.default_executor();

    let first = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::move_file(&source, &middle)))
        .unwrap();
    executor.run_next().await.unwrap().unwrap();
    fx.queue
        .enqueue(NewTask::new(TaskDetails::move_file(&middle, &last)))
        .unwrap();
    executor.run_next().await.unwrap().unwrap();

    let entry = fx.undo.for_task(first).unwrap().remove(0);
    assert!(!entry.is_valid);
    assert_eq!(fx.undo.list(false).unwrap().len(), 1);
}

#[tokio::test]
async fn test_cancelled_queued_task_has_no_side_effects() {
    let fx = Fixture::new();
    let source = fx.write("a.bin", b"stay");
    let id = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::move_file(
            &source,
            fx.disk2.join("a.bin"),
        )))
        .unwrap();
    fx.queue.cancel(id).unwrap();

    assert!(fx.default_executor().run_next().await.unwrap().is_none());
    assert!(source.exists());
    assert!(!fx.disk2.join("a.bin").exists());
    assert!(fx.undo.list(true).unwrap().is_empty());
    assert!(fx.history().for_task(id).unwrap().is_empty());
}

#[tokio::test]
async fn test_conflicting_move_keeps_prior_entry_reversible() {
    let fx = Fixture::new();
    let source = fx.write("a.bin", b"first");
    let dest = fx.disk2.join("a.bin");
    let executor = fx.default_executor();

    let first = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::move_file(&source, &dest)))
        .unwrap();
    executor.run_next().await.unwrap().unwrap();
    let entry = fx.undo.for_task(first).unwrap().remove(0);

    // Targets the occupied destination and fails before touching the disk.
    let other = fx.write("b.bin", b"second");
    fx.queue
        .enqueue(NewTask::new(TaskDetails::move_file(&other, &dest)))
        .unwrap();
    let task = executor.run_next().await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(task.error.unwrap().starts_with("PathConflict:"));

    assert!(fx.undo.get(entry.id).unwrap().is_valid);
    fx.undo.reverse(entry.id).await.unwrap();
    assert_eq!(fs::read(&source).unwrap(), b"first");
}

#[tokio::test]
async fn test_denied_move_keeps_prior_entry_reversible() {
    let fx = Fixture::new();
    let source = fx.write("a.bin", b"first");
    let dest = fx.disk2.join("a.bin");

    let first = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::move_file(&source, &dest)))
        .unwrap();
    fx.default_executor().run_next().await.unwrap().unwrap();
    let entry = fx.undo.for_task(first).unwrap().remove(0);

    fx.queue
        .enqueue(NewTask::new(TaskDetails::move_file(
            &dest,
            fx.disk1.join("elsewhere.bin"),
        )))
        .unwrap();
    let task = fx
        .executor(Arc::new(DenyAll), Arc::new(FileChecksummer))
        .run_next()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(fx.undo.get(entry.id).unwrap().is_valid);
}

#[tokio::test]
async fn test_failed_verification_keeps_prior_entry_reversible() {
    let fx = Fixture::new();
    let source = fx.write("a.bin", b"first");
    let dest = fx.disk2.join("a.bin");

    let first = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::move_file(&source, &dest)))
        .unwrap();
    fx.default_executor().run_next().await.unwrap().unwrap();
    let entry = fx.undo.for_task(first).unwrap().remove(0);

    fx.queue
        .enqueue(NewTask::new(TaskDetails::move_file(
            &dest,
            fx.disk1.join("elsewhere.bin"),
        )))
        .unwrap();
    let task = fx
        .executor(Arc::new(FsPermissionGate), Arc::new(CorruptCopies))
        .run_next()
        .await
        .unwrap()
        .unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
    assert!(dest.exists());
    assert!(fx.undo.get(entry.id).unwrap().is_valid);
}

#[tokio::test]
async fn test_history_row_precedes_undo_entry() {
    let fx = Fixture::new();
    let source = fx.write("a.bin", b"payload");
    let dest = fx.disk2.join("a.bin");

    let id = fx
        .queue
        .enqueue(NewTask::new(TaskDetails::move_file(&source, &dest)))
        .unwrap();
    fx.default_executor().run_next().await.unwrap().unwrap();

    let history = fx.history().for_task(id).unwrap();
    let entry = fx.undo.for_task(id).unwrap().remove(0);
    assert!(history[0].created_at <= entry.executed_at);
    assert!(fx.history().has_completed_move(id, &source, &dest).unwrap());
    assert!(fx.history().completed_moves_without_undo().unwrap().is_empty());
}
