//! Background expiry of undo entries.

use crate::core::undo::UndoLog;
use crate::Result;
use chrono::Utc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodically invalidates undo entries past their retention window.
pub struct Reaper {
    undo: UndoLog,
    interval: Duration,
}

impl Reaper {
    pub fn new(undo: UndoLog, interval: Duration) -> Self {
        Self { undo, interval }
    }

    /// One pass: invalidate every entry with `expires_at <= now`.
    pub fn run_once(&self) -> Result<usize> {
        let expired = self.undo.invalidate_expired(Utc::now())?;
        if expired > 0 {
            tracing::info!("Reaper expired {} undo entr(ies)", expired);
        } else {
            tracing::debug!("Reaper pass: nothing expired");
        }
        Ok(expired)
    }

    /// Run until `shutdown` flips to true.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once() {
                        tracing::error!("Reaper pass failed: {}", e);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        tracing::debug!("Reaper stopping");
                        break;
                    }
                }
            }
        }
    }

    /// Spawn the loop on the runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::checksum::{ChecksumAlgorithm, FileChecksummer};
    use crate::core::database::Database;
    use crate::models::undo::{NewUndoEntry, REASON_EXPIRED};
    use std::path::PathBuf;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_reaper_loop_stops_on_shutdown() {
        let undo = UndoLog::new(
            Database::open_in_memory().unwrap(),
            Arc::new(FileChecksummer),
            ChecksumAlgorithm::Sha256,
            chrono::Duration::hours(24),
        );
        let mut stale = NewUndoEntry::moved(
            None,
            PathBuf::from("/mnt/disk1/a"),
            PathBuf::from("/mnt/disk2/a"),
            1,
            "abc".to_string(),
        );
        stale.executed_at = Utc::now() - chrono::Duration::hours(25);
        let stored = undo.record(stale).unwrap();

        let (tx, rx) = watch::channel(false);
        let handle = Reaper::new(undo.clone(), Duration::from_millis(10)).spawn(rx);
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();

        let entry = undo.get(stored.id).unwrap();
        assert!(!entry.is_valid);
        assert_eq!(entry.invalidation_reason.as_deref(), Some(REASON_EXPIRED));
    }
}
