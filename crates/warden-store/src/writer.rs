//! Background snapshot persistence.
//!
//! Callers hand over the latest snapshot and return immediately. A single
//! task writes it on the blocking pool; snapshots submitted while a write is
//! running collapse into the newest one.

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use warden_core::SessionSnapshot;

use crate::error::StoreError;
use crate::sessions::SessionStateRepo;

pub struct SnapshotWriter {
    repo: SessionStateRepo,
    key: String,
    tx: Mutex<Option<watch::Sender<Option<SessionSnapshot>>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotWriter {
    /// Start the writer task. Must be called inside a tokio runtime.
    pub fn spawn(repo: SessionStateRepo, key: impl Into<String>) -> Self {
        let key = key.into();
        let (tx, rx) = watch::channel(None);
        let task = tokio::spawn(write_loop(repo.clone(), key.clone(), rx));
        Self {
            repo,
            key,
            tx: Mutex::new(Some(tx)),
            task: Mutex::new(Some(task)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Queue a snapshot. Replaces any snapshot not yet written. No-op after shutdown.
    pub fn submit(&self, snapshot: SessionSnapshot) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send_replace(Some(snapshot));
        }
    }

    /// Read the stored snapshot.
    pub async fn load(&self) -> Result<Option<SessionSnapshot>, StoreError> {
        let repo = self.repo.clone();
        let key = self.key.clone();
        tokio::task::spawn_blocking(move || repo.load(&key))
            .await
            .map_err(|e| StoreError::Io(format!("load task: {e}")))?
    }

    /// Write any pending snapshot and stop the task. Idempotent.
    pub async fn shutdown(&self) {
        // Dropping the sender lets the loop drain the last value and exit.
        drop(self.tx.lock().take());
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "snapshot writer task failed");
            }
        }
    }
}

async fn write_loop(
    repo: SessionStateRepo,
    key: String,
    mut rx: watch::Receiver<Option<SessionSnapshot>>,
) {
    while rx.changed().await.is_ok() {
        let Some(snapshot) = rx.borrow_and_update().clone() else {
            continue;
        };
        let repo = repo.clone();
        let key = key.clone();
        let session_id = snapshot.session_id.clone();
        match tokio::task::spawn_blocking(move || repo.save(&key, &snapshot)).await {
            Ok(Ok(())) => debug!(session_id = %session_id, "session snapshot saved"),
            Ok(Err(e)) => warn!(session_id = %session_id, error = %e, "session snapshot save failed"),
            Err(e) => warn!(error = %e, "session snapshot task panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use crate::schema::SHARED_SESSION_KEY;
    use chrono::Utc;
    use warden_core::{HistoryEntry, SessionId};

    fn snapshot(count: u64) -> SessionSnapshot {
        let now = Utc::now();
        SessionSnapshot {
            session_id: SessionId::from_raw("sess_w"),
            started_at: now,
            last_activity_at: now,
            message_count: count,
            history: vec![HistoryEntry::new("u", format!("m{count}"))],
            recent_callers: vec![],
        }
    }

    #[tokio::test]
    async fn shutdown_flushes_latest() {
        let repo = SessionStateRepo::new(Database::in_memory().unwrap());
        let writer = SnapshotWriter::spawn(repo.clone(), SHARED_SESSION_KEY);
        for i in 1..=20 {
            writer.submit(snapshot(i));
        }
        writer.shutdown().await;

        let stored = repo.load(SHARED_SESSION_KEY).unwrap().unwrap();
        assert_eq!(stored.message_count, 20);
    }

    #[tokio::test]
    async fn submit_after_shutdown_is_ignored() {
        let repo = SessionStateRepo::new(Database::in_memory().unwrap());
        let writer = SnapshotWriter::spawn(repo.clone(), SHARED_SESSION_KEY);
        writer.submit(snapshot(1));
        writer.shutdown().await;
        writer.submit(snapshot(2));
        writer.shutdown().await;

        assert_eq!(writer.load().await.unwrap().unwrap().message_count, 1);
    }

    #[tokio::test]
    async fn load_without_snapshot() {
        let repo = SessionStateRepo::new(Database::in_memory().unwrap());
        let writer = SnapshotWriter::spawn(repo, "other");
        assert!(writer.load().await.unwrap().is_none());
        writer.shutdown().await;
    }
}
