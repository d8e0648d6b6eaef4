use chrono::Utc;
use tracing::instrument;
use warden_core::SessionSnapshot;

use crate::database::Database;
use crate::error::StoreError;

/// Persistence for conversation session snapshots, one row per key.
#[derive(Clone)]
pub struct SessionStateRepo {
    db: Database,
}

impl SessionStateRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the snapshot stored under `key`.
    #[instrument(skip(self, snapshot), fields(session_id = %snapshot.session_id))]
    pub fn save(&self, key: &str, snapshot: &SessionSnapshot) -> Result<(), StoreError> {
        let payload = serde_json::to_string(snapshot)?;
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO session_state (key, session_id, payload, last_activity_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(key) DO UPDATE SET
                     session_id = excluded.session_id,
                     payload = excluded.payload,
                     last_activity_at = excluded.last_activity_at,
                     updated_at = excluded.updated_at",
                rusqlite::params![
                    key,
                    snapshot.session_id.as_str(),
                    payload,
                    snapshot.last_activity_at.to_rfc3339(),
                    now,
                ],
            )?;
            Ok(())
        })
    }

    /// Load the snapshot stored under `key`, if any.
    #[instrument(skip(self))]
    pub fn load(&self, key: &str) -> Result<Option<SessionSnapshot>, StoreError> {
        let payload: Option<String> = self.db.with_conn(|conn| {
            match conn.query_row(
                "SELECT payload FROM session_state WHERE key = ?1",
                [key],
                |row| row.get(0),
            ) {
                Ok(p) => Ok(Some(p)),
                Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(StoreError::from))
            .transpose()
    }

    /// Remove the snapshot under `key`. Returns whether a row existed.
    #[instrument(skip(self))]
    pub fn clear(&self, key: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let n = conn.execute("DELETE FROM session_state WHERE key = ?1", [key])?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SHARED_SESSION_KEY;
    use warden_core::{CallerEntry, HistoryEntry, SessionId};

    fn repo() -> SessionStateRepo {
        SessionStateRepo::new(Database::in_memory().unwrap())
    }

    fn snapshot(messages: u64) -> SessionSnapshot {
        let now = Utc::now();
        SessionSnapshot {
            session_id: SessionId::new(),
            started_at: now,
            last_activity_at: now,
            message_count: messages,
            history: vec![
                HistoryEntry::new("Alice", "hello"),
                HistoryEntry::new("assistant", "hi Alice"),
            ],
            recent_callers: vec![CallerEntry {
                caller_id: "u1".into(),
                display_name: "Alice".into(),
                timestamp: now,
            }],
        }
    }

    #[test]
    fn load_missing_returns_none() {
        assert!(repo().load(SHARED_SESSION_KEY).unwrap().is_none());
    }

    #[test]
    fn save_then_load() {
        let repo = repo();
        let snap = snapshot(1);
        repo.save(SHARED_SESSION_KEY, &snap).unwrap();
        assert_eq!(repo.load(SHARED_SESSION_KEY).unwrap(), Some(snap));
    }

    #[test]
    fn save_replaces_previous() {
        let repo = repo();
        repo.save(SHARED_SESSION_KEY, &snapshot(1)).unwrap();
        let newer = snapshot(2);
        repo.save(SHARED_SESSION_KEY, &newer).unwrap();

        let loaded = repo.load(SHARED_SESSION_KEY).unwrap().unwrap();
        assert_eq!(loaded.message_count, 2);
        assert_eq!(loaded.session_id, newer.session_id);
    }

    #[test]
    fn clear_removes_row() {
        let repo = repo();
        repo.save(SHARED_SESSION_KEY, &snapshot(1)).unwrap();
        assert!(repo.clear(SHARED_SESSION_KEY).unwrap());
        assert!(!repo.clear(SHARED_SESSION_KEY).unwrap());
        assert!(repo.load(SHARED_SESSION_KEY).unwrap().is_none());
    }

    #[test]
    fn corrupt_payload_is_serialization_error() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO session_state (key, session_id, payload, last_activity_at, updated_at)
                 VALUES ('k', 's', 'not json', '', '')",
                [],
            )?;
            Ok(())
        })
        .unwrap();
        let err = SessionStateRepo::new(db).load("k").unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }
}
