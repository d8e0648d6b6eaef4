use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::SessionId;

/// One turn of the shared conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub speaker: String,
    pub text: String,
}

impl HistoryEntry {
    pub fn new(speaker: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            speaker: speaker.into(),
            text: text.into(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallerEntry {
    pub caller_id: String,
    pub display_name: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted form of the shared conversation session.
///
/// Unknown fields are ignored and missing collections default to empty, so
/// snapshots written by older builds still load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub started_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: u64,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub recent_callers: Vec<CallerEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tolerates_missing_optional_fields() {
        let json = r#"{
            "sessionId": "sess_old",
            "startedAt": "2026-01-01T10:00:00Z",
            "lastActivityAt": "2026-01-01T10:05:00Z",
            "history": [{"speaker": "alice", "text": "hi"}],
            "legacyField": true
        }"#;
        let snap: SessionSnapshot = serde_json::from_str(json).unwrap();
        assert_eq!(snap.session_id.as_str(), "sess_old");
        assert_eq!(snap.message_count, 0);
        assert_eq!(snap.history.len(), 1);
        assert!(snap.recent_callers.is_empty());
    }

    #[test]
    fn uses_camel_case_keys() {
        let now = Utc::now();
        let snap = SessionSnapshot {
            session_id: SessionId::from_raw("sess_x"),
            started_at: now,
            last_activity_at: now,
            message_count: 3,
            history: vec![],
            recent_callers: vec![CallerEntry {
                caller_id: "u1".into(),
                display_name: "Alice".into(),
                timestamp: now,
            }],
        };
        let value = serde_json::to_value(&snap).unwrap();
        assert_eq!(value["messageCount"], 3);
        assert_eq!(value["recentCallers"][0]["displayName"], "Alice");
    }
}
