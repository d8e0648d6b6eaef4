/// SQL DDL for the warden state database.
pub const SCHEMA_VERSION: u32 = 1;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA busy_timeout = 5000;
"#;

/// One row per key; the shared conversation lives under [`SHARED_SESSION_KEY`].
pub const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS session_state (
    key TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    payload TEXT NOT NULL,
    last_activity_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

pub const SHARED_SESSION_KEY: &str = "shared_session";
