//! Server, storage and telemetry settings.

use serde::{Deserialize, Serialize};

/// HTTP surface settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// HTTP port. `0` picks a free port.
    pub port: u16,
    /// Upper bound on a whole `/v1/send` call, queueing included.
    pub request_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8787,
            request_timeout_ms: 900_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageSettings {
    /// Session database path. Relative paths resolve under `~/.warden`.
    pub database_path: String,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            database_path: "database/warden.db".to_string(),
        }
    }
}

/// Logging and monitoring settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TelemetrySettings {
    /// Default log level (`error`, `warn`, `info`, `debug`, `trace`).
    pub log_level: String,
    /// Per-module overrides, e.g. `{"warden_dispatch": "debug"}`.
    pub module_levels: std::collections::BTreeMap<String, String>,
    /// Persist warn+ logs to SQLite.
    pub log_to_sqlite: bool,
    /// Log database path. Relative paths resolve under `~/.warden`.
    pub log_db_path: String,
    /// Latency samples kept for percentiles.
    pub latency_window: usize,
    /// p95 above this marks the service slow.
    pub p95_threshold_ms: u64,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            module_levels: std::collections::BTreeMap::new(),
            log_to_sqlite: true,
            log_db_path: "database/warden-logs.db".to_string(),
            latency_window: 1_000,
            p95_threshold_ms: 30_000,
        }
    }
}
