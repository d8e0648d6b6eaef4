//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and implement
//! [`Default`] with production values. `#[serde(default)]` lets a settings
//! file specify only the fields it wants to change.

mod dispatch;
mod preset;
mod process;
mod server;
mod session;

pub use dispatch::*;
pub use preset::*;
pub use process::*;
pub use server::*;
pub use session::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "preset": "staging",
///   "process": { "binary": "/usr/local/bin/agent", "timeoutMs": 120000 },
///   "session": { "contextMode": "process_memory" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WardenSettings {
    /// Deployment preset layered under this file's own values.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<Preset>,
    pub server: ServerSettings,
    pub process: ProcessSettings,
    pub dispatch: DispatchSettings,
    pub session: SessionSettings,
    pub storage: StorageSettings,
    pub telemetry: TelemetrySettings,
}
