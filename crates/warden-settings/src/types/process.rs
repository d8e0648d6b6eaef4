use serde::{Deserialize, Serialize};
use warden_core::ExecutionProfile;

/// How the external agent process is run.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    /// Spawn a fresh process for every attempt.
    PerCall,
    /// Keep one framed long-lived process per profile and restart it on failure.
    #[default]
    Supervised,
}

/// External process settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessSettings {
    pub transport: TransportMode,
    /// Path to the agent binary, or a name resolved through `PATH`.
    pub binary: String,
    /// Extra arguments placed before the profile-specific ones.
    pub args: Vec<String>,
    /// Environment variable the profile credential is passed through.
    pub credentials_env: String,
    /// Working directory for the child. Inherited when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// Per-attempt deadline.
    pub timeout_ms: u64,
    /// Primary first, then fallbacks in order of preference.
    pub profiles: Vec<ExecutionProfile>,
}

impl Default for ProcessSettings {
    fn default() -> Self {
        Self {
            transport: TransportMode::default(),
            binary: "agent".to_string(),
            args: Vec::new(),
            credentials_env: "AGENT_API_KEY".to_string(),
            working_dir: None,
            timeout_ms: 300_000,
            profiles: vec![ExecutionProfile::named("primary")],
        }
    }
}

impl ProcessSettings {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms)
    }
}
