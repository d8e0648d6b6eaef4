use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Which side owns conversational memory.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// The session's context block is sent with every message.
    #[default]
    Replay,
    /// The process remembers; context goes out only with a session's first message.
    ProcessMemory,
}

/// Shared conversation session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Inactivity after which the session is replaced.
    pub idle_timeout_ms: u64,
    pub history_cap: usize,
    pub caller_cap: usize,
    pub context_mode: ContextMode,
    /// Speaker label used for replies in history.
    pub assistant_name: String,
    /// Maintenance cadence: expiry sweep and snapshot checkpoint.
    pub checkpoint_interval_ms: u64,
    /// Longer messages are truncated.
    pub max_message_chars: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            idle_timeout_ms: 1_800_000,
            history_cap: 8,
            caller_cap: 10,
            context_mode: ContextMode::default(),
            assistant_name: "assistant".to_string(),
            checkpoint_interval_ms: 600_000,
            max_message_chars: 10_000,
        }
    }
}

impl SessionSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }
}
