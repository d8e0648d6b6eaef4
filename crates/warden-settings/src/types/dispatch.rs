use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry, pacing and circuit breaker settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DispatchSettings {
    /// Same-profile retries after a timeout or a crash.
    pub max_timeout_retries: u32,
    /// Minimum spacing between two dispatches to the process.
    pub rate_limit_interval_ms: u64,
    /// Consecutive failures that open the breaker.
    pub circuit_failure_threshold: u32,
    /// Initial open period.
    pub circuit_cooldown_ms: u64,
    /// Ceiling for the doubled open period after failed probes.
    pub circuit_max_cooldown_ms: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_timeout_retries: 1,
            rate_limit_interval_ms: 100,
            circuit_failure_threshold: 3,
            circuit_cooldown_ms: 60_000,
            circuit_max_cooldown_ms: 600_000,
        }
    }
}

impl DispatchSettings {
    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limit_interval_ms)
    }

    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_cooldown_ms)
    }

    pub fn circuit_max_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit_max_cooldown_ms)
    }
}
