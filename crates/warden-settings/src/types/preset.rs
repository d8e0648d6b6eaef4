//! Deployment presets: partial settings applied over the compiled defaults
//! and beneath the settings file.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preset {
    /// Chatty logs, short deadlines, light pacing.
    Development,
    /// Fast failure: 5s deadline and a breaker that trips after two failures.
    Testing,
    /// Longer deadline and a more tolerant breaker.
    Staging,
    /// The compiled defaults with warn-level logging.
    Production,
}

impl Preset {
    pub const ALL: [Preset; 4] = [Self::Development, Self::Testing, Self::Staging, Self::Production];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Testing => "testing",
            Self::Staging => "staging",
            Self::Production => "production",
        }
    }

    /// Settings-file shaped overlay (camelCase keys).
    pub fn overlay(self) -> Value {
        match self {
            Self::Development => json!({
                "process": { "timeoutMs": 60_000 },
                "dispatch": { "rateLimitIntervalMs": 50 },
                "telemetry": { "logLevel": "debug" },
            }),
            Self::Testing => json!({
                "process": { "timeoutMs": 5_000 },
                "dispatch": {
                    "rateLimitIntervalMs": 10,
                    "circuitFailureThreshold": 2,
                    "circuitCooldownMs": 5_000,
                },
                "telemetry": { "logLevel": "info" },
            }),
            Self::Staging => json!({
                "process": { "timeoutMs": 120_000 },
                "dispatch": {
                    "rateLimitIntervalMs": 100,
                    "circuitFailureThreshold": 5,
                    "circuitCooldownMs": 120_000,
                },
                "telemetry": { "logLevel": "info" },
            }),
            Self::Production => json!({
                "process": { "timeoutMs": 300_000 },
                "dispatch": {
                    "rateLimitIntervalMs": 100,
                    "circuitFailureThreshold": 3,
                    "circuitCooldownMs": 60_000,
                },
                "telemetry": { "logLevel": "warn" },
            }),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Preset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown preset {s:?} (expected development, testing, staging or production)"))
    }
}
