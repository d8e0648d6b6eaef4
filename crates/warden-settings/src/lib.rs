//! # warden-settings
//!
//! Layered configuration for the warden supervisor.
//!
//! Settings are loaded from four layers (in priority order):
//! 1. **Compiled defaults**: [`WardenSettings::default()`]
//! 2. **Preset**: an optional [`Preset`] bundle for the deployment environment
//! 3. **Settings file**: `~/.warden/settings.json` or an explicit path, deep-merged over the above
//! 4. **Environment variables**: `WARDEN_*` overrides (highest priority)
//!
//! ```no_run
//! use warden_settings::{load_settings, validate};
//!
//! let settings = load_settings().unwrap_or_default();
//! for warning in validate(&settings).unwrap() {
//!     eprintln!("{warning}");
//! }
//! ```

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;
pub mod validate;

pub use errors::{Result, SettingsError};
pub use loader::{
    deep_merge, load_settings, load_settings_from_path, load_settings_with_preset, resolve_path,
    settings_path, warden_home,
};
pub use types::*;
pub use validate::validate;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let settings = WardenSettings::default();
        assert_eq!(settings.process.transport, TransportMode::Supervised);
        assert_eq!(settings.process.timeout_ms, 300_000);
        assert_eq!(settings.process.profiles.len(), 1);
        assert_eq!(settings.dispatch.max_timeout_retries, 1);
        assert_eq!(settings.dispatch.rate_limit_interval_ms, 100);
        assert_eq!(settings.dispatch.circuit_failure_threshold, 3);
        assert_eq!(settings.dispatch.circuit_cooldown_ms, 60_000);
        assert_eq!(settings.session.idle_timeout_ms, 30 * 60 * 1000);
        assert_eq!(settings.session.history_cap, 8);
        assert_eq!(settings.session.caller_cap, 10);
        assert_eq!(settings.session.context_mode, ContextMode::Replay);
        assert_eq!(settings.session.max_message_chars, 10_000);
        assert_eq!(settings.telemetry.latency_window, 1_000);
        assert_eq!(settings.telemetry.p95_threshold_ms, 30_000);
    }

    #[test]
    fn serialized_defaults_use_camel_case() {
        let value = serde_json::to_value(WardenSettings::default()).unwrap();
        assert_eq!(value["session"]["idleTimeoutMs"], 1_800_000);
        assert_eq!(value["process"]["transport"], "supervised");
        assert_eq!(value["session"]["contextMode"], "replay");
    }
}
