//! Settings validation.
//!
//! Hard errors reject the configuration; warnings are returned for logging.

use std::collections::HashSet;

use crate::errors::{Result, SettingsError};
use crate::types::{ContextMode, TransportMode, WardenSettings};

/// Worst-case wall time above which a warning is produced.
const SLOW_CALL_WARNING_MS: u64 = 600_000;

/// Validate settings. Returns warnings on success.
pub fn validate(settings: &WardenSettings) -> Result<Vec<String>> {
    let process = &settings.process;
    let dispatch = &settings.dispatch;
    let session = &settings.session;

    if process.timeout_ms == 0 {
        return Err(SettingsError::InvalidValue("process.timeoutMs must be > 0".into()));
    }
    if process.binary.trim().is_empty() {
        return Err(SettingsError::InvalidValue("process.binary is empty".into()));
    }
    if process.profiles.is_empty() {
        return Err(SettingsError::InvalidValue(
            "process.profiles needs at least one profile".into(),
        ));
    }
    let mut names = HashSet::new();
    for profile in &process.profiles {
        if profile.name.trim().is_empty() {
            return Err(SettingsError::InvalidValue("profile name is empty".into()));
        }
        if !names.insert(profile.name.as_str()) {
            return Err(SettingsError::InvalidValue(format!(
                "duplicate profile name: {}",
                profile.name
            )));
        }
    }
    if dispatch.circuit_failure_threshold == 0 {
        return Err(SettingsError::InvalidValue(
            "dispatch.circuitFailureThreshold must be > 0".into(),
        ));
    }
    if dispatch.circuit_cooldown_ms == 0 {
        return Err(SettingsError::InvalidValue(
            "dispatch.circuitCooldownMs must be > 0".into(),
        ));
    }
    if session.history_cap == 0 || session.caller_cap == 0 {
        return Err(SettingsError::InvalidValue(
            "session history and caller caps must be > 0".into(),
        ));
    }
    if session.idle_timeout_ms == 0 {
        return Err(SettingsError::InvalidValue("session.idleTimeoutMs must be > 0".into()));
    }
    if settings.telemetry.latency_window == 0 {
        return Err(SettingsError::InvalidValue("telemetry.latencyWindow must be > 0".into()));
    }

    let mut warnings = Vec::new();

    let attempts_per_profile = u64::from(dispatch.max_timeout_retries) + 1;
    let worst_case = process.timeout_ms * attempts_per_profile * process.profiles.len() as u64;
    if worst_case > SLOW_CALL_WARNING_MS {
        warnings.push(format!(
            "worst-case call time is {}s (timeout x attempts x profiles); callers may give up first",
            worst_case / 1000
        ));
    }
    if dispatch.rate_limit_interval_ms < 10 {
        warnings.push("rate limit interval under 10ms gives the process almost no spacing".into());
    }
    if dispatch.circuit_max_cooldown_ms < dispatch.circuit_cooldown_ms {
        warnings.push("circuit max cooldown is below the base cooldown; cooldown will not grow".into());
    }
    if session.context_mode == ContextMode::ProcessMemory && process.transport == TransportMode::PerCall {
        warnings.push(
            "process_memory context has nothing to remember with the per_call transport; every turn sends the full context"
                .into(),
        );
    }
    if session.checkpoint_interval_ms >= session.idle_timeout_ms {
        warnings.push("checkpoint interval is not shorter than the idle timeout".into());
    }
    if settings.server.request_timeout_ms > 0 && settings.server.request_timeout_ms < process.timeout_ms {
        warnings.push("server request timeout is shorter than one process attempt".into());
    }

    Ok(warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use warden_core::ExecutionProfile;

    #[test]
    fn defaults_are_valid() {
        let warnings = validate(&WardenSettings::default()).unwrap();
        assert!(warnings.is_empty(), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut s = WardenSettings::default();
        s.process.timeout_ms = 0;
        assert!(matches!(validate(&s), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn empty_profiles_rejected() {
        let mut s = WardenSettings::default();
        s.process.profiles.clear();
        assert!(validate(&s).is_err());
    }

    #[test]
    fn duplicate_profile_names_rejected() {
        let mut s = WardenSettings::default();
        s.process.profiles.push(ExecutionProfile::named("primary"));
        let err = validate(&s).unwrap_err();
        assert!(err.to_string().contains("duplicate profile"));
    }

    #[test]
    fn zero_caps_rejected() {
        let mut s = WardenSettings::default();
        s.session.history_cap = 0;
        assert!(validate(&s).is_err());
    }

    #[test]
    fn process_memory_over_per_call_warns() {
        let mut s = WardenSettings::default();
        s.session.context_mode = ContextMode::ProcessMemory;
        assert!(validate(&s).unwrap().is_empty());
        s.process.transport = TransportMode::PerCall;
        let warnings = validate(&s).unwrap();
        assert!(warnings.iter().any(|w| w.contains("per_call")), "{warnings:?}");
    }

    #[test]
    fn long_worst_case_warns() {
        let mut s = WardenSettings::default();
        s.process.profiles.push(ExecutionProfile::named("fallback"));
        // 300s x 2 attempts x 2 profiles
        let warnings = validate(&s).unwrap();
        assert!(warnings.iter().any(|w| w.contains("worst-case")));
    }

    #[test]
    fn tiny_rate_limit_warns() {
        let mut s = WardenSettings::default();
        s.dispatch.rate_limit_interval_ms = 0;
        let warnings = validate(&s).unwrap();
        assert!(warnings.iter().any(|w| w.contains("rate limit")));
    }
}
