//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`WardenSettings::default()`]
//! 2. Deep-merge the selected [`Preset`], if any: an explicit argument, else
//!    `WARDEN_PRESET`, else the file's own `preset` key
//! 3. If the settings file exists, deep-merge its values over that
//! 4. Apply `WARDEN_*` environment variable overrides (highest priority)
//!
//! File values merge key by key into nested objects. Arrays and scalars
//! replace what was there, and a `null` leaves the default in place.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use warden_core::Credential;

use crate::errors::Result;
use crate::types::{ContextMode, Preset, TransportMode, WardenSettings};

/// Root directory for warden state (`~/.warden`).
pub fn warden_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".warden")
}

/// Resolve the path to the settings file (`~/.warden/settings.json`).
pub fn settings_path() -> PathBuf {
    warden_home().join("settings.json")
}

/// Resolve a configured path: absolute paths are kept, relative ones land under [`warden_home`].
pub fn resolve_path(configured: &str) -> PathBuf {
    let path = PathBuf::from(configured);
    if path.is_absolute() {
        path
    } else {
        warden_home().join(path)
    }
}

/// Load `~/.warden/settings.json`, then apply `WARDEN_*` overrides.
pub fn load_settings() -> Result<WardenSettings> {
    load_settings_from_path(&settings_path())
}

/// Like [`load_settings`] with an explicit file. A missing file means
/// defaults; malformed JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<WardenSettings> {
    load_settings_with_preset(path, None)
}

/// Like [`load_settings_from_path`], forcing `preset` over both
/// `WARDEN_PRESET` and the file's `preset` key.
pub fn load_settings_with_preset(path: &Path, preset: Option<Preset>) -> Result<WardenSettings> {
    let preset = preset.or_else(|| env("WARDEN_PRESET", snake_case::<Preset>));
    let mut settings = load_layers(path, preset)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults, the file's own preset and the settings file, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<WardenSettings> {
    load_layers(path, None)
}

fn load_layers(path: &Path, preset: Option<Preset>) -> Result<WardenSettings> {
    let file: Option<Value> = match std::fs::read_to_string(path) {
        Ok(content) => Some(serde_json::from_str(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no settings file, using defaults");
            None
        }
        Err(e) => return Err(e.into()),
    };
    // An unknown preset name in the file fails below, when the merged value is parsed.
    let preset = preset.or_else(|| {
        let named = file.as_ref()?.get("preset")?;
        serde_json::from_value::<Preset>(named.clone()).ok()
    });

    let mut value = serde_json::to_value(WardenSettings::default())?;
    if let Some(preset) = preset {
        debug!(%preset, "applying settings preset");
        deep_merge(&mut value, preset.overlay());
    }
    if let Some(file) = file {
        debug!(path = %path.display(), "merging settings file");
        deep_merge(&mut value, file);
    }
    if let Some(preset) = preset {
        value["preset"] = serde_json::to_value(preset)?;
    }
    Ok(serde_json::from_value(value)?)
}

/// Merge `overlay` into `base` in place.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_fields), Value::Object(fields)) => {
            for (key, value) in fields {
                if value.is_null() {
                    continue;
                }
                match base_fields.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        base_fields.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

/// Apply `WARDEN_*` overrides. Values that do not parse or fall outside
/// their range are logged and skipped.
pub fn apply_env_overrides(settings: &mut WardenSettings) {
    let server = &mut settings.server;
    set(&mut server.host, env("WARDEN_HOST", non_empty));
    set(&mut server.port, env("WARDEN_PORT", |v| v.parse::<u16>().ok()));

    let process = &mut settings.process;
    set(&mut process.binary, env("WARDEN_BINARY", non_empty));
    set(&mut process.transport, env("WARDEN_TRANSPORT", snake_case::<TransportMode>));
    set(&mut process.timeout_ms, env("WARDEN_TIMEOUT_MS", in_range(1_000, 3_600_000)));
    if let Some(key) = env("WARDEN_PRIMARY_CREDENTIALS", non_empty) {
        if let Some(primary) = process.profiles.first_mut() {
            primary.credentials = Some(Credential::new(key));
        }
    }

    let dispatch = &mut settings.dispatch;
    set(&mut dispatch.max_timeout_retries, env("WARDEN_MAX_TIMEOUT_RETRIES", in_range(0u32, 10)));
    set(&mut dispatch.rate_limit_interval_ms, env("WARDEN_RATE_LIMIT_MS", in_range(0, 60_000)));
    set(&mut dispatch.circuit_failure_threshold, env("WARDEN_CIRCUIT_THRESHOLD", in_range(1u32, 100)));
    set(&mut dispatch.circuit_cooldown_ms, env("WARDEN_CIRCUIT_COOLDOWN_MS", in_range(1_000, 3_600_000)));

    let session = &mut settings.session;
    set(&mut session.idle_timeout_ms, env("WARDEN_IDLE_TIMEOUT_MS", in_range(1_000, 86_400_000)));
    set(&mut session.context_mode, env("WARDEN_CONTEXT_MODE", snake_case::<ContextMode>));

    set(&mut settings.storage.database_path, env("WARDEN_DB_PATH", non_empty));
    set(&mut settings.telemetry.log_level, env("WARDEN_LOG_LEVEL", non_empty));
    set(&mut settings.telemetry.log_to_sqlite, env("WARDEN_LOG_TO_SQLITE", flag));
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

fn env<T>(name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let parsed = parse(raw.trim());
    if parsed.is_none() {
        warn!(key = name, value = %raw, "ignoring invalid env override");
    }
    parsed
}

fn non_empty(raw: &str) -> Option<String> {
    (!raw.is_empty()).then(|| raw.to_string())
}

/// `true`/`false`, `1`/`0`, `yes`/`no`, `on`/`off`, any case.
fn flag(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn in_range<T>(min: T, max: T) -> impl Fn(&str) -> Option<T>
where
    T: FromStr + PartialOrd + Copy,
{
    move |raw| raw.parse::<T>().ok().filter(|n| (min..=max).contains(n))
}

fn snake_case<T: DeserializeOwned>(raw: &str) -> Option<T> {
    serde_json::from_value(Value::String(raw.to_ascii_lowercase())).ok()
}
