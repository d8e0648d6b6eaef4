//! Wiring from settings to a running orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;
use warden_dispatch::{
    AgentProcess, BreakerConfig, DispatcherConfig, FallbackPolicy, OneShotProcess, ProcessCommand,
    ProcessDispatcher, RetryPolicy, SupervisedProcess,
};
use warden_settings::{resolve_path, TransportMode, WardenSettings};
use warden_store::{Database, SessionStateRepo};
use warden_telemetry::{HealthThresholds, Monitor, MonitorConfig};

use crate::error::EngineError;
use crate::orchestrator::{OrchestratorConfig, SessionOrchestrator};

pub fn monitor_from_settings(settings: &WardenSettings) -> Monitor {
    Monitor::new(MonitorConfig {
        latency_window: settings.telemetry.latency_window,
        thresholds: HealthThresholds {
            p95_latency_ms: settings.telemetry.p95_threshold_ms,
            ..HealthThresholds::default()
        },
    })
}

pub fn process_from_settings(settings: &WardenSettings) -> Arc<dyn AgentProcess> {
    let process = &settings.process;
    let command = ProcessCommand {
        binary: process.binary.clone(),
        args: process.args.clone(),
        credentials_env: process.credentials_env.clone(),
        working_dir: process.working_dir.as_ref().map(PathBuf::from),
    };
    match process.transport {
        TransportMode::PerCall => Arc::new(OneShotProcess::new(command)),
        TransportMode::Supervised => Arc::new(SupervisedProcess::new(command)),
    }
}

pub fn dispatcher_from_settings(
    settings: &WardenSettings,
    process: Arc<dyn AgentProcess>,
    monitor: Arc<Monitor>,
) -> Result<ProcessDispatcher, EngineError> {
    let fallback = FallbackPolicy::new(settings.process.profiles.clone())
        .ok_or_else(|| EngineError::Config("at least one execution profile is required".into()))?;
    let dispatch = &settings.dispatch;
    let config = DispatcherConfig {
        timeout: settings.process.timeout(),
        retry: RetryPolicy {
            max_timeout_retries: dispatch.max_timeout_retries,
        },
        breaker: BreakerConfig {
            failure_threshold: dispatch.circuit_failure_threshold,
            cooldown: dispatch.circuit_cooldown(),
            max_cooldown: dispatch.circuit_max_cooldown().max(dispatch.circuit_cooldown()),
        },
        rate_limit_interval: dispatch.rate_limit_interval(),
    };
    Ok(ProcessDispatcher::new(process, fallback, config, monitor))
}

/// Build the full stack: monitor, process transport, dispatcher, persisted session.
pub async fn orchestrator_from_settings(settings: &WardenSettings) -> Result<SessionOrchestrator, EngineError> {
    let monitor = Arc::new(monitor_from_settings(settings));
    let process = process_from_settings(settings);
    let dispatcher = dispatcher_from_settings(settings, process, monitor)?;

    let db_path = resolve_path(&settings.storage.database_path);
    let db = Database::open(&db_path)?;
    info!(
        transport = dispatcher.transport(),
        profiles = dispatcher.profiles().len(),
        db = %db_path.display(),
        "orchestrator configured"
    );

    let config = OrchestratorConfig::from_settings(&settings.session);
    Ok(SessionOrchestrator::with_store(dispatcher, config, SessionStateRepo::new(db)).await)
}
