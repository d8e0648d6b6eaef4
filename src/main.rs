use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::Level;
use warden_engine::orchestrator_from_settings;
use warden_server::{AppState, ServerConfig};
use warden_settings::{load_settings_with_preset, resolve_path, settings_path, Preset, TelemetrySettings};
use warden_telemetry::{init_telemetry, TelemetryConfig};

/// Serve a single-threaded agent CLI to many concurrent chat callers.
#[derive(Debug, Parser)]
#[command(name = "warden", version)]
struct Cli {
    /// Settings file. Defaults to `~/.warden/settings.json`.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Override the HTTP port.
    #[arg(long)]
    port: Option<u16>,
    /// Deployment preset: development, testing, staging or production.
    /// Takes precedence over `WARDEN_PRESET` and the file's `preset` key.
    #[arg(long)]
    preset: Option<Preset>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let path = cli.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_with_preset(&path, cli.preset).context("failed to load settings")?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }

    let telemetry = Arc::new(init_telemetry(telemetry_config(&settings.telemetry)));

    for warning in warden_settings::validate(&settings).context("invalid settings")? {
        tracing::warn!("{warning}");
    }

    let orchestrator = Arc::new(
        orchestrator_from_settings(&settings)
            .await
            .context("failed to start session orchestrator")?,
    );

    let config = ServerConfig::from_settings(&settings.server);
    let state = AppState::new(Arc::clone(&orchestrator), &config).with_telemetry(telemetry);
    let handle = warden_server::start(config, state)
        .await
        .context("failed to start server")?;

    tracing::info!(
        port = handle.port,
        transport = %orchestrator.dispatcher().transport(),
        preset = settings.preset.map(Preset::as_str),
        "warden ready"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    orchestrator.shutdown().await;
    Ok(())
}

fn telemetry_config(settings: &TelemetrySettings) -> TelemetryConfig {
    let module_levels = settings
        .module_levels
        .iter()
        .filter_map(|(module, level)| match level.parse::<Level>() {
            Ok(level) => Some((module.clone(), level)),
            Err(_) => {
                eprintln!("warden: ignoring unknown log level {level:?} for {module}");
                None
            }
        })
        .collect();
    TelemetryConfig {
        log_level: settings.log_level.parse().unwrap_or(Level::INFO),
        module_levels,
        log_to_sqlite: settings.log_to_sqlite,
        log_db_path: resolve_path(&settings.log_db_path),
    }
}
