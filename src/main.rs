//! LineGuard - extrusion line supervisor
//!
//! # Usage
//!
//! ```bash
//! # Run against the built-in PLC emulator
//! cargo run --release -- --simulate
//!
//! # Explicit config file, JSON logs, no database
//! ./lineguard --config /etc/lineguard/line_config.toml --log-json --offline
//! ```
//!
//! # Environment Variables
//!
//! - `LINEGUARD_CONFIG`: config file path (same as `--config`)
//! - `LINEGUARD_ADDR`: status server address (same as `--addr`)
//! - `RUST_LOG`: logging level (default: info)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use lineguard::acquisition::AcquisitionExit;
use lineguard::api::create_app;
use lineguard::config::{defaults, ConfigHandle, LineConfig};
use lineguard::pipeline::Pipeline;
use lineguard::plc::{PlcConnector, SimProfile, SimulatedConnector, SimulatedPlc};
use lineguard::storage::{
    open_database, EventSink, MemorySettingsStore, OfflineSink, SettingsStore,
};

const SIM_SCHEME: &str = "sim://";

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "lineguard")]
#[command(about = "Extrusion line supervision: PLC acquisition, defect windows and alarms")]
#[command(version)]
struct CliArgs {
    /// Line config file (TOML). Overrides the normal search order.
    #[arg(short, long, env = "LINEGUARD_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Drive the pipeline from the in-process PLC emulator
    #[arg(long)]
    simulate: bool,

    /// Seed for the emulator's noise and defect generator
    #[arg(long, requires = "simulate")]
    seed: Option<u64>,

    /// Run without the event/settings database
    #[arg(long)]
    offline: bool,

    /// Override the status server address (default: "0.0.0.0:8080")
    #[arg(short, long, env = "LINEGUARD_ADDR")]
    addr: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,

    /// Stop after this many consecutive failed PLC connection attempts
    #[arg(long, value_name = "N")]
    max_reconnect_failures: Option<u32>,
}

// ============================================================================
// Startup helpers
// ============================================================================

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .with_current_span(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    }
}

/// Resolve the config file, apply CLI overrides and validate the result.
fn load_config(args: &CliArgs) -> Result<ConfigHandle> {
    let (mut config, path) = match &args.config {
        Some(path) => {
            let config = LineConfig::load_from_file(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?;
            (config, Some(path.clone()))
        }
        None => LineConfig::load(),
    };

    if let Some(addr) = &args.addr {
        config.server.addr = addr.clone();
    }
    if let Some(limit) = args.max_reconnect_failures {
        config.acquisition.max_reconnect_failures = Some(limit);
    }
    if args.offline {
        config.storage.enabled = false;
    }
    if args.simulate && !config.plc.endpoint.starts_with(SIM_SCHEME) {
        config.plc.endpoint = format!("{SIM_SCHEME}{}", config.line.name);
    }

    config.validate().context("Invalid line configuration")?;

    let handle = ConfigHandle::new(config);
    Ok(match path {
        Some(p) => handle.with_path(p),
        None => handle,
    })
}

/// Open the database, falling back to offline backends when it is disabled
/// or unavailable. A missing database never stops the line.
fn open_storage(config: &ConfigHandle) -> (Arc<dyn EventSink>, Option<Arc<dyn SettingsStore>>) {
    let cfg = config.snapshot();
    let offline = || -> (Arc<dyn EventSink>, Option<Arc<dyn SettingsStore>>) {
        let settings: Arc<dyn SettingsStore> = Arc::new(MemorySettingsStore::new());
        (Arc::new(OfflineSink), Some(settings))
    };

    if !cfg.storage.enabled {
        info!("Storage disabled, running offline");
        return offline();
    }

    match open_database(&cfg.storage.path) {
        Ok((events, settings)) => {
            let settings: Arc<dyn SettingsStore> = Arc::new(settings);
            (Arc::new(events), Some(settings))
        }
        Err(e) => {
            warn!(path = %cfg.storage.path, error = %e, "Database unavailable, alarm events will not be stored");
            offline()
        }
    }
}

/// Activate the stored recipe named in config, or the most recent one.
fn restore_recipe(config: &ConfigHandle, settings: &dyn SettingsStore) {
    let wanted = config.snapshot().storage.recipe_id;
    let stored = match wanted {
        Some(id) => settings.load(id).map(Some),
        None => settings.latest(),
    };

    match stored {
        Ok(Some(recipe)) => {
            let name = recipe.name.clone();
            let id = recipe.settings_id;
            match config.set_recipe(recipe) {
                Ok(_) => info!(name = %name, settings_id = ?id, "Restored stored recipe"),
                Err(e) => warn!(error = %e, "Stored recipe is invalid, keeping configured recipe"),
            }
        }
        Ok(None) => info!("No stored recipe, using configured recipe"),
        Err(e) => warn!(recipe_id = ?wanted, error = %e, "Failed to load stored recipe"),
    }
}

fn build_connector(config: &LineConfig, seed: Option<u64>) -> Result<Box<dyn PlcConnector>> {
    if !config.plc.endpoint.starts_with(SIM_SCHEME) {
        bail!(
            "No PLC driver for endpoint '{}'; only {}<name> endpoints are supported",
            config.plc.endpoint,
            SIM_SCHEME
        );
    }
    let profile = SimProfile {
        speed_m_per_min: config.production.speed_m_per_min,
        ..SimProfile::default()
    };
    let profile = if config.recipe.preset_diameter > 0.0 {
        SimProfile {
            nominal_diameter: config.recipe.preset_diameter,
            ..profile
        }
    } else {
        profile
    };
    let seed = seed.unwrap_or_else(rand::random);
    info!(endpoint = %config.plc.endpoint, seed, "Using PLC emulator");
    Ok(Box::new(SimulatedConnector::new(SimulatedPlc::new(profile, seed))))
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse();
    init_tracing(args.log_json);

    let config = load_config(&args)?;
    let cfg = config.snapshot();
    info!(
        line = %cfg.line.name,
        endpoint = %cfg.plc.endpoint,
        recipe = %cfg.recipe.name,
        "LineGuard starting"
    );

    let (events, settings) = open_storage(&config);
    if let Some(store) = &settings {
        restore_recipe(&config, store.as_ref());
    }

    let connector = build_connector(&config.snapshot(), args.seed)?;
    let mut pipeline = Pipeline::start(config.clone(), connector, events, settings)
        .context("Failed to start pipeline")?;

    let listener = match tokio::net::TcpListener::bind(&cfg.server.addr).await {
        Ok(listener) => listener,
        Err(e) => {
            pipeline
                .shutdown(Duration::from_millis(defaults::SHUTDOWN_JOIN_TIMEOUT_MS))
                .await;
            return Err(e).with_context(|| format!("Failed to bind to {}", cfg.server.addr));
        }
    };
    info!(addr = %cfg.server.addr, "Status server listening");

    let server_cancel = CancellationToken::new();
    let app = create_app(pipeline.handles());
    let server = tokio::spawn({
        let cancel = server_cancel.clone();
        async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { cancel.cancelled().await })
                .await
        }
    });

    let acquisition_exit = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            None
        }
        exit = pipeline.acquisition_finished() => {
            error!(?exit, "Acquisition stopped, shutting down");
            Some(exit)
        }
    };

    server_cancel.cancel();
    let report = pipeline
        .shutdown(Duration::from_millis(defaults::SHUTDOWN_JOIN_TIMEOUT_MS))
        .await;

    match server.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!(error = %e, "Status server error"),
        Err(e) => warn!(error = %e, "Status server task failed"),
    }

    info!(?report, "LineGuard shutdown complete");
    if let Some(AcquisitionExit::ConnectivityLost { attempts }) = acquisition_exit {
        bail!("PLC unreachable after {attempts} connection attempts");
    }
    Ok(())
}
