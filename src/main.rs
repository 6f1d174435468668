//! cec-gw - HDMI-CEC control gateway
//!
//! Opens the configured CEC adapters, polls device state into named
//! events, and dispatches actions from the interactive console.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cec_gw::backend::mock::{MockCecBackend, SIMULATED_PORT};
use cec_gw::backend::CecBackend;
use cec_gw::cli;
use cec_gw::config::{default_config_path, watcher::ConfigWatcher, AdapterConfig, AppConfig};
use cec_gw::events::{ChannelSink, EventKind};
use cec_gw::registry::AdapterRegistry;

/// CEC gateway - bridge Pulse-Eight HDMI-CEC adapters to automation events
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Also append logs to this file
    #[arg(long)]
    log_file: Option<PathBuf>,

    /// List detected CEC adapters and exit
    #[arg(long)]
    list_adapters: bool,

    /// Run against a simulated CEC bus instead of real hardware
    #[arg(long)]
    simulate: bool,

    /// Start the interactive action console
    #[arg(long)]
    console: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let args = Args::parse();
    let _log_guard = init_logging(&args.log_level, args.log_file.as_deref())?;

    info!("Starting cec-gw...");

    let (backend, mock) = select_backend(args.simulate)?;

    if args.list_adapters {
        return list_adapters(backend.as_ref()).await;
    }

    // Load configuration; simulate mode synthesizes one when no file
    // is present so the gateway runs out of the box.
    let config_path = args.config.clone().unwrap_or_else(default_config_path);
    let (config, mut watcher) = if args.simulate && !config_path.exists() {
        info!("no config file at {}, using the simulated adapter", config_path.display());
        let config = AppConfig {
            adapters: vec![simulated_adapter()],
        };
        (config, None)
    } else {
        let config = AppConfig::load(&config_path).await?;
        let watcher = match ConfigWatcher::new(&config_path) {
            Ok(watcher) => Some(watcher),
            Err(e) => {
                warn!("config hot-reload disabled: {e:#}");
                None
            }
        };
        (config, watcher)
    };

    // Event pipeline: poll loops and debouncers feed this channel.
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let sink = Arc::new(ChannelSink::new(event_tx));
    let registry = Arc::new(AdapterRegistry::new(Arc::clone(&backend), sink));

    registry
        .open_all(&config.adapters)
        .await
        .context("gateway startup failed")?;

    let _simulation = mock.map(|mock| mock.spawn_simulation(SIMULATED_PORT));

    let mut console: Option<JoinHandle<Result<()>>> = args
        .console
        .then(|| tokio::spawn(cli::run_console(Arc::clone(&registry))));

    info!("cec-gw running; press Ctrl-C to stop");

    loop {
        tokio::select! {
            Some(event) = event_rx.recv() => {
                let phase = match event.kind {
                    EventKind::Discrete => "",
                    EventKind::EnduringStart => " (start)",
                    EventKind::EnduringEnd => " (end)",
                };
                info!("event: {}{}", event.full_name(), phase);
            }

            Some(new_config) = next_config(&mut watcher) => {
                info!("configuration changed, reopening adapters...");
                if let Err(e) = registry.apply_config(&new_config.adapters).await {
                    error!("reload left no adapters open, stopping: {e}");
                    break;
                }
            }

            outcome = wait_console(&mut console), if console.is_some() => {
                if let Err(e) = outcome {
                    error!("console failed: {e:#}");
                }
                info!("console closed, shutting down");
                console = None;
                break;
            }

            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    if let Some(console) = console {
        console.abort();
    }
    registry.close_all().await;
    info!("cec-gw shutdown complete");
    Ok(())
}

/// Pick the mock bus under --simulate, the libCEC backend otherwise.
fn select_backend(simulate: bool) -> Result<(Arc<dyn CecBackend>, Option<Arc<MockCecBackend>>)> {
    if simulate {
        let mock = MockCecBackend::simulated();
        return Ok((Arc::clone(&mock) as Arc<dyn CecBackend>, Some(mock)));
    }
    native_backend().map(|backend| (backend, None))
}

#[cfg(feature = "libcec")]
fn native_backend() -> Result<Arc<dyn CecBackend>> {
    Ok(Arc::new(cec_gw::backend::libcec::LibCecBackend::new()))
}

#[cfg(not(feature = "libcec"))]
fn native_backend() -> Result<Arc<dyn CecBackend>> {
    anyhow::bail!(
        "this build has no libCEC support; rebuild with `--features libcec` or run with --simulate"
    )
}

async fn list_adapters(backend: &dyn CecBackend) -> Result<()> {
    let adapters = backend
        .detect_adapters()
        .await
        .context("adapter detection failed")?;
    if adapters.is_empty() {
        println!("No CEC adapters found.");
    }
    for info in adapters {
        println!(
            "{}  (vid {:04x}, pid {:04x})",
            info.port, info.vendor_id, info.product_id
        );
    }
    Ok(())
}

fn simulated_adapter() -> AdapterConfig {
    AdapterConfig::new(SIMULATED_PORT, "Simulator")
}

/// Select-friendly wrapper: pending forever when hot-reload is off.
async fn next_config(watcher: &mut Option<ConfigWatcher>) -> Option<AppConfig> {
    match watcher {
        Some(watcher) => watcher.next_config().await,
        None => std::future::pending().await,
    }
}

/// Select-friendly wrapper over the optional console task.
async fn wait_console(console: &mut Option<JoinHandle<Result<()>>>) -> Result<()> {
    match console.as_mut() {
        Some(handle) => match handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(anyhow::anyhow!("console task panicked: {e}")),
        },
        None => std::future::pending().await,
    }
}

fn init_logging(
    level: &str,
    log_file: Option<&Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file: {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stdout_layer)
                .init();
            Ok(None)
        }
    }
}
