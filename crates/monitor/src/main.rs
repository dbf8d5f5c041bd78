//! usb-monitor
//!
//! Watches USB attach/detach activity and keeps an inventory of every device
//! seen since startup. The inventory is served as a text report on a Unix
//! socket.

use anyhow::{Context, Result};
use clap::Parser;
use common::{WorkerBridge, WorkerEvent, setup_logging};
use inventory::{DispatchOutcome, EngineConfig, InventoryEngine, ReportRenderer};
use monitor::{EnumerationSource, MonitorConfig, ReportServer, UsbEventSource, query_report};
use std::path::PathBuf;
use tokio::signal;
use tracing::{debug, error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "usb-monitor")]
#[command(author, version, about = "USB activity monitor - inventory of attached devices")]
#[command(long_about = "
Tracks USB devices as they are attached and detached and keeps a running
inventory, including devices that have since been removed. The inventory is
served as a text report on a Unix domain socket.

EXAMPLES:
    # Run the monitor with default config
    usb-monitor

    # Print the report of a running monitor
    usb-monitor --query

    # Print the devices attached right now and exit
    usb-monitor --once

    # Run with debug logging
    usb-monitor --log-level debug

CONFIGURATION:
    The monitor looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/usb-monitor/monitor.toml
    3. /etc/usb-monitor/monitor.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Enumerate attached devices, print one report and exit
    #[arg(long, conflicts_with = "query")]
    once: bool,

    /// Print the report of a running monitor and exit
    #[arg(long)]
    query: bool,

    /// Report socket path (overrides the configured one)
    #[arg(short, long, value_name = "PATH")]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.save_config {
        let config = MonitorConfig::default();
        let path = MonitorConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let config = match args.config {
        Some(ref path) => MonitorConfig::load(Some(path.clone())),
        None => MonitorConfig::load_or_default(),
    }
    .context("Failed to load configuration")?;

    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.monitor.log_level);

    setup_logging(log_level).context("Failed to setup logging")?;

    let socket_path = match args.socket {
        Some(ref path) => monitor::config::expand_path(path),
        None => config.socket_path(),
    };

    if args.query {
        let report = query_report(&socket_path).await?;
        print!("{}", report);
        return Ok(());
    }

    let engine_config = config
        .engine_config()
        .context("Invalid inventory configuration")?;

    if args.once {
        return print_once(engine_config, config.report.include_stats);
    }

    info!("usb-monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("Log level: {}", log_level);

    run_monitor(engine_config, socket_path, config.report.include_stats).await
}

/// Enumerate the bus once and print the report
fn print_once(engine_config: EngineConfig, include_stats: bool) -> Result<()> {
    let mut engine = InventoryEngine::new(engine_config, EnumerationSource);
    engine
        .initialize()
        .context("Failed to enumerate USB devices")?;

    print!("{}", engine.report(include_stats));
    engine.shutdown();
    Ok(())
}

/// Run until Ctrl+C, serving reports on `socket_path`
async fn run_monitor(
    engine_config: EngineConfig,
    socket_path: PathBuf,
    include_stats: bool,
) -> Result<()> {
    let mut engine = InventoryEngine::new(engine_config, UsbEventSource::new());

    // Registration waits for the hotplug worker to come up
    let dispatcher = tokio::task::block_in_place(|| engine.initialize())
        .context("Failed to initialize inventory engine")?;

    let mut renderer = ReportRenderer::new(dispatcher.store().clone());
    if include_stats {
        renderer = renderer.with_counters(dispatcher.counters().clone());
    }
    drop(dispatcher);

    let bridge = engine.source().bridge();
    let event_log = bridge.clone().map(|bridge| tokio::spawn(log_worker_events(bridge)));

    let result = match ReportServer::bind(&socket_path, renderer).await {
        Ok(server) => {
            info!("Press Ctrl+C to shutdown");
            server
                .run(async {
                    match signal::ctrl_c().await {
                        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
                    }
                })
                .await
        }
        Err(e) => Err(e),
    };

    if let Some(bridge) = bridge {
        match bridge.status().await {
            Ok(status) => info!(
                "Hotplug worker handled {} notices in {} iterations ({} deferred pending)",
                status.notices, status.ticks, status.pending_deferred
            ),
            Err(e) => warn!("Hotplug worker status unavailable: {}", e),
        }
    }

    info!("Shutting down inventory engine...");
    tokio::task::block_in_place(|| engine.shutdown());

    if let Some(handle) = event_log {
        handle.abort();
    }

    info!("Monitor shutdown complete");
    result
}

/// Log what the hotplug worker did with each notice
async fn log_worker_events(bridge: WorkerBridge) {
    while let Ok(event) = bridge.recv_event().await {
        match event {
            WorkerEvent::Dispatched { kind, key, outcome } => {
                let device = key.map_or_else(|| "unidentified device".to_string(), |k| k.to_string());
                match outcome {
                    DispatchOutcome::Inserted(handle) => {
                        info!("Connected: {} (record {})", device, handle.0)
                    }
                    DispatchOutcome::Disconnected(handle) => {
                        info!("Disconnected: {} (record {})", device, handle.0)
                    }
                    DispatchOutcome::Rejected(e) => info!("Not tracked: {}: {}", device, e),
                    DispatchOutcome::Dropped(e) => warn!("Dropped {:?} for {}: {}", kind, device, e),
                    other => debug!("{:?} for {}: {:?}", kind, device, other),
                }
            }
            WorkerEvent::Stopped => break,
            WorkerEvent::Ready { .. } | WorkerEvent::Failed { .. } => {}
        }
    }
}
