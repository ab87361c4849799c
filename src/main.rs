// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/triggercalc

//! TriggerCalc - Event-Triggered Calculation Engine
//!
//! Watches a historian for updates to trigger attributes and writes the
//! derived moles and molar flow rate for every configured context.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use triggercalc::{Config, Engine, Historian, SqliteHistorian, NAME, VERSION};

/// TriggerCalc - Event-Triggered Calculation Engine
#[derive(Parser, Debug)]
#[command(name = "triggercalc")]
#[command(author = "TriggerCalc Project")]
#[command(version = VERSION)]
#[command(about = "Event-triggered calculations over cached historian data")]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace-level logging
    #[arg(long)]
    trace: bool,

    /// Demo mode with simulated sensors
    #[arg(long)]
    demo: bool,

    /// Historian database path
    #[arg(long)]
    historian: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.trace {
        Level::TRACE
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(args.debug)
        .with_line_number(args.debug)
        .with_ansi(true)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("{} v{}", NAME, VERSION);

    // Load or create configuration
    let config_path = args.config.unwrap_or_else(Config::default_path);
    let mut config = Config::load_or_create(&config_path)?;

    // Override with command line args
    if let Some(path) = args.historian {
        config.historian.path = path;
    }

    info!("Configuration loaded from {:?}", config_path);
    info!("Demo mode: {}", args.demo);

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(run(config, args.demo))
}

async fn run(config: Config, demo: bool) -> Result<()> {
    let historian = Arc::new(SqliteHistorian::open(&config.historian)?);

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let simulator = if demo {
        let sim = triggercalc::sensors::seed_demo(
            historian.clone(),
            &config.calculation,
            config.simulator.clone(),
        )?;
        Some(tokio::spawn(sim.run(shutdown_tx.subscribe())))
    } else {
        None
    };

    let engine_historian: Arc<dyn Historian> = historian.clone();
    let mut engine = Engine::start(config, engine_historian, historian.as_ref()).await?;

    info!("{} running with contexts {:?}", NAME, engine.contexts());
    info!("   Press Ctrl+C to shutdown");

    let engine_shutdown = shutdown_tx.subscribe();
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, cleaning up...");
                let _ = signal_tx.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    });

    let result = engine.run(engine_shutdown).await;

    // Stop the demo feed as well when the engine fails on its own.
    let _ = shutdown_tx.send(());
    if let Some(handle) = simulator {
        match handle.await {
            Ok(Err(e)) => error!("Sensor simulator failed: {}", e),
            Err(e) => error!("Sensor simulator task failed: {}", e),
            Ok(Ok(())) => {}
        }
    }

    info!("{} shutdown complete", NAME);
    result
}
