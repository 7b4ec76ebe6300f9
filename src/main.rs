//! PTZ control daemon

use anyhow::{Context, Result};
use clap::Parser;
use ptz_tally_control::config::Config;
use ptz_tally_control::control::{server, ControlContext, ControlSettings};
use ptz_tally_control::store::JsonPositionStore;
use ptz_tally_control::{web, Camera, RelayRouter, RelayTarget};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "ptz-control")]
#[command(about = "VISCA PTZ camera control with tally-driven relay routing")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    info!("PTZ control starting");
    info!(config_path = %cli.config, "Loading configuration");

    let config = Config::load(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config))?;

    info!(
        cameras = config.cameras.len(),
        ptz = config.ptz_count(),
        tally = config.tally.enabled,
        relay = config.relay.enabled,
        "Configuration loaded"
    );

    let cameras: Vec<Arc<Camera>> = config
        .camera_addrs()
        .into_iter()
        .enumerate()
        .map(|(index, addr)| {
            Arc::new(Camera::with_memory_speed(index, addr, config.visca.memory_speed))
        })
        .collect();

    let store = JsonPositionStore::open(&config.store.path, config.ptz_count(), config.store.buttons)
        .context("failed to open position store")?;

    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let relay_target = RelayTarget::new();
    let mut ctx = ControlContext::new(
        cameras,
        ControlSettings::from_config(&config),
        Arc::new(store),
        relay_target.clone(),
    );

    // Relay bind failure aborts startup
    let mut tasks = vec![];
    if config.relay.enabled {
        let router = RelayRouter::bind(config.relay.bind, relay_target).await?;
        ctx = ctx.with_relay_counters(router.counters());
        tasks.push(tokio::spawn(router.run(shutdown_rx.clone())));
    }

    let ctx = Arc::new(ctx);
    ctx.start_tally().await;

    let bind_ip = &config.server.bind_ip;
    let control_listener = TcpListener::bind((bind_ip.as_str(), config.server.control_port))
        .await
        .context("failed to bind control server")?;
    let web_listener = TcpListener::bind((bind_ip.as_str(), config.server.web_port))
        .await
        .context("failed to bind status server")?;

    {
        let ctx = Arc::clone(&ctx);
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = server::run_control_server(ctx, control_listener, shutdown).await {
                error!(error = %e, "Control server failed");
            }
        }));
    }
    {
        let ctx = Arc::clone(&ctx);
        let shutdown = shutdown_rx.clone();
        tasks.push(tokio::spawn(async move {
            if let Err(e) = web::run_status_server(ctx, web_listener, shutdown).await {
                error!(error = %e, "Status server failed");
            }
        }));
    }

    // Wait for Ctrl+C
    info!("PTZ control running, press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    let _ = shutdown_tx.send(());
    ctx.stop_tally().await;
    for task in tasks {
        let _ = task.await;
    }

    Ok(())
}
