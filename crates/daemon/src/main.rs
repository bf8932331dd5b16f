//! syncod: the sync daemon
//!
//! Serves the control API, runs jobs, and shuts down on SIGINT or
//! `POST /stop`.

use std::sync::Arc;

use clap::Parser;
use color_eyre::Result;
use tokio::sync::watch;
use tracing::info;

use synco_core::{config::synco_dir, Config};
use synco_daemon::{router, ApiState, JobManager, MemoryStore};

#[derive(Parser)]
#[command(name = "syncod")]
#[command(version)]
#[command(about = "Multi-directional file synchronization daemon")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Override the control API port
    #[arg(long)]
    daemon_port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let mut config = Config::load()?;
    if let Some(port) = cli.daemon_port {
        config.daemon_port = port;
    }

    let state_dir = synco_dir()?;
    let store = Arc::new(MemoryStore::new());
    let manager = Arc::new(JobManager::new(
        config.clone(),
        &state_dir,
        store.clone(),
        store.clone(),
    )?);

    info!(node_id = manager.node_id(), "daemon node ready");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let api_state = ApiState {
        manager: Arc::clone(&manager),
        job_store: store.clone(),
        history: store,
        shutdown: shutdown_tx,
    };

    let addr = format!("0.0.0.0:{}", config.daemon_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "daemon server started");

    let server = axum::serve(listener, router(api_state)).with_graceful_shutdown(async move {
        tokio::select! {
            _ = shutdown_rx.changed() => info!("stop requested"),
            _ = tokio::signal::ctrl_c() => info!("interrupt received"),
        }
    });

    server.await?;

    manager.stop_all();
    info!("daemon stopped");
    Ok(())
}
