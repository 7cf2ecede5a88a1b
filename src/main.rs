//! SmokeTrail - Network Latency Monitor
//!
//! Pings targets on a fixed cadence, traces their routes with mtr or
//! traceroute, and flags packet loss and latency spikes.

mod analysis;
mod config;
mod db;
mod engine;
mod parse;
mod probe;
mod scheduler;
mod web;

use config::ServerConfig;
use db::Store;
use engine::Engine;
use probe::SystemRunner;
use scheduler::Scheduler;
use web::Server;

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("smoketrail=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting SmokeTrail on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    if let Some(path) = &cfg.targets_file {
        let seeds = config::load_targets_file(path)?;
        let synced = store.sync_targets(&seeds)?;
        tracing::info!("Synced {} targets from {}", synced, path.display());
    }

    // Add sample target if none exist
    if store.get_targets()?.is_empty() {
        tracing::info!("Adding sample target: Google DNS");
        let mut target = db::Target {
            name: "Google DNS".to_string(),
            host: "8.8.8.8".to_string(),
            description: Some("Google Public DNS".to_string()),
            ..Default::default()
        };
        store.add_target(&mut target)?;
    }

    let engine = Arc::new(Engine::new(
        store,
        Arc::new(SystemRunner),
        cfg.probe_config(),
    ));

    // Start scheduler
    let scheduler = Arc::new(Scheduler::new(engine.clone(), cfg.schedule_config()));
    scheduler.start().await?;

    // Serve until a shutdown signal, then drain the probes
    let server = Server::new(cfg, engine);
    let served = server.start(shutdown_signal()).await;
    scheduler.shutdown().await;
    served
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}
