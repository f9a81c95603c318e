// src/main.rs

use std::net::SocketAddr;
use std::time::Duration;

use color_eyre::eyre::{Result, WrapErr};
use tokio::net::TcpListener;
use tracing::info;

mod config;
mod core;
mod logging;
mod server;

use crate::config::Config;
use crate::core::scanner::BackendRegistry;
use crate::server::{AppState, create_router, spawn_maintenance};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    // --- Setup ---
    let config = Config::load().wrap_err("failed to load configuration")?;
    logging::initialize_logging(&config.logging)?;

    let registry = BackendRegistry::with_network_backends(&config)
        .wrap_err("failed to initialise probe backends")?;
    info!(
        backends = registry.len(),
        probes = ?config.assessment.enabled_probes,
        "Probe backends ready."
    );

    let state = AppState::new(&config, registry);
    if config.cache.sweep_interval_secs > 0 {
        spawn_maintenance(&state, Duration::from_secs(config.cache.sweep_interval_secs));
    }

    // --- Serve ---
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&addr)
        .await
        .wrap_err_with(|| format!("failed to bind {addr}"))?;
    info!(addr = %addr, "Listening.");

    axum::serve(
        listener,
        create_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .wrap_err("server error")?;

    info!("Shut down.");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutdown signal received."),
        // Without a handler the server runs until killed.
        Err(e) => {
            tracing::warn!(error = %e, "Could not install the Ctrl-C handler.");
            std::future::pending::<()>().await;
        }
    }
}
