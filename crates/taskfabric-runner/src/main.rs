// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Taskfabric Runner - executes function calls engaged over QUIC

use std::sync::Arc;

use anyhow::Result;
use tracing::{error, info};

use taskfabric_runner::config::Config;
use taskfabric_runner::server::{self, RunnerState};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("taskfabric_runner=info".parse().unwrap()),
        )
        .init();

    info!("Starting Taskfabric Runner");

    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        addr = %config.bind_addr,
        engine = ?config.engine,
        max_concurrent_calls = config.max_concurrent_calls,
        slot_timeout_ms = config.slot_timeout.as_millis() as u64,
        "Configuration loaded"
    );

    let agent = taskfabric_runner::agent::from_config(&config)?;
    let state = Arc::new(RunnerState::new(agent));
    let server = Arc::new(server::create_server(&config)?);

    let server_task = {
        let server = server.clone();
        let state = state.clone();
        tokio::spawn(async move {
            if let Err(e) = server::run_runner_server(server, state).await {
                error!("Runner QUIC server error: {}", e);
            }
        })
    };

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!(active = state.inflight.current(), "Shutting down...");

    server.close();
    if let Err(e) = server_task.await {
        error!("Runner server task failed: {}", e);
    }

    info!("Shutdown complete");
    Ok(())
}
