// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `courier serve`: wires the production adapters and runs until a signal.

use std::sync::Arc;

use tracing::{error, info};

use courier_bridge::BridgeConnector;
use courier_config::CourierConfig;
use courier_core::CourierError;
use courier_service::{Courier, CourierDeps};
use courier_storage::{Database, FileSessionStore};

use crate::shutdown;

/// Runs the `courier serve` command.
///
/// Initialization failures are returned before any listener is bound; the
/// caller exits non-zero on error.
pub async fn run_serve(config: CourierConfig) -> Result<(), CourierError> {
    init_tracing(&config.logging.level);
    info!(version = env!("CARGO_PKG_VERSION"), "starting courier serve");

    let database = Arc::new(Database::open(&config.storage).await?);
    let deps = CourierDeps {
        store: Arc::new(FileSessionStore::new(config.sessions.auth_dir.clone())),
        connector: Arc::new(BridgeConnector::new(config.bridge.clone())),
        database,
    };
    let courier = Arc::new(Courier::new(config.clone(), deps));
    if let Err(e) = courier.initialize().await {
        error!(error = %e, "initialization failed");
        return Err(e);
    }

    let cancel = shutdown::install_signal_handler();

    let outcome = if config.server.enabled {
        courier_gateway::serve(&config.server, courier.clone(), cancel.clone()).await
    } else {
        info!("HTTP server disabled; waiting for shutdown signal");
        cancel.cancelled().await;
        Ok(())
    };
    if let Err(e) = &outcome {
        error!(error = %e, "gateway server failed");
    }

    courier.dispose().await;
    info!("courier stopped");
    outcome
}

fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("courier={log_level},tower_http={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
