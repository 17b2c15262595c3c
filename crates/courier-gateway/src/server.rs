// SPDX-FileCopyrightText: 2026 Courier Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state for the gateway.

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use courier_config::model::ServerConfig;
use courier_core::CourierError;
use courier_service::Courier;

use crate::handlers;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    pub courier: Arc<Courier>,
}

/// Builds the gateway router with all routes and middleware.
pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/connect", post(handlers::post_connect))
        .route("/disconnect", post(handlers::post_disconnect))
        .route("/restart", post(handlers::post_restart))
        .route("/status/{account_id}", get(handlers::get_status))
        .route("/instances", get(handlers::get_instances))
        .route("/send/text", post(handlers::post_send_text))
        .route("/send/media", post(handlers::post_send_media))
        .route("/send/buttons", post(handlers::post_send_buttons))
        .route("/schedule", post(handlers::post_schedule))
        .route("/health", get(handlers::get_health))
        .route("/health/recover", post(handlers::post_recover))
        .route("/queue/pause", post(handlers::post_queue_pause))
        .route("/queue/resume", post(handlers::post_queue_resume))
        .route("/queue/retry", post(handlers::post_queue_retry))
        .route("/queue/stats", get(handlers::get_queue_stats))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Binds the configured address and serves until `cancel` fires.
pub async fn serve(
    config: &ServerConfig,
    courier: Arc<Courier>,
    cancel: CancellationToken,
) -> Result<(), CourierError> {
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .map_err(|e| CourierError::Transport {
            message: format!("failed to bind gateway to {addr}: {e}"),
            source: Some(Box::new(e)),
        })?;
    serve_listener(listener, courier, cancel).await
}

/// Serves on an already bound listener until `cancel` fires.
///
/// In-flight requests are allowed to finish before this returns.
pub async fn serve_listener(
    listener: TcpListener,
    courier: Arc<Courier>,
    cancel: CancellationToken,
) -> Result<(), CourierError> {
    if let Ok(local) = listener.local_addr() {
        tracing::info!(addr = %local, "gateway listening");
    }
    let app = router(GatewayState { courier });
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|e| CourierError::Transport {
            message: format!("gateway server error: {e}"),
            source: Some(Box::new(e)),
        })?;
    tracing::info!("gateway stopped");
    Ok(())
}
