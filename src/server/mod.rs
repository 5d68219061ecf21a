//! HTTP server assembly.
//!
//! Builds the axum router over the shared application state and runs it
//! with graceful shutdown. All process-lifetime state (store handle,
//! dedup guard, broadcast registry, outbound notifier) is constructed
//! once here and passed by reference into the request handlers.

pub mod api;
pub mod events;
pub mod webhook;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::info;

use api::{AppState, SharedState};
use crate::config::BoardsyncConfig;
use crate::notify::Notifier;
use crate::store::{DbHandle, TaskDb};
use crate::sync::broadcast::BroadcastRegistry;
use crate::sync::dedup::DedupGuard;
use crate::sync::dispatcher::Dispatcher;

/// Build the full application router: task CRUD, live stream, webhook.
pub fn build_router(state: SharedState) -> Router {
    api::api_router()
        .route("/events", get(events::event_stream))
        .route(
            "/webhooks/board-events",
            get(webhook::webhook_probe).post(webhook::receive_board_event),
        )
        .with_state(state)
}

/// Wire up process-lifetime state from configuration.
pub fn build_state(db: DbHandle, config: &BoardsyncConfig) -> SharedState {
    let registry = Arc::new(BroadcastRegistry::new());
    let dedup = Arc::new(DedupGuard::default());
    let notifier = Notifier::from_config(config);
    let dispatcher = Dispatcher::new(db.clone(), dedup, registry.clone(), notifier.clone());
    Arc::new(AppState {
        db,
        registry,
        dispatcher,
        notifier,
        inbound_token: config.inbound_webhook_token.clone(),
    })
}

/// Start the boardsync server and block until shutdown.
pub async fn start_server(config: BoardsyncConfig) -> Result<()> {
    let db = TaskDb::new(&config.db_path).context("Failed to initialize task database")?;
    let state = build_state(DbHandle::new(db), &config);

    let mut app = build_router(state);
    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!("boardsync listening on http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("server shut down gracefully");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("shutting down");
}
