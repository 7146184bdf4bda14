//! Shogi Server
//!
//! Hosts two-player Shogi rooms. Clients talk JSON over the WebSocket at
//! `/ws`; every other path is served from the static client directory.

mod config;
mod error;
mod protocol;
mod session;
mod ws;

use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, routing::get, Json, Router};
use clap::Parser;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use config::Config;
use session::SessionManager;

#[derive(Serialize)]
struct HealthModel {
    status: String,
    rooms: usize,
}

async fn health(State(sessions): State<Arc<SessionManager>>) -> Json<HealthModel> {
    Json(HealthModel {
        status: "ok".to_string(),
        rooms: sessions.room_count(),
    })
}

fn app(sessions: Arc<SessionManager>, config: &Config) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(ws::ws_handler))
        .route("/health", get(health))
        .fallback_service(ServeDir::new(&config.static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(sessions)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install logger: {err}"))?;

    let addr = config.bind_addr()?;
    if !config.static_dir.is_dir() {
        warn!(dir = %config.static_dir.display(), "static directory not found, only /ws and /health will respond");
    }

    let sessions = Arc::new(SessionManager::new());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("Shogi server running on http://{addr}");

    axum::serve(listener, app(sessions, &config))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    Ok(())
}
