//! HTTP and WebSocket surface over a [`Kaizen`] instance.
//!
//! | Module | Responsibility                                     |
//! |--------|----------------------------------------------------|
//! | `api`  | JSON route handlers, `AppState`, error mapping     |
//! | `ws`   | `/ws` event stream with ping/pong keepalive        |

pub mod api;
pub mod ws;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

use crate::app::Kaizen;
pub use api::{AppState, SCOPE_HEADER, SharedState, api_router};

/// How long shutdown waits for running sessions to stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub default_scope: String,
    pub default_max_iterations: u32,
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4141,
            default_scope: "default".to_string(),
            default_max_iterations: 10,
            cors: false,
        }
    }
}

/// Build the full application router with API and WebSocket routes.
pub fn build_router(state: SharedState) -> Router {
    let ws_tx = state.kaizen.events.sender();

    api::api_router()
        .route(
            "/ws",
            get(move |ws_upgrade| ws::ws_handler(ws_upgrade, ws_tx)),
        )
        .with_state(state)
}

/// Serve until Ctrl-C, then stop every running session before returning.
pub async fn start_server(kaizen: Arc<Kaizen>, config: ServerConfig) -> Result<()> {
    let state = Arc::new(AppState {
        kaizen: kaizen.clone(),
        default_scope: config.default_scope.clone(),
        default_max_iterations: config.default_max_iterations,
    });

    let mut app = build_router(state);
    if config.cors {
        app = app.layer(CorsLayer::permissive());
    }

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "Kaizen server listening");
    println!("Kaizen running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    match tokio::time::timeout(SHUTDOWN_GRACE, kaizen.sessions.stop_all()).await {
        Ok(stopped) => info!(sessions = stopped.len(), "Stopped running sessions"),
        Err(_) => warn!("Timed out waiting for sessions to stop"),
    }
    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
