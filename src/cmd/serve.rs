//! HTTP/WebSocket server command (`kaizen serve`).

use std::sync::Arc;

use anyhow::Result;
use kaizen::app::Kaizen;
use kaizen::config::KaizenConfig;
use kaizen::server::{ServerConfig, start_server};

pub async fn cmd_serve(config: &KaizenConfig, port: Option<u16>, dev: bool) -> Result<()> {
    let kaizen = Arc::new(Kaizen::open(config).await?);

    start_server(
        kaizen,
        ServerConfig {
            host: config.toml.server.host.clone(),
            port: port.unwrap_or(config.toml.server.port),
            default_scope: config.toml.engine.scope.clone(),
            default_max_iterations: config.toml.engine.default_max_iterations,
            cors: dev,
        },
    )
    .await
}
