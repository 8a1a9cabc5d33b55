//! Nixie coordinator server
//!
//! Standalone binary hosting the writable and read-only websocket endpoints.

use anyhow::Context;
use clap::Parser;
use nixie_core::constants::NODE_EXPIRED_MS_DEFAULT;
use nixie_core::telemetry::{init_telemetry, TelemetryConfig};
use nixie_proto::GroupSecret;
use nixie_server::{CoordinatorHandler, ServerConfig};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Partition-assignment coordinator for worker fleets
#[derive(Parser, Debug)]
#[command(name = "nixie-serverd")]
#[command(about = "Partition-assignment coordinator for worker fleets")]
#[command(version)]
struct Cli {
    /// Websocket bind address
    #[arg(short, long, default_value = "0.0.0.0:8765")]
    bind: SocketAddr,

    /// Grace period before a disconnected node is removed, in milliseconds
    #[arg(long, default_value_t = NODE_EXPIRED_MS_DEFAULT)]
    node_expired_ms: u64,

    /// JSON file mapping group names to {"write": "...", "read": "..."}
    /// secret pairs; omitting it disables auth
    #[arg(long)]
    secrets: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_telemetry(TelemetryConfig::new("nixie-serverd"))?;

    let mut config = ServerConfig::new()
        .with_node_expired_duration(Duration::from_millis(cli.node_expired_ms));
    if let Some(path) = cli.secrets.as_ref() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading secrets file {}", path.display()))?;
        let secrets: HashMap<String, GroupSecret> =
            serde_json::from_str(&raw).context("parsing secrets file")?;
        config = config.with_group_secrets(secrets);
    }

    let handler = CoordinatorHandler::new(config);
    let router = handler.router();

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("binding {}", cli.bind))?;
    tracing::info!(addr = %cli.bind, "listening");

    let shutdown_handler = handler.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
            shutdown_handler.shutdown();
        })
        .await
        .context("serving websocket endpoints")?;

    Ok(())
}
