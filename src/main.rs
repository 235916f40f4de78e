//! Entry point for the devbridge-gateway MCP server.
//!
//! Initializes tracing (to stderr, so it doesn't interfere with MCP stdio
//! transport), creates the server, and serves on stdin/stdout.

use anyhow::Result;
use devbridged::server::GatewayServer;
use rmcp::{ServiceExt, transport::stdio};
use tracing_subscriber::{self, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing to stderr (stdout is used for MCP JSON-RPC).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!(
        "starting devbridge-gateway MCP server v{}",
        env!("CARGO_PKG_VERSION")
    );

    let server = GatewayServer::new().await;
    server.housekeeping().await.map_err(|e| anyhow::anyhow!(e))?;
    let shutdown_handle = server.clone();

    let service = server.serve(stdio()).await.inspect_err(|e| {
        tracing::error!("serving error: {:?}", e);
    })?;

    service.waiting().await?;
    shutdown_handle.request_shutdown();
    tracing::info!("devbridge-gateway server shut down");
    Ok(())
}
