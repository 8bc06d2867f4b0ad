//! Echo MCP Server
//!
//! Minimal fixture server for exercising the host over a real subprocess:
//! echo a message, sleep for a duration, or fail on demand.

mod server;

use rmcp::ServiceExt;

use server::EchoMcpServer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol; logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    tracing::info!("Starting echo MCP server");

    let service = EchoMcpServer::new().serve(rmcp::transport::stdio()).await?;
    service.waiting().await?;

    tracing::info!("Server shutting down");
    Ok(())
}
