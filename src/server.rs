//! MCP server initialization for stdio and SSE transports.
//!
//! Provides [`serve_stdio`] and [`serve_sse`] entry points that wire one shared
//! [`TraitMatcher`] into the MCP tool handler.

use crate::tools::TraitSenseTools;
use anyhow::{Context, Result};
use rmcp::ServiceExt;
use std::sync::Arc;
use traitsense::config::TraitSenseConfig;
use traitsense::TraitMatcher;

/// Shared setup: start the matcher and begin initializing it in the background.
/// The first tool call joins the startup if it is still running.
fn setup_shared_state(config: TraitSenseConfig) -> Result<(TraitMatcher, Arc<TraitSenseConfig>)> {
    let matcher = TraitMatcher::from_config(&config).context("failed to start matcher")?;

    let warm = matcher.clone();
    tokio::spawn(async move {
        match warm.ensure_ready(None).await {
            Ok(()) => tracing::info!("trait matcher warmed up"),
            Err(e) => tracing::warn!(error = %e, "warm-up failed, will retry on first request"),
        }
    });

    Ok((matcher, Arc::new(config)))
}

/// Start the MCP server over stdio transport.
pub async fn serve_stdio(config: TraitSenseConfig) -> Result<()> {
    tracing::info!("starting TraitSense MCP server on stdio");

    let (matcher, config) = setup_shared_state(config)?;

    let tools = TraitSenseTools::new(matcher, config);
    let transport = rmcp::transport::stdio();

    let server = tools.serve(transport).await?;
    tracing::info!("MCP server running, waiting for client");

    server.waiting().await?;
    tracing::info!("MCP server shut down");

    Ok(())
}

/// Start the MCP server over Streamable HTTP (SSE) transport.
pub async fn serve_sse(config: TraitSenseConfig) -> Result<()> {
    let host = config.server.host.clone();
    let port = config.server.port;
    let bind_addr = format!("{host}:{port}");

    tracing::info!(addr = %bind_addr, "starting TraitSense MCP server on SSE/HTTP");

    let (matcher, config) = setup_shared_state(config)?;

    let service = rmcp::transport::streamable_http_server::StreamableHttpService::new(
        move || Ok(TraitSenseTools::new(matcher.clone(), config.clone())),
        rmcp::transport::streamable_http_server::session::local::LocalSessionManager::default()
            .into(),
        Default::default(),
    );

    let router = axum::Router::new().nest_service("/mcp", service);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(addr = %bind_addr, "MCP server listening at http://{bind_addr}/mcp");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down SSE server");
        })
        .await?;

    Ok(())
}
