use anyhow::Context;
use clap::Parser;
use dune_mcp::{
    bootstrap::DEFAULT_FILTER,
    init_tracing,
    transport::{MCP_PATH, SSE_PATH},
    Cli, DuneClient, McpHttpServer, McpServer, ServerConfig, TokenAuthLayer, TransportMode,
};
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(DEFAULT_FILTER);

    let config = ServerConfig::from_env().context("invalid configuration")?;
    let client = DuneClient::new(&config.dune_api_url, config.dune_api_key.clone())
        .context("invalid DUNE_API_URL")?;
    if !client.has_api_key() {
        tracing::warn!("DUNE_API_KEY is not set, tool calls will fail");
    }
    let server = McpServer::new(client);

    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_interrupt(shutdown.clone()));

    tracing::info!(mode = %cli.mode, "starting Dune Analytics MCP server");
    match cli.mode {
        TransportMode::Http => serve_http(server, &config, shutdown).await?,
        TransportMode::Stdio => {
            dune_mcp::serve_stdio(server, shutdown.clone())
                .await
                .context("stdio transport failed")?;
            if shutdown.is_cancelled() {
                // The blocking stdin reader would keep the runtime alive.
                tracing::info!("server stopped");
                std::process::exit(0);
            }
        }
    }

    tracing::info!("server stopped");
    Ok(())
}

async fn serve_http(
    handler: McpServer,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let server = McpHttpServer::new(handler).with_shutdown(shutdown.clone());

    let mut app = server.router();
    if let Some(token) = &config.auth_token {
        tracing::info!("HTTP authentication enabled");
        app = app.layer(TokenAuthLayer::new(token.clone()));
    }
    let app = app
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    tracing::info!(
        "listening on http://{addr} (streamable: {MCP_PATH}, legacy SSE: {SSE_PATH})"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .context("HTTP server failed")?;
    server.shutdown();
    Ok(())
}

async fn cancel_on_interrupt(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("interrupt received, shutting down");
            shutdown.cancel();
        }
        Err(error) => tracing::error!(%error, "failed to listen for Ctrl-C"),
    }
}
