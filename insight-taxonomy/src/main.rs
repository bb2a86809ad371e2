//! insight-taxonomy - conversation insight taxonomy service
//!
//! Samples conversations from a conversation store, extracts structured
//! features through a classification oracle, and builds a two-level
//! category taxonomy over them. Exposes each phase and the orchestrated
//! pipeline over HTTP, with progress streamed as SSE.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use insight_common::config::{
    self, resolve_api_key, RootFolderInitializer, RootFolderResolver, ORACLE_KEY_ENV_VAR,
    SOURCE_KEY_ENV_VAR,
};
use insight_common::events::EventBus;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use insight_taxonomy::services::{
    HttpConversationSource, HttpOracle, PhaseContext, RateLimitedSource,
};
use insight_taxonomy::AppState;

/// Command-line arguments
#[derive(Parser, Debug)]
#[command(name = "insight-taxonomy")]
#[command(about = "Conversation insight taxonomy service")]
#[command(version)]
struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "INSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// Folder holding the database
    #[arg(short, long)]
    root_folder: Option<PathBuf>,

    /// Port to listen on (overrides the TOML config)
    #[arg(short, long, env = "INSIGHT_PORT")]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let toml_config = config::load_or_default(args.config.as_deref());

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| toml_config.logging.level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting insight-taxonomy");

    let root_folder = RootFolderResolver::new("insight-taxonomy")
        .with_cli_arg(args.root_folder.clone())
        .with_toml(&toml_config)
        .resolve();
    let initializer = RootFolderInitializer::new(root_folder);
    initializer
        .ensure_directory_exists()
        .map_err(|e| anyhow::anyhow!("Failed to initialize root folder: {}", e))?;

    let db_path = initializer.database_path();
    info!(path = %db_path.display(), "Opening database");
    let db_pool = insight_common::db::init_database(&db_path)
        .await
        .context("Failed to open database")?;

    let oracle_key = resolve_api_key(ORACLE_KEY_ENV_VAR, toml_config.oracle.api_key.as_ref())
        .unwrap_or_else(|| {
            warn!("No oracle API key configured; requests are sent unauthenticated");
            String::new()
        });
    let oracle = HttpOracle::new(
        toml_config.oracle.base_url.clone(),
        toml_config.oracle.model.clone(),
        oracle_key,
        Duration::from_secs(toml_config.oracle.timeout_secs),
    )
    .context("Failed to build oracle client")?;
    info!(
        base_url = %toml_config.oracle.base_url,
        model = oracle.model(),
        "Classification oracle configured"
    );

    let source_key = resolve_api_key(SOURCE_KEY_ENV_VAR, toml_config.source.api_key.as_ref());
    let source = HttpConversationSource::new(
        toml_config.source.base_url.clone(),
        source_key,
        Duration::from_secs(toml_config.source.timeout_secs),
    )
    .context("Failed to build conversation source client")?;
    let source = RateLimitedSource::new(source, toml_config.source.requests_per_second);
    info!(
        base_url = %toml_config.source.base_url,
        requests_per_second = toml_config.source.requests_per_second,
        "Conversation source configured"
    );

    let event_bus = EventBus::new(256);
    let ctx = PhaseContext::new(db_pool, Arc::new(oracle), Arc::new(source), event_bus);
    let state = AppState::new(ctx);

    let app = insight_taxonomy::build_router(state).layer(TraceLayer::new_for_http());

    let host: std::net::IpAddr = toml_config
        .server
        .host
        .parse()
        .with_context(|| format!("Invalid server host '{}'", toml_config.server.host))?;
    let port = args.port.unwrap_or(toml_config.server.port);
    let addr = SocketAddr::from((host, port));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
