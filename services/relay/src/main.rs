use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use realtime_relay::SessionManager;
use realtime_relay_server::config::Config;
use realtime_relay_server::routes;
use realtime_relay_server::state::AppState;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::time::ChronoLocal;

#[derive(Parser)]
#[command(version, about = "Relays a browser page to the OpenAI realtime API")]
struct Cli {
    /// Address to listen on; overrides BIND_ADDRESS.
    #[arg(long)]
    bind: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load application configuration")?;
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&config.log_filter))
        .with_timer(ChronoLocal::rfc_3339())
        .init();

    info!(model = %config.model, "Configuration loaded successfully. Starting relay...");

    // --- 3. Build Shared State ---
    let manager = Arc::new(
        SessionManager::new(config.client_config()).context("Failed to build session manager")?,
    );
    let transcoder = Arc::new(config.transcoder());
    info!(program = %transcoder.program().display(), "Using transcoder");
    let state = AppState::new(manager.clone(), transcoder);

    // --- 4. Serve ---
    let app = routes::create_router(state, config.max_upload_bytes);
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address))?;
    info!("Relay listening on http://{}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    manager.stop().await;
    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
