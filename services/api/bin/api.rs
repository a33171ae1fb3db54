//! Main Entrypoint for the Voice Tutor API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment and the command line.
//! 2. Starting the lifecycle controller (shared HTTP client, provisioner, registry).
//! 3. Constructing the Axum router and applying middleware.
//! 4. Serving until a shutdown signal, then stopping every bot session.

use anyhow::Context;
use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use tutor_core::BotImplementation;
use tutor_voice_api::{config::Config, lifecycle::LifecycleController, router::create_router};

#[derive(Parser, Debug)]
#[command(name = "api", version, about = "Voice tutor bot server")]
struct Args {
    /// Address to bind, overriding SERVER_HOST.
    #[arg(long)]
    host: Option<IpAddr>,
    /// Port to bind, overriding SERVER_PORT.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // --- 1. Load Configuration ---
    let mut config = Config::from_env().context("Failed to load configuration")?;
    let host = args.host.unwrap_or(config.bind_address.ip());
    let port = args.port.unwrap_or(config.bind_address.port());
    config.bind_address = SocketAddr::new(host, port);

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    if config.daily_api_key.is_none() {
        warn!("DAILY_API_KEY is not set; /connect will fail to create rooms.");
    }
    for implementation in BotImplementation::ALL {
        if config.api_key_for(implementation).is_none() {
            warn!(%implementation, "No API key configured; bots of this kind cannot be started.");
        }
    }
    if config.reload {
        warn!("RELOAD is set, but a compiled server cannot hot-reload; ignoring.");
    }

    // --- 3. Start the Lifecycle Controller ---
    let bind_address = config.bind_address;
    let controller = LifecycleController::startup(config)?;

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = create_router(controller.state()).layer(cors);

    // --- 5. Start Server ---
    info!(%bind_address, "Starting server...");
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(controller.clone().shutdown_signal())
    .await;

    // Bot sessions are stopped even if the server failed.
    let report = controller.shutdown().await;
    info!(
        sessions = report.requested,
        timed_out = report.timed_out.len(),
        "Server has shut down."
    );
    served?;
    Ok(())
}
