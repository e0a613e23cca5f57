use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use fleetnexus::config::AppConfig;
use fleetnexus::db::PgRepository;
use fleetnexus::logging;
use fleetnexus::monitor::strategy::DefaultPollingStrategy;
use fleetnexus::version::VERSION;
use fleetnexus::web::{create_router, AppState};

/// Web service: device admission and the diagnostics read API.
#[derive(Parser, Debug)]
#[command(author, version = VERSION, about)]
struct Args {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _args = Args::parse();
    logging::init("server");
    info!("starting web service, version: {}", VERSION);

    let config = Arc::new(AppConfig::from_env()?);
    let database_url = config.require_database_url()?.to_string();
    let repo = PgRepository::connect(&database_url).await?;

    let state = AppState {
        repo: Arc::new(repo),
        strategy: Arc::new(DefaultPollingStrategy::new(config.polling_batch_size)),
        http_client: reqwest::Client::new(),
        config: config.clone(),
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], config.web_service_port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "web service listening");

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for the shutdown signal");
        return;
    }
    info!("shutdown signal received");
}
