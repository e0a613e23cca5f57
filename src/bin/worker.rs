use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fleetnexus::config::AppConfig;
use fleetnexus::db::{PgRepository, Repository};
use fleetnexus::logging;
use fleetnexus::monitor::strategy::DefaultPollingStrategy;
use fleetnexus::monitor::{GrpcDeviceMonitor, RestDeviceMonitor};
use fleetnexus::version::VERSION;
use fleetnexus::worker::PollingWorker;

/// Polling worker: one scheduler per device type.
#[derive(Parser, Debug)]
#[command(author, version = VERSION, about)]
struct Args {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _args = Args::parse();
    logging::init("worker");
    info!("starting polling worker, version: {}", VERSION);

    let config = AppConfig::from_env()?;
    let database_url = config.require_database_url()?.to_string();
    let repo: Arc<dyn Repository> = Arc::new(PgRepository::connect(&database_url).await?);

    let worker = PollingWorker::new(
        repo,
        Arc::new(RestDeviceMonitor::new(&config)),
        Arc::new(GrpcDeviceMonitor::new(&config)),
        Arc::new(DefaultPollingStrategy::new(config.polling_batch_size)),
    );

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received, draining polling worker");
            signal_token.cancel();
        }
    });

    worker.run(cancel).await?;
    info!("worker shutdown");
    Ok(())
}
