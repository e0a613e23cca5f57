use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use fleetnexus::config::AppConfig;
use fleetnexus::logging;
use fleetnexus::simulator::DeviceSimulator;
use fleetnexus::version::VERSION;

/// Runs one simulated device exposing REST and gRPC endpoints.
#[derive(Parser, Debug)]
#[command(author, version = VERSION, about)]
struct Args {}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let _args = Args::parse();
    logging::init("simulator");
    info!("starting device simulator, version: {}", VERSION);

    let config = AppConfig::from_env()?;
    let simulator = DeviceSimulator::new(&config).await;

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            signal_token.cancel();
        }
    });

    simulator.start(cancel).await?;
    Ok(())
}
