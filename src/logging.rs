use std::env;

use tracing_appender::rolling;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the process-wide tracing subscriber: human-readable output on
/// stdout plus a daily-rolling JSON file under `logs/`.
///
/// The filter honours `LOG_LEVEL` (info when unset); `RUST_LOG` still wins
/// when present so operators can target individual modules.
pub fn init(component: &str) {
    let file_appender = rolling::daily("logs", format!("{component}.log"));
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let default_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{default_level},sqlx::query=warn")));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}
