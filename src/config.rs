use std::env;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {key} is not set")]
    Missing { key: &'static str },
    #[error("failed to parse environment variable {key}='{value}'")]
    Invalid { key: &'static str, value: String },
}

/// Deployment environment. Cloud environments skip `.env` loading and use
/// TLS transport credentials; everything else is treated as local/dev.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Staging,
    Sandbox,
    Production,
}

impl Environment {
    fn from_env() -> Self {
        match env::var("ENVIRONMENT").unwrap_or_default().as_str() {
            "staging" => Environment::Staging,
            "sandbox" => Environment::Sandbox,
            "production" => Environment::Production,
            _ => Environment::Development,
        }
    }

    pub fn is_cloud(&self) -> bool {
        matches!(
            self,
            Environment::Staging | Environment::Sandbox | Environment::Production
        )
    }
}

/// All environment-derived settings, loaded once at start-up and threaded
/// into components explicitly.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: Environment,
    pub database_url: Option<String>,
    pub polling_batch_size: u64,
    pub health_check_timeout: Duration,
    pub health_check_path: String,
    pub rest_schema: String,
    pub rest_port: u16,
    pub rest_device_data_path: String,
    pub grpc_port: u16,
    pub web_service_port: u16,
    pub external_checksum_generator: String,
    /// Comma-separated capability list advertised by the simulator.
    pub protocols: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = Environment::from_env();
        if !environment.is_cloud() {
            // dotenv walks up from the working directory looking for a .env
            // file; a missing file is not an error.
            dotenv::dotenv().ok();
        }

        Ok(AppConfig {
            environment,
            database_url: env::var("DATABASE_URL").ok(),
            polling_batch_size: parse_or("POLLING_BATCH_SIZE", 100)?,
            health_check_timeout: Duration::from_secs(parse_or("HEALTH_CHECK_TIMEOUT", 5)?),
            health_check_path: string_or("HEALTH_CHECK_PATH", "/health"),
            rest_schema: string_or("REST_SCHEMA", "http"),
            rest_port: parse_or("REST_PORT", 8080)?,
            rest_device_data_path: string_or("REST_DEVICE_DATA_PATH", "/api/data"),
            grpc_port: parse_or("GRPC_PORT", 50051)?,
            web_service_port: 8080,
            external_checksum_generator: string_or(
                "EXTERNAL_CHECKSUM_GENERATOR_LOCATION",
                "/app/checksum_gen",
            ),
            protocols: string_or("PROTOCOLS", ""),
        })
    }

    /// The persistence target, required by the server and the worker but not
    /// by the simulator.
    pub fn require_database_url(&self) -> Result<&str, ConfigError> {
        self.database_url
            .as_deref()
            .ok_or(ConfigError::Missing { key: "DATABASE_URL" })
    }
}

fn string_or(key: &'static str, default: &str) -> String {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v,
        _ => default.to_string(),
    }
}

fn parse_or<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(key) {
        Ok(v) if !v.is_empty() => v
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: v }),
        _ => Ok(default),
    }
}
