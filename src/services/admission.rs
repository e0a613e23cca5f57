use reqwest::header::ACCEPT;
use thiserror::Error;

use crate::config::AppConfig;
use crate::db::enums::Protocol;
use crate::db::{NewDevice, Repository, RepositoryError};
use crate::monitor::DeviceHealthCheckResponse;

#[derive(Debug, Error)]
pub enum AdmissionError {
    #[error("failed to check device health: {0}")]
    HealthCheck(#[from] reqwest::Error),
    #[error("invalid health check response: {0}")]
    InvalidHealthCheck(String),
    #[error("device id mismatch: expected {expected}, got {got}")]
    DeviceIdMismatch { expected: String, got: String },
    #[error("device type mismatch: expected {expected}, got {got}")]
    DeviceTypeMismatch { expected: String, got: String },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl AdmissionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, AdmissionError::HealthCheck(e) if e.is_timeout())
    }
}

/// Registers a device. An already-known device is restored if soft-deleted
/// and otherwise left untouched; a new one is probed through its health
/// endpoint to learn which transports it offers, and its type row is
/// created or restored on the fly.
pub async fn add_device(
    repo: &dyn Repository,
    client: &reqwest::Client,
    config: &AppConfig,
    device_id: &str,
    device_type: &str,
    hostname: &str,
    health_check_port: u16,
) -> Result<(), AdmissionError> {
    if let Some(device) = repo.get_device_by_id(device_id).await? {
        if device.deleted_at.is_some() {
            repo.restore_device(device.id).await?;
        }
        return Ok(());
    }

    let health = check_device_health(client, config, hostname, health_check_port).await?;
    if health.device_id != device_id {
        return Err(AdmissionError::DeviceIdMismatch {
            expected: device_id.to_string(),
            got: health.device_id,
        });
    }
    if health.device_type != device_type {
        return Err(AdmissionError::DeviceTypeMismatch {
            expected: device_type.to_string(),
            got: health.device_type,
        });
    }

    let mut rest_port = None;
    let mut rest_path = None;
    let mut grpc_port = None;
    let mut protocols = Vec::with_capacity(health.capabilities.len());
    for capability in &health.capabilities {
        match capability.protocol.parse::<Protocol>() {
            Ok(Protocol::Rest) => {
                rest_port = capability.port.map(i32::from);
                rest_path = capability.path.clone();
            }
            Ok(Protocol::Grpc) => {
                grpc_port = capability.port.map(i32::from);
            }
            Err(_) => {}
        }
        protocols.push(capability.protocol.clone());
    }

    match repo.get_device_type_by_name(device_type).await? {
        None => {
            repo.create_device_type(device_type, None).await?;
        }
        Some(dt) if dt.deleted_at.is_some() => {
            repo.restore_device_type(dt.id).await?;
        }
        Some(_) => {}
    }

    repo.create_device(NewDevice {
        device_id: device_id.to_string(),
        device_type: device_type.to_string(),
        hostname: hostname.to_string(),
        protocols,
        rest_port,
        rest_path,
        grpc_port,
    })
    .await?;

    Ok(())
}

async fn check_device_health(
    client: &reqwest::Client,
    config: &AppConfig,
    hostname: &str,
    port: u16,
) -> Result<DeviceHealthCheckResponse, AdmissionError> {
    let path = config.health_check_path.trim_start_matches('/');
    let url = format!("{}://{}:{}/{}", config.rest_schema, hostname, port, path);

    let response = client
        .get(&url)
        .header(ACCEPT, "application/json")
        .timeout(config.health_check_timeout)
        .send()
        .await?;

    let status = response.status();
    let body = response.bytes().await?;
    if !status.is_success() {
        return Err(AdmissionError::InvalidHealthCheck(format!(
            "non 2xx response, code: {}, body: '{}'",
            status.as_u16(),
            String::from_utf8_lossy(&body)
        )));
    }
    if body.is_empty() {
        return Err(AdmissionError::InvalidHealthCheck(
            "empty response body".into(),
        ));
    }

    let health: DeviceHealthCheckResponse = serde_json::from_slice(&body).map_err(|e| {
        AdmissionError::InvalidHealthCheck(format!("failed to decode response body: {e}"))
    })?;
    health.validate().map_err(AdmissionError::InvalidHealthCheck)?;
    Ok(health)
}
