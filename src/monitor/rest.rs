use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};

use super::{DeviceMonitor, MonitorError, PollDeviceRequest, PollDeviceResponse};
use crate::config::AppConfig;

/// Ceiling for attempts issued without an outer deadline.
const DEFAULT_REST_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Polls devices over plain HTTP/JSON: GET `{schema}://{host}:{port}/{path}`.
pub struct RestDeviceMonitor {
    client: reqwest::Client,
    schema: String,
    default_port: u16,
    default_path: String,
}

/// Wire shape of the device data endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestPollDeviceResponse {
    pub device_id: String,
    pub device_type: String,
    pub hardware_version: String,
    pub software_version: String,
    pub firmware_version: String,
    pub status: String,
    pub checksum: String,
}

impl RestDeviceMonitor {
    pub fn new(config: &AppConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_REST_REQUEST_TIMEOUT)
            .build()
            .unwrap(); // Should not fail with default settings
        RestDeviceMonitor {
            client,
            schema: config.rest_schema.clone(),
            default_port: config.rest_port,
            default_path: config.rest_device_data_path.clone(),
        }
    }
}

#[async_trait]
impl DeviceMonitor for RestDeviceMonitor {
    async fn poll_device(
        &self,
        request: PollDeviceRequest,
    ) -> Result<PollDeviceResponse, MonitorError> {
        request.validate()?;

        let port = request.port.unwrap_or(self.default_port);
        let path = match request.path.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => self.default_path.as_str(),
        };
        let path = path.trim_start_matches('/');
        let url = format!("{}://{}:{}/{}", self.schema, request.hostname, port, path);

        let response = self
            .client
            .get(&url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(MonitorError::HttpStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }
        if body.is_empty() {
            return Err(MonitorError::InvalidResponse(
                "empty response body".into(),
            ));
        }

        let decoded: RestPollDeviceResponse = serde_json::from_slice(&body).map_err(|e| {
            MonitorError::InvalidResponse(format!("failed to decode response body: {e}"))
        })?;
        validate_device_data(&decoded)?;

        Ok(PollDeviceResponse {
            id: decoded.device_id,
            device_type: decoded.device_type,
            hw_version: decoded.hardware_version,
            sw_version: decoded.software_version,
            fw_version: decoded.firmware_version,
            status: decoded.status,
            checksum: decoded.checksum,
        })
    }
}

fn validate_device_data(resp: &RestPollDeviceResponse) -> Result<(), MonitorError> {
    let fields = [
        ("device_id", &resp.device_id),
        ("device_type", &resp.device_type),
        ("hardware_version", &resp.hardware_version),
        ("software_version", &resp.software_version),
        ("firmware_version", &resp.firmware_version),
        ("status", &resp.status),
        ("checksum", &resp.checksum),
    ];
    for (name, value) in fields {
        if value.is_empty() {
            return Err(MonitorError::InvalidResponse(format!(
                "{name} cannot be empty"
            )));
        }
    }
    Ok(())
}
