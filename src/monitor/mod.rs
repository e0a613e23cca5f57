//! Transport ports: the `DeviceMonitor` poll operation shared by the REST and
//! RPC adapters, its request/response types, and the error kinds the polling
//! core discriminates.

pub mod grpc;
pub mod rest;
pub mod strategy;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use grpc::GrpcDeviceMonitor;
pub use rest::RestDeviceMonitor;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("invalid argument: {0}")]
    InvalidRequest(String),
    /// The device answered, but the payload failed validation. Kept as a
    /// distinct kind so callers up the chain can discriminate it.
    #[error("invalid device response: {0}")]
    InvalidResponse(String),
    /// The attempt-scoped deadline elapsed before the device answered.
    #[error("poll attempt timed out")]
    Timeout,
    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected http response, code: {status}, body: '{body}'")]
    HttpStatus { status: u16, body: String },
    #[error("rpc error: {0}")]
    Rpc(#[from] tonic::Status),
    #[error("rpc transport error: {0}")]
    RpcTransport(#[from] tonic::transport::Error),
}

impl MonitorError {
    pub fn is_invalid_response(&self) -> bool {
        matches!(self, MonitorError::InvalidResponse(_))
    }
}

/// Where to reach a device. Port and path fall back to the adapter's
/// configured defaults when unset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PollDeviceRequest {
    pub hostname: String,
    pub port: Option<u16>,
    pub path: Option<String>,
}

impl PollDeviceRequest {
    pub(crate) fn validate(&self) -> Result<(), MonitorError> {
        if self.hostname.is_empty() {
            return Err(MonitorError::InvalidRequest(
                "hostname cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Operational state record pulled from a device. All fields are non-empty
/// once an adapter has validated the raw payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollDeviceResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub device_type: String,
    pub hw_version: String,
    pub sw_version: String,
    pub fw_version: String,
    pub status: String,
    pub checksum: String,
}

/// The single operation the polling core calls, regardless of transport.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DeviceMonitor: Send + Sync {
    async fn poll_device(
        &self,
        request: PollDeviceRequest,
    ) -> Result<PollDeviceResponse, MonitorError>;
}

/// One transport a device offers, as reported by its health endpoint at
/// admission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingCapability {
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceHealthCheckResponse {
    pub device_id: String,
    pub device_type: String,
    pub capabilities: Vec<PollingCapability>,
}

impl DeviceHealthCheckResponse {
    pub fn validate(&self) -> Result<(), String> {
        if self.device_id.is_empty() {
            return Err("device_id cannot be empty".into());
        }
        if self.device_type.is_empty() {
            return Err("device_type cannot be empty".into());
        }
        if self.capabilities.is_empty() {
            return Err("capabilities cannot be empty".into());
        }
        for capability in &self.capabilities {
            if capability.protocol.is_empty() {
                return Err("protocol cannot be empty".into());
            }
        }
        Ok(())
    }
}
