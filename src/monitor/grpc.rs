use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

use super::{DeviceMonitor, MonitorError, PollDeviceRequest, PollDeviceResponse};
use crate::config::AppConfig;
use crate::device_monitor_proto::device_monitor_client::DeviceMonitorClient;
use crate::device_monitor_proto::{DeviceDataRequest, DeviceDataResponse};

const DEFAULT_GRPC_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Polls devices over the `GetDeviceData` RPC. Channels are lazy and cached
/// per `host:port`; entries are never evicted.
pub struct GrpcDeviceMonitor {
    client_cache: RwLock<HashMap<String, DeviceMonitorClient<Channel>>>,
    default_port: u16,
    use_tls: bool,
}

impl GrpcDeviceMonitor {
    pub fn new(config: &AppConfig) -> Self {
        GrpcDeviceMonitor {
            client_cache: RwLock::new(HashMap::new()),
            default_port: config.grpc_port,
            use_tls: config.environment.is_cloud(),
        }
    }

    /// Double-checked lookup: many readers on the hot path, a single writer
    /// creates the missing client. `connect_lazy` keeps the critical section
    /// free of awaits.
    fn client(&self, hostname: &str, port: u16) -> Result<DeviceMonitorClient<Channel>, MonitorError> {
        let target = format!("{hostname}:{port}");

        if let Some(client) = self.client_cache.read().unwrap().get(&target) {
            return Ok(client.clone());
        }

        let mut cache = self.client_cache.write().unwrap();
        if let Some(client) = cache.get(&target) {
            return Ok(client.clone());
        }

        let scheme = if self.use_tls { "https" } else { "http" };
        let mut endpoint = Endpoint::from_shared(format!("{scheme}://{target}"))?
            .timeout(DEFAULT_GRPC_REQUEST_TIMEOUT)
            .http2_keep_alive_interval(Duration::from_secs(10))
            .keep_alive_timeout(Duration::from_secs(30))
            .keep_alive_while_idle(true);
        if self.use_tls {
            endpoint = endpoint.tls_config(ClientTlsConfig::new().with_native_roots())?;
        }

        let client = DeviceMonitorClient::new(endpoint.connect_lazy());
        cache.insert(target, client.clone());
        Ok(client)
    }

    #[cfg(test)]
    fn cached_clients(&self) -> usize {
        self.client_cache.read().unwrap().len()
    }
}

#[async_trait]
impl DeviceMonitor for GrpcDeviceMonitor {
    async fn poll_device(
        &self,
        request: PollDeviceRequest,
    ) -> Result<PollDeviceResponse, MonitorError> {
        request.validate()?;

        let port = request.port.unwrap_or(self.default_port);
        let mut client = self.client(&request.hostname, port)?;

        let response = client.get_device_data(DeviceDataRequest {}).await?;
        validate_device_data(response.into_inner())
    }
}

fn validate_device_data(resp: DeviceDataResponse) -> Result<PollDeviceResponse, MonitorError> {
    let require = |name: &str, value: Option<String>| -> Result<String, MonitorError> {
        match value {
            Some(v) if !v.is_empty() => Ok(v),
            _ => Err(MonitorError::InvalidResponse(format!(
                "{name} cannot be empty"
            ))),
        }
    };

    Ok(PollDeviceResponse {
        id: require("device_id", resp.device_id)?,
        device_type: require("device_type", resp.device_type)?,
        hw_version: require("hardware_version", resp.hardware_version)?,
        sw_version: require("software_version", resp.software_version)?,
        fw_version: require("firmware_version", resp.firmware_version)?,
        status: require("status", resp.status)?,
        checksum: require("checksum", resp.checksum)?,
    })
}
