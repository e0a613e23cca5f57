use serde::{Deserialize, Serialize};

use crate::services::diagnostics::DeviceDiagnostics;

#[derive(Debug, Deserialize)]
pub struct AddDevicesRequest {
    pub devices: Vec<DeviceInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    pub device_type: String,
    pub hostname: String,
    pub health_check_port: u16,
}

impl DeviceInfo {
    /// Strips whitespace the way operators tend to paste it in, then checks
    /// the required fields.
    pub fn normalize(&mut self) -> Result<(), String> {
        self.device_id = self.device_id.replace(' ', "");
        self.device_type = self.device_type.replace(' ', "");
        self.hostname = self.hostname.replace(' ', "");
        if self.device_id.is_empty() {
            return Err("device_id cannot be empty".into());
        }
        if self.device_type.is_empty() {
            return Err("device_type cannot be empty".into());
        }
        if self.hostname.is_empty() {
            return Err("hostname cannot be empty".into());
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub struct AddDevicesResponse {
    pub results: Vec<DeviceAddingResult>,
}

#[derive(Debug, Serialize)]
pub struct DeviceAddingResult {
    pub device_id: String,
    pub device_type: String,
    pub hostname: String,
    /// 0 on success, 1 on health-check timeout, 2 otherwise.
    pub code: i32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Deserialize)]
pub struct ListDevicesQuery {
    pub page: Option<u64>,
    pub size: Option<u64>,
    pub device_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DeviceListingResponse {
    pub page: u64,
    pub size: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<DeviceDiagnostics>,
}
