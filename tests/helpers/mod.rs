//! Test doubles shared by the worker scenarios: an in-memory repository that
//! honours the lease-claim predicate, a table-backed strategy, and a scripted
//! transport adapter.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use fleetnexus::db::entities::{device, device_type, polling_history};
use fleetnexus::db::enums::PollingStatus;
use fleetnexus::db::repository::DEFAULT_OUTDATED_PERIOD;
use fleetnexus::db::{
    DevicePollingParameter, NewDevice, NewPollingHistory, Repository, RepositoryError,
};
use fleetnexus::monitor::strategy::{BackoffConfig, PollingConfig, PollingStrategy, StrategyError};
use fleetnexus::monitor::{DeviceMonitor, MonitorError, PollDeviceRequest, PollDeviceResponse};
use fleetnexus::simulator::random_string;

#[derive(Default)]
struct Store {
    device_types: Vec<device_type::Model>,
    devices: Vec<device::Model>,
    history: Vec<polling_history::Model>,
    next_type_id: i32,
    next_device_id: i32,
    next_history_id: i64,
}

/// Shared-state repository with the same claim semantics as the SQL one.
#[derive(Default)]
pub struct InMemoryRepository {
    store: Mutex<Store>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        InMemoryRepository::default()
    }

    pub fn seed_device_type(&self, name: &str) -> device_type::Model {
        let mut store = self.store.lock().unwrap();
        store.next_type_id += 1;
        let model = device_type::Model {
            id: store.next_type_id,
            name: name.to_string(),
            description: None,
            created_at: Utc::now(),
            deleted_at: None,
        };
        store.device_types.push(model.clone());
        model
    }

    pub fn seed_device(&self, new: NewDevice) -> device::Model {
        let mut store = self.store.lock().unwrap();
        store.next_device_id += 1;
        let model = device::Model {
            id: store.next_device_id,
            device_id: new.device_id,
            device_type: new.device_type,
            hostname: new.hostname,
            protocols: new.protocols,
            rest_port: new.rest_port,
            rest_path: new.rest_path,
            grpc_port: new.grpc_port,
            polling_status: None,
            created_at: Utc::now(),
            last_checked_at: None,
            deleted_at: None,
        };
        store.devices.push(model.clone());
        model
    }

    pub fn all_devices(&self) -> Vec<device::Model> {
        self.store.lock().unwrap().devices.clone()
    }

    /// Newest first.
    pub fn history_for(&self, device_id: &str) -> Vec<polling_history::Model> {
        let store = self.store.lock().unwrap();
        let mut rows: Vec<_> = store
            .history
            .iter()
            .filter(|row| row.device_id == device_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_all_device_types(&self) -> Result<Vec<device_type::Model>, RepositoryError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .device_types
            .iter()
            .filter(|dt| dt.deleted_at.is_none())
            .cloned()
            .collect())
    }

    async fn get_device_type_by_name(
        &self,
        name: &str,
    ) -> Result<Option<device_type::Model>, RepositoryError> {
        let store = self.store.lock().unwrap();
        Ok(store.device_types.iter().find(|dt| dt.name == name).cloned())
    }

    async fn create_device_type(
        &self,
        name: &str,
        description: Option<String>,
    ) -> Result<device_type::Model, RepositoryError> {
        let mut store = self.store.lock().unwrap();
        store.next_type_id += 1;
        let model = device_type::Model {
            id: store.next_type_id,
            name: name.to_string(),
            description,
            created_at: Utc::now(),
            deleted_at: None,
        };
        store.device_types.push(model.clone());
        Ok(model)
    }

    async fn restore_device_type(&self, id: i32) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        match store.device_types.iter_mut().find(|dt| dt.id == id) {
            Some(dt) => {
                dt.deleted_at = None;
                Ok(())
            }
            None => Err(RepositoryError::InvalidArgument(format!(
                "device type {id} not found"
            ))),
        }
    }

    async fn create_device(&self, new: NewDevice) -> Result<device::Model, RepositoryError> {
        Ok(self.seed_device(new))
    }

    async fn update_device(&self, device: &device::Model) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        match store.devices.iter_mut().find(|d| d.id == device.id) {
            Some(existing) => {
                *existing = device.clone();
                Ok(())
            }
            None => Err(RepositoryError::InvalidArgument(format!(
                "device {} not found",
                device.id
            ))),
        }
    }

    async fn restore_device(&self, id: i32) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        match store.devices.iter_mut().find(|d| d.id == id) {
            Some(device) => {
                device.deleted_at = None;
                Ok(())
            }
            None => Err(RepositoryError::InvalidArgument(format!(
                "device {id} not found"
            ))),
        }
    }

    async fn get_device_by_id(
        &self,
        device_id: &str,
    ) -> Result<Option<device::Model>, RepositoryError> {
        let store = self.store.lock().unwrap();
        Ok(store
            .devices
            .iter()
            .find(|d| d.device_id == device_id)
            .cloned())
    }

    async fn get_devices_by_page<'a>(
        &self,
        page: u64,
        size: u64,
        device_type: Option<&'a str>,
    ) -> Result<(Vec<device::Model>, u64), RepositoryError> {
        let store = self.store.lock().unwrap();
        let mut rows: Vec<_> = store
            .devices
            .iter()
            .filter(|d| d.deleted_at.is_none())
            .filter(|d| device_type.map_or(true, |dt| d.device_type == dt))
            .cloned()
            .collect();
        rows.sort_by_key(|d| d.id);
        let total = rows.len() as u64;
        let rows = rows
            .into_iter()
            .skip((page * size) as usize)
            .take(size as usize)
            .collect();
        Ok((rows, total))
    }

    async fn claim_due_devices(
        &self,
        param: DevicePollingParameter,
    ) -> Result<Vec<device::Model>, RepositoryError> {
        let mut store = self.store.lock().unwrap();
        let now = Utc::now();
        let recent = now
            - chrono::Duration::from_std(param.interval)
                .map_err(|e| RepositoryError::InvalidArgument(e.to_string()))?;
        let remote = now
            - chrono::Duration::from_std(param.outdated_period.unwrap_or(DEFAULT_OUTDATED_PERIOD))
                .map_err(|e| RepositoryError::InvalidArgument(e.to_string()))?;

        let mut due: Vec<usize> = store
            .devices
            .iter()
            .enumerate()
            .filter(|(_, d)| {
                d.deleted_at.is_none()
                    && d.device_type == param.device_type
                    && ((d.polling_status != Some(PollingStatus::InProgress)
                        && d.last_checked_at.map_or(true, |t| t < recent))
                        || d.last_checked_at.map_or(false, |t| t < remote)
                        || (d.last_checked_at.is_none() && d.created_at < remote))
            })
            .map(|(i, _)| i)
            .collect();

        // ascending by last_checked_at, nulls first (None sorts before Some)
        due.sort_by_key(|&i| store.devices[i].last_checked_at);
        due.truncate(param.limit as usize);

        let mut claimed = Vec::with_capacity(due.len());
        for i in due {
            store.devices[i].polling_status = Some(PollingStatus::InProgress);
            claimed.push(store.devices[i].clone());
        }
        Ok(claimed)
    }

    async fn create_polling_history(
        &self,
        history: NewPollingHistory,
    ) -> Result<(), RepositoryError> {
        let mut store = self.store.lock().unwrap();
        store.next_history_id += 1;
        let row = polling_history::Model {
            id: store.next_history_id,
            device_id: history.device_id,
            hw_version: history.hw_version,
            sw_version: history.sw_version,
            fw_version: history.fw_version,
            device_status: history.device_status,
            device_checksum: history.device_checksum,
            polling_result: history.polling_result,
            failure_reason: history.failure_reason,
            created_at: Utc::now(),
        };
        store.history.push(row);
        Ok(())
    }

    async fn get_device_polling_history(
        &self,
        device_id: &str,
        limit: u64,
    ) -> Result<Vec<polling_history::Model>, RepositoryError> {
        Ok(self
            .history_for(device_id)
            .into_iter()
            .take(limit as usize)
            .collect())
    }
}

/// Table-backed strategy for tests; unknown types fail like the default one.
#[derive(Default)]
pub struct TestStrategy {
    pub configs: HashMap<String, PollingConfig>,
}

impl PollingStrategy for TestStrategy {
    fn polling_config(&self, device_type: &str) -> Result<PollingConfig, StrategyError> {
        self.configs
            .get(device_type)
            .cloned()
            .ok_or_else(|| StrategyError::UnsupportedDeviceType(device_type.to_string()))
    }
}

pub enum ScriptedReply {
    Respond(PollDeviceResponse),
    Fail(String),
    SlowFail(Duration, String),
}

/// Transport double driven by a closure, so tests can shape per-call
/// behavior from the request alone.
pub struct ScriptedMonitor {
    script: Box<dyn Fn(&PollDeviceRequest) -> ScriptedReply + Send + Sync>,
}

impl ScriptedMonitor {
    pub fn new(
        script: impl Fn(&PollDeviceRequest) -> ScriptedReply + Send + Sync + 'static,
    ) -> Self {
        ScriptedMonitor {
            script: Box::new(script),
        }
    }
}

#[async_trait]
impl DeviceMonitor for ScriptedMonitor {
    async fn poll_device(
        &self,
        request: PollDeviceRequest,
    ) -> Result<PollDeviceResponse, MonitorError> {
        match (self.script)(&request) {
            ScriptedReply::Respond(response) => Ok(response),
            ScriptedReply::Fail(message) => Err(MonitorError::InvalidResponse(message)),
            ScriptedReply::SlowFail(delay, message) => {
                tokio::time::sleep(delay).await;
                Err(MonitorError::InvalidResponse(message))
            }
        }
    }
}

pub fn sample_response() -> PollDeviceResponse {
    PollDeviceResponse {
        id: random_string(8),
        device_type: "router".into(),
        hw_version: random_string(10),
        sw_version: random_string(10),
        fw_version: random_string(15),
        status: "running".into(),
        checksum: random_string(32),
    }
}

pub fn polling_config(interval: Duration, timeout: Duration) -> PollingConfig {
    PollingConfig {
        interval,
        timeout,
        batch_size: 10,
        backoff: BackoffConfig {
            base_delay: Duration::from_millis(100),
            factor: 4.0,
            max_delay: Duration::from_secs(1),
        },
    }
}
