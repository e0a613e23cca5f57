//! The polling worker: a supervisor that discovers device types and runs one
//! scheduler per type, each claiming due devices in batches and dispatching
//! them to the retry engine.

pub mod retry;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn, Instrument};

use crate::db::entities::device;
use crate::db::enums::Protocol;
use crate::db::{DevicePollingParameter, Repository, RepositoryError};
use crate::monitor::strategy::{PollingConfig, PollingStrategy};
use crate::monitor::{DeviceMonitor, PollDeviceRequest};
use retry::RetryMonitor;

/// How often the supervisor re-reads device types to pick up new ones.
pub const DEFAULT_DISCOVERY_INTERVAL: Duration = Duration::from_secs(60);
/// How long shutdown waits for schedulers to drain their in-flight work.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("failed to get all device types: {0}")]
    Repository(#[from] RepositoryError),
}

/// Worker supervisor. Owns one scheduler per device type; schedulers own
/// their per-device retry tasks. Cancellation propagates down the same tree.
pub struct PollingWorker {
    repo: Arc<dyn Repository>,
    rest: Arc<dyn DeviceMonitor>,
    grpc: Arc<dyn DeviceMonitor>,
    strategy: Arc<dyn PollingStrategy>,
    discovery_interval: Duration,
    shutdown_grace: Duration,
}

impl PollingWorker {
    pub fn new(
        repo: Arc<dyn Repository>,
        rest: Arc<dyn DeviceMonitor>,
        grpc: Arc<dyn DeviceMonitor>,
        strategy: Arc<dyn PollingStrategy>,
    ) -> Self {
        PollingWorker {
            repo,
            rest,
            grpc,
            strategy,
            discovery_interval: DEFAULT_DISCOVERY_INTERVAL,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_discovery_interval(mut self, interval: Duration) -> Self {
        self.discovery_interval = interval;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Runs until the token is cancelled. The initial device type load must
    /// succeed; later discovery re-reads are best effort.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), WorkerError> {
        let mut schedulers: JoinSet<()> = JoinSet::new();
        let mut scheduled: HashSet<String> = HashSet::new();

        let device_types = self.repo.get_all_device_types().await?;
        self.launch_new_schedulers(device_types, &mut scheduled, &mut schedulers, &cancel);

        let mut discovery = tokio::time::interval(self.discovery_interval);
        discovery.set_missed_tick_behavior(MissedTickBehavior::Delay);
        discovery.tick().await; // the first tick fires immediately

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = discovery.tick() => {
                    match self.repo.get_all_device_types().await {
                        Ok(device_types) => self.launch_new_schedulers(
                            device_types,
                            &mut scheduled,
                            &mut schedulers,
                            &cancel,
                        ),
                        Err(e) => error!(error = %e, "failed to re-read device types"),
                    }
                }
            }
        }

        info!("waiting for type schedulers to drain");
        let drain = async {
            while schedulers.join_next().await.is_some() {}
        };
        if tokio::time::timeout(self.shutdown_grace, drain).await.is_err() {
            warn!(
                grace = ?self.shutdown_grace,
                "shutdown grace period elapsed with schedulers still running"
            );
            schedulers.shutdown().await;
        }
        Ok(())
    }

    /// Starts a scheduler for every type not yet scheduled. A type with an
    /// unknown or invalid polling configuration fails with a descriptive
    /// error without affecting the other schedulers.
    fn launch_new_schedulers(
        &self,
        device_types: Vec<crate::db::entities::device_type::Model>,
        scheduled: &mut HashSet<String>,
        schedulers: &mut JoinSet<()>,
        cancel: &CancellationToken,
    ) {
        for device_type in device_types {
            let name = device_type.name;
            if scheduled.contains(&name) {
                continue;
            }

            let config = match self
                .strategy
                .polling_config(&name)
                .and_then(|config| config.validate().map(|()| config))
            {
                Ok(config) => config,
                Err(e) => {
                    error!(
                        device_type = %name,
                        error = %e,
                        "failed to configure scheduler for device type"
                    );
                    // Remember the failure so it is reported once, not on
                    // every discovery pass.
                    scheduled.insert(name);
                    continue;
                }
            };

            let span = tracing::info_span!(
                "device_polling_worker",
                device_type = %name,
                polling_interval = ?config.interval,
                polling_timeout = ?config.timeout,
                polling_batch_size = config.batch_size,
            );
            let scheduler = TypeScheduler {
                device_type: name.clone(),
                config,
                repo: self.repo.clone(),
                rest: self.rest.clone(),
                grpc: self.grpc.clone(),
            };
            let token = cancel.child_token();
            schedulers.spawn(scheduler.run(token).instrument(span));
            scheduled.insert(name);
        }
    }
}

/// Schedules polling for a single device type.
struct TypeScheduler {
    device_type: String,
    config: PollingConfig,
    repo: Arc<dyn Repository>,
    rest: Arc<dyn DeviceMonitor>,
    grpc: Arc<dyn DeviceMonitor>,
}

impl TypeScheduler {
    async fn run(self, cancel: CancellationToken) {
        info!("polling scheduler started");
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // fire the first batch one interval in

        let mut tasks: JoinSet<()> = JoinSet::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("stopping polling devices of type {}, cancellation requested", self.device_type);
                    break;
                }
                _ = ticker.tick() => self.tick(&cancel, &mut tasks).await,
            }
            // Reap device tasks that finished since the last tick.
            while tasks.try_join_next().is_some() {}
        }

        // In-flight retry tasks observe the same cancellation; wait for them.
        while tasks.join_next().await.is_some() {}
    }

    async fn tick(&self, cancel: &CancellationToken, tasks: &mut JoinSet<()>) {
        let devices = match self
            .repo
            .claim_due_devices(DevicePollingParameter {
                device_type: self.device_type.clone(),
                interval: self.config.interval,
                outdated_period: None,
                limit: self.config.batch_size,
            })
            .await
        {
            Ok(devices) => devices,
            Err(e) => {
                error!(error = %e, "failed to get devices for type {}", self.device_type);
                return;
            }
        };

        if devices.is_empty() {
            debug!("no devices found for type {}", self.device_type);
            return;
        }

        for device in devices {
            self.dispatch(device, cancel, tasks);
        }
    }

    /// Hands a claimed device to the retry engine as its own task; the
    /// scheduler does not await completion before the next tick.
    fn dispatch(&self, device: device::Model, cancel: &CancellationToken, tasks: &mut JoinSet<()>) {
        let Some((monitor, request)) = self.select_transport(&device) else {
            error!(
                device_id = %device.device_id,
                "no supported protocol found for device"
            );
            return;
        };

        let span = tracing::info_span!(
            "device_poll",
            device_id = %device.device_id,
            hostname = %device.hostname,
        );
        let engine = RetryMonitor::new(
            monitor,
            self.repo.clone(),
            self.config.timeout,
            self.config.backoff.clone(),
        );
        let token = cancel.child_token();
        tasks.spawn(
            async move {
                engine.poll_device_with_backoff(token, device, request).await;
            }
            .instrument(span),
        );
    }

    /// Walks the device's protocol list in order; the first supported
    /// transport wins, unknown entries are logged and skipped.
    fn select_transport(
        &self,
        device: &device::Model,
    ) -> Option<(Arc<dyn DeviceMonitor>, PollDeviceRequest)> {
        for protocol in &device.protocols {
            match protocol.parse::<Protocol>() {
                Ok(Protocol::Rest) => {
                    return Some((
                        self.rest.clone(),
                        PollDeviceRequest {
                            hostname: device.hostname.clone(),
                            port: device.rest_port.and_then(|p| u16::try_from(p).ok()),
                            path: device.rest_path.clone(),
                        },
                    ));
                }
                Ok(Protocol::Grpc) => {
                    return Some((
                        self.grpc.clone(),
                        PollDeviceRequest {
                            hostname: device.hostname.clone(),
                            port: device.grpc_port.and_then(|p| u16::try_from(p).ok()),
                            path: None,
                        },
                    ));
                }
                Err(_) => {
                    warn!(
                        device_id = %device.device_id,
                        protocol = %protocol,
                        "unsupported protocol of device"
                    );
                }
            }
        }
        None
    }
}
