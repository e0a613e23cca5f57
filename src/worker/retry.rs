use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use rand::Rng;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::db::entities::device;
use crate::db::enums::{PollingResult, PollingStatus};
use crate::db::{NewPollingHistory, Repository};
use crate::monitor::strategy::BackoffConfig;
use crate::monitor::{DeviceMonitor, MonitorError, PollDeviceRequest, PollDeviceResponse};

#[derive(Serialize)]
struct FailureReason<'a> {
    error: &'a str,
    count: u32,
}

/// Exponential backoff with full jitter. The i-th sleep is sampled uniformly
/// from `[0, min(base * factor^(i-1), max_delay))`: the sample comes from the
/// current delay, then the delay advances.
pub(crate) struct Backoff {
    delay: Duration,
    config: BackoffConfig,
}

impl Backoff {
    pub(crate) fn new(config: BackoffConfig) -> Self {
        Backoff {
            delay: config.base_delay,
            config,
        }
    }

    pub(crate) fn current_delay(&self) -> Duration {
        self.delay
    }

    /// Jittered sleep for the upcoming retry; advances the delay for the one
    /// after it.
    pub(crate) fn next_sleep(&mut self) -> Duration {
        // idea from https://aws.amazon.com/blogs/architecture/exponential-backoff-and-jitter/
        let sleep = self.delay.mul_f64(rand::thread_rng().gen::<f64>());
        if self.delay < self.config.max_delay {
            self.delay = self
                .delay
                .mul_f64(self.config.factor)
                .min(self.config.max_delay);
        }
        sleep
    }
}

/// Drives one claimed device through poll attempts until success or
/// cancellation. Holds the repository as a capability; persistence failures
/// are logged and never abort the loop.
pub struct RetryMonitor {
    monitor: Arc<dyn DeviceMonitor>,
    repo: Arc<dyn Repository>,
    timeout: Duration,
    backoff: BackoffConfig,
}

impl RetryMonitor {
    pub fn new(
        monitor: Arc<dyn DeviceMonitor>,
        repo: Arc<dyn Repository>,
        timeout: Duration,
        backoff: BackoffConfig,
    ) -> Self {
        RetryMonitor {
            monitor,
            repo,
            timeout,
            backoff,
        }
    }

    pub async fn poll_device_with_backoff(
        &self,
        cancel: CancellationToken,
        mut device: device::Model,
        request: PollDeviceRequest,
    ) {
        let start = Instant::now();
        let mut fail_count: u32 = 0;
        let mut backoff = Backoff::new(self.backoff.clone());

        loop {
            let attempt =
                tokio::time::timeout(self.timeout, self.monitor.poll_device(request.clone()));
            let outcome = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("stop polling device {}, cancellation requested", device.device_id);
                    self.mark_cancelled(&mut device).await;
                    return;
                }
                result = attempt => match result {
                    Ok(inner) => inner,
                    Err(_) => Err(MonitorError::Timeout),
                },
            };

            device.last_checked_at = Some(Utc::now());
            let history = match &outcome {
                Ok(response) => {
                    info!(
                        device_data = %jsonize_polling_result(response),
                        duration = ?start.elapsed(),
                        "successfully polled device data on attempt {}",
                        fail_count + 1
                    );
                    device.polling_status = Some(PollingStatus::Done);
                    NewPollingHistory {
                        device_id: device.device_id.clone(),
                        hw_version: Some(response.hw_version.clone()),
                        sw_version: Some(response.sw_version.clone()),
                        fw_version: Some(response.fw_version.clone()),
                        device_status: Some(response.status.clone()),
                        device_checksum: Some(response.checksum.clone()),
                        polling_result: PollingResult::Succeed,
                        failure_reason: None,
                    }
                }
                Err(e) => {
                    error!(
                        error = %e,
                        "failed to poll device data on attempt {}",
                        fail_count + 1
                    );
                    let reason = FailureReason {
                        error: &e.to_string(),
                        count: fail_count + 1,
                    };
                    NewPollingHistory {
                        device_id: device.device_id.clone(),
                        hw_version: None,
                        sw_version: None,
                        fw_version: None,
                        device_status: None,
                        device_checksum: None,
                        polling_result: PollingResult::Failed,
                        failure_reason: serde_json::to_string(&reason).ok(),
                    }
                }
            };

            // History row first, then the device row; both independent and
            // best effort.
            if let Err(e) = self.repo.create_polling_history(history).await {
                error!(error = %e, "db error: failed to save device polling result");
            }
            if let Err(e) = self.repo.update_device(&device).await {
                error!(error = %e, "db error: failed to update device database record");
            }

            if outcome.is_ok() {
                return;
            }

            fail_count += 1;
            let sleep = backoff.next_sleep();
            tokio::select! {
                _ = tokio::time::sleep(sleep) => {
                    info!(
                        retry_count = fail_count,
                        "retry polling device {} after sleeping {:?}",
                        device.device_id,
                        sleep
                    );
                }
                _ = cancel.cancelled() => {
                    info!("stop polling device {}, cancellation requested", device.device_id);
                    self.mark_cancelled(&mut device).await;
                    return;
                }
            }
        }
    }

    async fn mark_cancelled(&self, device: &mut device::Model) {
        device.polling_status = Some(PollingStatus::Cancelled);
        if let Err(e) = self.repo.update_device(device).await {
            error!(error = %e, "db error: failed to update device polling status to 'cancelled'");
        }
    }
}

/// Serializes a poll response for logging with the checksum masked down to
/// its first and last character.
fn jsonize_polling_result(response: &PollDeviceResponse) -> String {
    let mut masked = response.clone();
    if masked.checksum.is_ascii() && masked.checksum.len() > 2 {
        let blurred = "*".repeat(masked.checksum.len() - 2);
        masked.checksum = format!(
            "{}{}{}",
            &masked.checksum[..1],
            blurred,
            &masked.checksum[masked.checksum.len() - 1..]
        );
    }
    serde_json::to_string(&masked).unwrap_or_default()
}
