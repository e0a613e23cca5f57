use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

use crate::db::entities::{device, polling_history};
use crate::db::enums::PollingResult;
use crate::db::{Repository, RepositoryError};
use crate::monitor::strategy::{PollingConfig, PollingStrategy, StrategyError};

/// How many history rows the read side feeds into the evaluator. Must cover
/// the disconnect evidence window.
pub const DEFAULT_HISTORY_CHECKING_SIZE: u64 = 20;

const DISCONNECT_EVIDENCE_COUNT: usize = 10;

#[derive(Debug, Error)]
pub enum DiagnosticsError {
    #[error("failed to get polling config for device of type {device_type}: {source}")]
    Strategy {
        device_type: String,
        source: StrategyError,
    },
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Connectivity verdict derived from a device's recent polling history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Connectivity {
    Connected,
    Disconnected,
    Unknown,
    Connecting,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDiagnostics {
    pub id: i32,
    pub device_id: String,
    pub device_type: String,
    pub device_host: String,
    pub hw_version: String,
    pub sw_version: String,
    pub fw_version: String,
    pub status: String,
    pub checksum: String,
    pub connectivity: Connectivity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl DeviceDiagnostics {
    fn bare(device: &device::Model, connectivity: Connectivity) -> Self {
        DeviceDiagnostics {
            id: device.id,
            device_id: device.device_id.clone(),
            device_type: device.device_type.clone(),
            device_host: device.hostname.clone(),
            hw_version: String::new(),
            sw_version: String::new(),
            fw_version: String::new(),
            status: String::new(),
            checksum: String::new(),
            connectivity,
            last_checked_at: None,
        }
    }
}

/// Derives the connectivity verdict for one device. Pure and re-entrant: the
/// result depends only on the arguments, with `now` passed in explicitly.
/// `history` must be sorted newest first.
///
/// Rules, first match wins: no history yields Unknown; a latest row older
/// than ten intervals yields Unknown (out of sync); a fresh successful row
/// yields Connected with the device metadata propagated; ten failed rows in a
/// row yield Disconnected; anything else is still Connecting.
pub fn evaluate(
    device: &device::Model,
    history: &[polling_history::Model],
    config: &PollingConfig,
    now: DateTime<Utc>,
) -> DeviceDiagnostics {
    let Some(latest) = history.first() else {
        return DeviceDiagnostics::bare(device, Connectivity::Unknown);
    };

    if is_out_of_sync(latest, config, now) {
        let mut diagnostics = DeviceDiagnostics::bare(device, Connectivity::Unknown);
        diagnostics.last_checked_at = Some(latest.created_at);
        return diagnostics;
    }

    if is_alive(latest, config, now) {
        return DeviceDiagnostics {
            id: device.id,
            device_id: device.device_id.clone(),
            device_type: device.device_type.clone(),
            device_host: device.hostname.clone(),
            hw_version: latest.hw_version.clone().unwrap_or_default(),
            sw_version: latest.sw_version.clone().unwrap_or_default(),
            fw_version: latest.fw_version.clone().unwrap_or_default(),
            status: latest.device_status.clone().unwrap_or_default(),
            checksum: latest.device_checksum.clone().unwrap_or_default(),
            connectivity: Connectivity::Connected,
            last_checked_at: Some(latest.created_at),
        };
    }

    let verdict = if is_disconnected(history) {
        Connectivity::Disconnected
    } else {
        Connectivity::Connecting
    };
    let mut diagnostics = DeviceDiagnostics::bare(device, verdict);
    diagnostics.last_checked_at = Some(latest.created_at);
    diagnostics
}

fn is_out_of_sync(
    latest: &polling_history::Model,
    config: &PollingConfig,
    now: DateTime<Utc>,
) -> bool {
    let window = ChronoDuration::from_std(config.interval * 10).unwrap_or(ChronoDuration::MAX);
    latest.created_at < now - window
}

fn is_alive(latest: &polling_history::Model, config: &PollingConfig, now: DateTime<Utc>) -> bool {
    let window = ChronoDuration::from_std(config.interval * 2).unwrap_or(ChronoDuration::MAX);
    latest.polling_result == PollingResult::Succeed && latest.created_at > now - window
}

fn is_disconnected(history: &[polling_history::Model]) -> bool {
    if history.len() < DISCONNECT_EVIDENCE_COUNT {
        // not enough evidence to call it
        return false;
    }
    history[..DISCONNECT_EVIDENCE_COUNT]
        .iter()
        .all(|row| row.polling_result == PollingResult::Failed)
}

/// Fetches the recent history for one device and evaluates it.
pub async fn device_diagnostics(
    repo: &dyn Repository,
    strategy: &dyn PollingStrategy,
    device: device::Model,
    history_size: u64,
) -> Result<DeviceDiagnostics, DiagnosticsError> {
    let config = strategy
        .polling_config(&device.device_type)
        .and_then(|config| config.validate().map(|()| config))
        .map_err(|source| DiagnosticsError::Strategy {
            device_type: device.device_type.clone(),
            source,
        })?;

    let mut history = repo
        .get_device_polling_history(&device.device_id, history_size)
        .await?;
    history.sort_by(|a, b| b.created_at.cmp(&a.created_at));

    Ok(evaluate(&device, &history, &config, Utc::now()))
}

/// Paged listing with per-device diagnostics computed concurrently. A device
/// whose evaluation fails is logged and omitted from the page.
pub async fn list_device_diagnostics(
    repo: &Arc<dyn Repository>,
    strategy: &Arc<dyn PollingStrategy>,
    page: u64,
    size: u64,
    device_type: Option<&str>,
) -> Result<(Vec<DeviceDiagnostics>, u64), DiagnosticsError> {
    let (devices, total) = repo.get_devices_by_page(page, size, device_type).await?;
    if devices.is_empty() {
        return Ok((Vec::new(), total));
    }

    let lookups = devices.into_iter().map(|device| {
        let repo = repo.clone();
        let strategy = strategy.clone();
        async move {
            let device_id = device.device_id.clone();
            match device_diagnostics(
                repo.as_ref(),
                strategy.as_ref(),
                device,
                DEFAULT_HISTORY_CHECKING_SIZE,
            )
            .await
            {
                Ok(diagnostics) => Some(diagnostics),
                Err(e) => {
                    error!(device_id = %device_id, error = %e, "failed to get device diagnostics");
                    None
                }
            }
        }
    });

    let diagnostics = join_all(lookups).await.into_iter().flatten().collect();
    Ok((diagnostics, total))
}
