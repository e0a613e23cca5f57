use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::enums;

#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("unsupported device type: {0}")]
    UnsupportedDeviceType(String),
    #[error("invalid polling config: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_delay: Duration,
    pub factor: f64,
    pub max_delay: Duration,
}

/// Per-device-type polling parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollingConfig {
    pub interval: Duration,
    pub timeout: Duration,
    pub batch_size: u64,
    pub backoff: BackoffConfig,
}

impl PollingConfig {
    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.interval < Duration::from_millis(1) {
            return Err(StrategyError::InvalidConfig(
                "polling interval must be greater than or equal to 1 millisecond".into(),
            ));
        }
        if self.timeout < Duration::from_millis(10) {
            return Err(StrategyError::InvalidConfig(
                "polling timeout must be greater than or equal to 10 milliseconds".into(),
            ));
        }
        if self.batch_size < 1 {
            return Err(StrategyError::InvalidConfig(
                "polling batch size must be greater than or equal to 1".into(),
            ));
        }
        if self.backoff.base_delay < Duration::from_millis(10) {
            return Err(StrategyError::InvalidConfig(
                "backoff base delay must be greater than or equal to 10 milliseconds".into(),
            ));
        }
        if self.backoff.max_delay < Duration::from_millis(100) {
            return Err(StrategyError::InvalidConfig(
                "backoff max delay must be greater than or equal to 100 milliseconds".into(),
            ));
        }
        if self.backoff.factor < 1.0 {
            return Err(StrategyError::InvalidConfig(
                "backoff factor must be greater than or equal to 1".into(),
            ));
        }
        if self.backoff.base_delay >= self.backoff.max_delay {
            return Err(StrategyError::InvalidConfig(
                "backoff base delay must be less than backoff max delay".into(),
            ));
        }
        Ok(())
    }
}

/// Maps a device type to its polling configuration.
pub trait PollingStrategy: Send + Sync {
    fn polling_config(&self, device_type: &str) -> Result<PollingConfig, StrategyError>;
}

/// Built-in strategy table. The batch size is shared across types and comes
/// from `POLLING_BATCH_SIZE`.
pub struct DefaultPollingStrategy {
    batch_size: u64,
}

impl DefaultPollingStrategy {
    pub fn new(batch_size: u64) -> Self {
        DefaultPollingStrategy { batch_size }
    }
}

impl PollingStrategy for DefaultPollingStrategy {
    fn polling_config(&self, device_type: &str) -> Result<PollingConfig, StrategyError> {
        match device_type {
            enums::ROUTER => Ok(PollingConfig {
                interval: Duration::from_secs(30),
                timeout: Duration::from_secs(10),
                batch_size: self.batch_size,
                backoff: BackoffConfig {
                    base_delay: Duration::from_secs(1),
                    factor: 2.0,
                    max_delay: Duration::from_secs(120),
                },
            }),
            enums::SWITCH => Ok(PollingConfig {
                interval: Duration::from_secs(60),
                timeout: Duration::from_secs(10),
                batch_size: self.batch_size,
                backoff: BackoffConfig {
                    base_delay: Duration::from_secs(1),
                    factor: 2.0,
                    max_delay: Duration::from_secs(300),
                },
            }),
            enums::CAMERA => Ok(PollingConfig {
                interval: Duration::from_secs(10),
                timeout: Duration::from_secs(3),
                batch_size: self.batch_size,
                backoff: BackoffConfig {
                    base_delay: Duration::from_millis(500),
                    factor: 2.0,
                    max_delay: Duration::from_secs(60),
                },
            }),
            enums::DOOR_ACCESS_SYSTEM => Ok(PollingConfig {
                interval: Duration::from_secs(10),
                timeout: Duration::from_secs(3),
                batch_size: self.batch_size,
                backoff: BackoffConfig {
                    base_delay: Duration::from_millis(500),
                    factor: 2.0,
                    max_delay: Duration::from_secs(30),
                },
            }),
            other => Err(StrategyError::UnsupportedDeviceType(other.to_string())),
        }
    }
}
