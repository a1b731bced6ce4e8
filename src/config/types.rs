use std::time::Duration;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::channel::SendPolicy;
use crate::device::constants::{
    DEVICE_NAME, DRIVE_CHARACTERISTIC, DRIVE_SERVICE, MAX_DISCOVERY_ATTEMPTS, MIN_SEND_INTERVAL,
    SCAN_TIMEOUT, SETTLE_DELAY, WRITE_DEADLINE,
};
use crate::device::types::{DeviceIdentity, LinkTuning};
use crate::error::ConfigError;

/**
 * The persisted settings. All durations are stored in milliseconds and the
 * UUIDs as strings so the file stays hand-editable; missing fields fall
 * back to the built-in defaults.
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub device_name: String,
    pub service_uuid: String,
    pub characteristic_uuid: String,
    pub scan_timeout_ms: u64,
    pub settle_delay_ms: u64,
    pub min_send_interval_ms: u64,
    pub write_deadline_ms: u64,
    pub max_discovery_attempts: u32,
    pub send_policy: SendPolicy,
}

impl Config {
    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        Ok(DeviceIdentity {
            name: self.device_name.clone(),
            service: Uuid::parse_str(&self.service_uuid)?,
            characteristic: Uuid::parse_str(&self.characteristic_uuid)?,
        })
    }

    pub fn tuning(&self) -> LinkTuning {
        LinkTuning {
            scan_timeout: Duration::from_millis(self.scan_timeout_ms),
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            min_send_interval: Duration::from_millis(self.min_send_interval_ms),
            max_discovery_attempts: self.max_discovery_attempts,
            send_policy: self.send_policy,
        }
    }

    pub fn write_deadline(&self) -> Duration {
        Duration::from_millis(self.write_deadline_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            device_name: DEVICE_NAME.to_string(),
            service_uuid: DRIVE_SERVICE.to_string(),
            characteristic_uuid: DRIVE_CHARACTERISTIC.to_string(),
            scan_timeout_ms: SCAN_TIMEOUT,
            settle_delay_ms: SETTLE_DELAY,
            min_send_interval_ms: MIN_SEND_INTERVAL,
            write_deadline_ms: WRITE_DEADLINE,
            max_discovery_attempts: MAX_DISCOVERY_ATTEMPTS,
            send_policy: SendPolicy::Coalesce,
        }
    }
}
