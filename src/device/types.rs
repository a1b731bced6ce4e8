use std::time::Duration;
use uuid::Uuid;

use crate::device::channel::SendPolicy;
use crate::device::constants::{
    make_drive_characteristic_uuid, make_drive_service_uuid, DEVICE_NAME, MAX_DISCOVERY_ATTEMPTS,
    MIN_SEND_INTERVAL, SCAN_TIMEOUT, SETTLE_DELAY,
};
use crate::error::LinkError;

/**
 * The fixed identifiers of the target device: the advertised name the scan
 * matches on and the service/characteristic pair that must be present
 * before the link accepts commands.
 */
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    pub name: String,
    pub service: Uuid,
    pub characteristic: Uuid,
}

impl Default for DeviceIdentity {
    fn default() -> DeviceIdentity {
        DeviceIdentity {
            name: String::from(DEVICE_NAME),
            service: make_drive_service_uuid(),
            characteristic: make_drive_characteristic_uuid(),
        }
    }
}

/**
 * Timing and policy knobs for the link.
 */
#[derive(Debug, Clone)]
pub struct LinkTuning {
    pub scan_timeout: Duration,
    pub settle_delay: Duration,
    pub min_send_interval: Duration,
    pub max_discovery_attempts: u32,
    pub send_policy: SendPolicy,
}

impl Default for LinkTuning {
    fn default() -> LinkTuning {
        LinkTuning {
            scan_timeout: Duration::from_millis(SCAN_TIMEOUT),
            settle_delay: Duration::from_millis(SETTLE_DELAY),
            min_send_interval: Duration::from_millis(MIN_SEND_INTERVAL),
            max_discovery_attempts: MAX_DISCOVERY_ATTEMPTS,
            send_policy: SendPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    Requested,
    Shutdown,
    ConnectFailed,
    DiscoveryFailed,
    CapabilityNotFound,
    LinkLost,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    ScanStarted,
    DeviceFound { name: String },
    Connecting { address: String },
    Connected,
    CapabilitiesReady,
    Disconnected { reason: DisconnectReason },
    Error(LinkError),
}
