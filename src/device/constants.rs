use uuid::Uuid;

/**
 * The advertised name of the rover. Scanning matches on this name only.
 */
pub const DEVICE_NAME: &str = "ArloBot";

/**
 * The UUID of the Bluetooth BLE service exposed by the rover firmware.
 */
pub const DRIVE_SERVICE: &str = "19b10000-e8f2-537e-4f6c-d104768a1214";

/**
 * The UUID of the writable GATT characteristic that drive commands go to.
 */
pub const DRIVE_CHARACTERISTIC: &str = "19b10001-e8f2-537e-4f6c-d104768a1214";

/**
 * How long (milliseconds) a scan runs before giving up on finding the rover.
 */
pub const SCAN_TIMEOUT: u64 = 10_000;

/**
 * How long (milliseconds) to let a fresh connection settle before starting
 * service discovery. Discovering immediately after connect is unreliable on
 * several BLE stacks.
 */
pub const SETTLE_DELAY: u64 = 600;

/**
 * The minimum gap (milliseconds) between two drive command writes. Joystick
 * positions arriving faster than this are coalesced, latest wins.
 */
pub const MIN_SEND_INTERVAL: u64 = 50;

/**
 * How long (milliseconds) a write to the drive characteristic may take.
 */
pub const WRITE_DEADLINE: u64 = 2000;

/**
 * How many times to attempt service discovery on one connection before
 * giving up.
 */
pub const MAX_DISCOVERY_ATTEMPTS: u32 = 3;

pub fn make_drive_service_uuid() -> Uuid {
    Uuid::parse_str(DRIVE_SERVICE).unwrap()
}

pub fn make_drive_characteristic_uuid() -> Uuid {
    Uuid::parse_str(DRIVE_CHARACTERISTIC).unwrap()
}
