use std::io;
use std::str::Utf8Error;
use thiserror::Error;
use btleplug;
use serde_json;
use uuid;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Config file contains an invalid UUID: {source}")]
    UuidError { #[from] source: uuid::Error },
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start application (config): {source}")]
    Config { #[from] source: ConfigError },

    #[error("Failed to start application (bluetooth): {source}")]
    Transport { #[from] source: TransportError },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Permission to use the bluetooth radio was denied")]
    PermissionDenied,

    #[error("No usable bluetooth adapter is present")]
    NoAdapter,

    #[error("A write to a characteristic took too long")]
    WriteTimedOut,

    #[error("The discovery stream ended unexpectedly")]
    ScanInterrupted,

    #[error("Error communicating with device (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },
}

/**
 * Everything that can go wrong between "scan requested" and a working
 * command channel. Each variant maps to one failure the operator can see;
 * all of them except `LinkWriteFailed` end the current connection attempt.
 */
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("Permission to use the bluetooth radio was denied")]
    PermissionDenied,

    #[error("No device named {name} was found before the scan timed out")]
    DeviceNotFound { name: String },

    #[error("The scan could not be started: {detail}")]
    ScanFailed { detail: String },

    #[error("Failed to connect to {address}: {detail}")]
    ConnectFailed { address: String, detail: String },

    #[error("Service discovery failed: {detail}")]
    DiscoveryFailed { detail: String },

    #[error("The device does not expose the expected service and characteristic")]
    CapabilityNotFound,

    #[error("The connection to the device was lost")]
    LinkLost,

    #[error("Failed to write to the drive characteristic: {detail}")]
    LinkWriteFailed { detail: String },

    #[error("A scan or connection is already active")]
    AlreadyActive,
}
