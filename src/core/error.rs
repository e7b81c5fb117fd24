//! Error types for the provisioning coordinator

use std::time::Duration;

use thiserror::Error;

use super::{
    delivery::FailureCause,
    types::{ProvisioningStep, SecurityType, TransportKind, TransportPreference},
};

/// Result type for device session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for discovery and negotiation
pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

/// Result type for the delivery workflow
pub type ProvisioningResult<T> = Result<T, ProvisioningError>;

/// Result type for settings and preferences
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors reported by the device session library
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Session not connected")]
    NotConnected,

    #[error("Capabilities unavailable: {0}")]
    CapabilitiesUnavailable(String),

    #[error("Wi-Fi scan failed: {0}")]
    ScanFailed(String),

    #[error("Endpoint '{endpoint}' failed: {message}")]
    Endpoint { endpoint: String, message: String },
}

/// Errors surfaced while obtaining a connected, negotiated session
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Discovery cancelled by operator")]
    Cancelled,

    #[error("Invalid QR code: {0}")]
    InvalidQrCode(#[from] PayloadError),

    #[error("Device uses {requested}, but only {allowed:?} is configured")]
    TransportNotSupported {
        requested: TransportKind,
        allowed: TransportPreference,
    },

    #[error("Bluetooth is not available on this host")]
    BluetoothUnavailable,

    #[error("Discovery failed over {transport}: {cause}")]
    Failed {
        transport: TransportKind,
        cause: SessionError,
    },

    #[error("Security mismatch: configured {configured}, device supports {device}")]
    SecurityMismatch {
        configured: SecurityType,
        device: SecurityType,
    },

    #[error("Device disconnected over {transport}")]
    Disconnected { transport: TransportKind },
}

/// Credential problems caught before anything is sent to the device
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialValidationError {
    #[error("SSID must not be empty")]
    EmptySsid,

    #[error("Password must not be empty for a protected network")]
    EmptyPassword,

    #[error("Open networks do not take a password")]
    PasswordForOpenNetwork,
}

/// Errors terminating a delivery run
#[derive(Error, Debug)]
pub enum ProvisioningError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(#[from] CredentialValidationError),

    #[error("Invalid payload: {0}")]
    Payload(#[from] PayloadError),

    #[error("Provisioning failed at {step:?}: {cause}")]
    StepFailed {
        step: ProvisioningStep,
        cause: FailureCause,
    },

    #[error("Device disconnected unexpectedly at {step:?}")]
    UnexpectedDisconnect { step: ProvisioningStep },

    #[error("Provisioning already finished")]
    AlreadyFinished,

    #[error("No device connected")]
    NoDevice,

    #[error("Device disconnected before delivery started")]
    DeviceDisconnected,

    #[error("Cancelled by operator")]
    Cancelled,
}

/// Errors parsing or producing wire payloads
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing field: {0}")]
    MissingField(&'static str),

    #[error("Unsupported payload version: {0}")]
    UnsupportedVersion(String),

    #[error("Unsupported transport: {0}")]
    UnsupportedTransport(String),

    #[error("Invalid coordinate: {0}")]
    InvalidCoordinate(String),
}

/// Errors loading settings or preferences
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid value for '{key}': {value}")]
    InvalidValue { key: String, value: String },
}
