//! Device Provisioner
//!
//! Coordinates provisioning of headless Wi-Fi devices reachable over
//! Bluetooth Low Energy or a device-hosted access point (SoftAP):
//! - discovery and security negotiation
//! - Wi-Fi network selection with a bounded scan
//! - configuration and credential delivery with step-level progress

pub mod config;
pub mod core;
pub mod protocol;
pub mod session;
pub mod transport;

pub use core::{
    delivery::{FailureCause, ProvisioningState, WorkflowStatus},
    error::{DiscoveryError, ProvisioningError, SessionError},
    service::Provisioner,
    types::{
        DeviceConfiguration, ProvisioningStep, SecurityType, TransportKind, TransportPreference,
        WifiCredentials, WifiNetwork,
    },
};
