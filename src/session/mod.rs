//! Device session abstraction layer

pub mod device_session;
pub mod guard;
pub mod simulated;

pub use {
    device_session::{
        ConnectParams, ConnectionEvent, ConnectionEventKind, DeviceSession, ProvisionEvent,
        ScanUpdate, secret_fingerprint,
    },
    guard::SessionGuard,
    simulated::{Scenario, SimulatedDevice},
};
