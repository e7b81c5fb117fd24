//! Host radio checks
//!
//! The device session library owns the link to the device. These probes only
//! look at the host's own radios before a connection is attempted.

pub mod ble;
pub mod softap;

use trait_variant::make;

pub use {ble::BluezProbe, softap::StationProbe};

/// Availability of the host radios used to reach a device
#[make(Send)]
pub trait RadioProbe: Sync + 'static {
    /// Whether a powered Bluetooth adapter is present
    async fn bluetooth_available(&self) -> bool;

    /// SSID of the network the host station is joined to, if known
    async fn station_ssid(&self) -> Option<String>;
}

/// Probe backed by BlueZ and wpa_supplicant
#[derive(Debug, Clone)]
pub struct HostRadio {
    bluetooth: BluezProbe,
    station: StationProbe,
}

impl HostRadio {
    pub fn new(adapter: Option<String>, interface: impl Into<String>) -> Self {
        Self {
            bluetooth: BluezProbe::new(adapter),
            station: StationProbe::new(interface),
        }
    }
}

impl RadioProbe for HostRadio {
    async fn bluetooth_available(&self) -> bool {
        self.bluetooth.is_powered().await
    }

    async fn station_ssid(&self) -> Option<String> {
        self.station.ssid().await
    }
}

/// Probe with fixed answers
#[derive(Debug, Clone, Default)]
pub struct StaticRadio {
    pub bluetooth: bool,
    pub station_ssid: Option<String>,
}

impl StaticRadio {
    /// Bluetooth powered, station state unknown
    pub fn available() -> Self {
        Self {
            bluetooth: true,
            station_ssid: None,
        }
    }
}

impl RadioProbe for StaticRadio {
    async fn bluetooth_available(&self) -> bool {
        self.bluetooth
    }

    async fn station_ssid(&self) -> Option<String> {
        self.station_ssid.clone()
    }
}
