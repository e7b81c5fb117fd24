//! wpa_supplicant station probe
//!
//! SoftAP provisioning only works while the host is joined to the device's
//! access point. The station status tells which network that is.

use tracing::{debug, error, warn};
use wifi_ctrl::sta::WifiSetup;

/// Reads the station status of one wireless interface
#[derive(Debug, Clone)]
pub struct StationProbe {
    interface: String,
}

impl StationProbe {
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    fn socket_path(&self) -> String {
        format!("/var/run/wpa_supplicant/{}", self.interface)
    }

    /// SSID the station is associated with, or `None` when not joined or unknown
    pub async fn ssid(&self) -> Option<String> {
        let mut setup = match WifiSetup::new() {
            Ok(setup) => setup,
            Err(e) => {
                warn!("wpa_supplicant unavailable: {}", e);
                return None;
            }
        };
        setup.set_socket_path(self.socket_path());

        let client = setup.get_request_client();
        let station = setup.complete();
        let runtime = tokio::spawn(async move {
            if let Err(e) = station.run().await {
                error!("WifiStation runtime error: {}", e);
            }
        });

        let status = client.get_status().await;
        runtime.abort();

        match status {
            Ok(status) => {
                let joined = status
                    .get("wpa_state")
                    .is_some_and(|state| state == "COMPLETED");
                let ssid = status.get("ssid").cloned().filter(|_| joined);
                debug!(interface = %self.interface, ?ssid, "Station status");
                ssid
            }
            Err(e) => {
                warn!("Failed to read station status: {}", e);
                None
            }
        }
    }
}
