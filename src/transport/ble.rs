//! BlueZ adapter probe

use tracing::{debug, info, warn};

/// Checks that the host Bluetooth adapter is present and powered
#[derive(Debug, Clone, Default)]
pub struct BluezProbe {
    adapter: Option<String>,
}

impl BluezProbe {
    /// Probe the named adapter, or the default one when `None`
    pub fn new(adapter: Option<String>) -> Self {
        Self { adapter }
    }

    async fn powered(&self) -> bluer::Result<bool> {
        let session = bluer::Session::new().await?;
        let adapter = match &self.adapter {
            Some(name) => session.adapter(name)?,
            None => session.default_adapter().await?,
        };

        debug!("Using BLE adapter: {}", adapter.name());
        adapter.is_powered().await
    }

    pub async fn is_powered(&self) -> bool {
        match self.powered().await {
            Ok(true) => true,
            Ok(false) => {
                info!("Bluetooth adapter is powered off");
                false
            }
            Err(e) => {
                warn!("Bluetooth adapter unavailable: {}", e);
                false
            }
        }
    }
}
