//! Command-line argument parsing

use std::path::PathBuf;

use clap::Parser;

use crate::core::types::{SecurityType, TransportKind, TransportPreference, UnitSystem};

#[derive(Parser, Debug, Clone)]
#[clap(name = "device-provisioner", version, author)]
#[clap(about = "Provision headless devices with Wi-Fi credentials over BLE or SoftAP")]
pub struct CliArgs {
    /// JSON file holding stored preferences
    #[clap(long, default_value = "provisioner-prefs.json")]
    pub preferences: PathBuf,

    /// Transport preference for this run (ble, softap, both)
    #[clap(long)]
    pub transport: Option<TransportPreference>,

    /// Security version for this run (0, 1, 2)
    #[clap(long, value_parser = parse_security)]
    pub security: Option<SecurityType>,

    /// Username for security 2 sessions
    #[clap(long)]
    pub username: Option<String>,

    /// Decoded QR code text
    #[clap(long)]
    pub qr: Option<String>,

    /// Device name, when not using a QR code
    #[clap(long)]
    pub device_name: Option<String>,

    /// Proof of possession, when not using a QR code
    #[clap(long)]
    pub pop: Option<String>,

    /// Transport to pick when asked to choose (ble, softap)
    #[clap(long, value_parser = parse_transport)]
    pub choose_transport: Option<TransportKind>,

    /// Switch to SoftAP when Bluetooth is unavailable
    #[clap(long)]
    pub accept_fallback: bool,

    /// How many manual reconnection offers to accept
    #[clap(long, default_value = "0")]
    pub manual_reconnects: usize,

    /// Network to join; typed in manually when not found by the scan
    #[clap(long)]
    pub ssid: String,

    /// Network password
    #[clap(long)]
    pub password: Option<String>,

    /// API key for the device configuration; no configuration is sent without it
    #[clap(long)]
    pub api_key: Option<String>,

    #[clap(long, default_value = "")]
    pub lat: String,

    #[clap(long, default_value = "")]
    pub lon: String,

    #[clap(long, default_value = "")]
    pub zipcode: String,

    #[clap(long, default_value = "")]
    pub country: String,

    /// Language code for the device configuration
    #[clap(long, default_value = "en")]
    pub lang: String,

    /// Unit system for the device configuration (standard, metric, imperial)
    #[clap(long, default_value = "standard")]
    pub units: UnitSystem,

    /// Simulated device scenario (JSON); the default scenario is used when omitted
    #[clap(long)]
    pub scenario: Option<PathBuf>,

    /// Wi-Fi scan limit in seconds
    #[clap(long)]
    pub scan_timeout: Option<u64>,

    /// Connection limit in seconds
    #[clap(long)]
    pub connect_timeout: Option<u64>,

    /// Check the host Bluetooth adapter and Wi-Fi station before connecting
    #[clap(long)]
    pub probe_host_radios: bool,

    /// Wireless network interface name
    #[clap(short, long, default_value = "wlan0")]
    pub interface: String,

    /// Bluetooth adapter name (default adapter when omitted)
    #[clap(long)]
    pub adapter: Option<String>,
}

fn parse_security(value: &str) -> Result<SecurityType, String> {
    let version: u8 = value
        .parse()
        .map_err(|_| format!("invalid security version: {value}"))?;
    SecurityType::try_from(version)
}

fn parse_transport(value: &str) -> Result<TransportKind, String> {
    match value.parse::<TransportPreference>()?.fixed() {
        Some(transport) => Ok(transport),
        None => Err("choose either ble or softap".to_string()),
    }
}
