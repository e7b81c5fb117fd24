//! Domain types for device provisioning

use serde::{Deserialize, Serialize};

use super::error::CredentialValidationError;

/// Channel used to reach the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Ble,
    SoftAp,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Ble => write!(f, "BLE"),
            TransportKind::SoftAp => write!(f, "SoftAP"),
        }
    }
}

/// Operator's stored transport preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportPreference {
    Ble,
    SoftAp,
    #[default]
    Both,
}

impl TransportPreference {
    /// The single transport this preference pins, if any
    pub fn fixed(self) -> Option<TransportKind> {
        match self {
            TransportPreference::Ble => Some(TransportKind::Ble),
            TransportPreference::SoftAp => Some(TransportKind::SoftAp),
            TransportPreference::Both => None,
        }
    }

    pub fn allows(self, transport: TransportKind) -> bool {
        self.fixed().is_none_or(|fixed| fixed == transport)
    }
}

impl std::str::FromStr for TransportPreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ble" => Ok(TransportPreference::Ble),
            "softap" => Ok(TransportPreference::SoftAp),
            "both" => Ok(TransportPreference::Both),
            other => Err(format!("unknown transport preference: {other}")),
        }
    }
}

/// Handshake level used for the credential exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
#[repr(u8)]
pub enum SecurityType {
    Security0 = 0,
    Security1 = 1,
    #[default]
    Security2 = 2,
}

impl SecurityType {
    /// Map an advertised version onto the supported range, clamping out-of-range values
    pub fn from_version_clamped(version: i64) -> Self {
        match version.clamp(0, 2) {
            0 => SecurityType::Security0,
            1 => SecurityType::Security1,
            _ => SecurityType::Security2,
        }
    }

    pub fn version(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for SecurityType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(SecurityType::Security0),
            1 => Ok(SecurityType::Security1),
            2 => Ok(SecurityType::Security2),
            other => Err(format!("unsupported security version: {other}")),
        }
    }
}

impl From<SecurityType> for u8 {
    fn from(security: SecurityType) -> Self {
        security as u8
    }
}

impl std::fmt::Display for SecurityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SECURITY_{}", self.version())
    }
}

/// Wi-Fi authentication mode as reported in scan results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AuthMode {
    Open = 0,
    Wep = 1,
    WpaPsk = 2,
    Wpa2Psk = 3,
    WpaWpa2Psk = 4,
    Wpa2Enterprise = 5,
    Wpa3Psk = 6,
    Wpa2Wpa3Psk = 7,
}

impl AuthMode {
    pub fn is_open(self) -> bool {
        self == AuthMode::Open
    }
}

impl TryFrom<u8> for AuthMode {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, <Self as TryFrom<u8>>::Error> {
        match value {
            0 => Ok(AuthMode::Open),
            1 => Ok(AuthMode::Wep),
            2 => Ok(AuthMode::WpaPsk),
            3 => Ok(AuthMode::Wpa2Psk),
            4 => Ok(AuthMode::WpaWpa2Psk),
            5 => Ok(AuthMode::Wpa2Enterprise),
            6 => Ok(AuthMode::Wpa3Psk),
            7 => Ok(AuthMode::Wpa2Wpa3Psk),
            _ => Err(()),
        }
    }
}

/// A Wi-Fi network seen by the device during a scan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WifiNetwork {
    /// Network SSID
    pub ssid: String,
    /// MAC address (BSSID)
    #[serde(default)]
    pub bssid: String,
    /// Channel number
    #[serde(default)]
    pub channel: u16,
    /// Signal strength in dBm
    pub rssi: i16,
    /// Authentication mode
    pub auth_mode: AuthMode,
}

/// One row of the list offered to the operator after a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanEntry {
    Network(WifiNetwork),
    /// "Join other network": the operator types the SSID
    JoinOtherNetwork,
}

impl ScanEntry {
    pub fn is_manual(&self) -> bool {
        matches!(self, ScanEntry::JoinOtherNetwork)
    }

    pub fn label(&self) -> &str {
        match self {
            ScanEntry::Network(network) => &network.ssid,
            ScanEntry::JoinOtherNetwork => "Join other network",
        }
    }
}

/// Snapshot of what the device reported about itself after connecting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceCapabilities {
    /// Provisioning protocol version string, if reported
    pub protocol_version: Option<String>,
    /// Security version the device advertises (already clamped)
    pub security: Option<SecurityType>,
    /// Free-form feature flags such as `wifi_scan`
    pub features: Vec<String>,
}

impl DeviceCapabilities {
    pub const WIFI_SCAN: &'static str = "wifi_scan";

    pub fn supports_wifi_scan(&self) -> bool {
        self.has_feature(Self::WIFI_SCAN)
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.iter().any(|f| f == feature)
    }
}

/// Wi-Fi credentials handed to the device
#[derive(Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    pub ssid: String,
    pub password: String,
    /// Authentication mode of the chosen network; `None` for a manually entered SSID
    pub auth_mode: Option<AuthMode>,
}

impl WifiCredentials {
    /// Credentials for a scanned network; the password is dropped for open networks
    pub fn for_network(network: &WifiNetwork, password: impl Into<String>) -> Self {
        let password = if network.auth_mode.is_open() {
            String::new()
        } else {
            password.into()
        };

        Self {
            ssid: network.ssid.clone(),
            password,
            auth_mode: Some(network.auth_mode),
        }
    }

    /// Credentials for an SSID typed by the operator
    pub fn manual(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
            auth_mode: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.auth_mode.is_some_and(AuthMode::is_open)
    }

    /// Reject credentials the device could never use
    ///
    /// The SSID must be non-empty. A password is required when the network is known
    /// to be protected and must be empty when it is known to be open.
    pub fn validate(&self) -> Result<(), CredentialValidationError> {
        if self.ssid.trim().is_empty() {
            return Err(CredentialValidationError::EmptySsid);
        }

        match self.auth_mode {
            Some(mode) if mode.is_open() && !self.password.is_empty() => {
                Err(CredentialValidationError::PasswordForOpenNetwork)
            }
            Some(mode) if !mode.is_open() && self.password.is_empty() => {
                Err(CredentialValidationError::EmptyPassword)
            }
            _ => Ok(()),
        }
    }
}

// Keep passwords out of logs
impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("password", &if self.password.is_empty() { "" } else { "***" })
            .field("auth_mode", &self.auth_mode)
            .finish()
    }
}

/// Unit system understood by the device application
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum UnitSystem {
    #[default]
    Standard = 0,
    Metric = 1,
    Imperial = 2,
}

impl UnitSystem {
    pub fn ordinal(self) -> u8 {
        self as u8
    }
}

impl std::str::FromStr for UnitSystem {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" => Ok(UnitSystem::Standard),
            "metric" => Ok(UnitSystem::Metric),
            "imperial" => Ok(UnitSystem::Imperial),
            other => Err(format!("unknown unit system: {other}")),
        }
    }
}

/// Location given either as coordinates or as postal code plus country
#[derive(Debug, Clone, PartialEq)]
pub enum Location {
    Coordinates { latitude: f64, longitude: f64 },
    PostalCode { zip_code: String, country_code: String },
}

impl Default for Location {
    fn default() -> Self {
        Location::PostalCode {
            zip_code: String::new(),
            country_code: String::new(),
        }
    }
}

/// Application payload delivered through the custom endpoint
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfiguration {
    pub api_key: String,
    pub location: Location,
    pub language_code: String,
    pub unit_system: UnitSystem,
}

impl DeviceConfiguration {
    pub const DEFAULT_LANGUAGE_CODE: &'static str = "en";
    pub const DEFAULT_UNIT_SYSTEM: UnitSystem = UnitSystem::Standard;

    pub fn new(api_key: impl Into<String>, location: Location) -> Self {
        Self {
            api_key: api_key.into(),
            location,
            language_code: Self::DEFAULT_LANGUAGE_CODE.to_string(),
            unit_system: Self::DEFAULT_UNIT_SYSTEM,
        }
    }

    pub fn with_language(mut self, language_code: impl Into<String>) -> Self {
        self.language_code = language_code.into();
        self
    }

    pub fn with_units(mut self, unit_system: UnitSystem) -> Self {
        self.unit_system = unit_system;
        self
    }
}

/// Step of the delivery sequence, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ProvisioningStep {
    SendingConfiguration = 0,
    SendingWifiCredentials = 1,
    AttemptingConnection = 2,
    VerifyingStatus = 3,
    Complete = 4,
}

impl ProvisioningStep {
    pub const ALL: [ProvisioningStep; 5] = [
        ProvisioningStep::SendingConfiguration,
        ProvisioningStep::SendingWifiCredentials,
        ProvisioningStep::AttemptingConnection,
        ProvisioningStep::VerifyingStatus,
        ProvisioningStep::Complete,
    ];

    pub fn ordinal(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Self> {
        Self::ALL.get(self.ordinal() + 1).copied()
    }
}

/// Reason reported by the device when it could not join the network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionFailureReason {
    AuthFailed,
    NetworkNotFound,
    DeviceDisconnected,
    Unknown,
}

/// Session identifier scoping connection events to one provisioning attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
