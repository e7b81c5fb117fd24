//! Device session trait definition

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};
use tokio::sync::{broadcast, mpsc};
use trait_variant::make;

use crate::core::{
    error::{SessionError, SessionResult},
    types::{ConnectionFailureReason, SecurityType, SessionId, TransportKind, WifiNetwork},
};

/// Parameters for establishing a session with one device
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectParams {
    pub session_id: SessionId,
    pub transport: TransportKind,
    pub security: SecurityType,
    pub device_name: Option<String>,
    pub proof_of_possession: Option<String>,
    pub username: Option<String>,
}

impl std::fmt::Debug for ConnectParams {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectParams")
            .field("session_id", &self.session_id)
            .field("transport", &self.transport)
            .field("security", &self.security)
            .field("device_name", &self.device_name)
            .field(
                "proof_of_possession",
                &self.proof_of_possession.as_deref().map(secret_fingerprint),
            )
            .field("username", &self.username)
            .finish()
    }
}

/// Short, non-reversible tag for a secret so it can appear in logs
pub fn secret_fingerprint(secret: &str) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(secret.as_bytes());
    let digest = hasher.finalize();
    format!("sha3:{}", hex::encode(&digest[..4]))
}

/// Unsolicited connection state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionEventKind {
    Connected,
    Disconnected,
    ConnectionFailed,
}

/// Connection state change tagged with the session it belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub session: SessionId,
    pub kind: ConnectionEventKind,
}

/// Progress of an in-flight Wi-Fi scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanUpdate {
    /// Networks seen so far
    Found(Vec<WifiNetwork>),
    /// No more results will follow
    Finished,
    Failed(SessionError),
}

/// Outcome reported while the device applies Wi-Fi credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "detail", rename_all = "snake_case")]
pub enum ProvisionEvent {
    /// Secure session for the credential exchange could not be created
    SessionCreationFailed(String),
    /// Credentials reached the device
    WifiConfigSent,
    /// Credentials could not be sent
    WifiConfigFailed(String),
    /// Device accepted the credentials and started joining the network
    WifiConfigApplied,
    /// Device rejected the credentials
    WifiConfigApplyFailed(String),
    /// Device could not join the network
    ProvisioningFailedFromDevice(ConnectionFailureReason),
    /// Device joined the network
    DeviceProvisioningSuccess,
    /// Status could not be determined
    ProvisioningFailed(String),
}

/// Abstraction over the device session library
///
/// Implementations own the transport framing and the security handshake. Long
/// running operations report through channels so that the coordinator can
/// apply its own timeouts and serialize their results with connection events.
#[make(Send)]
pub trait DeviceSession: Sync + 'static {
    /// Connect to the device and run the security handshake
    async fn connect(&self, params: &ConnectParams) -> SessionResult<()>;

    /// Fetch the device's version info JSON
    async fn version_info(&self) -> SessionResult<String>;

    /// Start a Wi-Fi scan on the device
    fn scan_networks(&self) -> mpsc::UnboundedReceiver<ScanUpdate>;

    /// Abort an in-flight scan; no further updates are sent afterwards
    fn cancel_scan(&self);

    /// Send application data to a custom endpoint and return the device's reply
    async fn send_to_endpoint(&self, endpoint: &str, payload: &[u8]) -> SessionResult<Vec<u8>>;

    /// Hand Wi-Fi credentials to the device
    fn provision(&self, ssid: &str, password: &str) -> mpsc::UnboundedReceiver<ProvisionEvent>;

    /// Close the session; calling it on a closed session does nothing
    async fn disconnect(&self);

    /// Subscribe to unsolicited connection events
    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent>;
}
