//! Scriptable device session
//!
//! Plays back a [`Scenario`] instead of talking to real hardware. Used by the
//! test suite and by the CLI for dry runs.

use std::{
    path::Path,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Deserialize;
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};
use tracing::debug;

use crate::{
    core::{
        error::{ConfigResult, SessionError, SessionResult},
        types::{SessionId, WifiNetwork},
    },
    session::{
        ConnectParams, ConnectionEvent, ConnectionEventKind, DeviceSession, ProvisionEvent,
        ScanUpdate,
    },
};

const EVENT_CHANNEL_CAPACITY: usize = 16;

/// How the simulated device answers a connect request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectBehavior {
    #[default]
    Succeed,
    Fail(String),
    /// Never answer
    Hang,
}

/// How the simulated device answers a scan request
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanBehavior {
    #[default]
    Complete,
    Fail(String),
    /// Report the networks but never finish
    Partial,
    /// Never answer
    Hang,
}

/// Script for one simulated device
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Scenario {
    pub connect: ConnectBehavior,
    pub version_info: String,
    /// Drop the link while the version info is being fetched (first connection only)
    pub drop_during_negotiation: bool,
    pub networks: Vec<WifiNetwork>,
    pub scan: ScanBehavior,
    pub scan_delay_ms: u64,
    /// Reject data sent to custom endpoints with this message
    pub endpoint_error: Option<String>,
    pub endpoint_reply: String,
    /// Pause before answering a custom endpoint request
    pub endpoint_delay_ms: u64,
    pub provision: Vec<ProvisionEvent>,
    /// Pause before each provision event
    pub provision_delay_ms: u64,
    /// Emit a disconnect instead of the provision event at this index
    pub disconnect_at: Option<usize>,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            connect: ConnectBehavior::Succeed,
            version_info: r#"{"prov":{"ver":"v1.1","sec_ver":2,"cap":["wifi_scan"]}}"#.into(),
            drop_during_negotiation: false,
            networks: Vec::new(),
            scan: ScanBehavior::Complete,
            scan_delay_ms: 0,
            endpoint_error: None,
            endpoint_reply: "ok".into(),
            endpoint_delay_ms: 0,
            provision: vec![
                ProvisionEvent::WifiConfigSent,
                ProvisionEvent::WifiConfigApplied,
                ProvisionEvent::DeviceProvisioningSuccess,
            ],
            provision_delay_ms: 0,
            disconnect_at: None,
        }
    }
}

impl Scenario {
    /// Load a scenario from a JSON file
    pub fn from_file(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    session: Option<SessionId>,
    connected: bool,
    connect_calls: Vec<ConnectParams>,
    disconnect_count: usize,
    scan_requests: usize,
    scan_cancelled: bool,
    scan_task: Option<JoinHandle<()>>,
    endpoint_payloads: Vec<(String, Vec<u8>)>,
    provisioned: Option<(String, String)>,
}

/// Device session that follows a [`Scenario`]
#[derive(Debug)]
pub struct SimulatedDevice {
    scenario: Mutex<Scenario>,
    state: Mutex<SimulatedState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl SimulatedDevice {
    /// Create a device with the default scenario
    pub fn new() -> Self {
        Self::with_scenario(Scenario::default())
    }

    pub fn with_scenario(scenario: Scenario) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            scenario: Mutex::new(scenario),
            state: Mutex::new(SimulatedState::default()),
            events,
        }
    }

    fn scenario(&self) -> MutexGuard<'_, Scenario> {
        self.scenario.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn state(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inject an unsolicited connection event for the current session
    pub fn emit(&self, kind: ConnectionEventKind) {
        let session = self.state().session;
        if let Some(session) = session {
            let _ = self.events.send(ConnectionEvent { session, kind });
        }
    }

    pub fn connect_calls(&self) -> Vec<ConnectParams> {
        self.state().connect_calls.clone()
    }

    pub fn disconnect_count(&self) -> usize {
        self.state().disconnect_count
    }

    pub fn is_connected(&self) -> bool {
        self.state().connected
    }

    pub fn scan_requests(&self) -> usize {
        self.state().scan_requests
    }

    pub fn scan_cancelled(&self) -> bool {
        self.state().scan_cancelled
    }

    pub fn endpoint_payloads(&self) -> Vec<(String, Vec<u8>)> {
        self.state().endpoint_payloads.clone()
    }

    pub fn provisioned_credentials(&self) -> Option<(String, String)> {
        self.state().provisioned.clone()
    }
}

impl Default for SimulatedDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSession for SimulatedDevice {
    async fn connect(&self, params: &ConnectParams) -> SessionResult<()> {
        {
            let mut state = self.state();
            state.connect_calls.push(params.clone());
            state.session = Some(params.session_id);
        }

        let behavior = self.scenario().connect.clone();
        match behavior {
            ConnectBehavior::Succeed => {
                self.state().connected = true;
                self.emit(ConnectionEventKind::Connected);
                Ok(())
            }
            ConnectBehavior::Fail(message) => {
                self.emit(ConnectionEventKind::ConnectionFailed);
                Err(SessionError::ConnectionFailed(message))
            }
            ConnectBehavior::Hang => std::future::pending().await,
        }
    }

    async fn version_info(&self) -> SessionResult<String> {
        if !self.state().connected {
            return Err(SessionError::NotConnected);
        }

        let drop_link = std::mem::take(&mut self.scenario().drop_during_negotiation);
        if drop_link {
            self.state().connected = false;
            self.emit(ConnectionEventKind::Disconnected);
            return std::future::pending().await;
        }

        Ok(self.scenario().version_info.clone())
    }

    fn scan_networks(&self) -> mpsc::UnboundedReceiver<ScanUpdate> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (behavior, networks, delay) = {
            let scenario = self.scenario();
            (
                scenario.scan.clone(),
                scenario.networks.clone(),
                Duration::from_millis(scenario.scan_delay_ms),
            )
        };

        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match behavior {
                ScanBehavior::Complete => {
                    let _ = tx.send(ScanUpdate::Found(networks));
                    let _ = tx.send(ScanUpdate::Finished);
                }
                ScanBehavior::Fail(message) => {
                    let _ = tx.send(ScanUpdate::Failed(SessionError::ScanFailed(message)));
                }
                ScanBehavior::Partial => {
                    let _ = tx.send(ScanUpdate::Found(networks));
                    std::future::pending::<()>().await;
                }
                ScanBehavior::Hang => {
                    // Hold the sender so the receiver never sees a closed channel
                    let _tx = tx;
                    std::future::pending::<()>().await;
                }
            }
        });

        let mut state = self.state();
        state.scan_requests += 1;
        state.scan_cancelled = false;
        if let Some(previous) = state.scan_task.replace(task) {
            previous.abort();
        }

        rx
    }

    fn cancel_scan(&self) {
        let mut state = self.state();
        if let Some(task) = state.scan_task.take() {
            task.abort();
        }
        state.scan_cancelled = true;
        debug!("Simulated scan cancelled");
    }

    async fn send_to_endpoint(&self, endpoint: &str, payload: &[u8]) -> SessionResult<Vec<u8>> {
        {
            let mut state = self.state();
            if !state.connected {
                return Err(SessionError::NotConnected);
            }
            state
                .endpoint_payloads
                .push((endpoint.to_string(), payload.to_vec()));
        }

        let (delay, reply) = {
            let scenario = self.scenario();
            let reply = match &scenario.endpoint_error {
                Some(message) => Err(SessionError::Endpoint {
                    endpoint: endpoint.to_string(),
                    message: message.clone(),
                }),
                None => Ok(scenario.endpoint_reply.clone().into_bytes()),
            };
            (Duration::from_millis(scenario.endpoint_delay_ms), reply)
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        reply
    }

    fn provision(&self, ssid: &str, password: &str) -> mpsc::UnboundedReceiver<ProvisionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let (script, delay, disconnect_at) = {
            let scenario = self.scenario();
            (
                scenario.provision.clone(),
                Duration::from_millis(scenario.provision_delay_ms),
                scenario.disconnect_at,
            )
        };
        let session = {
            let mut state = self.state();
            state.provisioned = Some((ssid.to_string(), password.to_string()));
            state.session
        };
        let events = self.events.clone();

        tokio::spawn(async move {
            for (index, event) in script.into_iter().enumerate() {
                if delay.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(delay).await;
                }
                if disconnect_at == Some(index) {
                    if let Some(session) = session {
                        let _ = events.send(ConnectionEvent {
                            session,
                            kind: ConnectionEventKind::Disconnected,
                        });
                    }
                    // Keep the channel open, the device just went silent
                    std::future::pending::<()>().await;
                }
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        rx
    }

    async fn disconnect(&self) {
        let mut state = self.state();
        state.disconnect_count += 1;
        state.connected = false;
    }

    fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }
}
