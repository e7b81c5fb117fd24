//! Wi-Fi network selection
//!
//! Scans run on the device under a wall-clock limit enforced here, not by the
//! session. Whatever arrived before the limit is offered, followed by the
//! "join other network" entry.

use std::{
    collections::VecDeque,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{Stream, StreamExt};
use tokio::{sync::mpsc, time::Sleep};
use tracing::{debug, info, warn};

use crate::{
    core::{
        error::{CredentialValidationError, SessionError},
        types::{DeviceCapabilities, ScanEntry, WifiCredentials, WifiNetwork},
    },
    session::{DeviceSession, ScanUpdate},
};

/// Default limit for one scan
pub const DEFAULT_SCAN_TIMEOUT: Duration = Duration::from_secs(15);

/// How a scan ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Completed,
    /// No terminal result within the limit; the scan was cancelled
    TimedOut,
    Failed(SessionError),
    /// Device cannot scan; only manual entry is offered
    Skipped,
}

/// Entries offered to the operator after a scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanResults {
    pub outcome: ScanOutcome,
    /// Networks in arrival order, always ending with [`ScanEntry::JoinOtherNetwork`]
    pub entries: Vec<ScanEntry>,
}

impl ScanResults {
    pub fn networks(&self) -> impl Iterator<Item = &WifiNetwork> {
        self.entries.iter().filter_map(|entry| match entry {
            ScanEntry::Network(network) => Some(network),
            ScanEntry::JoinOtherNetwork => None,
        })
    }
}

/// In-flight scan as a finite stream of entries
///
/// Yields networks as the device reports them, then the manual-entry sentinel,
/// then ends. The stream cannot be restarted; start a new scan instead.
/// Dropping it before it ends cancels the scan on the device.
pub struct NetworkScan<'a, S: DeviceSession> {
    session: &'a S,
    updates: mpsc::UnboundedReceiver<ScanUpdate>,
    deadline: Pin<Box<Sleep>>,
    buffered: VecDeque<WifiNetwork>,
    outcome: Option<ScanOutcome>,
    sentinel_sent: bool,
}

impl<'a, S: DeviceSession> NetworkScan<'a, S> {
    fn start(session: &'a S, timeout: Duration) -> Self {
        debug!(?timeout, "Starting Wi-Fi scan");
        Self {
            session,
            updates: session.scan_networks(),
            deadline: Box::pin(tokio::time::sleep(timeout)),
            buffered: VecDeque::new(),
            outcome: None,
            sentinel_sent: false,
        }
    }

    /// How the scan ended, once it has
    pub fn outcome(&self) -> Option<&ScanOutcome> {
        self.outcome.as_ref()
    }

    fn finish(&mut self, outcome: ScanOutcome) {
        match &outcome {
            ScanOutcome::Completed => debug!("Wi-Fi scan completed"),
            ScanOutcome::TimedOut => {
                self.session.cancel_scan();
                warn!("Wi-Fi scan timed out, offering partial results");
            }
            ScanOutcome::Failed(e) => warn!("Wi-Fi scan failed: {e}"),
            ScanOutcome::Skipped => {}
        }
        self.outcome = Some(outcome);
    }
}

impl<S: DeviceSession> Stream for NetworkScan<'_, S> {
    type Item = ScanEntry;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if let Some(network) = this.buffered.pop_front() {
                return Poll::Ready(Some(ScanEntry::Network(network)));
            }

            if this.outcome.is_some() {
                if this.sentinel_sent {
                    return Poll::Ready(None);
                }
                this.sentinel_sent = true;
                return Poll::Ready(Some(ScanEntry::JoinOtherNetwork));
            }

            match this.updates.poll_recv(cx) {
                Poll::Ready(Some(ScanUpdate::Found(networks))) => {
                    this.buffered.extend(networks);
                    continue;
                }
                Poll::Ready(Some(ScanUpdate::Finished)) | Poll::Ready(None) => {
                    this.finish(ScanOutcome::Completed);
                    continue;
                }
                Poll::Ready(Some(ScanUpdate::Failed(e))) => {
                    this.finish(ScanOutcome::Failed(e));
                    continue;
                }
                Poll::Pending => {}
            }

            match this.deadline.as_mut().poll(cx) {
                Poll::Ready(()) => this.finish(ScanOutcome::TimedOut),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl<S: DeviceSession> Drop for NetworkScan<'_, S> {
    fn drop(&mut self) {
        if self.outcome.is_none() {
            self.session.cancel_scan();
        }
    }
}

/// Scans for networks and turns the operator's pick into credentials
#[derive(Debug, Clone)]
pub struct ScanService {
    timeout: Duration,
}

impl Default for ScanService {
    fn default() -> Self {
        Self::new(DEFAULT_SCAN_TIMEOUT)
    }
}

impl ScanService {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Start a scan and stream its entries
    pub fn scan<'a, S: DeviceSession>(&self, session: &'a S) -> NetworkScan<'a, S> {
        NetworkScan::start(session, self.timeout)
    }

    /// Run a scan to its end and collect the entries
    ///
    /// A device without the `wifi_scan` capability is not asked to scan; only the
    /// manual entry is offered.
    pub async fn scan_all<S: DeviceSession>(
        &self,
        session: &S,
        capabilities: &DeviceCapabilities,
    ) -> ScanResults {
        if !capabilities.supports_wifi_scan() {
            info!("Device does not support Wi-Fi scan, using manual entry");
            return ScanResults {
                outcome: ScanOutcome::Skipped,
                entries: vec![ScanEntry::JoinOtherNetwork],
            };
        }

        let mut scan = self.scan(session);
        let mut entries = Vec::new();
        while let Some(entry) = scan.next().await {
            entries.push(entry);
        }

        let outcome = scan.outcome().cloned().unwrap_or(ScanOutcome::Completed);
        info!(
            networks = entries.len().saturating_sub(1),
            ?outcome,
            "Wi-Fi scan finished"
        );
        ScanResults { outcome, entries }
    }
}

/// How a UI should ask for the password of an entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordPrompt {
    /// Open network, no password is collected
    Skip,
    /// Manual entry: the auth mode is unknown, an empty password is accepted
    Optional,
    /// Protected network, an empty password is rejected
    Required,
}

pub fn password_prompt(entry: &ScanEntry) -> PasswordPrompt {
    match entry {
        ScanEntry::Network(network) if network.auth_mode.is_open() => PasswordPrompt::Skip,
        ScanEntry::Network(_) => PasswordPrompt::Required,
        ScanEntry::JoinOtherNetwork => PasswordPrompt::Optional,
    }
}

/// Turn the operator's pick into validated credentials
///
/// `ssid` is only read for the manual entry. For open networks the password is
/// not collected and the credentials carry an empty one.
pub fn select(
    entry: &ScanEntry,
    ssid: Option<&str>,
    password: Option<&str>,
) -> Result<WifiCredentials, CredentialValidationError> {
    let password = password.unwrap_or_default();
    let credentials = match entry {
        ScanEntry::Network(network) => WifiCredentials::for_network(network, password),
        ScanEntry::JoinOtherNetwork => {
            WifiCredentials::manual(ssid.unwrap_or_default().trim(), password)
        }
    };

    credentials.validate()?;
    Ok(credentials)
}
