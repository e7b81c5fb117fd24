//! Connection lifecycle monitor
//!
//! Listens to unsolicited connection events of one session and decides how the
//! coordinator reacts to them.

use tokio::sync::{
    broadcast::{
        self,
        error::{RecvError, TryRecvError},
    },
    watch,
};
use tracing::{debug, warn};

use crate::{
    core::types::{SessionId, TransportKind},
    session::{ConnectionEvent, ConnectionEventKind},
};

/// Where the attempt is when a connection event arrives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecyclePhase {
    /// Connecting or negotiating security
    Discovery(TransportKind),
    /// Connected, the operator is scanning or picking a network
    Selection,
    /// Delivery state machine is running
    Delivery,
}

/// Reaction chosen for a connection event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorAction {
    Ignore,
    /// Release the session and fail the attempt
    AbortWorkflow,
    /// Discovery must be started again by the operator
    RestartDiscovery,
    /// Ask the operator to connect manually (SoftAP links drop transiently)
    OfferManualConnection,
}

/// Decide what a connection event means in the given phase
pub fn react(phase: LifecyclePhase, kind: ConnectionEventKind) -> MonitorAction {
    if kind == ConnectionEventKind::Connected {
        return MonitorAction::Ignore;
    }

    match phase {
        LifecyclePhase::Discovery(TransportKind::Ble) => MonitorAction::RestartDiscovery,
        LifecyclePhase::Discovery(TransportKind::SoftAp) => MonitorAction::OfferManualConnection,
        LifecyclePhase::Selection | LifecyclePhase::Delivery => MonitorAction::AbortWorkflow,
    }
}

/// Subscription to the connection events of one session
///
/// Events tagged with other sessions are dropped, so a monitor never reacts to
/// an attempt it does not own.
#[derive(Debug)]
pub struct LifecycleMonitor {
    session: SessionId,
    events: broadcast::Receiver<ConnectionEvent>,
}

impl LifecycleMonitor {
    pub fn new(session: SessionId, events: broadcast::Receiver<ConnectionEvent>) -> Self {
        Self { session, events }
    }

    /// Wait for the next event of this session
    ///
    /// Returns `None` once the session's event channel is closed.
    pub async fn next(&mut self) -> Option<ConnectionEventKind> {
        loop {
            match self.events.recv().await {
                Ok(event) if event.session == self.session => {
                    debug!(session = %self.session, kind = ?event.kind, "Connection event");
                    return Some(event.kind);
                }
                Ok(event) => {
                    debug!(session = %event.session, "Ignoring event of another session");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(session = %self.session, skipped, "Connection events lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Wait for the next event that requires a reaction in `phase`
    pub async fn next_action(&mut self, phase: LifecyclePhase) -> Option<MonitorAction> {
        loop {
            let kind = self.next().await?;
            match react(phase, kind) {
                MonitorAction::Ignore => continue,
                action => return Some(action),
            }
        }
    }

    /// Take an already delivered event that requires a reaction, without waiting
    pub fn pending_action(&mut self, phase: LifecyclePhase) -> Option<MonitorAction> {
        loop {
            match self.events.try_recv() {
                Ok(event) if event.session == self.session => match react(phase, event.kind) {
                    MonitorAction::Ignore => continue,
                    action => {
                        debug!(
                            session = %self.session,
                            kind = ?event.kind,
                            "Buffered connection event"
                        );
                        return Some(action);
                    }
                },
                Ok(_) => continue,
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(session = %self.session, skipped, "Connection events lagged");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => return None,
            }
        }
    }
}

/// Resolves once the operator has cancelled the attempt
///
/// A cancel raised before the call is seen immediately. Never resolves if the
/// sending side is gone without cancelling.
pub async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}
