//! Delivery run loop
//!
//! One run owns the session for its duration and is the only writer of the
//! delivery state. Session replies, connection events and the operator's
//! cancel request are folded into [`DeliveryEvent`]s one at a time and applied
//! with [`delivery::apply`].

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    core::{
        delivery::{self, DeliveryEvent, FailureCause, ProvisioningState, Transition},
        error::{ProvisioningError, ProvisioningResult},
        monitor::{LifecycleMonitor, LifecyclePhase, cancelled},
        types::{DeviceConfiguration, WifiCredentials},
    },
    protocol::config_payload,
    session::{DeviceSession, ProvisionEvent, SessionGuard},
};

/// Drives configuration and credential delivery for a connected device
///
/// The last published state is retained, so an observer attaching late sees
/// where the run is instead of waiting for the next change.
#[derive(Debug)]
pub struct DeliveryWorkflow {
    endpoint: String,
    state: watch::Sender<ProvisioningState>,
}

impl DeliveryWorkflow {
    pub fn new(endpoint: impl Into<String>) -> Self {
        let (state, _) = watch::channel(ProvisioningState::new());
        Self {
            endpoint: endpoint.into(),
            state,
        }
    }

    /// Observe progress; the receiver starts with the latest state
    pub fn subscribe(&self) -> watch::Receiver<ProvisioningState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ProvisioningState {
        self.state.borrow().clone()
    }

    fn publish(&self, state: &ProvisioningState) {
        self.state.send_replace(state.clone());
    }

    /// Run the delivery sequence to completion or failure
    ///
    /// Credentials are validated before anything is sent. An unexpected
    /// disconnect or a cancel releases the session; other failures leave it
    /// connected so the operator can retry. A cancel raised before the run
    /// starts fails it at the first step.
    pub async fn run<S: DeviceSession>(
        &self,
        guard: &SessionGuard<S>,
        monitor: &mut LifecycleMonitor,
        cancel: &mut watch::Receiver<bool>,
        configuration: Option<&DeviceConfiguration>,
        credentials: &WifiCredentials,
    ) -> ProvisioningResult<ProvisioningState> {
        credentials.validate()?;
        let payload = configuration.map(config_payload::encode).transpose()?;

        if guard.is_released() {
            return Err(ProvisioningError::AlreadyFinished);
        }

        let mut state = ProvisioningState::new();
        self.publish(&state);

        let session = guard.session();
        info!(session = %guard.id(), ssid = %credentials.ssid, "Starting delivery");

        let event = match &payload {
            None if *cancel.borrow() => DeliveryEvent::Cancelled,
            None => {
                debug!("No device configuration, skipping");
                DeliveryEvent::ConfigurationSkipped
            }
            Some(payload) => tokio::select! {
                biased;
                _ = cancelled(cancel) => DeliveryEvent::Cancelled,
                reply = session.send_to_endpoint(&self.endpoint, payload) => match reply {
                    Ok(reply) => {
                        log_reply(&self.endpoint, &reply);
                        DeliveryEvent::ConfigurationSent
                    }
                    Err(e) => DeliveryEvent::ConfigurationFailed(e.to_string()),
                },
                Some(_) = monitor.next_action(LifecyclePhase::Delivery) => DeliveryEvent::Disconnected,
            },
        };

        if let Some(done) = self.step(&mut state, &event) {
            return self.finish(guard, done).await;
        }

        let mut events = session.provision(&credentials.ssid, &credentials.password);
        loop {
            let event = tokio::select! {
                biased;
                _ = cancelled(cancel) => DeliveryEvent::Cancelled,
                event = events.recv() => DeliveryEvent::Provision(event.unwrap_or_else(|| {
                    ProvisionEvent::ProvisioningFailed("device stopped reporting".into())
                })),
                Some(_) = monitor.next_action(LifecyclePhase::Delivery) => DeliveryEvent::Disconnected,
            };

            if let Some(done) = self.step(&mut state, &event) {
                return self.finish(guard, done).await;
            }
        }
    }

    /// Apply one event; returns the final state once the run is over
    fn step(&self, state: &mut ProvisioningState, event: &DeliveryEvent) -> Option<ProvisioningState> {
        let transition = delivery::apply(state, event);
        match &transition {
            Transition::Rejected(rejection) => {
                warn!(?event, ?rejection, "Ignoring delivery event");
                return None;
            }
            Transition::Advanced(next) => {
                info!(step = ?next.step, "Delivery step started");
            }
            Transition::Completed(_) => info!("Device provisioned"),
            Transition::Failed(next) => {
                if let Some(cause) = next.failure() {
                    warn!(step = ?next.step, %cause, "Delivery failed");
                }
            }
        }

        if let Some(next) = transition.state() {
            *state = next.clone();
            self.publish(state);
        }
        state.is_terminal().then(|| state.clone())
    }

    async fn finish<S: DeviceSession>(
        &self,
        guard: &SessionGuard<S>,
        state: ProvisioningState,
    ) -> ProvisioningResult<ProvisioningState> {
        let step = state.step;
        match state.failure().cloned() {
            None => Ok(state),
            Some(FailureCause::UnexpectedDisconnect) => {
                guard.release().await;
                Err(ProvisioningError::UnexpectedDisconnect { step })
            }
            Some(cause @ FailureCause::Cancelled) => {
                guard.release().await;
                Err(ProvisioningError::StepFailed { step, cause })
            }
            Some(cause) => Err(ProvisioningError::StepFailed { step, cause }),
        }
    }
}

fn log_reply(endpoint: &str, reply: &[u8]) {
    match std::str::from_utf8(reply) {
        Ok(text) => debug!(endpoint, reply = %text, "Configuration accepted"),
        Err(_) => debug!(endpoint, reply = %hex::encode(reply), "Configuration accepted"),
    }
}
