//! Delivery state machine
//!
//! Pure transition logic for the five delivery steps. The run loop in
//! [`crate::core::workflow`] feeds events in and publishes the resulting state.

use serde::Serialize;

use crate::{
    core::types::{ConnectionFailureReason, ProvisioningStep},
    session::ProvisionEvent,
};

/// Why a delivery run stopped at a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "cause", content = "detail", rename_all = "snake_case")]
pub enum FailureCause {
    /// Configuration payload could not be delivered
    ConfigurationSend(String),
    /// Secure session for the credential exchange was not established
    SessionCreation(String),
    /// Credentials could not be sent
    CredentialTransport(String),
    /// Device rejected the credentials
    CredentialApply(String),
    /// Device could not join the network
    Connection(ConnectionFailureReason),
    /// Device status could not be determined
    Provisioning(String),
    UnexpectedDisconnect,
    Cancelled,
}

impl FailureCause {
    /// Operator-facing message
    pub fn message(&self) -> &'static str {
        match self {
            FailureCause::ConfigurationSend(_) => "Failed to send device configuration",
            FailureCause::SessionCreation(_) => "Failed to create a secure session with the device",
            FailureCause::CredentialTransport(_) => "Failed to send Wi-Fi credentials",
            FailureCause::CredentialApply(_) => "Device failed to apply Wi-Fi credentials",
            FailureCause::Connection(ConnectionFailureReason::AuthFailed) => {
                "Wi-Fi authentication failed, check the password"
            }
            FailureCause::Connection(ConnectionFailureReason::NetworkNotFound) => {
                "Wi-Fi network not found"
            }
            FailureCause::Connection(ConnectionFailureReason::DeviceDisconnected) => {
                "Device disconnected while joining the network"
            }
            FailureCause::Connection(ConnectionFailureReason::Unknown) => {
                "Device failed to join the network"
            }
            FailureCause::Provisioning(_) => "Provisioning status could not be confirmed",
            FailureCause::UnexpectedDisconnect => "Device disconnected unexpectedly",
            FailureCause::Cancelled => "Provisioning cancelled",
        }
    }

    fn detail(&self) -> Option<&str> {
        match self {
            FailureCause::ConfigurationSend(detail)
            | FailureCause::SessionCreation(detail)
            | FailureCause::CredentialTransport(detail)
            | FailureCause::CredentialApply(detail)
            | FailureCause::Provisioning(detail) => Some(detail.as_str()),
            _ => None,
        }
    }
}

impl std::fmt::Display for FailureCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.detail().filter(|d| !d.is_empty()) {
            Some(detail) => write!(f, "{} ({detail})", self.message()),
            None => f.write_str(self.message()),
        }
    }
}

/// Overall status, orthogonal to the current step
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Running,
    Failed {
        cause: FailureCause,
    },
    Complete,
}

/// Observable progress of one delivery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisioningState {
    /// Current step; when failed, the step the failure is attached to
    pub step: ProvisioningStep,
    pub status: WorkflowStatus,
    /// Steps finished successfully, in order
    pub history: Vec<ProvisioningStep>,
}

impl Default for ProvisioningState {
    fn default() -> Self {
        Self::new()
    }
}

impl ProvisioningState {
    pub fn new() -> Self {
        Self {
            step: ProvisioningStep::SendingConfiguration,
            status: WorkflowStatus::Running,
            history: Vec::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, WorkflowStatus::Running)
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.status, WorkflowStatus::Complete)
    }

    pub fn failure(&self) -> Option<&FailureCause> {
        match &self.status {
            WorkflowStatus::Failed { cause } => Some(cause),
            _ => None,
        }
    }

    fn advanced_to(&self, target: ProvisioningStep) -> Self {
        let mut history = self.history.clone();
        history.extend(
            ProvisioningStep::ALL
                .iter()
                .copied()
                .filter(|step| *step >= self.step && *step < target),
        );

        let status = if target == ProvisioningStep::Complete {
            history.push(ProvisioningStep::Complete);
            WorkflowStatus::Complete
        } else {
            WorkflowStatus::Running
        };

        Self {
            step: target,
            status,
            history,
        }
    }

    fn failed_with(&self, cause: FailureCause) -> Self {
        Self {
            step: self.step,
            status: WorkflowStatus::Failed { cause },
            history: self.history.clone(),
        }
    }
}

/// Input to the delivery state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryEvent {
    ConfigurationSent,
    /// No configuration to deliver
    ConfigurationSkipped,
    ConfigurationFailed(String),
    Provision(ProvisionEvent),
    Disconnected,
    Cancelled,
}

/// Why an event did not change the state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The run already completed or failed
    Finished,
    /// The event does not belong to the current step
    OutOfOrder { step: ProvisioningStep },
}

/// Result of applying one event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Advanced(ProvisioningState),
    Failed(ProvisioningState),
    Completed(ProvisioningState),
    Rejected(Rejection),
}

impl Transition {
    /// State after the transition, if it changed
    pub fn state(&self) -> Option<&ProvisioningState> {
        match self {
            Transition::Advanced(state)
            | Transition::Failed(state)
            | Transition::Completed(state) => Some(state),
            Transition::Rejected(_) => None,
        }
    }
}

enum Effect {
    Advance(ProvisioningStep),
    Fail(FailureCause),
}

fn effect_of(event: &DeliveryEvent) -> Effect {
    use crate::core::types::ProvisioningStep::*;

    match event {
        DeliveryEvent::ConfigurationSent | DeliveryEvent::ConfigurationSkipped => {
            Effect::Advance(SendingWifiCredentials)
        }
        DeliveryEvent::ConfigurationFailed(message) => {
            Effect::Fail(FailureCause::ConfigurationSend(message.clone()))
        }
        DeliveryEvent::Provision(event) => match event {
            ProvisionEvent::WifiConfigSent => Effect::Advance(AttemptingConnection),
            ProvisionEvent::WifiConfigApplied => Effect::Advance(VerifyingStatus),
            ProvisionEvent::DeviceProvisioningSuccess => Effect::Advance(Complete),
            ProvisionEvent::SessionCreationFailed(m) => {
                Effect::Fail(FailureCause::SessionCreation(m.clone()))
            }
            ProvisionEvent::WifiConfigFailed(m) => {
                Effect::Fail(FailureCause::CredentialTransport(m.clone()))
            }
            ProvisionEvent::WifiConfigApplyFailed(m) => {
                Effect::Fail(FailureCause::CredentialApply(m.clone()))
            }
            ProvisionEvent::ProvisioningFailedFromDevice(reason) => {
                Effect::Fail(FailureCause::Connection(*reason))
            }
            ProvisionEvent::ProvisioningFailed(m) => {
                Effect::Fail(FailureCause::Provisioning(m.clone()))
            }
        },
        DeliveryEvent::Disconnected => Effect::Fail(FailureCause::UnexpectedDisconnect),
        DeliveryEvent::Cancelled => Effect::Fail(FailureCause::Cancelled),
    }
}

/// Apply one event to the current state
///
/// Steps only move forward and a run fails at most once; once the state is
/// terminal every further event is rejected. Credential events are only
/// accepted after the configuration step is done, and configuration events only
/// during it. A failure attaches to whatever step is current.
pub fn apply(state: &ProvisioningState, event: &DeliveryEvent) -> Transition {
    if state.is_terminal() {
        return Transition::Rejected(Rejection::Finished);
    }

    let out_of_order = Transition::Rejected(Rejection::OutOfOrder { step: state.step });
    let in_configuration = state.step == ProvisioningStep::SendingConfiguration;
    match event {
        DeliveryEvent::ConfigurationSent
        | DeliveryEvent::ConfigurationSkipped
        | DeliveryEvent::ConfigurationFailed(_)
            if !in_configuration =>
        {
            return out_of_order;
        }
        DeliveryEvent::Provision(_) if in_configuration => return out_of_order,
        _ => {}
    }

    match effect_of(event) {
        Effect::Advance(target) if target <= state.step => out_of_order,
        Effect::Advance(target) => {
            let next = state.advanced_to(target);
            if next.is_complete() {
                Transition::Completed(next)
            } else {
                Transition::Advanced(next)
            }
        }
        Effect::Fail(cause) => Transition::Failed(state.failed_with(cause)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use crate::core::types::ProvisioningStep::*;

    fn run(events: &[DeliveryEvent]) -> (ProvisioningState, Vec<Transition>) {
        let mut state = ProvisioningState::new();
        let mut transitions = Vec::new();
        for event in events {
            let transition = apply(&state, event);
            if let Some(next) = transition.state() {
                state = next.clone();
            }
            transitions.push(transition);
        }
        (state, transitions)
    }

    fn provision(event: ProvisionEvent) -> DeliveryEvent {
        DeliveryEvent::Provision(event)
    }

    #[test]
    fn test_happy_path_reaches_complete() {
        let (state, transitions) = run(&[
            DeliveryEvent::ConfigurationSent,
            provision(ProvisionEvent::WifiConfigSent),
            provision(ProvisionEvent::WifiConfigApplied),
            provision(ProvisionEvent::DeviceProvisioningSuccess),
        ]);

        assert_eq!(
            state,
            ProvisioningState {
                step: Complete,
                status: WorkflowStatus::Complete,
                history: ProvisioningStep::ALL.to_vec(),
            }
        );
        assert!(matches!(transitions[3], Transition::Completed(_)));
    }

    #[test]
    fn test_skipped_configuration_advances() {
        let (state, _) = run(&[DeliveryEvent::ConfigurationSkipped]);
        assert_eq!(state.step, SendingWifiCredentials);
        assert_eq!(state.history, vec![SendingConfiguration]);
    }

    #[test]
    fn test_configuration_failure_is_terminal() {
        let (state, transitions) = run(&[
            DeliveryEvent::ConfigurationFailed("endpoint missing".into()),
            provision(ProvisionEvent::WifiConfigSent),
        ]);

        assert_eq!(state.step, SendingConfiguration);
        assert_eq!(
            state.failure(),
            Some(&FailureCause::ConfigurationSend("endpoint missing".into()))
        );
        assert_eq!(transitions[1], Transition::Rejected(Rejection::Finished));
    }

    #[test]
    fn test_credential_failures_map_to_causes() {
        let cases = [
            (
                ProvisionEvent::SessionCreationFailed("handshake".into()),
                FailureCause::SessionCreation("handshake".into()),
            ),
            (
                ProvisionEvent::WifiConfigFailed("write".into()),
                FailureCause::CredentialTransport("write".into()),
            ),
            (
                ProvisionEvent::WifiConfigApplyFailed("apply".into()),
                FailureCause::CredentialApply("apply".into()),
            ),
        ];

        for (event, cause) in cases {
            let (state, _) = run(&[DeliveryEvent::ConfigurationSent, provision(event)]);
            assert_eq!(state.step, SendingWifiCredentials);
            assert_eq!(state.failure(), Some(&cause));
        }
    }

    #[test]
    fn test_apply_failure_attaches_to_current_step() {
        let (state, _) = run(&[
            DeliveryEvent::ConfigurationSent,
            provision(ProvisionEvent::WifiConfigSent),
            provision(ProvisionEvent::WifiConfigApplyFailed("bad psk".into())),
        ]);

        assert_eq!(state.step, AttemptingConnection);
        assert_eq!(
            state.failure(),
            Some(&FailureCause::CredentialApply("bad psk".into()))
        );
    }

    #[test]
    fn test_device_reported_reasons() {
        for reason in [
            ConnectionFailureReason::AuthFailed,
            ConnectionFailureReason::NetworkNotFound,
            ConnectionFailureReason::DeviceDisconnected,
            ConnectionFailureReason::Unknown,
        ] {
            let (state, _) = run(&[
                DeliveryEvent::ConfigurationSent,
                provision(ProvisionEvent::WifiConfigSent),
                provision(ProvisionEvent::WifiConfigApplied),
                provision(ProvisionEvent::ProvisioningFailedFromDevice(reason)),
            ]);
            assert_eq!(state.step, VerifyingStatus);
            assert_eq!(state.failure(), Some(&FailureCause::Connection(reason)));
        }
    }

    #[test]
    fn test_out_of_order_events_are_rejected() {
        let initial = ProvisioningState::new();
        assert_eq!(
            apply(&initial, &provision(ProvisionEvent::DeviceProvisioningSuccess)),
            Transition::Rejected(Rejection::OutOfOrder {
                step: SendingConfiguration
            })
        );

        let (state, transitions) = run(&[
            DeliveryEvent::ConfigurationSent,
            provision(ProvisionEvent::WifiConfigSent),
            provision(ProvisionEvent::WifiConfigApplied),
            provision(ProvisionEvent::WifiConfigSent),
            DeliveryEvent::ConfigurationSent,
        ]);
        assert_eq!(state.step, VerifyingStatus);
        assert!(matches!(
            transitions[3],
            Transition::Rejected(Rejection::OutOfOrder { .. })
        ));
        assert!(matches!(
            transitions[4],
            Transition::Rejected(Rejection::OutOfOrder { .. })
        ));
    }

    #[test]
    fn test_steps_never_move_backward_and_fail_once() {
        let events = [
            DeliveryEvent::ConfigurationSent,
            provision(ProvisionEvent::WifiConfigApplied),
            provision(ProvisionEvent::WifiConfigSent),
            DeliveryEvent::Disconnected,
            provision(ProvisionEvent::WifiConfigFailed("late".into())),
            DeliveryEvent::Cancelled,
        ];

        let mut state = ProvisioningState::new();
        let mut failures = 0;
        for event in &events {
            if let Some(next) = apply(&state, event).state() {
                assert!(next.step >= state.step);
                if next.failure().is_some() {
                    failures += 1;
                }
                state = next.clone();
            }
        }

        assert_eq!(failures, 1);
        assert_eq!(state.failure(), Some(&FailureCause::UnexpectedDisconnect));
        assert_eq!(state.step, VerifyingStatus);
    }

    #[test]
    fn test_events_after_complete_are_rejected() {
        let (state, _) = run(&[
            DeliveryEvent::ConfigurationSkipped,
            provision(ProvisionEvent::DeviceProvisioningSuccess),
        ]);
        assert!(state.is_complete());
        assert_eq!(
            apply(&state, &DeliveryEvent::Disconnected),
            Transition::Rejected(Rejection::Finished)
        );
    }

    #[test]
    fn test_cancel_fails_current_step() {
        let (state, _) = run(&[DeliveryEvent::Cancelled]);
        assert_eq!(state.step, SendingConfiguration);
        assert_eq!(state.failure(), Some(&FailureCause::Cancelled));
    }

    #[test]
    fn test_failure_display_includes_detail() {
        assert_eq!(
            FailureCause::CredentialTransport("timeout".into()).to_string(),
            "Failed to send Wi-Fi credentials (timeout)"
        );
        assert_eq!(
            FailureCause::Connection(ConnectionFailureReason::NetworkNotFound).to_string(),
            "Wi-Fi network not found"
        );
    }

    #[test]
    fn test_state_serializes_for_observers() {
        let state = ProvisioningState::new().failed_with(FailureCause::Cancelled);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["step"], "sending_configuration");
        assert_eq!(json["status"]["status"], "failed");
        assert_eq!(json["status"]["cause"]["cause"], "cancelled");
    }
}
