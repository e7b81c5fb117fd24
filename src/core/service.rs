//! Provisioning coordinator facade

use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, watch};
use tracing::{info, warn};

use crate::{
    config::Settings,
    core::{
        delivery::ProvisioningState,
        discovery::{DiscoveredDevice, DiscoveryRequest, DiscoveryService},
        error::{
            CredentialValidationError, DiscoveryResult, ProvisioningError, ProvisioningResult,
        },
        monitor::{LifecyclePhase, cancelled},
        operator::Operator,
        scanner::{self, ScanResults, ScanService},
        types::{DeviceCapabilities, DeviceConfiguration, ScanEntry, WifiCredentials},
        workflow::DeliveryWorkflow,
    },
    session::DeviceSession,
    transport::RadioProbe,
};

/// Connected device together with the cancel signal of its attempt
struct Attempt<S: DeviceSession> {
    device: DiscoveredDevice<S>,
    cancel: watch::Receiver<bool>,
}

/// Coordinates one provisioning attempt at a time
///
/// Discovery hands over a connected session, network selection produces the
/// credentials and the delivery workflow pushes them to the device. The
/// session stays connected after completion until [`Provisioner::finish`] or
/// [`Provisioner::cancel`] releases it.
pub struct Provisioner<S: DeviceSession, R: RadioProbe, O: Operator> {
    discovery: DiscoveryService<S, R, O>,
    scanner: ScanService,
    delivery: DeliveryWorkflow,
    attempt: Mutex<Option<Attempt<S>>>,
    cancel: std::sync::Mutex<watch::Sender<bool>>,
}

impl<S: DeviceSession, R: RadioProbe, O: Operator> Provisioner<S, R, O> {
    pub fn new(session: Arc<S>, radio: Arc<R>, operator: Arc<O>, settings: Settings) -> Self {
        let scanner = ScanService::new(settings.scan_timeout);
        let delivery = DeliveryWorkflow::new(settings.config_endpoint.clone());
        let (cancel, _) = watch::channel(false);

        Self {
            discovery: DiscoveryService::new(session, radio, operator, settings),
            scanner,
            delivery,
            attempt: Mutex::new(None),
            cancel: std::sync::Mutex::new(cancel),
        }
    }

    pub fn settings(&self) -> &Settings {
        self.discovery.settings()
    }

    /// Cancel signal for a new attempt; whatever the previous one still runs is cancelled
    fn next_cancel_scope(&self) -> watch::Receiver<bool> {
        let (cancel, scope) = watch::channel(false);
        let previous = std::mem::replace(
            &mut *self.cancel.lock().unwrap_or_else(PoisonError::into_inner),
            cancel,
        );
        previous.send_replace(true);
        scope
    }

    async fn abandon(slot: &mut Option<Attempt<S>>) {
        if let Some(attempt) = slot.take() {
            attempt.device.guard.release().await;
        }
    }

    /// Connect to a device; any previous attempt is released first
    pub async fn discover(
        &self,
        request: &DiscoveryRequest,
    ) -> DiscoveryResult<DeviceCapabilities> {
        let mut cancel = self.next_cancel_scope();
        let mut slot = self.attempt.lock().await;
        Self::abandon(&mut slot).await;

        let device = self.discovery.begin_discovery(request, &mut cancel).await?;
        let capabilities = device.capabilities.clone();
        *slot = Some(Attempt { device, cancel });
        Ok(capabilities)
    }

    /// Scan for networks through the connected device
    ///
    /// A disconnect while scanning releases the session and ends the attempt.
    pub async fn scan(&self) -> ProvisioningResult<ScanResults> {
        let mut slot = self.attempt.lock().await;
        let Attempt { device, cancel } = slot.as_mut().ok_or(ProvisioningError::NoDevice)?;
        let id = device.guard.id();

        let result = tokio::select! {
            biased;
            _ = cancelled(cancel) => Err(ProvisioningError::Cancelled),
            Some(action) = device.monitor.next_action(LifecyclePhase::Selection) => {
                warn!(session = %id, ?action, "Device disconnected during network selection");
                Err(ProvisioningError::DeviceDisconnected)
            }
            results = self.scanner.scan_all(device.guard.session(), &device.capabilities) => {
                Ok(results)
            }
        };

        if let Err(ProvisioningError::DeviceDisconnected) = result {
            Self::abandon(&mut slot).await;
        }
        result
    }

    /// Turn the operator's pick into validated credentials
    pub fn select(
        &self,
        entry: &ScanEntry,
        ssid: Option<&str>,
        password: Option<&str>,
    ) -> Result<WifiCredentials, CredentialValidationError> {
        scanner::select(entry, ssid, password)
    }

    /// Deliver configuration and credentials to the connected device
    pub async fn provision(
        &self,
        configuration: Option<&DeviceConfiguration>,
        credentials: &WifiCredentials,
    ) -> ProvisioningResult<ProvisioningState> {
        let mut slot = self.attempt.lock().await;
        let Attempt { device, cancel } = slot.as_mut().ok_or(ProvisioningError::NoDevice)?;

        // Nothing listened while the operator was picking a network
        if device
            .monitor
            .pending_action(LifecyclePhase::Selection)
            .is_some()
        {
            warn!(session = %device.guard.id(), "Device disconnected before delivery");
            Self::abandon(&mut slot).await;
            return Err(ProvisioningError::DeviceDisconnected);
        }

        self.delivery
            .run(
                &device.guard,
                &mut device.monitor,
                cancel,
                configuration,
                credentials,
            )
            .await
    }

    /// Observe delivery progress; the receiver starts with the latest state
    pub fn subscribe(&self) -> watch::Receiver<ProvisioningState> {
        self.delivery.subscribe()
    }

    pub fn state(&self) -> ProvisioningState {
        self.delivery.state()
    }

    /// Operator is done; release the session
    ///
    /// Returns `false` when there was nothing left to release.
    pub async fn finish(&self) -> bool {
        match self.attempt.lock().await.take() {
            Some(attempt) => {
                info!(session = %attempt.device.guard.id(), "Provisioning attempt finished");
                attempt.device.guard.release().await
            }
            None => false,
        }
    }

    /// Abort the attempt and release the session
    ///
    /// Discovery, scan or delivery in flight stop without waiting for their
    /// timeouts. Returns `false` when the session was already released, for
    /// instance by the cancelled delivery run itself.
    pub async fn cancel(&self) -> bool {
        self.cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send_replace(true);

        match self.attempt.lock().await.take() {
            Some(attempt) => {
                info!(session = %attempt.device.guard.id(), "Provisioning attempt cancelled");
                attempt.device.guard.release().await
            }
            None => false,
        }
    }
}
