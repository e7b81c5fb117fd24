//! Device discovery and security negotiation
//!
//! Produces a connected session whose security version both sides agree on.
//! Nothing here retries on its own; a failed attempt is reported and the
//! operator starts over.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    config::Settings,
    core::{
        error::{DiscoveryError, DiscoveryResult, SessionError},
        monitor::{LifecycleMonitor, LifecyclePhase, MonitorAction, cancelled, react},
        operator::Operator,
        types::{
            DeviceCapabilities, SecurityType, SessionId, TransportKind, TransportPreference,
        },
    },
    protocol::{QrPayload, capabilities},
    session::{ConnectParams, ConnectionEventKind, DeviceSession, SessionGuard, secret_fingerprint},
    transport::RadioProbe,
};

/// What the operator supplied to find the device
#[derive(Debug, Clone, Default)]
pub struct DiscoveryRequest {
    /// Decoded QR code text; takes precedence over the fields below
    pub qr: Option<String>,
    pub device_name: Option<String>,
    pub proof_of_possession: Option<String>,
    pub username: Option<String>,
}

/// Connected device ready for network selection
#[derive(Debug)]
pub struct DiscoveredDevice<S: DeviceSession> {
    pub guard: SessionGuard<S>,
    pub capabilities: DeviceCapabilities,
    /// Connection events of this session, handed on to the delivery run
    pub monitor: LifecycleMonitor,
}

/// Reconcile the operator's security preference with what the device advertises
///
/// The device's advertised version must equal the configured one. A device that
/// advertises nothing is assumed to follow the configuration.
pub fn negotiate_security(
    configured: SecurityType,
    advertised: Option<SecurityType>,
) -> DiscoveryResult<SecurityType> {
    match advertised {
        Some(device) if device != configured => {
            Err(DiscoveryError::SecurityMismatch { configured, device })
        }
        _ => Ok(configured),
    }
}

#[derive(Debug, Clone)]
struct Target {
    transport: TransportKind,
    device_name: Option<String>,
    proof_of_possession: Option<String>,
    username: Option<String>,
    from_qr: bool,
}

enum Negotiation {
    Finished(Result<DeviceCapabilities, SessionError>),
    Interrupted(MonitorAction),
    Cancelled,
}

/// Connection event equivalent to a failed discovery, if the link itself failed
fn lost_link(error: &DiscoveryError) -> Option<(TransportKind, ConnectionEventKind)> {
    match error {
        DiscoveryError::Disconnected { transport } => {
            Some((*transport, ConnectionEventKind::Disconnected))
        }
        DiscoveryError::Failed {
            transport,
            cause:
                SessionError::ConnectionFailed(_)
                | SessionError::Timeout(_)
                | SessionError::NotConnected,
        } => Some((*transport, ConnectionEventKind::ConnectionFailed)),
        _ => None,
    }
}

/// Finds, connects and negotiates with one device at a time
pub struct DiscoveryService<S: DeviceSession, R: RadioProbe, O: Operator> {
    session: Arc<S>,
    radio: Arc<R>,
    operator: Arc<O>,
    settings: Settings,
}

impl<S: DeviceSession, R: RadioProbe, O: Operator> DiscoveryService<S, R, O> {
    pub fn new(session: Arc<S>, radio: Arc<R>, operator: Arc<O>, settings: Settings) -> Self {
        Self {
            session,
            radio,
            operator,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Obtain a connected, negotiated session
    ///
    /// A lost SoftAP link is offered to the operator for a manual reconnect;
    /// a lost BLE link ends discovery. Raising `cancel` aborts a connect in
    /// flight and releases its session.
    pub async fn begin_discovery(
        &self,
        request: &DiscoveryRequest,
        cancel: &mut watch::Receiver<bool>,
    ) -> DiscoveryResult<DiscoveredDevice<S>> {
        let mut target = self.resolve_target(request).await?;
        self.check_radio(&mut target).await?;

        loop {
            let error = match self.connect(&target, cancel).await {
                Ok(device) => return Ok(device),
                Err(e) => e,
            };

            let Some((transport, kind)) = lost_link(&error) else {
                return Err(error);
            };
            if react(LifecyclePhase::Discovery(transport), kind)
                != MonitorAction::OfferManualConnection
            {
                return Err(error);
            }
            if !self.operator.offer_manual_connection(transport).await {
                return Err(error);
            }
            info!(%transport, "Operator requested a manual reconnection");
        }
    }

    async fn resolve_target(&self, request: &DiscoveryRequest) -> DiscoveryResult<Target> {
        if let Some(text) = &request.qr {
            let payload = QrPayload::parse(text)?;
            debug!(device = %payload.device_name, transport = %payload.transport, "QR code decoded");

            if !self.settings.transport.allows(payload.transport) {
                return Err(DiscoveryError::TransportNotSupported {
                    requested: payload.transport,
                    allowed: self.settings.transport,
                });
            }
            negotiate_security(self.settings.security, payload.security)?;

            return Ok(Target {
                transport: payload.transport,
                device_name: Some(payload.device_name),
                proof_of_possession: payload
                    .proof_of_possession
                    .or_else(|| request.proof_of_possession.clone()),
                username: payload.username.or_else(|| request.username.clone()),
                from_qr: true,
            });
        }

        let transport = match self.settings.transport.fixed() {
            Some(transport) => transport,
            None => self
                .operator
                .choose_transport()
                .await
                .ok_or(DiscoveryError::Cancelled)?,
        };

        Ok(Target {
            transport,
            device_name: request.device_name.clone(),
            proof_of_possession: request.proof_of_possession.clone(),
            username: request.username.clone(),
            from_qr: false,
        })
    }

    async fn check_radio(&self, target: &mut Target) -> DiscoveryResult<()> {
        if target.transport == TransportKind::Ble {
            if self.radio.bluetooth_available().await {
                return Ok(());
            }

            let may_fall_back =
                !target.from_qr && self.settings.transport == TransportPreference::Both;
            if !may_fall_back
                || !self
                    .operator
                    .confirm_fallback(TransportKind::Ble, TransportKind::SoftAp)
                    .await
            {
                return Err(DiscoveryError::BluetoothUnavailable);
            }

            info!("Bluetooth unavailable, switching to SoftAP");
            target.transport = TransportKind::SoftAp;
        }

        let Some(station) = self.radio.station_ssid().await else {
            debug!("Host station status unknown");
            return Ok(());
        };

        match &target.device_name {
            Some(name) if *name != station => Err(DiscoveryError::Failed {
                transport: TransportKind::SoftAp,
                cause: SessionError::ConnectionFailed(format!(
                    "host is joined to '{station}', not to the device access point '{name}'"
                )),
            }),
            _ => Ok(()),
        }
    }

    async fn connect(
        &self,
        target: &Target,
        cancel: &mut watch::Receiver<bool>,
    ) -> DiscoveryResult<DiscoveredDevice<S>> {
        let transport = target.transport;
        let security = self.settings.security;
        let id = SessionId::new();

        // Subscribe before connecting so no event of this session is missed
        let mut monitor = LifecycleMonitor::new(id, self.session.subscribe());

        let username = match security {
            SecurityType::Security2 => Some(
                target
                    .username
                    .clone()
                    .unwrap_or_else(|| self.settings.username.clone()),
            ),
            _ => None,
        };
        let params = ConnectParams {
            session_id: id,
            transport,
            security,
            device_name: target.device_name.clone(),
            proof_of_possession: target.proof_of_possession.clone(),
            username,
        };

        info!(
            session = %id,
            %transport,
            %security,
            device = ?params.device_name,
            pop = ?params.proof_of_possession.as_deref().map(secret_fingerprint),
            "Connecting to device"
        );

        let guard = SessionGuard::new(
            self.session.clone(),
            id,
            transport,
            security,
            target.device_name.clone(),
        );

        let timeout = self.settings.connect_timeout;
        let negotiation = async {
            tokio::time::timeout(timeout, self.session.connect(&params))
                .await
                .map_err(|_| SessionError::Timeout(timeout))??;

            let raw = self.session.version_info().await?;
            capabilities::parse(&raw)
                .map_err(|e| SessionError::CapabilitiesUnavailable(e.to_string()))
        };

        let outcome = tokio::select! {
            biased;
            _ = cancelled(cancel) => Negotiation::Cancelled,
            result = negotiation => Negotiation::Finished(result),
            Some(action) = monitor.next_action(LifecyclePhase::Discovery(transport)) => {
                Negotiation::Interrupted(action)
            }
        };

        let capabilities = match outcome {
            Negotiation::Finished(Ok(capabilities)) => capabilities,
            Negotiation::Finished(Err(cause)) => {
                warn!(session = %id, %transport, "Discovery failed: {}", cause);
                guard.release().await;
                return Err(DiscoveryError::Failed { transport, cause });
            }
            Negotiation::Interrupted(action) => {
                warn!(session = %id, %transport, ?action, "Device dropped during discovery");
                guard.release().await;
                return Err(DiscoveryError::Disconnected { transport });
            }
            Negotiation::Cancelled => {
                info!(session = %id, %transport, "Discovery cancelled");
                guard.release().await;
                return Err(DiscoveryError::Cancelled);
            }
        };

        if let Err(e) = negotiate_security(security, capabilities.security) {
            warn!(session = %id, "{}", e);
            guard.release().await;
            return Err(e);
        }

        info!(
            session = %id,
            version = ?capabilities.protocol_version,
            features = ?capabilities.features,
            "Device connected and negotiated"
        );

        Ok(DiscoveredDevice {
            guard,
            capabilities,
            monitor,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core::operator::ScriptedOperator,
        session::{
            SimulatedDevice,
            simulated::{ConnectBehavior, Scenario},
        },
        transport::StaticRadio,
    };
    use std::time::Duration;

    const BLE_QR: &str = r#"{"ver":"v1","name":"PROV_1A2B3C","pop":"abcd1234","transport":"ble"}"#;

    fn settings(transport: TransportPreference, security: SecurityType) -> Settings {
        Settings {
            transport,
            security,
            ..Default::default()
        }
    }

    fn version_info(sec_ver: i64) -> String {
        format!(r#"{{"prov":{{"ver":"v1.1","sec_ver":{sec_ver},"cap":["wifi_scan"]}}}}"#)
    }

    fn service(
        device: Arc<SimulatedDevice>,
        radio: StaticRadio,
        operator: ScriptedOperator,
        settings: Settings,
    ) -> DiscoveryService<SimulatedDevice, StaticRadio, ScriptedOperator> {
        DiscoveryService::new(device, Arc::new(radio), Arc::new(operator), settings)
    }

    /// Cancel signal that is never raised
    fn idle() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    fn qr_request() -> DiscoveryRequest {
        DiscoveryRequest {
            qr: Some(BLE_QR.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_qr_discovery_connects_and_negotiates() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            version_info: version_info(1),
            ..Default::default()
        }));
        let discovery = service(
            device.clone(),
            StaticRadio::available(),
            ScriptedOperator::default(),
            settings(TransportPreference::Both, SecurityType::Security1),
        );

        let discovered = discovery.begin_discovery(&qr_request(), &mut idle()).await.unwrap();

        assert_eq!(discovered.guard.transport(), TransportKind::Ble);
        assert_eq!(discovered.guard.security(), SecurityType::Security1);
        assert_eq!(discovered.guard.device_name(), Some("PROV_1A2B3C"));
        assert!(discovered.capabilities.supports_wifi_scan());

        let calls = device.connect_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].proof_of_possession.as_deref(), Some("abcd1234"));
        assert_eq!(calls[0].username, None);
        assert_eq!(device.disconnect_count(), 0);
    }

    #[tokio::test]
    async fn test_security_mismatch_tears_down_session() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            version_info: version_info(2),
            ..Default::default()
        }));
        let discovery = service(
            device.clone(),
            StaticRadio::available(),
            ScriptedOperator::default(),
            settings(TransportPreference::Ble, SecurityType::Security1),
        );

        let err = discovery.begin_discovery(&qr_request(), &mut idle()).await.unwrap_err();

        assert!(matches!(
            err,
            DiscoveryError::SecurityMismatch {
                configured: SecurityType::Security1,
                device: SecurityType::Security2,
            }
        ));
        assert_eq!(device.disconnect_count(), 1);
        assert_eq!(device.scan_requests(), 0);
    }

    #[tokio::test]
    async fn test_out_of_range_sec_ver_is_clamped() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            version_info: version_info(9),
            ..Default::default()
        }));
        let discovery = service(
            device,
            StaticRadio::available(),
            ScriptedOperator::default(),
            settings(TransportPreference::Ble, SecurityType::Security2),
        );

        let discovered = discovery.begin_discovery(&qr_request(), &mut idle()).await.unwrap();
        assert_eq!(discovered.guard.security(), SecurityType::Security2);
    }

    #[tokio::test]
    async fn test_missing_sec_ver_uses_preference_and_default_username() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            version_info: r#"{"prov":{"ver":"v1.0","cap":[]}}"#.into(),
            ..Default::default()
        }));
        let discovery = service(
            device.clone(),
            StaticRadio::available(),
            ScriptedOperator::default(),
            settings(TransportPreference::Ble, SecurityType::Security2),
        );

        let discovered = discovery.begin_discovery(&qr_request(), &mut idle()).await.unwrap();

        assert_eq!(discovered.guard.security(), SecurityType::Security2);
        assert!(!discovered.capabilities.supports_wifi_scan());
        assert_eq!(device.connect_calls()[0].username.as_deref(), Some("wifiprov"));
    }

    #[tokio::test]
    async fn test_manual_discovery_prompts_when_both() {
        let device = Arc::new(SimulatedDevice::new());
        let operator = Arc::new(ScriptedOperator::new(Some(TransportKind::SoftAp)));
        let discovery = DiscoveryService::new(
            device.clone(),
            Arc::new(StaticRadio::available()),
            operator.clone(),
            Settings::default(),
        );

        let request = DiscoveryRequest {
            device_name: Some("PROV_AP".into()),
            username: Some("admin".into()),
            ..Default::default()
        };
        let discovered = discovery.begin_discovery(&request, &mut idle()).await.unwrap();

        assert_eq!(discovered.guard.transport(), TransportKind::SoftAp);
        assert_eq!(operator.prompts(), vec!["choose_transport".to_string()]);
        assert_eq!(device.connect_calls()[0].username.as_deref(), Some("admin"));
    }

    #[tokio::test]
    async fn test_fixed_preference_does_not_prompt() {
        let device = Arc::new(SimulatedDevice::new());
        let operator = Arc::new(ScriptedOperator::default());
        let discovery = DiscoveryService::new(
            device,
            Arc::new(StaticRadio::available()),
            operator.clone(),
            settings(TransportPreference::Ble, SecurityType::Security2),
        );

        let discovered = discovery
            .begin_discovery(&DiscoveryRequest::default(), &mut idle())
            .await
            .unwrap();
        assert_eq!(discovered.guard.transport(), TransportKind::Ble);
        assert!(operator.prompts().is_empty());
    }

    #[tokio::test]
    async fn test_operator_cancels_transport_choice() {
        let device = Arc::new(SimulatedDevice::new());
        let discovery = service(
            device.clone(),
            StaticRadio::available(),
            ScriptedOperator::new(None),
            Settings::default(),
        );

        let err = discovery
            .begin_discovery(&DiscoveryRequest::default(), &mut idle())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Cancelled));
        assert!(device.connect_calls().is_empty());
    }

    #[tokio::test]
    async fn test_qr_transport_must_match_preference() {
        let device = Arc::new(SimulatedDevice::new());
        let discovery = service(
            device.clone(),
            StaticRadio::available(),
            ScriptedOperator::default(),
            settings(TransportPreference::SoftAp, SecurityType::Security2),
        );

        let err = discovery.begin_discovery(&qr_request(), &mut idle()).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::TransportNotSupported {
                requested: TransportKind::Ble,
                ..
            }
        ));
        assert!(device.connect_calls().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_qr_code() {
        let discovery = service(
            Arc::new(SimulatedDevice::new()),
            StaticRadio::available(),
            ScriptedOperator::default(),
            Settings::default(),
        );

        let request = DiscoveryRequest {
            qr: Some("WIFI:S:foo;;".into()),
            ..Default::default()
        };
        let err = discovery.begin_discovery(&request, &mut idle()).await.unwrap_err();
        assert!(matches!(err, DiscoveryError::InvalidQrCode(_)));
    }

    #[tokio::test]
    async fn test_bluetooth_off_falls_back_to_softap() {
        let device = Arc::new(SimulatedDevice::new());
        let operator = ScriptedOperator::new(Some(TransportKind::Ble)).accept_fallback(true);
        let discovery = service(
            device.clone(),
            StaticRadio::default(),
            operator,
            Settings::default(),
        );

        let discovered = discovery
            .begin_discovery(&DiscoveryRequest::default(), &mut idle())
            .await
            .unwrap();
        assert_eq!(discovered.guard.transport(), TransportKind::SoftAp);
        assert_eq!(device.connect_calls()[0].transport, TransportKind::SoftAp);
    }

    #[tokio::test]
    async fn test_bluetooth_off_without_fallback() {
        let device = Arc::new(SimulatedDevice::new());
        let discovery = service(
            device.clone(),
            StaticRadio::default(),
            ScriptedOperator::default(),
            settings(TransportPreference::Ble, SecurityType::Security2),
        );

        let err = discovery
            .begin_discovery(&DiscoveryRequest::default(), &mut idle())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::BluetoothUnavailable));
        assert!(device.connect_calls().is_empty());
    }

    #[tokio::test]
    async fn test_host_joined_to_other_network() {
        let discovery = service(
            Arc::new(SimulatedDevice::new()),
            StaticRadio {
                bluetooth: true,
                station_ssid: Some("HomeNet".into()),
            },
            ScriptedOperator::default(),
            settings(TransportPreference::SoftAp, SecurityType::Security2),
        );

        let request = DiscoveryRequest {
            device_name: Some("PROV_AP".into()),
            ..Default::default()
        };
        let err = discovery.begin_discovery(&request, &mut idle()).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::Failed {
                transport: TransportKind::SoftAp,
                cause: SessionError::ConnectionFailed(_),
            }
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            connect: ConnectBehavior::Fail("no response".into()),
            ..Default::default()
        }));
        let discovery = service(
            device.clone(),
            StaticRadio::available(),
            ScriptedOperator::default(),
            settings(TransportPreference::Ble, SecurityType::Security2),
        );

        let err = discovery.begin_discovery(&qr_request(), &mut idle()).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::Failed {
                transport: TransportKind::Ble,
                cause: SessionError::ConnectionFailed(_),
            }
        ));
        assert_eq!(device.disconnect_count(), 1);
        assert_eq!(device.connect_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            connect: ConnectBehavior::Hang,
            ..Default::default()
        }));
        let discovery = service(
            device.clone(),
            StaticRadio::available(),
            ScriptedOperator::default(),
            Settings {
                transport: TransportPreference::Ble,
                connect_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );

        let err = discovery.begin_discovery(&qr_request(), &mut idle()).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::Failed {
                cause: SessionError::Timeout(_),
                ..
            }
        ));
        assert_eq!(device.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_ble_drop_during_negotiation_is_terminal() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            drop_during_negotiation: true,
            ..Default::default()
        }));
        let operator = Arc::new(ScriptedOperator::default().manual_reconnects(1));
        let discovery = DiscoveryService::new(
            device.clone(),
            Arc::new(StaticRadio::available()),
            operator.clone(),
            settings(TransportPreference::Ble, SecurityType::Security2),
        );

        let err = discovery.begin_discovery(&qr_request(), &mut idle()).await.unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::Disconnected {
                transport: TransportKind::Ble
            }
        ));
        assert!(operator.prompts().is_empty());
        assert_eq!(device.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_softap_drop_offers_manual_connection() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            drop_during_negotiation: true,
            ..Default::default()
        }));
        let operator = Arc::new(ScriptedOperator::default().manual_reconnects(1));
        let discovery = DiscoveryService::new(
            device.clone(),
            Arc::new(StaticRadio::available()),
            operator.clone(),
            settings(TransportPreference::SoftAp, SecurityType::Security2),
        );

        let discovered = discovery
            .begin_discovery(&DiscoveryRequest::default(), &mut idle())
            .await
            .unwrap();

        assert_eq!(operator.prompts(), vec!["manual_connection SoftAP".to_string()]);
        let calls = device.connect_calls();
        assert_eq!(calls.len(), 2);
        assert_ne!(calls[0].session_id, calls[1].session_id);
        assert_eq!(discovered.guard.id(), calls[1].session_id);
        assert_eq!(device.disconnect_count(), 1);
    }

    #[tokio::test]
    async fn test_softap_drop_declined() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            drop_during_negotiation: true,
            ..Default::default()
        }));
        let discovery = service(
            device,
            StaticRadio::available(),
            ScriptedOperator::default(),
            settings(TransportPreference::SoftAp, SecurityType::Security2),
        );

        let err = discovery
            .begin_discovery(&DiscoveryRequest::default(), &mut idle())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::Disconnected {
                transport: TransportKind::SoftAp
            }
        ));
    }

    #[tokio::test]
    async fn test_softap_connection_failure_offers_manual_connection() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            connect: ConnectBehavior::Fail("ap unreachable".into()),
            ..Default::default()
        }));
        let operator = Arc::new(ScriptedOperator::default().manual_reconnects(1));
        let discovery = DiscoveryService::new(
            device.clone(),
            Arc::new(StaticRadio::available()),
            operator.clone(),
            settings(TransportPreference::SoftAp, SecurityType::Security2),
        );

        let err = discovery
            .begin_discovery(&DiscoveryRequest::default(), &mut idle())
            .await
            .unwrap_err();

        // Reconnect accepted once, then declined
        assert!(matches!(
            err,
            DiscoveryError::Failed {
                transport: TransportKind::SoftAp,
                cause: SessionError::ConnectionFailed(_),
            }
        ));
        assert_eq!(
            operator.prompts(),
            vec![
                "manual_connection SoftAP".to_string(),
                "manual_connection SoftAP".to_string()
            ]
        );
        assert_eq!(device.connect_calls().len(), 2);
        assert_eq!(device.disconnect_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_softap_connect_timeout_offers_manual_connection() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            connect: ConnectBehavior::Hang,
            ..Default::default()
        }));
        let operator = Arc::new(ScriptedOperator::default());
        let discovery = DiscoveryService::new(
            device.clone(),
            Arc::new(StaticRadio::available()),
            operator.clone(),
            Settings {
                transport: TransportPreference::SoftAp,
                connect_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );

        let err = discovery
            .begin_discovery(&DiscoveryRequest::default(), &mut idle())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DiscoveryError::Failed {
                cause: SessionError::Timeout(_),
                ..
            }
        ));
        assert_eq!(
            operator.prompts(),
            vec!["manual_connection SoftAP".to_string()]
        );
    }

    #[tokio::test]
    async fn test_ble_connection_failure_does_not_offer_manual_connection() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            connect: ConnectBehavior::Fail("out of range".into()),
            ..Default::default()
        }));
        let operator = Arc::new(ScriptedOperator::default().manual_reconnects(1));
        let discovery = DiscoveryService::new(
            device.clone(),
            Arc::new(StaticRadio::available()),
            operator.clone(),
            settings(TransportPreference::Ble, SecurityType::Security2),
        );

        let err = discovery
            .begin_discovery(&qr_request(), &mut idle())
            .await
            .unwrap_err();
        assert!(matches!(err, DiscoveryError::Failed { .. }));
        assert!(operator.prompts().is_empty());
        assert_eq!(device.connect_calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_connect_releases_session() {
        let device = Arc::new(SimulatedDevice::with_scenario(Scenario {
            connect: ConnectBehavior::Hang,
            ..Default::default()
        }));
        let discovery = service(
            device.clone(),
            StaticRadio::available(),
            ScriptedOperator::default(),
            settings(TransportPreference::Ble, SecurityType::Security2),
        );
        let (cancel, mut rx) = watch::channel(false);

        let request = qr_request();
        let started = tokio::time::Instant::now();
        let (err, _) = tokio::join!(
            discovery.begin_discovery(&request, &mut rx),
            async {
                tokio::time::sleep(Duration::from_secs(1)).await;
                cancel.send_replace(true);
            }
        );

        assert!(matches!(err.unwrap_err(), DiscoveryError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(device.disconnect_count(), 1);
    }

    #[test]
    fn test_negotiate_security() {
        assert_eq!(
            negotiate_security(SecurityType::Security1, Some(SecurityType::Security1)).unwrap(),
            SecurityType::Security1
        );
        assert_eq!(
            negotiate_security(SecurityType::Security0, None).unwrap(),
            SecurityType::Security0
        );
        assert!(negotiate_security(SecurityType::Security1, Some(SecurityType::Security2)).is_err());
    }
}
