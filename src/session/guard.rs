//! Single-owner handle for a connected device session

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tracing::{debug, info};

use crate::{
    core::types::{SecurityType, SessionId, TransportKind},
    session::DeviceSession,
};

/// Connected session owned by exactly one provisioning attempt
///
/// `release` disconnects the device the first time it is called; later calls
/// are no-ops.
pub struct SessionGuard<S: DeviceSession> {
    session: Arc<S>,
    id: SessionId,
    transport: TransportKind,
    security: SecurityType,
    device_name: Option<String>,
    released: AtomicBool,
}

impl<S: DeviceSession> SessionGuard<S> {
    pub fn new(
        session: Arc<S>,
        id: SessionId,
        transport: TransportKind,
        security: SecurityType,
        device_name: Option<String>,
    ) -> Self {
        Self {
            session,
            id,
            transport,
            security,
            device_name,
            released: AtomicBool::new(false),
        }
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }

    pub fn security(&self) -> SecurityType {
        self.security
    }

    pub fn device_name(&self) -> Option<&str> {
        self.device_name.as_deref()
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }

    /// Disconnect the device; returns `false` if it was already released
    pub async fn release(&self) -> bool {
        if self.released.swap(true, Ordering::SeqCst) {
            debug!(session = %self.id, "Session already released");
            return false;
        }

        info!(session = %self.id, transport = %self.transport, "Releasing device session");
        self.session.disconnect().await;
        true
    }
}

impl<S: DeviceSession> std::fmt::Debug for SessionGuard<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionGuard")
            .field("id", &self.id)
            .field("transport", &self.transport)
            .field("security", &self.security)
            .field("device_name", &self.device_name)
            .field("released", &self.is_released())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SimulatedDevice;

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let device = Arc::new(SimulatedDevice::new());
        let guard = SessionGuard::new(
            device.clone(),
            SessionId::new(),
            TransportKind::Ble,
            SecurityType::Security1,
            None,
        );

        assert!(!guard.is_released());
        assert!(guard.release().await);
        assert!(!guard.release().await);
        assert!(guard.is_released());
        assert_eq!(device.disconnect_count(), 1);
    }
}
