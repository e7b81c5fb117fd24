//! Decisions only the human operator can make

use std::sync::{Mutex, PoisonError};

use trait_variant::make;

use crate::core::types::TransportKind;

/// Prompts raised by the coordinator while it owns a device session
#[make(Send)]
pub trait Operator: Sync + 'static {
    /// Pick BLE or SoftAP; `None` cancels discovery
    async fn choose_transport(&self) -> Option<TransportKind>;

    /// Bluetooth is unavailable on this host; switch to `to` instead?
    async fn confirm_fallback(&self, from: TransportKind, to: TransportKind) -> bool;

    /// The link dropped during discovery; connect again manually?
    async fn offer_manual_connection(&self, transport: TransportKind) -> bool;
}

/// Operator with answers fixed up front
///
/// Used for unattended runs and tests. Every prompt is recorded.
#[derive(Debug, Default)]
pub struct ScriptedOperator {
    transport: Option<TransportKind>,
    accept_fallback: bool,
    manual_reconnects: Mutex<usize>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOperator {
    pub fn new(transport: Option<TransportKind>) -> Self {
        Self {
            transport,
            ..Default::default()
        }
    }

    pub fn accept_fallback(mut self, accept: bool) -> Self {
        self.accept_fallback = accept;
        self
    }

    /// Accept this many manual reconnection offers, then decline
    pub fn manual_reconnects(self, count: usize) -> Self {
        *self
            .manual_reconnects
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = count;
        self
    }

    /// Prompts raised so far, oldest first
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, prompt: String) {
        self.prompts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(prompt);
    }
}

impl Operator for ScriptedOperator {
    async fn choose_transport(&self) -> Option<TransportKind> {
        self.record("choose_transport".into());
        self.transport
    }

    async fn confirm_fallback(&self, from: TransportKind, to: TransportKind) -> bool {
        self.record(format!("fallback {from} -> {to}"));
        self.accept_fallback
    }

    async fn offer_manual_connection(&self, transport: TransportKind) -> bool {
        self.record(format!("manual_connection {transport}"));
        let mut remaining = self
            .manual_reconnects
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *remaining == 0 {
            return false;
        }
        *remaining -= 1;
        true
    }
}
