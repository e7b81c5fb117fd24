//! Provisioning QR code payload
//!
//! The decoded QR text is a small JSON object, for example
//! `{"ver":"v1","name":"PROV_1A2B3C","pop":"abcd1234","transport":"ble"}`.

use serde::Deserialize;

use crate::core::{
    error::PayloadError,
    types::{SecurityType, TransportKind},
};

const SUPPORTED_VERSION: &str = "v1";

#[derive(Debug, Deserialize)]
struct RawQrPayload {
    ver: Option<String>,
    name: Option<String>,
    pop: Option<String>,
    transport: Option<String>,
    security: Option<u8>,
    username: Option<String>,
}

/// Device identity extracted from a QR code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QrPayload {
    pub device_name: String,
    pub transport: TransportKind,
    pub proof_of_possession: Option<String>,
    pub security: Option<SecurityType>,
    pub username: Option<String>,
}

impl QrPayload {
    /// Parse decoded QR text
    pub fn parse(text: &str) -> Result<Self, PayloadError> {
        let raw: RawQrPayload = serde_json::from_str(text.trim())?;

        let version = raw.ver.ok_or(PayloadError::MissingField("ver"))?;
        if version != SUPPORTED_VERSION {
            return Err(PayloadError::UnsupportedVersion(version));
        }

        let device_name = raw
            .name
            .filter(|name| !name.is_empty())
            .ok_or(PayloadError::MissingField("name"))?;

        let transport = match raw.transport.as_deref() {
            Some("ble") => TransportKind::Ble,
            Some("softap") => TransportKind::SoftAp,
            Some(other) => return Err(PayloadError::UnsupportedTransport(other.to_string())),
            None => return Err(PayloadError::MissingField("transport")),
        };

        let security = raw
            .security
            .map(|v| SecurityType::from_version_clamped(i64::from(v)));

        Ok(Self {
            device_name,
            transport,
            proof_of_possession: raw.pop.filter(|pop| !pop.is_empty()),
            security,
            username: raw.username.filter(|name| !name.is_empty()),
        })
    }
}
