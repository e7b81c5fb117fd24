//! Device version info parsing
//!
//! After connecting, the device answers with a JSON blob such as
//! `{"prov":{"ver":"v1.1","sec_ver":2,"cap":["wifi_scan"]}}`.

use serde::Deserialize;

use crate::core::{
    error::PayloadError,
    types::{DeviceCapabilities, SecurityType},
};

#[derive(Debug, Deserialize)]
struct VersionInfo {
    prov: Option<ProvisioningInfo>,
}

#[derive(Debug, Deserialize)]
struct ProvisioningInfo {
    ver: Option<String>,
    sec_ver: Option<i64>,
    #[serde(default)]
    cap: Vec<String>,
}

/// Parse the version info blob into a capabilities snapshot
///
/// An advertised `sec_ver` is clamped into the supported 0..=2 range.
pub fn parse(raw: &str) -> Result<DeviceCapabilities, PayloadError> {
    let info: VersionInfo = serde_json::from_str(raw)?;
    let prov = info.prov.ok_or(PayloadError::MissingField("prov"))?;

    Ok(DeviceCapabilities {
        protocol_version: prov.ver,
        security: prov.sec_ver.map(SecurityType::from_version_clamped),
        features: prov.cap,
    })
}
