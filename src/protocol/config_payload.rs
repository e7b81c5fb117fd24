//! JSON payload for the device's `config` custom endpoint
//!
//! Fields that still hold their well-known default are left out to keep the
//! payload small on constrained transports.

use serde::{Deserialize, Serialize};

use crate::core::{
    error::PayloadError,
    types::{DeviceConfiguration, Location},
};

/// Name of the custom endpoint that receives the configuration
pub const CONFIG_ENDPOINT: &str = "config";

/// Wire representation of [`DeviceConfiguration`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigPayload {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zipcode: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub units: Option<u8>,
}

impl From<&DeviceConfiguration> for ConfigPayload {
    fn from(config: &DeviceConfiguration) -> Self {
        let (lat, lon, zipcode, country) = match &config.location {
            Location::Coordinates {
                latitude,
                longitude,
            } => (Some(*latitude), Some(*longitude), None, None),
            Location::PostalCode {
                zip_code,
                country_code,
            } => (None, None, Some(zip_code.clone()), Some(country_code.clone())),
        };

        let lang = (config.language_code != DeviceConfiguration::DEFAULT_LANGUAGE_CODE)
            .then(|| config.language_code.clone());
        let units = (config.unit_system != DeviceConfiguration::DEFAULT_UNIT_SYSTEM)
            .then(|| config.unit_system.ordinal());

        Self {
            api_key: config.api_key.clone(),
            lat,
            lon,
            zipcode,
            country,
            lang,
            units,
        }
    }
}

/// Serialize a configuration into the bytes sent to [`CONFIG_ENDPOINT`]
pub fn encode(config: &DeviceConfiguration) -> Result<Vec<u8>, PayloadError> {
    Ok(serde_json::to_vec(&ConfigPayload::from(config))?)
}

/// Build a location from raw form input
///
/// Coordinates win when both latitude and longitude are filled in; otherwise the
/// postal code and country are used.
pub fn location_from_inputs(
    latitude: &str,
    longitude: &str,
    zip_code: &str,
    country_code: &str,
) -> Result<Location, PayloadError> {
    let (latitude, longitude) = (latitude.trim(), longitude.trim());

    if latitude.is_empty() || longitude.is_empty() {
        return Ok(Location::PostalCode {
            zip_code: zip_code.trim().to_string(),
            country_code: country_code.trim().to_string(),
        });
    }

    let parse = |value: &str| {
        value
            .parse::<f64>()
            .ok()
            .filter(|v| v.is_finite())
            .ok_or_else(|| PayloadError::InvalidCoordinate(value.to_string()))
    };

    Ok(Location::Coordinates {
        latitude: parse(latitude)?,
        longitude: parse(longitude)?,
    })
}
