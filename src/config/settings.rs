//! Runtime settings

use std::time::Duration;

use tracing::debug;

use crate::{
    config::{
        CliArgs,
        preferences::{DEVICE_TYPES, PreferenceStore, SEC2_USERNAME, SECURITY_TYPE},
    },
    core::{
        error::{ConfigError, ConfigResult},
        types::{SecurityType, TransportPreference},
    },
    protocol::CONFIG_ENDPOINT,
};

/// Username used for security 2 sessions when none is stored
pub const DEFAULT_USERNAME: &str = "wifiprov";

/// Settings injected into the coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub transport: TransportPreference,
    pub security: SecurityType,
    pub username: String,
    pub scan_timeout: Duration,
    pub connect_timeout: Duration,
    /// Custom endpoint receiving the device configuration
    pub config_endpoint: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transport: TransportPreference::Both,
            security: SecurityType::Security2,
            username: DEFAULT_USERNAME.to_string(),
            scan_timeout: Duration::from_secs(15),
            connect_timeout: Duration::from_secs(20),
            config_endpoint: CONFIG_ENDPOINT.to_string(),
        }
    }
}

/// Values given for this run only; they win over stored preferences
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsOverrides {
    pub transport: Option<TransportPreference>,
    pub security: Option<SecurityType>,
    pub username: Option<String>,
    pub scan_timeout: Option<Duration>,
    pub connect_timeout: Option<Duration>,
}

impl From<&CliArgs> for SettingsOverrides {
    fn from(args: &CliArgs) -> Self {
        SettingsOverrides {
            transport: args.transport,
            security: args.security,
            username: args.username.clone(),
            scan_timeout: args.scan_timeout.map(Duration::from_secs),
            connect_timeout: args.connect_timeout.map(Duration::from_secs),
        }
    }
}

fn invalid(key: &str, value: String) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value,
    }
}

impl Settings {
    /// Resolve settings from stored preferences and per-run overrides
    pub fn load(store: &impl PreferenceStore, overrides: &SettingsOverrides) -> ConfigResult<Self> {
        let defaults = Settings::default();

        let transport = match store.get(DEVICE_TYPES)? {
            Some(value) => value
                .parse::<TransportPreference>()
                .map_err(|_| invalid(DEVICE_TYPES, value))?,
            None => defaults.transport,
        };

        let security = match store.get(SECURITY_TYPE)? {
            Some(value) => value
                .trim()
                .parse::<u8>()
                .ok()
                .and_then(|v| SecurityType::try_from(v).ok())
                .ok_or_else(|| invalid(SECURITY_TYPE, value))?,
            None => defaults.security,
        };

        let username = store
            .get(SEC2_USERNAME)?
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(defaults.username);

        let settings = Settings {
            transport: overrides.transport.unwrap_or(transport),
            security: overrides.security.unwrap_or(security),
            username: overrides.username.clone().unwrap_or(username),
            scan_timeout: overrides.scan_timeout.unwrap_or(defaults.scan_timeout),
            connect_timeout: overrides
                .connect_timeout
                .unwrap_or(defaults.connect_timeout),
            config_endpoint: defaults.config_endpoint,
        };

        debug!(?settings, "Settings resolved");
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryPreferences;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_without_preferences() {
        let settings =
            Settings::load(&MemoryPreferences::new(), &SettingsOverrides::default()).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.username, "wifiprov");
        assert_eq!(settings.transport, TransportPreference::Both);
        assert_eq!(settings.security, SecurityType::Security2);
    }

    #[test]
    fn test_stored_preferences_are_used() {
        let store = MemoryPreferences::new()
            .with(DEVICE_TYPES, "softap")
            .with(SECURITY_TYPE, "1")
            .with(SEC2_USERNAME, "admin");

        let settings = Settings::load(&store, &SettingsOverrides::default()).unwrap();
        assert_eq!(settings.transport, TransportPreference::SoftAp);
        assert_eq!(settings.security, SecurityType::Security1);
        assert_eq!(settings.username, "admin");
    }

    #[test]
    fn test_overrides_win() {
        let store = MemoryPreferences::new().with(SECURITY_TYPE, "1");
        let overrides = SettingsOverrides {
            security: Some(SecurityType::Security0),
            scan_timeout: Some(Duration::from_secs(3)),
            ..Default::default()
        };

        let settings = Settings::load(&store, &overrides).unwrap();
        assert_eq!(settings.security, SecurityType::Security0);
        assert_eq!(settings.scan_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_invalid_stored_value() {
        let store = MemoryPreferences::new().with(SECURITY_TYPE, "7");
        let err = Settings::load(&store, &SettingsOverrides::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key, .. } if key == SECURITY_TYPE));
    }
}
