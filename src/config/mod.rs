//! Configuration module

pub mod cli;
pub mod preferences;
pub mod settings;

pub use cli::CliArgs;
pub use preferences::{JsonFilePreferences, MemoryPreferences, PreferenceStore};
pub use settings::{Settings, SettingsOverrides};
