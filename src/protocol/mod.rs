//! Wire payloads exchanged with the device

pub mod capabilities;
pub mod config_payload;
pub mod qr;

pub use {
    config_payload::{CONFIG_ENDPOINT, ConfigPayload},
    qr::QrPayload,
};
