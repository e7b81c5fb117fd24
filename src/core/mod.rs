//! Core business logic module

pub mod delivery;
pub mod discovery;
pub mod error;
pub mod monitor;
pub mod operator;
pub mod scanner;
pub mod service;
pub mod types;
pub mod workflow;
