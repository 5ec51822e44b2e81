//! Uplink Processing Layers Library
//!
//! This crate implements the uplink physical-layer stages run by the
//! worker pool: equalization and demodulation of received symbols.

pub mod phy;

use thiserror::Error;

/// Common errors for processing layers
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] common::ConfigError),

    #[error("Allocation failed: {0}")]
    Allocation(#[from] common::AllocError),
}
