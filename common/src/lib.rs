//! Common Utilities and Types Library
//! 
//! This crate provides the configuration, shared types and aligned buffer
//! storage used across the uplink demodulation pipeline.

pub mod config;
pub mod table;
pub mod types;

// Re-export commonly used items
pub use config::{ConfigError, DemulConfig, StatsConfig};
pub use table::{AlignedBuffer, AllocError, Table};
pub use types::*;
