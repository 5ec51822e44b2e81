//! Uplink Driver Configuration
//!
//! One file carries the demodulation parameters shared with the workers
//! and the run parameters of the driver. YAML and TOML are both accepted,
//! selected by the file extension.

use std::path::Path;

use anyhow::{bail, Context};
use common::DemulConfig;
use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UplinkConfig {
    /// Equalization and demodulation parameters
    pub demul: DemulConfig,
    /// Driver run parameters
    #[serde(default)]
    pub run: RunConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

/// Driver run parameters
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RunConfig {
    /// Frames dispatched to the worker pool
    #[serde(default = "default_frames")]
    pub frames: usize,
    /// Worker threads
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Peak amplitude of the uniform noise added to received samples
    #[serde(default)]
    pub noise: f32,
    /// Seed of the synthetic uplink
    #[serde(default)]
    pub seed: u64,
    /// Write per-worker statistics as JSON to this file
    pub stats_file: Option<String>,
}

fn default_frames() -> usize {
    10
}

fn default_workers() -> usize {
    4
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            frames: default_frames(),
            workers: default_workers(),
            noise: 0.0,
            seed: 0,
            stats_file: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl UplinkConfig {
    /// Load configuration from a YAML or TOML file
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path))?;

        let config: UplinkConfig = match Path::new(path).extension().and_then(|e| e.to_str()) {
            Some("yml") | Some("yaml") => serde_yaml::from_str(&contents)?,
            Some("toml") => toml::from_str(&contents)?,
            _ => bail!("Unsupported configuration format: {}", path),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the run parameters and the demodulation parameters
    pub fn validate(&self) -> anyhow::Result<()> {
        self.demul.validate()?;
        if self.run.workers == 0 {
            bail!("At least one worker is required");
        }
        if !self.run.noise.is_finite() || self.run.noise < 0.0 {
            bail!("Invalid noise amplitude: {}", self.run.noise);
        }
        Ok(())
    }
}
