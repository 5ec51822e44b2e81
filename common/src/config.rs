//! Demodulation Stage Configuration
//!
//! Read-only parameters consumed by the equalization/demodulation workers.
//! The structure deserializes from the `demul` section of the driver's
//! YAML or TOML configuration file.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{DemodMode, Modulation};

/// Configuration validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{0} must be greater than zero")]
    ZeroSize(&'static str),

    #[error("{ue_num} users cannot be separated with {bs_ant_num} antennas")]
    TooManyUsers { ue_num: usize, bs_ant_num: usize },

    #[error("Unsupported modulation: {0:?}")]
    UnsupportedModulation(Modulation),

    #[error("Invalid LLR scale: {0}")]
    InvalidLlrScale(f32),
}

/// Per-task timing instrumentation
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StatsConfig {
    /// Accumulate task count and total duration per worker
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Also accumulate gather / equalize / demodulate phase durations
    #[serde(default)]
    pub detailed: bool,
    /// Tasks slower than this are reported with a warning
    #[serde(default = "default_slow_task_threshold_us")]
    pub slow_task_threshold_us: u64,
}

fn default_true() -> bool {
    true
}

fn default_slow_task_threshold_us() -> u64 {
    500
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            detailed: false,
            slow_task_threshold_us: default_slow_task_threshold_us(),
        }
    }
}

/// Equalization and demodulation parameters
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DemulConfig {
    /// Number of base station antennas
    pub bs_ant_num: usize,
    /// Number of user terminals
    pub ue_num: usize,
    /// Number of data subcarriers per OFDM symbol
    pub ofdm_data_num: usize,
    /// Subcarriers handled by one task
    #[serde(default = "default_demul_block_size")]
    pub demul_block_size: usize,
    /// Consecutive subcarriers stored per antenna in the received buffer
    #[serde(default = "default_transpose_block_size")]
    pub transpose_block_size: usize,
    /// One precoder is shared by each group of `ue_num` subcarriers
    #[serde(default)]
    pub freq_orthogonal_pilot: bool,
    /// Data symbol constellation
    #[serde(default)]
    pub modulation: Modulation,
    /// Uplink data symbols per frame
    pub data_symbols_per_frame: usize,
    /// Frames held by the buffer ring
    #[serde(default = "default_frame_window")]
    pub frame_window: usize,
    /// Hard or soft demodulation output
    #[serde(default)]
    pub demod_mode: DemodMode,
    /// Write equalized symbols to the shared buffer for constellation export
    #[serde(default)]
    pub export_constellation: bool,
    /// Gain applied to soft values before quantization to i8
    #[serde(default = "default_llr_scale")]
    pub llr_scale: f32,
    /// Timing instrumentation
    #[serde(default)]
    pub stats: StatsConfig,
}

fn default_demul_block_size() -> usize {
    48
}

fn default_transpose_block_size() -> usize {
    64
}

fn default_frame_window() -> usize {
    4
}

fn default_llr_scale() -> f32 {
    64.0
}

impl Default for DemulConfig {
    fn default() -> Self {
        Self {
            bs_ant_num: 64,
            ue_num: 16,
            ofdm_data_num: 1200,
            demul_block_size: default_demul_block_size(),
            transpose_block_size: default_transpose_block_size(),
            freq_orthogonal_pilot: false,
            modulation: Modulation::Qam16,
            data_symbols_per_frame: 13,
            frame_window: default_frame_window(),
            demod_mode: DemodMode::Hard,
            export_constellation: false,
            llr_scale: default_llr_scale(),
            stats: StatsConfig::default(),
        }
    }
}

impl DemulConfig {
    /// Check the invariants the demodulation kernels rely on
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("bs_ant_num", self.bs_ant_num),
            ("ue_num", self.ue_num),
            ("ofdm_data_num", self.ofdm_data_num),
            ("demul_block_size", self.demul_block_size),
            ("transpose_block_size", self.transpose_block_size),
            ("data_symbols_per_frame", self.data_symbols_per_frame),
            ("frame_window", self.frame_window),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::ZeroSize(*name));
        }

        if self.ue_num > self.bs_ant_num {
            return Err(ConfigError::TooManyUsers {
                ue_num: self.ue_num,
                bs_ant_num: self.bs_ant_num,
            });
        }

        if self.modulation != Modulation::Qam16 {
            return Err(ConfigError::UnsupportedModulation(self.modulation));
        }

        if !self.llr_scale.is_finite() || self.llr_scale <= 0.0 {
            return Err(ConfigError::InvalidLlrScale(self.llr_scale));
        }

        Ok(())
    }

    /// Bits per constellation point
    pub fn mod_order(&self) -> usize {
        self.modulation.bits_per_symbol()
    }

    /// Number of tasks needed to cover one OFDM symbol
    pub fn demul_block_num(&self) -> usize {
        self.ofdm_data_num.div_ceil(self.demul_block_size)
    }

    /// Number of tasks needed to cover one frame
    pub fn tasks_per_frame(&self) -> usize {
        self.demul_block_num() * self.data_symbols_per_frame
    }

    /// Number of rows in every per-symbol buffer
    pub fn symbol_rows(&self) -> usize {
        self.frame_window * self.data_symbols_per_frame
    }

    /// Subcarriers per received row, rounded up to whole transpose blocks
    pub fn padded_subcarriers(&self) -> usize {
        self.ofdm_data_num.div_ceil(self.transpose_block_size) * self.transpose_block_size
    }
}
