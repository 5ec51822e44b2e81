//! Shared Uplink Buffers
//!
//! Pre-allocated data-plane buffers exchanged between the channel
//! compensation, precoder estimation, demodulation and decoding stages.
//! Shapes are fixed at construction from the [`DemulConfig`].

use common::{DemulConfig, Table};
use num_complex::Complex32;
use tracing::debug;

use super::demul::DemulLayout;
use crate::LayerError;

/// Buffers read and written by the demodulation workers
#[derive(Debug)]
pub struct DemulBuffers {
    /// Received samples, one row per (frame, symbol), transposed blocks
    pub data: Table<Complex32>,
    /// Column-major `ue_num x bs_ant_num` precoders, one row per (frame, subcarrier)
    pub precoder: Table<Complex32>,
    /// Equalized symbols, one row per (frame, symbol), user-minor
    pub equalized: Table<Complex32>,
    /// Hard decisions, one byte per (subcarrier, user)
    pub demod_hard: Table<u8>,
    /// Soft values, user-major then subcarrier
    pub demod_soft: Table<i8>,
}

impl DemulBuffers {
    /// Allocate every buffer for `config`
    pub fn new(config: &DemulConfig) -> Result<Self, LayerError> {
        config.validate()?;
        let layout = DemulLayout::new(config);
        let rows = config.symbol_rows();
        let sc_users = config.ofdm_data_num * config.ue_num;

        let buffers = Self {
            data: Table::new(rows, layout.data_row_len())?,
            precoder: Table::new(
                config.frame_window * config.ofdm_data_num,
                layout.precoder_len(),
            )?,
            equalized: Table::new(rows, sc_users)?,
            demod_hard: Table::new(rows, sc_users)?,
            demod_soft: Table::new(rows, sc_users * config.mod_order())?,
        };

        debug!(
            "Allocated demodulation buffers: {} symbol rows, {} precoder rows of {} entries",
            rows,
            buffers.precoder.rows(),
            layout.precoder_len()
        );
        Ok(buffers)
    }

    /// Check that every buffer has the shape `layout` addresses
    pub fn matches(&self, layout: &DemulLayout) -> bool {
        let rows = layout.frame_window * layout.data_symbols_per_frame;
        let sc_users = layout.ofdm_data_num * layout.ue_num;

        self.data.rows() == rows
            && self.data.row_len() == layout.data_row_len()
            && self.precoder.rows() == layout.frame_window * layout.ofdm_data_num
            && self.precoder.row_len() == layout.precoder_len()
            && self.equalized.rows() == rows
            && self.equalized.row_len() == sc_users
            && self.demod_hard.rows() == rows
            && self.demod_hard.row_len() == sc_users
            && self.demod_soft.rows() == rows
            && self.demod_soft.row_len() == sc_users * layout.mod_order
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_shapes() {
        let config = DemulConfig {
            bs_ant_num: 8,
            ue_num: 4,
            ofdm_data_num: 100,
            demul_block_size: 16,
            transpose_block_size: 32,
            data_symbols_per_frame: 3,
            frame_window: 2,
            ..Default::default()
        };
        let buffers = DemulBuffers::new(&config).unwrap();
        let layout = DemulLayout::new(&config);

        assert_eq!(buffers.data.rows(), 6);
        assert_eq!(buffers.data.row_len(), 128 * 8);
        assert_eq!(buffers.precoder.rows(), 200);
        assert_eq!(buffers.precoder.row_len(), 32);
        assert_eq!(buffers.demod_soft.row_len(), 1600);
        assert!(buffers.matches(&layout));

        let other = DemulLayout::new(&DemulConfig { ue_num: 2, ..config });
        assert!(!buffers.matches(&other));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = DemulConfig {
            ue_num: 0,
            ..Default::default()
        };
        assert!(matches!(DemulBuffers::new(&config), Err(LayerError::Config(_))));
    }
}
