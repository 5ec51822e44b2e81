//! Layout Addressing
//!
//! Pure index arithmetic shared by every demodulation kernel: decoding of
//! scheduling offsets and the offset formulas of the received, precoder,
//! equalized and demodulated buffers.

use common::DemulConfig;

/// Position of one demodulation task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskCoord {
    /// Frame slot inside the buffer ring
    pub frame_id: usize,
    /// Data symbol inside the frame
    pub symbol_id: usize,
    /// First subcarrier of the task's block
    pub sc_start: usize,
}

/// Buffer geometry derived from [`DemulConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemulLayout {
    pub bs_ant_num: usize,
    pub ue_num: usize,
    pub ofdm_data_num: usize,
    pub demul_block_size: usize,
    pub demul_block_num: usize,
    pub transpose_block_size: usize,
    pub data_symbols_per_frame: usize,
    pub frame_window: usize,
    pub mod_order: usize,
    pub freq_orthogonal_pilot: bool,
}

impl DemulLayout {
    pub fn new(config: &DemulConfig) -> Self {
        Self {
            bs_ant_num: config.bs_ant_num,
            ue_num: config.ue_num,
            ofdm_data_num: config.ofdm_data_num,
            demul_block_size: config.demul_block_size,
            demul_block_num: config.demul_block_num(),
            transpose_block_size: config.transpose_block_size,
            data_symbols_per_frame: config.data_symbols_per_frame,
            frame_window: config.frame_window,
            mod_order: config.mod_order(),
            freq_orthogonal_pilot: config.freq_orthogonal_pilot,
        }
    }

    /// Build the scheduling offset of a (frame, symbol, block) triple
    pub fn encode_offset(&self, frame_id: usize, symbol_id: usize, block_id: usize) -> usize {
        (frame_id * self.data_symbols_per_frame + symbol_id) * self.demul_block_num + block_id
    }

    /// Split a scheduling offset into task coordinates
    pub fn decode_offset(&self, offset: usize) -> TaskCoord {
        let symbol_index = offset / self.demul_block_num;
        let block_id = offset % self.demul_block_num;
        let coord = TaskCoord {
            frame_id: symbol_index / self.data_symbols_per_frame,
            symbol_id: symbol_index % self.data_symbols_per_frame,
            sc_start: block_id * self.demul_block_size,
        };
        debug_assert!(
            coord.frame_id < self.frame_window,
            "offset {} addresses frame slot {} outside a window of {}",
            offset,
            coord.frame_id,
            self.frame_window
        );
        coord
    }

    /// Row of every per-symbol buffer addressed by a task
    pub fn symbol_row(&self, coord: &TaskCoord) -> usize {
        coord.symbol_id + coord.frame_id * self.data_symbols_per_frame
    }

    /// Number of subcarriers in the block starting at `sc_start`; the last
    /// block of a symbol may be short
    pub fn block_len(&self, sc_start: usize) -> usize {
        debug_assert!(sc_start < self.ofdm_data_num);
        self.demul_block_size.min(self.ofdm_data_num - sc_start)
    }

    /// Transpose block id and position inside that block
    pub fn transpose_position(&self, sc: usize) -> (usize, usize) {
        (sc / self.transpose_block_size, sc % self.transpose_block_size)
    }

    /// Complex index of (antenna, subcarrier) in a received row
    pub fn data_index(&self, ant: usize, sc: usize) -> usize {
        debug_assert!(ant < self.bs_ant_num && sc < self.ofdm_data_num);
        let (block, in_block) = self.transpose_position(sc);
        block * self.transpose_block_size * self.bs_ant_num
            + ant * self.transpose_block_size
            + in_block
    }

    /// Complex values per received row
    pub fn data_row_len(&self) -> usize {
        self.ofdm_data_num.div_ceil(self.transpose_block_size)
            * self.transpose_block_size
            * self.bs_ant_num
    }

    /// Precoder row used by subcarrier `sc` of frame slot `frame_id`
    pub fn precoder_row(&self, frame_id: usize, sc: usize) -> usize {
        let row = frame_id * self.ofdm_data_num + sc;
        if self.freq_orthogonal_pilot {
            row - sc % self.ue_num
        } else {
            row
        }
    }

    /// Complex values per precoder entry
    pub fn precoder_len(&self) -> usize {
        self.ue_num * self.bs_ant_num
    }

    /// Index of (subcarrier, user) in an equalized row
    pub fn equalized_index(&self, sc: usize, ue: usize) -> usize {
        sc * self.ue_num + ue
    }

    /// Index of (subcarrier, user) in a hard-demodulated row
    pub fn hard_index(&self, sc: usize, ue: usize) -> usize {
        sc * self.ue_num + ue
    }

    /// Index of the first soft value of (user, subcarrier)
    pub fn soft_index(&self, ue: usize, sc: usize) -> usize {
        (ue * self.ofdm_data_num + sc) * self.mod_order
    }
}
