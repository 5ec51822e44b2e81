//! Uplink Equalization and Demodulation
//!
//! One task covers one block of subcarriers of one data symbol:
//!
//! 1. the scheduling offset is decoded into (frame, symbol, block),
//! 2. received samples are gathered eight subcarriers at a time,
//! 3. each subcarrier is equalized with its zero-forcing precoder,
//! 4. the equalized block is demodulated by the configured policy,
//! 5. one completion event carrying the offset goes to the scheduler.

pub mod addressing;
pub mod equalize;
pub mod gather;
pub mod hard;
pub mod soft;
pub mod worker;

pub use addressing::{DemulLayout, TaskCoord};
pub use hard::HardDemodulator;
pub use soft::SoftDemodulator;
pub use worker::DemulWorker;

use common::{DemodMode, DemulConfig};
use num_complex::Complex32;

use crate::phy::buffers::DemulBuffers;
use crate::LayerError;

/// Demodulation output policy
///
/// Each worker owns one instance, selected once from the configuration.
pub trait Demodulator: Send {
    /// Policy implemented by this demodulator
    fn mode(&self) -> DemodMode;

    /// Demodulate `num_sc` equalized subcarriers (subcarrier-major,
    /// user-minor) into the task's output region
    fn demodulate(&mut self, equalized: &[Complex32], num_sc: usize, out: &mut BlockOutput<'_>);
}

/// Create the demodulator selected by `config.demod_mode`
pub fn demodulator_for(config: &DemulConfig) -> Result<Box<dyn Demodulator>, LayerError> {
    config.validate()?;
    let demodulator: Box<dyn Demodulator> = match config.demod_mode {
        DemodMode::Hard => Box::new(HardDemodulator::new(config.ue_num)),
        DemodMode::Soft => Box::new(SoftDemodulator::new(config)?),
    };
    Ok(demodulator)
}

/// Writable view of the demodulated-buffer region owned by one task
pub struct BlockOutput<'a> {
    buffers: &'a DemulBuffers,
    layout: &'a DemulLayout,
    row: usize,
    sc_start: usize,
    num_sc: usize,
}

impl<'a> BlockOutput<'a> {
    /// # Safety
    /// While the view is alive, no other reference may observe the hard
    /// region `[sc_start, sc_start + num_sc)` of `row`, nor the matching
    /// soft region of any user.
    pub unsafe fn new(
        buffers: &'a DemulBuffers,
        layout: &'a DemulLayout,
        row: usize,
        sc_start: usize,
        num_sc: usize,
    ) -> Self {
        Self {
            buffers,
            layout,
            row,
            sc_start,
            num_sc,
        }
    }

    /// Subcarriers covered by this view
    pub fn num_sc(&self) -> usize {
        self.num_sc
    }

    /// Hard bytes of the block, subcarrier-major
    pub fn hard(&mut self) -> &mut [u8] {
        let start = self.layout.hard_index(self.sc_start, 0);
        let len = self.num_sc * self.layout.ue_num;
        // Safety: exclusive access was promised by `BlockOutput::new`
        unsafe { self.buffers.demod_hard.shared_slice_mut(self.row, start, len) }
    }

    /// Soft values of one user over the block
    pub fn soft_user(&mut self, ue: usize) -> &mut [i8] {
        let start = self.layout.soft_index(ue, self.sc_start);
        let len = self.num_sc * self.layout.mod_order;
        // Safety: exclusive access was promised by `BlockOutput::new`
        unsafe { self.buffers.demod_soft.shared_slice_mut(self.row, start, len) }
    }
}
