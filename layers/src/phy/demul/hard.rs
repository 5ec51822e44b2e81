//! 16-QAM Hard Demodulation
//!
//! Gray-coded decision per axis: the sign gives the high bit and the
//! distance from the axis against `2/sqrt(10)` gives the low bit. The
//! output byte is `[re sign, re outer, im sign, im outer]`, MSB first.

use common::DemodMode;
use num_complex::Complex32;

use super::{BlockOutput, Demodulator};

/// Inner decision threshold of the unit-energy 16-QAM constellation
pub const QAM16_THRESHOLD: f32 = 0.632_455_5;

/// Amplitude of the inner constellation points, `1/sqrt(10)`
pub const QAM16_INNER: f32 = 0.316_227_77;

/// Decide the 4-bit group of one equalized symbol
#[inline]
pub fn hard_decision_16qam(symbol: Complex32) -> u8 {
    let re_sign = (symbol.re < 0.0) as u8;
    let re_outer = (symbol.re.abs() > QAM16_THRESHOLD) as u8;
    let im_sign = (symbol.im < 0.0) as u8;
    let im_outer = (symbol.im.abs() > QAM16_THRESHOLD) as u8;
    (re_sign << 3) | (re_outer << 2) | (im_sign << 1) | im_outer
}

/// Map a 4-bit group to its constellation point
pub fn map_16qam(bits: u8) -> Complex32 {
    let axis = |sign: u8, outer: u8| {
        let magnitude = if outer != 0 { 3.0 * QAM16_INNER } else { QAM16_INNER };
        if sign != 0 {
            -magnitude
        } else {
            magnitude
        }
    };
    Complex32::new(
        axis((bits >> 3) & 1, (bits >> 2) & 1),
        axis((bits >> 1) & 1, bits & 1),
    )
}

/// Hard-decide every symbol of `symbols` into `out`
pub fn demod_16qam_hard(symbols: &[Complex32], out: &mut [u8]) {
    debug_assert!(out.len() >= symbols.len());
    for (byte, &symbol) in out.iter_mut().zip(symbols) {
        *byte = hard_decision_16qam(symbol);
    }
}

/// Hard-decision policy writing one byte per (subcarrier, user)
#[derive(Debug, Clone)]
pub struct HardDemodulator {
    ue_num: usize,
}

impl HardDemodulator {
    pub fn new(ue_num: usize) -> Self {
        Self { ue_num }
    }
}

impl Demodulator for HardDemodulator {
    fn mode(&self) -> DemodMode {
        DemodMode::Hard
    }

    fn demodulate(&mut self, equalized: &[Complex32], num_sc: usize, out: &mut BlockOutput<'_>) {
        demod_16qam_hard(&equalized[..num_sc * self.ue_num], out.hard());
    }
}
