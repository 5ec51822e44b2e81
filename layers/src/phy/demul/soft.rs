//! 16-QAM Soft Demodulation
//!
//! The decoder consumes soft values per user, while equalization produces
//! them per subcarrier, so each block is first transposed into one
//! contiguous row per user. Log-likelihood ratios use the distance to the
//! decision boundary of each bit:
//!
//! ```text
//! [ re, T - |re|, im, T - |im| ] * llr_scale      T = 2/sqrt(10)
//! ```
//!
//! rounded and saturated to `[-127, 127]`. A positive value favours bit 0,
//! and the bit order matches the hard-decision byte MSB first.
//!
//! Full groups of [`SOFT_VECTOR_WIDTH`] symbols go through the wide
//! kernel, the remainder through the per-symbol kernel; both produce
//! identical values.

use common::{AlignedBuffer, DemodMode, DemulConfig};
use num_complex::Complex32;

use super::hard::QAM16_THRESHOLD;
use super::{BlockOutput, Demodulator};
use crate::LayerError;

/// Symbols per step of the wide kernel
pub const SOFT_VECTOR_WIDTH: usize = 16;

/// Soft values per 16-QAM symbol
pub const QAM16_BITS: usize = 4;

#[inline]
fn quantize(value: f32) -> i8 {
    value.round().clamp(-127.0, 127.0) as i8
}

/// Soft values of one symbol
#[inline]
pub fn soft_16qam(symbol: Complex32, scale: f32) -> [i8; QAM16_BITS] {
    [
        quantize(symbol.re * scale),
        quantize((QAM16_THRESHOLD - symbol.re.abs()) * scale),
        quantize(symbol.im * scale),
        quantize((QAM16_THRESHOLD - symbol.im.abs()) * scale),
    ]
}

/// Per-symbol kernel, any number of symbols
pub fn demod_16qam_soft_narrow(symbols: &[Complex32], out: &mut [i8], scale: f32) {
    debug_assert!(out.len() >= symbols.len() * QAM16_BITS);
    for (llrs, &symbol) in out.chunks_exact_mut(QAM16_BITS).zip(symbols) {
        llrs.copy_from_slice(&soft_16qam(symbol, scale));
    }
}

/// Wide kernel over whole groups of [`SOFT_VECTOR_WIDTH`] symbols
///
/// Real and imaginary parts are split into lane arrays first so each
/// stage is a straight-line loop over the group.
pub fn demod_16qam_soft_wide(symbols: &[Complex32], out: &mut [i8], scale: f32) {
    debug_assert_eq!(symbols.len() % SOFT_VECTOR_WIDTH, 0);
    debug_assert!(out.len() >= symbols.len() * QAM16_BITS);

    let groups = symbols
        .chunks_exact(SOFT_VECTOR_WIDTH)
        .zip(out.chunks_exact_mut(SOFT_VECTOR_WIDTH * QAM16_BITS));
    for (group, llrs) in groups {
        let mut re = [0.0f32; SOFT_VECTOR_WIDTH];
        let mut im = [0.0f32; SOFT_VECTOR_WIDTH];
        for (k, symbol) in group.iter().enumerate() {
            re[k] = symbol.re;
            im[k] = symbol.im;
        }

        let mut lanes = [[0.0f32; SOFT_VECTOR_WIDTH]; QAM16_BITS];
        for k in 0..SOFT_VECTOR_WIDTH {
            lanes[0][k] = re[k] * scale;
            lanes[1][k] = (QAM16_THRESHOLD - re[k].abs()) * scale;
            lanes[2][k] = im[k] * scale;
            lanes[3][k] = (QAM16_THRESHOLD - im[k].abs()) * scale;
        }

        for (k, symbol_llrs) in llrs.chunks_exact_mut(QAM16_BITS).enumerate() {
            for (bit, llr) in symbol_llrs.iter_mut().enumerate() {
                *llr = quantize(lanes[bit][k]);
            }
        }
    }
}

/// Copy one user's symbols out of a subcarrier-major block
pub fn transpose_user(equalized: &[Complex32], ue_num: usize, ue: usize, out: &mut [Complex32]) {
    let column = equalized.iter().skip(ue).step_by(ue_num);
    for (dst, &value) in out.iter_mut().zip(column) {
        *dst = value;
    }
}

/// Soft-decision policy writing `mod_order` values per (user, subcarrier)
#[derive(Debug)]
pub struct SoftDemodulator {
    ue_num: usize,
    block_size: usize,
    llr_scale: f32,
    /// One row of `block_size` symbols per user
    transposed: AlignedBuffer<Complex32>,
}

impl SoftDemodulator {
    pub fn new(config: &DemulConfig) -> Result<Self, LayerError> {
        Ok(Self {
            ue_num: config.ue_num,
            block_size: config.demul_block_size,
            llr_scale: config.llr_scale,
            transposed: AlignedBuffer::new(config.demul_block_size * config.ue_num)?,
        })
    }
}

impl Demodulator for SoftDemodulator {
    fn mode(&self) -> DemodMode {
        DemodMode::Soft
    }

    fn demodulate(&mut self, equalized: &[Complex32], num_sc: usize, out: &mut BlockOutput<'_>) {
        let wide_len = num_sc / SOFT_VECTOR_WIDTH * SOFT_VECTOR_WIDTH;
        let block = &equalized[..num_sc * self.ue_num];

        for ue in 0..self.ue_num {
            let user_row = &mut self.transposed[ue * self.block_size..][..num_sc];
            transpose_user(block, self.ue_num, ue, user_row);

            let llrs = out.soft_user(ue);
            let (wide_out, rest_out) = llrs.split_at_mut(wide_len * QAM16_BITS);
            demod_16qam_soft_wide(&user_row[..wide_len], wide_out, self.llr_scale);
            if wide_len < num_sc {
                demod_16qam_soft_narrow(&user_row[wide_len..], rest_out, self.llr_scale);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::demul::hard::{hard_decision_16qam, map_16qam};
    use rand::{rngs::StdRng, Rng, SeedableRng};

    fn noisy_symbols(rng: &mut StdRng, len: usize) -> Vec<Complex32> {
        (0..len)
            .map(|_| {
                let point = map_16qam(rng.gen_range(0..16u8));
                point + Complex32::new(rng.gen_range(-0.2..0.2), rng.gen_range(-0.2..0.2))
            })
            .collect()
    }

    #[test]
    fn test_known_values() {
        let llrs = soft_16qam(Complex32::new(0.5, -1.0), 64.0);
        // 0.5*64 = 32, (0.6325-0.5)*64 = 8.48, -64, (0.6325-1)*64 = -23.5
        assert_eq!(llrs, [32, 8, -64, -24]);

        let saturated = soft_16qam(Complex32::new(10.0, -10.0), 64.0);
        assert_eq!(saturated, [127, -127, -127, -127]);
    }

    #[test]
    fn test_wide_matches_narrow() {
        let mut rng = StdRng::seed_from_u64(3);
        let symbols = noisy_symbols(&mut rng, 4 * SOFT_VECTOR_WIDTH);

        let mut wide = vec![0i8; symbols.len() * QAM16_BITS];
        let mut narrow = wide.clone();
        demod_16qam_soft_wide(&symbols, &mut wide, 48.0);
        demod_16qam_soft_narrow(&symbols, &mut narrow, 48.0);
        assert_eq!(wide, narrow);
    }

    #[test]
    fn test_sign_matches_hard_decision() {
        let mut rng = StdRng::seed_from_u64(5);
        let symbols = noisy_symbols(&mut rng, 512);

        for &symbol in &symbols {
            let bits = hard_decision_16qam(symbol);
            let llrs = soft_16qam(symbol, 64.0);
            for (k, &llr) in llrs.iter().enumerate() {
                let bit = (bits >> (3 - k)) & 1;
                if llr < 0 {
                    assert_eq!(bit, 1, "symbol {} llr {:?}", symbol, llrs);
                } else if llr > 0 {
                    assert_eq!(bit, 0, "symbol {} llr {:?}", symbol, llrs);
                }
            }
        }
    }

    #[test]
    fn test_transpose_user() {
        // 3 users x 5 subcarriers, value encodes (sc, ue)
        let block: Vec<Complex32> = (0..15)
            .map(|i| Complex32::new((i / 3) as f32, (i % 3) as f32))
            .collect();
        let mut row = vec![Complex32::default(); 5];
        transpose_user(&block, 3, 2, &mut row);
        for (sc, value) in row.iter().enumerate() {
            assert_eq!(*value, Complex32::new(sc as f32, 2.0));
        }
    }
}
