//! Equalization Kernel
//!
//! Applies the zero-forcing precoder of one subcarrier to its received
//! antenna vector. The precoder entry is a column-major `ue_num x bs_ant_num`
//! matrix, so the product is accumulated one antenna column at a time.

use num_complex::Complex32;
use num_traits::Zero;

/// `out = precoder * received` for one subcarrier
///
/// `received` holds one sample per antenna and `out` one symbol per user;
/// `precoder` must hold `out.len() * received.len()` values.
pub fn equalize_subcarrier(precoder: &[Complex32], received: &[Complex32], out: &mut [Complex32]) {
    let ue_num = out.len();
    debug_assert_eq!(precoder.len(), ue_num * received.len());

    out.fill(Complex32::zero());
    for (column, &sample) in precoder.chunks_exact(ue_num).zip(received) {
        for (acc, &weight) in out.iter_mut().zip(column) {
            *acc += weight * sample;
        }
    }
}
