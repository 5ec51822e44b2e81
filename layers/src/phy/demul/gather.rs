//! Gather Kernel
//!
//! Reorders received samples from the antenna-major transposed layout into
//! a subcarrier-major scratch buffer, one batch of up to [`GATHER_BATCH`]
//! subcarriers at a time.
//!
//! In a received row, subcarrier `sc` of antenna `ant` lives at
//!
//! ```text
//! (sc / T) * T * ants + ant * T + sc % T        T = transpose block size
//! ```
//!
//! so antennas are `T` samples apart and eight neighbouring subcarriers of
//! one antenna share a cache line. The fast path reads four antennas per
//! step with stride `T` (lanes `0, T, 2T, 3T`) for each of the eight
//! subcarriers of that line. The scratch output is `[subcarrier][antenna]`.

use num_complex::Complex32;

use super::addressing::DemulLayout;

/// Subcarriers gathered per batch, one cache line of complex floats
pub const GATHER_BATCH: usize = 8;

/// Antennas read per strided load on the fast path
pub const ANT_GROUP: usize = 4;

/// Scalar gather, valid for any batch position and length
pub fn gather_reference(
    row: &[Complex32],
    layout: &DemulLayout,
    sc_start: usize,
    batch_len: usize,
    out: &mut [Complex32],
) {
    let ants = layout.bs_ant_num;
    debug_assert!(out.len() >= batch_len * ants);

    for (j, dst) in out.chunks_exact_mut(ants).take(batch_len).enumerate() {
        for (ant, value) in dst.iter_mut().enumerate() {
            *value = row[layout.data_index(ant, sc_start + j)];
        }
    }
}

/// Whether the cache-line path can serve this batch: a full batch that
/// does not straddle a transpose block, with antennas in whole groups
pub fn can_gather_cache_line(layout: &DemulLayout, sc_start: usize, batch_len: usize) -> bool {
    let (_, in_block) = layout.transpose_position(sc_start);
    batch_len == GATHER_BATCH
        && in_block + GATHER_BATCH <= layout.transpose_block_size
        && layout.bs_ant_num % ANT_GROUP == 0
}

/// Strided gather of one full cache line of subcarriers
pub fn gather_cache_line(
    row: &[Complex32],
    layout: &DemulLayout,
    sc_start: usize,
    out: &mut [Complex32],
) {
    debug_assert!(can_gather_cache_line(layout, sc_start, GATHER_BATCH));
    let ants = layout.bs_ant_num;
    let stride = layout.transpose_block_size;
    let base = layout.data_index(0, sc_start);

    for (group, first_ant) in (0..ants).step_by(ANT_GROUP).enumerate() {
        let src = &row[base + group * ANT_GROUP * stride..];
        for j in 0..GATHER_BATCH {
            let lanes: [Complex32; ANT_GROUP] = std::array::from_fn(|k| src[j + k * stride]);
            out[j * ants + first_ant..][..ANT_GROUP].copy_from_slice(&lanes);
        }
    }
}

/// Gather `batch_len` subcarriers starting at `sc_start` into `out`
pub fn gather_batch(
    row: &[Complex32],
    layout: &DemulLayout,
    sc_start: usize,
    batch_len: usize,
    out: &mut [Complex32],
) {
    if can_gather_cache_line(layout, sc_start, batch_len) {
        gather_cache_line(row, layout, sc_start, out);
    } else {
        gather_reference(row, layout, sc_start, batch_len, out);
    }
}
