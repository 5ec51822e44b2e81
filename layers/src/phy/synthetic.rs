//! Synthetic Uplink Source
//!
//! Fills the demodulation buffers with a known transmission so the
//! equalization and demodulation stages can be exercised without a radio
//! front end. The channel of every subcarrier is a phase-rotated DFT
//! matrix, whose columns are orthogonal, so the zero-forcing precoder is
//! simply `H^H / bs_ant_num`.

use std::f32::consts::PI;

use common::{DemulConfig, Table};
use ndarray::{Array1, Array2};
use num_complex::Complex32;
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info};

use super::buffers::DemulBuffers;
use super::demul::hard::map_16qam;
use super::demul::{DemulLayout, TaskCoord};
use crate::LayerError;

/// Seeded generator of transmitted bits, channels and received samples
pub struct SyntheticUplink {
    layout: DemulLayout,
    /// Peak amplitude of the uniform noise added per real component
    noise: f32,
    rng: StdRng,
}

impl SyntheticUplink {
    pub fn new(config: &DemulConfig, seed: u64) -> Self {
        Self {
            layout: DemulLayout::new(config),
            noise: 0.0,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Add uniform noise of peak amplitude `noise` to every received sample
    pub fn with_noise(mut self, noise: f32) -> Self {
        self.noise = noise.max(0.0);
        self
    }

    /// Subcarrier whose precoder serves `sc`
    fn pilot_subcarrier(&self, sc: usize) -> usize {
        if self.layout.freq_orthogonal_pilot {
            sc - sc % self.layout.ue_num
        } else {
            sc
        }
    }

    /// `bs_ant_num x ue_num` channel of subcarrier `sc` in frame slot `frame_id`
    pub fn channel(&self, frame_id: usize, sc: usize) -> Array2<Complex32> {
        let ants = self.layout.bs_ant_num;
        let key = self.pilot_subcarrier(sc) + frame_id * self.layout.ofdm_data_num;

        Array2::from_shape_fn((ants, self.layout.ue_num), |(ant, ue)| {
            let steering = 2.0 * PI * ((ant * ue) % ants) as f32 / ants as f32;
            let rotation = 2.0 * PI * ((key * (ue + 1)) % 97) as f32 / 97.0;
            Complex32::from_polar(1.0, steering + rotation)
        })
    }

    fn noise_sample(&mut self) -> Complex32 {
        if self.noise > 0.0 {
            Complex32::new(
                self.rng.gen_range(-self.noise..self.noise),
                self.rng.gen_range(-self.noise..self.noise),
            )
        } else {
            Complex32::default()
        }
    }

    /// Write precoders and received samples for every frame slot
    ///
    /// Returns the transmitted 4-bit groups laid out like the hard
    /// demodulation buffer.
    pub fn fill_window(&mut self, buffers: &mut DemulBuffers) -> Result<Table<u8>, LayerError> {
        let layout = self.layout;
        if !buffers.matches(&layout) {
            return Err(LayerError::InvalidConfiguration(
                "buffer shapes do not match the synthetic source".to_string(),
            ));
        }

        let ants = layout.bs_ant_num;
        let sc_num = layout.ofdm_data_num;
        let mut tx_bits = Table::new(
            layout.frame_window * layout.data_symbols_per_frame,
            sc_num * layout.ue_num,
        )?;
        buffers.precoder.fill(Complex32::default());
        buffers.data.fill(Complex32::default());

        for frame_id in 0..layout.frame_window {
            let channels: Vec<Array2<Complex32>> =
                (0..sc_num).map(|sc| self.channel(frame_id, sc)).collect();

            for (sc, h) in channels.iter().enumerate() {
                if self.pilot_subcarrier(sc) != sc {
                    continue;
                }
                // P = H^H / ants, stored column-major: entry [ant * ue_num + ue]
                let precoder = h.t().mapv(|c| c.conj() / ants as f32);
                let row = buffers.precoder.row_mut(layout.precoder_row(frame_id, sc));
                for (dst, &value) in row.iter_mut().zip(precoder.t().iter()) {
                    *dst = value;
                }
            }

            for symbol_id in 0..layout.data_symbols_per_frame {
                let row = layout.symbol_row(&TaskCoord {
                    frame_id,
                    symbol_id,
                    sc_start: 0,
                });

                for (sc, h) in channels.iter().enumerate() {
                    let bits: Vec<u8> = (0..layout.ue_num)
                        .map(|_| self.rng.gen_range(0..16u8))
                        .collect();
                    let symbols = Array1::from_iter(bits.iter().map(|&b| map_16qam(b)));
                    let received = h.dot(&symbols);

                    for (ant, &sample) in received.iter().enumerate() {
                        let noisy = sample + self.noise_sample();
                        buffers.data.row_mut(row)[layout.data_index(ant, sc)] = noisy;
                    }
                    let start = layout.hard_index(sc, 0);
                    tx_bits.row_mut(row)[start..start + layout.ue_num].copy_from_slice(&bits);
                }
            }
            debug!("Synthetic uplink filled frame slot {}", frame_id);
        }

        info!(
            "Synthetic uplink ready: {} frame slots, {} antennas, {} users, noise {}",
            layout.frame_window, ants, layout.ue_num, self.noise
        );
        Ok(tx_bits)
    }
}

/// Count bit errors between transmitted groups and hard decisions
pub fn hard_bit_errors(tx_bits: &Table<u8>, decided: &Table<u8>) -> usize {
    (0..tx_bits.rows())
        .map(|row| {
            tx_bits
                .row(row)
                .iter()
                .zip(decided.row(row))
                .map(|(&a, &b)| (a ^ b).count_ones() as usize)
                .sum::<usize>()
        })
        .sum()
}

/// Count soft values whose sign disagrees with the transmitted bit
///
/// A zero value counts as an error.
pub fn soft_bit_errors(layout: &DemulLayout, tx_bits: &Table<u8>, soft: &Table<i8>) -> usize {
    let mut errors = 0;
    for row in 0..tx_bits.rows() {
        let bits = tx_bits.row(row);
        let llrs = soft.row(row);
        for sc in 0..layout.ofdm_data_num {
            for ue in 0..layout.ue_num {
                let group = bits[layout.hard_index(sc, ue)];
                let values = &llrs[layout.soft_index(ue, sc)..][..layout.mod_order];
                for (k, &llr) in values.iter().enumerate() {
                    let bit = (group >> (layout.mod_order - 1 - k)) & 1;
                    let decided = if llr > 0 { Some(0) } else if llr < 0 { Some(1) } else { None };
                    if decided != Some(bit) {
                        errors += 1;
                    }
                }
            }
        }
    }
    errors
}
