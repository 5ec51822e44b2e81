//! Common Types for the Uplink Demodulation Pipeline
//!
//! Defines the fundamental enums shared between the configuration layer,
//! the demodulation workers and the driver.

use serde::{Deserialize, Serialize};
use num_derive::{FromPrimitive, ToPrimitive};

/// Complex sample type used by every data-plane buffer
pub type ComplexFloat = num_complex::Complex32;

/// Cache line size assumed for buffer alignment and statistics padding
pub const CACHE_LINE_BYTES: usize = 64;

/// Constellation used on the uplink data symbols
///
/// The discriminant is the number of bits carried by one symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[derive(FromPrimitive, ToPrimitive, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modulation {
    /// 2 bits per symbol
    Qpsk = 2,
    /// 4 bits per symbol
    #[default]
    Qam16 = 4,
    /// 6 bits per symbol
    Qam64 = 6,
}

impl Modulation {
    /// Number of bits carried by one constellation point
    pub fn bits_per_symbol(&self) -> usize {
        *self as usize
    }
}

/// Output policy of the demodulation stage
///
/// Exactly one policy is active per deployment. Hard decisions feed
/// the uncoded bit path, soft decisions feed the LDPC decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DemodMode {
    /// One decoded bit group per byte
    #[default]
    Hard,
    /// Quantized log-likelihood ratios, one i8 per bit
    Soft,
}
