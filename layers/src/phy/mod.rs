//! Physical Layer (PHY) Submodules
//!
//! Uplink data-plane processing between channel estimation and decoding.

pub mod buffers;
pub mod demul;
pub mod stats;
pub mod synthetic;

// Re-export commonly used types
pub use buffers::DemulBuffers;
pub use demul::{demodulator_for, DemulLayout, DemulWorker, Demodulator, TaskCoord};
pub use stats::{DemulStats, TaskPhase, WorkerStatsSnapshot};
pub use synthetic::SyntheticUplink;
