//! Demodulation Worker
//!
//! The unit of work run by one thread of the scheduler's worker pool. A
//! worker owns its scratch buffers and its demodulator, shares the data
//! buffers with every other worker, and reports each finished offset to
//! the scheduler's consumer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{AlignedBuffer, DemulConfig};
use interfaces::{Consumer, Event};
use num_complex::Complex32;
use tracing::{debug, trace, warn};

use super::addressing::DemulLayout;
use super::equalize::equalize_subcarrier;
use super::gather::{gather_batch, GATHER_BATCH};
use super::hard::hard_decision_16qam;
use super::{demodulator_for, BlockOutput, Demodulator};
use crate::phy::buffers::DemulBuffers;
use crate::phy::stats::{DemulStats, TaskPhase};
use crate::LayerError;

/// Equalization and demodulation worker
pub struct DemulWorker {
    config: Arc<DemulConfig>,
    layout: DemulLayout,
    tid: usize,
    consumer: Arc<dyn Consumer>,
    buffers: Arc<DemulBuffers>,
    stats: Arc<DemulStats>,
    demodulator: Box<dyn Demodulator>,
    /// Gathered antenna samples, `[subcarrier][antenna]` for one batch
    gather_scratch: AlignedBuffer<Complex32>,
    /// Equalized block when the shared buffer is not exported
    equalized_scratch: AlignedBuffer<Complex32>,
    slow_task_threshold: Duration,
}

impl DemulWorker {
    /// Create the worker with identity `tid`
    pub fn new(
        config: Arc<DemulConfig>,
        tid: usize,
        consumer: Arc<dyn Consumer>,
        buffers: Arc<DemulBuffers>,
        stats: Arc<DemulStats>,
    ) -> Result<Self, LayerError> {
        let demodulator = demodulator_for(&config)?;
        let layout = DemulLayout::new(&config);

        if !buffers.matches(&layout) {
            return Err(LayerError::InvalidConfiguration(
                "buffer shapes do not match the demodulation config".to_string(),
            ));
        }
        if tid >= stats.workers() {
            return Err(LayerError::InvalidConfiguration(format!(
                "worker {} has no statistics row ({} rows)",
                tid,
                stats.workers()
            )));
        }

        let gather_scratch = AlignedBuffer::new(GATHER_BATCH * config.bs_ant_num)?;
        let equalized_scratch = AlignedBuffer::new(config.demul_block_size * config.ue_num)?;
        let slow_task_threshold = Duration::from_micros(config.stats.slow_task_threshold_us);

        debug!(
            "Demul worker {} ready: {:?} demodulation, {} antennas, {} users",
            tid,
            demodulator.mode(),
            config.bs_ant_num,
            config.ue_num
        );

        Ok(Self {
            config,
            layout,
            tid,
            consumer,
            buffers,
            stats,
            demodulator,
            gather_scratch,
            equalized_scratch,
            slow_task_threshold,
        })
    }

    /// Worker identity
    pub fn tid(&self) -> usize {
        self.tid
    }

    /// Equalize and demodulate the block addressed by `offset`, then
    /// signal completion
    ///
    /// # Safety
    /// No other task may run concurrently on an offset addressing the same
    /// buffer row and an overlapping subcarrier range, and nothing may read
    /// the written region of the equalized or demodulated buffers until
    /// the completion event for `offset` has been delivered.
    pub unsafe fn process(&mut self, offset: usize) {
        let task_start = Instant::now();
        let detailed = self.config.stats.detailed;

        let coord = self.layout.decode_offset(offset);
        let row = self.layout.symbol_row(&coord);
        let num_sc = self.layout.block_len(coord.sc_start);
        let ue_num = self.layout.ue_num;
        let ant_num = self.layout.bs_ant_num;

        trace!(
            "Demul worker {}: frame {}, symbol {}, subcarrier {}",
            self.tid,
            coord.frame_id,
            coord.symbol_id,
            coord.sc_start
        );

        let buffers = &*self.buffers;
        let data_row = buffers.data.row(row);
        let equalized: &mut [Complex32] = if self.config.export_constellation {
            buffers.equalized.shared_slice_mut(
                row,
                self.layout.equalized_index(coord.sc_start, 0),
                num_sc * ue_num,
            )
        } else {
            &mut self.equalized_scratch[..num_sc * ue_num]
        };

        let mut gather_time = Duration::ZERO;
        let mut equalize_time = Duration::ZERO;

        for batch_start in (0..num_sc).step_by(GATHER_BATCH) {
            let batch_len = GATHER_BATCH.min(num_sc - batch_start);

            let gather_start = detailed.then(Instant::now);
            gather_batch(
                data_row,
                &self.layout,
                coord.sc_start + batch_start,
                batch_len,
                &mut self.gather_scratch,
            );

            let equalize_start = detailed.then(Instant::now);
            if let (Some(start), Some(end)) = (gather_start, equalize_start) {
                gather_time += end - start;
            }

            let received = self.gather_scratch.chunks_exact(ant_num);
            let symbols = equalized[batch_start * ue_num..].chunks_exact_mut(ue_num);
            for (j, (samples, out)) in received.zip(symbols).take(batch_len).enumerate() {
                let sc = coord.sc_start + batch_start + j;
                let precoder = buffers.precoder.row(self.layout.precoder_row(coord.frame_id, sc));
                equalize_subcarrier(precoder, samples, out);
            }

            if let Some(start) = equalize_start {
                equalize_time += start.elapsed();
            }
        }

        let demod_start = detailed.then(Instant::now);
        let mut output = BlockOutput::new(buffers, &self.layout, row, coord.sc_start, num_sc);
        self.demodulator.demodulate(equalized, num_sc, &mut output);

        let elapsed = task_start.elapsed();
        if self.config.stats.enabled {
            self.stats.add_task(self.tid);
            self.stats.add_duration(self.tid, TaskPhase::Total, elapsed);
            if let Some(start) = demod_start {
                self.stats.add_duration(self.tid, TaskPhase::Gather, gather_time);
                self.stats.add_duration(self.tid, TaskPhase::Equalize, equalize_time);
                self.stats.add_duration(self.tid, TaskPhase::Demod, start.elapsed());
            }
            if elapsed > self.slow_task_threshold {
                self.stats.add_slow_task(self.tid);
                warn!(
                    "Demul worker {} took {:.2} us for offset {}",
                    self.tid,
                    elapsed.as_secs_f64() * 1e6,
                    offset
                );
            }
        }

        self.signal_done(offset);
    }

    /// Equalize and hard-decide only the first subcarrier of the block
    /// addressed by `offset`, logging the decisions
    ///
    /// Writes the shared equalized and hard buffers regardless of the
    /// configured policy. Used to inspect a single subcarrier of a live
    /// pipeline.
    ///
    /// # Safety
    /// Same contract as [`DemulWorker::process`].
    pub unsafe fn process_single_subcarrier(&mut self, offset: usize) {
        let task_start = Instant::now();
        let coord = self.layout.decode_offset(offset);
        let row = self.layout.symbol_row(&coord);
        let sc = coord.sc_start;
        let ue_num = self.layout.ue_num;

        let buffers = &*self.buffers;
        gather_batch(buffers.data.row(row), &self.layout, sc, 1, &mut self.gather_scratch);

        let equalized = buffers
            .equalized
            .shared_slice_mut(row, self.layout.equalized_index(sc, 0), ue_num);
        let precoder = buffers.precoder.row(self.layout.precoder_row(coord.frame_id, sc));
        equalize_subcarrier(precoder, &self.gather_scratch[..self.layout.bs_ant_num], equalized);

        let decided = buffers
            .demod_hard
            .shared_slice_mut(row, self.layout.hard_index(sc, 0), ue_num);
        for (byte, &symbol) in decided.iter_mut().zip(equalized.iter()) {
            *byte = hard_decision_16qam(symbol);
        }

        debug!(
            "Demul worker {}: frame {}, symbol {}, subcarrier {} decoded {:?}",
            self.tid, coord.frame_id, coord.symbol_id, sc, decided
        );

        if self.config.stats.enabled {
            self.stats.add_task(self.tid);
            self.stats.add_duration(self.tid, TaskPhase::Total, task_start.elapsed());
        }

        self.signal_done(offset);
    }

    fn signal_done(&self, offset: usize) {
        if let Err(e) = self.consumer.handle(Event::demul(offset)) {
            warn!("Demul worker {} failed to report completion: {}", self.tid, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phy::demul::hard::map_16qam;
    use crate::phy::demul::soft::soft_16qam;
    use crate::phy::synthetic::SyntheticUplink;
    use common::{DemodMode, Table};
    use interfaces::{ChannelConsumer, EventType};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn small_config(demod_mode: DemodMode) -> DemulConfig {
        DemulConfig {
            bs_ant_num: 8,
            ue_num: 4,
            ofdm_data_num: 100,
            demul_block_size: 16,
            transpose_block_size: 32,
            data_symbols_per_frame: 2,
            frame_window: 2,
            demod_mode,
            ..Default::default()
        }
    }

    struct Fixture {
        config: Arc<DemulConfig>,
        layout: DemulLayout,
        buffers: Arc<DemulBuffers>,
        stats: Arc<DemulStats>,
        consumer: Arc<ChannelConsumer>,
        events: UnboundedReceiver<Event>,
        tx_bits: Table<u8>,
    }

    impl Fixture {
        fn new(config: DemulConfig, workers: usize) -> Self {
            let mut buffers = DemulBuffers::new(&config).unwrap();
            let mut source = SyntheticUplink::new(&config, 42);
            let tx_bits = source.fill_window(&mut buffers).unwrap();
            let (consumer, events) = ChannelConsumer::new();

            Self {
                layout: DemulLayout::new(&config),
                config: Arc::new(config),
                buffers: Arc::new(buffers),
                stats: Arc::new(DemulStats::new(workers)),
                consumer: Arc::new(consumer),
                events,
                tx_bits,
            }
        }

        fn worker(&self, tid: usize) -> DemulWorker {
            DemulWorker::new(
                self.config.clone(),
                tid,
                self.consumer.clone(),
                self.buffers.clone(),
                self.stats.clone(),
            )
            .unwrap()
        }

        fn all_offsets(&self) -> Vec<usize> {
            (0..self.config.frame_window * self.config.tasks_per_frame()).collect()
        }
    }

    #[test]
    fn test_hard_path_recovers_transmitted_bits() {
        let mut fixture = Fixture::new(small_config(DemodMode::Hard), 1);
        let mut worker = fixture.worker(0);

        for offset in fixture.all_offsets() {
            unsafe { worker.process(offset) };
            let event = fixture.events.try_recv().unwrap();
            assert_eq!(event.event_type, EventType::Demul);
            assert_eq!(event.offset, offset);
        }
        assert!(fixture.events.try_recv().is_err());

        for row in 0..fixture.config.symbol_rows() {
            assert_eq!(
                fixture.buffers.demod_hard.row(row),
                fixture.tx_bits.row(row),
                "row {}",
                row
            );
        }
        let snapshot = fixture.stats.snapshot(0);
        assert_eq!(snapshot.task_count as usize, fixture.all_offsets().len());
    }

    #[test]
    fn test_exported_constellation() {
        let mut config = small_config(DemodMode::Hard);
        config.export_constellation = true;
        let fixture = Fixture::new(config, 1);
        let mut worker = fixture.worker(0);

        let offset = fixture.layout.encode_offset(1, 0, 2);
        unsafe { worker.process(offset) };

        let row = 2;
        let equalized = fixture.buffers.equalized.row(row);
        let ue_num = fixture.layout.ue_num;
        for sc in 32..48 {
            for ue in 0..ue_num {
                let index = fixture.layout.equalized_index(sc, ue);
                let expected = map_16qam(fixture.tx_bits.row(row)[index]);
                assert!((equalized[index] - expected).norm() < 1e-4);
            }
        }
        // Subcarriers outside the block stay untouched
        assert!(equalized[..32 * ue_num].iter().all(|c| c.norm() == 0.0));
    }

    #[test]
    fn test_soft_path_agrees_with_hard_decisions() {
        let fixture = Fixture::new(small_config(DemodMode::Soft), 1);
        let mut worker = fixture.worker(0);
        for offset in fixture.all_offsets() {
            unsafe { worker.process(offset) };
        }

        let layout = &fixture.layout;
        for row in 0..fixture.config.symbol_rows() {
            let soft = fixture.buffers.demod_soft.row(row);
            let bits = fixture.tx_bits.row(row);
            for sc in 0..layout.ofdm_data_num {
                for ue in 0..layout.ue_num {
                    let group = bits[layout.hard_index(sc, ue)];
                    let llrs = &soft[layout.soft_index(ue, sc)..][..4];
                    for (k, &llr) in llrs.iter().enumerate() {
                        let bit = (group >> (3 - k)) & 1;
                        assert_ne!(llr, 0);
                        assert_eq!(llr < 0, bit == 1, "row {} sc {} ue {}", row, sc, ue);
                    }
                }
            }
        }
        // The hard buffer is never written by the soft policy
        assert!(fixture.buffers.demod_hard.row(0).iter().all(|&b| b == 0));
    }

    #[test]
    fn test_soft_block_with_remainder() {
        let mut config = small_config(DemodMode::Soft);
        config.ofdm_data_num = 74;
        config.demul_block_size = 37;
        config.export_constellation = true;
        let fixture = Fixture::new(config, 1);
        let mut worker = fixture.worker(0);

        let offset = fixture.layout.encode_offset(0, 1, 1);
        unsafe { worker.process(offset) };

        let layout = &fixture.layout;
        let equalized = fixture.buffers.equalized.row(1);
        let soft = fixture.buffers.demod_soft.row(1);
        for ue in 0..layout.ue_num {
            for sc in 37..74 {
                let symbol = equalized[layout.equalized_index(sc, ue)];
                let expected = soft_16qam(symbol, fixture.config.llr_scale);
                assert_eq!(
                    &soft[layout.soft_index(ue, sc)..][..4],
                    &expected,
                    "ue {} sc {}",
                    ue,
                    sc
                );
            }
            // First block of the row belongs to another task
            assert!(soft[layout.soft_index(ue, 0)..][..37 * 4].iter().all(|&v| v == 0));
        }
    }

    #[test]
    fn test_rerun_is_bit_identical() {
        let fixture = Fixture::new(small_config(DemodMode::Soft), 1);
        let mut worker = fixture.worker(0);
        let offset = fixture.layout.encode_offset(0, 1, 3);

        unsafe { worker.process(offset) };
        let first = fixture.buffers.demod_soft.row(1).to_vec();
        unsafe { worker.process(offset) };
        assert_eq!(fixture.buffers.demod_soft.row(1), first.as_slice());
    }

    #[test]
    fn test_concurrent_workers_match_sequential() {
        for mode in [DemodMode::Hard, DemodMode::Soft] {
            let sequential = Fixture::new(small_config(mode), 1);
            let mut worker = sequential.worker(0);
            for offset in sequential.all_offsets() {
                unsafe { worker.process(offset) };
            }

            let concurrent = Fixture::new(small_config(mode), 3);
            let offsets = concurrent.all_offsets();
            let mut shares = vec![Vec::new(); 3];
            for &offset in &offsets {
                shares[offset % 3].push(offset);
            }
            std::thread::scope(|scope| {
                for (tid, share) in shares.into_iter().enumerate() {
                    let mut worker = concurrent.worker(tid);
                    scope.spawn(move || {
                        for offset in share {
                            // Safety: the shares are disjoint offsets
                            unsafe { worker.process(offset) };
                        }
                    });
                }
            });

            for row in 0..sequential.config.symbol_rows() {
                assert_eq!(
                    concurrent.buffers.demod_hard.row(row),
                    sequential.buffers.demod_hard.row(row),
                    "{:?} row {}",
                    mode,
                    row
                );
                assert_eq!(
                    concurrent.buffers.demod_soft.row(row),
                    sequential.buffers.demod_soft.row(row),
                    "{:?} row {}",
                    mode,
                    row
                );
            }
            let counts: u64 = concurrent.stats.snapshots().iter().map(|s| s.task_count).sum();
            assert_eq!(counts as usize, offsets.len());
        }
    }

    #[test]
    fn test_detailed_phase_timing() {
        let mut config = small_config(DemodMode::Soft);
        config.stats.detailed = true;
        config.stats.slow_task_threshold_us = 10_000_000;
        let fixture = Fixture::new(config, 1);
        let mut worker = fixture.worker(0);

        let offsets = fixture.all_offsets();
        for &offset in &offsets {
            unsafe { worker.process(offset) };
        }

        let snapshot = fixture.stats.snapshot(0);
        assert_eq!(snapshot.task_count as usize, offsets.len());
        assert_eq!(snapshot.slow_task_count, 0);
        assert!(snapshot.total_us > 0.0);
        assert!(snapshot.gather_us > 0.0);
        assert!(snapshot.equalize_us > 0.0);
        assert!(snapshot.demod_us > 0.0);
    }

    #[test]
    fn test_phase_timing_off_by_default() {
        let fixture = Fixture::new(small_config(DemodMode::Hard), 1);
        let mut worker = fixture.worker(0);
        unsafe { worker.process(0) };

        let snapshot = fixture.stats.snapshot(0);
        assert_eq!(snapshot.task_count, 1);
        assert!(snapshot.total_us > 0.0);
        assert_eq!(snapshot.gather_us, 0.0);
        assert_eq!(snapshot.equalize_us, 0.0);
        assert_eq!(snapshot.demod_us, 0.0);
    }

    #[test]
    fn test_slow_tasks_counted() {
        let mut config = small_config(DemodMode::Hard);
        config.stats.slow_task_threshold_us = 0;
        let fixture = Fixture::new(config, 1);
        let mut worker = fixture.worker(0);

        for offset in 0..5 {
            unsafe { worker.process(offset) };
        }
        let snapshot = fixture.stats.snapshot(0);
        assert_eq!(snapshot.task_count, 5);
        assert_eq!(snapshot.slow_task_count, 5);
    }

    #[test]
    fn test_disabled_stats_stay_zero() {
        let mut config = small_config(DemodMode::Hard);
        config.stats.enabled = false;
        config.stats.detailed = true;
        config.stats.slow_task_threshold_us = 0;
        let mut fixture = Fixture::new(config, 1);
        let mut worker = fixture.worker(0);

        let offsets = fixture.all_offsets();
        for &offset in &offsets {
            unsafe { worker.process(offset) };
        }
        unsafe { worker.process_single_subcarrier(0) };

        let snapshot = fixture.stats.snapshot(0);
        assert_eq!(snapshot.task_count, 0);
        assert_eq!(snapshot.slow_task_count, 0);
        assert_eq!(snapshot.total_us, 0.0);
        assert_eq!(snapshot.gather_us, 0.0);
        assert_eq!(snapshot.equalize_us, 0.0);
        assert_eq!(snapshot.demod_us, 0.0);

        // Completion events do not depend on statistics
        let mut events = 0;
        while fixture.events.try_recv().is_ok() {
            events += 1;
        }
        assert_eq!(events, offsets.len() + 1);
        assert_eq!(fixture.buffers.demod_hard.row(1), fixture.tx_bits.row(1));
    }

    #[test]
    fn test_frequency_orthogonal_pilots() {
        let mut config = small_config(DemodMode::Hard);
        config.freq_orthogonal_pilot = true;
        let fixture = Fixture::new(config, 1);

        // Only the first subcarrier of each pilot group carries a precoder
        let layout = &fixture.layout;
        assert!(fixture.buffers.precoder.row(1).iter().all(|c| c.norm() == 0.0));
        assert!(fixture.buffers.precoder.row(4).iter().any(|c| c.norm() > 0.0));

        let mut worker = fixture.worker(0);
        for block in 0..layout.demul_block_num {
            unsafe { worker.process(layout.encode_offset(0, 0, block)) };
        }
        assert_eq!(fixture.buffers.demod_hard.row(0), fixture.tx_bits.row(0));
    }

    #[test]
    fn test_single_subcarrier_task() {
        let mut fixture = Fixture::new(small_config(DemodMode::Soft), 1);
        let mut worker = fixture.worker(0);

        let offset = fixture.layout.encode_offset(1, 1, 5);
        unsafe { worker.process_single_subcarrier(offset) };
        assert_eq!(fixture.events.try_recv().unwrap().offset, offset);

        let row = 3;
        let sc = 80;
        let ue_num = fixture.layout.ue_num;
        let start = fixture.layout.hard_index(sc, 0);
        assert_eq!(
            &fixture.buffers.demod_hard.row(row)[start..start + ue_num],
            &fixture.tx_bits.row(row)[start..start + ue_num]
        );
        // Only one subcarrier is touched
        let rest = &fixture.buffers.demod_hard.row(row)[start + ue_num..];
        assert!(rest.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_rejects_mismatched_buffers() {
        let fixture = Fixture::new(small_config(DemodMode::Hard), 1);
        let mut other = small_config(DemodMode::Hard);
        other.ue_num = 2;

        let result = DemulWorker::new(
            Arc::new(other),
            0,
            fixture.consumer.clone(),
            fixture.buffers.clone(),
            fixture.stats.clone(),
        );
        assert!(matches!(result, Err(LayerError::InvalidConfiguration(_))));

        let result = DemulWorker::new(
            fixture.config.clone(),
            1,
            fixture.consumer.clone(),
            fixture.buffers.clone(),
            fixture.stats.clone(),
        );
        assert!(result.is_err());
    }
}
