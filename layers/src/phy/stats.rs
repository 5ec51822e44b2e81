//! Per-Worker Task Statistics
//!
//! Each worker accumulates into its own row. Rows are aligned to a cache
//! line so that workers running on different cores never write to the
//! same line.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Timed phases of a demodulation task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskPhase {
    Total = 0,
    Gather = 1,
    Equalize = 2,
    Demod = 3,
}

const PHASE_COUNT: usize = 4;

/// Counters of one worker
#[repr(align(64))]
#[derive(Debug, Default)]
pub struct WorkerStatsRow {
    task_count: AtomicU64,
    slow_task_count: AtomicU64,
    phase_nanos: [AtomicU64; PHASE_COUNT],
}

/// Accumulated figures of one worker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatsSnapshot {
    pub tid: usize,
    pub task_count: u64,
    pub slow_task_count: u64,
    pub total_us: f64,
    pub gather_us: f64,
    pub equalize_us: f64,
    pub demod_us: f64,
    pub mean_task_us: f64,
}

/// Statistics table shared by all demodulation workers
#[derive(Debug)]
pub struct DemulStats {
    rows: Box<[WorkerStatsRow]>,
}

impl DemulStats {
    /// Create one zeroed row per worker
    pub fn new(workers: usize) -> Self {
        Self {
            rows: (0..workers).map(|_| WorkerStatsRow::default()).collect(),
        }
    }

    /// Number of worker rows
    pub fn workers(&self) -> usize {
        self.rows.len()
    }

    /// Count one finished task
    pub fn add_task(&self, tid: usize) {
        self.rows[tid].task_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one task that exceeded the slow-task threshold
    pub fn add_slow_task(&self, tid: usize) {
        self.rows[tid].slow_task_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Accumulate time spent in `phase`
    pub fn add_duration(&self, tid: usize, phase: TaskPhase, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.rows[tid].phase_nanos[phase as usize].fetch_add(nanos, Ordering::Relaxed);
    }

    /// Read the counters of one worker
    pub fn snapshot(&self, tid: usize) -> WorkerStatsSnapshot {
        let row = &self.rows[tid];
        let micros =
            |phase: TaskPhase| row.phase_nanos[phase as usize].load(Ordering::Relaxed) as f64 / 1e3;
        let task_count = row.task_count.load(Ordering::Relaxed);
        let total_us = micros(TaskPhase::Total);

        WorkerStatsSnapshot {
            tid,
            task_count,
            slow_task_count: row.slow_task_count.load(Ordering::Relaxed),
            total_us,
            gather_us: micros(TaskPhase::Gather),
            equalize_us: micros(TaskPhase::Equalize),
            demod_us: micros(TaskPhase::Demod),
            mean_task_us: if task_count > 0 { total_us / task_count as f64 } else { 0.0 },
        }
    }

    /// Read every worker's counters
    pub fn snapshots(&self) -> Vec<WorkerStatsSnapshot> {
        (0..self.workers()).map(|tid| self.snapshot(tid)).collect()
    }

    /// Zero every counter
    pub fn reset(&self) {
        for row in self.rows.iter() {
            row.task_count.store(0, Ordering::Relaxed);
            row.slow_task_count.store(0, Ordering::Relaxed);
            for nanos in &row.phase_nanos {
                nanos.store(0, Ordering::Relaxed);
            }
        }
    }
}
