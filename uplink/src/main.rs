//! Albor Space Uplink Demodulation Application
//!
//! Drives the equalization and demodulation worker pool over a synthetic
//! zero-forcing uplink: buffers are filled once per frame slot, frames are
//! dispatched slot by slot to the workers, and the demodulated output is
//! checked against the transmitted bits.

mod config;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use common::{DemodMode, DemulConfig};
use interfaces::{ChannelConsumer, Consumer, Event, EventType};
use layers::phy::synthetic::{hard_bit_errors, soft_bit_errors};
use layers::phy::{DemulBuffers, DemulLayout, DemulStats, DemulWorker, SyntheticUplink};

use crate::config::UplinkConfig;

/// Albor Space uplink demodulation
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (.yml, .yaml or .toml)
    #[arg(short, long, default_value = "uplink/uplink.yaml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Number of frames to dispatch
    #[arg(long)]
    frames: Option<usize>,

    /// Number of worker threads
    #[arg(long)]
    workers: Option<usize>,

    /// Run the single-subcarrier diagnostic on this offset after the run
    #[arg(long)]
    probe: Option<usize>,
}

/// Work item sent to a worker thread
#[derive(Debug, Clone, Copy)]
enum WorkerCommand {
    Process(usize),
    Probe(usize),
}

/// Worker thread handle and its queue
struct WorkerHandle {
    tx: UnboundedSender<WorkerCommand>,
    thread: JoinHandle<()>,
}

fn spawn_worker(mut worker: DemulWorker) -> Result<WorkerHandle> {
    let (tx, mut rx) = mpsc::unbounded_channel::<WorkerCommand>();
    let thread = std::thread::Builder::new()
        .name(format!("demul-{}", worker.tid()))
        .spawn(move || {
            while let Some(command) = rx.blocking_recv() {
                // SAFETY: the dispatcher sends each offset of a frame slot
                // exactly once and only re-sends the slot after every
                // completion event of the previous round was received.
                unsafe {
                    match command {
                        WorkerCommand::Process(offset) => worker.process(offset),
                        WorkerCommand::Probe(offset) => worker.process_single_subcarrier(offset),
                    }
                }
            }
            debug!("Demul worker {} stopped", worker.tid());
        })
        .context("Failed to spawn worker thread")?;
    Ok(WorkerHandle { tx, thread })
}

/// Frame-by-frame dispatcher over the buffer ring
struct Dispatcher {
    layout: DemulLayout,
    tasks_per_frame: usize,
    workers: Vec<WorkerHandle>,
    events: UnboundedReceiver<Event>,
    /// Outstanding tasks per frame slot
    pending: Vec<usize>,
    next_worker: usize,
}

impl Dispatcher {
    fn new(
        config: &DemulConfig,
        workers: Vec<WorkerHandle>,
        events: UnboundedReceiver<Event>,
    ) -> Self {
        Self {
            layout: DemulLayout::new(config),
            tasks_per_frame: config.tasks_per_frame(),
            workers,
            events,
            pending: vec![0; config.frame_window],
            next_worker: 0,
        }
    }

    fn send(&mut self, command: WorkerCommand) -> Result<()> {
        let worker = &self.workers[self.next_worker];
        worker
            .tx
            .send(command)
            .map_err(|_| anyhow::anyhow!("Worker {} queue closed", self.next_worker))?;
        self.next_worker = (self.next_worker + 1) % self.workers.len();
        Ok(())
    }

    async fn wait_event(&mut self) -> Result<()> {
        let event = self
            .events
            .recv()
            .await
            .ok_or_else(|| anyhow::anyhow!("Completion channel closed"))?;
        match event.event_type {
            EventType::Demul => {
                let slot = event.offset / self.tasks_per_frame;
                self.pending[slot] -= 1;
            }
        }
        Ok(())
    }

    /// Dispatch every task of `frame` into its slot of the ring
    async fn dispatch_frame(&mut self, frame: usize) -> Result<()> {
        let slot = frame % self.layout.frame_window;
        while self.pending[slot] > 0 {
            self.wait_event().await?;
        }

        for symbol_id in 0..self.layout.data_symbols_per_frame {
            for block_id in 0..self.layout.demul_block_num {
                let offset = self.layout.encode_offset(slot, symbol_id, block_id);
                self.send(WorkerCommand::Process(offset))?;
            }
        }
        self.pending[slot] = self.tasks_per_frame;
        debug!("Dispatched frame {} into slot {}", frame, slot);
        Ok(())
    }

    /// Wait until no task is outstanding
    async fn drain(&mut self) -> Result<()> {
        while self.pending.iter().any(|&p| p > 0) {
            self.wait_event().await?;
        }
        Ok(())
    }

    /// Run the single-subcarrier diagnostic on one idle offset
    async fn probe(&mut self, offset: usize) -> Result<()> {
        let slot = offset / self.tasks_per_frame;
        if slot >= self.layout.frame_window {
            anyhow::bail!("Probe offset {} is outside the frame window", offset);
        }
        self.drain().await?;
        self.send(WorkerCommand::Probe(offset))?;
        self.pending[slot] = 1;
        self.drain().await
    }

    /// Close every queue and join the worker threads
    fn shutdown(self) {
        for (tid, worker) in self.workers.into_iter().enumerate() {
            drop(worker.tx);
            if worker.thread.join().is_err() {
                error!("Demul worker {} panicked", tid);
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = UplinkConfig::from_file(&args.config)?;
    if let Some(frames) = args.frames {
        config.run.frames = frames;
    }
    if let Some(workers) = args.workers {
        config.run.workers = workers;
    }
    config.validate()?;

    // Initialize logging
    let log_level = args.log_level.clone().unwrap_or_else(|| config.log.level.clone());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level));

    fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .init();

    info!("Starting Albor Space uplink demodulation");
    info!("Configuration file: {}", args.config);

    let demul = Arc::new(config.demul.clone());
    info!("Demodulation configuration:");
    info!("  Antennas: {}, users: {}", demul.bs_ant_num, demul.ue_num);
    info!(
        "  Subcarriers: {} in blocks of {} (transpose block {})",
        demul.ofdm_data_num, demul.demul_block_size, demul.transpose_block_size
    );
    info!(
        "  Symbols per frame: {}, frame window: {}",
        demul.data_symbols_per_frame, demul.frame_window
    );
    info!(
        "  Demodulation: {:?}, export constellation: {}",
        demul.demod_mode, demul.export_constellation
    );

    // Fill the buffer ring with a known transmission
    let mut buffers = DemulBuffers::new(&demul)?;
    let tx_bits = SyntheticUplink::new(&demul, config.run.seed)
        .with_noise(config.run.noise)
        .fill_window(&mut buffers)?;
    let buffers = Arc::new(buffers);

    let stats = Arc::new(DemulStats::new(config.run.workers));
    let (consumer, events) = ChannelConsumer::new();
    let consumer: Arc<dyn Consumer> = Arc::new(consumer);

    let mut handles = Vec::with_capacity(config.run.workers);
    for tid in 0..config.run.workers {
        let worker = DemulWorker::new(
            demul.clone(),
            tid,
            consumer.clone(),
            buffers.clone(),
            stats.clone(),
        )?;
        handles.push(spawn_worker(worker)?);
    }
    info!("Started {} demodulation workers", config.run.workers);

    let mut dispatcher = Dispatcher::new(&demul, handles, events);
    let start = Instant::now();
    for frame in 0..config.run.frames {
        dispatcher.dispatch_frame(frame).await?;
    }
    dispatcher.drain().await?;
    let elapsed = start.elapsed();

    let tasks = config.run.frames * demul.tasks_per_frame();
    info!(
        "Processed {} frames ({} tasks) in {:.3} ms, {:.1} tasks/ms",
        config.run.frames,
        tasks,
        elapsed.as_secs_f64() * 1e3,
        tasks as f64 / (elapsed.as_secs_f64() * 1e3).max(f64::EPSILON)
    );

    // Only slots that were dispatched at least once hold output
    if config.run.frames >= demul.frame_window {
        let layout = DemulLayout::new(&demul);
        let total_bits = tx_bits.rows() * tx_bits.row_len() * demul.mod_order();
        let errors = match demul.demod_mode {
            DemodMode::Hard => hard_bit_errors(&tx_bits, &buffers.demod_hard),
            DemodMode::Soft => soft_bit_errors(&layout, &tx_bits, &buffers.demod_soft),
        };
        info!(
            "Bit errors: {} of {} ({:.3e})",
            errors,
            total_bits,
            errors as f64 / total_bits as f64
        );
        if errors > 0 && config.run.noise == 0.0 {
            warn!("Noise-free run produced {} bit errors", errors);
        }
    } else {
        info!("Fewer frames than slots in the window, skipping verification");
    }

    if let Some(offset) = args.probe {
        dispatcher.probe(offset).await?;
    }
    dispatcher.shutdown();

    let snapshots = stats.snapshots();
    info!("Worker statistics:");
    for snapshot in &snapshots {
        info!(
            "  Worker {}: {} tasks ({} slow), mean {:.2} us",
            snapshot.tid,
            snapshot.task_count,
            snapshot.slow_task_count,
            snapshot.mean_task_us
        );
        debug!(
            "  Worker {}: gather {:.1} us, equalize {:.1} us, demod {:.1} us",
            snapshot.tid,
            snapshot.gather_us,
            snapshot.equalize_us,
            snapshot.demod_us
        );
    }

    if let Some(path) = &config.run.stats_file {
        let json = serde_json::to_string_pretty(&snapshots)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write statistics to {}", path))?;
        info!("Statistics written to {}", path);
    }

    info!("Uplink demodulation complete");
    Ok(())
}
