//! CLI Entry Point for rust-aiq
//!
//! Provides command-line interface for:
//! - Checking a configuration file
//! - Running a simulated acquisition against the sample queues
//!
//! # Usage
//!
//! Validate a config:
//! ```bash
//! rust-aiq check-config config/aiq.toml
//! ```
//!
//! Simulate for ten seconds and print a JSON summary:
//! ```bash
//! rust-aiq simulate --config config/aiq.toml --secs 10 --json
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use parking_lot::Mutex;
use rust_aiq::config::{AiqConfig, DEFAULT_CONFIG_PATH};
use rust_aiq::data::{EdgePolarity, EdgeSearch};
use rust_aiq::sim::SyntheticSource;
use rust_aiq::sync::{sync_dst_t_abs_mult, StreamSync};
use rust_aiq::{logging, Miss, SampleQueue};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "rust-aiq")]
#[command(about = "Acquisition sample queue simulator", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load and validate a configuration file
    CheckConfig {
        /// Path to TOML config
        path: PathBuf,
    },

    /// Run synthetic producers and polling readers against live queues
    Simulate {
        /// Config file (defaults built in when absent)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Override simulation duration in seconds
        #[arg(long)]
        secs: Option<f64>,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::CheckConfig { path } => check_config(path),
        Commands::Simulate { config, secs, json } => simulate(config, secs, json).await,
    }
}

fn load_config(path: Option<&PathBuf>) -> Result<AiqConfig> {
    let config = match path {
        Some(path) => AiqConfig::load_from(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None if std::path::Path::new(DEFAULT_CONFIG_PATH).exists() => AiqConfig::load()?,
        None => AiqConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn check_config(path: PathBuf) -> Result<()> {
    let config = load_config(Some(&path))?;

    println!("✅ {} is valid", path.display());
    println!("Application: {} (log {} / {})", config.application.name, config.application.log_level, config.application.log_format);
    for stream in &config.streams {
        println!(
            "  stream {:<10} {:>9.1} Hz  {:>3} chans  {:>6.2} s ({} scans, blocks ≤ {})  sync {:?}",
            stream.name,
            stream.sample_rate_hz,
            stream.n_chans,
            stream.capacity_secs,
            stream.capacity_scans(),
            stream.block_max_scans,
            stream.sync,
        );
    }
    println!(
        "Sync: enabled={} period={} s inarow={}",
        config.sync.enabled, config.sync.source_period_secs, config.sync.inarow
    );
    Ok(())
}

#[derive(Debug, Default)]
struct ReaderStats {
    reads: AtomicU64,
    short_reads: AtomicU64,
    ramp_errors: AtomicU64,
    edges: AtomicU64,
    alignments: AtomicU64,
}

#[derive(Debug, Serialize)]
struct StreamSummary {
    name: String,
    end_ct: u64,
    q_head_ct: u64,
    blocks: usize,
    fill_fraction: f64,
    t_abs: f64,
    by_sync: bool,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    elapsed_secs: f64,
    interrupted: bool,
    reads: u64,
    short_reads: u64,
    ramp_errors: u64,
    edges_found: u64,
    alignments: u64,
    streams: Vec<StreamSummary>,
}

async fn simulate(config_path: Option<PathBuf>, secs: Option<f64>, json: bool) -> Result<()> {
    let config = load_config(config_path.as_ref())?;
    logging::init_from_config(&config)?;

    let sim = &config.simulation;
    let duration = match secs {
        Some(s) if s.is_finite() && s > 0.0 => Duration::from_secs_f64(s),
        Some(s) => anyhow::bail!("--secs must be positive, got {s}"),
        None => sim.duration,
    };
    info!(
        streams = config.streams.len(),
        readers = sim.readers,
        ?duration,
        "Starting simulation"
    );

    // Prime every queue with one buffer so its time origin is recorded.
    let mut queues = Vec::with_capacity(config.streams.len());
    let mut sources = Vec::with_capacity(config.streams.len());
    for (i, stream) in config.streams.iter().enumerate() {
        let queue = Arc::new(SampleQueue::from_config(stream)?);
        let mut source = SyntheticSource::new(stream, &config.sync, 0.0, sim.seed.wrapping_add(i as u64))
            .with_skew_ppm(sim.clock_skew_ppm * i as f64);
        source.produce(&queue, sim.buffer_scans)?;
        queues.push(queue);
        sources.push(source);
    }

    let syncs = config
        .streams
        .iter()
        .enumerate()
        .map(|(i, _)| StreamSync::init(queues[i].clone(), i, &config.streams, &config.sync))
        .collect::<rust_aiq::AiqResult<Vec<_>>>()?;
    let syncs = Arc::new(Mutex::new(syncs));

    let (stop_tx, stop_rx) = watch::channel(false);
    let stats = Arc::new(ReaderStats::default());
    let mut tasks = JoinSet::new();

    for ((stream, queue), mut source) in config.streams.iter().zip(&queues).zip(sources) {
        let queue = queue.clone();
        let mut stop = stop_rx.clone();
        let n_scans = sim.buffer_scans;
        let period = Duration::from_secs_f64(n_scans as f64 / stream.sample_rate_hz);
        let name = stream.name.clone();
        tasks.spawn(async move {
            let mut tick = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = source.produce(&queue, n_scans) {
                            warn!(stream = %name, error = %e, "producer stopped");
                            break;
                        }
                    }
                    _ = stop.changed() => break,
                }
            }
            debug!(stream = %name, end_ct = source.next_ct(), "producer finished");
        });
    }

    // Channel 0 carries the ramp unless a stream records sync there.
    let ramp_on_chan0: Arc<Vec<bool>> =
        Arc::new(config.streams.iter().map(|s| s.sync.chan() != 0).collect());

    for reader in 0..sim.readers {
        let queues = queues.clone();
        let ramp_on_chan0 = ramp_on_chan0.clone();
        let syncs = syncs.clone();
        let stats = stats.clone();
        let sync_cfg = config.sync.clone();
        let mut stop = stop_rx.clone();
        let poll = sim.poll_period;
        let n_read = sim.buffer_scans;
        tasks.spawn(async move {
            let mut tick = tokio::time::interval(poll);
            let mut mono = vec![0i16; n_read];
            let mut resume_ct = 0u64;
            let mut qi = reader % queues.len().max(1);
            loop {
                tokio::select! {
                    _ = tick.tick() => {}
                    _ = stop.changed() => break,
                }
                let Some(queue) = queues.get(qi) else { break };
                let check_ramp = ramp_on_chan0.get(qi).copied().unwrap_or(false);
                qi = (qi + 1) % queues.len();

                match queue.get_newest_n_scans_mono(&mut mono, 0) {
                    Ok(first_ct) => {
                        stats.reads.fetch_add(1, Ordering::Relaxed);
                        let broken = check_ramp && mono
                            .iter()
                            .enumerate()
                            .any(|(k, &v)| v != ((first_ct + k as u64) % 32768) as i16);
                        if broken {
                            stats.ramp_errors.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    Err(Miss::Insufficient) => {
                        stats.short_reads.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(miss) => debug!(reader, ?miss, "newest read missed"),
                }

                // Reader 0 polls the first stream for sync edges and aligns
                // the others to each new one.
                if reader != 0 {
                    continue;
                }
                let found = {
                    let syncs = syncs.lock();
                    let Some(src) = syncs.first() else { continue };
                    let queue = src.queue();
                    queue.find_edge(resume_ct, src.signal(), EdgePolarity::Rising, sync_cfg.inarow, None)
                };
                match found {
                    EdgeSearch::Found(ct) => {
                        stats.edges.fetch_add(1, Ordering::Relaxed);
                        resume_ct = ct + 1;
                        let mut syncs = syncs.lock();
                        if sync_dst_t_abs_mult(ct, 0, &mut syncs, &sync_cfg).is_ok() {
                            stats.alignments.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                    EdgeSearch::Pending { resume_ct: next } => resume_ct = next,
                    EdgeSearch::OutOfRange(Miss::TooEarly) => {
                        resume_ct = queues.first().map_or(0, |q| q.q_head_ct());
                    }
                    EdgeSearch::OutOfRange(_) => {}
                }
            }
        });
    }

    let started = std::time::Instant::now();
    let interrupted = tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, stopping");
            true
        }
    };
    stop_tx.send(true).context("stopping tasks")?;
    while let Some(joined) = tasks.join_next().await {
        joined.context("simulation task panicked")?;
    }

    let syncs = syncs.lock();
    let summary = RunSummary {
        elapsed_secs: started.elapsed().as_secs_f64(),
        interrupted,
        reads: stats.reads.load(Ordering::Relaxed),
        short_reads: stats.short_reads.load(Ordering::Relaxed),
        ramp_errors: stats.ramp_errors.load(Ordering::Relaxed),
        edges_found: stats.edges.load(Ordering::Relaxed),
        alignments: stats.alignments.load(Ordering::Relaxed),
        streams: config
            .streams
            .iter()
            .zip(queues.iter())
            .zip(syncs.iter())
            .map(|((stream, queue), sync)| StreamSummary {
                name: stream.name.clone(),
                end_ct: queue.end_ct(),
                q_head_ct: queue.q_head_ct(),
                blocks: queue.block_count(),
                fill_fraction: queue.fill_fraction(),
                t_abs: sync.t_abs,
                by_sync: sync.by_sync,
            })
            .collect(),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("📊 Simulation finished after {:.2} s", summary.elapsed_secs);
        println!(
            "  reads {} (short {}), ramp errors {}, sync edges {}, alignments {}",
            summary.reads, summary.short_reads, summary.ramp_errors, summary.edges_found, summary.alignments
        );
        for s in &summary.streams {
            println!(
                "  {:<10} end_ct {:>10}  head_ct {:>10}  blocks {:>6}  fill {:>5.1}%  t_abs {:.6}{}",
                s.name,
                s.end_ct,
                s.q_head_ct,
                s.blocks,
                s.fill_fraction * 100.0,
                s.t_abs,
                if s.by_sync { " (sync)" } else { "" },
            );
        }
    }
    Ok(())
}
