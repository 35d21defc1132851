//! Read Until Simulator - Client Demonstration
//!
//! Runs a [`ReadUntilClient`] against an in-process simulated device with a
//! pool of example analysis workers, then prints a summary.
//!
//! # Usage
//!
//! ```bash
//! # Thirty seconds, one worker, default channels
//! read-until-sim
//!
//! # Four workers on 128 channels, stop reads after one chunk
//! read-until-sim --workers 4 --channels 128 --one-chunk
//!
//! # Machine-readable summary
//! read-until-sim --run-time 5 --json
//!
//! # Verbose logging
//! RUST_LOG=read_until_core=debug read-until-sim
//! ```
//!
//! # Signals
//!
//! - `SIGINT` (Ctrl-C): reset the client and finish early

mod analysis;
mod device;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use read_until_core::{
    default_config_path, load_config_from_path, ActionKind, ActionOutcome, CacheStats,
    ConfigOverrides, InProcessTransport, ReadUntilClient,
};

use analysis::{WorkerReport, WorkerSettings};
use device::{GeneratorSettings, ReadGenerator};

/// Time allowed for each worker to notice the client stopped
const WORKER_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

/// Read Until API demonstration against a simulated device
#[derive(Parser, Debug)]
#[command(name = "read-until-sim")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Number of analysis workers
    #[arg(long, default_value_t = 1)]
    workers: usize,

    /// Seconds to wait before starting analysis
    #[arg(long, default_value_t = 1)]
    analysis_delay: u64,

    /// Seconds to run the analysis
    #[arg(long, default_value_t = 30)]
    run_time: u64,

    /// Seconds to apply the unblock voltage
    #[arg(long)]
    unblock_duration: Option<f64>,

    /// Stop every read after its first chunk
    #[arg(long)]
    one_chunk: bool,

    /// Minimum read chunk size to receive (clamped by the device protocol)
    #[arg(long, default_value_t = 2000)]
    min_chunk_size: u64,

    /// Chunks each worker takes per poll
    #[arg(long, default_value_t = 10)]
    batch_size: usize,

    /// Number of channels, starting at channel 1
    #[arg(long)]
    channels: Option<u32>,

    /// Seed for the simulated device
    #[arg(long)]
    seed: Option<u64>,

    /// Configuration file path
    #[arg(short = 'c', long, env = "READ_UNTIL_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print verbose messaging
    #[arg(long)]
    verbose: bool,

    /// Print all debugging information
    #[arg(long)]
    debug: bool,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

impl Args {
    fn log_level(&self) -> &'static str {
        if self.debug {
            "debug"
        } else if self.verbose {
            "info"
        } else {
            "warn"
        }
    }

    fn overrides(&self) -> Result<ConfigOverrides> {
        let mut overrides = ConfigOverrides::new()
            .with_min_chunk_size(self.min_chunk_size)
            .with_one_chunk(self.one_chunk);
        if let Some(channels) = self.channels {
            overrides = overrides.with_channels(1, channels);
        }
        if let Some(seconds) = self.unblock_duration {
            let duration = Duration::try_from_secs_f64(seconds)
                .with_context(|| format!("Invalid unblock duration: {seconds}"))?;
            overrides = overrides.with_unblock_duration(duration);
        }
        Ok(overrides)
    }
}

/// End-of-run summary
#[derive(Debug, Serialize)]
struct Summary {
    run_time_secs: u64,
    cache: CacheStats,
    cached_at_exit: usize,
    actions: BTreeMap<ActionKind, BTreeMap<ActionOutcome, u64>>,
    last_error: Option<String>,
    samples_acquired: u64,
    workers: Vec<Option<WorkerReport>>,
}

fn init_tracing(args: &Args) -> Result<()> {
    let level = args.log_level();
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!(
            "read_until_core={level},read_until_sim={level}"
        ))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args)?;

    let config_path = args.config.clone().or_else(default_config_path);
    let mut config = load_config_from_path(config_path).context("Failed to load configuration")?;
    args.overrides()?.apply(&mut config);
    info!(source = %config.source(), "Configuration loaded");

    let (transport, device) = InProcessTransport::new_pair();
    let client = Arc::new(
        ReadUntilClient::new(Arc::new(transport), config.clone())
            .context("Failed to create client")?,
    );
    let data_type = client.signal_data_type().await?;

    let rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let generator = ReadGenerator::new(
        GeneratorSettings {
            first_channel: config.session.first_channel,
            last_channel: config.session.last_channel,
            raw_data_type: config.session.raw_data_type,
            ..GeneratorSettings::default()
        },
        rng,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let device_task = tokio::spawn(device::run(device.clone(), generator, shutdown_rx));

    warn!(
        "Initialising simple analysis. This will likely not achieve anything useful. \
         Enable --verbose or --debug logging to see more."
    );
    client.run().context("Failed to start client")?;

    info!(workers = args.workers, "Creating workers");
    let settings = WorkerSettings {
        batch_size: args.batch_size,
        delay: Duration::from_secs(args.analysis_delay),
        throttle: Duration::from_millis(100),
        unblock_duration: config.unblock_duration,
        data_type,
    };
    let workers: Vec<_> = (0..args.workers)
        .map(|index| tokio::spawn(analysis::worker(index, Arc::clone(&client), settings.clone())))
        .collect();

    tokio::select! {
        () = tokio::time::sleep(Duration::from_secs(args.run_time)) => {
            info!("Sending reset");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            info!("Caught ctrl-c, terminating workflow");
        }
    }
    if !client.reset().await {
        warn!("Client did not stop cleanly");
    }

    let mut reports = Vec::with_capacity(workers.len());
    for handle in workers {
        match tokio::time::timeout(WORKER_JOIN_TIMEOUT, handle).await {
            Ok(Ok(report)) => {
                info!(worker = report.worker, "Worker exited successfully");
                reports.push(Some(report));
            }
            Ok(Err(error)) => {
                warn!(error = %error, "Worker failed");
                reports.push(None);
            }
            Err(_) => {
                warn!("Worker function did not exit successfully");
                reports.push(None);
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(error) = device_task.await {
        warn!(error = %error, "Simulated device task failed");
    }

    let summary = Summary {
        run_time_secs: args.run_time,
        cache: client.cache_stats(),
        cached_at_exit: client.queue_length(),
        actions: client.action_summary(),
        last_error: client.last_error().map(|error| error.to_string()),
        samples_acquired: device.progress().acquired,
        workers: reports,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "missed reads: {}, replaced chunks: {}, still cached: {}",
            summary.cache.missed, summary.cache.replaced, summary.cached_at_exit
        );
        for (kind, outcomes) in &summary.actions {
            for (outcome, count) in outcomes {
                println!("{kind} {outcome:?}: {count}");
            }
        }
        if let Some(error) = &summary.last_error {
            println!("session error: {error}");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["read-until-sim"]);
        assert_eq!(args.workers, 1);
        assert_eq!(args.run_time, 30);
        assert_eq!(args.min_chunk_size, 2000);
        assert_eq!(args.log_level(), "warn");
        assert!(!args.one_chunk);
    }

    #[test]
    fn test_args_to_overrides() {
        let args = Args::parse_from([
            "read-until-sim",
            "--channels",
            "16",
            "--one-chunk",
            "--unblock-duration",
            "0.25",
            "--debug",
        ]);
        assert_eq!(args.log_level(), "debug");

        let overrides = args.overrides().unwrap();
        assert_eq!(overrides.channels, Some((1, 16)));
        assert_eq!(overrides.one_chunk, Some(true));
        assert_eq!(overrides.unblock_duration, Some(Duration::from_millis(250)));
        assert_eq!(overrides.min_chunk_size, Some(2000));
    }

    #[test]
    fn test_negative_unblock_duration_rejected() {
        let args = Args::parse_from(["read-until-sim", "--unblock-duration=-1"]);
        assert!(args.overrides().is_err());
    }

    #[test]
    fn test_summary_serializes_action_kinds() {
        let summary = Summary {
            run_time_secs: 1,
            cache: CacheStats::default(),
            cached_at_exit: 0,
            actions: BTreeMap::from([(
                ActionKind::Unblock,
                BTreeMap::from([(ActionOutcome::Success, 2)]),
            )]),
            last_error: None,
            samples_acquired: 0,
            workers: vec![None],
        };
        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["actions"]["unblock"]["success"], 2);
    }
}
