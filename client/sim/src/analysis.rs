//! Example Analysis Workers
//!
//! Each worker polls the client for the newest chunks, decodes their signal
//! and decides per read: reads whose level dropped well below the previous
//! read's are kept (no more data needed), everything else is unblocked.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use read_until_core::{ClientError, ReadChunk, ReadUntilClient, SignalDataType};

/// Drop in median level (pA) that marks a read worth keeping
const KEEP_THRESHOLD: f32 = 60.0;

/// Worker tuning
#[derive(Clone, Debug)]
pub struct WorkerSettings {
    /// Chunks taken per poll
    pub batch_size: usize,
    /// Wait before the first poll
    pub delay: Duration,
    /// Minimum time between polls
    pub throttle: Duration,
    /// How long to unblock rejected reads
    pub unblock_duration: Duration,
    /// Encoding of the streamed signal
    pub data_type: SignalDataType,
}

/// What to do with a read
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    /// Keep sequencing, stop sending data
    Keep,
    /// Eject the read
    Reject,
}

/// Decide on a read from its median levels
pub fn decide(chunk: &ReadChunk) -> Decision {
    if chunk.median_before > chunk.median && chunk.median_before - chunk.median > KEEP_THRESHOLD {
        Decision::Keep
    } else {
        Decision::Reject
    }
}

/// Counters one worker reports when it exits
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    /// Worker index
    pub worker: usize,
    /// Chunks taken from the client
    pub chunks: u64,
    /// Samples decoded
    pub samples: u64,
    /// Payloads that failed to decode
    pub decode_errors: u64,
    /// Reads kept
    pub kept: u64,
    /// Reads unblocked
    pub unblocked: u64,
}

/// Poll `client` until it stops running
pub async fn worker(
    worker: usize,
    client: Arc<ReadUntilClient>,
    settings: WorkerSettings,
) -> WorkerReport {
    let mut report = WorkerReport {
        worker,
        ..WorkerReport::default()
    };
    info!(worker, delay_ms = u64::try_from(settings.delay.as_millis()).unwrap_or(u64::MAX), "Starting analysis");
    tokio::time::sleep(settings.delay).await;

    while client.is_running() {
        let started = Instant::now();
        for (channel, mut chunk) in client.get_read_chunks(settings.batch_size, true) {
            report.chunks += 1;
            match settings.data_type.decode(&chunk.raw_payload) {
                Ok(samples) => report.samples += samples.len() as u64,
                Err(error) => {
                    debug!(worker, channel, error = %error, "Undecodable payload");
                    report.decode_errors += 1;
                }
            }
            chunk.clear_payload();

            let result = match decide(&chunk) {
                Decision::Keep => client
                    .stop_receiving_read(channel, chunk.read_number)
                    .map(|_| report.kept += 1),
                Decision::Reject => client
                    .unblock_read(channel, chunk.read_number, settings.unblock_duration)
                    .map(|_| report.unblocked += 1),
            };
            match result {
                Ok(()) => {}
                Err(ClientError::NotRunning) => break,
                Err(error) => warn!(worker, error = %error, "Action not queued"),
            }
        }
        tokio::time::sleep_until(started + settings.throttle).await;
    }

    info!(worker, chunks = report.chunks, "Finished analysis of reads as client stopped");
    report
}
