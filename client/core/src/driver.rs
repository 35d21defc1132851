//! Stream Driver
//!
//! Runs one live-reads session from stream open to teardown.
//!
//! # Architecture
//!
//! ```text
//!   ActionQueue ──drain──▶ pump_actions ──▶ mpsc ──▶ transport ──▶ device
//!                              ▲ running flag
//!   ReadCache ◀──put── ReadProcessor ◀── LiveReadsStream ◀── device
//! ```
//!
//! - **Send path** ([`pump_actions`]): sends the stream setup, then polls the
//!   action queue without blocking, batching whatever is pending, pausing for
//!   the throttle between polls until the running flag clears.
//! - **Receive path** ([`ReadProcessor`]): records acknowledgements, applies
//!   the one-chunk policy and the classification prefilter, and caches
//!   accepted chunks. Malformed entries are logged and skipped.
//!
//! Both paths run concurrently inside [`drive`]; when either ends the
//! session is stopped and the stream cancelled.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::action_queue::{ActionKind, PendingAction};
use crate::messages::{
    AcquisitionProgress, ActionOutcome, LiveReadsRequest, LiveReadsResponse, StreamSetup,
    MAX_MIN_CHUNK_SIZE,
};
use crate::session::{DriverState, Session, SessionError, SessionOptions};
use crate::transport::{ReadUntilTransport, TransportError};

/// Outbound messages buffered between the send path and the transport
const OUTBOUND_CAPACITY: usize = 16;

/// Minimum time between interval reports
pub const REPORT_INTERVAL: Duration = Duration::from_secs(1);

/// Stopped read ids remembered per channel
pub const STOPPED_READS_PER_CHANNEL: usize = 8;

/// Build the setup message, clamping the minimum chunk size
#[must_use]
pub fn stream_setup(options: &SessionOptions) -> StreamSetup {
    let mut min_chunk_size = options.min_chunk_size;
    if min_chunk_size > MAX_MIN_CHUNK_SIZE {
        tracing::warn!(
            requested = min_chunk_size,
            allowed = MAX_MIN_CHUNK_SIZE,
            "Reducing min_chunk_size"
        );
        min_chunk_size = MAX_MIN_CHUNK_SIZE;
    }
    StreamSetup {
        first_channel: options.first_channel,
        last_channel: options.last_channel,
        raw_data_type: options.raw_data_type,
        sample_minimum_chunk_size: min_chunk_size,
    }
}

// =============================================================================
// Send Path
// =============================================================================

/// Feed the outbound side of the stream
///
/// Sends `setup` first, then repeatedly asks `next_batch` for pending
/// actions and sends any non-empty batch as one message, pausing for
/// `throttle` between polls. Returns the number of actions sent once
/// `running` clears.
///
/// # Errors
///
/// Returns [`TransportError::SendFailed`] if the transport stops accepting
/// messages.
pub async fn pump_actions<F>(
    setup: StreamSetup,
    mut next_batch: F,
    running: &AtomicBool,
    outbound: mpsc::Sender<LiveReadsRequest>,
    throttle: Duration,
) -> Result<usize, TransportError>
where
    F: FnMut() -> Vec<PendingAction>,
{
    tracing::info!(
        first_channel = setup.first_channel,
        last_channel = setup.last_channel,
        min_chunk_size = setup.sample_minimum_chunk_size,
        "Sending stream setup"
    );
    outbound
        .send(LiveReadsRequest::Setup(setup))
        .await
        .map_err(|_| TransportError::SendFailed("setup not accepted".to_string()))?;

    let mut ticker = tokio::time::interval(throttle.max(Duration::from_micros(100)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sent = 0;
    while running.load(Ordering::SeqCst) {
        let batch = next_batch();
        if !batch.is_empty() {
            let count = batch.len();
            tracing::debug!(count, "Sending actions");
            outbound
                .send(LiveReadsRequest::Actions(batch))
                .await
                .map_err(|_| TransportError::SendFailed(format!("{count} actions dropped")))?;
            sent += count;
        }
        ticker.tick().await;
    }
    Ok(sent)
}

// =============================================================================
// Receive Path
// =============================================================================

/// Receive-path filtering switches
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessorSettings {
    /// Stop every read after its first chunk
    pub one_chunk: bool,
    /// Classification codes a chunk needs one of to be cached; `None` caches all
    pub prefilter: Option<BTreeSet<i32>>,
}

/// What one inbound message did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    /// Chunks written to the cache
    pub cached: usize,
    /// Chunks dropped by the prefilter
    pub filtered: usize,
    /// Chunks dropped because their read was already stopped
    pub duplicates: usize,
    /// Stop actions queued by the one-chunk policy
    pub stops_queued: usize,
    /// Acknowledgements matched against the ledger
    pub acknowledged: usize,
    /// Entries skipped as malformed
    pub violations: Vec<SessionError>,
}

/// Periodic receive-path statistics
#[derive(Clone, Debug, PartialEq)]
pub struct IntervalReport {
    /// Chunks received during the interval
    pub sections: u64,
    /// Distinct reads seen since the session started
    pub unique_reads: u64,
    /// Mean samples between a chunk's start and acquisition, if known
    ///
    /// Acquisition progress is sampled once, when the report is taken, and
    /// compared against every chunk of the interval. Chunks from early in
    /// the interval therefore look further behind than they were on arrival.
    pub mean_samples_behind: Option<u64>,
    /// Raw payload received during the interval, in MB
    pub megabytes: f64,
    /// Interval length
    pub elapsed: Duration,
    /// Cached channels at report time
    pub cache_len: usize,
    /// Reads lost from the cache so far
    pub missed_reads: u64,
    /// Chunks superseded in the cache so far
    pub replaced_chunks: u64,
    /// Acknowledgement counts so far
    pub actions: BTreeMap<ActionKind, BTreeMap<ActionOutcome, u64>>,
}

/// Applies receive-path policy to inbound messages
///
/// Read ids are tracked per channel. Chunks of a stopped read can still
/// arrive after the channel has moved on to a newer read, so each channel
/// remembers its last [`STOPPED_READS_PER_CHANNEL`] stopped ids and memory
/// stays bounded by the channel count.
#[derive(Debug)]
pub struct ReadProcessor {
    session: Arc<Session>,
    settings: ProcessorSettings,
    latest_read: HashMap<u32, String>,
    stopped_reads: HashMap<u32, VecDeque<String>>,
    unique_reads: u64,
    interval_sections: u64,
    interval_bytes: u64,
    interval_start_offsets: u64,
    interval_started: Instant,
}

impl ReadProcessor {
    /// Create a processor writing into `session`
    #[must_use]
    pub fn new(session: Arc<Session>, settings: ProcessorSettings) -> Self {
        Self {
            session,
            settings,
            latest_read: HashMap::new(),
            stopped_reads: HashMap::new(),
            unique_reads: 0,
            interval_sections: 0,
            interval_bytes: 0,
            interval_start_offsets: 0,
            interval_started: Instant::now(),
        }
    }

    /// Session this processor writes into
    #[must_use]
    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Distinct reads seen so far
    #[must_use]
    pub fn unique_reads(&self) -> u64 {
        self.unique_reads
    }

    /// Handle one inbound message
    pub fn process(&mut self, response: LiveReadsResponse) -> BatchSummary {
        let mut summary = BatchSummary::default();

        for action_response in &response.action_responses {
            match self.session.acknowledge(action_response) {
                Ok((kind, outcome)) => {
                    tracing::trace!(action = %kind, ?outcome, "Action acknowledged");
                    summary.acknowledged += 1;
                }
                Err(violation) => {
                    tracing::warn!(error = %violation, "Skipping action response");
                    summary.violations.push(violation);
                }
            }
        }

        for (channel, chunk) in response.channels {
            if chunk.channel_id != channel {
                let violation = SessionError::ProtocolViolation(format!(
                    "chunk for channel {} delivered under channel {channel}",
                    chunk.channel_id
                ));
                tracing::warn!(error = %violation, "Skipping chunk");
                summary.violations.push(violation);
                continue;
            }

            self.interval_sections += 1;
            self.interval_bytes += chunk.raw_payload.len() as u64;
            self.interval_start_offsets = self
                .interval_start_offsets
                .saturating_add(chunk.start_offset);
            if self.latest_read.get(&channel) != Some(&chunk.read_id) {
                self.unique_reads += 1;
                self.latest_read.insert(channel, chunk.read_id.clone());
            }

            if self.settings.one_chunk {
                if self.is_stopped(channel, &chunk.read_id) {
                    tracing::debug!(channel, read_id = %chunk.read_id, "Rereceived read after stop");
                    summary.duplicates += 1;
                    continue;
                }
                self.session
                    .enqueue_action(PendingAction::stop_further_data(channel, chunk.read_number));
                self.remember_stopped(channel, chunk.read_id.clone());
                summary.stops_queued += 1;
            }

            if let Some(classes) = &self.settings.prefilter {
                if !chunk.has_class_in(classes) {
                    summary.filtered += 1;
                    continue;
                }
            }

            self.session.cache().put(channel, chunk);
            summary.cached += 1;
        }

        summary
    }

    fn is_stopped(&self, channel: u32, read_id: &str) -> bool {
        self.stopped_reads
            .get(&channel)
            .is_some_and(|ids| ids.iter().any(|id| id == read_id))
    }

    fn remember_stopped(&mut self, channel: u32, read_id: String) {
        let ids = self.stopped_reads.entry(channel).or_default();
        if ids.len() == STOPPED_READS_PER_CHANNEL {
            ids.pop_front();
        }
        ids.push_back(read_id);
    }

    /// Whether an interval report is due at `now`
    #[must_use]
    pub fn report_due(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.interval_started) >= REPORT_INTERVAL
    }

    /// Close the current interval and start a new one
    pub fn take_report(
        &mut self,
        progress: Option<AcquisitionProgress>,
        now: Instant,
    ) -> IntervalReport {
        let sections = self.interval_sections;
        let mean_samples_behind = progress.filter(|_| sections > 0).map(|progress| {
            progress
                .acquired
                .saturating_mul(sections)
                .saturating_sub(self.interval_start_offsets)
                / sections
        });
        #[allow(clippy::cast_precision_loss)]
        let megabytes = self.interval_bytes as f64 / 1_000_000.0;
        let cache = self.session.cache();
        let report = IntervalReport {
            sections,
            unique_reads: self.unique_reads,
            mean_samples_behind,
            megabytes,
            elapsed: now.saturating_duration_since(self.interval_started),
            cache_len: cache.len(),
            missed_reads: cache.missed(),
            replaced_chunks: cache.replaced(),
            actions: self.session.action_summary(),
        };

        self.interval_sections = 0;
        self.interval_bytes = 0;
        self.interval_start_offsets = 0;
        self.interval_started = now;
        report
    }
}

// =============================================================================
// Session Driver
// =============================================================================

/// Stops the session however [`drive`] exits
///
/// An exit without [`DriveGuard::finish`] (panic, or the task being
/// aborted) is recorded as [`SessionError::Aborted`].
struct DriveGuard<'a> {
    session: &'a Session,
    finished: bool,
}

impl<'a> DriveGuard<'a> {
    fn new(session: &'a Session) -> Self {
        Self {
            session,
            finished: false,
        }
    }

    fn finish(&mut self) {
        self.finished = true;
    }
}

impl Drop for DriveGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(session = %self.session.id(), "Session driver aborted");
            self.session.record_error(SessionError::Aborted);
        }
        self.session.stop();
        if !self.session.transition(DriverState::Stopping, DriverState::Idle) {
            self.session.transition(DriverState::Starting, DriverState::Idle);
        }
    }
}

fn log_report(report: &IntervalReport) {
    tracing::info!(
        sections = report.sections,
        unique_reads = report.unique_reads,
        samples_behind = ?report.mean_samples_behind,
        megabytes = report.megabytes,
        elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
        cache_len = report.cache_len,
        missed_reads = report.missed_reads,
        replaced_chunks = report.replaced_chunks,
        actions = ?report.actions,
        "Interval update"
    );
}

/// Run one session to completion
///
/// Opens the live-reads stream, runs the send and receive paths until the
/// session is stopped, the device ends the stream or the transport fails,
/// then leaves the session stopped and `Idle`. Failures are logged and kept
/// as the session's last error.
pub async fn drive(
    session: Arc<Session>,
    transport: Arc<dyn ReadUntilTransport>,
    mut processor: ReadProcessor,
) {
    let mut guard = DriveGuard::new(&session);
    let options = session.options().clone();

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let mut stream = match transport.open_live_reads(outbound_rx).await {
        Ok(stream) => stream,
        Err(error) => {
            tracing::error!(error = %error, "Failed to open live reads stream");
            session.record_error(SessionError::Transport(error.to_string()));
            guard.finish();
            return;
        }
    };
    session.attach_canceller(stream.cancel_handle());
    let mut cancelled = stream.cancel_handle().signal();
    session.transition(DriverState::Starting, DriverState::Running);

    let send = async {
        let result = pump_actions(
            stream_setup(&options),
            || session.queue().drain_nonblocking(options.action_batch),
            session.running_flag(),
            outbound_tx,
            options.action_throttle,
        )
        .await;
        match &result {
            Ok(count) => tracing::debug!(actions = count, "Send path finished"),
            Err(error) if session.is_running() => {
                tracing::error!(error = %error, "Send path failed");
                session.record_error(SessionError::Transport(error.to_string()));
                session.stop();
            }
            Err(error) => tracing::debug!(error = %error, "Send path closed during shutdown"),
        }
    };

    let receive = async {
        loop {
            let message = tokio::select! {
                () = cancelled.cancelled() => break,
                message = stream.next() => message,
            };
            match message {
                None => {
                    tracing::info!("Live reads stream ended");
                    break;
                }
                Some(Err(error)) => {
                    tracing::error!(error = %error, "Live reads stream failed");
                    session.record_error(SessionError::Transport(error.to_string()));
                    break;
                }
                Some(Ok(response)) => {
                    processor.process(response);
                    let now = Instant::now();
                    if processor.report_due(now) {
                        let progress = match transport.acquisition_progress().await {
                            Ok(progress) => Some(progress),
                            Err(error) => {
                                tracing::debug!(error = %error, "Acquisition progress unavailable");
                                None
                            }
                        };
                        log_report(&processor.take_report(progress, now));
                    }
                }
            }
        }
        session.stop();
    };

    tokio::join!(send, receive);
    guard.finish();
    tracing::info!(
        missed_reads = session.cache().missed(),
        replaced_chunks = session.cache().replaced(),
        "Live reads session finished"
    );
}
