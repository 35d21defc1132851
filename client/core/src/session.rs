//! Streaming Session
//!
//! One [`Session`] exists per `run()`. It owns everything the stream driver
//! and the application share for that run: the read cache, the outbound
//! action queue, the ledger of sent actions, the running flag and the handle
//! that cancels the live-reads stream. A new `run()` builds a new session, so
//! nothing leaks between runs and concurrent clients never share state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;
use uuid::Uuid;

use crate::action_queue::{ActionId, ActionKind, ActionQueue, PendingAction};
use crate::cache::{CacheError, ReadCache, SameReadPolicy};
use crate::messages::{ActionOutcome, ActionResponse, RawDataType};
use crate::transport::CancelHandle;

/// Default first channel of the streamed range
pub const DEFAULT_FIRST_CHANNEL: u32 = 1;

/// Default last channel of the streamed range
pub const DEFAULT_LAST_CHANNEL: u32 = 512;

/// Default maximum actions per outbound message
pub const DEFAULT_ACTION_BATCH: usize = 1000;

/// Default pause between send-path polls
pub const DEFAULT_ACTION_THROTTLE: Duration = Duration::from_millis(1);

// =============================================================================
// Session Options
// =============================================================================

/// Per-run streaming parameters
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Lowest channel to receive data for
    pub first_channel: u32,
    /// Highest channel (inclusive) to receive data for
    pub last_channel: u32,
    /// Requested minimum chunk size, clamped before it is sent
    pub min_chunk_size: u64,
    /// Maximum actions per outbound message
    pub action_batch: usize,
    /// Pause between send-path polls
    pub action_throttle: Duration,
    /// Calibrated or raw signal
    pub raw_data_type: RawDataType,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            first_channel: DEFAULT_FIRST_CHANNEL,
            last_channel: DEFAULT_LAST_CHANNEL,
            min_chunk_size: 0,
            action_batch: DEFAULT_ACTION_BATCH,
            action_throttle: DEFAULT_ACTION_THROTTLE,
            raw_data_type: RawDataType::Calibrated,
        }
    }
}

impl SessionOptions {
    /// Restrict the stream to `first..=last`
    #[must_use]
    pub fn with_channels(mut self, first: u32, last: u32) -> Self {
        self.first_channel = first;
        self.last_channel = last;
        self
    }

    /// Set the requested minimum chunk size
    #[must_use]
    pub fn with_min_chunk_size(mut self, samples: u64) -> Self {
        self.min_chunk_size = samples;
        self
    }

    /// Set the maximum actions per outbound message
    #[must_use]
    pub fn with_action_batch(mut self, action_batch: usize) -> Self {
        self.action_batch = action_batch;
        self
    }

    /// Set the signal kind to stream
    #[must_use]
    pub fn with_raw_data_type(mut self, raw_data_type: RawDataType) -> Self {
        self.raw_data_type = raw_data_type;
        self
    }

    /// Number of channels in the range
    #[must_use]
    pub fn channel_count(&self) -> usize {
        if self.last_channel < self.first_channel {
            return 0;
        }
        (self.last_channel - self.first_channel) as usize + 1
    }

    /// Check the options describe a usable stream
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.first_channel == 0 {
            return Err("first_channel must be at least 1".to_string());
        }
        if self.last_channel < self.first_channel {
            return Err(format!(
                "channel range {}..={} is empty",
                self.first_channel, self.last_channel
            ));
        }
        if self.action_batch == 0 {
            return Err("action_batch must be at least 1".to_string());
        }
        Ok(())
    }
}

// =============================================================================
// Lifecycle
// =============================================================================

/// Lifecycle state of the stream driver
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DriverState {
    /// No stream open
    #[default]
    Idle,
    /// Stream being opened, setup not yet sent
    Starting,
    /// Steady state: send and receive paths active
    Running,
    /// Running flag cleared, paths winding down
    Stopping,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Why a session ended abnormally
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The transport failed to open or carry the stream
    #[error("transport failure: {0}")]
    Transport(String),
    /// The device sent something the client cannot make sense of
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    /// The driver stopped without finishing (panic or forced abort)
    #[error("session aborted")]
    Aborted,
}

// =============================================================================
// Session
// =============================================================================

/// State owned by one streaming run
#[derive(Debug)]
pub struct Session {
    id: Uuid,
    options: SessionOptions,
    cache: ReadCache,
    queue: ActionQueue,
    sent_actions: DashMap<ActionId, ActionKind>,
    action_outcomes: Mutex<BTreeMap<ActionKind, BTreeMap<ActionOutcome, u64>>>,
    running: AtomicBool,
    state: Mutex<DriverState>,
    canceller: Mutex<Option<CancelHandle>>,
    last_error: Mutex<Option<SessionError>>,
}

impl Session {
    /// Build a session with a fresh cache and queue
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidConfiguration`] if `cache_size` is zero.
    pub fn new(
        options: SessionOptions,
        cache_size: usize,
        policy: SameReadPolicy,
    ) -> Result<Self, CacheError> {
        Ok(Self {
            id: Uuid::new_v4(),
            options,
            cache: ReadCache::new(cache_size, policy)?,
            queue: ActionQueue::new(),
            sent_actions: DashMap::new(),
            action_outcomes: Mutex::new(BTreeMap::new()),
            running: AtomicBool::new(false),
            state: Mutex::new(DriverState::Idle),
            canceller: Mutex::new(None),
            last_error: Mutex::new(None),
        })
    }

    /// Session identifier, used in log lines
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Options this session was started with
    #[must_use]
    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Chunks received for this session
    #[must_use]
    pub fn cache(&self) -> &ReadCache {
        &self.cache
    }

    /// Actions waiting to be sent
    #[must_use]
    pub fn queue(&self) -> &ActionQueue {
        &self.queue
    }

    /// Flag polled by the send path
    #[must_use]
    pub fn running_flag(&self) -> &AtomicBool {
        &self.running
    }

    /// Whether the session is live
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> DriverState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, next: DriverState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::debug!(session = %self.id, from = %*state, to = %next, "Driver state change");
            *state = next;
        }
    }

    /// Move `from` to `to`, leaving any other state untouched
    pub(crate) fn transition(&self, from: DriverState, to: DriverState) -> bool {
        let mut state = self.state.lock();
        if *state != from {
            return false;
        }
        tracing::debug!(session = %self.id, from = %from, to = %to, "Driver state change");
        *state = to;
        true
    }

    /// Mark the session live, `Idle` to `Starting`
    pub(crate) fn begin(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.set_state(DriverState::Starting);
    }

    /// Clear the running flag and cancel the stream
    ///
    /// Safe to call any number of times from any thread.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst)
            && !self.transition(DriverState::Running, DriverState::Stopping)
        {
            self.transition(DriverState::Starting, DriverState::Stopping);
        }
        if let Some(canceller) = self.canceller.lock().as_ref() {
            canceller.cancel();
        }
    }

    /// Remember how to cancel the open stream
    ///
    /// Cancels straight away if the session was stopped before the stream
    /// finished opening.
    pub(crate) fn attach_canceller(&self, canceller: CancelHandle) {
        let mut slot = self.canceller.lock();
        if !self.is_running() {
            canceller.cancel();
        }
        *slot = Some(canceller);
    }

    /// Queue an action and record it in the sent-action ledger
    pub fn enqueue_action(&self, action: PendingAction) -> ActionId {
        let action_id = action.action_id.clone();
        self.sent_actions.insert(action_id.clone(), action.kind);
        tracing::trace!(
            session = %self.id,
            action = %action.kind,
            channel = action.channel_id,
            read_number = action.read_number,
            "Action queued"
        );
        self.queue.enqueue(action);
        action_id
    }

    /// Match an acknowledgement against the ledger
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::ProtocolViolation`] for an action id this
    /// session never sent (or already saw acknowledged).
    pub fn acknowledge(
        &self,
        response: &ActionResponse,
    ) -> Result<(ActionKind, ActionOutcome), SessionError> {
        let Some((_, kind)) = self.sent_actions.remove(&response.action_id) else {
            return Err(SessionError::ProtocolViolation(format!(
                "response for unknown action {}",
                response.action_id
            )));
        };
        *self
            .action_outcomes
            .lock()
            .entry(kind)
            .or_default()
            .entry(response.outcome)
            .or_default() += 1;
        Ok((kind, response.outcome))
    }

    /// Actions sent but not yet acknowledged
    #[must_use]
    pub fn unacknowledged_actions(&self) -> usize {
        self.sent_actions.len()
    }

    /// Acknowledgement counts by action kind and outcome
    #[must_use]
    pub fn action_summary(&self) -> BTreeMap<ActionKind, BTreeMap<ActionOutcome, u64>> {
        self.action_outcomes.lock().clone()
    }

    /// Keep the first error that ended the session
    pub(crate) fn record_error(&self, error: SessionError) {
        let mut slot = self.last_error.lock();
        if slot.is_none() {
            *slot = Some(error);
        }
    }

    /// Error that ended the session, if any
    #[must_use]
    pub fn last_error(&self) -> Option<SessionError> {
        self.last_error.lock().clone()
    }
}
