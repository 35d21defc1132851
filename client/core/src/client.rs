//! Read Until Client
//!
//! [`ReadUntilClient`] is the single entry point applications use: start a
//! session with [`run`](ReadUntilClient::run), poll cached chunks with
//! [`get_read_chunks`](ReadUntilClient::get_read_chunks), send decisions with
//! [`stop_receiving_read`](ReadUntilClient::stop_receiving_read) and
//! [`unblock_read`](ReadUntilClient::unblock_read), and end the session with
//! [`reset`](ReadUntilClient::reset).
//!
//! None of the application-facing calls block: `get_read_chunks` returns an
//! empty batch when nothing is cached and the action calls only enqueue.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::action_queue::{ActionId, ActionKind, PendingAction};
use crate::cache::{CacheError, CacheStats};
use crate::chunk::{ClassificationMap, ReadChunk, SignalDataType};
use crate::config::{ClientConfig, ConfigError};
use crate::driver::{self, ProcessorSettings, ReadProcessor};
use crate::messages::{AcquisitionProgress, ActionOutcome, RawDataType};
use crate::session::{DriverState, Session, SessionError, SessionOptions};
use crate::transport::{ReadUntilTransport, TransportError};

/// Errors returned by [`ReadUntilClient`]
#[derive(Debug, Error)]
pub enum ClientError {
    /// Configuration or session options are unusable
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    /// `run()` called while a session is active
    #[error("a session is already running")]
    AlreadyRunning,
    /// An action was requested with no session running
    #[error("no session is running")]
    NotRunning,
    /// `run()` called outside a tokio runtime
    #[error("no tokio runtime available to drive the session")]
    NoRuntime,
    /// Cache construction failed
    #[error(transparent)]
    Cache(#[from] CacheError),
    /// A side-channel query failed
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl From<ConfigError> for ClientError {
    fn from(error: ConfigError) -> Self {
        match error {
            ConfigError::ValidationError(reason) => Self::InvalidConfiguration(reason),
            other => Self::InvalidConfiguration(other.to_string()),
        }
    }
}

/// Join names as "a", "a and b", "a, b and c"
fn join_names<'a>(names: impl IntoIterator<Item = &'a str>) -> String {
    let names: Vec<&str> = names.into_iter().collect();
    match names.split_last() {
        None => String::new(),
        Some((last, [])) => (*last).to_string(),
        Some((last, rest)) => format!("{} and {last}", rest.join(", ")),
    }
}

/// Client for the Read Until live-reads API
pub struct ReadUntilClient {
    transport: Arc<dyn ReadUntilTransport>,
    config: ClientConfig,
    prefilter: Option<BTreeSet<i32>>,
    session: Mutex<Option<Arc<Session>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for ReadUntilClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadUntilClient")
            .field("config", &self.config)
            .field("prefilter", &self.prefilter)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl ReadUntilClient {
    /// Create a client using the predefined classification map
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfiguration`] if `config` fails
    /// validation.
    pub fn new(
        transport: Arc<dyn ReadUntilTransport>,
        config: ClientConfig,
    ) -> Result<Self, ClientError> {
        tracing::warn!("Using pre-defined classification map");
        Self::with_classification_map(transport, config, &ClassificationMap::default())
    }

    /// Create a client resolving prefilter classes through `classes`
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::InvalidConfiguration`] if `config` fails
    /// validation against `classes`.
    pub fn with_classification_map(
        transport: Arc<dyn ReadUntilTransport>,
        config: ClientConfig,
        classes: &ClassificationMap,
    ) -> Result<Self, ClientError> {
        config.validate_with(classes)?;

        let prefilter = config
            .filter_strands
            .then(|| config.prefilter_codes(classes));
        let filter = if config.filter_strands {
            join_names(config.prefilter_classes.iter().map(String::as_str))
        } else {
            "none".to_string()
        };
        tracing::info!(
            cache = config.same_read_policy.cache_name(),
            size = config.cache_size,
            filter = %filter,
            one_chunk = config.one_chunk,
            "Client created"
        );

        Ok(Self {
            transport,
            config,
            prefilter,
            session: Mutex::new(None),
            task: Mutex::new(None),
        })
    }

    /// Configuration in use
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.session.lock().clone()
    }

    fn running_session(&self) -> Result<Arc<Session>, ClientError> {
        self.current()
            .filter(|session| session.is_running())
            .ok_or(ClientError::NotRunning)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Start a session with the configured default options
    ///
    /// # Errors
    ///
    /// See [`ReadUntilClient::run_with`].
    pub fn run(&self) -> Result<(), ClientError> {
        self.run_with(self.config.session.clone())
    }

    /// Start a session in the background and return immediately
    ///
    /// Builds a fresh cache and action queue, then spawns the stream driver
    /// on the current tokio runtime.
    ///
    /// # Errors
    ///
    /// - [`ClientError::AlreadyRunning`] if a session is still active
    /// - [`ClientError::InvalidConfiguration`] for unusable options
    /// - [`ClientError::NoRuntime`] outside a tokio runtime
    pub fn run_with(&self, options: SessionOptions) -> Result<(), ClientError> {
        options
            .validate()
            .map_err(ClientError::InvalidConfiguration)?;
        let runtime = Handle::try_current().map_err(|_| ClientError::NoRuntime)?;

        let mut slot = self.session.lock();
        let mut task = self.task.lock();
        let busy = slot.as_ref().is_some_and(|session| session.is_running())
            || task.as_ref().is_some_and(|handle| !handle.is_finished());
        if busy {
            return Err(ClientError::AlreadyRunning);
        }

        let session = Arc::new(Session::new(
            options,
            self.config.cache_size,
            self.config.same_read_policy,
        )?);
        let processor = ReadProcessor::new(
            Arc::clone(&session),
            ProcessorSettings {
                one_chunk: self.config.one_chunk,
                prefilter: self.prefilter.clone(),
            },
        );
        session.begin();
        tracing::info!(
            session = %session.id(),
            first_channel = session.options().first_channel,
            last_channel = session.options().last_channel,
            "Starting session"
        );

        let span = tracing::info_span!("session", id = %session.id());
        let handle = runtime.spawn(
            driver::drive(Arc::clone(&session), Arc::clone(&self.transport), processor)
                .instrument(span),
        );
        *slot = Some(session);
        *task = Some(handle);
        Ok(())
    }

    /// Stop the session, waiting up to the configured reset timeout
    ///
    /// Returns `false` if the session did not wind down in time.
    pub async fn reset(&self) -> bool {
        self.reset_with_timeout(self.config.reset_timeout).await
    }

    /// Stop the session, waiting up to `timeout` for it to wind down
    ///
    /// A no-op returning `true` when nothing is running. On timeout the
    /// driver task is aborted, a warning is logged and `false` is returned.
    /// Cached chunks and statistics stay readable until the next `run()`.
    pub async fn reset_with_timeout(&self, timeout: Duration) -> bool {
        if let Some(session) = self.current() {
            session.stop();
        }
        let Some(mut handle) = self.task.lock().take() else {
            return true;
        };

        match tokio::time::timeout(timeout, &mut handle).await {
            Ok(Ok(())) => {
                tracing::info!("Reset complete");
                true
            }
            Ok(Err(error)) => {
                tracing::warn!(error = %error, "Session task ended abnormally");
                true
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    "Session did not stop in time, abandoning it"
                );
                handle.abort();
                false
            }
        }
    }

    // =========================================================================
    // Reads and Actions
    // =========================================================================

    /// Take up to `batch_size` cached chunks
    ///
    /// Oldest first unless `newest_first`. Never blocks; empty when nothing
    /// is cached or no session has run.
    #[must_use]
    pub fn get_read_chunks(&self, batch_size: usize, newest_first: bool) -> Vec<(u32, ReadChunk)> {
        self.current()
            .map(|session| session.cache().pop_batch(batch_size, newest_first))
            .unwrap_or_default()
    }

    /// Ask the device to stop sending data for a read
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRunning`] when no session is running.
    pub fn stop_receiving_read(
        &self,
        channel_id: u32,
        read_number: u32,
    ) -> Result<ActionId, ClientError> {
        let session = self.running_session()?;
        Ok(session.enqueue_action(PendingAction::stop_further_data(channel_id, read_number)))
    }

    /// Eject a read from its pore for `duration`
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRunning`] when no session is running.
    pub fn unblock_read(
        &self,
        channel_id: u32,
        read_number: u32,
        duration: Duration,
    ) -> Result<ActionId, ClientError> {
        let session = self.running_session()?;
        Ok(session.enqueue_action(PendingAction::unblock(channel_id, read_number, duration)))
    }

    /// Eject a read for the configured default duration
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::NotRunning`] when no session is running.
    pub fn unblock_read_default(
        &self,
        channel_id: u32,
        read_number: u32,
    ) -> Result<ActionId, ClientError> {
        self.unblock_read(channel_id, read_number, self.config.unblock_duration)
    }

    // =========================================================================
    // Observers
    // =========================================================================

    /// Whether a session is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.current().is_some_and(|session| session.is_running())
    }

    /// Lifecycle state of the current session
    #[must_use]
    pub fn state(&self) -> DriverState {
        self.current()
            .map_or(DriverState::Idle, |session| session.state())
    }

    /// Number of cached channels
    #[must_use]
    pub fn queue_length(&self) -> usize {
        self.current().map_or(0, |session| session.cache().len())
    }

    /// Reads lost from the cache before being taken
    #[must_use]
    pub fn missed_reads(&self) -> u64 {
        self.current().map_or(0, |session| session.cache().missed())
    }

    /// Chunks superseded by a later chunk of the same read
    #[must_use]
    pub fn missed_chunks(&self) -> u64 {
        self.current().map_or(0, |session| session.cache().replaced())
    }

    /// Cache counters for the current session
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.current()
            .map(|session| session.cache().stats())
            .unwrap_or_default()
    }

    /// Acknowledgement counts for the current session
    #[must_use]
    pub fn action_summary(&self) -> BTreeMap<ActionKind, BTreeMap<ActionOutcome, u64>> {
        self.current()
            .map(|session| session.action_summary())
            .unwrap_or_default()
    }

    /// Error that ended the last session, if any
    #[must_use]
    pub fn last_error(&self) -> Option<SessionError> {
        self.current().and_then(|session| session.last_error())
    }

    // =========================================================================
    // Side Channel
    // =========================================================================

    /// Raw acquisition progress reported by the device
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the query fails.
    pub async fn acquisition_progress(&self) -> Result<AcquisitionProgress, ClientError> {
        Ok(self.transport.acquisition_progress().await?)
    }

    /// Encoding of the signal the current (or default) options stream
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Transport`] if the query fails.
    pub async fn signal_data_type(&self) -> Result<SignalDataType, ClientError> {
        let raw_data_type = self.current().map_or(self.config.session.raw_data_type, |session| {
            session.options().raw_data_type
        });
        let data_types = self.transport.data_types().await?;
        Ok(match raw_data_type {
            RawDataType::Calibrated => data_types.calibrated_signal,
            RawDataType::Uncalibrated => data_types.uncalibrated_signal,
        })
    }
}
