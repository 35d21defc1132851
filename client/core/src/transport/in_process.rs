//! In-Process Transport
//!
//! Channel-based transport paired with a [`SimulatedDevice`] that plays the
//! device side of the live-reads stream. Used by tests and by the simulator
//! binary; no network is involved.
//!
//! The device side mirrors a scripted test server:
//! - responses pushed before a client connects are delivered once one does
//! - every request received is recorded
//! - an open stream can be terminated or failed on demand
//! - actions can be acknowledged automatically
//!
//! # Usage
//!
//! ```ignore
//! let (transport, device) = InProcessTransport::new_pair();
//! device.push_response(LiveReadsResponse::new().with_chunk(chunk));
//!
//! let client = ReadUntilClient::new(Arc::new(transport), ClientConfig::default())?;
//! client.run(SessionOptions::default())?;
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch, Notify};
use tokio_stream::wrappers::ReceiverStream;

use crate::action_queue::PendingAction;
use crate::chunk::DataTypes;
use crate::messages::{
    AcquisitionProgress, ActionOutcome, LiveReadsRequest, LiveReadsResponse,
};

use super::traits::{
    CancelHandle, CancelSignal, LiveReadsStream, ReadUntilTransport, TransportError,
};

/// Default buffer between the device and the client's receive path
const DEFAULT_STREAM_CAPACITY: usize = 100;

/// Something the device will deliver on the open stream
#[derive(Debug)]
enum DeviceEvent {
    Response(LiveReadsResponse),
    Fail(String),
}

/// State shared by the transport and the device handle
#[derive(Debug)]
struct DeviceState {
    outbox: Mutex<VecDeque<DeviceEvent>>,
    outbox_ready: Notify,
    /// Bumped to end every stream open at the time
    terminate: watch::Sender<u64>,
    requests: Mutex<Vec<LiveReadsRequest>>,
    unseen_actions: Mutex<Vec<PendingAction>>,
    progress: Mutex<AcquisitionProgress>,
    data_types: Mutex<DataTypes>,
    auto_acknowledge: AtomicBool,
    available: AtomicBool,
    streams_opened: AtomicUsize,
    streams_active: AtomicUsize,
    capacity: usize,
}

impl DeviceState {
    fn new(capacity: usize) -> Self {
        Self {
            outbox: Mutex::new(VecDeque::new()),
            outbox_ready: Notify::new(),
            terminate: watch::Sender::new(0),
            requests: Mutex::new(Vec::new()),
            unseen_actions: Mutex::new(Vec::new()),
            progress: Mutex::new(AcquisitionProgress::default()),
            data_types: Mutex::new(DataTypes::standard()),
            auto_acknowledge: AtomicBool::new(false),
            available: AtomicBool::new(true),
            streams_opened: AtomicUsize::new(0),
            streams_active: AtomicUsize::new(0),
            capacity,
        }
    }

    fn ensure_available(&self) -> Result<(), TransportError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::ConnectionClosed)
        }
    }

    fn push(&self, event: DeviceEvent) {
        self.outbox.lock().push_back(event);
        self.outbox_ready.notify_one();
    }

    fn record(&self, request: LiveReadsRequest) {
        tracing::trace!(?request, "Device received request");
        let actions = request.actions();
        if !actions.is_empty() {
            self.unseen_actions.lock().extend(actions.iter().cloned());
            if self.auto_acknowledge.load(Ordering::SeqCst) {
                let response = actions
                    .iter()
                    .fold(LiveReadsResponse::new(), |response, action| {
                        response.with_action_response(action.action_id.clone(), ActionOutcome::Success)
                    });
                self.push(DeviceEvent::Response(response));
            }
        }
        self.requests.lock().push(request);
    }

    /// Serve one stream until the client goes away or the device ends it
    async fn serve(
        &self,
        mut requests: mpsc::Receiver<LiveReadsRequest>,
        responses: mpsc::Sender<Result<LiveReadsResponse, TransportError>>,
        mut cancelled: CancelSignal,
        mut terminate: watch::Receiver<u64>,
    ) {
        loop {
            loop {
                let Some(event) = self.outbox.lock().pop_front() else {
                    break;
                };
                let (item, ends_stream) = match event {
                    DeviceEvent::Response(response) => (Ok(response), false),
                    DeviceEvent::Fail(reason) => (Err(TransportError::ReceiveFailed(reason)), true),
                };
                if responses.send(item).await.is_err() {
                    tracing::debug!("Client dropped live reads stream");
                    return;
                }
                if ends_stream {
                    tracing::info!("Live reads stream failed by device");
                    return;
                }
            }

            tokio::select! {
                () = cancelled.cancelled() => {
                    tracing::debug!("Live reads stream cancelled by client");
                    return;
                }
                _ = terminate.changed() => {
                    tracing::info!("Exiting live reads due to terminate request");
                    return;
                }
                request = requests.recv() => match request {
                    Some(request) => self.record(request),
                    None => {
                        tracing::debug!("Request stream closed by client");
                        return;
                    }
                },
                () = self.outbox_ready.notified() => {}
            }
        }
    }
}

/// Client side of the in-process transport
#[derive(Clone, Debug)]
pub struct InProcessTransport {
    state: Arc<DeviceState>,
}

impl InProcessTransport {
    /// Create a transport and the device it talks to
    #[must_use]
    pub fn new_pair() -> (Self, SimulatedDevice) {
        Self::new_pair_with_capacity(DEFAULT_STREAM_CAPACITY)
    }

    /// Create with a custom inbound buffer capacity
    #[must_use]
    pub fn new_pair_with_capacity(capacity: usize) -> (Self, SimulatedDevice) {
        let state = Arc::new(DeviceState::new(capacity.max(1)));
        (
            Self {
                state: Arc::clone(&state),
            },
            SimulatedDevice { state },
        )
    }
}

#[async_trait]
impl ReadUntilTransport for InProcessTransport {
    async fn open_live_reads(
        &self,
        requests: mpsc::Receiver<LiveReadsRequest>,
    ) -> Result<LiveReadsStream, TransportError> {
        if !self.state.available.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionFailed(
                "simulated device unavailable".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(self.state.capacity);
        let (cancel, cancelled) = CancelHandle::pair();
        let state = Arc::clone(&self.state);
        let terminate = state.terminate.subscribe();
        state.streams_opened.fetch_add(1, Ordering::SeqCst);
        state.streams_active.fetch_add(1, Ordering::SeqCst);

        tokio::spawn(async move {
            state.serve(requests, tx, cancelled, terminate).await;
            state.streams_active.fetch_sub(1, Ordering::SeqCst);
        });

        Ok(LiveReadsStream::new(ReceiverStream::new(rx).boxed(), cancel))
    }

    async fn acquisition_progress(&self) -> Result<AcquisitionProgress, TransportError> {
        self.state.ensure_available()?;
        Ok(*self.state.progress.lock())
    }

    async fn data_types(&self) -> Result<DataTypes, TransportError> {
        self.state.ensure_available()?;
        Ok(*self.state.data_types.lock())
    }
}

/// Device side of the in-process transport
#[derive(Clone, Debug)]
pub struct SimulatedDevice {
    state: Arc<DeviceState>,
}

impl SimulatedDevice {
    /// Queue a response for the (current or next) live-reads stream
    pub fn push_response(&self, response: LiveReadsResponse) {
        self.state.push(DeviceEvent::Response(response));
    }

    /// End the current stream with a transport error after queued responses
    pub fn fail_stream(&self, reason: impl Into<String>) {
        self.state.push(DeviceEvent::Fail(reason.into()));
    }

    /// End every open live-reads stream
    ///
    /// Streams opened afterwards are not affected.
    pub fn terminate_live_reads(&self) {
        self.state.terminate.send_modify(|epoch| *epoch += 1);
    }

    /// Make subsequent stream opens and side-channel calls fail (or succeed again)
    pub fn set_available(&self, available: bool) {
        self.state.available.store(available, Ordering::SeqCst);
    }

    /// Acknowledge every received action with success
    pub fn set_auto_acknowledge(&self, enabled: bool) {
        self.state.auto_acknowledge.store(enabled, Ordering::SeqCst);
    }

    /// Every request received so far, in order
    #[must_use]
    pub fn requests(&self) -> Vec<LiveReadsRequest> {
        self.state.requests.lock().clone()
    }

    /// Actions received since the last call
    #[must_use]
    pub fn take_actions(&self) -> Vec<PendingAction> {
        std::mem::take(&mut *self.state.unseen_actions.lock())
    }

    /// Set the reported acquisition progress
    pub fn set_progress(&self, progress: AcquisitionProgress) {
        *self.state.progress.lock() = progress;
    }

    /// Advance acquired and processed sample counts
    pub fn advance_progress(&self, samples: u64) {
        let mut progress = self.state.progress.lock();
        progress.acquired += samples;
        progress.processed += samples;
    }

    /// Current acquisition progress
    #[must_use]
    pub fn progress(&self) -> AcquisitionProgress {
        *self.state.progress.lock()
    }

    /// Set the reported data types
    pub fn set_data_types(&self, data_types: DataTypes) {
        *self.state.data_types.lock() = data_types;
    }

    /// Responses not yet delivered
    #[must_use]
    pub fn pending_responses(&self) -> usize {
        self.state.outbox.lock().len()
    }

    /// Streams opened over the device's lifetime
    #[must_use]
    pub fn streams_opened(&self) -> usize {
        self.state.streams_opened.load(Ordering::SeqCst)
    }

    /// Streams currently being served
    #[must_use]
    pub fn streams_active(&self) -> usize {
        self.state.streams_active.load(Ordering::SeqCst)
    }
}
