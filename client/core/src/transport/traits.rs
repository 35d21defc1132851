//! Transport Traits
//!
//! The boundary between the Read Until core and whatever carries the
//! live-reads stream (gRPC, in-process channels, ...).
//!
//! A transport opens one duplex stream per session: it consumes a lazy
//! sequence of [`LiveReadsRequest`]s from an `mpsc` receiver and yields
//! inbound [`LiveReadsResponse`]s through a [`LiveReadsStream`], which can be
//! cancelled out-of-band through its [`CancelHandle`].

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::chunk::DataTypes;
use crate::messages::{AcquisitionProgress, LiveReadsRequest, LiveReadsResponse};

/// Errors that can occur during transport operations
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection to the device failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// Connection was closed
    #[error("Connection closed")]
    ConnectionClosed,
    /// Failed to send a message
    #[error("Send failed: {0}")]
    SendFailed(String),
    /// Failed to receive a message
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
    /// IO error from underlying transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sender side of a stream cancellation flag
#[derive(Clone, Debug)]
pub struct CancelHandle {
    flag: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Create a handle and the signal the transport listens on
    #[must_use]
    pub fn pair() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { flag: Arc::new(tx) }, CancelSignal { rx })
    }

    /// Request cancellation (idempotent)
    pub fn cancel(&self) {
        self.flag.send_replace(true);
    }

    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.flag.borrow()
    }

    /// Another signal observing this handle
    #[must_use]
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.flag.subscribe(),
        }
    }
}

/// Receiver side of a stream cancellation flag
#[derive(Clone, Debug)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// Whether cancellation was requested
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is requested or every handle is dropped
    pub async fn cancelled(&mut self) {
        loop {
            let cancelled = *self.rx.borrow_and_update();
            if cancelled || self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Inbound messages of an open stream
pub type ResponseStream = BoxStream<'static, Result<LiveReadsResponse, TransportError>>;

/// Inbound half of an open live-reads stream
pub struct LiveReadsStream {
    responses: ResponseStream,
    cancel: CancelHandle,
}

impl LiveReadsStream {
    /// Wrap a response stream and its cancellation handle
    #[must_use]
    pub fn new(responses: ResponseStream, cancel: CancelHandle) -> Self {
        Self { responses, cancel }
    }

    /// Next inbound message, `None` once the device ends the stream
    pub async fn next(&mut self) -> Option<Result<LiveReadsResponse, TransportError>> {
        self.responses.next().await
    }

    /// Handle that cancels this stream from elsewhere
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Signal the device that the client is done with the stream
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Transport for the client side of Read Until
///
/// Implementations carry the live-reads stream and the two side-channel
/// queries the client needs.
#[async_trait]
pub trait ReadUntilTransport: Send + Sync {
    /// Open a live-reads stream fed by `requests`
    ///
    /// The stream lives until the device ends it, the request sender is
    /// dropped, or it is cancelled.
    async fn open_live_reads(
        &self,
        requests: mpsc::Receiver<LiveReadsRequest>,
    ) -> Result<LiveReadsStream, TransportError>;

    /// Current raw acquisition progress
    async fn acquisition_progress(&self) -> Result<AcquisitionProgress, TransportError>;

    /// Encodings used for raw signal
    async fn data_types(&self) -> Result<DataTypes, TransportError>;
}
