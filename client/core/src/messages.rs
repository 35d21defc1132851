//! Live-Reads Protocol Messages
//!
//! Transport-agnostic shapes of the messages exchanged on the duplex
//! live-reads stream.
//!
//! ```text
//! client                                   device
//!   │── Setup{channels, data mode, min} ──▶│
//!   │── Actions[...] ─────────────────────▶│   (repeated, batched)
//!   │◀── { action_responses, channels } ───│   (repeated)
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::action_queue::{ActionId, PendingAction};
use crate::chunk::ReadChunk;

/// Largest minimum chunk size the device honours
///
/// Device-side filtering of small chunks is unreliable, so requests are
/// clamped down to this value (which disables it).
pub const MAX_MIN_CHUNK_SIZE: u64 = 0;

/// Which signal the device should stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawDataType {
    /// Calibrated signal in picoamps
    #[default]
    Calibrated,
    /// Raw ADC counts
    Uncalibrated,
}

/// First message on every stream
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamSetup {
    /// Lowest channel to receive data for
    pub first_channel: u32,
    /// Highest channel (inclusive) to receive data for
    pub last_channel: u32,
    /// Signal kind to stream
    pub raw_data_type: RawDataType,
    /// Minimum number of samples in a chunk
    pub sample_minimum_chunk_size: u64,
}

/// Outbound message (client to device)
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveReadsRequest {
    /// Stream initialisation, sent exactly once and first
    Setup(StreamSetup),
    /// A batch of control actions
    Actions(Vec<PendingAction>),
}

impl LiveReadsRequest {
    /// Actions carried by this request, if any
    #[must_use]
    pub fn actions(&self) -> &[PendingAction] {
        match self {
            Self::Setup(_) => &[],
            Self::Actions(actions) => actions,
        }
    }
}

/// Device's verdict on an action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    /// Action applied
    Success,
    /// The read had already finished
    FailedReadFinished,
}

/// Acknowledgement of one action
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    /// Identifier of the acknowledged action
    pub action_id: ActionId,
    /// Outcome
    pub outcome: ActionOutcome,
}

/// Inbound message (device to client)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LiveReadsResponse {
    /// Acknowledgements of previously sent actions
    pub action_responses: Vec<ActionResponse>,
    /// Latest chunk per channel for this poll interval
    pub channels: BTreeMap<u32, ReadChunk>,
}

impl LiveReadsResponse {
    /// Create an empty response
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a chunk, keyed by its own channel
    #[must_use]
    pub fn with_chunk(mut self, chunk: ReadChunk) -> Self {
        self.channels.insert(chunk.channel_id, chunk);
        self
    }

    /// Add an action acknowledgement
    #[must_use]
    pub fn with_action_response(mut self, action_id: ActionId, outcome: ActionOutcome) -> Self {
        self.action_responses.push(ActionResponse { action_id, outcome });
        self
    }

    /// Whether the message carries nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.action_responses.is_empty() && self.channels.is_empty()
    }
}

/// Raw acquisition progress, per channel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquisitionProgress {
    /// Samples acquired since acquisition start
    pub acquired: u64,
    /// Samples processed since acquisition start
    pub processed: u64,
}
