//! Outbound Action Queue
//!
//! Unbounded FIFO of control decisions (stop receiving / unblock) waiting to
//! be placed on the live-reads stream. Application threads enqueue, the
//! driver's send path drains in bounded batches without ever blocking.

use std::collections::VecDeque;
use std::fmt;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default time to apply the unblock voltage
pub const DEFAULT_UNBLOCK_DURATION: Duration = Duration::from_millis(100);

/// Unique identifier for an action sent on the stream
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(pub String);

impl ActionId {
    /// Generate a new random action ID
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of control action
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Ask the device to send no more data for the read
    StopFurtherData,
    /// Eject the molecule from the pore
    Unblock,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::StopFurtherData => write!(f, "stop_further_data"),
            Self::Unblock => write!(f, "unblock"),
        }
    }
}

/// A control decision waiting to be sent
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Identifier echoed back in the device's response
    pub action_id: ActionId,
    /// Channel the read is on
    pub channel_id: u32,
    /// Read number on that channel
    pub read_number: u32,
    /// What to do
    pub kind: ActionKind,
    /// How long to apply the unblock voltage (unblock only)
    pub duration: Option<Duration>,
}

impl PendingAction {
    /// Request no more data for a read
    #[must_use]
    pub fn stop_further_data(channel_id: u32, read_number: u32) -> Self {
        Self {
            action_id: ActionId::new(),
            channel_id,
            read_number,
            kind: ActionKind::StopFurtherData,
            duration: None,
        }
    }

    /// Eject a read for `duration`
    #[must_use]
    pub fn unblock(channel_id: u32, read_number: u32, duration: Duration) -> Self {
        Self {
            action_id: ActionId::new(),
            channel_id,
            read_number,
            kind: ActionKind::Unblock,
            duration: Some(duration),
        }
    }
}

/// Thread-safe unbounded FIFO of pending actions
#[derive(Debug, Default)]
pub struct ActionQueue {
    pending: Mutex<VecDeque<PendingAction>>,
}

impl ActionQueue {
    /// Create an empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an action
    pub fn enqueue(&self, action: PendingAction) {
        self.pending.lock().push_back(action);
    }

    /// Remove and return up to `max_items` actions in FIFO order
    ///
    /// Returns immediately; an empty vector means nothing was pending.
    pub fn drain_nonblocking(&self, max_items: usize) -> Vec<PendingAction> {
        let mut pending = self.pending.lock();
        let count = max_items.min(pending.len());
        pending.drain(..count).collect()
    }

    /// Number of pending actions
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is pending
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}
