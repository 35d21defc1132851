//! Read Until Core - Adaptive Sampling Client for Nanopore Sequencing
//!
//! This crate is the client side of Read Until: it receives live chunks of
//! raw signal for reads still in the pore, holds the latest chunk per
//! channel for the application's analysis, and sends the application's
//! decisions (stop receiving, unblock) back to the device.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                     Application analysis                         │
//! │        get_read_chunks()          stop_receiving_read()          │
//! │              ▲                    unblock_read()                 │
//! └──────────────┼──────────────────────────┼────────────────────────┘
//!                │                          │
//! ┌──────────────┼──────────────────────────┼────────────────────────┐
//! │              │      ReadUntilClient     ▼                        │
//! │  ┌───────────┴────┐   Session    ┌──────────────┐                │
//! │  │   ReadCache    │              │ ActionQueue  │                │
//! │  └───────▲────────┘              └──────┬───────┘                │
//! │          │ put                          │ drain                  │
//! │  ┌───────┴────────┐              ┌──────▼───────┐                │
//! │  │ ReadProcessor  │   driver     │ pump_actions │                │
//! │  └───────▲────────┘              └──────┬───────┘                │
//! └──────────┼──────────────────────────────┼────────────────────────┘
//!            │      ReadUntilTransport      ▼
//!            └──────── live reads ──────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ReadUntilClient`]: the facade applications use
//! - [`ReadCache`]: bounded, insertion-ordered latest-chunk-per-channel cache
//! - [`ActionQueue`]: outbound FIFO of control decisions
//! - [`Session`]: everything owned by one `run()`
//! - [`ReadUntilTransport`]: the boundary to whatever carries the stream
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use read_until_core::{ClientConfig, InProcessTransport, ReadUntilClient};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let (transport, _device) = InProcessTransport::new_pair();
//!     let client = ReadUntilClient::new(Arc::new(transport), ClientConfig::default())?;
//!     client.run()?;
//!
//!     while client.is_running() {
//!         for (channel, chunk) in client.get_read_chunks(512, true) {
//!             if !wanted(&chunk) {
//!                 client.unblock_read_default(channel, chunk.read_number)?;
//!             }
//!         }
//!         tokio::time::sleep(std::time::Duration::from_millis(100)).await;
//!     }
//!
//!     client.reset().await;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`chunk`]: read chunks, signal encodings, classification map
//! - [`cache`]: the bounded read cache and its same-read policies
//! - [`action_queue`]: pending actions and their queue
//! - [`messages`]: live-reads protocol messages
//! - [`transport`]: transport boundary and the in-process device
//! - [`driver`]: send and receive paths of a session
//! - [`session`]: per-run state and lifecycle
//! - [`client`]: the client facade
//! - [`config`]: configuration loading

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod action_queue;
pub mod cache;
pub mod chunk;
pub mod client;
pub mod config;
pub mod driver;
pub mod messages;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use action_queue::{ActionId, ActionKind, ActionQueue, PendingAction, DEFAULT_UNBLOCK_DURATION};
pub use cache::{CacheError, CacheStats, ReadCache, SameReadPolicy, DEFAULT_CACHE_SIZE};
pub use chunk::{
    ClassificationMap, DataTypes, ReadChunk, SampleKind, SignalDataType, SignalDecodeError,
    DEFAULT_PREFILTER_CLASSES,
};
pub use client::{ClientError, ReadUntilClient};
pub use driver::{BatchSummary, IntervalReport, ProcessorSettings, ReadProcessor};
pub use messages::{
    AcquisitionProgress, ActionOutcome, ActionResponse, LiveReadsRequest, LiveReadsResponse,
    RawDataType, StreamSetup, MAX_MIN_CHUNK_SIZE,
};
pub use session::{DriverState, Session, SessionError, SessionOptions};
pub use transport::{
    CancelHandle, InProcessTransport, LiveReadsStream, ReadUntilTransport, SimulatedDevice,
    TransportError,
};

// Config exports
pub use config::{
    default_config_path, load_config, load_config_from_path, load_config_with_env, ClientConfig,
    ConfigError, ConfigOverrides, ConfigSource, ReadUntilToml,
};
