//! Transport Layer
//!
//! How the client reaches the sequencing device. The core only depends on
//! [`ReadUntilTransport`]; concrete carriers plug in behind it.
//!
//! - [`in_process`]: channel-backed transport with a scriptable
//!   [`SimulatedDevice`], for tests and the simulator

pub mod in_process;
pub mod traits;

pub use in_process::{InProcessTransport, SimulatedDevice};
pub use traits::{
    CancelHandle, CancelSignal, LiveReadsStream, ReadUntilTransport, ResponseStream,
    TransportError,
};
