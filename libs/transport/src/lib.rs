//! # Tickwire Transport - Channel Layer
//!
//! ## Purpose
//!
//! Connection transport for the Tickwire wire format: the channel state
//! machine (connect, repeated non-blocking handshake, active read/write,
//! close), guaranteed buffer pooling, message fragmentation/reassembly,
//! flow-controlled writes, and heartbeat/timeout management.
//!
//! ## Integration Points
//!
//! - **Upward**: hands out pooled buffers that the `codec` crate's
//!   iterators encode into, and returns reassembled buffers its decode
//!   iterators walk
//! - **Downward**: one non-blocking TCP socket per channel; socket
//!   readiness multiplexing belongs to the caller
//! - **Liveness**: [`PingManager`] drives heartbeats and silence detection
//!   off an injected clock
//!
//! ## Architecture Role
//!
//! ```text
//! application loop → [transport] → TCP socket
//!        ↑               ↓
//!   poll readiness   framing, pooling,
//!   encode/decode    fragmentation, pings
//! ```
//!
//! ## Concurrency Model
//!
//! Single-threaded and cooperative: nothing here blocks, spawns threads,
//! or sleeps. One owning thread per channel; buffers and channels are not
//! synchronized internally. Closing the channel is the only cancellation;
//! partial reads and writes in flight are simply discarded.

pub mod channel;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod options;
pub mod ping;
pub mod pool;

mod fragment;

pub use channel::{
    Channel, ChannelState, FlushOutcome, InitStatus, Negotiated, ReadEvent, WriteArgs,
    WriteOutcome,
};
pub use error::{Result, TransportError};
pub use options::{CompressionMode, ConnectOptions, WireVersionConfig};
pub use ping::{PingEvent, PingManager};
pub use pool::{BufferHandle, BufferPool};
