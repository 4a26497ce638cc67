//! Transport error types.
//!
//! Expected conditions (would-block reads, queued writes, an exhausted
//! guaranteed pool) are return-type variants on the channel operations, not
//! errors. Everything here is either a per-call misuse or fatal for the
//! channel; callers close the channel on the fatal ones.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    /// OS-level connect failed before any handshake traffic.
    #[error("connect failed: {0}")]
    ConnectFailed(std::io::Error),

    /// The peer refused the session during the handshake. Fatal; the
    /// channel transitions straight to `Closed`.
    #[error("handshake rejected by peer: {0}")]
    HandshakeRejected(String),

    /// The peer answered the handshake with something unintelligible.
    #[error("handshake protocol violation: {0}")]
    HandshakeProtocol(&'static str),

    /// Socket failure while the channel was active. Fatal.
    #[error("channel down: {0}")]
    ChannelDown(std::io::Error),

    /// An operation was invoked in a state that does not support it.
    #[error("invalid channel state: {0}")]
    InvalidState(&'static str),

    /// A buffer handle that was released, or belongs to another pool
    /// generation. Using a buffer after release is a contract violation.
    #[error("stale buffer handle")]
    StaleBuffer,

    /// A frame that does not obey the wire framing rules.
    #[error("framing violation: {0}")]
    Framing(&'static str),

    /// The peer stopped sending data and heartbeats for a full timeout
    /// window. Fatal.
    #[error("liveness timeout: nothing received within the negotiated window")]
    LivenessTimeout,

    /// Connection options that cannot be honored.
    #[error("unsupported option: {0}")]
    UnsupportedOption(&'static str),
}

pub type Result<T> = std::result::Result<T, TransportError>;
