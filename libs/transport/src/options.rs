//! Connection options.
//!
//! Everything a channel consumes at connect time. With the `serde` feature
//! enabled the struct derives `Serialize`/`Deserialize` so deployments can
//! keep it in a TOML or YAML config file.

use codec::WireVersion;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Payload compression negotiated at connect time.
///
/// The knob travels in the handshake; only `None` is currently negotiable -
/// asking for anything else fails at connect rather than silently sending
/// uncompressed data.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, TryFromPrimitive, IntoPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CompressionMode {
    #[default]
    None = 0,
    Zlib = 1,
    Lz4 = 2,
}

/// Options consumed by [`Channel::connect`].
///
/// [`Channel::connect`]: crate::Channel::connect
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ConnectOptions {
    pub host: String,
    pub port: u16,
    /// Local interface address to bind before connecting.
    pub interface: Option<String>,
    /// Leave the socket in blocking mode. The channel contract is written
    /// for non-blocking use; blocking mode is for simple scripted tools.
    pub blocking: bool,
    /// Requested heartbeat window in seconds; the provider may negotiate it
    /// down. Clamped to 1..=255.
    pub ping_timeout_secs: u8,
    pub compression: CompressionMode,
    /// Application protocol identifier carried in the handshake.
    pub protocol_type: u8,
    /// Wire-format version this side speaks.
    pub version: WireVersionConfig,
    /// Buffers created up front and always available to this channel.
    pub guaranteed_output_buffers: usize,
    /// Largest single wire packet this side wants; the negotiated value may
    /// be smaller.
    pub max_fragment_size: u32,
    /// Free-text component identification sent to the peer.
    pub component_name: String,
}

/// Serializable mirror of [`WireVersion`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WireVersionConfig {
    pub major: u8,
    pub minor: u8,
}

impl From<WireVersionConfig> for WireVersion {
    fn from(v: WireVersionConfig) -> Self {
        WireVersion {
            major: v.major,
            minor: v.minor,
        }
    }
}

impl Default for WireVersionConfig {
    fn default() -> Self {
        WireVersionConfig {
            major: WireVersion::CURRENT.major,
            minor: WireVersion::CURRENT.minor,
        }
    }
}

impl Default for ConnectOptions {
    fn default() -> Self {
        ConnectOptions {
            host: "localhost".to_string(),
            port: 14002,
            interface: None,
            blocking: false,
            ping_timeout_secs: 60,
            compression: CompressionMode::None,
            protocol_type: 0,
            version: WireVersionConfig::default(),
            guaranteed_output_buffers: 50,
            max_fragment_size: 6144,
            component_name: String::new(),
        }
    }
}

impl ConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        ConnectOptions {
            host: host.into(),
            port,
            ..ConnectOptions::default()
        }
    }
}
