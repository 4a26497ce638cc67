//! Codec error types.
//!
//! Only genuine failures are errors. Expected conditions a caller branches on
//! (blank data, end of container, set data skipped for lack of a definition)
//! are modeled as return-type variants, never as `Err`.

use thiserror::Error;

/// Errors raised by encode and decode operations.
///
/// `BufferTooSmall` is the only failure an encoder produces; everything else
/// is a decode-side diagnosis. A decode failure poisons the current message
/// only: the iterator can be rebound to the next buffer and reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Encode ran out of room in the bound buffer.
    #[error("buffer too small for encoded output")]
    BufferTooSmall,

    /// Decode ran past the end of the datum it was given.
    #[error("incomplete data: entry span shorter than its encoding")]
    Incomplete,

    /// A length, tag, or field value violates the wire format.
    #[error("invalid wire data: {0}")]
    InvalidData(&'static str),

    /// A value cannot be represented in the requested encoding.
    #[error("value out of range: {0}")]
    OutOfRange(&'static str),

    /// Container nesting exceeded the iterator's fixed level stack.
    #[error("container nesting exceeds maximum depth")]
    NestingTooDeep,

    /// A type tag with no decoder (or not legal in this position).
    #[error("unsupported data type tag {0}")]
    UnsupportedType(u8),

    /// A set definition database slot conflict or illegal set id.
    #[error("illegal set definition: {0}")]
    IllegalSetDef(&'static str),
}

pub type Result<T> = std::result::Result<T, CodecError>;
