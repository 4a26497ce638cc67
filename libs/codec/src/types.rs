//! Wire type tags and shared codec enums.
//!
//! Every tag that crosses the wire lives here: primitive and container data
//! types, entry actions, quality-of-service and stream-state values. Numeric
//! conversions go through `num_enum` so an unknown tag is a decode error, not
//! a panic.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::error::{CodecError, Result};

/// Negotiated wire-format version, fixed for the life of a channel and
/// stamped into every iterator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireVersion {
    pub major: u8,
    pub minor: u8,
}

impl WireVersion {
    /// The version this crate speaks natively.
    pub const CURRENT: WireVersion = WireVersion {
        major: 14,
        minor: 1,
    };
}

impl Default for WireVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

/// Container types occupy tag space 128 and above; on the wire they are
/// stored with this bias subtracted so they fit a single byte alongside a
/// reserved range.
pub const CONTAINER_TYPE_MIN: u8 = 128;

/// Data type tags.
///
/// 0..=19 are primitives, 64..=84 are the fixed-width set-data aliases used
/// by set definitions, 128 and up are containers.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum DataType {
    Unknown = 0,
    Int = 3,
    UInt = 4,
    Float = 5,
    Double = 6,
    Real = 8,
    Date = 9,
    Time = 10,
    DateTime = 11,
    Qos = 12,
    State = 13,
    Enum = 14,
    Array = 15,
    Buffer = 16,
    AsciiString = 17,
    Utf8String = 18,
    RmtesString = 19,

    // Fixed-width aliases legal only inside set definitions.
    Int1 = 64,
    UInt1 = 65,
    Int2 = 66,
    UInt2 = 67,
    Int4 = 68,
    UInt4 = 69,
    Int8 = 70,
    UInt8 = 71,
    Float4 = 72,
    Double8 = 73,
    Real4Rb = 74,
    Real8Rb = 75,
    Date4 = 76,
    Time3 = 77,
    Time5 = 78,
    DateTime7 = 79,
    DateTime9 = 80,
    DateTime11 = 81,
    DateTime12 = 82,
    Time7 = 83,
    Time8 = 84,

    NoData = 128,
    Opaque = 130,
    Xml = 131,
    FieldList = 132,
    ElementList = 133,
    AnsiPage = 134,
    FilterList = 135,
    Vector = 136,
    Map = 137,
    Series = 138,
    Msg = 141,
    Json = 142,
}

impl Default for DataType {
    fn default() -> Self {
        DataType::Unknown
    }
}

impl DataType {
    pub fn is_container(self) -> bool {
        u8::from(self) >= CONTAINER_TYPE_MIN
    }

    pub fn is_primitive(self) -> bool {
        !self.is_container()
    }

    /// Collapse a fixed-width set alias to the primitive type callers see.
    pub fn base_primitive(self) -> DataType {
        use DataType::*;
        match self {
            Int1 | Int2 | Int4 | Int8 => Int,
            UInt1 | UInt2 | UInt4 | UInt8 => UInt,
            Float4 => Float,
            Double8 => Double,
            Real4Rb | Real8Rb => Real,
            Date4 => Date,
            Time3 | Time5 | Time7 | Time8 => Time,
            DateTime7 | DateTime9 | DateTime11 | DateTime12 => DateTime,
            other => other,
        }
    }

    /// Fixed encoded width for set-data aliases; `None` for everything
    /// length-described.
    pub fn set_fixed_width(self) -> Option<usize> {
        use DataType::*;
        match self {
            Int1 | UInt1 => Some(1),
            Int2 | UInt2 => Some(2),
            Time3 => Some(3),
            Int4 | UInt4 | Float4 | Date4 => Some(4),
            Time5 => Some(5),
            DateTime7 | Time7 => Some(7),
            Int8 | UInt8 | Double8 | Time8 => Some(8),
            DateTime9 => Some(9),
            DateTime11 => Some(11),
            DateTime12 => Some(12),
            _ => None,
        }
    }

    /// Decode the on-wire container byte (biased by [`CONTAINER_TYPE_MIN`]).
    pub fn from_container_tag(raw: u8) -> Result<DataType> {
        let tag = raw
            .checked_add(CONTAINER_TYPE_MIN)
            .ok_or(CodecError::UnsupportedType(raw))?;
        DataType::try_from(tag).map_err(|_| CodecError::UnsupportedType(tag))
    }

    /// The on-wire byte for a container type.
    pub fn container_tag(self) -> u8 {
        debug_assert!(self.is_container());
        u8::from(self) - CONTAINER_TYPE_MIN
    }
}

/// Outcome of a primitive decode: a value, or the reserved zero-length
/// "no value" encoding. Blank is expected data, not an error.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decoded<T> {
    Value(T),
    Blank,
}

impl<T> Decoded<T> {
    /// Unwrap a value, treating blank as a caller-side contract failure.
    /// Intended for tests and call sites that already checked for blank.
    pub fn expect_value(self) -> T {
        match self {
            Decoded::Value(v) => v,
            Decoded::Blank => panic!("blank where a value was required"),
        }
    }

    pub fn value(self) -> Option<T> {
        match self {
            Decoded::Value(v) => Some(v),
            Decoded::Blank => None,
        }
    }

    pub fn is_blank(&self) -> bool {
        matches!(self, Decoded::Blank)
    }
}

/// Result of a container header decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    /// Header consumed; entries may now be decoded.
    Ready,
    /// The container is present but carries no entries.
    NoEntries,
    /// The container span was empty (blank container).
    Blank,
    /// Set data is present but no matching set definition was supplied;
    /// set-defined entries were skipped and standard entries (if any) follow.
    SetSkipped,
}

/// Per-entry action for map entries.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum MapEntryAction {
    Update = 1,
    Add = 2,
    /// Carries no payload.
    Delete = 3,
}

/// Per-entry action for vector entries.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum VectorEntryAction {
    Update = 1,
    Set = 2,
    /// Carries no payload.
    Clear = 3,
    Insert = 4,
    /// Carries no payload.
    Delete = 5,
}

/// Per-entry action for filter entries.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum FilterEntryAction {
    Update = 1,
    Set = 2,
    /// Carries no payload.
    Clear = 3,
}

/// Timeliness half of a quality-of-service value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
pub enum QosTimeliness {
    Unspecified = 0,
    Realtime = 1,
    DelayedUnknown = 2,
    /// Carries a `time_info` delay in the encoding.
    Delayed = 3,
}

/// Rate half of a quality-of-service value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, TryFromPrimitive, IntoPrimitive)]
pub enum QosRate {
    Unspecified = 0,
    TickByTick = 1,
    JitConflated = 2,
    /// Carries a `rate_info` interval in the encoding.
    TimeConflated = 3,
}

/// Stream half of a state value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum StreamState {
    Unspecified = 0,
    Open = 1,
    NonStreaming = 2,
    ClosedRecover = 3,
    Closed = 4,
    Redirected = 5,
}

/// Data half of a state value.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, TryFromPrimitive, IntoPrimitive)]
pub enum DataState {
    NoChange = 0,
    Ok = 1,
    Suspect = 2,
}

/// Message classes of the outer envelope.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum MsgClass {
    Request = 1,
    Refresh = 2,
    Status = 3,
    Update = 4,
    Close = 5,
    Ack = 6,
    Generic = 7,
    Post = 8,
}

/// Well-known domain types. The envelope carries a raw `u8`; these are the
/// values the surrounding domain layer conventionally uses.
pub mod domain {
    pub const LOGIN: u8 = 1;
    pub const SOURCE: u8 = 4;
    pub const DICTIONARY: u8 = 5;
    pub const MARKET_PRICE: u8 = 6;
    pub const MARKET_BY_ORDER: u8 = 7;
    pub const MARKET_BY_PRICE: u8 = 8;
    pub const SYMBOL_LIST: u8 = 10;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_tag_bias_round_trips() {
        for dt in [
            DataType::NoData,
            DataType::FieldList,
            DataType::ElementList,
            DataType::Map,
            DataType::Vector,
            DataType::Series,
            DataType::FilterList,
            DataType::Msg,
        ] {
            let tag = dt.container_tag();
            assert_eq!(DataType::from_container_tag(tag).unwrap(), dt);
        }
    }

    #[test]
    fn set_aliases_collapse_to_base() {
        assert_eq!(DataType::Int4.base_primitive(), DataType::Int);
        assert_eq!(DataType::UInt8.base_primitive(), DataType::UInt);
        assert_eq!(DataType::Real4Rb.base_primitive(), DataType::Real);
        assert_eq!(DataType::Time5.base_primitive(), DataType::Time);
        assert_eq!(DataType::Enum.base_primitive(), DataType::Enum);
    }

    #[test]
    fn set_fixed_widths() {
        assert_eq!(DataType::Int1.set_fixed_width(), Some(1));
        assert_eq!(DataType::DateTime12.set_fixed_width(), Some(12));
        assert_eq!(DataType::Real4Rb.set_fixed_width(), None);
        assert_eq!(DataType::Enum.set_fixed_width(), None);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        assert!(DataType::try_from(200u8).is_err());
    }
}
