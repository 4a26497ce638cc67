//! # Tickwire Codec - Market-Data Wire Format
//!
//! ## Purpose
//!
//! This crate is the "rules" layer of the Tickwire stack: a self-describing
//! binary encoding for typed, nested records. It contains the primitive
//! codec (trimmed integers, fixed-point reals, date/time tuples,
//! quality-of-service and state values), the container codec (field lists,
//! element lists, maps, vectors, series, filter lists, arrays, local set
//! definitions), and the message envelope with its eight classes.
//!
//! ## Integration Points
//!
//! - **Input/Output**: byte buffers supplied by the transport crate; this
//!   crate never allocates backing storage for wire data
//! - **Cursors**: every call goes through an [`EncodeIter`] or
//!   [`DecodeIter`] bound to one buffer and the channel's wire version
//! - **Dictionaries**: enumeration values decode to raw ordinals; label
//!   lookup belongs to the domain layer above
//!
//! ## Architecture Role
//!
//! ```text
//! transport (channels) → [codec] → domain messages
//!        ↑                  ↓            ↓
//!    Buffers +         Encode/Decode   Login, Directory,
//!    readiness         Iterators       Dictionary, Prices
//! ```
//!
//! ## What This Crate Does NOT Contain
//!
//! - Socket management, framing, fragmentation (see `transport`)
//! - Domain message builders (login, directory, dictionary, prices)
//! - Field-dictionary file loading
//!
//! ## Conventions
//!
//! Decode distinguishes success, *blank* (a reserved zero-length encoding
//! meaning "no value") and malformed data; blank is ordinary control flow.
//! Encoders fail only on insufficient buffer space. Misusing a multi-phase
//! encode protocol (wrong call order) is a programming error and panics;
//! it never produces corrupt wire bytes.

pub mod array;
pub mod element_list;
pub mod error;
pub mod field_list;
pub mod filter_list;
pub mod iter;
pub mod map;
pub mod msg;
pub mod primitive;
pub mod series;
pub mod set_def;
pub mod types;
pub mod vector;

mod set_data;
mod wire;

pub use error::{CodecError, Result};
pub use iter::{DecodeIter, EncodeIter, MAX_LEVELS};
pub use types::{
    domain, DataState, DataType, Decoded, FilterEntryAction, InitOutcome, MapEntryAction,
    MsgClass, QosRate, QosTimeliness, StreamState, VectorEntryAction, WireVersion,
    CONTAINER_TYPE_MIN,
};

pub use array::{Array, ArrayEntry};
pub use element_list::{ElementEntry, ElementList};
pub use field_list::{FieldEntry, FieldList, FieldListInfo};
pub use filter_list::{FilterEntry, FilterEntryHeader, FilterList};
pub use map::{Map, MapEntry};
pub use msg::{
    decode_msg_key_attrib, AckMsg, CloseMsg, GenericMsg, Msg, MsgBase, MsgEncodePhase, MsgKey,
    MsgKeyAttrib, OwnedMsg, PostMsg, PostUserInfo, Priority, RefreshMsg, RequestMsg, StatusMsg,
    UpdateMsg,
};
pub use primitive::{
    decode_buffer, decode_from_span, state_code, Date, DateTime, Double, EncodeValue, EnumValue,
    Float, Int, Primitive, Qos, Real, RealHint, State, Time, UInt,
};
pub use series::{Series, SeriesEntry};
pub use set_def::{
    ElementSetDef, ElementSetDefEntry, FieldSetDef, FieldSetDefEntry, LocalElementSetDefDb,
    LocalFieldSetDefDb, MAX_LOCAL_SET_ID,
};
pub use vector::{Vector, VectorEntry};
