//! Message envelope codec.
//!
//! The outer record of every wire interaction: a class tag
//! (request/refresh/update/status/close/ack/generic/post), a domain type, a
//! stream id, per-class optional sections, an optional identifying key, and
//! a payload span typed by a container tag. Messages are modeled as a sum
//! type over a shared [`MsgBase`]; optional sections are `Option` fields and
//! the wire bitmask is derived from them, so encode and decode stay
//! symmetric over the same set.
//!
//! Encoding is two-phase when the key carries an opaque attribute block:
//! the attribute container must be fully closed before the rest of the
//! header and the payload. The phases form a strict state machine: calling
//! the wrong next step panics (a programming error), it never emits
//! corrupted wire bytes:
//!
//! ```text
//! encode_init ──────────────► PayloadPending ── encode_complete ──► done
//!      │                            ▲
//!      │ (key attrib pending)       │
//!      ▼                            │
//! KeyAttribPending ── encode_key_attrib_complete
//! ```
//!
//! Decoding is single-phase: [`Msg::decode`] consumes the header and leaves
//! the iterator on the body span; [`decode_msg_key_attrib`] re-aims the
//! iterator at the attribute block and restores it when that container
//! completes.

use crate::error::{CodecError, Result};
use crate::iter::{DecodeIter, EncPhase, EncodeIter};
use crate::primitive::{EncodeValue, Qos, State};
use crate::types::{DataType, MsgClass};
use crate::wire;

mod request_flags {
    pub const HAS_EXTENDED_HEADER: u16 = 0x0001;
    pub const HAS_PRIORITY: u16 = 0x0002;
    pub const STREAMING: u16 = 0x0004;
    pub const MSG_KEY_IN_UPDATES: u16 = 0x0008;
    pub const CONF_INFO_IN_UPDATES: u16 = 0x0010;
    pub const NO_REFRESH: u16 = 0x0020;
    pub const HAS_QOS: u16 = 0x0040;
    pub const HAS_WORST_QOS: u16 = 0x0080;
    pub const PRIVATE_STREAM: u16 = 0x0100;
    pub const PAUSE: u16 = 0x0200;
    pub const QUALIFIED_STREAM: u16 = 0x1000;
}

mod refresh_flags {
    pub const HAS_EXTENDED_HEADER: u16 = 0x0001;
    pub const HAS_PERM_DATA: u16 = 0x0002;
    pub const HAS_MSG_KEY: u16 = 0x0008;
    pub const HAS_SEQ_NUM: u16 = 0x0010;
    pub const SOLICITED: u16 = 0x0020;
    pub const REFRESH_COMPLETE: u16 = 0x0040;
    pub const HAS_QOS: u16 = 0x0080;
    pub const CLEAR_CACHE: u16 = 0x0100;
    pub const DO_NOT_CACHE: u16 = 0x0200;
    pub const PRIVATE_STREAM: u16 = 0x0400;
    pub const HAS_POST_USER_INFO: u16 = 0x0800;
    pub const HAS_PART_NUM: u16 = 0x1000;
    pub const QUALIFIED_STREAM: u16 = 0x2000;
}

mod update_flags {
    pub const HAS_EXTENDED_HEADER: u16 = 0x0001;
    pub const HAS_PERM_DATA: u16 = 0x0002;
    pub const HAS_MSG_KEY: u16 = 0x0008;
    pub const HAS_SEQ_NUM: u16 = 0x0010;
    pub const HAS_CONF_INFO: u16 = 0x0020;
    pub const DO_NOT_CACHE: u16 = 0x0040;
    pub const DO_NOT_CONFLATE: u16 = 0x0080;
    pub const DO_NOT_RIPPLE: u16 = 0x0100;
    pub const HAS_POST_USER_INFO: u16 = 0x0200;
    pub const DISCARDABLE: u16 = 0x0400;
}

mod status_flags {
    pub const HAS_EXTENDED_HEADER: u16 = 0x0001;
    pub const HAS_PERM_DATA: u16 = 0x0002;
    pub const HAS_MSG_KEY: u16 = 0x0008;
    pub const HAS_GROUP_ID: u16 = 0x0010;
    pub const HAS_STATE: u16 = 0x0020;
    pub const CLEAR_CACHE: u16 = 0x0040;
    pub const PRIVATE_STREAM: u16 = 0x0080;
    pub const HAS_POST_USER_INFO: u16 = 0x0100;
    pub const QUALIFIED_STREAM: u16 = 0x0200;
}

mod close_flags {
    pub const HAS_EXTENDED_HEADER: u16 = 0x0001;
    pub const ACK: u16 = 0x0002;
}

mod ack_flags {
    pub const HAS_EXTENDED_HEADER: u16 = 0x0001;
    pub const HAS_TEXT: u16 = 0x0002;
    pub const PRIVATE_STREAM: u16 = 0x0004;
    pub const HAS_SEQ_NUM: u16 = 0x0008;
    pub const HAS_MSG_KEY: u16 = 0x0010;
    pub const HAS_NAK_CODE: u16 = 0x0020;
    pub const QUALIFIED_STREAM: u16 = 0x0040;
}

mod generic_flags {
    pub const HAS_EXTENDED_HEADER: u16 = 0x0001;
    pub const HAS_PERM_DATA: u16 = 0x0002;
    pub const HAS_MSG_KEY: u16 = 0x0004;
    pub const HAS_SEQ_NUM: u16 = 0x0008;
    pub const MESSAGE_COMPLETE: u16 = 0x0010;
    pub const HAS_SECONDARY_SEQ_NUM: u16 = 0x0020;
    pub const HAS_PART_NUM: u16 = 0x0040;
}

mod post_flags {
    pub const HAS_EXTENDED_HEADER: u16 = 0x0001;
    pub const HAS_POST_ID: u16 = 0x0002;
    pub const HAS_MSG_KEY: u16 = 0x0004;
    pub const HAS_SEQ_NUM: u16 = 0x0008;
    pub const POST_COMPLETE: u16 = 0x0010;
    pub const ACK: u16 = 0x0020;
    pub const HAS_PERM_DATA: u16 = 0x0040;
    pub const HAS_PART_NUM: u16 = 0x0080;
    pub const HAS_POST_USER_RIGHTS: u16 = 0x0100;
}

mod key_flags {
    pub const HAS_SERVICE_ID: u16 = 0x0001;
    pub const HAS_NAME: u16 = 0x0002;
    pub const HAS_NAME_TYPE: u16 = 0x0004;
    pub const HAS_FILTER: u16 = 0x0008;
    pub const HAS_IDENTIFIER: u16 = 0x0010;
    pub const HAS_ATTRIB: u16 = 0x0020;
}

/// Request priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub class: u8,
    pub count: u16,
}

/// Identity of the poster of an update or post message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostUserInfo {
    pub user_addr: u32,
    pub user_id: u32,
}

/// Opaque attribute block of a message key.
///
/// For two-phase encoding leave `data` empty and encode the attribute
/// container between `encode_init` and `encode_key_attrib_complete`; a
/// pre-encoded block travels in `data` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgKeyAttrib<'a> {
    pub container_type: DataType,
    pub data: &'a [u8],
    /// Offsets within the decode buffer; unused on encode.
    pub(crate) range: (usize, usize),
}

impl<'a> MsgKeyAttrib<'a> {
    pub fn new(container_type: DataType, data: &'a [u8]) -> Self {
        MsgKeyAttrib {
            container_type,
            data,
            range: (0, 0),
        }
    }

    /// An attribute block to be filled in by the two-phase encode.
    pub fn pending(container_type: DataType) -> Self {
        Self::new(container_type, b"")
    }
}

/// The identifying sub-record of an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsgKey<'a> {
    pub service_id: Option<u16>,
    pub name: Option<&'a [u8]>,
    /// Only meaningful (and only encoded) when `name` is present.
    pub name_type: Option<u8>,
    pub filter: Option<u32>,
    pub identifier: Option<i32>,
    pub attrib: Option<MsgKeyAttrib<'a>>,
}

impl<'a> MsgKey<'a> {
    pub fn with_name(name: &'a [u8]) -> Self {
        MsgKey {
            name: Some(name),
            ..MsgKey::default()
        }
    }

    pub fn service_id(mut self, id: u16) -> Self {
        self.service_id = Some(id);
        self
    }

    fn flag_bits(&self) -> u16 {
        let mut f = 0;
        if self.service_id.is_some() {
            f |= key_flags::HAS_SERVICE_ID;
        }
        if self.name.is_some() {
            f |= key_flags::HAS_NAME;
            if self.name_type.is_some() {
                f |= key_flags::HAS_NAME_TYPE;
            }
        }
        if self.filter.is_some() {
            f |= key_flags::HAS_FILTER;
        }
        if self.identifier.is_some() {
            f |= key_flags::HAS_IDENTIFIER;
        }
        if self.attrib.is_some() {
            f |= key_flags::HAS_ATTRIB;
        }
        f
    }

    fn encoded_len(&self) -> usize {
        let mut len = wire::len_u15rb(self.flag_bits());
        if let Some(id) = self.service_id {
            len += wire::len_u16ob(id);
        }
        if let Some(name) = self.name {
            len += 1 + name.len();
            if self.name_type.is_some() {
                len += 1;
            }
        }
        if self.filter.is_some() {
            len += 4;
        }
        if self.identifier.is_some() {
            len += 4;
        }
        if let Some(attrib) = &self.attrib {
            len += 1;
            if attrib.container_type != DataType::NoData {
                len += wire::len_u15rb(attrib.data.len() as u16) + attrib.data.len();
            }
        }
        len
    }
}

/// Fields common to every message class.
///
/// On decode, `payload` is the body span; the iterator is also left
/// positioned on it so the body container can be decoded in place.
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgBase<'a> {
    pub domain_type: u8,
    /// Signed stream identifier; negative ids are reserved for
    /// provider-initiated streams.
    pub stream_id: i32,
    pub container_type: DataType,
    pub msg_key: Option<MsgKey<'a>>,
    pub extended_header: Option<&'a [u8]>,
    pub payload: &'a [u8],
}

impl<'a> MsgBase<'a> {
    pub fn new(domain_type: u8, stream_id: i32, container_type: DataType) -> Self {
        MsgBase {
            domain_type,
            stream_id,
            container_type,
            msg_key: None,
            extended_header: None,
            payload: b"",
        }
    }

    pub fn key(mut self, key: MsgKey<'a>) -> Self {
        self.msg_key = Some(key);
        self
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RequestMsg<'a> {
    pub base: MsgBase<'a>,
    pub priority: Option<Priority>,
    pub qos: Option<Qos>,
    pub worst_qos: Option<Qos>,
    pub streaming: bool,
    pub no_refresh: bool,
    pub msg_key_in_updates: bool,
    pub conf_info_in_updates: bool,
    pub pause: bool,
    pub private_stream: bool,
    pub qualified_stream: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct RefreshMsg<'a> {
    pub base: MsgBase<'a>,
    pub seq_num: Option<u32>,
    pub state: State<'a>,
    pub group_id: &'a [u8],
    pub perm_data: Option<&'a [u8]>,
    pub qos: Option<Qos>,
    pub part_num: Option<u16>,
    pub post_user_info: Option<PostUserInfo>,
    pub solicited: bool,
    pub refresh_complete: bool,
    pub clear_cache: bool,
    pub do_not_cache: bool,
    pub private_stream: bool,
    pub qualified_stream: bool,
}

impl Default for RefreshMsg<'_> {
    fn default() -> Self {
        RefreshMsg {
            base: MsgBase::default(),
            seq_num: None,
            state: State::default(),
            group_id: b"",
            perm_data: None,
            qos: None,
            part_num: None,
            post_user_info: None,
            solicited: false,
            refresh_complete: false,
            clear_cache: false,
            do_not_cache: false,
            private_stream: false,
            qualified_stream: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateMsg<'a> {
    pub base: MsgBase<'a>,
    pub update_type: u8,
    pub seq_num: Option<u32>,
    /// Conflation count and time, carried together.
    pub conf_info: Option<(u16, u16)>,
    pub perm_data: Option<&'a [u8]>,
    pub post_user_info: Option<PostUserInfo>,
    pub do_not_cache: bool,
    pub do_not_conflate: bool,
    pub do_not_ripple: bool,
    pub discardable: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusMsg<'a> {
    pub base: MsgBase<'a>,
    pub state: Option<State<'a>>,
    pub group_id: Option<&'a [u8]>,
    pub perm_data: Option<&'a [u8]>,
    pub post_user_info: Option<PostUserInfo>,
    pub clear_cache: bool,
    pub private_stream: bool,
    pub qualified_stream: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CloseMsg<'a> {
    pub base: MsgBase<'a>,
    pub ack: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AckMsg<'a> {
    pub base: MsgBase<'a>,
    pub ack_id: u32,
    pub nak_code: Option<u8>,
    pub text: Option<&'a [u8]>,
    pub seq_num: Option<u32>,
    pub private_stream: bool,
    pub qualified_stream: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GenericMsg<'a> {
    pub base: MsgBase<'a>,
    pub seq_num: Option<u32>,
    pub secondary_seq_num: Option<u32>,
    pub perm_data: Option<&'a [u8]>,
    pub part_num: Option<u16>,
    pub message_complete: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PostMsg<'a> {
    pub base: MsgBase<'a>,
    pub post_user_info: PostUserInfo,
    pub seq_num: Option<u32>,
    pub post_id: Option<u32>,
    pub perm_data: Option<&'a [u8]>,
    pub part_num: Option<u16>,
    pub post_user_rights: Option<u16>,
    pub post_complete: bool,
    pub ack: bool,
}

impl Default for PostMsg<'_> {
    fn default() -> Self {
        PostMsg {
            base: MsgBase::default(),
            post_user_info: PostUserInfo {
                user_addr: 0,
                user_id: 0,
            },
            seq_num: None,
            post_id: None,
            perm_data: None,
            part_num: None,
            post_user_rights: None,
            post_complete: false,
            ack: false,
        }
    }
}

/// A message of any class.
#[derive(Debug, Clone, Copy)]
pub enum Msg<'a> {
    Request(RequestMsg<'a>),
    Refresh(RefreshMsg<'a>),
    Status(StatusMsg<'a>),
    Update(UpdateMsg<'a>),
    Close(CloseMsg<'a>),
    Ack(AckMsg<'a>),
    Generic(GenericMsg<'a>),
    Post(PostMsg<'a>),
}

/// Where a two-phase encode stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgEncodePhase {
    /// Encode the key-attribute container, then call
    /// [`Msg::encode_key_attrib_complete`].
    KeyAttribPending,
    /// Encode the body, then call [`Msg::encode_complete`].
    PayloadPending,
}

impl<'a> Msg<'a> {
    pub fn msg_class(&self) -> MsgClass {
        match self {
            Msg::Request(_) => MsgClass::Request,
            Msg::Refresh(_) => MsgClass::Refresh,
            Msg::Status(_) => MsgClass::Status,
            Msg::Update(_) => MsgClass::Update,
            Msg::Close(_) => MsgClass::Close,
            Msg::Ack(_) => MsgClass::Ack,
            Msg::Generic(_) => MsgClass::Generic,
            Msg::Post(_) => MsgClass::Post,
        }
    }

    pub fn base(&self) -> &MsgBase<'a> {
        match self {
            Msg::Request(m) => &m.base,
            Msg::Refresh(m) => &m.base,
            Msg::Status(m) => &m.base,
            Msg::Update(m) => &m.base,
            Msg::Close(m) => &m.base,
            Msg::Ack(m) => &m.base,
            Msg::Generic(m) => &m.base,
            Msg::Post(m) => &m.base,
        }
    }

    // -- encode -----------------------------------------------------------

    /// Single-shot encode: any key attribute block and the payload must be
    /// pre-encoded in the message.
    pub fn encode(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        match self.encode_init(iter)? {
            MsgEncodePhase::PayloadPending => {}
            MsgEncodePhase::KeyAttribPending => panic!(
                "single-shot encode with a pending key attribute block; \
                 use encode_init/encode_key_attrib_complete"
            ),
        }
        iter.write_bytes(self.base().payload)?;
        Msg::encode_complete(iter, true)
    }

    /// Begin encoding. Returns `KeyAttribPending` when the key announces an
    /// attribute block that was not pre-encoded.
    pub fn encode_init(&self, iter: &mut EncodeIter<'_>) -> Result<MsgEncodePhase> {
        let base = self.base();
        iter.push_level(DataType::Msg, EncPhase::MsgPayload)?;
        iter.write_u16(0)?; // header size, patched in encode_complete
        iter.write_u8(self.msg_class().into())?;
        iter.write_u8(base.domain_type)?;
        iter.write_i32(base.stream_id)?;

        let pending = self.encode_class_header(iter)?;
        if pending {
            iter.level_mut().phase = EncPhase::MsgKeyAttrib;
            return Ok(MsgEncodePhase::KeyAttribPending);
        }
        let header_end = iter.position();
        iter.level_mut().size_mark = Some(header_end);
        Ok(MsgEncodePhase::PayloadPending)
    }

    /// Close the key-attribute container and finish the header.
    pub fn encode_key_attrib_complete(
        &self,
        iter: &mut EncodeIter<'_>,
        success: bool,
    ) -> Result<MsgEncodePhase> {
        iter.expect_phase(DataType::Msg, EncPhase::MsgKeyAttrib);
        let (attrib_mark, key_mark) = {
            let level = iter.level();
            (
                level.size_mark.expect("attrib mark"),
                level.aux_mark.expect("key size mark"),
            )
        };
        if !success {
            // abandon the whole message
            let start = iter.level().start_pos;
            iter.pop_level();
            iter.pos = start;
            return Ok(MsgEncodePhase::PayloadPending);
        }
        let attrib_len = iter.position() - (attrib_mark + 2);
        if attrib_len > 0x7FFF {
            return Err(CodecError::OutOfRange("key attributes longer than 0x7FFF"));
        }
        iter.patch_u15rb_long(attrib_mark, attrib_len as u16)?;
        let key_len = iter.position() - (key_mark + 2);
        if key_len > 0x7FFF {
            return Err(CodecError::OutOfRange("message key longer than 0x7FFF"));
        }
        iter.patch_u15rb_long(key_mark, key_len as u16)?;

        self.encode_post_key_sections(iter)?;
        let header_end = iter.position();
        let level = iter.level_mut();
        level.phase = EncPhase::MsgPayload;
        level.size_mark = Some(header_end);
        level.aux_mark = None;
        Ok(MsgEncodePhase::PayloadPending)
    }

    /// Patch the header size and finish the message.
    pub fn encode_complete(iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        iter.expect_phase(DataType::Msg, EncPhase::MsgPayload);
        let level = iter.pop_level();
        if !success {
            iter.pos = level.start_pos;
            return Ok(());
        }
        let header_end = level.size_mark.expect("header end");
        let header_size = header_end - (level.start_pos + 2);
        if header_size > usize::from(u16::MAX) {
            return Err(CodecError::OutOfRange("message header longer than 0xFFFF"));
        }
        iter.patch_u16(level.start_pos, header_size as u16);
        Ok(())
    }

    /// Per-class header after the fixed prefix. Returns true when stopped
    /// inside the key for a pending attribute block.
    fn encode_class_header(&self, iter: &mut EncodeIter<'_>) -> Result<bool> {
        match self {
            Msg::Request(m) => {
                let mut f = 0u16;
                if m.base.extended_header.is_some() {
                    f |= request_flags::HAS_EXTENDED_HEADER;
                }
                if m.priority.is_some() {
                    f |= request_flags::HAS_PRIORITY;
                }
                if m.streaming {
                    f |= request_flags::STREAMING;
                }
                if m.msg_key_in_updates {
                    f |= request_flags::MSG_KEY_IN_UPDATES;
                }
                if m.conf_info_in_updates {
                    f |= request_flags::CONF_INFO_IN_UPDATES;
                }
                if m.no_refresh {
                    f |= request_flags::NO_REFRESH;
                }
                if m.qos.is_some() {
                    f |= request_flags::HAS_QOS;
                }
                if m.worst_qos.is_some() {
                    f |= request_flags::HAS_WORST_QOS;
                }
                if m.private_stream {
                    f |= request_flags::PRIVATE_STREAM;
                }
                if m.pause {
                    f |= request_flags::PAUSE;
                }
                if m.qualified_stream {
                    f |= request_flags::QUALIFIED_STREAM;
                }
                iter.write_u15rb(f)?;
                iter.write_u8(m.base.container_type.container_tag())?;
                if let Some(p) = m.priority {
                    iter.write_u8(p.class)?;
                    iter.write_u16ob(p.count)?;
                }
                if let Some(qos) = &m.qos {
                    qos.encode(iter)?;
                }
                if let Some(qos) = &m.worst_qos {
                    qos.encode(iter)?;
                }
                let key = m.base.msg_key.as_ref().ok_or(CodecError::InvalidData(
                    "request messages require a message key",
                ))?;
                if encode_key(iter, key)? {
                    return Ok(true);
                }
                if let Some(ext) = m.base.extended_header {
                    iter.write_buffer8(ext)?;
                }
            }
            Msg::Refresh(m) => {
                let mut f = 0u16;
                if m.base.extended_header.is_some() {
                    f |= refresh_flags::HAS_EXTENDED_HEADER;
                }
                if m.perm_data.is_some() {
                    f |= refresh_flags::HAS_PERM_DATA;
                }
                if m.base.msg_key.is_some() {
                    f |= refresh_flags::HAS_MSG_KEY;
                }
                if m.seq_num.is_some() {
                    f |= refresh_flags::HAS_SEQ_NUM;
                }
                if m.solicited {
                    f |= refresh_flags::SOLICITED;
                }
                if m.refresh_complete {
                    f |= refresh_flags::REFRESH_COMPLETE;
                }
                if m.qos.is_some() {
                    f |= refresh_flags::HAS_QOS;
                }
                if m.clear_cache {
                    f |= refresh_flags::CLEAR_CACHE;
                }
                if m.do_not_cache {
                    f |= refresh_flags::DO_NOT_CACHE;
                }
                if m.private_stream {
                    f |= refresh_flags::PRIVATE_STREAM;
                }
                if m.post_user_info.is_some() {
                    f |= refresh_flags::HAS_POST_USER_INFO;
                }
                if m.part_num.is_some() {
                    f |= refresh_flags::HAS_PART_NUM;
                }
                if m.qualified_stream {
                    f |= refresh_flags::QUALIFIED_STREAM;
                }
                iter.write_u15rb(f)?;
                iter.write_u8(m.base.container_type.container_tag())?;
                if let Some(n) = m.seq_num {
                    iter.write_u32(n)?;
                }
                m.state.write_raw(iter.buf, &mut iter.pos)?;
                iter.write_buffer8(m.group_id)?;
                if let Some(perm) = m.perm_data {
                    iter.write_buffer15(perm)?;
                }
                if let Some(qos) = &m.qos {
                    qos.encode(iter)?;
                }
                if let Some(key) = &m.base.msg_key {
                    if encode_key(iter, key)? {
                        return Ok(true);
                    }
                }
                self.encode_post_key_sections(iter)?;
            }
            Msg::Update(m) => {
                let mut f = 0u16;
                if m.base.extended_header.is_some() {
                    f |= update_flags::HAS_EXTENDED_HEADER;
                }
                if m.perm_data.is_some() {
                    f |= update_flags::HAS_PERM_DATA;
                }
                if m.base.msg_key.is_some() {
                    f |= update_flags::HAS_MSG_KEY;
                }
                if m.seq_num.is_some() {
                    f |= update_flags::HAS_SEQ_NUM;
                }
                if m.conf_info.is_some() {
                    f |= update_flags::HAS_CONF_INFO;
                }
                if m.do_not_cache {
                    f |= update_flags::DO_NOT_CACHE;
                }
                if m.do_not_conflate {
                    f |= update_flags::DO_NOT_CONFLATE;
                }
                if m.do_not_ripple {
                    f |= update_flags::DO_NOT_RIPPLE;
                }
                if m.post_user_info.is_some() {
                    f |= update_flags::HAS_POST_USER_INFO;
                }
                if m.discardable {
                    f |= update_flags::DISCARDABLE;
                }
                iter.write_u15rb(f)?;
                iter.write_u8(m.base.container_type.container_tag())?;
                iter.write_u8(m.update_type)?;
                if let Some(n) = m.seq_num {
                    iter.write_u32(n)?;
                }
                if let Some((count, time)) = m.conf_info {
                    iter.write_u15rb(count)?;
                    iter.write_u16(time)?;
                }
                if let Some(perm) = m.perm_data {
                    iter.write_buffer15(perm)?;
                }
                if let Some(key) = &m.base.msg_key {
                    if encode_key(iter, key)? {
                        return Ok(true);
                    }
                }
                self.encode_post_key_sections(iter)?;
            }
            Msg::Status(m) => {
                let mut f = 0u16;
                if m.base.extended_header.is_some() {
                    f |= status_flags::HAS_EXTENDED_HEADER;
                }
                if m.perm_data.is_some() {
                    f |= status_flags::HAS_PERM_DATA;
                }
                if m.base.msg_key.is_some() {
                    f |= status_flags::HAS_MSG_KEY;
                }
                if m.group_id.is_some() {
                    f |= status_flags::HAS_GROUP_ID;
                }
                if m.state.is_some() {
                    f |= status_flags::HAS_STATE;
                }
                if m.clear_cache {
                    f |= status_flags::CLEAR_CACHE;
                }
                if m.private_stream {
                    f |= status_flags::PRIVATE_STREAM;
                }
                if m.post_user_info.is_some() {
                    f |= status_flags::HAS_POST_USER_INFO;
                }
                if m.qualified_stream {
                    f |= status_flags::QUALIFIED_STREAM;
                }
                iter.write_u15rb(f)?;
                iter.write_u8(m.base.container_type.container_tag())?;
                if let Some(state) = &m.state {
                    state.write_raw(iter.buf, &mut iter.pos)?;
                }
                if let Some(group) = m.group_id {
                    iter.write_buffer8(group)?;
                }
                if let Some(perm) = m.perm_data {
                    iter.write_buffer15(perm)?;
                }
                if let Some(key) = &m.base.msg_key {
                    if encode_key(iter, key)? {
                        return Ok(true);
                    }
                }
                self.encode_post_key_sections(iter)?;
            }
            Msg::Close(m) => {
                let mut f = 0u16;
                if m.base.extended_header.is_some() {
                    f |= close_flags::HAS_EXTENDED_HEADER;
                }
                if m.ack {
                    f |= close_flags::ACK;
                }
                iter.write_u15rb(f)?;
                iter.write_u8(m.base.container_type.container_tag())?;
                if let Some(ext) = m.base.extended_header {
                    iter.write_buffer8(ext)?;
                }
            }
            Msg::Ack(m) => {
                let mut f = 0u16;
                if m.base.extended_header.is_some() {
                    f |= ack_flags::HAS_EXTENDED_HEADER;
                }
                if m.text.is_some() {
                    f |= ack_flags::HAS_TEXT;
                }
                if m.private_stream {
                    f |= ack_flags::PRIVATE_STREAM;
                }
                if m.seq_num.is_some() {
                    f |= ack_flags::HAS_SEQ_NUM;
                }
                if m.base.msg_key.is_some() {
                    f |= ack_flags::HAS_MSG_KEY;
                }
                if m.nak_code.is_some() {
                    f |= ack_flags::HAS_NAK_CODE;
                }
                if m.qualified_stream {
                    f |= ack_flags::QUALIFIED_STREAM;
                }
                iter.write_u15rb(f)?;
                iter.write_u8(m.base.container_type.container_tag())?;
                iter.write_u32(m.ack_id)?;
                if let Some(nak) = m.nak_code {
                    iter.write_u8(nak)?;
                }
                if let Some(text) = m.text {
                    iter.write_buffer16(text)?;
                }
                if let Some(n) = m.seq_num {
                    iter.write_u32(n)?;
                }
                if let Some(key) = &m.base.msg_key {
                    if encode_key(iter, key)? {
                        return Ok(true);
                    }
                }
                self.encode_post_key_sections(iter)?;
            }
            Msg::Generic(m) => {
                let mut f = 0u16;
                if m.base.extended_header.is_some() {
                    f |= generic_flags::HAS_EXTENDED_HEADER;
                }
                if m.perm_data.is_some() {
                    f |= generic_flags::HAS_PERM_DATA;
                }
                if m.base.msg_key.is_some() {
                    f |= generic_flags::HAS_MSG_KEY;
                }
                if m.seq_num.is_some() {
                    f |= generic_flags::HAS_SEQ_NUM;
                }
                if m.message_complete {
                    f |= generic_flags::MESSAGE_COMPLETE;
                }
                if m.secondary_seq_num.is_some() {
                    f |= generic_flags::HAS_SECONDARY_SEQ_NUM;
                }
                if m.part_num.is_some() {
                    f |= generic_flags::HAS_PART_NUM;
                }
                iter.write_u15rb(f)?;
                iter.write_u8(m.base.container_type.container_tag())?;
                if let Some(n) = m.seq_num {
                    iter.write_u32(n)?;
                }
                if let Some(n) = m.secondary_seq_num {
                    iter.write_u32(n)?;
                }
                if let Some(perm) = m.perm_data {
                    iter.write_buffer15(perm)?;
                }
                if let Some(key) = &m.base.msg_key {
                    if encode_key(iter, key)? {
                        return Ok(true);
                    }
                }
                self.encode_post_key_sections(iter)?;
            }
            Msg::Post(m) => {
                let mut f = 0u16;
                if m.base.extended_header.is_some() {
                    f |= post_flags::HAS_EXTENDED_HEADER;
                }
                if m.post_id.is_some() {
                    f |= post_flags::HAS_POST_ID;
                }
                if m.base.msg_key.is_some() {
                    f |= post_flags::HAS_MSG_KEY;
                }
                if m.seq_num.is_some() {
                    f |= post_flags::HAS_SEQ_NUM;
                }
                if m.post_complete {
                    f |= post_flags::POST_COMPLETE;
                }
                if m.ack {
                    f |= post_flags::ACK;
                }
                if m.perm_data.is_some() {
                    f |= post_flags::HAS_PERM_DATA;
                }
                if m.part_num.is_some() {
                    f |= post_flags::HAS_PART_NUM;
                }
                if m.post_user_rights.is_some() {
                    f |= post_flags::HAS_POST_USER_RIGHTS;
                }
                iter.write_u15rb(f)?;
                iter.write_u8(m.base.container_type.container_tag())?;
                iter.write_u32(m.post_user_info.user_addr)?;
                iter.write_u32(m.post_user_info.user_id)?;
                if let Some(n) = m.seq_num {
                    iter.write_u32(n)?;
                }
                if let Some(id) = m.post_id {
                    iter.write_u32(id)?;
                }
                if let Some(perm) = m.perm_data {
                    iter.write_buffer15(perm)?;
                }
                if let Some(key) = &m.base.msg_key {
                    if encode_key(iter, key)? {
                        return Ok(true);
                    }
                }
                self.encode_post_key_sections(iter)?;
            }
        }
        Ok(false)
    }

    /// Header sections positioned after the message key.
    fn encode_post_key_sections(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        let ext = self.base().extended_header;
        match self {
            Msg::Request(_) | Msg::Close(_) | Msg::Ack(_) => {
                if let Some(ext) = ext {
                    iter.write_buffer8(ext)?;
                }
            }
            Msg::Refresh(m) => {
                if let Some(ext) = ext {
                    iter.write_buffer8(ext)?;
                }
                if let Some(info) = &m.post_user_info {
                    iter.write_u32(info.user_addr)?;
                    iter.write_u32(info.user_id)?;
                }
                if let Some(part) = m.part_num {
                    iter.write_u15rb(part)?;
                }
            }
            Msg::Update(m) => {
                if let Some(ext) = ext {
                    iter.write_buffer8(ext)?;
                }
                if let Some(info) = &m.post_user_info {
                    iter.write_u32(info.user_addr)?;
                    iter.write_u32(info.user_id)?;
                }
            }
            Msg::Status(m) => {
                if let Some(ext) = ext {
                    iter.write_buffer8(ext)?;
                }
                if let Some(info) = &m.post_user_info {
                    iter.write_u32(info.user_addr)?;
                    iter.write_u32(info.user_id)?;
                }
            }
            Msg::Generic(m) => {
                if let Some(ext) = ext {
                    iter.write_buffer8(ext)?;
                }
                if let Some(part) = m.part_num {
                    iter.write_u15rb(part)?;
                }
            }
            Msg::Post(m) => {
                if let Some(ext) = ext {
                    iter.write_buffer8(ext)?;
                }
                if let Some(part) = m.part_num {
                    iter.write_u15rb(part)?;
                }
                if let Some(rights) = m.post_user_rights {
                    iter.write_u15rb(rights)?;
                }
            }
        }
        Ok(())
    }

    // -- decode -----------------------------------------------------------

    /// Decode the envelope under the cursor. The iterator is left on the
    /// body span so the payload container can be decoded immediately.
    pub fn decode(iter: &mut DecodeIter<'a>) -> Result<Msg<'a>> {
        let start = iter.position();
        let body_end = iter.data_end;
        iter.push_level(DataType::Msg)?;

        let header_size = usize::from(iter.read_u16()?);
        let class_raw = iter.read_u8()? & 0x1F;
        let class =
            MsgClass::try_from(class_raw).map_err(|_| CodecError::UnsupportedType(class_raw))?;
        let domain_type = iter.read_u8()?;
        let stream_id = iter.read_i32()?;
        let header_end = start + 2 + header_size;
        if header_end > body_end {
            return Err(CodecError::Incomplete);
        }

        let mut base = MsgBase {
            domain_type,
            stream_id,
            container_type: DataType::NoData,
            msg_key: None,
            extended_header: None,
            payload: b"",
        };

        let msg = match class {
            MsgClass::Request => {
                let f = iter.read_u15rb()?;
                base.container_type = DataType::from_container_tag(iter.read_u8()?)?;
                let mut m = RequestMsg {
                    streaming: f & request_flags::STREAMING != 0,
                    no_refresh: f & request_flags::NO_REFRESH != 0,
                    msg_key_in_updates: f & request_flags::MSG_KEY_IN_UPDATES != 0,
                    conf_info_in_updates: f & request_flags::CONF_INFO_IN_UPDATES != 0,
                    pause: f & request_flags::PAUSE != 0,
                    private_stream: f & request_flags::PRIVATE_STREAM != 0,
                    qualified_stream: f & request_flags::QUALIFIED_STREAM != 0,
                    ..RequestMsg::default()
                };
                if f & request_flags::HAS_PRIORITY != 0 {
                    m.priority = Some(Priority {
                        class: iter.read_u8()?,
                        count: iter.read_u16ob()?,
                    });
                }
                if f & request_flags::HAS_QOS != 0 {
                    m.qos = Some(decode_qos_in_msg(iter)?);
                }
                if f & request_flags::HAS_WORST_QOS != 0 {
                    m.worst_qos = Some(decode_qos_in_msg(iter)?);
                }
                base.msg_key = Some(decode_key(iter)?);
                if f & request_flags::HAS_EXTENDED_HEADER != 0 {
                    base.extended_header = Some(iter.read_buffer8()?);
                }
                m.base = base;
                Msg::Request(m)
            }
            MsgClass::Refresh => {
                let f = iter.read_u15rb()?;
                base.container_type = DataType::from_container_tag(iter.read_u8()?)?;
                let mut m = RefreshMsg {
                    solicited: f & refresh_flags::SOLICITED != 0,
                    refresh_complete: f & refresh_flags::REFRESH_COMPLETE != 0,
                    clear_cache: f & refresh_flags::CLEAR_CACHE != 0,
                    do_not_cache: f & refresh_flags::DO_NOT_CACHE != 0,
                    private_stream: f & refresh_flags::PRIVATE_STREAM != 0,
                    qualified_stream: f & refresh_flags::QUALIFIED_STREAM != 0,
                    ..RefreshMsg::default()
                };
                if f & refresh_flags::HAS_SEQ_NUM != 0 {
                    m.seq_num = Some(iter.read_u32()?);
                }
                m.state = State::read_from(iter)?;
                m.group_id = iter.read_buffer8()?;
                if f & refresh_flags::HAS_PERM_DATA != 0 {
                    m.perm_data = Some(iter.read_buffer15()?);
                }
                if f & refresh_flags::HAS_QOS != 0 {
                    m.qos = Some(decode_qos_in_msg(iter)?);
                }
                if f & refresh_flags::HAS_MSG_KEY != 0 {
                    base.msg_key = Some(decode_key(iter)?);
                }
                if f & refresh_flags::HAS_EXTENDED_HEADER != 0 {
                    base.extended_header = Some(iter.read_buffer8()?);
                }
                if f & refresh_flags::HAS_POST_USER_INFO != 0 && iter.position() < header_end {
                    m.post_user_info = Some(PostUserInfo {
                        user_addr: iter.read_u32()?,
                        user_id: iter.read_u32()?,
                    });
                }
                if f & refresh_flags::HAS_PART_NUM != 0 && iter.position() < header_end {
                    m.part_num = Some(iter.read_u15rb()?);
                }
                m.base = base;
                Msg::Refresh(m)
            }
            MsgClass::Update => {
                let f = iter.read_u15rb()?;
                base.container_type = DataType::from_container_tag(iter.read_u8()?)?;
                let mut m = UpdateMsg {
                    do_not_cache: f & update_flags::DO_NOT_CACHE != 0,
                    do_not_conflate: f & update_flags::DO_NOT_CONFLATE != 0,
                    do_not_ripple: f & update_flags::DO_NOT_RIPPLE != 0,
                    discardable: f & update_flags::DISCARDABLE != 0,
                    ..UpdateMsg::default()
                };
                m.update_type = iter.read_u8()?;
                if f & update_flags::HAS_SEQ_NUM != 0 {
                    m.seq_num = Some(iter.read_u32()?);
                }
                if f & update_flags::HAS_CONF_INFO != 0 {
                    let count = iter.read_u15rb()?;
                    let time = iter.read_u16()?;
                    m.conf_info = Some((count, time));
                }
                if f & update_flags::HAS_PERM_DATA != 0 {
                    m.perm_data = Some(iter.read_buffer15()?);
                }
                if f & update_flags::HAS_MSG_KEY != 0 {
                    base.msg_key = Some(decode_key(iter)?);
                }
                if f & update_flags::HAS_EXTENDED_HEADER != 0 {
                    base.extended_header = Some(iter.read_buffer8()?);
                }
                if f & update_flags::HAS_POST_USER_INFO != 0 && iter.position() < header_end {
                    m.post_user_info = Some(PostUserInfo {
                        user_addr: iter.read_u32()?,
                        user_id: iter.read_u32()?,
                    });
                }
                m.base = base;
                Msg::Update(m)
            }
            MsgClass::Status => {
                let f = iter.read_u15rb()?;
                base.container_type = DataType::from_container_tag(iter.read_u8()?)?;
                let mut m = StatusMsg {
                    clear_cache: f & status_flags::CLEAR_CACHE != 0,
                    private_stream: f & status_flags::PRIVATE_STREAM != 0,
                    qualified_stream: f & status_flags::QUALIFIED_STREAM != 0,
                    ..StatusMsg::default()
                };
                if f & status_flags::HAS_STATE != 0 {
                    m.state = Some(State::read_from(iter)?);
                }
                if f & status_flags::HAS_GROUP_ID != 0 {
                    m.group_id = Some(iter.read_buffer8()?);
                }
                if f & status_flags::HAS_PERM_DATA != 0 {
                    m.perm_data = Some(iter.read_buffer15()?);
                }
                if f & status_flags::HAS_MSG_KEY != 0 {
                    base.msg_key = Some(decode_key(iter)?);
                }
                if f & status_flags::HAS_EXTENDED_HEADER != 0 {
                    base.extended_header = Some(iter.read_buffer8()?);
                }
                if f & status_flags::HAS_POST_USER_INFO != 0 && iter.position() < header_end {
                    m.post_user_info = Some(PostUserInfo {
                        user_addr: iter.read_u32()?,
                        user_id: iter.read_u32()?,
                    });
                }
                m.base = base;
                Msg::Status(m)
            }
            MsgClass::Close => {
                let f = iter.read_u15rb()?;
                base.container_type = DataType::from_container_tag(iter.read_u8()?)?;
                let mut m = CloseMsg {
                    ack: f & close_flags::ACK != 0,
                    ..CloseMsg::default()
                };
                if f & close_flags::HAS_EXTENDED_HEADER != 0 {
                    base.extended_header = Some(iter.read_buffer8()?);
                }
                m.base = base;
                Msg::Close(m)
            }
            MsgClass::Ack => {
                let f = iter.read_u15rb()?;
                base.container_type = DataType::from_container_tag(iter.read_u8()?)?;
                let mut m = AckMsg {
                    private_stream: f & ack_flags::PRIVATE_STREAM != 0,
                    qualified_stream: f & ack_flags::QUALIFIED_STREAM != 0,
                    ..AckMsg::default()
                };
                m.ack_id = iter.read_u32()?;
                if f & ack_flags::HAS_NAK_CODE != 0 {
                    m.nak_code = Some(iter.read_u8()?);
                }
                if f & ack_flags::HAS_TEXT != 0 {
                    m.text = Some(iter.read_buffer16()?);
                }
                if f & ack_flags::HAS_SEQ_NUM != 0 {
                    m.seq_num = Some(iter.read_u32()?);
                }
                if f & ack_flags::HAS_MSG_KEY != 0 {
                    base.msg_key = Some(decode_key(iter)?);
                }
                if f & ack_flags::HAS_EXTENDED_HEADER != 0 {
                    base.extended_header = Some(iter.read_buffer8()?);
                }
                m.base = base;
                Msg::Ack(m)
            }
            MsgClass::Generic => {
                let f = iter.read_u15rb()?;
                base.container_type = DataType::from_container_tag(iter.read_u8()?)?;
                let mut m = GenericMsg {
                    message_complete: f & generic_flags::MESSAGE_COMPLETE != 0,
                    ..GenericMsg::default()
                };
                if f & generic_flags::HAS_SEQ_NUM != 0 {
                    m.seq_num = Some(iter.read_u32()?);
                }
                if f & generic_flags::HAS_SECONDARY_SEQ_NUM != 0 {
                    m.secondary_seq_num = Some(iter.read_u32()?);
                }
                if f & generic_flags::HAS_PERM_DATA != 0 {
                    m.perm_data = Some(iter.read_buffer15()?);
                }
                if f & generic_flags::HAS_MSG_KEY != 0 {
                    base.msg_key = Some(decode_key(iter)?);
                }
                if f & generic_flags::HAS_EXTENDED_HEADER != 0 {
                    base.extended_header = Some(iter.read_buffer8()?);
                }
                if f & generic_flags::HAS_PART_NUM != 0 && iter.position() < header_end {
                    m.part_num = Some(iter.read_u15rb()?);
                }
                m.base = base;
                Msg::Generic(m)
            }
            MsgClass::Post => {
                let f = iter.read_u15rb()?;
                base.container_type = DataType::from_container_tag(iter.read_u8()?)?;
                let mut m = PostMsg {
                    post_complete: f & post_flags::POST_COMPLETE != 0,
                    ack: f & post_flags::ACK != 0,
                    ..PostMsg::default()
                };
                m.post_user_info = PostUserInfo {
                    user_addr: iter.read_u32()?,
                    user_id: iter.read_u32()?,
                };
                if f & post_flags::HAS_SEQ_NUM != 0 {
                    m.seq_num = Some(iter.read_u32()?);
                }
                if f & post_flags::HAS_POST_ID != 0 {
                    m.post_id = Some(iter.read_u32()?);
                }
                if f & post_flags::HAS_PERM_DATA != 0 {
                    m.perm_data = Some(iter.read_buffer15()?);
                }
                if f & post_flags::HAS_MSG_KEY != 0 {
                    base.msg_key = Some(decode_key(iter)?);
                }
                if f & post_flags::HAS_EXTENDED_HEADER != 0 {
                    base.extended_header = Some(iter.read_buffer8()?);
                }
                if f & post_flags::HAS_PART_NUM != 0 && iter.position() < header_end {
                    m.part_num = Some(iter.read_u15rb()?);
                }
                if f & post_flags::HAS_POST_USER_RIGHTS != 0 && iter.position() < header_end {
                    m.post_user_rights = Some(iter.read_u15rb()?);
                }
                m.base = base;
                Msg::Post(m)
            }
        };

        // jump to the end of the declared header and expose the body
        if iter.position() > header_end {
            return Err(CodecError::Incomplete);
        }
        let buf = iter.buf;
        let payload = &buf[header_end..body_end];
        let msg = with_payload(msg, payload);
        if payload.is_empty() {
            iter.set_datum(header_end, body_end);
            iter.end_of_container();
        } else {
            iter.set_datum(header_end, body_end);
        }
        Ok(msg)
    }

    /// Copy this message into owned storage; the copy shares no bytes with
    /// the buffer it was decoded from.
    pub fn deep_copy(&self) -> Result<OwnedMsg> {
        let mut cap = 256 + self.base().payload.len();
        loop {
            let mut storage = vec![0u8; cap];
            let mut enc = EncodeIter::new(&mut storage, crate::types::WireVersion::CURRENT);
            match self.encode(&mut enc) {
                Ok(()) => {
                    let len = enc.position();
                    storage.truncate(len);
                    return Ok(OwnedMsg { bytes: storage });
                }
                Err(CodecError::BufferTooSmall) => cap *= 2,
                Err(e) => return Err(e),
            }
        }
    }
}

fn with_payload<'a>(msg: Msg<'a>, payload: &'a [u8]) -> Msg<'a> {
    let mut msg = msg;
    match &mut msg {
        Msg::Request(m) => m.base.payload = payload,
        Msg::Refresh(m) => m.base.payload = payload,
        Msg::Status(m) => m.base.payload = payload,
        Msg::Update(m) => m.base.payload = payload,
        Msg::Close(m) => m.base.payload = payload,
        Msg::Ack(m) => m.base.payload = payload,
        Msg::Generic(m) => m.base.payload = payload,
        Msg::Post(m) => m.base.payload = payload,
    }
    msg
}

/// A deep-copied message backed by its own storage.
#[derive(Debug, Clone)]
pub struct OwnedMsg {
    bytes: Vec<u8>,
}

impl OwnedMsg {
    /// The full encoded form of the copied message.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Decode a view of the copy.
    pub fn msg(&self) -> Result<Msg<'_>> {
        let mut iter = DecodeIter::new(&self.bytes, crate::types::WireVersion::CURRENT);
        Msg::decode(&mut iter)
    }
}

/// Qos inside a message header is not length-delimited; it reads its own
/// conditional fields.
fn decode_qos_in_msg(iter: &mut DecodeIter<'_>) -> Result<Qos> {
    use crate::types::{QosRate, QosTimeliness};
    let b = iter.read_u8()?;
    let timeliness =
        QosTimeliness::try_from(b >> 5).map_err(|_| CodecError::InvalidData("qos timeliness"))?;
    let rate =
        QosRate::try_from((b >> 1) & 0x0F).map_err(|_| CodecError::InvalidData("qos rate"))?;
    let mut qos = Qos {
        timeliness,
        rate,
        dynamic: b & 0x01 != 0,
        time_info: 0,
        rate_info: 0,
    };
    if timeliness > QosTimeliness::DelayedUnknown {
        qos.time_info = iter.read_u16()?;
    }
    if rate > QosRate::JitConflated {
        qos.rate_info = iter.read_u16()?;
    }
    Ok(qos)
}

/// Encode the size-prefixed message key. Returns true when encoding paused
/// for a pending attribute block (marks stored on the message frame).
fn encode_key(iter: &mut EncodeIter<'_>, key: &MsgKey<'_>) -> Result<bool> {
    if key.name.is_none() && key.name_type.is_some() {
        return Err(CodecError::InvalidData("name type requires a name"));
    }
    let two_phase = key
        .attrib
        .as_ref()
        .is_some_and(|a| a.container_type != DataType::NoData && a.data.is_empty());

    if !two_phase {
        let len = key.encoded_len();
        if len > 0x7FFF {
            return Err(CodecError::OutOfRange("message key longer than 0x7FFF"));
        }
        iter.write_u15rb(len as u16)?;
        write_key_body(iter, key)?;
        if let Some(attrib) = &key.attrib {
            iter.write_u8(attrib.container_type.container_tag())?;
            if attrib.container_type != DataType::NoData {
                iter.write_buffer15(attrib.data)?;
            }
        }
        return Ok(false);
    }

    let key_mark = iter.position();
    iter.write_u15rb_long(0)?;
    write_key_body(iter, key)?;
    let attrib = key.attrib.as_ref().expect("pending attrib");
    iter.write_u8(attrib.container_type.container_tag())?;
    let attrib_mark = iter.position();
    iter.write_u15rb_long(0)?;
    let level = iter.level_mut();
    level.aux_mark = Some(key_mark);
    level.size_mark = Some(attrib_mark);
    Ok(true)
}

/// Key fields other than the trailing attribute block.
fn write_key_body(iter: &mut EncodeIter<'_>, key: &MsgKey<'_>) -> Result<()> {
    iter.write_u15rb(key.flag_bits())?;
    if let Some(id) = key.service_id {
        iter.write_u16ob(id)?;
    }
    if let Some(name) = key.name {
        iter.write_buffer8(name)?;
        if let Some(nt) = key.name_type {
            iter.write_u8(nt)?;
        }
    }
    if let Some(filter) = key.filter {
        iter.write_u32(filter)?;
    }
    if let Some(id) = key.identifier {
        iter.write_i32(id)?;
    }
    Ok(())
}

/// Decode the size-prefixed message key; the cursor lands after the
/// declared key size regardless of its contents.
fn decode_key<'a>(iter: &mut DecodeIter<'a>) -> Result<MsgKey<'a>> {
    let key_size = usize::from(iter.read_u15rb()?);
    let key_start = iter.position();

    let f = iter.read_u15rb()?;
    let mut key = MsgKey::default();
    if f & key_flags::HAS_SERVICE_ID != 0 {
        key.service_id = Some(iter.read_u16ob()?);
    }
    if f & key_flags::HAS_NAME != 0 {
        key.name = Some(iter.read_buffer8()?);
        if f & key_flags::HAS_NAME_TYPE != 0 {
            key.name_type = Some(iter.read_u8()?);
        }
    }
    if f & key_flags::HAS_FILTER != 0 {
        key.filter = Some(iter.read_u32()?);
    }
    if f & key_flags::HAS_IDENTIFIER != 0 {
        key.identifier = Some(iter.read_i32()?);
    }
    if f & key_flags::HAS_ATTRIB != 0 {
        let container_type = DataType::from_container_tag(iter.read_u8()?)?;
        let data: &[u8] = if container_type != DataType::NoData {
            iter.read_buffer15()?
        } else {
            b""
        };
        let end = iter.position();
        key.attrib = Some(MsgKeyAttrib {
            container_type,
            data,
            range: (end - data.len(), end),
        });
    }
    iter.pos = key_start + key_size;
    Ok(key)
}

/// Re-aim the iterator at the key's attribute block. When the attribute
/// container finishes decoding, the iterator returns to the message body on
/// its own.
pub fn decode_msg_key_attrib<'a>(iter: &mut DecodeIter<'a>, key: &MsgKey<'a>) -> Result<()> {
    let attrib = key
        .attrib
        .as_ref()
        .ok_or(CodecError::InvalidData("key has no attribute block"))?;
    let (start, end) = attrib.range;
    if end > iter.buf.len() || start > end {
        return Err(CodecError::InvalidData("attribute block out of range"));
    }
    iter.push_bookmark(iter.pos, iter.data_end)?;
    iter.set_datum(start, end);
    Ok(())
}
