//! Map container.
//!
//! Keyed entries with per-entry actions (`Add`/`Update`/`Delete`). Keys are
//! a declared primitive type; payloads are a declared container type. The
//! header can carry local set definitions (for the nested payloads), summary
//! data, and a total-count hint for receivers that preallocate.
//!
//! Summary data sits before the entries on the wire. `decode_init` leaves
//! the cursor on the summary span so a caller may decode it in place, but
//! entry decoding never requires that: the first `decode_entry` call
//! resynchronizes off the header bookkeeping either way.

use crate::error::{CodecError, Result};
use crate::iter::{DecodeIter, EncPhase, EncodeIter};
use crate::primitive::{decode_from_span, EncodeValue, Primitive};
use crate::types::{DataType, Decoded, InitOutcome, MapEntryAction};

mod flags {
    pub const HAS_SET_DEFS: u8 = 0x01;
    pub const HAS_SUMMARY_DATA: u8 = 0x02;
    pub const HAS_PER_ENTRY_PERM_DATA: u8 = 0x04;
    pub const HAS_TOTAL_COUNT_HINT: u8 = 0x08;
    pub const HAS_KEY_FIELD_ID: u8 = 0x10;
}

mod entry_flags {
    pub const HAS_PERM_DATA: u8 = 0x01;
}

/// Map header.
///
/// On decode, `set_defs` and `summary` expose the raw spans for the optional
/// sections; feed `set_defs` to a set-definition database decoder when the
/// payload container uses set data.
#[derive(Debug, Clone, Default)]
pub struct Map<'a> {
    pub key_primitive_type: DataType,
    pub container_type: DataType,
    pub key_field_id: Option<i16>,
    pub total_count_hint: Option<u32>,
    pub set_defs: Option<&'a [u8]>,
    pub summary: Option<&'a [u8]>,
    per_entry_perm_data: bool,
    has_set_defs: bool,
    has_summary: bool,
}

impl<'a> Map<'a> {
    pub fn new(key_primitive_type: DataType, container_type: DataType) -> Self {
        Map {
            key_primitive_type,
            container_type,
            ..Map::default()
        }
    }

    pub fn key_field_id(mut self, field_id: i16) -> Self {
        self.key_field_id = Some(field_id);
        self
    }

    pub fn total_count_hint(mut self, hint: u32) -> Self {
        self.total_count_hint = Some(hint);
        self
    }

    pub fn per_entry_perm_data(mut self) -> Self {
        self.per_entry_perm_data = true;
        self
    }

    /// Announce a set-definitions section; encode it between `encode_init`
    /// and [`Map::encode_set_defs_complete`].
    pub fn with_set_defs(mut self) -> Self {
        self.has_set_defs = true;
        self
    }

    /// Announce a summary-data section; encode it after the set definitions
    /// (if any) and close it with [`Map::encode_summary_complete`].
    pub fn with_summary(mut self) -> Self {
        self.has_summary = true;
        self
    }

    pub fn has_per_entry_perm_data(&self) -> bool {
        self.per_entry_perm_data
    }

    pub fn has_summary(&self) -> bool {
        self.has_summary
    }

    pub fn has_set_defs(&self) -> bool {
        self.has_set_defs
    }

    fn flag_byte(&self) -> u8 {
        let mut b = 0;
        if self.has_set_defs {
            b |= flags::HAS_SET_DEFS;
        }
        if self.has_summary {
            b |= flags::HAS_SUMMARY_DATA;
        }
        if self.per_entry_perm_data {
            b |= flags::HAS_PER_ENTRY_PERM_DATA;
        }
        if self.total_count_hint.is_some() {
            b |= flags::HAS_TOTAL_COUNT_HINT;
        }
        if self.key_field_id.is_some() {
            b |= flags::HAS_KEY_FIELD_ID;
        }
        b
    }

    pub fn encode_init(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        if !self.container_type.is_container() {
            return Err(CodecError::InvalidData("map payload type is not a container"));
        }
        let phase = if self.has_set_defs {
            EncPhase::SetDefsPending
        } else if self.has_summary {
            EncPhase::SummaryPending
        } else {
            EncPhase::Entries
        };
        iter.push_level(DataType::Map, phase)?;
        iter.write_u8(self.flag_byte())?;
        iter.write_u8(self.key_primitive_type.into())?;
        iter.write_u8(self.container_type.container_tag())?;
        if let Some(fid) = self.key_field_id {
            iter.write_i16(fid)?;
        }
        if self.has_set_defs || self.has_summary {
            let mark = iter.position();
            iter.write_u15rb_long(0)?;
            iter.level_mut().size_mark = Some(mark);
        }
        if phase == EncPhase::Entries {
            self.finish_header(iter)?;
        }
        Ok(())
    }

    /// Close the set-definitions section opened by `encode_init`.
    pub fn encode_set_defs_complete(&self, iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        iter.expect_phase(DataType::Map, EncPhase::SetDefsPending);
        let mark = iter.level().size_mark.expect("set defs mark");
        if !success {
            iter.pos = mark + 2;
        }
        let len = iter.position() - (mark + 2);
        if len > 0x7FFF {
            return Err(CodecError::OutOfRange("set definitions longer than 0x7FFF"));
        }
        iter.patch_u15rb_long(mark, len as u16)?;
        if self.has_summary {
            let mark = iter.position();
            iter.write_u15rb_long(0)?;
            let level = iter.level_mut();
            level.size_mark = Some(mark);
            level.phase = EncPhase::SummaryPending;
        } else {
            iter.level_mut().size_mark = None;
            iter.level_mut().phase = EncPhase::Entries;
            self.finish_header(iter)?;
        }
        Ok(())
    }

    /// Close the summary-data section.
    pub fn encode_summary_complete(&self, iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        iter.expect_phase(DataType::Map, EncPhase::SummaryPending);
        let mark = iter.level().size_mark.expect("summary mark");
        if !success {
            iter.pos = mark + 2;
        }
        let len = iter.position() - (mark + 2);
        if len > 0x7FFF {
            return Err(CodecError::OutOfRange("summary data longer than 0x7FFF"));
        }
        iter.patch_u15rb_long(mark, len as u16)?;
        iter.level_mut().size_mark = None;
        iter.level_mut().phase = EncPhase::Entries;
        self.finish_header(iter)
    }

    fn finish_header(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        if let Some(hint) = self.total_count_hint {
            iter.write_u30rb(hint)?;
        }
        let mark = iter.position();
        iter.write_u16(0)?;
        iter.level_mut().count_mark = Some(mark);
        Ok(())
    }

    pub fn encode_complete(iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        iter.expect_phase(DataType::Map, EncPhase::Entries);
        let level = iter.pop_level();
        if !success {
            iter.pos = level.start_pos;
            return Ok(());
        }
        iter.patch_u16(level.count_mark.expect("count mark"), level.count);
        Ok(())
    }

    /// Encode an entry whose payload is already encoded (or absent).
    /// `Delete` entries must pass an empty payload.
    pub fn encode_entry<K: EncodeValue>(
        &self,
        iter: &mut EncodeIter<'_>,
        action: MapEntryAction,
        key: &K,
        perm_data: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<()> {
        self.encode_entry_header(iter, action, key, perm_data)?;
        if action == MapEntryAction::Delete || self.container_type == DataType::NoData {
            if !payload.is_empty() {
                return Err(CodecError::InvalidData("payload on a delete entry"));
            }
        } else {
            iter.write_buffer16(payload)?;
        }
        iter.level_mut().count += 1;
        Ok(())
    }

    /// Open an entry for an in-place payload; pair with
    /// [`Map::encode_entry_complete`]. Not valid for `Delete` entries.
    pub fn encode_entry_init<K: EncodeValue>(
        &self,
        iter: &mut EncodeIter<'_>,
        action: MapEntryAction,
        key: &K,
        perm_data: Option<&[u8]>,
    ) -> Result<()> {
        assert!(
            action != MapEntryAction::Delete && self.container_type != DataType::NoData,
            "no payload to open on this entry"
        );
        let entry_start = iter.position();
        self.encode_entry_header(iter, action, key, perm_data)?;
        let mark = iter.position();
        iter.write_u16ob_long(0)?;
        let level = iter.level_mut();
        level.phase = EncPhase::EntryOpen;
        level.entry_mark = Some(mark);
        level.entry_start = entry_start;
        Ok(())
    }

    pub fn encode_entry_complete(iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        entry_complete(iter, DataType::Map, success)
    }

    fn encode_entry_header<K: EncodeValue>(
        &self,
        iter: &mut EncodeIter<'_>,
        action: MapEntryAction,
        key: &K,
        perm_data: Option<&[u8]>,
    ) -> Result<()> {
        iter.expect_phase(DataType::Map, EncPhase::Entries);
        debug_assert!(
            key_types_compatible(K::DATA_TYPE, self.key_primitive_type),
            "key value type {:?} does not match declared {:?}",
            K::DATA_TYPE,
            self.key_primitive_type,
        );
        let mut eflags = 0u8;
        if perm_data.is_some() {
            if !self.per_entry_perm_data {
                return Err(CodecError::InvalidData(
                    "perm data on a map without per-entry permissions",
                ));
            }
            eflags |= entry_flags::HAS_PERM_DATA;
        }
        iter.write_u8((eflags << 4) | u8::from(action))?;
        if let Some(perm) = perm_data {
            iter.write_buffer15(perm)?;
        }
        let key_len = key.encoded_len();
        if key_len > 0x7FFF {
            return Err(CodecError::OutOfRange("key longer than 0x7FFF"));
        }
        iter.write_u15rb(key_len as u16)?;
        key.write_raw(iter.buf, &mut iter.pos)?;
        Ok(())
    }

    /// Decode the next entry, or `None` at the end of the container.
    pub fn decode_entry(&self, iter: &mut DecodeIter<'a>) -> Result<Option<MapEntry<'a>>> {
        {
            let level = iter.level();
            debug_assert_eq!(level.container, DataType::Map);
            if level.next_item >= level.item_count {
                iter.end_of_container();
                return Ok(None);
            }
        }
        let (entry_pos, end_pos) = {
            let level = iter.level();
            (level.next_entry_pos, level.end_pos)
        };
        iter.set_datum(entry_pos, end_pos);

        let b = iter.read_u8()?;
        let action = MapEntryAction::try_from(b & 0x0F)
            .map_err(|_| CodecError::InvalidData("map entry action"))?;
        let eflags = b >> 4;
        let perm_data = if self.per_entry_perm_data && eflags & entry_flags::HAS_PERM_DATA != 0 {
            Some(iter.read_buffer15()?)
        } else {
            None
        };
        let key = iter.read_buffer15()?;
        let data: &[u8] =
            if action == MapEntryAction::Delete || self.container_type == DataType::NoData {
                b""
            } else {
                iter.read_buffer16()?
            };
        let after = iter.position();
        if after > end_pos {
            return Err(CodecError::Incomplete);
        }
        let level = iter.level_mut();
        level.next_item += 1;
        level.next_entry_pos = after;
        iter.set_datum(after - data.len(), after);
        Ok(Some(MapEntry {
            action,
            perm_data,
            key,
            data,
        }))
    }

    pub fn decode_init(&mut self, iter: &mut DecodeIter<'a>) -> Result<InitOutcome> {
        self.key_field_id = None;
        self.total_count_hint = None;
        self.set_defs = None;
        self.summary = None;

        let data_len = iter.data_len();
        iter.push_level(DataType::Map)?;
        if data_len == 0 {
            iter.end_of_container();
            return Ok(InitOutcome::NoEntries);
        }
        if data_len < 5 {
            return Err(CodecError::Incomplete);
        }
        let end_pos = iter.level().end_pos;

        let flag_byte = iter.read_u8()?;
        self.per_entry_perm_data = flag_byte & flags::HAS_PER_ENTRY_PERM_DATA != 0;
        self.has_set_defs = flag_byte & flags::HAS_SET_DEFS != 0;
        self.has_summary = flag_byte & flags::HAS_SUMMARY_DATA != 0;

        let raw_key = iter.read_u8()?;
        self.key_primitive_type = DataType::try_from(raw_key)
            .map_err(|_| CodecError::UnsupportedType(raw_key))?
            .base_primitive();
        self.container_type = DataType::from_container_tag(iter.read_u8()?)?;

        if flag_byte & flags::HAS_KEY_FIELD_ID != 0 {
            self.key_field_id = Some(iter.read_i16()?);
        }
        if self.has_set_defs {
            self.set_defs = Some(iter.read_buffer15()?);
        }
        let mut summary_span = None;
        if self.has_summary {
            let span = iter.read_buffer15()?;
            let end = iter.position();
            summary_span = Some((end - span.len(), end));
            self.summary = Some(span);
        }
        if flag_byte & flags::HAS_TOTAL_COUNT_HINT != 0 {
            self.total_count_hint = Some(iter.read_u30rb()?);
        }
        let item_count = iter.read_u16()?;
        let entries_start = iter.position();
        if entries_start > end_pos {
            return Err(CodecError::Incomplete);
        }
        let level = iter.level_mut();
        level.item_count = item_count;
        level.next_entry_pos = entries_start;
        level.standard_entries_pos = entries_start;
        if let Some((start, end)) = summary_span {
            iter.set_datum(start, end);
        }
        Ok(InitOutcome::Ready)
    }
}

/// One keyed entry. `key` is the encoded key span; use
/// [`MapEntry::decode_key`] to interpret it. `Delete` entries carry no
/// payload and decode with an empty span, which every payload decoder in
/// this crate reports as "no data" rather than an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapEntry<'a> {
    pub action: MapEntryAction,
    pub perm_data: Option<&'a [u8]>,
    pub key: &'a [u8],
    pub data: &'a [u8],
}

impl<'a> MapEntry<'a> {
    pub fn decode_key<T: Primitive>(&self) -> Result<Decoded<T>> {
        decode_from_span(self.key)
    }
}

pub(crate) fn entry_complete(
    iter: &mut EncodeIter<'_>,
    container: DataType,
    success: bool,
) -> Result<()> {
    iter.expect_phase(container, EncPhase::EntryOpen);
    let (mark, entry_start) = {
        let level = iter.level();
        (level.entry_mark.expect("entry mark"), level.entry_start)
    };
    if success {
        let len = iter.position() - (mark + 3);
        if len > usize::from(u16::MAX) {
            return Err(CodecError::OutOfRange("entry longer than 0xFFFF"));
        }
        iter.patch_u16ob_long(mark, len as u16);
        let level = iter.level_mut();
        level.count += 1;
        level.phase = EncPhase::Entries;
        level.entry_mark = None;
    } else {
        iter.pos = entry_start;
        let level = iter.level_mut();
        level.phase = EncPhase::Entries;
        level.entry_mark = None;
    }
    Ok(())
}

fn key_types_compatible(value: DataType, declared: DataType) -> bool {
    let bufferish = |t: DataType| {
        matches!(
            t,
            DataType::Buffer | DataType::AsciiString | DataType::Utf8String | DataType::RmtesString
        )
    };
    value.base_primitive() == declared.base_primitive() || (bufferish(value) && bufferish(declared))
}
