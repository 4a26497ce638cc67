//! Filter list container.
//!
//! A small list of independently updatable sections identified by a filter
//! id bit; directory and symbol-list payloads use it so consumers can
//! subscribe to a subset of sections. Entries may override the list's
//! container type. `Clear` entries carry no payload.

use crate::error::{CodecError, Result};
use crate::iter::{DecodeIter, EncPhase, EncodeIter};
use crate::map::entry_complete;
use crate::types::{DataType, FilterEntryAction, InitOutcome};

mod flags {
    pub const HAS_PER_ENTRY_PERM_DATA: u8 = 0x01;
    pub const HAS_TOTAL_COUNT_HINT: u8 = 0x02;
}

mod entry_flags {
    pub const HAS_PERM_DATA: u8 = 0x01;
    pub const HAS_CONTAINER_TYPE: u8 = 0x02;
}

/// Filter list header.
#[derive(Debug, Clone, Default)]
pub struct FilterList {
    pub container_type: DataType,
    pub total_count_hint: Option<u8>,
    per_entry_perm_data: bool,
}

impl FilterList {
    pub fn new(container_type: DataType) -> Self {
        FilterList {
            container_type,
            ..FilterList::default()
        }
    }

    pub fn total_count_hint(mut self, hint: u8) -> Self {
        self.total_count_hint = Some(hint);
        self
    }

    pub fn per_entry_perm_data(mut self) -> Self {
        self.per_entry_perm_data = true;
        self
    }

    pub fn encode_init(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        if !self.container_type.is_container() {
            return Err(CodecError::InvalidData(
                "filter list payload type is not a container",
            ));
        }
        iter.push_level(DataType::FilterList, EncPhase::Entries)?;
        let mut flag_byte = 0u8;
        if self.per_entry_perm_data {
            flag_byte |= flags::HAS_PER_ENTRY_PERM_DATA;
        }
        if self.total_count_hint.is_some() {
            flag_byte |= flags::HAS_TOTAL_COUNT_HINT;
        }
        iter.write_u8(flag_byte)?;
        iter.write_u8(self.container_type.container_tag())?;
        if let Some(hint) = self.total_count_hint {
            iter.write_u8(hint)?;
        }
        let mark = iter.position();
        iter.write_u8(0)?;
        iter.level_mut().count_mark = Some(mark);
        Ok(())
    }

    pub fn encode_complete(iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        iter.expect_phase(DataType::FilterList, EncPhase::Entries);
        let level = iter.pop_level();
        if !success {
            iter.pos = level.start_pos;
            return Ok(());
        }
        if level.count > usize::from(u8::MAX) as u16 {
            return Err(CodecError::OutOfRange("more than 255 filter entries"));
        }
        iter.patch_u8(level.count_mark.expect("count mark"), level.count as u8);
        Ok(())
    }

    pub fn encode_entry(
        &self,
        iter: &mut EncodeIter<'_>,
        entry: &FilterEntryHeader,
        payload: &[u8],
    ) -> Result<()> {
        self.encode_entry_header(iter, entry)?;
        if self.entry_has_payload(entry) {
            iter.write_buffer16(payload)?;
        } else if !payload.is_empty() {
            return Err(CodecError::InvalidData("payload on a clear entry"));
        }
        iter.level_mut().count += 1;
        Ok(())
    }

    pub fn encode_entry_init(
        &self,
        iter: &mut EncodeIter<'_>,
        entry: &FilterEntryHeader,
    ) -> Result<()> {
        assert!(
            self.entry_has_payload(entry),
            "no payload to open on this entry"
        );
        let entry_start = iter.position();
        self.encode_entry_header(iter, entry)?;
        let mark = iter.position();
        iter.write_u16ob_long(0)?;
        let level = iter.level_mut();
        level.phase = EncPhase::EntryOpen;
        level.entry_mark = Some(mark);
        level.entry_start = entry_start;
        Ok(())
    }

    pub fn encode_entry_complete(iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        entry_complete(iter, DataType::FilterList, success)
    }

    fn entry_has_payload(&self, entry: &FilterEntryHeader) -> bool {
        let container = entry.container_type.unwrap_or(self.container_type);
        entry.action != FilterEntryAction::Clear && container != DataType::NoData
    }

    fn encode_entry_header(
        &self,
        iter: &mut EncodeIter<'_>,
        entry: &FilterEntryHeader,
    ) -> Result<()> {
        iter.expect_phase(DataType::FilterList, EncPhase::Entries);
        let mut eflags = 0u8;
        if entry.perm_data.is_some() {
            if !self.per_entry_perm_data {
                return Err(CodecError::InvalidData(
                    "perm data on a filter list without per-entry permissions",
                ));
            }
            eflags |= entry_flags::HAS_PERM_DATA;
        }
        if entry.container_type.is_some() {
            eflags |= entry_flags::HAS_CONTAINER_TYPE;
        }
        iter.write_u8((eflags << 4) | u8::from(entry.action))?;
        iter.write_u8(entry.id)?;
        if let Some(container) = entry.container_type {
            if !container.is_container() {
                return Err(CodecError::InvalidData(
                    "filter entry payload type is not a container",
                ));
            }
            iter.write_u8(container.container_tag())?;
        }
        if let Some(perm) = entry.perm_data {
            iter.write_buffer15(perm)?;
        }
        Ok(())
    }

    pub fn decode_entry<'a>(&self, iter: &mut DecodeIter<'a>) -> Result<Option<FilterEntry<'a>>> {
        {
            let level = iter.level();
            debug_assert_eq!(level.container, DataType::FilterList);
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
        let action = FilterEntryAction::try_from(b & 0x0F)
            .map_err(|_| CodecError::InvalidData("filter entry action"))?;
        let eflags = b >> 4;
        let id = iter.read_u8()?;
        let container_type = if eflags & entry_flags::HAS_CONTAINER_TYPE != 0 {
            DataType::from_container_tag(iter.read_u8()?)?
        } else {
            self.container_type
        };
        let perm_data = if self.per_entry_perm_data && eflags & entry_flags::HAS_PERM_DATA != 0 {
            Some(iter.read_buffer15()?)
        } else {
            None
        };
        let data: &[u8] =
            if container_type != DataType::NoData && action != FilterEntryAction::Clear {
                iter.read_buffer16()?
            } else {
                b""
            };
        let after = iter.position();
        if after > end_pos {
            return Err(CodecError::Incomplete);
        }
        let level = iter.level_mut();
        level.next_item += 1;
        level.next_entry_pos = after;
        iter.set_datum(after - data.len(), after);
        Ok(Some(FilterEntry {
            action,
            id,
            container_type,
            perm_data,
            data,
        }))
    }

    pub fn decode_init(&mut self, iter: &mut DecodeIter<'_>) -> Result<InitOutcome> {
        self.total_count_hint = None;

        let data_len = iter.data_len();
        iter.push_level(DataType::FilterList)?;
        if data_len == 0 {
            iter.end_of_container();
            return Ok(InitOutcome::NoEntries);
        }
        if data_len < 3 {
            return Err(CodecError::Incomplete);
        }
        let end_pos = iter.level().end_pos;

        let flag_byte = iter.read_u8()?;
        self.per_entry_perm_data = flag_byte & flags::HAS_PER_ENTRY_PERM_DATA != 0;
        self.container_type = DataType::from_container_tag(iter.read_u8()?)?;
        if flag_byte & flags::HAS_TOTAL_COUNT_HINT != 0 {
            self.total_count_hint = Some(iter.read_u8()?);
        }
        let item_count = u16::from(iter.read_u8()?);
        let entries_start = iter.position();
        if entries_start > end_pos {
            return Err(CodecError::Incomplete);
        }
        let level = iter.level_mut();
        level.item_count = item_count;
        level.next_entry_pos = entries_start;
        level.standard_entries_pos = entries_start;
        Ok(InitOutcome::Ready)
    }
}

/// Encode-side entry description.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilterEntryHeader<'a> {
    pub action: FilterEntryAction,
    pub id: u8,
    /// Override of the list-level container type.
    pub container_type: Option<DataType>,
    pub perm_data: Option<&'a [u8]>,
}

impl Default for FilterEntryAction {
    fn default() -> Self {
        FilterEntryAction::Set
    }
}

impl<'a> FilterEntryHeader<'a> {
    pub fn new(action: FilterEntryAction, id: u8) -> Self {
        FilterEntryHeader {
            action,
            id,
            container_type: None,
            perm_data: None,
        }
    }
}

/// One decoded section. `container_type` is already resolved against the
/// list default.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterEntry<'a> {
    pub action: FilterEntryAction,
    pub id: u8,
    pub container_type: DataType,
    pub perm_data: Option<&'a [u8]>,
    pub data: &'a [u8],
}
