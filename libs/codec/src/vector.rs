//! Vector container.
//!
//! Index-addressed entries with per-entry actions, used where position
//! matters (market-by-price rows, page-based data). `Clear` and `Delete`
//! entries carry no payload.

use crate::error::{CodecError, Result};
use crate::iter::{DecodeIter, EncPhase, EncodeIter};
use crate::map::entry_complete;
use crate::types::{DataType, InitOutcome, VectorEntryAction};

mod flags {
    pub const HAS_SET_DEFS: u8 = 0x01;
    pub const HAS_SUMMARY_DATA: u8 = 0x02;
    pub const HAS_PER_ENTRY_PERM_DATA: u8 = 0x04;
    pub const HAS_TOTAL_COUNT_HINT: u8 = 0x08;
    pub const SUPPORTS_SORTING: u8 = 0x10;
}

mod entry_flags {
    pub const HAS_PERM_DATA: u8 = 0x01;
}

/// Vector header.
#[derive(Debug, Clone, Default)]
pub struct Vector<'a> {
    pub container_type: DataType,
    pub total_count_hint: Option<u32>,
    pub set_defs: Option<&'a [u8]>,
    pub summary: Option<&'a [u8]>,
    supports_sorting: bool,
    per_entry_perm_data: bool,
    has_set_defs: bool,
    has_summary: bool,
}

impl<'a> Vector<'a> {
    pub fn new(container_type: DataType) -> Self {
        Vector {
            container_type,
            ..Vector::default()
        }
    }

    pub fn total_count_hint(mut self, hint: u32) -> Self {
        self.total_count_hint = Some(hint);
        self
    }

    pub fn supports_sorting(mut self) -> Self {
        self.supports_sorting = true;
        self
    }

    pub fn per_entry_perm_data(mut self) -> Self {
        self.per_entry_perm_data = true;
        self
    }

    pub fn with_set_defs(mut self) -> Self {
        self.has_set_defs = true;
        self
    }

    pub fn with_summary(mut self) -> Self {
        self.has_summary = true;
        self
    }

    pub fn has_summary(&self) -> bool {
        self.has_summary
    }

    pub fn has_set_defs(&self) -> bool {
        self.has_set_defs
    }

    pub fn encode_init(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        if !self.container_type.is_container() {
            return Err(CodecError::InvalidData(
                "vector payload type is not a container",
            ));
        }
        let phase = if self.has_set_defs {
            EncPhase::SetDefsPending
        } else if self.has_summary {
            EncPhase::SummaryPending
        } else {
            EncPhase::Entries
        };
        iter.push_level(DataType::Vector, phase)?;
        let mut flag_byte = 0u8;
        if self.has_set_defs {
            flag_byte |= flags::HAS_SET_DEFS;
        }
        if self.has_summary {
            flag_byte |= flags::HAS_SUMMARY_DATA;
        }
        if self.per_entry_perm_data {
            flag_byte |= flags::HAS_PER_ENTRY_PERM_DATA;
        }
        if self.total_count_hint.is_some() {
            flag_byte |= flags::HAS_TOTAL_COUNT_HINT;
        }
        if self.supports_sorting {
            flag_byte |= flags::SUPPORTS_SORTING;
        }
        iter.write_u8(flag_byte)?;
        iter.write_u8(self.container_type.container_tag())?;
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

    pub fn encode_set_defs_complete(&self, iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        iter.expect_phase(DataType::Vector, EncPhase::SetDefsPending);
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

    pub fn encode_summary_complete(&self, iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        iter.expect_phase(DataType::Vector, EncPhase::SummaryPending);
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
        iter.expect_phase(DataType::Vector, EncPhase::Entries);
        let level = iter.pop_level();
        if !success {
            iter.pos = level.start_pos;
            return Ok(());
        }
        iter.patch_u16(level.count_mark.expect("count mark"), level.count);
        Ok(())
    }

    pub fn encode_entry(
        &self,
        iter: &mut EncodeIter<'_>,
        action: VectorEntryAction,
        index: u32,
        perm_data: Option<&[u8]>,
        payload: &[u8],
    ) -> Result<()> {
        self.encode_entry_header(iter, action, index, perm_data)?;
        if entry_has_payload(action, self.container_type) {
            iter.write_buffer16(payload)?;
        } else if !payload.is_empty() {
            return Err(CodecError::InvalidData("payload on a clear or delete entry"));
        }
        iter.level_mut().count += 1;
        Ok(())
    }

    pub fn encode_entry_init(
        &self,
        iter: &mut EncodeIter<'_>,
        action: VectorEntryAction,
        index: u32,
        perm_data: Option<&[u8]>,
    ) -> Result<()> {
        assert!(
            entry_has_payload(action, self.container_type),
            "no payload to open on this entry"
        );
        let entry_start = iter.position();
        self.encode_entry_header(iter, action, index, perm_data)?;
        let mark = iter.position();
        iter.write_u16ob_long(0)?;
        let level = iter.level_mut();
        level.phase = EncPhase::EntryOpen;
        level.entry_mark = Some(mark);
        level.entry_start = entry_start;
        Ok(())
    }

    pub fn encode_entry_complete(iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        entry_complete(iter, DataType::Vector, success)
    }

    fn encode_entry_header(
        &self,
        iter: &mut EncodeIter<'_>,
        action: VectorEntryAction,
        index: u32,
        perm_data: Option<&[u8]>,
    ) -> Result<()> {
        iter.expect_phase(DataType::Vector, EncPhase::Entries);
        let mut eflags = 0u8;
        if perm_data.is_some() {
            if !self.per_entry_perm_data {
                return Err(CodecError::InvalidData(
                    "perm data on a vector without per-entry permissions",
                ));
            }
            eflags |= entry_flags::HAS_PERM_DATA;
        }
        iter.write_u8((eflags << 4) | u8::from(action))?;
        iter.write_u30rb(index)?;
        if let Some(perm) = perm_data {
            iter.write_buffer15(perm)?;
        }
        Ok(())
    }

    pub fn decode_entry(&self, iter: &mut DecodeIter<'a>) -> Result<Option<VectorEntry<'a>>> {
        {
            let level = iter.level();
            debug_assert_eq!(level.container, DataType::Vector);
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
        let action = VectorEntryAction::try_from(b & 0x0F)
            .map_err(|_| CodecError::InvalidData("vector entry action"))?;
        let eflags = b >> 4;
        let index = iter.read_u30rb()?;
        let perm_data = if self.per_entry_perm_data && eflags & entry_flags::HAS_PERM_DATA != 0 {
            Some(iter.read_buffer15()?)
        } else {
            None
        };
        let data: &[u8] = if entry_has_payload(action, self.container_type) {
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
        Ok(Some(VectorEntry {
            action,
            index,
            perm_data,
            data,
        }))
    }

    pub fn decode_init(&mut self, iter: &mut DecodeIter<'a>) -> Result<InitOutcome> {
        self.total_count_hint = None;
        self.set_defs = None;
        self.summary = None;

        let data_len = iter.data_len();
        iter.push_level(DataType::Vector)?;
        if data_len == 0 {
            iter.end_of_container();
            return Ok(InitOutcome::NoEntries);
        }
        if data_len < 4 {
            return Err(CodecError::Incomplete);
        }
        let end_pos = iter.level().end_pos;

        let flag_byte = iter.read_u8()?;
        self.has_set_defs = flag_byte & flags::HAS_SET_DEFS != 0;
        self.has_summary = flag_byte & flags::HAS_SUMMARY_DATA != 0;
        self.per_entry_perm_data = flag_byte & flags::HAS_PER_ENTRY_PERM_DATA != 0;
        self.supports_sorting = flag_byte & flags::SUPPORTS_SORTING != 0;

        self.container_type = DataType::from_container_tag(iter.read_u8()?)?;
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

fn entry_has_payload(action: VectorEntryAction, container_type: DataType) -> bool {
    action != VectorEntryAction::Clear
        && action != VectorEntryAction::Delete
        && container_type != DataType::NoData
}

/// One indexed entry; `Clear` and `Delete` decode with an empty span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorEntry<'a> {
    pub action: VectorEntryAction,
    pub index: u32,
    pub perm_data: Option<&'a [u8]>,
    pub data: &'a [u8],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element_list::{ElementEntry, ElementList};
    use crate::primitive::UInt;
    use crate::types::WireVersion;

    #[test]
    fn indexed_entries_round_trip() {
        let mut buf = [0u8; 256];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        let vector = Vector::new(DataType::ElementList).supports_sorting();
        vector.encode_init(&mut enc).unwrap();

        vector
            .encode_entry_init(&mut enc, VectorEntryAction::Set, 0, None)
            .unwrap();
        ElementList::with_standard_data()
            .encode_init(&mut enc, None)
            .unwrap();
        ElementEntry::new(b"Row", DataType::UInt)
            .encode_value(&mut enc, &UInt(1))
            .unwrap();
        ElementList::encode_complete(&mut enc, true).unwrap();
        Vector::encode_entry_complete(&mut enc, true).unwrap();

        vector
            .encode_entry(&mut enc, VectorEntryAction::Clear, 4, None, b"")
            .unwrap();
        Vector::encode_complete(&mut enc, true).unwrap();
        let written = enc.position();

        let data = buf;
        let mut dec = DecodeIter::new(&data[..written], WireVersion::CURRENT);
        let mut vector = Vector::new(DataType::Unknown);
        assert_eq!(vector.decode_init(&mut dec).unwrap(), InitOutcome::Ready);
        assert_eq!(vector.container_type, DataType::ElementList);

        let e1 = vector.decode_entry(&mut dec).unwrap().unwrap();
        assert_eq!((e1.action, e1.index), (VectorEntryAction::Set, 0));
        assert!(!e1.data.is_empty());

        let e2 = vector.decode_entry(&mut dec).unwrap().unwrap();
        assert_eq!((e2.action, e2.index), (VectorEntryAction::Clear, 4));
        assert!(e2.data.is_empty());

        assert!(vector.decode_entry(&mut dec).unwrap().is_none());
    }

    #[test]
    fn large_index_uses_wider_form() {
        let mut buf = [0u8; 64];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        let vector = Vector::new(DataType::NoData);
        vector.encode_init(&mut enc).unwrap();
        vector
            .encode_entry(&mut enc, VectorEntryAction::Insert, 100_000, None, b"")
            .unwrap();
        Vector::encode_complete(&mut enc, true).unwrap();
        let written = enc.position();

        let data = buf;
        let mut dec = DecodeIter::new(&data[..written], WireVersion::CURRENT);
        let mut vector = Vector::new(DataType::Unknown);
        vector.decode_init(&mut dec).unwrap();
        let e = vector.decode_entry(&mut dec).unwrap().unwrap();
        assert_eq!(e.index, 100_000);
    }
}
