//! Series container.
//!
//! A uniform table whose entries carry payload only, with no key, index,
//! or action. Dictionary payloads and bulk snapshots travel this way,
//! usually with set definitions so each row costs a few bytes.

use crate::error::{CodecError, Result};
use crate::iter::{DecodeIter, EncPhase, EncodeIter};
use crate::map::entry_complete;
use crate::types::{DataType, InitOutcome};

mod flags {
    pub const HAS_SET_DEFS: u8 = 0x01;
    pub const HAS_SUMMARY_DATA: u8 = 0x02;
    pub const HAS_TOTAL_COUNT_HINT: u8 = 0x04;
}

/// Series header.
#[derive(Debug, Clone, Default)]
pub struct Series<'a> {
    pub container_type: DataType,
    pub total_count_hint: Option<u32>,
    pub set_defs: Option<&'a [u8]>,
    pub summary: Option<&'a [u8]>,
    has_set_defs: bool,
    has_summary: bool,
}

impl<'a> Series<'a> {
    pub fn new(container_type: DataType) -> Self {
        Series {
            container_type,
            ..Series::default()
        }
    }

    pub fn total_count_hint(mut self, hint: u32) -> Self {
        self.total_count_hint = Some(hint);
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
                "series payload type is not a container",
            ));
        }
        let phase = if self.has_set_defs {
            EncPhase::SetDefsPending
        } else if self.has_summary {
            EncPhase::SummaryPending
        } else {
            EncPhase::Entries
        };
        iter.push_level(DataType::Series, phase)?;
        let mut flag_byte = 0u8;
        if self.has_set_defs {
            flag_byte |= flags::HAS_SET_DEFS;
        }
        if self.has_summary {
            flag_byte |= flags::HAS_SUMMARY_DATA;
        }
        if self.total_count_hint.is_some() {
            flag_byte |= flags::HAS_TOTAL_COUNT_HINT;
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
        iter.expect_phase(DataType::Series, EncPhase::SetDefsPending);
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
        iter.expect_phase(DataType::Series, EncPhase::SummaryPending);
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
        iter.expect_phase(DataType::Series, EncPhase::Entries);
        let level = iter.pop_level();
        if !success {
            iter.pos = level.start_pos;
            return Ok(());
        }
        iter.patch_u16(level.count_mark.expect("count mark"), level.count);
        Ok(())
    }

    pub fn encode_entry(&self, iter: &mut EncodeIter<'_>, payload: &[u8]) -> Result<()> {
        iter.expect_phase(DataType::Series, EncPhase::Entries);
        if self.container_type != DataType::NoData {
            iter.write_buffer16(payload)?;
        } else if !payload.is_empty() {
            return Err(CodecError::InvalidData("payload on a no-data series"));
        }
        iter.level_mut().count += 1;
        Ok(())
    }

    pub fn encode_entry_init(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        iter.expect_phase(DataType::Series, EncPhase::Entries);
        assert!(
            self.container_type != DataType::NoData,
            "no payload to open on a no-data series"
        );
        let entry_start = iter.position();
        let mark = iter.position();
        iter.write_u16ob_long(0)?;
        let level = iter.level_mut();
        level.phase = EncPhase::EntryOpen;
        level.entry_mark = Some(mark);
        level.entry_start = entry_start;
        Ok(())
    }

    pub fn encode_entry_complete(iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        entry_complete(iter, DataType::Series, success)
    }

    pub fn decode_entry(&self, iter: &mut DecodeIter<'a>) -> Result<Option<SeriesEntry<'a>>> {
        {
            let level = iter.level();
            debug_assert_eq!(level.container, DataType::Series);
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

        let data: &[u8] = if self.container_type != DataType::NoData {
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
        Ok(Some(SeriesEntry { data }))
    }

    pub fn decode_init(&mut self, iter: &mut DecodeIter<'a>) -> Result<InitOutcome> {
        self.total_count_hint = None;
        self.set_defs = None;
        self.summary = None;

        let data_len = iter.data_len();
        iter.push_level(DataType::Series)?;
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

/// One row of a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeriesEntry<'a> {
    pub data: &'a [u8],
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_list::{FieldEntry, FieldList};
    use crate::primitive::{decode_from_span, Real, RealHint, UInt};
    use crate::set_def::{FieldSetDef, FieldSetDefEntry, LocalFieldSetDefDb};
    use crate::types::WireVersion;

    #[test]
    fn set_defined_rows_round_trip() {
        let mut db = LocalFieldSetDefDb::new();
        db.add(FieldSetDef {
            set_id: 0,
            entries: vec![
                FieldSetDefEntry {
                    field_id: 22,
                    data_type: DataType::Real4Rb,
                },
                FieldSetDefEntry {
                    field_id: 30,
                    data_type: DataType::UInt2,
                },
            ],
        })
        .unwrap();

        let mut buf = [0u8; 256];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        let series = Series::new(DataType::FieldList)
            .with_set_defs()
            .total_count_hint(2);
        series.encode_init(&mut enc).unwrap();
        db.encode(&mut enc).unwrap();
        series.encode_set_defs_complete(&mut enc, true).unwrap();

        for (price, size) in [(101_25i64, 10u64), (101_50, 20)] {
            series.encode_entry_init(&mut enc).unwrap();
            FieldList::new()
                .set_data(0)
                .encode_init(&mut enc, Some(&db))
                .unwrap();
            FieldEntry::new(22)
                .encode_value(&mut enc, &Real::new(price, RealHint::ExponentNeg2))
                .unwrap();
            FieldEntry::new(30).encode_value(&mut enc, &UInt(size)).unwrap();
            FieldList::encode_complete(&mut enc, true).unwrap();
            Series::encode_entry_complete(&mut enc, true).unwrap();
        }
        Series::encode_complete(&mut enc, true).unwrap();
        let written = enc.position();

        let data = buf;
        let mut dec = DecodeIter::new(&data[..written], WireVersion::CURRENT);
        let mut series = Series::new(DataType::Unknown);
        assert_eq!(series.decode_init(&mut dec).unwrap(), InitOutcome::Ready);
        assert_eq!(series.total_count_hint, Some(2));
        let decoded_db = LocalFieldSetDefDb::decode(series.set_defs.unwrap()).unwrap();

        let mut rows = Vec::new();
        while let Some(_entry) = series.decode_entry(&mut dec).unwrap() {
            let mut list = FieldList::new();
            list.decode_init(&mut dec, Some(&decoded_db)).unwrap();
            let price = FieldEntry::decode(&mut dec).unwrap().unwrap();
            let size = FieldEntry::decode(&mut dec).unwrap().unwrap();
            assert!(FieldEntry::decode(&mut dec).unwrap().is_none());
            rows.push((
                decode_from_span::<Real>(price.data).unwrap().expect_value(),
                decode_from_span::<UInt>(size.data).unwrap().expect_value(),
            ));
        }
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0.mantissa, 10125);
        assert_eq!(rows[1].1, UInt(20));
    }
}
