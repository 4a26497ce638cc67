//! Field list container.
//!
//! A flat list of field-id/value pairs, the workhorse payload of price
//! updates. Values carry no type tag on the wire: the receiving side
//! resolves types through its field dictionary. Supports full encodings
//! (standard entries), partial encodings driven by a set definition, or
//! both; when both are present the set-defined entries come first.
//!
//! Encoding protocol: `encode_init`, one `encode*` per entry (value,
//! pre-encoded data, blank, or an `encode_init`/`encode_complete` pair for
//! nested containers), then `encode_complete`. Decoding mirrors it:
//! `decode_init`, then [`FieldEntry::decode`] until it returns `None`.

use crate::error::{CodecError, Result};
use crate::iter::{DecodeIter, EncPhase, EncodeIter, LevelSetDef};
use crate::primitive::EncodeValue;
use crate::set_data;
use crate::set_def::{FieldSetDefEntry, LocalFieldSetDefDb};
use crate::types::{DataType, InitOutcome};
use crate::wire;

mod flags {
    pub const HAS_INFO: u8 = 0x01;
    pub const HAS_SET_DATA: u8 = 0x02;
    pub const HAS_SET_ID: u8 = 0x04;
    pub const HAS_STANDARD_DATA: u8 = 0x08;
}

/// Dictionary reference carried in the optional info section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldListInfo {
    pub dictionary_id: u16,
    pub field_list_num: u16,
}

/// Field list header.
#[derive(Debug, Clone, Default)]
pub struct FieldList {
    pub info: Option<FieldListInfo>,
    pub set_id: u16,
    has_set_data: bool,
    has_standard_data: bool,
}

impl FieldList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Header for the common case: standard entries only.
    pub fn with_standard_data() -> Self {
        Self::new().standard_data()
    }

    pub fn standard_data(mut self) -> Self {
        self.has_standard_data = true;
        self
    }

    pub fn set_data(mut self, set_id: u16) -> Self {
        self.has_set_data = true;
        self.set_id = set_id;
        self
    }

    pub fn info(mut self, info: FieldListInfo) -> Self {
        self.info = Some(info);
        self
    }

    pub fn has_set_data(&self) -> bool {
        self.has_set_data
    }

    pub fn has_standard_data(&self) -> bool {
        self.has_standard_data
    }

    pub fn encode_init(
        &self,
        iter: &mut EncodeIter<'_>,
        set_db: Option<&LocalFieldSetDefDb>,
    ) -> Result<()> {
        let set_def = if self.has_set_data {
            let db = set_db.ok_or(CodecError::IllegalSetDef(
                "set data requires a definition database",
            ))?;
            Some(
                db.get(self.set_id)
                    .ok_or(CodecError::IllegalSetDef("no definition for set id"))?
                    .clone(),
            )
        } else {
            None
        };

        let mut flag_byte = 0u8;
        if self.info.is_some() {
            flag_byte |= flags::HAS_INFO;
        }
        if self.has_set_data {
            flag_byte |= flags::HAS_SET_DATA;
            if self.set_id != 0 {
                flag_byte |= flags::HAS_SET_ID;
            }
        }
        if self.has_standard_data {
            flag_byte |= flags::HAS_STANDARD_DATA;
        }

        iter.push_level(DataType::FieldList, EncPhase::Entries)?;
        iter.write_u8(flag_byte)?;

        if let Some(info) = &self.info {
            let info_len = wire::len_u15rb(info.dictionary_id) + 2;
            iter.write_u8(info_len as u8)?;
            iter.write_u15rb(info.dictionary_id)?;
            iter.write_u16(info.field_list_num)?;
        }

        if let Some(def) = set_def {
            if self.set_id != 0 {
                iter.write_u15rb(self.set_id)?;
            }
            let set_count = def.entries.len() as u16;
            let mut set_len_mark = None;
            if self.has_standard_data {
                set_len_mark = Some(iter.position());
                iter.write_u15rb_long(0)?;
            }
            let level = iter.level_mut();
            level.set_def = LevelSetDef::Field(def);
            level.set_len_mark = set_len_mark;
            level.has_standard_data = self.has_standard_data;
            if set_count == 0 {
                finalize_set_region(iter)?;
            }
        } else if self.has_standard_data {
            let mark = iter.position();
            iter.write_u16(0)?;
            iter.level_mut().count_mark = Some(mark);
        }
        Ok(())
    }

    pub fn encode_complete(iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        iter.expect_phase(DataType::FieldList, EncPhase::Entries);
        let level = iter.pop_level();
        if !success {
            iter.pos = level.start_pos;
            return Ok(());
        }
        if let LevelSetDef::Field(def) = &level.set_def {
            assert_eq!(
                usize::from(level.next_set_item),
                def.entries.len(),
                "field list completed with set-defined entries missing"
            );
        }
        if let Some(mark) = level.count_mark {
            iter.patch_u16(mark, level.count);
        }
        Ok(())
    }

    /// Decode the header under the cursor. On `SetSkipped` the set-defined
    /// entries are not walkable (no definition was supplied) and entry
    /// decoding resumes with the standard entries.
    pub fn decode_init(
        &mut self,
        iter: &mut DecodeIter<'_>,
        set_db: Option<&LocalFieldSetDefDb>,
    ) -> Result<InitOutcome> {
        self.info = None;
        self.set_id = 0;
        self.has_set_data = false;
        self.has_standard_data = false;

        let data_len = iter.data_len();
        iter.push_level(DataType::FieldList)?;
        if data_len == 0 {
            iter.end_of_container();
            return Ok(InitOutcome::NoEntries);
        }
        let end_pos = iter.level().end_pos;
        let flag_byte = iter.read_u8()?;

        if flag_byte & flags::HAS_INFO != 0 {
            let info_len = usize::from(iter.read_u8()?);
            let start = iter.position();
            if start + info_len > end_pos {
                return Err(CodecError::Incomplete);
            }
            let dictionary_id = iter.read_u15rb()?;
            let field_list_num = iter.read_u16()?;
            self.info = Some(FieldListInfo {
                dictionary_id,
                field_list_num,
            });
            iter.pos = start + info_len;
        }

        let mut outcome = InitOutcome::Ready;
        if flag_byte & flags::HAS_SET_DATA != 0 {
            self.has_set_data = true;
            if flag_byte & flags::HAS_SET_ID != 0 {
                self.set_id = iter.read_u15rb()?;
            }
            let def = set_db.and_then(|db| db.get(self.set_id)).cloned();
            if flag_byte & flags::HAS_STANDARD_DATA != 0 {
                self.has_standard_data = true;
                let set_len = usize::from(iter.read_u15rb()?);
                let set_start = iter.position();
                iter.read_bytes(set_len)?;
                let item_count = iter.read_u16()?;
                let entries_start = iter.position();
                if entries_start > end_pos {
                    return Err(CodecError::Incomplete);
                }
                let level = iter.level_mut();
                level.item_count = item_count;
                level.standard_entries_pos = entries_start;
                match def {
                    Some(def) => {
                        level.set_count = def.entries.len() as u16;
                        level.item_count += level.set_count;
                        level.next_entry_pos = if level.set_count > 0 {
                            set_start
                        } else {
                            entries_start
                        };
                        level.set_def = LevelSetDef::Field(def);
                    }
                    None => {
                        level.next_entry_pos = entries_start;
                        outcome = InitOutcome::SetSkipped;
                    }
                }
            } else {
                let set_start = iter.position();
                let level = iter.level_mut();
                level.standard_entries_pos = end_pos;
                match def {
                    Some(def) => {
                        level.set_count = def.entries.len() as u16;
                        level.item_count = level.set_count;
                        level.next_entry_pos = set_start;
                        level.set_def = LevelSetDef::Field(def);
                    }
                    None => {
                        level.item_count = 0;
                        level.next_entry_pos = end_pos;
                        outcome = InitOutcome::SetSkipped;
                    }
                }
            }
        } else if flag_byte & flags::HAS_STANDARD_DATA != 0 {
            self.has_standard_data = true;
            let item_count = iter.read_u16()?;
            let entries_start = iter.position();
            let level = iter.level_mut();
            level.item_count = item_count;
            level.next_entry_pos = entries_start;
            level.standard_entries_pos = entries_start;
        } else {
            let pos = iter.position();
            let level = iter.level_mut();
            level.item_count = 0;
            level.next_entry_pos = pos;
        }
        Ok(outcome)
    }
}

/// One field-id/value pair.
///
/// `data_type` is [`DataType::Unknown`] for standard entries (the dictionary
/// resolves it) and the declared base type for set-defined entries. `data`
/// is the encoded value span; empty means blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldEntry<'a> {
    pub field_id: i16,
    pub data_type: DataType,
    pub data: &'a [u8],
}

impl<'a> FieldEntry<'a> {
    pub fn new(field_id: i16) -> FieldEntry<'static> {
        FieldEntry {
            field_id,
            data_type: DataType::Unknown,
            data: b"",
        }
    }

    pub fn with_data(field_id: i16, data: &'a [u8]) -> Self {
        FieldEntry {
            field_id,
            data_type: DataType::Unknown,
            data,
        }
    }

    /// Decode the next entry, or `None` at the end of the container. The
    /// iterator is left positioned on the entry's value span, ready for a
    /// primitive or nested-container decode.
    pub fn decode(iter: &mut DecodeIter<'a>) -> Result<Option<FieldEntry<'a>>> {
        {
            let level = iter.level();
            debug_assert_eq!(level.container, DataType::FieldList);
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

        let set_slot = {
            let level = iter.level();
            match &level.set_def {
                LevelSetDef::Field(def) if level.next_set_item < level.set_count => {
                    Some(def.entries[usize::from(level.next_set_item)].clone())
                }
                _ => None,
            }
        };

        if let Some(slot) = set_slot {
            let data = set_data::decode_set_span(iter, slot.data_type)?;
            let after = iter.position();
            if after > end_pos {
                return Err(CodecError::Incomplete);
            }
            let level = iter.level_mut();
            level.next_item += 1;
            level.next_set_item += 1;
            level.next_entry_pos = if level.next_set_item == level.set_count {
                level.standard_entries_pos
            } else {
                after
            };
            iter.set_datum(after - data.len(), after);
            return Ok(Some(FieldEntry {
                field_id: slot.field_id,
                data_type: slot.data_type.base_primitive(),
                data,
            }));
        }

        let field_id = iter.read_i16()?;
        let data = iter.read_buffer16()?;
        let after = iter.position();
        if after > end_pos {
            return Err(CodecError::Incomplete);
        }
        let level = iter.level_mut();
        level.next_item += 1;
        level.next_entry_pos = after;
        iter.set_datum(after - data.len(), after);
        Ok(Some(FieldEntry {
            field_id,
            data_type: DataType::Unknown,
            data,
        }))
    }

    /// Encode with a primitive value.
    pub fn encode_value<T: EncodeValue>(&self, iter: &mut EncodeIter<'_>, value: &T) -> Result<()> {
        iter.expect_phase(DataType::FieldList, EncPhase::Entries);
        if let Some(slot) = current_set_slot(iter) {
            if slot.field_id != self.field_id {
                return Err(CodecError::IllegalSetDef(
                    "field id out of set definition order",
                ));
            }
            value.write_set(iter.buf, &mut iter.pos, slot.data_type)?;
            advance_set(iter)
        } else {
            iter.write_i16(self.field_id)?;
            let len = value.encoded_len();
            if len > usize::from(u16::MAX) {
                return Err(CodecError::OutOfRange("entry longer than 0xFFFF"));
            }
            iter.write_u16ob(len as u16)?;
            value.write_raw(iter.buf, &mut iter.pos)?;
            iter.level_mut().count += 1;
            Ok(())
        }
    }

    /// Encode with this entry's pre-encoded `data`.
    pub fn encode(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        iter.expect_phase(DataType::FieldList, EncPhase::Entries);
        if let Some(slot) = current_set_slot(iter) {
            if slot.field_id != self.field_id {
                return Err(CodecError::IllegalSetDef(
                    "field id out of set definition order",
                ));
            }
            self.data.write_set(iter.buf, &mut iter.pos, slot.data_type)?;
            advance_set(iter)
        } else {
            iter.write_i16(self.field_id)?;
            iter.write_buffer16(self.data)?;
            iter.level_mut().count += 1;
            Ok(())
        }
    }

    /// Encode the zero-length blank form.
    pub fn encode_blank(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        iter.expect_phase(DataType::FieldList, EncPhase::Entries);
        if current_set_slot(iter).is_some() {
            return Err(CodecError::IllegalSetDef(
                "blank is not encodable in a set-defined slot",
            ));
        }
        iter.write_i16(self.field_id)?;
        iter.write_u16ob(0)?;
        iter.level_mut().count += 1;
        Ok(())
    }

    /// Open this entry for an in-place payload (typically a nested
    /// container); pair with [`FieldEntry::encode_complete`].
    pub fn encode_init(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        iter.expect_phase(DataType::FieldList, EncPhase::Entries);
        assert!(
            current_set_slot(iter).is_none(),
            "init/complete entries are not valid in set data"
        );
        let entry_start = iter.position();
        iter.write_i16(self.field_id)?;
        let mark = iter.position();
        iter.write_u16ob_long(0)?;
        let level = iter.level_mut();
        level.phase = EncPhase::EntryOpen;
        level.entry_mark = Some(mark);
        level.entry_start = entry_start;
        Ok(())
    }

    pub fn encode_complete(iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        iter.expect_phase(DataType::FieldList, EncPhase::EntryOpen);
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
}

fn current_set_slot(iter: &EncodeIter<'_>) -> Option<FieldSetDefEntry> {
    let level = iter.level();
    match &level.set_def {
        LevelSetDef::Field(def) if level.next_set_item < def.entries.len() as u16 => {
            Some(def.entries[usize::from(level.next_set_item)].clone())
        }
        _ => None,
    }
}

fn advance_set(iter: &mut EncodeIter<'_>) -> Result<()> {
    let done = {
        let level = iter.level_mut();
        level.next_set_item += 1;
        match &level.set_def {
            LevelSetDef::Field(def) => usize::from(level.next_set_item) == def.entries.len(),
            _ => unreachable!("set advance without a field set definition"),
        }
    };
    if done {
        finalize_set_region(iter)?;
    }
    Ok(())
}

fn finalize_set_region(iter: &mut EncodeIter<'_>) -> Result<()> {
    let (set_len_mark, has_standard) = {
        let level = iter.level();
        (level.set_len_mark, level.has_standard_data)
    };
    if let Some(mark) = set_len_mark {
        let len = iter.position() - (mark + 2);
        if len > 0x7FFF {
            return Err(CodecError::OutOfRange("set data longer than 0x7FFF"));
        }
        iter.patch_u15rb_long(mark, len as u16)?;
        iter.level_mut().set_len_mark = None;
    }
    if has_standard {
        let mark = iter.position();
        iter.write_u16(0)?;
        iter.level_mut().count_mark = Some(mark);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::{decode_from_span, EnumValue, Real, RealHint, UInt};
    use crate::set_def::FieldSetDef;
    use crate::types::WireVersion;

    #[test]
    fn two_enum_entries_round_trip_in_order() {
        let mut buf = [0u8; 64];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        FieldList::with_standard_data()
            .encode_init(&mut enc, None)
            .unwrap();
        FieldEntry::new(15)
            .encode_value(&mut enc, &EnumValue(840))
            .unwrap();
        FieldEntry::new(53)
            .encode_value(&mut enc, &EnumValue(1))
            .unwrap();
        FieldList::encode_complete(&mut enc, true).unwrap();
        let written = enc.position();
        assert_eq!(
            hex::encode(&buf[..written]),
            "080002000f02034800350101",
        );

        let data = buf;
        let mut dec = DecodeIter::new(&data[..written], WireVersion::CURRENT);
        let mut list = FieldList::new();
        assert_eq!(list.decode_init(&mut dec, None).unwrap(), InitOutcome::Ready);

        let e1 = FieldEntry::decode(&mut dec).unwrap().unwrap();
        assert_eq!(e1.field_id, 15);
        assert_eq!(
            decode_from_span::<EnumValue>(e1.data).unwrap().expect_value(),
            EnumValue(840)
        );
        let e2 = FieldEntry::decode(&mut dec).unwrap().unwrap();
        assert_eq!(e2.field_id, 53);
        assert_eq!(
            decode_from_span::<EnumValue>(e2.data).unwrap().expect_value(),
            EnumValue(1)
        );
        assert!(FieldEntry::decode(&mut dec).unwrap().is_none());
    }

    #[test]
    fn blank_entry_is_not_an_error() {
        let mut buf = [0u8; 32];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        FieldList::with_standard_data()
            .encode_init(&mut enc, None)
            .unwrap();
        FieldEntry::new(22).encode_blank(&mut enc).unwrap();
        FieldList::encode_complete(&mut enc, true).unwrap();
        let written = enc.position();

        let data = buf;
        let mut dec = DecodeIter::new(&data[..written], WireVersion::CURRENT);
        let mut list = FieldList::new();
        list.decode_init(&mut dec, None).unwrap();
        let entry = FieldEntry::decode(&mut dec).unwrap().unwrap();
        assert!(entry.data.is_empty());
        assert!(decode_from_span::<Real>(entry.data).unwrap().is_blank());
    }

    #[test]
    fn info_section_round_trips() {
        let mut buf = [0u8; 32];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        FieldList::with_standard_data()
            .info(FieldListInfo {
                dictionary_id: 1,
                field_list_num: 99,
            })
            .encode_init(&mut enc, None)
            .unwrap();
        FieldEntry::new(1).encode_value(&mut enc, &UInt(5)).unwrap();
        FieldList::encode_complete(&mut enc, true).unwrap();
        let written = enc.position();

        let data = buf;
        let mut dec = DecodeIter::new(&data[..written], WireVersion::CURRENT);
        let mut list = FieldList::new();
        list.decode_init(&mut dec, None).unwrap();
        assert_eq!(
            list.info,
            Some(FieldListInfo {
                dictionary_id: 1,
                field_list_num: 99
            })
        );
    }

    fn price_set_db() -> LocalFieldSetDefDb {
        let mut db = LocalFieldSetDefDb::new();
        db.add(FieldSetDef {
            set_id: 0,
            entries: vec![
                FieldSetDefEntry {
                    field_id: 22,
                    data_type: DataType::Real4Rb,
                },
                FieldSetDefEntry {
                    field_id: 25,
                    data_type: DataType::UInt4,
                },
            ],
        })
        .unwrap();
        db
    }

    #[test]
    fn set_data_with_standard_entries_round_trips() {
        let db = price_set_db();
        let mut buf = [0u8; 64];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        FieldList::new()
            .set_data(0)
            .standard_data()
            .encode_init(&mut enc, Some(&db))
            .unwrap();
        FieldEntry::new(22)
            .encode_value(&mut enc, &Real::new(4275, RealHint::ExponentNeg2))
            .unwrap();
        FieldEntry::new(25)
            .encode_value(&mut enc, &UInt(1000))
            .unwrap();
        // a standard entry after the set completes
        FieldEntry::new(53)
            .encode_value(&mut enc, &EnumValue(2))
            .unwrap();
        FieldList::encode_complete(&mut enc, true).unwrap();
        let written = enc.position();

        let data = buf;
        let mut dec = DecodeIter::new(&data[..written], WireVersion::CURRENT);
        let mut list = FieldList::new();
        assert_eq!(
            list.decode_init(&mut dec, Some(&db)).unwrap(),
            InitOutcome::Ready
        );

        let e1 = FieldEntry::decode(&mut dec).unwrap().unwrap();
        assert_eq!((e1.field_id, e1.data_type), (22, DataType::Real));
        let real = decode_from_span::<Real>(e1.data).unwrap().expect_value();
        assert_eq!((real.mantissa, real.hint), (4275, RealHint::ExponentNeg2));

        let e2 = FieldEntry::decode(&mut dec).unwrap().unwrap();
        assert_eq!((e2.field_id, e2.data_type), (25, DataType::UInt));
        assert_eq!(
            decode_from_span::<UInt>(e2.data).unwrap().expect_value(),
            UInt(1000)
        );

        let e3 = FieldEntry::decode(&mut dec).unwrap().unwrap();
        assert_eq!((e3.field_id, e3.data_type), (53, DataType::Unknown));

        assert!(FieldEntry::decode(&mut dec).unwrap().is_none());
    }

    #[test]
    fn missing_set_definition_skips_to_standard_entries() {
        let db = price_set_db();
        let mut buf = [0u8; 64];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        FieldList::new()
            .set_data(0)
            .standard_data()
            .encode_init(&mut enc, Some(&db))
            .unwrap();
        FieldEntry::new(22)
            .encode_value(&mut enc, &Real::new(1, RealHint::Exponent0))
            .unwrap();
        FieldEntry::new(25).encode_value(&mut enc, &UInt(1)).unwrap();
        FieldEntry::new(53)
            .encode_value(&mut enc, &EnumValue(7))
            .unwrap();
        FieldList::encode_complete(&mut enc, true).unwrap();
        let written = enc.position();

        // decode without the definition database
        let data = buf;
        let mut dec = DecodeIter::new(&data[..written], WireVersion::CURRENT);
        let mut list = FieldList::new();
        assert_eq!(
            list.decode_init(&mut dec, None).unwrap(),
            InitOutcome::SetSkipped
        );
        let entry = FieldEntry::decode(&mut dec).unwrap().unwrap();
        assert_eq!(entry.field_id, 53);
        assert!(FieldEntry::decode(&mut dec).unwrap().is_none());
    }

    #[test]
    fn out_of_order_set_entry_rejected() {
        let db = price_set_db();
        let mut buf = [0u8; 64];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        FieldList::new()
            .set_data(0)
            .encode_init(&mut enc, Some(&db))
            .unwrap();
        assert_eq!(
            FieldEntry::new(25).encode_value(&mut enc, &UInt(1)),
            Err(CodecError::IllegalSetDef(
                "field id out of set definition order"
            ))
        );
    }

    #[test]
    fn empty_field_list_decodes_no_entries() {
        let data: [u8; 0] = [];
        let mut dec = DecodeIter::new(&data, WireVersion::CURRENT);
        let mut list = FieldList::new();
        assert_eq!(
            list.decode_init(&mut dec, None).unwrap(),
            InitOutcome::NoEntries
        );
    }
}
