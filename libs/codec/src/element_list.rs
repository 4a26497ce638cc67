//! Element list container.
//!
//! Name/value pairs where each entry is self-describing: the entry carries
//! its name and a full data-type tag, so no dictionary is needed to walk it.
//! Used for login attributes, connection configuration and anywhere field
//! ids would be too rigid. Supports the same standard/set-defined entry
//! split as field lists.

use std::borrow::Cow;

use crate::error::{CodecError, Result};
use crate::iter::{DecodeIter, EncPhase, EncodeIter, LevelSetDef};
use crate::primitive::EncodeValue;
use crate::set_data;
use crate::set_def::{ElementSetDefEntry, LocalElementSetDefDb};
use crate::types::{DataType, InitOutcome};

mod flags {
    pub const HAS_INFO: u8 = 0x01;
    pub const HAS_SET_DATA: u8 = 0x02;
    pub const HAS_SET_ID: u8 = 0x04;
    pub const HAS_STANDARD_DATA: u8 = 0x08;
}

/// Element list header.
#[derive(Debug, Clone, Default)]
pub struct ElementList {
    /// Template number from the optional info section.
    pub list_num: Option<u16>,
    pub set_id: u16,
    has_set_data: bool,
    has_standard_data: bool,
}

impl ElementList {
    pub fn new() -> Self {
        Self::default()
    }

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

    pub fn list_num(mut self, num: u16) -> Self {
        self.list_num = Some(num);
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
        set_db: Option<&LocalElementSetDefDb>,
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
        if self.list_num.is_some() {
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

        iter.push_level(DataType::ElementList, EncPhase::Entries)?;
        iter.write_u8(flag_byte)?;

        if let Some(num) = self.list_num {
            iter.write_u8(2)?;
            iter.write_u16(num)?;
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
            level.set_def = LevelSetDef::Element(def);
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
        iter.expect_phase(DataType::ElementList, EncPhase::Entries);
        let level = iter.pop_level();
        if !success {
            iter.pos = level.start_pos;
            return Ok(());
        }
        if let LevelSetDef::Element(def) = &level.set_def {
            assert_eq!(
                usize::from(level.next_set_item),
                def.entries.len(),
                "element list completed with set-defined entries missing"
            );
        }
        if let Some(mark) = level.count_mark {
            iter.patch_u16(mark, level.count);
        }
        Ok(())
    }

    pub fn decode_init(
        &mut self,
        iter: &mut DecodeIter<'_>,
        set_db: Option<&LocalElementSetDefDb>,
    ) -> Result<InitOutcome> {
        self.list_num = None;
        self.set_id = 0;
        self.has_set_data = false;
        self.has_standard_data = false;

        let data_len = iter.data_len();
        iter.push_level(DataType::ElementList)?;
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
            self.list_num = Some(iter.read_u16()?);
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
                        level.set_def = LevelSetDef::Element(def);
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
                        level.set_def = LevelSetDef::Element(def);
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

/// One named element.
///
/// Set-defined entries borrow their name from the definition, hence the
/// `Cow`. A [`DataType::NoData`] entry carries no value span at all;
/// an empty span on any other type is a blank.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementEntry<'a> {
    pub name: Cow<'a, [u8]>,
    pub data_type: DataType,
    pub data: &'a [u8],
}

impl<'a> ElementEntry<'a> {
    pub fn new(name: &'a [u8], data_type: DataType) -> Self {
        ElementEntry {
            name: Cow::Borrowed(name),
            data_type,
            data: b"",
        }
    }

    pub fn with_data(name: &'a [u8], data_type: DataType, data: &'a [u8]) -> Self {
        ElementEntry {
            name: Cow::Borrowed(name),
            data_type,
            data,
        }
    }

    /// Decode the next entry, or `None` at the end of the container.
    pub fn decode(iter: &mut DecodeIter<'a>) -> Result<Option<ElementEntry<'a>>> {
        {
            let level = iter.level();
            debug_assert_eq!(level.container, DataType::ElementList);
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
                LevelSetDef::Element(def) if level.next_set_item < level.set_count => {
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
            return Ok(Some(ElementEntry {
                name: Cow::Owned(slot.name),
                data_type: slot.data_type.base_primitive(),
                data,
            }));
        }

        let name = iter.read_buffer15()?;
        let raw_type = iter.read_u8()?;
        let data_type =
            DataType::try_from(raw_type).map_err(|_| CodecError::UnsupportedType(raw_type))?;
        let data: &[u8] = if data_type == DataType::NoData {
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
        Ok(Some(ElementEntry {
            name: Cow::Borrowed(name),
            data_type,
            data,
        }))
    }

    /// Encode with a primitive value. The entry's declared `data_type` is
    /// the wire tag; when left `Unknown` the value's natural tag is used.
    pub fn encode_value<T: EncodeValue>(&self, iter: &mut EncodeIter<'_>, value: &T) -> Result<()> {
        iter.expect_phase(DataType::ElementList, EncPhase::Entries);
        if let Some(slot) = current_set_slot(iter) {
            if slot.name != self.name.as_ref() {
                return Err(CodecError::IllegalSetDef(
                    "element name out of set definition order",
                ));
            }
            value.write_set(iter.buf, &mut iter.pos, slot.data_type)?;
            advance_set(iter)
        } else {
            let tag = if self.data_type == DataType::Unknown {
                T::DATA_TYPE
            } else {
                self.data_type
            };
            iter.write_buffer15(&self.name)?;
            iter.write_u8(tag.into())?;
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

    /// Encode with this entry's pre-encoded `data` and declared `data_type`.
    pub fn encode(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        iter.expect_phase(DataType::ElementList, EncPhase::Entries);
        if let Some(slot) = current_set_slot(iter) {
            if slot.name != self.name.as_ref() {
                return Err(CodecError::IllegalSetDef(
                    "element name out of set definition order",
                ));
            }
            self.data.write_set(iter.buf, &mut iter.pos, slot.data_type)?;
            advance_set(iter)
        } else {
            iter.write_buffer15(&self.name)?;
            iter.write_u8(self.data_type.into())?;
            if self.data_type != DataType::NoData {
                iter.write_buffer16(self.data)?;
            }
            iter.level_mut().count += 1;
            Ok(())
        }
    }

    pub fn encode_blank(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        iter.expect_phase(DataType::ElementList, EncPhase::Entries);
        if current_set_slot(iter).is_some() {
            return Err(CodecError::IllegalSetDef(
                "blank is not encodable in a set-defined slot",
            ));
        }
        iter.write_buffer15(&self.name)?;
        iter.write_u8(self.data_type.into())?;
        iter.write_u16ob(0)?;
        iter.level_mut().count += 1;
        Ok(())
    }

    /// Open this entry for an in-place payload; the declared `data_type`
    /// (typically a container tag) is written now.
    pub fn encode_init(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        iter.expect_phase(DataType::ElementList, EncPhase::Entries);
        assert!(
            current_set_slot(iter).is_none(),
            "init/complete entries are not valid in set data"
        );
        let entry_start = iter.position();
        iter.write_buffer15(&self.name)?;
        iter.write_u8(self.data_type.into())?;
        let mark = iter.position();
        iter.write_u16ob_long(0)?;
        let level = iter.level_mut();
        level.phase = EncPhase::EntryOpen;
        level.entry_mark = Some(mark);
        level.entry_start = entry_start;
        Ok(())
    }

    pub fn encode_complete(iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        iter.expect_phase(DataType::ElementList, EncPhase::EntryOpen);
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

fn current_set_slot(iter: &EncodeIter<'_>) -> Option<ElementSetDefEntry> {
    let level = iter.level();
    match &level.set_def {
        LevelSetDef::Element(def) if level.next_set_item < def.entries.len() as u16 => {
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
            LevelSetDef::Element(def) => usize::from(level.next_set_item) == def.entries.len(),
            _ => unreachable!("set advance without an element set definition"),
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
    use crate::primitive::{decode_from_span, EnumValue, UInt};
    use crate::set_def::ElementSetDef;
    use crate::types::WireVersion;

    #[test]
    fn mixed_type_entries_round_trip() {
        let mut buf = [0u8; 128];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        ElementList::with_standard_data()
            .encode_init(&mut enc, None)
            .unwrap();
        ElementEntry::new(b"ApplicationId", DataType::AsciiString)
            .encode_value(&mut enc, &&b"256"[..])
            .unwrap();
        ElementEntry::new(b"SingleOpen", DataType::UInt)
            .encode_value(&mut enc, &UInt(1))
            .unwrap();
        ElementEntry::new(b"SupportStandby", DataType::NoData)
            .encode(&mut enc)
            .unwrap();
        ElementList::encode_complete(&mut enc, true).unwrap();
        let written = enc.position();

        let data = buf;
        let mut dec = DecodeIter::new(&data[..written], WireVersion::CURRENT);
        let mut list = ElementList::new();
        assert_eq!(list.decode_init(&mut dec, None).unwrap(), InitOutcome::Ready);

        let e1 = ElementEntry::decode(&mut dec).unwrap().unwrap();
        assert_eq!(e1.name.as_ref(), b"ApplicationId");
        assert_eq!(e1.data_type, DataType::AsciiString);
        assert_eq!(e1.data, b"256");

        let e2 = ElementEntry::decode(&mut dec).unwrap().unwrap();
        assert_eq!(e2.name.as_ref(), b"SingleOpen");
        assert_eq!(e2.data_type, DataType::UInt);
        assert_eq!(
            decode_from_span::<UInt>(e2.data).unwrap().expect_value(),
            UInt(1)
        );

        let e3 = ElementEntry::decode(&mut dec).unwrap().unwrap();
        assert_eq!(e3.data_type, DataType::NoData);
        assert!(e3.data.is_empty());

        assert!(ElementEntry::decode(&mut dec).unwrap().is_none());
    }

    #[test]
    fn list_num_info_round_trips() {
        let mut buf = [0u8; 32];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        ElementList::with_standard_data()
            .list_num(7)
            .encode_init(&mut enc, None)
            .unwrap();
        ElementEntry::new(b"N", DataType::UInt)
            .encode_value(&mut enc, &UInt(9))
            .unwrap();
        ElementList::encode_complete(&mut enc, true).unwrap();
        let written = enc.position();

        let data = buf;
        let mut dec = DecodeIter::new(&data[..written], WireVersion::CURRENT);
        let mut list = ElementList::new();
        list.decode_init(&mut dec, None).unwrap();
        assert_eq!(list.list_num, Some(7));
    }

    #[test]
    fn set_defined_entries_round_trip() {
        let mut db = LocalElementSetDefDb::new();
        db.add(ElementSetDef {
            set_id: 1,
            entries: vec![
                ElementSetDefEntry {
                    name: b"Seq".to_vec(),
                    data_type: DataType::UInt4,
                },
                ElementSetDefEntry {
                    name: b"Side".to_vec(),
                    data_type: DataType::Enum,
                },
            ],
        })
        .unwrap();

        let mut buf = [0u8; 64];
        let mut enc = EncodeIter::new(&mut buf, WireVersion::CURRENT);
        ElementList::new()
            .set_data(1)
            .encode_init(&mut enc, Some(&db))
            .unwrap();
        ElementEntry::new(b"Seq", DataType::UInt)
            .encode_value(&mut enc, &UInt(42))
            .unwrap();
        ElementEntry::new(b"Side", DataType::Enum)
            .encode_value(&mut enc, &EnumValue(2))
            .unwrap();
        ElementList::encode_complete(&mut enc, true).unwrap();
        let written = enc.position();

        let data = buf;
        let mut dec = DecodeIter::new(&data[..written], WireVersion::CURRENT);
        let mut list = ElementList::new();
        assert_eq!(
            list.decode_init(&mut dec, Some(&db)).unwrap(),
            InitOutcome::Ready
        );
        let e1 = ElementEntry::decode(&mut dec).unwrap().unwrap();
        assert_eq!(e1.name.as_ref(), b"Seq");
        assert_eq!(
            decode_from_span::<UInt>(e1.data).unwrap().expect_value(),
            UInt(42)
        );
        let e2 = ElementEntry::decode(&mut dec).unwrap().unwrap();
        assert_eq!(e2.name.as_ref(), b"Side");
        assert_eq!(
            decode_from_span::<EnumValue>(e2.data).unwrap().expect_value(),
            EnumValue(2)
        );
        assert!(ElementEntry::decode(&mut dec).unwrap().is_none());
    }
}
