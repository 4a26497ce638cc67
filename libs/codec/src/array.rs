//! Array container.
//!
//! A homogeneous list of primitives. `item_length` zero means each entry is
//! length-described; nonzero pins every entry to that many bytes. An array
//! with an empty body is the blank array.

use crate::error::{CodecError, Result};
use crate::iter::{DecodeIter, EncPhase, EncodeIter};
use crate::primitive::{decode_from_span, EncodeValue, Primitive};
use crate::types::{DataType, Decoded, InitOutcome};

/// Total slot lengths for range-byte reals in arrays, by hint top bits.
const REAL32_LENS: [usize; 4] = [2, 3, 4, 5];
const REAL64_LENS: [usize; 4] = [3, 5, 7, 9];

/// Array header.
#[derive(Debug, Clone, Copy, Default)]
pub struct Array {
    pub primitive_type: DataType,
    /// Fixed per-entry width; zero for length-described entries.
    pub item_length: u16,
}

impl Array {
    pub fn new(primitive_type: DataType, item_length: u16) -> Self {
        Array {
            primitive_type,
            item_length,
        }
    }

    pub fn encode_init(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        if self.primitive_type.is_container() || self.primitive_type == DataType::Unknown {
            return Err(CodecError::InvalidData("array entries must be primitives"));
        }
        iter.push_level(DataType::Array, EncPhase::Entries)?;
        iter.write_u8(self.primitive_type.into())?;
        iter.write_u16ob(self.item_length)?;
        let mark = iter.position();
        iter.write_u16(0)?;
        let level = iter.level_mut();
        level.count_mark = Some(mark);
        level.prim_type = self.primitive_type;
        level.item_length = self.item_length;
        Ok(())
    }

    pub fn encode_complete(iter: &mut EncodeIter<'_>, success: bool) -> Result<()> {
        iter.expect_phase(DataType::Array, EncPhase::Entries);
        let level = iter.pop_level();
        if !success {
            iter.pos = level.start_pos;
            return Ok(());
        }
        iter.patch_u16(level.count_mark.expect("count mark"), level.count);
        Ok(())
    }

    pub fn encode_entry<T: EncodeValue>(&self, iter: &mut EncodeIter<'_>, value: &T) -> Result<()> {
        iter.expect_phase(DataType::Array, EncPhase::Entries);
        if self.item_length > 0 {
            value.write_raw_fixed(iter.buf, &mut iter.pos, usize::from(self.item_length))?;
        } else {
            match self.primitive_type {
                DataType::Real4Rb | DataType::Real8Rb => {
                    value.write_set(iter.buf, &mut iter.pos, self.primitive_type)?;
                }
                _ => {
                    let len = value.encoded_len();
                    if len > usize::from(u16::MAX) {
                        return Err(CodecError::OutOfRange("entry longer than 0xFFFF"));
                    }
                    iter.write_u16ob(len as u16)?;
                    value.write_raw(iter.buf, &mut iter.pos)?;
                }
            }
        }
        iter.level_mut().count += 1;
        Ok(())
    }

    /// Encode a blank entry; only length-described arrays can hold one.
    pub fn encode_entry_blank(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        iter.expect_phase(DataType::Array, EncPhase::Entries);
        if self.item_length > 0 {
            return Err(CodecError::InvalidData(
                "blank entry in a fixed-width array",
            ));
        }
        iter.write_u16ob(0)?;
        iter.level_mut().count += 1;
        Ok(())
    }

    /// Decode the next entry span, or `None` at the end. An empty span is a
    /// blank entry.
    pub fn decode_entry<'a>(&self, iter: &mut DecodeIter<'a>) -> Result<Option<ArrayEntry<'a>>> {
        {
            let level = iter.level();
            debug_assert_eq!(level.container, DataType::Array);
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

        let data: &[u8] = if self.item_length > 0 {
            iter.read_bytes(usize::from(self.item_length))?
        } else {
            match self.primitive_type {
                DataType::Real4Rb | DataType::Real8Rb => {
                    let hint = *iter.buf.get(iter.pos).ok_or(CodecError::Incomplete)?;
                    let idx = usize::from(hint >> 6);
                    let len = if self.primitive_type == DataType::Real4Rb {
                        REAL32_LENS[idx]
                    } else {
                        REAL64_LENS[idx]
                    };
                    iter.read_bytes(len)?
                }
                _ => iter.read_buffer16()?,
            }
        };
        let after = iter.position();
        if after > end_pos {
            return Err(CodecError::Incomplete);
        }
        let level = iter.level_mut();
        level.next_item += 1;
        level.next_entry_pos = after;
        iter.set_datum(after - data.len(), after);
        Ok(Some(ArrayEntry { data }))
    }

    /// Decode the array header. An empty span is the blank array.
    pub fn decode_init(&mut self, iter: &mut DecodeIter<'_>) -> Result<InitOutcome> {
        let data_len = iter.data_len();
        iter.push_level(DataType::Array)?;
        if data_len == 0 {
            iter.end_of_container();
            return Ok(InitOutcome::Blank);
        }
        if data_len < 3 {
            return Err(CodecError::Incomplete);
        }
        let end_pos = iter.level().end_pos;

        let raw = iter.read_u8()?;
        self.primitive_type =
            DataType::try_from(raw).map_err(|_| CodecError::UnsupportedType(raw))?;
        self.item_length = iter.read_u16ob()?;
        let item_count = iter.read_u16()?;
        let entries_start = iter.position();
        if entries_start > end_pos {
            return Err(CodecError::Incomplete);
        }
        let level = iter.level_mut();
        level.item_count = item_count;
        level.next_entry_pos = entries_start;
        level.standard_entries_pos = entries_start;
        level.prim_type = self.primitive_type;
        level.item_length = self.item_length;
        Ok(InitOutcome::Ready)
    }
}

/// One array slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayEntry<'a> {
    pub data: &'a [u8],
}

impl<'a> ArrayEntry<'a> {
    pub fn decode_value<T: Primitive>(&self) -> Result<Decoded<T>> {
        decode_from_span(self.data)
    }
}
