//! Shared framing for set-defined entry payloads.
//!
//! Entries encoded against a set definition carry no per-entry type tag and
//! minimal length framing: the declared slot type dictates either a fixed
//! width, a mantissa width folded into a real's hint byte, or a small length
//! prefix.

use crate::error::{CodecError, Result};
use crate::iter::DecodeIter;
use crate::types::DataType;

/// Total slot lengths (hint byte included) for `Real4Rb`, indexed by the
/// hint byte's top two bits.
const REAL32_LENS: [usize; 4] = [2, 3, 4, 5];
/// Same for `Real8Rb`; mantissas come in byte pairs.
const REAL64_LENS: [usize; 4] = [3, 5, 7, 9];

/// Consume one set-data slot of the declared type and return its span.
pub(crate) fn decode_set_span<'a>(
    iter: &mut DecodeIter<'a>,
    set_type: DataType,
) -> Result<&'a [u8]> {
    use DataType::*;
    if let Some(width) = set_type.set_fixed_width() {
        return iter.read_bytes(width);
    }
    match set_type {
        Real4Rb | Real8Rb => {
            let hint = *iter
                .buf
                .get(iter.pos)
                .ok_or(CodecError::Incomplete)?;
            let idx = usize::from(hint >> 6);
            let len = if set_type == Real4Rb {
                REAL32_LENS[idx]
            } else {
                REAL64_LENS[idx]
            };
            iter.read_bytes(len)
        }
        Enum | Array | Buffer | AsciiString | Utf8String | RmtesString => iter.read_buffer16(),
        t if t.is_container() => iter.read_buffer16(),
        Int | UInt | Float | Double | Real | Date | Time | DateTime | Qos => iter.read_buffer8(),
        _ => Err(CodecError::UnsupportedType(set_type.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::primitive::{EncodeValue, Real, RealHint, UInt};
    use crate::types::{Decoded, WireVersion};

    #[test]
    fn fixed_width_slot() {
        let mut buf = [0u8; 8];
        let mut pos = 0;
        UInt(0x0102)
            .write_set(&mut buf, &mut pos, DataType::UInt4)
            .unwrap();
        assert_eq!(&buf[..pos], &[0, 0, 1, 2]);

        let data = buf;
        let mut iter = DecodeIter::new(&data, WireVersion::CURRENT);
        let span = decode_set_span(&mut iter, DataType::UInt4).unwrap();
        assert_eq!(span.len(), 4);
        assert_eq!(
            crate::primitive::decode_from_span::<UInt>(span).unwrap(),
            Decoded::Value(UInt(0x0102))
        );
    }

    #[test]
    fn variable_slot_gets_u8_prefix() {
        let mut buf = [0u8; 8];
        let mut pos = 0;
        UInt(7).write_set(&mut buf, &mut pos, DataType::UInt).unwrap();
        assert_eq!(&buf[..pos], &[1, 7]);
    }

    #[test]
    fn real_range_byte_slot() {
        let real = Real::new(0x0203, RealHint::ExponentNeg2);
        let mut buf = [0u8; 8];
        let mut pos = 0;
        real.write_set(&mut buf, &mut pos, DataType::Real4Rb).unwrap();
        // width bits 01 (two mantissa bytes) folded into the hint byte
        assert_eq!(&buf[..pos], &[0x40 | 12, 0x02, 0x03]);

        let data = buf;
        let mut iter = DecodeIter::new(&data, WireVersion::CURRENT);
        let span = decode_set_span(&mut iter, DataType::Real4Rb).unwrap();
        assert_eq!(span.len(), 3);
        let got = crate::primitive::decode_from_span::<Real>(span)
            .unwrap()
            .expect_value();
        assert_eq!(got.mantissa, 0x0203);
        assert_eq!(got.hint, RealHint::ExponentNeg2);
    }

    #[test]
    fn real_eight_byte_range_slot_pads_to_pairs() {
        let real = Real::new(0x010203, RealHint::Exponent0);
        let mut buf = [0u8; 12];
        let mut pos = 0;
        real.write_set(&mut buf, &mut pos, DataType::Real8Rb).unwrap();
        // three significant bytes round up to a four-byte mantissa
        assert_eq!(pos, 5);
        assert_eq!(buf[0] >> 6, 1);

        let data = buf;
        let mut iter = DecodeIter::new(&data, WireVersion::CURRENT);
        let span = decode_set_span(&mut iter, DataType::Real8Rb).unwrap();
        assert_eq!(span.len(), 5);
    }

    #[test]
    fn oversized_mantissa_rejected() {
        let real = Real::new(i64::MAX, RealHint::Exponent0);
        let mut buf = [0u8; 12];
        assert!(real
            .write_set(&mut buf, &mut 0, DataType::Real4Rb)
            .is_err());
    }
}
