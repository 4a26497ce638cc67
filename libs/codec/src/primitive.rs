//! Primitive type codec.
//!
//! Stateless encode/decode for the scalar wire types, driven by an iterator
//! span. Decode distinguishes three outcomes: a value, the reserved
//! zero-length *blank* encoding (no value: expected data, not an error),
//! and a malformed-data failure.
//!
//! Numbers use trimmed big-endian forms (fewer bytes for small magnitudes);
//! fixed-point [`Real`] values pair a trimmed mantissa with an exponent hint
//! that is preserved exactly across a round trip. Date and time types are
//! fixed-width field tuples with per-field blank sentinels. Enumerations
//! decode to their raw number: mapping to a label is a dictionary concern
//! outside this crate.

use crate::error::{CodecError, Result};
use crate::iter::{DecodeIter, EncodeIter};
use crate::types::{DataState, DataType, Decoded, QosRate, QosTimeliness, StreamState};
use crate::wire;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// A value that can be written into an entry or array slot.
///
/// `encoded_len` must agree exactly with what `write_raw` produces: entry
/// length prefixes are computed from it.
pub trait EncodeValue {
    const DATA_TYPE: DataType;

    fn encoded_len(&self) -> usize;

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()>;

    /// Write in exactly `width` bytes, for fixed-width array slots and set
    /// data. Types without a widenable encoding only accept their natural
    /// width.
    fn write_raw_fixed(&self, buf: &mut [u8], pos: &mut usize, width: usize) -> Result<()> {
        if width != self.encoded_len() {
            return Err(CodecError::OutOfRange("value does not fit fixed width"));
        }
        self.write_raw(buf, pos)
    }

    /// Encode at the iterator's cursor with no length framing. Used for
    /// message payloads and init/complete entry bodies.
    fn encode(&self, iter: &mut EncodeIter<'_>) -> Result<()> {
        let pos = &mut iter.pos;
        self.write_raw(iter.buf, pos)
    }

    /// Encode into a set-data slot declared as `set_type`: fixed width for
    /// the width aliases, a small length prefix otherwise. [`Real`] overrides
    /// this for the `Real4Rb`/`Real8Rb` forms that fold the mantissa width
    /// into the hint byte.
    fn write_set(&self, buf: &mut [u8], pos: &mut usize, set_type: DataType) -> Result<()> {
        default_write_set(self, buf, pos, set_type)
    }
}

/// Shared `write_set` behavior for every type without a special form.
pub(crate) fn default_write_set<T: EncodeValue + ?Sized>(
    v: &T,
    buf: &mut [u8],
    pos: &mut usize,
    set_type: DataType,
) -> Result<()> {
    if let Some(width) = set_type.set_fixed_width() {
        return v.write_raw_fixed(buf, pos, width);
    }
    match set_type {
        DataType::Real4Rb | DataType::Real8Rb => Err(CodecError::IllegalSetDef(
            "range-byte real slot requires a real value",
        )),
        DataType::Enum
        | DataType::Array
        | DataType::Buffer
        | DataType::AsciiString
        | DataType::Utf8String
        | DataType::RmtesString => {
            let len = v.encoded_len();
            if len > usize::from(u16::MAX) {
                return Err(CodecError::OutOfRange("set slot longer than 0xFFFF"));
            }
            wire::write_u16ob(buf, pos, len as u16)?;
            v.write_raw(buf, pos)
        }
        t if t.is_container() => {
            let len = v.encoded_len();
            if len > usize::from(u16::MAX) {
                return Err(CodecError::OutOfRange("set slot longer than 0xFFFF"));
            }
            wire::write_u16ob(buf, pos, len as u16)?;
            v.write_raw(buf, pos)
        }
        DataType::Int
        | DataType::UInt
        | DataType::Float
        | DataType::Double
        | DataType::Real
        | DataType::Date
        | DataType::Time
        | DataType::DateTime
        | DataType::Qos => {
            let len = v.encoded_len();
            if len > usize::from(u8::MAX) {
                return Err(CodecError::OutOfRange("set slot longer than 0xFF"));
            }
            wire::write_u8(buf, pos, len as u8)?;
            v.write_raw(buf, pos)
        }
        _ => Err(CodecError::UnsupportedType(set_type.into())),
    }
}

/// An owned primitive that can also be decoded from a span.
pub trait Primitive: EncodeValue + Sized + Copy {
    /// Read from exactly `len` bytes. `len` is never zero: the blank case
    /// is handled before this is called.
    fn read_raw(buf: &[u8], pos: &mut usize, len: usize) -> Result<Self>;

    /// Whether a `len`-byte encoding holds an in-band blank for this type.
    fn in_band_blank(_encoded: Self) -> bool {
        false
    }

    /// Decode the datum under the cursor, consuming its full span.
    fn decode(iter: &mut DecodeIter<'_>) -> Result<Decoded<Self>> {
        let len = iter.data_len();
        if len == 0 {
            return Ok(Decoded::Blank);
        }
        let end = iter.data_end;
        let v = Self::read_raw(iter.buf, &mut iter.pos, len)?;
        debug_assert_eq!(iter.pos, end, "primitive decode must consume its span");
        if Self::in_band_blank(v) {
            return Ok(Decoded::Blank);
        }
        Ok(Decoded::Value(v))
    }
}

/// Decode a primitive from a detached span (map keys, array slots).
pub fn decode_from_span<T: Primitive>(span: &[u8]) -> Result<Decoded<T>> {
    if span.is_empty() {
        return Ok(Decoded::Blank);
    }
    let mut pos = 0;
    let v = T::read_raw(span, &mut pos, span.len())?;
    if pos != span.len() {
        return Err(CodecError::InvalidData("trailing bytes after primitive"));
    }
    if T::in_band_blank(v) {
        return Ok(Decoded::Blank);
    }
    Ok(Decoded::Value(v))
}

// ---------------------------------------------------------------------------
// Integers
// ---------------------------------------------------------------------------

/// Signed 64-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Int(pub i64);

impl EncodeValue for Int {
    const DATA_TYPE: DataType = DataType::Int;

    fn encoded_len(&self) -> usize {
        wire::trimmed_len_i64(self.0)
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        wire::write_i64_trimmed(buf, pos, self.0, self.encoded_len())
    }

    fn write_raw_fixed(&self, buf: &mut [u8], pos: &mut usize, width: usize) -> Result<()> {
        wire::write_i64_trimmed(buf, pos, self.0, width)
    }
}

impl Primitive for Int {
    fn read_raw(buf: &[u8], pos: &mut usize, len: usize) -> Result<Self> {
        Ok(Int(wire::read_i64_trimmed(buf, pos, len)?))
    }
}

/// Unsigned 64-bit integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct UInt(pub u64);

impl EncodeValue for UInt {
    const DATA_TYPE: DataType = DataType::UInt;

    fn encoded_len(&self) -> usize {
        wire::trimmed_len_u64(self.0)
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        wire::write_u64_trimmed(buf, pos, self.0, self.encoded_len())
    }

    fn write_raw_fixed(&self, buf: &mut [u8], pos: &mut usize, width: usize) -> Result<()> {
        wire::write_u64_trimmed(buf, pos, self.0, width)
    }
}

impl Primitive for UInt {
    fn read_raw(buf: &[u8], pos: &mut usize, len: usize) -> Result<Self> {
        Ok(UInt(wire::read_u64_trimmed(buf, pos, len)?))
    }
}

/// Enumeration ordinal. Label resolution is an external dictionary lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct EnumValue(pub u16);

impl EncodeValue for EnumValue {
    const DATA_TYPE: DataType = DataType::Enum;

    fn encoded_len(&self) -> usize {
        if self.0 <= 0xFF {
            1
        } else {
            2
        }
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        wire::write_u64_trimmed(buf, pos, u64::from(self.0), self.encoded_len())
    }

    fn write_raw_fixed(&self, buf: &mut [u8], pos: &mut usize, width: usize) -> Result<()> {
        if width > 2 {
            return Err(CodecError::OutOfRange("enum wider than 2 bytes"));
        }
        wire::write_u64_trimmed(buf, pos, u64::from(self.0), width)
    }
}

impl Primitive for EnumValue {
    fn read_raw(buf: &[u8], pos: &mut usize, len: usize) -> Result<Self> {
        if len > 2 {
            return Err(CodecError::InvalidData("enum wider than 2 bytes"));
        }
        Ok(EnumValue(wire::read_u64_trimmed(buf, pos, len)? as u16))
    }
}

// ---------------------------------------------------------------------------
// Floating point
// ---------------------------------------------------------------------------

/// IEEE 754 single-precision value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Float(pub f32);

impl EncodeValue for Float {
    const DATA_TYPE: DataType = DataType::Float;

    fn encoded_len(&self) -> usize {
        4
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        wire::write_f32(buf, pos, self.0)
    }
}

impl Primitive for Float {
    fn read_raw(buf: &[u8], pos: &mut usize, len: usize) -> Result<Self> {
        if len != 4 {
            return Err(CodecError::InvalidData("float span is not 4 bytes"));
        }
        Ok(Float(wire::read_f32(buf, pos)?))
    }
}

/// IEEE 754 double-precision value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Double(pub f64);

impl EncodeValue for Double {
    const DATA_TYPE: DataType = DataType::Double;

    fn encoded_len(&self) -> usize {
        8
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        wire::write_f64(buf, pos, self.0)
    }
}

impl Primitive for Double {
    fn read_raw(buf: &[u8], pos: &mut usize, len: usize) -> Result<Self> {
        if len != 8 {
            return Err(CodecError::InvalidData("double span is not 8 bytes"));
        }
        Ok(Double(wire::read_f64(buf, pos)?))
    }
}

// ---------------------------------------------------------------------------
// Real
// ---------------------------------------------------------------------------

/// Exponent hint of a [`Real`].
///
/// The hint is an interoperability contract: the decoded hint re-encodes
/// bit-for-bit, never normalized to an equivalent mantissa/hint pair.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
pub enum RealHint {
    ExponentNeg14 = 0,
    ExponentNeg13 = 1,
    ExponentNeg12 = 2,
    ExponentNeg11 = 3,
    ExponentNeg10 = 4,
    ExponentNeg9 = 5,
    ExponentNeg8 = 6,
    ExponentNeg7 = 7,
    ExponentNeg6 = 8,
    ExponentNeg5 = 9,
    ExponentNeg4 = 10,
    ExponentNeg3 = 11,
    ExponentNeg2 = 12,
    ExponentNeg1 = 13,
    Exponent0 = 14,
    Exponent1 = 15,
    Exponent2 = 16,
    Exponent3 = 17,
    Exponent4 = 18,
    Exponent5 = 19,
    Exponent6 = 20,
    Exponent7 = 21,
    /// Divisor 1 (whole).
    Fraction1 = 22,
    Fraction2 = 23,
    Fraction4 = 24,
    Fraction8 = 25,
    Fraction16 = 26,
    Fraction32 = 27,
    Fraction64 = 28,
    Fraction128 = 29,
    Fraction256 = 30,
    Infinity = 33,
    NegInfinity = 34,
    NotANumber = 35,
}

const REAL_BLANK_HINT: u8 = 0x20;

impl RealHint {
    /// Power-of-ten exponent for exponent hints.
    pub fn exponent10(self) -> Option<i32> {
        let raw = u8::from(self);
        if raw <= 21 {
            Some(i32::from(raw) - 14)
        } else {
            None
        }
    }

    /// Denominator for fractional hints.
    pub fn fraction_denominator(self) -> Option<u32> {
        let raw = u8::from(self);
        if (22..=30).contains(&raw) {
            Some(1 << (raw - 22))
        } else {
            None
        }
    }

    pub fn is_special(self) -> bool {
        matches!(
            self,
            RealHint::Infinity | RealHint::NegInfinity | RealHint::NotANumber
        )
    }
}

/// Fixed-point decimal: trimmed mantissa plus an exponent/fraction hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Real {
    pub mantissa: i64,
    pub hint: RealHint,
    blank: bool,
}

impl Real {
    pub fn new(mantissa: i64, hint: RealHint) -> Self {
        Real {
            mantissa,
            hint,
            blank: false,
        }
    }

    /// In-band blank, for positions that require an encoded value.
    pub fn blank() -> Self {
        Real {
            mantissa: 0,
            hint: RealHint::Exponent0,
            blank: true,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.blank
    }

    /// Approximate floating-point view; NaN for the not-a-number hint.
    pub fn to_f64(&self) -> f64 {
        if self.blank {
            return f64::NAN;
        }
        match self.hint {
            RealHint::Infinity => f64::INFINITY,
            RealHint::NegInfinity => f64::NEG_INFINITY,
            RealHint::NotANumber => f64::NAN,
            h => {
                if let Some(exp) = h.exponent10() {
                    self.mantissa as f64 * 10f64.powi(exp)
                } else {
                    self.mantissa as f64 / f64::from(h.fraction_denominator().unwrap_or(1))
                }
            }
        }
    }
}

impl EncodeValue for Real {
    const DATA_TYPE: DataType = DataType::Real;

    fn encoded_len(&self) -> usize {
        if self.blank || self.hint.is_special() {
            1
        } else {
            1 + wire::trimmed_len_i64(self.mantissa)
        }
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        if self.blank {
            return wire::write_u8(buf, pos, REAL_BLANK_HINT);
        }
        wire::write_u8(buf, pos, self.hint.into())?;
        if !self.hint.is_special() {
            let len = wire::trimmed_len_i64(self.mantissa);
            wire::write_i64_trimmed(buf, pos, self.mantissa, len)?;
        }
        Ok(())
    }

    fn write_set(&self, buf: &mut [u8], pos: &mut usize, set_type: DataType) -> Result<()> {
        let max = match set_type {
            DataType::Real4Rb => 4,
            DataType::Real8Rb => 8,
            _ => return default_write_set(self, buf, pos, set_type),
        };
        if self.blank || self.hint.is_special() {
            // smallest slot: width bits zero, single padding mantissa byte
            let hint_byte = if self.blank {
                REAL_BLANK_HINT
            } else {
                u8::from(self.hint)
            };
            wire::write_u8(buf, pos, hint_byte)?;
            let pad = if max == 4 { 1 } else { 2 };
            for _ in 0..pad {
                wire::write_u8(buf, pos, 0)?;
            }
            return Ok(());
        }
        let trimmed = wire::trimmed_len_i64(self.mantissa);
        let (len, width_bits) = if max == 4 {
            if trimmed > 4 {
                return Err(CodecError::OutOfRange("mantissa wider than 4 bytes"));
            }
            (trimmed, (trimmed - 1) as u8)
        } else {
            let len = trimmed.div_ceil(2) * 2;
            (len, (len / 2 - 1) as u8)
        };
        wire::write_u8(buf, pos, u8::from(self.hint) | (width_bits << 6))?;
        wire::write_i64_trimmed(buf, pos, self.mantissa, len)
    }
}

impl Primitive for Real {
    fn read_raw(buf: &[u8], pos: &mut usize, len: usize) -> Result<Self> {
        let hint_byte = wire::read_u8(buf, pos)? & 0x3F;
        match hint_byte {
            REAL_BLANK_HINT => {
                // consume the rest of the span, value is absent
                wire::read_bytes(buf, pos, len - 1)?;
                Ok(Real::blank())
            }
            33..=35 => {
                wire::read_bytes(buf, pos, len - 1)?;
                Ok(Real::new(
                    0,
                    RealHint::try_from(hint_byte)
                        .map_err(|_| CodecError::UnsupportedType(hint_byte))?,
                ))
            }
            _ => {
                let hint = RealHint::try_from(hint_byte & 0x1F)
                    .map_err(|_| CodecError::InvalidData("reserved real hint"))?;
                if len == 1 {
                    // hint with no mantissa bytes decodes as blank
                    return Ok(Real::blank());
                }
                let mantissa = wire::read_i64_trimmed(buf, pos, len - 1)?;
                Ok(Real::new(mantissa, hint))
            }
        }
    }

    fn in_band_blank(encoded: Self) -> bool {
        encoded.blank
    }
}

// ---------------------------------------------------------------------------
// Date / Time / DateTime
// ---------------------------------------------------------------------------

/// Calendar date; all-zero fields mean blank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Date {
    pub day: u8,
    pub month: u8,
    pub year: u16,
}

impl Date {
    pub fn new(day: u8, month: u8, year: u16) -> Self {
        Date { day, month, year }
    }

    pub fn is_blank(&self) -> bool {
        self.day == 0 && self.month == 0 && self.year == 0
    }
}

impl EncodeValue for Date {
    const DATA_TYPE: DataType = DataType::Date;

    fn encoded_len(&self) -> usize {
        4
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        wire::write_u8(buf, pos, self.day)?;
        wire::write_u8(buf, pos, self.month)?;
        wire::write_u16(buf, pos, self.year)
    }
}

impl Primitive for Date {
    fn read_raw(buf: &[u8], pos: &mut usize, len: usize) -> Result<Self> {
        if len != 4 {
            return Err(CodecError::InvalidData("date span is not 4 bytes"));
        }
        Ok(Date {
            day: wire::read_u8(buf, pos)?,
            month: wire::read_u8(buf, pos)?,
            year: wire::read_u16(buf, pos)?,
        })
    }

    fn in_band_blank(encoded: Self) -> bool {
        encoded.is_blank()
    }
}

const TIME_BLANK_HOUR: u8 = 0xFF;
const TIME_BLANK_MILLI: u16 = 0xFFFF;
const TIME_BLANK_MICRO: u16 = 0x07FF;
const TIME_BLANK_NANO: u16 = 0x07FF;

/// Time of day with millisecond, microsecond and nanosecond extensions.
///
/// Encodes in the shortest of the 2/3/5/7/8-byte forms that preserves the
/// populated fields; the two sub-millisecond counters share the trailing
/// three bytes (11-bit micro, the nanosecond's high bits riding in the spare
/// bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Time {
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub millisecond: u16,
    pub microsecond: u16,
    pub nanosecond: u16,
}

impl Time {
    pub fn new(hour: u8, minute: u8, second: u8, millisecond: u16) -> Self {
        Time {
            hour,
            minute,
            second,
            millisecond,
            ..Time::default()
        }
    }

    pub fn blank() -> Self {
        Time {
            hour: TIME_BLANK_HOUR,
            minute: TIME_BLANK_HOUR,
            second: TIME_BLANK_HOUR,
            millisecond: TIME_BLANK_MILLI,
            microsecond: TIME_BLANK_MICRO,
            nanosecond: TIME_BLANK_NANO,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.hour == TIME_BLANK_HOUR
            && self.minute == TIME_BLANK_HOUR
            && self.second == TIME_BLANK_HOUR
            && self.millisecond == TIME_BLANK_MILLI
            && self.microsecond == TIME_BLANK_MICRO
            && self.nanosecond == TIME_BLANK_NANO
    }
}

impl EncodeValue for Time {
    const DATA_TYPE: DataType = DataType::Time;

    fn encoded_len(&self) -> usize {
        if self.nanosecond != 0 {
            8
        } else if self.microsecond != 0 {
            7
        } else if self.millisecond != 0 {
            5
        } else if self.second != 0 {
            3
        } else {
            2
        }
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        let len = self.encoded_len();
        wire::write_u8(buf, pos, self.hour)?;
        wire::write_u8(buf, pos, self.minute)?;
        if len >= 3 {
            wire::write_u8(buf, pos, self.second)?;
        }
        if len >= 5 {
            wire::write_u16(buf, pos, self.millisecond)?;
        }
        if len >= 7 {
            let packed = (self.microsecond & 0x07FF) | (((self.nanosecond >> 8) & 0x07) << 11);
            wire::write_u16(buf, pos, packed)?;
        }
        if len == 8 {
            wire::write_u8(buf, pos, (self.nanosecond & 0xFF) as u8)?;
        }
        Ok(())
    }
}

impl Primitive for Time {
    fn read_raw(buf: &[u8], pos: &mut usize, len: usize) -> Result<Self> {
        let mut t = Time::default();
        match len {
            2 | 3 | 5 | 7 | 8 => {}
            _ => return Err(CodecError::InvalidData("time span length")),
        }
        t.hour = wire::read_u8(buf, pos)?;
        t.minute = wire::read_u8(buf, pos)?;
        if len >= 3 {
            t.second = wire::read_u8(buf, pos)?;
        }
        if len >= 5 {
            t.millisecond = wire::read_u16(buf, pos)?;
        }
        if len >= 7 {
            let packed = wire::read_u16(buf, pos)?;
            t.microsecond = packed & 0x07FF;
            t.nanosecond = (packed & 0x3800) >> 3;
        }
        if len == 8 {
            let low = wire::read_u8(buf, pos)?;
            t.nanosecond += u16::from(low);
        }
        Ok(t)
    }

    fn in_band_blank(encoded: Self) -> bool {
        encoded.is_blank()
    }
}

/// Combined calendar date and time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DateTime {
    pub date: Date,
    pub time: Time,
}

impl DateTime {
    pub fn new(date: Date, time: Time) -> Self {
        DateTime { date, time }
    }

    pub fn blank() -> Self {
        DateTime {
            date: Date::default(),
            time: Time::blank(),
        }
    }

    pub fn is_blank(&self) -> bool {
        self.date.is_blank() && self.time.is_blank()
    }
}

impl EncodeValue for DateTime {
    const DATA_TYPE: DataType = DataType::DateTime;

    fn encoded_len(&self) -> usize {
        4 + self.time.encoded_len()
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        self.date.write_raw(buf, pos)?;
        self.time.write_raw(buf, pos)
    }
}

impl Primitive for DateTime {
    fn read_raw(buf: &[u8], pos: &mut usize, len: usize) -> Result<Self> {
        if len < 6 {
            return Err(CodecError::InvalidData("datetime span length"));
        }
        let date = Date::read_raw(buf, pos, 4)?;
        let time = Time::read_raw(buf, pos, len - 4)?;
        Ok(DateTime { date, time })
    }

    fn in_band_blank(encoded: Self) -> bool {
        encoded.is_blank()
    }
}

// ---------------------------------------------------------------------------
// Qos / State
// ---------------------------------------------------------------------------

/// Quality of service: timeliness and rate, each with an optional refinement
/// value carried only for the `Delayed`/`TimeConflated` variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Qos {
    pub timeliness: QosTimeliness,
    pub rate: QosRate,
    pub dynamic: bool,
    pub time_info: u16,
    pub rate_info: u16,
}

impl Default for Qos {
    fn default() -> Self {
        Qos {
            timeliness: QosTimeliness::Realtime,
            rate: QosRate::TickByTick,
            dynamic: false,
            time_info: 0,
            rate_info: 0,
        }
    }
}

impl EncodeValue for Qos {
    const DATA_TYPE: DataType = DataType::Qos;

    fn encoded_len(&self) -> usize {
        let mut len = 1;
        if self.timeliness > QosTimeliness::DelayedUnknown {
            len += 2;
        }
        if self.rate > QosRate::JitConflated {
            len += 2;
        }
        len
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        let b = (u8::from(self.timeliness) << 5)
            | (u8::from(self.rate) << 1)
            | u8::from(self.dynamic);
        wire::write_u8(buf, pos, b)?;
        if self.timeliness > QosTimeliness::DelayedUnknown {
            wire::write_u16(buf, pos, self.time_info)?;
        }
        if self.rate > QosRate::JitConflated {
            wire::write_u16(buf, pos, self.rate_info)?;
        }
        Ok(())
    }
}

impl Primitive for Qos {
    fn read_raw(buf: &[u8], pos: &mut usize, len: usize) -> Result<Self> {
        let start = *pos;
        let b = wire::read_u8(buf, pos)?;
        let timeliness = QosTimeliness::try_from(b >> 5)
            .map_err(|_| CodecError::InvalidData("qos timeliness"))?;
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
            qos.time_info = wire::read_u16(buf, pos)?;
        }
        if rate > QosRate::JitConflated {
            qos.rate_info = wire::read_u16(buf, pos)?;
        }
        if *pos - start != len {
            return Err(CodecError::InvalidData("qos span length"));
        }
        Ok(qos)
    }
}

/// Stream and data state with a status code and optional text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct State<'a> {
    pub stream_state: StreamState,
    pub data_state: DataState,
    pub code: u8,
    pub text: &'a [u8],
}

impl Default for State<'_> {
    fn default() -> Self {
        State {
            stream_state: StreamState::Open,
            data_state: DataState::Ok,
            code: state_code::NONE,
            text: b"",
        }
    }
}

/// Well-known state codes. The wire carries a raw byte.
pub mod state_code {
    pub const NONE: u8 = 0;
    pub const NOT_FOUND: u8 = 1;
    pub const TIMEOUT: u8 = 2;
    pub const NOT_ENTITLED: u8 = 3;
    pub const INVALID_ARGUMENT: u8 = 4;
    pub const USAGE_ERROR: u8 = 5;
    pub const PREEMPTED: u8 = 6;
    pub const NOT_OPEN: u8 = 12;
    pub const TOO_MANY_ITEMS: u8 = 13;
}

impl<'a> State<'a> {
    pub fn new(stream_state: StreamState, data_state: DataState) -> Self {
        State {
            stream_state,
            data_state,
            ..State::default()
        }
    }

    pub fn with_text(mut self, text: &'a [u8]) -> Self {
        self.text = text;
        self
    }

    pub(crate) fn read_from(iter: &mut DecodeIter<'a>) -> Result<State<'a>> {
        let b = iter.read_u8()?;
        let stream_state = StreamState::try_from(b >> 3)
            .map_err(|_| CodecError::InvalidData("stream state"))?;
        let data_state =
            DataState::try_from(b & 0x07).map_err(|_| CodecError::InvalidData("data state"))?;
        let code = iter.read_u8()?;
        let text = iter.read_buffer15()?;
        Ok(State {
            stream_state,
            data_state,
            code,
            text,
        })
    }

    /// Decode the datum under the cursor.
    pub fn decode(iter: &mut DecodeIter<'a>) -> Result<Decoded<State<'a>>> {
        let len = iter.data_len();
        if len == 0 {
            return Ok(Decoded::Blank);
        }
        if len < 3 {
            return Err(CodecError::Incomplete);
        }
        let end = iter.data_end;
        let state = State::read_from(iter)?;
        if iter.pos != end {
            return Err(CodecError::InvalidData("state span length"));
        }
        Ok(Decoded::Value(state))
    }
}

impl EncodeValue for State<'_> {
    const DATA_TYPE: DataType = DataType::State;

    fn encoded_len(&self) -> usize {
        2 + wire::len_u15rb(self.text.len() as u16) + self.text.len()
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        if self.text.len() > 0x7FFF {
            return Err(CodecError::OutOfRange("state text longer than 0x7FFF"));
        }
        let b = (u8::from(self.stream_state) << 3) | u8::from(self.data_state);
        wire::write_u8(buf, pos, b)?;
        wire::write_u8(buf, pos, self.code)?;
        wire::write_u15rb(buf, pos, self.text.len() as u16)?;
        wire::write_bytes(buf, pos, self.text)
    }
}

// ---------------------------------------------------------------------------
// Opaque bytes
// ---------------------------------------------------------------------------

impl EncodeValue for &[u8] {
    const DATA_TYPE: DataType = DataType::Buffer;

    fn encoded_len(&self) -> usize {
        self.len()
    }

    fn write_raw(&self, buf: &mut [u8], pos: &mut usize) -> Result<()> {
        wire::write_bytes(buf, pos, self)
    }
}

/// Decode the datum under the cursor as raw bytes; zero length is blank.
pub fn decode_buffer<'a>(iter: &mut DecodeIter<'a>) -> Result<Decoded<&'a [u8]>> {
    let len = iter.data_len();
    if len == 0 {
        return Ok(Decoded::Blank);
    }
    Ok(Decoded::Value(iter.read_bytes(len)?))
}
