//! Wire format for Google's Protocol Buffers, aka [protobuf](https://protobuf.dev).

use core::num::NonZeroU32;
use core::ops::RangeInclusive;

use crate::error::Error;
use crate::leb128::{decode_varint, LebCodec};
use crate::util::{likely, unlikely, CastFrom};

/// Minimum value of a protobuf field number.
pub const MINIMUM_FIELD_NUMBER: u32 = 1;
/// Maximum value of a protobuf field number.
pub const MAXIMUM_FIELD_NUMBER: u32 = (1 << 29) - 1;
/// Field numbers reserved for the protobuf implementation itself.
pub const RESERVED_FIELD_NUMBERS: RangeInclusive<u32> = 19000..=19999;

/// Validate a field number as it appears in a type declaration.
///
/// Rejects 0, numbers above [`MAXIMUM_FIELD_NUMBER`], and the reserved
/// range. Reserved numbers are still accepted when decoding keys.
pub fn validate_field_number(number: u32) -> Result<(), Error> {
    if number < MINIMUM_FIELD_NUMBER
        || number > MAXIMUM_FIELD_NUMBER
        || RESERVED_FIELD_NUMBERS.contains(&number)
    {
        return Err(Error::invalid_field_number(u64::from(number)));
    }
    Ok(())
}

/// A decoded protobuf field key containing a wire type and field number.
///
/// The layout mirrors the protobuf wire format:
/// * Bits 0-2: wire type (0-5)
/// * Bits 3-31: field number (1 to 2^29-1)
///
/// Since field numbers start at 1, the minimum raw value is 8 (`1 << 3`),
/// guaranteeing the value is always non-zero.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct FieldKey(NonZeroU32);

crate::util::assert_eq_size!(FieldKey, Option<FieldKey>);

#[allow(clippy::as_conversions)]
impl FieldKey {
    /// Creates a new [`FieldKey`] from a raw key value, validating the wire
    /// type and field number.
    #[inline(always)]
    fn try_from_raw(raw_key: u64) -> Result<Self, Error> {
        let number = raw_key >> 3;
        if unlikely(number == 0 || number > u64::from(MAXIMUM_FIELD_NUMBER)) {
            return Err(Error::invalid_field_number(number));
        }

        let wire_type_raw = (raw_key & 0b111) as u8;
        let wire_type = WireType::try_from_val(wire_type_raw)?;
        if unlikely(matches!(wire_type, WireType::SGroup | WireType::EGroup)) {
            return Err(Error::deprecated_group_encoding().in_field(number as u32));
        }

        match NonZeroU32::new(raw_key as u32) {
            Some(key) => Ok(FieldKey(key)),
            None => Err(Error::invalid_field_number(number)),
        }
    }

    /// Build a key from its parts.
    #[inline(always)]
    pub fn new(wire_type: WireType, number: u32) -> Result<Self, Error> {
        Self::try_from_raw((u64::from(number) << 3) | u64::from(wire_type.into_val()))
    }

    /// Returns the [`WireType`] component of this key.
    #[inline(always)]
    pub fn wire_type(self) -> WireType {
        match self.0.get() & 0b111 {
            0 => WireType::Varint,
            1 => WireType::I64,
            2 => WireType::Len,
            3 => WireType::SGroup,
            4 => WireType::EGroup,
            _ => WireType::I32,
        }
    }

    /// Returns the field number component of this key.
    #[inline(always)]
    pub const fn number(self) -> u32 {
        self.0.get() >> 3
    }

    /// Decomposes this key into its [`WireType`] and field number components.
    #[inline(always)]
    pub fn into_parts(self) -> (WireType, u32) {
        (self.wire_type(), self.number())
    }

    /// Raw value of the key as it appears on the wire (before varint encoding).
    #[inline(always)]
    pub const fn into_raw(self) -> u32 {
        self.0.get()
    }
}

impl core::fmt::Debug for FieldKey {
    #[cold]
    #[inline(never)]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FieldKey")
            .field("wire_type", &self.wire_type())
            .field("number", &self.number())
            .finish()
    }
}

/// Encodes the provided field number and wire type as a protobuf field key.
///
/// Follows the specification from <https://protobuf.dev/programming-guides/encoding>
/// under the "Message Structure" section. The caller is responsible for the
/// field number being valid, descriptors are validated when they are built.
#[inline(always)]
pub fn encode_key<B: bytes::BufMut + ?Sized>(wire_type: WireType, number: u32, buf: &mut B) {
    let key = (number << 3) | u32::cast_from(wire_type.into_val());
    key.encode_leb128(buf);
}

/// Returns the encoded length of a field key (field number + wire type).
#[inline(always)]
pub fn encoded_key_len(number: u32) -> usize {
    // The wire type only occupies the low 3 bits, it never changes the length.
    (number << 3).encoded_leb128_len()
}

/// Decodes a field key from the front of `data`.
///
/// Returns the key and the number of bytes it occupied.
#[inline]
pub fn decode_key(data: &[u8]) -> Result<(FieldKey, usize), Error> {
    let (raw, len) = decode_varint(data)?;
    Ok((FieldKey::try_from_raw(raw)?, len))
}

/// Decodes the length prefix for a length-delimited field.
#[inline(always)]
pub fn decode_len(data: &[u8]) -> Result<(usize, usize), Error> {
    // Fast path, most lengths fit in one byte (< 128).
    if let Some(&b) = data.first() {
        if likely(b < 0x80) {
            return Ok((usize::cast_from(b), 1));
        }
    }
    let (len, read) = decode_varint(data)?;
    let len = usize::try_from(len).map_err(|_| Error::length_overflow(len))?;
    Ok((len, read))
}

/// Returns how many bytes the payload of a field with `wire_type` occupies
/// at the front of `data`, including any length prefix.
///
/// Protobuf supports backwards and forwards compatibility by skipping fields
/// we don't know about. Callers "skip" a field by advancing past this many
/// bytes.
#[inline]
pub fn field_payload_len(wire_type: WireType, data: &[u8]) -> Result<usize, Error> {
    let len = match wire_type {
        WireType::Varint => return decode_varint(data).map(|(_, len)| len),
        WireType::I64 => 8,
        WireType::I32 => 4,
        WireType::Len => {
            let (len, prefix) = decode_len(data)?;
            prefix
                .checked_add(len)
                .ok_or_else(|| Error::length_overflow(u64::cast_from(len)))?
        }
        WireType::SGroup | WireType::EGroup => {
            return Err(Error::deprecated_group_encoding());
        }
    };

    if data.len() < len {
        return Err(Error::unexpected_end_of_input());
    }
    Ok(len)
}

/// Map a signed 32-bit integer onto an unsigned one so small magnitudes,
/// positive or negative, stay small.
#[inline]
#[allow(clippy::as_conversions)]
pub const fn zigzag_encode_32(n: i32) -> u32 {
    ((n << 1) ^ (n >> 31)) as u32
}

/// Inverse of [`zigzag_encode_32`].
#[inline]
#[allow(clippy::as_conversions)]
pub const fn zigzag_decode_32(n: u32) -> i32 {
    ((n >> 1) as i32) ^ (-((n & 1) as i32))
}

/// Map a signed 64-bit integer onto an unsigned one, `(n << 1) ^ (n >> 63)`.
#[inline]
#[allow(clippy::as_conversions)]
pub const fn zigzag_encode_64(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Inverse of [`zigzag_encode_64`].
#[inline]
#[allow(clippy::as_conversions)]
pub const fn zigzag_decode_64(n: u64) -> i64 {
    ((n >> 1) as i64) ^ (-((n & 1) as i64))
}

/// Denotes the type of a field in an encoded protobuf message.
///
/// Protobuf messages are a series of key-value pairs. When encoded each key-value pair
/// is turned into a record consisting of a field number, a [`WireType`], and a payload.
/// The [`WireType`] indicates how large the proceeding payload is.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum WireType {
    /// Variable length integer.
    ///
    /// Used for: `int32`, `int64`, `uint32`, `uint64`, `sint32`, `sint64`, `bool`, `enum`.
    Varint = 0,
    /// 64-bit integer.
    ///
    /// Used for: `fixed64`, `sfixed64`, `double`.
    I64 = 1,
    /// Variable length field.
    ///
    /// Used for: `string`, `bytes`, `message`, packed `repeated` fields.
    Len = 2,
    /// Group start (deprecated).
    SGroup = 3,
    /// Group end (deprecated).
    EGroup = 4,
    /// 32-bit integer.
    ///
    /// Used for: `fixed32`, `sfixed32`, `float`.
    I32 = 5,
}

// N.B. It's not super important that these are the same size, but keeping them as such
// allows the compiler to make as many optimizations as possible.
crate::util::assert_eq_size!(WireType, Option<WireType>);

#[allow(clippy::as_conversions)]
impl WireType {
    /// Try to decode a [`WireType`] from the provided raw value.
    #[inline(always)]
    fn try_from_val(value: u8) -> Result<Self, Error> {
        match value {
            0 => Ok(WireType::Varint),
            1 => Ok(WireType::I64),
            2 => Ok(WireType::Len),
            3 => Ok(WireType::SGroup),
            4 => Ok(WireType::EGroup),
            5 => Ok(WireType::I32),
            // There is no single "expected" wire type for a bad key, report
            // the most common one so the raw value is still visible.
            other => Err(Error::wire_type_mismatch(WireType::Varint, other)),
        }
    }

    /// Return the raw value for this [`WireType`].
    #[inline(always)]
    pub const fn into_val(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for WireType {
    type Error = Error;

    #[inline(always)]
    fn try_from(value: u8) -> Result<Self, Error> {
        WireType::try_from_val(value)
    }
}
