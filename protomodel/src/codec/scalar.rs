//! Scalar protobuf values and their wire encodings.

// This module uses `as` casts which have been thoroughly reviewed for correctness.
#![allow(clippy::as_conversions)]

use bytes::{BufMut, Bytes};

use crate::error::Error;
use crate::leb128::{decode_varint, LebCodec};
use crate::model::ScalarType;
use crate::util::CastFrom;
use crate::value::Value;
use crate::wire::{
    decode_len, zigzag_decode_32, zigzag_decode_64, zigzag_encode_32, zigzag_encode_64,
};
use crate::writer::ProtoWriter;

/// Decode one value of type `ty` starting at `pos`, advancing `pos`.
pub(crate) fn decode(
    ty: ScalarType,
    data: &Bytes,
    pos: &mut usize,
    end: usize,
) -> Result<Value, Error> {
    let start = *pos;
    let input = &data[start..end];

    let (value, len) = match ty {
        ScalarType::Int32 => {
            // int32 is sign-extended to 64 bits on the wire, truncate back.
            let (v, len) = decode_varint(input).map_err(|e| e.at(start))?;
            (Value::I32(v as i32), len)
        }
        ScalarType::Int64 => {
            let (v, len) = decode_varint(input).map_err(|e| e.at(start))?;
            (Value::I64(v as i64), len)
        }
        ScalarType::UInt32 => {
            let (v, len) = decode_varint(input).map_err(|e| e.at(start))?;
            (Value::U32(v as u32), len)
        }
        ScalarType::UInt64 => {
            let (v, len) = decode_varint(input).map_err(|e| e.at(start))?;
            (Value::U64(v), len)
        }
        ScalarType::SInt32 => {
            let (v, len) = decode_varint(input).map_err(|e| e.at(start))?;
            (Value::I32(zigzag_decode_32(v as u32)), len)
        }
        ScalarType::SInt64 => {
            let (v, len) = decode_varint(input).map_err(|e| e.at(start))?;
            (Value::I64(zigzag_decode_64(v)), len)
        }
        ScalarType::Bool => {
            let (v, len) = decode_varint(input).map_err(|e| e.at(start))?;
            (Value::Bool(v != 0), len)
        }
        ScalarType::Fixed32 => (Value::U32(read_u32_le(input, start)?), 4),
        ScalarType::SFixed32 => (Value::I32(read_u32_le(input, start)? as i32), 4),
        ScalarType::Float => (Value::F32(f32::from_bits(read_u32_le(input, start)?)), 4),
        ScalarType::Fixed64 => (Value::U64(read_u64_le(input, start)?), 8),
        ScalarType::SFixed64 => (Value::I64(read_u64_le(input, start)? as i64), 8),
        ScalarType::Double => (Value::F64(f64::from_bits(read_u64_le(input, start)?)), 8),
        ScalarType::String | ScalarType::Bytes => {
            let (len, prefix) = decode_len(input).map_err(|e| e.at(start))?;
            if input.len() - prefix < len {
                return Err(Error::unexpected_end_of_input().at(start));
            }
            let payload = data.slice(start + prefix..start + prefix + len);
            let value = if ty == ScalarType::String {
                match String::from_utf8(payload.to_vec()) {
                    Ok(s) => Value::String(s),
                    Err(_) => return Err(Error::invalid_utf8().at(start)),
                }
            } else {
                Value::Bytes(payload)
            };
            (value, prefix + len)
        }
    };

    *pos += len;
    Ok(value)
}

#[inline]
fn read_u32_le(input: &[u8], offset: usize) -> Result<u32, Error> {
    match input.first_chunk::<4>() {
        Some(bytes) => Ok(u32::from_le_bytes(*bytes)),
        None => Err(Error::unexpected_end_of_input().at(offset)),
    }
}

#[inline]
fn read_u64_le(input: &[u8], offset: usize) -> Result<u64, Error> {
    match input.first_chunk::<8>() {
        Some(bytes) => Ok(u64::from_le_bytes(*bytes)),
        None => Err(Error::unexpected_end_of_input().at(offset)),
    }
}

#[cold]
fn mismatch(ty: ScalarType, value: &Value) -> Error {
    Error::value_mismatch(ty.value_kind(), value.kind_name())
}

/// Write the payload (no key) of `value` as type `ty`.
pub(crate) fn encode<B: BufMut>(
    ty: ScalarType,
    value: &Value,
    w: &mut ProtoWriter<B>,
) -> Result<(), Error> {
    match (ty, value) {
        // Negative values are sign-extended to 64 bits.
        (ScalarType::Int32, Value::I32(v)) => w.write_varint(*v as i64 as u64),
        (ScalarType::Int64, Value::I64(v)) => w.write_varint(*v as u64),
        (ScalarType::UInt32, Value::U32(v)) => w.write_varint(u64::from(*v)),
        (ScalarType::UInt64, Value::U64(v)) => w.write_varint(*v),
        (ScalarType::SInt32, Value::I32(v)) => w.write_varint(u64::from(zigzag_encode_32(*v))),
        (ScalarType::SInt64, Value::I64(v)) => w.write_varint(zigzag_encode_64(*v)),
        (ScalarType::Bool, Value::Bool(v)) => w.write_varint(u64::from(*v)),
        (ScalarType::Fixed32, Value::U32(v)) => w.write_fixed32(*v),
        (ScalarType::SFixed32, Value::I32(v)) => w.write_fixed32(*v as u32),
        (ScalarType::Float, Value::F32(v)) => w.write_fixed32(v.to_bits()),
        (ScalarType::Fixed64, Value::U64(v)) => w.write_fixed64(*v),
        (ScalarType::SFixed64, Value::I64(v)) => w.write_fixed64(*v as u64),
        (ScalarType::Double, Value::F64(v)) => w.write_fixed64(v.to_bits()),
        (ScalarType::String, Value::String(v)) => w.write_len_delimited(v.as_bytes()),
        (ScalarType::Bytes, Value::Bytes(v)) => w.write_len_delimited(v),
        (ty, value) => return Err(mismatch(ty, value)),
    }
    Ok(())
}

/// Encoded length of the payload (no key) of `value` as type `ty`.
pub(crate) fn encoded_len(ty: ScalarType, value: &Value) -> Result<usize, Error> {
    let len = match (ty, value) {
        (ScalarType::Int32, Value::I32(v)) => (*v as i64 as u64).encoded_leb128_len(),
        (ScalarType::Int64, Value::I64(v)) => (*v as u64).encoded_leb128_len(),
        (ScalarType::UInt32, Value::U32(v)) => v.encoded_leb128_len(),
        (ScalarType::UInt64, Value::U64(v)) => v.encoded_leb128_len(),
        (ScalarType::SInt32, Value::I32(v)) => zigzag_encode_32(*v).encoded_leb128_len(),
        (ScalarType::SInt64, Value::I64(v)) => zigzag_encode_64(*v).encoded_leb128_len(),
        (ScalarType::Bool, Value::Bool(_)) => 1,
        (ScalarType::Fixed32, Value::U32(_))
        | (ScalarType::SFixed32, Value::I32(_))
        | (ScalarType::Float, Value::F32(_)) => 4,
        (ScalarType::Fixed64, Value::U64(_))
        | (ScalarType::SFixed64, Value::I64(_))
        | (ScalarType::Double, Value::F64(_)) => 8,
        (ScalarType::String, Value::String(v)) => len_delimited_len(v.len()),
        (ScalarType::Bytes, Value::Bytes(v)) => len_delimited_len(v.len()),
        (ty, value) => return Err(mismatch(ty, value)),
    };
    Ok(len)
}

/// Length of a length prefix plus `len` bytes of payload.
#[inline]
pub(crate) fn len_delimited_len(len: usize) -> usize {
    u64::cast_from(len).encoded_leb128_len() + len
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::error::ErrorKind;

    fn encode_to_vec(ty: ScalarType, value: &Value) -> Vec<u8> {
        let mut writer = ProtoWriter::new(Vec::new());
        encode(ty, value, &mut writer).unwrap();
        let buf = writer.into_inner();
        assert_eq!(buf.len(), encoded_len(ty, value).unwrap());
        buf
    }

    fn decode_all(ty: ScalarType, bytes: Vec<u8>) -> Value {
        let data = Bytes::from(bytes);
        let mut pos = 0;
        let value = decode(ty, &data, &mut pos, data.len()).unwrap();
        assert_eq!(pos, data.len());
        value
    }

    #[test]
    fn test_negative_int32_is_ten_bytes() {
        let buf = encode_to_vec(ScalarType::Int32, &Value::I32(-1));
        assert_eq!(buf.len(), 10);
        assert_eq!(decode_all(ScalarType::Int32, buf), Value::I32(-1));
    }

    #[test]
    fn test_sint_uses_zigzag() {
        assert_eq!(encode_to_vec(ScalarType::SInt32, &Value::I32(-1)), vec![0x01]);
        assert_eq!(encode_to_vec(ScalarType::SInt64, &Value::I64(1)), vec![0x02]);
    }

    #[test]
    fn test_fixed_and_float_layout() {
        assert_eq!(
            encode_to_vec(ScalarType::SFixed32, &Value::I32(-2)),
            vec![0xfe, 0xff, 0xff, 0xff]
        );
        assert_eq!(
            encode_to_vec(ScalarType::Float, &Value::F32(1.0)),
            vec![0x00, 0x00, 0x80, 0x3f]
        );
    }

    #[test]
    fn test_value_mismatch() {
        let mut writer = ProtoWriter::new(Vec::new());
        let err = encode(ScalarType::UInt32, &Value::I32(1), &mut writer).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::ValueMismatch {
                expected: "uint32",
                actual: "int32"
            }
        );
        assert!(encoded_len(ScalarType::String, &Value::Bool(true)).is_err());
    }

    #[test]
    fn test_bytes_share_the_input() {
        let data = Bytes::from_static(&[0x03, 1, 2, 3]);
        let mut pos = 0;
        let value = decode(ScalarType::Bytes, &data, &mut pos, data.len()).unwrap();
        let Value::Bytes(bytes) = value else {
            panic!("expected bytes");
        };
        assert_eq!(&bytes[..], &[1, 2, 3]);
        assert_eq!(bytes.as_ptr(), data[1..].as_ptr());
    }

    #[test]
    fn proptest_scalar_symmetry() {
        proptest!(|(v: i64)| {
            for ty in [ScalarType::Int64, ScalarType::SInt64, ScalarType::SFixed64] {
                let buf = encode_to_vec(ty, &Value::I64(v));
                prop_assert_eq!(decode_all(ty, buf), Value::I64(v));
            }
        });
        proptest!(|(v: u32)| {
            for ty in [ScalarType::UInt32, ScalarType::Fixed32] {
                let buf = encode_to_vec(ty, &Value::U32(v));
                prop_assert_eq!(decode_all(ty, buf), Value::U32(v));
            }
        });
        proptest!(|(v: String)| {
            let buf = encode_to_vec(ScalarType::String, &Value::String(v.clone()));
            prop_assert_eq!(decode_all(ScalarType::String, buf), Value::String(v));
        });
    }
}
