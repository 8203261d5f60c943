//! Unknown field preservation.
//!
//! Types built with `preserve_unknown` keep every field they do not recognise
//! as raw key + payload bytes, in the order they were read, and write them back
//! verbatim after their known fields.

use bytes::Bytes;

use crate::error::Error;
use crate::model::ScalarType;
use crate::reader::ProtoReader;
use crate::value::Value;
use crate::wire::{decode_key, field_payload_len, WireType};

/// Raw unknown fields captured while decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnknownFields {
    raw: Vec<u8>,
}

impl UnknownFields {
    /// Returns `true` if no unknown field has been captured.
    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Encoded length of all captured fields.
    pub fn encoded_len(&self) -> usize {
        self.raw.len()
    }

    /// The captured bytes, exactly as they appeared on the wire.
    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn clear(&mut self) {
        self.raw.clear();
    }

    /// Append a raw field (key and payload).
    pub(crate) fn push_raw(&mut self, field: &[u8]) {
        self.raw.extend_from_slice(field);
    }

    /// Append all fields captured in `other`.
    pub fn extend(&mut self, other: &UnknownFields) {
        self.raw.extend_from_slice(&other.raw);
    }

    /// Iterate over the captured fields in wire order.
    pub fn iter(&self) -> UnknownFieldsIter<'_> {
        UnknownFieldsIter { data: &self.raw }
    }

    /// Read the last occurrence of field `number` as `ty`, protobuf's "last
    /// one wins" rule for singular fields.
    ///
    /// Returns `Ok(None)` if the field was not captured.
    pub fn read(&self, number: u32, ty: ScalarType) -> Result<Option<Value>, Error> {
        Ok(self.read_all(number, ty)?.pop())
    }

    /// Read every occurrence of field `number` as `ty`, accepting both packed
    /// and unpacked encodings.
    pub fn read_all(&self, number: u32, ty: ScalarType) -> Result<Vec<Value>, Error> {
        let mut values = Vec::new();
        if self.raw.is_empty() {
            return Ok(values);
        }

        let mut reader = ProtoReader::new(Bytes::copy_from_slice(&self.raw));
        while let Some(header) = reader.read_field_header()? {
            if header.number() != number {
                reader.skip_field()?;
                continue;
            }
            if header.wire_type() == WireType::Len && ty.is_packable() {
                for value in reader.read_packed(ty)? {
                    values.push(value?);
                }
            } else {
                values.push(reader.read_scalar(ty)?);
            }
        }
        Ok(values)
    }
}

/// A single captured unknown field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownField<'a> {
    pub number: u32,
    pub wire_type: WireType,
    /// The payload, including the length prefix for [`WireType::Len`].
    pub payload: &'a [u8],
}

/// Iterator returned by [`UnknownFields::iter`].
pub struct UnknownFieldsIter<'a> {
    data: &'a [u8],
}

impl<'a> Iterator for UnknownFieldsIter<'a> {
    type Item = UnknownField<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        // The bytes were validated when they were captured, a failure here
        // can only mean the buffer was never produced by a reader.
        let (key, key_len) = decode_key(self.data).ok()?;
        let rest = &self.data[key_len..];
        let payload_len = field_payload_len(key.wire_type(), rest).ok()?;
        let (payload, rest) = rest.split_at(payload_len);
        self.data = rest;
        Some(UnknownField {
            number: key.number(),
            wire_type: key.wire_type(),
            payload,
        })
    }
}
