//! A cursor over an encoded protobuf message.
//!
//! The reader walks fields one at a time:
//!
//! ```text
//! BeforeField --read_field_header--> AtField --read_scalar-------> BeforeField
//!                                           --enter_sub_message--> BeforeField (one level deeper)
//!                                           --skip_field---------> BeforeField
//! ```
//!
//! Every length-delimited sub-message pushes a limit so the fields of the
//! nested message can be enumerated with the same calls, and `None` from
//! [`ProtoReader::read_field_header`] marks the end of the current level.

use bytes::Bytes;
use smallvec::SmallVec;

use crate::codec::scalar;
use crate::error::Error;
use crate::model::ScalarType;
use crate::value::Value;
use crate::wire::{decode_key, decode_len, field_payload_len, WireType};

/// Default limit on nested sub-messages.
pub const DEFAULT_MAX_DEPTH: usize = 100;

/// Header of the field the reader is positioned at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHeader {
    number: u32,
    wire_type: WireType,
    offset: usize,
}

impl FieldHeader {
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn wire_type(&self) -> WireType {
        self.wire_type
    }

    /// Offset of the field key in the input.
    pub fn offset(&self) -> usize {
        self.offset
    }
}

/// Returned by [`ProtoReader::enter_sub_message`], must be handed back to
/// [`ProtoReader::leave_sub_message`].
#[must_use = "sub-messages must be left with `leave_sub_message`"]
#[derive(Debug)]
pub struct SubMessageToken {
    depth: usize,
    end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    BeforeField,
    AtField(FieldHeader),
}

/// Stateful protobuf reader over a [`Bytes`] buffer.
///
/// Strings and bytes are sliced out of the input without copying.
#[derive(Debug)]
pub struct ProtoReader {
    data: Bytes,
    pos: usize,
    end: usize,
    /// Ends of the enclosing messages, innermost last.
    limits: SmallVec<[usize; 8]>,
    max_depth: usize,
    state: State,
}

impl ProtoReader {
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let end = data.len();
        ProtoReader {
            data,
            pos: 0,
            end,
            limits: SmallVec::new(),
            max_depth: DEFAULT_MAX_DEPTH,
            state: State::BeforeField,
        }
    }

    /// Limit how many sub-messages may be nested.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Current offset in the input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Number of sub-messages currently entered.
    pub fn depth(&self) -> usize {
        self.limits.len()
    }

    /// Bytes left in the current message.
    pub fn remaining(&self) -> usize {
        self.end - self.pos
    }

    /// The field the reader is positioned at, if any.
    pub fn current_field(&self) -> Option<FieldHeader> {
        match self.state {
            State::AtField(header) => Some(header),
            State::BeforeField => None,
        }
    }

    /// Read the next field key, or `None` at the end of the current message.
    pub fn read_field_header(&mut self) -> Result<Option<FieldHeader>, Error> {
        if let State::AtField(header) = self.state {
            return Err(Error::programming_error("previous field was not consumed")
                .in_field(header.number)
                .at(header.offset));
        }
        if self.pos >= self.end {
            return Ok(None);
        }

        let offset = self.pos;
        let (key, len) = decode_key(&self.data[offset..self.end]).map_err(|e| e.at(offset))?;
        self.pos += len;

        let header = FieldHeader {
            number: key.number(),
            wire_type: key.wire_type(),
            offset,
        };
        self.state = State::AtField(header);
        Ok(Some(header))
    }

    /// Consume the current field header, checking its wire type.
    fn take_field(&mut self, expected: WireType) -> Result<FieldHeader, Error> {
        let header = match self.state {
            State::AtField(header) => header,
            State::BeforeField => {
                return Err(Error::programming_error("no field header was read").at(self.pos));
            }
        };
        if header.wire_type != expected {
            return Err(
                Error::wire_type_mismatch(expected, header.wire_type.into_val())
                    .in_field(header.number)
                    .at(header.offset),
            );
        }
        self.state = State::BeforeField;
        Ok(header)
    }

    /// Read the payload of the current field as a scalar of type `ty`.
    pub fn read_scalar(&mut self, ty: ScalarType) -> Result<Value, Error> {
        let header = self.take_field(ty.wire_type())?;
        scalar::decode(ty, &self.data, &mut self.pos, self.end)
            .map_err(|e| e.in_field(header.number))
    }

    /// Read the current field as a raw varint.
    pub fn read_varint(&mut self) -> Result<u64, Error> {
        let header = self.take_field(WireType::Varint)?;
        let start = self.pos;
        let (value, len) = crate::leb128::decode_varint(&self.data[start..self.end])
            .map_err(|e| e.in_field(header.number).at(start))?;
        self.pos += len;
        Ok(value)
    }

    /// Read the current field as a UTF-8 string.
    pub fn read_string(&mut self) -> Result<String, Error> {
        match self.read_scalar(ScalarType::String)? {
            Value::String(s) => Ok(s),
            other => Err(Error::value_mismatch("string", other.kind_name())),
        }
    }

    /// Read the current field as bytes, sharing the input buffer.
    pub fn read_bytes(&mut self) -> Result<Bytes, Error> {
        match self.read_scalar(ScalarType::Bytes)? {
            Value::Bytes(b) => Ok(b),
            other => Err(Error::value_mismatch("bytes", other.kind_name())),
        }
    }

    /// Read the length prefix of the current field and return the payload
    /// bounds, checked against the current limit.
    fn take_len_payload(&mut self) -> Result<(FieldHeader, usize, usize), Error> {
        let header = self.take_field(WireType::Len)?;
        let start = self.pos;
        let (len, prefix) = decode_len(&self.data[start..self.end])
            .map_err(|e| e.in_field(header.number).at(start))?;
        let payload_start = start + prefix;
        if self.end - payload_start < len {
            return Err(Error::unexpected_end_of_input()
                .in_field(header.number)
                .at(start));
        }
        Ok((header, payload_start, payload_start + len))
    }

    /// Descend into the current length-delimited field.
    pub fn enter_sub_message(&mut self) -> Result<SubMessageToken, Error> {
        if let State::AtField(header) = self.state {
            if self.limits.len() >= self.max_depth {
                return Err(Error::depth_limit_exceeded(self.max_depth)
                    .in_field(header.number)
                    .at(header.offset));
            }
        }
        let (_header, start, end) = self.take_len_payload()?;

        self.limits.push(self.end);
        self.pos = start;
        self.end = end;
        Ok(SubMessageToken {
            depth: self.limits.len(),
            end,
        })
    }

    /// Return to the enclosing message. Any unread remainder of the
    /// sub-message is skipped.
    pub fn leave_sub_message(&mut self, token: SubMessageToken) -> Result<(), Error> {
        if token.depth != self.limits.len() || token.end != self.end {
            return Err(Error::programming_error(
                "sub-messages must be left in the order they were entered",
            )
            .at(self.pos));
        }
        let outer_end = match self.limits.pop() {
            Some(end) => end,
            None => return Err(Error::programming_error("not inside a sub-message").at(self.pos)),
        };
        self.pos = self.end;
        self.end = outer_end;
        self.state = State::BeforeField;
        Ok(())
    }

    /// Skip the payload of the current field.
    pub fn skip_field(&mut self) -> Result<(), Error> {
        let header = self.current_field_or_err()?;
        self.advance_payload(header)?;
        tracing::trace!(field = header.number, wire_type = ?header.wire_type, "skipped field");
        Ok(())
    }

    /// Skip the current field, returning its raw key and payload bytes.
    pub fn capture_field(&mut self) -> Result<Bytes, Error> {
        let header = self.current_field_or_err()?;
        self.advance_payload(header)?;
        Ok(self.data.slice(header.offset..self.pos))
    }

    fn current_field_or_err(&self) -> Result<FieldHeader, Error> {
        match self.state {
            State::AtField(header) => Ok(header),
            State::BeforeField => {
                Err(Error::programming_error("no field header was read").at(self.pos))
            }
        }
    }

    fn advance_payload(&mut self, header: FieldHeader) -> Result<(), Error> {
        let len = field_payload_len(header.wire_type, &self.data[self.pos..self.end])
            .map_err(|e| e.in_field(header.number).at(self.pos))?;
        self.pos += len;
        self.state = State::BeforeField;
        Ok(())
    }

    /// Read the current field as a packed run of `ty` values.
    ///
    /// The returned iterator decodes lazily and is bounded by the length
    /// prefix, the reader itself moves past the whole payload.
    pub fn read_packed(&mut self, ty: ScalarType) -> Result<PackedIter, Error> {
        if !ty.is_packable() {
            return Err(Error::unsupported_type(format!(
                "{} values cannot be packed",
                ty.name()
            )));
        }
        let (header, start, end) = self.take_len_payload()?;
        self.pos = end;
        Ok(PackedIter {
            data: self.data.clone(),
            pos: start,
            end,
            ty,
            field: header.number,
        })
    }
}

/// Lazy iterator over the elements of a packed field.
#[derive(Debug, Clone)]
pub struct PackedIter {
    data: Bytes,
    pos: usize,
    end: usize,
    ty: ScalarType,
    field: u32,
}

impl PackedIter {
    /// Lower bound on the number of remaining elements.
    fn min_remaining(&self) -> usize {
        let bytes = self.end - self.pos;
        match self.ty.wire_type() {
            WireType::I32 => bytes / 4,
            WireType::I64 => bytes / 8,
            // Varints take at most 10 bytes each.
            _ => bytes.div_ceil(10),
        }
    }
}

impl Iterator for PackedIter {
    type Item = Result<Value, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pos >= self.end {
            return None;
        }
        let result = scalar::decode(self.ty, &self.data, &mut self.pos, self.end)
            .map_err(|e| e.in_field(self.field));
        if result.is_err() {
            // Fuse after the first error.
            self.pos = self.end;
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.min_remaining(), Some(self.end - self.pos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_enumerate_fields() {
        // field 1 = 42, field 2 = "abc"
        let mut reader = ProtoReader::new(vec![0x08, 0x2A, 0x12, 0x03, b'a', b'b', b'c']);

        let header = reader.read_field_header().unwrap().unwrap();
        assert_eq!((header.number(), header.wire_type()), (1, WireType::Varint));
        assert_eq!(reader.read_scalar(ScalarType::Int32).unwrap(), Value::I32(42));

        let header = reader.read_field_header().unwrap().unwrap();
        assert_eq!((header.number(), header.wire_type()), (2, WireType::Len));
        assert_eq!(reader.read_string().unwrap(), "abc");

        assert!(reader.read_field_header().unwrap().is_none());
    }

    #[test]
    fn test_wire_type_mismatch_reports_location() {
        let mut reader = ProtoReader::new(vec![0x08, 0x2A, 0x12, 0x01, b'x']);
        reader.read_field_header().unwrap();
        reader.read_scalar(ScalarType::Int32).unwrap();
        reader.read_field_header().unwrap();

        let err = reader.read_scalar(ScalarType::Int32).unwrap_err();
        assert_eq!(
            err.kind(),
            &ErrorKind::WireTypeMismatch {
                expected: WireType::Varint,
                actual: 2
            }
        );
        assert_eq!(err.context().field, Some(2));
        assert_eq!(err.context().offset, Some(2));
    }

    #[test]
    fn test_sub_message_limits() {
        // field 3 = { field 1 = 7 }, field 4 = 1
        let mut reader = ProtoReader::new(vec![0x1a, 0x02, 0x08, 0x07, 0x20, 0x01]);
        reader.read_field_header().unwrap();
        let token = reader.enter_sub_message().unwrap();
        assert_eq!(reader.depth(), 1);

        let header = reader.read_field_header().unwrap().unwrap();
        assert_eq!(header.number(), 1);
        assert_eq!(reader.read_varint().unwrap(), 7);
        assert!(reader.read_field_header().unwrap().is_none());
        reader.leave_sub_message(token).unwrap();

        let header = reader.read_field_header().unwrap().unwrap();
        assert_eq!(header.number(), 4);
        assert_eq!(reader.read_scalar(ScalarType::Bool).unwrap(), Value::Bool(true));
        assert!(reader.read_field_header().unwrap().is_none());
    }

    #[test]
    fn test_depth_limit() {
        // Three nested empty-ish messages: 1 { 1 { 1 {} } }
        let data = vec![0x0a, 0x04, 0x0a, 0x02, 0x0a, 0x00];
        let mut reader = ProtoReader::new(data).with_max_depth(2);

        reader.read_field_header().unwrap();
        let _outer = reader.enter_sub_message().unwrap();
        reader.read_field_header().unwrap();
        let _inner = reader.enter_sub_message().unwrap();
        reader.read_field_header().unwrap();
        let err = reader.enter_sub_message().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DepthLimitExceeded { limit: 2 });
    }

    #[test]
    fn test_truncated_length() {
        let mut reader = ProtoReader::new(vec![0x12, 0x05, b'a']);
        reader.read_field_header().unwrap();
        let err = reader.read_string().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnexpectedEndOfInput);
        assert_eq!(err.context().offset, Some(1));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut reader = ProtoReader::new(vec![0x12, 0x02, 0xff, 0xfe]);
        reader.read_field_header().unwrap();
        let err = reader.read_string().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::InvalidUtf8);
    }

    #[test]
    fn test_capture_and_skip() {
        let mut reader = ProtoReader::new(vec![0x18, 0x96, 0x01, 0x25, 1, 2, 3, 4, 0x08, 0x01]);
        reader.read_field_header().unwrap();
        let raw = reader.capture_field().unwrap();
        assert_eq!(&raw[..], &[0x18, 0x96, 0x01]);

        reader.read_field_header().unwrap();
        reader.skip_field().unwrap();

        let header = reader.read_field_header().unwrap().unwrap();
        assert_eq!(header.number(), 1);
    }

    #[test]
    fn test_read_packed() {
        // field 4, packed varints [3, 270, 86942]
        let data = vec![0x22, 0x06, 0x03, 0x8E, 0x02, 0x9E, 0xA7, 0x05];
        let mut reader = ProtoReader::new(data);
        reader.read_field_header().unwrap();
        let values: Result<Vec<_>, _> = reader.read_packed(ScalarType::Int32).unwrap().collect();
        assert_eq!(
            values.unwrap(),
            vec![Value::I32(3), Value::I32(270), Value::I32(86942)]
        );
        assert!(reader.read_field_header().unwrap().is_none());
    }

    #[test]
    fn test_packed_partial_fixed_element() {
        let mut reader = ProtoReader::new(vec![0x0a, 0x05, 0, 0, 0x80, 0x3f, 0x01]);
        reader.read_field_header().unwrap();
        let mut iter = reader.read_packed(ScalarType::Float).unwrap();
        assert_eq!(iter.next().unwrap().unwrap(), Value::F32(1.0));
        assert!(iter.next().unwrap().is_err());
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_header_must_be_consumed() {
        let mut reader = ProtoReader::new(vec![0x08, 0x01, 0x08, 0x02]);
        reader.read_field_header().unwrap();
        let err = reader.read_field_header().unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ProgrammingError { .. }));
    }
}
