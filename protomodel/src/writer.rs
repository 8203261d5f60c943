//! A cursor that writes protobuf encoded data into a [`bytes::BufMut`].
//!
//! Sub-messages need their length up front. The writer supports two ways of
//! getting it:
//!
//! * [`LengthStrategy::Measure`]: the caller computes the exact length first,
//!   writes the prefix with [`ProtoWriter::begin_measured`] and streams the
//!   payload straight into the sink. [`ProtoWriter::end_measured`] verifies
//!   that exactly that many bytes were written.
//! * [`LengthStrategy::Buffer`]: the payload is written into a scratch writer
//!   from [`ProtoWriter::begin_buffered`] and copied over, prefix first, by
//!   [`ProtoWriter::end_buffered`].

use bytes::BufMut;
use smallvec::SmallVec;

use crate::error::Error;
use crate::leb128::LebCodec;
use crate::reader::DEFAULT_MAX_DEPTH;
use crate::util::CastFrom;
use crate::wire::{encode_key, encoded_key_len, WireType};

/// How the length prefix of a sub-message is produced.
///
/// Applies to nested messages and include wrappers. Map entries are small
/// and their length is cheap to compute, so they are always measured,
/// whatever strategy a call or type selects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum LengthStrategy {
    /// Compute the length with a sizing pass, then write directly.
    #[default]
    Measure,
    /// Write into a scratch buffer, then copy.
    Buffer,
}

/// A field key encoded ahead of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EncodedKey {
    bytes: [u8; 5],
    len: u8,
}

#[allow(clippy::as_conversions)]
impl EncodedKey {
    pub(crate) fn new(number: u32, wire_type: WireType) -> Self {
        let mut bytes = [0u8; 5];
        let mut slice = &mut bytes[..];
        let len = ((number << 3) | u32::cast_from(wire_type.into_val())).encode_leb128(&mut slice);
        EncodedKey {
            bytes,
            len: len as u8,
        }
    }

    #[inline]
    pub(crate) fn as_slice(&self) -> &[u8] {
        &self.bytes[..usize::cast_from(self.len)]
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        usize::cast_from(self.len)
    }
}

/// Returned by [`ProtoWriter::begin_measured`].
#[must_use = "measured sub-messages must be closed with `end_measured`"]
#[derive(Debug)]
pub struct MeasuredToken {
    depth: usize,
    expected_end: usize,
}

/// Stateful protobuf writer.
#[derive(Debug)]
pub struct ProtoWriter<B> {
    buf: B,
    written: usize,
    /// Depth of this writer itself, non-zero for buffered children.
    base_depth: usize,
    max_depth: usize,
    /// Expected end offsets of open measured sub-messages.
    frames: SmallVec<[usize; 8]>,
}

impl<B: BufMut> ProtoWriter<B> {
    pub fn new(buf: B) -> Self {
        ProtoWriter {
            buf,
            written: 0,
            base_depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
            frames: SmallVec::new(),
        }
    }

    /// Limit how many sub-messages may be nested.
    #[must_use]
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Current nesting depth.
    pub fn depth(&self) -> usize {
        self.base_depth + self.frames.len()
    }

    pub fn into_inner(self) -> B {
        self.buf
    }

    fn check_depth(&self) -> Result<(), Error> {
        if self.depth() >= self.max_depth {
            return Err(Error::depth_limit_exceeded(self.max_depth).at(self.written));
        }
        Ok(())
    }

    #[inline]
    pub fn write_key(&mut self, number: u32, wire_type: WireType) {
        encode_key(wire_type, number, &mut self.buf);
        self.written += encoded_key_len(number);
    }

    #[inline]
    pub(crate) fn write_encoded_key(&mut self, key: &EncodedKey) {
        self.buf.put_slice(key.as_slice());
        self.written += key.len();
    }

    #[inline]
    pub fn write_varint(&mut self, value: u64) {
        self.written += value.encode_leb128(&mut self.buf);
    }

    #[inline]
    pub fn write_fixed32(&mut self, value: u32) {
        self.buf.put_u32_le(value);
        self.written += 4;
    }

    #[inline]
    pub fn write_fixed64(&mut self, value: u64) {
        self.buf.put_u64_le(value);
        self.written += 8;
    }

    /// Write bytes as-is, e.g. preserved unknown fields.
    #[inline]
    pub fn write_raw(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
        self.written += data.len();
    }

    /// Write a length prefix followed by `data`.
    #[inline]
    pub fn write_len_delimited(&mut self, data: &[u8]) {
        self.write_varint(u64::cast_from(data.len()));
        self.write_raw(data);
    }

    /// Open a sub-message whose payload will be exactly `len` bytes.
    pub fn begin_measured(&mut self, number: u32, len: usize) -> Result<MeasuredToken, Error> {
        self.check_depth().map_err(|e| e.in_field(number))?;
        self.write_key(number, WireType::Len);
        self.write_varint(u64::cast_from(len));

        let expected_end = self.written + len;
        self.frames.push(expected_end);
        Ok(MeasuredToken {
            depth: self.depth(),
            expected_end,
        })
    }

    /// Close a measured sub-message.
    pub fn end_measured(&mut self, token: MeasuredToken) -> Result<(), Error> {
        if token.depth != self.depth() || self.frames.last() != Some(&token.expected_end) {
            return Err(Error::programming_error(
                "measured sub-messages must be closed in the order they were opened",
            )
            .at(self.written));
        }
        if self.written != token.expected_end {
            return Err(Error::programming_error(
                "measured length disagrees with the bytes written",
            )
            .at(self.written));
        }
        self.frames.pop();
        Ok(())
    }

    /// Start a sub-message in a scratch buffer.
    pub fn begin_buffered(&self) -> Result<ProtoWriter<Vec<u8>>, Error> {
        self.check_depth()?;
        Ok(ProtoWriter {
            buf: Vec::new(),
            written: 0,
            base_depth: self.depth() + 1,
            max_depth: self.max_depth,
            frames: SmallVec::new(),
        })
    }

    /// Write a buffered sub-message as field `number`.
    pub fn end_buffered(&mut self, number: u32, child: ProtoWriter<Vec<u8>>) -> Result<(), Error> {
        if child.base_depth != self.depth() + 1 || !child.frames.is_empty() {
            return Err(Error::programming_error(
                "buffered sub-message does not belong to this writer",
            )
            .in_field(number)
            .at(self.written));
        }
        self.write_key(number, WireType::Len);
        self.write_len_delimited(&child.buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_encoded_key() {
        let key = EncodedKey::new(1, WireType::Varint);
        assert_eq!(key.as_slice(), &[0x08]);
        let key = EncodedKey::new(16, WireType::Len);
        assert_eq!(key.as_slice(), &[0x82, 0x01]);
        let key = EncodedKey::new(crate::wire::MAXIMUM_FIELD_NUMBER, WireType::I32);
        assert_eq!(key.len(), 5);
    }

    #[test]
    fn test_measured_sub_message() {
        let mut writer = ProtoWriter::new(Vec::new());
        let token = writer.begin_measured(3, 2).unwrap();
        writer.write_key(1, WireType::Varint);
        writer.write_varint(7);
        writer.end_measured(token).unwrap();
        assert_eq!(writer.written(), 4);
        assert_eq!(writer.into_inner(), vec![0x1a, 0x02, 0x08, 0x07]);
    }

    #[test]
    fn test_measured_length_is_verified() {
        let mut writer = ProtoWriter::new(Vec::new());
        let token = writer.begin_measured(3, 5).unwrap();
        writer.write_varint(7);
        let err = writer.end_measured(token).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::ProgrammingError { .. }));
    }

    #[test]
    fn test_buffered_matches_measured() {
        let mut measured = ProtoWriter::new(Vec::new());
        let token = measured.begin_measured(2, 5).unwrap();
        measured.write_key(1, WireType::Len);
        measured.write_len_delimited(b"abc");
        measured.end_measured(token).unwrap();

        let mut buffered = ProtoWriter::new(Vec::new());
        let mut child = buffered.begin_buffered().unwrap();
        child.write_key(1, WireType::Len);
        child.write_len_delimited(b"abc");
        buffered.end_buffered(2, child).unwrap();

        assert_eq!(measured.into_inner(), buffered.into_inner());
    }

    #[test]
    fn test_write_depth_limit() {
        let mut writer = ProtoWriter::new(Vec::new()).with_max_depth(1);
        let _token = writer.begin_measured(1, 0).unwrap();
        let err = writer.begin_measured(1, 0).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::DepthLimitExceeded { limit: 1 });

        let writer = ProtoWriter::new(Vec::new()).with_max_depth(1);
        let child = writer.begin_buffered().unwrap();
        assert!(child.begin_buffered().is_err());
    }

    #[test]
    fn test_fixed_values_are_little_endian() {
        let mut writer = ProtoWriter::new(Vec::new());
        writer.write_fixed32(1);
        writer.write_fixed64(2);
        assert_eq!(
            writer.into_inner(),
            vec![1, 0, 0, 0, 2, 0, 0, 0, 0, 0, 0, 0]
        );
    }
}
