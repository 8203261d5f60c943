//! LEB128 variable-length integer encoding/decoding.
//!
//! Protobuf calls these "varints": little-endian groups of 7 bits, with the
//! high bit of each byte set when more bytes follow. A `u64` needs at most 10
//! bytes.

// This module uses `as` casts which have been thoroughly reviewed for correctness.
#![allow(clippy::as_conversions)]

use crate::error::Error;
use crate::util::{likely, unlikely};

/// Maximum number of bytes a 64-bit varint may occupy.
pub const MAX_VARINT_LEN: usize = 10;

/// Types that can be encoded as a LEB128 integer.
pub trait LebCodec: Sized + Copy {
    /// Encode `self` as a LEB128 variable length integer into the provided
    /// buffer, returning the number of bytes written.
    fn encode_leb128<B: bytes::BufMut + ?Sized>(self, buf: &mut B) -> usize;

    /// The number of bytes required to encode this integer.
    fn encoded_leb128_len(self) -> usize;
}

impl LebCodec for u64 {
    #[inline]
    fn encode_leb128<B: bytes::BufMut + ?Sized>(self, buf: &mut B) -> usize {
        // Fast path, a single byte.
        if likely(self < 0x80) {
            buf.put_u8(self as u8);
            return 1;
        }

        let mut scratch = [0u8; MAX_VARINT_LEN];
        let mut value = self;
        let mut len = 0;
        while value >= 0x80 {
            scratch[len] = (value as u8) | 0x80;
            value >>= 7;
            len += 1;
        }
        scratch[len] = value as u8;
        len += 1;

        buf.put_slice(&scratch[..len]);
        len
    }

    /// Compute the LEB128 encoded length using leading_zeros.
    ///
    /// LEB128 encodes 7 bits per byte. The number of bytes needed is
    /// ceil(significant_bits / 7), with a minimum of 1 byte for value 0.
    #[inline]
    fn encoded_leb128_len(self) -> usize {
        // Lookup table mapping leading_zeros (0-64) to LEB128 byte count.
        #[rustfmt::skip]
        const LZ_TO_LEN: [u8; 65] = [
            10,                                         // 0:     64 bits -> 10 bytes
            9, 9, 9, 9, 9, 9, 9,                        // 1-7:   63-57 bits -> 9 bytes
            8, 8, 8, 8, 8, 8, 8,                        // 8-14:  56-50 bits -> 8 bytes
            7, 7, 7, 7, 7, 7, 7,                        // 15-21: 49-43 bits -> 7 bytes
            6, 6, 6, 6, 6, 6, 6,                        // 22-28: 42-36 bits -> 6 bytes
            5, 5, 5, 5, 5, 5, 5,                        // 29-35: 35-29 bits -> 5 bytes
            4, 4, 4, 4, 4, 4, 4,                        // 36-42: 28-22 bits -> 4 bytes
            3, 3, 3, 3, 3, 3, 3,                        // 43-49: 21-15 bits -> 3 bytes
            2, 2, 2, 2, 2, 2, 2,                        // 50-56: 14-8 bits  -> 2 bytes
            1, 1, 1, 1, 1, 1, 1, 1,                     // 57-64: 7-0 bits   -> 1 byte
        ];

        LZ_TO_LEN[self.leading_zeros() as usize] as usize
    }
}

impl LebCodec for u32 {
    #[inline]
    fn encode_leb128<B: bytes::BufMut + ?Sized>(self, buf: &mut B) -> usize {
        u64::from(self).encode_leb128(buf)
    }

    #[inline]
    fn encoded_leb128_len(self) -> usize {
        // Lookup table mapping leading_zeros (0-32) to LEB128 byte count.
        #[rustfmt::skip]
        const LZ_TO_LEN: [u8; 33] = [
            5, 5, 5, 5,                         // 0-3:   32-29 bits -> 5 bytes
            4, 4, 4, 4, 4, 4, 4,                // 4-10:  28-22 bits -> 4 bytes
            3, 3, 3, 3, 3, 3, 3,                // 11-17: 21-15 bits -> 3 bytes
            2, 2, 2, 2, 2, 2, 2,                // 18-24: 14-8 bits  -> 2 bytes
            1, 1, 1, 1, 1, 1, 1, 1,             // 25-32: 7-0 bits   -> 1 byte
        ];

        LZ_TO_LEN[self.leading_zeros() as usize] as usize
    }
}

/// Decode a varint from the front of `data`.
///
/// Returns the decoded value and the number of bytes it occupied. Fails with
/// [`ErrorKind::MalformedVarint`](crate::ErrorKind::MalformedVarint) if the
/// varint is longer than 10 bytes or overflows a `u64`, and with
/// [`ErrorKind::UnexpectedEndOfInput`](crate::ErrorKind::UnexpectedEndOfInput)
/// if `data` ends before the final byte.
#[inline]
pub fn decode_varint(data: &[u8]) -> Result<(u64, usize), Error> {
    // Fast path, most varints (keys, small lengths) are a single byte.
    match data.first() {
        Some(&b) if likely(b < 0x80) => return Ok((u64::from(b), 1)),
        Some(_) => (),
        None => return Err(Error::unexpected_end_of_input()),
    }

    let mut value = 0u64;
    for (i, &b) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        let shift = 7 * i as u32;
        if i == MAX_VARINT_LEN - 1 {
            // The tenth byte may only contribute the final bit of a u64.
            if unlikely(b > 0x01) {
                return Err(Error::malformed_varint());
            }
            return Ok((value | (u64::from(b) << shift), MAX_VARINT_LEN));
        }
        value |= u64::from(b & 0x7f) << shift;
        if b < 0x80 {
            return Ok((value, i + 1));
        }
    }

    // Ran out of input before reading the final byte.
    Err(Error::unexpected_end_of_input())
}

/// Decode a varint from a [`bytes::Buf`], advancing it past the varint.
pub fn decode_varint_buf<B: bytes::Buf>(buf: &mut B) -> Result<u64, Error> {
    let chunk = buf.chunk();

    // Fast path: current chunk has enough bytes, or holds the terminator.
    if chunk.len() >= MAX_VARINT_LEN || chunk.iter().any(|b| *b < 0x80) {
        let (value, len) = decode_varint(chunk)?;
        buf.advance(len);
        return Ok(value);
    }

    // Slow path: the varint spans chunks, read byte by byte.
    let mut scratch = [0u8; MAX_VARINT_LEN];
    for slot in scratch.iter_mut() {
        if !buf.has_remaining() {
            return Err(Error::unexpected_end_of_input());
        }
        *slot = buf.get_u8();
        if *slot < 0x80 {
            break;
        }
    }
    decode_varint(&scratch[..]).map(|(value, _)| value)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use proptest::property_test;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn smoketest_varint_u64() {
        #[track_caller]
        fn test_case(val: u64, len: usize) {
            let mut buffer = Vec::new();
            let encode_len = val.encode_leb128(&mut buffer);

            let (rnd, rnd_len) = decode_varint(&buffer[..]).unwrap();

            assert_eq!(rnd, val, "invalid value");
            assert_eq!(len, rnd_len, "invalid length");
            assert_eq!(len, encode_len, "invalid encode length");
            assert_eq!(len, val.encoded_leb128_len(), "invalid computed length");
        }

        test_case(0, 1);
        test_case(1, 1);
        test_case(42, 1);
        test_case(128, 2);
        test_case(300, 2);
        test_case(72057594037927937, 9);
        test_case(u64::MAX, 10);
    }

    #[test]
    fn smoketest_varint_u32_len() {
        assert_eq!(0u32.encoded_leb128_len(), 1);
        assert_eq!(127u32.encoded_leb128_len(), 1);
        assert_eq!(128u32.encoded_leb128_len(), 2);
        assert_eq!(u32::MAX.encoded_leb128_len(), 5);
    }

    #[test]
    fn test_known_encoding() {
        let mut buffer = Vec::new();
        150u64.encode_leb128(&mut buffer);
        assert_eq!(buffer, [0x96, 0x01]);
    }

    #[test]
    fn test_overlong_varint_is_malformed() {
        // Eleven continuation bytes.
        let data = [0xffu8; 11];
        let err = decode_varint(&data).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MalformedVarint);

        // Ten bytes, but the last one overflows 64 bits.
        let mut data = [0xffu8; 10];
        data[9] = 0x02;
        let err = decode_varint(&data).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::MalformedVarint);
    }

    #[test]
    fn test_truncated_varint() {
        let err = decode_varint(&[0x80, 0x80]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnexpectedEndOfInput);

        let err = decode_varint(&[]).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::UnexpectedEndOfInput);
    }

    #[test]
    fn test_decode_across_chunks() {
        use bytes::Buf;

        let mut encoded = Vec::new();
        u64::MAX.encode_leb128(&mut encoded);
        let (front, back) = encoded.split_at(4);
        let mut chained = front.chain(back);
        assert_eq!(decode_varint_buf(&mut chained).unwrap(), u64::MAX);
        assert!(!chained.has_remaining());
    }

    #[property_test]
    fn proptest_varint_u64(val: u64) {
        let mut buffer = Vec::new();
        let og_len = val.encode_leb128(&mut buffer);

        let (rnd, len) = decode_varint(&buffer[..]).unwrap();
        prop_assert_eq!(rnd, val, "invalid value");
        prop_assert_eq!(len, og_len, "invalid length");
        prop_assert_eq!(val.encoded_leb128_len(), len);
    }

    #[property_test]
    fn proptest_matches_leb128_crate(val: u64) {
        let mut ours = Vec::new();
        val.encode_leb128(&mut ours);
        let mut theirs = Vec::new();
        leb128::write::unsigned(&mut theirs, val).unwrap();
        prop_assert_eq!(&ours, &theirs);

        let decoded = leb128::read::unsigned(&mut &ours[..]).unwrap();
        prop_assert_eq!(decoded, val);
    }

    #[property_test]
    fn proptest_varint_u32_len(val: u32) {
        let mut buffer = Vec::new();
        let og_len = val.encode_leb128(&mut buffer);
        prop_assert_eq!(val.encoded_leb128_len(), og_len);
    }
}
