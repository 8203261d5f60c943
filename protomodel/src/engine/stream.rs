//! Length-prefixed message streams.
//!
//! Several messages can share one buffer when each is preceded by its
//! length, either as a varint or as a little-endian `u32`.

use bytes::{Buf, BufMut, Bytes};

use crate::error::Error;
use crate::leb128::{decode_varint, LebCodec};
use crate::model::{TypeHandle, TypeModel};
use crate::util::CastFrom;
use crate::value::Message;

/// How the length of each message in a stream is written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PrefixStyle {
    /// Varint length.
    #[default]
    Base128,
    /// Four byte little-endian length.
    Fixed32,
}

/// Split one length-prefixed payload off the front of `data`.
fn take_prefixed(data: &mut Bytes, style: PrefixStyle) -> Result<Bytes, Error> {
    let len = match style {
        PrefixStyle::Base128 => {
            let (len, prefix) = decode_varint(&data[..])?;
            let len = usize::try_from(len).map_err(|_| Error::length_overflow(len))?;
            data.advance(prefix);
            len
        }
        PrefixStyle::Fixed32 => {
            let Some(prefix) = data.first_chunk::<4>() else {
                return Err(Error::unexpected_end_of_input());
            };
            let len = usize::cast_from(u32::from_le_bytes(*prefix));
            data.advance(4);
            len
        }
    };
    if data.len() < len {
        return Err(Error::unexpected_end_of_input());
    }
    Ok(data.split_to(len))
}

impl TypeModel {
    /// Write `msg` preceded by its length.
    pub fn serialize_with_length_prefix<B: BufMut>(
        &self,
        msg: &Message,
        style: PrefixStyle,
        buf: &mut B,
    ) -> Result<(), Error> {
        let len = self.encoded_len(msg)?;
        match style {
            PrefixStyle::Base128 => {
                u64::cast_from(len).encode_leb128(buf);
            }
            PrefixStyle::Fixed32 => {
                let len = u32::try_from(len)
                    .map_err(|_| Error::length_overflow(u64::cast_from(len)))?;
                buf.put_u32_le(len);
            }
        }
        self.serialize(msg, buf)
    }

    /// Read one length-prefixed message of type `ty` off the front of `data`.
    ///
    /// Returns `None` when `data` is empty.
    pub fn deserialize_with_length_prefix(
        &self,
        ty: TypeHandle,
        style: PrefixStyle,
        data: &mut Bytes,
    ) -> Result<Option<Message>, Error> {
        if data.is_empty() {
            return Ok(None);
        }
        let payload = take_prefixed(data, style)?;
        self.deserialize(ty, payload).map(Some)
    }

    /// Iterate the length-prefixed messages of type `ty` held in `data`.
    pub fn deserialize_items(
        &self,
        ty: TypeHandle,
        style: PrefixStyle,
        data: impl Into<Bytes>,
    ) -> Items<'_> {
        Items {
            model: self,
            ty,
            style,
            data: data.into(),
        }
    }
}

/// Iterator returned by [`TypeModel::deserialize_items`].
///
/// Stops after the first error.
#[derive(Debug)]
pub struct Items<'m> {
    model: &'m TypeModel,
    ty: TypeHandle,
    style: PrefixStyle,
    data: Bytes,
}

impl Iterator for Items<'_> {
    type Item = Result<Message, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        let result = self
            .model
            .deserialize_with_length_prefix(self.ty, self.style, &mut self.data)
            .transpose()?;
        if result.is_err() {
            self.data = Bytes::new();
        }
        Some(result)
    }
}
