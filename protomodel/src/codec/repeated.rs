//! Repeated fields.
//!
//! Packable elements (numeric scalars and enums) are written packed unless
//! the field opts out:
//!
//! ```text
//! packed:   [key, LEN] [len] [v1] [v2] [v3]
//! unpacked: [key] [v1] [key] [v2] [key] [v3]
//! ```
//!
//! Both forms are accepted on decode regardless of the declaration, and may
//! even be mixed within one message.

use bytes::BufMut;

use super::{scalar, Nested, Resolved};
use crate::error::Error;
use crate::model::ScalarType;
use crate::reader::{FieldHeader, ProtoReader};
use crate::util::CastFrom;
use crate::value::Value;
use crate::wire::WireType;
use crate::writer::{EncodedKey, ProtoWriter};

fn expect_list(value: &Value) -> Result<&[Value], Error> {
    match value {
        Value::List(list) => Ok(list),
        other => Err(Error::value_mismatch("list", other.kind_name())),
    }
}

fn packed_payload_len<N: Nested>(
    element: &Resolved,
    list: &[Value],
    n: &N,
    depth: usize,
) -> Result<usize, Error> {
    list.iter()
        .map(|value| element.payload_len(value, n, depth))
        .sum()
}

pub(super) fn encoded_len<N: Nested>(
    key: &EncodedKey,
    element: &Resolved,
    packed: bool,
    value: &Value,
    n: &N,
    depth: usize,
) -> Result<usize, Error> {
    let list = expect_list(value)?;
    if list.is_empty() {
        return Ok(0);
    }
    if packed {
        let payload = packed_payload_len(element, list, n, depth)?;
        return Ok(key.len() + scalar::len_delimited_len(payload));
    }
    let mut len = key.len() * list.len();
    for value in list {
        len += element.payload_len(value, n, depth)?;
    }
    Ok(len)
}

pub(super) fn encode<B: BufMut, N: Nested>(
    number: u32,
    key: &EncodedKey,
    element: &Resolved,
    packed: bool,
    value: &Value,
    w: &mut ProtoWriter<B>,
    n: &N,
) -> Result<(), Error> {
    let list = expect_list(value)?;
    if list.is_empty() {
        return Ok(());
    }
    if packed {
        let payload = packed_payload_len(element, list, n, w.depth())?;
        w.write_encoded_key(key);
        w.write_varint(u64::cast_from(payload));
        for value in list {
            element.write_packed(value, w)?;
        }
        return Ok(());
    }
    for value in list {
        element.write(number, key, value, w, n)?;
    }
    Ok(())
}

/// Append the elements of the current field to `list`.
pub(super) fn decode<N: Nested>(
    r: &mut ProtoReader,
    header: FieldHeader,
    element: &Resolved,
    list: &mut Vec<Value>,
    n: &N,
) -> Result<(), Error> {
    if header.wire_type() == WireType::Len && element.is_packable() {
        let ty = match element {
            Resolved::Scalar(ty) => *ty,
            _ => ScalarType::Int32,
        };
        let values = r.read_packed(ty)?;
        list.reserve(values.size_hint().0);
        for value in values {
            let value = value?;
            let value = match element {
                Resolved::Enum(desc) => match value {
                    Value::I32(wire) => Value::Enum(desc.from_wire(wire)),
                    other => return Err(Error::value_mismatch("int32", other.kind_name())),
                },
                _ => value,
            };
            list.push(value);
        }
        return Ok(());
    }
    list.push(element.read(r, n)?);
    Ok(())
}
