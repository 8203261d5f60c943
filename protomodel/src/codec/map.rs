//! Protobuf map field support.
//!
//! Maps in protobuf are syntactic sugar for `repeated Entry { K key = 1; V value = 2; }`.
//! Each map entry is encoded as a length-delimited record with two fields.
//!
//! # Wire Format
//!
//! ```text
//! [field_tag, LEN] [entry_len] [key_tag=1] [key_value] [value_tag=2] [value_value]
//! ```
//!
//! Both key and value are always written, even when they equal their
//! defaults. An entry missing either on the wire reads it as its default.
//! Entries are always framed by measuring.

use std::collections::BTreeMap;

use bytes::BufMut;

use super::{check_depth, scalar, Nested, Resolved};
use crate::error::Error;
use crate::model::ScalarType;
use crate::reader::ProtoReader;
use crate::value::{MapKey, Message, Value};
use crate::writer::{EncodedKey, ProtoWriter};

const KEY_FIELD: u32 = 1;
const VALUE_FIELD: u32 = 2;

/// Keys 1 and 2 encode to a single byte whatever the wire type.
const ENTRY_KEY_LEN: usize = 1;

fn expect_map(value: &Value) -> Result<&BTreeMap<MapKey, Value>, Error> {
    match value {
        Value::Map(map) => Ok(map),
        other => Err(Error::value_mismatch("map", other.kind_name())),
    }
}

/// Length of one entry's payload. `depth` is the depth of the entry itself.
fn entry_len<N: Nested>(
    key_ty: ScalarType,
    element: &Resolved,
    key: &MapKey,
    value: &Value,
    n: &N,
    depth: usize,
) -> Result<usize, Error> {
    check_depth(depth, n.max_depth())?;
    let key_len = scalar::encoded_len(key_ty, &key.clone().into_value())?;
    let value_len = element.payload_len(value, n, depth)?;
    Ok(ENTRY_KEY_LEN + key_len + ENTRY_KEY_LEN + value_len)
}

pub(super) fn encoded_len<N: Nested>(
    key: &EncodedKey,
    key_ty: ScalarType,
    element: &Resolved,
    value: &Value,
    n: &N,
    depth: usize,
) -> Result<usize, Error> {
    let mut len = 0;
    for (k, v) in expect_map(value)? {
        let entry = entry_len(key_ty, element, k, v, n, depth + 1)?;
        len += key.len() + scalar::len_delimited_len(entry);
    }
    Ok(len)
}

pub(super) fn encode<B: BufMut, N: Nested>(
    number: u32,
    key_ty: ScalarType,
    element: &Resolved,
    value: &Value,
    w: &mut ProtoWriter<B>,
    n: &N,
) -> Result<(), Error> {
    let value_key = EncodedKey::new(VALUE_FIELD, element.wire_type());
    for (k, v) in expect_map(value)? {
        let len = entry_len(key_ty, element, k, v, n, w.depth() + 1)?;
        let token = w.begin_measured(number, len)?;
        w.write_key(KEY_FIELD, key_ty.wire_type());
        scalar::encode(key_ty, &k.clone().into_value(), w)?;
        element.write(VALUE_FIELD, &value_key, v, w, n)?;
        w.end_measured(token)?;
    }
    Ok(())
}

/// Read one entry and insert it into `map`, replacing any previous value.
pub(super) fn decode<N: Nested>(
    r: &mut ProtoReader,
    key_ty: ScalarType,
    element: &Resolved,
    map: &mut BTreeMap<MapKey, Value>,
    n: &N,
) -> Result<(), Error> {
    let token = r.enter_sub_message()?;
    let mut key = None;
    let mut value = None;
    while let Some(header) = r.read_field_header()? {
        match header.number() {
            KEY_FIELD => key = Some(r.read_scalar(key_ty)?),
            VALUE_FIELD => match element {
                Resolved::Message(declared) => {
                    let mut msg = match value.take() {
                        Some(Value::Message(msg)) => *msg,
                        _ => Message::new(*declared),
                    };
                    super::message::read_into(r, &mut msg, *declared, n)?;
                    value = Some(Value::from(msg));
                }
                _ => value = Some(element.read(r, n)?),
            },
            _ => r.skip_field()?,
        }
    }
    r.leave_sub_message(token)?;

    let key = MapKey::from_value(key.unwrap_or_else(|| key_ty.zero_value()))?;
    let value = value.unwrap_or_else(|| element.missing_value());
    map.insert(key, value);
    Ok(())
}
