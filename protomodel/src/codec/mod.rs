//! Member serializers shared by both executors.
//!
//! A [`Member`] is a field descriptor with its references resolved and its
//! key pre-encoded. The interpreter builds members on the fly, execution
//! plans build them once, and both hand them to the same encode and decode
//! routines here, which is what keeps the two paths byte-identical.
//!
//! Merge semantics on decode follow protobuf:
//! - Scalars and enums: last value wins
//! - Embedded messages: recursive merge
//! - Repeated fields: append, packed or not
//! - Map fields: insert, last entry per key wins

use std::sync::Arc;

use bytes::BufMut;

use crate::error::Error;
use crate::model::registry::Registry;
use crate::model::{Element, EnumDescriptor, FieldDescriptor, FieldKind, ScalarType, TypeHandle};
use crate::reader::{FieldHeader, ProtoReader};
use crate::value::{Message, Value};
use crate::wire::WireType;
use crate::writer::{EncodedKey, LengthStrategy, ProtoWriter};

mod map;
pub(crate) mod message;
mod repeated;
pub(crate) mod scalar;

/// Recursion into nested messages, provided by the execution engine.
pub(crate) trait Nested {
    fn max_depth(&self) -> usize;

    /// Framing used for a nested message whose runtime type is `ty`.
    fn length_strategy(&self, ty: TypeHandle) -> Result<LengthStrategy, Error>;

    /// Payload length of `msg`, written in rooted form for a field declared
    /// as `declared`. `depth` is the nesting depth of the payload.
    fn message_len(&self, msg: &Message, declared: TypeHandle, depth: usize)
        -> Result<usize, Error>;

    /// Write the payload of `msg` in rooted form.
    fn write_message<B: BufMut>(
        &self,
        w: &mut ProtoWriter<B>,
        msg: &Message,
        declared: TypeHandle,
    ) -> Result<(), Error>;

    /// Read the fields of the sub-message the reader is inside into `msg`,
    /// at the level of `declared`.
    fn read_message(
        &self,
        r: &mut ProtoReader,
        msg: &mut Message,
        declared: TypeHandle,
    ) -> Result<(), Error>;
}

#[cold]
fn depth_exceeded(limit: usize) -> Error {
    Error::depth_limit_exceeded(limit)
}

/// Fails if a payload at `depth` would nest deeper than allowed.
#[inline]
pub(crate) fn check_depth(depth: usize, max_depth: usize) -> Result<(), Error> {
    if depth > max_depth {
        return Err(depth_exceeded(max_depth));
    }
    Ok(())
}

/// A single element with its type references resolved.
#[derive(Debug, Clone)]
pub(crate) enum Resolved {
    Scalar(ScalarType),
    Enum(Arc<EnumDescriptor>),
    Message(TypeHandle),
}

impl Resolved {
    pub(crate) fn resolve(element: Element, reg: &Registry) -> Result<Self, Error> {
        Ok(match element {
            Element::Scalar(ty) => Resolved::Scalar(ty),
            Element::Enum(handle) => Resolved::Enum(Arc::clone(reg.enumeration(handle)?)),
            Element::Message(handle) => {
                reg.message(handle)?;
                Resolved::Message(handle)
            }
        })
    }

    pub(crate) fn wire_type(&self) -> WireType {
        match self {
            Resolved::Scalar(ty) => ty.wire_type(),
            Resolved::Enum(_) => WireType::Varint,
            Resolved::Message(_) => WireType::Len,
        }
    }

    pub(crate) fn is_packable(&self) -> bool {
        match self {
            Resolved::Scalar(ty) => ty.is_packable(),
            Resolved::Enum(_) => true,
            Resolved::Message(_) => false,
        }
    }

    /// Value used when a map entry omits its value.
    fn missing_value(&self) -> Value {
        match self {
            Resolved::Scalar(ty) => ty.zero_value(),
            Resolved::Enum(_) => Value::Enum(0),
            Resolved::Message(ty) => Value::from(Message::new(*ty)),
        }
    }

    /// Length of one element's payload, without its key.
    pub(crate) fn payload_len<N: Nested>(
        &self,
        value: &Value,
        n: &N,
        depth: usize,
    ) -> Result<usize, Error> {
        match self {
            Resolved::Scalar(ty) => scalar::encoded_len(*ty, value),
            Resolved::Enum(desc) => {
                scalar::encoded_len(ScalarType::Int32, &enum_to_wire(desc, value)?)
            }
            Resolved::Message(declared) => {
                message::framed_len(expect_message(value)?, *declared, n, depth)
            }
        }
    }

    /// Write one element, key included.
    pub(crate) fn write<B: BufMut, N: Nested>(
        &self,
        number: u32,
        key: &EncodedKey,
        value: &Value,
        w: &mut ProtoWriter<B>,
        n: &N,
    ) -> Result<(), Error> {
        match self {
            Resolved::Scalar(ty) => {
                w.write_encoded_key(key);
                scalar::encode(*ty, value, w)
            }
            Resolved::Enum(desc) => {
                let wire = enum_to_wire(desc, value)?;
                w.write_encoded_key(key);
                scalar::encode(ScalarType::Int32, &wire, w)
            }
            Resolved::Message(declared) => {
                message::write_framed(number, expect_message(value)?, *declared, w, n)
            }
        }
    }

    /// Write one element of a packed run.
    fn write_packed<B: BufMut>(&self, value: &Value, w: &mut ProtoWriter<B>) -> Result<(), Error> {
        match self {
            Resolved::Scalar(ty) => scalar::encode(*ty, value, w),
            Resolved::Enum(desc) => {
                scalar::encode(ScalarType::Int32, &enum_to_wire(desc, value)?, w)
            }
            Resolved::Message(_) => Err(Error::programming_error("messages cannot be packed")),
        }
    }

    /// Read the current field as one fresh element.
    pub(crate) fn read<N: Nested>(&self, r: &mut ProtoReader, n: &N) -> Result<Value, Error> {
        match self {
            Resolved::Scalar(ty) => r.read_scalar(*ty),
            Resolved::Enum(desc) => enum_from_wire(desc, r.read_scalar(ScalarType::Int32)?),
            Resolved::Message(declared) => {
                let mut msg = Message::new(*declared);
                message::read_into(r, &mut msg, *declared, n)?;
                Ok(Value::from(msg))
            }
        }
    }
}

fn enum_to_wire(desc: &EnumDescriptor, value: &Value) -> Result<Value, Error> {
    match value {
        Value::Enum(natural) => Ok(Value::I32(desc.to_wire(*natural))),
        other => Err(Error::value_mismatch("enum", other.kind_name())),
    }
}

fn enum_from_wire(desc: &EnumDescriptor, wire: Value) -> Result<Value, Error> {
    match wire {
        Value::I32(wire) => Ok(Value::Enum(desc.from_wire(wire))),
        other => Err(Error::value_mismatch("int32", other.kind_name())),
    }
}

fn expect_message(value: &Value) -> Result<&Message, Error> {
    match value {
        Value::Message(msg) => Ok(msg),
        other => Err(Error::value_mismatch("message", other.kind_name())),
    }
}

/// Resolved shape of a member.
#[derive(Debug, Clone)]
pub(crate) enum MemberKind {
    Single(Resolved),
    Repeated { element: Resolved, packed: bool },
    Map { key: ScalarType, value: Resolved },
}

/// A field ready to be encoded and decoded.
#[derive(Debug, Clone)]
pub(crate) struct Member {
    number: u32,
    key: EncodedKey,
    kind: MemberKind,
    required: bool,
    presence: bool,
    default: Option<Value>,
}

impl Member {
    pub(crate) fn resolve(field: &FieldDescriptor, reg: &Registry) -> Result<Self, Error> {
        let kind = match field.kind() {
            FieldKind::Single(element) => MemberKind::Single(Resolved::resolve(element, reg)?),
            FieldKind::Repeated { element, packed } => {
                let element = Resolved::resolve(element, reg)?;
                let packed = packed && element.is_packable();
                MemberKind::Repeated { element, packed }
            }
            FieldKind::Map { key, value } => MemberKind::Map {
                key,
                value: Resolved::resolve(value, reg)?,
            },
        };
        let wire_type = match &kind {
            MemberKind::Single(element) => element.wire_type(),
            MemberKind::Repeated { packed: true, .. } => WireType::Len,
            MemberKind::Repeated { element, .. } => element.wire_type(),
            MemberKind::Map { .. } => WireType::Len,
        };
        Ok(Member {
            number: field.number(),
            key: EncodedKey::new(field.number(), wire_type),
            kind,
            required: field.is_required(),
            presence: field.has_presence(),
            default: field.default_value().cloned(),
        })
    }

    #[inline]
    pub(crate) fn number(&self) -> u32 {
        self.number
    }

    #[inline]
    pub(crate) fn is_required(&self) -> bool {
        self.required
    }

    /// Returns the value to write, `None` when the field is omitted.
    #[inline]
    fn written<'v>(&self, value: Option<&'v Value>) -> Result<Option<&'v Value>, Error> {
        match value {
            None if self.required => Err(Error::required_field_missing(self.number)),
            None => Ok(None),
            Some(value) => {
                let elided = matches!(self.kind, MemberKind::Single(_))
                    && !self.required
                    && !self.presence
                    && self.default.as_ref() == Some(value);
                Ok((!elided).then_some(value))
            }
        }
    }

    /// Encoded length of the field, keys included.
    pub(crate) fn encoded_len<N: Nested>(
        &self,
        value: Option<&Value>,
        n: &N,
        depth: usize,
    ) -> Result<usize, Error> {
        self.encoded_len_inner(value, n, depth)
            .map_err(|e| e.in_field(self.number))
    }

    fn encoded_len_inner<N: Nested>(
        &self,
        value: Option<&Value>,
        n: &N,
        depth: usize,
    ) -> Result<usize, Error> {
        let Some(value) = self.written(value)? else {
            return Ok(0);
        };
        let len = match &self.kind {
            MemberKind::Single(element) => {
                self.key.len() + element.payload_len(value, n, depth)?
            }
            MemberKind::Repeated { element, packed } => {
                repeated::encoded_len(&self.key, element, *packed, value, n, depth)?
            }
            MemberKind::Map { key, value: element } => {
                map::encoded_len(&self.key, *key, element, value, n, depth)?
            }
        };
        Ok(len)
    }

    pub(crate) fn encode<B: BufMut, N: Nested>(
        &self,
        value: Option<&Value>,
        w: &mut ProtoWriter<B>,
        n: &N,
    ) -> Result<(), Error> {
        let Some(value) = self.written(value)? else {
            return Ok(());
        };
        match &self.kind {
            MemberKind::Single(element) => element.write(self.number, &self.key, value, w, n),
            MemberKind::Repeated { element, packed } => {
                repeated::encode(self.number, &self.key, element, *packed, value, w, n)
            }
            MemberKind::Map { key, value: element } => {
                map::encode(self.number, *key, element, value, w, n)
            }
        }
        .map_err(|e| e.in_field(self.number))
    }

    /// Decode the field the reader is positioned at into `msg`, merging with
    /// what is already there.
    pub(crate) fn decode<N: Nested>(
        &self,
        r: &mut ProtoReader,
        header: FieldHeader,
        msg: &mut Message,
        n: &N,
    ) -> Result<(), Error> {
        match &self.kind {
            MemberKind::Single(Resolved::Message(declared)) => {
                let slot = msg
                    .entry(self.number)
                    .or_insert_with(|| Value::from(Message::new(*declared)));
                if slot.as_message().is_none() {
                    *slot = Value::from(Message::new(*declared));
                }
                match slot.as_message_mut() {
                    Some(nested) => message::read_into(r, nested, *declared, n),
                    None => Err(Error::programming_error("message slot was just filled")),
                }
            }
            MemberKind::Single(element) => {
                let value = element.read(r, n)?;
                msg.set(self.number, value);
                Ok(())
            }
            MemberKind::Repeated { element, .. } => {
                let slot = msg.entry(self.number).or_insert_with(|| Value::List(Vec::new()));
                if !matches!(slot, Value::List(_)) {
                    *slot = Value::List(Vec::new());
                }
                match slot {
                    Value::List(list) => repeated::decode(r, header, element, list, n),
                    _ => Err(Error::programming_error("list slot was just filled")),
                }
            }
            MemberKind::Map { key, value } => {
                let slot = msg
                    .entry(self.number)
                    .or_insert_with(|| Value::Map(Default::default()));
                if !matches!(slot, Value::Map(_)) {
                    *slot = Value::Map(Default::default());
                }
                match slot {
                    Value::Map(map) => map::decode(r, *key, value, map, n),
                    _ => Err(Error::programming_error("map slot was just filled")),
                }
            }
        }
        .map_err(|e| e.in_field(self.number))
    }
}
