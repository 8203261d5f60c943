//! The dynamic object graph the engine reads and writes.
//!
//! A [`Message`] is a type handle plus a bag of present fields keyed by field
//! number. Absent fields are simply missing from the bag, their declared
//! default is available through [`Message::get_or_default`].

use std::collections::{btree_map, BTreeMap};

use bytes::Bytes;

use crate::error::Error;
use crate::model::{FieldDescriptor, TypeHandle};
use crate::unknown::UnknownFields;

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Bytes),
    /// The in-memory (natural) value of an enum, mapped to its wire value on
    /// encode.
    Enum(i32),
    Message(Box<Message>),
    /// Elements of a repeated field.
    List(Vec<Value>),
    /// Entries of a map field.
    Map(BTreeMap<MapKey, Value>),
}

impl Value {
    /// Short name of the variant, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "bool",
            Value::I32(_) => "int32",
            Value::I64(_) => "int64",
            Value::U32(_) => "uint32",
            Value::U64(_) => "uint64",
            Value::F32(_) => "float",
            Value::F64(_) => "double",
            Value::String(_) => "string",
            Value::Bytes(_) => "bytes",
            Value::Enum(_) => "enum",
            Value::Message(_) => "message",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(v) => Some(v),
            _ => None,
        }
    }

    /// Natural value of an enum.
    pub fn as_enum(&self) -> Option<i32> {
        match self {
            Value::Enum(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&Message> {
        match self {
            Value::Message(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_message_mut(&mut self) -> Option<&mut Message> {
        match self {
            Value::Message(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<MapKey, Value>> {
        match self {
            Value::Map(v) => Some(v),
            _ => None,
        }
    }
}

macro_rules! impl_value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {$(
        impl From<$ty> for Value {
            #[inline]
            fn from(v: $ty) -> Self {
                Value::$variant(v)
            }
        }
    )+};
}

impl_value_from! {
    bool => Bool,
    i32 => I32,
    i64 => I64,
    u32 => U32,
    u64 => U64,
    f32 => F32,
    f64 => F64,
    String => String,
    Bytes => Bytes,
    Vec<Value> => List,
    BTreeMap<MapKey, Value> => Map,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(v))
    }
}

impl From<Message> for Value {
    fn from(v: Message) -> Self {
        Value::Message(Box::new(v))
    }
}

/// Key of a map entry.
///
/// Protobuf allows any integral or string type as a map key. Floating point,
/// bytes, enum and message keys are rejected when the type is built.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    String(String),
}

impl MapKey {
    pub fn kind_name(&self) -> &'static str {
        match self {
            MapKey::Bool(_) => "bool",
            MapKey::I32(_) => "int32",
            MapKey::I64(_) => "int64",
            MapKey::U32(_) => "uint32",
            MapKey::U64(_) => "uint64",
            MapKey::String(_) => "string",
        }
    }

    /// Convert to the equivalent scalar [`Value`].
    pub fn into_value(self) -> Value {
        match self {
            MapKey::Bool(v) => Value::Bool(v),
            MapKey::I32(v) => Value::I32(v),
            MapKey::I64(v) => Value::I64(v),
            MapKey::U32(v) => Value::U32(v),
            MapKey::U64(v) => Value::U64(v),
            MapKey::String(v) => Value::String(v),
        }
    }

    /// Convert a scalar [`Value`] into a key.
    pub fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Bool(v) => Ok(MapKey::Bool(v)),
            Value::I32(v) => Ok(MapKey::I32(v)),
            Value::I64(v) => Ok(MapKey::I64(v)),
            Value::U32(v) => Ok(MapKey::U32(v)),
            Value::U64(v) => Ok(MapKey::U64(v)),
            Value::String(v) => Ok(MapKey::String(v)),
            other => Err(Error::value_mismatch("map key", other.kind_name())),
        }
    }
}

impl From<&str> for MapKey {
    fn from(v: &str) -> Self {
        MapKey::String(v.to_owned())
    }
}

impl From<String> for MapKey {
    fn from(v: String) -> Self {
        MapKey::String(v)
    }
}

impl From<i32> for MapKey {
    fn from(v: i32) -> Self {
        MapKey::I32(v)
    }
}

impl From<i64> for MapKey {
    fn from(v: i64) -> Self {
        MapKey::I64(v)
    }
}

impl From<u32> for MapKey {
    fn from(v: u32) -> Self {
        MapKey::U32(v)
    }
}

impl From<u64> for MapKey {
    fn from(v: u64) -> Self {
        MapKey::U64(v)
    }
}

impl From<bool> for MapKey {
    fn from(v: bool) -> Self {
        MapKey::Bool(v)
    }
}

/// An instance of a described message type.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    ty: TypeHandle,
    fields: BTreeMap<u32, Value>,
    unknown: UnknownFields,
    /// Unknown fields read inside the include payload of a chain member.
    level_unknown: BTreeMap<TypeHandle, UnknownFields>,
}

impl Message {
    /// Create an empty instance of `ty`.
    pub fn new(ty: TypeHandle) -> Self {
        Message {
            ty,
            fields: BTreeMap::new(),
            unknown: UnknownFields::default(),
            level_unknown: BTreeMap::new(),
        }
    }

    /// The runtime type of this instance.
    ///
    /// Decoding a payload written for an included subtype promotes the
    /// instance to that subtype.
    pub fn type_handle(&self) -> TypeHandle {
        self.ty
    }

    pub(crate) fn set_type(&mut self, ty: TypeHandle) {
        self.ty = ty;
    }

    /// Returns the value of a present field.
    pub fn get(&self, number: u32) -> Option<&Value> {
        self.fields.get(&number)
    }

    pub fn get_mut(&mut self, number: u32) -> Option<&mut Value> {
        self.fields.get_mut(&number)
    }

    /// Returns the value of a field, or its declared default when absent.
    ///
    /// Message typed fields have no default, `None` means absent.
    pub fn get_or_default<'a>(&'a self, field: &'a FieldDescriptor) -> Option<&'a Value> {
        self.fields
            .get(&field.number())
            .or_else(|| field.default_value())
    }

    /// Set a field, replacing any previous value.
    pub fn set(&mut self, number: u32, value: impl Into<Value>) -> &mut Self {
        self.fields.insert(number, value.into());
        self
    }

    /// Builder style [`Message::set`].
    #[must_use]
    pub fn with(mut self, number: u32, value: impl Into<Value>) -> Self {
        self.fields.insert(number, value.into());
        self
    }

    /// Remove a field, returning its value.
    pub fn take(&mut self, number: u32) -> Option<Value> {
        self.fields.remove(&number)
    }

    pub fn clear(&mut self, number: u32) {
        self.fields.remove(&number);
    }

    pub fn contains(&self, number: u32) -> bool {
        self.fields.contains_key(&number)
    }

    /// Present fields in ascending field number order.
    pub fn fields(&self) -> impl Iterator<Item = (u32, &Value)> + '_ {
        self.fields.iter().map(|(number, value)| (*number, value))
    }

    pub(crate) fn entry(&mut self, number: u32) -> btree_map::Entry<'_, u32, Value> {
        self.fields.entry(number)
    }

    /// `true` when no field is present and no unknown data is held.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
            && self.unknown.is_empty()
            && self.level_unknown.values().all(UnknownFields::is_empty)
    }

    /// Unknown fields preserved while decoding.
    pub fn unknown_fields(&self) -> &UnknownFields {
        &self.unknown
    }

    pub fn unknown_fields_mut(&mut self) -> &mut UnknownFields {
        &mut self.unknown
    }

    /// Unknown fields preserved inside the include payload of `level`, one
    /// of this instance's bases or its own type.
    ///
    /// They are written back inside the same wrapper, so a reader knowing
    /// more of `level` finds them where they were.
    pub fn unknown_fields_at(&self, level: TypeHandle) -> Option<&UnknownFields> {
        self.level_unknown.get(&level)
    }

    pub(crate) fn unknown_fields_at_mut(&mut self, level: TypeHandle) -> &mut UnknownFields {
        self.level_unknown.entry(level).or_default()
    }

    /// Every level that holds unknown fields, in handle order.
    pub fn level_unknown_fields(
        &self,
    ) -> impl Iterator<Item = (TypeHandle, &UnknownFields)> + '_ {
        self.level_unknown.iter().map(|(level, unknown)| (*level, unknown))
    }

    /// Drop all preserved unknown fields, at the top and inside wrappers.
    pub fn clear_unknown_fields(&mut self) {
        self.unknown.clear();
        self.level_unknown.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_key_ordering_is_stable() {
        let mut map = BTreeMap::new();
        map.insert(MapKey::from("b"), Value::I32(2));
        map.insert(MapKey::from("a"), Value::I32(1));
        let keys: Vec<_> = map.keys().cloned().collect();
        assert_eq!(keys, vec![MapKey::from("a"), MapKey::from("b")]);
    }

    #[test]
    fn test_map_key_value_conversion() {
        let key = MapKey::from_value(Value::U64(7)).unwrap();
        assert_eq!(key, MapKey::U64(7));
        assert_eq!(key.into_value(), Value::U64(7));
        assert!(MapKey::from_value(Value::F32(1.0)).is_err());
    }

    #[test]
    fn test_value_accessors() {
        assert_eq!(Value::from(5i32).as_i32(), Some(5));
        assert_eq!(Value::from(5i32).as_i64(), None);
        assert_eq!(Value::from("abc").as_str(), Some("abc"));
        assert_eq!(Value::from(vec![1u8, 2]).as_bytes().map(|b| b.len()), Some(2));
        assert_eq!(Value::List(vec![]).kind_name(), "list");
    }
}
