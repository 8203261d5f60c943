//! Bridges between Rust values and dynamic [`Message`]s.
//!
//! [`ProtoElement`] converts a single field element to and from a [`Value`],
//! [`ProtoMapKey`] does the same for map keys, and [`Reflect`] moves a whole
//! struct in and out of a [`Message`]. `#[derive(Describe)]` implements all
//! of them in terms of the helpers in [`field`].

use bytes::{BufMut, Bytes};

use crate::error::Error;
use crate::model::{Describe, ScalarType, TypeModel, TypeRef};
use crate::value::{MapKey, Message, Value};

/// A Rust type that can be held by a field.
pub trait ProtoElement: Sized + 'static {
    /// The declared type of a field holding `Self`.
    fn type_ref() -> TypeRef;

    fn to_value(&self, model: &TypeModel) -> Result<Value, Error>;

    fn from_value(value: Value, model: &TypeModel) -> Result<Self, Error>;

    /// Merge a decoded value into `self`.
    ///
    /// Scalars are replaced, messages override this to merge field by field.
    fn merge_value(&mut self, value: Value, model: &TypeModel) -> Result<(), Error> {
        *self = Self::from_value(value, model)?;
        Ok(())
    }
}

/// A Rust type that can key a map field.
pub trait ProtoMapKey: Sized + 'static {
    fn key_type() -> ScalarType;

    fn to_key(&self) -> MapKey;

    fn from_key(key: MapKey) -> Result<Self, Error>;
}

/// A Rust struct mirroring a described message type.
pub trait Reflect: Describe + Default {
    /// Store the fields of `self` in `msg`.
    fn write_fields(&self, msg: &mut Message, model: &TypeModel) -> Result<(), Error>;

    /// Move the fields this type knows out of `msg` and merge them into `self`.
    fn take_fields(&mut self, msg: &mut Message, model: &TypeModel) -> Result<(), Error>;

    fn to_message(&self, model: &TypeModel) -> Result<Message, Error> {
        let mut msg = Message::new(model.describe::<Self>()?);
        self.write_fields(&mut msg, model)?;
        Ok(msg)
    }

    fn merge_message(&mut self, mut msg: Message, model: &TypeModel) -> Result<(), Error> {
        self.take_fields(&mut msg, model)
    }

    fn from_message(msg: Message, model: &TypeModel) -> Result<Self, Error> {
        let mut value = Self::default();
        value.merge_message(msg, model)?;
        Ok(value)
    }
}

macro_rules! impl_scalar_element {
    ($($ty:ty => $scalar:ident, $variant:ident);+ $(;)?) => {$(
        impl ProtoElement for $ty {
            #[inline]
            fn type_ref() -> TypeRef {
                TypeRef::Scalar(ScalarType::$scalar)
            }

            #[inline]
            fn to_value(&self, _model: &TypeModel) -> Result<Value, Error> {
                Ok(Value::$variant(self.clone()))
            }

            #[inline]
            fn from_value(value: Value, _model: &TypeModel) -> Result<Self, Error> {
                match value {
                    Value::$variant(v) => Ok(v),
                    other => Err(Error::value_mismatch(
                        stringify!($variant),
                        other.kind_name(),
                    )),
                }
            }
        }
    )+};
}

impl_scalar_element! {
    bool => Bool, Bool;
    i32 => Int32, I32;
    i64 => Int64, I64;
    u32 => UInt32, U32;
    u64 => UInt64, U64;
    f32 => Float, F32;
    f64 => Double, F64;
    String => String, String;
    Bytes => Bytes, Bytes;
}

impl<T: ProtoElement> ProtoElement for Box<T> {
    fn type_ref() -> TypeRef {
        T::type_ref()
    }

    fn to_value(&self, model: &TypeModel) -> Result<Value, Error> {
        (**self).to_value(model)
    }

    fn from_value(value: Value, model: &TypeModel) -> Result<Self, Error> {
        T::from_value(value, model).map(Box::new)
    }

    fn merge_value(&mut self, value: Value, model: &TypeModel) -> Result<(), Error> {
        (**self).merge_value(value, model)
    }
}

macro_rules! impl_map_key {
    ($($ty:ty => $scalar:ident, $variant:ident);+ $(;)?) => {$(
        impl ProtoMapKey for $ty {
            #[inline]
            fn key_type() -> ScalarType {
                ScalarType::$scalar
            }

            #[inline]
            fn to_key(&self) -> MapKey {
                MapKey::$variant(self.clone())
            }

            #[inline]
            fn from_key(key: MapKey) -> Result<Self, Error> {
                match key {
                    MapKey::$variant(v) => Ok(v),
                    other => Err(Error::value_mismatch(
                        stringify!($variant),
                        other.kind_name(),
                    )),
                }
            }
        }
    )+};
}

impl_map_key! {
    bool => Bool, Bool;
    i32 => Int32, I32;
    i64 => Int64, I64;
    u32 => UInt32, U32;
    u64 => UInt64, U64;
    String => String, String;
}

/// Conversions used by derived implementations.
///
/// Every `take_*` function only touches `dst` when the field is present in
/// `msg`, which gives decoding into an existing value merge semantics.
pub mod field {
    use super::*;

    pub fn put<T: ProtoElement>(
        msg: &mut Message,
        number: u32,
        value: &T,
        model: &TypeModel,
    ) -> Result<(), Error> {
        let value = value.to_value(model).map_err(|e| e.in_field(number))?;
        msg.set(number, value);
        Ok(())
    }

    pub fn put_optional<T: ProtoElement>(
        msg: &mut Message,
        number: u32,
        value: &Option<T>,
        model: &TypeModel,
    ) -> Result<(), Error> {
        match value {
            Some(value) => put(msg, number, value, model),
            None => Ok(()),
        }
    }

    pub fn put_repeated<T: ProtoElement>(
        msg: &mut Message,
        number: u32,
        values: &[T],
        model: &TypeModel,
    ) -> Result<(), Error> {
        if values.is_empty() {
            return Ok(());
        }
        let list = values
            .iter()
            .map(|v| v.to_value(model))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| e.in_field(number))?;
        msg.set(number, Value::List(list));
        Ok(())
    }

    pub fn put_map<'a, K, V>(
        msg: &mut Message,
        number: u32,
        entries: impl IntoIterator<Item = (&'a K, &'a V)>,
        model: &TypeModel,
    ) -> Result<(), Error>
    where
        K: ProtoMapKey,
        V: ProtoElement,
    {
        let map = entries
            .into_iter()
            .map(|(k, v)| Ok((k.to_key(), v.to_value(model)?)))
            .collect::<Result<std::collections::BTreeMap<_, _>, Error>>()
            .map_err(|e| e.in_field(number))?;
        if !map.is_empty() {
            msg.set(number, Value::Map(map));
        }
        Ok(())
    }

    pub fn put_unknown(msg: &mut Message, unknown: &crate::unknown::UnknownFields) {
        msg.unknown_fields_mut().extend(unknown);
    }

    pub fn take<T: ProtoElement>(
        msg: &mut Message,
        number: u32,
        dst: &mut T,
        model: &TypeModel,
    ) -> Result<(), Error> {
        match msg.take(number) {
            Some(value) => dst.merge_value(value, model).map_err(|e| e.in_field(number)),
            None => Ok(()),
        }
    }

    pub fn take_optional<T: ProtoElement>(
        msg: &mut Message,
        number: u32,
        dst: &mut Option<T>,
        model: &TypeModel,
    ) -> Result<(), Error> {
        let Some(value) = msg.take(number) else {
            return Ok(());
        };
        let result = match dst {
            Some(existing) => existing.merge_value(value, model),
            None => T::from_value(value, model).map(|v| *dst = Some(v)),
        };
        result.map_err(|e| e.in_field(number))
    }

    /// Appends the decoded elements to `dst`.
    pub fn take_repeated<T: ProtoElement>(
        msg: &mut Message,
        number: u32,
        dst: &mut Vec<T>,
        model: &TypeModel,
    ) -> Result<(), Error> {
        match msg.take(number) {
            None => Ok(()),
            Some(Value::List(items)) => {
                dst.reserve(items.len());
                for item in items {
                    dst.push(T::from_value(item, model).map_err(|e| e.in_field(number))?);
                }
                Ok(())
            }
            Some(other) => {
                Err(Error::value_mismatch("list", other.kind_name()).in_field(number))
            }
        }
    }

    /// Inserts the decoded entries into `dst`, replacing existing keys.
    pub fn take_map<K, V, M>(
        msg: &mut Message,
        number: u32,
        dst: &mut M,
        model: &TypeModel,
    ) -> Result<(), Error>
    where
        K: ProtoMapKey,
        V: ProtoElement,
        M: Extend<(K, V)>,
    {
        match msg.take(number) {
            None => Ok(()),
            Some(Value::Map(entries)) => {
                let entries = entries
                    .into_iter()
                    .map(|(k, v)| Ok((K::from_key(k)?, V::from_value(v, model)?)))
                    .collect::<Result<Vec<_>, Error>>()
                    .map_err(|e| e.in_field(number))?;
                dst.extend(entries);
                Ok(())
            }
            Some(other) => Err(Error::value_mismatch("map", other.kind_name()).in_field(number)),
        }
    }

    /// Move every preserved unknown field of `msg` into `dst`.
    ///
    /// A Rust value has a single unknown member, so fields kept inside
    /// include wrappers are flattened into it.
    pub fn take_unknown(msg: &mut Message, dst: &mut crate::unknown::UnknownFields) {
        dst.extend(msg.unknown_fields());
        for (_, unknown) in msg.level_unknown_fields() {
            dst.extend(unknown);
        }
        msg.clear_unknown_fields();
    }

    pub fn message_to_value<T: Reflect>(value: &T, model: &TypeModel) -> Result<Value, Error> {
        Ok(value.to_message(model)?.into())
    }

    pub fn message_from_value<T: Reflect>(value: Value, model: &TypeModel) -> Result<T, Error> {
        let mut out = T::default();
        merge_message_value(&mut out, value, model)?;
        Ok(out)
    }

    pub fn merge_message_value<T: Reflect>(
        dst: &mut T,
        value: Value,
        model: &TypeModel,
    ) -> Result<(), Error> {
        match value {
            Value::Message(msg) => dst.merge_message(*msg, model),
            other => Err(Error::value_mismatch("message", other.kind_name())),
        }
    }

    /// The natural value held by an enum [`Value`].
    pub fn enum_from_value(value: Value) -> Result<i32, Error> {
        match value {
            Value::Enum(v) => Ok(v),
            other => Err(Error::value_mismatch("enum", other.kind_name())),
        }
    }

    /// Error for an enum value with no matching Rust variant.
    pub fn unmapped_enum(_natural: i32) -> Error {
        Error::value_mismatch("known enum variant", "unmapped enum value")
    }
}

impl TypeModel {
    /// Write a Rust value as its described message type.
    pub fn serialize_value<T: Reflect, B: BufMut>(
        &self,
        value: &T,
        buf: &mut B,
    ) -> Result<(), Error> {
        let msg = value.to_message(self)?;
        self.serialize(&msg, buf)
    }

    pub fn serialize_value_to_vec<T: Reflect>(&self, value: &T) -> Result<Vec<u8>, Error> {
        let msg = value.to_message(self)?;
        self.serialize_to_vec(&msg)
    }

    /// Read a Rust value of type `T`.
    ///
    /// Fields of a subtype the payload was written for, but that `T` does not
    /// declare, are dropped.
    pub fn deserialize_value<T: Reflect>(&self, data: impl Into<Bytes>) -> Result<T, Error> {
        let ty = self.describe::<T>()?;
        let msg = self.deserialize(ty, data)?;
        T::from_message(msg, self)
    }

    /// Merge a payload into an existing Rust value.
    pub fn merge_value<T: Reflect>(
        &self,
        dst: &mut T,
        data: impl Into<Bytes>,
    ) -> Result<(), Error> {
        let ty = self.describe::<T>()?;
        let msg = self.deserialize(ty, data)?;
        dst.merge_message(msg, self)
    }

    /// Convert between two described Rust types through their wire form.
    pub fn change_type_value<T: Reflect, U: Reflect>(&self, value: &T) -> Result<U, Error> {
        let msg = value.to_message(self)?;
        let target = self.describe::<U>()?;
        let changed = self.change_type(&msg, target)?;
        U::from_message(changed, self)
    }
}
