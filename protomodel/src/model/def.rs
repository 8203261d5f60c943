//! Declarative type definitions.
//!
//! A [`TypeDef`] is the unresolved description of a message or enum. Rust
//! types provide one through [`Describe`], usually via `#[derive(Describe)]`,
//! and dynamic schemas hand them to [`TypeModel::define`](crate::TypeModel::define).
//! References to other types stay symbolic ([`TypeRef`]) until the model
//! resolves them.

use std::any::TypeId;
use std::fmt;
use std::sync::Arc;

use crate::model::ScalarType;
use crate::reflect::{ProtoElement, ProtoMapKey};
use crate::value::Value;
use crate::writer::LengthStrategy;

/// A Rust type with a protobuf description.
pub trait Describe: 'static {
    fn describe() -> TypeDef;
}

/// An unresolved message or enum definition.
#[derive(Debug, Clone)]
pub enum TypeDef {
    Message(MessageDef),
    Enum(EnumDef),
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            TypeDef::Message(def) => &def.name,
            TypeDef::Enum(def) => &def.name,
        }
    }
}

impl From<MessageDef> for TypeDef {
    fn from(def: MessageDef) -> Self {
        TypeDef::Message(def)
    }
}

impl From<EnumDef> for TypeDef {
    fn from(def: EnumDef) -> Self {
        TypeDef::Enum(def)
    }
}

/// A Rust type that describes itself, referenced by [`TypeId`].
#[derive(Clone, Copy)]
pub struct StaticType {
    pub(crate) id: TypeId,
    pub(crate) rust_name: &'static str,
    pub(crate) describe: fn() -> TypeDef,
}

impl fmt::Debug for StaticType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StaticType").field(&self.rust_name).finish()
    }
}

/// Well-known types with a built-in description.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WellKnown {
    /// A span of time, `std::time::Duration`.
    Duration,
    /// A point in time, `std::time::SystemTime`.
    Timestamp,
}

/// A reference to the type of a field.
#[derive(Debug, Clone)]
pub enum TypeRef {
    Scalar(ScalarType),
    /// A Rust type, described on first use.
    Static(StaticType),
    /// A type registered under this name, possibly in the same batch.
    Named(Arc<str>),
    /// A built-in type whose shape depends on the model's compatibility level.
    WellKnown(WellKnown),
}

impl TypeRef {
    pub fn of<T: Describe>() -> Self {
        TypeRef::Static(StaticType {
            id: TypeId::of::<T>(),
            rust_name: std::any::type_name::<T>(),
            describe: T::describe,
        })
    }

    pub fn named(name: impl Into<Arc<str>>) -> Self {
        TypeRef::Named(name.into())
    }
}

impl From<ScalarType> for TypeRef {
    fn from(ty: ScalarType) -> Self {
        TypeRef::Scalar(ty)
    }
}

/// Alternative wire encodings for integer fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Encoding {
    #[default]
    Default,
    /// `sint32`/`sint64`.
    ZigZag,
    /// `fixed32`/`fixed64`/`sfixed32`/`sfixed64`.
    Fixed,
}

/// Repetition of a field.
#[derive(Debug, Clone)]
pub enum FieldShape {
    Single(TypeRef),
    /// A single value with explicit presence.
    Optional(TypeRef),
    Repeated(TypeRef),
    Map(TypeRef, TypeRef),
}

/// An unresolved field definition.
#[derive(Debug, Clone)]
pub struct FieldDef {
    pub(crate) number: u32,
    pub(crate) name: Arc<str>,
    pub(crate) shape: FieldShape,
    pub(crate) required: bool,
    pub(crate) encoding: Encoding,
    pub(crate) packed: Option<bool>,
    pub(crate) default: Option<Value>,
}

impl FieldDef {
    pub fn new(number: u32, name: impl Into<Arc<str>>, shape: FieldShape) -> Self {
        FieldDef {
            number,
            name: name.into(),
            shape,
            required: false,
            encoding: Encoding::Default,
            packed: None,
            default: None,
        }
    }

    /// A singular field holding a `T`.
    pub fn singular<T: ProtoElement>(number: u32, name: impl Into<Arc<str>>) -> Self {
        FieldDef::new(number, name, FieldShape::Single(T::type_ref()))
    }

    /// A singular field with explicit presence, `Option<T>` in Rust.
    pub fn optional<T: ProtoElement>(number: u32, name: impl Into<Arc<str>>) -> Self {
        FieldDef::new(number, name, FieldShape::Optional(T::type_ref()))
    }

    /// A repeated field of `T`.
    pub fn repeated<T: ProtoElement>(number: u32, name: impl Into<Arc<str>>) -> Self {
        FieldDef::new(number, name, FieldShape::Repeated(T::type_ref()))
    }

    /// A map from `K` to `V`.
    pub fn map<K: ProtoMapKey, V: ProtoElement>(number: u32, name: impl Into<Arc<str>>) -> Self {
        FieldDef::new(
            number,
            name,
            FieldShape::Map(TypeRef::Scalar(K::key_type()), V::type_ref()),
        )
    }

    /// Always write this field and fail when it is missing.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Use an alternative integer encoding for the (value) element.
    #[must_use]
    pub fn encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Override whether a repeated field is packed. Packable repeated fields
    /// are packed by default.
    #[must_use]
    pub fn packed(mut self, packed: bool) -> Self {
        self.packed = Some(packed);
        self
    }

    /// The value an absent field reads as, and which is elided on write.
    #[must_use]
    pub fn default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn number(&self) -> u32 {
        self.number
    }
}

/// An unresolved message definition.
#[derive(Debug, Clone)]
pub struct MessageDef {
    pub(crate) name: Arc<str>,
    pub(crate) fields: Vec<FieldDef>,
    pub(crate) includes: Vec<(u32, TypeRef)>,
    pub(crate) base: Option<TypeRef>,
    pub(crate) preserve_unknown: bool,
    pub(crate) length_strategy: Option<LengthStrategy>,
}

impl MessageDef {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        MessageDef {
            name: name.into(),
            fields: Vec::new(),
            includes: Vec::new(),
            base: None,
            preserve_unknown: false,
            length_strategy: None,
        }
    }

    #[must_use]
    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Register `T` as a subtype written under `tag`.
    #[must_use]
    pub fn include<T: Describe>(self, tag: u32) -> Self {
        self.include_ref(tag, TypeRef::of::<T>())
    }

    /// Register a subtype by reference.
    #[must_use]
    pub fn include_ref(mut self, tag: u32, ty: TypeRef) -> Self {
        self.includes.push((tag, ty));
        self
    }

    /// Declare `T` as the base type. `T` must include this type.
    #[must_use]
    pub fn extends<T: Describe>(self) -> Self {
        self.extends_ref(TypeRef::of::<T>())
    }

    #[must_use]
    pub fn extends_ref(mut self, base: TypeRef) -> Self {
        self.base = Some(base);
        self
    }

    /// Keep unrecognised fields and write them back.
    #[must_use]
    pub fn preserve_unknown(mut self) -> Self {
        self.preserve_unknown = true;
        self
    }

    /// Override how sub-messages of this type are framed.
    #[must_use]
    pub fn length_strategy(mut self, strategy: LengthStrategy) -> Self {
        self.length_strategy = Some(strategy);
        self
    }
}

/// An unresolved enum definition.
#[derive(Debug, Clone)]
pub struct EnumDef {
    pub(crate) name: Arc<str>,
    /// `(name, natural, wire)`
    pub(crate) variants: Vec<(Arc<str>, i32, i32)>,
}

impl EnumDef {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        EnumDef {
            name: name.into(),
            variants: Vec::new(),
        }
    }

    /// A variant whose natural and wire values are the same.
    #[must_use]
    pub fn value(self, name: impl Into<Arc<str>>, value: i32) -> Self {
        self.variant(name, value, value)
    }

    /// A variant held as `natural` in memory and written as `wire`.
    #[must_use]
    pub fn variant(mut self, name: impl Into<Arc<str>>, natural: i32, wire: i32) -> Self {
        self.variants.push((name.into(), natural, wire));
        self
    }
}
