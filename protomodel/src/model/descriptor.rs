//! Resolved, immutable metadata for described types.

use std::sync::Arc;

use crate::error::Error;
use crate::model::{CompatibilityLevel, TypeHandle};
use crate::value::Value;
use crate::wire::WireType;
use crate::writer::LengthStrategy;

/// Protobuf scalar types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    Double,
    Float,
    Int32,
    Int64,
    UInt32,
    UInt64,
    SInt32,
    SInt64,
    Fixed32,
    Fixed64,
    SFixed32,
    SFixed64,
    Bool,
    String,
    Bytes,
}

impl ScalarType {
    /// Wire type of a single value of this type.
    pub const fn wire_type(self) -> WireType {
        match self {
            ScalarType::Int32
            | ScalarType::Int64
            | ScalarType::UInt32
            | ScalarType::UInt64
            | ScalarType::SInt32
            | ScalarType::SInt64
            | ScalarType::Bool => WireType::Varint,
            ScalarType::Double | ScalarType::Fixed64 | ScalarType::SFixed64 => WireType::I64,
            ScalarType::Float | ScalarType::Fixed32 | ScalarType::SFixed32 => WireType::I32,
            ScalarType::String | ScalarType::Bytes => WireType::Len,
        }
    }

    /// Whether repeated values of this type may use the packed encoding.
    pub const fn is_packable(self) -> bool {
        !matches!(self, ScalarType::String | ScalarType::Bytes)
    }

    /// Whether this type may be used as a map key.
    pub const fn is_valid_map_key(self) -> bool {
        !matches!(
            self,
            ScalarType::Double | ScalarType::Float | ScalarType::Bytes
        )
    }

    /// The `.proto` spelling of this type.
    pub const fn name(self) -> &'static str {
        match self {
            ScalarType::Double => "double",
            ScalarType::Float => "float",
            ScalarType::Int32 => "int32",
            ScalarType::Int64 => "int64",
            ScalarType::UInt32 => "uint32",
            ScalarType::UInt64 => "uint64",
            ScalarType::SInt32 => "sint32",
            ScalarType::SInt64 => "sint64",
            ScalarType::Fixed32 => "fixed32",
            ScalarType::Fixed64 => "fixed64",
            ScalarType::SFixed32 => "sfixed32",
            ScalarType::SFixed64 => "sfixed64",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
        }
    }

    /// Name of the [`Value`] variant that holds this type, as reported by
    /// [`Value::kind_name`].
    pub const fn value_kind(self) -> &'static str {
        match self {
            ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32 => "int32",
            ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64 => "int64",
            ScalarType::UInt32 | ScalarType::Fixed32 => "uint32",
            ScalarType::UInt64 | ScalarType::Fixed64 => "uint64",
            ScalarType::Float => "float",
            ScalarType::Double => "double",
            ScalarType::Bool => "bool",
            ScalarType::String => "string",
            ScalarType::Bytes => "bytes",
        }
    }

    /// The protobuf default (zero) value of this type.
    pub fn zero_value(self) -> Value {
        match self {
            ScalarType::Int32 | ScalarType::SInt32 | ScalarType::SFixed32 => Value::I32(0),
            ScalarType::Int64 | ScalarType::SInt64 | ScalarType::SFixed64 => Value::I64(0),
            ScalarType::UInt32 | ScalarType::Fixed32 => Value::U32(0),
            ScalarType::UInt64 | ScalarType::Fixed64 => Value::U64(0),
            ScalarType::Float => Value::F32(0.0),
            ScalarType::Double => Value::F64(0.0),
            ScalarType::Bool => Value::Bool(false),
            ScalarType::String => Value::String(String::new()),
            ScalarType::Bytes => Value::Bytes(bytes::Bytes::new()),
        }
    }

    /// Returns `true` if `value` has the variant this type is stored as.
    pub fn accepts(self, value: &Value) -> bool {
        value.kind_name() == self.value_kind()
    }

    pub(crate) fn wire_category(self) -> WireCategory {
        match self {
            ScalarType::SInt32 | ScalarType::SInt64 => WireCategory::ZigZag,
            ScalarType::Int32
            | ScalarType::Int64
            | ScalarType::UInt32
            | ScalarType::UInt64
            | ScalarType::Bool => WireCategory::Varint,
            ScalarType::Float | ScalarType::Fixed32 | ScalarType::SFixed32 => {
                WireCategory::Fixed32
            }
            ScalarType::Double | ScalarType::Fixed64 | ScalarType::SFixed64 => {
                WireCategory::Fixed64
            }
            ScalarType::String | ScalarType::Bytes => WireCategory::LengthDelimited,
        }
    }
}

/// How the bits of a field are laid out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireCategory {
    Varint,
    ZigZag,
    Fixed32,
    Fixed64,
    LengthDelimited,
}

/// What a field holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticKind {
    Scalar,
    Enum,
    Message,
    Repeated,
    Map,
}

/// The element type of a field, collection or map value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Element {
    Scalar(ScalarType),
    Enum(TypeHandle),
    Message(TypeHandle),
}

impl Element {
    pub fn wire_type(self) -> WireType {
        match self {
            Element::Scalar(ty) => ty.wire_type(),
            Element::Enum(_) => WireType::Varint,
            Element::Message(_) => WireType::Len,
        }
    }

    pub fn is_packable(self) -> bool {
        match self {
            Element::Scalar(ty) => ty.is_packable(),
            Element::Enum(_) => true,
            Element::Message(_) => false,
        }
    }

    fn wire_category(self) -> WireCategory {
        match self {
            Element::Scalar(ty) => ty.wire_category(),
            Element::Enum(_) => WireCategory::Varint,
            Element::Message(_) => WireCategory::LengthDelimited,
        }
    }
}

/// Shape of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Single(Element),
    Repeated { element: Element, packed: bool },
    Map { key: ScalarType, value: Element },
}

/// One member of a described message type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub(crate) number: u32,
    pub(crate) name: Arc<str>,
    pub(crate) kind: FieldKind,
    pub(crate) required: bool,
    pub(crate) presence: bool,
    pub(crate) default: Option<Value>,
}

impl FieldDescriptor {
    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> FieldKind {
        self.kind
    }

    /// Required fields are always written and must be present.
    pub fn is_required(&self) -> bool {
        self.required
    }

    /// Fields with explicit presence (declared optional) are written whenever
    /// they are set, even to their default.
    pub fn has_presence(&self) -> bool {
        self.presence
    }

    /// The value an absent field reads as. `None` for message fields.
    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    pub fn semantic_kind(&self) -> SemanticKind {
        match self.kind {
            FieldKind::Single(Element::Scalar(_)) => SemanticKind::Scalar,
            FieldKind::Single(Element::Enum(_)) => SemanticKind::Enum,
            FieldKind::Single(Element::Message(_)) => SemanticKind::Message,
            FieldKind::Repeated { .. } => SemanticKind::Repeated,
            FieldKind::Map { .. } => SemanticKind::Map,
        }
    }

    /// Wire treatment of a single element of this field.
    pub fn wire_category(&self) -> WireCategory {
        match self.kind {
            FieldKind::Single(element) | FieldKind::Repeated { element, .. } => {
                element.wire_category()
            }
            FieldKind::Map { .. } => WireCategory::LengthDelimited,
        }
    }

    /// The wire type this field is written with.
    pub fn wire_type(&self) -> WireType {
        match self.kind {
            FieldKind::Single(element) => element.wire_type(),
            FieldKind::Repeated { element, packed } if packed && element.is_packable() => {
                WireType::Len
            }
            FieldKind::Repeated { element, .. } => element.wire_type(),
            FieldKind::Map { .. } => WireType::Len,
        }
    }
}

/// A polymorphic subtype registered on a base type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncludeDescriptor {
    pub number: u32,
    pub ty: TypeHandle,
}

/// Resolved metadata for a message type.
#[derive(Debug, Clone)]
pub struct TypeDescriptor {
    pub(crate) handle: TypeHandle,
    pub(crate) name: Arc<str>,
    /// Sorted by field number.
    pub(crate) fields: Vec<FieldDescriptor>,
    /// Sorted by field number.
    pub(crate) includes: Vec<IncludeDescriptor>,
    pub(crate) base: Option<TypeHandle>,
    pub(crate) compatibility: CompatibilityLevel,
    pub(crate) preserve_unknown: bool,
    pub(crate) length_strategy: Option<LengthStrategy>,
}

impl TypeDescriptor {
    pub fn handle(&self) -> TypeHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn name_arc(&self) -> &Arc<str> {
        &self.name
    }

    /// Fields declared directly on this type, in field number order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Look up a field declared directly on this type.
    pub fn field(&self, number: u32) -> Option<&FieldDescriptor> {
        self.fields
            .binary_search_by_key(&number, |f| f.number)
            .ok()
            .map(|idx| &self.fields[idx])
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| &*f.name == name)
    }

    /// Subtypes included by this type, in tag order.
    pub fn includes(&self) -> &[IncludeDescriptor] {
        &self.includes
    }

    /// The subtype written under `number`, if any.
    pub fn include(&self, number: u32) -> Option<TypeHandle> {
        self.includes
            .binary_search_by_key(&number, |i| i.number)
            .ok()
            .map(|idx| self.includes[idx].ty)
    }

    /// The tag under which `sub` is included.
    pub fn include_tag(&self, sub: TypeHandle) -> Option<u32> {
        self.includes.iter().find(|i| i.ty == sub).map(|i| i.number)
    }

    pub fn base(&self) -> Option<TypeHandle> {
        self.base
    }

    pub fn compatibility_level(&self) -> CompatibilityLevel {
        self.compatibility
    }

    pub fn preserves_unknown(&self) -> bool {
        self.preserve_unknown
    }

    pub fn length_strategy(&self) -> Option<LengthStrategy> {
        self.length_strategy
    }
}

/// A variant of an enum type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumVariant {
    pub name: Arc<str>,
    /// Value held in memory.
    pub natural: i32,
    /// Value written on the wire.
    pub wire: i32,
}

/// Resolved metadata for an enum type.
#[derive(Debug, Clone)]
pub struct EnumDescriptor {
    pub(crate) handle: TypeHandle,
    pub(crate) name: Arc<str>,
    pub(crate) variants: Vec<EnumVariant>,
}

impl EnumDescriptor {
    pub fn handle(&self) -> TypeHandle {
        self.handle
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn variants(&self) -> &[EnumVariant] {
        &self.variants
    }

    /// Map a natural value to its wire value. Unmapped values pass through.
    pub fn to_wire(&self, natural: i32) -> i32 {
        self.variants
            .iter()
            .find(|v| v.natural == natural)
            .map_or(natural, |v| v.wire)
    }

    /// Map a wire value to its natural value. Unmapped values pass through.
    pub fn from_wire(&self, wire: i32) -> i32 {
        self.variants
            .iter()
            .find(|v| v.wire == wire)
            .map_or(wire, |v| v.natural)
    }
}

/// An entry of the type arena.
#[derive(Debug, Clone)]
pub enum Descriptor {
    Message(Arc<TypeDescriptor>),
    Enum(Arc<EnumDescriptor>),
}

impl Descriptor {
    pub fn handle(&self) -> TypeHandle {
        match self {
            Descriptor::Message(d) => d.handle,
            Descriptor::Enum(d) => d.handle,
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Descriptor::Message(d) => &d.name,
            Descriptor::Enum(d) => &d.name,
        }
    }

    pub fn as_message(&self) -> Option<&Arc<TypeDescriptor>> {
        match self {
            Descriptor::Message(d) => Some(d),
            Descriptor::Enum(_) => None,
        }
    }

    pub fn as_enum(&self) -> Option<&Arc<EnumDescriptor>> {
        match self {
            Descriptor::Enum(d) => Some(d),
            Descriptor::Message(_) => None,
        }
    }

    pub(crate) fn expect_message(&self) -> Result<&Arc<TypeDescriptor>, Error> {
        self.as_message()
            .ok_or_else(|| Error::unsupported_type(format!("`{}` is not a message", self.name())))
    }

    pub(crate) fn expect_enum(&self) -> Result<&Arc<EnumDescriptor>, Error> {
        self.as_enum()
            .ok_or_else(|| Error::unsupported_type(format!("`{}` is not an enum", self.name())))
    }
}
