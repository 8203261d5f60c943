//! Types and functions related to parsing the input from our proc-macro.

use core::ops::RangeInclusive;
use darling::FromMeta;
use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::spanned::Spanned;
use syn::{Attribute, Expr, Field, GenericArgument, Ident, Lit, PathArguments, Result, Type};

/// Minimum value of a protobuf tag.
const MINIMUM_TAG_VAL: u32 = 1;
/// Maximum value of a protobuf tag.
const MAXIMUM_TAG_VAL: u32 = (1 << 29) - 1;
/// Range of tag values that is reserved by Google.
const RESERVED_TAG_RANGE: RangeInclusive<u32> = 19000..=19999;

/// Metadata for a single field annotated with `#[proto(...)]`.
pub struct FieldMetadata<'a> {
    /// Name of the field.
    pub name: &'a Ident,
    /// Type of the field.
    pub ty: &'a Type,
    /// The kind of field parsed from `#[proto(...)]` attributes.
    pub kind: FieldKind,
}

/// The protobuf kind of a field within a struct.
pub enum FieldKind {
    /// A value field, see [`ValueField`].
    Value(ValueField),
    /// The struct of the base type, whose fields are written alongside ours.
    Base,
    /// Field to store unknown fields. One per struct.
    Unknown,
}

/// Repetition of a value field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// If not present will deserialize to the `Default` value.
    Singular,
    /// `Option<T>`, if not present will deserialize to `None`.
    Optional,
    /// `Vec<T>`, if not present will deserialize to an empty set.
    Repeated,
    /// `BTreeMap<K, V>` or `HashMap<K, V>`.
    Map,
}

/// Integer encoding requested for a value field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntEncoding {
    Default,
    ZigZag,
    Fixed,
}

pub struct ValueField {
    pub tag: u32,
    pub shape: Shape,
    pub required: bool,
    pub packed: Option<bool>,
    pub encoding: IntEncoding,
    pub default: Option<Lit>,
}

impl FieldKind {
    /// Returns the tag for value fields.
    pub fn tag(&self) -> Option<u32> {
        match self {
            FieldKind::Value(field) => Some(field.tag),
            FieldKind::Base | FieldKind::Unknown => None,
        }
    }
}

/// Raw attributes parsed from `#[proto(...)]` on a field.
///
/// We parse these and then transform them into a [`FieldKind`] with [`parse_field_metadata`].
#[derive(Debug, Default, FromMeta)]
#[darling(default)]
struct RawProtoFieldAttrs {
    tag: Option<u32>,
    optional: bool,
    repeated: bool,
    map: bool,
    required: bool,
    packed: Option<bool>,
    zigzag: bool,
    fixed: bool,
    default: Option<Lit>,
    base: bool,
    unknown: bool,
}

/// Parse `#[proto(...)]` attributes from a [`Field`], validates them, and returns
/// a complete [`FieldMetadata`].
pub fn parse_field_metadata(field: &Field) -> Result<FieldMetadata<'_>> {
    let name = field
        .ident
        .as_ref()
        .ok_or_else(|| syn::Error::new_spanned(field, "only named fields supported"))?;

    let raw = find_proto_attr(&field.attrs)
        .map(|attr| RawProtoFieldAttrs::from_meta(&attr.meta))
        .transpose()
        .map_err(|e| syn::Error::new_spanned(field, e.to_string()))?
        .unwrap_or_default();

    let value_only = raw.tag.is_some()
        || raw.optional
        || raw.repeated
        || raw.map
        || raw.required
        || raw.packed.is_some()
        || raw.zigzag
        || raw.fixed
        || raw.default.is_some();

    let kind = match (raw.base, raw.unknown, value_only) {
        (true, false, false) => FieldKind::Base,
        (false, true, false) => FieldKind::Unknown,
        (false, false, _) => FieldKind::Value(value_field(field, raw)?),
        _ => {
            return Err(syn::Error::new_spanned(
                field,
                "conflicting field attributes",
            ))
        }
    };

    Ok(FieldMetadata {
        name,
        ty: &field.ty,
        kind,
    })
}

fn value_field(field: &Field, raw: RawProtoFieldAttrs) -> Result<ValueField> {
    let tag = raw
        .tag
        .ok_or_else(|| syn::Error::new_spanned(field, "missing #[proto(tag = N)] attribute"))?;
    validate_tag(tag, field.span())?;

    let shape = match (raw.optional, raw.repeated, raw.map) {
        (false, false, false) => Shape::Singular,
        (true, false, false) => Shape::Optional,
        (false, true, false) => Shape::Repeated,
        (false, false, true) => Shape::Map,
        _ => {
            return Err(syn::Error::new_spanned(
                field,
                "only one of 'optional', 'repeated' or 'map' may be set",
            ))
        }
    };

    if raw.required && !matches!(shape, Shape::Singular | Shape::Optional) {
        return Err(syn::Error::new_spanned(
            field,
            "'required' attribute is only valid for singular fields",
        ));
    }
    if raw.packed.is_some() && shape != Shape::Repeated {
        return Err(syn::Error::new_spanned(
            field,
            "'packed' attribute is only valid for repeated fields",
        ));
    }
    if raw.default.is_some() && !matches!(shape, Shape::Singular | Shape::Optional) {
        return Err(syn::Error::new_spanned(
            field,
            "'default' attribute is only valid for singular fields",
        ));
    }
    let encoding = match (raw.zigzag, raw.fixed) {
        (false, false) => IntEncoding::Default,
        (true, false) => IntEncoding::ZigZag,
        (false, true) => IntEncoding::Fixed,
        (true, true) => {
            return Err(syn::Error::new_spanned(
                field,
                "'zigzag' and 'fixed' are mutually exclusive",
            ))
        }
    };

    Ok(ValueField {
        tag,
        shape,
        required: raw.required,
        packed: raw.packed,
        encoding,
        default: raw.default,
    })
}

/// Raw attributes parsed from `#[proto(include(...))]` on a struct.
#[derive(Debug, FromMeta)]
struct RawInclude {
    tag: u32,
    ty: Expr,
}

/// Raw attributes parsed from `#[proto(...)]` on a struct.
#[derive(Debug, Default, FromMeta)]
#[darling(default)]
struct RawProtoContainerAttrs {
    name: Option<String>,
    preserve_unknown: bool,
    #[darling(multiple)]
    include: Vec<RawInclude>,
    length: Option<String>,
}

/// How sub-messages of a type are framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Length {
    Measure,
    Buffer,
}

/// Metadata for a struct annotated with `#[proto(...)]`.
pub struct ContainerMetadata {
    /// Name the type is registered under.
    pub name: String,
    pub preserve_unknown: bool,
    /// `(tag, subtype)` pairs.
    pub includes: Vec<(u32, syn::Path)>,
    pub length: Option<Length>,
}

pub fn parse_container_metadata(ident: &Ident, attrs: &[Attribute]) -> Result<ContainerMetadata> {
    let raw = find_proto_attr(attrs)
        .map(|attr| RawProtoContainerAttrs::from_meta(&attr.meta))
        .transpose()
        .map_err(|e| syn::Error::new_spanned(ident, e.to_string()))?
        .unwrap_or_default();

    let includes = raw
        .include
        .into_iter()
        .map(|include| {
            validate_tag(include.tag, include.ty.span())?;
            match include.ty {
                Expr::Path(path) => Ok((include.tag, path.path)),
                other => Err(syn::Error::new_spanned(other, "expected a type path")),
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let length = match raw.length.as_deref() {
        None => None,
        Some("measure") => Some(Length::Measure),
        Some("buffer") => Some(Length::Buffer),
        Some(other) => {
            return Err(syn::Error::new_spanned(
                ident,
                format!("unknown length strategy '{other}', expected 'measure' or 'buffer'"),
            ))
        }
    };

    Ok(ContainerMetadata {
        name: raw.name.unwrap_or_else(|| ident.to_string()),
        preserve_unknown: raw.preserve_unknown,
        includes,
        length,
    })
}

/// Parse the wire value of an enum variant, `#[proto(value = N)]`.
pub fn parse_variant_value(variant: &syn::Variant) -> Result<Option<i32>> {
    #[derive(Debug, Default, FromMeta)]
    #[darling(default)]
    struct RawVariantAttrs {
        value: Option<i32>,
    }

    let raw = find_proto_attr(&variant.attrs)
        .map(|attr| RawVariantAttrs::from_meta(&attr.meta))
        .transpose()
        .map_err(|e| syn::Error::new_spanned(variant, e.to_string()))?
        .unwrap_or_default();
    Ok(raw.value)
}

fn find_proto_attr(attrs: &[Attribute]) -> Option<&Attribute> {
    attrs.iter().find(|attr| attr.path().is_ident("proto"))
}

/// Validates that a tag number is within the valid Protocol Buffers range.
pub fn validate_tag(tag: u32, span: Span) -> Result<()> {
    if !(MINIMUM_TAG_VAL..=MAXIMUM_TAG_VAL).contains(&tag) || RESERVED_TAG_RANGE.contains(&tag) {
        let msg = format!(
            "Tag number '{}' is invalid. Valid tag numbers are in the range [{}, {}], excluding [{}, {}]",
            tag,
            MINIMUM_TAG_VAL,
            MAXIMUM_TAG_VAL,
            RESERVED_TAG_RANGE.start(),
            RESERVED_TAG_RANGE.end(),
        );
        return Err(syn::Error::new(span, msg));
    }

    Ok(())
}

/// Returns the generic type arguments of the last path segment of `ty` if
/// it is named one of `wrappers`.
///
/// `Option<T>` yields `[T]`, `BTreeMap<K, V>` yields `[K, V]`.
pub fn wrapped_types<'a>(ty: &'a Type, wrappers: &[&str]) -> Option<Vec<&'a Type>> {
    let Type::Path(path) = ty else {
        return None;
    };
    let segment = path.path.segments.last()?;
    if !wrappers.iter().any(|w| segment.ident == w) {
        return None;
    }
    let PathArguments::AngleBracketed(args) = &segment.arguments else {
        return None;
    };
    let types: Vec<_> = args
        .args
        .iter()
        .filter_map(|arg| match arg {
            GenericArgument::Type(ty) => Some(ty),
            _ => None,
        })
        .collect();
    Some(types)
}

/// Tokens building the default [`Value`] for a field of element type `ty`.
///
/// Numeric literals are typed as the Rust element so `default = 5` on an
/// `i64` field becomes an `I64` value.
pub fn default_value(lit: &Lit, ty: &Type) -> TokenStream2 {
    const PRIMITIVES: &[&str] = &["bool", "i32", "i64", "u32", "u64", "f32", "f64"];

    let primitive = match ty {
        Type::Path(path) => path
            .path
            .get_ident()
            .is_some_and(|ident| PRIMITIVES.iter().any(|p| ident == p)),
        _ => false,
    };
    match lit {
        Lit::ByteStr(bytes) => quote! { ::protomodel::Value::from(#bytes.to_vec()) },
        Lit::Int(_) | Lit::Float(_) | Lit::Bool(_) if primitive => quote! {
            {
                let value: #ty = #lit;
                ::protomodel::Value::from(value)
            }
        },
        _ => quote! { ::protomodel::Value::from(#lit) },
    }
}
