//! Derive macros for protomodel.
//!
//! Provides `#[derive(Describe)]`, which registers a Rust struct or enum as a
//! protobuf type and generates the conversions between it and the dynamic
//! `protomodel::Message`.

use std::collections::BTreeSet;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{DeriveInput, Expr, ExprLit, ExprUnary, Fields, Ident, Lit, Result, Type, UnOp};

mod support;


use support::{
    default_value, parse_container_metadata, parse_field_metadata, parse_variant_value,
    wrapped_types, ContainerMetadata, FieldKind, FieldMetadata, IntEncoding, Length, Shape,
    ValueField,
};

/// Derive macro for implementing `Describe`.
///
/// On a struct this also implements `Reflect` and `ProtoElement`, so the
/// struct must implement `Default`. Its `Default` should agree with any
/// declared field defaults.
///
/// # Example
///
/// ```ignore
/// #[derive(Default, Describe)]
/// #[proto(include(tag = 10, ty = Employee))]
/// pub struct Person {
///     #[proto(tag = 1)]
///     id: i32,
///     #[proto(tag = 2, optional)]
///     email: Option<String>,
///     #[proto(tag = 3, repeated)]
///     phones: Vec<PhoneNumber>,
/// }
///
/// #[derive(Default, Describe)]
/// pub struct Employee {
///     #[proto(base)]
///     person: Person,
///     #[proto(tag = 4, zigzag)]
///     level: i64,
/// }
///
/// #[derive(Clone, Copy, Default, Describe)]
/// pub enum Kind {
///     #[default]
///     Mobile,
///     #[proto(value = 5)]
///     Home,
/// }
/// ```
///
/// The protobuf type of each field is taken from the Rust type through
/// `ProtoElement::type_ref`, so there's no need to specify it manually.
#[proc_macro_derive(Describe, attributes(proto))]
pub fn derive_describe(input: TokenStream) -> TokenStream {
    let input = syn::parse_macro_input!(input as DeriveInput);

    match impl_describe(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

fn impl_describe(input: &DeriveInput) -> Result<TokenStream2> {
    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "generic types are not supported",
        ));
    }
    match &input.data {
        syn::Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => impl_message(input, fields.named.iter()),
            _ => Err(syn::Error::new_spanned(input, "only named fields supported")),
        },
        syn::Data::Enum(data) => impl_enum(input, data),
        syn::Data::Union(_) => Err(syn::Error::new_spanned(input, "unions are not supported")),
    }
}

fn impl_message<'a>(
    input: &'a DeriveInput,
    fields: impl Iterator<Item = &'a syn::Field>,
) -> Result<TokenStream2> {
    let name = &input.ident;
    let container = parse_container_metadata(name, &input.attrs)?;
    let fields = fields
        .map(parse_field_metadata)
        .collect::<Result<Vec<_>>>()?;

    validate_fields(input, &container, &fields)?;

    let describe = generate_describe(&container, &fields)?;
    let write_fields = generate_write_fields(&fields);
    let take_fields = generate_take_fields(&fields)?;

    Ok(quote! {
        impl ::protomodel::Describe for #name {
            #describe
        }

        impl ::protomodel::Reflect for #name {
            #write_fields
            #take_fields
        }

        impl ::protomodel::ProtoElement for #name {
            fn type_ref() -> ::protomodel::TypeRef {
                ::protomodel::TypeRef::of::<Self>()
            }

            fn to_value(
                &self,
                model: &::protomodel::TypeModel,
            ) -> ::core::result::Result<::protomodel::Value, ::protomodel::Error> {
                ::protomodel::reflect::field::message_to_value(self, model)
            }

            fn from_value(
                value: ::protomodel::Value,
                model: &::protomodel::TypeModel,
            ) -> ::core::result::Result<Self, ::protomodel::Error> {
                ::protomodel::reflect::field::message_from_value(value, model)
            }

            fn merge_value(
                &mut self,
                value: ::protomodel::Value,
                model: &::protomodel::TypeModel,
            ) -> ::core::result::Result<(), ::protomodel::Error> {
                ::protomodel::reflect::field::merge_message_value(self, value, model)
            }
        }
    })
}

/// Checks spanning more than one field.
fn validate_fields(
    input: &DeriveInput,
    container: &ContainerMetadata,
    fields: &[FieldMetadata<'_>],
) -> Result<()> {
    let mut seen = BTreeSet::new();
    for field in fields {
        if let Some(tag) = field.kind.tag() {
            if !seen.insert(tag) {
                return Err(syn::Error::new_spanned(
                    field.name,
                    format!("duplicate tag {tag}"),
                ));
            }
        }
    }
    for (tag, ty) in &container.includes {
        if !seen.insert(*tag) {
            return Err(syn::Error::new_spanned(
                ty,
                format!("include tag {tag} is already used"),
            ));
        }
    }

    let bases = fields
        .iter()
        .filter(|f| matches!(f.kind, FieldKind::Base))
        .count();
    let unknowns = fields
        .iter()
        .filter(|f| matches!(f.kind, FieldKind::Unknown))
        .count();
    if bases > 1 {
        return Err(syn::Error::new_spanned(input, "at most one 'base' field"));
    }
    if unknowns > 1 {
        return Err(syn::Error::new_spanned(input, "at most one 'unknown' field"));
    }
    Ok(())
}

/// The element types a field's Rust type wraps, per its shape.
fn element_types<'a>(field: &FieldMetadata<'a>, shape: Shape) -> Result<Vec<&'a Type>> {
    let (wrappers, arity, expected): (&[&str], usize, &str) = match shape {
        Shape::Singular => return Ok(vec![field.ty]),
        Shape::Optional => (&["Option"], 1, "Option<T>"),
        Shape::Repeated => (&["Vec"], 1, "Vec<T>"),
        Shape::Map => (&["BTreeMap", "HashMap"], 2, "BTreeMap<K, V> or HashMap<K, V>"),
    };
    match wrapped_types(field.ty, wrappers) {
        Some(types) if types.len() == arity => Ok(types),
        _ => Err(syn::Error::new_spanned(
            field.ty,
            format!("field `{}` must have type {expected}", field.name),
        )),
    }
}

fn generate_field_def(field: &FieldMetadata<'_>, value: &ValueField) -> Result<TokenStream2> {
    let tag = value.tag;
    let name = field.name.to_string();
    let types = element_types(field, value.shape)?;

    let mut def = match value.shape {
        Shape::Singular => {
            let ty = types[0];
            quote! { ::protomodel::FieldDef::singular::<#ty>(#tag, #name) }
        }
        Shape::Optional => {
            let ty = types[0];
            quote! { ::protomodel::FieldDef::optional::<#ty>(#tag, #name) }
        }
        Shape::Repeated => {
            let ty = types[0];
            quote! { ::protomodel::FieldDef::repeated::<#ty>(#tag, #name) }
        }
        Shape::Map => {
            let (key, val) = (types[0], types[1]);
            quote! { ::protomodel::FieldDef::map::<#key, #val>(#tag, #name) }
        }
    };

    if value.required {
        def = quote! { #def.required() };
    }
    if let Some(packed) = value.packed {
        def = quote! { #def.packed(#packed) };
    }
    match value.encoding {
        IntEncoding::Default => {}
        IntEncoding::ZigZag => def = quote! { #def.encoding(::protomodel::Encoding::ZigZag) },
        IntEncoding::Fixed => def = quote! { #def.encoding(::protomodel::Encoding::Fixed) },
    }
    if let Some(lit) = &value.default {
        let default = default_value(lit, types[0]);
        def = quote! { #def.default(#default) };
    }
    Ok(def)
}

fn generate_describe(
    container: &ContainerMetadata,
    fields: &[FieldMetadata<'_>],
) -> Result<TokenStream2> {
    let name = &container.name;

    let mut calls = Vec::new();
    for field in fields {
        match &field.kind {
            FieldKind::Value(value) => {
                let def = generate_field_def(field, value)?;
                calls.push(quote! { .field(#def) });
            }
            FieldKind::Base => {
                let ty = field.ty;
                calls.push(quote! { .extends::<#ty>() });
            }
            FieldKind::Unknown => {}
        }
    }
    for (tag, ty) in &container.includes {
        calls.push(quote! { .include::<#ty>(#tag) });
    }
    if container.preserve_unknown {
        calls.push(quote! { .preserve_unknown() });
    }
    match container.length {
        None => {}
        Some(Length::Measure) => calls.push(quote! {
            .length_strategy(::protomodel::LengthStrategy::Measure)
        }),
        Some(Length::Buffer) => calls.push(quote! {
            .length_strategy(::protomodel::LengthStrategy::Buffer)
        }),
    }

    Ok(quote! {
        fn describe() -> ::protomodel::TypeDef {
            ::protomodel::MessageDef::new(#name)
                #(#calls)*
                .into()
        }
    })
}

fn generate_write_fields(fields: &[FieldMetadata<'_>]) -> TokenStream2 {
    let writes = fields.iter().map(|f| {
        let fname = f.name;
        match &f.kind {
            FieldKind::Base => quote! {
                ::protomodel::Reflect::write_fields(&self.#fname, msg, model)?;
            },
            FieldKind::Unknown => quote! {
                ::protomodel::reflect::field::put_unknown(msg, &self.#fname);
            },
            FieldKind::Value(value) => {
                let tag = value.tag;
                let put = match value.shape {
                    Shape::Singular => quote! { put },
                    Shape::Optional => quote! { put_optional },
                    Shape::Repeated => quote! { put_repeated },
                    Shape::Map => quote! { put_map },
                };
                quote! {
                    ::protomodel::reflect::field::#put(msg, #tag, &self.#fname, model)?;
                }
            }
        }
    });

    quote! {
        #[allow(unused_variables)]
        fn write_fields(
            &self,
            msg: &mut ::protomodel::Message,
            model: &::protomodel::TypeModel,
        ) -> ::core::result::Result<(), ::protomodel::Error> {
            #(#writes)*
            Ok(())
        }
    }
}

fn generate_take_fields(fields: &[FieldMetadata<'_>]) -> Result<TokenStream2> {
    let mut takes = Vec::with_capacity(fields.len());
    for f in fields {
        let fname = f.name;
        let take = match &f.kind {
            FieldKind::Base => quote! {
                ::protomodel::Reflect::take_fields(&mut self.#fname, msg, model)?;
            },
            FieldKind::Unknown => quote! {
                ::protomodel::reflect::field::take_unknown(msg, &mut self.#fname);
            },
            FieldKind::Value(value) => {
                let tag = value.tag;
                let take = match value.shape {
                    Shape::Singular => quote! { take },
                    Shape::Optional => quote! { take_optional },
                    Shape::Repeated => quote! { take_repeated },
                    Shape::Map => {
                        // Maps implement `Extend` for borrowed pairs too.
                        let types = element_types(f, Shape::Map)?;
                        let (key, val) = (types[0], types[1]);
                        quote! { take_map::<#key, #val, _> }
                    }
                };
                quote! {
                    ::protomodel::reflect::field::#take(msg, #tag, &mut self.#fname, model)?;
                }
            }
        };
        takes.push(take);
    }

    Ok(quote! {
        #[allow(unused_variables)]
        fn take_fields(
            &mut self,
            msg: &mut ::protomodel::Message,
            model: &::protomodel::TypeModel,
        ) -> ::core::result::Result<(), ::protomodel::Error> {
            #(#takes)*
            Ok(())
        }
    })
}

/// Reads an explicit discriminant like `= 3` or `= -1`.
fn discriminant(expr: &Expr) -> Result<i32> {
    match expr {
        Expr::Lit(ExprLit {
            lit: Lit::Int(int), ..
        }) => int.base10_parse(),
        Expr::Unary(ExprUnary {
            op: UnOp::Neg(_),
            expr,
            ..
        }) => discriminant(expr)?
            .checked_neg()
            .ok_or_else(|| syn::Error::new_spanned(expr, "discriminant out of range")),
        other => Err(syn::Error::new_spanned(
            other,
            "only integer literal discriminants are supported",
        )),
    }
}

fn impl_enum(input: &DeriveInput, data: &syn::DataEnum) -> Result<TokenStream2> {
    let name = &input.ident;
    let container = parse_container_metadata(name, &input.attrs)?;
    if container.preserve_unknown || !container.includes.is_empty() || container.length.is_some()
    {
        return Err(syn::Error::new_spanned(
            input,
            "enums only support the 'name' attribute",
        ));
    }
    let type_name = &container.name;

    // (ident, natural, wire)
    let mut variants: Vec<(&Ident, i32, i32)> = Vec::new();
    let mut next = 0i32;
    let mut wire_values = BTreeSet::new();
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "only unit variants are supported",
            ));
        }
        let natural = match &variant.discriminant {
            Some((_, expr)) => discriminant(expr)?,
            None => next,
        };
        let wire = parse_variant_value(variant)?.unwrap_or(natural);
        if !wire_values.insert(wire) {
            return Err(syn::Error::new_spanned(
                variant,
                format!("duplicate enum value {wire}"),
            ));
        }
        variants.push((&variant.ident, natural, wire));
        next = natural.wrapping_add(1);
    }
    if variants.is_empty() {
        return Err(syn::Error::new_spanned(input, "enum has no variants"));
    }

    let defs = variants.iter().map(|(ident, natural, wire)| {
        let vname = ident.to_string();
        quote! { .variant(#vname, #natural, #wire) }
    });
    let to_arms = variants.iter().map(|(ident, natural, _)| {
        quote! { Self::#ident => #natural, }
    });
    let from_arms = variants.iter().map(|(ident, natural, _)| {
        quote! { #natural => Ok(Self::#ident), }
    });

    Ok(quote! {
        impl ::protomodel::Describe for #name {
            fn describe() -> ::protomodel::TypeDef {
                ::protomodel::EnumDef::new(#type_name)
                    #(#defs)*
                    .into()
            }
        }

        impl ::protomodel::ProtoElement for #name {
            fn type_ref() -> ::protomodel::TypeRef {
                ::protomodel::TypeRef::of::<Self>()
            }

            fn to_value(
                &self,
                _model: &::protomodel::TypeModel,
            ) -> ::core::result::Result<::protomodel::Value, ::protomodel::Error> {
                let natural: i32 = match self {
                    #(#to_arms)*
                };
                Ok(::protomodel::Value::Enum(natural))
            }

            fn from_value(
                value: ::protomodel::Value,
                _model: &::protomodel::TypeModel,
            ) -> ::core::result::Result<Self, ::protomodel::Error> {
                match ::protomodel::reflect::field::enum_from_value(value)? {
                    #(#from_arms)*
                    other => Err(::protomodel::reflect::field::unmapped_enum(other)),
                }
            }
        }
    })
}
