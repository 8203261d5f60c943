//! The type arena and the transactions that grow it.
//!
//! A [`Registry`] is an immutable snapshot. Changes are made on a private copy
//! inside a [`Transaction`], which resolves every definition reachable from
//! the request with a worklist, validates the result, and only then becomes
//! the next snapshot. A failing transaction leaves no trace.

use std::any::TypeId;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, OnceLock};

use smallvec::SmallVec;

use crate::engine::plan::PlanSlot;
use crate::error::Error;
use crate::model::def::{EnumDef, FieldDef, FieldShape, MessageDef, StaticType, TypeDef};
use crate::model::descriptor::{
    Descriptor, Element, EnumDescriptor, EnumVariant, FieldDescriptor, FieldKind,
    IncludeDescriptor, ScalarType, TypeDescriptor,
};
use crate::model::{CompatibilityLevel, Encoding, TypeHandle, TypeRef, WellKnown};
use crate::value::Value;
use crate::wellknown;
use crate::wire::validate_field_number;

/// Ancestor chains are rarely deep.
pub(crate) type Chain = SmallVec<[TypeHandle; 4]>;

#[derive(Debug, Clone)]
pub(crate) struct Registry {
    pub(crate) model: u32,
    pub(crate) types: Vec<Descriptor>,
    pub(crate) by_type_id: HashMap<TypeId, TypeHandle>,
    pub(crate) by_name: HashMap<Arc<str>, TypeHandle>,
    pub(crate) plans: Vec<Arc<PlanSlot>>,
    pub(crate) locked: bool,
}

impl Registry {
    pub(crate) fn new(model: u32) -> Self {
        Registry {
            model,
            types: Vec::new(),
            by_type_id: HashMap::new(),
            by_name: HashMap::new(),
            plans: Vec::new(),
            locked: false,
        }
    }

    pub(crate) fn get(&self, handle: TypeHandle) -> Result<&Descriptor, Error> {
        if handle.model() != self.model {
            return Err(Error::unknown_type());
        }
        self.types.get(handle.index()).ok_or_else(Error::unknown_type)
    }

    pub(crate) fn message(&self, handle: TypeHandle) -> Result<&Arc<TypeDescriptor>, Error> {
        self.get(handle)?.expect_message()
    }

    pub(crate) fn enumeration(&self, handle: TypeHandle) -> Result<&Arc<EnumDescriptor>, Error> {
        self.get(handle)?.expect_enum()
    }

    pub(crate) fn plan_slot(&self, handle: TypeHandle) -> Result<&Arc<PlanSlot>, Error> {
        if handle.model() != self.model {
            return Err(Error::unknown_type());
        }
        self.plans.get(handle.index()).ok_or_else(Error::unknown_type)
    }

    /// `ty` and its ancestors, root first.
    pub(crate) fn chain(&self, ty: TypeHandle) -> Result<Chain, Error> {
        let mut chain = Chain::new();
        let mut current = Some(ty);
        while let Some(handle) = current {
            if chain.contains(&handle) {
                return Err(Error::unsupported_type("include cycle"));
            }
            chain.push(handle);
            current = self.message(handle)?.base;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Returns `true` if `ancestor` is `ty` or one of its bases.
    pub(crate) fn is_ancestor_or_self(&self, ancestor: TypeHandle, ty: TypeHandle) -> bool {
        let mut current = Some(ty);
        let mut steps = 0;
        while let Some(handle) = current {
            if handle == ancestor {
                return true;
            }
            steps += 1;
            if steps > self.types.len() {
                return false;
            }
            current = self.message(handle).ok().and_then(|d| d.base);
        }
        false
    }
}

/// What a newly allocated handle will hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Message,
    Enum,
}

/// A pending change to a [`Registry`].
pub(crate) struct Transaction {
    reg: Registry,
    compatibility: CompatibilityLevel,
    /// Index of the first handle allocated by this transaction.
    first_new: usize,
    /// Kinds of new handles, indexed from `first_new`.
    kinds: Vec<Kind>,
    /// Resolved descriptors of new handles, indexed from `first_new`.
    slots: Vec<Option<Descriptor>>,
    worklist: Vec<(TypeHandle, TypeDef)>,
    /// `(base, tag, sub)` include requests, applied after resolution.
    includes: Vec<(TypeHandle, u32, TypeHandle)>,
    /// `(sub, base)` pairs declared with `extends`.
    declared_bases: Vec<(TypeHandle, TypeHandle)>,
    changed_existing: bool,
}

impl Transaction {
    pub(crate) fn begin(reg: &Registry, compatibility: CompatibilityLevel) -> Self {
        Transaction {
            first_new: reg.types.len(),
            reg: reg.clone(),
            compatibility,
            kinds: Vec::new(),
            slots: Vec::new(),
            worklist: Vec::new(),
            includes: Vec::new(),
            declared_bases: Vec::new(),
            changed_existing: false,
        }
    }

    /// Whether an existing descriptor was modified.
    pub(crate) fn changed_existing(&self) -> bool {
        self.changed_existing
    }

    /// Number of types this transaction adds.
    pub(crate) fn added(&self) -> usize {
        self.slots.len()
    }

    fn kind_of(&self, handle: TypeHandle) -> Result<Kind, Error> {
        let index = handle.index();
        if index >= self.first_new {
            return self
                .kinds
                .get(index - self.first_new)
                .copied()
                .ok_or_else(Error::unknown_type);
        }
        match self.reg.get(handle)? {
            Descriptor::Message(_) => Ok(Kind::Message),
            Descriptor::Enum(_) => Ok(Kind::Enum),
        }
    }

    fn allocate(&mut self, name: &Arc<str>, kind: Kind) -> Result<TypeHandle, Error> {
        if self.reg.by_name.contains_key(name) {
            return Err(Error::unsupported_type(format!(
                "a type named `{name}` is already registered"
            )));
        }
        let index = u32::try_from(self.first_new + self.slots.len())
            .map_err(|_| Error::unsupported_type("too many types"))?;
        let handle = TypeHandle::new(self.reg.model, index);
        self.kinds.push(kind);
        self.slots.push(None);
        self.reg.by_name.insert(Arc::clone(name), handle);
        Ok(handle)
    }

    fn def_kind(def: &TypeDef) -> Kind {
        match def {
            TypeDef::Message(_) => Kind::Message,
            TypeDef::Enum(_) => Kind::Enum,
        }
    }

    /// Register a Rust type, describing it if it is new.
    pub(crate) fn intern_static(&mut self, ty: &StaticType) -> Result<TypeHandle, Error> {
        if let Some(handle) = self.reg.by_type_id.get(&ty.id) {
            return Ok(*handle);
        }
        let def = (ty.describe)();
        let name: Arc<str> = Arc::from(def.name());
        let handle = self.allocate(&name, Self::def_kind(&def))?;
        // Memoize before resolving so recursive references terminate.
        self.reg.by_type_id.insert(ty.id, handle);
        tracing::debug!(rust_type = ty.rust_name, name = %name, "describing type");
        self.worklist.push((handle, def));
        Ok(handle)
    }

    /// Register a runtime definition.
    pub(crate) fn intern_def(&mut self, def: TypeDef) -> Result<TypeHandle, Error> {
        let name: Arc<str> = Arc::from(def.name());
        let handle = self.allocate(&name, Self::def_kind(&def))?;
        self.worklist.push((handle, def));
        Ok(handle)
    }

    /// Register the built-in shape of `wk` for this model's compatibility level.
    pub(crate) fn intern_well_known(&mut self, wk: WellKnown) -> Result<TypeHandle, Error> {
        let name = wellknown::type_name(wk, self.compatibility);
        if let Some(handle) = self.reg.by_name.get(name) {
            return Ok(*handle);
        }
        let mut handle = None;
        for def in wellknown::defs(wk, self.compatibility) {
            match self.reg.by_name.get(def.name()) {
                Some(existing) => handle = Some(*existing),
                None => handle = Some(self.intern_def(def)?),
            }
        }
        handle.ok_or_else(|| Error::programming_error("well-known type has no definition"))
    }

    fn resolve_named(&self, name: &str) -> Result<TypeHandle, Error> {
        self.reg
            .by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::unsupported_type(format!("unknown type `{name}`")))
    }

    /// Resolve a reference to a message or enum handle.
    fn resolve_ref(&mut self, ty: &TypeRef) -> Result<TypeHandle, Error> {
        match ty {
            TypeRef::Static(st) => self.intern_static(st),
            TypeRef::Named(name) => self.resolve_named(name),
            TypeRef::WellKnown(wk) => self.intern_well_known(*wk),
            TypeRef::Scalar(scalar) => Err(Error::unsupported_type(format!(
                "expected a message type, found {}",
                scalar.name()
            ))),
        }
    }

    fn resolve_message_ref(&mut self, ty: &TypeRef) -> Result<TypeHandle, Error> {
        let handle = self.resolve_ref(ty)?;
        match self.kind_of(handle)? {
            Kind::Message => Ok(handle),
            Kind::Enum => Err(Error::unsupported_type("expected a message type, found an enum")),
        }
    }

    fn resolve_element(&mut self, ty: &TypeRef, encoding: Encoding) -> Result<Element, Error> {
        if let TypeRef::Scalar(scalar) = ty {
            return Ok(Element::Scalar(apply_encoding(*scalar, encoding)?));
        }
        if encoding != Encoding::Default {
            return Err(Error::unsupported_type(
                "integer encodings only apply to scalar fields",
            ));
        }
        let handle = self.resolve_ref(ty)?;
        Ok(match self.kind_of(handle)? {
            Kind::Message => Element::Message(handle),
            Kind::Enum => Element::Enum(handle),
        })
    }

    /// Resolve everything reachable from the interned definitions.
    pub(crate) fn run(&mut self) -> Result<(), Error> {
        while let Some((handle, def)) = self.worklist.pop() {
            let descriptor = match def {
                TypeDef::Message(def) => {
                    let name = Arc::clone(&def.name);
                    let desc = self
                        .resolve_message(handle, def)
                        .map_err(|e| e.in_type(&name))?;
                    Descriptor::Message(Arc::new(desc))
                }
                TypeDef::Enum(def) => {
                    let name = Arc::clone(&def.name);
                    let desc = resolve_enum(handle, def).map_err(|e| e.in_type(&name))?;
                    Descriptor::Enum(Arc::new(desc))
                }
            };
            let slot = handle.index() - self.first_new;
            self.slots[slot] = Some(descriptor);
        }
        Ok(())
    }

    fn resolve_message(
        &mut self,
        handle: TypeHandle,
        def: MessageDef,
    ) -> Result<TypeDescriptor, Error> {
        let mut fields = Vec::with_capacity(def.fields.len());
        for field in def.fields {
            let number = field.number;
            fields.push(self.resolve_field(field).map_err(|e| e.in_field(number))?);
        }
        fields.sort_by_key(|f| f.number);
        if let Some(dup) = fields.windows(2).find(|w| w[0].number == w[1].number) {
            return Err(Error::duplicate_field_number(dup[0].number));
        }

        for (tag, sub) in &def.includes {
            let tag = *tag;
            validate_field_number(tag).map_err(|e| e.in_field(tag))?;
            let sub = self.resolve_message_ref(sub).map_err(|e| e.in_field(tag))?;
            self.includes.push((handle, tag, sub));
        }
        if let Some(base) = &def.base {
            let base = self.resolve_message_ref(base)?;
            self.declared_bases.push((handle, base));
        }

        Ok(TypeDescriptor {
            handle,
            name: def.name,
            fields,
            includes: Vec::new(),
            base: None,
            compatibility: self.compatibility,
            preserve_unknown: def.preserve_unknown,
            length_strategy: def.length_strategy,
        })
    }

    fn resolve_field(&mut self, def: FieldDef) -> Result<FieldDescriptor, Error> {
        validate_field_number(def.number)?;

        let (kind, presence) = match &def.shape {
            FieldShape::Single(ty) => {
                let element = self.resolve_element(ty, def.encoding)?;
                (FieldKind::Single(element), false)
            }
            FieldShape::Optional(ty) => {
                let element = self.resolve_element(ty, def.encoding)?;
                (FieldKind::Single(element), true)
            }
            FieldShape::Repeated(ty) => {
                let element = self.resolve_element(ty, def.encoding)?;
                let packed = match def.packed {
                    Some(true) if !element.is_packable() => {
                        return Err(Error::unsupported_type(
                            "only scalar numeric and enum fields can be packed",
                        ));
                    }
                    Some(packed) => packed,
                    None => element.is_packable(),
                };
                (FieldKind::Repeated { element, packed }, false)
            }
            FieldShape::Map(key, value) => {
                let key = match key {
                    TypeRef::Scalar(key) if key.is_valid_map_key() => *key,
                    _ => return Err(Error::unsupported_type("invalid map key type")),
                };
                let value = self.resolve_element(value, def.encoding)?;
                (FieldKind::Map { key, value }, false)
            }
        };

        if def.required && !matches!(kind, FieldKind::Single(_)) {
            return Err(Error::unsupported_type(
                "only singular fields can be required",
            ));
        }
        if def.packed.is_some() && !matches!(kind, FieldKind::Repeated { .. }) {
            return Err(Error::unsupported_type("only repeated fields can be packed"));
        }

        let default = resolve_default(kind, def.default)?;
        Ok(FieldDescriptor {
            number: def.number,
            name: def.name,
            kind,
            required: def.required,
            presence,
            default,
        })
    }

    fn message_mut(&mut self, handle: TypeHandle) -> Result<&mut TypeDescriptor, Error> {
        let index = handle.index();
        let descriptor = if index >= self.first_new {
            self.slots
                .get_mut(index - self.first_new)
                .and_then(Option::as_mut)
                .ok_or_else(Error::unknown_type)?
        } else {
            self.changed_existing = true;
            self.reg.types.get_mut(index).ok_or_else(Error::unknown_type)?
        };
        match descriptor {
            Descriptor::Message(desc) => Ok(Arc::make_mut(desc)),
            Descriptor::Enum(desc) => Err(Error::unsupported_type(format!(
                "`{}` is an enum, not a message",
                desc.name
            ))),
        }
    }

    fn message_ref(&self, handle: TypeHandle) -> Result<&TypeDescriptor, Error> {
        let index = handle.index();
        let descriptor = if index >= self.first_new {
            self.slots
                .get(index - self.first_new)
                .and_then(Option::as_ref)
                .ok_or_else(Error::unknown_type)?
        } else {
            self.reg.get(handle)?
        };
        descriptor.expect_message().map(|d| &**d)
    }

    /// Queue `sub` as a subtype of `base` written under `tag`.
    pub(crate) fn request_include(&mut self, base: TypeHandle, sub: TypeHandle, tag: u32) {
        self.includes.push((base, tag, sub));
    }

    fn apply_include(&mut self, base: TypeHandle, tag: u32, sub: TypeHandle) -> Result<(), Error> {
        validate_field_number(tag).map_err(|e| e.in_field(tag))?;
        let base_desc = self.message_ref(base)?;
        let base_name = Arc::clone(&base_desc.name);
        let sub_desc = self.message_ref(sub)?;
        let sub_name = Arc::clone(&sub_desc.name);

        match base_desc.include(tag) {
            Some(existing) if existing == sub => return Ok(()),
            Some(_) => return Err(Error::duplicate_field_number(tag).in_type(&base_name)),
            None => (),
        }
        if base_desc.include_tag(sub).is_some() {
            return Err(Error::unsupported_type(format!(
                "`{sub_name}` is already included by `{base_name}`"
            )));
        }
        if let Some(existing) = sub_desc.base {
            if existing != base {
                return Err(Error::unsupported_type(format!(
                    "`{sub_name}` already has a base type"
                )));
            }
        }
        if self.is_ancestor_or_self(sub, base)? {
            return Err(Error::unsupported_type(format!(
                "including `{sub_name}` in `{base_name}` creates an include cycle"
            )));
        }

        let base_desc = self.message_mut(base)?;
        let pos = base_desc.includes.partition_point(|i| i.number < tag);
        base_desc
            .includes
            .insert(pos, IncludeDescriptor { number: tag, ty: sub });
        self.message_mut(sub)?.base = Some(base);
        tracing::debug!(base = %base_name, sub = %sub_name, tag, "registered include");
        Ok(())
    }

    fn is_ancestor_or_self(&self, ancestor: TypeHandle, ty: TypeHandle) -> Result<bool, Error> {
        let mut current = Some(ty);
        let mut seen = HashSet::new();
        while let Some(handle) = current {
            if handle == ancestor {
                return Ok(true);
            }
            if !seen.insert(handle) {
                return Err(Error::unsupported_type("include cycle"));
            }
            current = self.message_ref(handle)?.base;
        }
        Ok(false)
    }

    fn chain_of(&self, ty: TypeHandle) -> Result<Chain, Error> {
        let mut chain = Chain::new();
        let mut current = Some(ty);
        while let Some(handle) = current {
            if chain.contains(&handle) {
                return Err(Error::unsupported_type("include cycle"));
            }
            chain.push(handle);
            current = self.message_ref(handle)?.base;
        }
        chain.reverse();
        Ok(chain)
    }

    /// Field numbers must be unique across a type, its ancestors and every
    /// include tag on that chain.
    fn validate_numbers(&self, ty: TypeHandle) -> Result<(), Error> {
        let chain = self.chain_of(ty)?;
        let mut seen = HashSet::new();
        for level in &chain {
            let desc = self.message_ref(*level)?;
            let numbers = desc
                .fields
                .iter()
                .map(|f| f.number)
                .chain(desc.includes.iter().map(|i| i.number));
            for number in numbers {
                if !seen.insert(number) {
                    let name = Arc::clone(&self.message_ref(ty)?.name);
                    return Err(Error::duplicate_field_number(number).in_type(&name));
                }
            }
        }
        Ok(())
    }

    /// Apply includes, check the result, and produce the next snapshot.
    pub(crate) fn commit(mut self) -> Result<Registry, Error> {
        let includes = std::mem::take(&mut self.includes);
        for (base, tag, sub) in includes {
            self.apply_include(base, tag, sub)?;
        }

        for (sub, base) in std::mem::take(&mut self.declared_bases) {
            let desc = self.message_ref(sub)?;
            if desc.base != Some(base) {
                let base_name = Arc::clone(&self.message_ref(base)?.name);
                let name = Arc::clone(&desc.name);
                return Err(Error::unsupported_type(format!(
                    "`{name}` extends `{base_name}`, but `{base_name}` does not include it"
                ))
                .in_type(&name));
            }
        }

        let total = self.first_new + self.slots.len();
        for index in 0..total {
            let index =
                u32::try_from(index).map_err(|_| Error::unsupported_type("too many types"))?;
            let handle = TypeHandle::new(self.reg.model, index);
            if self.kind_of(handle)? == Kind::Message {
                self.validate_numbers(handle)?;
            }
        }

        let mut reg = self.reg;
        for slot in self.slots {
            match slot {
                Some(descriptor) => reg.types.push(descriptor),
                None => {
                    return Err(Error::programming_error(
                        "type was allocated but never resolved",
                    ));
                }
            }
        }

        if self.changed_existing {
            // Existing plans may embed the old metadata.
            reg.plans = (0..reg.types.len())
                .map(|_| Arc::new(OnceLock::new()))
                .collect();
        } else {
            reg.plans
                .resize_with(reg.types.len(), || Arc::new(OnceLock::new()));
        }
        Ok(reg)
    }
}

/// Swap an integer type for its zigzag or fixed-width counterpart.
fn apply_encoding(ty: ScalarType, encoding: Encoding) -> Result<ScalarType, Error> {
    let resolved = match (encoding, ty) {
        (Encoding::Default, ty) => ty,
        (Encoding::ZigZag, ScalarType::Int32 | ScalarType::SInt32) => ScalarType::SInt32,
        (Encoding::ZigZag, ScalarType::Int64 | ScalarType::SInt64) => ScalarType::SInt64,
        (Encoding::Fixed, ScalarType::Int32 | ScalarType::SFixed32) => ScalarType::SFixed32,
        (Encoding::Fixed, ScalarType::Int64 | ScalarType::SFixed64) => ScalarType::SFixed64,
        (Encoding::Fixed, ScalarType::UInt32 | ScalarType::Fixed32) => ScalarType::Fixed32,
        (Encoding::Fixed, ScalarType::UInt64 | ScalarType::Fixed64) => ScalarType::Fixed64,
        (encoding, ty) => {
            return Err(Error::unsupported_type(format!(
                "{encoding:?} encoding does not apply to {}",
                ty.name()
            )));
        }
    };
    Ok(resolved)
}

fn resolve_default(kind: FieldKind, declared: Option<Value>) -> Result<Option<Value>, Error> {
    let default = match (kind, declared) {
        (FieldKind::Single(Element::Scalar(ty)), Some(value)) => {
            if !ty.accepts(&value) {
                return Err(Error::unsupported_type(format!(
                    "default for a {} field must be {}, found {}",
                    ty.name(),
                    ty.value_kind(),
                    value.kind_name()
                )));
            }
            value
        }
        (FieldKind::Single(Element::Scalar(ty)), None) => ty.zero_value(),
        (FieldKind::Single(Element::Enum(_)), Some(Value::Enum(v) | Value::I32(v))) => {
            Value::Enum(v)
        }
        (FieldKind::Single(Element::Enum(_)), None) => Value::Enum(0),
        (FieldKind::Single(Element::Message(_)), None) => return Ok(None),
        (FieldKind::Repeated { .. }, None) => Value::List(Vec::new()),
        (FieldKind::Map { .. }, None) => Value::Map(Default::default()),
        (_, Some(value)) => {
            return Err(Error::unsupported_type(format!(
                "a {} default does not apply to this field",
                value.kind_name()
            )));
        }
    };
    Ok(Some(default))
}

fn resolve_enum(handle: TypeHandle, def: EnumDef) -> Result<EnumDescriptor, Error> {
    if def.variants.is_empty() {
        return Err(Error::unsupported_type(format!(
            "enum `{}` has no variants",
            def.name
        )));
    }
    let variants = def
        .variants
        .into_iter()
        .map(|(name, natural, wire)| EnumVariant {
            name,
            natural,
            wire,
        })
        .collect();
    Ok(EnumDescriptor {
        handle,
        name: def.name,
        variants,
    })
}
