//! The runtime type model.
//!
//! A [`TypeModel`] maps described types to field-level metadata. It starts
//! *open*, growing as types are described, defined and included, and is
//! eventually *locked*, after which it is shared by any number of readers.
//!
//! Metadata lives in an immutable snapshot published through an
//! [`ArcSwap`]. Readers load the current snapshot without locking, writers
//! are serialized by a mutex and publish a new snapshot only once a change
//! has been fully resolved and validated.

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, OnceLock};

use arc_swap::ArcSwap;
use parking_lot::Mutex;

use crate::error::Error;
use crate::reader::DEFAULT_MAX_DEPTH;
use crate::value::Message;
use crate::writer::LengthStrategy;

mod def;
mod descriptor;
pub(crate) mod registry;

pub use def::{
    Describe, EnumDef, Encoding, FieldDef, FieldShape, MessageDef, StaticType, TypeDef, TypeRef,
    WellKnown,
};
pub use descriptor::{
    Descriptor, Element, EnumDescriptor, EnumVariant, FieldDescriptor, FieldKind,
    IncludeDescriptor, ScalarType, SemanticKind, TypeDescriptor, WireCategory,
};

use registry::{Registry, Transaction};

/// Identifies a type within one [`TypeModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TypeHandle {
    model: u32,
    index: u32,
}

impl TypeHandle {
    pub(crate) const fn new(model: u32, index: u32) -> Self {
        TypeHandle { model, index }
    }

    pub(crate) fn model(self) -> u32 {
        self.model
    }

    pub(crate) fn index(self) -> usize {
        crate::util::CastFrom::cast_from(self.index)
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.model, self.index)
    }
}

/// What happens to metadata changes once a model is locked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LockPolicy {
    /// Every change fails with [`ErrorKind::ModelLocked`](crate::ErrorKind::ModelLocked).
    #[default]
    Strict,
    /// Brand new types may still be described or defined. Existing types,
    /// includes among them, stay frozen.
    AllowDiscovery,
}

/// Controls the default wire treatment of platform time types.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CompatibilityLevel {
    /// Legacy `bcl.TimeSpan`/`bcl.DateTime` shapes.
    Level200,
    /// `google.protobuf.Duration`/`google.protobuf.Timestamp` shapes.
    #[default]
    Level300,
}

/// Configuration for a [`TypeModel`].
#[derive(Debug, Clone)]
pub struct ModelOptions {
    pub(crate) lock_policy: LockPolicy,
    pub(crate) allow_specialization: bool,
    pub(crate) lazy_specialize: bool,
    pub(crate) default_length_strategy: LengthStrategy,
    pub(crate) max_depth: usize,
    pub(crate) compatibility_level: CompatibilityLevel,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            lock_policy: LockPolicy::Strict,
            allow_specialization: true,
            lazy_specialize: true,
            default_length_strategy: LengthStrategy::Measure,
            max_depth: DEFAULT_MAX_DEPTH,
            compatibility_level: CompatibilityLevel::Level300,
        }
    }
}

impl ModelOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set what happens to metadata changes after [`TypeModel::lock`].
    pub fn lock_policy(&mut self, policy: LockPolicy) -> &mut Self {
        self.lock_policy = policy;
        self
    }

    /// Allow or forbid building execution plans. When forbidden every type
    /// runs on the interpreter.
    pub fn allow_specialization(&mut self, allow: bool) -> &mut Self {
        self.allow_specialization = allow;
        self
    }

    /// Build execution plans on first use rather than only on
    /// [`TypeModel::specialize`].
    pub fn lazy_specialize(&mut self, lazy: bool) -> &mut Self {
        self.lazy_specialize = lazy;
        self
    }

    /// Framing used for sub-messages when neither the call nor the type says.
    pub fn default_length_strategy(&mut self, strategy: LengthStrategy) -> &mut Self {
        self.default_length_strategy = strategy;
        self
    }

    /// Default limit on nested sub-messages, for reading and writing.
    pub fn max_depth(&mut self, max_depth: usize) -> &mut Self {
        self.max_depth = max_depth;
        self
    }

    /// Set the compatibility level used to build well-known types.
    pub fn compatibility_level(&mut self, level: CompatibilityLevel) -> &mut Self {
        self.compatibility_level = level;
        self
    }

    pub fn get_lock_policy(&self) -> LockPolicy {
        self.lock_policy
    }

    pub fn get_max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn get_default_length_strategy(&self) -> LengthStrategy {
        self.default_length_strategy
    }

    pub fn get_compatibility_level(&self) -> CompatibilityLevel {
        self.compatibility_level
    }

    pub fn specialization_allowed(&self) -> bool {
        self.allow_specialization
    }

    pub fn specializes_lazily(&self) -> bool {
        self.lazy_specialize
    }
}

static NEXT_MODEL_ID: AtomicU32 = AtomicU32::new(0);

/// Registry of described types, and the entry point for encoding and
/// decoding.
pub struct TypeModel {
    pub(crate) options: ModelOptions,
    registry: ArcSwap<Registry>,
    writer: Mutex<()>,
}

impl fmt::Debug for TypeModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let snapshot = self.registry.load();
        f.debug_struct("TypeModel")
            .field("id", &snapshot.model)
            .field("types", &snapshot.types.len())
            .field("locked", &snapshot.locked)
            .finish()
    }
}

impl Default for TypeModel {
    fn default() -> Self {
        TypeModel::new()
    }
}

impl TypeModel {
    /// Create an open model with default options.
    pub fn new() -> Self {
        TypeModel::with_options(ModelOptions::default())
    }

    pub fn with_options(options: ModelOptions) -> Self {
        let id = NEXT_MODEL_ID.fetch_add(1, Ordering::Relaxed);
        TypeModel {
            options,
            registry: ArcSwap::from_pointee(Registry::new(id)),
            writer: Mutex::new(()),
        }
    }

    /// A process-wide model with default options.
    ///
    /// Convenient at the edges of an application; libraries should take a
    /// `&TypeModel` instead.
    pub fn global() -> &'static TypeModel {
        static GLOBAL: OnceLock<TypeModel> = OnceLock::new();
        GLOBAL.get_or_init(TypeModel::new)
    }

    pub fn options(&self) -> &ModelOptions {
        &self.options
    }

    /// The current metadata snapshot.
    pub(crate) fn snapshot(&self) -> Arc<Registry> {
        self.registry.load_full()
    }

    /// Run a change against a private copy of the registry and publish it.
    ///
    /// `adds_only` is `true` for requests that may be served after locking
    /// under [`LockPolicy::AllowDiscovery`].
    fn mutate<R>(
        &self,
        adds_only: bool,
        change: impl FnOnce(&mut Transaction) -> Result<R, Error>,
    ) -> Result<R, Error> {
        let _guard = self.writer.lock();
        let current = self.registry.load_full();
        let discovering = current.locked;
        if discovering && !(adds_only && self.options.lock_policy == LockPolicy::AllowDiscovery) {
            return Err(Error::model_locked());
        }

        let mut tx = Transaction::begin(&current, self.options.compatibility_level);
        let result = change(&mut tx)?;
        tx.run()?;
        if discovering && tx.changed_existing() {
            return Err(Error::model_locked());
        }
        let added = tx.added();
        let next = tx.commit()?;
        if added > 0 {
            tracing::debug!(added, total = next.types.len(), discovering, "type model updated");
        }
        self.registry.store(Arc::new(next));
        Ok(result)
    }

    /// Describe `T` and everything it references, returning its handle.
    ///
    /// Already described types are returned without taking the write lock.
    pub fn describe<T: Describe>(&self) -> Result<TypeHandle, Error> {
        if let Some(handle) = self.handle_of::<T>() {
            return Ok(handle);
        }
        let ty = match TypeRef::of::<T>() {
            TypeRef::Static(st) => st,
            _ => return Err(Error::programming_error("described type is not static")),
        };
        self.mutate(true, |tx| tx.intern_static(&ty))
    }

    /// Register a batch of definitions that may reference each other, and
    /// existing types, by name.
    pub fn define(
        &self,
        defs: impl IntoIterator<Item = TypeDef>,
    ) -> Result<Vec<TypeHandle>, Error> {
        let defs: Vec<TypeDef> = defs.into_iter().collect();
        self.mutate(true, |tx| {
            defs.into_iter()
                .map(|def| tx.intern_def(def))
                .collect::<Result<Vec<_>, _>>()
        })
    }

    /// Register `sub` as a subtype of `base`, written under `tag`.
    pub fn include(&self, base: TypeHandle, sub: TypeHandle, tag: u32) -> Result<(), Error> {
        self.mutate(false, |tx| {
            tx.request_include(base, sub, tag);
            Ok(())
        })
    }

    /// The handle of a well-known type at this model's compatibility level,
    /// registering it if needed.
    pub fn well_known(&self, wk: WellKnown) -> Result<TypeHandle, Error> {
        let name = crate::wellknown::type_name(wk, self.options.compatibility_level);
        if let Some(handle) = self.find(name) {
            return Ok(handle);
        }
        self.mutate(true, |tx| tx.intern_well_known(wk))
    }

    /// Freeze the metadata.
    pub fn lock(&self) {
        let _guard = self.writer.lock();
        let current = self.registry.load_full();
        if current.locked {
            return;
        }
        let mut next = Registry::clone(&current);
        next.locked = true;
        self.registry.store(Arc::new(next));
        tracing::debug!(types = current.types.len(), "type model locked");
    }

    /// Give `handle` an empty plan slot so its plan is built again.
    pub(crate) fn reset_plan(&self, handle: TypeHandle) -> Result<(), Error> {
        let _guard = self.writer.lock();
        let current = self.registry.load_full();
        current.plan_slot(handle)?;
        let mut next = Registry::clone(&current);
        next.plans[handle.index()] = Arc::new(OnceLock::new());
        self.registry.store(Arc::new(next));
        Ok(())
    }

    pub fn is_locked(&self) -> bool {
        self.registry.load().locked
    }

    /// Resolved metadata of a message type.
    pub fn descriptor(&self, handle: TypeHandle) -> Result<Arc<TypeDescriptor>, Error> {
        self.registry.load().message(handle).cloned()
    }

    /// Resolved metadata of an enum type.
    pub fn enum_descriptor(&self, handle: TypeHandle) -> Result<Arc<EnumDescriptor>, Error> {
        self.registry.load().enumeration(handle).cloned()
    }

    /// Every registered type, in registration order.
    pub fn types(&self) -> Vec<Descriptor> {
        self.registry.load().types.clone()
    }

    /// The handle of `T`, if it has been described.
    pub fn handle_of<T: 'static>(&self) -> Option<TypeHandle> {
        self.registry
            .load()
            .by_type_id
            .get(&TypeId::of::<T>())
            .copied()
    }

    /// Look a type up by its registered name.
    pub fn find(&self, name: &str) -> Option<TypeHandle> {
        self.registry.load().by_name.get(name).copied()
    }

    /// An empty instance of a message type.
    pub fn new_message(&self, handle: TypeHandle) -> Result<Message, Error> {
        self.registry.load().message(handle)?;
        Ok(Message::new(handle))
    }
}
