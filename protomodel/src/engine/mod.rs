//! The execution engine.
//!
//! Every message type can be run two ways:
//!
//! * the **interpreter** walks the descriptors of the registry on each call,
//! * an **execution plan** is compiled once per type, caching resolved
//!   members, pre-encoded keys and a direct-indexed decode table.
//!
//! Both hand fields to the same member serializers in [`crate::codec`], so
//! they produce identical bytes and accept each other's output. Which one
//! runs is decided per type, per nesting level, by [`Executor`] and the
//! model's options. A type whose plan cannot be built silently stays on the
//! interpreter.
//!
//! # Polymorphism
//!
//! A message whose runtime type `C` derives from `B` and `A` (`A` includes
//! `B` under tag 5, `B` includes `C` under tag 7) is written in *rooted*
//! form, starting from the root-most base:
//!
//! ```text
//! [5, LEN] { [7, LEN] { C fields, C unknown } B fields, B unknown } A fields, unknown fields
//! ```
//!
//! Readers recognise, at a level `L`, the fields of `L` and its ancestors,
//! `L`'s include tags (promoting the instance to the subtype), and include
//! tags of `L`'s ancestors that lead back into `L`'s own chain. An
//! ancestor's include tag for a type off that chain is a payload for a
//! sibling subtype and fails with [`ErrorKind::UnsupportedType`].
//!
//! Unknown fields found inside an include payload are kept per level and
//! written back inside the same wrapper.
//!
//! [`ErrorKind::UnsupportedType`]: crate::ErrorKind::UnsupportedType

use std::io;
use std::sync::Arc;

use bytes::{BufMut, Bytes};

use crate::codec::{check_depth, Nested};
use crate::error::Error;
use crate::model::registry::Registry;
use crate::model::{ModelOptions, TypeHandle, TypeModel};
use crate::reader::ProtoReader;
use crate::unknown::UnknownFields;
use crate::value::Message;
use crate::writer::{LengthStrategy, ProtoWriter};

mod interpreter;
pub(crate) mod plan;
mod stream;

pub use stream::{Items, PrefixStyle};

use plan::ExecutionPlan;

/// Which executor runs a call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Executor {
    /// Use a plan when one is available, building it on first use if the
    /// model specializes lazily.
    #[default]
    Auto,
    /// Always walk the descriptors.
    Interpreter,
    /// Build plans as needed, even when the model does not specialize lazily.
    Specialized,
}

/// How a type is currently executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Interpreted,
    Specialized,
    /// Specialization is disabled or failed for this type.
    Unavailable,
}

/// What this model can do on this platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub specialization: bool,
}

/// Per call settings for writing.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriteOptions {
    executor: Executor,
    length_strategy: Option<LengthStrategy>,
    max_depth: Option<usize>,
}

impl WriteOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    /// Framing for sub-messages whose type does not choose one itself.
    #[must_use]
    pub fn length_strategy(mut self, strategy: LengthStrategy) -> Self {
        self.length_strategy = Some(strategy);
        self
    }

    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }
}

/// Per call settings for reading.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReadOptions {
    executor: Executor,
    max_depth: Option<usize>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn executor(mut self, executor: Executor) -> Self {
        self.executor = executor;
        self
    }

    #[must_use]
    pub fn max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = Some(max_depth);
        self
    }
}

/// Which levels of a message are written at its top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Form {
    /// Only the root-most base, deeper levels in include wrappers.
    Rooted,
    /// The given ancestor-or-self and everything above it, merged.
    Flat(TypeHandle),
}

impl Form {
    /// Index, in a root first chain, of the deepest level written at the top.
    fn top(self, chain: &[TypeHandle]) -> Result<usize, Error> {
        match self {
            Form::Rooted => Ok(0),
            Form::Flat(ty) => chain.iter().position(|t| *t == ty).ok_or_else(|| {
                Error::unsupported_type(format!("{ty} is not the message type or one of its bases"))
            }),
        }
    }
}

/// What a field number means at some level.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Action<F> {
    Field(F),
    /// An included subtype: promote and read the payload at its level.
    Descend(TypeHandle),
    /// An ancestor's include of the given chain member: read the payload at
    /// the current level.
    Inline(TypeHandle),
}

/// State shared by one encode or decode call.
pub(crate) struct Context<'a> {
    reg: &'a Registry,
    options: &'a ModelOptions,
    executor: Executor,
    strategy: LengthStrategy,
    max_depth: usize,
}

impl<'a> Context<'a> {
    fn writing(reg: &'a Registry, options: &'a ModelOptions, write: &WriteOptions) -> Self {
        Context {
            reg,
            options,
            executor: write.executor,
            strategy: write
                .length_strategy
                .unwrap_or(options.default_length_strategy),
            max_depth: write.max_depth.unwrap_or(options.max_depth),
        }
    }

    fn reading(reg: &'a Registry, options: &'a ModelOptions, read: &ReadOptions) -> Self {
        Context {
            reg,
            options,
            executor: read.executor,
            strategy: options.default_length_strategy,
            max_depth: read.max_depth.unwrap_or(options.max_depth),
        }
    }

    /// The plan to run `ty` with, if any.
    fn plan(&self, ty: TypeHandle) -> Result<Option<Arc<ExecutionPlan>>, Error> {
        if !self.options.allow_specialization {
            return Ok(None);
        }
        let build = match self.executor {
            Executor::Interpreter => return Ok(None),
            Executor::Auto => self.options.lazy_specialize,
            Executor::Specialized => true,
        };
        let slot = self.reg.plan_slot(ty)?;
        let compiled = match slot.get() {
            Some(compiled) => compiled,
            None if build => slot.get_or_init(|| plan::compile(self.reg, ty)),
            None => return Ok(None),
        };
        Ok(compiled.as_ref().ok().cloned())
    }

    fn check_assignable(&self, declared: TypeHandle, msg: &Message) -> Result<(), Error> {
        if self.reg.is_ancestor_or_self(declared, msg.type_handle()) {
            Ok(())
        } else {
            Err(Error::value_mismatch(
                "the declared message type or a subtype",
                "an unrelated message type",
            ))
        }
    }

    pub(crate) fn form_len(&self, msg: &Message, form: Form, depth: usize) -> Result<usize, Error> {
        match self.plan(msg.type_handle())? {
            Some(plan) => plan.message_len(self, msg, form, depth),
            None => interpreter::message_len(self, msg, form, depth),
        }
    }

    pub(crate) fn write_form<B: BufMut>(
        &self,
        w: &mut ProtoWriter<B>,
        msg: &Message,
        form: Form,
    ) -> Result<(), Error> {
        match self.plan(msg.type_handle())? {
            Some(plan) => plan.write(self, w, msg, form),
            None => interpreter::write(self, w, msg, form),
        }
    }

    /// Read the remaining fields of the current message at `level`.
    ///
    /// `wrapper` is the chain member whose include payload is being read,
    /// `None` at the top of a message.
    pub(crate) fn read_level(
        &self,
        r: &mut ProtoReader,
        msg: &mut Message,
        level: TypeHandle,
        wrapper: Option<TypeHandle>,
    ) -> Result<(), Error> {
        match self.plan(level)? {
            Some(plan) => plan.read_level(self, r, msg, wrapper),
            None => interpreter::read_level(self, r, msg, level, wrapper),
        }
    }

    pub(crate) fn check_required(&self, msg: &Message) -> Result<(), Error> {
        match self.plan(msg.type_handle())? {
            Some(plan) => plan.check_required(msg),
            None => interpreter::check_required(self.reg, msg),
        }
    }

    /// Promote `msg` to `sub` and read the current sub-message at its level.
    fn descend(
        &self,
        r: &mut ProtoReader,
        msg: &mut Message,
        sub: TypeHandle,
    ) -> Result<(), Error> {
        promote(self.reg, msg, sub)?;
        let token = r.enter_sub_message()?;
        self.read_level(r, msg, sub, Some(sub))?;
        r.leave_sub_message(token)
    }

    /// Read the current sub-message, the payload of chain member `target`,
    /// at `level`.
    fn inline(
        &self,
        r: &mut ProtoReader,
        msg: &mut Message,
        level: TypeHandle,
        target: TypeHandle,
    ) -> Result<(), Error> {
        let token = r.enter_sub_message()?;
        self.read_level(r, msg, level, Some(target))?;
        r.leave_sub_message(token)
    }
}

impl Nested for Context<'_> {
    fn max_depth(&self) -> usize {
        self.max_depth
    }

    fn length_strategy(&self, ty: TypeHandle) -> Result<LengthStrategy, Error> {
        Ok(self
            .reg
            .message(ty)?
            .length_strategy()
            .unwrap_or(self.strategy))
    }

    fn message_len(
        &self,
        msg: &Message,
        declared: TypeHandle,
        depth: usize,
    ) -> Result<usize, Error> {
        check_depth(depth, self.max_depth)?;
        self.check_assignable(declared, msg)?;
        self.form_len(msg, Form::Rooted, depth)
    }

    fn write_message<B: BufMut>(
        &self,
        w: &mut ProtoWriter<B>,
        msg: &Message,
        declared: TypeHandle,
    ) -> Result<(), Error> {
        self.check_assignable(declared, msg)?;
        self.write_form(w, msg, Form::Rooted)
    }

    fn read_message(
        &self,
        r: &mut ProtoReader,
        msg: &mut Message,
        declared: TypeHandle,
    ) -> Result<(), Error> {
        self.read_level(r, msg, declared, None)?;
        self.check_required(msg)
    }
}

/// Move `msg` to the subtype a payload was written for.
fn promote(reg: &Registry, msg: &mut Message, sub: TypeHandle) -> Result<(), Error> {
    let current = msg.type_handle();
    if reg.is_ancestor_or_self(current, sub) {
        msg.set_type(sub);
        Ok(())
    } else if reg.is_ancestor_or_self(sub, current) {
        Ok(())
    } else {
        let current = reg.message(current)?.name();
        let sub = reg.message(sub)?.name();
        Err(Error::unsupported_type(format!(
            "a `{sub}` payload cannot be merged into a `{current}`"
        )))
    }
}

/// Keep or drop the field the reader is positioned at.
fn unknown_field(
    r: &mut ProtoReader,
    msg: &mut Message,
    preserve: bool,
    wrapper: Option<TypeHandle>,
) -> Result<(), Error> {
    if !preserve {
        return r.skip_field();
    }
    let raw = r.capture_field()?;
    match wrapper {
        Some(level) => msg.unknown_fields_at_mut(level).push_raw(&raw),
        None => msg.unknown_fields_mut().push_raw(&raw),
    }
    Ok(())
}

/// Length of the unknown fields written at the top of `msg` when levels
/// `..=top` of its chain are merged there.
fn top_unknown_len(msg: &Message, chain: &[TypeHandle], top: usize) -> usize {
    let merged: usize = chain[1..=top]
        .iter()
        .filter_map(|level| msg.unknown_fields_at(*level))
        .map(UnknownFields::encoded_len)
        .sum();
    msg.unknown_fields().encoded_len() + merged
}

fn write_top_unknown<B: BufMut>(
    w: &mut ProtoWriter<B>,
    msg: &Message,
    chain: &[TypeHandle],
    top: usize,
) {
    w.write_raw(msg.unknown_fields().as_bytes());
    for level in &chain[1..=top] {
        if let Some(unknown) = msg.unknown_fields_at(*level) {
            w.write_raw(unknown.as_bytes());
        }
    }
}

/// Unknown fields that belong inside the wrapper of `level`.
fn level_unknown(msg: &Message, level: TypeHandle) -> &[u8] {
    msg.unknown_fields_at(level)
        .map(UnknownFields::as_bytes)
        .unwrap_or_default()
}

impl TypeModel {
    /// Write `msg` in rooted form.
    pub fn serialize<B: BufMut>(&self, msg: &Message, buf: &mut B) -> Result<(), Error> {
        self.serialize_with(msg, buf, &WriteOptions::default())
    }

    pub fn serialize_with<B: BufMut>(
        &self,
        msg: &Message,
        buf: &mut B,
        options: &WriteOptions,
    ) -> Result<(), Error> {
        self.write_in_form(msg, Form::Rooted, buf, options)
    }

    /// Write `msg` in flat form as `ty`, which must be the message type or
    /// one of its bases: the fields of `ty` and its ancestors at the top
    /// level, deeper levels in include wrappers.
    pub fn serialize_as<B: BufMut>(
        &self,
        msg: &Message,
        ty: TypeHandle,
        buf: &mut B,
    ) -> Result<(), Error> {
        self.write_in_form(msg, Form::Flat(ty), buf, &WriteOptions::default())
    }

    fn write_in_form<B: BufMut>(
        &self,
        msg: &Message,
        form: Form,
        buf: &mut B,
        options: &WriteOptions,
    ) -> Result<(), Error> {
        let reg = self.snapshot();
        let desc = reg.message(msg.type_handle())?;
        let ctx = Context::writing(&reg, &self.options, options);
        let mut w = ProtoWriter::new(buf).with_max_depth(ctx.max_depth);
        ctx.write_form(&mut w, msg, form)
            .map_err(|e| e.in_type(desc.name_arc()))
    }

    pub fn serialize_to_vec(&self, msg: &Message) -> Result<Vec<u8>, Error> {
        let mut buf = Vec::with_capacity(self.encoded_len(msg)?);
        self.serialize(msg, &mut buf)?;
        Ok(buf)
    }

    pub fn serialize_to_writer<W: io::Write>(
        &self,
        msg: &Message,
        mut out: W,
    ) -> Result<(), Error> {
        let buf = self.serialize_to_vec(msg)?;
        out.write_all(&buf)?;
        Ok(())
    }

    /// Length of `msg` in rooted form.
    pub fn encoded_len(&self, msg: &Message) -> Result<usize, Error> {
        let reg = self.snapshot();
        let desc = reg.message(msg.type_handle())?;
        let ctx = Context::writing(&reg, &self.options, &WriteOptions::default());
        ctx.form_len(msg, Form::Rooted, 0)
            .map_err(|e| e.in_type(desc.name_arc()))
    }

    /// Decode a message of type `ty`.
    pub fn deserialize(&self, ty: TypeHandle, data: impl Into<Bytes>) -> Result<Message, Error> {
        self.deserialize_with(ty, data, &ReadOptions::default())
    }

    pub fn deserialize_with(
        &self,
        ty: TypeHandle,
        data: impl Into<Bytes>,
        options: &ReadOptions,
    ) -> Result<Message, Error> {
        let mut msg = Message::new(ty);
        self.merge_with(&mut msg, data.into(), options)?;
        Ok(msg)
    }

    /// Decode into an existing instance, merging with its contents.
    pub fn deserialize_into(&self, msg: &mut Message, data: impl Into<Bytes>) -> Result<(), Error> {
        self.merge_with(msg, data.into(), &ReadOptions::default())
    }

    fn merge_with(
        &self,
        msg: &mut Message,
        data: Bytes,
        options: &ReadOptions,
    ) -> Result<(), Error> {
        let reg = self.snapshot();
        let level = msg.type_handle();
        let desc = reg.message(level)?;
        let ctx = Context::reading(&reg, &self.options, options);
        let mut r = ProtoReader::new(data).with_max_depth(ctx.max_depth);
        ctx.read_level(&mut r, msg, level, None)
            .and_then(|()| ctx.check_required(msg))
            .map_err(|e| e.in_type(desc.name_arc()))
    }

    /// Convert `msg` to `target` through the wire: its own and inherited
    /// fields are written flat, then read back as `target`.
    pub fn change_type(&self, msg: &Message, target: TypeHandle) -> Result<Message, Error> {
        let mut buf = Vec::new();
        self.serialize_as(msg, msg.type_handle(), &mut buf)?;
        self.deserialize(target, buf)
    }

    /// Copy `msg` through a serialize/deserialize round trip.
    pub fn deep_clone(&self, msg: &Message) -> Result<Message, Error> {
        let buf = self.serialize_to_vec(msg)?;
        let mut clone = Message::new(msg.type_handle());
        self.deserialize_into(&mut clone, buf)?;
        Ok(clone)
    }

    /// Build the execution plan of a message type now.
    pub fn specialize(&self, handle: TypeHandle) -> Result<ExecutionMode, Error> {
        let reg = self.snapshot();
        reg.message(handle)?;
        if !self.options.allow_specialization {
            tracing::warn!(%handle, "specialization is disabled, staying on the interpreter");
            return Ok(ExecutionMode::Unavailable);
        }
        let slot = reg.plan_slot(handle)?;
        match slot.get_or_init(|| plan::compile(&reg, handle)) {
            Ok(_) => Ok(ExecutionMode::Specialized),
            Err(_) => Ok(ExecutionMode::Unavailable),
        }
    }

    /// Discard the plan of a type and build it again.
    pub fn respecialize(&self, handle: TypeHandle) -> Result<ExecutionMode, Error> {
        self.reset_plan(handle)?;
        self.specialize(handle)
    }

    /// Build plans for every message type, returning how many are now
    /// specialized.
    pub fn specialize_all(&self) -> Result<usize, Error> {
        let handles: Vec<_> = self
            .types()
            .iter()
            .filter(|d| d.as_message().is_some())
            .map(|d| d.handle())
            .collect();
        let mut specialized = 0;
        for handle in handles {
            if self.specialize(handle)? == ExecutionMode::Specialized {
                specialized += 1;
            }
        }
        Ok(specialized)
    }

    pub fn execution_mode(&self, handle: TypeHandle) -> Result<ExecutionMode, Error> {
        let reg = self.snapshot();
        reg.message(handle)?;
        if !self.options.allow_specialization {
            return Ok(ExecutionMode::Unavailable);
        }
        Ok(match reg.plan_slot(handle)?.get() {
            Some(Ok(_)) => ExecutionMode::Specialized,
            Some(Err(_)) => ExecutionMode::Unavailable,
            None => ExecutionMode::Interpreted,
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities {
            specialization: self.options.allow_specialization,
        }
    }
}
