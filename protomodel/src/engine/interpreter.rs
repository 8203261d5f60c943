//! The reference executor.
//!
//! Resolves members straight from the registry on every call. Slower than a
//! plan, but needs nothing beyond the descriptors and is always available.

use bytes::BufMut;

use super::{
    level_unknown, top_unknown_len, unknown_field, write_top_unknown, Action, Context, Form,
};
use crate::codec::{check_depth, scalar, Member, Nested};
use crate::error::Error;
use crate::model::registry::Registry;
use crate::model::{FieldDescriptor, TypeHandle};
use crate::reader::ProtoReader;
use crate::value::Message;
use crate::wire::encoded_key_len;
use crate::writer::{LengthStrategy, ProtoWriter};

fn include_tag(reg: &Registry, chain: &[TypeHandle], i: usize) -> Result<u32, Error> {
    reg.message(chain[i])?
        .include_tag(chain[i + 1])
        .ok_or_else(|| Error::programming_error("subtype is missing from its base's includes"))
}

fn fields_len(
    ctx: &Context<'_>,
    msg: &Message,
    level: TypeHandle,
    depth: usize,
) -> Result<usize, Error> {
    let mut len = 0;
    for field in ctx.reg.message(level)?.fields() {
        let member = Member::resolve(field, ctx.reg)?;
        len += member.encoded_len(msg.get(field.number()), ctx, depth)?;
    }
    Ok(len)
}

/// Length of level `i` and everything below it.
fn level_len(
    ctx: &Context<'_>,
    msg: &Message,
    chain: &[TypeHandle],
    i: usize,
    depth: usize,
) -> Result<usize, Error> {
    check_depth(depth, ctx.max_depth)?;
    let mut len = fields_len(ctx, msg, chain[i], depth)? + level_unknown(msg, chain[i]).len();
    if i + 1 < chain.len() {
        len += wrapper_len(ctx, msg, chain, i, depth)?;
    }
    Ok(len)
}

/// Length of the wrapper holding level `i + 1` inside level `i`.
fn wrapper_len(
    ctx: &Context<'_>,
    msg: &Message,
    chain: &[TypeHandle],
    i: usize,
    depth: usize,
) -> Result<usize, Error> {
    let tag = include_tag(ctx.reg, chain, i)?;
    let inner = level_len(ctx, msg, chain, i + 1, depth + 1)?;
    Ok(encoded_key_len(tag) + scalar::len_delimited_len(inner))
}

pub(super) fn message_len(
    ctx: &Context<'_>,
    msg: &Message,
    form: Form,
    depth: usize,
) -> Result<usize, Error> {
    let chain = ctx.reg.chain(msg.type_handle())?;
    let top = form.top(&chain)?;
    let mut len = top_unknown_len(msg, &chain, top);
    if top + 1 < chain.len() {
        len += wrapper_len(ctx, msg, &chain, top, depth)?;
    }
    for level in &chain[..=top] {
        len += fields_len(ctx, msg, *level, depth)?;
    }
    Ok(len)
}

fn write_field<B: BufMut>(
    ctx: &Context<'_>,
    w: &mut ProtoWriter<B>,
    msg: &Message,
    field: &FieldDescriptor,
) -> Result<(), Error> {
    let member = Member::resolve(field, ctx.reg).map_err(|e| e.in_field(field.number()))?;
    member.encode(msg.get(field.number()), w, ctx)
}

fn write_level<B: BufMut>(
    ctx: &Context<'_>,
    w: &mut ProtoWriter<B>,
    msg: &Message,
    chain: &[TypeHandle],
    i: usize,
) -> Result<(), Error> {
    if i + 1 < chain.len() {
        write_wrapper(ctx, w, msg, chain, i)?;
    }
    for field in ctx.reg.message(chain[i])?.fields() {
        write_field(ctx, w, msg, field)?;
    }
    w.write_raw(level_unknown(msg, chain[i]));
    Ok(())
}

fn write_wrapper<B: BufMut>(
    ctx: &Context<'_>,
    w: &mut ProtoWriter<B>,
    msg: &Message,
    chain: &[TypeHandle],
    i: usize,
) -> Result<(), Error> {
    let tag = include_tag(ctx.reg, chain, i)?;
    match ctx.length_strategy(msg.type_handle())? {
        LengthStrategy::Measure => {
            let len = level_len(ctx, msg, chain, i + 1, w.depth() + 1)?;
            let token = w.begin_measured(tag, len)?;
            write_level(ctx, w, msg, chain, i + 1)?;
            w.end_measured(token)
        }
        LengthStrategy::Buffer => {
            let mut child = w.begin_buffered()?;
            write_level(ctx, &mut child, msg, chain, i + 1)?;
            w.end_buffered(tag, child)
        }
    }
}

pub(super) fn write<B: BufMut>(
    ctx: &Context<'_>,
    w: &mut ProtoWriter<B>,
    msg: &Message,
    form: Form,
) -> Result<(), Error> {
    let chain = ctx.reg.chain(msg.type_handle())?;
    let top = form.top(&chain)?;
    if top + 1 < chain.len() {
        write_wrapper(ctx, w, msg, &chain, top)?;
    }
    if top == 0 {
        for field in ctx.reg.message(chain[0])?.fields() {
            write_field(ctx, w, msg, field)?;
        }
    } else {
        let mut fields = Vec::new();
        for level in &chain[..=top] {
            fields.extend(ctx.reg.message(*level)?.fields());
        }
        fields.sort_unstable_by_key(|f| f.number());
        for field in fields {
            write_field(ctx, w, msg, field)?;
        }
    }
    write_top_unknown(w, msg, &chain, top);
    Ok(())
}

/// What `number` means when reading at the last level of `chain`.
fn lookup<'r>(
    reg: &'r Registry,
    chain: &[TypeHandle],
    number: u32,
) -> Result<Option<Action<&'r FieldDescriptor>>, Error> {
    for ty in chain {
        if let Some(field) = reg.message(*ty)?.field(number) {
            return Ok(Some(Action::Field(field)));
        }
    }
    let Some((level, ancestors)) = chain.split_last() else {
        return Ok(None);
    };
    if let Some(sub) = reg.message(*level)?.include(number) {
        return Ok(Some(Action::Descend(sub)));
    }
    for ty in ancestors {
        if let Some(target) = reg.message(*ty)?.include(number) {
            if chain.contains(&target) {
                return Ok(Some(Action::Inline(target)));
            }
            // A sibling subtype, promoting to it fails.
            return Ok(Some(Action::Descend(target)));
        }
    }
    Ok(None)
}

pub(super) fn read_level(
    ctx: &Context<'_>,
    r: &mut ProtoReader,
    msg: &mut Message,
    level: TypeHandle,
    wrapper: Option<TypeHandle>,
) -> Result<(), Error> {
    let chain = ctx.reg.chain(level)?;
    let preserve = ctx.reg.message(level)?.preserves_unknown();
    while let Some(header) = r.read_field_header()? {
        match lookup(ctx.reg, &chain, header.number())? {
            Some(Action::Field(field)) => {
                let member =
                    Member::resolve(field, ctx.reg).map_err(|e| e.in_field(field.number()))?;
                member.decode(r, header, msg, ctx)?;
            }
            Some(Action::Descend(sub)) => ctx.descend(r, msg, sub)?,
            Some(Action::Inline(target)) => ctx.inline(r, msg, level, target)?,
            None => unknown_field(r, msg, preserve, wrapper)?,
        }
    }
    Ok(())
}

pub(super) fn check_required(reg: &Registry, msg: &Message) -> Result<(), Error> {
    for ty in reg.chain(msg.type_handle())? {
        let desc = reg.message(ty)?;
        for field in desc.fields() {
            if field.is_required() && !msg.contains(field.number()) {
                return Err(
                    Error::required_field_missing(field.number()).in_type(desc.name_arc())
                );
            }
        }
    }
    Ok(())
}
