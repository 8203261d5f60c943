//! Execution plans: per-type programs compiled once from the descriptors.
//!
//! A plan flattens a type's ancestor chain into one member table, with keys
//! pre-encoded and enum descriptors resolved, and indexes every field number
//! that means something at this type's level into a decode table. Child
//! message types are looked up by handle when reached, so plans of types
//! that reference each other do not need to be built together.

use std::ops::Range;
use std::sync::{Arc, OnceLock};

use bytes::BufMut;

use super::{
    level_unknown, top_unknown_len, unknown_field, write_top_unknown, Action, Context, Form,
};
use crate::codec::{check_depth, scalar, Member};
use crate::error::Error;
use crate::model::registry::{Chain, Registry};
use crate::model::TypeHandle;
use crate::reader::ProtoReader;
use crate::util::CastFrom;
use crate::value::Message;
use crate::wire::encoded_key_len;
use crate::writer::{LengthStrategy, ProtoWriter};

/// A lazily built plan, or the reason it could not be built.
pub(crate) type PlanSlot = OnceLock<Result<Arc<ExecutionPlan>, Arc<str>>>;

/// Field numbers up to this bound are decoded through a direct table.
const DIRECT_TABLE_LIMIT: u32 = 256;

#[derive(Debug)]
enum DecodeTable {
    /// Indexed by field number.
    Direct(Vec<Option<Action<usize>>>),
    /// Sorted by field number.
    Sparse(Vec<(u32, Action<usize>)>),
}

impl DecodeTable {
    fn new(mut entries: Vec<(u32, Action<usize>)>) -> Self {
        let max = entries.iter().map(|(number, _)| *number).max().unwrap_or(0);
        if max <= DIRECT_TABLE_LIMIT {
            let mut table = vec![None; usize::cast_from(max) + 1];
            for (number, action) in entries {
                table[usize::cast_from(number)] = Some(action);
            }
            DecodeTable::Direct(table)
        } else {
            entries.sort_unstable_by_key(|(number, _)| *number);
            DecodeTable::Sparse(entries)
        }
    }

    #[inline]
    fn get(&self, number: u32) -> Option<Action<usize>> {
        match self {
            DecodeTable::Direct(table) => table.get(usize::cast_from(number)).copied().flatten(),
            DecodeTable::Sparse(entries) => entries
                .binary_search_by_key(&number, |(n, _)| *n)
                .ok()
                .map(|idx| entries[idx].1),
        }
    }
}

#[derive(Debug)]
struct LevelPlan {
    /// Tag of the wrapper holding the next level, if there is one.
    include: Option<u32>,
    members: Range<usize>,
}

/// Compiled form of one message type.
#[derive(Debug)]
pub(crate) struct ExecutionPlan {
    name: Arc<str>,
    /// The type and its ancestors, root first.
    chain: Chain,
    levels: Vec<LevelPlan>,
    /// Members of every level, root level first.
    members: Vec<Member>,
    /// Indices into `members`, in field number order.
    flat: Vec<usize>,
    required: Vec<u32>,
    table: DecodeTable,
    preserve_unknown: bool,
    length_strategy: Option<LengthStrategy>,
}

/// Build the plan of `ty`, logging the outcome.
pub(crate) fn compile(reg: &Registry, ty: TypeHandle) -> Result<Arc<ExecutionPlan>, Arc<str>> {
    match ExecutionPlan::build(reg, ty) {
        Ok(plan) => {
            tracing::debug!(
                ty = %plan.name,
                members = plan.members.len(),
                levels = plan.levels.len(),
                "specialized type"
            );
            Ok(Arc::new(plan))
        }
        Err(err) => {
            tracing::warn!(%ty, error = %err, "specialization failed, using the interpreter");
            Err(Arc::from(err.to_string()))
        }
    }
}

impl ExecutionPlan {
    fn build(reg: &Registry, ty: TypeHandle) -> Result<Self, Error> {
        let desc = reg.message(ty)?;
        let chain = reg.chain(ty)?;
        let mut levels = Vec::with_capacity(chain.len());
        let mut members = Vec::new();
        let mut required = Vec::new();
        let mut entries = Vec::new();

        for (i, level) in chain.iter().enumerate() {
            let level_desc = reg.message(*level)?;
            let start = members.len();
            for field in level_desc.fields() {
                let member = Member::resolve(field, reg)
                    .map_err(|e| e.in_field(field.number()).in_type(level_desc.name_arc()))?;
                if member.is_required() {
                    required.push(member.number());
                }
                entries.push((member.number(), Action::Field(members.len())));
                members.push(member);
            }

            let include = match chain.get(i + 1) {
                Some(next) => Some(level_desc.include_tag(*next).ok_or_else(|| {
                    Error::programming_error("subtype is missing from its base's includes")
                })?),
                None => None,
            };
            for inc in level_desc.includes() {
                let action = if *level != ty && chain.contains(&inc.ty) {
                    Action::Inline(inc.ty)
                } else {
                    // Own includes promote, an ancestor's include of a
                    // sibling subtype fails to.
                    Action::Descend(inc.ty)
                };
                entries.push((inc.number, action));
            }
            levels.push(LevelPlan {
                include,
                members: start..members.len(),
            });
        }

        let mut flat: Vec<usize> = (0..members.len()).collect();
        flat.sort_unstable_by_key(|idx| members[*idx].number());

        Ok(ExecutionPlan {
            name: Arc::clone(desc.name_arc()),
            chain,
            levels,
            members,
            flat,
            required,
            table: DecodeTable::new(entries),
            preserve_unknown: desc.preserves_unknown(),
            length_strategy: desc.length_strategy(),
        })
    }

    fn include_tag(&self, i: usize) -> Result<u32, Error> {
        self.levels[i]
            .include
            .ok_or_else(|| Error::programming_error("level has no include wrapper"))
    }

    fn members_len(
        &self,
        ctx: &Context<'_>,
        msg: &Message,
        range: Range<usize>,
        depth: usize,
    ) -> Result<usize, Error> {
        let mut len = 0;
        for member in &self.members[range] {
            len += member.encoded_len(msg.get(member.number()), ctx, depth)?;
        }
        Ok(len)
    }

    fn level_len(
        &self,
        ctx: &Context<'_>,
        msg: &Message,
        i: usize,
        depth: usize,
    ) -> Result<usize, Error> {
        check_depth(depth, ctx.max_depth)?;
        let mut len = self.members_len(ctx, msg, self.levels[i].members.clone(), depth)?
            + level_unknown(msg, self.chain[i]).len();
        if i + 1 < self.levels.len() {
            len += self.wrapper_len(ctx, msg, i, depth)?;
        }
        Ok(len)
    }

    fn wrapper_len(
        &self,
        ctx: &Context<'_>,
        msg: &Message,
        i: usize,
        depth: usize,
    ) -> Result<usize, Error> {
        let tag = self.include_tag(i)?;
        let inner = self.level_len(ctx, msg, i + 1, depth + 1)?;
        Ok(encoded_key_len(tag) + scalar::len_delimited_len(inner))
    }

    pub(crate) fn message_len(
        &self,
        ctx: &Context<'_>,
        msg: &Message,
        form: Form,
        depth: usize,
    ) -> Result<usize, Error> {
        let top = form.top(&self.chain)?;
        let mut len = top_unknown_len(msg, &self.chain, top);
        if top + 1 < self.levels.len() {
            len += self.wrapper_len(ctx, msg, top, depth)?;
        }
        // Levels are stored root first, so the top levels form a prefix.
        len += self.members_len(ctx, msg, 0..self.levels[top].members.end, depth)?;
        Ok(len)
    }

    fn write_level<B: BufMut>(
        &self,
        ctx: &Context<'_>,
        w: &mut ProtoWriter<B>,
        msg: &Message,
        i: usize,
    ) -> Result<(), Error> {
        if i + 1 < self.levels.len() {
            self.write_wrapper(ctx, w, msg, i)?;
        }
        for member in &self.members[self.levels[i].members.clone()] {
            member.encode(msg.get(member.number()), w, ctx)?;
        }
        w.write_raw(level_unknown(msg, self.chain[i]));
        Ok(())
    }

    fn write_wrapper<B: BufMut>(
        &self,
        ctx: &Context<'_>,
        w: &mut ProtoWriter<B>,
        msg: &Message,
        i: usize,
    ) -> Result<(), Error> {
        let tag = self.include_tag(i)?;
        match self.length_strategy.unwrap_or(ctx.strategy) {
            LengthStrategy::Measure => {
                let len = self.level_len(ctx, msg, i + 1, w.depth() + 1)?;
                let token = w.begin_measured(tag, len)?;
                self.write_level(ctx, w, msg, i + 1)?;
                w.end_measured(token)
            }
            LengthStrategy::Buffer => {
                let mut child = w.begin_buffered()?;
                self.write_level(ctx, &mut child, msg, i + 1)?;
                w.end_buffered(tag, child)
            }
        }
    }

    pub(crate) fn write<B: BufMut>(
        &self,
        ctx: &Context<'_>,
        w: &mut ProtoWriter<B>,
        msg: &Message,
        form: Form,
    ) -> Result<(), Error> {
        let top = form.top(&self.chain)?;
        if top + 1 < self.levels.len() {
            self.write_wrapper(ctx, w, msg, top)?;
        }
        if top + 1 == self.levels.len() {
            for idx in &self.flat {
                let member = &self.members[*idx];
                member.encode(msg.get(member.number()), w, ctx)?;
            }
        } else {
            let mut order: Vec<&Member> = self.members[..self.levels[top].members.end]
                .iter()
                .collect();
            if top > 0 {
                order.sort_unstable_by_key(|m| m.number());
            }
            for member in order {
                member.encode(msg.get(member.number()), w, ctx)?;
            }
        }
        write_top_unknown(w, msg, &self.chain, top);
        Ok(())
    }

    /// Read the remaining fields of the current message at this plan's level.
    pub(crate) fn read_level(
        &self,
        ctx: &Context<'_>,
        r: &mut ProtoReader,
        msg: &mut Message,
        wrapper: Option<TypeHandle>,
    ) -> Result<(), Error> {
        let level = self.chain[self.chain.len() - 1];
        while let Some(header) = r.read_field_header()? {
            match self.table.get(header.number()) {
                Some(Action::Field(idx)) => self.members[idx].decode(r, header, msg, ctx)?,
                Some(Action::Descend(sub)) => ctx.descend(r, msg, sub)?,
                Some(Action::Inline(target)) => ctx.inline(r, msg, level, target)?,
                None => unknown_field(r, msg, self.preserve_unknown, wrapper)?,
            }
        }
        Ok(())
    }

    pub(crate) fn check_required(&self, msg: &Message) -> Result<(), Error> {
        match self.required.iter().find(|number| !msg.contains(**number)) {
            Some(number) => Err(Error::required_field_missing(*number).in_type(&self.name)),
            None => Ok(()),
        }
    }
}
