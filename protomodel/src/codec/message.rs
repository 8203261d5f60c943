//! Embedded message fields.

use bytes::BufMut;

use super::{scalar, Nested};
use crate::error::Error;
use crate::model::TypeHandle;
use crate::reader::ProtoReader;
use crate::value::Message;
use crate::writer::{LengthStrategy, ProtoWriter};

/// Length of a nested message payload plus its length prefix. `depth` is the
/// depth of the enclosing message.
pub(crate) fn framed_len<N: Nested>(
    msg: &Message,
    declared: TypeHandle,
    n: &N,
    depth: usize,
) -> Result<usize, Error> {
    let len = n.message_len(msg, declared, depth + 1)?;
    Ok(scalar::len_delimited_len(len))
}

/// Write `msg` as field `number`, framed according to its runtime type.
pub(crate) fn write_framed<B: BufMut, N: Nested>(
    number: u32,
    msg: &Message,
    declared: TypeHandle,
    w: &mut ProtoWriter<B>,
    n: &N,
) -> Result<(), Error> {
    match n.length_strategy(msg.type_handle())? {
        LengthStrategy::Measure => {
            let len = n.message_len(msg, declared, w.depth() + 1)?;
            let token = w.begin_measured(number, len)?;
            n.write_message(w, msg, declared)?;
            w.end_measured(token)
        }
        LengthStrategy::Buffer => {
            let mut child = w.begin_buffered()?;
            n.write_message(&mut child, msg, declared)?;
            w.end_buffered(number, child)
        }
    }
}

/// Merge the sub-message the reader is positioned at into `msg`.
pub(crate) fn read_into<N: Nested>(
    r: &mut ProtoReader,
    msg: &mut Message,
    declared: TypeHandle,
    n: &N,
) -> Result<(), Error> {
    let token = r.enter_sub_message()?;
    n.read_message(r, msg, declared)?;
    r.leave_sub_message(token)
}
