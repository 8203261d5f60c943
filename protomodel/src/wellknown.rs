//! Built-in descriptions of `std::time::Duration` and `std::time::SystemTime`.
//!
//! The wire shape depends on the model's [`CompatibilityLevel`]:
//!
//! | level      | duration                   | time                        |
//! |------------|----------------------------|-----------------------------|
//! | `Level200` | `bcl.TimeSpan`             | `bcl.DateTime`              |
//! | `Level300` | `google.protobuf.Duration` | `google.protobuf.Timestamp` |
//!
//! The `bcl` shapes are `{ value: sint64 = 1, scale: TimeSpanScale = 2 }` and
//! count in units of `scale` (ticks are 100ns), the `google` shapes are
//! `{ seconds: int64 = 1, nanos: int32 = 2 }`. Both count from the Unix epoch.

// `Scale` discriminants are the enum's wire values.
#![allow(clippy::as_conversions)]

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::Error;
use crate::model::{
    CompatibilityLevel, EnumDef, FieldDef, FieldShape, MessageDef, ScalarType, TypeDef,
    TypeHandle, TypeModel, TypeRef, WellKnown,
};
use crate::reflect::ProtoElement;
use crate::value::{Message, Value};

const SCALE_ENUM: &str = "bcl.TimeSpan.TimeSpanScale";

const NANOS_PER_SECOND: i128 = 1_000_000_000;
const NANOS_PER_TICK: i128 = 100;

/// Units of `bcl` values, coarsest first, with their length in ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
enum Scale {
    Days = 0,
    Hours = 1,
    Minutes = 2,
    Seconds = 3,
    Milliseconds = 4,
    Ticks = 5,
    /// `value` is -1 for the minimum and 1 for the maximum representable value.
    MinMax = 15,
}

impl Scale {
    const EXACT: [(Scale, i128); 6] = [
        (Scale::Days, 864_000_000_000),
        (Scale::Hours, 36_000_000_000),
        (Scale::Minutes, 600_000_000),
        (Scale::Seconds, 10_000_000),
        (Scale::Milliseconds, 10_000),
        (Scale::Ticks, 1),
    ];

    fn from_natural(value: i32) -> Option<Scale> {
        match value {
            0 => Some(Scale::Days),
            1 => Some(Scale::Hours),
            2 => Some(Scale::Minutes),
            3 => Some(Scale::Seconds),
            4 => Some(Scale::Milliseconds),
            5 => Some(Scale::Ticks),
            15 => Some(Scale::MinMax),
            _ => None,
        }
    }

    fn ticks(self) -> Option<i128> {
        Self::EXACT
            .iter()
            .find(|(scale, _)| *scale == self)
            .map(|(_, ticks)| *ticks)
    }
}

/// Name of the built-in type for `wk` at `level`.
pub(crate) fn type_name(wk: WellKnown, level: CompatibilityLevel) -> &'static str {
    match (level, wk) {
        (CompatibilityLevel::Level200, WellKnown::Duration) => "bcl.TimeSpan",
        (CompatibilityLevel::Level200, WellKnown::Timestamp) => "bcl.DateTime",
        (CompatibilityLevel::Level300, WellKnown::Duration) => "google.protobuf.Duration",
        (CompatibilityLevel::Level300, WellKnown::Timestamp) => "google.protobuf.Timestamp",
    }
}

/// Definitions needed to register `wk` at `level`, dependencies first.
pub(crate) fn defs(wk: WellKnown, level: CompatibilityLevel) -> Vec<TypeDef> {
    let name = type_name(wk, level);
    match level {
        CompatibilityLevel::Level200 => {
            let scale = EnumDef::new(SCALE_ENUM)
                .value("DAYS", Scale::Days as i32)
                .value("HOURS", Scale::Hours as i32)
                .value("MINUTES", Scale::Minutes as i32)
                .value("SECONDS", Scale::Seconds as i32)
                .value("MILLISECONDS", Scale::Milliseconds as i32)
                .value("TICKS", Scale::Ticks as i32)
                .value("MINMAX", Scale::MinMax as i32);
            let value = FieldShape::Single(TypeRef::Scalar(ScalarType::SInt64));
            let scale_ref = FieldShape::Single(TypeRef::named(SCALE_ENUM));
            let message = MessageDef::new(name)
                .field(FieldDef::new(1, "value", value))
                .field(FieldDef::new(2, "scale", scale_ref));
            vec![scale.into(), message.into()]
        }
        CompatibilityLevel::Level300 => {
            let seconds = FieldShape::Single(TypeRef::Scalar(ScalarType::Int64));
            let nanos = FieldShape::Single(TypeRef::Scalar(ScalarType::Int32));
            let message = MessageDef::new(name)
                .field(FieldDef::new(1, "seconds", seconds))
                .field(FieldDef::new(2, "nanos", nanos));
            vec![message.into()]
        }
    }
}

#[cold]
fn out_of_range(what: &'static str) -> Error {
    Error::value_mismatch(what, "out of range value")
}

/// Encode a signed nanosecond offset as a message of type `ty`.
fn nanos_to_message(
    nanos: i128,
    ty: TypeHandle,
    level: CompatibilityLevel,
) -> Result<Message, Error> {
    let mut msg = Message::new(ty);
    match level {
        CompatibilityLevel::Level300 => {
            let seconds = nanos.div_euclid(NANOS_PER_SECOND);
            let sub = nanos.rem_euclid(NANOS_PER_SECOND);
            let seconds = i64::try_from(seconds).map_err(|_| out_of_range("int64 seconds"))?;
            let sub = i32::try_from(sub).map_err(|_| out_of_range("int32 nanos"))?;
            msg.set(1, seconds).set(2, sub);
        }
        CompatibilityLevel::Level200 => {
            let ticks = nanos.div_euclid(NANOS_PER_TICK);
            let (value, scale) = coarsest_exact(ticks);
            msg.set(1, value).set(2, Value::Enum(scale as i32));
        }
    }
    Ok(msg)
}

/// Pick the coarsest scale that represents `ticks` exactly.
fn coarsest_exact(ticks: i128) -> (i64, Scale) {
    if ticks == 0 {
        return (0, Scale::Days);
    }
    for (scale, per) in Scale::EXACT {
        if ticks % per == 0 {
            if let Ok(value) = i64::try_from(ticks / per) {
                return (value, scale);
            }
        }
    }
    (if ticks < 0 { -1 } else { 1 }, Scale::MinMax)
}

enum Decoded {
    Nanos(i128),
    Min,
    Max,
}

fn message_to_nanos(msg: &Message, level: CompatibilityLevel) -> Result<Decoded, Error> {
    let int = |number: u32| msg.get(number);
    match level {
        CompatibilityLevel::Level300 => {
            let seconds = match int(1) {
                None => 0,
                Some(Value::I64(v)) => *v,
                Some(other) => return Err(Error::value_mismatch("int64", other.kind_name())),
            };
            let nanos = match int(2) {
                None => 0,
                Some(Value::I32(v)) => *v,
                Some(other) => return Err(Error::value_mismatch("int32", other.kind_name())),
            };
            Ok(Decoded::Nanos(
                i128::from(seconds) * NANOS_PER_SECOND + i128::from(nanos),
            ))
        }
        CompatibilityLevel::Level200 => {
            let value = match int(1) {
                None => 0,
                Some(Value::I64(v)) => *v,
                Some(other) => return Err(Error::value_mismatch("int64", other.kind_name())),
            };
            let scale = match int(2) {
                None => Scale::Days,
                Some(Value::Enum(v)) => {
                    Scale::from_natural(*v).ok_or_else(|| out_of_range("time span scale"))?
                }
                Some(other) => return Err(Error::value_mismatch("enum", other.kind_name())),
            };
            match (scale, value) {
                (Scale::MinMax, 1) => Ok(Decoded::Max),
                (Scale::MinMax, -1) => Ok(Decoded::Min),
                (Scale::MinMax, _) => Err(out_of_range("time span min/max marker")),
                (scale, value) => {
                    let per = scale.ticks().ok_or_else(|| out_of_range("time span scale"))?;
                    Ok(Decoded::Nanos(i128::from(value) * per * NANOS_PER_TICK))
                }
            }
        }
    }
}

fn duration_from_nanos(nanos: i128) -> Result<Duration, Error> {
    if nanos < 0 {
        return Err(Error::value_mismatch("non-negative duration", "negative duration"));
    }
    let secs = u64::try_from(nanos / NANOS_PER_SECOND).map_err(|_| out_of_range("duration"))?;
    let sub = u32::try_from(nanos % NANOS_PER_SECOND).map_err(|_| out_of_range("duration"))?;
    Ok(Duration::new(secs, sub))
}

fn system_time_to_nanos(time: SystemTime) -> i128 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(after) => i128::try_from(after.as_nanos()).unwrap_or(i128::MAX),
        Err(before) => -i128::try_from(before.duration().as_nanos()).unwrap_or(i128::MAX),
    }
}

fn system_time_from_nanos(nanos: i128) -> Result<SystemTime, Error> {
    let magnitude = duration_from_nanos(nanos.abs())?;
    let time = if nanos >= 0 {
        UNIX_EPOCH.checked_add(magnitude)
    } else {
        UNIX_EPOCH.checked_sub(magnitude)
    };
    time.ok_or_else(|| out_of_range("system time"))
}

fn expect_message(value: Value) -> Result<Message, Error> {
    match value {
        Value::Message(msg) => Ok(*msg),
        other => Err(Error::value_mismatch("message", other.kind_name())),
    }
}

impl ProtoElement for Duration {
    fn type_ref() -> TypeRef {
        TypeRef::WellKnown(WellKnown::Duration)
    }

    fn to_value(&self, model: &TypeModel) -> Result<Value, Error> {
        let ty = model.well_known(WellKnown::Duration)?;
        let nanos = i128::try_from(self.as_nanos()).map_err(|_| out_of_range("duration"))?;
        let level = model.options().compatibility_level;
        Ok(nanos_to_message(nanos, ty, level)?.into())
    }

    fn from_value(value: Value, model: &TypeModel) -> Result<Self, Error> {
        let msg = expect_message(value)?;
        match message_to_nanos(&msg, model.options().compatibility_level)? {
            Decoded::Nanos(nanos) => duration_from_nanos(nanos),
            Decoded::Max => Ok(Duration::MAX),
            Decoded::Min => Err(Error::value_mismatch(
                "non-negative duration",
                "negative duration",
            )),
        }
    }
}

impl ProtoElement for SystemTime {
    fn type_ref() -> TypeRef {
        TypeRef::WellKnown(WellKnown::Timestamp)
    }

    fn to_value(&self, model: &TypeModel) -> Result<Value, Error> {
        let ty = model.well_known(WellKnown::Timestamp)?;
        let level = model.options().compatibility_level;
        Ok(nanos_to_message(system_time_to_nanos(*self), ty, level)?.into())
    }

    fn from_value(value: Value, model: &TypeModel) -> Result<Self, Error> {
        let msg = expect_message(value)?;
        match message_to_nanos(&msg, model.options().compatibility_level)? {
            Decoded::Nanos(nanos) => system_time_from_nanos(nanos),
            Decoded::Min | Decoded::Max => Err(out_of_range("system time")),
        }
    }
}
