//! The interpreter and compiled plans must be interchangeable.

use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest::property_test;
use protomodel::{
    EnumDef, Encoding, ExecutionMode, Executor, FieldDef, FieldShape, MapKey, Message,
    MessageDef, ReadOptions, ScalarType, TypeHandle, TypeModel, TypeRef, Value, WriteOptions,
};

struct Records {
    model: TypeModel,
    record: TypeHandle,
    special: TypeHandle,
}

fn records() -> Records {
    let model = TypeModel::new();
    let single = |n, name, ty: ScalarType| FieldDef::new(n, name, FieldShape::Single(ty.into()));
    let record = MessageDef::new("Record")
        .field(single(1, "id", ScalarType::Int32))
        .field(single(2, "delta", ScalarType::Int64).encoding(Encoding::ZigZag))
        .field(single(3, "crc", ScalarType::UInt32).encoding(Encoding::Fixed))
        .field(single(4, "name", ScalarType::String))
        .field(single(5, "blob", ScalarType::Bytes))
        .field(
            FieldDef::new(6, "small", FieldShape::Repeated(ScalarType::Int32.into()))
                .encoding(Encoding::ZigZag),
        )
        .field(FieldDef::new(
            7,
            "words",
            FieldShape::Repeated(ScalarType::String.into()),
        ))
        .field(FieldDef::new(
            8,
            "counts",
            FieldShape::Map(ScalarType::String.into(), ScalarType::Int64.into()),
        ))
        .field(FieldDef::new(
            9,
            "child",
            FieldShape::Single(TypeRef::named("Record")),
        ))
        .field(FieldDef::new(
            10,
            "color",
            FieldShape::Single(TypeRef::named("Color")),
        ))
        .field(single(11, "ratio", ScalarType::Double))
        .field(single(12, "flag", ScalarType::Bool))
        .include_ref(20, TypeRef::named("Special"));
    let special = MessageDef::new("Special")
        .extends_ref(TypeRef::named("Record"))
        .field(single(21, "serial", ScalarType::UInt64));
    let color = EnumDef::new("Color").value("RED", 0).variant("GREEN", 1, 5);

    let handles = model
        .define([record.into(), special.into(), color.into()])
        .unwrap();
    Records {
        model,
        record: handles[0],
        special: handles[1],
    }
}

type Scalars = (i32, i64, u32, bool, i32);
type Text = (String, Vec<u8>, Vec<String>);
type Lists = (Vec<i32>, Vec<(String, i64)>);
type Extra = (Option<(i32, String)>, Option<u64>, bool);

fn build(r: &Records, scalars: Scalars, text: Text, lists: Lists, extra: Extra) -> Message {
    let (id, delta, crc, green, ratio) = scalars;
    let (name, blob, words) = text;
    let (small, counts) = lists;
    let (child, serial, flag) = extra;

    let ty = if serial.is_some() { r.special } else { r.record };
    let mut msg = Message::new(ty);
    msg.set(1, id)
        .set(2, delta)
        .set(3, crc)
        .set(4, name)
        .set(5, blob)
        .set(6, Value::List(small.into_iter().map(Value::from).collect()))
        .set(7, Value::List(words.into_iter().map(Value::from).collect()))
        .set(10, Value::Enum(i32::from(green)))
        .set(11, f64::from(ratio))
        .set(12, flag);
    let counts: BTreeMap<MapKey, Value> = counts
        .into_iter()
        .map(|(k, v)| (MapKey::from(k), Value::from(v)))
        .collect();
    msg.set(8, counts);
    if let Some((child_id, child_name)) = child {
        msg.set(
            9,
            Message::new(r.record).with(1, child_id).with(4, child_name),
        );
    }
    if let Some(serial) = serial {
        msg.set(21, serial);
    }
    msg
}

fn write(r: &Records, msg: &Message, executor: Executor) -> Vec<u8> {
    let mut buf = Vec::new();
    let options = WriteOptions::new().executor(executor);
    r.model.serialize_with(msg, &mut buf, &options).unwrap();
    buf
}

fn read(r: &Records, data: &[u8], executor: Executor) -> Message {
    let options = ReadOptions::new().executor(executor);
    r.model
        .deserialize_with(r.record, data.to_vec(), &options)
        .unwrap()
}

#[property_test]
fn proptest_executors_agree(scalars: Scalars, text: Text, lists: Lists, extra: Extra) {
    let r = records();
    let msg = build(&r, scalars, text, lists, extra);

    let interpreted = write(&r, &msg, Executor::Interpreter);
    let specialized = write(&r, &msg, Executor::Specialized);
    prop_assert_eq!(&interpreted, &specialized);
    prop_assert_eq!(r.model.encoded_len(&msg).unwrap(), interpreted.len());

    let by_interpreter = read(&r, &interpreted, Executor::Interpreter);
    let by_plan = read(&r, &interpreted, Executor::Specialized);
    prop_assert_eq!(&by_interpreter, &by_plan);
    prop_assert_eq!(by_plan.type_handle(), msg.type_handle());

    // What was read writes back to the same bytes.
    prop_assert_eq!(write(&r, &by_plan, Executor::Auto), interpreted);
}

#[test]
fn test_specialize_all() {
    let r = records();
    // Two message types, the enum is not counted.
    assert_eq!(r.model.specialize_all().unwrap(), 2);
    assert_eq!(
        r.model.execution_mode(r.special).unwrap(),
        ExecutionMode::Specialized
    );

    let msg = Message::new(r.special).with(1, 3).with(21, 9u64);
    let bytes = r.model.serialize_to_vec(&msg).unwrap();
    assert_eq!(bytes, [0xA2, 0x01, 0x03, 0xA8, 0x01, 0x09, 0x08, 0x03]);
    assert_eq!(read(&r, &bytes, Executor::Auto), msg);
}

#[test]
fn test_unmapped_enum_values_pass_through() {
    let r = records();
    // color = 5 is GREEN, 7 has no variant.
    let read_green = read(&r, &[0x50, 0x05], Executor::Specialized);
    assert_eq!(read_green.get(10), Some(&Value::Enum(1)));
    let read_other = read(&r, &[0x50, 0x07], Executor::Interpreter);
    assert_eq!(read_other.get(10), Some(&Value::Enum(7)));
    assert_eq!(write(&r, &read_other, Executor::Specialized), [0x50, 0x07]);
}
