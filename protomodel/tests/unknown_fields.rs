//! Unknown field preservation and map fields.

use protomodel::{
    Executor, FieldDef, FieldShape, LengthStrategy, MapKey, Message, MessageDef, ScalarType,
    TypeHandle, TypeModel, TypeRef, Value, WriteOptions,
};

fn single(number: u32, name: &str, ty: ScalarType) -> FieldDef {
    FieldDef::new(number, name, FieldShape::Single(ty.into()))
}

struct Versions {
    model: TypeModel,
    v1: TypeHandle,
    v1_strict: TypeHandle,
    v2: TypeHandle,
}

fn versions() -> Versions {
    let model = TypeModel::new();
    let handles = model
        .define([
            MessageDef::new("V1")
                .field(single(1, "name", ScalarType::String))
                .preserve_unknown()
                .into(),
            MessageDef::new("V1Strict")
                .field(single(1, "name", ScalarType::String))
                .into(),
            MessageDef::new("V2")
                .field(single(1, "name", ScalarType::String))
                .field(single(2, "age", ScalarType::Int32))
                .field(single(3, "score", ScalarType::Fixed64))
                .into(),
        ])
        .unwrap();
    Versions {
        model,
        v1: handles[0],
        v1_strict: handles[1],
        v2: handles[2],
    }
}

#[test]
fn test_unknown_fields_survive_round_trip() {
    let v = versions();
    let newer = Message::new(v.v2)
        .with(1, "Alice")
        .with(2, 30)
        .with(3, 100u64);
    let bytes = v.model.serialize_to_vec(&newer).unwrap();

    let older = v.model.deserialize(v.v1, bytes.clone()).unwrap();
    assert_eq!(older.get(1).and_then(Value::as_str), Some("Alice"));
    assert!(!older.unknown_fields().is_empty());
    assert_eq!(
        older.unknown_fields().read(2, ScalarType::Int32).unwrap(),
        Some(Value::I32(30))
    );
    assert_eq!(
        older.unknown_fields().read(3, ScalarType::Fixed64).unwrap(),
        Some(Value::U64(100))
    );

    // Unknown fields are written after the known ones, which here gives
    // back the original bytes.
    assert_eq!(v.model.serialize_to_vec(&older).unwrap(), bytes);
    assert_eq!(v.model.deserialize(v.v2, bytes).unwrap(), newer);
}

#[test]
fn test_unknown_fields_dropped_without_preservation() {
    let v = versions();
    let newer = Message::new(v.v2).with(1, "Bob").with(2, 7);
    let bytes = v.model.serialize_to_vec(&newer).unwrap();

    let older = v.model.deserialize(v.v1_strict, bytes).unwrap();
    assert!(older.unknown_fields().is_empty());
    assert_eq!(
        v.model.serialize_to_vec(&older).unwrap(),
        [0x0A, 0x03, b'B', b'o', b'b']
    );
}

#[test]
fn test_unknown_fields_merge_by_appending() {
    let v = versions();
    let mut msg = v.model.deserialize(v.v1, vec![0x10, 0x01]).unwrap();
    v.model.deserialize_into(&mut msg, vec![0x10, 0x02]).unwrap();
    assert_eq!(msg.unknown_fields().as_bytes(), [0x10, 0x01, 0x10, 0x02]);
    assert_eq!(
        msg.unknown_fields().read(2, ScalarType::Int32).unwrap(),
        Some(Value::I32(2))
    );
}

/// `Shape { name = 1 }` including `Circle { radius = 2 }` under 10. The
/// newer schema adds `color = 4` to `Circle`.
fn shapes(with_color: bool) -> (TypeModel, TypeHandle, TypeHandle) {
    let model = TypeModel::new();
    let mut circle = MessageDef::new("Circle")
        .extends_ref(TypeRef::named("Shape"))
        .field(single(2, "radius", ScalarType::Double))
        .preserve_unknown();
    if with_color {
        circle = circle.field(single(4, "color", ScalarType::Int32));
    }
    let handles = model
        .define([
            MessageDef::new("Shape")
                .field(single(1, "name", ScalarType::String))
                .include_ref(10, TypeRef::named("Circle"))
                .into(),
            circle.into(),
        ])
        .unwrap();
    (model, handles[0], handles[1])
}

#[test]
fn test_unknown_fields_stay_inside_their_include() {
    let (newer, _, newer_circle) = shapes(true);
    let (older, older_shape, older_circle) = shapes(false);

    let circle = Message::new(newer_circle)
        .with(1, "c")
        .with(2, 1.5f64)
        .with(4, 7);
    let bytes = newer.serialize_to_vec(&circle).unwrap();
    #[rustfmt::skip]
    let expected = [
        0x52, 0x0B,
        0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF8, 0x3F,
        0x20, 0x07,
        0x0A, 0x01, b'c',
    ];
    assert_eq!(bytes, expected);

    let read = older.deserialize(older_shape, bytes.clone()).unwrap();
    assert_eq!(read.type_handle(), older_circle);
    assert!(read.unknown_fields().is_empty());
    let kept = read.unknown_fields_at(older_circle).unwrap();
    assert_eq!(kept.read(4, ScalarType::Int32).unwrap(), Some(Value::I32(7)));

    for executor in [Executor::Interpreter, Executor::Specialized] {
        let options = WriteOptions::new().executor(executor);
        let mut written = Vec::new();
        older.serialize_with(&read, &mut written, &options).unwrap();
        assert_eq!(written, bytes);
        assert_eq!(older.encoded_len(&read).unwrap(), bytes.len());
    }

    let back = newer.deserialize(newer_circle, bytes).unwrap();
    assert_eq!(back.get(4).and_then(Value::as_i32), Some(7));
    assert_eq!(back, circle);
}

#[test]
fn test_flat_form_writes_level_unknown_fields_at_the_top() {
    let (newer, _, newer_circle) = shapes(true);
    let (older, older_shape, older_circle) = shapes(false);

    let circle = Message::new(newer_circle).with(2, 1.5f64).with(4, 7);
    let read = older
        .deserialize(older_shape, newer.serialize_to_vec(&circle).unwrap())
        .unwrap();
    let mut flat = Vec::new();
    older.serialize_as(&read, older_circle, &mut flat).unwrap();
    #[rustfmt::skip]
    let expected = [
        0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF8, 0x3F,
        0x20, 0x07,
    ];
    assert_eq!(flat, expected);
    assert_eq!(newer.deserialize(newer_circle, flat).unwrap(), circle);
}

/// `Inventory { counts: map<string, int32> = 1, items: map<uint32, Item> = 2 }`
fn inventory() -> (TypeModel, TypeHandle, TypeHandle) {
    let model = TypeModel::new();
    let handles = model
        .define([
            MessageDef::new("Inventory")
                .field(FieldDef::new(
                    1,
                    "counts",
                    FieldShape::Map(ScalarType::String.into(), ScalarType::Int32.into()),
                ))
                .field(FieldDef::new(
                    2,
                    "items",
                    FieldShape::Map(ScalarType::UInt32.into(), TypeRef::named("Item")),
                ))
                .into(),
            MessageDef::new("Item")
                .field(single(1, "name", ScalarType::String))
                .field(single(2, "qty", ScalarType::Int32))
                .into(),
        ])
        .unwrap();
    (model, handles[0], handles[1])
}

#[test]
fn test_map_entries_write_key_and_value() {
    let (model, inventory, _) = inventory();
    let counts = [(MapKey::from(""), Value::I32(0)), (MapKey::from("a"), Value::I32(5))]
        .into_iter()
        .collect::<std::collections::BTreeMap<_, _>>();
    let msg = Message::new(inventory).with(1, counts);
    let bytes = model.serialize_to_vec(&msg).unwrap();
    #[rustfmt::skip]
    let expected = [
        0x0A, 0x04, 0x0A, 0x00, 0x10, 0x00,
        0x0A, 0x05, 0x0A, 0x01, b'a', 0x10, 0x05,
    ];
    assert_eq!(bytes, expected);
    assert_eq!(model.deserialize(inventory, bytes).unwrap(), msg);
}

#[test]
fn test_map_entry_edge_cases() {
    let (model, inventory, item) = inventory();
    #[rustfmt::skip]
    let data = vec![
        // { "a": 1 }
        0x0A, 0x05, 0x0A, 0x01, b'a', 0x10, 0x01,
        // { "a": 2 }, last one wins
        0x0A, 0x05, 0x0A, 0x01, b'a', 0x10, 0x02,
        // value only, the key reads as ""
        0x0A, 0x02, 0x10, 0x03,
        // key only, with an unknown entry field, the value reads as 0
        0x0A, 0x05, 0x0A, 0x01, b'b', 0x18, 0x09,
        // items { 7: { name: "x" } } and { 7: { qty: 4 } } in one entry
        0x12, 0x0B, 0x08, 0x07, 0x12, 0x03, 0x0A, 0x01, b'x', 0x12, 0x02, 0x10, 0x04,
    ];
    let msg = model.deserialize(inventory, data).unwrap();

    let counts = msg.get(1).and_then(Value::as_map).unwrap();
    assert_eq!(counts[&MapKey::from("a")], Value::I32(2));
    assert_eq!(counts[&MapKey::from("")], Value::I32(3));
    assert_eq!(counts[&MapKey::from("b")], Value::I32(0));

    let items = msg.get(2).and_then(Value::as_map).unwrap();
    let expected = Message::new(item).with(1, "x").with(2, 4);
    assert_eq!(items[&MapKey::U32(7)], Value::from(expected));
}

#[test]
fn test_map_entries_are_measured_under_either_strategy() {
    let (model, inventory, item) = inventory();
    let items = [(MapKey::U32(7), Value::from(Message::new(item).with(1, "x").with(2, 4)))]
        .into_iter()
        .collect::<std::collections::BTreeMap<_, _>>();
    let msg = Message::new(inventory).with(2, items);
    #[rustfmt::skip]
    let expected = [
        0x12, 0x09, 0x08, 0x07,
        0x12, 0x05, 0x0A, 0x01, b'x', 0x10, 0x04,
    ];

    for strategy in [LengthStrategy::Measure, LengthStrategy::Buffer] {
        let options = WriteOptions::new().length_strategy(strategy);
        let mut bytes = Vec::new();
        model.serialize_with(&msg, &mut bytes, &options).unwrap();
        assert_eq!(bytes, expected);
    }
}
