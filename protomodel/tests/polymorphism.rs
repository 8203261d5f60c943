//! Inheritance through includes: rooted and flat layouts, promotion while
//! reading, and type changes.

use protomodel::{
    ErrorKind, Executor, FieldDef, FieldShape, Message, MessageDef, ReadOptions, ScalarType,
    TypeHandle, TypeModel, TypeRef, Value,
};

struct Shapes {
    model: TypeModel,
    shape: TypeHandle,
    circle: TypeHandle,
    square: TypeHandle,
    drawing: TypeHandle,
}

/// `Shape { name = 1 }` includes `Circle { radius = 2 }` under 10 and
/// `Square { side = 3 }` under 11. `Drawing { shape: Shape = 1 }`.
fn shapes() -> Shapes {
    let model = TypeModel::new();
    let single = |n, name, ty: ScalarType| FieldDef::new(n, name, FieldShape::Single(ty.into()));
    let handles = model
        .define([
            MessageDef::new("Shape")
                .field(single(1, "name", ScalarType::String))
                .include_ref(10, TypeRef::named("Circle"))
                .include_ref(11, TypeRef::named("Square"))
                .into(),
            MessageDef::new("Circle")
                .extends_ref(TypeRef::named("Shape"))
                .field(single(2, "radius", ScalarType::Double))
                .into(),
            MessageDef::new("Square")
                .extends_ref(TypeRef::named("Shape"))
                .field(single(3, "side", ScalarType::Double))
                .into(),
            MessageDef::new("Drawing")
                .field(FieldDef::new(
                    1,
                    "shape",
                    FieldShape::Single(TypeRef::named("Shape")),
                ))
                .into(),
        ])
        .unwrap();
    Shapes {
        model,
        shape: handles[0],
        circle: handles[1],
        square: handles[2],
        drawing: handles[3],
    }
}

#[test]
fn test_rooted_layout() {
    let s = shapes();
    let circle = Message::new(s.circle).with(1, "c").with(2, 1.5f64);
    let bytes = s.model.serialize_to_vec(&circle).unwrap();
    #[rustfmt::skip]
    let expected = [
        // include wrapper, tag 10
        0x52, 0x09,
        0x11, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF8, 0x3F,
        // base fields
        0x0A, 0x01, b'c',
    ];
    assert_eq!(bytes, expected);

    // Reading as the base promotes the instance.
    let read = s.model.deserialize(s.shape, bytes).unwrap();
    assert_eq!(read.type_handle(), s.circle);
    assert_eq!(read, circle);
}

#[test]
fn test_flat_layout() {
    let s = shapes();
    let circle = Message::new(s.circle).with(1, "c").with(2, 1.5f64);
    let mut flat = Vec::new();
    s.model.serialize_as(&circle, s.circle, &mut flat).unwrap();
    assert_eq!(&flat[..5], [0x0A, 0x01, b'c', 0x11, 0x00]);

    let read = s.model.deserialize(s.circle, flat.clone()).unwrap();
    assert_eq!(read, circle);

    // A reader of the base does not know field 2.
    let read = s.model.deserialize(s.shape, flat).unwrap();
    assert_eq!(read.type_handle(), s.shape);
    assert_eq!(read.get(1).and_then(Value::as_str), Some("c"));
    assert!(!read.contains(2));

    let err = s
        .model
        .serialize_as(&circle, s.square, &mut Vec::new())
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::UnsupportedType { .. }));
}

#[test]
fn test_subtype_in_nested_field() {
    let s = shapes();
    let square = Message::new(s.square).with(1, "sq").with(3, 2.0f64);
    let drawing = Message::new(s.drawing).with(1, square.clone());

    let bytes = s.model.serialize_to_vec(&drawing).unwrap();
    let read = s.model.deserialize(s.drawing, bytes).unwrap();
    let shape = read.get(1).and_then(Value::as_message).unwrap();
    assert_eq!(shape.type_handle(), s.square);
    assert_eq!(shape, &square);
}

#[test]
fn test_sibling_payload_is_rejected() {
    let s = shapes();
    let square = Message::new(s.square).with(3, 2.0f64);
    let bytes = s
        .model
        .serialize_to_vec(&Message::new(s.drawing).with(1, square))
        .unwrap();

    let circle = Message::new(s.circle).with(2, 1.0f64);
    let mut existing = Message::new(s.drawing).with(1, circle);
    let err = s.model.deserialize_into(&mut existing, bytes).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::UnsupportedType { .. }));
}

#[test]
fn test_sibling_payload_at_top_level_is_rejected() {
    let s = shapes();
    let square = Message::new(s.square).with(1, "sq").with(3, 2.0f64);
    let bytes = s.model.serialize_to_vec(&square).unwrap();

    let mut circle = Message::new(s.circle).with(2, 1.0f64);
    let err = s
        .model
        .deserialize_into(&mut circle, bytes.clone())
        .unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::UnsupportedType { .. }));

    for executor in [Executor::Interpreter, Executor::Specialized] {
        let options = ReadOptions::new().executor(executor);
        let err = s
            .model
            .deserialize_with(s.circle, bytes.clone(), &options)
            .unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::UnsupportedType { .. }));
    }

    // Rooted bytes of the instance's own type still merge.
    let mut circle = Message::new(s.circle).with(2, 1.0f64);
    let other = Message::new(s.circle).with(1, "c");
    let bytes = s.model.serialize_to_vec(&other).unwrap();
    s.model.deserialize_into(&mut circle, bytes).unwrap();
    assert_eq!(circle, Message::new(s.circle).with(1, "c").with(2, 1.0f64));
}

#[test]
fn test_unrelated_nested_value_is_rejected() {
    let s = shapes();
    let drawing = Message::new(s.drawing).with(1, Message::new(s.drawing));
    let err = s.model.serialize_to_vec(&drawing).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::ValueMismatch { .. }));
    assert_eq!(err.context().field, Some(1));
}

#[test]
fn test_change_type() {
    let s = shapes();
    let shape = Message::new(s.shape).with(1, "plain");
    let circle = s.model.change_type(&shape, s.circle).unwrap();
    assert_eq!(circle.type_handle(), s.circle);
    assert_eq!(circle.get(1).and_then(Value::as_str), Some("plain"));

    let circle = circle.with(2, 3.0f64);
    let back = s.model.change_type(&circle, s.shape).unwrap();
    assert_eq!(back.type_handle(), s.shape);
    assert_eq!(back.get(1).and_then(Value::as_str), Some("plain"));
    assert!(!back.contains(2));
}

#[test]
fn test_include_tag_collision() {
    let model = TypeModel::new();
    let err = model
        .define([
            MessageDef::new("Base")
                .field(FieldDef::new(
                    1,
                    "id",
                    FieldShape::Single(ScalarType::Int32.into()),
                ))
                .include_ref(1, TypeRef::named("Derived"))
                .into(),
            MessageDef::new("Derived")
                .extends_ref(TypeRef::named("Base"))
                .into(),
        ])
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::DuplicateFieldNumber { number: 1 });
}
