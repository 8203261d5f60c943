//! Depth limits, required fields and framing.

use protomodel::{
    ErrorKind, FieldDef, FieldShape, LengthStrategy, Message, MessageDef, ModelOptions,
    ReadOptions, ScalarType, TypeHandle, TypeModel, TypeRef, WriteOptions,
};

/// `Node { value: int32 = 1, next: Node = 2 }`
fn node_model(options: ModelOptions) -> (TypeModel, TypeHandle) {
    let model = TypeModel::with_options(options);
    let node = MessageDef::new("Node")
        .field(FieldDef::new(
            1,
            "value",
            FieldShape::Single(ScalarType::Int32.into()),
        ))
        .field(FieldDef::new(
            2,
            "next",
            FieldShape::Single(TypeRef::named("Node")),
        ));
    let handle = model.define([node.into()]).unwrap()[0];
    (model, handle)
}

/// A list with `nested` messages below the top one.
fn chain(node: TypeHandle, nested: usize) -> Message {
    let mut msg = Message::new(node);
    for value in 1..=nested {
        msg = Message::new(node)
            .with(1, i32::try_from(value).unwrap())
            .with(2, msg);
    }
    msg
}

#[test]
fn test_write_depth_limit() {
    let mut options = ModelOptions::new();
    options.max_depth(3);
    let (model, node) = node_model(options);

    assert!(model.serialize_to_vec(&chain(node, 3)).is_ok());
    let err = model.serialize_to_vec(&chain(node, 4)).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::DepthLimitExceeded { limit: 3 });

    // A per call limit overrides the model's.
    let mut buf = Vec::new();
    let options = WriteOptions::new().max_depth(2);
    let err = model
        .serialize_with(&chain(node, 3), &mut buf, &options)
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::DepthLimitExceeded { limit: 2 });
}

#[test]
fn test_read_depth_limit() {
    let (model, node) = node_model(ModelOptions::new());
    let bytes = model.serialize_to_vec(&chain(node, 5)).unwrap();

    let read = model
        .deserialize_with(node, bytes.clone(), &ReadOptions::new().max_depth(5))
        .unwrap();
    assert_eq!(read, chain(node, 5));

    let err = model
        .deserialize_with(node, bytes, &ReadOptions::new().max_depth(4))
        .unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::DepthLimitExceeded { limit: 4 });
}

#[test]
fn test_length_strategies_agree() {
    let (model, node) = node_model(ModelOptions::new());
    let msg = chain(node, 4);

    let mut measured = Vec::new();
    let options = WriteOptions::new().length_strategy(LengthStrategy::Measure);
    model.serialize_with(&msg, &mut measured, &options).unwrap();

    let mut buffered = Vec::new();
    let options = WriteOptions::new().length_strategy(LengthStrategy::Buffer);
    model.serialize_with(&msg, &mut buffered, &options).unwrap();

    assert_eq!(measured, buffered);
    assert_eq!(model.encoded_len(&msg).unwrap(), measured.len());
}

#[test]
fn test_required_fields() {
    let model = TypeModel::new();
    let ty = model
        .define([MessageDef::new("Ticket")
            .field(
                FieldDef::new(1, "id", FieldShape::Single(ScalarType::UInt64.into())).required(),
            )
            .into()])
        .unwrap()[0];

    // Required fields are written even when they hold the default.
    let msg = Message::new(ty).with(1, 0u64);
    assert_eq!(model.serialize_to_vec(&msg).unwrap(), [0x08, 0x00]);

    let err = model.serialize_to_vec(&Message::new(ty)).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::RequiredFieldMissing);
    assert_eq!(err.context().field, Some(1));

    let err = model.deserialize(ty, Vec::new()).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::RequiredFieldMissing);
    assert_eq!(err.context().type_name.as_deref(), Some("Ticket"));
}

#[test]
fn test_handles_do_not_cross_models() {
    let (model, node) = node_model(ModelOptions::new());
    let (other, _) = node_model(ModelOptions::new());

    let msg = Message::new(node);
    assert!(model.serialize_to_vec(&msg).is_ok());
    let err = other.serialize_to_vec(&msg).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UnknownType);
}
