//! Byte level behaviour of the engine and interop with prost.

use bytes::Bytes;
use prost::Message as _;
use protomodel::{
    ErrorKind, FieldDef, FieldShape, Message, MessageDef, ScalarType, TypeHandle, TypeModel,
    TypeRef, Value,
};

fn single(number: u32, name: &str, ty: ScalarType) -> FieldDef {
    FieldDef::new(number, name, FieldShape::Single(ty.into()))
}

/// `Person { id: int32 = 1, name: string = 2, tags: repeated int32 = 3,
/// nickname: optional string = 4, friend: Person = 5 }`
fn person_model() -> (TypeModel, TypeHandle) {
    let model = TypeModel::new();
    let person = MessageDef::new("Person")
        .field(single(1, "id", ScalarType::Int32))
        .field(single(2, "name", ScalarType::String))
        .field(FieldDef::new(
            3,
            "tags",
            FieldShape::Repeated(ScalarType::Int32.into()),
        ))
        .field(FieldDef::new(
            4,
            "nickname",
            FieldShape::Optional(ScalarType::String.into()),
        ))
        .field(FieldDef::new(
            5,
            "friend",
            FieldShape::Single(TypeRef::named("Person")),
        ));
    let handle = model.define([person.into()]).unwrap()[0];
    (model, handle)
}

#[derive(Clone, PartialEq, prost::Message)]
struct ProstPerson {
    #[prost(int32, tag = "1")]
    id: i32,
    #[prost(string, tag = "2")]
    name: String,
    #[prost(int32, repeated, tag = "3")]
    tags: Vec<i32>,
    #[prost(string, optional, tag = "4")]
    nickname: Option<String>,
    #[prost(message, optional, boxed, tag = "5")]
    friend: Option<Box<ProstPerson>>,
}

#[test]
fn test_person_bytes() {
    let (model, person) = person_model();
    let msg = Message::new(person).with(1, 42).with(2, "abc");
    let bytes = model.serialize_to_vec(&msg).unwrap();
    assert_eq!(bytes, [0x08, 0x2A, 0x12, 0x03, b'a', b'b', b'c']);
}

#[test]
fn test_defaults_are_elided() {
    let (model, person) = person_model();
    let msg = Message::new(person)
        .with(1, 0)
        .with(2, "")
        .with(3, Value::List(vec![]));
    assert!(model.serialize_to_vec(&msg).unwrap().is_empty());

    // Explicit presence keeps a default value on the wire.
    let msg = Message::new(person).with(4, "");
    assert_eq!(model.serialize_to_vec(&msg).unwrap(), [0x22, 0x00]);
    let read = model.deserialize(person, vec![0x22, 0x00]).unwrap();
    assert_eq!(read.get(4).and_then(Value::as_str), Some(""));
}

#[test]
fn test_repeated_is_packed_and_merges() {
    let (model, person) = person_model();
    let msg = Message::new(person).with(3, Value::List(vec![1.into(), 2.into()]));
    let bytes = model.serialize_to_vec(&msg).unwrap();
    assert_eq!(bytes, [0x1A, 0x02, 0x01, 0x02]);

    let mut existing = Message::new(person).with(3, Value::List(vec![9.into()]));
    model.deserialize_into(&mut existing, bytes).unwrap();
    let tags: Vec<_> = existing
        .get(3)
        .and_then(Value::as_list)
        .unwrap()
        .iter()
        .map(|v| v.as_i32().unwrap())
        .collect();
    assert_eq!(tags, [9, 1, 2]);
}

#[test]
fn test_unpacked_repeated_is_accepted() {
    let (model, person) = person_model();
    let read = model
        .deserialize(person, vec![0x18, 0x01, 0x18, 0x02, 0x1A, 0x01, 0x03])
        .unwrap();
    assert_eq!(
        read.get(3),
        Some(&Value::List(vec![1.into(), 2.into(), 3.into()]))
    );
}

#[test]
fn test_singular_last_value_wins_and_messages_merge() {
    let (model, person) = person_model();
    // id = 1, id = 2, friend { id = 5 }, friend { name = "x" }
    let data = vec![
        0x08, 0x01, 0x08, 0x02, 0x2A, 0x02, 0x08, 0x05, 0x2A, 0x03, 0x12, 0x01, b'x',
    ];
    let read = model.deserialize(person, data).unwrap();
    assert_eq!(read.get(1), Some(&Value::I32(2)));
    let friend = read.get(5).and_then(Value::as_message).unwrap();
    assert_eq!(friend.get(1), Some(&Value::I32(5)));
    assert_eq!(friend.get(2).and_then(Value::as_str), Some("x"));
}

#[test]
fn test_malformed_input() {
    let (model, person) = person_model();

    let err = model.deserialize(person, vec![0x12, 0x05, b'a']).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::UnexpectedEndOfInput);

    let err = model.deserialize(person, vec![0x12, 0x01, 0xFF]).unwrap_err();
    assert_eq!(err.kind(), &ErrorKind::InvalidUtf8);
    assert_eq!(err.context().field, Some(2));
    assert_eq!(err.context().type_name.as_deref(), Some("Person"));

    // Start group for field 1.
    let err = model.deserialize(person, vec![0x0B, 0x0C]).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::UnsupportedEncoding { .. }));

    let err = model.deserialize(person, vec![0x00, 0x01]).unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::InvalidFieldNumber { .. }));
}

#[test]
fn test_prost_reads_our_bytes() {
    let (model, person) = person_model();
    let friend = Message::new(person).with(1, 7).with(2, "bob");
    let msg = Message::new(person)
        .with(1, -3)
        .with(2, "alice")
        .with(3, Value::List(vec![4.into(), 500.into()]))
        .with(4, "al")
        .with(5, friend);
    let bytes = model.serialize_to_vec(&msg).unwrap();

    let decoded = ProstPerson::decode(Bytes::from(bytes)).unwrap();
    assert_eq!(
        decoded,
        ProstPerson {
            id: -3,
            name: "alice".to_owned(),
            tags: vec![4, 500],
            nickname: Some("al".to_owned()),
            friend: Some(Box::new(ProstPerson {
                id: 7,
                name: "bob".to_owned(),
                ..Default::default()
            })),
        }
    );
}

#[test]
fn test_we_read_prost_bytes() {
    let (model, person) = person_model();
    let prost = ProstPerson {
        id: 12,
        name: "carol".to_owned(),
        tags: vec![1, -1],
        nickname: None,
        friend: Some(Box::new(ProstPerson::default())),
    };
    let bytes = prost.encode_to_vec();
    let read = model.deserialize(person, bytes.clone()).unwrap();

    assert_eq!(read.get(1), Some(&Value::I32(12)));
    assert_eq!(read.get(2).and_then(Value::as_str), Some("carol"));
    assert_eq!(read.get(3), Some(&Value::List(vec![1.into(), (-1).into()])));
    assert!(!read.contains(4));
    assert!(read.get(5).and_then(Value::as_message).unwrap().is_empty());

    // And write them back identically.
    assert_eq!(model.serialize_to_vec(&read).unwrap(), bytes);
}
