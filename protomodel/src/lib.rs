//! A protocol buffers wire engine driven by a runtime type model.
//!
//! Message and enum types are registered with a [`TypeModel`], either from
//! Rust types implementing [`Describe`] or from [`MessageDef`]s built at
//! runtime. Instances are held as dynamic [`Message`]s and read and written
//! by one of two executors: an interpreter walking the descriptors, or an
//! execution plan compiled once per type. Both produce the same bytes.
//!
//! Types can form inheritance chains through includes. A subtype is written
//! nested inside its base under the include's tag, so a reader that only
//! knows the base still understands the base fields.
//!
//! ```
//! use protomodel::{FieldDef, FieldShape, Message, MessageDef, ScalarType, TypeModel};
//!
//! let model = TypeModel::new();
//! let person = MessageDef::new("Person")
//!     .field(FieldDef::new(1, "id", FieldShape::Single(ScalarType::Int32.into())))
//!     .field(FieldDef::new(2, "name", FieldShape::Single(ScalarType::String.into())));
//! let person = model.define([person.into()]).unwrap()[0];
//!
//! let msg = Message::new(person).with(1, 42).with(2, "abc");
//! let bytes = model.serialize_to_vec(&msg).unwrap();
//! assert_eq!(bytes, [0x08, 0x2A, 0x12, 0x03, b'a', b'b', b'c']);
//! assert_eq!(model.deserialize(person, bytes).unwrap(), msg);
//! ```

#![deny(clippy::as_conversions)]

pub(crate) mod codec;
pub mod engine;
pub mod error;
pub mod leb128;
pub mod model;
pub mod reader;
pub mod reflect;
pub mod unknown;
pub mod value;
pub mod wire;
pub mod writer;

mod util;
mod wellknown;

pub use error::{Error, ErrorContext, ErrorKind};
pub use engine::{
    Capabilities, ExecutionMode, Executor, Items, PrefixStyle, ReadOptions, WriteOptions,
};
pub use model::{
    CompatibilityLevel, Describe, EnumDef, Encoding, FieldDef, FieldShape, LockPolicy, MessageDef,
    ModelOptions, ScalarType, TypeDef, TypeHandle, TypeModel, TypeRef, WellKnown,
};
pub use reflect::{ProtoElement, ProtoMapKey, Reflect};
pub use unknown::UnknownFields;
pub use value::{MapKey, Message, Value};
pub use writer::LengthStrategy;

#[cfg(feature = "derive")]
pub use protomodel_derive::Describe;
