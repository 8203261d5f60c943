//! Errors produced while building a [`TypeModel`](crate::TypeModel) or while
//! encoding and decoding messages.
//!
//! Every failure is reported through [`Error`], which pairs an [`ErrorKind`]
//! with whatever context was known at the point of failure: the type being
//! processed, the field number, and the byte offset in the input or output.

use core::fmt;
use std::sync::Arc;

use crate::wire::WireType;

/// The category of an [`Error`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ErrorKind {
    /// A varint ran past 10 bytes or overflowed 64 bits.
    #[error("malformed varint")]
    MalformedVarint,
    /// The wire type of a field disagrees with what its descriptor expects.
    #[error("wire type mismatch: expected {expected:?}, found {actual}")]
    WireTypeMismatch {
        /// Wire type the descriptor requires.
        expected: WireType,
        /// Raw wire type found in the input.
        actual: u8,
    },
    /// A field number is outside `1..=2^29-1` or inside the reserved range.
    #[error("invalid field number {number}")]
    InvalidFieldNumber { number: u64 },
    /// Two fields (or a field and an include tag) share a number.
    #[error("duplicate field number {number}")]
    DuplicateFieldNumber { number: u32 },
    /// Nesting went deeper than the configured limit.
    #[error("nesting depth exceeds limit of {limit}")]
    DepthLimitExceeded { limit: usize },
    /// A type cannot be described or used in the requested way.
    #[error("unsupported type: {reason}")]
    UnsupportedType { reason: String },
    /// The model is locked and no longer accepts metadata changes.
    #[error("type model is locked")]
    ModelLocked,
    /// A required field has no value.
    #[error("required field is missing")]
    RequiredFieldMissing,
    /// The input ended in the middle of a field.
    #[error("unexpected end of input")]
    UnexpectedEndOfInput,
    /// A string field is not valid UTF-8.
    #[error("invalid UTF-8 in string field")]
    InvalidUtf8,
    /// A length prefix cannot be addressed on this platform.
    #[error("length prefix {value} exceeds addressable memory")]
    LengthOverflow { value: u64 },
    /// An encoding we do not support, e.g. the deprecated group encoding.
    #[error("unsupported encoding: {reason}")]
    UnsupportedEncoding { reason: &'static str },
    /// A [`Value`](crate::Value) does not have the shape its descriptor requires.
    #[error("value mismatch: expected {expected}, found {actual}")]
    ValueMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    /// A handle or name that does not belong to this model.
    #[error("unknown type")]
    UnknownType,
    /// The API was driven in an order it does not support.
    #[error("programming error: {reason}")]
    ProgrammingError { reason: &'static str },
    /// The underlying sink failed.
    #[error("i/o error: {kind}")]
    Io { kind: std::io::ErrorKind },
}

/// Location details attached to an [`Error`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Name of the type being processed.
    pub type_name: Option<Arc<str>>,
    /// Field number being processed.
    pub field: Option<u32>,
    /// Byte offset in the input (decode) or output (encode).
    pub offset: Option<usize>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.type_name.is_none() && self.field.is_none() && self.offset.is_none() {
            return Ok(());
        }
        let mut sep = " (";
        if let Some(name) = &self.type_name {
            write!(f, "{sep}type `{name}`")?;
            sep = ", ";
        }
        if let Some(field) = self.field {
            write!(f, "{sep}field {field}")?;
            sep = ", ";
        }
        if let Some(offset) = self.offset {
            write!(f, "{sep}offset {offset}")?;
        }
        f.write_str(")")
    }
}

/// Error returned by every fallible operation in this crate.
#[derive(Debug, thiserror::Error)]
#[error("{kind}{context}")]
pub struct Error {
    kind: ErrorKind,
    context: ErrorContext,
    #[source]
    source: Option<std::io::Error>,
}

impl Error {
    /// Create an error of the given kind with no context.
    #[cold]
    pub fn new(kind: ErrorKind) -> Self {
        Error {
            kind,
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Returns the location details known for this error.
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Attach a byte offset, keeping the innermost one if already set.
    #[must_use]
    pub fn at(mut self, offset: usize) -> Self {
        self.context.offset.get_or_insert(offset);
        self
    }

    /// Attach a field number, keeping the innermost one if already set.
    #[must_use]
    pub fn in_field(mut self, number: u32) -> Self {
        self.context.field.get_or_insert(number);
        self
    }

    /// Attach a type name, keeping the innermost one if already set.
    #[must_use]
    pub fn in_type(mut self, name: &Arc<str>) -> Self {
        if self.context.type_name.is_none() {
            self.context.type_name = Some(Arc::clone(name));
        }
        self
    }

    #[cold]
    pub(crate) fn malformed_varint() -> Self {
        Error::new(ErrorKind::MalformedVarint)
    }

    #[cold]
    pub(crate) fn wire_type_mismatch(expected: WireType, actual: u8) -> Self {
        Error::new(ErrorKind::WireTypeMismatch { expected, actual })
    }

    #[cold]
    pub(crate) fn invalid_field_number(number: u64) -> Self {
        Error::new(ErrorKind::InvalidFieldNumber { number })
    }

    #[cold]
    pub(crate) fn duplicate_field_number(number: u32) -> Self {
        Error::new(ErrorKind::DuplicateFieldNumber { number }).in_field(number)
    }

    #[cold]
    pub(crate) fn depth_limit_exceeded(limit: usize) -> Self {
        Error::new(ErrorKind::DepthLimitExceeded { limit })
    }

    #[cold]
    pub(crate) fn unsupported_type(reason: impl Into<String>) -> Self {
        Error::new(ErrorKind::UnsupportedType {
            reason: reason.into(),
        })
    }

    #[cold]
    pub(crate) fn model_locked() -> Self {
        Error::new(ErrorKind::ModelLocked)
    }

    #[cold]
    pub(crate) fn required_field_missing(number: u32) -> Self {
        Error::new(ErrorKind::RequiredFieldMissing).in_field(number)
    }

    #[cold]
    pub(crate) fn unexpected_end_of_input() -> Self {
        Error::new(ErrorKind::UnexpectedEndOfInput)
    }

    #[cold]
    pub(crate) fn invalid_utf8() -> Self {
        Error::new(ErrorKind::InvalidUtf8)
    }

    #[cold]
    pub(crate) fn length_overflow(value: u64) -> Self {
        Error::new(ErrorKind::LengthOverflow { value })
    }

    #[cold]
    pub(crate) fn deprecated_group_encoding() -> Self {
        Error::new(ErrorKind::UnsupportedEncoding {
            reason: "deprecated group encoding",
        })
    }

    #[cold]
    pub(crate) fn value_mismatch(expected: &'static str, actual: &'static str) -> Self {
        Error::new(ErrorKind::ValueMismatch { expected, actual })
    }

    #[cold]
    pub(crate) fn unknown_type() -> Self {
        Error::new(ErrorKind::UnknownType)
    }

    #[cold]
    pub(crate) fn programming_error(reason: &'static str) -> Self {
        Error::new(ErrorKind::ProgrammingError { reason })
    }
}

impl From<std::io::Error> for Error {
    #[cold]
    fn from(err: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io { kind: err.kind() },
            context: ErrorContext::default(),
            source: Some(err),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error::new(kind)
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T, E = Error> = core::result::Result<T, E>;
