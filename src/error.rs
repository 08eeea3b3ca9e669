use std::{fmt, io::SeekFrom};

use thiserror::Error;

use crate::u29::U28_MAX;

/// Identifies which of the per-stream reference tables an index points into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceTable {
    String,
    Class,
    Object,
}

impl fmt::Display for ReferenceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReferenceTable::String => write!(f, "String"),
            ReferenceTable::Class => write!(f, "Class trait"),
            ReferenceTable::Object => write!(f, "Object"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodingError {
    #[error("Unknown data type: {0}")]
    UnknownType(u8),

    #[error("Insufficient data")]
    InsufficientData,

    #[error("Malformed U29 integer, stream ended before the terminating byte")]
    MalformedInteger,

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,

    #[error("{table} reference {index} out of bounds")]
    Reference { table: ReferenceTable, index: usize },

    #[error("Object reference {0} points to a value that is still being decoded")]
    CyclicReference(usize),

    #[error("Reference points to object of different amf type than expected.")]
    InvalidReferenceType,

    #[error("Dynamic properties of class {alias:?} are not terminated")]
    TraitMismatch { alias: String },

    #[error("No class registered for alias {0:?}")]
    UnresolvedType(String),

    #[error("Values nested deeper than {0} levels")]
    NestingTooDeep(usize),

    #[error("Declared length {0} exceeds the configured limit")]
    LengthTooLarge(usize),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EncodingError {
    #[error("Value {0} does not fit in U29")]
    OutOfRangeU29(usize),

    #[error("Integer {0} is outside of the 29-bit signed range")]
    OutOfRangeInteger(i32),

    #[error("String too long: {0} bytes (max {U28_MAX})")]
    StringTooLong(usize),

    #[error("Array too long: {0} elements (max {U28_MAX})")]
    ArrayTooLong(usize),

    #[error("Vector too long: {0} elements (max {U28_MAX})")]
    VectorTooLong(usize),

    #[error("Dictionary too long: {0} entries (max {U28_MAX})")]
    DictionaryTooLong(usize),

    #[error("Class declares {0} sealed members, which does not fit in the trait header")]
    SealedMembersCountTooLarge(usize),

    #[error("Class {alias:?} expects {expected} sealed values, object supplies {actual}")]
    TraitMismatch {
        alias: String,
        expected: usize,
        actual: usize,
    },

    #[error("No class registered for alias {0:?}")]
    UnresolvedType(String),

    #[error("Values nested deeper than {0} levels")]
    NestingTooDeep(usize),
}

/// Errors of the [`crate::BufferedByteStream`] reader/writer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StreamError {
    #[error("Attempted to read {requested} bytes from the buffer but only {remaining} remain")]
    Eof { requested: usize, remaining: usize },

    #[error("Value {value} is out of range for {kind}")]
    OutOfRange { kind: &'static str, value: i64 },

    #[error("Cannot seek to {0:?}")]
    InvalidSeek(SeekFrom),

    #[error("Invalid UTF-8 string")]
    InvalidUtf8,
}
