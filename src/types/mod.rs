// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

use std::fmt;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Storage type of a fixed-width array.
///
/// Implemented for exactly the four primitives the engine stores in
/// columns. The sort path orders rows by their encoded bytes, never by the
/// native values, so no ordering bound is carried here.
pub trait NativeType: Debug + Copy + Default + Send + Sync + 'static {}

impl NativeType for bool {}
impl NativeType for i32 {}
impl NativeType for i64 {}
impl NativeType for f64 {}

/// The set of physical types the engine can sort.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataTypeKind {
    Bool,
    Int32,
    Int64,
    Float64,
    String,
}

impl DataTypeKind {
    /// Whether values of this type serialize to a fixed number of bytes.
    pub fn is_constant_size(&self) -> bool {
        !matches!(self, Self::String)
    }

    /// Serialized width in bytes of a constant-size value.
    ///
    /// # Panics
    /// Panics if the type is variable-size.
    pub fn width(&self) -> usize {
        match self {
            Self::Bool => 1,
            Self::Int32 => 4,
            Self::Int64 => 8,
            Self::Float64 => 8,
            Self::String => panic!("string has no constant width"),
        }
    }
}

impl fmt::Display for DataTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "BOOLEAN",
            Self::Int32 => "INT",
            Self::Int64 => "BIGINT",
            Self::Float64 => "DOUBLE",
            Self::String => "VARCHAR",
        };
        write!(f, "{name}")
    }
}

/// Data type with nullability.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DataType {
    pub kind: DataTypeKind,
    pub nullable: bool,
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if self.nullable {
            write!(f, " (null)")?;
        }
        Ok(())
    }
}

impl DataType {
    pub const fn new(kind: DataTypeKind, nullable: bool) -> DataType {
        DataType { kind, nullable }
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn kind(&self) -> DataTypeKind {
        self.kind
    }
}

/// The extension methods for [`DataType`].
pub trait DataTypeExt {
    fn nullable(self) -> DataType;
    fn not_null(self) -> DataType;
}

impl DataTypeExt for DataTypeKind {
    fn nullable(self) -> DataType {
        DataType::new(self, true)
    }

    fn not_null(self) -> DataType {
        DataType::new(self, false)
    }
}

/// Primitive SQL value.
#[derive(Debug, Clone, PartialOrd, Serialize, Deserialize)]
pub enum DataValue {
    // NOTE: Null comes first.
    // => NULL is less than any non-NULL values
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    String(String),
}

impl PartialEq for DataValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(left), Self::Bool(right)) => left == right,
            (Self::Int32(left), Self::Int32(right)) => left == right,
            (Self::Int64(left), Self::Int64(right)) => left == right,
            (Self::Float64(left), Self::Float64(right)) => left == right,
            (Self::String(left), Self::String(right)) => left == right,
            _ => false,
        }
    }
}

impl Eq for DataValue {}

impl Hash for DataValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self {
            Self::Null => 0u8.hash(state),
            Self::Bool(b) => b.hash(state),
            Self::Int32(i) => i.hash(state),
            Self::Int64(i) => i.hash(state),
            Self::Float64(f) => f.to_bits().hash(state),
            Self::String(s) => s.hash(state),
        }
    }
}

impl DataValue {
    /// Get the type of value. `None` means NULL.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Self::Bool(_) => Some(DataTypeKind::Bool.not_null()),
            Self::Int32(_) => Some(DataTypeKind::Int32.not_null()),
            Self::Int64(_) => Some(DataTypeKind::Int64.not_null()),
            Self::Float64(_) => Some(DataTypeKind::Float64.not_null()),
            Self::String(_) => Some(DataTypeKind::String.not_null()),
            Self::Null => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

/// The error type of value type conversion.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum ConvertError {
    #[error("failed to cast {0} to type {1}")]
    Cast(String, &'static str),
    #[error("column index {0} out of range for a chunk of {1} columns")]
    ColumnOutOfRange(usize, usize),
}
