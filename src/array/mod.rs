// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

use crate::types::{DataType, DataTypeExt, DataTypeKind, DataValue};

mod data_chunk;
mod data_chunk_builder;
mod iterator;
mod primitive_array;
mod utf8_array;

pub use self::data_chunk::*;
pub use self::data_chunk_builder::*;
pub use self::iterator::ArrayIter;
pub use self::primitive_array::*;
pub use self::utf8_array::*;

/// A trait over all array builders.
///
/// `ArrayBuilder` is a trait over all builders. You could build an array with
/// `push` with the help of `ArrayBuilder` trait. The `push` function always
/// accepts reference to an element. e.g. for `PrimitiveArray`,
/// you must do `builder.push(Some(&1))`. For `Utf8Array`, you must do
/// `builder.push(Some("xxx"))`. Note that you don't need to construct a `String`.
///
/// The associated type `Array` is the type of the corresponding array. It is the
/// return type of `finish`.
pub trait ArrayBuilder: Send + Sync + 'static {
    /// Corresponding `Array` of this builder
    type Array: Array<Builder = Self>;

    /// Create a new builder with `capacity`.
    fn with_capacity(capacity: usize) -> Self;

    /// Append a value to builder.
    fn push(&mut self, value: Option<&<Self::Array as Array>::Item>);

    /// Append an array to builder.
    fn append(&mut self, other: &Self::Array);

    /// Finish build and return a new array.
    fn finish(self) -> Self::Array;
}

/// A trait over all array.
///
/// `Array` must be built with an `ArrayBuilder`. The array trait provides several
/// unified interface on an array, like `len`, `get` and `iter`.
///
/// The `Builder` associated type is the builder for this array.
/// The `Item` is the item you could retrieve from this array.
///
/// For example, `PrimitiveArray` could return an `Option<&u32>`, and `Utf8Array` will
/// return an `Option<&str>`.
pub trait Array: Sized + Send + Sync + 'static {
    /// Corresponding builder of this array.
    type Builder: ArrayBuilder<Array = Self>;

    /// Type of element in the array.
    type Item: ToOwned + ?Sized;

    /// Retrieve a reference to value.
    fn get(&self, idx: usize) -> Option<&Self::Item>;

    /// Number of items of array.
    fn len(&self) -> usize;

    /// Get iterator of current array.
    fn iter(&self) -> ArrayIter<'_, Self> {
        ArrayIter::new(self)
    }

    /// Check if `Array` is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub type BoolArray = PrimitiveArray<bool>;
pub type I32Array = PrimitiveArray<i32>;
pub type I64Array = PrimitiveArray<i64>;
pub type F64Array = PrimitiveArray<f64>;

/// Embeds all types of arrays in `array` module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ArrayImpl {
    Bool(BoolArray),
    Int32(I32Array),
    Int64(I64Array),
    Float64(F64Array),
    Utf8(Utf8Array),
}

pub type BoolArrayBuilder = PrimitiveArrayBuilder<bool>;
pub type I32ArrayBuilder = PrimitiveArrayBuilder<i32>;
pub type I64ArrayBuilder = PrimitiveArrayBuilder<i64>;
pub type F64ArrayBuilder = PrimitiveArrayBuilder<f64>;

/// Embeds all types of array builders in `array` module.
pub enum ArrayBuilderImpl {
    Bool(BoolArrayBuilder),
    Int32(I32ArrayBuilder),
    Int64(I64ArrayBuilder),
    Float64(F64ArrayBuilder),
    Utf8(Utf8ArrayBuilder),
}

/// An error which can be returned when downcasting an [`ArrayImpl`] into a concrete type array.
#[derive(Debug, Clone)]
pub struct TypeMismatch;

macro_rules! impl_into {
    ($x:ty, $y:ident) => {
        impl From<$x> for ArrayImpl {
            fn from(array: $x) -> Self {
                Self::$y(array)
            }
        }

        impl TryFrom<ArrayImpl> for $x {
            type Error = TypeMismatch;

            fn try_from(array: ArrayImpl) -> Result<Self, Self::Error> {
                match array {
                    ArrayImpl::$y(array) => Ok(array),
                    _ => Err(TypeMismatch),
                }
            }
        }

        impl<'a> TryFrom<&'a ArrayImpl> for &'a $x {
            type Error = TypeMismatch;

            fn try_from(array: &'a ArrayImpl) -> Result<Self, Self::Error> {
                match array {
                    ArrayImpl::$y(array) => Ok(array),
                    _ => Err(TypeMismatch),
                }
            }
        }
    };
}

impl_into! { PrimitiveArray<bool>, Bool }
impl_into! { PrimitiveArray<i32>, Int32 }
impl_into! { PrimitiveArray<i64>, Int64 }
impl_into! { PrimitiveArray<f64>, Float64 }
impl_into! { Utf8Array, Utf8 }

impl ArrayBuilderImpl {
    /// Create a new array builder from data type.
    pub fn with_capacity(capacity: usize, ty: &DataType) -> Self {
        match ty.kind() {
            DataTypeKind::Bool => Self::Bool(BoolArrayBuilder::with_capacity(capacity)),
            DataTypeKind::Int32 => Self::Int32(I32ArrayBuilder::with_capacity(capacity)),
            DataTypeKind::Int64 => Self::Int64(I64ArrayBuilder::with_capacity(capacity)),
            DataTypeKind::Float64 => Self::Float64(F64ArrayBuilder::with_capacity(capacity)),
            DataTypeKind::String => Self::Utf8(Utf8ArrayBuilder::with_capacity(capacity)),
        }
    }

    /// Create a new array builder with the same type of given array.
    pub fn from_type_of_array(array: &ArrayImpl) -> Self {
        match array {
            ArrayImpl::Bool(_) => Self::Bool(BoolArrayBuilder::with_capacity(0)),
            ArrayImpl::Int32(_) => Self::Int32(I32ArrayBuilder::with_capacity(0)),
            ArrayImpl::Int64(_) => Self::Int64(I64ArrayBuilder::with_capacity(0)),
            ArrayImpl::Float64(_) => Self::Float64(F64ArrayBuilder::with_capacity(0)),
            ArrayImpl::Utf8(_) => Self::Utf8(Utf8ArrayBuilder::with_capacity(0)),
        }
    }

    /// Appends an element to the back of array.
    pub fn push(&mut self, v: &DataValue) {
        match (self, v) {
            (Self::Bool(a), DataValue::Bool(v)) => a.push(Some(v)),
            (Self::Int32(a), DataValue::Int32(v)) => a.push(Some(v)),
            (Self::Int64(a), DataValue::Int64(v)) => a.push(Some(v)),
            (Self::Float64(a), DataValue::Float64(v)) => a.push(Some(v)),
            (Self::Utf8(a), DataValue::String(v)) => a.push(Some(v.as_str())),
            (Self::Bool(a), DataValue::Null) => a.push(None),
            (Self::Int32(a), DataValue::Null) => a.push(None),
            (Self::Int64(a), DataValue::Null) => a.push(None),
            (Self::Float64(a), DataValue::Null) => a.push(None),
            (Self::Utf8(a), DataValue::Null) => a.push(None),
            _ => panic!("failed to push value: type mismatch"),
        }
    }

    /// Appends an [`ArrayImpl`].
    pub fn append(&mut self, array_impl: &ArrayImpl) {
        match (self, array_impl) {
            (Self::Bool(builder), ArrayImpl::Bool(arr)) => builder.append(arr),
            (Self::Int32(builder), ArrayImpl::Int32(arr)) => builder.append(arr),
            (Self::Int64(builder), ArrayImpl::Int64(arr)) => builder.append(arr),
            (Self::Float64(builder), ArrayImpl::Float64(arr)) => builder.append(arr),
            (Self::Utf8(builder), ArrayImpl::Utf8(arr)) => builder.append(arr),
            _ => panic!("failed to append array: type mismatch"),
        }
    }

    /// Finish build and return a new array.
    pub fn finish(self) -> ArrayImpl {
        match self {
            Self::Bool(a) => ArrayImpl::Bool(a.finish()),
            Self::Int32(a) => ArrayImpl::Int32(a.finish()),
            Self::Int64(a) => ArrayImpl::Int64(a.finish()),
            Self::Float64(a) => ArrayImpl::Float64(a.finish()),
            Self::Utf8(a) => ArrayImpl::Utf8(a.finish()),
        }
    }
}

impl ArrayImpl {
    /// Get the value at the given index.
    pub fn get(&self, idx: usize) -> DataValue {
        match self {
            Self::Bool(a) => match a.get(idx) {
                Some(val) => DataValue::Bool(*val),
                None => DataValue::Null,
            },
            Self::Int32(a) => match a.get(idx) {
                Some(val) => DataValue::Int32(*val),
                None => DataValue::Null,
            },
            Self::Int64(a) => match a.get(idx) {
                Some(val) => DataValue::Int64(*val),
                None => DataValue::Null,
            },
            Self::Float64(a) => match a.get(idx) {
                Some(val) => DataValue::Float64(*val),
                None => DataValue::Null,
            },
            Self::Utf8(a) => match a.get(idx) {
                Some(val) => DataValue::String(val.to_string()),
                None => DataValue::Null,
            },
        }
    }

    /// Number of items of array.
    pub fn len(&self) -> usize {
        match self {
            Self::Bool(a) => a.len(),
            Self::Int32(a) => a.len(),
            Self::Int64(a) => a.len(),
            Self::Float64(a) => a.len(),
            Self::Utf8(a) => a.len(),
        }
    }

    /// Check if array is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Get the type of values in the array.
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataTypeKind::Bool.nullable(),
            Self::Int32(_) => DataTypeKind::Int32.nullable(),
            Self::Int64(_) => DataTypeKind::Int64.nullable(),
            Self::Float64(_) => DataTypeKind::Float64.nullable(),
            Self::Utf8(_) => DataTypeKind::String.nullable(),
        }
    }
}

/// Create a single element array from data value.
impl From<&DataValue> for ArrayImpl {
    fn from(val: &DataValue) -> Self {
        match val {
            &DataValue::Bool(v) => Self::Bool([Some(v)].into_iter().collect()),
            &DataValue::Int32(v) => Self::Int32([Some(v)].into_iter().collect()),
            &DataValue::Int64(v) => Self::Int64([Some(v)].into_iter().collect()),
            &DataValue::Float64(v) => Self::Float64([Some(v)].into_iter().collect()),
            DataValue::String(v) => Self::Utf8([Some(v)].into_iter().collect()),
            DataValue::Null => panic!("can not build array from NULL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_impl_get() {
        let array: ArrayImpl = (0..3).map(Some).collect::<I32Array>().into();
        assert_eq!(array.get(0), DataValue::Int32(0));
        assert_eq!(array.get(2), DataValue::Int32(2));
        assert_eq!(array.len(), 3);
    }

    #[test]
    fn test_builder_push_value() {
        let mut builder =
            ArrayBuilderImpl::with_capacity(4, &DataTypeKind::String.nullable());
        builder.push(&DataValue::String("banana".into()));
        builder.push(&DataValue::Null);
        let array = builder.finish();
        assert_eq!(array.get(0), DataValue::String("banana".into()));
        assert_eq!(array.get(1), DataValue::Null);
    }
}
