// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

use std::iter::FromIterator;

use bitvec::vec::BitVec;
use serde::{Deserialize, Serialize};

use super::{Array, ArrayBuilder};
use crate::types::NativeType;

/// A collection of fixed-width primitive values, such as `i32` or `f64`.
///
/// The validity bitmap is lazily materialized: an array that never saw a
/// NULL carries no bitmap at all, and `get` answers from `data` directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimitiveArray<T: NativeType> {
    valid: Option<BitVec>,
    data: Vec<T>,
}

impl<T: NativeType> PrimitiveArray<T> {
    fn is_valid(&self, idx: usize) -> bool {
        match &self.valid {
            None => true,
            Some(valid) => valid[idx],
        }
    }
}

impl<T: NativeType> FromIterator<Option<T>> for PrimitiveArray<T> {
    fn from_iter<I: IntoIterator<Item = Option<T>>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut builder = <Self as Array>::Builder::with_capacity(iter.size_hint().0);
        for e in iter {
            builder.push(e.as_ref());
        }
        builder.finish()
    }
}

impl<T: NativeType> Array for PrimitiveArray<T> {
    type Item = T;
    type Builder = PrimitiveArrayBuilder<T>;

    fn get(&self, idx: usize) -> Option<&T> {
        self.is_valid(idx).then(|| &self.data[idx])
    }

    fn len(&self) -> usize {
        self.data.len()
    }
}

/// Arrays compare by logical content: a dense array equals a sparse one
/// whose bitmap happens to be all ones.
impl<T: NativeType + PartialEq> PartialEq for PrimitiveArray<T> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

/// `PrimitiveArrayBuilder` constructs a `PrimitiveArray` from `Option<T>`,
/// creating the validity bitmap only when the first NULL arrives.
pub struct PrimitiveArrayBuilder<T: NativeType> {
    valid: Option<BitVec>,
    data: Vec<T>,
}

impl<T: NativeType> PrimitiveArrayBuilder<T> {
    /// Retroactively mark every value pushed so far as valid.
    fn materialize_valid(&mut self) -> &mut BitVec {
        self.valid.get_or_insert_with(|| {
            let mut valid = BitVec::with_capacity(self.data.len().max(1) * 2);
            valid.resize(self.data.len(), true);
            valid
        })
    }
}

impl<T: NativeType> ArrayBuilder for PrimitiveArrayBuilder<T> {
    type Array = PrimitiveArray<T>;

    fn with_capacity(capacity: usize) -> Self {
        Self {
            valid: None,
            data: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, value: Option<&T>) {
        match value {
            Some(value) => {
                if let Some(valid) = &mut self.valid {
                    valid.push(true);
                }
                self.data.push(*value);
            }
            None => {
                self.materialize_valid().push(false);
                self.data.push(T::default());
            }
        }
    }

    fn append(&mut self, other: &PrimitiveArray<T>) {
        match &other.valid {
            None => {
                if let Some(valid) = &mut self.valid {
                    valid.resize(self.data.len() + other.data.len(), true);
                }
            }
            Some(other_valid) => {
                self.materialize_valid().extend_from_bitslice(other_valid);
            }
        }
        self.data.extend_from_slice(&other.data);
    }

    fn finish(self) -> PrimitiveArray<T> {
        PrimitiveArray {
            valid: self.valid,
            data: self.data,
        }
    }
}

#[cfg(test)]
mod tests {
    use num_traits::cast::FromPrimitive;

    use super::*;

    fn test_builder<T: FromPrimitive + NativeType + PartialEq>() {
        let iter = (0..1000).map(|x| if x % 2 == 0 { None } else { T::from_usize(x) });
        let array = iter.clone().collect::<PrimitiveArray<T>>();
        assert_eq!(
            array.iter().map(|x| x.cloned()).collect::<Vec<_>>(),
            iter.collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_builder_i32() {
        test_builder::<i32>();
    }

    #[test]
    fn test_builder_i64() {
        test_builder::<i64>();
    }

    #[test]
    fn test_builder_f64() {
        test_builder::<f64>();
    }

    #[test]
    fn test_dense_array_has_no_bitmap() {
        let array: PrimitiveArray<i32> = (0..16).map(Some).collect();
        assert!(array.valid.is_none());
        assert_eq!(array.get(3), Some(&3));
    }

    #[test]
    fn test_append_mixes_dense_and_sparse() {
        let dense: PrimitiveArray<i32> = (0..4).map(Some).collect();
        let sparse: PrimitiveArray<i32> = [Some(9), None].into_iter().collect();

        // dense ++ sparse materializes validity for the dense head
        let mut builder = PrimitiveArrayBuilder::with_capacity(6);
        builder.append(&dense);
        builder.append(&sparse);
        let array = builder.finish();
        assert_eq!(
            array.iter().map(|x| x.copied()).collect::<Vec<_>>(),
            vec![Some(0), Some(1), Some(2), Some(3), Some(9), None]
        );

        // sparse ++ dense back-fills the tail as valid
        let mut builder = PrimitiveArrayBuilder::with_capacity(6);
        builder.append(&sparse);
        builder.append(&dense);
        let array = builder.finish();
        assert_eq!(array.get(1), None);
        assert_eq!(array.get(5), Some(&3));
    }

    #[test]
    fn test_equality_is_by_content() {
        let a: PrimitiveArray<i64> = [Some(1), None, Some(3)].into_iter().collect();
        let b: PrimitiveArray<i64> = [Some(1), None, Some(3)].into_iter().collect();
        let c: PrimitiveArray<i64> = [Some(1), Some(2), Some(3)].into_iter().collect();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
