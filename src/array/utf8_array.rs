// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

use std::iter::FromIterator;

use bitvec::vec::BitVec;
use serde::{Deserialize, Serialize};

use super::{Array, ArrayBuilder};

/// A collection of variable-length UTF-8 strings.
///
/// Values are packed into one byte buffer and addressed by their end
/// positions: value `i` starts where value `i - 1` ends. The end positions
/// are `u32`, the same width the sort path serializes string lengths with.
/// Like [`PrimitiveArray`](super::PrimitiveArray), the validity bitmap only
/// exists once a NULL has been seen.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Utf8Array {
    ends: Vec<u32>,
    valid: Option<BitVec>,
    data: Vec<u8>,
}

impl Utf8Array {
    fn is_valid(&self, idx: usize) -> bool {
        match &self.valid {
            None => true,
            Some(valid) => valid[idx],
        }
    }

    fn value_range(&self, idx: usize) -> (usize, usize) {
        let start = if idx == 0 { 0 } else { self.ends[idx - 1] as usize };
        (start, self.ends[idx] as usize)
    }
}

impl Array for Utf8Array {
    type Item = str;
    type Builder = Utf8ArrayBuilder;

    fn get(&self, idx: usize) -> Option<&str> {
        if !self.is_valid(idx) {
            return None;
        }
        let (start, end) = self.value_range(idx);
        Some(unsafe { std::str::from_utf8_unchecked(&self.data[start..end]) })
    }

    fn len(&self) -> usize {
        self.ends.len()
    }
}

/// Arrays compare by logical content, not by buffer layout.
impl PartialEq for Utf8Array {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

/// A builder that uses `&str` to build an [`Utf8Array`].
pub struct Utf8ArrayBuilder {
    ends: Vec<u32>,
    valid: Option<BitVec>,
    data: Vec<u8>,
}

impl Utf8ArrayBuilder {
    /// Retroactively mark every value pushed so far as valid.
    fn materialize_valid(&mut self) -> &mut BitVec {
        self.valid.get_or_insert_with(|| {
            let mut valid = BitVec::with_capacity(self.ends.len().max(1) * 2);
            valid.resize(self.ends.len(), true);
            valid
        })
    }
}

impl ArrayBuilder for Utf8ArrayBuilder {
    type Array = Utf8Array;

    fn with_capacity(capacity: usize) -> Self {
        Self {
            ends: Vec::with_capacity(capacity),
            valid: None,
            data: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, value: Option<&str>) {
        match value {
            Some(value) => {
                if let Some(valid) = &mut self.valid {
                    valid.push(true);
                }
                self.data.extend_from_slice(value.as_bytes());
            }
            None => {
                // a NULL occupies no bytes, only an end marker
                self.materialize_valid().push(false);
            }
        }
        debug_assert!(self.data.len() <= u32::MAX as usize);
        self.ends.push(self.data.len() as u32);
    }

    fn append(&mut self, other: &Utf8Array) {
        match &other.valid {
            None => {
                if let Some(valid) = &mut self.valid {
                    valid.resize(self.ends.len() + other.ends.len(), true);
                }
            }
            Some(other_valid) => {
                self.materialize_valid().extend_from_bitslice(other_valid);
            }
        }
        let base = self.data.len() as u32;
        self.data.extend_from_slice(&other.data);
        self.ends.extend(other.ends.iter().map(|end| base + end));
    }

    fn finish(self) -> Utf8Array {
        Utf8Array {
            ends: self.ends,
            valid: self.valid,
            data: self.data,
        }
    }
}

// Enable `collect()` an array from iterator of `Option<&str>` or `Option<String>`.
impl<S: AsRef<str>> FromIterator<Option<S>> for Utf8Array {
    fn from_iter<I: IntoIterator<Item = Option<S>>>(iter: I) -> Self {
        let iter = iter.into_iter();
        let mut builder = <Self as Array>::Builder::with_capacity(iter.size_hint().0);
        for e in iter {
            builder.push(e.as_ref().map(|s| s.as_ref()));
        }
        builder.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utf8_builder() {
        let mut builder = Utf8ArrayBuilder::with_capacity(100);
        for i in 0..100 {
            if i % 2 == 0 {
                builder.push(Some(format!("{}", i).as_str()));
            } else {
                builder.push(None);
            }
        }
        let array = builder.finish();
        assert_eq!(array.get(4), Some("4"));
        assert_eq!(array.get(5), None);
        assert_eq!(array.len(), 100);
    }

    #[test]
    fn test_null_and_empty_are_distinct() {
        let array: Utf8Array = [Some(""), None, Some("tail")].into_iter().collect();
        assert_eq!(array.get(0), Some(""));
        assert_eq!(array.get(1), None);
        assert_eq!(array.get(2), Some("tail"));
    }

    #[test]
    fn test_append_rebases_ends() {
        let left: Utf8Array = [Some("ab"), Some("cde")].into_iter().collect();
        let right: Utf8Array = [None, Some("f")].into_iter().collect();
        let mut builder = Utf8ArrayBuilder::with_capacity(4);
        builder.append(&left);
        builder.append(&right);
        let array = builder.finish();
        assert_eq!(
            array.iter().collect::<Vec<_>>(),
            vec![Some("ab"), Some("cde"), None, Some("f")]
        );
    }
}
