// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use super::*;
use crate::types::DataValue;

/// A collection of arrays.
///
/// A chunk is a horizontal subset of a query result.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct DataChunk {
    arrays: SmallVec<[ArrayImpl; 16]>,
}

impl FromIterator<ArrayImpl> for DataChunk {
    fn from_iter<I: IntoIterator<Item = ArrayImpl>>(iter: I) -> Self {
        let arrays: SmallVec<[ArrayImpl; 16]> = iter.into_iter().collect();
        assert!(!arrays.is_empty());
        let cardinality = arrays[0].len();
        assert!(
            arrays.iter().map(|a| a.len()).all(|l| l == cardinality),
            "all arrays must have the same length"
        );
        DataChunk { arrays }
    }
}

impl DataChunk {
    /// Return the number of rows in the chunk.
    pub fn cardinality(&self) -> usize {
        self.arrays[0].len()
    }

    /// Return the number of columns.
    pub fn column_count(&self) -> usize {
        self.arrays.len()
    }

    /// Get the reference of array by index.
    pub fn array_at(&self, idx: usize) -> &ArrayImpl {
        &self.arrays[idx]
    }

    /// All arrays of the chunk.
    pub fn arrays(&self) -> &[ArrayImpl] {
        &self.arrays
    }

    /// Get the values of row `idx`.
    pub fn row_at(&self, idx: usize) -> Vec<DataValue> {
        self.arrays.iter().map(|arr| arr.get(idx)).collect()
    }
}

pub type DataChunkRef = Arc<DataChunk>;

impl fmt::Debug for DataChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rows = vec![];
        for i in 0..self.cardinality().min(16) {
            rows.push(self.row_at(i));
        }
        f.debug_struct("DataChunk")
            .field("cardinality", &self.cardinality())
            .field("rows", &rows)
            .finish()
    }
}
