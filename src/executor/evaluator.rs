// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

//! Key expression evaluation.
//!
//! The sort operator evaluates one expression per ordering key against each
//! input chunk. Only bound column references are supported here; anything
//! richer is the business of a full expression executor.

use serde::{Deserialize, Serialize};

use super::Result;
use crate::array::{ArrayImpl, DataChunk};
use crate::types::{ConvertError, DataType};

/// Sort direction of an ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Ascending,
    Descending,
}

/// Where NULL values of an ordering key are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullOrder {
    NullsFirst,
    NullsLast,
}

/// A bound key expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyExpression {
    /// Reference to a column of the input chunk.
    ColumnRef(usize),
}

impl KeyExpression {
    /// Evaluate the expression over an input chunk, yielding one key column.
    pub fn eval(&self, chunk: &DataChunk) -> Result<ArrayImpl> {
        match self {
            Self::ColumnRef(idx) => {
                if *idx >= chunk.column_count() {
                    return Err(
                        ConvertError::ColumnOutOfRange(*idx, chunk.column_count()).into()
                    );
                }
                Ok(chunk.array_at(*idx).clone())
            }
        }
    }
}

/// One `ORDER BY` item: a key expression with its order and null placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundOrderKey {
    pub expr: KeyExpression,
    pub return_type: DataType,
    pub order: OrderType,
    pub null_order: NullOrder,
}

impl BoundOrderKey {
    pub fn is_descending(&self) -> bool {
        self.order == OrderType::Descending
    }

    pub fn nulls_first(&self) -> bool {
        self.null_order == NullOrder::NullsFirst
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::array::I32Array;

    #[test]
    fn test_column_ref() {
        let chunk: DataChunk = [ArrayImpl::Int32((0..4).map(Some).collect::<I32Array>())]
            .into_iter()
            .collect();
        let key = KeyExpression::ColumnRef(0).eval(&chunk).unwrap();
        assert_eq!(key.len(), 4);
        assert!(KeyExpression::ColumnRef(1).eval(&chunk).is_err());
    }
}
