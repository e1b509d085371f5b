// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

use itertools::Itertools;

use super::{ArrayBuilderImpl, DataChunk};
use crate::types::{DataType, DataValue};

/// A helper struct to build a [`DataChunk`] row by row.
///
/// The builder yields a chunk whenever the number of buffered rows reaches
/// `capacity`.
pub struct DataChunkBuilder {
    data_types: Vec<DataType>,
    array_builders: Vec<ArrayBuilderImpl>,
    size: usize,
    capacity: usize,
}

impl DataChunkBuilder {
    pub fn new<'a>(data_types: impl IntoIterator<Item = &'a DataType>, capacity: usize) -> Self {
        assert_ne!(capacity, 0);
        let data_types: Vec<DataType> = data_types.into_iter().cloned().collect();
        let array_builders = data_types
            .iter()
            .map(|ty| ArrayBuilderImpl::with_capacity(capacity, ty))
            .collect();
        DataChunkBuilder {
            data_types,
            array_builders,
            size: 0,
            capacity,
        }
    }

    /// Push a row of values. Returns a data chunk when the builder is full.
    ///
    /// The row is accepted as an iterator of [`DataValue`], and it's required
    /// that the length of the row equals the number of columns.
    #[must_use]
    pub fn push_row(&mut self, row: impl IntoIterator<Item = DataValue>) -> Option<DataChunk> {
        self.array_builders
            .iter_mut()
            .zip_eq(row)
            .for_each(|(builder, v)| builder.push(&v));
        self.size += 1;
        if self.size == self.capacity {
            self.take()
        } else {
            None
        }
    }

    /// Generate a [`DataChunk`] with the remaining rows.
    ///
    /// If there are no remaining rows, `None` will be returned.
    #[must_use]
    pub fn take(&mut self) -> Option<DataChunk> {
        let size = std::mem::take(&mut self.size);
        let capacity = self.capacity;
        match size {
            0 => None,
            _ => Some(
                self.array_builders
                    .iter_mut()
                    .zip(self.data_types.iter())
                    .map(|(builder, ty)| {
                        std::mem::replace(builder, ArrayBuilderImpl::with_capacity(capacity, ty))
                            .finish()
                    })
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataTypeExt, DataTypeKind};

    #[test]
    fn test_push_row() {
        let types = [DataTypeKind::Int32.nullable(), DataTypeKind::String.nullable()];
        let mut builder = DataChunkBuilder::new(types.iter(), 2);
        assert!(builder
            .push_row([DataValue::Int32(1), DataValue::String("a".into())])
            .is_none());
        let chunk = builder
            .push_row([DataValue::Int32(2), DataValue::Null])
            .expect("chunk should be yielded when full");
        assert_eq!(chunk.cardinality(), 2);
        assert_eq!(chunk.row_at(1), vec![DataValue::Int32(2), DataValue::Null]);
        assert!(builder.take().is_none());
    }
}
