// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

//! Row (de)serialization.
//!
//! Key columns serialize twice: a fixed-width, memcmp-comparable prefix into
//! the sorting chunk, and (for variable-length types) the full value into a
//! blob chunk addressed through a sizes/offsets sidecar. Payload columns
//! serialize behind a per-row validity mask and deserialize back into typed
//! arrays on scan.

use crate::array::{Array, ArrayBuilderImpl, ArrayImpl};
use crate::executor::evaluator::BoundOrderKey;
use crate::types::{DataType, DataTypeKind};

use super::row_chunk::{RowSlots, IDX_WIDTH};

/// Number of leading bytes of a variable-length key serialized into the
/// memcmp-comparable sorting entry.
pub const STRING_PREFIX_LEN: usize = 12;

/// Length prefix of a serialized variable-length value.
pub const STRING_LEN_WIDTH: usize = std::mem::size_of::<u32>();

/// Byte layout of the sortable key entries.
///
/// Per key column in declaration order: an optional validity byte, then a
/// fixed-width encoded prefix of the value. A pointer-sized row index trails
/// the entry, referencing back into the variable-key sidecars and payload.
#[derive(Debug, Clone)]
pub struct SortLayout {
    pub order_keys: Vec<BoundOrderKey>,
    pub has_null: Vec<bool>,
    pub constant_size: Vec<bool>,
    /// Serialized width of each column, validity byte included.
    pub col_sizes: Vec<usize>,
    /// Width of one sorting entry, trailing row index included.
    pub entry_size: usize,
}

impl SortLayout {
    pub fn new(order_keys: &[BoundOrderKey]) -> Self {
        let mut has_null = vec![];
        let mut constant_size = vec![];
        let mut col_sizes = vec![];
        let mut entry_size = 0;
        for key in order_keys {
            let kind = key.return_type.kind();
            constant_size.push(kind.is_constant_size());
            let mut col_size = if kind.is_constant_size() {
                kind.width()
            } else {
                STRING_PREFIX_LEN
            };
            has_null.push(true);
            col_size += 1;
            entry_size += col_size;
            col_sizes.push(col_size);
        }
        // make room for the row index at the end
        entry_size += IDX_WIDTH;
        Self {
            order_keys: order_keys.to_vec(),
            has_null,
            constant_size,
            col_sizes,
            entry_size,
        }
    }

    pub fn num_cols(&self) -> usize {
        self.order_keys.len()
    }

    pub fn all_constant(&self) -> bool {
        self.constant_size.iter().all(|c| *c)
    }

    /// Width of the memcmp-comparable region of an entry.
    pub fn sorting_size(&self) -> usize {
        self.entry_size - IDX_WIDTH
    }

    /// Byte offset of a column within an entry.
    pub fn col_offset(&self, col: usize) -> usize {
        self.col_sizes[..col].iter().sum()
    }
}

/// Byte layout of the payload entries: a validity mask of one bit per
/// column, then the serialized column values.
#[derive(Debug, Clone)]
pub struct PayloadLayout {
    pub types: Vec<DataType>,
    pub has_variable_size: bool,
    pub validitymask_size: usize,
    /// Width of the fixed part of an entry: mask plus constant-size columns.
    pub entry_size: usize,
}

impl PayloadLayout {
    pub fn new(types: &[DataType]) -> Self {
        let validitymask_size = (types.len() + 7) / 8;
        let mut entry_size = validitymask_size;
        let mut has_variable_size = false;
        for ty in types {
            if ty.kind().is_constant_size() {
                entry_size += ty.kind().width();
            } else {
                has_variable_size = true;
            }
        }
        Self {
            types: types.to_vec(),
            has_variable_size,
            validitymask_size,
            entry_size,
        }
    }

    pub fn num_cols(&self) -> usize {
        self.types.len()
    }
}

fn encode_bool(v: bool) -> [u8; 1] {
    [v as u8]
}

fn encode_i32(v: i32) -> [u8; 4] {
    ((v as u32) ^ (1 << 31)).to_be_bytes()
}

fn encode_i64(v: i64) -> [u8; 8] {
    ((v as u64) ^ (1 << 63)).to_be_bytes()
}

/// IEEE-754 total-order transform: flip all bits of negative values, set the
/// sign bit of the rest. Unsigned memcmp then matches numeric order.
fn encode_f64(v: f64) -> [u8; 8] {
    let bits = v.to_bits();
    let bits = if bits >> 63 == 1 { !bits } else { bits | (1 << 63) };
    bits.to_be_bytes()
}

/// The validity byte is stored so that ascending memcmp yields the requested
/// null placement: NULLS FIRST encodes null as 0 and valid as 1, NULLS LAST
/// the other way around.
fn write_validity_byte(slots: &mut RowSlots, row: usize, is_null: bool, nulls_first: bool) {
    let byte = if is_null == nulls_first { 0 } else { 1 };
    slots.write(row, &[byte]);
}

/// Serialize `n` key values into their memcmp-comparable prefixes.
///
/// NULL values encode as all zeroes behind the validity byte. For descending
/// columns the value bytes are bit-inverted after encoding; the validity byte
/// already accounts for the final order and is left alone.
pub fn serialize_vector_sortable(
    array: &ArrayImpl,
    n: usize,
    slots: &mut RowSlots,
    desc: bool,
    has_null: bool,
    nulls_first: bool,
    prefix_len: usize,
) {
    macro_rules! encode_constant {
        ($a:expr, $encode:expr, $width:expr) => {
            for i in 0..n {
                let v = $a.get(i);
                if has_null {
                    write_validity_byte(slots, i, v.is_none(), nulls_first);
                }
                match v {
                    Some(v) => slots.write(i, &$encode(*v)),
                    None => slots.fill(i, 0, $width),
                }
                if desc {
                    slots.invert_tail(i, $width);
                }
            }
        };
    }
    match array {
        ArrayImpl::Bool(a) => encode_constant!(a, encode_bool, 1),
        ArrayImpl::Int32(a) => encode_constant!(a, encode_i32, 4),
        ArrayImpl::Int64(a) => encode_constant!(a, encode_i64, 8),
        ArrayImpl::Float64(a) => encode_constant!(a, encode_f64, 8),
        ArrayImpl::Utf8(a) => {
            for i in 0..n {
                let v = a.get(i);
                if has_null {
                    write_validity_byte(slots, i, v.is_none(), nulls_first);
                }
                match v {
                    Some(s) => {
                        let bytes = s.as_bytes();
                        let take = bytes.len().min(prefix_len);
                        slots.write(i, &bytes[..take]);
                        slots.fill(i, 0, prefix_len - take);
                    }
                    None => slots.fill(i, 0, prefix_len),
                }
                if desc {
                    slots.invert_tail(i, prefix_len);
                }
            }
        }
    }
}

/// Add the serialized byte size of each of the first `n` values to `sizes`.
pub fn compute_entry_sizes(array: &ArrayImpl, sizes: &mut [usize], n: usize) {
    match array {
        ArrayImpl::Utf8(a) => {
            for (i, size) in sizes.iter_mut().enumerate().take(n) {
                *size += STRING_LEN_WIDTH + a.get(i).map_or(0, |s| s.len());
            }
        }
        _ => {
            let width = array.data_type().kind().width();
            for size in sizes.iter_mut().take(n) {
                *size += width;
            }
        }
    }
}

/// Serialize `n` values of a column into the row slots at their cursors.
///
/// Constant-size values are stored little-endian; variable-length values are
/// stored as a `u32` length followed by the bytes. NULL values store zeroes
/// (length 0 for variable types) and, when `masked`, clear the column's bit
/// in the validity mask at the head of the slot.
pub fn serialize_vector(
    array: &ArrayImpl,
    n: usize,
    col_idx: usize,
    slots: &mut RowSlots,
    masked: bool,
) {
    macro_rules! store_constant {
        ($a:expr, $to_bytes:expr, $width:expr) => {
            for i in 0..n {
                match $a.get(i) {
                    Some(v) => slots.write(i, &$to_bytes(*v)),
                    None => {
                        slots.fill(i, 0, $width);
                        if masked {
                            slots.clear_validity_bit(i, col_idx);
                        }
                    }
                }
            }
        };
    }
    match array {
        ArrayImpl::Bool(a) => store_constant!(a, |v: bool| [v as u8], 1),
        ArrayImpl::Int32(a) => store_constant!(a, |v: i32| v.to_le_bytes(), 4),
        ArrayImpl::Int64(a) => store_constant!(a, |v: i64| v.to_le_bytes(), 8),
        ArrayImpl::Float64(a) => store_constant!(a, |v: f64| v.to_le_bytes(), 8),
        ArrayImpl::Utf8(a) => {
            for i in 0..n {
                match a.get(i) {
                    Some(s) => {
                        slots.write(i, &(s.len() as u32).to_le_bytes());
                        slots.write(i, s.as_bytes());
                    }
                    None => {
                        slots.write(i, &0u32.to_le_bytes());
                        if masked {
                            slots.clear_validity_bit(i, col_idx);
                        }
                    }
                }
            }
        }
    }
}

/// Deserialize payload rows into array builders, the inverse of
/// [`serialize_vector`] over a whole entry.
///
/// `rows` are full payload entries, validity mask first.
pub fn deserialize_rows(rows: &[&[u8]], layout: &PayloadLayout, builders: &mut [ArrayBuilderImpl]) {
    use crate::array::ArrayBuilder;

    let mut cursors = vec![layout.validitymask_size; rows.len()];
    for (col, builder) in builders.iter_mut().enumerate() {
        let kind = layout.types[col].kind();
        for (r, row) in rows.iter().enumerate() {
            let valid = row[col / 8] & (1 << (col % 8)) != 0;
            let at = cursors[r];
            match (kind, &mut *builder) {
                (DataTypeKind::Bool, ArrayBuilderImpl::Bool(b)) => {
                    let v = row[at] != 0;
                    b.push(valid.then_some(&v));
                    cursors[r] += 1;
                }
                (DataTypeKind::Int32, ArrayBuilderImpl::Int32(b)) => {
                    let v = i32::from_le_bytes(row[at..at + 4].try_into().unwrap());
                    b.push(valid.then_some(&v));
                    cursors[r] += 4;
                }
                (DataTypeKind::Int64, ArrayBuilderImpl::Int64(b)) => {
                    let v = i64::from_le_bytes(row[at..at + 8].try_into().unwrap());
                    b.push(valid.then_some(&v));
                    cursors[r] += 8;
                }
                (DataTypeKind::Float64, ArrayBuilderImpl::Float64(b)) => {
                    let v = f64::from_le_bytes(row[at..at + 8].try_into().unwrap());
                    b.push(valid.then_some(&v));
                    cursors[r] += 8;
                }
                (DataTypeKind::String, ArrayBuilderImpl::Utf8(b)) => {
                    let len =
                        u32::from_le_bytes(row[at..at + 4].try_into().unwrap()) as usize;
                    let bytes = &row[at + STRING_LEN_WIDTH..at + STRING_LEN_WIDTH + len];
                    // only valid utf8 enters the payload
                    let s = unsafe { std::str::from_utf8_unchecked(bytes) };
                    b.push(valid.then_some(s));
                    cursors[r] += STRING_LEN_WIDTH + len;
                }
                _ => panic!("builder type mismatch"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cmp::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::array::{DataChunk, I32Array, Utf8Array};
    use crate::buffer::BufferManager;
    use crate::executor::order::row_chunk::RowChunk;
    use crate::types::{DataTypeExt, DataValue};

    fn manager() -> Arc<BufferManager> {
        Arc::new(BufferManager::with_memory_limit(64 << 20).unwrap())
    }

    /// Encode one key column and read the raw entries back.
    fn encode_rows(
        array: &ArrayImpl,
        desc: bool,
        nulls_first: bool,
    ) -> Vec<Vec<u8>> {
        let manager = manager();
        let n = array.len();
        let width = match array {
            ArrayImpl::Utf8(_) => STRING_PREFIX_LEN,
            _ => array.data_type().kind().width(),
        };
        let entry_size = 1 + width + IDX_WIDTH;
        let mut chunk = RowChunk::new(manager.clone(), 1024, entry_size);
        let mut slots = chunk.build(n, None).unwrap();
        serialize_vector_sortable(
            array,
            n,
            &mut slots,
            desc,
            true,
            nulls_first,
            STRING_PREFIX_LEN,
        );
        drop(slots);
        let guard = manager.pin_read(chunk.blocks[0].id()).unwrap();
        (0..n)
            .map(|i| guard[i * entry_size..i * entry_size + entry_size - IDX_WIDTH].to_vec())
            .collect()
    }

    /// The comparator the encoding must agree with.
    fn logical_cmp(a: &DataValue, b: &DataValue, desc: bool, nulls_first: bool) -> Ordering {
        let ord = match (a.is_null(), b.is_null()) {
            (true, true) => return Ordering::Equal,
            (true, false) => return if nulls_first { Ordering::Less } else { Ordering::Greater },
            (false, true) => return if nulls_first { Ordering::Greater } else { Ordering::Less },
            (false, false) => a.partial_cmp(b).unwrap(),
        };
        if desc {
            ord.reverse()
        } else {
            ord
        }
    }

    fn assert_order_preserved(values: &[DataValue], array: ArrayImpl) {
        for &desc in &[false, true] {
            for &nulls_first in &[false, true] {
                let encoded = encode_rows(&array, desc, nulls_first);
                for i in 0..values.len() {
                    for j in 0..values.len() {
                        let expected = logical_cmp(&values[i], &values[j], desc, nulls_first);
                        let got = encoded[i].cmp(&encoded[j]);
                        // memcmp may distinguish encodings of equal logical
                        // values only when both are non-null
                        if expected != Ordering::Equal {
                            assert_eq!(
                                got, expected,
                                "order mismatch for {:?} vs {:?} (desc={desc}, nulls_first={nulls_first})",
                                values[i], values[j]
                            );
                        } else {
                            assert_eq!(got, Ordering::Equal);
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_sortable_encoding_int32() {
        let values = [
            DataValue::Int32(i32::MIN),
            DataValue::Int32(-7),
            DataValue::Int32(0),
            DataValue::Int32(42),
            DataValue::Int32(i32::MAX),
            DataValue::Null,
        ];
        let array = ArrayImpl::Int32(
            values
                .iter()
                .map(|v| match v {
                    DataValue::Int32(v) => Some(*v),
                    _ => None,
                })
                .collect::<I32Array>(),
        );
        assert_order_preserved(&values, array);
    }

    #[test]
    fn test_sortable_encoding_float64() {
        let values = [
            DataValue::Float64(f64::NEG_INFINITY),
            DataValue::Float64(-1.5),
            DataValue::Float64(-0.0),
            DataValue::Float64(2.25),
            DataValue::Float64(f64::INFINITY),
            DataValue::Null,
        ];
        let array = ArrayImpl::Float64(
            values
                .iter()
                .map(|v| match v {
                    DataValue::Float64(v) => Some(*v),
                    _ => None,
                })
                .collect(),
        );
        assert_order_preserved(&values, array);
    }

    #[test]
    fn test_sortable_encoding_string_prefix() {
        // all fit within the prefix, so memcmp order is exact
        let values = [
            DataValue::String("".into()),
            DataValue::String("app".into()),
            DataValue::String("apple".into()),
            DataValue::String("banana".into()),
            DataValue::Null,
        ];
        let array = ArrayImpl::Utf8(
            values
                .iter()
                .map(|v| match v {
                    DataValue::String(s) => Some(s.clone()),
                    _ => None,
                })
                .collect::<Utf8Array>(),
        );
        assert_order_preserved(&values, array);
    }

    #[test]
    fn test_payload_round_trip() {
        let types = [
            DataTypeKind::Int32.nullable(),
            DataTypeKind::String.nullable(),
            DataTypeKind::Float64.nullable(),
        ];
        let layout = PayloadLayout::new(&types);
        assert!(layout.has_variable_size);

        let chunk: DataChunk = [
            ArrayImpl::Int32([Some(1), None, Some(3)].into_iter().collect::<I32Array>()),
            ArrayImpl::Utf8(
                [Some("hello"), Some(""), None]
                    .into_iter()
                    .collect::<Utf8Array>(),
            ),
            ArrayImpl::Float64([Some(0.5), Some(-1.0), None].into_iter().collect()),
        ]
        .into_iter()
        .collect();
        let n = chunk.cardinality();

        // serialize with per-row sizes
        let mut sizes = vec![layout.entry_size; n];
        for array in chunk.arrays() {
            if !array.data_type().kind().is_constant_size() {
                compute_entry_sizes(array, &mut sizes, n);
            }
        }
        let manager = manager();
        let mut rows = RowChunk::new(manager.clone(), 1024, 32);
        let mut slots = rows.build(n, Some(&sizes)).unwrap();
        for i in 0..n {
            slots.fill(i, 0xFF, layout.validitymask_size);
        }
        for (col, array) in chunk.arrays().iter().enumerate() {
            serialize_vector(array, n, col, &mut slots, true);
        }
        drop(slots);

        // deserialize and compare
        let block = rows.concatenate().unwrap();
        let guard = manager.pin_read(block.id()).unwrap();
        let mut row_slices = vec![];
        let mut at = 0;
        for &size in &sizes {
            row_slices.push(&guard[at..at + size]);
            at += size;
        }
        let mut builders: Vec<_> = types
            .iter()
            .map(|ty| ArrayBuilderImpl::with_capacity(n, ty))
            .collect();
        deserialize_rows(&row_slices, &layout, &mut builders);
        let decoded: DataChunk = builders.into_iter().map(|b| b.finish()).collect();
        assert_eq!(decoded, chunk);
    }
}
