// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

//! The `ORDER BY` operator.
//!
//! Ingestion worker threads call [`OrderByOperator::sink`] with input
//! chunks; each thread's [`OrderLocalState`] serializes the evaluated key
//! columns into a memcmp-comparable sorting chunk (plus blob sidecars for
//! variable-length keys) and the full rows into a payload chunk. Whenever
//! the sorting chunk outgrows [`SORTING_BLOCK_SIZE`], it is sealed into a
//! sorted run. [`OrderByOperator::combine`] publishes each thread's runs to
//! the [`OrderGlobalState`], [`OrderByOperator::finalize`] merges them into
//! one run, and [`OrderByOperator::get_chunk`] scans the result back out.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::array::{ArrayImpl, DataChunk};
use crate::buffer::{BufferManager, BLOCK_ALLOC_SIZE};
use crate::types::DataType;

use super::evaluator::BoundOrderKey;
use super::{ExecutorError, Result, VECTOR_SIZE};

mod merge;
mod row_chunk;
mod scan;
mod serialize;
mod sort;

pub use row_chunk::{RowChunk, RowDataBlock, RowSlots, ScratchBlock, IDX_WIDTH};
pub use scan::{OrderOperatorState, OrderParallelState};
pub use serialize::{PayloadLayout, SortLayout, STRING_PREFIX_LEN};

use serialize::{compute_entry_sizes, serialize_vector, serialize_vector_sortable};
use sort::{reorder, sort_in_memory};

/// Once a local sorting chunk holds more than this many bytes it is sealed
/// into a sorted run mid-ingestion.
pub const SORTING_BLOCK_SIZE: usize = 1 << 20;

/// One variable-length key column of a run: the full serialized values and
/// their prefix-sum offsets.
struct VarKeyChunk {
    data: RowDataBlock,
    offsets: RowDataBlock,
}

/// The payload rows of a run, with offsets when any payload column is
/// variable-size.
struct PayloadRun {
    data: RowDataBlock,
    offsets: Option<RowDataBlock>,
}

/// One totally-ordered contiguous sequence of rows: the sorted key block,
/// the per-column variable-key sidecars, and the payload.
struct SortedRun {
    sorting: RowDataBlock,
    var_keys: Vec<Option<VarKeyChunk>>,
    payload: PayloadRun,
}

impl SortedRun {
    fn len(&self) -> usize {
        self.sorting.count
    }
}

#[derive(Default)]
struct SharedSortState {
    runs: Vec<SortedRun>,
    /// Set by `finalize`.
    total_count: Option<usize>,
}

/// State shared by all sink and scan threads of one sort.
pub struct OrderGlobalState {
    buffer_manager: Arc<BufferManager>,
    sort_layout: SortLayout,
    payload_layout: PayloadLayout,
    state: Mutex<SharedSortState>,
}

impl OrderGlobalState {
    /// Total number of sorted rows; available after `finalize`.
    pub fn total_count(&self) -> Option<usize> {
        self.state.lock().total_count
    }
}

/// The row chunks a sink thread accumulates between seals.
struct LocalSortData {
    sorting: RowChunk,
    var_key_blobs: Vec<Option<RowChunk>>,
    var_key_sizes: Vec<Option<RowChunk>>,
    payload: RowChunk,
    payload_sizes: Option<RowChunk>,
}

impl LocalSortData {
    fn new(
        manager: Arc<BufferManager>,
        sort_layout: &SortLayout,
        payload_layout: &PayloadLayout,
    ) -> Self {
        // sorting chunk: whole vectors per block
        let vectors_per_block =
            (BLOCK_ALLOC_SIZE / sort_layout.entry_size + VECTOR_SIZE) / VECTOR_SIZE;
        let sorting = RowChunk::new(
            manager.clone(),
            vectors_per_block * VECTOR_SIZE,
            sort_layout.entry_size,
        );
        // variable sorting column blocks: assume large values, otherwise a
        // single large entry may not fit in a block (1 << 23 = 8MB)
        let mut var_key_blobs = vec![];
        let mut var_key_sizes = vec![];
        for col in 0..sort_layout.num_cols() {
            if sort_layout.constant_size[col] {
                var_key_blobs.push(None);
                var_key_sizes.push(None);
            } else {
                var_key_blobs.push(Some(RowChunk::new(
                    manager.clone(),
                    (1 << 23) / 8 / IDX_WIDTH,
                    IDX_WIDTH,
                )));
                var_key_sizes.push(Some(RowChunk::new(
                    manager.clone(),
                    BLOCK_ALLOC_SIZE / IDX_WIDTH + 1,
                    IDX_WIDTH,
                )));
            }
        }
        // payload block
        let (payload, payload_sizes) = if payload_layout.has_variable_size {
            let var_columns = payload_layout
                .types
                .iter()
                .filter(|ty| !ty.kind().is_constant_size())
                .count();
            let init_size = payload_layout.entry_size + var_columns * (1 << 23);
            (
                RowChunk::new(manager.clone(), init_size / 32, 32),
                Some(RowChunk::new(
                    manager.clone(),
                    BLOCK_ALLOC_SIZE / IDX_WIDTH + 1,
                    IDX_WIDTH,
                )),
            )
        } else {
            let vectors_per_block =
                (BLOCK_ALLOC_SIZE / payload_layout.entry_size + VECTOR_SIZE) / VECTOR_SIZE;
            (
                RowChunk::new(
                    manager,
                    vectors_per_block * VECTOR_SIZE,
                    payload_layout.entry_size,
                ),
                None,
            )
        };
        Self {
            sorting,
            var_key_blobs,
            var_key_sizes,
            payload,
            payload_sizes,
        }
    }
}

/// Per-sink-thread state: accumulated row chunks and locally sealed runs.
pub struct OrderLocalState {
    data: Option<LocalSortData>,
    runs: Vec<SortedRun>,
}

impl OrderLocalState {
    fn new() -> Self {
        Self {
            data: None,
            runs: vec![],
        }
    }

    /// Seal the accumulated chunks into one continuous run: concatenate,
    /// sort in memory, re-order the sidecars and payload.
    fn sort_local(
        &mut self,
        manager: &Arc<BufferManager>,
        sort_layout: &SortLayout,
    ) -> Result<()> {
        let Some(data) = self.data.as_mut() else {
            return Ok(());
        };
        if data.sorting.is_empty() {
            return Ok(());
        }
        let count = data.sorting.count;
        debug_assert_eq!(count, data.payload.count);
        if count != data.payload.count {
            return Err(ExecutorError::Internal(format!(
                "sorting chunk holds {} rows but payload holds {}",
                count, data.payload.count
            )));
        }

        let sorting = data.sorting.concatenate()?;
        let mut var_keys = vec![];
        for col in 0..sort_layout.num_cols() {
            if sort_layout.constant_size[col] {
                var_keys.push(None);
                continue;
            }
            let blob = data.var_key_blobs[col]
                .as_mut()
                .expect("variable column has a blob chunk");
            let sizes = data.var_key_sizes[col]
                .as_mut()
                .expect("variable column has a sizes chunk");
            debug_assert_eq!(count, blob.count);
            var_keys.push(Some(VarKeyChunk {
                data: blob.concatenate()?,
                offsets: sizes.sizes_to_offsets()?,
            }));
        }
        let payload_data = data.payload.concatenate()?;
        let payload_offsets = match data.payload_sizes.as_mut() {
            Some(sizes) => Some(sizes.sizes_to_offsets()?),
            None => None,
        };

        let mut run = SortedRun {
            sorting,
            var_keys,
            payload: PayloadRun {
                data: payload_data,
                offsets: payload_offsets,
            },
        };
        sort_in_memory(manager, &run, sort_layout)?;
        reorder(manager, &mut run, sort_layout)?;
        debug!(count, "sealed sorted run");
        self.runs.push(run);
        Ok(())
    }
}

/// The physical `ORDER BY` operator.
pub struct OrderByOperator {
    orders: Vec<BoundOrderKey>,
    payload_types: Vec<DataType>,
    estimated_cardinality: usize,
}

impl OrderByOperator {
    /// `orders` are the ordering keys; `payload_types` describe the columns
    /// of the input chunks, which are carried through the sort and returned
    /// by the scan.
    pub fn new(orders: Vec<BoundOrderKey>, payload_types: Vec<DataType>) -> Self {
        assert!(!orders.is_empty(), "ORDER BY requires at least one key");
        assert!(
            !payload_types.is_empty(),
            "ORDER BY requires at least one payload column"
        );
        Self {
            orders,
            payload_types,
            estimated_cardinality: 0,
        }
    }

    pub fn with_estimated_cardinality(mut self, estimated_cardinality: usize) -> Self {
        self.estimated_cardinality = estimated_cardinality;
        self
    }

    pub fn get_global_state(&self, buffer_manager: Arc<BufferManager>) -> OrderGlobalState {
        OrderGlobalState {
            buffer_manager,
            sort_layout: SortLayout::new(&self.orders),
            payload_layout: PayloadLayout::new(&self.payload_types),
            state: Mutex::new(SharedSortState::default()),
        }
    }

    pub fn get_local_sink_state(&self) -> OrderLocalState {
        OrderLocalState::new()
    }

    /// Append a chunk of rows to a sink thread's local state.
    pub fn sink(
        &self,
        global: &OrderGlobalState,
        local: &mut OrderLocalState,
        input: &DataChunk,
    ) -> Result<()> {
        let sort_layout = &global.sort_layout;
        let payload_layout = &global.payload_layout;
        if input.column_count() != payload_layout.num_cols() {
            return Err(ExecutorError::LengthMismatch {
                expected: payload_layout.num_cols(),
                actual: input.column_count(),
            });
        }
        let n = input.cardinality();
        if n == 0 {
            return Ok(());
        }
        let data = local.data.get_or_insert_with(|| {
            LocalSortData::new(global.buffer_manager.clone(), sort_layout, payload_layout)
        });

        // obtain sorting columns
        let key_arrays = self
            .orders
            .iter()
            .map(|key| key.expr.eval(input))
            .collect::<Result<Vec<ArrayImpl>>>()?;

        // serialize sorting data
        let mut slots = data.sorting.build(n, None)?;
        for (col, array) in key_arrays.iter().enumerate() {
            let key = &self.orders[col];
            serialize_vector_sortable(
                array,
                n,
                &mut slots,
                key.is_descending(),
                sort_layout.has_null[col],
                key.nulls_first(),
                STRING_PREFIX_LEN,
            );
        }
        drop(slots);

        // also fully serialize variable size sorting columns
        for (col, array) in key_arrays.iter().enumerate() {
            if sort_layout.constant_size[col] {
                continue;
            }
            let mut entry_sizes = vec![0usize; n];
            compute_entry_sizes(array, &mut entry_sizes, n);
            let sizes = data.var_key_sizes[col]
                .as_mut()
                .expect("variable column has a sizes chunk");
            let mut size_slots = sizes.build(n, None)?;
            for (i, &size) in entry_sizes.iter().enumerate() {
                size_slots.write(i, &(size as u64).to_ne_bytes());
            }
            drop(size_slots);
            let blob = data.var_key_blobs[col]
                .as_mut()
                .expect("variable column has a blob chunk");
            let mut blob_slots = blob.build(n, Some(&entry_sizes))?;
            serialize_vector(array, n, col, &mut blob_slots, false);
            drop(blob_slots);
        }

        // compute payload entry sizes if there are variable size columns
        let payload_sizes = if payload_layout.has_variable_size {
            let mut entry_sizes = vec![payload_layout.entry_size; n];
            for array in input.arrays() {
                if !array.data_type().kind().is_constant_size() {
                    compute_entry_sizes(array, &mut entry_sizes, n);
                }
            }
            let sizes = data
                .payload_sizes
                .as_mut()
                .expect("variable payload has a sizes chunk");
            let mut size_slots = sizes.build(n, None)?;
            for (i, &size) in entry_sizes.iter().enumerate() {
                size_slots.write(i, &(size as u64).to_ne_bytes());
            }
            drop(size_slots);
            Some(entry_sizes)
        } else {
            None
        };

        // serialize payload data behind its validity mask
        let mut payload_slots = data.payload.build(n, payload_sizes.as_deref())?;
        for i in 0..n {
            payload_slots.fill(i, 0xFF, payload_layout.validitymask_size);
        }
        for (col, array) in input.arrays().iter().enumerate() {
            serialize_vector(array, n, col, &mut payload_slots, true);
        }
        drop(payload_slots);

        // when sorting data reaches a certain size, we sort it
        if data.sorting.count * sort_layout.entry_size > SORTING_BLOCK_SIZE {
            local.sort_local(&global.buffer_manager, sort_layout)?;
        }
        Ok(())
    }

    /// Seal the remainder of a sink thread's data and publish its runs.
    pub fn combine(&self, global: &OrderGlobalState, local: &mut OrderLocalState) -> Result<()> {
        if local.data.is_none() {
            return Ok(());
        }
        local.sort_local(&global.buffer_manager, &global.sort_layout)?;
        let mut shared = global.state.lock();
        shared.runs.append(&mut local.runs);
        Ok(())
    }

    /// Merge the published runs into one and publish the total row count.
    pub fn finalize(&self, global: &OrderGlobalState) -> Result<()> {
        let runs = {
            let mut shared = global.state.lock();
            if shared.runs.len() <= 1 {
                let total = shared.runs.last().map_or(0, |run| run.len());
                shared.total_count = Some(total);
                return Ok(());
            }
            std::mem::take(&mut shared.runs)
        };
        // the merge runs outside the lock; finalize has no competitors
        let merged = merge::merge_runs(&global.buffer_manager, runs, &global.sort_layout)?;
        let total = merged.len();
        debug_assert_eq!(
            total,
            merged.payload.data.count,
            "merged payload count diverged"
        );
        let mut shared = global.state.lock();
        shared.runs.push(merged);
        shared.total_count = Some(total);
        Ok(())
    }

    pub fn get_parallel_state(&self) -> Arc<OrderParallelState> {
        Arc::new(OrderParallelState::default())
    }

    /// Upper bound of useful scan threads.
    pub fn max_threads(&self, global: &OrderGlobalState) -> usize {
        match global.total_count() {
            Some(count) => count / VECTOR_SIZE + 1,
            None => self.estimated_cardinality / VECTOR_SIZE + 1,
        }
    }

    /// A sequential scan state.
    pub fn get_operator_state(&self) -> OrderOperatorState {
        OrderOperatorState::new(None)
    }

    /// A scan state claiming row ranges from a shared parallel cursor.
    pub fn get_parallel_operator_state(
        &self,
        parallel: Arc<OrderParallelState>,
    ) -> OrderOperatorState {
        OrderOperatorState::new(Some(parallel))
    }

    /// Fetch the next sorted chunk, or `None` when the scan is exhausted.
    pub fn get_chunk(
        &self,
        global: &OrderGlobalState,
        state: &mut OrderOperatorState,
    ) -> Result<Option<DataChunk>> {
        scan::scan_chunk(global, state)
    }
}
