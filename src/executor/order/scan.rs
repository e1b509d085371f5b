// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

//! Scanning the sorted result.
//!
//! Each consumer thread owns an [`OrderOperatorState`] with pins on the
//! final run's payload (and offsets) block. Sequential scans advance a
//! private cursor; parallel scans claim row ranges from a shared
//! [`OrderParallelState`] and deserialize outside its lock.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::array::{ArrayBuilderImpl, DataChunk};
use crate::buffer::BlockReadGuard;
use crate::executor::{Result, VECTOR_SIZE};

use super::serialize::deserialize_rows;
use super::OrderGlobalState;

/// Shared cursor for parallel scans of the sorted result.
#[derive(Default)]
pub struct OrderParallelState {
    next_index: Mutex<usize>,
}

/// Per-consumer-thread scan state.
pub struct OrderOperatorState {
    initialized: bool,
    count: usize,
    entry_idx: usize,
    payload_guard: Option<BlockReadGuard>,
    offsets_guard: Option<BlockReadGuard>,
    payload_entry_size: usize,
    parallel: Option<Arc<OrderParallelState>>,
}

impl OrderOperatorState {
    pub(super) fn new(parallel: Option<Arc<OrderParallelState>>) -> Self {
        Self {
            initialized: false,
            count: 0,
            entry_idx: 0,
            payload_guard: None,
            offsets_guard: None,
            payload_entry_size: 0,
            parallel,
        }
    }
}

/// Serve the next batch of up to [`VECTOR_SIZE`] rows from the final run,
/// or `None` once the scan is exhausted.
pub(super) fn scan_chunk(
    global: &OrderGlobalState,
    state: &mut OrderOperatorState,
) -> Result<Option<DataChunk>> {
    if !state.initialized {
        initialize(global, state)?;
    }
    if state.count == 0 {
        return Ok(None);
    }

    let (offset, next) = match &state.parallel {
        None => {
            // sequential scan
            let offset = state.entry_idx;
            let next = VECTOR_SIZE.min(state.count.saturating_sub(offset));
            state.entry_idx += next;
            (offset, next)
        }
        Some(parallel) => {
            // claim a row range under the shared lock, deserialize after
            // releasing it
            let mut next_index = parallel.next_index.lock();
            let offset = *next_index;
            let next = VECTOR_SIZE.min(state.count.saturating_sub(offset));
            *next_index += next;
            (offset, next)
        }
    };
    if next == 0 {
        return Ok(None);
    }

    let payload = state.payload_guard.as_ref().expect("scan is initialized");
    let mut rows: Vec<&[u8]> = Vec::with_capacity(next);
    match &state.offsets_guard {
        Some(offsets_guard) => {
            let offsets = offsets_guard.as_words();
            for i in offset..offset + next {
                rows.push(&payload[offsets[i] as usize..offsets[i + 1] as usize]);
            }
        }
        None => {
            let entry_size = state.payload_entry_size;
            for i in offset..offset + next {
                rows.push(&payload[i * entry_size..(i + 1) * entry_size]);
            }
        }
    }

    let layout = &global.payload_layout;
    let mut builders: Vec<_> = layout
        .types
        .iter()
        .map(|ty| ArrayBuilderImpl::with_capacity(next, ty))
        .collect();
    deserialize_rows(&rows, layout, &mut builders);
    Ok(Some(builders.into_iter().map(|b| b.finish()).collect()))
}

/// Look up the final run and pin its payload blocks.
fn initialize(global: &OrderGlobalState, state: &mut OrderOperatorState) -> Result<()> {
    let (count, payload_id, offsets_id, entry_size) = {
        let shared = global.state.lock();
        match shared.runs.last() {
            None => (0, None, None, 0),
            Some(run) => (
                run.len(),
                Some(run.payload.data.id()),
                run.payload.offsets.as_ref().map(|block| block.id()),
                run.payload.data.entry_size(),
            ),
        }
    };
    // pin outside the global lock
    if let Some(id) = payload_id {
        state.payload_guard = Some(global.buffer_manager.pin_read(id)?);
    }
    if let Some(id) = offsets_id {
        state.offsets_guard = Some(global.buffer_manager.pin_read(id)?);
    }
    state.count = count;
    state.payload_entry_size = entry_size;
    state.initialized = true;
    Ok(())
}
