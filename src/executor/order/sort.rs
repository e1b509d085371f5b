// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

//! The in-memory sorter.
//!
//! Sorts one continuous run: a least-significant-digit radix sort over the
//! memcmp-comparable key region, with per-column tie detection and
//! pointer-chasing tie-breaking for variable-length keys, followed by a
//! reorder pass that materializes the sidecar and payload chunks in sorted
//! order. All scratch memory is allocated as buffer-manager blocks.

use std::sync::Arc;

use tracing::debug;

use crate::buffer::{BlockReadGuard, BufferManager};
use crate::executor::evaluator::{NullOrder, OrderType};
use crate::executor::{ExecutorError, Result};
use crate::types::DataTypeKind;

use super::row_chunk::{RowDataBlock, ScratchBlock, IDX_WIDTH};
use super::serialize::{SortLayout, STRING_LEN_WIDTH, STRING_PREFIX_LEN};
use super::{SortedRun, VarKeyChunk};

fn load_row_index(data: &[u8], pos: usize, entry_size: usize, sorting_size: usize) -> usize {
    let at = pos * entry_size + sorting_size;
    u64::from_ne_bytes(data[at..at + IDX_WIDTH].try_into().unwrap()) as usize
}

/// Resolve the full serialized value of a variable-length key through the
/// row's trailing index.
fn load_blob_entry<'a>(
    data: &[u8],
    pos: usize,
    entry_size: usize,
    sorting_size: usize,
    blob: &'a [u8],
    offsets: &[u64],
) -> &'a [u8] {
    let index = load_row_index(data, pos, entry_size, sorting_size);
    let at = offsets[index] as usize;
    let len = u32::from_le_bytes(blob[at..at + STRING_LEN_WIDTH].try_into().unwrap()) as usize;
    &blob[at + STRING_LEN_WIDTH..at + STRING_LEN_WIDTH + len]
}

/// Sort the key block of a freshly sealed run.
///
/// On return the sorting entries are in order; the sidecar and payload
/// chunks still hold ingestion order and are realigned by [`reorder`].
pub(super) fn sort_in_memory(
    manager: &Arc<BufferManager>,
    run: &SortedRun,
    layout: &SortLayout,
) -> Result<()> {
    let count = run.sorting.count;
    let entry_size = layout.entry_size;
    let sorting_size = layout.sorting_size();
    let mut key_guard = manager.pin_write(run.sorting.id())?;
    let data = &mut key_guard[..count * entry_size];

    // assign an index to each row
    for i in 0..count {
        let at = i * entry_size + sorting_size;
        data[at..at + IDX_WIDTH].copy_from_slice(&(i as u64).to_ne_bytes());
    }

    if layout.all_constant() {
        radix_sort(manager, data, count, 0, sorting_size, entry_size)?;
        return Ok(());
    }

    let num_cols = layout.num_cols();
    let mut col_offset = 0;
    let mut sort_size = 0;
    let mut ties: Option<ScratchBlock> = None;
    for col in 0..num_cols {
        sort_size += layout.col_sizes[col];
        if layout.constant_size[col] && col < num_cols - 1 {
            // add columns to the sort until we reach a variable size column,
            // or the last column
            continue;
        }

        if let Some(t) = &mut ties {
            // for subsequent sorts, we subsort the tied tuples
            subsort_tied_tuples(
                manager,
                data,
                count,
                col_offset,
                sort_size,
                t.bytes_mut(),
                entry_size,
            )?;
        } else {
            // this is the first sort
            radix_sort(manager, data, count, col_offset, sort_size, entry_size)?;
        }
        if ties.is_none() {
            let mut scratch = ScratchBlock::allocate(manager, count)?;
            scratch.bytes_mut()[..count - 1].fill(1);
            scratch.bytes_mut()[count - 1] = 0;
            ties = Some(scratch);
        }
        let ties = ties.as_mut().expect("ties bitmap is initialized");

        if layout.constant_size[col] && col == num_cols - 1 {
            // all columns are sorted, no ties to break because the last
            // column is constant size
            break;
        }

        compute_ties(data, count, col_offset, sort_size, entry_size, ties.bytes_mut());
        if !any_ties(ties, count) {
            break;
        }

        break_ties(manager, run, ties.bytes_mut(), data, count, col, layout)?;
        if !any_ties(ties, count) {
            break;
        }

        col_offset += sort_size;
        sort_size = 0;
    }
    Ok(())
}

/// LSD radix sort of `count` entries over the window
/// `[col_offset, col_offset + sorting_size)` of each entry.
fn radix_sort(
    manager: &Arc<BufferManager>,
    data: &mut [u8],
    count: usize,
    col_offset: usize,
    sorting_size: usize,
    entry_size: usize,
) -> Result<()> {
    if count <= 1 || sorting_size == 0 {
        return Ok(());
    }
    let mut temp_block = ScratchBlock::allocate(manager, count * entry_size)?;
    let temp = &mut temp_block.bytes_mut()[..count * entry_size];
    let mut swap = false;

    let mut counts = [0usize; 256];
    for offset in (col_offset..col_offset + sorting_size).rev() {
        let (src, dst): (&[u8], &mut [u8]) = if !swap {
            (&*data, &mut *temp)
        } else {
            (&*temp, &mut *data)
        };
        // collect counts
        counts.fill(0);
        for i in 0..count {
            counts[src[i * entry_size + offset] as usize] += 1;
        }
        // compute offsets from counts
        for val in 1..256 {
            counts[val] += counts[val - 1];
        }
        // re-order the data into the other buffer
        for i in (0..count).rev() {
            let byte = src[i * entry_size + offset] as usize;
            counts[byte] -= 1;
            let from = i * entry_size;
            let to = counts[byte] * entry_size;
            dst[to..to + entry_size].copy_from_slice(&src[from..from + entry_size]);
        }
        swap = !swap;
    }
    // move data back to the original buffer (if it ended up swapped)
    if swap {
        data.copy_from_slice(temp);
    }
    Ok(())
}

/// `ties[i]` stays set only if rows `i` and `i + 1` are byte-equal over the
/// current sort window.
fn compute_ties(
    data: &[u8],
    count: usize,
    col_offset: usize,
    tie_size: usize,
    entry_size: usize,
    ties: &mut [u8],
) {
    debug_assert_eq!(ties[count - 1], 0);
    for i in 0..count - 1 {
        let a = &data[i * entry_size + col_offset..i * entry_size + col_offset + tie_size];
        let b = &data[(i + 1) * entry_size + col_offset..(i + 1) * entry_size + col_offset + tie_size];
        ties[i] = (ties[i] != 0 && a == b) as u8;
    }
    ties[count - 1] = 0;
}

fn any_ties(ties: &ScratchBlock, count: usize) -> bool {
    debug_assert_eq!(ties[count - 1], 0);
    ties[..count - 1].iter().any(|&t| t != 0)
}

/// Radix sort each maximal run of tied rows independently over the current
/// sort window.
fn subsort_tied_tuples(
    manager: &Arc<BufferManager>,
    data: &mut [u8],
    count: usize,
    col_offset: usize,
    sorting_size: usize,
    ties: &[u8],
    entry_size: usize,
) -> Result<()> {
    debug_assert_eq!(ties[count - 1], 0);
    let mut i = 0;
    while i < count {
        if ties[i] == 0 {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while ties[j] != 0 {
            j += 1;
        }
        // rows i..=j share the processed prefix
        radix_sort(
            manager,
            &mut data[i * entry_size..(j + 1) * entry_size],
            j - i + 1,
            col_offset,
            sorting_size,
            entry_size,
        )?;
        i = j + 1;
    }
    Ok(())
}

/// Break remaining ties of a variable-length key column by comparing the
/// full serialized values through the blob sidecar.
fn break_ties(
    manager: &Arc<BufferManager>,
    run: &SortedRun,
    ties: &mut [u8],
    data: &mut [u8],
    count: usize,
    tie_col: usize,
    layout: &SortLayout,
) -> Result<()> {
    debug_assert_eq!(ties[count - 1], 0);
    let var_chunk = run.var_keys[tie_col]
        .as_ref()
        .expect("tie-break column has a sidecar");
    let blob_guard = manager.pin_read(var_chunk.data.id())?;
    let offsets_guard = manager.pin_read(var_chunk.offsets.id())?;
    let offsets = offsets_guard.as_words();

    let mut i = 0;
    while i < count {
        if ties[i] == 0 {
            i += 1;
            continue;
        }
        let mut j = i + 1;
        while ties[j] != 0 {
            j += 1;
        }
        match layout.order_keys[tie_col].return_type.kind() {
            DataTypeKind::String => break_string_ties(
                manager,
                data,
                i,
                j + 1,
                tie_col,
                ties,
                &blob_guard,
                offsets,
                layout,
            )?,
            other => {
                return Err(ExecutorError::NotImplemented(format!(
                    "cannot sort variable size column with type {other}"
                )))
            }
        }
        i = j + 1;
    }
    Ok(())
}

/// Sort the tied rows `[start, end)` by their full string values.
#[allow(clippy::too_many_arguments)]
fn break_string_ties(
    manager: &Arc<BufferManager>,
    data: &mut [u8],
    start: usize,
    end: usize,
    tie_col: usize,
    ties: &mut [u8],
    blob: &BlockReadGuard,
    offsets: &[u64],
    layout: &SortLayout,
) -> Result<()> {
    let entry_size = layout.entry_size;
    let sorting_size = layout.sorting_size();
    let mut tie_col_offset = layout.col_offset(tie_col);
    let key = &layout.order_keys[tie_col];

    if layout.has_null[tie_col] {
        let validity = data[start * entry_size + tie_col_offset];
        match key.null_order {
            // NULLs encode as 0 under NULLS FIRST and 1 under NULLS LAST;
            // a run of NULLs is not ordered further
            NullOrder::NullsFirst if validity == 0 => return Ok(()),
            NullOrder::NullsLast if validity == 1 => return Ok(()),
            _ => {}
        }
        tie_col_offset += 1;
    }

    // if the tied strings fit the prefix entirely, the prefix already
    // ordered them
    let null_char = match key.order {
        OrderType::Ascending => 0u8,
        OrderType::Descending => 0xFF,
    };
    let prefix_at = start * entry_size + tie_col_offset;
    if data[prefix_at..prefix_at + STRING_PREFIX_LEN].contains(&null_char) {
        return Ok(());
    }

    // sort an array of row ordinals by the full string values
    let n = end - start;
    let mut ordinal_block = ScratchBlock::allocate(manager, n * IDX_WIDTH)?;
    let ordinals = &mut ordinal_block.words_mut()[..n];
    for (k, ordinal) in ordinals.iter_mut().enumerate() {
        *ordinal = (start + k) as u64;
    }
    let desc = key.order == OrderType::Descending;
    {
        let data: &[u8] = data;
        ordinals.sort_unstable_by(|&l, &r| {
            let lv = load_blob_entry(data, l as usize, entry_size, sorting_size, blob, offsets);
            let rv = load_blob_entry(data, r as usize, entry_size, sorting_size, blob, offsets);
            let ord = lv.cmp(rv);
            if desc {
                ord.reverse()
            } else {
                ord
            }
        });
    }

    // materialize the new order through a staging area
    let mut staging_block = ScratchBlock::allocate(manager, n * entry_size)?;
    let staging = &mut staging_block.bytes_mut()[..n * entry_size];
    for (k, &ordinal) in ordinals.iter().enumerate() {
        let from = ordinal as usize * entry_size;
        staging[k * entry_size..(k + 1) * entry_size]
            .copy_from_slice(&data[from..from + entry_size]);
    }
    data[start * entry_size..end * entry_size].copy_from_slice(staging);

    // determine if there are still ties (if this is not the last column)
    if tie_col < layout.num_cols() - 1 {
        for k in 0..n - 1 {
            let a = load_blob_entry(data, start + k, entry_size, sorting_size, blob, offsets);
            let b = load_blob_entry(data, start + k + 1, entry_size, sorting_size, blob, offsets);
            ties[start + k] = (a == b) as u8;
        }
    }
    Ok(())
}

/// Use the ordered sorting entries to re-order the sidecar and payload
/// chunks. The trailing index of row `k` names the ingestion-order position
/// whose data belongs at `k`.
pub(super) fn reorder(
    manager: &Arc<BufferManager>,
    run: &mut SortedRun,
    layout: &SortLayout,
) -> Result<()> {
    let count = run.sorting.count;
    let key_guard = manager.pin_read(run.sorting.id())?;

    for col in 0..run.var_keys.len() {
        if let Some(var_chunk) = &mut run.var_keys[col] {
            let (data, offsets) = reorder_variable(
                manager,
                &key_guard,
                layout,
                count,
                &var_chunk.data,
                &var_chunk.offsets,
            )?;
            *var_chunk = VarKeyChunk { data, offsets };
        }
    }

    match run.payload.offsets.take() {
        Some(old_offsets) => {
            let (data, offsets) = reorder_variable(
                manager,
                &key_guard,
                layout,
                count,
                &run.payload.data,
                &old_offsets,
            )?;
            run.payload.data = data;
            run.payload.offsets = Some(offsets);
        }
        None => {
            run.payload.data =
                reorder_fixed(manager, &key_guard, layout, count, &run.payload.data)?;
        }
    }
    debug!(count, "reordered run");
    Ok(())
}

fn reorder_fixed(
    manager: &Arc<BufferManager>,
    key_guard: &BlockReadGuard,
    layout: &SortLayout,
    count: usize,
    old: &RowDataBlock,
) -> Result<RowDataBlock> {
    let entry_size = old.entry_size();
    let old_guard = manager.pin_read(old.id())?;
    let (mut new_block, mut new_guard) =
        RowDataBlock::allocate(manager, old.capacity(), entry_size)?;
    for k in 0..count {
        let index = load_row_index(key_guard, k, layout.entry_size, layout.sorting_size());
        new_guard[k * entry_size..(k + 1) * entry_size]
            .copy_from_slice(&old_guard[index * entry_size..(index + 1) * entry_size]);
    }
    new_block.count = count;
    new_block.byte_offset = count * entry_size;
    Ok(new_block)
}

fn reorder_variable(
    manager: &Arc<BufferManager>,
    key_guard: &BlockReadGuard,
    layout: &SortLayout,
    count: usize,
    old_data: &RowDataBlock,
    old_offsets: &RowDataBlock,
) -> Result<(RowDataBlock, RowDataBlock)> {
    let old_data_guard = manager.pin_read(old_data.id())?;
    let old_offsets_guard = manager.pin_read(old_offsets.id())?;
    let offsets = old_offsets_guard.as_words();

    let (mut new_data, mut data_guard) =
        RowDataBlock::allocate(manager, old_data.capacity(), old_data.entry_size())?;
    let (mut new_offsets, mut offsets_guard) =
        RowDataBlock::allocate(manager, old_offsets.capacity(), IDX_WIDTH)?;

    let new_offset_words = offsets_guard.as_words_mut();
    new_offset_words[0] = 0;
    let mut at = 0;
    for k in 0..count {
        let index = load_row_index(key_guard, k, layout.entry_size, layout.sorting_size());
        let from = offsets[index] as usize;
        let size = (offsets[index + 1] - offsets[index]) as usize;
        data_guard[at..at + size].copy_from_slice(&old_data_guard[from..from + size]);
        at += size;
        new_offset_words[k + 1] = at as u64;
    }
    new_data.count = count;
    new_data.byte_offset = at;
    new_offsets.count = count;
    new_offsets.byte_offset = (count + 1) * IDX_WIDTH;
    Ok((new_data, new_offsets))
}
