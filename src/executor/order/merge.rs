// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

//! In-memory k-way merge of sorted runs.
//!
//! Each run contributes a cursor over its key block, variable-key sidecars
//! and payload. The least cursor is selected by a column-walking comparator:
//! constant-size columns compare by their fixed bytes, variable-size columns
//! by prefix bytes and, when a saturated prefix ties, by the full value from
//! the blob sidecar. Selected entries are appended to single freshly
//! allocated target blocks, with row indices re-stamped to target positions.

use std::cmp::Ordering;
use std::sync::Arc;

use tracing::debug;

use crate::buffer::{BlockReadGuard, BlockWriteGuard, BufferManager};
use crate::executor::evaluator::{NullOrder, OrderType};
use crate::executor::Result;

use super::row_chunk::{RowDataBlock, IDX_WIDTH};
use super::serialize::{SortLayout, STRING_LEN_WIDTH};
use super::{PayloadRun, SortedRun, VarKeyChunk};

struct VarCursor {
    data: BlockReadGuard,
    offsets: BlockReadGuard,
}

/// A read position inside one sorted run. After the reorder pass the
/// sidecars and payload are aligned with the sorted key entries, so `pos`
/// addresses all of them directly.
struct RunCursor {
    key: BlockReadGuard,
    var: Vec<Option<VarCursor>>,
    payload_data: BlockReadGuard,
    payload_offsets: Option<BlockReadGuard>,
    pos: usize,
    count: usize,
}

impl RunCursor {
    fn new(manager: &Arc<BufferManager>, run: &SortedRun) -> Result<Self> {
        let key = manager.pin_read(run.sorting.id())?;
        let mut var = vec![];
        for chunk in &run.var_keys {
            var.push(match chunk {
                Some(chunk) => Some(VarCursor {
                    data: manager.pin_read(chunk.data.id())?,
                    offsets: manager.pin_read(chunk.offsets.id())?,
                }),
                None => None,
            });
        }
        let payload_data = manager.pin_read(run.payload.data.id())?;
        let payload_offsets = match &run.payload.offsets {
            Some(offsets) => Some(manager.pin_read(offsets.id())?),
            None => None,
        };
        Ok(Self {
            key,
            var,
            payload_data,
            payload_offsets,
            pos: 0,
            count: run.sorting.count,
        })
    }

    fn done(&self) -> bool {
        self.pos >= self.count
    }

    fn key_entry(&self, entry_size: usize) -> &[u8] {
        &self.key[self.pos * entry_size..(self.pos + 1) * entry_size]
    }

    /// Full serialized value (length prefix included) of the variable-size
    /// key `col` at the cursor.
    fn var_entry(&self, col: usize) -> &[u8] {
        let cursor = self.var[col].as_ref().expect("column has a sidecar");
        let offsets = cursor.offsets.as_words();
        let from = offsets[self.pos] as usize;
        let to = offsets[self.pos + 1] as usize;
        &cursor.data[from..to]
    }

    fn payload_entry(&self, entry_size: usize) -> &[u8] {
        match &self.payload_offsets {
            Some(offsets) => {
                let offsets = offsets.as_words();
                let from = offsets[self.pos] as usize;
                let to = offsets[self.pos + 1] as usize;
                &self.payload_data[from..to]
            }
            None => &self.payload_data[self.pos * entry_size..(self.pos + 1) * entry_size],
        }
    }
}

/// Compare the current entries of two cursors in sort order.
fn compare_cursors(l: &RunCursor, r: &RunCursor, layout: &SortLayout) -> Ordering {
    let le = l.key_entry(layout.entry_size);
    let re = r.key_entry(layout.entry_size);
    let mut off = 0;
    for col in 0..layout.num_cols() {
        let size = layout.col_sizes[col];
        let a = &le[off..off + size];
        let b = &re[off..off + size];
        match a.cmp(b) {
            Ordering::Equal => {
                if !layout.constant_size[col] && !var_tie_is_exact(a, col, layout) {
                    // the prefixes are saturated: resolve from the blobs
                    let key = &layout.order_keys[col];
                    let lv = blob_bytes(l.var_entry(col));
                    let rv = blob_bytes(r.var_entry(col));
                    let ord = match key.order {
                        OrderType::Ascending => lv.cmp(rv),
                        OrderType::Descending => lv.cmp(rv).reverse(),
                    };
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
            }
            ord => return ord,
        }
        off += size;
    }
    Ordering::Equal
}

/// Whether an equal pair of variable-size column prefixes already proves
/// equal values: NULLs, and strings short enough to leave a pad byte.
fn var_tie_is_exact(col_bytes: &[u8], col: usize, layout: &SortLayout) -> bool {
    let key = &layout.order_keys[col];
    let mut value_at = 0;
    if layout.has_null[col] {
        let null_byte = match key.null_order {
            NullOrder::NullsFirst => 0,
            NullOrder::NullsLast => 1,
        };
        if col_bytes[0] == null_byte {
            return true;
        }
        value_at = 1;
    }
    let pad = match key.order {
        OrderType::Ascending => 0u8,
        OrderType::Descending => 0xFF,
    };
    col_bytes[value_at..].contains(&pad)
}

fn blob_bytes(entry: &[u8]) -> &[u8] {
    &entry[STRING_LEN_WIDTH..]
}

/// A single target block under construction, with an optional offsets block
/// for variable-size entries.
struct TargetChunk {
    block: RowDataBlock,
    guard: BlockWriteGuard,
    offsets: Option<(RowDataBlock, BlockWriteGuard)>,
    at: usize,
}

impl TargetChunk {
    fn fixed(manager: &Arc<BufferManager>, capacity: usize, entry_size: usize) -> Result<Self> {
        let (block, guard) = RowDataBlock::allocate(manager, capacity, entry_size)?;
        Ok(Self {
            block,
            guard,
            offsets: None,
            at: 0,
        })
    }

    fn variable(
        manager: &Arc<BufferManager>,
        total_bytes: usize,
        entry_size: usize,
        count: usize,
    ) -> Result<Self> {
        let capacity = (total_bytes.div_ceil(entry_size) + 1).max(count);
        let (block, guard) = RowDataBlock::allocate(manager, capacity, entry_size)?;
        let (offsets_block, mut offsets_guard) =
            RowDataBlock::allocate(manager, count + 1, IDX_WIDTH)?;
        offsets_guard.as_words_mut()[0] = 0;
        Ok(Self {
            block,
            guard,
            offsets: Some((offsets_block, offsets_guard)),
            at: 0,
        })
    }

    fn append(&mut self, entry: &[u8], row: usize) {
        self.guard[self.at..self.at + entry.len()].copy_from_slice(entry);
        self.at += entry.len();
        if let Some((_, offsets_guard)) = &mut self.offsets {
            offsets_guard.as_words_mut()[row + 1] = self.at as u64;
        }
    }

    /// Seal the chunk: record counts and drop the pins.
    fn finish(self, count: usize) -> (RowDataBlock, Option<RowDataBlock>) {
        let mut block = self.block;
        block.count = count;
        block.byte_offset = self.at;
        let offsets = self.offsets.map(|(mut offsets_block, _)| {
            offsets_block.count = count;
            offsets_block.byte_offset = (count + 1) * IDX_WIDTH;
            offsets_block
        });
        (block, offsets)
    }
}

/// Merge sorted runs into one continuous run.
pub(super) fn merge_runs(
    manager: &Arc<BufferManager>,
    runs: Vec<SortedRun>,
    layout: &SortLayout,
) -> Result<SortedRun> {
    debug_assert!(runs.len() > 1);
    let total_count: usize = runs.iter().map(|run| run.sorting.count).sum();
    debug!(runs = runs.len(), total_count, "merging sorted runs");

    // size the targets from the runs' totals
    let mut key_target = TargetChunk::fixed(manager, total_count, layout.entry_size)?;
    let mut var_targets: Vec<Option<TargetChunk>> = vec![];
    for col in 0..layout.num_cols() {
        if layout.constant_size[col] {
            var_targets.push(None);
            continue;
        }
        let total_bytes: usize = runs
            .iter()
            .filter_map(|run| run.var_keys[col].as_ref())
            .map(|chunk| chunk.data.byte_offset)
            .sum();
        let entry_size = runs[0].var_keys[col]
            .as_ref()
            .expect("variable column has a sidecar")
            .data
            .entry_size();
        var_targets.push(Some(TargetChunk::variable(
            manager,
            total_bytes,
            entry_size,
            total_count,
        )?));
    }
    let payload_entry_size = runs[0].payload.data.entry_size();
    let mut payload_target = if runs[0].payload.offsets.is_some() {
        let total_bytes: usize = runs.iter().map(|run| run.payload.data.byte_offset).sum();
        TargetChunk::variable(manager, total_bytes, payload_entry_size, total_count)?
    } else {
        TargetChunk::fixed(manager, total_count, payload_entry_size)?
    };

    let mut cursors = runs
        .iter()
        .map(|run| RunCursor::new(manager, run))
        .collect::<Result<Vec<_>>>()?;

    let sorting_size = layout.sorting_size();
    for out_pos in 0..total_count {
        let mut best: Option<usize> = None;
        for (i, cursor) in cursors.iter().enumerate() {
            if cursor.done() {
                continue;
            }
            best = match best {
                None => Some(i),
                Some(b) => {
                    if compare_cursors(cursor, &cursors[b], layout) == Ordering::Less {
                        Some(i)
                    } else {
                        Some(b)
                    }
                }
            };
        }
        let best = best.expect("total count covers all cursors");
        let cursor = &cursors[best];

        // key entry with the row index re-stamped to the target position
        key_target.append(&cursor.key_entry(layout.entry_size)[..sorting_size], out_pos);
        key_target.append(&(out_pos as u64).to_ne_bytes(), out_pos);
        for (col, target) in var_targets.iter_mut().enumerate() {
            if let Some(target) = target {
                target.append(cursor.var_entry(col), out_pos);
            }
        }
        payload_target.append(cursor.payload_entry(payload_entry_size), out_pos);

        cursors[best].pos += 1;
    }
    drop(cursors);
    drop(runs);

    let (sorting, _) = key_target.finish(total_count);
    let var_keys = var_targets
        .into_iter()
        .map(|target| {
            target.map(|target| {
                let (data, offsets) = target.finish(total_count);
                VarKeyChunk {
                    data,
                    offsets: offsets.expect("variable target has offsets"),
                }
            })
        })
        .collect();
    let (payload_data, payload_offsets) = payload_target.finish(total_count);
    Ok(SortedRun {
        sorting,
        var_keys,
        payload: PayloadRun {
            data: payload_data,
            offsets: payload_offsets,
        },
    })
}
