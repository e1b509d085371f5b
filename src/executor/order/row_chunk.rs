// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

//! Row-wise blocks and chunks.
//!
//! A [`RowDataBlock`] is a buffer-manager block tagged with its entry size
//! and population, and a [`RowChunk`] is an append-only list of such blocks
//! holding one logical table of rows. Ingestion reserves row slots through
//! [`RowChunk::build`], which yields a [`RowSlots`] view whose lifetime is
//! bound to the pinned blocks.

use std::ops::Deref;
use std::sync::Arc;

use crate::buffer::{BlockId, BlockWriteGuard, BufferManager, BLOCK_ALLOC_SIZE};
use crate::executor::Result;

/// Width in bytes of the row index trailing each sortable key entry, and of
/// the entries of size/offset chunks.
pub const IDX_WIDTH: usize = std::mem::size_of::<u64>();

/// A fixed-capacity block of row data.
///
/// For fixed-width entries `byte_offset == count * entry_size` at all times;
/// for variable-width entries `byte_offset` tracks the bytes in use. The
/// block owns its buffer-manager registration and releases it on drop.
pub struct RowDataBlock {
    manager: Arc<BufferManager>,
    id: BlockId,
    capacity: usize,
    entry_size: usize,
    pub count: usize,
    pub byte_offset: usize,
}

impl RowDataBlock {
    /// Register a zeroed block able to hold `capacity` entries of
    /// `entry_size` bytes, returning it together with its initial pin.
    pub fn allocate(
        manager: &Arc<BufferManager>,
        capacity: usize,
        entry_size: usize,
    ) -> Result<(Self, BlockWriteGuard)> {
        let guard = manager.allocate(capacity * entry_size)?;
        let block = RowDataBlock {
            manager: manager.clone(),
            id: guard.id(),
            capacity,
            entry_size,
            count: 0,
            byte_offset: 0,
        };
        Ok((block, guard))
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn byte_capacity(&self) -> usize {
        self.capacity * self.entry_size
    }
}

impl Drop for RowDataBlock {
    fn drop(&mut self) {
        self.manager.unregister(self.id);
    }
}

/// An ordered list of [`RowDataBlock`]s sharing one entry size and one
/// semantic (sortable keys, blob data, sizes, payload).
pub struct RowChunk {
    manager: Arc<BufferManager>,
    /// Entries per freshly allocated block.
    block_capacity: usize,
    entry_size: usize,
    pub count: usize,
    pub blocks: Vec<RowDataBlock>,
}

impl RowChunk {
    pub fn new(manager: Arc<BufferManager>, block_capacity: usize, entry_size: usize) -> Self {
        assert!(block_capacity > 0 && entry_size > 0);
        Self {
            manager,
            block_capacity,
            entry_size,
            count: 0,
            blocks: vec![],
        }
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Reserve `count` row slots at the tail of the chunk and return a view
    /// for writing them. `entry_sizes` supplies per-row byte sizes for
    /// variable-width chunks; fixed-width chunks reserve `entry_size` per
    /// row. Rows that do not fit the trailing block continue in fresh ones.
    pub fn build(&mut self, count: usize, entry_sizes: Option<&[usize]>) -> Result<RowSlots> {
        let mut guards: Vec<BlockWriteGuard> = vec![];
        let mut slots = Vec::with_capacity(count);
        let mut tail_pinned = false;
        for i in 0..count {
            let size = entry_sizes.map_or(self.entry_size, |sizes| sizes[i]);
            let need_new = match self.blocks.last() {
                Some(block) => {
                    block.count >= block.capacity
                        || block.byte_offset + size > block.byte_capacity()
                }
                None => true,
            };
            if need_new {
                let capacity = self.block_capacity.max(size.div_ceil(self.entry_size));
                let (block, guard) = RowDataBlock::allocate(&self.manager, capacity, self.entry_size)?;
                self.blocks.push(block);
                guards.push(guard);
                tail_pinned = true;
            } else if !tail_pinned {
                let tail = self.blocks.last().expect("tail block exists");
                guards.push(self.manager.pin_write(tail.id())?);
                tail_pinned = true;
            }
            let block = self.blocks.last_mut().expect("tail block exists");
            slots.push(Slot {
                guard: guards.len() - 1,
                offset: block.byte_offset,
                len: size,
                cursor: 0,
            });
            block.count += 1;
            block.byte_offset += size;
        }
        self.count += count;
        Ok(RowSlots { guards, slots })
    }

    /// Produce one block holding all rows of the chunk and release the
    /// originals. The chunk is left empty.
    pub fn concatenate(&mut self) -> Result<RowDataBlock> {
        let count = self.count;
        let total_bytes: usize = self.blocks.iter().map(|b| b.byte_offset).sum();
        let capacity = (BLOCK_ALLOC_SIZE / self.entry_size + 1)
            .max(count)
            .max(total_bytes.div_ceil(self.entry_size) + 1);
        let (mut new_block, mut guard) =
            RowDataBlock::allocate(&self.manager, capacity, self.entry_size)?;
        let mut pos = 0;
        for block in &self.blocks {
            let src = self.manager.pin_read(block.id())?;
            guard[pos..pos + block.byte_offset].copy_from_slice(&src[..block.byte_offset]);
            pos += block.byte_offset;
        }
        new_block.count = count;
        new_block.byte_offset = total_bytes;
        self.blocks.clear();
        self.count = 0;
        Ok(new_block)
    }

    /// Concatenate a chunk of per-row sizes and convert it in place into a
    /// `count + 1` prefix-sum offsets array; the last entry equals the total
    /// number of bytes.
    pub fn sizes_to_offsets(&mut self) -> Result<RowDataBlock> {
        debug_assert_eq!(self.entry_size, IDX_WIDTH);
        let count = self.count;
        let capacity = (BLOCK_ALLOC_SIZE / IDX_WIDTH + 1).max(count + 1);
        let (mut new_block, mut guard) =
            RowDataBlock::allocate(&self.manager, capacity, IDX_WIDTH)?;
        let mut pos = 0;
        for block in &self.blocks {
            let src = self.manager.pin_read(block.id())?;
            guard[pos..pos + block.byte_offset].copy_from_slice(&src[..block.byte_offset]);
            pos += block.byte_offset;
        }
        self.blocks.clear();
        self.count = 0;
        // convert sizes to offsets
        let offsets = guard.as_words_mut();
        if count > 0 {
            let mut prev = offsets[0];
            offsets[0] = 0;
            for i in 1..count {
                let curr = offsets[i];
                offsets[i] = offsets[i - 1] + prev;
                prev = curr;
            }
            offsets[count] = offsets[count - 1] + prev;
        }
        new_block.count = count;
        new_block.byte_offset = (count + 1) * IDX_WIDTH;
        Ok(new_block)
    }
}

struct Slot {
    guard: usize,
    offset: usize,
    len: usize,
    cursor: usize,
}

/// A view over freshly reserved row slots.
///
/// Each slot is a byte range inside one of the pinned blocks; writes append
/// at the slot's cursor. Dropping the view unpins the blocks.
pub struct RowSlots {
    guards: Vec<BlockWriteGuard>,
    slots: Vec<Slot>,
}

impl RowSlots {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot_len(&self, row: usize) -> usize {
        self.slots[row].len
    }

    /// Bytes written to the slot so far.
    pub fn written(&self, row: usize) -> usize {
        self.slots[row].cursor
    }

    /// Append `bytes` to the slot of `row`.
    pub fn write(&mut self, row: usize, bytes: &[u8]) {
        let slot = &mut self.slots[row];
        debug_assert!(slot.cursor + bytes.len() <= slot.len);
        let start = slot.offset + slot.cursor;
        self.guards[slot.guard][start..start + bytes.len()].copy_from_slice(bytes);
        slot.cursor += bytes.len();
    }

    /// Append `n` copies of `byte` to the slot of `row`.
    pub fn fill(&mut self, row: usize, byte: u8, n: usize) {
        let slot = &mut self.slots[row];
        debug_assert!(slot.cursor + n <= slot.len);
        let start = slot.offset + slot.cursor;
        self.guards[slot.guard][start..start + n].fill(byte);
        slot.cursor += n;
    }

    /// Bit-invert the last `n` bytes written to the slot of `row`.
    pub fn invert_tail(&mut self, row: usize, n: usize) {
        let slot = &self.slots[row];
        debug_assert!(n <= slot.cursor);
        let start = slot.offset + slot.cursor - n;
        for byte in &mut self.guards[slot.guard][start..start + n] {
            *byte = !*byte;
        }
    }

    /// Clear bit `bit` of the validity mask at the head of the slot of `row`.
    pub fn clear_validity_bit(&mut self, row: usize, bit: usize) {
        let slot = &self.slots[row];
        let pos = slot.offset + bit / 8;
        debug_assert!(bit / 8 < slot.len);
        self.guards[slot.guard][pos] &= !(1 << (bit % 8));
    }
}

/// A buffer-manager backed scratch allocation, kept pinned for its whole
/// lifetime and unregistered on drop. Used for the radix-sort swap area,
/// tie bitmaps and reorder staging so that scratch memory is accounted
/// like any other block.
pub struct ScratchBlock {
    manager: Arc<BufferManager>,
    guard: Option<BlockWriteGuard>,
    id: BlockId,
}

impl ScratchBlock {
    pub fn allocate(manager: &Arc<BufferManager>, n_bytes: usize) -> Result<Self> {
        let guard = manager.allocate(n_bytes)?;
        Ok(Self {
            manager: manager.clone(),
            id: guard.id(),
            guard: Some(guard),
        })
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        self.guard.as_mut().expect("scratch block is pinned")
    }

    pub fn words_mut(&mut self) -> &mut [u64] {
        self.guard
            .as_mut()
            .expect("scratch block is pinned")
            .as_words_mut()
    }
}

impl Deref for ScratchBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.guard.as_ref().expect("scratch block is pinned")
    }
}

impl Drop for ScratchBlock {
    fn drop(&mut self) {
        // unpin before unregistering
        self.guard.take();
        self.manager.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<BufferManager> {
        Arc::new(BufferManager::with_memory_limit(64 << 20).unwrap())
    }

    #[test]
    fn test_build_fixed_width() {
        let manager = manager();
        let mut chunk = RowChunk::new(manager, 4, 16);
        let mut slots = chunk.build(6, None).unwrap();
        assert_eq!(slots.len(), 6);
        for i in 0..6 {
            slots.write(i, &[i as u8; 16]);
        }
        drop(slots);
        // 4 rows in the first block, 2 in the second
        assert_eq!(chunk.blocks.len(), 2);
        assert_eq!(chunk.blocks[0].count, 4);
        assert_eq!(chunk.blocks[1].count, 2);
        assert_eq!(chunk.blocks[0].byte_offset, 64);
        assert_eq!(chunk.count, 6);
    }

    #[test]
    fn test_build_variable_width() {
        let manager = manager();
        // 8 entries of nominal size 8 => 64-byte blocks
        let mut chunk = RowChunk::new(manager, 8, 8);
        let sizes = [40usize, 40, 100];
        let mut slots = chunk.build(3, Some(&sizes)).unwrap();
        for (i, &size) in sizes.iter().enumerate() {
            slots.write(i, &vec![i as u8 + 1; size]);
        }
        drop(slots);
        // 40 + 40 > 64 and 100 > 64: three blocks, the last oversized
        assert_eq!(chunk.blocks.len(), 3);
        assert_eq!(chunk.blocks[0].byte_offset, 40);
        assert_eq!(chunk.blocks[1].byte_offset, 40);
        assert_eq!(chunk.blocks[2].byte_offset, 100);
        assert!(chunk.blocks[2].byte_capacity() >= 100);
    }

    #[test]
    fn test_concatenate() {
        let manager = manager();
        let mut chunk = RowChunk::new(manager.clone(), 2, 8);
        let mut slots = chunk.build(5, None).unwrap();
        for i in 0..5 {
            slots.write(i, &(i as u64).to_ne_bytes());
        }
        drop(slots);
        assert_eq!(chunk.blocks.len(), 3);

        let block = chunk.concatenate().unwrap();
        assert_eq!(block.count, 5);
        assert_eq!(block.byte_offset, 40);
        assert!(chunk.is_empty());
        let guard = manager.pin_read(block.id()).unwrap();
        for i in 0..5u64 {
            let at = i as usize * 8;
            assert_eq!(guard[at..at + 8], i.to_ne_bytes());
        }
    }

    #[test]
    fn test_sizes_to_offsets() {
        let manager = manager();
        let mut chunk = RowChunk::new(manager.clone(), 1024, IDX_WIDTH);
        let sizes = [3u64, 0, 7, 2];
        let mut slots = chunk.build(4, None).unwrap();
        for (i, size) in sizes.iter().enumerate() {
            slots.write(i, &size.to_ne_bytes());
        }
        drop(slots);

        let block = chunk.sizes_to_offsets().unwrap();
        assert_eq!(block.count, 4);
        let guard = manager.pin_read(block.id()).unwrap();
        let offsets = guard.as_words();
        assert_eq!(&offsets[..5], &[0, 3, 3, 10, 12]);
    }
}
