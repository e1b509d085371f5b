// Copyright 2026 Limelight Project Authors. Licensed under Apache-2.0.

//! The buffer manager.
//!
//! All large allocations of the sort path go through the [`BufferManager`]:
//! it hands out fixed-capacity byte blocks that stay addressable while
//! pinned and may be transparently spilled to disk while unpinned. Block
//! buffers are 8-byte aligned so `u64` views over offset arrays are valid.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{ArcRwLockReadGuard, ArcRwLockWriteGuard, Mutex, RawRwLock, RwLock};
use tempfile::TempDir;
use tracing::debug;

/// The allocation unit used when sizing row chunk blocks.
pub const BLOCK_ALLOC_SIZE: usize = 256 << 10;

/// Unique id of a block registered with the buffer manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockId(u64);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block-{}", self.0)
    }
}

/// The error type of buffer operations.
#[derive(thiserror::Error, Debug)]
pub enum BufferError {
    #[error("out of memory: cannot make room for {requested} bytes within limit {limit}")]
    OutOfMemory { requested: usize, limit: usize },
    #[error("unknown block: {0}")]
    UnknownBlock(BlockId),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type BufferResult<T> = std::result::Result<T, BufferError>;

/// Options of the buffer manager.
#[derive(Debug, Clone)]
pub struct BufferManagerOptions {
    /// Total bytes of block data kept in memory before unpinned blocks
    /// spill to disk.
    pub memory_limit: usize,
}

impl Default for BufferManagerOptions {
    fn default() -> Self {
        Self {
            memory_limit: 256 << 20,
        }
    }
}

/// The in-memory image of a block. `data` is `None` while spilled.
struct Frame {
    data: Option<Box<[u64]>>,
}

#[derive(Clone)]
struct BlockEntry {
    /// Requested capacity in bytes. The frame is rounded up to whole words.
    capacity: usize,
    frame: Arc<RwLock<Frame>>,
}

/// Hands out pinnable, spillable blocks of memory.
///
/// A block is *pinned* while a [`BlockReadGuard`] or [`BlockWriteGuard`] for
/// it is alive; pinned blocks are never evicted. Unpinned blocks may be
/// written to the spill directory when the memory budget is exceeded and are
/// re-materialized on the next pin.
pub struct BufferManager {
    options: BufferManagerOptions,
    next_block_id: AtomicU64,
    memory_used: AtomicUsize,
    blocks: Mutex<HashMap<BlockId, BlockEntry>>,
    spill_dir: TempDir,
}

impl BufferManager {
    pub fn new(options: BufferManagerOptions) -> BufferResult<Self> {
        Ok(Self {
            options,
            next_block_id: AtomicU64::new(0),
            memory_used: AtomicUsize::new(0),
            blocks: Mutex::new(HashMap::new()),
            spill_dir: TempDir::new()?,
        })
    }

    pub fn with_memory_limit(memory_limit: usize) -> BufferResult<Self> {
        Self::new(BufferManagerOptions { memory_limit })
    }

    /// Bytes of block data currently resident in memory.
    pub fn memory_used(&self) -> usize {
        self.memory_used.load(Ordering::Relaxed)
    }

    /// Register a new zeroed block of `n_bytes` capacity and return it pinned
    /// for writing.
    pub fn allocate(&self, n_bytes: usize) -> BufferResult<BlockWriteGuard> {
        let words = n_bytes.div_ceil(8).max(1);
        let mut blocks = self.blocks.lock();
        self.reserve_memory(&mut blocks, words * 8)?;
        let id = BlockId(self.next_block_id.fetch_add(1, Ordering::Relaxed));
        let frame = Arc::new(RwLock::new(Frame {
            data: Some(vec![0u64; words].into_boxed_slice()),
        }));
        // pin before publishing so the new block cannot be evicted first
        let guard = frame.write_arc();
        blocks.insert(
            id,
            BlockEntry {
                capacity: n_bytes,
                frame,
            },
        );
        Ok(BlockWriteGuard {
            id,
            len: n_bytes,
            guard,
        })
    }

    /// Pin a block for shared read access.
    pub fn pin_read(&self, id: BlockId) -> BufferResult<BlockReadGuard> {
        let entry = {
            let blocks = self.blocks.lock();
            blocks
                .get(&id)
                .cloned()
                .ok_or(BufferError::UnknownBlock(id))?
        };
        let guard = entry.frame.read_arc();
        if guard.data.is_some() {
            return Ok(BlockReadGuard {
                id,
                len: entry.capacity,
                guard,
            });
        }
        drop(guard);
        // the block was spilled: re-materialize it under the write lock,
        // then share the pin
        let write = self.pin_write(id)?;
        Ok(BlockReadGuard {
            id,
            len: write.len,
            guard: ArcRwLockWriteGuard::downgrade(write.guard),
        })
    }

    /// Pin a block for exclusive write access.
    pub fn pin_write(&self, id: BlockId) -> BufferResult<BlockWriteGuard> {
        let entry = {
            let blocks = self.blocks.lock();
            blocks
                .get(&id)
                .cloned()
                .ok_or(BufferError::UnknownBlock(id))?
        };
        let mut guard = entry.frame.write_arc();
        if guard.data.is_none() {
            // the block was spilled while unpinned, read it back
            let bytes = std::fs::read(self.spill_path(id))?;
            let mut blocks = self.blocks.lock();
            self.reserve_memory(&mut blocks, bytes.len())?;
            drop(blocks);
            let mut data = vec![0u64; bytes.len() / 8].into_boxed_slice();
            bytemuck::cast_slice_mut::<u64, u8>(&mut data).copy_from_slice(&bytes);
            guard.data = Some(data);
            debug!(block = %id, bytes = bytes.len(), "re-materialized spilled block");
        }
        Ok(BlockWriteGuard {
            id,
            len: entry.capacity,
            guard,
        })
    }

    /// Release a block and its spill file, refunding its memory.
    pub fn unregister(&self, id: BlockId) {
        let entry = self.blocks.lock().remove(&id);
        let Some(entry) = entry else { return };
        let mut frame = entry.frame.write();
        if let Some(data) = frame.data.take() {
            self.memory_used
                .fetch_sub(data.len() * 8, Ordering::Relaxed);
        }
        match std::fs::remove_file(self.spill_path(id)) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(block = %id, error = %e, "failed to remove spill file"),
        }
    }

    fn spill_path(&self, id: BlockId) -> PathBuf {
        self.spill_dir.path().join(format!("{}.spill", id.0))
    }

    /// Make room for `n_bytes` of new frame data, spilling unpinned blocks
    /// if necessary. Called with the block table locked so that eviction
    /// candidates cannot be unregistered concurrently.
    fn reserve_memory(
        &self,
        blocks: &mut HashMap<BlockId, BlockEntry>,
        n_bytes: usize,
    ) -> BufferResult<()> {
        let limit = self.options.memory_limit;
        if self.memory_used.load(Ordering::Relaxed) + n_bytes <= limit {
            self.memory_used.fetch_add(n_bytes, Ordering::Relaxed);
            return Ok(());
        }
        for (&id, entry) in blocks.iter() {
            // a pinned block holds the frame lock, skip it
            let Some(mut frame) = entry.frame.try_write() else {
                continue;
            };
            let Some(data) = frame.data.take() else {
                continue;
            };
            let bytes: &[u8] = bytemuck::cast_slice(&data);
            std::fs::write(self.spill_path(id), bytes)?;
            self.memory_used.fetch_sub(bytes.len(), Ordering::Relaxed);
            debug!(block = %id, bytes = bytes.len(), "spilled block");
            if self.memory_used.load(Ordering::Relaxed) + n_bytes <= limit {
                self.memory_used.fetch_add(n_bytes, Ordering::Relaxed);
                return Ok(());
            }
        }
        Err(BufferError::OutOfMemory {
            requested: n_bytes,
            limit,
        })
    }
}

/// Shared pin of a block. Derefs to the block's bytes.
pub struct BlockReadGuard {
    id: BlockId,
    len: usize,
    guard: ArcRwLockReadGuard<RawRwLock, Frame>,
}

impl BlockReadGuard {
    pub fn id(&self) -> BlockId {
        self.id
    }

    /// View the block as an array of `u64` words.
    pub fn as_words(&self) -> &[u64] {
        self.guard.data.as_deref().expect("pinned block is resident")
    }
}

impl Deref for BlockReadGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &bytemuck::cast_slice(self.as_words())[..self.len]
    }
}

/// Exclusive pin of a block. Derefs to the block's bytes.
pub struct BlockWriteGuard {
    id: BlockId,
    len: usize,
    guard: ArcRwLockWriteGuard<RawRwLock, Frame>,
}

impl fmt::Debug for BlockWriteGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockWriteGuard")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}

impl BlockWriteGuard {
    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn as_words(&self) -> &[u64] {
        self.guard.data.as_deref().expect("pinned block is resident")
    }

    pub fn as_words_mut(&mut self) -> &mut [u64] {
        self.guard
            .data
            .as_deref_mut()
            .expect("pinned block is resident")
    }
}

impl Deref for BlockWriteGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &bytemuck::cast_slice(self.as_words())[..self.len]
    }
}

impl DerefMut for BlockWriteGuard {
    fn deref_mut(&mut self) -> &mut [u8] {
        let len = self.len;
        &mut bytemuck::cast_slice_mut(self.as_words_mut())[..len]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_rw() {
        let manager = BufferManager::with_memory_limit(1 << 20).unwrap();
        let mut guard = manager.allocate(128).unwrap();
        let id = guard.id();
        guard[0] = 42;
        guard[127] = 7;
        drop(guard);

        let guard = manager.pin_read(id).unwrap();
        assert_eq!(guard.len(), 128);
        assert_eq!(guard[0], 42);
        assert_eq!(guard[127], 7);
    }

    #[test]
    fn test_spill_and_reload() {
        let manager = BufferManager::with_memory_limit(4096).unwrap();
        let mut a = manager.allocate(2048).unwrap();
        a.iter_mut().for_each(|b| *b = 0xAB);
        let a_id = a.id();
        drop(a);

        // allocating past the limit spills the unpinned block
        let b = manager.allocate(3072).unwrap();
        assert!(manager.memory_used() <= 4096);
        drop(b);

        let a = manager.pin_read(a_id).unwrap();
        assert!(a.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_out_of_memory() {
        let manager = BufferManager::with_memory_limit(4096).unwrap();
        // hold the pin so the block cannot be evicted
        let _a = manager.allocate(4096).unwrap();
        let err = manager.allocate(1024).unwrap_err();
        assert!(matches!(err, BufferError::OutOfMemory { .. }));
    }

    #[test]
    fn test_unregister_refunds_memory() {
        let manager = BufferManager::with_memory_limit(1 << 20).unwrap();
        let guard = manager.allocate(4096).unwrap();
        let id = guard.id();
        drop(guard);
        assert_eq!(manager.memory_used(), 4096);
        manager.unregister(id);
        assert_eq!(manager.memory_used(), 0);
        assert!(matches!(
            manager.pin_read(id),
            Err(BufferError::UnknownBlock(_))
        ));
    }

    #[test]
    fn test_concurrent_read_pins() {
        let manager = Arc::new(BufferManager::with_memory_limit(1 << 20).unwrap());
        let mut guard = manager.allocate(1024).unwrap();
        guard.iter_mut().enumerate().for_each(|(i, b)| *b = i as u8);
        let id = guard.id();
        drop(guard);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let manager = manager.clone();
                std::thread::spawn(move || {
                    let guard = manager.pin_read(id).unwrap();
                    assert_eq!(guard[255], 255);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
