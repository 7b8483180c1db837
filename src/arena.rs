// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{memory::MemTracker, Result};
use std::sync::Arc;

const INITIAL_CHUNK_SIZE: usize = 4 * 1_024;
const MAX_CHUNK_SIZE: usize = 512 * 1_024;

/// Allocations are aligned to the platform's pointer width so fixed-width
/// cell slots can be read without byte shuffling.
const ALIGNMENT: usize = std::mem::size_of::<usize>();

/// Handle to a region inside an [`Arena`]
///
/// A handle stays valid until the owning arena is reset or released. It is
/// a (chunk, offset) pair rather than a pointer, so holding one never
/// borrows the arena.
#[derive(Copy, Clone, Default, PartialEq, Eq, Debug)]
pub struct ArenaRef {
    chunk: u32,
    offset: u32,
}

impl ArenaRef {
    /// Packs the handle into a `u64`, e.g. to store it inside a cell slot.
    #[must_use]
    pub fn pack(self) -> u64 {
        (u64::from(self.chunk) << 32) | u64::from(self.offset)
    }

    /// Reverses [`ArenaRef::pack`].
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn unpack(bits: u64) -> Self {
        Self {
            chunk: (bits >> 32) as u32,
            offset: bits as u32,
        }
    }
}

struct Chunk {
    data: Box<[u8]>,
    used: usize,
}

impl Chunk {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0; size].into_boxed_slice(),
            used: 0,
        }
    }
}

/// Bump-allocated memory pool
///
/// Grows by doubling chunks, frees everything at once on [`Arena::reset`]
/// (chunks are retained for reuse) or [`Arena::release`] (bytes are handed
/// back to the memory tracker). There are no per-object destructors;
/// anything needing `Drop` belongs in an object pool instead.
pub struct Arena {
    chunks: Vec<Chunk>,
    current: usize,
    used: u64,
    capacity: u64,
    tracker: Arc<MemTracker>,
}

impl Arena {
    /// Creates an empty arena accounting into `tracker`.
    #[must_use]
    pub fn new(tracker: Arc<MemTracker>) -> Self {
        Self {
            chunks: Vec::new(),
            current: 0,
            used: 0,
            capacity: 0,
            tracker,
        }
    }

    /// Allocates `n` bytes, zero-initialized on first use of the chunk.
    ///
    /// Fails only when the memory tracker denies the chunk growth.
    pub fn allocate(&mut self, n: usize) -> Result<ArenaRef> {
        loop {
            if let Some(chunk) = self.chunks.get_mut(self.current) {
                let offset = align_up(chunk.used);

                if offset + n <= chunk.data.len() {
                    chunk.used = offset + n;
                    self.used += n as u64;

                    #[allow(clippy::cast_possible_truncation)]
                    return Ok(ArenaRef {
                        chunk: self.current as u32,
                        offset: offset as u32,
                    });
                }

                // Chunk exhausted; a retained chunk may follow after a reset
                if self.current + 1 < self.chunks.len() {
                    self.current += 1;
                    continue;
                }
            }

            self.grow(n)?;
        }
    }

    /// Allocates `bytes.len()` bytes and copies `bytes` into them.
    pub fn allocate_bytes(&mut self, bytes: &[u8]) -> Result<ArenaRef> {
        let handle = self.allocate(bytes.len())?;
        self.slice_mut(handle, bytes.len()).copy_from_slice(bytes);
        Ok(handle)
    }

    /// Returns the `len` bytes behind `handle`.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not address `len` live bytes.
    #[must_use]
    pub fn slice(&self, handle: ArenaRef, len: usize) -> &[u8] {
        let chunk = &self.chunks[handle.chunk as usize];
        &chunk.data[handle.offset as usize..handle.offset as usize + len]
    }

    /// Mutable variant of [`Arena::slice`].
    #[must_use]
    pub fn slice_mut(&mut self, handle: ArenaRef, len: usize) -> &mut [u8] {
        let chunk = &mut self.chunks[handle.chunk as usize];
        &mut chunk.data[handle.offset as usize..handle.offset as usize + len]
    }

    /// Frees all allocations at once, retaining the chunks for reuse.
    ///
    /// Handles created before the reset must not be used afterwards.
    pub fn reset(&mut self) {
        for chunk in &mut self.chunks {
            chunk.used = 0;
        }
        self.current = 0;
        self.used = 0;
    }

    /// Returns all memory to the tracker; the arena is empty afterwards.
    pub fn release(&mut self) {
        self.chunks.clear();
        self.current = 0;
        self.used = 0;
        self.tracker.release(self.capacity);
        self.capacity = 0;
    }

    /// Bytes currently handed out to live allocations.
    #[must_use]
    pub fn used(&self) -> u64 {
        self.used
    }

    /// Bytes held in chunks (and accounted to the tracker).
    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    fn grow(&mut self, min: usize) -> Result<()> {
        let next = self
            .chunks
            .last()
            .map_or(INITIAL_CHUNK_SIZE, |c| (c.data.len() * 2).min(MAX_CHUNK_SIZE));

        let size = next.max(align_up(min));

        self.tracker.try_consume(size as u64)?;
        self.chunks.push(Chunk::new(size));
        self.current = self.chunks.len() - 1;
        self.capacity += size as u64;

        Ok(())
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        self.release();
    }
}

fn align_up(offset: usize) -> usize {
    (offset + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}
