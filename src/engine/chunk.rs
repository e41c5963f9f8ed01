//! Fixed-size, fixed-alignment chunk allocation and recycling.
//!
//! Every combination stores its entity and component arrays inside 16 KiB
//! blocks aligned to 64 bytes. Blocks are acquired from a [`ChunkPool`] and
//! returned to it when a combination shrinks; the pool never hands memory
//! back to the OS during normal operation, it only recycles.
//!
//! ## Invariants
//! - Every pointer handed out by [`ChunkPool::acquire`] is
//!   [`CHUNK_BYTE_SIZE`] bytes, aligned to [`CHUNK_ALIGN`], and zeroed.
//! - A chunk is exclusively owned by exactly one combination at a time.
//! - All outstanding chunks must be released before the pool is dropped;
//!   the pool frees only its free list.

use std::alloc::{alloc_zeroed, dealloc, handle_alloc_error, Layout};
use std::ptr::NonNull;

use log::debug;

/// Byte size of every storage chunk.
pub const CHUNK_BYTE_SIZE: usize = 16 * 1024;
/// Alignment of every storage chunk.
pub const CHUNK_ALIGN: usize = 64;

#[inline]
fn chunk_layout() -> Layout {
    // Size and alignment are both non-zero powers-of-two constants.
    Layout::from_size_align(CHUNK_BYTE_SIZE, CHUNK_ALIGN)
        .expect("chunk layout constants are valid")
}

/// Allocator and recycler for fixed-size storage chunks.
///
/// ## Behavior
/// - `acquire` pops a recycled block if one exists, otherwise allocates a
///   fresh zeroed block.
/// - `release` zeroes nothing; blocks are re-zeroed on the next `acquire`
///   so unwritten component slots always read as zeroed plain data.
/// - Growth is unconditional: allocation failure aborts via
///   [`handle_alloc_error`], it is never reported as a recoverable error.
pub struct ChunkPool {
    free: Vec<NonNull<u8>>,
    allocated: usize,
}

// The pool owns raw heap blocks; no thread affinity is involved.
unsafe impl Send for ChunkPool {}

impl Default for ChunkPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkPool {
    /// Creates an empty pool.
    pub fn new() -> Self {
        Self { free: Vec::new(), allocated: 0 }
    }

    /// Returns a zeroed, exclusively-owned chunk.
    pub fn acquire(&mut self) -> NonNull<u8> {
        if let Some(chunk) = self.free.pop() {
            unsafe { std::ptr::write_bytes(chunk.as_ptr(), 0, CHUNK_BYTE_SIZE) };
            return chunk;
        }

        let layout = chunk_layout();
        let ptr = unsafe { alloc_zeroed(layout) };
        let Some(chunk) = NonNull::new(ptr) else {
            handle_alloc_error(layout);
        };
        self.allocated += 1;
        debug!(
            "chunk pool grew to {} blocks ({} KiB)",
            self.allocated,
            self.allocated * CHUNK_BYTE_SIZE / 1024
        );
        chunk
    }

    /// Returns a chunk to the free list for reuse.
    pub fn release(&mut self, chunk: NonNull<u8>) {
        self.free.push(chunk);
    }

    /// Total number of blocks ever allocated and still owned by the pool or
    /// its borrowers.
    #[inline]
    pub fn allocated_chunks(&self) -> usize {
        self.allocated
    }

    /// Number of blocks currently sitting on the free list.
    #[inline]
    pub fn free_chunks(&self) -> usize {
        self.free.len()
    }
}

impl Drop for ChunkPool {
    fn drop(&mut self) {
        debug_assert_eq!(
            self.free.len(),
            self.allocated,
            "chunk pool dropped with {} blocks still outstanding",
            self.allocated - self.free.len()
        );
        let layout = chunk_layout();
        for chunk in self.free.drain(..) {
            unsafe { dealloc(chunk.as_ptr(), layout) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_is_aligned_and_zeroed() {
        let mut pool = ChunkPool::new();
        let chunk = pool.acquire();
        assert_eq!(chunk.as_ptr() as usize % CHUNK_ALIGN, 0);
        let bytes = unsafe { std::slice::from_raw_parts(chunk.as_ptr(), CHUNK_BYTE_SIZE) };
        assert!(bytes.iter().all(|&b| b == 0));
        pool.release(chunk);
    }

    #[test]
    fn release_recycles_instead_of_growing() {
        let mut pool = ChunkPool::new();
        let first = pool.acquire();
        let first_addr = first.as_ptr() as usize;
        pool.release(first);
        assert_eq!(pool.free_chunks(), 1);

        let second = pool.acquire();
        assert_eq!(second.as_ptr() as usize, first_addr);
        assert_eq!(pool.allocated_chunks(), 1);
        pool.release(second);
    }

    #[test]
    fn recycled_chunks_are_rezeroed() {
        let mut pool = ChunkPool::new();
        let chunk = pool.acquire();
        unsafe { std::ptr::write_bytes(chunk.as_ptr(), 0xAB, CHUNK_BYTE_SIZE) };
        pool.release(chunk);

        let again = pool.acquire();
        let bytes = unsafe { std::slice::from_raw_parts(again.as_ptr(), CHUNK_BYTE_SIZE) };
        assert!(bytes.iter().all(|&b| b == 0));
        pool.release(again);
    }
}
