//! A chunked, fixed-element-size slab allocator with an intrusive free
//! list — the backing store for [`crate::component::SparseComponentStore`].
//!
//! Grounded in `original_source/source/codebase/memory/memory_pool.hpp`
//! (`MemoryPool<T, Growth>`): a `Vec` of heap chunks, each
//! `chunk_size * element_size` bytes, with the free list threaded through
//! the blocks themselves (the first `size_of::<u32>()` bytes of a free
//! block hold the index of the next free block; `u32::MAX` terminates the
//! list).
#![expect(unsafe_code, reason = "raw-pointer slab allocator")]

use talon_os::mem::{alloc, dealloc, handle_alloc_error, Layout};

use crate::error::{fatal, FatalError};

const LINK_SIZE: usize = core::mem::size_of::<u32>();
const NIL: u32 = u32::MAX;

struct Chunk {
    ptr: core::ptr::NonNull<u8>,
    layout: Layout,
}

impl Chunk {
    fn alloc(layout: Layout) -> Self {
        // SAFETY: `layout` has nonzero size, checked by the caller
        // (`element_size >= LINK_SIZE` and `chunk_size >= 1`).
        let raw = unsafe { alloc(layout) };
        let Some(ptr) = core::ptr::NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        Self { ptr, layout }
    }
}

impl Drop for Chunk {
    fn drop(&mut self) {
        // SAFETY: `self.ptr`/`self.layout` are exactly what `alloc`
        // returned; the chunk is never touched again after this.
        unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
    }
}

/// Typed-but-element-erased slab: callers agree on `element_size` and
/// `element_align` up front (mirroring `register_component<T>` sizing the
/// allocator to `size_of::<T>()`/`align_of::<T>()`), then `malloc`/`free`
/// raw blocks for in-place construction/destruction by the caller.
///
/// **Invariant A1**: every block is either live (handed to the caller and
/// not yet freed) or on the free list — never both.
/// **Invariant A2**: `free(p)` requires `p` to point inside a chunk
/// owned by this allocator and to currently be live; otherwise it warns
/// and has no effect.
/// **Invariant A3**: chunks are never released until the allocator itself
/// is dropped.
pub struct FixedBlockAllocator {
    element_size: usize,
    element_align: usize,
    chunk_size: usize,
    chunks: Vec<Chunk>,
    free_head: u32,
    live_count: usize,
    label: &'static str,
}

impl FixedBlockAllocator {
    /// Creates a slab for elements of `element_size` bytes (rounded up to
    /// at least the free-list link width) and `element_align` alignment,
    /// growing by `chunk_size` elements per chunk. `label` is used only
    /// in diagnostics (the allocator/element names in [`FatalError`]).
    pub fn new(element_size: usize, element_align: usize, chunk_size: usize, label: &'static str) -> Self {
        assert!(chunk_size >= 1, "FixedBlockAllocator: chunk_size must be >= 1");
        let element_align = element_align.max(1);
        let element_size = element_size.max(LINK_SIZE);
        // Round up to a multiple of the alignment so `chunk layout` math
        // (`element_size * i`) stays aligned for every element in the chunk.
        let element_size = element_size.div_ceil(element_align) * element_align;

        Self {
            element_size,
            element_align,
            chunk_size,
            chunks: Vec::new(),
            free_head: NIL,
            live_count: 0,
            label,
        }
    }

    /// Bytes per element, rounded up from the constructor's request.
    pub fn element_size(&self) -> usize {
        self.element_size
    }

    /// Total element capacity across all allocated chunks.
    pub fn capacity(&self) -> usize {
        self.chunks.len() * self.chunk_size
    }

    /// Number of blocks currently live (handed out, not yet freed).
    pub fn len(&self) -> usize {
        self.live_count
    }

    fn chunk_layout(&self) -> Layout {
        Layout::from_size_align(self.element_size * self.chunk_size, self.element_align)
            .expect("FixedBlockAllocator: chunk layout overflow")
    }

    /// Writes the free-list link `next` into the first `LINK_SIZE` bytes
    /// of the block at global index `global`.
    ///
    /// # Safety
    /// `global` must be a valid, currently-free block index.
    unsafe fn write_link(&mut self, global: u32, next: u32) {
        let ptr = unsafe { self.block_ptr(global) };
        // SAFETY: the block is at least `LINK_SIZE` bytes and properly
        // aligned for `u32` (`element_align >= align_of::<u32>()` is not
        // guaranteed in general, but the link is written/read through an
        // unaligned access to avoid requiring it).
        unsafe { ptr.as_ptr().cast::<u32>().write_unaligned(next) };
    }

    /// # Safety
    /// `global` must currently be on the free list.
    unsafe fn read_link(&self, global: u32) -> u32 {
        let ptr = unsafe { self.block_ptr(global) };
        unsafe { ptr.as_ptr().cast::<u32>().read_unaligned() }
    }

    /// # Safety
    /// `global` must be `< self.capacity()`.
    unsafe fn block_ptr(&self, global: u32) -> core::ptr::NonNull<u8> {
        let chunk_index = global as usize / self.chunk_size;
        let offset = (global as usize % self.chunk_size) * self.element_size;
        let base = self.chunks[chunk_index].ptr;
        // SAFETY: `offset < chunk byte length`, guaranteed by the index
        // math above and the chunk layout.
        unsafe { base.add(offset) }
    }

    fn grow(&mut self) {
        let chunk_index = self.chunks.len();
        let layout = self.chunk_layout();
        self.chunks.push(Chunk::alloc(layout));

        let base = (chunk_index * self.chunk_size) as u32;
        let count = self.chunk_size as u32;
        // Thread a free list through the new chunk, highest index first so
        // the *first* `malloc` after a grow returns the chunk's first
        // block (matches the intuitive "freshly grown chunk allocates
        // front-to-back" behavior exercised by tests).
        for i in (0..count).rev() {
            let global = base + i;
            let next = if i + 1 == count { self.free_head } else { base + i + 1 };
            // SAFETY: `global` is within the chunk just pushed.
            unsafe { self.write_link(global, next) };
        }
        self.free_head = base;
    }

    /// Returns a pointer to a fresh, uninitialized block of `element_size`
    /// bytes. Grows a new chunk when the free list is empty.
    ///
    /// Fatal if total capacity would exceed `u32::MAX` blocks (the index
    /// type used for free-list links).
    pub fn malloc(&mut self) -> *mut u8 {
        if self.free_head == NIL {
            if self.capacity() + self.chunk_size > u32::MAX as usize {
                fatal!(FatalError::AllocatorExhausted {
                    allocator: "FixedBlockAllocator",
                    element: self.label,
                    capacity: self.capacity(),
                });
            }
            self.grow();
        }

        let global = self.free_head;
        // SAFETY: `global` is the current free-list head, so it is a
        // valid free block.
        self.free_head = unsafe { self.read_link(global) };
        self.live_count += 1;
        // SAFETY: `global < capacity()`.
        unsafe { self.block_ptr(global) }.as_ptr()
    }

    /// Returns `p` to the free list. `p` must have been returned by this
    /// allocator's `malloc` and not already freed; otherwise this warns
    /// and does nothing (Invariant A2 — never fatal, this is a caller
    /// bug but not one the allocator can safely recover a diagnosis for
    /// beyond a log line).
    pub fn free(&mut self, p: *mut u8) {
        let Some(global) = self.locate(p) else {
            log::warn!("FixedBlockAllocator<{}>::free: pointer not owned by this allocator", self.label);
            return;
        };

        // SAFETY: `global` was just located as a valid block index; we
        // overwrite its contents with a free-list link, which is sound
        // regardless of whether the caller already destructed the value
        // stored there (the caller owns that responsibility).
        unsafe { self.write_link(global, self.free_head) };
        self.free_head = global;
        self.live_count -= 1;
    }

    /// Finds the global block index owning `p`, if any chunk contains it.
    fn locate(&self, p: *mut u8) -> Option<u32> {
        for (chunk_index, chunk) in self.chunks.iter().enumerate() {
            let start = chunk.ptr.as_ptr() as usize;
            let end = start + chunk.layout.size();
            let addr = p as usize;
            if addr >= start && addr < end {
                let offset = addr - start;
                if offset % self.element_size != 0 {
                    return None;
                }
                let local = offset / self.element_size;
                return Some((chunk_index * self.chunk_size + local) as u32);
            }
        }
        None
    }
}

// SAFETY: `FixedBlockAllocator` owns its chunks outright (no interior
// aliasing beyond raw pointers the caller is trusted to use under the
// single-writer discipline documented on `talon_ecs` as a whole); it
// contains no thread-affine state, so it is safe to move across threads
// as long as access is externally serialized, which the crate's
// `!Sync` bound (no `unsafe impl Sync` here) already enforces.
unsafe impl Send for FixedBlockAllocator {}
