// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{alloc::Layout, cell::Cell, fmt::Debug, ptr::NonNull};

use platform::MALLOC_ALIGN;
use tracing::trace;

use super::MemoryResource;

/// The smallest block size handed out by [`PoolMemoryResource`]. Needs to fit
/// a free list link.
const MIN_BLOCK_SIZE: usize = 8;
/// The largest block size handed out by [`PoolMemoryResource`]. Bigger
/// allocations go straight to the upstream resource.
const MAX_BLOCK_SIZE: usize = 4096;
const SIZE_CLASSES: usize =
    (MAX_BLOCK_SIZE.trailing_zeros() - MIN_BLOCK_SIZE.trailing_zeros()) as usize + 1;
/// How many bytes of blocks are requested from upstream at once when a size
/// class runs out of free blocks.
const REFILL_BYTES: usize = 16 * 1024;
/// The largest alignment requested from upstream, and thus the largest
/// alignment pooled blocks can guarantee.
const MAX_POOLED_ALIGN: usize = MALLOC_ALIGN;

/// Link stored in the first bytes of each free block.
struct FreeBlock {
    next: Option<NonNull<FreeBlock>>,
}

/// A memory resource for lots of small allocations of the same few sizes,
/// which get allocated and freed often.
///
/// Allocations are rounded up to the next power of two (between 8 and 4096
/// bytes), and each of these size classes has its own free list of blocks.
/// Freed blocks go back to their free list for reuse, and when a free list is
/// empty, a batch of new blocks is allocated from the upstream resource.
/// Blocks are never returned to the upstream, so this is best used on top of
/// a [`ChunkMemoryResource`](super::ChunkMemoryResource) or a
/// [`LinearAllocator`](super::LinearAllocator) that gets dropped or cleared
/// along with this pool.
///
/// Allocations bigger than 4096 bytes, or aligned to more than 64 bytes, are
/// passed through to the upstream resource as-is.
pub struct PoolMemoryResource<'a> {
    upstream: &'a dyn MemoryResource,
    free_lists: [Cell<Option<NonNull<FreeBlock>>>; SIZE_CLASSES],
    /// The amount of bytes requested from upstream for pooled blocks.
    pooled_bytes: Cell<usize>,
}

impl Debug for PoolMemoryResource<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PoolMemoryResource")
            .field("pooled_bytes", &self.pooled_bytes.get())
            .finish_non_exhaustive()
    }
}

impl<'a> PoolMemoryResource<'a> {
    /// Creates an empty pool. No memory is requested from `upstream` until the
    /// first allocation.
    pub fn new(upstream: &'a dyn MemoryResource) -> PoolMemoryResource<'a> {
        PoolMemoryResource {
            upstream,
            free_lists: [const { Cell::new(None) }; SIZE_CLASSES],
            pooled_bytes: Cell::new(0),
        }
    }

    /// Returns the amount of bytes this pool has requested from its upstream
    /// resource for pooled blocks. Doesn't include passed-through allocations.
    pub fn pooled_bytes(&self) -> usize {
        self.pooled_bytes.get()
    }

    /// Returns the index of the size class for the layout, or None if the
    /// layout should be passed through to the upstream resource.
    fn size_class(layout: Layout) -> Option<usize> {
        let block_size = layout
            .size()
            .max(layout.align())
            .max(MIN_BLOCK_SIZE)
            .next_power_of_two();
        if block_size > MAX_BLOCK_SIZE || layout.align() > MAX_POOLED_ALIGN {
            return None;
        }
        Some((block_size.trailing_zeros() - MIN_BLOCK_SIZE.trailing_zeros()) as usize)
    }

    fn block_size(class: usize) -> usize {
        MIN_BLOCK_SIZE << class
    }

    /// Allocates a batch of blocks for the size class from upstream and
    /// pushes them onto the free list. Returns false if upstream is out of
    /// memory.
    fn refill(&self, class: usize) -> bool {
        let block_size = Self::block_size(class);
        let batch_bytes = REFILL_BYTES.max(block_size);
        // The batch is aligned to the block size (up to MAX_POOLED_ALIGN), so
        // every block in the batch is suitably aligned for any layout in the
        // size class.
        let align = block_size.min(MAX_POOLED_ALIGN);
        let Ok(layout) = Layout::from_size_align(batch_bytes, align) else {
            return false;
        };
        let Some(batch) = self.upstream.allocate(layout) else {
            return false;
        };
        trace!(block_size, batch_bytes, "Refilled pool size class.");
        self.pooled_bytes.set(self.pooled_bytes.get() + batch_bytes);

        let free_list = &self.free_lists[class];
        for i in (0..batch_bytes / block_size).rev() {
            // Safety: `i * block_size` is within the batch, which was just
            // allocated with `batch_bytes` bytes.
            let block = unsafe { batch.as_ptr().add(i * block_size) } as *mut FreeBlock;
            // Safety: the block is at least MIN_BLOCK_SIZE bytes, aligned to
            // at least MIN_BLOCK_SIZE, and unused, so it can hold the link.
            unsafe { block.write(FreeBlock { next: free_list.get() }) };
            free_list.set(NonNull::new(block));
        }
        true
    }
}

impl MemoryResource for PoolMemoryResource<'_> {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let Some(class) = Self::size_class(layout) else {
            return self.upstream.allocate(layout);
        };

        let free_list = &self.free_lists[class];
        if free_list.get().is_none() && !self.refill(class) {
            return None;
        }

        let block = free_list.get()?;
        // Safety: blocks in the free list are initialized with a FreeBlock
        // link when they're pushed to the list, and aren't in use otherwise.
        free_list.set(unsafe { block.as_ref().next });
        Some(block.cast())
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let Some(class) = Self::size_class(layout) else {
            // Safety: the allocation was passed through to upstream as well.
            unsafe { self.upstream.deallocate(ptr, layout) };
            return;
        };

        let free_list = &self.free_lists[class];
        let block = ptr.cast::<FreeBlock>();
        // Safety: the caller guarantees the memory isn't used anymore, and
        // the block came from this size class, so it can hold the link.
        unsafe { block.as_ptr().write(FreeBlock { next: free_list.get() }) };
        free_list.set(Some(block));
    }
}
