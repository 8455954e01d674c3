// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{alloc::Layout, fmt::Debug, ptr::NonNull};

use platform::MALLOC_ALIGN;

use super::{LinearAllocator, MemoryResource};

/// `N` equally sized [`LinearAllocator`]s carved out of one region of memory,
/// of which one is "current" at a time.
///
/// Meant for per-frame scratch memory which needs to stay alive for a few
/// frames after it's written, e.g. debug geometry or render commands consumed
/// by another system a frame later. Each [`MultiBufferMemoryResource::swap_buffers`]
/// moves on to the next buffer and clears it, so allocations live for `N - 1`
/// swaps.
pub struct MultiBufferMemoryResource<'a, const N: usize> {
    upstream: &'a dyn MemoryResource,
    region: NonNull<u8>,
    region_layout: Layout,
    buffers: [LinearAllocator<'a>; N],
    current: usize,
}

impl<const N: usize> Debug for MultiBufferMemoryResource<'_, N> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MultiBufferMemoryResource")
            .field("buffers", &self.buffers)
            .field("current", &self.current)
            .finish_non_exhaustive()
    }
}

impl<'a, const N: usize> MultiBufferMemoryResource<'a, N> {
    /// Allocates `N` buffers of `buffer_size` bytes each from `upstream`.
    /// Returns None if the upstream allocation fails.
    pub fn new(
        upstream: &'a dyn MemoryResource,
        buffer_size: usize,
    ) -> Option<MultiBufferMemoryResource<'a, N>> {
        const { assert!(N > 0, "a multi-buffer needs at least one buffer") };
        // Round each buffer up to MALLOC_ALIGN so that every buffer starts as
        // aligned as the region itself.
        let stride = buffer_size.checked_next_multiple_of(MALLOC_ALIGN)?;
        let region_size = stride.checked_mul(N)?;
        let region_layout = Layout::from_size_align(region_size, MALLOC_ALIGN).ok()?;
        let region = upstream.allocate(region_layout)?;

        let buffers = core::array::from_fn(|i| {
            // Safety: `i * stride + buffer_size <= region_size`, so every
            // buffer is within the region, and the buffers don't overlap.
            // The region outlives the buffers, as it's only freed in drop
            // after the buffers are no longer accessible.
            unsafe {
                let start = region.as_ptr().add(i * stride);
                LinearAllocator::from_raw_slice(core::ptr::slice_from_raw_parts_mut(
                    start,
                    buffer_size,
                ))
            }
        });

        Some(MultiBufferMemoryResource {
            upstream,
            region,
            region_layout,
            buffers,
            current: 0,
        })
    }

    /// The buffer allocations are currently made from.
    pub fn current(&self) -> &LinearAllocator<'a> {
        &self.buffers[self.current]
    }

    /// Index of the current buffer, between 0 and `N - 1`.
    pub fn current_index(&self) -> usize {
        self.current
    }

    /// Moves on to the next buffer, clearing it for reuse.
    pub fn swap_buffers(&mut self) {
        self.current = (self.current + 1) % N;
        self.buffers[self.current].clear();
    }
}

impl<const N: usize> MemoryResource for MultiBufferMemoryResource<'_, N> {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.current().allocate(layout)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}

impl<const N: usize> Drop for MultiBufferMemoryResource<'_, N> {
    fn drop(&mut self) {
        // Safety: the region was allocated from upstream with this layout in
        // the constructor, and with an exclusive borrow of self, nothing
        // allocated from the buffers can be alive anymore. The buffers don't
        // own their memory, so they won't try to free it themselves.
        unsafe { self.upstream.deallocate(self.region, self.region_layout) };
    }
}
