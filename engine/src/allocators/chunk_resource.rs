// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{alloc::Layout, cell::Cell, fmt::Debug, ptr::NonNull};

use tracing::debug;

use super::{padding_for, MemoryResource};

/// Alignment of the chunks requested from upstream.
const CHUNK_ALIGN: usize = 16;

/// Stored at the start of each chunk, linking the chunks together so that
/// they can be returned to upstream on drop.
struct ChunkHeader {
    previous: Option<NonNull<ChunkHeader>>,
    size: usize,
}

/// An append-only memory resource that grows by allocating geometrically
/// bigger chunks from its upstream resource.
///
/// Individual allocations are never freed, the chunks are returned to the
/// upstream resource when this is dropped. Useful as the upstream of a
/// [`PoolMemoryResource`](super::PoolMemoryResource), when the total amount of
/// memory needed isn't known up front.
pub struct ChunkMemoryResource<'a> {
    upstream: &'a dyn MemoryResource,
    /// The most recently allocated chunk, allocations are bumped from here.
    current_chunk: Cell<Option<NonNull<ChunkHeader>>>,
    /// Offset of the first free byte in `current_chunk`.
    offset: Cell<usize>,
    next_chunk_size: Cell<usize>,
    max_chunk_size: usize,
    /// Total size of the chunks allocated from upstream.
    reserved: Cell<usize>,
}

impl Debug for ChunkMemoryResource<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ChunkMemoryResource")
            .field("next_chunk_size", &self.next_chunk_size.get())
            .field("max_chunk_size", &self.max_chunk_size)
            .field("reserved", &self.reserved.get())
            .finish_non_exhaustive()
    }
}

impl<'a> ChunkMemoryResource<'a> {
    /// Creates a new chunk resource, which will allocate its first chunk with
    /// `initial_chunk_size` bytes (at the time of the first allocation), and
    /// double the size of each following chunk up to `max_chunk_size`.
    pub fn new(
        upstream: &'a dyn MemoryResource,
        initial_chunk_size: usize,
        max_chunk_size: usize,
    ) -> ChunkMemoryResource<'a> {
        let header_size = size_of::<ChunkHeader>();
        ChunkMemoryResource {
            upstream,
            current_chunk: Cell::new(None),
            offset: Cell::new(0),
            next_chunk_size: Cell::new(initial_chunk_size.max(header_size * 2)),
            max_chunk_size: max_chunk_size.max(header_size * 2),
            reserved: Cell::new(0),
        }
    }

    /// Returns the total amount of bytes allocated from the upstream resource.
    pub fn reserved(&self) -> usize {
        self.reserved.get()
    }

    /// Bumps the allocation from the current chunk, if there's one and the
    /// allocation fits.
    fn bump(&self, layout: Layout) -> Option<NonNull<u8>> {
        let chunk = self.current_chunk.get()?;
        // Safety: chunks in `current_chunk` are initialized in `grow`.
        let chunk_size = unsafe { chunk.as_ref().size };
        let base = chunk.as_ptr() as usize;
        let offset = self.offset.get();
        let start = offset + padding_for(base + offset, layout.align());
        let end = start.checked_add(layout.size())?;
        if end > chunk_size {
            return None;
        }
        self.offset.set(end);
        // Safety: `start` is within the chunk, as `end <= chunk_size`.
        NonNull::new(unsafe { chunk.as_ptr().cast::<u8>().add(start) })
    }

    /// Allocates a new chunk big enough for the layout.
    fn grow(&self, layout: Layout) -> Option<()> {
        let header_size = size_of::<ChunkHeader>();
        let needed = header_size
            .checked_add(layout.size())?
            .checked_add(layout.align())?;
        let chunk_size = self.next_chunk_size.get().max(needed);
        let chunk_layout = Layout::from_size_align(chunk_size, CHUNK_ALIGN).ok()?;
        let chunk = self.upstream.allocate(chunk_layout)?.cast::<ChunkHeader>();

        // Safety: the chunk was just allocated with enough space for the
        // header, and the header alignment is less than CHUNK_ALIGN.
        unsafe {
            chunk.as_ptr().write(ChunkHeader {
                previous: self.current_chunk.get(),
                size: chunk_size,
            });
        }
        self.current_chunk.set(Some(chunk));
        self.offset.set(header_size);
        self.reserved.set(self.reserved.get() + chunk_size);
        self.next_chunk_size
            .set((chunk_size.saturating_mul(2)).min(self.max_chunk_size));
        debug!(chunk_size, reserved = self.reserved.get(), "Allocated a new memory chunk.");
        Some(())
    }
}

impl MemoryResource for ChunkMemoryResource<'_> {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if let Some(ptr) = self.bump(layout) {
            return Some(ptr);
        }
        self.grow(layout)?;
        self.bump(layout)
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}

impl Drop for ChunkMemoryResource<'_> {
    fn drop(&mut self) {
        let mut next = self.current_chunk.take();
        while let Some(chunk) = next {
            // Safety: the chunk list only contains initialized chunks
            // allocated from `self.upstream` with CHUNK_ALIGN and the size
            // stored in the header. Since self is being dropped, no
            // allocations from the chunks are in use anymore.
            unsafe {
                let ChunkHeader { previous, size } = chunk.as_ptr().read();
                let layout = Layout::from_size_align_unchecked(size, CHUNK_ALIGN);
                self.upstream.deallocate(chunk.cast(), layout);
                next = previous;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use core::alloc::Layout;

    use crate::{
        allocators::{ChunkMemoryResource, MemoryResource},
        test_platform::TestPlatform,
    };

    #[test]
    fn grows_geometrically_up_to_the_max() {
        let platform = TestPlatform::new();
        let chunks = ChunkMemoryResource::new(&platform, 256, 1024);
        let layout = Layout::from_size_align(100, 8).unwrap();

        chunks.allocate(layout).unwrap();
        assert_eq!(256, chunks.reserved());
        chunks.allocate(layout).unwrap();
        chunks.allocate(layout).unwrap();
        assert_eq!(256 + 512, chunks.reserved());
        for _ in 0..20 {
            chunks.allocate(layout).unwrap();
        }
        assert!(platform.live_allocations() > 2);
        let biggest_possible = 256 + 512 + 1024 * (platform.live_allocations() - 2);
        assert_eq!(biggest_possible, chunks.reserved());
    }

    #[test]
    fn fits_allocations_bigger_than_the_chunk_size() {
        let platform = TestPlatform::new();
        let chunks = ChunkMemoryResource::new(&platform, 64, 64);
        let layout = Layout::from_size_align(1000, 32).unwrap();
        let ptr = chunks.allocate(layout).unwrap();
        assert_eq!(0, ptr.as_ptr() as usize % 32);
    }

    #[test]
    fn returns_chunks_on_drop() {
        let platform = TestPlatform::new();
        let chunks = ChunkMemoryResource::new(&platform, 128, 4096);
        for _ in 0..50 {
            chunks.allocate(Layout::new::<[u32; 8]>()).unwrap();
        }
        assert!(platform.live_allocations() > 0);
        drop(chunks);
        assert_eq!(0, platform.live_allocations());
    }
}
