// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    alloc::Layout,
    fmt::Debug,
    mem::MaybeUninit,
    ptr::{self, NonNull},
    slice,
    sync::atomic::{AtomicUsize, Ordering},
};

use platform::MALLOC_ALIGN;

use super::{padding_for, MemoryResource};

#[allow(unused_imports)] // used in docs
use super::{static_allocator, MultiBufferMemoryResource};

/// A linear allocator with a constant capacity. Can allocate memory regions
/// with any size or alignment (within the capacity) very fast, but individual
/// allocations can't be freed to make more space while there's still other
/// allocations in use.
///
/// The backing memory is either allocated from an upstream
/// [`MemoryResource`] (and returned to it on drop), or borrowed from a static
/// buffer via [`static_allocator`], or a region owned by something else, like
/// [`MultiBufferMemoryResource`].
pub struct LinearAllocator<'a> {
    backing_mem_ptr: *mut u8,
    backing_mem_size: usize,
    /// The resource the backing memory was allocated from. If `None`, the
    /// backing memory is not owned by this allocator.
    upstream: Option<&'a dyn MemoryResource>,
    /// The amount of bytes allocated starting from `backing_mem_ptr`. Can
    /// overflow `backing_mem_size` when the allocator reaches capacity, but in
    /// such a case, we don't even create a reference to the out-of-bounds area
    /// of memory.
    allocated: AtomicUsize,
}

impl Debug for LinearAllocator<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LinearAllocator")
            .field("backing_mem_ptr", &self.backing_mem_ptr)
            .field("backing_mem_size", &self.backing_mem_size)
            .field("allocated", &self.allocated)
            .finish_non_exhaustive()
    }
}

impl Drop for LinearAllocator<'_> {
    fn drop(&mut self) {
        if let (Some(upstream), Some(layout)) = (self.upstream, backing_layout(self.backing_mem_size)) {
            // Safety: since we have an exclusive borrow of self, there can't
            // be any borrows of allocations made from self, which means
            // nobody is using the memory anymore. The layout matches the one
            // used in the constructor.
            unsafe {
                upstream.deallocate(NonNull::new_unchecked(self.backing_mem_ptr), layout);
            }
        }
    }
}

fn backing_layout(capacity: usize) -> Option<Layout> {
    Layout::from_size_align(capacity, MALLOC_ALIGN).ok()
}

impl<'a> LinearAllocator<'a> {
    /// Creates a new [`LinearAllocator`] with `capacity` bytes of backing
    /// memory, allocated from `upstream`. Returns None if allocating the
    /// memory fails or if `capacity` overflows `isize`.
    pub fn new(upstream: &'a dyn MemoryResource, capacity: usize) -> Option<LinearAllocator<'a>> {
        let backing_mem_ptr = upstream.allocate(backing_layout(capacity)?)?;

        Some(LinearAllocator {
            backing_mem_ptr: backing_mem_ptr.as_ptr(),
            backing_mem_size: capacity,
            upstream: Some(upstream),
            allocated: AtomicUsize::new(0),
        })
    }

    /// Creates a new [`LinearAllocator`] with as many bytes of backing memory
    /// as there are in the given slice.
    ///
    /// This is the unsafe machinery behind [`static_allocator`] and
    /// [`MultiBufferMemoryResource`].
    ///
    /// Only the first [`isize::MAX`] bytes of the slice are used if it's longer
    /// than that.
    ///
    /// ### Safety
    ///
    /// The `backing_slice` pointer must not be shared, nor the memory behind
    /// it, and it must live for as long as this allocator (and any allocations
    /// from it) live. Consider this function as taking ownership of the memory
    /// pointed to by it, without the responsibility of freeing it.
    pub const unsafe fn from_raw_slice(backing_slice: *mut [u8]) -> LinearAllocator<'a> {
        LinearAllocator {
            backing_mem_ptr: backing_slice.cast::<u8>(),
            backing_mem_size: if backing_slice.len() > isize::MAX as usize {
                isize::MAX as usize
            } else {
                backing_slice.len()
            },
            upstream: None,
            allocated: AtomicUsize::new(0),
        }
    }

    /// Returns an estimate of the amount of allocated memory currently, in
    /// bytes.
    ///
    /// An "estimate" since the value returned is from an [`Ordering::Relaxed`]
    /// atomic operation. Still, the value can be considered accurate for some
    /// point in time.
    pub fn allocated(&self) -> usize {
        self.allocated
            .load(Ordering::Relaxed)
            .min(self.backing_mem_size)
    }

    /// Returns the total (free and allocated) amount of memory owned by this
    /// allocator, in bytes.
    pub fn total(&self) -> usize {
        self.backing_mem_size
    }

    /// Reserves `size` bytes aligned to `align` from the backing memory.
    ///
    /// Note regardless of if the allocation is successful, the bytes are
    /// "allocated" from the allocation offset. This means that once this
    /// returns `None`, subsequent allocations will always fail until
    /// [`LinearAllocator::clear`].
    fn bump(&self, size: usize, align: usize) -> Option<NonNull<u8>> {
        let reserved_bytes = size.checked_add(align - 1)?;
        // This is a relaxed fetch_add since we don't really care about the
        // order of allocations, all we care about is that we get distinct
        // allocation offsets between different calls. `self.allocated` may
        // overflow the capacity, but that's simply taken as a signal that the
        // allocator is full.
        let allocation_unaligned_offset =
            self.allocated.fetch_add(reserved_bytes, Ordering::Relaxed);

        // Make sure the entire reservation fits in the backing memory.
        if allocation_unaligned_offset.saturating_add(reserved_bytes) > self.backing_mem_size {
            return None;
        }

        // Safety: due to the check above, the offset is within the bounds of
        // the backing memory, which is no larger than `isize::MAX`.
        let unaligned_ptr = unsafe { self.backing_mem_ptr.add(allocation_unaligned_offset) };
        let padding = padding_for(unaligned_ptr as usize, align);
        debug_assert!(padding < align);

        // Safety: `padding + size <= reserved_bytes`, and the reservation is
        // within the backing memory as checked above.
        let aligned_ptr = unsafe { unaligned_ptr.add(padding) };
        NonNull::new(aligned_ptr)
    }

    /// Allocates memory for a slice of `MaybeUninit<T>`, leaving the contents
    /// of the slice uninitialized, returning None if there's not enough free
    /// memory.
    pub fn try_alloc_uninit_slice<T>(&self, len: usize) -> Option<&mut [MaybeUninit<T>]> {
        let size = size_of::<T>().checked_mul(len)?;
        let ptr = self.bump(size, align_of::<T>())?;

        // Safety:
        // - The pointer is non-null, aligned for T, and the `len * size_of<T>`
        //   bytes after it are within the backing memory (see `bump`).
        // - Uninitialized values are valid for `MaybeUninit<T>`.
        // - The memory referenced by this slice is not accessed through any
        //   other pointer for the duration of the borrow of self, since
        //   `self.allocated` has been bumped past the bounds of this slice,
        //   and is not reset until self is mutably borrowable again.
        Some(unsafe { slice::from_raw_parts_mut(ptr.as_ptr() as *mut MaybeUninit<T>, len) })
    }

    /// Zeroes out the memory used by previous allocations and reclaims all of
    /// the backing memory for future allocations.
    ///
    /// Values living in the allocated memory are not dropped: anything that
    /// needs dropping should be dropped by its owner (e.g. a
    /// [`FixedVec`](crate::collections::FixedVec)) before this, which the
    /// borrow checker enforces anyway for safe code.
    pub fn clear(&mut self) {
        let used = self.allocated();
        // Safety: the first `used` bytes are within the backing memory, and
        // since we have an exclusive borrow of self, there are no borrows of
        // the memory (all previous allocations have lifetimes that cannot
        // outlive the related immutable borrow of this allocator).
        unsafe { ptr::write_bytes(self.backing_mem_ptr, 0, used) };
        self.allocated.store(0, Ordering::Release);
    }
}

impl MemoryResource for LinearAllocator<'_> {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.bump(layout.size(), layout.align())
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}

#[cfg(test)]
mod tests {
    use core::alloc::Layout;

    use crate::{
        allocators::{static_allocator, LinearAllocator, MemoryResource, StaticAllocator},
        test_platform::TestPlatform,
    };

    #[test]
    fn respects_alignment() {
        static ARENA: &StaticAllocator = static_allocator!(1024);
        let alloc = LinearAllocator::new(ARENA, 256).unwrap();
        let _byte = alloc.allocate(Layout::new::<u8>()).unwrap();
        let wide = alloc.allocate(Layout::from_size_align(16, 16).unwrap()).unwrap();
        assert_eq!(0, wide.as_ptr() as usize % 16);
    }

    #[test]
    fn fails_when_full_until_cleared() {
        let platform = TestPlatform::new();
        let mut alloc = LinearAllocator::new(&platform, 64).unwrap();
        assert!(alloc.try_alloc_uninit_slice::<u8>(48).is_some());
        assert!(alloc.try_alloc_uninit_slice::<u8>(48).is_none());
        alloc.clear();
        assert_eq!(0, alloc.allocated());
        assert!(alloc.try_alloc_uninit_slice::<u8>(48).is_some());
    }

    #[test]
    fn clear_zeroes_used_memory() {
        let platform = TestPlatform::new();
        let mut alloc = LinearAllocator::new(&platform, 64).unwrap();
        let bytes = alloc.try_alloc_uninit_slice::<u8>(8).unwrap();
        for byte in bytes.iter_mut() {
            byte.write(0xAB);
        }
        alloc.clear();
        let bytes = alloc.try_alloc_uninit_slice::<u8>(8).unwrap();
        for byte in bytes {
            // Safety: clear() zeroed these bytes, and zero is a valid u8.
            assert_eq!(0, unsafe { byte.assume_init() });
        }
    }

    #[test]
    fn returns_backing_memory_on_drop() {
        let platform = TestPlatform::new();
        let alloc = LinearAllocator::new(&platform, 1000).unwrap();
        assert_eq!(1, platform.live_allocations());
        drop(alloc);
        assert_eq!(0, platform.live_allocations());
    }
}
