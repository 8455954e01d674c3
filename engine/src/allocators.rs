// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Memory resources: the allocators that all the fixed-capacity containers in
//! the engine get their backing memory from.
//!
//! The resources are layered: a [`Platform`] (or a static buffer) provides big
//! regions of memory, [`LinearAllocator`]s and [`ChunkMemoryResource`]s carve
//! them up, and [`PoolMemoryResource`] recycles same-sized blocks on top of
//! those. [`DebugMemoryResource`] can be slotted in between any two layers to
//! keep count of what goes through it.
//!
//! None of these are thread-safe: they use [`Cell`](core::cell::Cell)s
//! internally, and are meant to be used from the thread that owns the
//! simulation.

mod chunk_resource;
mod debug_resource;
mod linear_allocator;
mod multi_buffer;
mod pool_resource;
mod static_allocator;

use core::{alloc::Layout, ffi::c_void, ptr::NonNull};

use platform::{Platform, MALLOC_ALIGN};

pub use chunk_resource::ChunkMemoryResource;
pub use debug_resource::{DebugMemoryResource, MemoryStats};
pub use linear_allocator::LinearAllocator;
pub use multi_buffer::MultiBufferMemoryResource;
pub use pool_resource::PoolMemoryResource;
pub use static_allocator::{static_allocator, StaticAllocator};

/// A source of memory for the engine's containers.
///
/// Similar in spirit to the (unstable) `core::alloc::Allocator`, but with
/// `&self` receivers and no requirement to be thread-safe. Implementations
/// that can't free individual allocations (like [`LinearAllocator`]) simply
/// ignore [`MemoryResource::deallocate`].
pub trait MemoryResource {
    /// Allocates memory fitting `layout`, returning None if there's not
    /// enough free memory, or the alignment can't be satisfied.
    ///
    /// Zero-sized layouts are allowed, and may or may not consume memory.
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// Returns the memory at `ptr` to this resource.
    ///
    /// ### Safety
    ///
    /// - `ptr` must have been returned by [`MemoryResource::allocate`] of this
    ///   same resource, called with the same `layout`.
    /// - The memory must not be accessed after this call.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

impl<P: Platform + ?Sized> MemoryResource for P {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        if layout.align() > MALLOC_ALIGN {
            return None;
        }
        // Zero-sized mallocs are implementation-defined in C, so give every
        // allocation at least one byte to get a unique, non-null pointer.
        NonNull::new(self.malloc(layout.size().max(1)) as *mut u8)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // Safety: the caller guarantees that the pointer is from a matching
        // `allocate` call above, which means it's from `malloc` with this size.
        unsafe { self.free(ptr.as_ptr() as *mut c_void, layout.size().max(1)) };
    }
}

/// Returns the offset to add to `address` for it to be aligned to `align`.
/// `align` must be a power of two.
fn padding_for(address: usize, align: usize) -> usize {
    debug_assert!(align.is_power_of_two());
    address.wrapping_neg() & (align - 1)
}
