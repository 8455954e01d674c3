// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{alloc::Layout, ops::Deref, ptr::NonNull};

use super::{LinearAllocator, MemoryResource};

/// Creates a `&'static` [`StaticAllocator`] with the given amount of bytes of
/// backing memory.
///
/// Note that this creates an allocator backed by a static byte array, i.e. the
/// memory isn't dynamically allocated nor freed, it's just a big static
/// variable, *one for each call of this macro.* Generally this'll appear once
/// per binary as the "persistent arena" everything else is carved out of, and
/// once per test.
///
/// ### Example
///
/// ```
/// use engine::allocators::{static_allocator, LinearAllocator, StaticAllocator};
/// static PERSISTENT_ARENA: &StaticAllocator = static_allocator!(1024 * 1024);
/// let frame_arena = LinearAllocator::new(PERSISTENT_ARENA, 1024).unwrap();
/// assert_eq!(1024, frame_arena.total());
/// ```
#[macro_export]
macro_rules! static_allocator {
    ($size:expr) => {{
        static mut MEM: [u8; $size] = [0; $size];
        // Safety (LinearAllocator::from_raw_slice): MEM is only accessible in
        // this scope, and this scope only creates one allocator from it (since
        // this is a static initializer).
        //
        // Safety (StaticAllocator::from_allocator): from_raw_slice creates a
        // LinearAllocator without an upstream resource.
        static ALLOCATOR: $crate::allocators::StaticAllocator = unsafe {
            $crate::allocators::StaticAllocator::from_allocator(
                $crate::allocators::LinearAllocator::from_raw_slice(&raw mut MEM),
            )
        };
        &ALLOCATOR
    }};
}

pub use static_allocator;

/// [`LinearAllocator`] but shareable between threads, so that it can be
/// stored in a `static`. Created with [`static_allocator`].
pub struct StaticAllocator {
    inner: LinearAllocator<'static>,
}

impl StaticAllocator {
    /// ### Safety
    ///
    /// The `inner` allocator must not have an upstream resource.
    #[doc(hidden)]
    pub const unsafe fn from_allocator(inner: LinearAllocator<'static>) -> StaticAllocator {
        StaticAllocator { inner }
    }
}

impl Deref for StaticAllocator {
    type Target = LinearAllocator<'static>;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl MemoryResource for StaticAllocator {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        self.inner.allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        // Safety: passed on from the caller.
        unsafe { self.inner.deallocate(ptr, layout) };
    }
}

/// Safety: the parts of [`LinearAllocator`] which are not Sync are the backing
/// memory pointer and the upstream resource borrow.
/// - The backing memory pointer is fine to share between threads, because the
///   allocator hands out distinct regions using an atomic offset, and never
///   creates aliasing mutable borrows to the memory it points to.
/// - The upstream resource is not necessarily Sync, which is the reason
///   StaticAllocator's constructor requires a LinearAllocator without one.
unsafe impl Sync for StaticAllocator {}
