// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{cell::Cell, ffi::c_void, time::Duration};

use platform::Platform;

#[derive(Clone, Copy)]
#[repr(C, align(64))]
struct VeryAlignedThing([u8; 64]);
const VERY_ALIGNED_THING: VeryAlignedThing = VeryAlignedThing([0; 64]);

/// A [`Platform`] for tests: allocates from the global allocator, keeps count
/// of live allocations, and has a manually controlled clock.
#[derive(Default)]
pub struct TestPlatform {
    live_allocations: Cell<usize>,
    now: Cell<Duration>,
}

impl TestPlatform {
    pub fn new() -> TestPlatform {
        TestPlatform::default()
    }

    /// The amount of allocations made with `malloc` which haven't been freed.
    pub fn live_allocations(&self) -> usize {
        self.live_allocations.get()
    }

    pub fn set_elapsed(&self, now: Duration) {
        self.now.set(now);
    }
}

impl Platform for TestPlatform {
    fn malloc(&self, size: usize) -> *mut c_void {
        let count = size.div_ceil(size_of::<VeryAlignedThing>());
        let chunks: Vec<VeryAlignedThing> = vec![VERY_ALIGNED_THING; count];
        self.live_allocations.set(self.live_allocations.get() + 1);
        chunks.leak().as_mut_ptr() as *mut c_void
    }

    unsafe fn free(&self, ptr: *mut c_void, size: usize) {
        let count = size.div_ceil(size_of::<VeryAlignedThing>());
        // Safety: ptr was allocated by a Vec<VeryAlignedThing> in malloc with
        // `count` elements of length and capacity (vec! allocates exactly).
        let chunks: Vec<VeryAlignedThing> =
            unsafe { Vec::from_raw_parts(ptr as *mut VeryAlignedThing, count, count) };
        drop(chunks);
        self.live_allocations.set(self.live_allocations.get() - 1);
    }

    fn elapsed(&self) -> Duration {
        self.now.get()
    }
}
