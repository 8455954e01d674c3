// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use std::{
    alloc::{self, Layout},
    ffi::c_void,
    ptr,
    time::{Duration, Instant},
};

use platform::{Platform, MALLOC_ALIGN};

/// A [`Platform`] on top of the standard library: memory from the global
/// allocator, time from [`Instant`].
pub struct StdPlatform {
    started: Instant,
}

impl StdPlatform {
    pub fn new() -> StdPlatform {
        StdPlatform {
            started: Instant::now(),
        }
    }
}

impl Platform for StdPlatform {
    fn malloc(&self, size: usize) -> *mut c_void {
        let Ok(layout) = Layout::from_size_align(size.max(1), MALLOC_ALIGN) else {
            return ptr::null_mut();
        };
        // Safety: the layout has a non-zero size.
        unsafe { alloc::alloc(layout) as *mut c_void }
    }

    unsafe fn free(&self, ptr: *mut c_void, size: usize) {
        let Ok(layout) = Layout::from_size_align(size.max(1), MALLOC_ALIGN) else {
            return;
        };
        // Safety: the caller guarantees that the pointer is from `malloc`
        // with the same size, so it was allocated with this layout.
        unsafe { alloc::dealloc(ptr as *mut u8, layout) };
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}
