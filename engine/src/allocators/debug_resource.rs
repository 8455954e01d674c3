// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{alloc::Layout, cell::Cell, fmt::Debug, ptr::NonNull};

use tracing::{trace, warn};

use super::MemoryResource;

/// Counters kept by a [`DebugMemoryResource`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    /// Successful allocations.
    pub allocations: usize,
    /// Deallocations.
    pub deallocations: usize,
    /// Allocations which the upstream resource failed to fulfill.
    pub failed_allocations: usize,
    /// Bytes currently allocated and not yet deallocated.
    pub current_bytes: usize,
    /// The highest `current_bytes` has been.
    pub peak_bytes: usize,
}

/// A pass-through memory resource which counts the allocations going through
/// it, logs them at the trace level, and warns about memory that hasn't been
/// deallocated when it's dropped.
///
/// Note that resources like [`LinearAllocator`](super::LinearAllocator) never
/// deallocate individual allocations, so when using this to track those, the
/// leak warning is expected.
pub struct DebugMemoryResource<'a> {
    name: &'static str,
    upstream: &'a dyn MemoryResource,
    stats: Cell<MemoryStats>,
}

impl Debug for DebugMemoryResource<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("DebugMemoryResource")
            .field("name", &self.name)
            .field("stats", &self.stats.get())
            .finish_non_exhaustive()
    }
}

impl<'a> DebugMemoryResource<'a> {
    /// Creates a new debug resource wrapping `upstream`. The name is included
    /// in the logs.
    pub fn new(name: &'static str, upstream: &'a dyn MemoryResource) -> DebugMemoryResource<'a> {
        DebugMemoryResource {
            name,
            upstream,
            stats: Cell::new(MemoryStats::default()),
        }
    }

    /// Returns the counters at this point in time.
    pub fn stats(&self) -> MemoryStats {
        self.stats.get()
    }

    /// Logs a warning if there's memory that has been allocated but not
    /// deallocated through this resource. Returns true if there was.
    pub fn report_leaks(&self) -> bool {
        let stats = self.stats.get();
        if stats.current_bytes == 0 {
            return false;
        }
        warn!(
            resource = self.name,
            leaked_bytes = stats.current_bytes,
            allocations = stats.allocations,
            deallocations = stats.deallocations,
            "Memory resource has outstanding allocations.",
        );
        true
    }
}

impl MemoryResource for DebugMemoryResource<'_> {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        let mut stats = self.stats.get();
        let result = self.upstream.allocate(layout);
        if let Some(ptr) = result {
            stats.allocations += 1;
            stats.current_bytes += layout.size();
            stats.peak_bytes = stats.peak_bytes.max(stats.current_bytes);
            trace!(
                resource = self.name,
                size = layout.size(),
                align = layout.align(),
                ?ptr,
                "allocate"
            );
        } else {
            stats.failed_allocations += 1;
            warn!(
                resource = self.name,
                size = layout.size(),
                align = layout.align(),
                "Allocation failed."
            );
        }
        self.stats.set(stats);
        result
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        let mut stats = self.stats.get();
        stats.deallocations += 1;
        stats.current_bytes = stats.current_bytes.saturating_sub(layout.size());
        self.stats.set(stats);
        trace!(resource = self.name, size = layout.size(), ?ptr, "deallocate");
        // Safety: passed on from the caller, as all allocations from this
        // resource come from upstream.
        unsafe { self.upstream.deallocate(ptr, layout) };
    }
}

impl Drop for DebugMemoryResource<'_> {
    fn drop(&mut self) {
        self.report_leaks();
    }
}

#[cfg(test)]
mod tests {
    use core::alloc::Layout;

    use crate::{
        allocators::{DebugMemoryResource, MemoryResource, MemoryStats},
        test_platform::TestPlatform,
    };

    #[test]
    fn counts_allocations_and_peak() {
        let platform = TestPlatform::new();
        let debug = DebugMemoryResource::new("test", &platform);
        let small = Layout::new::<[u8; 16]>();
        let big = Layout::new::<[u8; 100]>();

        let a = debug.allocate(small).unwrap();
        let b = debug.allocate(big).unwrap();
        // Safety: allocated above with the same layouts.
        unsafe {
            debug.deallocate(b, big);
            debug.deallocate(a, small);
        }

        assert_eq!(
            MemoryStats {
                allocations: 2,
                deallocations: 2,
                failed_allocations: 0,
                current_bytes: 0,
                peak_bytes: 116,
            },
            debug.stats(),
        );
        assert!(!debug.report_leaks());
    }

    #[test]
    fn reports_outstanding_memory() {
        let platform = TestPlatform::new();
        let debug = DebugMemoryResource::new("leaky", &platform);
        let layout = Layout::new::<u64>();
        let ptr = debug.allocate(layout).unwrap();
        assert!(debug.report_leaks());
        // Safety: allocated above with the same layout.
        unsafe { debug.deallocate(ptr, layout) };
        assert!(!debug.report_leaks());
    }

    #[test]
    fn counts_failures() {
        let platform = TestPlatform::new();
        let debug = DebugMemoryResource::new("overaligned", &platform);
        assert!(debug.allocate(Layout::from_size_align(8, 4096).unwrap()).is_none());
        assert_eq!(1, debug.stats().failed_allocations);
        assert_eq!(0, debug.stats().allocations);
    }
}
