// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! This crate revolves around the [`Platform`] trait, which can be implemented
//! to provide a "platform implementation" for the engine: where the backing
//! memory for the engine's allocators comes from, and what time it is.
//!
//! This is split off of the main engine crate so that the engine and the
//! platform implementation can be compiled independently, which appears to
//! speed up compilation time.

#![no_std]
#![warn(missing_docs)]

use core::{ffi::c_void, time::Duration};

/// The minimum alignment of the pointers returned by [`Platform::malloc`].
///
/// Allocators built on top of the platform can rely on this for any type
/// with an alignment of up to 64 bytes without padding the allocation.
pub const MALLOC_ALIGN: usize = 64;

/// A trait for using platform-dependent features from the engine without
/// depending on any platform implementation directly.
///
/// All the functions have a `&self` parameter, so that the methods can access
/// some (possibly internally mutable) state, but still keeping the platform
/// object as widely usable as possible (a "platform" is about as global an
/// object as you get). None of these functions are (supposed to be) hot, and
/// this trait is object safe, so using &dyn [`Platform`] should be fine
/// performance-wise.
pub trait Platform {
    /// Allocates `size` bytes of memory, aligned to at least [`MALLOC_ALIGN`].
    /// Returns a null pointer if the allocation fails.
    ///
    /// The engine allocates big regions of memory rarely, and manages the
    /// regions with its own allocators, so this can be a simple wrapper for
    /// whatever the system provides.
    fn malloc(&self, size: usize) -> *mut c_void;

    /// Frees the memory allocated by [`Platform::malloc`].
    ///
    /// ### Safety
    ///
    /// - The pointer must have been returned by [`Platform::malloc`] of the
    ///   same platform, with the same `size`.
    /// - After this call, the memory behind the pointer must not be read or
    ///   written, as it's not owned by the engine anymore.
    unsafe fn free(&self, ptr: *mut c_void, size: usize);

    /// Returns the time elapsed since the platform was initialized. Must be
    /// monotonic, as the engine's fixed timestep is based on it.
    fn elapsed(&self) -> Duration;
}
