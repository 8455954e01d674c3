// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! The engine's simulation core: fixed-capacity memory management and the
//! rigid body physics built on top of it.
//!
//! Everything here allocates its memory up front from a
//! [`MemoryResource`](allocators::MemoryResource), usually a
//! [`LinearAllocator`](allocators::LinearAllocator) carved out of the
//! [`Platform`](platform::Platform)'s memory or a static buffer. After
//! initialization, nothing grows: capacities are picked at creation time, and
//! running out of space is reported as an error instead of reallocating.

pub mod allocators;
pub mod collections;
pub mod physics;

#[cfg(test)]
mod test_platform;
