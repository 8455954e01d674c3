// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::fmt::{self, Display};

use super::ColliderKind;

/// The fixed-capacity storages of a [`PhysicsManager`](super::PhysicsManager).
/// Reported by [`PhysicsError::CapacityExceeded`] when one runs out of space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    /// [`PhysicsLimits::bodies`](super::PhysicsLimits::bodies).
    Bodies,
    /// [`PhysicsLimits::moving_bodies`](super::PhysicsLimits::moving_bodies).
    MotionProperties,
    /// [`PhysicsLimits::colliders`](super::PhysicsLimits::colliders) for the
    /// given kind of collider.
    Colliders(ColliderKind),
    /// The nodes of the bounding volume hierarchies. Sized based on the body
    /// limit, so this shouldn't run out before the bodies do.
    BvhNodes,
    /// [`PhysicsLimits::arbiters`](super::PhysicsLimits::arbiters). When this
    /// runs out, the contacts that didn't fit are ignored for the step.
    Arbiters,
    /// [`PhysicsLimits::collider_pairs`](super::PhysicsLimits::collider_pairs).
    /// When this runs out, the broad phase misses some potential collisions
    /// for the step.
    ColliderPairs,
    /// [`PhysicsLimits::pending_removals`](super::PhysicsLimits::pending_removals).
    PendingRemovals,
    /// [`MAX_COLLIDERS_PER_BODY`](super::MAX_COLLIDERS_PER_BODY).
    CollidersPerBody,
}

/// Errors returned by the [`PhysicsManager`](super::PhysicsManager).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicsError {
    /// One of the manager's fixed-capacity storages is full.
    ///
    /// When returned from [`PhysicsManager::update`](super::PhysicsManager::update),
    /// the step has still been simulated for every body, but some pairs of
    /// colliders may have been skipped. This can be avoided by reserving more
    /// space in [`PhysicsLimits`](super::PhysicsLimits).
    CapacityExceeded(PoolKind),
    /// The handle refers to a body which has already been removed.
    StaleHandle,
    /// A dynamic body's colliders have a total mass that is not positive and
    /// finite, or some collider's mass is negative or not finite.
    InvalidMass,
    /// A dynamic or kinematic body was created without any colliders.
    NoColliders,
    /// A collider has a degenerate shape, e.g. a zero radius, or a hull whose
    /// points are all on the same plane.
    InvalidShape,
    /// The memory resource given to
    /// [`PhysicsManager::new`](super::PhysicsManager::new) couldn't fit all the
    /// storages of the manager.
    OutOfMemory,
}

impl Display for PhysicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhysicsError::CapacityExceeded(pool) => write!(f, "physics capacity exceeded: {pool:?}"),
            PhysicsError::StaleHandle => write!(f, "the rigid body has been removed"),
            PhysicsError::InvalidMass => write!(f, "dynamic bodies need a positive, finite mass"),
            PhysicsError::NoColliders => write!(f, "non-static bodies need at least one collider"),
            PhysicsError::InvalidShape => write!(f, "collider shape is degenerate"),
            PhysicsError::OutOfMemory => write!(f, "not enough memory for the physics storages"),
        }
    }
}

impl std::error::Error for PhysicsError {}
