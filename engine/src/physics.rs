// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Rigid body physics.
//!
//! The [`PhysicsManager`] owns the simulated world. Bodies are created from
//! [`RigidBodySettings`], and are referred to with generation-checked
//! [`BodyHandle`]s, which turn stale instead of dangling when the body is
//! removed. The simulation is stepped with a fixed time step, usually driven
//! by a [`FixedTimestep`], and rendered with [`PhysicsManager::extrapolate`]
//! or [`PhysicsManager::interpolate`] in between steps.
//!
//! Collision detection has two phases:
//!
//! - The broad phase keeps the bodies in a [`BvHierarchy`] (one for moving
//!   bodies, one for static ones), and collects the pairs of colliders whose
//!   bounding boxes overlap.
//! - The narrow phase ([`collide`]) generates the contact points for each of
//!   those pairs, which are kept in [`CollisionArbiter`]s from step to step
//!   to warm start the contact solver.

mod arbiter;
mod body;
mod bvh;
mod collider;
mod error;
mod manager;
mod math;
mod narrow_phase;
mod settings;
mod solver;
mod timestep;

pub use arbiter::{ColliderPair, CollisionArbiter, Contact, PairKey};
pub use body::{
    BodyHandle, ColliderHandle, MotionHandle, MotionProperties, MotionType, RigidBody,
    RigidBodySettings, MAX_COLLIDERS_PER_BODY,
};
pub use bvh::{BvHierarchy, BvhHandle};
pub use collider::{
    Collider, ColliderKind, ColliderSettings, ColliderShape, Hull, HullFace, MassProperties,
    MAX_FACE_VERTICES, MAX_HULL_EDGES, MAX_HULL_FACES, MAX_HULL_VERTICES,
};
pub use error::{PhysicsError, PoolKind};
pub use manager::{DebugLine, PhysicsManager, PhysicsStats, RayCastHit};
pub use math::{Aabb, Ray, Transform};
pub use narrow_phase::{collide, ContactManifold, ContactPoint, MAX_CONTACTS};
pub use settings::{PhysicsLimits, PhysicsSettings};
pub use timestep::FixedTimestep;
