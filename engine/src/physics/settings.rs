// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use enum_map::{enum_map, EnumMap};
use glam::Vec3;

use super::ColliderKind;

/// Capacities of the storages of a [`PhysicsManager`](super::PhysicsManager).
/// All of the memory is allocated when the manager is created, so these
/// should be picked with the whole session in mind.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsLimits {
    /// Maximum amount of rigid bodies, static ones included.
    pub bodies: u32,
    /// Maximum amount of dynamic and kinematic bodies, which need
    /// [`MotionProperties`](super::MotionProperties).
    pub moving_bodies: u32,
    /// Maximum amount of colliders of each kind.
    pub colliders: EnumMap<ColliderKind, u32>,
    /// Maximum amount of touching collider pairs per step.
    pub arbiters: u32,
    /// Maximum amount of potentially colliding collider pairs found by the
    /// broad phase per step.
    pub collider_pairs: u32,
    /// Maximum amount of bodies queued with
    /// [`PhysicsManager::queue_removal`](super::PhysicsManager::queue_removal)
    /// between two steps.
    pub pending_removals: u32,
}

impl Default for PhysicsLimits {
    fn default() -> Self {
        PhysicsLimits {
            bodies: 4096,
            moving_bodies: 4096,
            colliders: enum_map! {
                ColliderKind::Sphere => 2048,
                ColliderKind::Capsule => 1024,
                ColliderKind::Hull => 1024,
            },
            arbiters: 4096,
            collider_pairs: 8192,
            pending_removals: 256,
        }
    }
}

impl PhysicsLimits {
    /// Total amount of colliders of any kind.
    pub fn total_colliders(&self) -> u32 {
        self.colliders.values().sum()
    }
}

/// Tunables of the simulation.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicsSettings {
    /// Acceleration applied to every dynamic body, multiplied by the body's
    /// gravity scale.
    pub gravity: Vec3,
    /// Rounds of sequential impulses per step. More is stiffer and more
    /// expensive.
    pub solver_iterations: u32,
    /// Fraction of the penetration corrected per step, between 0 and 1.
    pub baumgarte: f32,
    /// Penetration depth allowed without correction, to keep resting
    /// contacts from jittering.
    pub penetration_slop: f32,
    /// Closing speed (in m/s) below which collisions don't bounce.
    pub restitution_threshold: f32,
    /// How much the BVH leaves are fattened in every direction.
    pub bvh_margin: f32,
    /// How many steps worth of movement the BVH leaves are stretched
    /// towards, in the direction the body is moving.
    pub bvh_velocity_margin_scale: f32,
    /// Height of an infinite horizontal floor that dynamic bodies can't fall
    /// through, if any.
    pub ground: Option<f32>,
}

impl Default for PhysicsSettings {
    fn default() -> Self {
        PhysicsSettings {
            gravity: Vec3::new(0.0, -9.81, 0.0),
            solver_iterations: 8,
            baumgarte: 0.2,
            penetration_slop: 0.01,
            restitution_threshold: 1.0,
            bvh_margin: 0.1,
            bvh_velocity_margin_scale: 2.0,
            ground: None,
        }
    }
}
