// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use arrayvec::ArrayVec;
use glam::{Mat3, Quat, Vec3};

use super::{
    bvh::BvhHandle, Collider, ColliderSettings, MassProperties, PhysicsError, PoolKind, Transform,
};
use crate::collections::PoolHandle;

/// Maximum amount of colliders a single rigid body can be made of.
pub const MAX_COLLIDERS_PER_BODY: usize = 8;

/// Handle to a [`RigidBody`] in a [`PhysicsManager`](super::PhysicsManager).
pub type BodyHandle = PoolHandle<RigidBody>;
pub type ColliderHandle = PoolHandle<Collider>;
pub type MotionHandle = PoolHandle<MotionProperties>;

/// How a rigid body moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MotionType {
    /// Doesn't move on its own, and isn't moved by collisions. Can still be
    /// teleported with
    /// [`PhysicsManager::set_body_transform`](super::PhysicsManager::set_body_transform).
    Static,
    /// Moves with its velocity, but isn't affected by forces, gravity, or
    /// collisions. Pushes dynamic bodies around as if it had infinite mass.
    Kinematic,
    /// Fully simulated.
    #[default]
    Dynamic,
}

/// One simulated (or static) object, made out of one or more colliders.
///
/// The public fields can be modified freely between steps, e.g. to teleport
/// the body. Any changes are picked up at the start of the next step.
#[derive(Debug, Clone)]
pub struct RigidBody {
    pub position: Vec3,
    pub orientation: Quat,
    pub friction: f32,
    pub restitution: f32,
    /// Opaque reference to whatever owns this body, e.g. a game object id.
    pub user_data: u64,
    motion_type: MotionType,
    enabled: bool,
    scale: Vec3,
    colliders: ArrayVec<ColliderHandle, MAX_COLLIDERS_PER_BODY>,
    motion: Option<MotionHandle>,
    bvh_leaf: Option<BvhHandle>,
    moved_last_frame: bool,
    /// The transform the colliders and the BVH leaf were last updated with.
    synced_position: Vec3,
    synced_orientation: Quat,
}

impl RigidBody {
    pub(crate) fn new(settings: &RigidBodySettings) -> RigidBody {
        let transform = &settings.transform;
        RigidBody {
            position: transform.position,
            orientation: transform.orientation.normalize(),
            friction: settings.friction,
            restitution: settings.restitution,
            user_data: settings.user_data,
            motion_type: settings.motion_type,
            enabled: settings.enabled,
            scale: transform.scale,
            colliders: ArrayVec::new(),
            motion: None,
            bvh_leaf: None,
            moved_last_frame: false,
            synced_position: transform.position,
            synced_orientation: transform.orientation.normalize(),
        }
    }

    pub fn motion_type(&self) -> MotionType {
        self.motion_type
    }

    pub fn is_static(&self) -> bool {
        self.motion_type == MotionType::Static
    }

    pub fn is_dynamic(&self) -> bool {
        self.motion_type == MotionType::Dynamic
    }

    pub fn is_kinematic(&self) -> bool {
        self.motion_type == MotionType::Kinematic
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Makes the body take part in the simulation again after
    /// [`RigidBody::disable`].
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Takes the body out of the simulation without removing it: it doesn't
    /// move, collide, or show up in queries until enabled again.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// The scale the body was created with. Already applied to the
    /// colliders.
    pub fn scale(&self) -> Vec3 {
        self.scale
    }

    pub fn transform(&self) -> Transform {
        Transform {
            position: self.position,
            orientation: self.orientation,
            scale: self.scale,
        }
    }

    pub fn colliders(&self) -> &[ColliderHandle] {
        &self.colliders
    }

    /// The velocity and mass properties of the body. None for static
    /// bodies.
    pub fn motion(&self) -> Option<MotionHandle> {
        self.motion
    }

    /// True if the body's transform changed during the last
    /// [`PhysicsManager::update`](super::PhysicsManager::update).
    pub fn moved_last_frame(&self) -> bool {
        self.moved_last_frame
    }

    pub(crate) fn bvh_leaf(&self) -> Option<BvhHandle> {
        self.bvh_leaf
    }

    pub(crate) fn set_bvh_leaf(&mut self, leaf: Option<BvhHandle>) {
        self.bvh_leaf = leaf;
    }

    pub(crate) fn set_motion(&mut self, motion: Option<MotionHandle>) {
        self.motion = motion;
    }

    pub(crate) fn colliders_mut(&mut self) -> &mut ArrayVec<ColliderHandle, MAX_COLLIDERS_PER_BODY> {
        &mut self.colliders
    }

    /// Returns the movement since the last call, if there was any, and marks
    /// the current transform as synced.
    pub(crate) fn take_unsynced_movement(&mut self) -> Option<Vec3> {
        if self.position == self.synced_position && self.orientation == self.synced_orientation {
            return None;
        }
        let displacement = self.position - self.synced_position;
        self.orientation = self.orientation.normalize();
        self.synced_position = self.position;
        self.synced_orientation = self.orientation;
        Some(displacement)
    }

    pub(crate) fn set_moved_last_frame(&mut self, moved: bool) {
        self.moved_last_frame = moved;
    }
}

/// The velocity, mass and damping of a dynamic or kinematic body.
#[derive(Debug, Clone)]
pub struct MotionProperties {
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    /// Fraction of the linear velocity lost per second, roughly.
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub gravity_scale: f32,
    mass: f32,
    inverse_mass: f32,
    /// In the body's local space, around the center of mass.
    local_inverse_inertia: Mat3,
    local_center_of_mass: Vec3,
    force: Vec3,
    torque: Vec3,
    previous_position: Vec3,
    previous_orientation: Quat,
}

impl MotionProperties {
    /// Creates the motion properties for a dynamic body with the given mass
    /// properties (in body space), or a kinematic body if `mass_properties`
    /// is None.
    pub(crate) fn new(
        settings: &RigidBodySettings,
        mass_properties: Option<MassProperties>,
    ) -> MotionProperties {
        let (mass, inverse_mass, local_inverse_inertia, local_center_of_mass) =
            match mass_properties {
                Some(props) => {
                    let inverse_inertia = if props.inertia.determinant().abs() > f32::EPSILON {
                        props.inertia.inverse()
                    } else {
                        Mat3::ZERO
                    };
                    (props.mass, 1.0 / props.mass, inverse_inertia, props.center_of_mass)
                }
                None => (f32::INFINITY, 0.0, Mat3::ZERO, Vec3::ZERO),
            };
        let transform = &settings.transform;
        MotionProperties {
            linear_velocity: settings.linear_velocity,
            angular_velocity: settings.angular_velocity,
            linear_damping: settings.linear_damping,
            angular_damping: settings.angular_damping,
            gravity_scale: settings.gravity_scale,
            mass,
            inverse_mass,
            local_inverse_inertia,
            local_center_of_mass,
            force: Vec3::ZERO,
            torque: Vec3::ZERO,
            previous_position: transform.position,
            previous_orientation: transform.orientation.normalize(),
        }
    }

    /// Infinite for kinematic bodies.
    pub fn mass(&self) -> f32 {
        self.mass
    }

    /// Zero for kinematic bodies.
    pub fn inverse_mass(&self) -> f32 {
        self.inverse_mass
    }

    pub fn local_center_of_mass(&self) -> Vec3 {
        self.local_center_of_mass
    }

    pub fn local_inverse_inertia(&self) -> Mat3 {
        self.local_inverse_inertia
    }

    /// The inverse inertia tensor rotated into world space.
    pub fn world_inverse_inertia(&self, orientation: Quat) -> Mat3 {
        let rotation = Mat3::from_quat(orientation);
        rotation * self.local_inverse_inertia * rotation.transpose()
    }

    /// Adds a force (in newtons, world space) to be applied at the center of
    /// mass during the next step.
    pub fn add_force(&mut self, force: Vec3) {
        self.force += force;
    }

    /// Adds a torque (world space) to be applied during the next step.
    pub fn add_torque(&mut self, torque: Vec3) {
        self.torque += torque;
    }

    /// The force accumulated for the next step.
    pub fn force(&self) -> Vec3 {
        self.force
    }

    pub fn torque(&self) -> Vec3 {
        self.torque
    }

    /// The body's position before the last step.
    pub fn previous_position(&self) -> Vec3 {
        self.previous_position
    }

    pub fn previous_orientation(&self) -> Quat {
        self.previous_orientation
    }

    pub(crate) fn clear_forces(&mut self) {
        self.force = Vec3::ZERO;
        self.torque = Vec3::ZERO;
    }

    pub(crate) fn set_previous_transform(&mut self, position: Vec3, orientation: Quat) {
        self.previous_position = position;
        self.previous_orientation = orientation;
    }
}

/// Parameters for [`PhysicsManager::create_rigid_body`](super::PhysicsManager::create_rigid_body).
#[derive(Debug, Clone)]
pub struct RigidBodySettings {
    /// Initial placement. The scale is applied to the colliders.
    pub transform: Transform,
    pub motion_type: MotionType,
    pub colliders: ArrayVec<ColliderSettings, MAX_COLLIDERS_PER_BODY>,
    pub friction: f32,
    pub restitution: f32,
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub linear_damping: f32,
    pub angular_damping: f32,
    pub gravity_scale: f32,
    pub enabled: bool,
    pub user_data: u64,
}

impl Default for RigidBodySettings {
    fn default() -> Self {
        RigidBodySettings {
            transform: Transform::IDENTITY,
            motion_type: MotionType::Dynamic,
            colliders: ArrayVec::new(),
            friction: 0.5,
            restitution: 0.0,
            linear_velocity: Vec3::ZERO,
            angular_velocity: Vec3::ZERO,
            linear_damping: 0.05,
            angular_damping: 0.05,
            gravity_scale: 1.0,
            enabled: true,
            user_data: 0,
        }
    }
}

impl RigidBodySettings {
    pub fn new(motion_type: MotionType, transform: Transform) -> RigidBodySettings {
        RigidBodySettings {
            motion_type,
            transform,
            ..Default::default()
        }
    }

    /// Adds a collider to the body, or returns
    /// [`PhysicsError::CapacityExceeded`] if the body already has
    /// [`MAX_COLLIDERS_PER_BODY`] colliders.
    pub fn with_collider(mut self, collider: ColliderSettings) -> Result<RigidBodySettings, PhysicsError> {
        (self.colliders.try_push(collider))
            .map_err(|_| PhysicsError::CapacityExceeded(PoolKind::CollidersPerBody))?;
        Ok(self)
    }

    pub fn with_friction(mut self, friction: f32) -> RigidBodySettings {
        self.friction = friction;
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> RigidBodySettings {
        self.restitution = restitution;
        self
    }

    pub fn with_linear_velocity(mut self, linear_velocity: Vec3) -> RigidBodySettings {
        self.linear_velocity = linear_velocity;
        self
    }

    pub fn with_user_data(mut self, user_data: u64) -> RigidBodySettings {
        self.user_data = user_data;
        self
    }
}
