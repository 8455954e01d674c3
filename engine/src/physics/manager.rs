// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

mod debug_draw;
mod queries;

use arrayvec::ArrayVec;
use enum_map::EnumMap;
use glam::{Quat, Vec3};
use tracing::{debug, trace, warn};

use super::{
    arbiter::ArbiterSet,
    bvh::BvHierarchy,
    collide,
    solver::{self, SolverBody},
    Aabb, BodyHandle, Collider, ColliderHandle, ColliderKind, ColliderPair, ColliderShape,
    CollisionArbiter, MassProperties, MotionProperties, MotionType, PhysicsError, PhysicsLimits,
    PhysicsSettings, PoolKind, RigidBody, RigidBodySettings, MAX_COLLIDERS_PER_BODY,
};
use crate::{
    allocators::MemoryResource,
    collections::{FixedObjectPool, FixedVec},
};

pub use debug_draw::DebugLine;
pub use queries::RayCastHit;

/// Counts of the things in a [`PhysicsManager`], for profiling overlays and
/// such.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhysicsStats {
    pub bodies: usize,
    pub dynamic_bodies: usize,
    pub colliders: usize,
    pub arbiters: usize,
    pub contacts: usize,
    /// Collider pairs found by the last step's broad phase.
    pub candidate_pairs: usize,
    pub bvh_height: u32,
}

/// The physics world: owns all the rigid bodies and their colliders, and
/// steps the simulation forward.
///
/// Each [`PhysicsManager::update`] runs one fixed-length step:
///
/// 1. Moved bodies' colliders and bounding volumes are updated, and the
///    broad phase finds the pairs of colliders whose bounding boxes overlap.
/// 2. The narrow phase tests the pairs and updates the arbiters, the
///    persistent contact state of touching pairs.
/// 3. Forces and gravity are applied, and the contacts are resolved with
///    sequential impulses.
/// 4. Positions and orientations are integrated.
///
/// All storage is allocated in [`PhysicsManager::new`], sized by the given
/// [`PhysicsLimits`].
pub struct PhysicsManager<'a> {
    limits: PhysicsLimits,
    settings: PhysicsSettings,
    bodies: FixedObjectPool<'a, RigidBody>,
    motions: FixedObjectPool<'a, MotionProperties>,
    colliders: FixedObjectPool<'a, Collider>,
    collider_counts: EnumMap<ColliderKind, u32>,
    /// Leaves for the dynamic and kinematic bodies.
    dynamic_tree: BvHierarchy<'a, BodyHandle>,
    /// Leaves for the static bodies. Only changes when static bodies are
    /// created, removed or teleported.
    static_tree: BvHierarchy<'a, BodyHandle>,
    candidates: FixedVec<'a, ColliderPair>,
    arbiters: ArbiterSet<'a>,
    /// Indexed by body handle index.
    solver_bodies: FixedVec<'a, SolverBody>,
    pending_removals: FixedVec<'a, BodyHandle>,
    /// The first storage that ran out of space during the current step.
    overflow: Option<PoolKind>,
}

impl<'a> PhysicsManager<'a> {
    /// Allocates all the storage needed for the limits from `memory`.
    pub fn new(
        memory: &'a dyn MemoryResource,
        limits: PhysicsLimits,
        settings: PhysicsSettings,
    ) -> Result<PhysicsManager<'a>, PhysicsError> {
        let oom = PhysicsError::OutOfMemory;
        let bodies = limits.bodies as usize;
        let moving_bodies = limits.moving_bodies.min(limits.bodies);
        let (margin, margin_scale) = (settings.bvh_margin, settings.bvh_velocity_margin_scale);

        let mut solver_bodies = FixedVec::new(memory, bodies).ok_or(oom)?;
        solver_bodies.fill_with_zeroes();
        let manager = PhysicsManager {
            bodies: FixedObjectPool::new(memory, bodies).ok_or(oom)?,
            motions: FixedObjectPool::new(memory, moving_bodies as usize).ok_or(oom)?,
            colliders: FixedObjectPool::new(memory, limits.total_colliders() as usize).ok_or(oom)?,
            collider_counts: EnumMap::default(),
            dynamic_tree: BvHierarchy::new(memory, moving_bodies, margin, margin_scale).ok_or(oom)?,
            static_tree: BvHierarchy::new(memory, limits.bodies, margin, 0.0).ok_or(oom)?,
            candidates: FixedVec::new(memory, limits.collider_pairs as usize).ok_or(oom)?,
            arbiters: ArbiterSet::new(memory, limits.arbiters as usize).ok_or(oom)?,
            solver_bodies,
            pending_removals: FixedVec::new(memory, limits.pending_removals as usize).ok_or(oom)?,
            overflow: None,
            limits,
            settings,
        };
        debug!("Created physics manager with limits: {:?}", manager.limits);
        Ok(manager)
    }

    pub fn limits(&self) -> &PhysicsLimits {
        &self.limits
    }

    pub fn settings(&self) -> &PhysicsSettings {
        &self.settings
    }

    /// The settings can be changed between steps, except for the BVH
    /// margins, which are fixed when the manager is created.
    pub fn settings_mut(&mut self) -> &mut PhysicsSettings {
        &mut self.settings
    }

    /// Creates a rigid body with its colliders.
    ///
    /// Nothing is created if this returns an error. Dynamic bodies need a
    /// positive total mass, and dynamic and kinematic bodies need at least
    /// one collider.
    pub fn create_rigid_body(&mut self, settings: &RigidBodySettings) -> Result<BodyHandle, PhysicsError> {
        let moving = settings.motion_type != MotionType::Static;
        if moving && settings.colliders.is_empty() {
            return Err(PhysicsError::NoColliders);
        }

        let scale = settings.transform.scale;
        let mut shapes = ArrayVec::<ColliderShape, MAX_COLLIDERS_PER_BODY>::new();
        for collider in &settings.colliders {
            shapes.push(collider.shape.scaled(scale)?);
        }

        let mass_properties = if settings.motion_type == MotionType::Dynamic {
            let mut total = MassProperties::ZERO;
            for (collider, shape) in settings.colliders.iter().zip(&shapes) {
                if !(collider.mass.is_finite() && collider.mass >= 0.0) {
                    return Err(PhysicsError::InvalidMass);
                }
                let props = (shape.mass_properties(collider.mass))
                    .transformed(collider.relative_position * scale, collider.relative_rotation);
                total = total.combined(&props);
            }
            if !(total.mass.is_finite() && total.mass > 0.0) {
                return Err(PhysicsError::InvalidMass);
            }
            Some(total)
        } else {
            None
        };

        // Check every storage first, so that nothing needs to be rolled
        // back after this.
        if self.bodies.is_full() {
            return Err(PhysicsError::CapacityExceeded(PoolKind::Bodies));
        }
        if moving && self.motions.is_full() {
            return Err(PhysicsError::CapacityExceeded(PoolKind::MotionProperties));
        }
        let mut needed_colliders = EnumMap::<ColliderKind, u32>::default();
        for shape in &shapes {
            needed_colliders[shape.kind()] += 1;
        }
        for (kind, needed) in needed_colliders {
            if self.collider_counts[kind] + needed > self.limits.colliders[kind] {
                return Err(PhysicsError::CapacityExceeded(PoolKind::Colliders(kind)));
            }
        }
        let tree = if moving { &self.dynamic_tree } else { &self.static_tree };
        if tree.is_full() {
            return Err(PhysicsError::CapacityExceeded(PoolKind::BvhNodes));
        }

        let body = RigidBody::new(settings);
        let (position, orientation) = (body.position, body.orientation);
        let handle = (self.bodies.insert(body))
            .map_err(|_| PhysicsError::CapacityExceeded(PoolKind::Bodies))?;

        let mut collider_handles = ArrayVec::<ColliderHandle, MAX_COLLIDERS_PER_BODY>::new();
        for (collider_settings, shape) in settings.colliders.iter().zip(shapes) {
            let mut collider = Collider::new(collider_settings, shape, handle);
            collider.set_relative_position(collider_settings.relative_position * scale);
            collider.update_world_transform(position, orientation);
            let kind = collider.kind();
            let collider_handle = (self.colliders.insert(collider))
                .map_err(|_| PhysicsError::CapacityExceeded(PoolKind::Colliders(kind)))?;
            self.collider_counts[kind] += 1;
            collider_handles.push(collider_handle);
        }

        let motion = if moving {
            let motion = MotionProperties::new(settings, mass_properties);
            Some((self.motions.insert(motion))
                .map_err(|_| PhysicsError::CapacityExceeded(PoolKind::MotionProperties))?)
        } else {
            None
        };

        let Some(body) = self.bodies.get_mut(handle) else {
            return Err(PhysicsError::StaleHandle);
        };
        *body.colliders_mut() = collider_handles;
        body.set_motion(motion);
        let aabb = body_aabb(&self.colliders, body);
        let tree = if moving { &mut self.dynamic_tree } else { &mut self.static_tree };
        let leaf = tree.insert(aabb, handle);
        body.set_bvh_leaf(leaf);
        if leaf.is_none() {
            let _ = self.remove_rigid_body(handle);
            return Err(PhysicsError::CapacityExceeded(PoolKind::BvhNodes));
        }

        debug!("Created {:?} rigid body {handle:?}.", settings.motion_type);
        Ok(handle)
    }

    /// Removes the body, its colliders, and any contacts it had, right
    /// away.
    pub fn remove_rigid_body(&mut self, handle: BodyHandle) -> Result<(), PhysicsError> {
        let body = self.bodies.remove(handle).ok_or(PhysicsError::StaleHandle)?;
        for &collider_handle in body.colliders() {
            if let Some(collider) = self.colliders.remove(collider_handle) {
                self.collider_counts[collider.kind()] -= 1;
            }
        }
        if let Some(leaf) = body.bvh_leaf() {
            let tree = if body.is_static() { &mut self.static_tree } else { &mut self.dynamic_tree };
            tree.remove(leaf);
        }
        if let Some(motion) = body.motion() {
            self.motions.remove(motion);
        }
        self.arbiters.remove_body(handle);
        self.candidates.retain(|pair| {
            !body.colliders().contains(&pair.first) && !body.colliders().contains(&pair.second)
        });
        debug!("Removed rigid body {handle:?}.");
        Ok(())
    }

    /// Queues the body for removal at the end of the next
    /// [`PhysicsManager::update`]. Useful when the body is found while
    /// iterating over the bodies.
    pub fn queue_removal(&mut self, handle: BodyHandle) -> Result<(), PhysicsError> {
        if !self.bodies.contains(handle) {
            return Err(PhysicsError::StaleHandle);
        }
        if self.pending_removals.contains(&handle) {
            return Ok(());
        }
        (self.pending_removals.push(handle))
            .map_err(|_| PhysicsError::CapacityExceeded(PoolKind::PendingRemovals))
    }

    /// Moves the body to the given place right away, without affecting its
    /// velocity. Interpolation starts from the new transform as well.
    pub fn set_body_transform(
        &mut self,
        handle: BodyHandle,
        position: Vec3,
        orientation: Quat,
    ) -> Result<(), PhysicsError> {
        let body = self.bodies.get_mut(handle).ok_or(PhysicsError::StaleHandle)?;
        body.position = position;
        body.orientation = orientation.normalize();
        if let Some(motion) = body.motion().and_then(|motion| self.motions.get_mut(motion)) {
            motion.set_previous_transform(body.position, body.orientation);
        }
        self.sync_bodies(false);
        Ok(())
    }

    pub fn body(&self, handle: BodyHandle) -> Option<&RigidBody> {
        self.bodies.get(handle)
    }

    /// Mutable access to the body. Changes to the transform are picked up
    /// at the start of the next step.
    pub fn body_mut(&mut self, handle: BodyHandle) -> Option<&mut RigidBody> {
        self.bodies.get_mut(handle)
    }

    /// The velocity and mass properties of a dynamic or kinematic body.
    pub fn motion(&self, handle: BodyHandle) -> Option<&MotionProperties> {
        self.motions.get(self.bodies.get(handle)?.motion()?)
    }

    pub fn motion_mut(&mut self, handle: BodyHandle) -> Option<&mut MotionProperties> {
        self.motions.get_mut(self.bodies.get(handle)?.motion()?)
    }

    /// Adds a force to be applied during the next step. Does nothing for
    /// static bodies.
    pub fn add_force(&mut self, handle: BodyHandle, force: Vec3) -> Result<(), PhysicsError> {
        let body = self.bodies.get(handle).ok_or(PhysicsError::StaleHandle)?;
        if let Some(motion) = body.motion().and_then(|motion| self.motions.get_mut(motion)) {
            motion.add_force(force);
        }
        Ok(())
    }

    /// Adds a torque to be applied during the next step. Does nothing for
    /// static bodies.
    pub fn add_torque(&mut self, handle: BodyHandle, torque: Vec3) -> Result<(), PhysicsError> {
        let body = self.bodies.get(handle).ok_or(PhysicsError::StaleHandle)?;
        if let Some(motion) = body.motion().and_then(|motion| self.motions.get_mut(motion)) {
            motion.add_torque(torque);
        }
        Ok(())
    }

    /// Sets the velocity of a dynamic or kinematic body. Does nothing for
    /// static bodies.
    pub fn set_linear_velocity(&mut self, handle: BodyHandle, velocity: Vec3) -> Result<(), PhysicsError> {
        let body = self.bodies.get(handle).ok_or(PhysicsError::StaleHandle)?;
        if let Some(motion) = body.motion().and_then(|motion| self.motions.get_mut(motion)) {
            motion.linear_velocity = velocity;
        }
        Ok(())
    }

    /// Enables or disables the body. Disabled bodies keep their state, but
    /// don't move, collide, or show up in queries.
    pub fn set_enabled(&mut self, handle: BodyHandle, enabled: bool) -> Result<(), PhysicsError> {
        let body = self.bodies.get_mut(handle).ok_or(PhysicsError::StaleHandle)?;
        if enabled {
            body.enable();
        } else {
            body.disable();
            self.arbiters.remove_body(handle);
        }
        Ok(())
    }

    pub fn collider(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.colliders.get(handle)
    }

    pub fn bodies(&self) -> impl Iterator<Item = (BodyHandle, &RigidBody)> + '_ {
        self.bodies.iter()
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn arbiter_count(&self) -> usize {
        self.arbiters.len()
    }

    /// The contacts between touching colliders, as of the last step.
    pub fn arbiters(&self) -> &[CollisionArbiter] {
        self.arbiters.arbiters()
    }

    pub fn stats(&self) -> PhysicsStats {
        let arbiters = self.arbiters.arbiters();
        PhysicsStats {
            bodies: self.bodies.len(),
            dynamic_bodies: self.bodies.iter().filter(|(_, body)| body.is_dynamic()).count(),
            colliders: self.colliders.len(),
            arbiters: arbiters.len(),
            contacts: arbiters.iter().map(|arbiter| arbiter.contacts().len()).sum(),
            candidate_pairs: self.candidates.len(),
            bvh_height: self.dynamic_tree.height(),
        }
    }

    /// Removes all bodies.
    pub fn clear(&mut self) {
        loop {
            // In batches, since the pool can't be modified while iterating.
            let handles = (self.bodies.handles().take(64)).collect::<ArrayVec<BodyHandle, 64>>();
            if handles.is_empty() {
                break;
            }
            for handle in handles {
                let _ = self.remove_rigid_body(handle);
            }
        }
        self.pending_removals.clear();
        self.candidates.clear();
        self.arbiters.clear();
    }

    /// Advances the simulation by `dt` seconds.
    ///
    /// If some storage runs out of space during the step, the step is still
    /// finished for every body, but some contacts may have been skipped, and
    /// [`PhysicsError::CapacityExceeded`] is returned.
    pub fn update(&mut self, dt: f32) -> Result<(), PhysicsError> {
        if !(dt.is_finite() && dt > 0.0) {
            warn!("Ignoring physics update with a time step of {dt} seconds.");
            return Ok(());
        }
        self.overflow = None;

        self.sync_bodies(true);
        self.find_candidate_pairs();
        self.update_arbiters();
        self.apply_forces(dt);
        self.solve_contacts(dt);
        self.apply_ground_constraint();
        self.integrate(dt);
        self.sync_bodies(false);
        self.process_removals();

        trace!(
            "Physics step done: {} candidate pairs, {} arbiters.",
            self.candidates.len(),
            self.arbiters.len(),
        );
        match self.overflow.take() {
            Some(pool) => Err(PhysicsError::CapacityExceeded(pool)),
            None => Ok(()),
        }
    }

    fn record_overflow(&mut self, pool: PoolKind) {
        if self.overflow.is_none() {
            warn!("Physics storage {pool:?} is full, some collisions are skipped this step.");
            self.overflow = Some(pool);
        }
    }

    /// Updates the colliders and BVH leaves of bodies whose transform has
    /// changed since the last sync.
    fn sync_bodies(&mut self, reset_moved_flags: bool) {
        let PhysicsManager {
            bodies,
            colliders,
            dynamic_tree,
            static_tree,
            ..
        } = self;
        for (_, body) in bodies.iter_mut() {
            if reset_moved_flags {
                body.set_moved_last_frame(false);
            }
            let Some(displacement) = body.take_unsynced_movement() else {
                continue;
            };
            body.set_moved_last_frame(true);
            for &collider_handle in body.colliders() {
                if let Some(collider) = colliders.get_mut(collider_handle) {
                    collider.update_world_transform(body.position, body.orientation);
                }
            }
            let aabb = body_aabb(colliders, body);
            if let Some(leaf) = body.bvh_leaf() {
                let tree = if body.is_static() { &mut *static_tree } else { &mut *dynamic_tree };
                tree.update_if_moved(leaf, aabb, displacement);
            }
        }
    }

    /// The broad phase: collects the pairs of colliders of different bodies
    /// whose bounding boxes overlap, where at least one of the bodies is
    /// dynamic. Each pair is found once.
    fn find_candidate_pairs(&mut self) {
        let PhysicsManager {
            bodies,
            colliders,
            dynamic_tree,
            static_tree,
            candidates,
            ..
        } = self;
        candidates.clear();

        let mut full = false;
        for (handle, body) in bodies.iter() {
            if body.is_static() || !body.is_enabled() {
                continue;
            }
            let Some(fat_aabb) = body.bvh_leaf().and_then(|leaf| dynamic_tree.fat_aabb(leaf)) else {
                continue;
            };
            dynamic_tree.query_aabb(&fat_aabb, |_, other_handle| {
                // The other body finds this pair when it's the lower index.
                if other_handle.index() <= handle.index() {
                    return true;
                }
                let Some(other) = bodies.get(other_handle) else {
                    return true;
                };
                if !body.is_dynamic() && !other.is_dynamic() {
                    return true;
                }
                full = !push_overlapping_colliders(colliders, body, other, candidates);
                !full
            });
            if full {
                break;
            }
            if !body.is_dynamic() {
                continue;
            }
            static_tree.query_aabb(&fat_aabb, |_, other_handle| {
                let Some(other) = bodies.get(other_handle) else {
                    return true;
                };
                full = !push_overlapping_colliders(colliders, body, other, candidates);
                !full
            });
            if full {
                break;
            }
        }

        candidates.sort_unstable_by_key(|pair| pair.key);
        if full {
            self.record_overflow(PoolKind::ColliderPairs);
        }
    }

    /// The narrow phase: tests the candidate pairs, and replaces the
    /// arbiters with the touching ones.
    fn update_arbiters(&mut self) {
        let PhysicsManager {
            bodies,
            colliders,
            candidates,
            arbiters,
            ..
        } = self;
        let result = arbiters.update(candidates, |pair| {
            let a = colliders.get(pair.first)?;
            let b = colliders.get(pair.second)?;
            let manifold = collide(a, b);
            if manifold.is_empty() {
                return None;
            }
            let (body_a, body_b) = (bodies.get(a.body())?, bodies.get(b.body())?);
            let friction = (body_a.friction * body_b.friction).max(0.0).sqrt();
            let restitution = body_a.restitution.max(body_b.restitution);
            let pair_bodies = (a.body(), b.body());
            Some(CollisionArbiter::new(*pair, pair_bodies, &manifold, friction, restitution))
        });
        if let Err(pool) = result {
            self.record_overflow(pool);
        }
    }

    /// Applies gravity, forces and damping to the velocities of dynamic
    /// bodies, and fills out the solver bodies.
    fn apply_forces(&mut self, dt: f32) {
        let PhysicsManager {
            bodies,
            motions,
            solver_bodies,
            settings,
            ..
        } = self;
        for (handle, body) in bodies.iter() {
            let solver_body = &mut solver_bodies[handle.index() as usize];
            *solver_body = SolverBody::default();
            if !body.is_enabled() {
                continue;
            }
            let Some(motion) = body.motion().and_then(|motion| motions.get_mut(motion)) else {
                continue;
            };
            let inverse_inertia = motion.world_inverse_inertia(body.orientation);
            if body.is_dynamic() {
                let acceleration =
                    settings.gravity * motion.gravity_scale + motion.force() * motion.inverse_mass();
                motion.linear_velocity += acceleration * dt;
                motion.angular_velocity += inverse_inertia * motion.torque() * dt;
                motion.linear_velocity *= 1.0 / (1.0 + dt * motion.linear_damping);
                motion.angular_velocity *= 1.0 / (1.0 + dt * motion.angular_damping);
            }
            *solver_body = SolverBody {
                linear_velocity: motion.linear_velocity,
                angular_velocity: motion.angular_velocity,
                inverse_mass: motion.inverse_mass(),
                inverse_inertia,
                center_of_mass: body.position + body.orientation * motion.local_center_of_mass(),
            };
        }
    }

    fn solve_contacts(&mut self, dt: f32) {
        let PhysicsManager {
            bodies,
            motions,
            arbiters,
            solver_bodies,
            settings,
            ..
        } = self;
        solver::prepare_contacts(arbiters.arbiters_mut(), solver_bodies, settings, dt);
        solver::warm_start(arbiters.arbiters(), solver_bodies);
        for _ in 0..settings.solver_iterations {
            solver::solve_velocities(arbiters.arbiters_mut(), solver_bodies);
        }

        for (handle, body) in bodies.iter() {
            if !body.is_dynamic() || !body.is_enabled() {
                continue;
            }
            let Some(motion) = body.motion().and_then(|motion| motions.get_mut(motion)) else {
                continue;
            };
            let solver_body = &solver_bodies[handle.index() as usize];
            motion.linear_velocity = solver_body.linear_velocity;
            motion.angular_velocity = solver_body.angular_velocity;
        }
    }

    /// Keeps dynamic bodies above the ground plane, if there is one.
    fn apply_ground_constraint(&mut self) {
        let Some(ground) = self.settings.ground else {
            return;
        };
        let PhysicsManager {
            bodies,
            motions,
            colliders,
            settings,
            ..
        } = self;
        for (_, body) in bodies.iter_mut() {
            if !body.is_dynamic() || !body.is_enabled() {
                continue;
            }
            let lowest = body_aabb(colliders, body).min.y;
            if lowest >= ground {
                continue;
            }
            body.position.y += ground - lowest;
            let Some(motion) = body.motion().and_then(|motion| motions.get_mut(motion)) else {
                continue;
            };
            let falling_speed = -motion.linear_velocity.y;
            if falling_speed > 0.0 {
                motion.linear_velocity.y = if falling_speed > settings.restitution_threshold {
                    falling_speed * body.restitution
                } else {
                    0.0
                };
            }
        }
    }

    /// Moves the bodies according to their velocities, remembering the
    /// previous transform for interpolation.
    fn integrate(&mut self, dt: f32) {
        let PhysicsManager { bodies, motions, .. } = self;
        for (_, body) in bodies.iter_mut() {
            let Some(motion) = body.motion().and_then(|motion| motions.get_mut(motion)) else {
                continue;
            };
            motion.set_previous_transform(body.position, body.orientation);
            motion.clear_forces();
            if !body.is_enabled() {
                continue;
            }

            // Rotating around the center of mass, which might not be at the
            // body's origin.
            let local_center_of_mass = motion.local_center_of_mass();
            let center_of_mass = body.position + body.orientation * local_center_of_mass;
            let new_center_of_mass = center_of_mass + motion.linear_velocity * dt;
            let rotation = Quat::from_scaled_axis(motion.angular_velocity * dt);
            body.orientation = (rotation * body.orientation).normalize();
            body.position = new_center_of_mass - body.orientation * local_center_of_mass;
        }
    }

    fn process_removals(&mut self) {
        while let Some(handle) = self.pending_removals.pop() {
            if self.remove_rigid_body(handle).is_err() {
                trace!("Queued removal of {handle:?} skipped, it was already removed.");
            }
        }
    }
}

/// The union of the bounding boxes of the body's colliders.
fn body_aabb(colliders: &FixedObjectPool<Collider>, body: &RigidBody) -> Aabb {
    let boxes = (body.colliders().iter()).filter_map(|&handle| Some(colliders.get(handle)?.aabb()));
    (boxes.reduce(|a, b| a.union(&b))).unwrap_or(Aabb::new(body.position, body.position))
}

/// Adds the pairs of overlapping colliders between the two bodies to
/// `candidates`. Returns false if `candidates` got full.
fn push_overlapping_colliders(
    colliders: &FixedObjectPool<Collider>,
    body: &RigidBody,
    other: &RigidBody,
    candidates: &mut FixedVec<ColliderPair>,
) -> bool {
    if !other.is_enabled() {
        return true;
    }
    for &a in body.colliders() {
        for &b in other.colliders() {
            let (Some(collider_a), Some(collider_b)) = (colliders.get(a), colliders.get(b)) else {
                continue;
            };
            if collider_a.aabb().intersects(&collider_b.aabb())
                && candidates.push(ColliderPair::new(a, b)).is_err()
            {
                return false;
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use enum_map::enum_map;
    use glam::{Quat, Vec3};

    use super::PhysicsManager;
    use crate::{
        allocators::DebugMemoryResource,
        physics::{
            BodyHandle, ColliderKind, ColliderSettings, MotionType, PhysicsError, PhysicsLimits,
            PhysicsSettings, PoolKind, RigidBodySettings, Transform,
        },
        test_platform::TestPlatform,
    };

    const DT: f32 = 1.0 / 60.0;

    fn small_limits() -> PhysicsLimits {
        PhysicsLimits {
            bodies: 64,
            moving_bodies: 32,
            colliders: enum_map! {
                ColliderKind::Sphere => 32,
                ColliderKind::Capsule => 8,
                ColliderKind::Hull => 32,
            },
            arbiters: 64,
            collider_pairs: 128,
            pending_removals: 4,
        }
    }

    fn ground(manager: &mut PhysicsManager) -> BodyHandle {
        let settings = RigidBodySettings::new(
            MotionType::Static,
            Transform::from_position(Vec3::new(0.0, -0.5, 0.0)),
        )
        .with_collider(ColliderSettings::cuboid(Vec3::new(50.0, 0.5, 50.0), 0.0).unwrap())
        .unwrap()
        .with_restitution(0.5);
        manager.create_rigid_body(&settings).unwrap()
    }

    fn ball(manager: &mut PhysicsManager, position: Vec3) -> BodyHandle {
        let settings = RigidBodySettings::new(MotionType::Dynamic, Transform::from_position(position))
            .with_collider(ColliderSettings::sphere(0.5, 1.0))
            .unwrap()
            .with_restitution(0.5);
        manager.create_rigid_body(&settings).unwrap()
    }

    #[test]
    fn falling_sphere_bounces_and_settles() {
        let platform = TestPlatform::new();
        let mut manager =
            PhysicsManager::new(&platform, small_limits(), PhysicsSettings::default()).unwrap();
        ground(&mut manager);
        let sphere = ball(&mut manager, Vec3::new(0.0, 10.0, 0.0));

        let mut previous_y = 10.0;
        let mut impact_speed = None;
        let mut bounce_speed = None;
        for _ in 0..(10.0 / DT) as usize {
            let speed_before = manager.motion(sphere).unwrap().linear_velocity.y;
            manager.update(DT).unwrap();
            let y = manager.body(sphere).unwrap().position.y;
            let velocity = manager.motion(sphere).unwrap().linear_velocity.y;
            if bounce_speed.is_none() {
                if velocity > 0.0 {
                    impact_speed = Some(-speed_before);
                    bounce_speed = Some(velocity);
                } else {
                    assert!(y < previous_y, "the sphere should fall until it hits the ground");
                }
            }
            previous_y = y;
        }

        let (impact_speed, bounce_speed) = (impact_speed.unwrap(), bounce_speed.unwrap());
        let ratio = bounce_speed / impact_speed;
        assert!((0.35..0.65).contains(&ratio), "bounced back with {ratio} of the speed");
        let y = manager.body(sphere).unwrap().position.y;
        assert!((y - 0.5).abs() < 0.05, "the sphere settled at {y}");
        assert!(manager.motion(sphere).unwrap().linear_velocity.length() < 0.1);
    }

    #[test]
    fn identical_worlds_step_identically() {
        let platform = TestPlatform::new();
        let mut worlds = [(); 2].map(|_| {
            let mut manager =
                PhysicsManager::new(&platform, small_limits(), PhysicsSettings::default()).unwrap();
            ground(&mut manager);
            let mut handles = [None; 5];
            for (i, handle) in handles.iter_mut().enumerate() {
                let position = Vec3::new(i as f32 * 0.3, 1.0 + i as f32 * 1.1, 0.0);
                *handle = Some(ball(&mut manager, position));
            }
            (manager, handles)
        });
        for _ in 0..120 {
            for (manager, _) in &mut worlds {
                manager.update(DT).unwrap();
            }
        }
        let [(a, handles_a), (b, handles_b)] = &worlds;
        for (handle_a, handle_b) in handles_a.iter().zip(handles_b) {
            let body_a = a.body(handle_a.unwrap()).unwrap();
            let body_b = b.body(handle_b.unwrap()).unwrap();
            assert_eq!(body_a.position, body_b.position);
            assert_eq!(body_a.orientation, body_b.orientation);
        }
    }

    #[test]
    fn extrapolation_blends_previous_and_current_state() {
        let platform = TestPlatform::new();
        let mut manager =
            PhysicsManager::new(&platform, small_limits(), PhysicsSettings::default()).unwrap();
        let sphere = ball(&mut manager, Vec3::new(0.0, 10.0, 0.0));
        manager.set_linear_velocity(sphere, Vec3::new(3.0, 0.0, 0.0)).unwrap();
        manager.add_torque(sphere, Vec3::new(0.0, 5.0, 0.0)).unwrap();
        manager.update(DT).unwrap();

        let previous = manager.motion(sphere).unwrap().previous_position();
        let current = manager.body(sphere).unwrap().position;
        assert_ne!(previous, current);

        let start = manager.extrapolated_transform(sphere, 0.0).unwrap();
        let end = manager.extrapolated_transform(sphere, 1.0).unwrap();
        assert!(start.position.abs_diff_eq(previous, 1e-6));
        assert!(end.position.abs_diff_eq(current, 1e-6));
        assert!(end.orientation.abs_diff_eq(manager.body(sphere).unwrap().orientation, 1e-5));
        for f in [0.25, 0.5, 0.75] {
            let middle = manager.extrapolated_transform(sphere, f).unwrap().position;
            let along = (middle - previous).length() + (current - middle).length();
            assert!((along - (current - previous).length()).abs() < 1e-5);
        }

        let beyond = manager.extrapolated_transform(sphere, 2.0).unwrap().position;
        assert!(beyond.abs_diff_eq(current + (current - previous), 1e-5));
        let clamped = manager.interpolated_transform(sphere, 2.0).unwrap().position;
        assert!(clamped.abs_diff_eq(current, 1e-6));

        let mut visited = 0;
        manager.extrapolate(0.5, |handle, _, transform| {
            assert_eq!(sphere, handle);
            assert!(transform.position.abs_diff_eq(previous.lerp(current, 0.5), 1e-5));
            visited += 1;
        });
        assert_eq!(1, visited);
    }

    #[test]
    fn separated_pairs_lose_their_arbiters() {
        let platform = TestPlatform::new();
        let settings = PhysicsSettings {
            gravity: Vec3::ZERO,
            ..Default::default()
        };
        let mut manager = PhysicsManager::new(&platform, small_limits(), settings).unwrap();
        let a = ball(&mut manager, Vec3::new(-0.45, 0.0, 0.0));
        let b = ball(&mut manager, Vec3::new(0.45, 0.0, 0.0));
        manager.update(DT).unwrap();
        assert_eq!(1, manager.arbiter_count());
        assert_eq!((a, b), manager.arbiters()[0].bodies());

        manager.set_linear_velocity(a, Vec3::new(-50.0, 0.0, 0.0)).unwrap();
        manager.set_linear_velocity(b, Vec3::new(50.0, 0.0, 0.0)).unwrap();
        manager.update(DT).unwrap();
        manager.update(DT).unwrap();
        assert_eq!(0, manager.arbiter_count());
    }

    #[test]
    fn removing_a_body_mid_contact_removes_its_arbiters() {
        let platform = TestPlatform::new();
        let mut manager =
            PhysicsManager::new(&platform, small_limits(), PhysicsSettings::default()).unwrap();
        let floor = ground(&mut manager);
        let resting = ball(&mut manager, Vec3::new(0.0, 0.49, 0.0));
        let other = ball(&mut manager, Vec3::new(3.0, 0.49, 0.0));
        manager.update(DT).unwrap();
        assert_eq!(2, manager.arbiter_count());

        manager.remove_rigid_body(resting).unwrap();
        assert_eq!(1, manager.arbiter_count());
        assert!(manager.arbiters().iter().all(|arbiter| !arbiter.involves(resting)));
        assert!(manager.body(resting).is_none());
        assert_eq!(Err(PhysicsError::StaleHandle), manager.remove_rigid_body(resting));
        assert_eq!(Err(PhysicsError::StaleHandle), manager.add_force(resting, Vec3::X));

        for _ in 0..10 {
            manager.update(DT).unwrap();
        }
        assert_eq!(1, manager.arbiter_count());
        assert_eq!((floor, other), manager.arbiters()[0].bodies());

        // The slot gets reused, but the old handle stays stale.
        let replacement = ball(&mut manager, Vec3::new(0.0, 5.0, 0.0));
        assert_eq!(resting.index(), replacement.index());
        assert!(manager.body(resting).is_none());
    }

    #[test]
    fn queued_removals_happen_after_the_step() {
        let platform = TestPlatform::new();
        let mut manager =
            PhysicsManager::new(&platform, small_limits(), PhysicsSettings::default()).unwrap();
        let handles = [0.0, 2.0, 4.0].map(|x| ball(&mut manager, Vec3::new(x, 5.0, 0.0)));
        let to_remove = (manager.bodies())
            .filter(|(_, body)| body.position.x > 1.0)
            .map(|(handle, _)| handle)
            .collect::<arrayvec::ArrayVec<_, 4>>();
        for handle in to_remove {
            manager.queue_removal(handle).unwrap();
        }
        manager.queue_removal(handles[1]).unwrap();
        assert_eq!(3, manager.body_count());

        manager.update(DT).unwrap();
        assert_eq!(1, manager.body_count());
        assert!(manager.body(handles[0]).is_some());
        assert_eq!(Err(PhysicsError::StaleHandle), manager.queue_removal(handles[2]));
    }

    #[test]
    fn full_storages_are_reported() {
        let platform = TestPlatform::new();
        let limits = PhysicsLimits {
            bodies: 3,
            moving_bodies: 2,
            colliders: enum_map! {
                ColliderKind::Sphere => 2,
                ColliderKind::Capsule => 0,
                ColliderKind::Hull => 1,
            },
            arbiters: 1,
            collider_pairs: 8,
            pending_removals: 1,
        };
        let mut manager = PhysicsManager::new(&platform, limits, PhysicsSettings::default()).unwrap();
        let capsule = RigidBodySettings::default()
            .with_collider(ColliderSettings::capsule(0.5, 1.0, 1.0))
            .unwrap();
        assert_eq!(
            Err(PhysicsError::CapacityExceeded(PoolKind::Colliders(ColliderKind::Capsule))),
            manager.create_rigid_body(&capsule),
        );
        assert_eq!(0, manager.body_count());

        ground(&mut manager);
        ball(&mut manager, Vec3::new(0.0, 0.45, 0.0));
        ball(&mut manager, Vec3::new(2.0, 0.45, 0.0));
        assert_eq!(
            Err(PhysicsError::CapacityExceeded(PoolKind::Bodies)),
            manager.create_rigid_body(&RigidBodySettings::new(MotionType::Static, Transform::IDENTITY)),
        );

        // Both balls touch the ground, but there's only room for one arbiter.
        assert_eq!(
            Err(PhysicsError::CapacityExceeded(PoolKind::Arbiters)),
            manager.update(DT),
        );
        assert_eq!(1, manager.arbiter_count());
        assert_eq!(3, manager.body_count());
    }

    #[test]
    fn invalid_bodies_are_rejected() {
        let platform = TestPlatform::new();
        let mut manager =
            PhysicsManager::new(&platform, small_limits(), PhysicsSettings::default()).unwrap();
        let no_colliders = RigidBodySettings::default();
        assert_eq!(Err(PhysicsError::NoColliders), manager.create_rigid_body(&no_colliders));

        let massless = RigidBodySettings::default()
            .with_collider(ColliderSettings::sphere(1.0, 0.0))
            .unwrap();
        assert_eq!(Err(PhysicsError::InvalidMass), manager.create_rigid_body(&massless));
        let negative = RigidBodySettings::default()
            .with_collider(ColliderSettings::sphere(1.0, -1.0))
            .unwrap();
        assert_eq!(Err(PhysicsError::InvalidMass), manager.create_rigid_body(&negative));

        let flattened = RigidBodySettings::new(
            MotionType::Dynamic,
            Transform {
                scale: Vec3::new(1.0, 0.0, 1.0),
                ..Transform::IDENTITY
            },
        )
        .with_collider(ColliderSettings::cuboid(Vec3::ONE, 1.0).unwrap())
        .unwrap();
        assert_eq!(Err(PhysicsError::InvalidShape), manager.create_rigid_body(&flattened));

        // Kinematic bodies don't need mass.
        let kinematic = RigidBodySettings::new(MotionType::Kinematic, Transform::IDENTITY)
            .with_collider(ColliderSettings::sphere(1.0, 0.0))
            .unwrap();
        let handle = manager.create_rigid_body(&kinematic).unwrap();
        assert_eq!(0.0, manager.motion(handle).unwrap().inverse_mass());
        assert_eq!(1, manager.body_count());
    }

    #[test]
    fn kinematic_bodies_push_dynamic_ones() {
        let platform = TestPlatform::new();
        let settings = PhysicsSettings {
            gravity: Vec3::ZERO,
            ..Default::default()
        };
        let mut manager = PhysicsManager::new(&platform, small_limits(), settings).unwrap();
        let pusher = RigidBodySettings::new(MotionType::Kinematic, Transform::IDENTITY)
            .with_collider(ColliderSettings::cuboid(Vec3::splat(0.5), 0.0).unwrap())
            .unwrap()
            .with_linear_velocity(Vec3::new(2.0, 0.0, 0.0));
        let pusher = manager.create_rigid_body(&pusher).unwrap();
        let pushed = ball(&mut manager, Vec3::new(1.5, 0.0, 0.0));

        for _ in 0..60 {
            manager.update(DT).unwrap();
        }
        let pusher_x = manager.body(pusher).unwrap().position.x;
        assert!((pusher_x - 2.0).abs() < 1e-3, "kinematic bodies move at their own pace");
        assert!(manager.body(pushed).unwrap().position.x > pusher_x + 0.9);
    }

    #[test]
    fn teleported_bodies_are_found_at_their_new_place() {
        let platform = TestPlatform::new();
        let mut manager =
            PhysicsManager::new(&platform, small_limits(), PhysicsSettings::default()).unwrap();
        let floor = ground(&mut manager);
        manager.set_body_transform(floor, Vec3::new(200.0, 0.0, 0.0), Quat::IDENTITY).unwrap();
        assert!(manager.body(floor).unwrap().moved_last_frame());

        let mut found = None;
        manager.for_each_in_radius(Vec3::new(200.0, 0.0, 0.0), 1.0, |handle, _| {
            found = Some(handle);
            false
        });
        assert_eq!(Some(floor), found);
        let mut near_origin = 0;
        manager.for_each_in_box(&crate::physics::Aabb::around(Vec3::ZERO, Vec3::ONE), |_, _| {
            near_origin += 1;
            true
        });
        assert_eq!(0, near_origin);
    }

    #[test]
    fn memory_is_returned_when_dropped() {
        let platform = TestPlatform::new();
        let memory = DebugMemoryResource::new("physics", &platform);
        let mut manager =
            PhysicsManager::new(&memory, small_limits(), PhysicsSettings::default()).unwrap();
        ground(&mut manager);
        ball(&mut manager, Vec3::new(0.0, 2.0, 0.0));
        manager.update(DT).unwrap();
        manager.clear();
        assert_eq!(0, manager.body_count());
        drop(manager);
        assert_eq!(0, memory.stats().current_bytes);
        assert!(!memory.report_leaks());
    }
}
