// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Sequential impulse contact solver.

use bytemuck::Zeroable;
use glam::{Mat3, Vec3};

use super::{CollisionArbiter, PhysicsSettings};

/// The velocity state of a body while solving contacts. Static bodies are
/// all zeroes, i.e. immovable.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct SolverBody {
    pub linear_velocity: Vec3,
    pub angular_velocity: Vec3,
    pub inverse_mass: f32,
    /// In world space.
    pub inverse_inertia: Mat3,
    /// In world space.
    pub center_of_mass: Vec3,
}

// Safety: all of the fields are plain floats, for which all zeroes is valid.
unsafe impl Zeroable for SolverBody {}

impl SolverBody {
    fn velocity_at(&self, offset: Vec3) -> Vec3 {
        self.linear_velocity + self.angular_velocity.cross(offset)
    }

    fn apply_impulse(&mut self, impulse: Vec3, offset: Vec3) {
        self.linear_velocity += impulse * self.inverse_mass;
        self.angular_velocity += self.inverse_inertia * offset.cross(impulse);
    }

    /// The (inverse) effective mass contribution of this body for an impulse
    /// along `direction` at `offset`.
    fn inverse_effective_mass(&self, offset: Vec3, direction: Vec3) -> f32 {
        let offset_cross_direction = offset.cross(direction);
        self.inverse_mass + offset_cross_direction.dot(self.inverse_inertia * offset_cross_direction)
    }
}

fn reciprocal_or_zero(x: f32) -> f32 {
    if x > f32::EPSILON {
        1.0 / x
    } else {
        0.0
    }
}

/// Calculates the effective masses and velocity targets of the contacts.
/// `bodies` is indexed by body handle index.
pub(crate) fn prepare_contacts(
    arbiters: &mut [CollisionArbiter],
    bodies: &[SolverBody],
    settings: &PhysicsSettings,
    dt: f32,
) {
    for arbiter in arbiters {
        let (handle_a, handle_b) = arbiter.bodies();
        let a = &bodies[handle_a.index() as usize];
        let b = &bodies[handle_b.index() as usize];
        let normal = arbiter.normal();
        let tangents = arbiter.tangents();
        let restitution = arbiter.restitution();

        for contact in &mut arbiter.contacts {
            let offset_a = contact.position - a.center_of_mass;
            let offset_b = contact.position - b.center_of_mass;
            let solver = &mut contact.solver;
            solver.offset_a = offset_a;
            solver.offset_b = offset_b;
            solver.normal_mass = reciprocal_or_zero(
                a.inverse_effective_mass(offset_a, normal) + b.inverse_effective_mass(offset_b, normal),
            );
            for (mass, tangent) in solver.tangent_mass.iter_mut().zip(tangents) {
                *mass = reciprocal_or_zero(
                    a.inverse_effective_mass(offset_a, tangent)
                        + b.inverse_effective_mass(offset_b, tangent),
                );
            }

            let penetration_bias = settings.baumgarte / dt
                * (contact.penetration - settings.penetration_slop).max(0.0);
            let normal_velocity = normal.dot(a.velocity_at(offset_a) - b.velocity_at(offset_b));
            let bounce = if -normal_velocity > settings.restitution_threshold {
                -restitution * normal_velocity
            } else {
                0.0
            };
            solver.velocity_bias = penetration_bias.max(bounce);
        }
    }
}

/// Applies the impulses carried over from the previous step.
pub(crate) fn warm_start(arbiters: &[CollisionArbiter], bodies: &mut [SolverBody]) {
    for arbiter in arbiters {
        let (handle_a, handle_b) = arbiter.bodies();
        let (index_a, index_b) = (handle_a.index() as usize, handle_b.index() as usize);
        let (mut a, mut b) = (bodies[index_a], bodies[index_b]);
        let tangents = arbiter.tangents();
        for contact in arbiter.contacts() {
            let impulse = arbiter.normal() * contact.normal_impulse
                + tangents[0] * contact.tangent_impulse[0]
                + tangents[1] * contact.tangent_impulse[1];
            a.apply_impulse(impulse, contact.solver.offset_a);
            b.apply_impulse(-impulse, contact.solver.offset_b);
        }
        bodies[index_a] = a;
        bodies[index_b] = b;
    }
}

/// One round of impulses over all the contacts: friction first, then the
/// non-penetration constraint, which is more important to get right.
pub(crate) fn solve_velocities(arbiters: &mut [CollisionArbiter], bodies: &mut [SolverBody]) {
    for arbiter in arbiters {
        let (handle_a, handle_b) = arbiter.bodies();
        let (index_a, index_b) = (handle_a.index() as usize, handle_b.index() as usize);
        let (mut a, mut b) = (bodies[index_a], bodies[index_b]);
        let normal = arbiter.normal();
        let tangents = arbiter.tangents();
        let friction = arbiter.friction();

        for contact in &mut arbiter.contacts {
            let solver = contact.solver;

            let max_friction = friction * contact.normal_impulse;
            for k in 0..2 {
                let relative_velocity =
                    a.velocity_at(solver.offset_a) - b.velocity_at(solver.offset_b);
                let lambda = -relative_velocity.dot(tangents[k]) * solver.tangent_mass[k];
                let old_impulse = contact.tangent_impulse[k];
                let new_impulse = (old_impulse + lambda).clamp(-max_friction, max_friction);
                contact.tangent_impulse[k] = new_impulse;
                let impulse = tangents[k] * (new_impulse - old_impulse);
                a.apply_impulse(impulse, solver.offset_a);
                b.apply_impulse(-impulse, solver.offset_b);
            }

            let relative_velocity = a.velocity_at(solver.offset_a) - b.velocity_at(solver.offset_b);
            let lambda = (solver.velocity_bias - relative_velocity.dot(normal)) * solver.normal_mass;
            let old_impulse = contact.normal_impulse;
            let new_impulse = (old_impulse + lambda).max(0.0);
            contact.normal_impulse = new_impulse;
            let impulse = normal * (new_impulse - old_impulse);
            a.apply_impulse(impulse, solver.offset_a);
            b.apply_impulse(-impulse, solver.offset_b);
        }

        bodies[index_a] = a;
        bodies[index_b] = b;
    }
}

#[cfg(test)]
mod tests {
    use arrayvec::ArrayVec;
    use glam::{Mat3, Vec3};

    use super::{prepare_contacts, solve_velocities, warm_start, SolverBody};
    use crate::{
        collections::PoolHandle,
        physics::{
            narrow_phase::{ContactManifold, ContactPoint},
            ColliderPair, CollisionArbiter, PhysicsSettings,
        },
    };

    /// A unit-mass ball (index 0) falling onto a static floor (index 1).
    fn ball_on_floor(velocity: Vec3, restitution: f32) -> ([SolverBody; 2], [CollisionArbiter; 1]) {
        let ball = SolverBody {
            linear_velocity: velocity,
            angular_velocity: Vec3::ZERO,
            inverse_mass: 1.0,
            inverse_inertia: Mat3::from_diagonal(Vec3::splat(1.0 / 0.1)),
            center_of_mass: Vec3::new(0.0, 0.5, 0.0),
        };
        let mut points = ArrayVec::new();
        points.push(ContactPoint {
            position: Vec3::ZERO,
            penetration: 0.0,
        });
        let manifold = ContactManifold {
            normal: Vec3::Y,
            points,
        };
        let pair = ColliderPair::new(PoolHandle::from_raw_parts(0, 0), PoolHandle::from_raw_parts(1, 0));
        let bodies = (PoolHandle::from_raw_parts(0, 0), PoolHandle::from_raw_parts(1, 0));
        let arbiter = CollisionArbiter::new(pair, bodies, &manifold, 0.5, restitution);
        ([ball, SolverBody::default()], [arbiter])
    }

    fn solve(bodies: &mut [SolverBody], arbiters: &mut [CollisionArbiter]) {
        prepare_contacts(arbiters, bodies, &PhysicsSettings::default(), 1.0 / 60.0);
        warm_start(arbiters, bodies);
        for _ in 0..8 {
            solve_velocities(arbiters, bodies);
        }
    }

    #[test]
    fn resting_contact_stops_the_fall() {
        let (mut bodies, mut arbiters) = ball_on_floor(Vec3::new(0.0, -0.5, 0.0), 0.5);
        solve(&mut bodies, &mut arbiters);
        // Below the restitution threshold, so no bounce.
        assert!(bodies[0].linear_velocity.y.abs() < 1e-4);
        assert!(arbiters[0].contacts()[0].normal_impulse > 0.0);
        assert_eq!(SolverBody::default(), bodies[1]);
    }

    #[test]
    fn fast_impacts_bounce_back() {
        let (mut bodies, mut arbiters) = ball_on_floor(Vec3::new(0.0, -4.0, 0.0), 0.5);
        solve(&mut bodies, &mut arbiters);
        assert!((bodies[0].linear_velocity.y - 2.0).abs() < 1e-3);
    }

    #[test]
    fn friction_is_bounded_by_the_normal_impulse() {
        let (mut bodies, mut arbiters) = ball_on_floor(Vec3::new(3.0, -0.5, 0.0), 0.0);
        solve(&mut bodies, &mut arbiters);
        let contact = arbiters[0].contacts()[0];
        let friction = Vec3::new(contact.tangent_impulse[0], contact.tangent_impulse[1], 0.0);
        assert!(friction.length() <= 0.5 * contact.normal_impulse * 2f32.sqrt() + 1e-5);
        assert!(bodies[0].linear_velocity.x < 3.0);
    }
}
