// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::f32::consts::TAU;

use glam::{Quat, Vec3};

use super::PhysicsManager;
use crate::{
    collections::FixedVec,
    physics::{Collider, ColliderShape},
};

const CIRCLE_SEGMENTS: usize = 12;

const STATIC_COLOR: u32 = 0x808080FF;
const DYNAMIC_COLOR: u32 = 0x40C040FF;
const KINEMATIC_COLOR: u32 = 0x4080FFFF;
const DISABLED_COLOR: u32 = 0x404040FF;
const CONTACT_COLOR: u32 = 0xFF4040FF;
const VELOCITY_COLOR: u32 = 0xFFFF40FF;
const IMPULSE_COLOR: u32 = 0xFF40FFFF;

/// A line segment for visualizing the physics world. The color is RGBA, 8
/// bits per channel, red in the most significant byte.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugLine {
    pub start: Vec3,
    pub end: Vec3,
    pub color: u32,
}

/// Pushes lines into the output until it's full, after which every push
/// returns false.
struct LineWriter<'o, 'a> {
    lines: &'o mut FixedVec<'a, DebugLine>,
}

impl LineWriter<'_, '_> {
    fn line(&mut self, start: Vec3, end: Vec3, color: u32) -> bool {
        self.lines.push(DebugLine { start, end, color }).is_ok()
    }

    fn circle(&mut self, center: Vec3, rotation: Quat, radius: f32, color: u32) -> bool {
        let point = |i: usize| {
            let angle = TAU * i as f32 / CIRCLE_SEGMENTS as f32;
            center + rotation * Vec3::new(angle.cos() * radius, 0.0, angle.sin() * radius)
        };
        (0..CIRCLE_SEGMENTS).all(|i| self.line(point(i), point(i + 1), color))
    }

    fn collider(&mut self, collider: &Collider, color: u32) -> bool {
        let position = collider.world_position();
        let rotation = collider.world_rotation();
        match &collider.shape {
            ColliderShape::Sphere { radius } => {
                let side = Quat::from_rotation_x(TAU / 4.0);
                let front = Quat::from_rotation_z(TAU / 4.0);
                [Quat::IDENTITY, side, front]
                    .into_iter()
                    .all(|axis| self.circle(position, rotation * axis, *radius, color))
            }
            ColliderShape::Capsule { radius, .. } => {
                let (bottom, top) = collider.world_segment();
                if !(self.circle(bottom, rotation, *radius, color)
                    && self.circle(top, rotation, *radius, color))
                {
                    return false;
                }
                [Vec3::X, Vec3::NEG_X, Vec3::Z, Vec3::NEG_Z].into_iter().all(|side| {
                    let offset = rotation * side * *radius;
                    self.line(bottom + offset, top + offset, color)
                })
            }
            ColliderShape::Hull(hull) => {
                let vertex = |i: u8| position + rotation * hull.vertices()[i as usize];
                hull.faces().iter().all(|face| {
                    let count = face.vertices.len();
                    (0..count).all(|i| {
                        let (a, b) = (face.vertices[i], face.vertices[(i + 1) % count]);
                        // Each edge is shared by two faces, draw it once.
                        a > b || self.line(vertex(a), vertex(b), color)
                    })
                })
            }
        }
    }
}

impl PhysicsManager<'_> {
    /// Writes lines outlining every collider, and the normals of the
    /// contacts, into `lines`. Returns false if `lines` ran out of space.
    pub fn debug_draw(&self, lines: &mut FixedVec<DebugLine>) -> bool {
        let mut writer = LineWriter { lines };
        for (_, body) in self.bodies.iter() {
            let color = if !body.is_enabled() {
                DISABLED_COLOR
            } else if body.is_static() {
                STATIC_COLOR
            } else if body.is_kinematic() {
                KINEMATIC_COLOR
            } else {
                DYNAMIC_COLOR
            };
            for &handle in body.colliders() {
                let Some(collider) = self.colliders.get(handle) else {
                    continue;
                };
                if !writer.collider(collider, color) {
                    return false;
                }
            }
        }
        for arbiter in self.arbiters.arbiters() {
            for contact in arbiter.contacts() {
                let end = contact.position + arbiter.normal() * 0.25;
                if !writer.line(contact.position, end, CONTACT_COLOR) {
                    return false;
                }
            }
        }
        true
    }

    /// Writes lines for the velocities of moving bodies, and the impulses
    /// applied at each contact during the last step, into `lines`. Impulses
    /// are scaled by `impulse_scale` to keep them visible. Returns false if
    /// `lines` ran out of space.
    pub fn debug_draw_forces(&self, lines: &mut FixedVec<DebugLine>, impulse_scale: f32) -> bool {
        let mut writer = LineWriter { lines };
        for (_, body) in self.bodies.iter() {
            let Some(motion) = body.motion().and_then(|motion| self.motions.get(motion)) else {
                continue;
            };
            if !writer.line(body.position, body.position + motion.linear_velocity, VELOCITY_COLOR) {
                return false;
            }
        }
        for arbiter in self.arbiters.arbiters() {
            let [tangent_a, tangent_b] = arbiter.tangents();
            for contact in arbiter.contacts() {
                let impulse = arbiter.normal() * contact.normal_impulse
                    + tangent_a * contact.tangent_impulse[0]
                    + tangent_b * contact.tangent_impulse[1];
                let end = contact.position + impulse * impulse_scale;
                if !writer.line(contact.position, end, IMPULSE_COLOR) {
                    return false;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::{DebugLine, CIRCLE_SEGMENTS};
    use crate::{
        collections::FixedVec,
        physics::{
            ColliderSettings, MotionType, PhysicsLimits, PhysicsManager, PhysicsSettings,
            RigidBodySettings, Transform,
        },
        test_platform::TestPlatform,
    };

    #[test]
    fn outlines_and_contacts() {
        let platform = TestPlatform::new();
        let mut manager =
            PhysicsManager::new(&platform, PhysicsLimits::default(), PhysicsSettings::default())
                .unwrap();
        let floor = RigidBodySettings::new(MotionType::Static, Transform::from_position(Vec3::NEG_Y))
            .with_collider(ColliderSettings::cuboid(Vec3::ONE, 0.0).unwrap())
            .unwrap();
        manager.create_rigid_body(&floor).unwrap();
        let ball = RigidBodySettings::new(MotionType::Dynamic, Transform::from_position(Vec3::new(0.0, 0.45, 0.0)))
            .with_collider(ColliderSettings::sphere(0.5, 1.0))
            .unwrap();
        manager.create_rigid_body(&ball).unwrap();
        manager.update(1.0 / 60.0).unwrap();
        assert_eq!(1, manager.arbiter_count());

        // A box has 12 edges, and the sphere is drawn as 3 circles.
        let expected = 12 + 3 * CIRCLE_SEGMENTS + manager.arbiters()[0].contacts().len();
        let mut lines = FixedVec::<DebugLine>::new(&platform, 256).unwrap();
        assert!(manager.debug_draw(&mut lines));
        assert_eq!(expected, lines.len());

        let mut too_few = FixedVec::<DebugLine>::new(&platform, 10).unwrap();
        assert!(!manager.debug_draw(&mut too_few));
        assert!(too_few.is_full());

        let mut force_lines = FixedVec::<DebugLine>::new(&platform, 16).unwrap();
        assert!(manager.debug_draw_forces(&mut force_lines, 1.0));
        assert_eq!(2, force_lines.len());
        // Along the contact normal, which is vertical here.
        let impulse = force_lines[1].end - force_lines[1].start;
        assert!(impulse.y.abs() > 0.0);
        assert!(impulse.x.abs() < 1e-4 && impulse.z.abs() < 1e-4);
    }
}
