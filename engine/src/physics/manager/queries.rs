// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Spatial queries and render-time transform blending.

use glam::{Quat, Vec3};

use super::PhysicsManager;
use crate::physics::{Aabb, BodyHandle, BvhHandle, Ray, RigidBody, Transform};

/// The closest body hit by [`PhysicsManager::ray_cast`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RayCastHit {
    pub body: BodyHandle,
    /// The [`RigidBody::user_data`] of the body.
    pub user_data: u64,
    pub distance: f32,
    pub point: Vec3,
    /// The normal of the bounding box face that was hit.
    pub normal: Vec3,
}

impl PhysicsManager<'_> {
    /// Finds the closest enabled body along the ray.
    ///
    /// The hit is tested against the bounding boxes of the body's colliders,
    /// which is exact for unrotated boxes, and an approximation for
    /// everything else.
    pub fn ray_cast(&self, ray: &Ray, max_distance: f32) -> Option<RayCastHit> {
        let mut closest: Option<(BodyHandle, f32, Aabb)> = None;
        let mut visit = |_: BvhHandle, handle: BodyHandle, _: f32| {
            let Some(body) = self.bodies.get(handle).filter(|body| body.is_enabled()) else {
                return true;
            };
            for &collider_handle in body.colliders() {
                let Some(collider) = self.colliders.get(collider_handle) else {
                    continue;
                };
                let aabb = collider.aabb();
                let Some(distance) = aabb.ray_intersection(ray, max_distance) else {
                    continue;
                };
                if closest.is_none_or(|(_, closest_distance, _)| distance < closest_distance) {
                    closest = Some((handle, distance, aabb));
                }
            }
            true
        };
        self.dynamic_tree.ray_cast(ray, max_distance, &mut visit);
        self.static_tree.ray_cast(ray, max_distance, &mut visit);

        let (body, distance, aabb) = closest?;
        let point = ray.at(distance);
        Some(RayCastHit {
            body,
            user_data: self.bodies.get(body)?.user_data,
            distance,
            point,
            normal: aabb.face_normal(point),
        })
    }

    /// Calls `f` for each enabled body with a collider within `radius` of
    /// `center`, until `f` returns false.
    pub fn for_each_in_radius<F>(&self, center: Vec3, radius: f32, mut f: F)
    where
        F: FnMut(BodyHandle, &RigidBody) -> bool,
    {
        let overlaps = |aabb: &Aabb| aabb.intersects_sphere(center, radius);
        let mut keep_going = true;
        for tree in [&self.dynamic_tree, &self.static_tree] {
            tree.query_sphere(center, radius, |_, handle| {
                keep_going = self.visit_if_overlapping(handle, overlaps, &mut f);
                keep_going
            });
            if !keep_going {
                return;
            }
        }
    }

    /// Calls `f` for each enabled body with a collider overlapping `aabb`,
    /// until `f` returns false.
    pub fn for_each_in_box<F>(&self, aabb: &Aabb, mut f: F)
    where
        F: FnMut(BodyHandle, &RigidBody) -> bool,
    {
        let overlaps = |collider_aabb: &Aabb| collider_aabb.intersects(aabb);
        let mut keep_going = true;
        for tree in [&self.dynamic_tree, &self.static_tree] {
            tree.query_aabb(aabb, |_, handle| {
                keep_going = self.visit_if_overlapping(handle, overlaps, &mut f);
                keep_going
            });
            if !keep_going {
                return;
            }
        }
    }

    fn visit_if_overlapping<F>(&self, handle: BodyHandle, overlaps: impl Fn(&Aabb) -> bool, f: &mut F) -> bool
    where
        F: FnMut(BodyHandle, &RigidBody) -> bool,
    {
        let Some(body) = self.bodies.get(handle).filter(|body| body.is_enabled()) else {
            return true;
        };
        let hit = (body.colliders().iter())
            .filter_map(|&collider| self.colliders.get(collider))
            .any(|collider| overlaps(&collider.aabb()));
        if hit {
            f(handle, body)
        } else {
            true
        }
    }

    /// The body's transform blended between its previous and current state,
    /// for rendering between physics steps. `alpha` is clamped between 0
    /// (previous) and 1 (current).
    pub fn interpolated_transform(&self, handle: BodyHandle, alpha: f32) -> Option<Transform> {
        let body = self.bodies.get(handle)?;
        let Some(motion) = body.motion().and_then(|motion| self.motions.get(motion)) else {
            return Some(body.transform());
        };
        let alpha = alpha.clamp(0.0, 1.0);
        Some(Transform {
            position: motion.previous_position().lerp(body.position, alpha),
            orientation: motion.previous_orientation().slerp(body.orientation, alpha),
            scale: body.scale(),
        })
    }

    /// The body's transform extrapolated from the movement of the last step:
    /// `factor` 0 is the previous state, 1 is the current state, and values
    /// past 1 continue along the same motion.
    pub fn extrapolated_transform(&self, handle: BodyHandle, factor: f32) -> Option<Transform> {
        let body = self.bodies.get(handle)?;
        let Some(motion) = body.motion().and_then(|motion| self.motions.get(motion)) else {
            return Some(body.transform());
        };
        let previous_position = motion.previous_position();
        let previous_orientation = motion.previous_orientation();
        let mut delta = body.orientation * previous_orientation.inverse();
        // The shorter way around.
        if delta.w < 0.0 {
            delta = -delta;
        }
        let rotation = Quat::from_scaled_axis(delta.to_scaled_axis() * factor);
        Some(Transform {
            position: previous_position + (body.position - previous_position) * factor,
            orientation: (rotation * previous_orientation).normalize(),
            scale: body.scale(),
        })
    }

    /// Calls `f` with the [interpolated](PhysicsManager::interpolated_transform)
    /// transform of every body.
    pub fn interpolate<F: FnMut(BodyHandle, &RigidBody, Transform)>(&self, alpha: f32, mut f: F) {
        for (handle, body) in self.bodies.iter() {
            if let Some(transform) = self.interpolated_transform(handle, alpha) {
                f(handle, body, transform);
            }
        }
    }

    /// Calls `f` with the [extrapolated](PhysicsManager::extrapolated_transform)
    /// transform of every body.
    pub fn extrapolate<F: FnMut(BodyHandle, &RigidBody, Transform)>(&self, factor: f32, mut f: F) {
        for (handle, body) in self.bodies.iter() {
            if let Some(transform) = self.extrapolated_transform(handle, factor) {
                f(handle, body, transform);
            }
        }
    }
}
