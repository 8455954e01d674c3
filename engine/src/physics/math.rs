// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use glam::{Quat, Vec3};

/// An axis-aligned 3D box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    /// The corner with the smallest coordinates.
    pub min: Vec3,
    /// The corner with the largest coordinates.
    pub max: Vec3,
}

impl Aabb {
    /// Creates a new [`Aabb`] from its minimum and maximum corners.
    pub const fn new(min: Vec3, max: Vec3) -> Aabb {
        Aabb { min, max }
    }

    /// Creates a new [`Aabb`] from a center point and the distances from the
    /// center to the faces of the box.
    pub fn around(center: Vec3, half_extents: Vec3) -> Aabb {
        Aabb {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Creates the smallest [`Aabb`] containing all the points, or None if
    /// there are no points.
    pub fn from_points(points: impl IntoIterator<Item = Vec3>) -> Option<Aabb> {
        let mut points = points.into_iter();
        let first = points.next()?;
        Some(points.fold(Aabb::new(first, first), |aabb, p| Aabb {
            min: aabb.min.min(p),
            max: aabb.max.max(p),
        }))
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }

    /// The smallest [`Aabb`] containing both this and `other`.
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Returns a copy of this box grown by `margin` in every direction.
    pub fn expanded(&self, margin: f32) -> Aabb {
        Aabb {
            min: self.min - Vec3::splat(margin),
            max: self.max + Vec3::splat(margin),
        }
    }

    /// Returns a copy of this box stretched to also cover the box's
    /// position after moving by `displacement`.
    pub fn swept(&self, displacement: Vec3) -> Aabb {
        Aabb {
            min: self.min + displacement.min(Vec3::ZERO),
            max: self.max + displacement.max(Vec3::ZERO),
        }
    }

    pub fn surface_area(&self) -> f32 {
        let d = self.max - self.min;
        2.0 * (d.x * d.y + d.y * d.z + d.z * d.x)
    }

    /// Returns true if `other` is completely inside this box.
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.cmple(other.min).all() && other.max.cmple(self.max).all()
    }

    pub fn contains_point(&self, point: Vec3) -> bool {
        self.min.cmple(point).all() && point.cmple(self.max).all()
    }

    /// Returns true if the boxes overlap or touch.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && other.min.cmple(self.max).all()
    }

    pub fn intersects_sphere(&self, center: Vec3, radius: f32) -> bool {
        self.closest_point(center).distance_squared(center) <= radius * radius
    }

    /// The point inside the box closest to `point`.
    pub fn closest_point(&self, point: Vec3) -> Vec3 {
        point.clamp(self.min, self.max)
    }

    /// Returns the distance along the ray to where it enters the box, or
    /// zero if the ray starts inside the box. None if the ray misses the box,
    /// or hits it further than `max_distance` away.
    ///
    /// Uses the slab method: the ray is clipped against the pair of planes
    /// of each axis, and what's left is the part of the ray inside the box.
    pub fn ray_intersection(&self, ray: &Ray, max_distance: f32) -> Option<f32> {
        let mut t_min = 0.0f32;
        let mut t_max = max_distance;
        for axis in 0..3 {
            let origin = ray.origin[axis];
            let direction = ray.direction[axis];
            if direction.abs() < 1e-8 {
                // Parallel to the slab, either always inside it or never.
                if origin < self.min[axis] || origin > self.max[axis] {
                    return None;
                }
                continue;
            }
            let inv_direction = 1.0 / direction;
            let t1 = (self.min[axis] - origin) * inv_direction;
            let t2 = (self.max[axis] - origin) * inv_direction;
            t_min = t_min.max(t1.min(t2));
            t_max = t_max.min(t1.max(t2));
            if t_min > t_max {
                return None;
            }
        }
        Some(t_min)
    }

    /// The outwards normal of the face of the box closest to `point`.
    pub fn face_normal(&self, point: Vec3) -> Vec3 {
        let local = point - self.center();
        let half_extents = self.half_extents().max(Vec3::splat(1e-6));
        let distance_ratio = local.abs() / half_extents;
        let axis = if distance_ratio.x >= distance_ratio.y && distance_ratio.x >= distance_ratio.z {
            Vec3::X
        } else if distance_ratio.y >= distance_ratio.z {
            Vec3::Y
        } else {
            Vec3::Z
        };
        axis * local.dot(axis).signum()
    }
}

/// A half-line starting from `origin`, going towards `direction`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    /// Always normalized.
    pub direction: Vec3,
}

impl Ray {
    /// Creates a new ray. The direction is normalized, and if it's zero or
    /// not finite, None is returned.
    pub fn new(origin: Vec3, direction: Vec3) -> Option<Ray> {
        Some(Ray {
            origin,
            direction: direction.try_normalize()?,
        })
    }

    pub fn at(&self, distance: f32) -> Vec3 {
        self.origin + self.direction * distance
    }
}

/// Placement of an object in the world.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub orientation: Quat,
    /// Scale along the object's local axes. Rigid bodies use this to scale
    /// their colliders at creation time, the scale of a body doesn't change
    /// afterwards.
    pub scale: Vec3,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        position: Vec3::ZERO,
        orientation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    pub fn from_position(position: Vec3) -> Transform {
        Transform {
            position,
            ..Transform::IDENTITY
        }
    }

    pub fn from_position_orientation(position: Vec3, orientation: Quat) -> Transform {
        Transform {
            position,
            orientation,
            ..Transform::IDENTITY
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Transform::IDENTITY
    }
}

/// Returns the closest points between the segments `p1`-`q1` and `p2`-`q2`,
/// as parameters along the segments (0 at `p`, 1 at `q`).
pub(crate) fn closest_segment_parameters(p1: Vec3, q1: Vec3, p2: Vec3, q2: Vec3) -> (f32, f32) {
    const EPSILON: f32 = 1e-9;
    let d1 = q1 - p1;
    let d2 = q2 - p2;
    let r = p1 - p2;
    let a = d1.length_squared();
    let e = d2.length_squared();
    let f = d2.dot(r);

    if a <= EPSILON && e <= EPSILON {
        return (0.0, 0.0);
    }
    if a <= EPSILON {
        return (0.0, (f / e).clamp(0.0, 1.0));
    }
    let c = d1.dot(r);
    if e <= EPSILON {
        return ((-c / a).clamp(0.0, 1.0), 0.0);
    }

    let b = d1.dot(d2);
    let denominator = a * e - b * b;
    // For parallel segments, any point works as the starting point, so the
    // start of the first segment is picked.
    let mut s = if denominator > EPSILON {
        ((b * f - c * e) / denominator).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let mut t = (b * s + f) / e;
    if t < 0.0 {
        t = 0.0;
        s = (-c / a).clamp(0.0, 1.0);
    } else if t > 1.0 {
        t = 1.0;
        s = ((b - c) / a).clamp(0.0, 1.0);
    }
    (s, t)
}

/// Returns the point on the segment `a`-`b` closest to `point`.
pub(crate) fn closest_point_on_segment(a: Vec3, b: Vec3, point: Vec3) -> Vec3 {
    let ab = b - a;
    let length_squared = ab.length_squared();
    if length_squared <= 1e-12 {
        return a;
    }
    let t = ((point - a).dot(ab) / length_squared).clamp(0.0, 1.0);
    a + ab * t
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::{closest_segment_parameters, Aabb, Ray};

    #[test]
    fn ray_hits_box_from_outside_and_inside() {
        let aabb = Aabb::around(Vec3::ZERO, Vec3::ONE);
        let ray = Ray::new(Vec3::new(-5.0, 0.5, 0.0), Vec3::X).unwrap();
        assert_eq!(Some(4.0), aabb.ray_intersection(&ray, 100.0));
        assert_eq!(None, aabb.ray_intersection(&ray, 3.0));

        let inside = Ray::new(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0)).unwrap();
        assert_eq!(Some(0.0), aabb.ray_intersection(&inside, 1.0));

        let miss = Ray::new(Vec3::new(-5.0, 2.0, 0.0), Vec3::X).unwrap();
        assert_eq!(None, aabb.ray_intersection(&miss, 100.0));
    }

    #[test]
    fn face_normal_picks_the_nearest_face() {
        let aabb = Aabb::around(Vec3::ZERO, Vec3::new(2.0, 1.0, 1.0));
        assert_eq!(Vec3::NEG_X, aabb.face_normal(Vec3::new(-2.0, 0.2, 0.1)));
        assert_eq!(Vec3::Y, aabb.face_normal(Vec3::new(1.0, 1.0, 0.5)));
    }

    #[test]
    fn swept_box_covers_both_ends() {
        let aabb = Aabb::around(Vec3::ZERO, Vec3::ONE);
        let swept = aabb.swept(Vec3::new(3.0, -1.0, 0.0));
        assert!(swept.contains(&aabb));
        assert!(swept.contains(&Aabb::around(Vec3::new(3.0, -1.0, 0.0), Vec3::ONE)));
    }

    #[test]
    fn crossing_segments_meet_in_the_middle() {
        let (s, t) = closest_segment_parameters(
            Vec3::new(-1.0, 0.0, 0.0),
            Vec3::new(1.0, 0.0, 0.0),
            Vec3::new(0.0, -1.0, 1.0),
            Vec3::new(0.0, 1.0, 1.0),
        );
        assert!((s - 0.5).abs() < 1e-6);
        assert!((t - 0.5).abs() < 1e-6);
    }
}
