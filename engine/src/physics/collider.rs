// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::f32::consts::PI;

use arrayvec::ArrayVec;
use enum_map::Enum;
use glam::{Mat3, Quat, Vec3};

use super::{Aabb, BodyHandle, PhysicsError};

/// Maximum amount of points in a [`Hull`].
pub const MAX_HULL_VERTICES: usize = 16;
/// Maximum amount of faces in a [`Hull`].
pub const MAX_HULL_FACES: usize = 20;
/// Maximum amount of distinct edge directions in a [`Hull`].
pub const MAX_HULL_EDGES: usize = 24;
/// Maximum amount of corners in one face of a [`Hull`].
pub const MAX_FACE_VERTICES: usize = 12;

/// Tolerance for considering a point to be on a plane, relative to the size
/// of the hull.
const PLANE_TOLERANCE: f32 = 1e-4;

/// The kinds of shapes colliders can have. Used to look up per-kind limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Enum)]
pub enum ColliderKind {
    Sphere,
    Capsule,
    Hull,
}

/// One face of a [`Hull`]: a plane, and the indices of the hull's vertices
/// that lie on it, in counter-clockwise order around the normal.
#[derive(Debug, Clone, PartialEq)]
pub struct HullFace {
    /// Outwards normal of the face, in the hull's local space.
    pub normal: Vec3,
    /// Distance of the face's plane from the origin along the normal.
    pub offset: f32,
    pub vertices: ArrayVec<u8, MAX_FACE_VERTICES>,
}

/// A convex polyhedron, defined by its corner points.
#[derive(Debug, Clone, PartialEq)]
pub struct Hull {
    vertices: ArrayVec<Vec3, MAX_HULL_VERTICES>,
    faces: ArrayVec<HullFace, MAX_HULL_FACES>,
    /// Unique edge directions, used as separating axis candidates.
    edge_directions: ArrayVec<Vec3, MAX_HULL_EDGES>,
}

impl Hull {
    /// Creates a box centered on the origin, with the given distances from
    /// the center to the faces of the box.
    pub fn cuboid(half_extents: Vec3) -> Option<Hull> {
        let h = half_extents;
        let corners: [Vec3; 8] = core::array::from_fn(|i| {
            let signs = Vec3::new(
                if i & 1 == 0 { -1.0 } else { 1.0 },
                if i & 2 == 0 { -1.0 } else { 1.0 },
                if i & 4 == 0 { -1.0 } else { 1.0 },
            );
            signs * h
        });
        Hull::from_points(&corners)
    }

    /// Creates the convex hull of the points. Points inside the hull are
    /// ignored. Returns None if there are more than [`MAX_HULL_VERTICES`]
    /// points, if the hull would have too many faces, or if the points don't
    /// span a volume.
    pub fn from_points(points: &[Vec3]) -> Option<Hull> {
        if points.len() < 4 || points.len() > MAX_HULL_VERTICES {
            return None;
        }
        if points.iter().any(|p| !p.is_finite()) {
            return None;
        }
        let size = Aabb::from_points(points.iter().copied())?.half_extents().max_element();
        let tolerance = PLANE_TOLERANCE * size.max(1e-3);

        // Brute force: every plane through three of the points, which has
        // all of the points on one side, is a face.
        let mut planes = ArrayVec::<(Vec3, f32), MAX_HULL_FACES>::new();
        for (i, &a) in points.iter().enumerate() {
            for (j, &b) in points.iter().enumerate().skip(i + 1) {
                for &c in points.iter().skip(j + 1) {
                    let Some(mut normal) = (b - a).cross(c - a).try_normalize() else {
                        continue;
                    };
                    let mut offset = normal.dot(a);
                    let above = points.iter().filter(|p| normal.dot(**p) - offset > tolerance);
                    let below = points.iter().filter(|p| normal.dot(**p) - offset < -tolerance);
                    match (above.count(), below.count()) {
                        (0, _) => {}
                        (_, 0) => {
                            normal = -normal;
                            offset = -offset;
                        }
                        _ => continue,
                    }
                    let duplicate = planes.iter().any(|(n, d)| {
                        n.dot(normal) > 1.0 - 1e-5 && (d - offset).abs() < tolerance
                    });
                    if !duplicate && planes.try_push((normal, offset)).is_err() {
                        return None;
                    }
                }
            }
        }
        if planes.len() < 4 {
            return None;
        }

        // Only keep points which are corners of the hull, i.e. on at least
        // three faces.
        let mut vertices = ArrayVec::<Vec3, MAX_HULL_VERTICES>::new();
        for &p in points {
            let face_count = (planes.iter())
                .filter(|(n, d)| (n.dot(p) - d).abs() <= tolerance)
                .count();
            let already_added = vertices.iter().any(|v| v.distance(p) <= tolerance);
            if face_count >= 3 && !already_added {
                vertices.push(p);
            }
        }

        let mut faces = ArrayVec::<HullFace, MAX_HULL_FACES>::new();
        for &(normal, offset) in &planes {
            let mut face_vertices = ArrayVec::<u8, MAX_FACE_VERTICES>::new();
            for (i, v) in vertices.iter().enumerate() {
                if (normal.dot(*v) - offset).abs() <= tolerance {
                    face_vertices.try_push(i as u8).ok()?;
                }
            }
            let centroid = face_vertices.iter().map(|&i| vertices[i as usize]).sum::<Vec3>()
                / face_vertices.len().max(1) as f32;
            let (tangent, bitangent) = normal.any_orthonormal_pair();
            let angle = |i: &u8| {
                let d = vertices[*i as usize] - centroid;
                d.dot(bitangent).atan2(d.dot(tangent))
            };
            face_vertices.sort_unstable_by(|a, b| angle(a).total_cmp(&angle(b)));
            // The tangent basis might be left-handed with respect to the
            // normal, in which case the sorted order is clockwise.
            if tangent.cross(bitangent).dot(normal) < 0.0 {
                face_vertices.reverse();
            }
            faces.push(HullFace {
                normal,
                offset,
                vertices: face_vertices,
            });
        }

        let mut edge_directions = ArrayVec::<Vec3, MAX_HULL_EDGES>::new();
        for face in &faces {
            let n = face.vertices.len();
            for k in 0..n {
                let a = vertices[face.vertices[k] as usize];
                let b = vertices[face.vertices[(k + 1) % n] as usize];
                let Some(direction) = (b - a).try_normalize() else {
                    continue;
                };
                let parallel_exists = (edge_directions.iter())
                    .any(|e: &Vec3| e.dot(direction).abs() > 1.0 - 1e-5);
                if !parallel_exists {
                    edge_directions.try_push(direction).ok()?;
                }
            }
        }

        Some(Hull {
            vertices,
            faces,
            edge_directions,
        })
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn faces(&self) -> &[HullFace] {
        &self.faces
    }

    pub fn edge_directions(&self) -> &[Vec3] {
        &self.edge_directions
    }

    /// Returns a copy of the hull with its vertices scaled along each axis.
    pub fn scaled(&self, scale: Vec3) -> Option<Hull> {
        if scale == Vec3::ONE {
            return Some(self.clone());
        }
        let points: ArrayVec<Vec3, MAX_HULL_VERTICES> =
            self.vertices.iter().map(|&v| v * scale).collect();
        Hull::from_points(&points)
    }

    fn local_bounds(&self) -> Aabb {
        Aabb::from_points(self.vertices.iter().copied())
            .unwrap_or(Aabb::new(Vec3::ZERO, Vec3::ZERO))
    }
}

/// The geometry of a collider, in the collider's local space.
#[derive(Debug, Clone, PartialEq)]
pub enum ColliderShape {
    Sphere { radius: f32 },
    /// A cylinder with hemispheres at its ends, i.e. all points within
    /// `radius` of a segment. The segment is `length` long and goes along the
    /// local Y axis, centered on the origin.
    Capsule { radius: f32, length: f32 },
    Hull(Hull),
}

impl ColliderShape {
    pub fn kind(&self) -> ColliderKind {
        match self {
            ColliderShape::Sphere { .. } => ColliderKind::Sphere,
            ColliderShape::Capsule { .. } => ColliderKind::Capsule,
            ColliderShape::Hull(_) => ColliderKind::Hull,
        }
    }

    /// Returns a copy of the shape scaled along its local axes. Spheres
    /// can't be stretched, so they're scaled by the largest component, and
    /// similarly for the radius of capsules.
    pub fn scaled(&self, scale: Vec3) -> Result<ColliderShape, PhysicsError> {
        let scale = scale.abs();
        let shape = match self {
            ColliderShape::Sphere { radius } => ColliderShape::Sphere {
                radius: radius * scale.max_element(),
            },
            ColliderShape::Capsule { radius, length } => ColliderShape::Capsule {
                radius: radius * scale.x.max(scale.z),
                length: length * scale.y,
            },
            ColliderShape::Hull(hull) => {
                ColliderShape::Hull(hull.scaled(scale).ok_or(PhysicsError::InvalidShape)?)
            }
        };
        match shape {
            ColliderShape::Sphere { radius } | ColliderShape::Capsule { radius, .. }
                if !(radius.is_finite() && radius > 0.0) =>
            {
                Err(PhysicsError::InvalidShape)
            }
            ColliderShape::Capsule { length, .. } if !(length.is_finite() && length >= 0.0) => {
                Err(PhysicsError::InvalidShape)
            }
            shape => Ok(shape),
        }
    }

    /// Returns the mass properties of the shape with the given mass, assuming
    /// uniform density. The center of mass and inertia are in the shape's
    /// local space.
    pub fn mass_properties(&self, mass: f32) -> MassProperties {
        match self {
            ColliderShape::Sphere { radius } => MassProperties {
                mass,
                center_of_mass: Vec3::ZERO,
                inertia: Mat3::from_diagonal(Vec3::splat(0.4 * mass * radius * radius)),
            },
            ColliderShape::Capsule { radius, length } => {
                let (r, h) = (*radius, *length);
                let cylinder_volume = PI * r * r * h;
                let hemispheres_volume = 4.0 / 3.0 * PI * r * r * r;
                let total_volume = cylinder_volume + hemispheres_volume;
                let cylinder_mass = mass * cylinder_volume / total_volume;
                let hemispheres_mass = mass * hemispheres_volume / total_volume;
                let axial =
                    cylinder_mass * r * r * 0.5 + hemispheres_mass * r * r * 0.4;
                let transverse = cylinder_mass * (3.0 * r * r + h * h) / 12.0
                    + hemispheres_mass * (0.4 * r * r + h * h / 4.0 + 3.0 * h * r / 8.0);
                MassProperties {
                    mass,
                    center_of_mass: Vec3::ZERO,
                    inertia: Mat3::from_diagonal(Vec3::new(transverse, axial, transverse)),
                }
            }
            ColliderShape::Hull(hull) => {
                // Approximated with the bounding box of the hull.
                let bounds = hull.local_bounds();
                let size = bounds.max - bounds.min;
                let squared = size * size;
                MassProperties {
                    mass,
                    center_of_mass: bounds.center(),
                    inertia: Mat3::from_diagonal(
                        Vec3::new(
                            squared.y + squared.z,
                            squared.x + squared.z,
                            squared.x + squared.y,
                        ) * (mass / 12.0),
                    ),
                }
            }
        }
    }

    /// The bounding box of the shape when placed at `position` with
    /// `rotation`.
    pub fn aabb(&self, position: Vec3, rotation: Quat) -> Aabb {
        match self {
            ColliderShape::Sphere { radius } => Aabb::around(position, Vec3::splat(*radius)),
            ColliderShape::Capsule { radius, length } => {
                let half_segment = rotation * Vec3::new(0.0, length / 2.0, 0.0);
                Aabb::around(position, half_segment.abs() + Vec3::splat(*radius))
            }
            ColliderShape::Hull(hull) => {
                let points = hull.vertices.iter().map(|&v| position + rotation * v);
                Aabb::from_points(points).unwrap_or(Aabb::new(position, position))
            }
        }
    }
}

/// Mass, center of mass, and the inertia tensor around the center of mass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MassProperties {
    pub mass: f32,
    pub center_of_mass: Vec3,
    pub inertia: Mat3,
}

impl MassProperties {
    pub const ZERO: MassProperties = MassProperties {
        mass: 0.0,
        center_of_mass: Vec3::ZERO,
        inertia: Mat3::ZERO,
    };

    /// Returns these mass properties moved by `position` and rotated by
    /// `rotation`, e.g. from a collider's space into its body's space.
    pub fn transformed(&self, position: Vec3, rotation: Quat) -> MassProperties {
        let rotation = Mat3::from_quat(rotation);
        MassProperties {
            mass: self.mass,
            center_of_mass: position + rotation * self.center_of_mass,
            inertia: rotation * self.inertia * rotation.transpose(),
        }
    }

    /// Combines the mass properties of two parts of the same rigid body. Both
    /// need to be in the same space.
    pub fn combined(&self, other: &MassProperties) -> MassProperties {
        let mass = self.mass + other.mass;
        if mass <= 0.0 {
            return MassProperties::ZERO;
        }
        let center_of_mass =
            (self.center_of_mass * self.mass + other.center_of_mass * other.mass) / mass;
        let inertia = self.inertia_around(center_of_mass) + other.inertia_around(center_of_mass);
        MassProperties {
            mass,
            center_of_mass,
            inertia,
        }
    }

    /// The inertia tensor around `point` instead of the center of mass, with
    /// the parallel axis theorem.
    fn inertia_around(&self, point: Vec3) -> Mat3 {
        let d = self.center_of_mass - point;
        let outer = Mat3::from_cols(d * d.x, d * d.y, d * d.z);
        self.inertia + (Mat3::from_diagonal(Vec3::splat(d.length_squared())) - outer) * self.mass
    }
}

/// Parameters for creating a collider as a part of a rigid body.
#[derive(Debug, Clone, PartialEq)]
pub struct ColliderSettings {
    pub shape: ColliderShape,
    /// Contribution to the body's mass. Ignored for static and kinematic
    /// bodies.
    pub mass: f32,
    /// Offset from the body's origin, in the body's space.
    pub relative_position: Vec3,
    pub relative_rotation: Quat,
}

impl ColliderSettings {
    pub fn new(shape: ColliderShape, mass: f32) -> ColliderSettings {
        ColliderSettings {
            shape,
            mass,
            relative_position: Vec3::ZERO,
            relative_rotation: Quat::IDENTITY,
        }
    }

    pub fn sphere(radius: f32, mass: f32) -> ColliderSettings {
        ColliderSettings::new(ColliderShape::Sphere { radius }, mass)
    }

    pub fn capsule(radius: f32, length: f32, mass: f32) -> ColliderSettings {
        ColliderSettings::new(ColliderShape::Capsule { radius, length }, mass)
    }

    /// A box collider. Returns None if the half extents are not positive.
    pub fn cuboid(half_extents: Vec3, mass: f32) -> Option<ColliderSettings> {
        Some(ColliderSettings::new(
            ColliderShape::Hull(Hull::cuboid(half_extents)?),
            mass,
        ))
    }

    pub fn with_relative_position(mut self, relative_position: Vec3) -> ColliderSettings {
        self.relative_position = relative_position;
        self
    }

    pub fn with_relative_rotation(mut self, relative_rotation: Quat) -> ColliderSettings {
        self.relative_rotation = relative_rotation;
        self
    }
}

/// A piece of a rigid body's geometry.
///
/// The world transform and bounding box are caches, updated by the
/// [`PhysicsManager`](super::PhysicsManager) whenever the body moves.
#[derive(Debug, Clone)]
pub struct Collider {
    pub shape: ColliderShape,
    pub mass: f32,
    relative_position: Vec3,
    relative_rotation: Quat,
    world_position: Vec3,
    world_rotation: Quat,
    aabb: Aabb,
    body: BodyHandle,
}

impl Collider {
    pub(crate) fn new(settings: &ColliderSettings, shape: ColliderShape, body: BodyHandle) -> Collider {
        Collider {
            shape,
            mass: settings.mass,
            relative_position: settings.relative_position,
            relative_rotation: settings.relative_rotation.normalize(),
            world_position: settings.relative_position,
            world_rotation: settings.relative_rotation.normalize(),
            aabb: Aabb::new(Vec3::ZERO, Vec3::ZERO),
            body,
        }
    }

    /// The rigid body this collider is a part of.
    pub fn body(&self) -> BodyHandle {
        self.body
    }

    pub fn kind(&self) -> ColliderKind {
        self.shape.kind()
    }

    pub fn relative_position(&self) -> Vec3 {
        self.relative_position
    }

    pub fn relative_rotation(&self) -> Quat {
        self.relative_rotation
    }

    /// Moves the collider relative to its body. Takes effect in the world
    /// transform at the next [`Collider::update_world_transform`].
    pub fn set_relative_position(&mut self, relative_position: Vec3) {
        self.relative_position = relative_position;
    }

    pub fn set_relative_rotation(&mut self, relative_rotation: Quat) {
        self.relative_rotation = relative_rotation.normalize();
    }

    pub fn world_position(&self) -> Vec3 {
        self.world_position
    }

    pub fn world_rotation(&self) -> Quat {
        self.world_rotation
    }

    /// The bounding box of the collider as of the last
    /// [`Collider::update_world_transform`].
    pub fn aabb(&self) -> Aabb {
        self.aabb
    }

    /// Recalculates the world transform and bounding box of the collider
    /// based on its body's transform.
    pub fn update_world_transform(&mut self, body_position: Vec3, body_orientation: Quat) {
        self.world_position = body_position + body_orientation * self.relative_position;
        self.world_rotation = (body_orientation * self.relative_rotation).normalize();
        self.aabb = self.shape.aabb(self.world_position, self.world_rotation);
    }

    /// The mass properties of this collider in its body's space.
    pub fn mass_properties(&self) -> MassProperties {
        (self.shape.mass_properties(self.mass))
            .transformed(self.relative_position, self.relative_rotation)
    }

    /// The end points of the capsule's segment in world space. For spheres,
    /// both points are the center.
    pub(crate) fn world_segment(&self) -> (Vec3, Vec3) {
        match self.shape {
            ColliderShape::Capsule { length, .. } => {
                let half = self.world_rotation * Vec3::new(0.0, length / 2.0, 0.0);
                (self.world_position - half, self.world_position + half)
            }
            _ => (self.world_position, self.world_position),
        }
    }

    /// The point of the collider furthest in `direction`, in world space.
    pub fn world_support(&self, direction: Vec3) -> Vec3 {
        match &self.shape {
            ColliderShape::Hull(hull) => {
                let local_direction = self.world_rotation.inverse() * direction;
                let local = (hull.vertices.iter().copied())
                    .max_by(|a, b| a.dot(local_direction).total_cmp(&b.dot(local_direction)))
                    .unwrap_or(Vec3::ZERO);
                self.world_position + self.world_rotation * local
            }
            ColliderShape::Sphere { radius } => {
                self.world_position + direction.normalize_or_zero() * *radius
            }
            ColliderShape::Capsule { radius, .. } => {
                let (a, b) = self.world_segment();
                let end = if a.dot(direction) >= b.dot(direction) { a } else { b };
                end + direction.normalize_or_zero() * *radius
            }
        }
    }
}
