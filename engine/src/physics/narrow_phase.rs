// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Exact collision tests between pairs of colliders.
//!
//! Spheres and capsules are handled as "cores" (a point or a segment) with a
//! radius. Core-core tests are analytic, core-hull tests find the closest
//! points between the core and the hull with GJK, falling back to the hull's
//! faces when the core is inside the hull, and hull-hull tests use the
//! separating axis test with clipping of the touching faces.

use arrayvec::ArrayVec;
use glam::Vec3;

use super::{
    collider::{Collider, ColliderShape, Hull, MAX_HULL_VERTICES},
    math::{closest_point_on_segment, closest_segment_parameters},
};

/// Maximum amount of contact points between two colliders.
pub const MAX_CONTACTS: usize = 8;

/// Segments closer to parallel than this (as the sine of the angle between
/// them) get contacts at both ends instead of just one.
const PARALLEL_TOLERANCE: f32 = 0.05;
/// How much better an edge-edge axis needs to be than the face axes for it
/// to be used in hull-hull tests. Face contacts are more stable.
const EDGE_AXIS_TOLERANCE: f32 = 1e-3;
/// How much better a face of the second hull needs to be than the faces of
/// the first one to be used as the reference face, to avoid flip-flopping
/// between the two when they're equally good.
const FACE_AXIS_TOLERANCE: f32 = 1e-3;

/// A point where two colliders touch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ContactPoint {
    /// World space position, halfway between the two surfaces.
    pub position: Vec3,
    /// How deep the colliders overlap at this point, along the normal.
    pub penetration: f32,
}

/// The result of a collision test: where and how deep two colliders overlap.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContactManifold {
    /// Unit vector pointing from the second collider towards the first one,
    /// i.e. the direction to push the first collider to separate them.
    pub normal: Vec3,
    /// Empty if the colliders don't touch.
    pub points: ArrayVec<ContactPoint, MAX_CONTACTS>,
}

impl ContactManifold {
    fn new(normal: Vec3) -> ContactManifold {
        ContactManifold {
            normal,
            points: ArrayVec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// The deepest penetration of all the points, or zero if there are none.
    pub fn max_penetration(&self) -> f32 {
        (self.points.iter()).fold(0.0, |max, point| max.max(point.penetration))
    }

    fn flipped(mut self) -> ContactManifold {
        self.normal = -self.normal;
        self
    }

    /// Adds the point unless there's already one at (nearly) the same spot.
    fn add_point(&mut self, point: ContactPoint) {
        let duplicate = (self.points.iter())
            .any(|existing| existing.position.distance_squared(point.position) < 1e-6);
        if !duplicate {
            let _ = self.points.try_push(point);
        }
    }
}

/// Tests the colliders against each other. Both colliders' world transforms
/// should be up to date.
pub fn collide(a: &Collider, b: &Collider) -> ContactManifold {
    match (&a.shape, &b.shape) {
        (ColliderShape::Hull(hull_a), ColliderShape::Hull(hull_b)) => {
            hull_hull(a, hull_a, b, hull_b)
        }
        (ColliderShape::Hull(hull_a), _) => core_hull(b, a, hull_a).flipped(),
        (_, ColliderShape::Hull(hull_b)) => core_hull(a, b, hull_b),
        _ => core_core(a, b),
    }
}

/// Returns the segment and radius of a sphere or capsule.
fn core(collider: &Collider) -> (Vec3, Vec3, f32) {
    let (start, end) = collider.world_segment();
    let radius = match collider.shape {
        ColliderShape::Sphere { radius } | ColliderShape::Capsule { radius, .. } => radius,
        ColliderShape::Hull(_) => 0.0,
    };
    (start, end, radius)
}

fn world_vertices(collider: &Collider, hull: &Hull) -> ArrayVec<Vec3, MAX_HULL_VERTICES> {
    let (position, rotation) = (collider.world_position(), collider.world_rotation());
    hull.vertices().iter().map(|&v| position + rotation * v).collect()
}

/// The world space normal and plane offset of a face.
fn world_plane(collider: &Collider, hull: &Hull, face: usize) -> (Vec3, f32) {
    let face = &hull.faces()[face];
    let normal = collider.world_rotation() * face.normal;
    (normal, face.offset + normal.dot(collider.world_position()))
}

/// The contact between two spheres, with the normal pointing towards `a`.
fn sphere_contact(a: Vec3, radius_a: f32, b: Vec3, radius_b: f32) -> Option<(Vec3, ContactPoint)> {
    let d = a - b;
    let radii = radius_a + radius_b;
    let distance_squared = d.length_squared();
    if distance_squared > radii * radii {
        return None;
    }
    let distance = distance_squared.sqrt();
    let normal = if distance > 1e-6 { d / distance } else { Vec3::Y };
    let surface_a = a - normal * radius_a;
    let surface_b = b + normal * radius_b;
    let point = ContactPoint {
        position: (surface_a + surface_b) * 0.5,
        penetration: radii - distance,
    };
    Some((normal, point))
}

fn core_core(a: &Collider, b: &Collider) -> ContactManifold {
    let (a0, a1, radius_a) = core(a);
    let (b0, b1, radius_b) = core(b);
    let (s, t) = closest_segment_parameters(a0, a1, b0, b1);
    let closest_a = a0.lerp(a1, s);
    let closest_b = b0.lerp(b1, t);
    let Some((normal, point)) = sphere_contact(closest_a, radius_a, closest_b, radius_b) else {
        return ContactManifold::default();
    };
    let mut manifold = ContactManifold::new(normal);

    // Capsules lying side by side touch along a line, approximated with
    // points at both ends of the overlapping part.
    let (direction_a, direction_b) = (a1 - a0, b1 - b0);
    let parallel = direction_a.cross(direction_b).length()
        < PARALLEL_TOLERANCE * direction_a.length() * direction_b.length();
    if parallel && direction_a != Vec3::ZERO && direction_b != Vec3::ZERO {
        for end_a in [a0, a1] {
            let on_b = closest_point_on_segment(b0, b1, end_a);
            if let Some((n, p)) = sphere_contact(end_a, radius_a, on_b, radius_b) {
                if n.dot(normal) > 1.0 - PARALLEL_TOLERANCE {
                    manifold.add_point(p);
                }
            }
        }
        for end_b in [b0, b1] {
            let on_a = closest_point_on_segment(a0, a1, end_b);
            if let Some((n, p)) = sphere_contact(on_a, radius_a, end_b, radius_b) {
                if n.dot(normal) > 1.0 - PARALLEL_TOLERANCE {
                    manifold.add_point(p);
                }
            }
        }
    }
    if manifold.is_empty() {
        manifold.add_point(point);
    }
    manifold
}

/// Tests a sphere or capsule (`core`) against a hull. The normal points
/// towards the core.
fn core_hull(core_collider: &Collider, hull_collider: &Collider, hull: &Hull) -> ContactManifold {
    let (start, end, radius) = core(core_collider);
    let vertices = world_vertices(hull_collider, hull);
    let segment = [start, end];
    let segment: &[Vec3] = if start == end { &segment[..1] } else { &segment };

    match gjk_closest_points(segment, &vertices) {
        GjkResult::Separated { distance, .. } if distance > radius => ContactManifold::default(),
        GjkResult::Separated {
            point_a,
            point_b,
            distance,
        } if distance > 1e-5 => {
            let normal = (point_a - point_b) / distance;
            let mut manifold = ContactManifold::new(normal);

            // A capsule lying on a face touches it along a line, so both of
            // its ends are tested separately.
            let axis = (end - start).normalize_or_zero();
            if segment.len() == 2 && axis.dot(normal).abs() < PARALLEL_TOLERANCE {
                for point in segment {
                    let GjkResult::Separated {
                        point_a,
                        point_b,
                        distance,
                    } = gjk_closest_points(&[*point], &vertices)
                    else {
                        continue;
                    };
                    if distance <= radius
                        && distance > 1e-5
                        && ((point_a - point_b) / distance).dot(normal) > 1.0 - PARALLEL_TOLERANCE
                    {
                        manifold.add_point(ContactPoint {
                            position: (point_a - normal * radius + point_b) * 0.5,
                            penetration: radius - distance,
                        });
                    }
                }
                if manifold.points.len() == 2 {
                    return manifold;
                }
                manifold.points.clear();
            }

            manifold.add_point(ContactPoint {
                position: (point_a - normal * radius + point_b) * 0.5,
                penetration: radius - distance,
            });
            manifold
        }
        _ => core_inside_hull(segment, radius, hull_collider, hull),
    }
}

/// Handles the case where the core segment (or point) of a sphere or capsule
/// is inside the hull, by pushing it out through the closest face.
fn core_inside_hull(
    segment: &[Vec3],
    radius: f32,
    hull_collider: &Collider,
    hull: &Hull,
) -> ContactManifold {
    let mut best: Option<(usize, f32)> = None;
    for face in 0..hull.faces().len() {
        let (normal, offset) = world_plane(hull_collider, hull, face);
        let separation = (segment.iter())
            .map(|p| normal.dot(*p) - offset)
            .fold(f32::INFINITY, f32::min);
        if best.is_none_or(|(_, best_separation)| separation > best_separation) {
            best = Some((face, separation));
        }
    }
    let Some((best_face, _)) = best else {
        return ContactManifold::default();
    };
    let (normal, offset) = world_plane(hull_collider, hull, best_face);

    // Only the part of the segment inside the hull's other faces touches.
    let mut clipped = [segment[0], segment[segment.len() - 1]];
    if segment.len() == 2 {
        let (mut t0, mut t1) = (0.0f32, 1.0f32);
        for face in (0..hull.faces().len()).filter(|&face| face != best_face) {
            let (side_normal, side_offset) = world_plane(hull_collider, hull, face);
            let d0 = side_normal.dot(segment[0]) - side_offset;
            let d1 = side_normal.dot(segment[1]) - side_offset;
            if d0 > 0.0 && d1 > 0.0 {
                t0 = 1.0;
                t1 = 0.0;
                break;
            } else if d0 > 0.0 {
                t0 = t0.max(d0 / (d0 - d1));
            } else if d1 > 0.0 {
                t1 = t1.min(d0 / (d0 - d1));
            }
        }
        if t0 <= t1 {
            clipped = [segment[0].lerp(segment[1], t0), segment[0].lerp(segment[1], t1)];
        }
    }

    let mut manifold = ContactManifold::new(normal);
    for point in clipped {
        let separation = normal.dot(point) - offset;
        if separation < radius {
            manifold.add_point(ContactPoint {
                position: point - normal * ((radius + separation) * 0.5),
                penetration: radius - separation,
            });
        }
    }
    manifold
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AxisKind {
    FaceA(usize),
    FaceB(usize),
    /// The world space directions of the two edges the axis is made of.
    Edge(Vec3, Vec3),
}

#[derive(Debug, Clone, Copy)]
struct Axis {
    /// Points from b towards a.
    normal: Vec3,
    separation: f32,
    kind: AxisKind,
}

fn projection_range(vertices: &[Vec3], axis: Vec3) -> (f32, f32) {
    (vertices.iter()).fold((f32::INFINITY, f32::NEG_INFINITY), |(min, max), v| {
        let d = axis.dot(*v);
        (min.min(d), max.max(d))
    })
}

fn hull_hull(a: &Collider, hull_a: &Hull, b: &Collider, hull_b: &Hull) -> ContactManifold {
    let vertices_a = world_vertices(a, hull_a);
    let vertices_b = world_vertices(b, hull_b);

    let mut best_a: Option<Axis> = None;
    for face in 0..hull_a.faces().len() {
        let (normal, offset) = world_plane(a, hull_a, face);
        let separation = projection_range(&vertices_b, normal).0 - offset;
        if separation > 0.0 {
            return ContactManifold::default();
        }
        if best_a.is_none_or(|best| separation > best.separation) {
            best_a = Some(Axis {
                normal: -normal,
                separation,
                kind: AxisKind::FaceA(face),
            });
        }
    }

    let mut best_b: Option<Axis> = None;
    for face in 0..hull_b.faces().len() {
        let (normal, offset) = world_plane(b, hull_b, face);
        let separation = projection_range(&vertices_a, normal).0 - offset;
        if separation > 0.0 {
            return ContactManifold::default();
        }
        if best_b.is_none_or(|best| separation > best.separation) {
            best_b = Some(Axis {
                normal,
                separation,
                kind: AxisKind::FaceB(face),
            });
        }
    }

    let (Some(best_a), Some(best_b)) = (best_a, best_b) else {
        return ContactManifold::default();
    };
    let mut best = if best_b.separation > best_a.separation + FACE_AXIS_TOLERANCE {
        best_b
    } else {
        best_a
    };

    let center_offset = a.world_position() - b.world_position();
    for &local_edge_a in hull_a.edge_directions() {
        let edge_a = a.world_rotation() * local_edge_a;
        for &local_edge_b in hull_b.edge_directions() {
            let edge_b = b.world_rotation() * local_edge_b;
            let Some(mut axis) = edge_a.cross(edge_b).try_normalize() else {
                continue;
            };
            if axis.dot(center_offset) < 0.0 {
                axis = -axis;
            }
            let (min_a, _) = projection_range(&vertices_a, axis);
            let (_, max_b) = projection_range(&vertices_b, axis);
            let separation = min_a - max_b;
            if separation > 0.0 {
                return ContactManifold::default();
            }
            if separation > best.separation + EDGE_AXIS_TOLERANCE {
                best = Axis {
                    normal: axis,
                    separation,
                    kind: AxisKind::Edge(edge_a, edge_b),
                };
            }
        }
    }

    let manifold = match best.kind {
        AxisKind::FaceA(face) => {
            face_contact(a, hull_a, face, &vertices_a, b, hull_b, &vertices_b).flipped()
        }
        AxisKind::FaceB(face) => face_contact(b, hull_b, face, &vertices_b, a, hull_a, &vertices_a),
        AxisKind::Edge(..) => ContactManifold::default(),
    };
    if !manifold.is_empty() {
        return manifold;
    }

    // Edge-edge contacts get a single point between the closest points of
    // the two supporting edges. Faces that failed to clip (which should only
    // happen due to rounding) use the deepest points of the hulls instead.
    let edges = match best.kind {
        AxisKind::Edge(edge_a, edge_b) => supporting_edge(hull_a, &vertices_a, edge_a, -best.normal)
            .zip(supporting_edge(hull_b, &vertices_b, edge_b, best.normal)),
        _ => None,
    };
    let position = match edges {
        Some(((a0, a1), (b0, b1))) => {
            let (s, t) = closest_segment_parameters(a0, a1, b0, b1);
            (a0.lerp(a1, s) + b0.lerp(b1, t)) * 0.5
        }
        None => (support(&vertices_a, -best.normal) + support(&vertices_b, best.normal)) * 0.5,
    };
    let mut manifold = ContactManifold::new(best.normal);
    manifold.add_point(ContactPoint {
        position,
        penetration: -best.separation,
    });
    manifold
}

/// The edge of the hull parallel to `direction` that reaches furthest
/// towards `towards`.
fn supporting_edge(hull: &Hull, vertices: &[Vec3], direction: Vec3, towards: Vec3) -> Option<(Vec3, Vec3)> {
    let direction = direction.normalize_or_zero();
    let mut best: Option<((Vec3, Vec3), f32)> = None;
    for face in hull.faces() {
        let count = face.vertices.len();
        for i in 0..count {
            let start = vertices[face.vertices[i] as usize];
            let end = vertices[face.vertices[(i + 1) % count] as usize];
            let parallel = (end - start).normalize_or_zero().cross(direction).length() < PARALLEL_TOLERANCE;
            let reach = (start + end).dot(towards);
            if parallel && best.is_none_or(|(_, best_reach)| reach > best_reach) {
                best = Some(((start, end), reach));
            }
        }
    }
    best.map(|(edge, _)| edge)
}

/// Generates contact points by clipping the incident hull's face most facing
/// the reference face against the sides of the reference face. The normal
/// points out of the reference hull.
fn face_contact(
    reference: &Collider,
    reference_hull: &Hull,
    reference_face: usize,
    reference_vertices: &[Vec3],
    incident: &Collider,
    incident_hull: &Hull,
    incident_vertices: &[Vec3],
) -> ContactManifold {
    let (normal, offset) = world_plane(reference, reference_hull, reference_face);

    let incident_face = (0..incident_hull.faces().len())
        .map(|face| (face, world_plane(incident, incident_hull, face).0.dot(normal)))
        .min_by(|(_, a), (_, b)| a.total_cmp(b))
        .map(|(face, _)| face);
    let Some(incident_face) = incident_face else {
        return ContactManifold::default();
    };

    let mut polygon: ArrayVec<Vec3, 32> = (incident_hull.faces()[incident_face].vertices.iter())
        .map(|&i| incident_vertices[i as usize])
        .collect();

    let reference_polygon = &reference_hull.faces()[reference_face].vertices;
    let n = reference_polygon.len();
    for k in 0..n {
        let p0 = reference_vertices[reference_polygon[k] as usize];
        let p1 = reference_vertices[reference_polygon[(k + 1) % n] as usize];
        let side_normal = (p1 - p0).cross(normal);
        polygon = clip_polygon(&polygon, side_normal, side_normal.dot(p0));
        if polygon.is_empty() {
            break;
        }
    }

    let mut candidates = ArrayVec::<ContactPoint, 32>::new();
    for point in polygon {
        let separation = normal.dot(point) - offset;
        if separation <= 0.0 {
            candidates.push(ContactPoint {
                position: point - normal * (separation * 0.5),
                penetration: -separation,
            });
        }
    }
    candidates.sort_unstable_by(|a, b| b.penetration.total_cmp(&a.penetration));

    let mut manifold = ContactManifold::new(normal);
    for point in candidates {
        manifold.add_point(point);
    }
    manifold
}

/// Sutherland-Hodgman: keeps the part of the polygon where `normal.dot(p) <=
/// offset`.
fn clip_polygon(polygon: &[Vec3], normal: Vec3, offset: f32) -> ArrayVec<Vec3, 32> {
    let mut result = ArrayVec::new();
    let Some(&last) = polygon.last() else {
        return result;
    };
    let mut previous = last;
    let mut previous_distance = normal.dot(previous) - offset;
    for &current in polygon {
        let distance = normal.dot(current) - offset;
        if (previous_distance <= 0.0) != (distance <= 0.0) {
            let t = previous_distance / (previous_distance - distance);
            let _ = result.try_push(previous.lerp(current, t));
        }
        if distance <= 0.0 {
            let _ = result.try_push(current);
        }
        previous = current;
        previous_distance = distance;
    }
    result
}

fn support(points: &[Vec3], direction: Vec3) -> Vec3 {
    (points.iter().copied())
        .max_by(|a, b| a.dot(direction).total_cmp(&b.dot(direction)))
        .unwrap_or(Vec3::ZERO)
}

#[derive(Debug, Clone, Copy)]
enum GjkResult {
    Separated {
        point_a: Vec3,
        point_b: Vec3,
        distance: f32,
    },
    Overlapping,
}

/// A point of the Minkowski difference `a - b`, along with the points of `a`
/// and `b` it was made from.
#[derive(Debug, Clone, Copy)]
struct SupportPoint {
    w: Vec3,
    a: Vec3,
    b: Vec3,
}

fn minkowski_support(a: &[Vec3], b: &[Vec3], direction: Vec3) -> SupportPoint {
    let a = support(a, direction);
    let b = support(b, -direction);
    SupportPoint { w: a - b, a, b }
}

/// Simplex points with their barycentric weights.
type WeightedSimplex = ArrayVec<(SupportPoint, f32), 4>;

/// Finds the closest points between the convex hulls of the two point sets
/// with the GJK distance algorithm.
fn gjk_closest_points(a: &[Vec3], b: &[Vec3]) -> GjkResult {
    const MAX_ITERATIONS: usize = 32;
    const RELATIVE_TOLERANCE: f32 = 1e-6;

    let (Some(&first_a), Some(&first_b)) = (a.first(), b.first()) else {
        return GjkResult::Overlapping;
    };
    let initial = minkowski_support(a, b, first_b - first_a);
    let mut simplex = WeightedSimplex::new();
    simplex.push((initial, 1.0));
    let mut closest = initial.w;

    for _ in 0..MAX_ITERATIONS {
        let distance_squared = closest.length_squared();
        if distance_squared < 1e-12 {
            return GjkResult::Overlapping;
        }
        let new_point = minkowski_support(a, b, -closest);
        let progress = distance_squared - closest.dot(new_point.w);
        let already_in_simplex = (simplex.iter())
            .any(|(p, _)| p.w.distance_squared(new_point.w) < 1e-12);
        if progress <= RELATIVE_TOLERANCE * distance_squared || already_in_simplex {
            break;
        }

        let mut points = ArrayVec::<SupportPoint, 4>::new();
        points.extend(simplex.iter().map(|(p, _)| *p));
        points.push(new_point);
        let reduced = closest_on_simplex(&points);
        if reduced.len() == 4 {
            return GjkResult::Overlapping;
        }
        let new_closest: Vec3 = reduced.iter().map(|(p, weight)| p.w * *weight).sum();
        if new_closest.length_squared() >= distance_squared {
            break;
        }
        simplex = reduced;
        closest = new_closest;
    }

    let point_a = simplex.iter().map(|(p, weight)| p.a * *weight).sum();
    let point_b = simplex.iter().map(|(p, weight)| p.b * *weight).sum();
    GjkResult::Separated {
        point_a,
        point_b,
        distance: closest.length(),
    }
}

/// Returns the smallest sub-simplex containing the point of the simplex
/// closest to the origin, with the weights of that point. If the origin is
/// inside a tetrahedron, returns all four points.
fn closest_on_simplex(points: &[SupportPoint]) -> WeightedSimplex {
    let mut result = WeightedSimplex::new();
    match *points {
        [a] => result.push((a, 1.0)),
        [a, b] => {
            let ab = b.w - a.w;
            let t = (-a.w.dot(ab) / ab.length_squared().max(1e-20)).clamp(0.0, 1.0);
            push_weighted(&mut result, &[(a, 1.0 - t), (b, t)]);
        }
        [a, b, c] => return closest_on_triangle(a, b, c),
        [a, b, c, d] => {
            let faces = [(a, b, c, d), (a, c, d, b), (a, d, b, c), (b, d, c, a)];
            let mut best: Option<(WeightedSimplex, f32)> = None;
            for (p, q, r, opposite) in faces {
                if !origin_outside_of_plane(p.w, q.w, r.w, opposite.w) {
                    continue;
                }
                let candidate = closest_on_triangle(p, q, r);
                let point: Vec3 = candidate.iter().map(|(s, weight)| s.w * *weight).sum();
                let distance_squared = point.length_squared();
                if best.as_ref().is_none_or(|(_, best)| distance_squared < *best) {
                    best = Some((candidate, distance_squared));
                }
            }
            match best {
                Some((closest, _)) => return closest,
                None => {
                    for p in [a, b, c, d] {
                        result.push((p, 0.25));
                    }
                }
            }
        }
        _ => {}
    }
    result
}

fn push_weighted(result: &mut WeightedSimplex, points: &[(SupportPoint, f32)]) {
    for &(point, weight) in points {
        if weight > 0.0 {
            result.push((point, weight));
        }
    }
    if result.is_empty() {
        if let Some(&(point, _)) = points.first() {
            result.push((point, 1.0));
        }
    }
}

fn origin_outside_of_plane(a: Vec3, b: Vec3, c: Vec3, opposite: Vec3) -> bool {
    let normal = (b - a).cross(c - a);
    let side_of_origin = (-a).dot(normal);
    let side_of_opposite = (opposite - a).dot(normal);
    // A flat tetrahedron can't contain the origin, so all of its faces are
    // checked.
    side_of_opposite * side_of_opposite < 1e-12 || side_of_origin * side_of_opposite < 0.0
}

/// Closest point of a triangle to the origin, based on the Voronoi regions
/// of the triangle.
fn closest_on_triangle(a: SupportPoint, b: SupportPoint, c: SupportPoint) -> WeightedSimplex {
    let mut result = WeightedSimplex::new();
    let ab = b.w - a.w;
    let ac = c.w - a.w;
    let ap = -a.w;
    let d1 = ab.dot(ap);
    let d2 = ac.dot(ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        push_weighted(&mut result, &[(a, 1.0)]);
        return result;
    }

    let bp = -b.w;
    let d3 = ab.dot(bp);
    let d4 = ac.dot(bp);
    if d3 >= 0.0 && d4 <= d3 {
        push_weighted(&mut result, &[(b, 1.0)]);
        return result;
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        push_weighted(&mut result, &[(a, 1.0 - v), (b, v)]);
        return result;
    }

    let cp = -c.w;
    let d5 = ab.dot(cp);
    let d6 = ac.dot(cp);
    if d6 >= 0.0 && d5 <= d6 {
        push_weighted(&mut result, &[(c, 1.0)]);
        return result;
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        push_weighted(&mut result, &[(a, 1.0 - w), (c, w)]);
        return result;
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        push_weighted(&mut result, &[(b, 1.0 - w), (c, w)]);
        return result;
    }

    let denominator = va + vb + vc;
    if denominator.abs() < 1e-20 {
        // Degenerate (collinear) triangle, use its longest edge instead.
        let edges = [(a, b), (a, c), (b, c)];
        let (p, q) = (edges.into_iter())
            .max_by(|(p0, q0), (p1, q1)| {
                (q0.w - p0.w).length_squared().total_cmp(&(q1.w - p1.w).length_squared())
            })
            .unwrap_or((a, b));
        return closest_on_simplex(&[p, q]);
    }
    let v = vb / denominator;
    let w = vc / denominator;
    push_weighted(&mut result, &[(a, 1.0 - v - w), (b, v), (c, w)]);
    result
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};

    use super::{collide, gjk_closest_points, GjkResult};
    use crate::{
        collections::PoolHandle,
        physics::{Collider, ColliderSettings},
    };

    fn collider_at(settings: ColliderSettings, position: Vec3, rotation: Quat) -> Collider {
        let shape = settings.shape.clone();
        let mut collider = Collider::new(&settings, shape, PoolHandle::from_raw_parts(0, 0));
        collider.update_world_transform(position, rotation);
        collider
    }

    fn sphere(radius: f32, position: Vec3) -> Collider {
        collider_at(ColliderSettings::sphere(radius, 1.0), position, Quat::IDENTITY)
    }

    fn cuboid(half_extents: Vec3, position: Vec3, rotation: Quat) -> Collider {
        let settings = ColliderSettings::cuboid(half_extents, 1.0).unwrap();
        collider_at(settings, position, rotation)
    }

    fn capsule(radius: f32, length: f32, position: Vec3, rotation: Quat) -> Collider {
        collider_at(ColliderSettings::capsule(radius, length, 1.0), position, rotation)
    }

    fn assert_near(expected: f32, actual: f32) {
        assert!((expected - actual).abs() < 1e-3, "expected {expected}, got {actual}");
    }

    #[test]
    fn spheres_normal_points_towards_the_first() {
        let a = sphere(1.0, Vec3::new(0.0, 1.5, 0.0));
        let b = sphere(1.0, Vec3::ZERO);
        let manifold = collide(&a, &b);
        assert_eq!(1, manifold.points.len());
        assert!(manifold.normal.abs_diff_eq(Vec3::Y, 1e-6));
        assert_near(0.5, manifold.points[0].penetration);
        assert!(manifold.points[0].position.abs_diff_eq(Vec3::new(0.0, 0.75, 0.0), 1e-5));

        let flipped = collide(&b, &a);
        assert!(flipped.normal.abs_diff_eq(Vec3::NEG_Y, 1e-6));
        assert!(collide(&sphere(1.0, Vec3::new(0.0, 2.1, 0.0)), &b).is_empty());
    }

    #[test]
    fn sphere_rests_on_box() {
        let ball = sphere(0.5, Vec3::new(0.2, 1.4, -0.3));
        let floor = cuboid(Vec3::ONE, Vec3::ZERO, Quat::IDENTITY);
        let manifold = collide(&ball, &floor);
        assert_eq!(1, manifold.points.len());
        assert!(manifold.normal.abs_diff_eq(Vec3::Y, 1e-4));
        assert_near(0.1, manifold.points[0].penetration);
        assert_near(0.95, manifold.points[0].position.y);

        let reversed = collide(&floor, &ball);
        assert!(reversed.normal.abs_diff_eq(Vec3::NEG_Y, 1e-4));

        let above = sphere(0.5, Vec3::new(0.0, 1.6, 0.0));
        assert!(collide(&above, &floor).is_empty());
    }

    #[test]
    fn sphere_center_inside_box_is_pushed_out_the_nearest_face() {
        let ball = sphere(0.5, Vec3::new(0.1, 0.8, 0.0));
        let block = cuboid(Vec3::ONE, Vec3::ZERO, Quat::IDENTITY);
        let manifold = collide(&ball, &block);
        assert_eq!(1, manifold.points.len());
        assert!(manifold.normal.abs_diff_eq(Vec3::Y, 1e-4));
        assert_near(0.7, manifold.points[0].penetration);
    }

    #[test]
    fn sphere_touches_capsule_side() {
        let ball = sphere(0.5, Vec3::new(0.9, 0.3, 0.0));
        let pole = capsule(0.5, 2.0, Vec3::ZERO, Quat::IDENTITY);
        let manifold = collide(&ball, &pole);
        assert_eq!(1, manifold.points.len());
        assert!(manifold.normal.abs_diff_eq(Vec3::X, 1e-5));
        assert_near(0.1, manifold.points[0].penetration);
    }

    #[test]
    fn parallel_capsules_touch_at_two_points() {
        let lying = Quat::from_rotation_z(core::f32::consts::FRAC_PI_2);
        let a = capsule(0.5, 2.0, Vec3::new(0.5, 0.9, 0.0), lying);
        let b = capsule(0.5, 2.0, Vec3::ZERO, lying);
        let manifold = collide(&a, &b);
        assert_eq!(2, manifold.points.len());
        assert!(manifold.normal.abs_diff_eq(Vec3::Y, 1e-4));
        for point in &manifold.points {
            assert_near(0.1, point.penetration);
        }

        let crossed = capsule(0.5, 2.0, Vec3::new(0.0, 0.9, 0.0), Quat::from_rotation_x(1.0));
        assert_eq!(1, collide(&crossed, &b).points.len());
    }

    #[test]
    fn capsule_lying_on_box_touches_at_both_ends() {
        let lying = Quat::from_rotation_x(core::f32::consts::FRAC_PI_2);
        let pill = capsule(0.25, 1.0, Vec3::new(0.0, 1.2, 0.0), lying);
        let floor = cuboid(Vec3::new(2.0, 1.0, 2.0), Vec3::ZERO, Quat::IDENTITY);
        let manifold = collide(&pill, &floor);
        assert_eq!(2, manifold.points.len());
        assert!(manifold.normal.abs_diff_eq(Vec3::Y, 1e-4));
        for point in &manifold.points {
            assert_near(0.05, point.penetration);
            assert_near(0.975, point.position.y);
        }
    }

    #[test]
    fn stacked_boxes_touch_at_four_corners() {
        let top = cuboid(Vec3::splat(0.5), Vec3::new(0.0, 1.4, 0.0), Quat::IDENTITY);
        let bottom = cuboid(Vec3::ONE, Vec3::ZERO, Quat::IDENTITY);
        let manifold = collide(&top, &bottom);
        assert_eq!(4, manifold.points.len());
        assert!(manifold.normal.abs_diff_eq(Vec3::Y, 1e-4));
        for point in &manifold.points {
            assert_near(0.1, point.penetration);
            assert_near(0.95, point.position.y);
            assert_near(0.5, point.position.x.abs());
            assert_near(0.5, point.position.z.abs());
        }

        let twisted = cuboid(
            Vec3::splat(0.5),
            Vec3::new(0.0, 1.4, 0.0),
            Quat::from_rotation_y(core::f32::consts::FRAC_PI_4),
        );
        let manifold = collide(&twisted, &bottom);
        assert_eq!(4, manifold.points.len());
        assert!(manifold.normal.abs_diff_eq(Vec3::Y, 1e-4));

        let apart = cuboid(Vec3::splat(0.5), Vec3::new(0.0, 1.6, 0.0), Quat::IDENTITY);
        assert!(collide(&apart, &bottom).is_empty());
    }

    #[test]
    fn capsule_through_box_touches_inside_the_box() {
        let along_x = Quat::from_rotation_z(core::f32::consts::FRAC_PI_2);
        let rod = capsule(0.1, 4.0, Vec3::new(0.0, 0.3, 0.0), along_x);
        let block = cuboid(Vec3::splat(0.5), Vec3::ZERO, Quat::IDENTITY);
        let manifold = collide(&rod, &block);
        assert_eq!(2, manifold.points.len());
        assert!(manifold.normal.abs_diff_eq(Vec3::Y, 1e-4));
        for point in &manifold.points {
            assert_near(0.3, point.penetration);
            assert_near(0.35, point.position.y);
            assert_near(0.5, point.position.x.abs());
            assert_near(0.0, point.position.z);
        }
    }

    #[test]
    fn crossed_box_edges_touch_where_they_cross() {
        let bottom = cuboid(
            Vec3::ONE,
            Vec3::ZERO,
            Quat::from_rotation_z(core::f32::consts::FRAC_PI_4),
        );
        let top = cuboid(
            Vec3::ONE,
            Vec3::new(0.0, 2.0 * core::f32::consts::SQRT_2 - 0.1, 0.0),
            Quat::from_rotation_x(core::f32::consts::FRAC_PI_4),
        );
        let manifold = collide(&top, &bottom);
        assert_eq!(1, manifold.points.len());
        assert!(manifold.normal.abs_diff_eq(Vec3::Y, 1e-3));
        let point = manifold.points[0];
        assert_near(0.1, point.penetration);
        assert_near(core::f32::consts::SQRT_2 - 0.05, point.position.y);
        assert_near(0.0, point.position.x);
        assert_near(0.0, point.position.z);

        // Same contact, with the normal pointing the other way.
        let swapped = collide(&bottom, &top);
        assert!(swapped.normal.abs_diff_eq(Vec3::NEG_Y, 1e-3));
        assert!(swapped.points[0].position.abs_diff_eq(point.position, 1e-3));
    }

    #[test]
    fn gjk_finds_distance_between_segment_and_box() {
        let corners = [
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(-1.0, 1.0, -1.0),
            Vec3::new(1.0, 1.0, -1.0),
            Vec3::new(-1.0, -1.0, 1.0),
            Vec3::new(1.0, -1.0, 1.0),
            Vec3::new(-1.0, 1.0, 1.0),
            Vec3::new(1.0, 1.0, 1.0),
        ];
        let segment = [Vec3::new(3.0, -5.0, 0.5), Vec3::new(3.0, 5.0, 0.5)];
        match gjk_closest_points(&segment, &corners) {
            GjkResult::Separated {
                point_a,
                point_b,
                distance,
            } => {
                assert!((distance - 2.0).abs() < 1e-4);
                assert!((point_a.x - 3.0).abs() < 1e-4);
                assert!((point_b.x - 1.0).abs() < 1e-4);
            }
            GjkResult::Overlapping => panic!("the segment is outside the box"),
        }

        let through = [Vec3::new(0.0, -5.0, 0.0), Vec3::new(0.0, 5.0, 0.0)];
        assert!(matches!(
            gjk_closest_points(&through, &corners),
            GjkResult::Overlapping
        ));
    }
}
