// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::mem;

use arrayvec::ArrayVec;
use glam::Vec3;

use super::{
    narrow_phase::{ContactManifold, MAX_CONTACTS},
    BodyHandle, ColliderHandle, PoolKind,
};
use crate::{allocators::MemoryResource, collections::FixedVec};

/// Contacts closer than this to a contact of the previous step are
/// considered to be the same contact, and inherit its impulses.
const WARM_START_DISTANCE: f32 = 0.1;

/// Identifies an unordered pair of colliders: the same for (a, b) and (b, a).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PairKey(u64);

impl PairKey {
    pub fn new(a: ColliderHandle, b: ColliderHandle) -> PairKey {
        let (low, high) = if a.index() <= b.index() {
            (a.index(), b.index())
        } else {
            (b.index(), a.index())
        };
        PairKey(((low as u64) << 32) | high as u64)
    }
}

/// Two colliders whose bounding boxes overlap, i.e. which might be touching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColliderPair {
    pub key: PairKey,
    /// The collider with the smaller index.
    pub first: ColliderHandle,
    pub second: ColliderHandle,
}

impl ColliderPair {
    pub fn new(a: ColliderHandle, b: ColliderHandle) -> ColliderPair {
        let (first, second) = if a.index() <= b.index() { (a, b) } else { (b, a) };
        ColliderPair {
            key: PairKey::new(a, b),
            first,
            second,
        }
    }
}

/// Per-contact values calculated once per step for the solver.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub(crate) struct ContactSolverData {
    /// Contact position relative to the first body's center of mass.
    pub offset_a: Vec3,
    pub offset_b: Vec3,
    pub normal_mass: f32,
    pub tangent_mass: [f32; 2],
    /// Target separating velocity, from penetration correction and
    /// restitution.
    pub velocity_bias: f32,
}

/// A contact point with the impulses applied at it, which carry over to the
/// next step if the contact persists.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub position: Vec3,
    pub penetration: f32,
    /// Accumulated impulse along the arbiter's normal.
    pub normal_impulse: f32,
    /// Accumulated friction impulse along the arbiter's two tangents.
    pub tangent_impulse: [f32; 2],
    pub(crate) solver: ContactSolverData,
}

/// The persistent contact state between two touching colliders.
#[derive(Debug, Clone)]
pub struct CollisionArbiter {
    pair: ColliderPair,
    /// The bodies of `pair.first` and `pair.second`.
    bodies: (BodyHandle, BodyHandle),
    /// Points from the second collider towards the first.
    normal: Vec3,
    tangents: [Vec3; 2],
    friction: f32,
    restitution: f32,
    pub(crate) contacts: ArrayVec<Contact, MAX_CONTACTS>,
}

impl CollisionArbiter {
    /// Creates an arbiter for the freshly generated contact manifold, which
    /// should have its normal pointing towards the pair's first collider.
    pub(crate) fn new(
        pair: ColliderPair,
        bodies: (BodyHandle, BodyHandle),
        manifold: &ContactManifold,
        friction: f32,
        restitution: f32,
    ) -> CollisionArbiter {
        let contacts = (manifold.points.iter())
            .map(|point| Contact {
                position: point.position,
                penetration: point.penetration,
                normal_impulse: 0.0,
                tangent_impulse: [0.0; 2],
                solver: ContactSolverData::default(),
            })
            .collect();
        let (tangent, bitangent) = manifold.normal.any_orthonormal_pair();
        CollisionArbiter {
            pair,
            bodies,
            normal: manifold.normal,
            tangents: [tangent, bitangent],
            friction,
            restitution,
            contacts,
        }
    }

    pub fn key(&self) -> PairKey {
        self.pair.key
    }

    pub fn pair(&self) -> ColliderPair {
        self.pair
    }

    pub fn bodies(&self) -> (BodyHandle, BodyHandle) {
        self.bodies
    }

    pub fn involves(&self, body: BodyHandle) -> bool {
        self.bodies.0 == body || self.bodies.1 == body
    }

    pub fn normal(&self) -> Vec3 {
        self.normal
    }

    pub fn tangents(&self) -> [Vec3; 2] {
        self.tangents
    }

    pub fn friction(&self) -> f32 {
        self.friction
    }

    pub fn restitution(&self) -> f32 {
        self.restitution
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    /// Copies the impulses of `previous`'s contacts to the nearby contacts
    /// of this arbiter. The friction impulses are projected onto this
    /// arbiter's tangents, which may differ from the previous ones.
    fn warm_start_from(&mut self, previous: &CollisionArbiter) {
        if previous.normal.dot(self.normal) < 0.9 {
            return;
        }
        for contact in &mut self.contacts {
            let nearest = (previous.contacts.iter())
                .map(|old| (old, old.position.distance_squared(contact.position)))
                .filter(|(_, distance_squared)| *distance_squared < WARM_START_DISTANCE.powi(2))
                .min_by(|(_, a), (_, b)| a.total_cmp(b));
            if let Some((old, _)) = nearest {
                let old_friction = previous.tangents[0] * old.tangent_impulse[0]
                    + previous.tangents[1] * old.tangent_impulse[1];
                contact.normal_impulse = old.normal_impulse;
                contact.tangent_impulse = [
                    old_friction.dot(self.tangents[0]),
                    old_friction.dot(self.tangents[1]),
                ];
            }
        }
    }
}

/// The arbiters of the current step, sorted by [`PairKey`].
///
/// Double-buffered: each step the arbiters are rebuilt into the second
/// buffer from the broad phase's candidates, carrying over the impulses of
/// the pairs which were already touching, and then the buffers are swapped.
/// Pairs which are no longer candidates or touching are dropped right away.
pub struct ArbiterSet<'a> {
    current: FixedVec<'a, CollisionArbiter>,
    previous: FixedVec<'a, CollisionArbiter>,
}

impl<'a> ArbiterSet<'a> {
    pub fn new(memory: &'a dyn MemoryResource, capacity: usize) -> Option<ArbiterSet<'a>> {
        Some(ArbiterSet {
            current: FixedVec::new(memory, capacity)?,
            previous: FixedVec::new(memory, capacity)?,
        })
    }

    pub fn arbiters(&self) -> &[CollisionArbiter] {
        &self.current
    }

    pub(crate) fn arbiters_mut(&mut self) -> &mut [CollisionArbiter] {
        &mut self.current
    }

    pub fn len(&self) -> usize {
        self.current.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    /// Replaces the arbiters with the ones for the `candidates` that are
    /// touching according to `narrow_phase`. The candidates must be sorted
    /// by key, with no duplicates.
    ///
    /// If there's not enough room for all the touching pairs, the rest are
    /// skipped and [`PoolKind::Arbiters`] is returned.
    pub(crate) fn update<F>(&mut self, candidates: &[ColliderPair], mut narrow_phase: F) -> Result<(), PoolKind>
    where
        F: FnMut(&ColliderPair) -> Option<CollisionArbiter>,
    {
        mem::swap(&mut self.current, &mut self.previous);
        self.current.clear();

        let mut result = Ok(());
        let mut previous_index = 0;
        for pair in candidates {
            while previous_index < self.previous.len() && self.previous[previous_index].key() < pair.key {
                previous_index += 1;
            }
            let Some(mut arbiter) = narrow_phase(pair) else {
                continue;
            };
            if let Some(previous) = self.previous.get(previous_index) {
                if previous.key() == pair.key {
                    arbiter.warm_start_from(previous);
                }
            }
            if self.current.push(arbiter).is_err() {
                result = Err(PoolKind::Arbiters);
                break;
            }
        }

        self.previous.clear();
        result
    }

    /// Removes every arbiter involving the body.
    pub(crate) fn remove_body(&mut self, body: BodyHandle) {
        self.current.retain(|arbiter| !arbiter.involves(body));
    }

    pub(crate) fn clear(&mut self) {
        self.current.clear();
    }
}

#[cfg(test)]
mod tests {
    use arrayvec::ArrayVec;
    use glam::Vec3;

    use super::{ArbiterSet, ColliderPair, CollisionArbiter, PairKey};
    use crate::{
        collections::PoolHandle,
        physics::{
            narrow_phase::{ContactManifold, ContactPoint},
            PoolKind,
        },
        test_platform::TestPlatform,
    };

    fn pair(a: u32, b: u32) -> ColliderPair {
        ColliderPair::new(PoolHandle::from_raw_parts(a, 0), PoolHandle::from_raw_parts(b, 0))
    }

    fn arbiter_for(pair: &ColliderPair, positions: &[Vec3]) -> CollisionArbiter {
        let mut manifold = ContactManifold {
            normal: Vec3::Y,
            points: ArrayVec::new(),
        };
        for &position in positions {
            manifold.points.push(ContactPoint {
                position,
                penetration: 0.01,
            });
        }
        let bodies = (PoolHandle::from_raw_parts(0, 0), PoolHandle::from_raw_parts(1, 0));
        CollisionArbiter::new(*pair, bodies, &manifold, 0.5, 0.0)
    }

    #[test]
    fn pair_keys_are_order_independent() {
        let (a, b) = (PoolHandle::from_raw_parts(3, 1), PoolHandle::from_raw_parts(7, 0));
        assert_eq!(PairKey::new(a, b), PairKey::new(b, a));
        assert_eq!(a, ColliderPair::new(b, a).first);
        assert!(PairKey::new(a, b) < PairKey::new(b, PoolHandle::from_raw_parts(8, 0)));
    }

    #[test]
    fn impulses_carry_over_to_nearby_contacts() {
        let platform = TestPlatform::new();
        let mut arbiters = ArbiterSet::new(&platform, 4).unwrap();
        let candidates = [pair(0, 1)];
        let first = [Vec3::ZERO, Vec3::X];
        arbiters.update(&candidates, |p| Some(arbiter_for(p, &first))).unwrap();
        for contact in &mut arbiters.arbiters_mut()[0].contacts {
            contact.normal_impulse = 2.0;
            contact.tangent_impulse = [0.5, -0.5];
        }
        let tangents = arbiters.arbiters()[0].tangents();
        let friction = tangents[0] * 0.5 - tangents[1] * 0.5;

        let moved = [Vec3::new(0.05, 0.0, 0.0), Vec3::new(5.0, 0.0, 0.0)];
        arbiters.update(&candidates, |p| Some(arbiter_for(p, &moved))).unwrap();
        let contacts = arbiters.arbiters()[0].contacts();
        assert_eq!(2.0, contacts[0].normal_impulse);
        let carried = tangents[0] * contacts[0].tangent_impulse[0]
            + tangents[1] * contacts[0].tangent_impulse[1];
        assert!(carried.abs_diff_eq(friction, 1e-6));
        assert_eq!(0.0, contacts[1].normal_impulse);
    }

    #[test]
    fn separated_pairs_are_dropped_immediately() {
        let platform = TestPlatform::new();
        let mut arbiters = ArbiterSet::new(&platform, 4).unwrap();
        let candidates = [pair(0, 1), pair(0, 2), pair(1, 2)];
        arbiters.update(&candidates, |p| Some(arbiter_for(p, &[Vec3::ZERO]))).unwrap();
        assert_eq!(3, arbiters.len());

        // (0, 2) is still a candidate but not touching, (1, 2) isn't a
        // candidate anymore.
        let candidates = [pair(0, 1), pair(0, 2)];
        arbiters
            .update(&candidates, |p| (p.key == pair(0, 1).key).then(|| arbiter_for(p, &[Vec3::ZERO])))
            .unwrap();
        assert_eq!(1, arbiters.len());
        assert_eq!(pair(0, 1).key, arbiters.arbiters()[0].key());

        arbiters.update(&[], |_| None).unwrap();
        assert!(arbiters.is_empty());
    }

    #[test]
    fn overflow_keeps_the_arbiters_that_fit() {
        let platform = TestPlatform::new();
        let mut arbiters = ArbiterSet::new(&platform, 2).unwrap();
        let candidates = [pair(0, 1), pair(0, 2), pair(1, 2)];
        let result = arbiters.update(&candidates, |p| Some(arbiter_for(p, &[Vec3::ZERO])));
        assert_eq!(Err(PoolKind::Arbiters), result);
        assert_eq!(2, arbiters.len());
    }
}
