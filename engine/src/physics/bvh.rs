// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use arrayvec::ArrayVec;
use glam::Vec3;

use super::{Aabb, Ray};
use crate::{allocators::MemoryResource, collections::FixedVec};

const NIL: u32 = u32::MAX;
/// Depth of the traversal stacks. A balanced tree of every leaf that fits in
/// memory is nowhere near this deep.
const STACK_DEPTH: usize = 64;

/// Handle to a leaf of a [`BvHierarchy`]. Stays the same for the lifetime of
/// the leaf, even when the leaf is moved around the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BvhHandle(u32);

#[derive(Debug, Clone, Copy)]
struct BvhNode<T> {
    /// For leaves, the fattened box of the entry. For internal nodes, the
    /// union of the children's boxes.
    aabb: Aabb,
    /// Parent for nodes in the tree, next free node for free nodes.
    parent: u32,
    /// [`NIL`] for leaves.
    children: [u32; 2],
    /// 0 for leaves, -1 for free nodes.
    height: i32,
    user_data: Option<T>,
}

impl<T> BvhNode<T> {
    fn is_leaf(&self) -> bool {
        self.children[0] == NIL
    }
}

/// A dynamic bounding volume hierarchy: a binary tree of axis-aligned boxes,
/// for finding the entries near some point, box, or ray, without going
/// through every entry.
///
/// The leaves are fattened by a margin, and stretched in the direction the
/// entry is moving, so that small movements don't require changes to the
/// tree. Insertions pick the spot that grows the tree's surface area the
/// least, and rotations keep the tree balanced.
///
/// All nodes are allocated up front, enough for `max_leaves` leaves.
pub struct BvHierarchy<'a, T: Copy> {
    nodes: FixedVec<'a, BvhNode<T>>,
    root: u32,
    free_list: u32,
    leaf_count: u32,
    max_leaves: u32,
    margin: f32,
    velocity_margin_scale: f32,
}

impl<'a, T: Copy> BvHierarchy<'a, T> {
    /// Allocates a tree with room for `max_leaves` entries. Leaves are
    /// fattened by `margin`, and stretched by the displacement passed to
    /// [`BvHierarchy::update_if_moved`] times `velocity_margin_scale`.
    pub fn new(
        memory: &'a dyn MemoryResource,
        max_leaves: u32,
        margin: f32,
        velocity_margin_scale: f32,
    ) -> Option<BvHierarchy<'a, T>> {
        let capacity = (max_leaves as usize * 2).max(1);
        Some(BvHierarchy {
            nodes: FixedVec::new(memory, capacity)?,
            root: NIL,
            free_list: NIL,
            leaf_count: 0,
            max_leaves,
            margin,
            velocity_margin_scale,
        })
    }

    /// Adds an entry with the given (tight) bounding box. Returns None if
    /// the tree already has `max_leaves` leaves.
    pub fn insert(&mut self, aabb: Aabb, user_data: T) -> Option<BvhHandle> {
        if self.leaf_count >= self.max_leaves {
            return None;
        }
        let leaf = self.allocate_node(BvhNode {
            aabb: aabb.expanded(self.margin),
            parent: NIL,
            children: [NIL; 2],
            height: 0,
            user_data: Some(user_data),
        })?;
        if self.insert_leaf(leaf).is_none() {
            self.free_node(leaf);
            return None;
        }
        self.leaf_count += 1;
        Some(BvhHandle(leaf))
    }

    /// Removes the entry, returning its user data. Returns None if the handle
    /// doesn't refer to a leaf of this tree.
    pub fn remove(&mut self, handle: BvhHandle) -> Option<T> {
        let user_data = self.leaf(handle)?.user_data?;
        self.remove_leaf(handle.0);
        self.free_node(handle.0);
        self.leaf_count -= 1;
        Some(user_data)
    }

    /// Updates the entry after it has moved by `displacement` and now has
    /// the bounding box `aabb`. The tree is only changed if the new box is
    /// not inside the fattened box anymore, in which case the leaf is
    /// reinserted and true is returned.
    pub fn update_if_moved(&mut self, handle: BvhHandle, aabb: Aabb, displacement: Vec3) -> bool {
        let Some(leaf) = self.leaf(handle) else {
            return false;
        };
        if leaf.aabb.contains(&aabb) {
            return false;
        }

        self.remove_leaf(handle.0);
        let fat_aabb = (aabb.expanded(self.margin))
            .swept(displacement * self.velocity_margin_scale);
        self.nodes[handle.0 as usize].aabb = fat_aabb;
        // The leaf's node is still allocated, and removing it from the tree
        // freed up one internal node, so this can't run out of nodes.
        let _ = self.insert_leaf(handle.0);
        true
    }

    pub fn user_data(&self, handle: BvhHandle) -> Option<T> {
        self.leaf(handle)?.user_data
    }

    /// The fattened bounding box of the entry.
    pub fn fat_aabb(&self, handle: BvhHandle) -> Option<Aabb> {
        Some(self.leaf(handle)?.aabb)
    }

    pub fn len(&self) -> usize {
        self.leaf_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    pub fn is_full(&self) -> bool {
        self.leaf_count >= self.max_leaves
    }

    /// Height of the tree: 0 for an empty tree or a single leaf.
    pub fn height(&self) -> u32 {
        match self.nodes.get(self.root as usize) {
            Some(root) => root.height as u32,
            None => 0,
        }
    }

    /// Calls `f` for each entry whose fattened box overlaps `aabb`, until
    /// `f` returns false.
    pub fn query_aabb<F: FnMut(BvhHandle, T) -> bool>(&self, aabb: &Aabb, f: F) {
        self.traverse(|node_aabb| node_aabb.intersects(aabb), f);
    }

    /// Calls `f` for each entry whose fattened box is within `radius` of
    /// `center`, until `f` returns false.
    pub fn query_sphere<F: FnMut(BvhHandle, T) -> bool>(&self, center: Vec3, radius: f32, f: F) {
        self.traverse(|node_aabb| node_aabb.intersects_sphere(center, radius), f);
    }

    /// Calls `f` for each entry whose fattened box is hit by the ray before
    /// `max_distance`, with the distance to the box, until `f` returns false.
    /// The entries are not visited in any particular order.
    pub fn ray_cast<F>(&self, ray: &Ray, max_distance: f32, mut f: F)
    where
        F: FnMut(BvhHandle, T, f32) -> bool,
    {
        let mut stack = ArrayVec::<u32, STACK_DEPTH>::new();
        if self.root != NIL {
            stack.push(self.root);
        }
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            let Some(distance) = node.aabb.ray_intersection(ray, max_distance) else {
                continue;
            };
            if let (true, Some(user_data)) = (node.is_leaf(), node.user_data) {
                if !f(BvhHandle(index), user_data, distance) {
                    return;
                }
            } else {
                stack.extend(node.children);
            }
        }
    }

    fn traverse<O, F>(&self, mut overlaps: O, mut f: F)
    where
        O: FnMut(&Aabb) -> bool,
        F: FnMut(BvhHandle, T) -> bool,
    {
        let mut stack = ArrayVec::<u32, STACK_DEPTH>::new();
        if self.root != NIL {
            stack.push(self.root);
        }
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if !overlaps(&node.aabb) {
                continue;
            }
            if let (true, Some(user_data)) = (node.is_leaf(), node.user_data) {
                if !f(BvhHandle(index), user_data) {
                    return;
                }
            } else {
                stack.extend(node.children);
            }
        }
    }

    fn leaf(&self, handle: BvhHandle) -> Option<&BvhNode<T>> {
        let node = self.nodes.get(handle.0 as usize)?;
        (node.height == 0 && node.is_leaf() && node.user_data.is_some()).then_some(node)
    }

    fn allocate_node(&mut self, node: BvhNode<T>) -> Option<u32> {
        if self.free_list != NIL {
            let index = self.free_list;
            self.free_list = self.nodes[index as usize].parent;
            self.nodes[index as usize] = node;
            Some(index)
        } else {
            let index = self.nodes.len() as u32;
            self.nodes.push(node).ok()?;
            Some(index)
        }
    }

    fn free_node(&mut self, index: u32) {
        let node = &mut self.nodes[index as usize];
        node.parent = self.free_list;
        node.children = [NIL; 2];
        node.height = -1;
        node.user_data = None;
        self.free_list = index;
    }

    /// Links an allocated leaf node into the tree. Returns None if there's
    /// no room for the internal node it needs.
    fn insert_leaf(&mut self, leaf: u32) -> Option<()> {
        if self.root == NIL {
            self.root = leaf;
            self.nodes[leaf as usize].parent = NIL;
            return Some(());
        }

        // Walk down the tree towards the child that would grow the least
        // from adding the leaf, until adding the leaf as a sibling of the
        // current node is cheaper than going deeper.
        let leaf_aabb = self.nodes[leaf as usize].aabb;
        let mut index = self.root;
        while !self.nodes[index as usize].is_leaf() {
            let node = &self.nodes[index as usize];
            let area = node.aabb.surface_area();
            let combined_area = node.aabb.union(&leaf_aabb).surface_area();
            let cost = 2.0 * combined_area;
            let inheritance_cost = 2.0 * (combined_area - area);
            let child_cost = |child: u32| {
                let child = &self.nodes[child as usize];
                let union_area = leaf_aabb.union(&child.aabb).surface_area();
                if child.is_leaf() {
                    union_area + inheritance_cost
                } else {
                    union_area - child.aabb.surface_area() + inheritance_cost
                }
            };
            let [first, second] = node.children;
            let (first_cost, second_cost) = (child_cost(first), child_cost(second));
            if cost < first_cost && cost < second_cost {
                break;
            }
            index = if first_cost < second_cost { first } else { second };
        }

        let sibling = index;
        let old_parent = self.nodes[sibling as usize].parent;
        let new_parent = self.allocate_node(BvhNode {
            aabb: leaf_aabb.union(&self.nodes[sibling as usize].aabb),
            parent: old_parent,
            children: [sibling, leaf],
            height: self.nodes[sibling as usize].height + 1,
            user_data: None,
        })?;
        if old_parent == NIL {
            self.root = new_parent;
        } else {
            self.replace_child(old_parent, sibling, new_parent);
        }
        self.nodes[sibling as usize].parent = new_parent;
        self.nodes[leaf as usize].parent = new_parent;

        self.refit_ancestors(new_parent);
        Some(())
    }

    /// Unlinks the leaf from the tree, freeing its parent node. The leaf
    /// node itself stays allocated.
    fn remove_leaf(&mut self, leaf: u32) {
        if leaf == self.root {
            self.root = NIL;
            return;
        }
        let parent = self.nodes[leaf as usize].parent;
        let grandparent = self.nodes[parent as usize].parent;
        let [first, second] = self.nodes[parent as usize].children;
        let sibling = if first == leaf { second } else { first };

        self.nodes[sibling as usize].parent = grandparent;
        if grandparent == NIL {
            self.root = sibling;
        } else {
            self.replace_child(grandparent, parent, sibling);
        }
        self.free_node(parent);
        self.nodes[leaf as usize].parent = NIL;
        if grandparent != NIL {
            self.refit_ancestors(grandparent);
        }
    }

    fn replace_child(&mut self, parent: u32, old_child: u32, new_child: u32) {
        let children = &mut self.nodes[parent as usize].children;
        if children[0] == old_child {
            children[0] = new_child;
        } else {
            children[1] = new_child;
        }
    }

    /// Rebalances and recalculates the boxes and heights of the nodes from
    /// `index` up to the root.
    fn refit_ancestors(&mut self, mut index: u32) {
        while index != NIL {
            index = self.balance(index);
            self.refit(index);
            index = self.nodes[index as usize].parent;
        }
    }

    fn refit(&mut self, index: u32) {
        let [first, second] = self.nodes[index as usize].children;
        let (first, second) = (&self.nodes[first as usize], &self.nodes[second as usize]);
        let aabb = first.aabb.union(&second.aabb);
        let height = 1 + first.height.max(second.height);
        let node = &mut self.nodes[index as usize];
        node.aabb = aabb;
        node.height = height;
    }

    /// If one child of `a` is more than one level taller than the other, the
    /// taller child is rotated up into `a`'s place. Returns the index of the
    /// node now at `a`'s place.
    fn balance(&mut self, a: u32) -> u32 {
        let node = &self.nodes[a as usize];
        if node.is_leaf() || node.height < 2 {
            return a;
        }
        let [b, c] = node.children;
        let balance = self.nodes[c as usize].height - self.nodes[b as usize].height;
        if balance > 1 {
            self.rotate_up(a, c, 1)
        } else if balance < -1 {
            self.rotate_up(a, b, 0)
        } else {
            a
        }
    }

    /// Rotates `child` (which is `a.children[side]`) up to replace `a`. The
    /// taller grandchild stays under `child`, the shorter one is given to
    /// `a` in `child`'s old place.
    fn rotate_up(&mut self, a: u32, child: u32, side: usize) -> u32 {
        let [f, g] = self.nodes[child as usize].children;
        let (taller, shorter) = if self.nodes[f as usize].height > self.nodes[g as usize].height {
            (f, g)
        } else {
            (g, f)
        };

        let a_parent = self.nodes[a as usize].parent;
        self.nodes[child as usize].children = [a, taller];
        self.nodes[child as usize].parent = a_parent;
        self.nodes[a as usize].parent = child;
        if a_parent == NIL {
            self.root = child;
        } else {
            self.replace_child(a_parent, a, child);
        }

        self.nodes[a as usize].children[side] = shorter;
        self.nodes[shorter as usize].parent = a;
        self.refit(a);
        self.refit(child);
        child
    }

    /// Checks the structure of the whole tree, panicking if something's
    /// off.
    #[cfg(test)]
    fn validate(&self) {
        if self.root == NIL {
            assert_eq!(0, self.leaf_count);
            return;
        }
        assert_eq!(NIL, self.nodes[self.root as usize].parent);
        let mut leaves = 0;
        let mut stack = ArrayVec::<u32, STACK_DEPTH>::new();
        stack.push(self.root);
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index as usize];
            if node.is_leaf() {
                assert_eq!(0, node.height);
                assert!(node.user_data.is_some());
                leaves += 1;
                continue;
            }
            let [first, second] = node.children;
            for child in [first, second] {
                let child_node = &self.nodes[child as usize];
                assert_eq!(index, child_node.parent);
                assert!(node.aabb.contains(&child_node.aabb));
                stack.push(child);
            }
            let (h1, h2) = (self.nodes[first as usize].height, self.nodes[second as usize].height);
            assert_eq!(1 + h1.max(h2), node.height);
        }
        assert_eq!(self.leaf_count, leaves);
    }
}

#[cfg(test)]
mod tests {
    use arrayvec::ArrayVec;
    use glam::Vec3;

    use super::{BvHierarchy, BvhHandle};
    use crate::{
        physics::{Aabb, Ray},
        test_platform::TestPlatform,
    };

    /// Xorshift, for deterministic pseudo-random test data.
    struct Random(u32);
    impl Random {
        fn next_f32(&mut self) -> f32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            (self.0 >> 8) as f32 / (1 << 24) as f32
        }

        fn point(&mut self, range: f32) -> Vec3 {
            Vec3::new(self.next_f32(), self.next_f32(), self.next_f32()) * range * 2.0
                - Vec3::splat(range)
        }
    }

    #[test]
    fn stays_valid_through_random_inserts_and_removes() {
        let platform = TestPlatform::new();
        let mut tree = BvHierarchy::<u32>::new(&platform, 128, 0.1, 2.0).unwrap();
        let mut random = Random(0x1234_5678);
        let mut handles = ArrayVec::<(BvhHandle, u32), 128>::new();

        for i in 0..128 {
            let aabb = Aabb::around(random.point(50.0), Vec3::splat(0.5 + random.next_f32()));
            handles.push((tree.insert(aabb, i).unwrap(), i));
            tree.validate();
        }
        assert_eq!(128, tree.len());
        assert!(tree.height() <= 24, "tree is badly unbalanced: {}", tree.height());
        assert_eq!(None, tree.insert(Aabb::around(Vec3::ZERO, Vec3::ONE), 1000));

        for _ in 0..64 {
            let i = (random.next_f32() * handles.len() as f32) as usize % handles.len();
            let (handle, user_data) = handles.swap_remove(i);
            assert_eq!(Some(user_data), tree.remove(handle));
            assert_eq!(None, tree.remove(handle));
            tree.validate();
        }
        assert_eq!(64, tree.len());

        for &(handle, user_data) in &handles {
            let moved = Aabb::around(random.point(50.0), Vec3::ONE);
            assert!(tree.update_if_moved(handle, moved, Vec3::new(1.0, 0.0, 0.0)));
            assert_eq!(Some(user_data), tree.user_data(handle));
            assert!(tree.fat_aabb(handle).unwrap().contains(&moved));
            tree.validate();
        }
    }

    #[test]
    fn small_movements_do_not_touch_the_tree() {
        let platform = TestPlatform::new();
        let mut tree = BvHierarchy::<u32>::new(&platform, 4, 0.1, 2.0).unwrap();
        let aabb = Aabb::around(Vec3::ZERO, Vec3::ONE);
        let handle = tree.insert(aabb, 7).unwrap();
        let nudged = Aabb::around(Vec3::new(0.05, 0.0, 0.0), Vec3::ONE);
        assert!(!tree.update_if_moved(handle, nudged, Vec3::new(0.05, 0.0, 0.0)));

        let moved = Aabb::around(Vec3::new(1.0, 0.0, 0.0), Vec3::ONE);
        assert!(tree.update_if_moved(handle, moved, Vec3::new(1.0, 0.0, 0.0)));
        // Stretched ahead by twice the displacement, plus the margin.
        let fat = tree.fat_aabb(handle).unwrap();
        assert!((fat.max.x - 4.1).abs() < 1e-5);
        assert!((fat.min.x - -0.1).abs() < 1e-5);
    }

    #[test]
    fn queries_find_every_overlapping_entry() {
        let platform = TestPlatform::new();
        let mut tree = BvHierarchy::<u32>::new(&platform, 256, 0.0, 0.0).unwrap();
        let mut random = Random(42);
        let mut boxes = ArrayVec::<Aabb, 256>::new();
        for i in 0..256 {
            let aabb = Aabb::around(random.point(20.0), Vec3::splat(0.25 + random.next_f32()));
            tree.insert(aabb, i).unwrap();
            boxes.push(aabb);
        }

        for _ in 0..32 {
            let center = random.point(20.0);
            let radius = random.next_f32() * 5.0;
            let mut found = [false; 256];
            tree.query_sphere(center, radius, |_, i| {
                assert!(!found[i as usize], "entry {i} visited twice");
                found[i as usize] = true;
                true
            });
            for (i, aabb) in boxes.iter().enumerate() {
                assert_eq!(aabb.intersects_sphere(center, radius), found[i]);
            }

            let query = Aabb::around(center, Vec3::splat(radius));
            let mut found = [false; 256];
            tree.query_aabb(&query, |_, i| {
                found[i as usize] = true;
                true
            });
            for (i, aabb) in boxes.iter().enumerate() {
                assert_eq!(aabb.intersects(&query), found[i]);
            }
        }

        let mut visited = 0;
        tree.query_aabb(&Aabb::around(Vec3::ZERO, Vec3::splat(100.0)), |_, _| {
            visited += 1;
            visited < 3
        });
        assert_eq!(3, visited);
    }

    #[test]
    fn ray_cast_reports_distance_to_boxes() {
        let platform = TestPlatform::new();
        let mut tree = BvHierarchy::<&str>::new(&platform, 4, 0.0, 0.0).unwrap();
        tree.insert(Aabb::around(Vec3::new(5.0, 0.0, 0.0), Vec3::ONE), "near").unwrap();
        tree.insert(Aabb::around(Vec3::new(10.0, 0.0, 0.0), Vec3::ONE), "far").unwrap();
        tree.insert(Aabb::around(Vec3::new(5.0, 5.0, 0.0), Vec3::ONE), "above").unwrap();

        let ray = Ray::new(Vec3::ZERO, Vec3::X).unwrap();
        let mut hits = ArrayVec::<(&str, f32), 4>::new();
        tree.ray_cast(&ray, 100.0, |_, name, distance| {
            hits.push((name, distance));
            true
        });
        hits.sort_by(|a, b| a.1.total_cmp(&b.1));
        assert_eq!(&[("near", 4.0), ("far", 9.0)], &hits[..]);

        let mut hits = 0;
        tree.ray_cast(&ray, 6.0, |_, _, _| {
            hits += 1;
            true
        });
        assert_eq!(1, hits);
    }
}
