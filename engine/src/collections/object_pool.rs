// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    cmp::Ordering,
    fmt::Debug,
    hash::{Hash, Hasher},
    iter::FusedIterator,
    marker::PhantomData,
};

use crate::{allocators::MemoryResource, collections::FixedVec};

const NIL: u32 = u32::MAX;

/// Handle to a value in a [`FixedObjectPool<T>`].
///
/// Contains the index of the slot and the generation of the slot at the time
/// of insertion, so handles to removed values don't accidentally refer to
/// values inserted later into the same slot.
pub struct PoolHandle<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> PoolHandle<T> {
    /// The slot index of the value. Stable for the lifetime of the value, and
    /// always less than the capacity of the pool.
    pub fn index(self) -> u32 {
        self.index
    }

    /// The generation of the slot when the value was inserted.
    pub fn generation(self) -> u32 {
        self.generation
    }

    /// A handle that isn't from any pool, for tests that need one.
    #[cfg(test)]
    pub(crate) fn from_raw_parts(index: u32, generation: u32) -> PoolHandle<T> {
        PoolHandle {
            index,
            generation,
            _marker: PhantomData,
        }
    }
}

// Manual impls, since derives would require T to implement these too.
impl<T> Clone for PoolHandle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for PoolHandle<T> {}

impl<T> PartialEq for PoolHandle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for PoolHandle<T> {}

impl<T> PartialOrd for PoolHandle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PoolHandle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.index, self.generation).cmp(&(other.index, other.generation))
    }
}

impl<T> Hash for PoolHandle<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Debug for PoolHandle<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PoolHandle({}v{})", self.index, self.generation)
    }
}

struct Slot<T> {
    value: Option<T>,
    generation: u32,
    /// Previous live slot. Unused for free slots.
    prev: u32,
    /// Next live slot for live slots, next free slot for free slots.
    next: u32,
}

/// A fixed-capacity pool of `T`, with stable addresses and O(1) insertion and
/// removal.
///
/// All the slots are allocated up front, so values never move while they're
/// in the pool. Free slots are kept in a free list, and live slots in a
/// doubly-linked list, which makes iteration visit only the live values, in
/// insertion order.
pub struct FixedObjectPool<'a, T> {
    slots: FixedVec<'a, Slot<T>>,
    free_head: u32,
    live_head: u32,
    live_tail: u32,
    len: u32,
}

impl<T> Debug for FixedObjectPool<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FixedObjectPool")
            .field("len", &self.len)
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

impl<'a, T> FixedObjectPool<'a, T> {
    /// Creates a pool for `capacity` values, allocating all of the slots from
    /// `memory`. Returns None if the allocation fails, or if `capacity`
    /// doesn't fit in a u32.
    pub fn new(memory: &'a dyn MemoryResource, capacity: usize) -> Option<FixedObjectPool<'a, T>> {
        if capacity >= NIL as usize {
            return None;
        }
        let mut slots = FixedVec::new(memory, capacity)?;
        for i in 0..capacity as u32 {
            let next = if i + 1 < capacity as u32 { i + 1 } else { NIL };
            let slot = Slot {
                value: None,
                generation: 0,
                prev: NIL,
                next,
            };
            if slots.push(slot).is_err() {
                unreachable!("the slots vec was allocated for exactly `capacity` slots");
            }
        }
        Some(FixedObjectPool {
            slots,
            free_head: if capacity > 0 { 0 } else { NIL },
            live_head: NIL,
            live_tail: NIL,
            len: 0,
        })
    }

    /// Moves the value into the pool. If the pool is full, the value is
    /// returned back, and the pool is left untouched.
    pub fn insert(&mut self, value: T) -> Result<PoolHandle<T>, T> {
        match self.insert_with(|| value) {
            Ok(handle) => Ok(handle),
            Err(f) => Err(f()),
        }
    }

    /// Constructs a value in the pool with `f`. If the pool is full, `f` isn't
    /// called, and it's returned back instead.
    pub fn insert_with<F: FnOnce() -> T>(&mut self, f: F) -> Result<PoolHandle<T>, F> {
        let index = self.free_head;
        if index == NIL {
            return Err(f);
        }
        let tail = self.live_tail;
        let slot = &mut self.slots[index as usize];
        self.free_head = slot.next;
        slot.value = Some(f());
        slot.prev = tail;
        slot.next = NIL;
        let generation = slot.generation;

        if tail == NIL {
            self.live_head = index;
        } else {
            self.slots[tail as usize].next = index;
        }
        self.live_tail = index;
        self.len += 1;

        Ok(PoolHandle {
            index,
            generation,
            _marker: PhantomData,
        })
    }

    /// Removes the value from the pool and returns it. Returns None if the
    /// handle is stale (the value has already been removed).
    pub fn remove(&mut self, handle: PoolHandle<T>) -> Option<T> {
        if !self.contains(handle) {
            return None;
        }
        let index = handle.index;
        let slot = &mut self.slots[index as usize];
        let value = slot.value.take();
        let (prev, next) = (slot.prev, slot.next);
        slot.generation = slot.generation.wrapping_add(1);
        slot.prev = NIL;
        slot.next = self.free_head;
        self.free_head = index;

        if prev == NIL {
            self.live_head = next;
        } else {
            self.slots[prev as usize].next = next;
        }
        if next == NIL {
            self.live_tail = prev;
        } else {
            self.slots[next as usize].prev = prev;
        }
        self.len -= 1;

        value
    }

    /// Removes and drops all the values, invalidating all existing handles.
    pub fn clear(&mut self) {
        let mut index = self.live_head;
        while index != NIL {
            let slot = &mut self.slots[index as usize];
            let next = slot.next;
            slot.value = None;
            slot.generation = slot.generation.wrapping_add(1);
            slot.prev = NIL;
            slot.next = self.free_head;
            self.free_head = index;
            index = next;
        }
        self.live_head = NIL;
        self.live_tail = NIL;
        self.len = 0;
    }

    /// Returns true if the handle refers to a value currently in the pool.
    pub fn contains(&self, handle: PoolHandle<T>) -> bool {
        self.get(handle).is_some()
    }

    pub fn get(&self, handle: PoolHandle<T>) -> Option<&T> {
        let slot = self.slots.get(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: PoolHandle<T>) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index as usize)?;
        if slot.generation != handle.generation {
            return None;
        }
        slot.value.as_mut()
    }

    /// Returns mutable references to two distinct values at once. Returns
    /// None if either handle is stale or if they refer to the same value.
    pub fn get2_mut(&mut self, a: PoolHandle<T>, b: PoolHandle<T>) -> Option<(&mut T, &mut T)> {
        if a.index == b.index || !self.contains(a) || !self.contains(b) {
            return None;
        }
        let (low, high) = (a.index.min(b.index) as usize, a.index.max(b.index) as usize);
        let (head, tail) = self.slots.split_at_mut(high);
        let (slot_low, slot_high) = (&mut head[low], &mut tail[0]);
        let (slot_a, slot_b) = if a.index < b.index {
            (slot_low, slot_high)
        } else {
            (slot_high, slot_low)
        };
        Some((slot_a.value.as_mut()?, slot_b.value.as_mut()?))
    }

    /// Returns the handle of the value in the slot at `index`, if it's live.
    pub fn handle_at(&self, index: u32) -> Option<PoolHandle<T>> {
        let slot = self.slots.get(index as usize)?;
        slot.value.as_ref()?;
        Some(PoolHandle {
            index,
            generation: slot.generation,
            _marker: PhantomData,
        })
    }

    /// Iterates over the values in the pool, in insertion order.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            slots: &self.slots,
            next: self.live_head,
            remaining: self.len as usize,
        }
    }

    /// Iterates over mutable references to the values in the pool, in
    /// insertion order.
    pub fn iter_mut(&mut self) -> IterMut<'_, T> {
        IterMut {
            slots: self.slots.as_mut_ptr(),
            next: self.live_head,
            remaining: self.len as usize,
            _marker: PhantomData,
        }
    }

    /// Iterates over the handles of the values in the pool, in insertion
    /// order.
    pub fn handles(&self) -> impl Iterator<Item = PoolHandle<T>> + '_ {
        self.iter().map(|(handle, _)| handle)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn is_full(&self) -> bool {
        self.free_head == NIL
    }
}

/// Iterator returned by [`FixedObjectPool::iter`].
pub struct Iter<'b, T> {
    slots: &'b [Slot<T>],
    next: u32,
    remaining: usize,
}

impl<'b, T> Iterator for Iter<'b, T> {
    type Item = (PoolHandle<T>, &'b T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let index = self.next;
        let slot = &self.slots[index as usize];
        self.next = slot.next;
        self.remaining -= 1;
        let handle = PoolHandle {
            index,
            generation: slot.generation,
            _marker: PhantomData,
        };
        Some((handle, slot.value.as_ref()?))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}
impl<T> FusedIterator for Iter<'_, T> {}

/// Iterator returned by [`FixedObjectPool::iter_mut`].
pub struct IterMut<'b, T> {
    slots: *mut Slot<T>,
    next: u32,
    remaining: usize,
    _marker: PhantomData<&'b mut [Slot<T>]>,
}

impl<'b, T> Iterator for IterMut<'b, T> {
    type Item = (PoolHandle<T>, &'b mut T);

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == NIL {
            return None;
        }
        let index = self.next;
        // Safety: live list indices are always within the slots, and the
        // pool is mutably borrowed for 'b. The live list never visits a slot
        // twice, so each returned reference points to a distinct slot.
        let slot = unsafe { &mut *self.slots.add(index as usize) };
        self.next = slot.next;
        self.remaining -= 1;
        let handle = PoolHandle {
            index,
            generation: slot.generation,
            _marker: PhantomData,
        };
        Some((handle, slot.value.as_mut()?))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<T> ExactSizeIterator for IterMut<'_, T> {}
impl<T> FusedIterator for IterMut<'_, T> {}

#[cfg(test)]
mod tests {
    use core::sync::atomic::{AtomicI32, Ordering};

    use crate::{
        allocators::{static_allocator, LinearAllocator, StaticAllocator},
        collections::FixedObjectPool,
        test_platform::TestPlatform,
    };

    #[test]
    fn addresses_survive_interleaved_inserts_and_removes() {
        let platform = TestPlatform::new();
        let mut pool = FixedObjectPool::<[u64; 4]>::new(&platform, 16).unwrap();
        let kept = pool.insert([1, 2, 3, 4]).unwrap();
        let kept_addr = pool.get(kept).unwrap() as *const [u64; 4];

        let mut others = arrayvec::ArrayVec::<_, 15>::new();
        for i in 0..15 {
            others.push(pool.insert([i; 4]).unwrap());
        }
        for handle in others.drain(..).step_by(2) {
            pool.remove(handle).unwrap();
        }
        for i in 0..7 {
            pool.insert([100 + i; 4]).unwrap();
        }

        assert_eq!(kept_addr, pool.get(kept).unwrap() as *const [u64; 4]);
        assert_eq!(&[1, 2, 3, 4], pool.get(kept).unwrap());
    }

    #[test]
    fn full_pool_returns_the_value_back() {
        static ARENA: &StaticAllocator = static_allocator!(4096);
        let alloc = LinearAllocator::new(ARENA, 1024).unwrap();
        let mut pool = FixedObjectPool::new(&alloc, 3).unwrap();
        let handles = [
            pool.insert('a').unwrap(),
            pool.insert('b').unwrap(),
            pool.insert('c').unwrap(),
        ];
        assert!(pool.is_full());
        assert_eq!(Err('d'), pool.insert('d'));
        let mut called = false;
        assert!(pool.insert_with(|| {
            called = true;
            'e'
        })
        .is_err());
        assert!(!called, "the constructor shouldn't run on a full pool");
        for (handle, expected) in handles.into_iter().zip(['a', 'b', 'c']) {
            assert_eq!(Some(&expected), pool.get(handle));
        }
    }

    #[test]
    fn iterates_every_live_value_once() {
        let platform = TestPlatform::new();
        let mut pool = FixedObjectPool::new(&platform, 64).unwrap();
        let mut handles = arrayvec::ArrayVec::<_, 64>::new();
        for i in 0..64u32 {
            handles.push(pool.insert(i).unwrap());
        }
        for &handle in handles.iter().filter(|h| h.index() % 3 == 0) {
            pool.remove(handle).unwrap();
        }
        for i in 0..10 {
            pool.insert(1000 + i).unwrap();
        }

        let mut seen = [0u8; 64];
        for (handle, value) in pool.iter() {
            assert_eq!(pool.get(handle), Some(value));
            seen[handle.index() as usize] += 1;
        }
        assert_eq!(pool.len(), seen.iter().filter(|&&count| count == 1).count());
        assert!(seen.iter().all(|&count| count <= 1));
        assert_eq!(pool.len(), pool.iter().len());

        for (_, value) in pool.iter_mut() {
            *value += 1;
        }
        let sum: u32 = pool.iter().map(|(_, v)| *v).sum();
        let expected: u32 = (0..64u32).filter(|i| i % 3 != 0).map(|i| i + 1).sum::<u32>()
            + (0..10).map(|i| 1001 + i).sum::<u32>();
        assert_eq!(expected, sum);
    }

    #[test]
    fn stale_handles_are_rejected() {
        let platform = TestPlatform::new();
        let mut pool = FixedObjectPool::new(&platform, 1).unwrap();
        let old = pool.insert("old").unwrap();
        assert_eq!(Some("old"), pool.remove(old));
        let new = pool.insert("new").unwrap();

        assert_eq!(old.index(), new.index(), "the slot should be reused");
        assert_ne!(old, new);
        assert_eq!(None, pool.get(old));
        assert_eq!(None, pool.remove(old));
        assert_eq!(Some(&"new"), pool.get(new));

        pool.clear();
        assert!(pool.is_empty());
        assert!(!pool.contains(new));
    }

    #[test]
    fn get2_mut_requires_distinct_live_values() {
        let platform = TestPlatform::new();
        let mut pool = FixedObjectPool::new(&platform, 4).unwrap();
        let a = pool.insert(1).unwrap();
        let b = pool.insert(2).unwrap();
        let (x, y) = pool.get2_mut(a, b).unwrap();
        core::mem::swap(x, y);
        assert_eq!(Some(&2), pool.get(a));
        assert!(pool.get2_mut(a, a).is_none());
        pool.remove(b);
        assert!(pool.get2_mut(a, b).is_none());
    }

    #[test]
    fn drops_values() {
        static LIVE: AtomicI32 = AtomicI32::new(0);
        struct Counted;
        impl Counted {
            fn new() -> Counted {
                LIVE.fetch_add(1, Ordering::Relaxed);
                Counted
            }
        }
        impl Drop for Counted {
            fn drop(&mut self) {
                LIVE.fetch_add(-1, Ordering::Relaxed);
            }
        }

        let platform = TestPlatform::new();
        let mut pool = FixedObjectPool::new(&platform, 8).unwrap();
        let first = pool.insert_with(Counted::new).ok().unwrap();
        for _ in 0..7 {
            assert!(pool.insert_with(Counted::new).is_ok());
        }
        assert_eq!(8, LIVE.load(Ordering::Relaxed));
        drop(pool.remove(first));
        assert_eq!(7, LIVE.load(Ordering::Relaxed));
        pool.clear();
        assert_eq!(0, LIVE.load(Ordering::Relaxed));
        for _ in 0..3 {
            assert!(pool.insert_with(Counted::new).is_ok());
        }
        drop(pool);
        assert_eq!(0, LIVE.load(Ordering::Relaxed));
        assert_eq!(0, platform.live_allocations());
    }
}
