// SPDX-FileCopyrightText: 2024 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

use core::{
    alloc::Layout,
    fmt::Debug,
    mem::{needs_drop, transmute, MaybeUninit},
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
    slice,
};

#[allow(unused_imports)] // mentioned in docs
use arrayvec::ArrayVec;
use bytemuck::{fill_zeroes, Zeroable};

use crate::allocators::MemoryResource;

/// A fixed-capacity contiguous growable array type.
///
/// Named like Vec since it's used similarly, but this type does *not* allocate
/// more memory as needed. Very cheap to create and push to. Unlike
/// [`ArrayVec`], the capacity can be picked at runtime, and the backing memory
/// does not need to be initialized until it's actually used.
///
/// The backing memory is returned to the [`MemoryResource`] it was allocated
/// from when the vec is dropped.
pub struct FixedVec<'a, T> {
    uninit_slice: &'a mut [MaybeUninit<T>],
    initialized_len: usize,
    /// Where `uninit_slice` was allocated from, None if it wasn't.
    memory: Option<&'a dyn MemoryResource>,
}

impl<'a, T> FixedVec<'a, T> {
    /// Creates a new [`FixedVec`] with zero capacity, but also no need for an
    /// allocator.
    pub fn empty() -> FixedVec<'static, T> {
        FixedVec {
            uninit_slice: &mut [],
            initialized_len: 0,
            memory: None,
        }
    }

    /// Creates a new [`FixedVec`] with enough space for `capacity` elements of
    /// type `T`. Returns None if the memory resource does not have enough free
    /// space.
    pub fn new(memory: &'a dyn MemoryResource, capacity: usize) -> Option<FixedVec<'a, T>> {
        let layout = Layout::array::<T>(capacity).ok()?;
        if layout.size() == 0 {
            // Zero-sized arrays (zero capacity, or zero-sized T) don't need
            // backing memory, any well-aligned pointer will do.
            // Safety: a dangling pointer is valid for zero-sized reads and
            // writes, and the slice covers zero bytes.
            let uninit_slice =
                unsafe { slice::from_raw_parts_mut(NonNull::dangling().as_ptr(), capacity) };
            return Some(FixedVec {
                uninit_slice,
                initialized_len: 0,
                memory: None,
            });
        }

        let ptr = memory.allocate(layout)?;
        // Safety: the pointer is non-null, aligned for T, and points to
        // `capacity * size_of::<T>()` bytes which are exclusively ours until
        // they're deallocated in drop. Uninitialized memory is valid for
        // MaybeUninit.
        let uninit_slice = unsafe {
            slice::from_raw_parts_mut(ptr.as_ptr() as *mut MaybeUninit<T>, capacity)
        };
        Some(FixedVec {
            uninit_slice,
            initialized_len: 0,
            memory: Some(memory),
        })
    }

    /// Appends the value to the back of the array. If there's no capacity left,
    /// returns the given value back wrapped in a [`Result::Err`].
    ///
    /// If `T` doesn't implement [`Debug`] and you want to unwrap the result,
    /// use [`Result::ok`] and then unwrap.
    pub fn push(&mut self, value: T) -> Result<(), T> {
        let i = self.initialized_len;
        let Some(uninit_at_i) = self.uninit_slice.get_mut(i) else {
            return Err(value);
        };

        // The previous contents of the slot are never dropped here, which is
        // correct since everything past `initialized_len` is uninitialized:
        // all the functions that shrink the array also drop or move out the
        // values.
        uninit_at_i.write(value);
        self.initialized_len = i + 1;

        Ok(())
    }

    /// If non-empty, returns the final element and shortens the array by one.
    pub fn pop(&mut self) -> Option<T> {
        if self.initialized_len == 0 {
            return None;
        }
        let i = self.initialized_len - 1;

        // Safety: since i < initialized_len, the MaybeUninit at that index is
        // definitely initialized. Double-reads (thus double-drops) are avoided
        // by decrementing initialized_len right after, which means that the
        // previous value in the slice won't be used as if it were initialized.
        let value = unsafe { self.uninit_slice[i].assume_init_read() };
        self.initialized_len -= 1;

        Some(value)
    }

    /// Inserts the value at `index`, shifting all the elements after it
    /// forward. Returns the value back if the array is full or `index` is
    /// past the end.
    pub fn insert(&mut self, index: usize, value: T) -> Result<(), T> {
        let len = self.initialized_len;
        if index > len || self.is_full() {
            return Err(value);
        }
        let base = self.uninit_slice.as_mut_ptr();
        // Safety: `len < capacity`, so the shifted range `index + 1..=len`
        // is in bounds. The values are moved bitwise, so the slot at `index`
        // ends up logically uninitialized and is written right after.
        unsafe {
            ptr::copy(base.add(index), base.add(index + 1), len - index);
            (*base.add(index)).write(value);
        }
        self.initialized_len = len + 1;
        Ok(())
    }

    /// Removes and returns the element at `index`, shifting all the elements
    /// after it back. Returns None if `index` is out of bounds.
    pub fn remove(&mut self, index: usize) -> Option<T> {
        let len = self.initialized_len;
        if index >= len {
            return None;
        }
        let base = self.uninit_slice.as_mut_ptr();
        // Safety: `index < len`, so the value is initialized, and after
        // reading it out, the following values are moved over it, leaving
        // the last slot logically uninitialized (as the length is reduced).
        let value = unsafe {
            let value = (*base.add(index)).assume_init_read();
            ptr::copy(base.add(index + 1), base.add(index), len - index - 1);
            value
        };
        self.initialized_len = len - 1;
        Some(value)
    }

    /// Removes and returns the element at `index`, replacing it with the last
    /// element. Doesn't preserve ordering, but is O(1). Returns None if
    /// `index` is out of bounds.
    pub fn swap_remove(&mut self, index: usize) -> Option<T> {
        if index >= self.initialized_len {
            return None;
        }
        let last = self.initialized_len - 1;
        self.swap(index, last);
        self.pop()
    }

    /// Removes all the elements for which `keep` returns false, preserving
    /// the order of the rest.
    pub fn retain<F: FnMut(&mut T) -> bool>(&mut self, mut keep: F) {
        let mut kept = 0;
        for i in 0..self.initialized_len {
            if keep(&mut self[i]) {
                self.swap(kept, i);
                kept += 1;
            }
        }
        self.truncate(kept);
    }

    /// Empties out the array, dropping the currently contained values.
    pub fn clear(&mut self) {
        self.truncate(0);
    }

    /// Shortens the array to be the given length if it's currently longer. Any
    /// values past the new length are dropped.
    pub fn truncate(&mut self, new_len: usize) {
        if new_len >= self.initialized_len {
            return;
        }

        let old_len = self.initialized_len;
        // Set the length first so a panicking drop can't cause double-drops.
        self.initialized_len = new_len;
        if needs_drop::<T>() {
            for initialized_value in &mut self.uninit_slice[new_len..old_len] {
                // Safety: these were all below the old `initialized_len`, so
                // they're initialized, and they're no longer considered part
                // of the array.
                unsafe { initialized_value.assume_init_drop() };
            }
        }
    }

    /// Returns the amount of elements this array can hold.
    pub fn capacity(&self) -> usize {
        self.uninit_slice.len()
    }

    /// Returns `true` if there's no more capacity for additional elements.
    pub fn is_full(&self) -> bool {
        self.initialized_len == self.uninit_slice.len()
    }
}

impl<T: Zeroable> FixedVec<'_, T> {
    /// Fills out the rest of the array's capacity with zeroed values.
    pub fn fill_with_zeroes(&mut self) {
        fill_zeroes(&mut self.uninit_slice[self.initialized_len..]);
        // Safety: everything up until `self.initialized_len` must've already
        // been initialized, and now the rest is zeroed, and zeroed memory is
        // valid for T (because it's Zeroable) => the whole slice is
        // initialized.
        self.initialized_len = self.uninit_slice.len();
    }
}

impl<T> Drop for FixedVec<'_, T> {
    fn drop(&mut self) {
        self.clear();
        if let Some(memory) = self.memory {
            let capacity = self.uninit_slice.len();
            let ptr = self.uninit_slice.as_mut_ptr() as *mut u8;
            // Safety: the slice was allocated from `memory` in `new` with
            // this exact layout (which was valid then too), and all the
            // values have been dropped above.
            unsafe {
                let layout = Layout::array::<T>(capacity).unwrap_unchecked();
                memory.deallocate(NonNull::new_unchecked(ptr), layout);
            }
        }
    }
}

impl<T> Deref for FixedVec<'_, T> {
    type Target = [T];

    fn deref<'a>(&'a self) -> &'a Self::Target {
        let initialized_slice = &self.uninit_slice[..self.initialized_len];
        // Safety: `MaybeUninit<T>` is identical to `T` except that it might be
        // uninitialized, and all values up to `self.initialized_len` are
        // initialized.
        unsafe { transmute::<&'a [MaybeUninit<T>], &'a [T]>(initialized_slice) }
    }
}

impl<T> DerefMut for FixedVec<'_, T> {
    fn deref_mut<'a>(&'a mut self) -> &'a mut Self::Target {
        let initialized_slice = &mut self.uninit_slice[..self.initialized_len];
        // Safety: `MaybeUninit<T>` is identical to `T` except that it might be
        // uninitialized, and all values up to `self.initialized_len` are
        // initialized.
        unsafe { transmute::<&'a mut [MaybeUninit<T>], &'a mut [T]>(initialized_slice) }
    }
}

impl<T: Debug> Debug for FixedVec<'_, T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let slice: &[T] = self;
        f.debug_list().entries(slice).finish()
    }
}
