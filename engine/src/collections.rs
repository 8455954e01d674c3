// SPDX-FileCopyrightText: 2025 Jens Pitkänen <jens.pitkanen@helsinki.fi>
//
// SPDX-License-Identifier: GPL-3.0-or-later

mod object_pool;
mod vec;

pub use object_pool::{FixedObjectPool, Iter, IterMut, PoolHandle};
pub use vec::FixedVec;
