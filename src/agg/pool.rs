// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::agg::state::HllSketch;
use roaring::RoaringBitmap;

/// A mergeable aggregate state living outside the row block
///
/// Cells of object-typed columns store a pool handle until finalization
/// serializes the object into the row's arena.
#[derive(Clone, Debug)]
pub enum AggObject {
    /// HyperLogLog sketch
    Hll(HllSketch),

    /// Roaring bitmap
    Bitmap(RoaringBitmap),
}

impl AggObject {
    /// Merges `other` into `self`.
    ///
    /// # Panics
    ///
    /// Panics when the states are of different kinds; the schema guarantees
    /// a single kind per column.
    pub fn merge(&mut self, other: &Self) {
        match (self, other) {
            (Self::Hll(dst), Self::Hll(src)) => dst.merge(src),
            (Self::Bitmap(dst), Self::Bitmap(src)) => *dst |= src,
            _ => panic!("aggregate state kind mismatch"),
        }
    }

    /// Serializes the state for the finalized row.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Hll(sketch) => sketch.to_bytes(),
            Self::Bitmap(bitmap) => {
                let mut bytes = Vec::with_capacity(bitmap.serialized_size());
                #[allow(clippy::expect_used)]
                bitmap
                    .serialize_into(&mut bytes)
                    .expect("Vec writes are infallible");
                bytes
            }
        }
    }
}

/// Pool of aggregate objects referenced by encoded rows
///
/// Two instances cooperate inside a memtable: a scratch pool co-scoped
/// with the buffer arena (reset after every insert) and a durable pool
/// co-scoped with the table arena. Handles are indices, so transferring
/// objects between pools only requires rebasing the handles.
#[derive(Default)]
pub struct AggObjectPool {
    objects: Vec<AggObject>,
}

impl AggObjectPool {
    /// Takes ownership of `obj`, returning its handle.
    #[allow(clippy::cast_possible_truncation)]
    pub fn acquire(&mut self, obj: AggObject) -> u32 {
        self.objects.push(obj);
        (self.objects.len() - 1) as u32
    }

    /// The object behind `handle`.
    #[must_use]
    pub fn get(&self, handle: u32) -> &AggObject {
        &self.objects[handle as usize]
    }

    /// Mutable variant of [`AggObjectPool::get`].
    #[must_use]
    pub fn get_mut(&mut self, handle: u32) -> &mut AggObject {
        &mut self.objects[handle as usize]
    }

    /// Replaces the object behind `handle`.
    pub fn replace(&mut self, handle: u32, obj: AggObject) {
        self.objects[handle as usize] = obj;
    }

    /// Moves every object out of `scratch` into this pool.
    ///
    /// Returns the rebase offset: a scratch handle `h` now resolves here
    /// as `h + offset`. The scratch pool is left empty.
    #[allow(clippy::cast_possible_truncation)]
    pub fn acquire_from(&mut self, scratch: &mut Self) -> u32 {
        let base = self.objects.len() as u32;
        self.objects.append(&mut scratch.objects);
        base
    }

    /// Drops all objects at once.
    pub fn reset(&mut self) {
        self.objects.clear();
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the pool holds no objects.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn pool_handoff_rebases_handles() {
        let mut durable = AggObjectPool::default();
        let mut scratch = AggObjectPool::default();

        durable.acquire(AggObject::Hll(HllSketch::of_value(b"resident")));

        let h = scratch.acquire(AggObject::Hll(HllSketch::of_value(b"incoming")));
        assert_eq!(0, h);

        let base = durable.acquire_from(&mut scratch);
        assert_eq!(1, base);
        assert!(scratch.is_empty());
        assert_eq!(2, durable.len());

        let AggObject::Hll(sketch) = durable.get(base + h) else {
            panic!("expected hll");
        };
        assert_eq!(HllSketch::of_value(b"incoming").to_bytes(), sketch.to_bytes());
    }

    #[test]
    fn bitmap_union_through_merge() {
        let mut a = AggObject::Bitmap(RoaringBitmap::from_iter([1u32, 2, 3]));
        let b = AggObject::Bitmap(RoaringBitmap::from_iter([3u32, 4]));

        a.merge(&b);

        let AggObject::Bitmap(bitmap) = &a else {
            panic!("expected bitmap");
        };
        assert_eq!(4, bitmap.len());
    }
}
