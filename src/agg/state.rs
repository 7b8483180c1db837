// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use xxhash_rust::xxh3::xxh3_64;

/// Number of registers; 2^10 buckets keeps the dense state at 1 KiB.
pub const HLL_REGISTERS: usize = 1_024;

const HLL_PRECISION: u32 = 10;

/// Dense HyperLogLog sketch
///
/// The mergeable aggregate state behind hll-union columns. Values are
/// hashed with xxh3; union is the register-wise maximum. The serialized
/// form is the raw register array - estimation on the query side works
/// off the same state.
#[derive(Clone)]
pub struct HllSketch {
    registers: Box<[u8]>,
}

impl Default for HllSketch {
    fn default() -> Self {
        Self {
            registers: vec![0; HLL_REGISTERS].into_boxed_slice(),
        }
    }
}

impl HllSketch {
    /// Creates a sketch holding exactly one hashed value.
    #[must_use]
    pub fn of_value(value: &[u8]) -> Self {
        let mut sketch = Self::default();
        sketch.insert_value(value);
        sketch
    }

    /// Hashes `value` and inserts it.
    pub fn insert_value(&mut self, value: &[u8]) {
        self.insert_hash(xxh3_64(value));
    }

    /// Inserts a pre-computed 64-bit hash.
    pub fn insert_hash(&mut self, hash: u64) {
        let bucket = (hash & (HLL_REGISTERS as u64 - 1)) as usize;
        let rest = hash >> HLL_PRECISION;

        // The top PRECISION bits of `rest` are always zero, so the rank of
        // an all-zero remainder caps at 64 - PRECISION + 1.
        #[allow(clippy::cast_possible_truncation)]
        let rank = (rest.leading_zeros() - HLL_PRECISION + 1) as u8;

        let slot = &mut self.registers[bucket];
        *slot = (*slot).max(rank);
    }

    /// Register-wise union with another sketch.
    pub fn merge(&mut self, other: &Self) {
        for (dst, src) in self.registers.iter_mut().zip(other.registers.iter()) {
            *dst = (*dst).max(*src);
        }
    }

    /// Raw harmonic-mean cardinality estimate.
    #[must_use]
    pub fn estimate(&self) -> f64 {
        let m = HLL_REGISTERS as f64;
        let alpha = 0.7213 / (1.0 + 1.079 / m);

        let raw: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-i32::from(r)))
            .sum();
        let raw = alpha * m * m / raw;

        // Linear counting for the small-range correction
        let zeros = self.registers.iter().filter(|&&r| r == 0).count();
        if raw <= 2.5 * m && zeros > 0 {
            m * (m / zeros as f64).ln()
        } else {
            raw
        }
    }

    /// The serialized state: the register array verbatim.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        self.registers.to_vec()
    }

    /// Reconstructs a sketch from [`HllSketch::to_bytes`] output.
    ///
    /// # Panics
    ///
    /// Panics on a wrong-sized payload; feeding malformed aggregate state
    /// into the write path is an upstream bug.
    #[must_use]
    pub fn from_bytes(bytes: &[u8]) -> Self {
        assert_eq!(HLL_REGISTERS, bytes.len(), "malformed hll state");
        Self {
            registers: bytes.to_vec().into_boxed_slice(),
        }
    }
}

impl std::fmt::Debug for HllSketch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HllSketch(~{:.0})", self.estimate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn hll_merge_is_register_max() {
        let mut a = HllSketch::of_value(b"a");
        let b = HllSketch::of_value(b"b");

        let mut merged_other_way = b.clone();
        merged_other_way.merge(&a);
        a.merge(&b);

        assert_eq!(a.to_bytes(), merged_other_way.to_bytes());
    }

    #[test]
    fn hll_estimate_is_in_the_ballpark() {
        let mut sketch = HllSketch::default();
        for i in 0..10_000u32 {
            sketch.insert_value(&i.to_le_bytes());
        }

        let estimate = sketch.estimate();
        assert!(
            (7_000.0..13_000.0).contains(&estimate),
            "estimate way off: {estimate}"
        );
    }

    #[test]
    fn hll_roundtrips_serialized_state() {
        let sketch = HllSketch::of_value(b"hello");
        let restored = HllSketch::from_bytes(&sketch.to_bytes());
        assert_eq!(sketch.to_bytes(), restored.to_bytes());
    }

    #[test]
    fn hll_duplicate_values_do_not_move_estimate() {
        let mut a = HllSketch::of_value(b"x");
        let before = a.to_bytes();
        a.insert_value(b"x");
        assert_eq!(before, a.to_bytes());
    }
}
