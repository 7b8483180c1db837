// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    codec::decode_cell,
    row::{Datum, RowView},
    schema::{Schema, SortSpec},
};
use std::{cmp::Ordering, sync::Arc};

/// Total order over encoded rows
///
/// One comparator is owned per memtable; it is the single source of truth
/// for both index placement and flush order.
pub struct RowComparator {
    schema: Arc<Schema>,
    sort: SortSpec,
}

impl RowComparator {
    /// Creates a comparator for `schema` under the given sort discipline.
    ///
    /// # Panics
    ///
    /// Panics if a Z-order spec names more sort columns than key columns.
    #[must_use]
    pub fn new(schema: Arc<Schema>, sort: SortSpec) -> Self {
        if let SortSpec::ZOrder { sort_columns } = sort {
            assert!(
                (1..=schema.num_key_columns()).contains(&sort_columns),
                "z-order column count out of range"
            );
        }
        Self { schema, sort }
    }

    /// Three-way comparison of two encoded rows.
    #[must_use]
    pub fn compare(&self, a: RowView<'_>, b: RowView<'_>) -> Ordering {
        match self.sort {
            SortSpec::Lexicographic => self.compare_lex(a, b),
            SortSpec::ZOrder { sort_columns } => self
                .compare_interleaved(a, b, sort_columns)
                .then_with(|| self.compare_lex(a, b)),
        }
    }

    /// Left-to-right comparison over the key columns; nulls sort low.
    fn compare_lex(&self, a: RowView<'_>, b: RowView<'_>) -> Ordering {
        for idx in 0..self.schema.num_key_columns() {
            let ord = match (a.is_null(&self.schema, idx), b.is_null(&self.schema, idx)) {
                (true, true) => Ordering::Equal,
                (true, false) => Ordering::Less,
                (false, true) => Ordering::Greater,
                (false, false) => compare_datums(
                    decode_cell(a, &self.schema, idx),
                    decode_cell(b, &self.schema, idx),
                ),
            };

            if ord != Ordering::Equal {
                return ord;
            }
        }

        Ordering::Equal
    }

    /// Compares the bit-interleaving of the first `k` sort columns.
    ///
    /// Instead of materializing the interleaved keys, this finds the column
    /// whose bit-key differs at the highest rank; on equal ranks the
    /// earlier column wins, matching an interleave that emits column 0
    /// first within every bit rank.
    fn compare_interleaved(&self, a: RowView<'_>, b: RowView<'_>, k: usize) -> Ordering {
        let mut best_xor = 0u64;
        let mut ord = Ordering::Equal;

        for idx in 0..k {
            let ka = self.bit_key(a, idx);
            let kb = self.bit_key(b, idx);

            let xor = ka ^ kb;
            if higher_msb(xor, best_xor) {
                best_xor = xor;
                ord = ka.cmp(&kb);
            }
        }

        ord
    }

    /// Maps a sort cell onto an order-preserving `u64`. Null maps to the
    /// minimum; the lexicographic tiebreak keeps null below zero.
    #[allow(clippy::cast_sign_loss)]
    fn bit_key(&self, row: RowView<'_>, idx: usize) -> u64 {
        if row.is_null(&self.schema, idx) {
            return 0;
        }

        const SIGN: u64 = 1 << 63;

        match decode_cell(row, &self.schema, idx) {
            Datum::Int8(v) => (v as i64 as u64) ^ SIGN,
            Datum::UInt8(v) => u64::from(v),
            Datum::Int32(v) => (v as i64 as u64) ^ SIGN,
            Datum::Int64(v) => (v as u64) ^ SIGN,
            Datum::UInt64(v) => v,
            Datum::Bytes(payload) => {
                let mut buf = [0u8; 8];
                let n = payload.len().min(8);
                buf[..n].copy_from_slice(&payload[..n]);
                u64::from_be_bytes(buf)
            }
            datum => panic!("type {datum:?} cannot take part in a z-order key"),
        }
    }
}

/// Per-type comparison of two non-null cells.
///
/// # Panics
///
/// Panics on mismatched variants; rows of one memtable share a schema.
pub(crate) fn compare_datums(a: Datum<'_>, b: Datum<'_>) -> Ordering {
    match (a, b) {
        (Datum::Int8(x), Datum::Int8(y)) => x.cmp(&y),
        (Datum::UInt8(x), Datum::UInt8(y)) => x.cmp(&y),
        (Datum::Int32(x), Datum::Int32(y)) => x.cmp(&y),
        (Datum::Int64(x), Datum::Int64(y)) => x.cmp(&y),
        (Datum::UInt64(x), Datum::UInt64(y)) => x.cmp(&y),
        (Datum::Float64(x), Datum::Float64(y)) => x.total_cmp(&y),
        (Datum::Bytes(x), Datum::Bytes(y)) => x.cmp(y),
        (a, b) => panic!("cannot compare {a:?} against {b:?}"),
    }
}

/// Whether `a`'s most significant set bit outranks `b`'s.
fn higher_msb(a: u64, b: u64) -> bool {
    b < a && b < (a ^ b)
}
