// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use super::*;
use crate::{
    agg::pool::AggObjectPool,
    arena::{Arena, ArenaRef},
    codec,
    comparator::RowComparator,
    memory::MemTracker,
    row::{Datum, OwnedDatum, RowView},
    schema::{Column, FieldType, KeyModel, Schema, SortSpec},
};
use rand::{rng, RngCore};
use std::collections::BTreeSet;
use std::sync::Arc;
use test_log::test;

struct Fixture {
    schema: Arc<Schema>,
    cmp: RowComparator,
    arena: Arena,
    pool: AggObjectPool,
}

impl Fixture {
    fn new() -> Self {
        let schema = Arc::new(Schema::new(
            vec![
                Column::new("k", FieldType::Int64),
                Column::new("v", FieldType::Int64),
            ],
            1,
            KeyModel::Duplicate,
        ));
        Self {
            schema: schema.clone(),
            cmp: RowComparator::new(schema, SortSpec::Lexicographic),
            arena: Arena::new(MemTracker::root("test", None)),
            pool: AggObjectPool::default(),
        }
    }

    fn encode(&mut self, k: i64, v: i64) -> ArenaRef {
        codec::encode_row(
            &[Datum::Int64(k), Datum::Int64(v)],
            &self.schema,
            &mut self.arena,
            &mut self.pool,
        )
        .expect("encode")
    }

    fn decode(&self, row: ArenaRef) -> (i64, i64) {
        let view = RowView::new(&self.arena, row);
        let k = codec::decode_cell(view, &self.schema, 0).to_owned();
        let v = codec::decode_cell(view, &self.schema, 1).to_owned();
        match (k, v) {
            (OwnedDatum::Int64(k), OwnedDatum::Int64(v)) => (k, v),
            other => panic!("unexpected datums: {other:?}"),
        }
    }

    fn contents(&self, list: &SkipList) -> Vec<(i64, i64)> {
        list.iter().map(|row| self.decode(row)).collect()
    }
}

#[test]
fn list_orders_rows() {
    let mut fx = Fixture::new();
    let mut list = SkipList::new(DuplicateMode::Allow, rng().next_u32());

    for (k, v) in [(5, 0), (1, 1), (9, 2), (3, 3)] {
        let row = fx.encode(k, v);
        assert!(!list.insert(row, &fx.arena, &fx.cmp));
    }

    assert_eq!(4, list.len());
    assert_eq!(
        vec![(1, 1), (3, 3), (5, 0), (9, 2)],
        fx.contents(&list)
    );
}

#[test]
fn list_keeps_duplicates_in_arrival_order() {
    let mut fx = Fixture::new();
    let mut list = SkipList::new(DuplicateMode::Allow, rng().next_u32());

    for (k, v) in [(2, 10), (1, 20), (2, 30), (1, 40), (2, 50)] {
        let row = fx.encode(k, v);
        list.insert(row, &fx.arena, &fx.cmp);
    }

    assert_eq!(
        vec![(1, 20), (1, 40), (2, 10), (2, 30), (2, 50)],
        fx.contents(&list)
    );
}

#[test]
fn find_then_hinted_insert() {
    let mut fx = Fixture::new();
    let mut list = SkipList::new(DuplicateMode::Reject, rng().next_u32());

    for k in [10, 20, 30] {
        let row = fx.encode(k, 0);
        let (found, hint) = list.find(RowView::new(&fx.arena, row), &fx.arena, &fx.cmp);
        assert!(!found);
        list.insert_with_hint(row, found, &hint, &fx.arena, &fx.cmp)
            .expect("fresh hint");
    }

    let probe = fx.encode(20, 99);
    let (found, hint) = list.find(RowView::new(&fx.arena, probe), &fx.arena, &fx.cmp);
    assert!(found);

    let matched = hint.matched().expect("matched node");
    assert_eq!((20, 0), fx.decode(list.node_row(matched)));

    assert_eq!(3, list.len());
}

#[test]
fn hinted_insert_of_present_key_is_an_invariant_violation() {
    let mut fx = Fixture::new();
    let mut list = SkipList::new(DuplicateMode::Reject, rng().next_u32());

    let row = fx.encode(1, 0);
    let (found, hint) = list.find(RowView::new(&fx.arena, row), &fx.arena, &fx.cmp);
    list.insert_with_hint(row, found, &hint, &fx.arena, &fx.cmp)
        .expect("fresh hint");

    let dup = fx.encode(1, 1);
    let (found, hint) = list.find(RowView::new(&fx.arena, dup), &fx.arena, &fx.cmp);
    assert!(found);

    list.insert_with_hint(dup, found, &hint, &fx.arena, &fx.cmp)
        .expect_err("duplicate through the hinted path must be rejected");
}

#[test]
fn stale_hint_is_detected() {
    let mut fx = Fixture::new();
    let mut list = SkipList::new(DuplicateMode::Reject, rng().next_u32());

    let a = fx.encode(1, 0);
    let (found_a, hint_a) = list.find(RowView::new(&fx.arena, a), &fx.arena, &fx.cmp);
    assert!(!found_a);

    // Intervening mutation invalidates the hint
    let b = fx.encode(2, 0);
    list.insert(b, &fx.arena, &fx.cmp);

    list.insert_with_hint(a, found_a, &hint_a, &fx.arena, &fx.cmp)
        .expect_err("stale hint must be rejected");
}

#[test]
fn cursor_walks_forward() {
    let mut fx = Fixture::new();
    let mut list = SkipList::new(DuplicateMode::Allow, rng().next_u32());

    for k in [3, 1, 2] {
        let row = fx.encode(k, 0);
        list.insert(row, &fx.arena, &fx.cmp);
    }

    let mut cursor = list.cursor();
    assert!(!cursor.valid());

    cursor.seek_to_first();

    let mut keys = Vec::new();
    while cursor.valid() {
        keys.push(fx.decode(cursor.row()).0);
        cursor.next();
    }

    assert_eq!(vec![1, 2, 3], keys);
}

#[test]
fn empty_list() {
    let list = SkipList::new(DuplicateMode::Allow, rng().next_u32());
    assert!(list.is_empty());
    assert_eq!(0, list.iter().count());

    let mut cursor = list.cursor();
    cursor.seek_to_first();
    assert!(!cursor.valid());
}

fn prop_allow_mode(ops: Vec<i16>) -> bool {
    let mut fx = Fixture::new();
    let mut list = SkipList::new(DuplicateMode::Allow, rng().next_u32());

    #[allow(clippy::cast_possible_wrap)]
    for (arrival, &k) in ops.iter().enumerate() {
        let row = fx.encode(i64::from(k), arrival as i64);
        list.insert(row, &fx.arena, &fx.cmp);
    }

    let mut expected: Vec<(i64, i64)> = ops
        .iter()
        .enumerate()
        .map(|(arrival, &k)| (i64::from(k), arrival as i64))
        .collect();
    // Stable sort models the arrival-order guarantee for equal keys
    expected.sort_by_key(|&(k, _)| k);

    expected == fx.contents(&list)
}

fn prop_reject_mode(ops: Vec<i16>) -> bool {
    let mut fx = Fixture::new();
    let mut list = SkipList::new(DuplicateMode::Reject, rng().next_u32());

    let mut model = BTreeSet::new();

    for &k in &ops {
        let row = fx.encode(i64::from(k), 0);
        let (found, hint) = list.find(RowView::new(&fx.arena, row), &fx.arena, &fx.cmp);

        assert_eq!(model.contains(&i64::from(k)), found, "find disagrees");

        if !found {
            list.insert_with_hint(row, found, &hint, &fx.arena, &fx.cmp)
                .expect("fresh hint");
            model.insert(i64::from(k));
        }
    }

    let keys: Vec<i64> = fx.contents(&list).iter().map(|&(k, _)| k).collect();
    keys == model.into_iter().collect::<Vec<_>>()
}

#[test]
fn test_quickcheck_allow_mode() {
    quickcheck::quickcheck(prop_allow_mode as fn(Vec<i16>) -> bool);
}

#[test]
fn test_quickcheck_reject_mode() {
    quickcheck::quickcheck(prop_reject_mode as fn(Vec<i16>) -> bool);
}
