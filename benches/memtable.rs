use criterion::{criterion_group, criterion_main, Criterion};
use rand::{rng, RngCore};
use std::sync::Arc;
use tablet_memtable::{
    AggMethod, Column, Datum, FieldType, KeyModel, MemTable, MemTracker, MemoryRowSet, Schema,
    SortSpec,
};

fn memtable_insert_duplicate(c: &mut Criterion) {
    let schema = Arc::new(Schema::new(
        vec![
            Column::new("k", FieldType::Int64),
            Column::new("v", FieldType::Int64),
        ],
        1,
        KeyModel::Duplicate,
    ));

    c.bench_function("memtable insert duplicate", |b| {
        let tracker = MemTracker::root("bench", None);
        let mut memtable = MemTable::new(
            0,
            schema.clone(),
            SortSpec::Lexicographic,
            Box::new(MemoryRowSet::new(schema.clone())),
            &tracker,
        );
        let mut rng = rng();

        b.iter(|| {
            let k = i64::from(rng.next_u32());
            memtable
                .insert(&[Datum::Int64(k), Datum::Int64(1)])
                .expect("insert");
        });
    });
}

fn memtable_insert_aggregate(c: &mut Criterion) {
    let schema = Arc::new(Schema::new(
        vec![
            Column::new("k", FieldType::Int64),
            Column::new("v", FieldType::Int64).with_agg(AggMethod::Sum),
        ],
        1,
        KeyModel::Aggregate,
    ));

    c.bench_function("memtable insert aggregate (hot keys)", |b| {
        let tracker = MemTracker::root("bench", None);
        let mut memtable = MemTable::new(
            0,
            schema.clone(),
            SortSpec::Lexicographic,
            Box::new(MemoryRowSet::new(schema.clone())),
            &tracker,
        );
        let mut rng = rng();

        b.iter(|| {
            // Small key space, so most inserts merge in place
            let k = i64::from(rng.next_u32() % 1_024);
            memtable
                .insert(&[Datum::Int64(k), Datum::Int64(1)])
                .expect("insert");
        });
    });
}

criterion_group!(benches, memtable_insert_duplicate, memtable_insert_aggregate);
criterion_main!(benches);
