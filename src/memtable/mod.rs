// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

mod skiplist;

use crate::{
    agg::{pool::AggObjectPool, Aggregator},
    arena::Arena,
    codec,
    comparator::RowComparator,
    memory::MemTracker,
    row::{Datum, RowView},
    rowset::RowSetWriter,
    schema::{KeyModel, Schema, SortSpec},
    Error, Result,
};
use skiplist::{DuplicateMode, SkipList};
use std::sync::Arc;
use xxhash_rust::xxh3::xxh3_64;

/// Tablet identifier
pub type TabletId = u64;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    Open,
    Flushing,
    Closed,
}

/// The memtable serves as an intermediary, ephemeral, sorted storage for
/// rows loaded into one tablet
///
/// Rows are absorbed through [`MemTable::insert`], merged on the fly
/// according to the tablet's key model, and leave through
/// [`MemTable::flush`] as one sorted, finalized batch handed to the
/// row-set writer.
///
/// A memtable is single-writer: ingest parallelism comes from operating
/// many memtables, not from sharing one.
pub struct MemTable {
    tablet_id: TabletId,
    schema: Arc<Schema>,
    cmp: RowComparator,
    aggregator: Aggregator,

    index: SkipList,

    /// Owns every indexed row and all payloads they reference.
    table_arena: Arena,

    /// Scratch space for probe rows; reset after every insert.
    buffer_arena: Arena,

    /// Aggregate objects owned by indexed rows.
    durable_pool: AggObjectPool,

    /// Aggregate objects of the current probe row; reset after every insert.
    scratch_pool: AggObjectPool,

    writer: Option<Box<dyn RowSetWriter>>,
    tracker: Arc<MemTracker>,

    state: State,
    flush_error: Option<Error>,

    rows_inserted: u64,
    merged_rows: u64,
    flush_size: u64,
}

impl MemTable {
    /// Creates a memtable for one tablet.
    ///
    /// The memtable accounts its arenas into a child of `memory_parent`
    /// labeled after the tablet.
    #[must_use]
    pub fn new(
        tablet_id: TabletId,
        schema: Arc<Schema>,
        sort: SortSpec,
        writer: Box<dyn RowSetWriter>,
        memory_parent: &Arc<MemTracker>,
    ) -> Self {
        let tracker = memory_parent.child(format!("memtable-{tablet_id}"));

        let mode = match schema.key_model() {
            KeyModel::Duplicate => DuplicateMode::Allow,
            KeyModel::Aggregate | KeyModel::Unique => DuplicateMode::Reject,
        };

        #[allow(clippy::cast_possible_truncation)]
        let seed = xxh3_64(&tablet_id.to_le_bytes()) as u32;

        log::trace!("creating memtable for tablet {tablet_id}");

        Self {
            tablet_id,
            cmp: RowComparator::new(schema.clone(), sort),
            aggregator: Aggregator::new(schema.clone()),
            schema,
            index: SkipList::new(mode, seed),
            table_arena: Arena::new(tracker.clone()),
            buffer_arena: Arena::new(tracker.clone()),
            durable_pool: AggObjectPool::default(),
            scratch_pool: AggObjectPool::default(),
            writer: Some(writer),
            tracker,
            state: State::Open,
            flush_error: None,
            rows_inserted: 0,
            merged_rows: 0,
            flush_size: 0,
        }
    }

    /// Absorbs one input row.
    ///
    /// Fails with [`Error::MemoryLimitExceeded`] when the tracker denies
    /// arena growth; the index is untouched in that case and the memtable
    /// stays usable (typically to be flushed or closed by the caller).
    ///
    /// # Panics
    ///
    /// Panics when called after [`MemTable::flush`], or when the row does
    /// not match the schema - both are caller bugs.
    pub fn insert(&mut self, row: &[Datum<'_>]) -> Result<()> {
        assert_eq!(State::Open, self.state, "insert into a non-open memtable");

        let result = match self.schema.key_model() {
            KeyModel::Duplicate => self.insert_duplicate(row),
            KeyModel::Aggregate | KeyModel::Unique => self.insert_merge(row),
        };

        // Unconditional: a failed attempt may have left a partial probe
        // behind, and the buffer arena high-water stays bounded by one row
        self.buffer_arena.reset();
        self.scratch_pool.reset();
        debug_assert_eq!(0, self.buffer_arena.used());

        if result.is_ok() {
            self.rows_inserted += 1;
        }

        result
    }

    /// Duplicate model: every row is kept, equal keys in arrival order.
    fn insert_duplicate(&mut self, row: &[Datum<'_>]) -> Result<()> {
        let handle = codec::encode_row(
            row,
            &self.schema,
            &mut self.table_arena,
            &mut self.durable_pool,
        )?;

        let overwritten = self.index.insert(handle, &self.table_arena, &self.cmp);
        if overwritten {
            return Err(Error::InvariantViolation(
                "duplicate-model index reported an overwrite",
            ));
        }

        Ok(())
    }

    /// Aggregate / unique models: search first, then merge in place or
    /// insert at the splice the search already found.
    fn insert_merge(&mut self, row: &[Datum<'_>]) -> Result<()> {
        let probe = codec::encode_row(
            row,
            &self.schema,
            &mut self.buffer_arena,
            &mut self.scratch_pool,
        )?;
        let probe_view = RowView::new(&self.buffer_arena, probe);

        let (found, hint) = self.index.find(probe_view, &self.table_arena, &self.cmp);

        if found {
            #[allow(clippy::expect_used)]
            let dst = self
                .index
                .node_row(hint.matched().expect("found implies a matched node"));

            match self.schema.sequence_col() {
                Some(seq_idx) => self.aggregator.update_with_sequence(
                    dst,
                    &mut self.table_arena,
                    &mut self.durable_pool,
                    probe_view,
                    &self.scratch_pool,
                    seq_idx,
                )?,
                None => self.aggregator.update(
                    dst,
                    &mut self.table_arena,
                    &mut self.durable_pool,
                    probe_view,
                    &self.scratch_pool,
                )?,
            }

            self.merged_rows += 1;
        } else {
            // Hand the probe's aggregate objects over before copying, so
            // the copied cells can be rebased onto the durable pool
            let rebase = self.durable_pool.acquire_from(&mut self.scratch_pool);

            let dst = codec::copy_row(&self.schema, probe_view, &mut self.table_arena, rebase)?;

            self.index
                .insert_with_hint(dst, found, &hint, &self.table_arena, &self.cmp)?;
        }

        Ok(())
    }

    /// Flushes all rows, sorted and finalized, into the row-set writer.
    ///
    /// Prefers the writer's whole-memtable fast path and falls back to
    /// streaming rows one at a time. Writer errors are propagated
    /// unchanged; after a failed flush only [`MemTable::close`] is legal.
    ///
    /// # Panics
    ///
    /// Panics when the memtable is not open (flushing twice is a caller
    /// bug).
    pub fn flush(&mut self) -> Result<()> {
        assert_eq!(State::Open, self.state, "flush of a non-open memtable");
        self.state = State::Flushing;

        log::debug!(
            "flushing memtable of tablet {}: {} rows ({} absorbed by merge)",
            self.tablet_id,
            self.index.len(),
            self.merged_rows,
        );

        match self.flush_inner() {
            Ok(bytes) => {
                self.flush_size = bytes;
                self.state = State::Closed;

                log::debug!(
                    "flushed memtable of tablet {}: {bytes} B",
                    self.tablet_id
                );
                Ok(())
            }
            Err(e) => {
                // Keep a re-raisable copy for close(); the memtable stays
                // in the flushing state and must be destroyed
                self.flush_error = Some(e.duplicate());
                Err(e)
            }
        }
    }

    fn flush_inner(&mut self) -> Result<u64> {
        let mut writer = self.writer.take().ok_or(Error::InvariantViolation(
            "row-set writer was already consumed",
        ))?;

        let fast_path = {
            let mut rows = MemTableIter::new(self);
            writer.flush_memtable(&mut rows)
        };

        // Writer failures arrive boxed and are adopted into the crate
        // error here; crate errors round-trip by downcast
        match fast_path.map_err(Error::from) {
            Ok(bytes) => Ok(bytes),
            Err(Error::WriterNotImplemented) => {
                let mut rows = MemTableIter::new(self);
                while rows.valid() {
                    writer.add_row(rows.row()?)?;
                    rows.next();
                }
                Ok(writer.finish()?)
            }
            Err(e) => Err(e),
        }
    }

    /// Flushes if still open, then releases both arenas and pools.
    ///
    /// Idempotent. After a failed flush this releases the memory and
    /// re-raises the stored flush error.
    pub fn close(&mut self) -> Result<()> {
        if let Some(e) = self.flush_error.take() {
            self.release();
            self.state = State::Closed;
            return Err(e);
        }

        if self.state == State::Open {
            if let Err(e) = self.flush() {
                self.flush_error = None;
                self.release();
                self.state = State::Closed;
                return Err(e);
            }
        }

        self.release();
        self.state = State::Closed;
        Ok(())
    }

    /// Forward iterator over finalized rows in comparator order.
    ///
    /// Rows are finalized lazily as the iterator reads them; the iterator
    /// cannot outlive the memtable.
    #[must_use]
    pub fn iter(&mut self) -> MemTableIter<'_> {
        MemTableIter::new(self)
    }

    /// The tablet this memtable belongs to.
    #[must_use]
    pub fn tablet_id(&self) -> TabletId {
        self.tablet_id
    }

    /// The tablet schema.
    #[must_use]
    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Number of successful insert calls (not distinct keys).
    #[must_use]
    pub fn rows_inserted(&self) -> u64 {
        self.rows_inserted
    }

    /// Number of inserts absorbed by an in-place merge.
    #[must_use]
    pub fn merged_rows(&self) -> u64 {
        self.merged_rows
    }

    /// Bytes reported by the row-set writer for the finished flush.
    #[must_use]
    pub fn flush_size(&self) -> u64 {
        self.flush_size
    }

    /// Number of distinct rows currently in the index.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether no rows were absorbed yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Bytes currently accounted to the memtable's tracker.
    #[must_use]
    pub fn mem_usage(&self) -> u64 {
        self.tracker.consumed()
    }

    fn release(&mut self) {
        self.table_arena.release();
        self.buffer_arena.release();
        self.durable_pool.reset();
        self.scratch_pool.reset();
    }
}

impl Drop for MemTable {
    fn drop(&mut self) {
        log::trace!("dropping memtable for tablet {}", self.tablet_id);
    }
}

/// Forward cursor over a memtable's rows in comparator order
///
/// Produced by [`MemTable::iter`] and handed to the row-set writer's fast
/// path. [`MemTableIter::row`] finalizes the current row on first access.
pub struct MemTableIter<'a> {
    mt: &'a mut MemTable,
    node: Option<u32>,
    finalized: Option<u32>,
}

impl<'a> MemTableIter<'a> {
    fn new(mt: &'a mut MemTable) -> Self {
        let node = mt.index.first();
        Self {
            mt,
            node,
            finalized: None,
        }
    }

    /// Whether the iterator is on a row.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.node.is_some()
    }

    /// Advances to the next row.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        let Some(id) = self.node else {
            panic!("iterator exhausted");
        };
        self.node = self.mt.index.next_node(id);
    }

    /// The current row, finalized.
    ///
    /// Finalization may allocate serialized aggregate state in the table
    /// arena, which is why this can fail with memory errors.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not valid.
    pub fn row(&mut self) -> Result<RowView<'_>> {
        let Some(id) = self.node else {
            panic!("iterator exhausted");
        };

        if self.finalized != Some(id) {
            let handle = self.mt.index.node_row(id);
            self.mt.aggregator.finalize(
                handle,
                &mut self.mt.table_arena,
                &self.mt.durable_pool,
            )?;
            self.finalized = Some(id);
        }

        let handle = self.mt.index.node_row(id);
        Ok(RowView::new(&self.mt.table_arena, handle))
    }

    /// The schema of the yielded rows.
    #[must_use]
    pub fn schema(&self) -> &Schema {
        &self.mt.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        rowset::MemoryRowSet,
        schema::{AggMethod, Column, FieldType},
    };
    use test_log::test;

    fn agg_schema() -> Arc<Schema> {
        Arc::new(Schema::new(
            vec![
                Column::new("k", FieldType::Int32),
                Column::new("name", FieldType::String).with_agg(AggMethod::Replace),
                Column::new("v", FieldType::Int64).with_agg(AggMethod::Sum),
            ],
            1,
            KeyModel::Aggregate,
        ))
    }

    fn open(schema: &Arc<Schema>) -> MemTable {
        let tracker = MemTracker::root("test", None);
        MemTable::new(
            1,
            schema.clone(),
            SortSpec::Lexicographic,
            Box::new(MemoryRowSet::new(schema.clone())),
            &tracker,
        )
    }

    #[test]
    fn buffer_arena_is_empty_after_every_insert() {
        let schema = agg_schema();
        let mut memtable = open(&schema);

        for k in [1, 2, 1, 3, 2] {
            memtable
                .insert(&[
                    Datum::Int32(k),
                    Datum::Bytes(b"some longer payload to force an allocation"),
                    Datum::Int64(1),
                ])
                .expect("insert");

            assert_eq!(0, memtable.buffer_arena.used());
            assert!(memtable.scratch_pool.is_empty());
        }
    }

    #[test]
    fn merge_path_counts_distinct_keys_once() {
        let schema = agg_schema();
        let mut memtable = open(&schema);

        for k in [1, 2, 1, 1, 3] {
            memtable
                .insert(&[Datum::Int32(k), Datum::Null, Datum::Int64(1)])
                .expect("insert");
        }

        assert_eq!(5, memtable.rows_inserted());
        assert_eq!(2, memtable.merged_rows());
        assert_eq!(3, memtable.len());
    }

    #[test]
    fn tracker_matches_arena_capacities() {
        let schema = agg_schema();
        let mut memtable = open(&schema);

        for k in 0..100 {
            memtable
                .insert(&[Datum::Int32(k), Datum::Bytes(b"x"), Datum::Int64(1)])
                .expect("insert");
        }

        assert_eq!(
            memtable.table_arena.capacity() + memtable.buffer_arena.capacity(),
            memtable.mem_usage()
        );
    }

    #[test]
    fn replaced_string_payloads_stay_reachable() {
        let schema = agg_schema();
        let mut memtable = open(&schema);

        memtable
            .insert(&[Datum::Int32(1), Datum::Bytes(b"first"), Datum::Int64(1)])
            .expect("insert");
        memtable
            .insert(&[Datum::Int32(1), Datum::Bytes(b"second"), Datum::Int64(1)])
            .expect("insert");

        let mut iter = memtable.iter();
        let view = iter.row().expect("row");
        let datums = codec::decode_row(view, &schema);

        assert_eq!(
            crate::row::OwnedDatum::Bytes(b"second".to_vec()),
            datums[1]
        );
        assert_eq!(crate::row::OwnedDatum::Int64(2), datums[2]);
    }

    #[test]
    #[should_panic(expected = "insert into a non-open memtable")]
    fn insert_after_flush_panics() {
        let schema = agg_schema();
        let mut memtable = open(&schema);

        memtable.flush().expect("flush");
        let _ = memtable.insert(&[Datum::Int32(1), Datum::Null, Datum::Int64(1)]);
    }
}
