// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Row merging for the aggregate and unique key models.
//!
//! The aggregator mutates the resident row in place; any side allocations
//! (replacement string payloads, serialized aggregate states) go into the
//! arena that owns the row, so a merged row stays self-contained.

pub mod pool;
pub mod state;

use crate::{
    arena::{Arena, ArenaRef},
    codec,
    comparator::compare_datums,
    row::{Datum, OwnedDatum, RowView},
    schema::{AggMethod, FieldType, KeyModel, Schema},
    Result,
};
use pool::AggObjectPool;
use std::{cmp::Ordering, sync::Arc};

/// Applies per-column merge functions to rows with equal keys
pub(crate) struct Aggregator {
    schema: Arc<Schema>,
}

impl Aggregator {
    pub(crate) fn new(schema: Arc<Schema>) -> Self {
        Self { schema }
    }

    /// Merges `src` (a probe row in the buffer arena) into the resident
    /// row `dst` column by column.
    pub(crate) fn update(
        &self,
        dst: ArenaRef,
        table: &mut Arena,
        durable: &mut AggObjectPool,
        src: RowView<'_>,
        scratch: &AggObjectPool,
    ) -> Result<()> {
        for idx in self.schema.num_key_columns()..self.schema.columns().len() {
            self.update_cell(idx, dst, table, durable, src, scratch)?;
        }
        Ok(())
    }

    /// Overwrites every value cell of `dst` from `src` if `src`'s sequence
    /// cell is greater or equal; otherwise leaves `dst` untouched.
    ///
    /// Greater *or equal* makes ties resolve to the last arrival.
    pub(crate) fn update_with_sequence(
        &self,
        dst: ArenaRef,
        table: &mut Arena,
        durable: &mut AggObjectPool,
        src: RowView<'_>,
        scratch: &AggObjectPool,
        seq_idx: usize,
    ) -> Result<()> {
        let src_seq = codec::decode_cell(src, &self.schema, seq_idx);
        let dst_seq = {
            let view = RowView::new(&*table, dst);
            codec::decode_cell(view, &self.schema, seq_idx).to_owned()
        };

        if compare_datums(src_seq, dst_seq.as_datum()) == Ordering::Less {
            return Ok(());
        }

        for idx in self.schema.num_key_columns()..self.schema.columns().len() {
            self.replace_cell(idx, dst, table, durable, src, scratch)?;
        }
        Ok(())
    }

    /// Rewrites aggregate-state cells into their serialized payload so the
    /// row can leave the memtable.
    pub(crate) fn finalize(
        &self,
        dst: ArenaRef,
        table: &mut Arena,
        pool: &AggObjectPool,
    ) -> Result<()> {
        for idx in 0..self.schema.columns().len() {
            if !self.schema.column(idx).field_type.is_object() {
                continue;
            }

            let handle = {
                let view = RowView::new(&*table, dst);
                if view.is_null(&self.schema, idx) {
                    continue;
                }
                codec::read_object_handle(view, &self.schema, idx)
            };

            let bytes = pool.get(handle).to_bytes();
            codec::write_bytes_cell(table, dst, &self.schema, idx, &bytes)?;
        }
        Ok(())
    }

    fn update_cell(
        &self,
        idx: usize,
        dst: ArenaRef,
        table: &mut Arena,
        durable: &mut AggObjectPool,
        src: RowView<'_>,
        scratch: &AggObjectPool,
    ) -> Result<()> {
        // Under the unique model every value column replaces, whatever its
        // declared merge function.
        let method = if self.schema.key_model() == KeyModel::Unique {
            AggMethod::Replace
        } else {
            self.schema.column(idx).agg
        };

        match method {
            AggMethod::None => {
                debug_assert!(false, "unaggregated value column in merge path");
                Ok(())
            }
            AggMethod::Sum => {
                self.sum_cell(idx, dst, table, src);
                Ok(())
            }
            AggMethod::Min => self.minmax_cell(idx, dst, table, durable, src, scratch, Ordering::Less),
            AggMethod::Max => {
                self.minmax_cell(idx, dst, table, durable, src, scratch, Ordering::Greater)
            }
            AggMethod::Replace => self.replace_cell(idx, dst, table, durable, src, scratch),
            AggMethod::HllUnion | AggMethod::BitmapUnion => {
                self.merge_object_cell(idx, dst, table, durable, src, scratch);
                Ok(())
            }
        }
    }

    /// Numeric addition; a null side contributes nothing.
    fn sum_cell(&self, idx: usize, dst: ArenaRef, table: &mut Arena, src: RowView<'_>) {
        if src.is_null(&self.schema, idx) {
            return;
        }

        let src_datum = codec::decode_cell(src, &self.schema, idx);

        let dst_datum = {
            let view = RowView::new(&*table, dst);
            if view.is_null(&self.schema, idx) {
                None
            } else {
                Some(codec::decode_cell(view, &self.schema, idx).to_owned())
            }
        };

        match dst_datum {
            None => codec::write_scalar(table, dst, &self.schema, idx, src_datum),
            Some(dst_datum) => {
                let sum = add_datums(dst_datum.as_datum(), src_datum);
                codec::write_scalar(table, dst, &self.schema, idx, sum.as_datum());
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn minmax_cell(
        &self,
        idx: usize,
        dst: ArenaRef,
        table: &mut Arena,
        durable: &mut AggObjectPool,
        src: RowView<'_>,
        scratch: &AggObjectPool,
        keep_src_when: Ordering,
    ) -> Result<()> {
        if src.is_null(&self.schema, idx) {
            return Ok(());
        }

        let dst_datum = {
            let view = RowView::new(&*table, dst);
            if view.is_null(&self.schema, idx) {
                None
            } else {
                Some(codec::decode_cell(view, &self.schema, idx).to_owned())
            }
        };

        let replace = match dst_datum {
            None => true,
            Some(dst_datum) => {
                let src_datum = codec::decode_cell(src, &self.schema, idx);
                compare_datums(src_datum, dst_datum.as_datum()) == keep_src_when
            }
        };

        if replace {
            self.replace_cell(idx, dst, table, durable, src, scratch)?;
        }
        Ok(())
    }

    /// Overwrites `dst`'s cell from `src`, null included.
    fn replace_cell(
        &self,
        idx: usize,
        dst: ArenaRef,
        table: &mut Arena,
        durable: &mut AggObjectPool,
        src: RowView<'_>,
        scratch: &AggObjectPool,
    ) -> Result<()> {
        if src.is_null(&self.schema, idx) {
            codec::write_null(table, dst, &self.schema, idx);
            return Ok(());
        }

        match self.schema.column(idx).field_type {
            FieldType::String => {
                let (handle, len) = codec::read_payload_ref(src, &self.schema, idx);
                let payload = src.payload(handle, len);
                codec::write_bytes_cell(table, dst, &self.schema, idx, payload)?;
            }
            FieldType::Hll | FieldType::Bitmap => {
                let incoming = scratch
                    .get(codec::read_object_handle(src, &self.schema, idx))
                    .clone();

                let resident = {
                    let view = RowView::new(&*table, dst);
                    if view.is_null(&self.schema, idx) {
                        None
                    } else {
                        Some(codec::read_object_handle(view, &self.schema, idx))
                    }
                };

                match resident {
                    Some(handle) => durable.replace(handle, incoming),
                    None => {
                        let handle = durable.acquire(incoming);
                        codec::write_object_handle(table, dst, &self.schema, idx, handle);
                    }
                }
            }
            _ => {
                let datum = codec::decode_cell(src, &self.schema, idx);
                codec::write_scalar(table, dst, &self.schema, idx, datum);
            }
        }
        Ok(())
    }

    /// Union of two aggregate states; a null side contributes nothing.
    fn merge_object_cell(
        &self,
        idx: usize,
        dst: ArenaRef,
        table: &mut Arena,
        durable: &mut AggObjectPool,
        src: RowView<'_>,
        scratch: &AggObjectPool,
    ) {
        if src.is_null(&self.schema, idx) {
            return;
        }

        let src_handle = codec::read_object_handle(src, &self.schema, idx);

        let resident = {
            let view = RowView::new(&*table, dst);
            if view.is_null(&self.schema, idx) {
                None
            } else {
                Some(codec::read_object_handle(view, &self.schema, idx))
            }
        };

        match resident {
            Some(handle) => durable.get_mut(handle).merge(scratch.get(src_handle)),
            None => {
                let handle = durable.acquire(scratch.get(src_handle).clone());
                codec::write_object_handle(table, dst, &self.schema, idx, handle);
            }
        }
    }
}

fn add_datums(a: Datum<'_>, b: Datum<'_>) -> OwnedDatum {
    match (a, b) {
        (Datum::Int8(x), Datum::Int8(y)) => OwnedDatum::Int8(x.wrapping_add(y)),
        (Datum::UInt8(x), Datum::UInt8(y)) => OwnedDatum::UInt8(x.wrapping_add(y)),
        (Datum::Int32(x), Datum::Int32(y)) => OwnedDatum::Int32(x.wrapping_add(y)),
        (Datum::Int64(x), Datum::Int64(y)) => OwnedDatum::Int64(x.wrapping_add(y)),
        (Datum::UInt64(x), Datum::UInt64(y)) => OwnedDatum::UInt64(x.wrapping_add(y)),
        (Datum::Float64(x), Datum::Float64(y)) => OwnedDatum::Float64(x + y),
        (a, b) => panic!("cannot sum {a:?} and {b:?}"),
    }
}
