// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! Sorted, pre-aggregating in-memory write buffer for columnar tablets.
//!
//! ##### NOTE
//!
//! > This crate only provides the write-path memory table of a columnar
//! > storage engine, not the engine itself. It does not own an on-disk
//! > format: a flush streams sorted, finalized rows into a row-set writer
//! > collaborator supplied by the caller.
//!
//! ##### About
//!
//! A `MemTable` absorbs rows loaded into a single tablet. Incoming rows
//! are encoded into an arena-backed fixed-width layout and placed into a
//! skiplist ordered by the tablet's sort key (lexicographic or Z-order).
//! Depending on the tablet's key model, rows with equal keys are either
//! all retained (duplicate), merged column-wise by per-column aggregate
//! functions (aggregate), or replaced newest-wins with an optional
//! sequence column (unique).
//!
//! The merge path encodes each probe row into a scratch arena, searches
//! the index once, and either aggregates in place or reuses the search's
//! splice hint for the insert - the common lookup-then-insert pattern
//! costs a single descent. The scratch arena is reset after every insert,
//! so its high-water mark stays bounded by one row.
//!
//! A memtable is owned by a single writer; shard into many memtables for
//! parallel ingest. All arena memory is accounted to a hierarchical
//! memory tracker, and an exceeded budget surfaces as a regular error
//! instead of an abort.
//!
//! # Example usage
//!
//! ```
//! use std::sync::Arc;
//! use tablet_memtable::{
//!     AggMethod, Column, FieldType, KeyModel, MemTable, MemTracker,
//!     MemoryRowSet, Schema, SortSpec, Datum,
//! };
//!
//! // (k int, v sum int) under the aggregate key model
//! let schema = Arc::new(Schema::new(
//!     vec![
//!         Column::new("k", FieldType::Int32),
//!         Column::new("v", FieldType::Int64).with_agg(AggMethod::Sum),
//!     ],
//!     1,
//!     KeyModel::Aggregate,
//! ));
//!
//! let tracker = MemTracker::root("load", None);
//! let sink = MemoryRowSet::new(schema.clone());
//! let contents = sink.contents();
//!
//! let mut memtable = MemTable::new(
//!     1,
//!     schema,
//!     SortSpec::Lexicographic,
//!     Box::new(sink),
//!     &tracker,
//! );
//!
//! memtable.insert(&[Datum::Int32(1), Datum::Int64(10)])?;
//! memtable.insert(&[Datum::Int32(1), Datum::Int64(20)])?;
//!
//! memtable.flush()?;
//!
//! // Equal keys were summed on the way in
//! assert_eq!(1, contents.lock().unwrap().rows.len());
//! # Ok::<(), tablet_memtable::Error>(())
//! ```

#![forbid(unsafe_code)]
#![deny(clippy::all, missing_docs)]
#![deny(clippy::unwrap_used)]
#![warn(clippy::multiple_crate_versions)]
#![warn(clippy::pedantic, clippy::nursery)]
#![warn(clippy::expect_used)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_name_repetitions)]

mod agg;
mod arena;
mod codec;
mod comparator;
mod error;
mod memory;
mod memtable;
mod row;
mod rowset;
mod schema;

pub use {
    agg::state::HllSketch,
    arena::{Arena, ArenaRef},
    codec::{decode_cell, decode_row},
    comparator::RowComparator,
    error::{Error, Result},
    memory::MemTracker,
    memtable::{MemTable, MemTableIter, TabletId},
    row::{Datum, OwnedDatum, RowView},
    rowset::{MemoryRowSet, RowSetContents, RowSetWriter, WriterError},
    schema::{AggMethod, Column, FieldType, KeyModel, Schema, SortSpec},
};
