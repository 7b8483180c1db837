// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    codec,
    memtable::MemTableIter,
    row::{OwnedDatum, RowView},
    schema::Schema,
    Error,
};
use std::sync::{Arc, Mutex};

/// Failure reported by a row-set writer
///
/// Writers are opaque to the memtable and carry their own error types;
/// they report whatever failed as a boxed error, which the memtable
/// adopts as [`Error::Writer`] at the flush boundary. Crate errors that
/// pass through a writer (e.g. out of [`MemTableIter::row`] inside the
/// fast path) are recognized there and keep their kind.
pub type WriterError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer of a memtable flush
///
/// The writer owns the on-disk row-set format; the memtable only hands it
/// finalized rows in comparator order and never sees what happens to them.
pub trait RowSetWriter {
    /// Consumes one finalized row.
    fn add_row(&mut self, row: RowView<'_>) -> Result<(), WriterError>;

    /// Optional fast path consuming the whole memtable in one call.
    ///
    /// Returns the flushed byte count. A writer without a fast path keeps
    /// the default, which signals the distinguished not-implemented status
    /// so the memtable falls back to streaming rows one at a time. A
    /// writer that does override this must decide *before* consuming any
    /// rows - falling back after a partial pass is not supported.
    fn flush_memtable(&mut self, rows: &mut MemTableIter<'_>) -> Result<u64, WriterError> {
        let _ = rows;
        Err(Error::WriterNotImplemented.into())
    }

    /// Finalizes the row set, returning the flushed byte count.
    fn finish(&mut self) -> Result<u64, WriterError>;
}

/// What a [`MemoryRowSet`] has received so far
#[derive(Default)]
pub struct RowSetContents {
    /// Decoded rows in arrival (= comparator) order
    pub rows: Vec<Vec<OwnedDatum>>,

    /// Flushed byte count (row blocks plus out-of-band payloads)
    pub bytes: u64,

    /// Number of [`RowSetWriter::finish`] calls
    pub completions: u32,
}

/// In-memory row-set writer
///
/// The reference [`RowSetWriter`]: decodes every row into owned datums.
/// Useful as a test double and for debugging ingest pipelines; contents
/// stay inspectable after the memtable consumed the writer.
pub struct MemoryRowSet {
    schema: Arc<Schema>,
    contents: Arc<Mutex<RowSetContents>>,
}

impl MemoryRowSet {
    /// Creates a writer for rows of `schema`.
    #[must_use]
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            contents: Arc::new(Mutex::new(RowSetContents::default())),
        }
    }

    /// Shared handle to the received contents.
    #[must_use]
    pub fn contents(&self) -> Arc<Mutex<RowSetContents>> {
        self.contents.clone()
    }
}

impl RowSetWriter for MemoryRowSet {
    fn add_row(&mut self, row: RowView<'_>) -> Result<(), WriterError> {
        let datums = codec::decode_row(row, &self.schema);

        let mut bytes = self.schema.row_width() as u64;
        for datum in &datums {
            if let OwnedDatum::Bytes(payload) = datum {
                bytes += payload.len() as u64;
            }
        }

        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut contents = self.contents.lock().expect("lock poisoned");
        contents.rows.push(datums);
        contents.bytes += bytes;

        Ok(())
    }

    fn finish(&mut self) -> Result<u64, WriterError> {
        #[expect(clippy::expect_used, reason = "lock poisoning is unrecoverable")]
        let mut contents = self.contents.lock().expect("lock poisoned");
        contents.completions += 1;
        Ok(contents.bytes)
    }
}
