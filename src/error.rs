// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::rowset::WriterError;

/// Represents errors that can occur in the write path
#[derive(Debug)]
pub enum Error {
    /// An arena grow request was denied by the memory tracker
    MemoryLimitExceeded {
        /// Label of the tracker that denied the request
        tracker: String,

        /// Bytes that were requested
        requested: u64,

        /// Bytes consumed at the time of the request
        consumed: u64,

        /// The tracker's limit
        limit: u64,
    },

    /// Error propagated unchanged from the row-set writer
    Writer(WriterError),

    /// The row-set writer does not provide the whole-memtable fast path
    ///
    /// Recovered internally by falling back to streaming rows one at a
    /// time; never surfaced to callers of [`crate::MemTable::flush`].
    WriterNotImplemented,

    /// An internal invariant was violated (indicates a bug)
    InvariantViolation(&'static str),
}

impl Error {
    /// Re-raisable copy of the error, keeping kind and context.
    ///
    /// A wrapped writer error is not generally cloneable, so its copy
    /// carries the rendered message instead of the source.
    pub(crate) fn duplicate(&self) -> Self {
        match self {
            Self::MemoryLimitExceeded {
                tracker,
                requested,
                consumed,
                limit,
            } => Self::MemoryLimitExceeded {
                tracker: tracker.clone(),
                requested: *requested,
                consumed: *consumed,
                limit: *limit,
            },
            Self::Writer(e) => Self::Writer(Box::new(RenderedError(e.to_string()))),
            Self::WriterNotImplemented => Self::WriterNotImplemented,
            Self::InvariantViolation(msg) => Self::InvariantViolation(msg),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "MemTableError: {self:?}")
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Writer(e) => Some(&**e),
            _ => None,
        }
    }
}

// Adopts a row-set writer failure at the flush boundary. Crate errors
// that round-tripped through the writer (e.g. a memory error raised
// while the fast path pulled rows) keep their original kind.
impl From<WriterError> for Error {
    fn from(value: WriterError) -> Self {
        match value.downcast::<Self>() {
            Ok(inner) => *inner,
            Err(value) => Self::Writer(value),
        }
    }
}

#[derive(Debug)]
struct RenderedError(String);

impl std::fmt::Display for RenderedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for RenderedError {}

/// Memtable result
pub type Result<T> = std::result::Result<T, Error>;
