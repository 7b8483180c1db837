// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{Error, Result};
use std::sync::{
    atomic::{
        AtomicU64,
        Ordering::{AcqRel, Acquire},
    },
    Arc,
};

/// Hierarchical byte counter for memtable memory
///
/// Every arena allocation is reported here and propagates up the parent
/// chain, so one root tracker can budget many memtables. Only the tracker
/// is shared between threads; the memtable itself is single-writer.
pub struct MemTracker {
    label: String,
    limit: Option<u64>,
    consumed: AtomicU64,
    peak: AtomicU64,
    parent: Option<Arc<MemTracker>>,
}

impl MemTracker {
    /// Creates a root tracker with an optional byte limit.
    #[must_use]
    pub fn root(label: impl Into<String>, limit: Option<u64>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit,
            consumed: AtomicU64::default(),
            peak: AtomicU64::default(),
            parent: None,
        })
    }

    /// Creates an unlimited child that reports into `self`.
    #[must_use]
    pub fn child(self: &Arc<Self>, label: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            label: label.into(),
            limit: None,
            consumed: AtomicU64::default(),
            peak: AtomicU64::default(),
            parent: Some(self.clone()),
        })
    }

    /// Returns the tracker's label.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Returns the currently accounted bytes.
    #[must_use]
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Acquire)
    }

    /// Returns the high-water mark of accounted bytes.
    #[must_use]
    pub fn peak(&self) -> u64 {
        self.peak.load(Acquire)
    }

    /// Accounts `bytes` against this tracker and all its ancestors.
    ///
    /// If any tracker in the chain would exceed its limit, all partial
    /// consumption is rolled back and [`Error::MemoryLimitExceeded`] is
    /// returned.
    pub fn try_consume(&self, bytes: u64) -> Result<()> {
        let mut cursor = Some(self);
        let mut charged: Vec<&MemTracker> = Vec::new();

        while let Some(tracker) = cursor {
            let consumed = tracker.consumed.fetch_add(bytes, AcqRel) + bytes;

            if let Some(limit) = tracker.limit {
                if consumed > limit {
                    tracker.consumed.fetch_sub(bytes, AcqRel);
                    for t in charged {
                        t.consumed.fetch_sub(bytes, AcqRel);
                    }
                    return Err(Error::MemoryLimitExceeded {
                        tracker: tracker.label.clone(),
                        requested: bytes,
                        consumed: consumed - bytes,
                        limit,
                    });
                }
            }

            tracker.peak.fetch_max(consumed, AcqRel);
            charged.push(tracker);
            cursor = tracker.parent.as_deref();
        }

        Ok(())
    }

    /// Releases previously consumed bytes along the parent chain.
    pub fn release(&self, bytes: u64) {
        let mut cursor = Some(self);
        while let Some(tracker) = cursor {
            let prev = tracker.consumed.fetch_sub(bytes, AcqRel);
            debug_assert!(prev >= bytes, "released more than was consumed");
            cursor = tracker.parent.as_deref();
        }
    }
}

impl std::fmt::Debug for MemTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemTracker")
            .field("label", &self.label)
            .field("limit", &self.limit)
            .field("consumed", &self.consumed())
            .finish()
    }
}
