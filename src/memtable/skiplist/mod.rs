// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

// This implementation was heavily inspired by:
//  * https://github.com/andy-kimball/arenaskl/tree/f7010085

//! This mod is a purpose-built skiplist intended for use by the memtable.
//!
//! Due to the requirements of the memtable, there are a number of notable
//! features it lacks:
//! - Updates
//! - Deletes
//! - Overwrites
//!
//! What it adds over an off-the-shelf ordered map:
//! - keys are row handles compared through an external comparator, so the
//!   list itself stores no key bytes
//! - `find` hands out a splice hint that a following `insert_with_hint`
//!   reuses, skipping the second descent on the lookup-then-insert path
//! - an allow-duplicates mode that keeps equal keys in arrival order

mod list;

pub use list::{Cursor, DuplicateMode, Hint, SkipList};

#[cfg(test)]
mod test;
