// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    arena::{Arena, ArenaRef},
    comparator::RowComparator,
    row::RowView,
    Error, Result,
};
use std::cmp::Ordering;

/// Tower height cap; with p = 1/4 this comfortably covers memtables far
/// beyond flush size.
pub(crate) const MAX_HEIGHT: usize = 12;

const BRANCHING: u32 = 4;

type NodeId = u32;

const HEAD: NodeId = 0;
const NIL: NodeId = u32::MAX;

/// How the list treats keys comparing equal
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DuplicateMode {
    /// Equal keys coexist, ordered by arrival
    Allow,

    /// Equal keys are a caller error; the caller merges instead
    Reject,
}

struct Node {
    row: ArenaRef,
    next: [NodeId; MAX_HEIGHT],
}

/// Splice captured by [`SkipList::find`]
///
/// Holds the predecessor chain at every level plus the matched node, valid
/// until the next mutation of the list.
pub struct Hint {
    prev: [NodeId; MAX_HEIGHT],
    matched: NodeId,
    version: u64,
}

impl Hint {
    /// The node holding an equal key, if the find matched.
    #[must_use]
    pub(crate) fn matched(&self) -> Option<u32> {
        (self.matched != NIL).then_some(self.matched)
    }
}

/// Ordered index over row handles
///
/// A probabilistic multi-level linked list. Nodes are plain vector slots
/// addressed by index, so the structure owns no row memory; dropping the
/// list never touches the rows, which live in the table arena.
pub struct SkipList {
    nodes: Vec<Node>,
    mode: DuplicateMode,
    height: usize,
    seed: u32,
    version: u64,
}

impl SkipList {
    /// Creates an empty list.
    #[must_use]
    pub fn new(mode: DuplicateMode, seed: u32) -> Self {
        let head = Node {
            row: ArenaRef::default(),
            next: [NIL; MAX_HEIGHT],
        };

        Self {
            nodes: vec![head],
            mode,
            height: 1,
            // Xorshift needs a non-zero state
            seed: seed.max(1),
            version: 0,
        }
    }

    /// Number of rows in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.nodes.len() - 1
    }

    /// Whether the list holds no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Searches for a row with a key equal to `probe`.
    ///
    /// Returns whether such a row exists, plus the splice the probe would
    /// occupy - pass it back to [`SkipList::insert_with_hint`] to skip the
    /// second descent, provided the list was not mutated in between.
    pub fn find(
        &self,
        probe: RowView<'_>,
        table: &Arena,
        cmp: &RowComparator,
    ) -> (bool, Hint) {
        let mut prev = [HEAD; MAX_HEIGHT];
        let mut matched = NIL;

        let mut cur = HEAD;
        for level in (0..self.height).rev() {
            let mut next = self.node(cur).next[level];

            while next != NIL {
                match cmp.compare(self.row_view(next, table), probe) {
                    Ordering::Less => {
                        cur = next;
                        next = self.node(cur).next[level];
                    }
                    Ordering::Equal => {
                        matched = next;
                        break;
                    }
                    Ordering::Greater => break,
                }
            }

            prev[level] = cur;
        }

        (
            matched != NIL,
            Hint {
                prev,
                matched,
                version: self.version,
            },
        )
    }

    /// Inserts a row, descending from the top to find its splice.
    ///
    /// Returns whether a row with an equal key was already present. In
    /// allow-duplicates mode this is always `false` and the new row lands
    /// after its equals; in reject mode an equal key aborts the insert
    /// (the caller is expected to have merged instead).
    pub fn insert(&mut self, row: ArenaRef, table: &Arena, cmp: &RowComparator) -> bool {
        let view = RowView::new(table, row);
        let mut prev = [HEAD; MAX_HEIGHT];

        let mut cur = HEAD;
        for level in (0..self.height).rev() {
            let mut next = self.node(cur).next[level];

            while next != NIL {
                match cmp.compare(self.row_view(next, table), view) {
                    Ordering::Less => {}
                    Ordering::Equal if self.mode == DuplicateMode::Allow => {
                        // Step over equal keys so arrival order is kept
                    }
                    Ordering::Equal => return true,
                    Ordering::Greater => break,
                }

                cur = next;
                next = self.node(cur).next[level];
            }

            prev[level] = cur;
        }

        self.splice(&prev, row);
        false
    }

    /// Inserts a row at the splice captured by the most recent
    /// [`SkipList::find`] for an equal probe.
    ///
    /// The contract is strict: `found` and `hint` must come from that find,
    /// with no intervening mutation. Within a single-writer memtable this
    /// holds by construction; debug builds verify it.
    pub fn insert_with_hint(
        &mut self,
        row: ArenaRef,
        found: bool,
        hint: &Hint,
        table: &Arena,
        cmp: &RowComparator,
    ) -> Result<()> {
        if hint.version != self.version {
            return Err(Error::InvariantViolation(
                "insert hint is stale: list was mutated after the find",
            ));
        }

        if found && self.mode == DuplicateMode::Reject {
            return Err(Error::InvariantViolation(
                "hinted insert of a key that is already present",
            ));
        }

        self.check_splice(row, hint, table, cmp);

        self.splice(&hint.prev, row);
        Ok(())
    }

    /// Creates a cursor positioned before the first row.
    #[must_use]
    pub fn cursor(&self) -> Cursor<'_> {
        Cursor {
            list: self,
            node: HEAD,
        }
    }

    pub(crate) fn first(&self) -> Option<u32> {
        let next = self.node(HEAD).next[0];
        (next != NIL).then_some(next)
    }

    pub(crate) fn next_node(&self, id: u32) -> Option<u32> {
        let next = self.node(id).next[0];
        (next != NIL).then_some(next)
    }

    pub(crate) fn node_row(&self, id: u32) -> ArenaRef {
        self.node(id).row
    }

    /// Forward iteration over all row handles in comparator order.
    pub fn iter(&self) -> impl Iterator<Item = ArenaRef> + '_ {
        std::iter::successors(self.first(), move |id| self.next_node(*id))
            .map(|id| self.node_row(id))
    }

    fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id as usize]
    }

    fn row_view<'a>(&self, id: NodeId, table: &'a Arena) -> RowView<'a> {
        RowView::new(table, self.node(id).row)
    }

    /// Links a new node behind the given predecessor chain.
    #[allow(clippy::cast_possible_truncation)]
    fn splice(&mut self, prev: &[NodeId; MAX_HEIGHT], row: ArenaRef) {
        let height = self.random_height();
        let id = self.nodes.len() as NodeId;

        let mut node = Node {
            row,
            next: [NIL; MAX_HEIGHT],
        };
        for level in 0..height {
            node.next[level] = self.node(prev[level]).next[level];
        }
        self.nodes.push(node);

        for level in 0..height {
            self.nodes[prev[level] as usize].next[level] = id;
        }

        self.height = self.height.max(height);
        self.version += 1;
    }

    /// Geometric tower height with p = 1/4.
    fn random_height(&mut self) -> usize {
        let mut height = 1;
        while height < MAX_HEIGHT && self.next_rand() % BRANCHING == 0 {
            height += 1;
        }
        height
    }

    /// Pseudorandom number generation from "Xorshift RNGs" by George
    /// Marsaglia.
    fn next_rand(&mut self) -> u32 {
        let mut num = self.seed;
        num ^= num << 13;
        num ^= num >> 17;
        num ^= num << 5;
        self.seed = num;
        num
    }

    /// Debug-only validation that a hint still describes a legal splice.
    fn check_splice(&self, row: ArenaRef, hint: &Hint, table: &Arena, cmp: &RowComparator) {
        let view = RowView::new(table, row);
        let prev = hint.prev[0];

        if prev != HEAD {
            debug_assert_ne!(
                Ordering::Greater,
                cmp.compare(self.row_view(prev, table), view),
                "hint predecessor sorts after the new row"
            );
        }

        let next = self.node(prev).next[0];
        if next != NIL {
            debug_assert_ne!(
                Ordering::Less,
                cmp.compare(self.row_view(next, table), view),
                "hint successor sorts before the new row"
            );
        }
    }
}

/// Forward cursor over a [`SkipList`]
pub struct Cursor<'a> {
    list: &'a SkipList,
    node: NodeId,
}

impl Cursor<'_> {
    /// Positions the cursor on the first row.
    pub fn seek_to_first(&mut self) {
        self.node = self.list.node(HEAD).next[0];
    }

    /// Whether the cursor is on a row.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.node != NIL && self.node != HEAD
    }

    /// Advances to the next row.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not valid.
    #[allow(clippy::should_implement_trait)]
    pub fn next(&mut self) {
        assert!(self.valid(), "cursor exhausted");
        self.node = self.list.node(self.node).next[0];
    }

    /// The row under the cursor.
    ///
    /// # Panics
    ///
    /// Panics if the cursor is not valid.
    #[must_use]
    pub fn row(&self) -> ArenaRef {
        assert!(self.valid(), "cursor exhausted");
        self.list.node(self.node).row
    }
}
