// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    arena::{Arena, ArenaRef},
    schema::Schema,
};

/// A logical cell value handed into the memtable
///
/// Borrowed from the upstream load buffer; the memtable never keeps these
/// past a single [`crate::MemTable::insert`] call.
///
/// HLL and bitmap columns take their serialized state as `Bytes`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Datum<'a> {
    /// Null cell
    Null,

    /// `FieldType::Int8`
    Int8(i8),

    /// `FieldType::UInt8`
    UInt8(u8),

    /// `FieldType::Int32`
    Int32(i32),

    /// `FieldType::Int64`
    Int64(i64),

    /// `FieldType::UInt64`
    UInt64(u64),

    /// `FieldType::Float64`
    Float64(f64),

    /// `FieldType::String` payload, or serialized aggregate state
    Bytes(&'a [u8]),
}

impl Datum<'_> {
    /// Detaches the datum from its backing buffer.
    #[must_use]
    pub fn to_owned(self) -> OwnedDatum {
        match self {
            Self::Null => OwnedDatum::Null,
            Self::Int8(v) => OwnedDatum::Int8(v),
            Self::UInt8(v) => OwnedDatum::UInt8(v),
            Self::Int32(v) => OwnedDatum::Int32(v),
            Self::Int64(v) => OwnedDatum::Int64(v),
            Self::UInt64(v) => OwnedDatum::UInt64(v),
            Self::Float64(v) => OwnedDatum::Float64(v),
            Self::Bytes(v) => OwnedDatum::Bytes(v.to_vec()),
        }
    }
}

/// Owning variant of [`Datum`], e.g. for row-set writers that outlive
/// the memtable's arenas
#[derive(Clone, Debug, PartialEq)]
pub enum OwnedDatum {
    /// Null cell
    Null,

    /// `FieldType::Int8`
    Int8(i8),

    /// `FieldType::UInt8`
    UInt8(u8),

    /// `FieldType::Int32`
    Int32(i32),

    /// `FieldType::Int64`
    Int64(i64),

    /// `FieldType::UInt64`
    UInt64(u64),

    /// `FieldType::Float64`
    Float64(f64),

    /// `FieldType::String` payload, or serialized aggregate state
    Bytes(Vec<u8>),
}

impl OwnedDatum {
    /// Borrows the datum.
    #[must_use]
    pub fn as_datum(&self) -> Datum<'_> {
        match self {
            Self::Null => Datum::Null,
            Self::Int8(v) => Datum::Int8(*v),
            Self::UInt8(v) => Datum::UInt8(*v),
            Self::Int32(v) => Datum::Int32(*v),
            Self::Int64(v) => Datum::Int64(*v),
            Self::UInt64(v) => Datum::UInt64(*v),
            Self::Float64(v) => Datum::Float64(*v),
            Self::Bytes(v) => Datum::Bytes(v),
        }
    }
}

/// An encoded row addressed through its owning arena
///
/// The pair (arena, handle) replaces an interior pointer; copying the view
/// is free and holding one does not block arena mutation elsewhere.
#[derive(Copy, Clone)]
pub struct RowView<'a> {
    arena: &'a Arena,
    handle: ArenaRef,
}

impl<'a> RowView<'a> {
    /// Creates a view over the row at `handle`.
    #[must_use]
    pub fn new(arena: &'a Arena, handle: ArenaRef) -> Self {
        Self { arena, handle }
    }

    /// The row's handle inside its arena.
    #[must_use]
    pub fn handle(&self) -> ArenaRef {
        self.handle
    }

    /// The full fixed-width row block.
    #[must_use]
    pub fn bytes(&self, schema: &Schema) -> &'a [u8] {
        self.arena.slice(self.handle, schema.row_width())
    }

    /// The cell of column `idx` (null byte followed by the value slot).
    #[must_use]
    pub fn cell(&self, schema: &Schema, idx: usize) -> &'a [u8] {
        let offset = schema.cell_offset(idx);
        let width = 1 + schema.column(idx).field_type.value_width();
        &self.bytes(schema)[offset..offset + width]
    }

    /// Whether the cell of column `idx` is null.
    #[must_use]
    pub fn is_null(&self, schema: &Schema, idx: usize) -> bool {
        self.cell(schema, idx)[0] != 0
    }

    /// Resolves an out-of-band payload stored in the same arena.
    #[must_use]
    pub fn payload(&self, handle: ArenaRef, len: usize) -> &'a [u8] {
        self.arena.slice(handle, len)
    }
}

impl std::fmt::Debug for RowView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RowView({:?})", self.handle)
    }
}
