// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use crate::{
    agg::{
        pool::{AggObject, AggObjectPool},
        state::HllSketch,
    },
    arena::{Arena, ArenaRef},
    row::{Datum, OwnedDatum, RowView},
    schema::{FieldType, Schema},
    Result,
};
use byteorder::{ByteOrder, LittleEndian};
use roaring::RoaringBitmap;

/// Encodes one input row into a fresh row block inside `arena`.
///
/// Variable-length payloads land out-of-band in the same arena; aggregate
/// states are constructed into `pool` and referenced by handle.
///
/// # Panics
///
/// Panics on slot count or type mismatches - those are planner bugs, the
/// write path does not coerce.
pub(crate) fn encode_row(
    input: &[Datum<'_>],
    schema: &Schema,
    arena: &mut Arena,
    pool: &mut AggObjectPool,
) -> Result<ArenaRef> {
    assert_eq!(schema.columns().len(), input.len(), "slot count mismatch");

    let row = arena.allocate(schema.row_width())?;

    for (idx, datum) in input.iter().enumerate() {
        encode_cell(row, *datum, schema, idx, arena, pool)?;
    }

    Ok(row)
}

fn encode_cell(
    row: ArenaRef,
    datum: Datum<'_>,
    schema: &Schema,
    idx: usize,
    arena: &mut Arena,
    pool: &mut AggObjectPool,
) -> Result<()> {
    let column = schema.column(idx);

    if matches!(datum, Datum::Null) {
        assert!(
            column.nullable,
            "null value for non-nullable column {:?}",
            column.name
        );
        assert_ne!(
            Some(idx),
            schema.sequence_col(),
            "sequence cell cannot be null"
        );
        write_null(arena, row, schema, idx);
        return Ok(());
    }

    match (column.field_type, datum) {
        (
            FieldType::Int8
            | FieldType::UInt8
            | FieldType::Int32
            | FieldType::Int64
            | FieldType::UInt64
            | FieldType::Float64,
            _,
        ) => write_scalar(arena, row, schema, idx, datum),
        (FieldType::String, Datum::Bytes(payload)) => {
            write_bytes_cell(arena, row, schema, idx, payload)?;
        }
        (FieldType::Hll, Datum::Bytes(state)) => {
            let handle = pool.acquire(AggObject::Hll(HllSketch::from_bytes(state)));
            write_object_handle(arena, row, schema, idx, handle);
        }
        (FieldType::Bitmap, Datum::Bytes(state)) => {
            #[allow(clippy::expect_used)]
            let bitmap =
                RoaringBitmap::deserialize_from(state).expect("malformed bitmap state");
            let handle = pool.acquire(AggObject::Bitmap(bitmap));
            write_object_handle(arena, row, schema, idx, handle);
        }
        _ => panic!("datum does not match type of column {:?}", column.name),
    }

    Ok(())
}

/// Deep-copies an encoded row into `dst`.
///
/// String payloads are re-allocated in `dst`; aggregate-state handles are
/// rebased by `rebase` (their objects are expected to have been moved via
/// [`AggObjectPool::acquire_from`]).
pub(crate) fn copy_row(
    schema: &Schema,
    src: RowView<'_>,
    dst: &mut Arena,
    rebase: u32,
) -> Result<ArenaRef> {
    let row = dst.allocate(schema.row_width())?;
    dst.slice_mut(row, schema.row_width())
        .copy_from_slice(src.bytes(schema));

    for (idx, column) in schema.columns().iter().enumerate() {
        if src.is_null(schema, idx) {
            continue;
        }

        match column.field_type {
            FieldType::String => {
                let (handle, len) = read_payload_ref(src, schema, idx);
                let payload = src.payload(handle, len);
                write_bytes_cell(dst, row, schema, idx, payload)?;
            }
            FieldType::Hll | FieldType::Bitmap => {
                let handle = read_object_handle(src, schema, idx) + rebase;
                write_object_handle(dst, row, schema, idx, handle);
            }
            _ => {}
        }
    }

    Ok(row)
}

/// Decodes the cell of column `idx`.
///
/// Aggregate-state cells are only decodable once the row was finalized
/// (their serialized payload then sits in the arena like a string).
#[must_use]
pub fn decode_cell<'a>(view: RowView<'a>, schema: &Schema, idx: usize) -> Datum<'a> {
    if view.is_null(schema, idx) {
        return Datum::Null;
    }

    let value = &view.cell(schema, idx)[1..];

    match schema.column(idx).field_type {
        #[allow(clippy::cast_possible_wrap)]
        FieldType::Int8 => Datum::Int8(value[0] as i8),
        FieldType::UInt8 => Datum::UInt8(value[0]),
        FieldType::Int32 => Datum::Int32(LittleEndian::read_i32(value)),
        FieldType::Int64 => Datum::Int64(LittleEndian::read_i64(value)),
        FieldType::UInt64 => Datum::UInt64(LittleEndian::read_u64(value)),
        FieldType::Float64 => Datum::Float64(LittleEndian::read_f64(value)),
        FieldType::String | FieldType::Hll | FieldType::Bitmap => {
            let handle = ArenaRef::unpack(LittleEndian::read_u64(&value[0..8]));
            let len = LittleEndian::read_u32(&value[8..12]) as usize;
            Datum::Bytes(view.payload(handle, len))
        }
    }
}

/// Decodes a whole finalized row into owned datums.
#[must_use]
pub fn decode_row(view: RowView<'_>, schema: &Schema) -> Vec<OwnedDatum> {
    (0..schema.columns().len())
        .map(|idx| decode_cell(view, schema, idx).to_owned())
        .collect()
}

/// Writes a non-null scalar datum into its cell.
///
/// # Panics
///
/// Panics when the datum is not a scalar of the column's type.
pub(crate) fn write_scalar(
    arena: &mut Arena,
    row: ArenaRef,
    schema: &Schema,
    idx: usize,
    datum: Datum<'_>,
) {
    let field_type = schema.column(idx).field_type;

    match (field_type, datum) {
        (FieldType::Int8, Datum::Int8(v)) => {
            #[allow(clippy::cast_sign_loss)]
            write_value(arena, row, schema, idx, &[v as u8]);
        }
        (FieldType::UInt8, Datum::UInt8(v)) => write_value(arena, row, schema, idx, &[v]),
        (FieldType::Int32, Datum::Int32(v)) => {
            let mut buf = [0; 4];
            LittleEndian::write_i32(&mut buf, v);
            write_value(arena, row, schema, idx, &buf);
        }
        (FieldType::Int64, Datum::Int64(v)) => {
            let mut buf = [0; 8];
            LittleEndian::write_i64(&mut buf, v);
            write_value(arena, row, schema, idx, &buf);
        }
        (FieldType::UInt64, Datum::UInt64(v)) => {
            let mut buf = [0; 8];
            LittleEndian::write_u64(&mut buf, v);
            write_value(arena, row, schema, idx, &buf);
        }
        (FieldType::Float64, Datum::Float64(v)) => {
            let mut buf = [0; 8];
            LittleEndian::write_f64(&mut buf, v);
            write_value(arena, row, schema, idx, &buf);
        }
        _ => panic!(
            "datum does not match type of column {:?}",
            schema.column(idx).name
        ),
    }
}

pub(crate) fn write_null(arena: &mut Arena, row: ArenaRef, schema: &Schema, idx: usize) {
    let offset = schema.cell_offset(idx);
    let width = schema.column(idx).field_type.value_width();
    let bytes = arena.slice_mut(row, schema.row_width());
    bytes[offset] = 1;
    bytes[offset + 1..offset + 1 + width].fill(0);
}

pub(crate) fn write_value(
    arena: &mut Arena,
    row: ArenaRef,
    schema: &Schema,
    idx: usize,
    value: &[u8],
) {
    let offset = schema.cell_offset(idx);
    let bytes = arena.slice_mut(row, schema.row_width());
    bytes[offset] = 0;
    bytes[offset + 1..offset + 1 + value.len()].copy_from_slice(value);
}

/// Allocates `payload` out-of-band and points the cell at it.
pub(crate) fn write_bytes_cell(
    arena: &mut Arena,
    row: ArenaRef,
    schema: &Schema,
    idx: usize,
    payload: &[u8],
) -> Result<()> {
    let handle = arena.allocate_bytes(payload)?;

    let mut buf = [0; 12];
    LittleEndian::write_u64(&mut buf[0..8], handle.pack());
    #[allow(clippy::cast_possible_truncation)]
    LittleEndian::write_u32(&mut buf[8..12], payload.len() as u32);
    write_value(arena, row, schema, idx, &buf);

    Ok(())
}

pub(crate) fn read_payload_ref(
    view: RowView<'_>,
    schema: &Schema,
    idx: usize,
) -> (ArenaRef, usize) {
    let value = &view.cell(schema, idx)[1..];
    let handle = ArenaRef::unpack(LittleEndian::read_u64(&value[0..8]));
    let len = LittleEndian::read_u32(&value[8..12]) as usize;
    (handle, len)
}

pub(crate) fn write_object_handle(
    arena: &mut Arena,
    row: ArenaRef,
    schema: &Schema,
    idx: usize,
    handle: u32,
) {
    let mut buf = [0; 12];
    LittleEndian::write_u32(&mut buf[0..4], handle);
    write_value(arena, row, schema, idx, &buf);
}

pub(crate) fn read_object_handle(view: RowView<'_>, schema: &Schema, idx: usize) -> u32 {
    LittleEndian::read_u32(&view.cell(schema, idx)[1..5])
}
