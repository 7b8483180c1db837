// Copyright (c) 2024-present, fjall-rs
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Physical type of a column
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FieldType {
    /// Signed 8-bit integer
    Int8,

    /// Unsigned 8-bit integer
    UInt8,

    /// Signed 32-bit integer
    Int32,

    /// Signed 64-bit integer
    Int64,

    /// Unsigned 64-bit integer
    UInt64,

    /// IEEE 754 double
    Float64,

    /// Variable-length byte string
    String,

    /// HyperLogLog sketch (aggregate state)
    Hll,

    /// Roaring bitmap (aggregate state)
    Bitmap,
}

impl FieldType {
    /// Width of the cell's value slot in bytes (the null byte comes on top).
    ///
    /// Variable-length and aggregate-state cells hold a fixed-width
    /// out-of-band reference instead of the payload itself.
    #[must_use]
    pub fn value_width(self) -> usize {
        match self {
            Self::Int8 | Self::UInt8 => 1,
            Self::Int32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 => 8,
            // arena handle (8) + length (4); aggregate-state cells are
            // rewritten into this same shape when finalized
            Self::String | Self::Hll | Self::Bitmap => 12,
        }
    }

    /// Whether values of this type live in the aggregate object pool
    /// until finalization.
    #[must_use]
    pub fn is_object(self) -> bool {
        matches!(self, Self::Hll | Self::Bitmap)
    }

    /// Whether this type can be a sequence column.
    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(
            self,
            Self::Int8 | Self::UInt8 | Self::Int32 | Self::Int64 | Self::UInt64
        )
    }
}

/// Per-column merge function applied when equal keys meet
/// under the aggregate key model
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum AggMethod {
    /// No aggregation (key columns, duplicate model)
    None,

    /// Numeric addition
    Sum,

    /// Keep the smaller value
    Min,

    /// Keep the larger value
    Max,

    /// Keep the newest value
    Replace,

    /// Register-wise HyperLogLog union
    HllUnion,

    /// Bitmap union
    BitmapUnion,
}

/// Semantics for rows sharing the same key
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum KeyModel {
    /// Every row is retained; equal keys keep their arrival order
    Duplicate,

    /// Equal-key rows are merged column-wise by [`AggMethod`]
    Aggregate,

    /// Equal-key rows are replaced, newest (or highest sequence value) wins
    Unique,
}

/// Sort discipline of the memtable
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SortSpec {
    /// Compare key columns left to right
    Lexicographic,

    /// Bit-interleave the first `sort_columns` key columns,
    /// ties broken lexicographically
    ZOrder {
        /// Number of leading key columns taking part in the interleave
        sort_columns: usize,
    },
}

/// A single column definition
#[derive(Clone, Debug)]
pub struct Column {
    /// Column name (diagnostics only)
    pub name: String,

    /// Physical type
    pub field_type: FieldType,

    /// Merge function under the aggregate key model
    pub agg: AggMethod,

    /// Whether cells may be null
    pub nullable: bool,
}

impl Column {
    /// Creates a nullable, non-aggregated column.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            agg: AggMethod::None,
            nullable: true,
        }
    }

    /// Sets the merge function.
    #[must_use]
    pub fn with_agg(mut self, agg: AggMethod) -> Self {
        self.agg = agg;
        self
    }

    /// Marks the column non-nullable.
    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Tablet schema as seen by the write path
///
/// Owns the column definitions plus the derived encoded-row geometry
/// (cell offsets, row width). Immutable once constructed.
#[derive(Clone, Debug)]
pub struct Schema {
    columns: Vec<Column>,
    num_key_columns: usize,
    key_model: KeyModel,
    sequence_col: Option<usize>,
    cell_offsets: Vec<usize>,
    row_width: usize,
}

impl Schema {
    /// Creates a schema; the first `num_key_columns` columns form the key.
    ///
    /// # Panics
    ///
    /// Panics when the definition is not a valid tablet schema; malformed
    /// schemas are upstream planner bugs, not runtime errors.
    #[must_use]
    pub fn new(columns: Vec<Column>, num_key_columns: usize, key_model: KeyModel) -> Self {
        assert!(
            (1..=columns.len()).contains(&num_key_columns),
            "key column count out of range"
        );

        for column in columns.iter().take(num_key_columns) {
            assert!(
                !column.field_type.is_object() && column.field_type != FieldType::Float64,
                "column {:?} cannot be a key column",
                column.name
            );
            assert_eq!(
                AggMethod::None,
                column.agg,
                "key column {:?} cannot aggregate",
                column.name
            );
        }

        for column in columns.iter().skip(num_key_columns) {
            match key_model {
                KeyModel::Aggregate => assert_ne!(
                    AggMethod::None,
                    column.agg,
                    "value column {:?} needs a merge function",
                    column.name
                ),
                KeyModel::Duplicate => assert_eq!(
                    AggMethod::None,
                    column.agg,
                    "duplicate-model column {:?} cannot aggregate",
                    column.name
                ),
                KeyModel::Unique => {}
            }

            if column.field_type == FieldType::Hll {
                assert_eq!(AggMethod::HllUnion, column.agg, "hll columns must union");
            }
            if column.field_type == FieldType::Bitmap {
                assert_eq!(
                    AggMethod::BitmapUnion,
                    column.agg,
                    "bitmap columns must union"
                );
            }
        }

        let mut cell_offsets = Vec::with_capacity(columns.len());
        let mut row_width = 0;

        for column in &columns {
            cell_offsets.push(row_width);
            row_width += 1 + column.field_type.value_width();
        }

        Self {
            columns,
            num_key_columns,
            key_model,
            sequence_col: None,
            cell_offsets,
            row_width,
        }
    }

    /// Designates a sequence column deciding the winner among equal keys
    /// under the unique key model.
    ///
    /// # Panics
    ///
    /// Panics if the column is not an integer value column of a
    /// unique-model schema.
    #[must_use]
    pub fn with_sequence_column(mut self, idx: usize) -> Self {
        assert_eq!(KeyModel::Unique, self.key_model, "sequence needs unique model");
        assert!(
            (self.num_key_columns..self.columns.len()).contains(&idx),
            "sequence column must be a value column"
        );
        assert!(
            self.columns[idx].field_type.is_integer(),
            "sequence column must be an integer"
        );
        self.sequence_col = Some(idx);
        self
    }

    /// All column definitions, key columns first.
    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// The column at `idx`.
    #[must_use]
    pub fn column(&self, idx: usize) -> &Column {
        &self.columns[idx]
    }

    /// Number of leading key columns.
    #[must_use]
    pub fn num_key_columns(&self) -> usize {
        self.num_key_columns
    }

    /// The schema's key model.
    #[must_use]
    pub fn key_model(&self) -> KeyModel {
        self.key_model
    }

    /// Index of the sequence column, if one was designated.
    #[must_use]
    pub fn sequence_col(&self) -> Option<usize> {
        self.sequence_col
    }

    /// Byte offset of column `idx`'s cell inside an encoded row.
    #[must_use]
    pub fn cell_offset(&self, idx: usize) -> usize {
        self.cell_offsets[idx]
    }

    /// Width of an encoded row in bytes.
    #[must_use]
    pub fn row_width(&self) -> usize {
        self.row_width
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn schema_row_geometry() {
        let schema = Schema::new(
            vec![
                Column::new("k", FieldType::Int32),
                Column::new("v", FieldType::Int64).with_agg(AggMethod::Sum),
            ],
            1,
            KeyModel::Aggregate,
        );

        assert_eq!(0, schema.cell_offset(0));
        assert_eq!(5, schema.cell_offset(1));
        assert_eq!(14, schema.row_width());
    }

    #[test]
    #[should_panic(expected = "cannot be a key column")]
    fn schema_rejects_float_key() {
        let _ = Schema::new(
            vec![
                Column::new("k", FieldType::Float64),
                Column::new("v", FieldType::Int64),
            ],
            1,
            KeyModel::Duplicate,
        );
    }

    #[test]
    #[should_panic(expected = "needs a merge function")]
    fn schema_rejects_unaggregated_value_column() {
        let _ = Schema::new(
            vec![
                Column::new("k", FieldType::Int32),
                Column::new("v", FieldType::Int64),
            ],
            1,
            KeyModel::Aggregate,
        );
    }

    #[test]
    fn schema_sequence_column() {
        let schema = Schema::new(
            vec![
                Column::new("k", FieldType::Int32),
                Column::new("v", FieldType::Int64).with_agg(AggMethod::Replace),
                Column::new("seq", FieldType::Int64).with_agg(AggMethod::Replace),
            ],
            1,
            KeyModel::Unique,
        )
        .with_sequence_column(2);

        assert_eq!(Some(2), schema.sequence_col());
    }
}
