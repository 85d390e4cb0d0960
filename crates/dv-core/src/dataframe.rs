//! Columnar tabular data carried by table, dataframe, and chart elements.
//!
//! Frames are plain owned values. [`DataFrame::append`] validates the incoming
//! rows against the existing schema first and only then builds the combined
//! frame, so a rejected append never leaves a partially extended frame behind.
//!
//! # Append compatibility
//!
//! | existing column | incoming column | result |
//! |-----------------|-----------------|--------|
//! | `T`             | `T`             | `T`    |
//! | `Float64`       | `Int64`         | `Float64` (values widened) |
//! | `T`             | `Null`          | `T`    |
//! | `Null`          | `T`             | `T`    |
//! | anything else   |                 | [`DataFrameError::ColumnTypeMismatch`] |
//!
//! A frame with no columns adopts the incoming frame wholesale.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Declared type of one column.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Bool,
    Int64,
    Float64,
    Utf8,
    /// Milliseconds since the Unix epoch.
    Timestamp,
    /// Every value is null; compatible with any other type on append.
    Null,
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Bool => "bool",
            Self::Int64 => "int64",
            Self::Float64 => "float64",
            Self::Utf8 => "utf8",
            Self::Timestamp => "timestamp",
            Self::Null => "null",
        };
        f.write_str(name)
    }
}

/// One cell.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Timestamp(i64),
}

impl CellValue {
    /// Whether this cell may live in a column of type `dtype`. Nulls fit anywhere.
    #[must_use]
    pub fn fits(&self, dtype: ColumnType) -> bool {
        matches!(
            (self, dtype),
            (Self::Null, _)
                | (Self::Bool(_), ColumnType::Bool)
                | (Self::Int(_), ColumnType::Int64)
                | (Self::Float(_), ColumnType::Float64)
                | (Self::Str(_), ColumnType::Utf8)
                | (Self::Timestamp(_), ColumnType::Timestamp)
        )
    }

    fn widen_to(&self, dtype: ColumnType) -> Self {
        match (self, dtype) {
            (Self::Int(v), ColumnType::Float64) => Self::Float(*v as f64),
            _ => self.clone(),
        }
    }
}

/// A named, typed column.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub dtype: ColumnType,
    #[serde(default)]
    pub values: Vec<CellValue>,
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, dtype: ColumnType, values: Vec<CellValue>) -> Self {
        Self {
            name: name.into(),
            dtype,
            values,
        }
    }
}

/// Errors produced when validating or appending frames.
#[derive(Debug, Clone, PartialEq)]
pub enum DataFrameError {
    /// Incoming frame has a different number of columns.
    ColumnCountMismatch { expected: usize, found: usize },
    /// Incoming column type cannot be appended to the existing column.
    ColumnTypeMismatch {
        column: String,
        expected: ColumnType,
        found: ColumnType,
    },
    /// A cell does not match its column's declared type.
    CellTypeMismatch {
        column: String,
        row: usize,
        expected: ColumnType,
    },
    /// Columns of one frame disagree on the row count.
    RaggedColumns {
        column: String,
        expected: usize,
        found: usize,
    },
}

impl fmt::Display for DataFrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ColumnCountMismatch { expected, found } => {
                write!(f, "expected {expected} columns, found {found}")
            }
            Self::ColumnTypeMismatch {
                column,
                expected,
                found,
            } => write!(
                f,
                "column {column:?} has type {expected}, cannot append {found}"
            ),
            Self::CellTypeMismatch {
                column,
                row,
                expected,
            } => write!(f, "cell {row} of column {column:?} is not {expected}"),
            Self::RaggedColumns {
                column,
                expected,
                found,
            } => write!(f, "column {column:?} has {found} rows, expected {expected}"),
        }
    }
}

impl std::error::Error for DataFrameError {}

/// Columnar table.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DataFrame {
    #[serde(default)]
    pub columns: Vec<Column>,
}

impl DataFrame {
    #[must_use]
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    /// Builder-style column push.
    #[must_use]
    pub fn with_column(mut self, column: Column) -> Self {
        self.columns.push(column);
        self
    }

    #[must_use]
    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Check that every column has the same length and every cell fits its column.
    pub fn validate(&self) -> Result<(), DataFrameError> {
        let rows = self.num_rows();
        for column in &self.columns {
            if column.values.len() != rows {
                return Err(DataFrameError::RaggedColumns {
                    column: column.name.clone(),
                    expected: rows,
                    found: column.values.len(),
                });
            }
            if let Some(row) = column.values.iter().position(|v| !v.fits(column.dtype)) {
                return Err(DataFrameError::CellTypeMismatch {
                    column: column.name.clone(),
                    row,
                    expected: column.dtype,
                });
            }
        }
        Ok(())
    }

    /// Return a new frame holding `self`'s rows followed by `rows`'.
    ///
    /// `self` is never modified; on error nothing is built.
    pub fn append(&self, rows: &DataFrame) -> Result<DataFrame, DataFrameError> {
        rows.validate()?;

        if self.is_empty() {
            return Ok(rows.clone());
        }
        if rows.num_columns() != self.num_columns() {
            return Err(DataFrameError::ColumnCountMismatch {
                expected: self.num_columns(),
                found: rows.num_columns(),
            });
        }

        let mut merged_types = Vec::with_capacity(self.columns.len());
        for (existing, incoming) in self.columns.iter().zip(&rows.columns) {
            merged_types.push(merged_type(existing, incoming)?);
        }

        let columns = self
            .columns
            .iter()
            .zip(&rows.columns)
            .zip(merged_types)
            .map(|((existing, incoming), dtype)| {
                let mut values = Vec::with_capacity(existing.values.len() + incoming.values.len());
                values.extend(existing.values.iter().cloned());
                values.extend(incoming.values.iter().map(|v| v.widen_to(dtype)));
                Column {
                    name: existing.name.clone(),
                    dtype,
                    values,
                }
            })
            .collect();

        Ok(DataFrame { columns })
    }
}

fn merged_type(existing: &Column, incoming: &Column) -> Result<ColumnType, DataFrameError> {
    use ColumnType::{Float64, Int64, Null};

    match (existing.dtype, incoming.dtype) {
        (a, b) if a == b => Ok(a),
        (Float64, Int64) => Ok(Float64),
        (a, Null) => Ok(a),
        (Null, b) => Ok(b),
        (expected, found) => Err(DataFrameError::ColumnTypeMismatch {
            column: existing.name.clone(),
            expected,
            found,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn ints(name: &str, values: &[i64]) -> Column {
        Column::new(
            name,
            ColumnType::Int64,
            values.iter().copied().map(CellValue::Int).collect(),
        )
    }

    fn floats(name: &str, values: &[f64]) -> Column {
        Column::new(
            name,
            ColumnType::Float64,
            values.iter().copied().map(CellValue::Float).collect(),
        )
    }

    #[test]
    fn append_same_schema_concatenates_rows() {
        let base = DataFrame::new(vec![ints("a", &[1, 2])]);
        let more = DataFrame::new(vec![ints("a", &[3])]);

        let merged = base.append(&more).unwrap();
        assert_eq!(merged.num_rows(), 3);
        assert_eq!(merged.columns[0].values[2], CellValue::Int(3));
        assert_eq!(base.num_rows(), 2);
    }

    #[test]
    fn append_widens_int_into_float_column() {
        let base = DataFrame::new(vec![floats("x", &[0.5])]);
        let more = DataFrame::new(vec![ints("x", &[2])]);

        let merged = base.append(&more).unwrap();
        assert_eq!(merged.columns[0].dtype, ColumnType::Float64);
        assert_eq!(merged.columns[0].values[1], CellValue::Float(2.0));
    }

    #[test]
    fn append_float_into_int_column_is_rejected() {
        let base = DataFrame::new(vec![ints("x", &[1])]);
        let more = DataFrame::new(vec![floats("x", &[2.5])]);

        let err = base.append(&more).unwrap_err();
        assert_eq!(
            err,
            DataFrameError::ColumnTypeMismatch {
                column: "x".into(),
                expected: ColumnType::Int64,
                found: ColumnType::Float64,
            }
        );
    }

    #[test]
    fn append_rejects_column_count_mismatch() {
        let base = DataFrame::new(vec![ints("a", &[1]), ints("b", &[1])]);
        let more = DataFrame::new(vec![ints("a", &[2])]);

        assert_eq!(
            base.append(&more).unwrap_err(),
            DataFrameError::ColumnCountMismatch {
                expected: 2,
                found: 1
            }
        );
    }

    #[test]
    fn null_columns_are_compatible_both_ways() {
        let base = DataFrame::new(vec![ints("a", &[1])]);
        let nulls = DataFrame::new(vec![Column::new(
            "a",
            ColumnType::Null,
            vec![CellValue::Null],
        )]);

        let merged = base.append(&nulls).unwrap();
        assert_eq!(merged.columns[0].dtype, ColumnType::Int64);

        let merged = nulls.append(&base).unwrap();
        assert_eq!(merged.columns[0].dtype, ColumnType::Int64);
        assert_eq!(merged.num_rows(), 2);
    }

    #[test]
    fn empty_frame_adopts_incoming() {
        let more = DataFrame::new(vec![ints("a", &[7, 8])]);
        assert_eq!(DataFrame::default().append(&more).unwrap(), more);
    }

    #[test]
    fn invalid_incoming_frame_is_rejected() {
        let base = DataFrame::new(vec![ints("a", &[1])]);
        let bad = DataFrame::new(vec![Column::new(
            "a",
            ColumnType::Int64,
            vec![CellValue::Str("nope".into())],
        )]);
        assert!(matches!(
            base.append(&bad),
            Err(DataFrameError::CellTypeMismatch { row: 0, .. })
        ));

        let ragged = DataFrame::new(vec![ints("a", &[1, 2]), ints("b", &[1])]);
        assert!(matches!(
            ragged.validate(),
            Err(DataFrameError::RaggedColumns { .. })
        ));
    }
}
