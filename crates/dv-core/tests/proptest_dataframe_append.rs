//! Property-based tests for row appends.
//!
//! 1. Appending same-typed rows concatenates: old rows form an unchanged prefix.
//! 2. Appending to an empty frame yields the appended rows.
//! 3. Int rows appended to a float column are widened, never rejected.
//! 4. A type conflict is an error and never builds a partial frame.

use dv_core::{CellValue, Column, ColumnType, DataFrame, DataFrameError};
use proptest::prelude::*;

fn ints(values: &[i64]) -> DataFrame {
    DataFrame::new(vec![Column::new(
        "n",
        ColumnType::Int64,
        values.iter().copied().map(CellValue::Int).collect(),
    )])
}

fn floats(values: &[f64]) -> DataFrame {
    DataFrame::new(vec![Column::new(
        "n",
        ColumnType::Float64,
        values.iter().copied().map(CellValue::Float).collect(),
    )])
}

fn strings(values: &[String]) -> DataFrame {
    DataFrame::new(vec![Column::new(
        "n",
        ColumnType::Utf8,
        values.iter().cloned().map(CellValue::Str).collect(),
    )])
}

// ═════════════════════════════════════════════════════════════════════════════
// Concatenation
// ═════════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn append_concatenates(
        a in prop::collection::vec(any::<i64>(), 0..32),
        b in prop::collection::vec(any::<i64>(), 0..32),
    ) {
        let merged = ints(&a).append(&ints(&b)).unwrap();
        prop_assert_eq!(merged.num_rows(), a.len() + b.len());
        prop_assert_eq!(&merged.columns[0].values[..a.len()], &ints(&a).columns[0].values[..]);
    }

    #[test]
    fn append_to_empty_frame_takes_rows(b in prop::collection::vec(any::<i64>(), 0..32)) {
        let merged = DataFrame::default().append(&ints(&b)).unwrap();
        prop_assert_eq!(merged, ints(&b));
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// Type rules
// ═════════════════════════════════════════════════════════════════════════════

proptest! {
    #[test]
    fn ints_widen_into_float_column(
        a in prop::collection::vec(-1.0e9f64..1.0e9, 1..16),
        b in prop::collection::vec(-1_000_000i64..1_000_000, 1..16),
    ) {
        let merged = floats(&a).append(&ints(&b)).unwrap();
        prop_assert_eq!(merged.columns[0].dtype, ColumnType::Float64);
        prop_assert!(merged.columns[0]
            .values
            .iter()
            .all(|v| matches!(v, CellValue::Float(_))));
    }

    #[test]
    fn conflicting_types_are_rejected(
        a in prop::collection::vec(any::<i64>(), 1..16),
        b in prop::collection::vec("[a-z]{0,8}", 1..16),
    ) {
        let err = ints(&a).append(&strings(&b)).unwrap_err();
        let is_type_mismatch = matches!(err, DataFrameError::ColumnTypeMismatch { .. });
        prop_assert!(is_type_mismatch);
    }
}
