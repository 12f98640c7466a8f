//! Feature frame adapter
//!
//! Turns a [`FeatureTable`] into a dense numeric matrix over a fixed,
//! ordered list of feature columns.

use serde::{Deserialize, Serialize};

use crate::table::{FeatureTable, Value};

/// Columns that are never model inputs, whatever their type
pub const EXCLUDED_COLUMNS: &[&str] = &[
    "timestamp",
    "@timestamp",
    "raw_message",
    "clean_message",
    "message",
    "label",
    "embedding",
    // scoring outputs, so a scored table can be fed back for retraining
    "iso_score",
    "lgbm_score",
    "adwin_flag",
    "fusion_score",
    "is_anomaly",
];

/// Row-major numeric matrix with named columns
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureMatrix {
    columns: Vec<String>,
    data: Vec<f64>,
    n_rows: usize,
}

impl FeatureMatrix {
    /// Build from row vectors; every row must have `columns.len()` entries
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<f64>>) -> Self {
        let n_cols = columns.len();
        let n_rows = rows.len();
        let mut data = Vec::with_capacity(n_rows * n_cols);
        for row in rows {
            debug_assert_eq!(row.len(), n_cols);
            data.extend(row.into_iter().take(n_cols));
        }
        Self { columns, data, n_rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.n_rows == 0
    }

    #[inline]
    pub fn row(&self, i: usize) -> &[f64] {
        let n = self.n_cols();
        &self.data[i * n..(i + 1) * n]
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.n_cols() + col]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.n_rows).map(move |i| self.row(i))
    }

    pub fn column_values(&self, col: usize) -> impl Iterator<Item = f64> + '_ {
        (0..self.n_rows).map(move |r| self.get(r, col))
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Subset of rows by index, in the given order
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        let mut data = Vec::with_capacity(indices.len() * self.n_cols());
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Self {
            columns: self.columns.clone(),
            data,
            n_rows: indices.len(),
        }
    }
}

/// Feature frame adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureFrame;

impl FeatureFrame {
    /// Infer model input columns: not excluded, no text values and at least
    /// one number. Booleans are not features on their own; a boolean in a
    /// numeric column is read as 0/1.
    pub fn infer_columns(table: &FeatureTable) -> Vec<String> {
        table
            .columns()
            .into_iter()
            .filter(|c| !EXCLUDED_COLUMNS.contains(&c.as_str()))
            .filter(|c| {
                let mut seen_numeric = false;
                for value in table.column(c) {
                    match value {
                        None | Some(Value::Null) | Some(Value::Bool(_)) => {}
                        Some(Value::Number(_)) => seen_numeric = true,
                        Some(Value::Text(_)) => return false,
                    }
                }
                seen_numeric
            })
            .collect()
    }

    /// Build the matrix over `columns` (or inferred ones). Absent, null,
    /// non-numeric and non-finite values are imputed to zero.
    pub fn prepare(table: &FeatureTable, columns: Option<&[String]>) -> FeatureMatrix {
        let columns = match columns {
            Some(cols) => cols.to_vec(),
            None => Self::infer_columns(table),
        };

        let rows = table
            .records()
            .iter()
            .map(|record| {
                columns
                    .iter()
                    .map(|c| {
                        record
                            .get(c)
                            .and_then(Value::as_f64)
                            .filter(|v| v.is_finite())
                            .unwrap_or(0.0)
                    })
                    .collect()
            })
            .collect();

        FeatureMatrix::from_rows(columns, rows)
    }
}
