//! # Tabular Data
//!
//! `Frame` is the column-oriented dataset passed between the ingestion,
//! validation and transform stages. `Matrix` is the dense numeric form the
//! transform stage hands to the learner.
//!
//! Frames are values: every operation that "drops" or "selects" returns a
//! new frame and leaves its input untouched.

use crate::{Cell, DType, Record, VigilError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// =============================================================================
// COLUMN
// =============================================================================

/// A named column of cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub cells: Vec<Cell>,
}

/// Ordering key for counting distinct cells (f64 is not `Ord`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum CellKey {
    Number(u64),
    Text(String),
}

impl Column {
    /// Create a new column.
    #[must_use]
    pub fn new(name: impl Into<String>, cells: Vec<Cell>) -> Self {
        Self {
            name: name.into(),
            cells,
        }
    }

    /// Fraction of missing cells. An empty column has fraction 0.
    #[must_use]
    pub fn null_fraction(&self) -> f64 {
        if self.cells.is_empty() {
            return 0.0;
        }
        let nulls = self.cells.iter().filter(|c| c.is_missing()).count();
        nulls as f64 / self.cells.len() as f64
    }

    /// Declared type derived from the non-missing cells.
    #[must_use]
    pub fn dtype(&self) -> DType {
        let mut seen_number = false;
        for cell in &self.cells {
            match cell {
                Cell::Text(_) => return DType::Text,
                Cell::Number(_) => seen_number = true,
                Cell::Missing => {}
            }
        }
        if seen_number {
            DType::Number
        } else {
            DType::Empty
        }
    }

    /// Count of distinct non-missing values.
    #[must_use]
    pub fn cardinality(&self) -> usize {
        self.cells
            .iter()
            .filter_map(|c| match c {
                Cell::Missing => None,
                Cell::Number(n) => Some(CellKey::Number(n.to_bits())),
                Cell::Text(s) => Some(CellKey::Text(s.clone())),
            })
            .collect::<BTreeSet<_>>()
            .len()
    }
}

// =============================================================================
// FRAME
// =============================================================================

/// An ordered collection of equally long columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Frame {
    columns: Vec<Column>,
    rows: usize,
}

impl Frame {
    /// Create a frame, checking that every column has the same length and
    /// that names are unique.
    pub fn new(columns: Vec<Column>) -> Result<Self, VigilError> {
        let rows = columns.first().map_or(0, |c| c.cells.len());
        let mut names = BTreeSet::new();
        for column in &columns {
            if column.cells.len() != rows {
                return Err(VigilError::InvalidRecord(format!(
                    "column '{}' has {} cells, expected {}",
                    column.name,
                    column.cells.len(),
                    rows
                )));
            }
            if !names.insert(column.name.as_str()) {
                return Err(VigilError::InvalidRecord(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(Self { columns, rows })
    }

    /// Build a frame from raw records with CSV-like type inference.
    ///
    /// - Column order follows first appearance across records
    /// - `null`, absent keys, empty strings and `missing_marker` become `Missing`
    /// - A column whose non-missing values all parse as numbers becomes numeric
    /// - Otherwise every non-missing value is kept as text
    pub fn from_records(records: &[Record], missing_marker: &str) -> Result<Self, VigilError> {
        let mut names: Vec<String> = Vec::new();
        let mut known = BTreeSet::new();
        for record in records {
            for key in record.keys() {
                if known.insert(key.clone()) {
                    names.push(key.clone());
                }
            }
        }

        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            let raw: Vec<Option<String>> = records
                .iter()
                .map(|r| raw_text(r.get(&name), missing_marker))
                .collect::<Result<_, _>>()?;

            let numeric = raw
                .iter()
                .flatten()
                .all(|s| s.trim().parse::<f64>().is_ok());

            let cells = raw
                .into_iter()
                .map(|v| match v {
                    None => Cell::Missing,
                    Some(s) if numeric => s
                        .trim()
                        .parse::<f64>()
                        .map(Cell::Number)
                        .unwrap_or(Cell::Missing),
                    Some(s) => Cell::Text(s),
                })
                .collect();
            columns.push(Column::new(name, cells));
        }
        Self::new(columns)
    }

    /// Convert back to records, one per row, in column order.
    #[must_use]
    pub fn to_records(&self) -> Vec<Record> {
        (0..self.rows)
            .map(|row| {
                self.columns
                    .iter()
                    .map(|c| (c.name.clone(), c.cells[row].to_json()))
                    .collect()
            })
            .collect()
    }

    #[must_use]
    pub fn row_count(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    #[must_use]
    pub fn is_columnless(&self) -> bool {
        self.columns.is_empty()
    }

    /// Column names in order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    #[must_use]
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// A copy of this frame without the named columns. Unknown names are ignored.
    #[must_use]
    pub fn without_columns(&self, names: &[String]) -> Frame {
        let columns: Vec<Column> = self
            .columns
            .iter()
            .filter(|c| !names.contains(&c.name))
            .cloned()
            .collect();
        let rows = if columns.is_empty() { 0 } else { self.rows };
        Frame { columns, rows }
    }

    /// Project onto exactly `names`, in that order.
    ///
    /// Extra columns are dropped; any missing name is a `SchemaError`.
    pub fn select(&self, names: &[String]) -> Result<Frame, VigilError> {
        let missing: Vec<String> = names
            .iter()
            .filter(|n| !self.has_column(n))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(VigilError::SchemaError(missing));
        }
        let columns = names
            .iter()
            .filter_map(|n| self.column(n).cloned())
            .collect();
        Frame::new(columns)
    }

    /// A copy containing only the given rows, in the given order.
    #[must_use]
    pub fn take_rows(&self, indices: &[usize]) -> Frame {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                Column::new(
                    c.name.clone(),
                    indices
                        .iter()
                        .filter_map(|&i| c.cells.get(i).cloned())
                        .collect(),
                )
            })
            .collect();
        Frame {
            columns,
            rows: indices.iter().filter(|&&i| i < self.rows).count(),
        }
    }

    /// Apply `f` to every cell of every column accepted by `filter`.
    #[must_use]
    pub fn map_cells<P, F>(&self, filter: P, f: F) -> Frame
    where
        P: Fn(&str) -> bool,
        F: Fn(&str, &Cell) -> Cell,
    {
        let columns = self
            .columns
            .iter()
            .map(|c| {
                if filter(&c.name) {
                    Column::new(
                        c.name.clone(),
                        c.cells.iter().map(|cell| f(&c.name, cell)).collect(),
                    )
                } else {
                    c.clone()
                }
            })
            .collect();
        Frame {
            columns,
            rows: self.rows,
        }
    }
}

/// Reduce a JSON value to its raw textual form, or `None` when missing.
fn raw_text(
    value: Option<&serde_json::Value>,
    missing_marker: &str,
) -> Result<Option<String>, VigilError> {
    let text = match value {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Bool(b)) => (if *b { "t" } else { "f" }).to_string(),
        Some(other) => {
            return Err(VigilError::InvalidRecord(format!(
                "nested value not supported: {}",
                other
            )));
        }
    };
    if text.is_empty() || text == missing_marker {
        Ok(None)
    } else {
        Ok(Some(text))
    }
}

// =============================================================================
// MATRIX
// =============================================================================

/// Dense row-major f64 matrix. Missing values are NaN.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Matrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Matrix {
    /// Create a matrix from row-major data.
    pub fn new(rows: usize, cols: usize, data: Vec<f64>) -> Result<Self, VigilError> {
        if rows.saturating_mul(cols) != data.len() {
            return Err(VigilError::InvalidRecord(format!(
                "matrix shape {}x{} does not match {} values",
                rows,
                cols,
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Create an empty matrix with a fixed column count.
    #[must_use]
    pub fn with_cols(cols: usize) -> Self {
        Self {
            rows: 0,
            cols,
            data: Vec::new(),
        }
    }

    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[must_use]
    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    /// Append a row. Its length must equal `cols`.
    pub fn push_row(&mut self, row: &[f64]) -> Result<(), VigilError> {
        if row.len() != self.cols {
            return Err(VigilError::InvalidRecord(format!(
                "row has {} values, expected {}",
                row.len(),
                self.cols
            )));
        }
        self.data.extend_from_slice(row);
        self.rows += 1;
        Ok(())
    }

    /// A copy containing only the given rows.
    #[must_use]
    pub fn take_rows(&self, indices: &[usize]) -> Matrix {
        let mut data = Vec::with_capacity(indices.len() * self.cols);
        for &i in indices {
            data.extend_from_slice(self.row(i));
        }
        Matrix {
            rows: indices.len(),
            cols: self.cols,
            data,
        }
    }

    /// Check if any value is NaN.
    #[must_use]
    pub fn has_missing(&self) -> bool {
        self.data.iter().any(|v| v.is_nan())
    }
}

/// Features plus encoded class labels, one label per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LabeledMatrix {
    pub features: Matrix,
    pub labels: Vec<u32>,
}

impl LabeledMatrix {
    pub fn new(features: Matrix, labels: Vec<u32>) -> Result<Self, VigilError> {
        if features.rows() != labels.len() {
            return Err(VigilError::InvalidRecord(format!(
                "{} feature rows but {} labels",
                features.rows(),
                labels.len()
            )));
        }
        Ok(Self { features, labels })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    #[must_use]
    pub fn take_rows(&self, indices: &[usize]) -> LabeledMatrix {
        LabeledMatrix {
            features: self.features.take_rows(indices),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
