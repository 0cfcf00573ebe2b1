//! # Observation Tables
//!
//! This module owns the only data structure the estimators consume: an immutable
//! table of binary observations (treatment, outcome, proxies, and, in simulations,
//! the confounder itself). Columns are addressed through `FieldId` selectors that
//! are resolved once by name, so estimators never pass column-name strings around.
//!
//! - Immutability: a table is never mutated after construction. Filtering and
//!   bootstrap resampling produce new tables.
//! - Strict Values: every cell must be 0 or 1. Anything else is rejected at
//!   construction time with the offending column and row.
//! - File Input: tab-separated files are read with the `polars` CSV reader and
//!   only the requested columns are materialized.

use ndarray::{Array2, ArrayView1, Axis};
use polars::prelude::PolarsError;
use rand::Rng;
use std::collections::HashSet;
use thiserror::Error;

/// The minimum number of rows accepted from a data file.
pub const MINIMUM_ROWS: usize = 20;

/// A typed handle to one column of an `ObservationTable`.
///
/// Handles are positional; they stay valid for every table derived from the one
/// they were resolved against (strata, resamples), since those share the layout.
/// A handle past the end of another table's layout is rejected with
/// `DataError::UnknownField`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldId(usize);

impl FieldId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// A conjunction of `field = value` requirements.
pub type Assignment<'a> = &'a [(FieldId, u8)];

/// A comprehensive error type for table construction and loading failures.
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Error from the underlying Polars DataFrame library: {0}")]
    PolarsError(#[from] PolarsError),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error(
        "The required column '{0}' was not found in the input. Please check spelling and case."
    )]
    ColumnNotFound(String),
    #[error("Field handle #{index} does not exist in a table with {n_fields} columns.")]
    UnknownField { index: usize, n_fields: usize },
    #[error("The column '{0}' appears more than once.")]
    DuplicateColumn(String),
    #[error(
        "The required column '{column_name}' could not be converted to the expected type '{expected_type}'. (Found type: {found_type})"
    )]
    ColumnWrongType {
        column_name: String,
        expected_type: &'static str,
        found_type: String,
    },
    #[error(
        "Missing or null values were found in the required column '{0}'. Observations must be complete."
    )]
    MissingValuesFound(String),
    #[error("Column '{column_name}' holds the non-binary value {value} at row {row}.")]
    NonBinaryValue {
        column_name: String,
        row: usize,
        value: f64,
    },
    #[error("Column '{column_name}' has {found} rows, but the first column has {expected}.")]
    RaggedColumns {
        column_name: String,
        found: usize,
        expected: usize,
    },
    #[error(
        "Input contains only {found} data rows, but at least {required} are required."
    )]
    InsufficientRows { found: usize, required: usize },
    #[error("An observation table needs at least one column and one row.")]
    EmptyTable,
    #[error("No observations satisfy the condition {condition}.")]
    EmptyStratum { condition: String },
}

/// An immutable table of binary observations.
#[derive(Debug, Clone)]
pub struct ObservationTable {
    names: Vec<String>,
    /// Shape: [n_rows, n_fields].
    values: Array2<u8>,
}

impl ObservationTable {
    /// Builds a table from named columns of equal length holding only 0 and 1.
    pub fn from_columns<S: Into<String>>(columns: Vec<(S, Vec<u8>)>) -> Result<Self, DataError> {
        let columns: Vec<(String, Vec<u8>)> = columns
            .into_iter()
            .map(|(name, values)| (name.into(), values))
            .collect();

        let n_rows = match columns.first() {
            Some((_, first)) if !first.is_empty() => first.len(),
            _ => return Err(DataError::EmptyTable),
        };

        let mut seen = HashSet::with_capacity(columns.len());
        let mut buffer = Vec::with_capacity(n_rows * columns.len());
        let mut names = Vec::with_capacity(columns.len());
        for (name, values) in columns {
            if !seen.insert(name.clone()) {
                return Err(DataError::DuplicateColumn(name));
            }
            if values.len() != n_rows {
                return Err(DataError::RaggedColumns {
                    column_name: name,
                    found: values.len(),
                    expected: n_rows,
                });
            }
            if let Some((row, &value)) = values.iter().enumerate().find(|&(_, &v)| v > 1) {
                return Err(DataError::NonBinaryValue {
                    column_name: name,
                    row,
                    value: f64::from(value),
                });
            }
            buffer.extend_from_slice(&values);
            names.push(name);
        }

        // The buffer is column-major; transpose into [rows, fields].
        let values = Array2::from_shape_vec((names.len(), n_rows), buffer)
            .map_err(|_| DataError::EmptyTable)?
            .reversed_axes()
            .as_standard_layout()
            .into_owned();

        Ok(Self { names, values })
    }

    /// Resolves a column name into a typed selector.
    pub fn field(&self, name: &str) -> Result<FieldId, DataError> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(FieldId)
            .ok_or_else(|| DataError::ColumnNotFound(name.to_string()))
    }

    pub fn field_names(&self) -> &[String] {
        &self.names
    }

    fn check(&self, field: FieldId) -> Result<usize, DataError> {
        if field.0 < self.names.len() {
            Ok(field.0)
        } else {
            Err(DataError::UnknownField {
                index: field.0,
                n_fields: self.names.len(),
            })
        }
    }

    fn check_all(&self, assignment: Assignment<'_>) -> Result<(), DataError> {
        assignment
            .iter()
            .try_for_each(|&(field, _)| self.check(field).map(|_| ()))
    }

    pub fn name(&self, field: FieldId) -> Result<&str, DataError> {
        Ok(&self.names[self.check(field)?])
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn column(&self, field: FieldId) -> Result<ArrayView1<'_, u8>, DataError> {
        Ok(self.values.column(self.check(field)?))
    }

    /// Number of rows matching every requirement of `assignment`.
    pub fn count(&self, assignment: Assignment<'_>) -> Result<usize, DataError> {
        self.check_all(assignment)?;
        Ok(self
            .values
            .axis_iter(Axis(0))
            .filter(|row| assignment.iter().all(|&(field, value)| row[field.0] == value))
            .count())
    }

    /// Human-readable form of an assignment, e.g. `X=1, Y=0`.
    pub fn describe(&self, assignment: Assignment<'_>) -> String {
        if assignment.is_empty() {
            return "(all rows)".to_string();
        }
        assignment
            .iter()
            .map(|&(field, value)| match self.names.get(field.0) {
                Some(name) => format!("{name}={value}"),
                None => format!("#{}={value}", field.0),
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Copies the given rows (repetitions allowed) into a new table.
    pub fn select_rows(&self, indices: &[usize]) -> Self {
        Self {
            names: self.names.clone(),
            values: self.values.select(Axis(0), indices),
        }
    }

    /// The sub-table of rows satisfying `condition`.
    pub fn stratum(&self, condition: Assignment<'_>) -> Result<Self, DataError> {
        self.check_all(condition)?;
        let indices: Vec<usize> = self
            .values
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| condition.iter().all(|&(field, value)| row[field.0] == value))
            .map(|(i, _)| i)
            .collect();
        if indices.is_empty() {
            return Err(DataError::EmptyStratum {
                condition: self.describe(condition),
            });
        }
        Ok(self.select_rows(&indices))
    }

    /// Draws a same-sized table uniformly with replacement.
    pub fn resample<R: Rng>(&self, rng: &mut R) -> Self {
        let n = self.n_rows();
        let indices: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
        self.select_rows(&indices)
    }
}

/// Loads the named binary columns from a tab-separated file with a header row.
pub fn load_observations(path: &str, fields: &[&str]) -> Result<ObservationTable, DataError> {
    internal::load_binary_columns(path, fields)
}

mod internal {
    use super::*;
    use polars::prelude::*;
    use std::fs::File;
    use std::path::Path;

    pub(super) fn load_binary_columns(
        path: &str,
        fields: &[&str],
    ) -> Result<ObservationTable, DataError> {
        fn extract_binary_column(df: &DataFrame, column_name: &str) -> Result<Vec<u8>, DataError> {
            let series = df.column(column_name)?;
            if series.null_count() > 0 {
                return Err(DataError::MissingValuesFound(column_name.to_string()));
            }

            let casted = series.cast(&DataType::Float64).map_err(|_| DataError::ColumnWrongType {
                column_name: column_name.to_string(),
                expected_type: "binary (0 or 1)",
                found_type: format!("{:?}", series.dtype()),
            })?;
            if casted.null_count() > 0 {
                return Err(DataError::ColumnWrongType {
                    column_name: column_name.to_string(),
                    expected_type: "binary (0 or 1)",
                    found_type: format!("{:?}", series.dtype()),
                });
            }

            let chunked = casted.f64()?.rechunk();
            let mut values = Vec::with_capacity(chunked.len());
            for (row, value) in chunked.into_no_null_iter().enumerate() {
                if value == 0.0 {
                    values.push(0);
                } else if value == 1.0 {
                    values.push(1);
                } else {
                    return Err(DataError::NonBinaryValue {
                        column_name: column_name.to_string(),
                        row,
                        value,
                    });
                }
            }
            Ok(values)
        }

        log::info!("Loading observations from '{path}'");

        let df = CsvReader::new(File::open(Path::new(path))?)
            .with_options(
                CsvReadOptions::default()
                    .with_has_header(true)
                    .with_parse_options(CsvParseOptions::default().with_separator(b'\t')),
            )
            .finish()?;

        if df.height() < MINIMUM_ROWS {
            return Err(DataError::InsufficientRows {
                found: df.height(),
                required: MINIMUM_ROWS,
            });
        }

        let columns_set: HashSet<String> = df
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect();
        for name in fields {
            if !columns_set.contains(*name) {
                return Err(DataError::ColumnNotFound(name.to_string()));
            }
        }

        let mut columns = Vec::with_capacity(fields.len());
        for name in fields {
            columns.push((name.to_string(), extract_binary_column(&df, name)?));
        }

        let table = ObservationTable::from_columns(columns)?;
        log::info!(
            "Loaded {} observations over fields {:?}",
            table.n_rows(),
            table.field_names()
        );
        Ok(table)
    }
}
