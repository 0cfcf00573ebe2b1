//! # Empirical Probabilities
//!
//! Every estimator in this crate is built from relative frequencies of the form
//! "rows matching an event within the rows matching a condition". This module
//! provides that single primitive, parameterized by field assignments, and the
//! 2×2×2 joint table over (treatment, outcome, third variable) that both
//! restoration procedures read and write.

use crate::data::{Assignment, DataError, FieldId, ObservationTable};
use crate::error::RestorationError;
use itertools::iproduct;
use ndarray::{Array1, Array3, ArrayView3, s};

/// `p(event | given)` as a relative frequency over `table`.
///
/// An empty `given` conditions on the whole table. Fails with
/// `DataError::EmptyStratum` when no row satisfies `given`.
pub fn empirical_probability(
    table: &ObservationTable,
    event: Assignment<'_>,
    given: Assignment<'_>,
) -> Result<f64, DataError> {
    let denominator = table.count(given)?;
    if denominator == 0 {
        return Err(DataError::EmptyStratum {
            condition: table.describe(given),
        });
    }
    let joint: Vec<(FieldId, u8)> = given.iter().chain(event.iter()).copied().collect();
    Ok(table.count(&joint)? as f64 / denominator as f64)
}

/// A probability table over three binary variables, indexed `[treatment][outcome][v]`
/// where `v` is a proxy (observed tables) or the confounder (restored tables).
#[derive(Debug, Clone, PartialEq)]
pub struct JointTable {
    cells: Array3<f64>,
}

impl JointTable {
    /// Wraps a `[2, 2, 2]` array of finite cells. Cells are not required to be
    /// non-negative, since restored tables can carry small negative sampling noise.
    pub fn from_cells(cells: Array3<f64>) -> Result<Self, RestorationError> {
        if cells.shape() != [2, 2, 2] {
            return Err(RestorationError::InvalidJointTable(format!(
                "expected shape [2, 2, 2], found {:?}",
                cells.shape()
            )));
        }
        if cells.iter().any(|c| !c.is_finite()) {
            return Err(RestorationError::InvalidJointTable(
                "cells must be finite".to_string(),
            ));
        }
        Ok(Self { cells })
    }

    /// Builds a table from eight cells in lexicographic `(x, y, v)` order.
    pub fn from_flat(cells: [f64; 8]) -> Result<Self, RestorationError> {
        let array = Array3::from_shape_vec((2, 2, 2), cells.to_vec())
            .map_err(|e| RestorationError::InvalidJointTable(e.to_string()))?;
        Self::from_cells(array)
    }

    /// Relative frequencies of every `(treatment, outcome, v)` combination.
    pub fn empirical(
        table: &ObservationTable,
        treatment: FieldId,
        outcome: FieldId,
        third: FieldId,
    ) -> Result<Self, RestorationError> {
        let mut cells = Array3::zeros((2, 2, 2));
        for (x, y, v) in iproduct!(0..2u8, 0..2u8, 0..2u8) {
            cells[[x as usize, y as usize, v as usize]] =
                empirical_probability(table, &[(treatment, x), (outcome, y), (third, v)], &[])?;
        }
        Ok(Self { cells })
    }

    pub fn get(&self, treatment: usize, outcome: usize, v: usize) -> f64 {
        self.cells[[treatment, outcome, v]]
    }

    pub fn cells(&self) -> ArrayView3<'_, f64> {
        self.cells.view()
    }

    /// The 2-vector over `v` for a fixed treatment and outcome.
    pub fn slice(&self, treatment: usize, outcome: usize) -> Array1<f64> {
        self.cells.slice(s![treatment, outcome, ..]).to_owned()
    }

    pub fn total(&self) -> f64 {
        self.cells.sum()
    }

    /// `p(v)`, summing over treatment and outcome.
    pub fn marginal(&self, v: usize) -> f64 {
        self.cells.slice(s![.., .., v]).sum()
    }

    /// `p(treatment = x, v)`, summing over the outcome.
    pub fn treatment_mass(&self, treatment: usize, v: usize) -> f64 {
        self.cells.slice(s![treatment, .., v]).sum()
    }

    /// The eight cells in lexicographic `(x, y, v)` order.
    pub fn to_flat(&self) -> Vec<f64> {
        self.cells.iter().copied().collect()
    }
}
