//! # Single-Proxy Effect Restoration
//!
//! Given the error matrix of one proxy, `M[v][u] = p(proxy = v | U = u)`, the
//! observed joint over (treatment, outcome, proxy) is `M` applied to the latent
//! joint over (treatment, outcome, confounder), one (treatment, outcome) pair at
//! a time. Restoration inverts that map exactly. Because every column of `M`
//! sums to one, so does `M⁻¹`, and the restored table keeps the total mass of
//! the observed one.

use crate::error::RestorationError;
use crate::probability::JointTable;
use itertools::iproduct;
use ndarray::{Array2, Array3, ArrayView2, array, s};
use ndarray_linalg::Inverse;

const COLUMN_SUM_TOLERANCE: f64 = 1e-9;
const SINGULAR_TOLERANCE: f64 = 1e-12;

/// The 2×2 measurement-error matrix of a binary proxy.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorMatrix {
    matrix: Array2<f64>,
}

impl ErrorMatrix {
    /// A noiseless proxy.
    pub fn identity() -> Self {
        Self {
            matrix: Array2::eye(2),
        }
    }

    /// Builds the matrix from `p(proxy=0 | U=0)` and `p(proxy=0 | U=1)`.
    pub fn from_zero_rates(given_u0: f64, given_u1: f64) -> Result<Self, RestorationError> {
        Self::from_matrix(array![[given_u0, given_u1], [1.0 - given_u0, 1.0 - given_u1]])
    }

    /// Validates a full matrix indexed `[proxy][confounder]`.
    pub fn from_matrix(matrix: Array2<f64>) -> Result<Self, RestorationError> {
        if matrix.shape() != [2, 2] {
            return Err(RestorationError::InvalidErrorMatrix(format!(
                "expected shape [2, 2], found {:?}",
                matrix.shape()
            )));
        }
        if let Some(bad) = matrix
            .iter()
            .find(|&&p| !p.is_finite() || !(0.0..=1.0).contains(&p))
        {
            return Err(RestorationError::InvalidErrorMatrix(format!(
                "entry {bad} is not a probability"
            )));
        }
        for u in 0..2 {
            let total = matrix.column(u).sum();
            if (total - 1.0).abs() > COLUMN_SUM_TOLERANCE {
                return Err(RestorationError::InvalidErrorMatrix(format!(
                    "column for confounder state {u} sums to {total}, not 1"
                )));
            }
        }
        Ok(Self { matrix })
    }

    pub fn matrix(&self) -> ArrayView2<'_, f64> {
        self.matrix.view()
    }

    /// `p(proxy=0 | U=u)` for both states.
    pub fn zero_rates(&self) -> [f64; 2] {
        [self.matrix[[0, 0]], self.matrix[[0, 1]]]
    }

    /// `M⁻¹`, or `NotIdentifiable` when the proxy carries no information about `U`.
    pub fn inverse(&self) -> Result<Array2<f64>, RestorationError> {
        let m = &self.matrix;
        let det = m[[0, 0]] * m[[1, 1]] - m[[0, 1]] * m[[1, 0]];
        if det.abs() <= SINGULAR_TOLERANCE {
            return Err(RestorationError::NotIdentifiable {
                reason: "the proxy error matrix is singular".to_string(),
                determinant: det,
            });
        }
        Ok(m.inv()?)
    }
}

/// Recovers the joint over (treatment, outcome, confounder) from the observed
/// joint over (treatment, outcome, proxy).
pub fn restore_joint(
    observed: &JointTable,
    error: &ErrorMatrix,
) -> Result<JointTable, RestorationError> {
    let inverse = error.inverse()?;
    let mut cells = Array3::zeros((2, 2, 2));
    for (x, y) in iproduct!(0..2usize, 0..2usize) {
        let latent = inverse.dot(&observed.slice(x, y));
        cells.slice_mut(s![x, y, ..]).assign(&latent);
    }

    if let Some(negative) = cells.iter().copied().filter(|&c| c < 0.0).reduce(f64::min) {
        log::warn!(
            "Restored joint has negative mass (minimum {negative:.3e}); the error matrix may not match the data."
        );
    }
    JointTable::from_cells(cells)
}
