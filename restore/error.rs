//! The error taxonomy shared by every estimator in the crate.

use crate::data::DataError;
use ndarray_linalg::error::LinalgError;
use thiserror::Error;

/// Failures of a single estimation call.
///
/// All variants are fatal to the call that produced them. Callers that repeat an
/// estimation (the bootstrap loop) record them per attempt instead of aborting.
#[derive(Error, Debug)]
pub enum RestorationError {
    /// Table-level failures, including an empty conditioning stratum.
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("The latent distribution is not identifiable: {reason} (determinant {determinant:.3e}).")]
    NotIdentifiable { reason: String, determinant: f64 },

    #[error(
        "The moment ratio P⁻¹Q has complex eigenvalues {real:.6} ± {imaginary:.6}i. The two-proxy model assumptions do not hold for this data."
    )]
    ComplexEigenvalues { real: f64, imaginary: f64 },

    #[error(
        "The two-proxy solution puts {quantity} at {value:.4}, outside [0, 1]; the data admit no valid error matrix."
    )]
    NoValidSolution { quantity: &'static str, value: f64 },

    #[error("Invalid proxy error matrix: {0}")]
    InvalidErrorMatrix(String),

    #[error("Invalid joint probability table: {0}")]
    InvalidJointTable(String),

    #[error("The probability mass of {cell} is {mass:.3e}, so the conditional outcome is undefined.")]
    NonPositiveMass { cell: String, mass: f64 },

    #[error("A linear algebra routine failed: {0}")]
    Linalg(#[from] LinalgError),
}

impl RestorationError {
    /// True when the failure comes from a conditioning subset with no rows.
    pub fn is_empty_stratum(&self) -> bool {
        matches!(self, RestorationError::Data(DataError::EmptyStratum { .. }))
    }
}
