//! # Two-Proxy Effect Restoration
//!
//! Recovers the distribution of a latent binary confounder `U` from two
//! error-prone proxies without knowing either proxy's error matrix.
//!
//! Within the treated stratum (`X = 1`), and assuming the outcome `Y`, the row
//! proxy `Z` and the column proxy `W` are mutually independent given `U`, the two
//! empirical moment matrices factor as
//!
//! ```text
//! P = [[1,      p(W=0)     ],        = Zm · D · Wm
//!      [p(Z=0), p(Z=0, W=0)]]
//!
//! Q = [[p(Y=0),      p(Y=0, W=0)     ],   = Zm · D · Λ · Wm
//!      [p(Y=0, Z=0), p(Y=0, Z=0, W=0)]]
//! ```
//!
//! with `Zm = [[1, 1], [p(Z=0|U=0), p(Z=0|U=1)]]`, `D = diag(p(U|X=1))`,
//! `Λ = diag(p(Y=0|X=1,U))` and `Wm = [[1, p(W=0|U=0)], [1, p(W=0|U=1)]]`.
//! Therefore `P⁻¹Q = Wm⁻¹ Λ Wm`: its eigenvalues are the outcome rates, and each
//! row of the inverse eigenvector matrix is proportional to a row of `Wm`.
//! Once `Wm` is known, `P · Wm⁻¹ = Zm · D` yields the row proxy rates and the
//! latent weights.
//!
//! The two latent states come out of the eigensolver in no particular order.
//! `LabelRule` fixes a convention so that repeated estimates (bootstrap
//! replicates in particular) name the states consistently.

use crate::config::FieldNames;
use crate::data::{DataError, FieldId, ObservationTable};
use crate::error::RestorationError;
use crate::probability::empirical_probability;
use ndarray::{Array1, Array2, ArrayView2, array};
use ndarray_linalg::{Eig, Inverse};
use serde::{Deserialize, Serialize};

/// Convention used to name the two latent states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LabelRule {
    /// State 0 is the one under which the column proxy most often reads 0.
    #[default]
    ProxyAgreement,
    /// State 0 is the one under which the outcome most often reads 0.
    OutcomeAgreement,
    /// Keep the eigensolver's order.
    AsComputed,
}

/// The four fields of a two-proxy problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Roles {
    pub treatment: FieldId,
    pub outcome: FieldId,
    /// Indexes the rows of `P` (conventionally `Z`).
    pub row_proxy: FieldId,
    /// Indexes the columns of `P` (conventionally `W`).
    pub column_proxy: FieldId,
}

impl Roles {
    pub fn resolve(table: &ObservationTable, names: &FieldNames) -> Result<Self, DataError> {
        Ok(Self {
            treatment: table.field(&names.treatment)?,
            outcome: table.field(&names.outcome)?,
            row_proxy: table.field(&names.row_proxy)?,
            column_proxy: table.field(&names.column_proxy)?,
        })
    }

    /// The same problem with the two proxies exchanged.
    pub fn with_proxies_swapped(self) -> Self {
        Self {
            row_proxy: self.column_proxy,
            column_proxy: self.row_proxy,
            ..self
        }
    }
}

/// Numerical settings of the estimator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorOptions {
    pub label_rule: LabelRule,
    /// Determinants and eigenvalue gaps at or below this are treated as zero.
    pub singularity_tolerance: f64,
    /// Eigenvalues with a larger imaginary part are reported as complex.
    pub imaginary_tolerance: f64,
}

impl Default for EstimatorOptions {
    fn default() -> Self {
        Self {
            label_rule: LabelRule::default(),
            singularity_tolerance: 1e-10,
            imaginary_tolerance: 1e-9,
        }
    }
}

/// The moment matrices of the treated stratum.
#[derive(Debug, Clone, PartialEq)]
pub struct MomentMatrices {
    pub p: Array2<f64>,
    pub q: Array2<f64>,
    pub stratum_size: usize,
}

/// Per-latent-state estimates, index `i` always referring to the same state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoProxyEstimate {
    /// `p(W=0 | X=1, U=i)` for the column proxy: the normalized rows of `H⁻¹`.
    pub alpha: [f64; 2],
    /// `p(Y=0 | X=1, U=i)`: the eigenvalues of `P⁻¹Q`.
    pub outcome_zero: [f64; 2],
    /// `p(Z=0 | X=1, U=i)` for the row proxy.
    pub row_proxy_zero: [f64; 2],
    /// `p(U=i | X=1)`.
    pub latent_weight: [f64; 2],
    /// Rows in the treated stratum.
    pub stratum_size: usize,
}

impl TwoProxyEstimate {
    /// Names of the coordinates of `as_vector`, in order.
    pub const COORDINATES: [&'static str; 8] = [
        "alpha_0",
        "alpha_1",
        "outcome_zero_0",
        "outcome_zero_1",
        "row_proxy_zero_0",
        "row_proxy_zero_1",
        "latent_weight_0",
        "latent_weight_1",
    ];

    /// Reorders the latent states according to `rule`. Idempotent.
    pub fn canonicalize(self, rule: LabelRule) -> Self {
        let swap = match rule {
            LabelRule::ProxyAgreement => self.alpha[0] < self.alpha[1],
            LabelRule::OutcomeAgreement => self.outcome_zero[0] < self.outcome_zero[1],
            LabelRule::AsComputed => false,
        };
        if swap { self.swapped() } else { self }
    }

    /// Exchanges the names of the two latent states.
    pub fn swapped(mut self) -> Self {
        self.alpha.swap(0, 1);
        self.outcome_zero.swap(0, 1);
        self.row_proxy_zero.swap(0, 1);
        self.latent_weight.swap(0, 1);
        self
    }

    /// Flattens the estimate in `COORDINATES` order, for interval estimation.
    pub fn as_vector(&self) -> Array1<f64> {
        array![
            self.alpha[0],
            self.alpha[1],
            self.outcome_zero[0],
            self.outcome_zero[1],
            self.row_proxy_zero[0],
            self.row_proxy_zero[1],
            self.latent_weight[0],
            self.latent_weight[1],
        ]
    }
}

/// Builds `P` and `Q` from the rows where the treatment equals 1.
pub fn moment_matrices(
    table: &ObservationTable,
    roles: &Roles,
) -> Result<MomentMatrices, RestorationError> {
    let stratum = table.stratum(&[(roles.treatment, 1)])?;
    let (y, z, w) = (roles.outcome, roles.row_proxy, roles.column_proxy);
    let prob = |event: &[(FieldId, u8)]| empirical_probability(&stratum, event, &[]);

    let p = array![
        [1.0, prob(&[(w, 0)])?],
        [prob(&[(z, 0)])?, prob(&[(z, 0), (w, 0)])?],
    ];
    let q = array![
        [prob(&[(y, 0)])?, prob(&[(y, 0), (w, 0)])?],
        [prob(&[(y, 0), (z, 0)])?, prob(&[(y, 0), (z, 0), (w, 0)])?],
    ];
    log::debug!("Moment matrices over {} treated rows: P = {p:?}, Q = {q:?}", stratum.n_rows());

    Ok(MomentMatrices {
        p,
        q,
        stratum_size: stratum.n_rows(),
    })
}

/// Runs the full two-proxy estimator on `table` and names the latent states
/// with `options.label_rule`.
pub fn estimate_two_proxy(
    table: &ObservationTable,
    roles: &Roles,
    options: &EstimatorOptions,
) -> Result<TwoProxyEstimate, RestorationError> {
    let moments = moment_matrices(table, roles)?;
    let estimate = solve_moments(&moments, options)?;
    Ok(estimate.canonicalize(options.label_rule))
}

/// Recovers the latent-state estimates from a pair of moment matrices. The
/// returned states are in eigensolver order.
pub fn solve_moments(
    moments: &MomentMatrices,
    options: &EstimatorOptions,
) -> Result<TwoProxyEstimate, RestorationError> {
    let tol = options.singularity_tolerance;

    let p_det = determinant(moments.p.view());
    if p_det.abs() <= tol {
        return Err(not_identifiable(
            "the proxy moment matrix P is singular, so the proxies share no information about the confounder",
            p_det,
        ));
    }

    let ratio = moments.p.inv()?.dot(&moments.q);
    let (eigenvalues, eigenvectors) = ratio.eig()?;
    for lambda in eigenvalues.iter() {
        if lambda.im.abs() > options.imaginary_tolerance {
            return Err(RestorationError::ComplexEigenvalues {
                real: lambda.re,
                imaginary: lambda.im.abs(),
            });
        }
    }
    let outcome_zero = [eigenvalues[0].re, eigenvalues[1].re];
    log::debug!("Eigenvalues of P⁻¹Q: {outcome_zero:?}");

    let gap = outcome_zero[0] - outcome_zero[1];
    if gap.abs() <= tol {
        return Err(not_identifiable(
            "P⁻¹Q has a repeated eigenvalue, so the outcome does not separate the confounder states",
            gap,
        ));
    }

    let h = eigenvectors.mapv(|v| v.re);
    let h_det = determinant(h.view());
    if h_det.abs() <= tol {
        return Err(not_identifiable("the eigenvectors of P⁻¹Q are degenerate", h_det));
    }
    let h_inv = h.inv()?;

    let mut alpha = [0.0; 2];
    for (i, slot) in alpha.iter_mut().enumerate() {
        let lead = h_inv[[i, 0]];
        if lead.abs() <= tol {
            return Err(not_identifiable(
                "a row of the inverse eigenvector matrix has a vanishing leading entry",
                lead,
            ));
        }
        *slot = h_inv[[i, 1]] / lead;
    }

    // P · Wm⁻¹ = Zm · D: column i is p(U=i|X=1) · [1, p(Z=0|X=1,U=i)].
    let wm = array![[1.0, alpha[0]], [1.0, alpha[1]]];
    let wm_det = determinant(wm.view());
    if wm_det.abs() <= tol {
        return Err(not_identifiable(
            "the column proxy does not separate the confounder states",
            wm_det,
        ));
    }
    let scaled = moments.p.dot(&wm.inv()?);

    let mut row_proxy_zero = [0.0; 2];
    let mut latent_weight = [0.0; 2];
    for i in 0..2 {
        let weight = scaled[[0, i]];
        if weight.abs() <= tol {
            return Err(not_identifiable("a latent state carries no probability mass", weight));
        }
        latent_weight[i] = weight;
        row_proxy_zero[i] = scaled[[1, i]] / weight;
    }

    Ok(TwoProxyEstimate {
        alpha,
        outcome_zero,
        row_proxy_zero,
        latent_weight,
        stratum_size: moments.stratum_size,
    })
}

/// Closed-form determinant of a 2×2 matrix. Exactly singular inputs give an
/// exact zero, which the tolerance checks rely on.
fn determinant(m: ArrayView2<'_, f64>) -> f64 {
    m[[0, 0]] * m[[1, 1]] - m[[0, 1]] * m[[1, 0]]
}

fn not_identifiable(reason: &str, determinant: f64) -> RestorationError {
    RestorationError::NotIdentifiable {
        reason: reason.to_string(),
        determinant,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    /// Population moments for a latent model with the given per-state rates.
    fn population_moments(
        weight: [f64; 2],
        column_zero: [f64; 2],
        row_zero: [f64; 2],
        outcome_zero: [f64; 2],
    ) -> MomentMatrices {
        let mut p = Array2::zeros((2, 2));
        let mut q = Array2::zeros((2, 2));
        for u in 0..2 {
            let z = array![1.0, row_zero[u]];
            let w = array![1.0, column_zero[u]];
            for r in 0..2 {
                for c in 0..2 {
                    p[[r, c]] += weight[u] * z[r] * w[c];
                    q[[r, c]] += weight[u] * outcome_zero[u] * z[r] * w[c];
                }
            }
        }
        MomentMatrices {
            p,
            q,
            stratum_size: 1000,
        }
    }

    #[test]
    fn test_population_moments_are_recovered_exactly() {
        let moments = population_moments([0.4, 0.6], [0.8, 0.2], [0.75, 0.3], [0.5, 0.12]);
        let estimate = solve_moments(&moments, &EstimatorOptions::default())
            .unwrap()
            .canonicalize(LabelRule::ProxyAgreement);

        assert_abs_diff_eq!(estimate.alpha[0], 0.8, epsilon = 1e-9);
        assert_abs_diff_eq!(estimate.alpha[1], 0.2, epsilon = 1e-9);
        assert_abs_diff_eq!(estimate.outcome_zero[0], 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(estimate.outcome_zero[1], 0.12, epsilon = 1e-9);
        assert_abs_diff_eq!(estimate.row_proxy_zero[0], 0.75, epsilon = 1e-9);
        assert_abs_diff_eq!(estimate.row_proxy_zero[1], 0.3, epsilon = 1e-9);
        assert_abs_diff_eq!(estimate.latent_weight[0], 0.4, epsilon = 1e-9);
        assert_abs_diff_eq!(estimate.latent_weight[1], 0.6, epsilon = 1e-9);
        assert_eq!(estimate.stratum_size, 1000);
    }

    #[test]
    fn test_label_rules_order_states() {
        // Column proxy favors 0 in state 1, outcome favors 0 in state 0.
        let moments = population_moments([0.5, 0.5], [0.3, 0.9], [0.4, 0.7], [0.6, 0.2]);
        let raw = solve_moments(&moments, &EstimatorOptions::default()).unwrap();

        let by_proxy = raw.clone().canonicalize(LabelRule::ProxyAgreement);
        assert!(by_proxy.alpha[0] >= by_proxy.alpha[1]);
        assert_abs_diff_eq!(by_proxy.outcome_zero[0], 0.2, epsilon = 1e-9);
        assert_abs_diff_eq!(by_proxy.row_proxy_zero[0], 0.7, epsilon = 1e-9);

        let by_outcome = raw.clone().canonicalize(LabelRule::OutcomeAgreement);
        assert!(by_outcome.outcome_zero[0] >= by_outcome.outcome_zero[1]);
        assert_abs_diff_eq!(by_outcome.alpha[0], 0.3, epsilon = 1e-9);

        assert_eq!(raw.clone().canonicalize(LabelRule::AsComputed), raw);
        assert_eq!(
            by_proxy.clone().canonicalize(LabelRule::ProxyAgreement),
            by_proxy
        );
        assert_eq!(by_proxy.clone().swapped().swapped(), by_proxy);
    }

    #[test]
    fn test_swapping_proxies_exchanges_the_recovered_rates() {
        let x = vec![1u8; 12];
        let y = vec![0, 0, 0, 1, 0, 1, 1, 1, 1, 0, 1, 1];
        let w = vec![0, 0, 1, 0, 0, 1, 1, 1, 0, 1, 1, 0];
        let z = vec![0, 1, 0, 0, 1, 1, 0, 1, 1, 1, 0, 0];
        let table =
            ObservationTable::from_columns(vec![("X", x), ("Y", y), ("W", w), ("Z", z)]).unwrap();
        let roles = Roles::resolve(&table, &FieldNames::default()).unwrap();

        let moments = moment_matrices(&table, &roles).unwrap();
        let swapped = moment_matrices(&table, &roles.with_proxies_swapped()).unwrap();
        assert_abs_diff_eq!(moments.p[[0, 1]], swapped.p[[1, 0]], epsilon = 1e-12);
        assert_abs_diff_eq!(moments.q[[1, 0]], swapped.q[[0, 1]], epsilon = 1e-12);
        assert_abs_diff_eq!(moments.p[[1, 1]], swapped.p[[1, 1]], epsilon = 1e-12);
        assert_eq!(moments.stratum_size, 12);
    }

    #[test]
    fn test_independent_proxies_are_not_identifiable() {
        let mut columns: Vec<(&str, Vec<u8>)> =
            vec![("X", vec![]), ("Y", vec![]), ("W", vec![]), ("Z", vec![])];
        for bits in 0..8u8 {
            columns[0].1.push(1);
            columns[1].1.push(bits & 1);
            columns[2].1.push((bits >> 1) & 1);
            columns[3].1.push((bits >> 2) & 1);
        }
        let table = ObservationTable::from_columns(columns).unwrap();
        let roles = Roles::resolve(&table, &FieldNames::default()).unwrap();
        let err = estimate_two_proxy(&table, &roles, &EstimatorOptions::default()).unwrap_err();
        assert!(matches!(err, RestorationError::NotIdentifiable { .. }), "got {err:?}");
    }

    #[test]
    fn test_missing_treated_rows_is_an_empty_stratum() {
        let table = ObservationTable::from_columns(vec![
            ("X", vec![0, 0, 0]),
            ("Y", vec![0, 1, 0]),
            ("W", vec![1, 1, 0]),
            ("Z", vec![0, 1, 1]),
        ])
        .unwrap();
        let roles = Roles::resolve(&table, &FieldNames::default()).unwrap();
        let err = estimate_two_proxy(&table, &roles, &EstimatorOptions::default()).unwrap_err();
        assert!(err.is_empty_stratum(), "got {err:?}");
    }

    #[test]
    fn test_rotation_like_moments_have_complex_eigenvalues() {
        let moments = MomentMatrices {
            p: array![[1.0, 0.0], [0.0, 1.0]],
            q: array![[0.5, -0.3], [0.3, 0.5]],
            stratum_size: 10,
        };
        match solve_moments(&moments, &EstimatorOptions::default()).unwrap_err() {
            RestorationError::ComplexEigenvalues { real, imaginary } => {
                assert_abs_diff_eq!(real, 0.5, epsilon = 1e-9);
                assert_abs_diff_eq!(imaginary, 0.3, epsilon = 1e-9);
            }
            other => panic!("Expected ComplexEigenvalues, got {:?}", other),
        }
    }

    #[test]
    fn test_as_vector_follows_coordinate_names() {
        let estimate = TwoProxyEstimate {
            alpha: [0.8, 0.2],
            outcome_zero: [0.5, 0.1],
            row_proxy_zero: [0.7, 0.3],
            latent_weight: [0.4, 0.6],
            stratum_size: 5,
        };
        let v = estimate.as_vector();
        assert_eq!(v.len(), TwoProxyEstimate::COORDINATES.len());
        assert_eq!(v.to_vec(), vec![0.8, 0.2, 0.5, 0.1, 0.7, 0.3, 0.4, 0.6]);
    }
}
