//! # Causal Effects from Restored Joints
//!
//! Once the joint over (treatment, outcome, confounder) has been restored, the
//! average causal effect follows from back-door adjustment over the confounder.
//! `restore_effect` chains the whole proximal procedure: two-proxy estimation in
//! the treated stratum, the column proxy's error matrix built from it, and
//! single-proxy restoration of the full table.

use crate::data::ObservationTable;
use crate::error::RestorationError;
use crate::probability::JointTable;
use crate::single_proxy::{ErrorMatrix, restore_joint};
use crate::two_proxy::{EstimatorOptions, Roles, TwoProxyEstimate, estimate_two_proxy};
use ndarray::Array1;

/// `p(Y=1 | X=x, V=v)` from a joint table.
fn outcome_rate(joint: &JointTable, treatment: usize, v: usize) -> Result<f64, RestorationError> {
    let mass = joint.treatment_mass(treatment, v);
    if mass <= 0.0 {
        return Err(RestorationError::NonPositiveMass {
            cell: format!("treatment={treatment}, confounder={v}"),
            mass,
        });
    }
    Ok(joint.get(treatment, 1, v) / mass)
}

/// `Σ_u p(u) [p(Y=1 | X=1, u) − p(Y=1 | X=0, u)]` over the third variable of `joint`.
pub fn average_causal_effect(joint: &JointTable) -> Result<f64, RestorationError> {
    let total = joint.total();
    let mut effect = 0.0;
    for u in 0..2 {
        let weight = joint.marginal(u) / total;
        effect += weight * (outcome_rate(joint, 1, u)? - outcome_rate(joint, 0, u)?);
    }
    Ok(effect)
}

/// The unadjusted contrast `p(Y=1 | X=1) − p(Y=1 | X=0)`.
pub fn naive_effect(joint: &JointTable) -> Result<f64, RestorationError> {
    let mut rates = [0.0; 2];
    for (x, rate) in rates.iter_mut().enumerate() {
        let mass = joint.treatment_mass(x, 0) + joint.treatment_mass(x, 1);
        if mass <= 0.0 {
            return Err(RestorationError::NonPositiveMass {
                cell: format!("treatment={x}"),
                mass,
            });
        }
        *rate = (joint.get(x, 1, 0) + joint.get(x, 1, 1)) / mass;
    }
    Ok(rates[1] - rates[0])
}

/// `p(X=1 | U=u)` from a restored joint.
pub fn propensity(joint: &JointTable, u: usize) -> Result<f64, RestorationError> {
    let mass = joint.marginal(u);
    if mass <= 0.0 {
        return Err(RestorationError::NonPositiveMass {
            cell: format!("confounder={u}"),
            mass,
        });
    }
    Ok(joint.treatment_mass(1, u) / mass)
}

/// Everything produced by the two-proxy restoration pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectRestoration {
    pub two_proxy: TwoProxyEstimate,
    /// Error matrix of the column proxy, built from `two_proxy.alpha`.
    pub error_matrix: ErrorMatrix,
    /// Observed joint over (treatment, outcome, column proxy).
    pub observed: JointTable,
    /// Restored joint over (treatment, outcome, confounder).
    pub restored: JointTable,
    pub ace: f64,
    pub naive: f64,
}

impl EffectRestoration {
    /// Names of the coordinates of `as_vector`, in order.
    pub const COORDINATES: [&'static str; 11] = [
        "ace",
        "propensity_0",
        "propensity_1",
        "p_x0_y0_u0",
        "p_x0_y0_u1",
        "p_x0_y1_u0",
        "p_x0_y1_u1",
        "p_x1_y0_u0",
        "p_x1_y0_u1",
        "p_x1_y1_u0",
        "p_x1_y1_u1",
    ];

    /// The ACE, the propensities and the restored cells, for interval estimation.
    pub fn as_vector(&self) -> Result<Array1<f64>, RestorationError> {
        let mut values = Vec::with_capacity(Self::COORDINATES.len());
        values.push(self.ace);
        values.push(propensity(&self.restored, 0)?);
        values.push(propensity(&self.restored, 1)?);
        values.extend(self.restored.to_flat());
        Ok(Array1::from_vec(values))
    }
}

/// The column proxy's error matrix implied by a two-proxy estimate.
///
/// On finite samples the eigen solution can put a rate outside [0, 1] when the
/// true rate is near either end. That is reported as `NoValidSolution` rather
/// than as a malformed matrix.
pub fn column_error_matrix(estimate: &TwoProxyEstimate) -> Result<ErrorMatrix, RestorationError> {
    const QUANTITIES: [&str; 2] = ["p(column proxy = 0 | U = 0)", "p(column proxy = 0 | U = 1)"];
    for (quantity, &value) in QUANTITIES.into_iter().zip(estimate.alpha.iter()) {
        if !(0.0..=1.0).contains(&value) {
            log::warn!("Two-proxy solution has {quantity} = {value:.4}");
            return Err(RestorationError::NoValidSolution { quantity, value });
        }
    }
    ErrorMatrix::from_zero_rates(estimate.alpha[0], estimate.alpha[1])
}

/// Runs the full proximal pipeline.
///
/// The column proxy's error matrix is estimated in the treated stratum and
/// applied to the whole table, which assumes the proxy's error does not depend
/// on the treatment. The ACE does not depend on `options.label_rule`; the
/// orientation of the restored table does.
///
/// Fails with `NoValidSolution` when an estimated proxy rate leaves [0, 1]. In a
/// bootstrap such resamples are counted among the failures.
pub fn restore_effect(
    table: &ObservationTable,
    roles: &Roles,
    options: &EstimatorOptions,
) -> Result<EffectRestoration, RestorationError> {
    let two_proxy = estimate_two_proxy(table, roles, options)?;
    let error_matrix = column_error_matrix(&two_proxy)?;

    let observed =
        JointTable::empirical(table, roles.treatment, roles.outcome, roles.column_proxy)?;
    let restored = restore_joint(&observed, &error_matrix)?;
    let ace = average_causal_effect(&restored)?;
    let naive = naive_effect(&observed)?;
    log::info!("Restored average causal effect {ace:.4} (unadjusted contrast {naive:.4})");

    Ok(EffectRestoration {
        two_proxy,
        error_matrix,
        observed,
        restored,
        ace,
        naive,
    })
}
