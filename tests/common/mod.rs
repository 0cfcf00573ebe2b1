//! Test fixtures for proxcausal integration tests.
//!
//! Builds synthetic observation tables from a logistic generative model with a
//! binary confounder `U`, two proxies `W` and `Z` that depend only on `U`, a
//! treatment `X` and an outcome `Y`. The confounder column is kept in the table
//! so tests can compare restored quantities with the latent truth.

use proxcausal::ObservationTable;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Bernoulli, Distribution};

pub fn sigmoid(t: f64) -> f64 {
    1.0 / (1.0 + (-t).exp())
}

/// Frequencies of `(X, Y, U)` in lexicographic order from a 10,000-row reference
/// run of the default model.
pub const REFERENCE_JOINT: [f64; 8] = [
    0.2201, 0.0797, 0.0938, 0.1113, 0.0965, 0.0573, 0.1087, 0.2326,
];

/// Intercept and confounder slope of a logistic link.
#[derive(Clone, Copy, Debug)]
pub struct Logit {
    pub intercept: f64,
    pub slope: f64,
}

impl Logit {
    pub fn probability(&self, u: u8) -> f64 {
        sigmoid(self.intercept + self.slope * f64::from(u))
    }
}

/// Population quantities implied by the builder's parameters.
#[derive(Clone, Copy, Debug)]
pub struct GroundTruth {
    pub prevalence: f64,
    /// `p(W=0 | U=u)`.
    pub column_zero: [f64; 2],
    /// `p(Z=0 | U=u)`.
    pub row_zero: [f64; 2],
    /// `p(Y=0 | X=1, U=u)`.
    pub outcome_zero_treated: [f64; 2],
    /// `p(X=1 | U=u)`.
    pub propensity: [f64; 2],
    pub ace: f64,
}

pub struct SyntheticProxyData {
    pub table: ObservationTable,
    pub truth: GroundTruth,
}

impl SyntheticProxyData {
    /// Tab-separated rendering with a header row, as read by `load_observations`.
    pub fn to_tsv(&self) -> String {
        let names = self.table.field_names();
        let columns: Vec<Vec<u8>> = names
            .iter()
            .map(|name| {
                let field = self.table.field(name).unwrap();
                self.table.column(field).unwrap().to_vec()
            })
            .collect();
        let mut lines = Vec::with_capacity(self.table.n_rows() + 1);
        lines.push(names.join("\t"));
        for row in 0..self.table.n_rows() {
            let cells: Vec<String> = columns.iter().map(|c| c[row].to_string()).collect();
            lines.push(cells.join("\t"));
        }
        lines.join("\n")
    }
}

/// Builder for synthetic proxy data with configurable mechanisms.
pub struct SyntheticProxyBuilder {
    n_samples: usize,
    prevalence: f64,
    column_proxy: Logit,
    row_proxy: Logit,
    treatment: Logit,
    outcome_intercept: f64,
    outcome_treatment: f64,
    outcome_confounder: f64,
    seed: u64,
}

impl SyntheticProxyBuilder {
    /// Defaults: `U ~ Bern(0.48)`, `W ~ Bern(σ(-1.5 + 3.0U))`, `Z ~ Bern(σ(-1.4 + 2.8U))`,
    /// `X ~ Bern(σ(-0.42 + 0.85U))`, `Y ~ Bern(σ(-0.87 + 1.01X + 1.23U))`.
    ///
    /// The treatment and outcome coefficients are fitted to `REFERENCE_JOINT`;
    /// the population joint they imply is within 0.002 of it in every cell.
    pub fn new(n_samples: usize) -> Self {
        Self {
            n_samples,
            prevalence: 0.48,
            column_proxy: Logit {
                intercept: -1.5,
                slope: 3.0,
            },
            row_proxy: Logit {
                intercept: -1.4,
                slope: 2.8,
            },
            treatment: Logit {
                intercept: -0.42,
                slope: 0.85,
            },
            outcome_intercept: -0.87,
            outcome_treatment: 1.01,
            outcome_confounder: 1.23,
            seed: 42,
        }
    }

    pub fn seed(mut self, s: u64) -> Self {
        self.seed = s;
        self
    }

    fn outcome_probability(&self, x: u8, u: u8) -> f64 {
        sigmoid(
            self.outcome_intercept
                + self.outcome_treatment * f64::from(x)
                + self.outcome_confounder * f64::from(u),
        )
    }

    pub fn truth(&self) -> GroundTruth {
        let mut ace = 0.0;
        for u in 0..2u8 {
            let weight = if u == 1 { self.prevalence } else { 1.0 - self.prevalence };
            ace += weight * (self.outcome_probability(1, u) - self.outcome_probability(0, u));
        }
        GroundTruth {
            prevalence: self.prevalence,
            column_zero: [
                1.0 - self.column_proxy.probability(0),
                1.0 - self.column_proxy.probability(1),
            ],
            row_zero: [
                1.0 - self.row_proxy.probability(0),
                1.0 - self.row_proxy.probability(1),
            ],
            outcome_zero_treated: [
                1.0 - self.outcome_probability(1, 0),
                1.0 - self.outcome_probability(1, 1),
            ],
            propensity: [self.treatment.probability(0), self.treatment.probability(1)],
            ace,
        }
    }

    /// Draws the table with columns `X`, `Y`, `W`, `Z`, `U`.
    pub fn build(self) -> SyntheticProxyData {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let draw = |p: f64, rng: &mut StdRng| -> u8 {
            u8::from(Bernoulli::new(p).expect("valid probability").sample(rng))
        };

        let n = self.n_samples;
        let (mut x, mut y, mut w, mut z, mut u) = (
            Vec::with_capacity(n),
            Vec::with_capacity(n),
            Vec::with_capacity(n),
            Vec::with_capacity(n),
            Vec::with_capacity(n),
        );
        for _ in 0..n {
            let ui = draw(self.prevalence, &mut rng);
            let wi = draw(self.column_proxy.probability(ui), &mut rng);
            let zi = draw(self.row_proxy.probability(ui), &mut rng);
            let xi = draw(self.treatment.probability(ui), &mut rng);
            let yi = draw(self.outcome_probability(xi, ui), &mut rng);
            u.push(ui);
            w.push(wi);
            z.push(zi);
            x.push(xi);
            y.push(yi);
        }

        let truth = self.truth();
        let table = ObservationTable::from_columns(vec![
            ("X", x),
            ("Y", y),
            ("W", w),
            ("Z", z),
            ("U", u),
        ])
        .expect("synthetic columns are binary and aligned");
        SyntheticProxyData { table, truth }
    }
}
