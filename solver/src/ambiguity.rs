//! Worst-case EMAX under ambiguity about the shock distribution.
//!
//! The agent does not trust the baseline shock distribution N(0, Σ). It
//! entertains alternatives that shift the means of the two occupational
//! log-shocks by x = (x_A, x_B) and evaluates continuation values under the
//! least favourable one:
//!
//! ```text
//! EMAX_amb(S) = min_x  RiskEMAX(S; x)
//!   KL:         s.t.  level − KL(N(0,Σ) ‖ N((x,0,0),Σ)) = 0
//!   ellipsoid:  s.t.  level² − Σ_j x_j² / Σ_jj ≥ 0
//! ```
//!
//! The shift is applied to `L·z` before exponentiation. With `level = 0`, or
//! when the occupational variances are degenerate, the set collapses to the
//! baseline and the risk EMAX is returned without any optimization.

use ndarray::{s, Array1, Array2};

use crate::config::AmbiguityMeasure;
use crate::constants::*;
use crate::emax_risk::StateValueInputs;
use crate::linalg::{self, Cholesky};
use crate::optimizer::{ConstrainedMinimizer, ConstrainedProblem, ConstraintKind, Minimum};
use crate::shocks::transform_draw;

/// Number of free parameters of the ambiguity set.
pub const NUM_SHIFTS: usize = 2;

/// Relative excess divergence at which an unconverged search result is discarded.
const ESCAPE_SLACK: f64 = 1.0e-2;

/// Kullback–Leibler divergence `KL(N(μ₀,Σ₀) ‖ N(μ₁,Σ₁))`.
///
/// Returns `None` when either covariance is not positive definite.
pub fn kl_divergence(
    mean_old: &Array1<f64>,
    cov_old: &Array2<f64>,
    mean_new: &Array1<f64>,
    cov_new: &Array2<f64>,
) -> Option<f64> {
    let k = mean_old.len() as f64;
    let chol_old = Cholesky::new(cov_old)?;
    let chol_new = Cholesky::new(cov_new)?;
    let diff = mean_new - mean_old;
    let trace = chol_new.inverse().dot(cov_old).diag().sum();
    let mahalanobis = diff.dot(&chol_new.solve_vec(&diff));
    let log_det_ratio = chol_new.log_determinant() - chol_old.log_determinant();
    Some(0.5 * (trace + mahalanobis - k + log_det_ratio))
}

/// The constraint region around the baseline distribution.
///
/// Only the occupational means move and the covariance is kept, so the KL
/// divergence reduces to `½ xᵀ Q x` with Q the occupational block of Σ⁻¹.
#[derive(Clone, Debug)]
pub struct AmbiguitySet {
    pub measure: AmbiguityMeasure,
    pub level: f64,
    /// Occupational block of the precision matrix. Taken from the full Σ⁻¹,
    /// or from the inverse of the occupational 2×2 block when Σ is singular.
    precision: [[f64; NUM_SHIFTS]; NUM_SHIFTS],
    /// Occupational 2×2 block of Σ.
    occupational_cov: [[f64; NUM_SHIFTS]; NUM_SHIFTS],
}

impl AmbiguitySet {
    /// Build the set for a baseline covariance, or `None` when it collapses
    /// to the baseline (zero level or degenerate occupational shocks).
    pub fn new(measure: AmbiguityMeasure, level: f64, shocks_cov: &[[f64; 4]; 4]) -> Option<Self> {
        if !(level > 0.0) {
            return None;
        }
        let (a, b) = (CHOICE_OCCUPATION_A, CHOICE_OCCUPATION_B);
        let occupational_cov = [
            [shocks_cov[a][a], shocks_cov[a][b]],
            [shocks_cov[b][a], shocks_cov[b][b]],
        ];
        if occupational_cov[0][0] < TINY_FLOAT || occupational_cov[1][1] < TINY_FLOAT {
            return None;
        }

        let full = linalg::from_4x4(shocks_cov);
        let inverse = match Cholesky::new(&full) {
            Some(chol) => chol.inverse(),
            None => {
                let block = full.slice(s![0..NUM_SHIFTS, 0..NUM_SHIFTS]).to_owned();
                Cholesky::new(&block)?.inverse()
            }
        };
        let precision = [
            [inverse[[a, a]], inverse[[a, b]]],
            [inverse[[b, a]], inverse[[b, b]]],
        ];

        Some(Self {
            measure,
            level,
            precision,
            occupational_cov,
        })
    }

    /// Divergence of the shifted distribution from the baseline.
    ///
    /// KL: the Gaussian KL divergence. Ellipsoid: the standardized distance
    /// `sqrt(Σ_j x_j² / Σ_jj)`, comparable to `level`.
    pub fn divergence(&self, x: &[f64]) -> f64 {
        match self.measure {
            AmbiguityMeasure::Kl => {
                let qx = self.precision_times(x);
                0.5 * (x[0] * qx[0] + x[1] * qx[1])
            }
            AmbiguityMeasure::Ellipsoid => self.standardized_norm_sq(x).sqrt(),
        }
    }

    fn precision_times(&self, x: &[f64]) -> [f64; NUM_SHIFTS] {
        let q = &self.precision;
        [
            q[0][0] * x[0] + q[0][1] * x[1],
            q[1][0] * x[0] + q[1][1] * x[1],
        ]
    }

    fn standardized_norm_sq(&self, x: &[f64]) -> f64 {
        x[0] * x[0] / self.occupational_cov[0][0] + x[1] * x[1] / self.occupational_cov[1][1]
    }

    /// Constraint value; feasible when zero (KL) or non-negative (ellipsoid).
    pub fn constraint(&self, x: &[f64]) -> f64 {
        match self.measure {
            AmbiguityMeasure::Kl => self.level - self.divergence(x),
            AmbiguityMeasure::Ellipsoid => self.level * self.level - self.standardized_norm_sq(x),
        }
    }

    /// Analytic gradient of [`AmbiguitySet::constraint`].
    pub fn constraint_gradient(&self, x: &[f64]) -> Vec<f64> {
        match self.measure {
            AmbiguityMeasure::Kl => {
                let qx = self.precision_times(x);
                vec![-qx[0], -qx[1]]
            }
            AmbiguityMeasure::Ellipsoid => vec![
                -2.0 * x[0] / self.occupational_cov[0][0],
                -2.0 * x[1] / self.occupational_cov[1][1],
            ],
        }
    }

    pub fn constraint_kind(&self) -> ConstraintKind {
        match self.measure {
            AmbiguityMeasure::Kl => ConstraintKind::Equality,
            AmbiguityMeasure::Ellipsoid => ConstraintKind::Inequality,
        }
    }

    /// Feasible point the worst-case search starts from: the boundary of the
    /// set along `−Σ_occ · 𝟙`.
    ///
    /// Both constraint gradients vanish at the baseline itself.
    pub fn starting_point(&self) -> [f64; NUM_SHIFTS] {
        let c = &self.occupational_cov;
        let dir = [-(c[0][0] + c[0][1]), -(c[1][0] + c[1][1])];
        let scale = match self.measure {
            AmbiguityMeasure::Kl => {
                let qd = self.precision_times(&dir);
                let curvature = dir[0] * qd[0] + dir[1] * qd[1];
                (2.0 * self.level / curvature).sqrt()
            }
            AmbiguityMeasure::Ellipsoid => self.level / self.standardized_norm_sq(&dir).sqrt(),
        };
        if !scale.is_finite() {
            return [0.0; NUM_SHIFTS];
        }
        [scale * dir[0], scale * dir[1]]
    }
}

/// Risk EMAX of a state when the occupational log-shocks are shifted by `x`.
pub fn criterion_ambiguity(
    x: &[f64],
    inputs: &StateValueInputs,
    draws: &[[f64; 4]],
    chol: &[[f64; 4]; 4],
) -> f64 {
    if draws.is_empty() {
        return 0.0;
    }
    let shift = [x[0], x[1]];
    let sum: f64 = draws
        .iter()
        .map(|z| {
            let eps = transform_draw(z, chol, shift);
            inputs
                .total_values(&eps)
                .into_iter()
                .fold(f64::NEG_INFINITY, f64::max)
        })
        .sum();
    sum / draws.len() as f64
}

/// The inner minimization for one state.
struct WorstCaseProblem<'a> {
    inputs: &'a StateValueInputs,
    draws: &'a [[f64; 4]],
    chol: &'a [[f64; 4]; 4],
    set: &'a AmbiguitySet,
}

impl ConstrainedProblem for WorstCaseProblem<'_> {
    fn dim(&self) -> usize {
        NUM_SHIFTS
    }

    fn objective(&self, x: &[f64]) -> f64 {
        criterion_ambiguity(x, self.inputs, self.draws, self.chol)
    }

    fn constraint(&self, x: &[f64]) -> f64 {
        self.set.constraint(x)
    }

    fn constraint_kind(&self) -> ConstraintKind {
        self.set.constraint_kind()
    }

    fn constraint_gradient(&self, x: &[f64], _cx: f64, _eps: f64) -> Vec<f64> {
        self.set.constraint_gradient(x)
    }
}

/// Search for the least favourable mean shift from [`AmbiguitySet::starting_point`].
///
/// The starting point is feasible. A search that ends above its value, or
/// that stops unconverged clearly outside the set, is replaced by it.
pub fn get_worst_case<M: ConstrainedMinimizer + ?Sized>(
    inputs: &StateValueInputs,
    draws: &[[f64; 4]],
    chol: &[[f64; 4]; 4],
    set: &AmbiguitySet,
    minimizer: &M,
) -> Minimum {
    let problem = WorstCaseProblem {
        inputs,
        draws,
        chol,
        set,
    };
    let start = set.starting_point();
    let minimum = minimizer.minimize(&problem, &start);

    let start_fun = problem.objective(&start);
    let escaped =
        !minimum.converged && set.divergence(&minimum.x) > set.level * (1.0 + ESCAPE_SLACK);
    if minimum.fun <= start_fun && !escaped {
        return minimum;
    }
    Minimum {
        x: start.to_vec(),
        fun: start_fun,
        constraint: set.constraint(&start),
        ..minimum
    }
}

/// Result of one ambiguity-robust EMAX evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct AmbiguityOutcome {
    pub emax: f64,
    /// Worst-case shift of the occupational log-shock means.
    pub shift: [f64; NUM_SHIFTS],
    pub divergence: f64,
    /// False when the inner solve stopped without converging (best iterate used).
    pub converged: bool,
    pub iterations: usize,
    pub message: &'static str,
}

impl AmbiguityOutcome {
    fn baseline(emax: f64) -> Self {
        Self {
            emax,
            shift: [0.0; NUM_SHIFTS],
            divergence: 0.0,
            converged: true,
            iterations: 0,
            message: "baseline distribution",
        }
    }
}

/// EMAX of a state under ambiguity.
///
/// `draws` are the standard-normal draws of the period and `shocks` their
/// baseline transformation; without an ambiguity set the risk EMAX over
/// `shocks` is returned unchanged.
pub fn construct_emax_ambiguity<M: ConstrainedMinimizer + ?Sized>(
    inputs: &StateValueInputs,
    draws: &[[f64; 4]],
    shocks: &[[f64; 4]],
    chol: &[[f64; 4]; 4],
    set: Option<&AmbiguitySet>,
    minimizer: &M,
) -> AmbiguityOutcome {
    let Some(set) = set else {
        return AmbiguityOutcome::baseline(inputs.emax(shocks));
    };
    let minimum = get_worst_case(inputs, draws, chol, set, minimizer);
    let shift = [minimum.x[0], minimum.x[1]];
    AmbiguityOutcome {
        emax: minimum.fun,
        shift,
        divergence: set.divergence(&shift),
        converged: minimum.converged,
        iterations: minimum.iterations,
        message: minimum.message,
    }
}
