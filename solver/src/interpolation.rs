//! EMAX interpolation for periods with many states.
//!
//! Only a random subset of a period's states is evaluated exactly. For every
//! state the total values at the expected shock are cheap to compute:
//!
//! ```text
//! v_j   = total value of choice j at ε = E[ε]
//! maxe  = max_j v_j
//! x     = [maxe − v_j (4), sqrt(maxe − v_j) (4), 1]
//! ```
//!
//! An OLS regression of `emax − maxe` on `x` over the simulated subset then
//! predicts the remaining states as `maxe + max(ŷ, 0)`. Simulated states keep
//! their exact value.

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::Serialize;

use crate::constants::*;
use crate::emax_risk::StateValueInputs;
use crate::linalg::Cholesky;
use crate::prng::{stream_rng, STREAM_INTERPOLATION};

/// Number of regressors: four gaps, four root gaps, intercept.
pub const NUM_REGRESSORS: usize = 9;

/// Relative ridge added to the normal equations when they are singular.
const RIDGE_SCALE: f64 = 1.0e-10;

/// Which states of a period are evaluated exactly.
///
/// Returns all `true` when `num_points ≥ num_states`; otherwise a subset of
/// exactly `num_points` states drawn without replacement from the
/// `(seed, period)` stream.
pub fn get_simulated_indicator(
    num_points: usize,
    num_states: usize,
    seed: u64,
    period: usize,
) -> Vec<bool> {
    if num_points >= num_states {
        return vec![true; num_states];
    }
    let mut rng = stream_rng(seed, STREAM_INTERPOLATION, period as u64);
    let mut indicator = vec![false; num_states];
    for k in rand::seq::index::sample(&mut rng, num_states, num_points) {
        indicator[k] = true;
    }
    indicator
}

/// Regressors and `maxe` of one state at the expected shock.
#[inline]
pub fn get_exogenous_variables(
    inputs: &StateValueInputs,
    shifts: &[f64; 4],
) -> ([f64; NUM_REGRESSORS], f64) {
    let total = inputs.total_values(shifts);
    let maxe = total.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let mut x = [0.0; NUM_REGRESSORS];
    for j in 0..NUM_CHOICES {
        let gap = maxe - total[j];
        x[j] = gap;
        x[NUM_CHOICES + j] = gap.sqrt();
    }
    x[NUM_REGRESSORS - 1] = 1.0;
    (x, maxe)
}

/// Regression target of a simulated state.
#[inline(always)]
pub fn get_endogenous_variable(emax: f64, maxe: f64) -> f64 {
    emax - maxe
}

/// Least-squares fit with its statistics.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct OlsFit {
    pub coeffs: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub r_squared: f64,
    /// The normal equations were singular and a small ridge was added.
    pub ridge: bool,
}

impl OlsFit {
    pub fn predict_row(&self, x: &[f64]) -> f64 {
        self.coeffs.iter().zip(x).map(|(b, v)| b * v).sum()
    }
}

/// Ordinary least squares through the normal equations.
pub fn fit_ols(x: &Array2<f64>, y: &Array1<f64>) -> OlsFit {
    let n = x.nrows();
    let k = x.ncols();
    let xtx = x.t().dot(x);
    let xty = x.t().dot(y);

    let (coeffs, xtx_inv, ridge) = match Cholesky::new(&xtx) {
        Some(chol) => (chol.solve_vec(&xty), chol.inverse(), false),
        None => {
            let scale = xtx.diag().iter().copied().fold(0.0, f64::max).max(1.0);
            let ridged = &xtx + &(Array2::<f64>::eye(k) * (RIDGE_SCALE * scale));
            match Cholesky::new(&ridged) {
                Some(chol) => (chol.solve_vec(&xty), chol.inverse(), true),
                None => (Array1::zeros(k), Array2::zeros((k, k)), true),
            }
        }
    };

    let fitted = x.dot(&coeffs);
    let residuals = y - &fitted;
    let ssr = residuals.dot(&residuals);
    let mean = if n > 0 { y.sum() / n as f64 } else { 0.0 };
    let sst: f64 = y.iter().map(|v| (v - mean) * (v - mean)).sum();
    let r_squared = if sst > 0.0 {
        1.0 - ssr / sst
    } else if ssr <= TINY_FLOAT {
        1.0
    } else {
        0.0
    };

    let sigma_sq = if n > k { ssr / (n - k) as f64 } else { 0.0 };
    let std_errors = xtx_inv
        .diag()
        .iter()
        .map(|v| (sigma_sq * v.max(0.0)).sqrt())
        .collect();

    OlsFit {
        coeffs: coeffs.to_vec(),
        std_errors,
        r_squared,
        ridge,
    }
}

/// Fit statistics of one interpolated period.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct InterpolationFit {
    pub period: usize,
    pub num_states: usize,
    pub num_points: usize,
    #[serde(flatten)]
    pub ols: OlsFit,
}

/// EMAX row of a period from exact values on the simulated subset.
///
/// `exact[k]` holds the exact EMAX of simulated states and `None` elsewhere.
/// Returns the filled row and the fit (absent when every state was simulated).
pub fn interpolate_period(
    period: usize,
    inputs: &[StateValueInputs],
    shifts: &[f64; 4],
    exact: &[Option<f64>],
) -> (Vec<f64>, Option<InterpolationFit>) {
    if exact.iter().all(Option::is_some) {
        return (exact.iter().map(|v| v.unwrap_or(0.0)).collect(), None);
    }

    let features: Vec<([f64; NUM_REGRESSORS], f64)> = inputs
        .par_iter()
        .map(|inp| get_exogenous_variables(inp, shifts))
        .collect();

    let simulated: Vec<(usize, f64)> = exact
        .iter()
        .enumerate()
        .filter_map(|(k, v)| v.map(|emax| (k, emax)))
        .collect();
    let design = Array2::from_shape_fn((simulated.len(), NUM_REGRESSORS), |(row, col)| {
        features[simulated[row].0].0[col]
    });
    let target = Array1::from_iter(
        simulated
            .iter()
            .map(|&(k, emax)| get_endogenous_variable(emax, features[k].1)),
    );
    let ols = fit_ols(&design, &target);

    let row = features
        .par_iter()
        .zip(exact.par_iter())
        .map(|((x, maxe), exact)| match exact {
            Some(emax) => *emax,
            None => maxe + ols.predict_row(x).max(0.0),
        })
        .collect();

    let fit = InterpolationFit {
        period,
        num_states: inputs.len(),
        num_points: simulated.len(),
        ols,
    };
    (row, Some(fit))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prng::standard_normal_4;

    fn inputs(rewards: [f64; 4], future: [f64; 4]) -> StateValueInputs {
        StateValueInputs {
            rewards,
            future,
            is_capped: false,
            delta: 0.9,
            penalty: DEFAULT_INADMISSIBILITY_PENALTY,
        }
    }

    #[test]
    fn test_indicator_full_when_points_exceed_states() {
        assert_eq!(get_simulated_indicator(10, 4, 1, 0), vec![true; 4]);
        assert_eq!(get_simulated_indicator(4, 4, 1, 0), vec![true; 4]);
    }

    #[test]
    fn test_indicator_subset() {
        let a = get_simulated_indicator(30, 100, 7, 3);
        assert_eq!(a.iter().filter(|&&s| s).count(), 30);
        assert_eq!(a, get_simulated_indicator(30, 100, 7, 3));
        assert_ne!(a, get_simulated_indicator(30, 100, 7, 4));
    }

    #[test]
    fn test_exogenous_variables() {
        let inp = inputs([10.0, 5.0, 2.0, 1.0], [0.0, 0.0, 0.0, 0.0]);
        let (x, maxe) = get_exogenous_variables(&inp, &[2.0, 1.0, 0.0, 0.0]);
        assert_eq!(maxe, 20.0);
        assert_eq!(&x[..4], &[0.0, 15.0, 18.0, 19.0]);
        assert!((x[5] - 15f64.sqrt()).abs() < 1e-12);
        assert_eq!(x[8], 1.0);
    }

    #[test]
    fn test_ols_recovers_exact_coefficients() {
        let mut rng = stream_rng(5, STREAM_INTERPOLATION, 0);
        let n = 60;
        let beta = [1.5, -2.0, 0.25, 4.0];
        let mut x = Array2::<f64>::zeros((n, 4));
        for i in 0..n {
            let z = standard_normal_4(&mut rng);
            x[[i, 0]] = 1.0;
            x[[i, 1]] = z[0];
            x[[i, 2]] = z[1] * 3.0;
            x[[i, 3]] = z[2] * z[3];
        }
        let y = x.dot(&Array1::from(beta.to_vec()));
        let fit = fit_ols(&x, &y);
        assert!(!fit.ridge);
        for (b, e) in fit.coeffs.iter().zip(beta) {
            assert!((b - e).abs() < 1e-8, "{} vs {}", b, e);
        }
        assert!((fit.r_squared - 1.0).abs() < 1e-10);
        assert!(fit.std_errors.iter().all(|s| *s < 1e-6));
    }

    #[test]
    fn test_ols_rank_deficient_uses_ridge() {
        let x = ndarray::array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0]];
        let y = ndarray::array![2.0, 2.0, 2.0];
        let fit = fit_ols(&x, &y);
        assert!(fit.ridge);
        assert!((fit.predict_row(&[1.0, 0.0]) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn test_all_simulated_keeps_exact_row() {
        let inps = vec![inputs([1.0; 4], [0.0; 4]); 3];
        let exact = vec![Some(1.5), Some(-2.0), Some(3.25)];
        let (row, fit) = interpolate_period(0, &inps, &[1.0, 1.0, 0.0, 0.0], &exact);
        assert_eq!(row, vec![1.5, -2.0, 3.25]);
        assert!(fit.is_none());
    }

    #[test]
    fn test_predictions_fill_unsimulated_states() {
        // Exact EMAX = maxe + 0.5 for every state: the intercept captures it.
        let shifts = [1.0, 1.0, 0.0, 0.0];
        let mut rng = stream_rng(9, STREAM_INTERPOLATION, 1);
        let inps: Vec<StateValueInputs> = (0..40)
            .map(|_| {
                let r = standard_normal_4(&mut rng);
                let f = standard_normal_4(&mut rng);
                inputs(
                    [10.0 + r[0], 9.0 + r[1], 8.0 + 2.0 * r[2], 7.5 + r[3]],
                    [f[0].abs(), f[1].abs(), f[2].abs(), f[3].abs()],
                )
            })
            .collect();
        let maxes: Vec<f64> = inps.iter().map(|i| get_exogenous_variables(i, &shifts).1).collect();
        let exact: Vec<Option<f64>> = maxes
            .iter()
            .enumerate()
            .map(|(k, m)| (k % 2 == 0).then_some(m + 0.5))
            .collect();
        let (row, fit) = interpolate_period(6, &inps, &shifts, &exact);
        let fit = fit.unwrap();
        assert_eq!(fit.period, 6);
        assert_eq!(fit.num_points, 20);
        for (k, v) in row.iter().enumerate() {
            let want = maxes[k] + 0.5;
            assert!((v - want).abs() < 1e-4, "state {}: {} vs {}", k, v, want);
        }
    }

    #[test]
    fn test_negative_predictions_are_clipped() {
        let shifts = [1.0, 1.0, 0.0, 0.0];
        let inps: Vec<StateValueInputs> = (0..12)
            .map(|i| inputs([5.0 + i as f64, 4.0, 0.0, 0.0], [0.0; 4]))
            .collect();
        let maxes: Vec<f64> = inps.iter().map(|i| get_exogenous_variables(i, &shifts).1).collect();
        let exact: Vec<Option<f64>> = maxes
            .iter()
            .enumerate()
            .map(|(k, m)| (k < 10).then_some(m - 3.0))
            .collect();
        let (row, _) = interpolate_period(0, &inps, &shifts, &exact);
        assert_eq!(row[10], maxes[10]);
        assert_eq!(row[11], maxes[11]);
    }
}
