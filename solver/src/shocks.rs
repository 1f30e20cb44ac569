//! Reward shocks: standard-normal draws and their transformation.
//!
//! Draws are generated as independent N(0, I₄) vectors, one stream per period,
//! and mapped into reward shocks on use:
//!
//! ```text
//! ε = L · z            (L = lower-triangular Cholesky factor)
//! ε_j ← clip(exp(ε_j + μ_j), 0, HUGE_FLOAT)   for the two occupations
//! ε_j unchanged                               for schooling and home
//! ```
//!
//! `μ` is zero except inside the ambiguity engine, which shifts the means of
//! the occupational log-shocks. A zero factor maps every draw to the point mass
//! (1, 1, 0, 0).

use crate::constants::*;
use crate::prng::{standard_normal_4, stream_rng, STREAM_EMAX};

/// Standard-normal draws for one period, `num_draws × 4`.
pub type PeriodDraws = Vec<[f64; 4]>;

/// Standard-normal draws for one period.
///
/// The stream depends only on `(seed, period)`, and draw i is the same for any
/// `num_draws > i`.
pub fn period_draws(num_draws: usize, seed: u64, period: usize) -> PeriodDraws {
    let mut rng = stream_rng(seed, STREAM_EMAX, period as u64);
    (0..num_draws).map(|_| standard_normal_4(&mut rng)).collect()
}

/// Standard-normal draws for every period of the model.
pub fn create_draws(num_periods: usize, num_draws: usize, seed: u64) -> Vec<PeriodDraws> {
    (0..num_periods)
        .map(|period| period_draws(num_draws, seed, period))
        .collect()
}

/// Map one standard-normal draw into a reward shock, with occupational mean shifts.
#[inline(always)]
pub fn transform_draw(z: &[f64; 4], chol: &[[f64; 4]; 4], mean_shift: [f64; 2]) -> [f64; 4] {
    let mut eps = [0.0; 4];
    for i in 0..4 {
        let mut s = 0.0;
        for k in 0..=i {
            s += chol[i][k] * z[k];
        }
        eps[i] = s;
    }
    for j in [CHOICE_OCCUPATION_A, CHOICE_OCCUPATION_B] {
        eps[j] = (eps[j] + mean_shift[j]).exp().clamp(0.0, HUGE_FLOAT);
    }
    eps
}

/// Transform a batch of draws with the baseline distribution (no shift).
pub fn transform_disturbances(draws: &[[f64; 4]], chol: &[[f64; 4]; 4]) -> Vec<[f64; 4]> {
    transform_disturbances_shifted(draws, chol, [0.0; 2])
}

/// Transform a batch of draws with shifted occupational means.
pub fn transform_disturbances_shifted(
    draws: &[[f64; 4]],
    chol: &[[f64; 4]; 4],
    mean_shift: [f64; 2],
) -> Vec<[f64; 4]> {
    draws
        .iter()
        .map(|z| transform_draw(z, chol, mean_shift))
        .collect()
}

/// Expected shocks under the baseline distribution.
///
/// Log-normal occupations have mean `exp(σ²/2)`; additive shocks have mean zero.
pub fn expected_shocks(shocks_cov: &[[f64; 4]; 4]) -> [f64; 4] {
    let mut shifts = [0.0; 4];
    for j in [CHOICE_OCCUPATION_A, CHOICE_OCCUPATION_B] {
        shifts[j] = (shocks_cov[j][j] / 2.0).exp().clamp(0.0, HUGE_FLOAT);
    }
    shifts
}
