//! Systematic (shock-free) rewards of the four alternatives.
//!
//! The reward basis is part of the model definition and must not change:
//!
//! - occupations: `exp(β · [1, edu_start + e, a, a², b, b²])`, clipped to `[0, HUGE_FLOAT]`
//! - schooling: `γ₀ + γ₁·[edu_start + e ≥ 12] + γ₂·[l = 0]`
//! - home: `η₀`

use rayon::prelude::*;

use crate::constants::*;
use crate::parameters::ModelParameters;
use crate::state_space::{State, StateSpace};

/// Systematic rewards of every state, period-major with row width `max_states_period`.
///
/// `values[table_index(max_states_period, t, k)][j]` is the reward of choice j
/// in state k of period t. Padding slots beyond a period's state count are zero.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct RewardTable {
    pub max_states_period: usize,
    pub values: Vec<[f64; NUM_CHOICES]>,
}

impl RewardTable {
    #[inline(always)]
    pub fn get(&self, period: usize, k: usize) -> &[f64; NUM_CHOICES] {
        &self.values[table_index(self.max_states_period, period, k)]
    }
}

/// Covariates entering both occupational log-wage equations.
#[inline(always)]
pub fn covariates(state: &State, edu_start: i32) -> [f64; NUM_COEFFS_OCCUPATION] {
    let a = state.exp_a as f64;
    let b = state.exp_b as f64;
    [
        1.0,
        (edu_start + state.edu as i32) as f64,
        a,
        a * a,
        b,
        b * b,
    ]
}

/// Systematic rewards for a single state.
pub fn systematic_rewards(
    state: &State,
    edu_start: i32,
    params: &ModelParameters,
) -> [f64; NUM_CHOICES] {
    let x = covariates(state, edu_start);
    let wage = |coeffs: &[f64; NUM_COEFFS_OCCUPATION]| -> f64 {
        let index: f64 = coeffs.iter().zip(x.iter()).map(|(c, v)| c * v).sum();
        index.exp().clamp(0.0, HUGE_FLOAT)
    };

    let mut schooling = params.coeffs_edu[0];
    if edu_start + state.edu as i32 >= TUITION_THRESHOLD {
        schooling += params.coeffs_edu[1];
    }
    if state.lagged_edu == 0 {
        schooling += params.coeffs_edu[2];
    }

    [
        wage(&params.coeffs_a),
        wage(&params.coeffs_b),
        schooling,
        params.coeffs_home[0],
    ]
}

/// Compute the reward table for the whole state space.
pub fn calculate_rewards_systematic(space: &StateSpace, params: &ModelParameters) -> RewardTable {
    let width = space.max_states_period;
    let mut values = vec![[0.0; NUM_CHOICES]; space.num_periods * width];

    values
        .par_chunks_mut(width.max(1))
        .enumerate()
        .for_each(|(period, row)| {
            for (k, state) in space.states[period].iter().enumerate() {
                row[k] = systematic_rewards(state, space.edu_start, params);
            }
        });

    RewardTable {
        max_states_period: width,
        values,
    }
}
