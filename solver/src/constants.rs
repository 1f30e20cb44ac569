//! Model constants and state-indexing functions.
//!
//! Choice indices follow the reward vector layout used everywhere in the crate:
//! - [`CHOICE_OCCUPATION_A`] = 0, [`CHOICE_OCCUPATION_B`] = 1 (multiplicative, log-normal shocks)
//! - [`CHOICE_SCHOOLING`] = 2, [`CHOICE_HOME`] = 3 (additive shocks)
//!
//! The dense state lookup is laid out as
//! `[period][exp_a][exp_b][edu][lagged_edu]` with shape
//! `num_periods × num_periods × num_periods × min_idx × 2`, flattened by
//! [`lookup_index`].

/// Number of alternatives available to the agent in every period.
pub const NUM_CHOICES: usize = 4;

/// Work in occupation A.
pub const CHOICE_OCCUPATION_A: usize = 0;
/// Work in occupation B.
pub const CHOICE_OCCUPATION_B: usize = 1;
/// Enroll in (additional) schooling.
pub const CHOICE_SCHOOLING: usize = 2;
/// Stay at home.
pub const CHOICE_HOME: usize = 3;

/// Human-readable choice names.
pub const CHOICE_NAMES: [&str; NUM_CHOICES] = ["Occupation A", "Occupation B", "Schooling", "Home"];

/// Number of coefficients per reward function: A, B, schooling, home.
pub const NUM_COEFFS_OCCUPATION: usize = 6;
pub const NUM_COEFFS_EDUCATION: usize = 3;
pub const NUM_COEFFS_HOME: usize = 1;

/// Length of the flat parameter vector: level (1) + A (6) + B (6) + edu (3) + home (1)
/// + lower triangle of the 4×4 Cholesky factor (10).
pub const NUM_PARAMETERS: usize = 27;

/// Ceiling for exponentiated quantities (wages, log-normal shocks).
pub const HUGE_FLOAT: f64 = 1.0e20;

/// Numerical floor for covariance diagonals during Cholesky reconstruction.
pub const TINY_FLOAT: f64 = 1.0e-8;

/// Default additive penalty on the schooling total value when schooling is capped.
/// Any value dominating feasible discounted future values works.
pub const DEFAULT_INADMISSIBILITY_PENALTY: f64 = -400_000.0;

/// Completed schooling (edu_start + edu) from which tuition costs apply.
pub const TUITION_THRESHOLD: i32 = 12;

/// Sentinel stored in the state lookup for inadmissible cells.
pub const MISSING_INDEX: i32 = -1;

/// Flatten `(period, exp_a, exp_b, edu, lagged_edu)` into the dense lookup array.
///
/// `num_periods` bounds the period and both experience axes, `min_idx` bounds
/// the education axis.
#[inline(always)]
pub fn lookup_index(
    num_periods: usize,
    min_idx: usize,
    period: usize,
    exp_a: usize,
    exp_b: usize,
    edu: usize,
    lagged_edu: usize,
) -> usize {
    debug_assert!(period < num_periods, "period {} out of range", period);
    debug_assert!(edu < min_idx, "edu {} out of range", edu);
    debug_assert!(lagged_edu < 2, "lagged_edu {} out of range", lagged_edu);
    (((period * num_periods + exp_a) * num_periods + exp_b) * min_idx + edu) * 2 + lagged_edu
}

/// Flatten `(period, state_index)` into a period-major table of width `max_states_period`.
#[inline(always)]
pub fn table_index(max_states_period: usize, period: usize, k: usize) -> usize {
    period * max_states_period + k
}

/// Whether choice `j` carries a multiplicative (log-normal) shock.
#[inline(always)]
pub fn is_occupation(choice: usize) -> bool {
    choice == CHOICE_OCCUPATION_A || choice == CHOICE_OCCUPATION_B
}
