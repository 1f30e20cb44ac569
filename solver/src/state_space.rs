//! State-space enumeration and the dense state lookup.
//!
//! A state is S = (t, a, b, e, l):
//! - `a`, `b`: years of experience in occupations A and B
//! - `e`: years of schooling acquired beyond `edu_start`, capped at `edu_max - edu_start`
//! - `l`: 1 if schooling was chosen in the previous period
//!
//! Admissibility at period t:
//!
//! 1. `a + b + e ≤ t` (one unit of accumulation per elapsed period)
//! 2. in period 0 every agent starts with `l = 1`
//! 3. for t > 0, `l = 1` requires `e > 0`
//! 4. `l = 0` is impossible when `e = t` (schooling was chosen every period)
//!
//! States are enumerated lexicographically over (a, b, e, l) within each period,
//! so the linear index of a state is stable across runs and platforms.

use serde::Serialize;

use crate::constants::*;
use crate::error::{ConfigError, ConfigResult};

/// One admissible state of the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct State {
    pub period: usize,
    pub exp_a: usize,
    pub exp_b: usize,
    pub edu: usize,
    pub lagged_edu: usize,
}

/// All admissible states plus the `(t, a, b, e, l) → k` lookup table.
#[derive(Clone, Debug, Serialize)]
pub struct StateSpace {
    pub num_periods: usize,
    pub edu_start: i32,
    pub edu_max: i32,
    /// Extent of the education axis: `min(num_periods, edu_max - edu_start + 1)`.
    pub min_idx: usize,
    /// `states[t][k]` is the k-th admissible state in period t.
    pub states: Vec<Vec<State>>,
    /// Number of admissible states per period.
    pub states_number_period: Vec<usize>,
    /// Largest per-period state count (row width of dense per-period tables).
    pub max_states_period: usize,
    #[serde(skip)]
    mapping: Vec<i32>,
}

impl StateSpace {
    /// Enumerate every admissible state for all periods.
    pub fn build(num_periods: usize, edu_start: i32, edu_max: i32) -> ConfigResult<Self> {
        if num_periods == 0 {
            return Err(ConfigError::NoPeriods);
        }
        if edu_max < edu_start {
            return Err(ConfigError::EducationBounds { edu_start, edu_max });
        }
        let edu_cap = (edu_max - edu_start) as usize;
        let min_idx = num_periods.min(edu_cap + 1);

        let len = num_periods * num_periods * num_periods * min_idx * 2;
        let mut mapping = vec![MISSING_INDEX; len];
        let mut states = Vec::with_capacity(num_periods);
        let mut states_number_period = Vec::with_capacity(num_periods);

        for period in 0..num_periods {
            let mut period_states = Vec::new();
            for exp_a in 0..=period {
                for exp_b in 0..=(period - exp_a) {
                    for edu in 0..=edu_cap.min(period - exp_a - exp_b) {
                        for lagged_edu in 0..2 {
                            if !is_admissible(period, edu, lagged_edu) {
                                continue;
                            }
                            let k = period_states.len();
                            mapping[lookup_index(
                                num_periods,
                                min_idx,
                                period,
                                exp_a,
                                exp_b,
                                edu,
                                lagged_edu,
                            )] = k as i32;
                            period_states.push(State {
                                period,
                                exp_a,
                                exp_b,
                                edu,
                                lagged_edu,
                            });
                        }
                    }
                }
            }
            tracing::debug!(period, num_states = period_states.len(), "enumerated period");
            states_number_period.push(period_states.len());
            states.push(period_states);
        }

        let max_states_period = states_number_period.iter().copied().max().unwrap_or(0);

        Ok(StateSpace {
            num_periods,
            edu_start,
            edu_max,
            min_idx,
            states,
            states_number_period,
            max_states_period,
            mapping,
        })
    }

    /// Linear index of a state within its period, or `None` if inadmissible.
    pub fn index(
        &self,
        period: usize,
        exp_a: usize,
        exp_b: usize,
        edu: usize,
        lagged_edu: usize,
    ) -> Option<usize> {
        if period >= self.num_periods
            || exp_a >= self.num_periods
            || exp_b >= self.num_periods
            || edu >= self.min_idx
            || lagged_edu > 1
        {
            return None;
        }
        let k = self.mapping[lookup_index(
            self.num_periods,
            self.min_idx,
            period,
            exp_a,
            exp_b,
            edu,
            lagged_edu,
        )];
        (k != MISSING_INDEX).then_some(k as usize)
    }

    /// The k-th state of `period`.
    #[inline(always)]
    pub fn state(&self, period: usize, k: usize) -> &State {
        &self.states[period][k]
    }

    pub fn num_states(&self, period: usize) -> usize {
        self.states_number_period[period]
    }

    pub fn total_states(&self) -> usize {
        self.states_number_period.iter().sum()
    }

    /// Maximum additional schooling.
    pub fn edu_cap(&self) -> usize {
        (self.edu_max - self.edu_start) as usize
    }

    /// Whether the schooling transition out of `state` is blocked by the cap.
    #[inline(always)]
    pub fn is_schooling_capped(&self, state: &State) -> bool {
        state.edu >= self.edu_cap()
    }

    /// Next-period indices reached by each choice, in choice order.
    ///
    /// Returns `None` for every choice in the last period, and for schooling
    /// when the education cap is reached.
    pub fn successors(&self, period: usize, k: usize) -> [Option<usize>; NUM_CHOICES] {
        if period + 1 >= self.num_periods {
            return [None; NUM_CHOICES];
        }
        let s = self.state(period, k);
        let next = period + 1;
        let schooling = if self.is_schooling_capped(s) {
            None
        } else {
            self.index(next, s.exp_a, s.exp_b, s.edu + 1, 1)
        };
        [
            self.index(next, s.exp_a + 1, s.exp_b, s.edu, 0),
            self.index(next, s.exp_a, s.exp_b + 1, s.edu, 0),
            schooling,
            self.index(next, s.exp_a, s.exp_b, s.edu, 0),
        ]
    }
}

#[inline(always)]
fn is_admissible(period: usize, edu: usize, lagged_edu: usize) -> bool {
    if period == 0 {
        return lagged_edu == 1;
    }
    if lagged_edu == 1 && edu == 0 {
        return false;
    }
    !(lagged_edu == 0 && edu == period)
}

/// Closed-form number of admissible states in `period` for a given schooling cap.
///
/// For each schooling level e there are C(t-e+2, 2) experience splits; both lag
/// values are possible when e > 0, except that e = t forces l = 1.
pub fn expected_state_count(period: usize, edu_cap: usize) -> usize {
    if period == 0 {
        return 1;
    }
    (0..=edu_cap.min(period))
        .map(|e| {
            let r = period - e;
            let splits = (r + 1) * (r + 2) / 2;
            let lags = if e > 0 { 2 } else { 1 };
            splits * lags - usize::from(e == period)
        })
        .sum()
}
