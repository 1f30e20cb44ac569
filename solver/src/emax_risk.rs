//! Monte-Carlo EMAX under risk.
//!
//! For a state S in period t with systematic rewards r and transformed shocks ε:
//!
//! ```text
//! ex_post_j   = r_j · ε_j          j ∈ {A, B}
//!             = r_j + ε_j          j ∈ {schooling, home}
//! total_j     = ex_post_j + δ · EMAX_{t+1}(S'_j)
//! EMAX_t(S)   = (1/R) Σ_draws max_j total_j
//! ```
//!
//! S'_j is the deterministic successor of choice j. When schooling is capped its
//! continuation value is zero and the inadmissibility penalty is added to
//! `total_schooling`, so the choice is never optimal. In the last period all
//! continuation values are zero and no penalty applies.

use crate::constants::*;
use crate::state_space::StateSpace;

/// Everything about one state that does not depend on the shock draw.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StateValueInputs {
    pub rewards: [f64; NUM_CHOICES],
    /// `EMAX_{t+1}` of each choice's successor (zero when there is none).
    pub future: [f64; NUM_CHOICES],
    /// Schooling is blocked by the education cap and a next period exists.
    pub is_capped: bool,
    pub delta: f64,
    pub penalty: f64,
}

impl StateValueInputs {
    /// Collect the inputs for state `k` of `period`.
    ///
    /// `next_emax` is the EMAX row of `period + 1`; pass `None` in the last period.
    pub fn new(
        space: &StateSpace,
        rewards: &[f64; NUM_CHOICES],
        period: usize,
        k: usize,
        next_emax: Option<&[f64]>,
        delta: f64,
        penalty: f64,
    ) -> Self {
        let (future, is_capped) = match next_emax {
            Some(emax) => get_future_values(space, period, k, emax),
            None => ([0.0; NUM_CHOICES], false),
        };
        Self {
            rewards: *rewards,
            future,
            is_capped,
            delta,
            penalty,
        }
    }

    /// Total value of each choice for one transformed shock vector.
    #[inline(always)]
    pub fn total_values(&self, shock: &[f64; 4]) -> [f64; NUM_CHOICES] {
        let mut total = [0.0; NUM_CHOICES];
        for j in 0..NUM_CHOICES {
            let ex_post = if is_occupation(j) {
                self.rewards[j] * shock[j]
            } else {
                self.rewards[j] + shock[j]
            };
            total[j] = ex_post + self.delta * self.future[j];
        }
        if self.is_capped {
            total[CHOICE_SCHOOLING] += self.penalty;
        }
        total
    }

    /// Average of the maximum total value over the shock draws.
    pub fn emax(&self, shocks: &[[f64; 4]]) -> f64 {
        if shocks.is_empty() {
            return 0.0;
        }
        let sum: f64 = shocks
            .iter()
            .map(|eps| {
                self.total_values(eps)
                    .into_iter()
                    .fold(f64::NEG_INFINITY, f64::max)
            })
            .sum();
        sum / shocks.len() as f64
    }
}

/// Continuation values of every choice and whether schooling is capped.
///
/// Must only be called for periods with a successor period; `next_emax` is that
/// period's EMAX row.
pub fn get_future_values(
    space: &StateSpace,
    period: usize,
    k: usize,
    next_emax: &[f64],
) -> ([f64; NUM_CHOICES], bool) {
    let successors = space.successors(period, k);
    let mut future = [0.0; NUM_CHOICES];
    for (j, succ) in successors.iter().enumerate() {
        if let Some(idx) = succ {
            future[j] = next_emax[*idx];
        }
    }
    let is_capped = space.is_schooling_capped(space.state(period, k));
    (future, is_capped)
}

/// Index of the best choice (first index on ties).
#[inline]
pub fn choose(total: &[f64; NUM_CHOICES]) -> usize {
    let mut best = 0;
    for j in 1..NUM_CHOICES {
        if total[j] > total[best] {
            best = j;
        }
    }
    best
}

/// Convenience wrapper: Monte-Carlo EMAX of one state.
pub fn construct_emax_risk(inputs: &StateValueInputs, shocks: &[[f64; 4]]) -> f64 {
    inputs.emax(shocks)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs(is_capped: bool) -> StateValueInputs {
        StateValueInputs {
            rewards: [10.0, 20.0, 5.0, 1.0],
            future: [100.0, 50.0, 80.0, 0.0],
            is_capped,
            delta: 0.9,
            penalty: DEFAULT_INADMISSIBILITY_PENALTY,
        }
    }

    #[test]
    fn test_total_values() {
        let t = inputs(false).total_values(&[2.0, 0.5, 3.0, -1.0]);
        assert!((t[0] - (20.0 + 90.0)).abs() < 1e-12);
        assert!((t[1] - (10.0 + 45.0)).abs() < 1e-12);
        assert!((t[2] - (8.0 + 72.0)).abs() < 1e-12);
        assert!((t[3] - 0.0).abs() < 1e-12);
        assert_eq!(choose(&t), CHOICE_OCCUPATION_A);
    }

    #[test]
    fn test_penalty_applies_only_to_schooling() {
        let shock = [1.0, 1.0, 0.0, 0.0];
        let open = inputs(false).total_values(&shock);
        let capped = inputs(true).total_values(&shock);
        assert_eq!(open[0], capped[0]);
        assert_eq!(open[1], capped[1]);
        assert_eq!(open[3], capped[3]);
        assert_eq!(capped[2] - open[2], DEFAULT_INADMISSIBILITY_PENALTY);
    }

    #[test]
    fn test_emax_is_mean_of_max() {
        let inp = StateValueInputs {
            rewards: [1.0, 1.0, 0.0, 0.0],
            future: [0.0; 4],
            is_capped: false,
            delta: 0.95,
            penalty: DEFAULT_INADMISSIBILITY_PENALTY,
        };
        let shocks = [[3.0, 1.0, 0.0, 0.0], [1.0, 5.0, 0.0, 0.0], [0.5, 0.5, 2.0, 0.0]];
        let emax = construct_emax_risk(&inp, &shocks);
        assert!((emax - (3.0 + 5.0 + 2.0) / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_future_values_lookup() {
        let space = StateSpace::build(3, 10, 10).unwrap();
        let next: Vec<f64> = (0..space.num_states(1)).map(|k| 10.0 * (k + 1) as f64).collect();
        let (future, capped) = get_future_values(&space, 0, 0, &next);
        assert!(capped);
        assert_eq!(future[CHOICE_SCHOOLING], 0.0);
        let a = space.index(1, 1, 0, 0, 0).unwrap();
        let b = space.index(1, 0, 1, 0, 0).unwrap();
        let home = space.index(1, 0, 0, 0, 0).unwrap();
        assert_eq!(future[CHOICE_OCCUPATION_A], next[a]);
        assert_eq!(future[CHOICE_OCCUPATION_B], next[b]);
        assert_eq!(future[CHOICE_HOME], next[home]);
    }

    #[test]
    fn test_last_period_has_no_future_and_no_penalty() {
        let space = StateSpace::build(2, 10, 10).unwrap();
        let inp = StateValueInputs::new(&space, &[1.0, 2.0, 3.0, 4.0], 1, 0, None, 0.95, -1e5);
        assert_eq!(inp.future, [0.0; 4]);
        assert!(!inp.is_capped);
        assert_eq!(inp.emax(&[[1.0, 1.0, 0.0, 0.0]]), 4.0);
    }
}
