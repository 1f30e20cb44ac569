//! Solve output: the EMAX table, the full [`Solution`] and its diagnostics.
//!
//! A [`Solution`] owns everything the forward simulator and likelihood
//! consumers need: the state space (including the index lookup), the
//! systematic reward table and the EMAX table. All tables are period-major with
//! row width `max_states_period`, so entry (t, k) lives at
//! [`table_index`](crate::constants::table_index)`(max_states_period, t, k)`.

use std::io;
use std::path::Path;

use serde::Serialize;

use crate::constants::*;
use crate::interpolation::InterpolationFit;
use crate::rewards::RewardTable;
use crate::state_space::StateSpace;

/// EMAX_t(S) for every admissible state. Padding slots are zero.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EmaxTable {
    pub max_states_period: usize,
    pub values: Vec<f64>,
}

impl EmaxTable {
    pub fn zeros(num_periods: usize, max_states_period: usize) -> Self {
        Self {
            max_states_period,
            values: vec![0.0; num_periods * max_states_period],
        }
    }

    #[inline(always)]
    pub fn get(&self, period: usize, k: usize) -> f64 {
        self.values[table_index(self.max_states_period, period, k)]
    }

    /// The row of `period`, padding included.
    pub fn row(&self, period: usize) -> &[f64] {
        let start = table_index(self.max_states_period, period, 0);
        &self.values[start..start + self.max_states_period]
    }

    pub fn row_mut(&mut self, period: usize) -> &mut [f64] {
        let start = table_index(self.max_states_period, period, 0);
        &mut self.values[start..start + self.max_states_period]
    }
}

/// How a period's EMAX row was produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodMode {
    /// Every state evaluated by Monte-Carlo integration.
    Exact,
    /// A subset evaluated exactly, the rest predicted by regression.
    Interpolated,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PeriodSummary {
    pub period: usize,
    pub num_states: usize,
    pub mode: PeriodMode,
    /// States evaluated by Monte-Carlo integration.
    pub num_simulated: usize,
    /// Ambiguity solves that stopped without converging.
    pub num_not_converged: usize,
    pub elapsed_secs: f64,
}

/// Recoverable numerical trouble encountered during a solve.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SolveWarning {
    /// The worst-case search of one state stopped early; its best iterate was used.
    AmbiguityNotConverged {
        period: usize,
        state: usize,
        iterations: usize,
        message: String,
    },
    /// The interpolation design of a period was rank deficient.
    RidgeRegression { period: usize },
    /// A shock variance was below the floor and its Cholesky diagonal was raised.
    CholeskyAdjusted,
}

impl std::fmt::Display for SolveWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveWarning::AmbiguityNotConverged {
                period,
                state,
                iterations,
                message,
            } => write!(
                f,
                "worst-case search did not converge in period {} state {} after {} iterations: {}",
                period, state, iterations, message
            ),
            SolveWarning::RidgeRegression { period } => write!(
                f,
                "interpolation design in period {} is rank deficient, ridge regression used",
                period
            ),
            SolveWarning::CholeskyAdjusted => {
                write!(f, "degenerate shock variance, Cholesky diagonal floored")
            }
        }
    }
}

/// Summary of a solve.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct SolveDiagnostics {
    /// One entry per period, in solve order (last period first).
    pub periods: Vec<PeriodSummary>,
    pub warnings: Vec<SolveWarning>,
    pub interpolation: Vec<InterpolationFit>,
    pub elapsed_secs: f64,
}

impl SolveDiagnostics {
    pub fn num_not_converged(&self) -> usize {
        self.periods.iter().map(|p| p.num_not_converged).sum()
    }
}

/// Everything produced by one backward-induction run.
#[derive(Clone, Debug, Serialize)]
pub struct Solution {
    pub delta: f64,
    pub inadmissibility_penalty: f64,
    /// Shock Cholesky factor after flooring; the simulator draws with it.
    pub shocks_cholesky: [[f64; 4]; 4],
    pub state_space: StateSpace,
    pub rewards: RewardTable,
    pub emax: EmaxTable,
    pub diagnostics: SolveDiagnostics,
}

impl Solution {
    pub fn num_periods(&self) -> usize {
        self.state_space.num_periods
    }

    /// EMAX of the single initial state: the expected lifetime value.
    pub fn initial_value(&self) -> f64 {
        self.emax.get(0, 0)
    }

    /// The EMAX row of `period + 1`, or `None` in the last period.
    pub fn next_emax(&self, period: usize) -> Option<&[f64]> {
        (period + 1 < self.num_periods()).then(|| self.emax.row(period + 1))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the solution as pretty-printed JSON.
    pub fn write_json(&self, path: &Path) -> io::Result<()> {
        let file = std::fs::File::create(path)?;
        serde_json::to_writer_pretty(io::BufWriter::new(file), self).map_err(io::Error::from)
    }
}
