//! Backward induction: fill the EMAX table from the last period to the first.
//!
//! Period t only reads the EMAX row of period t+1, which is complete before t
//! starts. Within a period every state is independent, so the period is a
//! rayon fork-join over state indices:
//!
//! 1. draw the period's standard normals (one stream per period) and transform them
//! 2. collect the draw-independent inputs of every state (rewards, continuation values)
//! 3. evaluate EMAX exactly for every state, or for a random subset when the
//!    period is interpolated, under risk or ambiguity
//! 4. fill the remaining states by regression and write the row
//!
//! Results are collected in state order, so the table is bit-identical for any
//! worker count.

use std::time::Instant;

use rayon::prelude::*;

use crate::ambiguity::{construct_emax_ambiguity, AmbiguityOutcome, AmbiguitySet};
use crate::config::SolverConfig;
use crate::emax_risk::StateValueInputs;
use crate::error::SolveError;
use crate::interpolation::{get_simulated_indicator, interpolate_period};
use crate::optimizer::Minimizer;
use crate::parameters::{covariance_from_cholesky, CholeskyStatus};
use crate::rewards::{calculate_rewards_systematic, RewardTable};
use crate::shocks::{expected_shocks, period_draws, transform_disturbances};
use crate::state_space::StateSpace;
use crate::types::{
    EmaxTable, PeriodMode, PeriodSummary, SolveDiagnostics, SolveWarning, Solution,
};

/// Validate the configuration and solve the model on a pool of `num_procs` workers.
pub fn solve(config: &SolverConfig) -> Result<Solution, SolveError> {
    config.validate()?;
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.num_procs)
        .build()?;
    pool.install(|| solve_in_current_pool(config))
}

/// Solve on the ambient rayon pool. The configuration must already be valid.
pub fn solve_in_current_pool(config: &SolverConfig) -> Result<Solution, SolveError> {
    let total_start = Instant::now();
    let space = StateSpace::build(config.num_periods, config.edu_start, config.edu_max)?;
    tracing::info!(
        num_periods = space.num_periods,
        total_states = space.total_states(),
        max_states_period = space.max_states_period,
        workers = rayon::current_num_threads(),
        ambiguous = config.is_ambiguous(),
        "starting backward induction"
    );

    let rewards = calculate_rewards_systematic(&space, &config.params);
    let (emax, mut diagnostics) = backward_induction(config, &space, &rewards);
    diagnostics.elapsed_secs = total_start.elapsed().as_secs_f64();

    tracing::info!(
        elapsed_secs = diagnostics.elapsed_secs,
        warnings = diagnostics.warnings.len(),
        initial_value = emax.get(0, 0),
        "backward induction complete"
    );
    log_timing_breakdown(&diagnostics);

    let (shocks_cholesky, _) = config.params.adjusted_cholesky();
    Ok(Solution {
        delta: config.delta,
        inadmissibility_penalty: config.inadmissibility_penalty,
        shocks_cholesky,
        state_space: space,
        rewards,
        emax,
        diagnostics,
    })
}

/// Fill the EMAX table for a built state space and reward table.
pub fn backward_induction(
    config: &SolverConfig,
    space: &StateSpace,
    rewards: &RewardTable,
) -> (EmaxTable, SolveDiagnostics) {
    let mut emax = EmaxTable::zeros(space.num_periods, space.max_states_period);
    let mut diagnostics = SolveDiagnostics::default();

    let (chol, status) = config.params.adjusted_cholesky();
    if status == CholeskyStatus::Adjusted {
        tracing::warn!("shock variance below the floor, Cholesky diagonal raised");
        diagnostics.warnings.push(SolveWarning::CholeskyAdjusted);
    }
    let chol = &chol;
    let cov = covariance_from_cholesky(chol);
    let shifts = expected_shocks(&cov);
    let ambiguity = AmbiguitySet::new(config.measure, config.params.level, &cov);
    if config.is_ambiguous() && ambiguity.is_none() {
        tracing::debug!("occupational shocks are degenerate, ambiguity set is the baseline");
    }
    let minimizer = Minimizer::from_options(&config.optimizer);

    for period in (0..space.num_periods).rev() {
        let period_start = Instant::now();
        let num_states = space.num_states(period);

        let draws = period_draws(config.num_draws_emax, config.seed_emax, period);
        let shocks = transform_disturbances(&draws, chol);

        let next_emax = (period + 1 < space.num_periods).then(|| emax.row(period + 1));
        let inputs: Vec<StateValueInputs> = (0..num_states)
            .into_par_iter()
            .map(|k| {
                StateValueInputs::new(
                    space,
                    rewards.get(period, k),
                    period,
                    k,
                    next_emax,
                    config.delta,
                    config.inadmissibility_penalty,
                )
            })
            .collect();

        let interpolate =
            config.interpolation.enabled && num_states > config.interpolation.threshold;
        let is_simulated = if interpolate {
            get_simulated_indicator(
                config.interpolation.num_points,
                num_states,
                config.seed_emax,
                period,
            )
        } else {
            vec![true; num_states]
        };

        let outcomes: Vec<Option<AmbiguityOutcome>> = inputs
            .par_iter()
            .zip(is_simulated.par_iter())
            .map_init(
                || minimizer.clone(),
                |minimizer, (inp, &simulated)| {
                    if !simulated {
                        return None;
                    }
                    Some(construct_emax_ambiguity(
                        inp,
                        &draws,
                        &shocks,
                        chol,
                        ambiguity.as_ref(),
                        &*minimizer,
                    ))
                },
            )
            .collect();

        let mut num_not_converged = 0;
        for (k, outcome) in outcomes.iter().enumerate() {
            if let Some(out) = outcome.as_ref().filter(|o| !o.converged) {
                num_not_converged += 1;
                tracing::debug!(
                    period,
                    state = k,
                    iterations = out.iterations,
                    message = out.message,
                    "worst-case search did not converge"
                );
                diagnostics.warnings.push(SolveWarning::AmbiguityNotConverged {
                    period,
                    state: k,
                    iterations: out.iterations,
                    message: out.message.to_string(),
                });
            }
        }
        if num_not_converged > 0 {
            tracing::warn!(
                period,
                num_not_converged,
                "worst-case search failed for some states, best iterates used"
            );
        }

        let exact: Vec<Option<f64>> =
            outcomes.iter().map(|o| o.as_ref().map(|o| o.emax)).collect();
        let num_simulated = exact.iter().filter(|v| v.is_some()).count();
        let row = if interpolate {
            let (row, fit) = interpolate_period(period, &inputs, &shifts, &exact);
            if let Some(fit) = fit {
                tracing::debug!(
                    period,
                    r_squared = fit.ols.r_squared,
                    num_points = fit.num_points,
                    "interpolation fitted"
                );
                if fit.ols.ridge {
                    tracing::warn!(period, "interpolation design is rank deficient, using ridge");
                    diagnostics.warnings.push(SolveWarning::RidgeRegression { period });
                }
                diagnostics.interpolation.push(fit);
            }
            row
        } else {
            exact.iter().map(|v| v.unwrap_or(0.0)).collect()
        };
        emax.row_mut(period)[..num_states].copy_from_slice(&row);

        let mode = if interpolate {
            PeriodMode::Interpolated
        } else {
            PeriodMode::Exact
        };
        let elapsed_secs = period_start.elapsed().as_secs_f64();
        tracing::info!(period, num_states, ?mode, num_simulated, elapsed_secs, "period solved");
        diagnostics.periods.push(PeriodSummary {
            period,
            num_states,
            mode,
            num_simulated,
            num_not_converged,
            elapsed_secs,
        });
    }

    (emax, diagnostics)
}

fn log_timing_breakdown(diagnostics: &SolveDiagnostics) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    tracing::debug!("Period | States | Mode         | Time (s) | Rate (states/s)");
    for p in diagnostics.periods.iter() {
        let rate = if p.elapsed_secs > 0.0 {
            p.num_states as f64 / p.elapsed_secs
        } else {
            0.0
        };
        tracing::debug!(
            "  {:4} | {:6} | {:12} | {:8.3} | {:8.0}",
            p.period,
            p.num_states,
            format!("{:?}", p.mode),
            p.elapsed_secs,
            rate
        );
    }
}
