//! End-to-end tests of the solver and the simulator.
//!
//! Models are kept small (4–6 periods, 100–200 draws) so each solve runs in
//! about a second, including the ambiguity runs.

use dcdp::ambiguity::{construct_emax_ambiguity, AmbiguitySet};
use dcdp::backward_induction::solve;
use dcdp::config::{AmbiguityMeasure, OptimizerKind, SolverConfig};
use dcdp::constants::*;
use dcdp::emax_risk::StateValueInputs;
use dcdp::optimizer::Minimizer;
use dcdp::parameters::ModelParameters;
use dcdp::shocks::{period_draws, transform_disturbances};
use dcdp::simulation::simulate;
use dcdp::types::{PeriodMode, Solution};

fn params(level: f64) -> ModelParameters {
    ModelParameters {
        level,
        coeffs_a: [9.21, 0.038, 0.033, -0.0005, 0.0, 0.0],
        coeffs_b: [8.48, 0.07, 0.067, -0.001, 0.022, -0.0005],
        coeffs_edu: [0.0, 0.0, -4000.0],
        coeffs_home: [17750.0],
        shocks_cholesky: [
            [0.2, 0.0, 0.0, 0.0],
            [0.0, 0.25, 0.0, 0.0],
            [0.0, 0.0, 1500.0, 0.0],
            [0.0, 0.0, 0.0, 1500.0],
        ],
    }
}

fn config(num_periods: usize, level: f64) -> SolverConfig {
    let mut config = SolverConfig::new(num_periods, 10, 13, params(level));
    config.num_draws_emax = 100;
    config.num_procs = 2;
    config.simulation.num_agents = 200;
    config
}

/// Risk EMAX of every state recomputed serially from the solved rewards.
fn serial_risk_table(config: &SolverConfig, solution: &Solution) -> Vec<Vec<f64>> {
    let space = &solution.state_space;
    let mut rows: Vec<Vec<f64>> = vec![Vec::new(); space.num_periods];
    for period in (0..space.num_periods).rev() {
        let draws = period_draws(config.num_draws_emax, config.seed_emax, period);
        let shocks = transform_disturbances(&draws, &config.params.shocks_cholesky);
        let next = rows.get(period + 1).filter(|r| !r.is_empty()).cloned();
        rows[period] = (0..space.num_states(period))
            .map(|k| {
                StateValueInputs::new(
                    space,
                    solution.rewards.get(period, k),
                    period,
                    k,
                    next.as_deref(),
                    config.delta,
                    config.inadmissibility_penalty,
                )
                .emax(&shocks)
            })
            .collect();
    }
    rows
}

#[test]
fn test_solve_is_deterministic() {
    let cfg = config(5, 0.0);
    let a = solve(&cfg).unwrap();
    let b = solve(&cfg).unwrap();
    assert_eq!(a.emax, b.emax);
    assert_eq!(a.rewards, b.rewards);
}

#[test]
fn test_worker_count_does_not_change_results() {
    let mut cfg = config(5, 0.05);
    cfg.interpolation.enabled = true;
    cfg.interpolation.threshold = 15;
    cfg.interpolation.num_points = 15;
    cfg.num_procs = 1;
    let serial = solve(&cfg).unwrap();
    cfg.num_procs = 4;
    let parallel = solve(&cfg).unwrap();
    assert_eq!(serial.emax, parallel.emax);
    assert_eq!(serial.rewards, parallel.rewards);
    assert_eq!(serial.diagnostics.warnings, parallel.diagnostics.warnings);
}

#[test]
fn test_matches_serial_risk_recursion() {
    let cfg = config(5, 0.0);
    let solution = solve(&cfg).unwrap();
    let expected = serial_risk_table(&cfg, &solution);
    for (period, row) in expected.iter().enumerate() {
        for (k, value) in row.iter().enumerate() {
            assert_eq!(solution.emax.get(period, k), *value, "period {period} state {k}");
        }
    }
}

#[test]
fn test_zero_level_equals_risk_for_both_measures() {
    let risk = solve(&config(4, 0.0)).unwrap();
    for measure in [AmbiguityMeasure::Kl, AmbiguityMeasure::Ellipsoid] {
        let mut cfg = config(4, 0.0);
        cfg.measure = measure;
        let solution = solve(&cfg).unwrap();
        for (a, b) in solution.emax.values.iter().zip(risk.emax.values.iter()) {
            assert!((a - b).abs() <= 1e-6 * b.abs().max(1.0), "{measure:?}: {a} vs {b}");
        }
    }
}

#[test]
fn test_worst_case_never_exceeds_risk() {
    let risk = solve(&config(4, 0.0)).unwrap();
    for (measure, kind) in [
        (AmbiguityMeasure::Kl, OptimizerKind::Slsqp),
        (AmbiguityMeasure::Ellipsoid, OptimizerKind::Slsqp),
        (AmbiguityMeasure::Kl, OptimizerKind::NelderMead),
    ] {
        let mut cfg = config(4, 0.05);
        cfg.measure = measure;
        cfg.optimizer.kind = kind;
        let solution = solve(&cfg).unwrap();
        let space = &solution.state_space;
        for t in 0..space.num_periods {
            for k in 0..space.num_states(t) {
                let worst = solution.emax.get(t, k);
                let base = risk.emax.get(t, k);
                assert!(
                    worst <= base + 1e-6 * base.abs(),
                    "{measure:?}/{kind:?} period {t} state {k}: {worst} > {base}"
                );
            }
        }
        assert!(solution.initial_value() < risk.initial_value());
    }
}

/// Default measure and optimizer over a longer horizon and a wider schooling range.
#[test]
fn test_default_kl_search_stays_below_risk_everywhere() {
    let level = 0.1;
    let mut cfg = config(6, level);
    cfg.edu_max = 15;
    cfg.num_draws_emax = 200;
    let mut risk_cfg = cfg.clone();
    risk_cfg.params.level = 0.0;
    let risk = solve(&risk_cfg).unwrap();
    let solution = solve(&cfg).unwrap();
    let space = &solution.state_space;

    let cov = cfg.params.shocks_cov();
    let set = AmbiguitySet::new(cfg.measure, level, &cov).unwrap();
    let minimizer = Minimizer::from_options(&cfg.optimizer);
    let chol = &cfg.params.shocks_cholesky;
    for t in 0..space.num_periods {
        let draws = period_draws(cfg.num_draws_emax, cfg.seed_emax, t);
        let shocks = transform_disturbances(&draws, chol);
        for k in 0..space.num_states(t) {
            let worst = solution.emax.get(t, k);
            let base = risk.emax.get(t, k);
            assert!(worst <= base + 1e-9 * base.abs(), "period {t} state {k}: {worst} > {base}");

            let inputs = StateValueInputs::new(
                space,
                solution.rewards.get(t, k),
                t,
                k,
                solution.next_emax(t),
                cfg.delta,
                cfg.inadmissibility_penalty,
            );
            let out =
                construct_emax_ambiguity(&inputs, &draws, &shocks, chol, Some(&set), &minimizer);
            assert_eq!(out.emax, worst, "period {t} state {k}");
            assert!(out.shift.iter().all(|&x| x <= 1e-4), "period {t} state {k}: {out:?}");
            if out.converged {
                assert!(
                    (out.divergence - level).abs() <= 1e-3,
                    "period {t} state {k}: {out:?}"
                );
            }
        }
    }
    assert!(solution.initial_value() < risk.initial_value());
}

#[test]
fn test_full_subset_interpolation_equals_exhaustive() {
    let exhaustive = solve(&config(5, 0.0)).unwrap();
    let mut cfg = config(5, 0.0);
    cfg.interpolation.enabled = true;
    cfg.interpolation.threshold = 0;
    cfg.interpolation.num_points = 10_000;
    let solution = solve(&cfg).unwrap();
    assert_eq!(solution.emax, exhaustive.emax);
    assert!(solution.diagnostics.interpolation.is_empty());
    assert!(solution
        .diagnostics
        .periods
        .iter()
        .all(|p| p.mode == PeriodMode::Interpolated && p.num_simulated == p.num_states));
}

#[test]
fn test_partial_interpolation_keeps_simulated_states_exact() {
    let exhaustive = solve(&config(5, 0.0)).unwrap();
    let mut cfg = config(5, 0.0);
    cfg.interpolation.enabled = true;
    cfg.interpolation.threshold = 20;
    cfg.interpolation.num_points = 20;
    let solution = solve(&cfg).unwrap();
    // The last period has no continuation, so its exact states agree with the exhaustive solve.
    let last = 4;
    let summary = &solution.diagnostics.periods[0];
    assert_eq!(summary.period, last);
    assert_eq!(summary.mode, PeriodMode::Interpolated);
    assert_eq!(summary.num_simulated, 20);
    let exact_matches = (0..solution.state_space.num_states(last))
        .filter(|&k| solution.emax.get(last, k) == exhaustive.emax.get(last, k))
        .count();
    assert!(exact_matches >= 20);
}

/// T = 3, no room for additional schooling, point-mass shocks, δ = 0.95.
///
/// The last period's EMAX is the largest systematic reward. Earlier periods
/// add δ times the successor's EMAX, and schooling carries the penalty.
#[test]
fn test_deterministic_three_period_model_by_hand() {
    let params = ModelParameters {
        level: 0.0,
        coeffs_a: [2.0, 0.0, 0.1, 0.0, 0.0, 0.0],
        coeffs_b: [1.0, 0.0, 0.0, 0.0, 0.2, 0.0],
        coeffs_edu: [5.0, 0.0, -1.0],
        coeffs_home: [4.0],
        shocks_cholesky: [[0.0; 4]; 4],
    };
    let mut cfg = SolverConfig::new(3, 10, 10, params);
    cfg.num_draws_emax = 10;
    cfg.num_procs = 1;
    let delta = cfg.delta;
    let penalty = cfg.inadmissibility_penalty;
    let solution = solve(&cfg).unwrap();
    let space = &solution.state_space;
    assert_eq!(
        (space.num_states(0), space.num_states(1), space.num_states(2)),
        (1, 3, 6)
    );

    let r_a = |a: usize| (2.0 + 0.1 * a as f64).exp();
    let r_b = |b: usize| (1.0 + 0.2 * b as f64).exp();
    // Without schooling in the past, l = 0 from period 1 on and the re-entry cost applies.
    let last = |a: usize, b: usize| r_a(a).max(r_b(b)).max(5.0 - 1.0).max(4.0);
    let middle = |a: usize, b: usize| {
        (r_a(a) + delta * last(a + 1, b))
            .max(r_b(b) + delta * last(a, b + 1))
            .max(5.0 - 1.0 + penalty)
            .max(4.0 + delta * last(a, b))
    };
    let first = (r_a(0) + delta * middle(1, 0))
        .max(r_b(0) + delta * middle(0, 1))
        .max(5.0 + penalty)
        .max(4.0 + delta * middle(0, 0));

    let close = |got: f64, want: f64| (got - want).abs() <= 1e-10 * want.abs();
    for a in 0..=2usize {
        for b in 0..=(2 - a) {
            let k = space.index(2, a, b, 0, 0).unwrap();
            assert!(close(solution.emax.get(2, k), last(a, b)), "period 2 ({a}, {b})");
        }
    }
    for (a, b) in [(0, 0), (1, 0), (0, 1)] {
        let k = space.index(1, a, b, 0, 0).unwrap();
        assert!(close(solution.emax.get(1, k), middle(a, b)), "period 1 ({a}, {b})");
    }
    assert!(close(solution.initial_value(), first));
}

#[test]
fn test_capped_schooling_is_never_chosen() {
    let mut cfg = config(4, 0.0);
    cfg.edu_max = cfg.edu_start;
    cfg.params.coeffs_edu = [100_000.0, 0.0, 0.0];
    let solution = solve(&cfg).unwrap();
    let result = simulate(&solution, &cfg);
    // Schooling is attractive but blocked until the last period, where no penalty applies.
    for t in 0..3 {
        assert_eq!(result.choice_shares[t][CHOICE_SCHOOLING], 0.0, "period {t}");
    }
    assert_eq!(result.choice_shares[3][CHOICE_SCHOOLING], 1.0);
}

#[test]
fn test_simulation_is_reproducible() {
    let cfg = config(5, 0.0);
    let solution = solve(&cfg).unwrap();
    let a = simulate(&solution, &cfg);
    let b = rayon::ThreadPoolBuilder::new()
        .num_threads(3)
        .build()
        .unwrap()
        .install(|| simulate(&solution, &cfg));
    assert_eq!(a.records, b.records);
    assert_eq!(a.records.len(), cfg.simulation.num_agents * cfg.num_periods);
    for shares in &a.choice_shares {
        let total: f64 = shares.iter().sum();
        assert!((total - 1.0).abs() < 1e-12);
    }
    for r in &a.records {
        assert!((1..=4).contains(&r.choice));
        assert_eq!(r.wage.is_some(), r.choice <= 2);
        assert!(r.edu >= cfg.edu_start && r.edu <= cfg.edu_max);
    }
}

#[test]
fn test_config_json_round_trip() {
    let mut cfg = config(6, 0.1);
    cfg.measure = AmbiguityMeasure::Ellipsoid;
    cfg.optimizer.kind = OptimizerKind::NelderMead;
    cfg.interpolation.enabled = true;
    let json = serde_json::to_string_pretty(&cfg).unwrap();
    let parsed = SolverConfig::from_json_str(&json).unwrap();
    assert_eq!(parsed, cfg);
}

#[test]
fn test_solution_serializes() {
    let solution = solve(&config(3, 0.0)).unwrap();
    let json = solution.to_json().unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(value["state_space"]["num_periods"], 3);
    assert!(value["emax"]["values"].as_array().unwrap().len() >= 3);
}
