//! Forward simulation of agents through a solved model.
//!
//! Every agent starts in the initial state (0, 0, 0, 1). In each period it
//! draws one shock vector from its own stream, evaluates the total value of
//! each choice with the solved EMAX table, picks the best one and moves to the
//! successor state. Agents are independent and simulated in parallel; agent i
//! always sees the same draws regardless of worker count.

use std::time::Instant;

use rayon::prelude::*;
use serde::Serialize;

use crate::config::SolverConfig;
use crate::constants::*;
use crate::emax_risk::{choose, StateValueInputs};
use crate::prng::{standard_normal_4, stream_rng, STREAM_SIMULATION};
use crate::shocks::transform_draw;
use crate::types::Solution;

/// One agent-period observation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AgentPeriod {
    pub agent: usize,
    pub period: usize,
    /// Chosen alternative, 1-based: 1 = A, 2 = B, 3 = schooling, 4 = home.
    pub choice: u8,
    /// Realized wage when working.
    pub wage: Option<f64>,
    pub exp_a: usize,
    pub exp_b: usize,
    /// Completed years of schooling (`edu_start` included).
    pub edu: i32,
    pub lagged_edu: usize,
}

/// Simulated panel plus aggregate choice frequencies.
#[derive(Clone, Debug, Serialize)]
pub struct SimulationResult {
    pub records: Vec<AgentPeriod>,
    /// `choice_shares[t][j]`: share of agents choosing alternative j in period t.
    pub choice_shares: Vec<[f64; NUM_CHOICES]>,
    /// Mean realized wage among working agents per period (`None` if nobody worked).
    pub mean_wage: Vec<Option<f64>>,
    pub elapsed_secs: f64,
}

/// Simulate one agent's full history.
pub fn simulate_agent(
    solution: &Solution,
    chol: &[[f64; 4]; 4],
    agent: usize,
    seed: u64,
) -> Vec<AgentPeriod> {
    let space = &solution.state_space;
    let mut rng = stream_rng(seed, STREAM_SIMULATION, agent as u64);
    let mut records = Vec::with_capacity(space.num_periods);
    let (mut exp_a, mut exp_b, mut edu, mut lagged_edu) = (0, 0, 0, 1);

    for period in 0..space.num_periods {
        let Some(k) = space.index(period, exp_a, exp_b, edu, lagged_edu) else {
            tracing::debug!(
                agent,
                period,
                exp_a,
                exp_b,
                edu,
                lagged_edu,
                "agent left the state space"
            );
            break;
        };
        let inputs = StateValueInputs::new(
            space,
            solution.rewards.get(period, k),
            period,
            k,
            solution.next_emax(period),
            solution.delta,
            solution.inadmissibility_penalty,
        );
        let eps = transform_draw(&standard_normal_4(&mut rng), chol, [0.0; 2]);
        let total = inputs.total_values(&eps);
        let choice = choose(&total);

        records.push(AgentPeriod {
            agent,
            period,
            choice: (choice + 1) as u8,
            wage: is_occupation(choice).then(|| inputs.rewards[choice] * eps[choice]),
            exp_a,
            exp_b,
            edu: space.edu_start + edu as i32,
            lagged_edu,
        });

        match choice {
            CHOICE_OCCUPATION_A => exp_a += 1,
            CHOICE_OCCUPATION_B => exp_b += 1,
            CHOICE_SCHOOLING => edu += 1,
            _ => {}
        }
        lagged_edu = usize::from(choice == CHOICE_SCHOOLING);
    }
    records
}

/// Simulate `config.simulation.num_agents` agents in parallel.
pub fn simulate(solution: &Solution, config: &SolverConfig) -> SimulationResult {
    let start = Instant::now();
    let num_agents = config.simulation.num_agents;
    let seed = config.simulation.seed;
    let chol = &solution.shocks_cholesky;

    let records: Vec<AgentPeriod> = (0..num_agents)
        .into_par_iter()
        .flat_map_iter(|agent| simulate_agent(solution, chol, agent, seed))
        .collect();

    let num_periods = solution.num_periods();
    let mut counts = vec![[0usize; NUM_CHOICES]; num_periods];
    let mut wages = vec![(0.0, 0usize); num_periods];
    for r in &records {
        counts[r.period][(r.choice - 1) as usize] += 1;
        if let Some(w) = r.wage {
            wages[r.period].0 += w;
            wages[r.period].1 += 1;
        }
    }

    let choice_shares = counts
        .iter()
        .map(|c| {
            let total: usize = c.iter().sum();
            let mut shares = [0.0; NUM_CHOICES];
            if total > 0 {
                for j in 0..NUM_CHOICES {
                    shares[j] = c[j] as f64 / total as f64;
                }
            }
            shares
        })
        .collect();
    let mean_wage = wages
        .iter()
        .map(|&(sum, n)| (n > 0).then(|| sum / n as f64))
        .collect();

    let elapsed_secs = start.elapsed().as_secs_f64();
    tracing::info!(num_agents, num_records = records.len(), elapsed_secs, "simulation complete");

    SimulationResult {
        records,
        choice_shares,
        mean_wage,
        elapsed_secs,
    }
}
