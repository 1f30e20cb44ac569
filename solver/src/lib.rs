//! # dcdp — finite-horizon dynamic discrete-choice solver
//!
//! Solves a Keane–Wolpin style model of occupational choice: in each of T
//! periods an agent works in occupation A, works in occupation B, attends
//! school, or stays home, and maximizes expected discounted lifetime reward.
//! The solution is the table of EMAX values (expected value of continuing
//! optimally) for every admissible state, computed by **backward induction**.
//!
//! ## Algorithm overview
//!
//! | Step | Rust module | Description |
//! |------|-------------|-------------|
//! | 1 | [`state_space`] | Admissible states (a, b, e, l) per period, dense index lookup |
//! | 2 | [`rewards`] | Systematic rewards of the four alternatives at every state |
//! | 3 | [`shocks`] | Per-period standard-normal draws, mapped through the Cholesky factor |
//! | 4 | [`backward_induction`] | Periods T−1 → 0, parallel over states within a period |
//! | 4a | [`emax_risk`] | Monte-Carlo EMAX under the baseline shock distribution |
//! | 4b | [`ambiguity`] + [`optimizer`] | Worst-case EMAX over mean shifts in a KL ball or ellipsoid |
//! | 4c | [`interpolation`] | Exact EMAX on a random subset, OLS prediction for the rest |
//! | 5 | [`simulation`] | Forward simulation of agents on the solved table |
//!
//! ## State representation
//!
//! A state S = (t, a, b, e, l) where:
//! - `a`, `b`: years of experience in occupations A and B
//! - `e`: schooling beyond `edu_start`, at most `edu_max − edu_start`
//! - `l`: 1 if the agent attended school in the previous period
//!
//! Per-period tables are stored period-major with row width
//! `max_states_period`: entry (t, k) lives at `t * max_states_period + k`.
//!
//! ## Reproducibility
//!
//! Every random stream (EMAX draws per period, interpolation subsets per
//! period, simulated agents) is seeded from the user seed and a stream id, so
//! results are bit-identical across runs and worker counts.

#![allow(clippy::needless_range_loop)]

pub mod ambiguity;
pub mod backward_induction;
pub mod config;
pub mod constants;
pub mod emax_risk;
pub mod error;
pub mod interpolation;
pub mod likelihood;
pub mod linalg;
pub mod optimizer;
pub mod parameters;
pub mod prng;
pub mod rewards;
pub mod shocks;
pub mod simulation;
pub mod state_space;
pub mod types;
