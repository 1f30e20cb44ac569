//! Solver configuration.
//!
//! A [`SolverConfig`] is built once (from JSON or in code), validated, and then
//! passed by reference into the builder and the backward-induction driver. It
//! is never mutated during a solve.
//!
//! The worker count defaults to `RAYON_NUM_THREADS` (fallback `OMP_NUM_THREADS`,
//! then the machine's available parallelism).

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_INADMISSIBILITY_PENALTY;
use crate::error::{ConfigError, ConfigResult};
use crate::parameters::ModelParameters;

/// Divergence used to bound the ambiguity set.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityMeasure {
    /// Kullback–Leibler divergence from the baseline distribution, held at `level`.
    #[default]
    Kl,
    /// Standardized ellipsoid around the baseline means with radius `level`.
    Ellipsoid,
}

/// Strategy for the inner worst-case minimization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    /// Sequential quadratic programming with a BFGS Hessian.
    #[default]
    Slsqp,
    /// Nelder–Mead simplex on a quadratic-penalty objective.
    NelderMead,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerOptions {
    pub kind: OptimizerKind,
    pub max_iter: usize,
    /// Convergence tolerance on the objective.
    pub ftol: f64,
    /// Step size for finite-difference gradients.
    pub eps: f64,
}

impl Default for OptimizerOptions {
    fn default() -> Self {
        Self {
            kind: OptimizerKind::Slsqp,
            max_iter: 100,
            ftol: 1e-6,
            eps: 1e-6,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationConfig {
    pub enabled: bool,
    /// Number of states evaluated exactly in an interpolated period.
    pub num_points: usize,
    /// Interpolate only periods with more admissible states than this.
    pub threshold: usize,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            num_points: 200,
            threshold: 200,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub num_agents: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_agents: 1000,
            seed: 132,
        }
    }
}

/// Complete, immutable description of a solve request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    pub num_periods: usize,
    /// Discount factor (not clamped).
    pub delta: f64,
    pub edu_start: i32,
    pub edu_max: i32,
    pub params: ModelParameters,
    #[serde(default)]
    pub measure: AmbiguityMeasure,
    pub num_draws_emax: usize,
    pub seed_emax: u64,
    #[serde(default)]
    pub interpolation: InterpolationConfig,
    #[serde(default)]
    pub optimizer: OptimizerOptions,
    #[serde(default = "default_num_procs")]
    pub num_procs: usize,
    #[serde(default = "default_inadmissibility_penalty")]
    pub inadmissibility_penalty: f64,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_inadmissibility_penalty() -> f64 {
    DEFAULT_INADMISSIBILITY_PENALTY
}

/// Read `RAYON_NUM_THREADS` (fallback `OMP_NUM_THREADS`, then available parallelism).
pub fn default_num_procs() -> usize {
    std::env::var("RAYON_NUM_THREADS")
        .or_else(|_| std::env::var("OMP_NUM_THREADS"))
        .ok()
        .and_then(|s| s.parse().ok())
        .filter(|&n: &usize| n > 0)
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
}

impl SolverConfig {
    /// Configuration with default solution settings (δ = 0.95, 500 draws).
    pub fn new(num_periods: usize, edu_start: i32, edu_max: i32, params: ModelParameters) -> Self {
        Self {
            num_periods,
            delta: 0.95,
            edu_start,
            edu_max,
            params,
            measure: AmbiguityMeasure::default(),
            num_draws_emax: 500,
            seed_emax: 456,
            interpolation: InterpolationConfig::default(),
            optimizer: OptimizerOptions::default(),
            num_procs: default_num_procs(),
            inadmissibility_penalty: DEFAULT_INADMISSIBILITY_PENALTY,
            simulation: SimulationConfig::default(),
        }
    }

    /// Parse and validate a JSON configuration.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: SolverConfig =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidValue {
                field: "config",
                message: e.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file.
    pub fn from_path(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::InvalidValue {
            field: "config",
            message: format!("{}: {}", path.display(), e),
        })?;
        Self::from_json_str(&text)
    }

    /// Maximum additional schooling: `edu_max - edu_start`.
    pub fn edu_cap(&self) -> usize {
        (self.edu_max - self.edu_start).max(0) as usize
    }

    /// True when the agent evaluates continuation values under ambiguity.
    pub fn is_ambiguous(&self) -> bool {
        self.params.level > 0.0
    }

    /// Reject invalid settings before any computation starts.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.num_periods == 0 {
            return Err(ConfigError::NoPeriods);
        }
        if self.edu_start < 0 {
            return Err(ConfigError::NegativeEducation(self.edu_start));
        }
        if self.edu_max < self.edu_start {
            return Err(ConfigError::EducationBounds {
                edu_start: self.edu_start,
                edu_max: self.edu_max,
            });
        }
        if self.num_draws_emax == 0 {
            return Err(ConfigError::NonPositiveCount {
                field: "num_draws_emax",
            });
        }
        if self.num_procs == 0 {
            return Err(ConfigError::NonPositiveCount { field: "num_procs" });
        }
        if !self.delta.is_finite() {
            return Err(ConfigError::NonFinite { field: "delta" });
        }
        if !self.inadmissibility_penalty.is_finite() {
            return Err(ConfigError::NonFinite {
                field: "inadmissibility_penalty",
            });
        }
        if self.interpolation.enabled && self.interpolation.num_points == 0 {
            return Err(ConfigError::NonPositiveCount {
                field: "interpolation.num_points",
            });
        }
        if self.optimizer.max_iter == 0 {
            return Err(ConfigError::NonPositiveCount {
                field: "optimizer.max_iter",
            });
        }
        if !(self.optimizer.ftol > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "optimizer.ftol",
                message: format!("must be positive, got {}", self.optimizer.ftol),
            });
        }
        if !(self.optimizer.eps > 0.0) {
            return Err(ConfigError::InvalidValue {
                field: "optimizer.eps",
                message: format!("must be positive, got {}", self.optimizer.eps),
            });
        }
        self.params.validate()
    }
}
