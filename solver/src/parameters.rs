//! Structured model parameters and Cholesky reconstruction.
//!
//! Estimation code works on a flat vector of 27 reals:
//!
//! | Slice | Meaning |
//! |-------|---------|
//! | `x[0]` | level of ambiguity |
//! | `x[1..7]` | occupation A coefficients |
//! | `x[7..13]` | occupation B coefficients |
//! | `x[13..16]` | schooling coefficients |
//! | `x[16]` | home coefficient |
//! | `x[17..27]` | lower triangle of the shock Cholesky factor, row by row |
//!
//! That vector is converted exactly once, at the boundary, into
//! [`ModelParameters`]. Everything downstream reads named fields.

use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ConfigError, ConfigResult};

/// Whether the Cholesky factor had to be perturbed to stay positive definite.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CholeskyStatus {
    Exact,
    /// At least one covariance diagonal fell below [`TINY_FLOAT`] and the
    /// corresponding Cholesky diagonal was replaced by `sqrt(TINY_FLOAT)`.
    Adjusted,
}

/// Economic parameters of the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelParameters {
    /// Level of ambiguity (0 = expected utility under risk).
    pub level: f64,
    /// Occupation A log-wage coefficients: intercept, schooling, exp_a, exp_a², exp_b, exp_b².
    pub coeffs_a: [f64; NUM_COEFFS_OCCUPATION],
    /// Occupation B log-wage coefficients, same basis as A.
    pub coeffs_b: [f64; NUM_COEFFS_OCCUPATION],
    /// Schooling: consumption value, tuition cost, re-entry cost.
    pub coeffs_edu: [f64; NUM_COEFFS_EDUCATION],
    /// Home: mean value of staying at home.
    pub coeffs_home: [f64; NUM_COEFFS_HOME],
    /// Lower-triangular Cholesky factor of the shock covariance.
    pub shocks_cholesky: [[f64; 4]; 4],
}

impl ModelParameters {
    /// Build the structured record from a flat parameter vector.
    ///
    /// Negative ambiguity levels are truncated at zero, mirroring how an
    /// unconstrained optimizer step is mapped back into the admissible region.
    pub fn from_vector(x: &[f64]) -> ConfigResult<(Self, CholeskyStatus)> {
        if x.len() != NUM_PARAMETERS {
            return Err(ConfigError::ParameterLength {
                expected: NUM_PARAMETERS,
                actual: x.len(),
            });
        }
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ConfigError::NonFinite {
                field: "parameter vector",
            });
        }

        let mut coeffs_a = [0.0; NUM_COEFFS_OCCUPATION];
        let mut coeffs_b = [0.0; NUM_COEFFS_OCCUPATION];
        let mut coeffs_edu = [0.0; NUM_COEFFS_EDUCATION];
        coeffs_a.copy_from_slice(&x[1..7]);
        coeffs_b.copy_from_slice(&x[7..13]);
        coeffs_edu.copy_from_slice(&x[13..16]);

        let mut lower = [0.0; 10];
        lower.copy_from_slice(&x[17..27]);
        let (shocks_cholesky, status) = cholesky_from_lower(&lower);

        let params = ModelParameters {
            level: x[0].max(0.0),
            coeffs_a,
            coeffs_b,
            coeffs_edu,
            coeffs_home: [x[16]],
            shocks_cholesky,
        };
        Ok((params, status))
    }

    /// Inverse of [`ModelParameters::from_vector`].
    pub fn to_vector(&self) -> [f64; NUM_PARAMETERS] {
        let mut x = [0.0; NUM_PARAMETERS];
        x[0] = self.level;
        x[1..7].copy_from_slice(&self.coeffs_a);
        x[7..13].copy_from_slice(&self.coeffs_b);
        x[13..16].copy_from_slice(&self.coeffs_edu);
        x[16] = self.coeffs_home[0];
        let mut pos = 17;
        for i in 0..4 {
            for j in 0..=i {
                x[pos] = self.shocks_cholesky[i][j];
                pos += 1;
            }
        }
        x
    }

    /// Shock covariance Σ = L·Lᵀ.
    pub fn shocks_cov(&self) -> [[f64; 4]; 4] {
        covariance_from_cholesky(&self.shocks_cholesky)
    }

    /// The stored factor with degenerate diagonals floored, as the solver uses it.
    pub fn adjusted_cholesky(&self) -> ([[f64; 4]; 4], CholeskyStatus) {
        let mut lower = [0.0; 10];
        lower.copy_from_slice(&self.to_vector()[17..27]);
        cholesky_from_lower(&lower)
    }

    /// True for the all-zero Cholesky factor (point-mass shocks).
    pub fn is_deterministic(&self) -> bool {
        self.shocks_cholesky.iter().flatten().all(|&v| v == 0.0)
    }

    /// Shock coefficients as written in initialization files: upper triangle of Σ
    /// in row order with standard deviations on the diagonal.
    pub fn shock_coefficients(&self) -> [f64; 10] {
        let mut cov = self.shocks_cov();
        for (i, row) in cov.iter_mut().enumerate() {
            row[i] = row[i].sqrt();
        }
        let mut coeffs = [0.0; 10];
        let mut pos = 0;
        for i in 0..4 {
            for j in i..4 {
                coeffs[pos] = cov[i][j];
                pos += 1;
            }
        }
        coeffs
    }

    /// Integrity checks run before any solve.
    pub fn validate(&self) -> ConfigResult<()> {
        if !self.level.is_finite() || self.level < 0.0 {
            return Err(ConfigError::InvalidAmbiguityLevel(self.level));
        }
        let all_finite = self
            .coeffs_a
            .iter()
            .chain(&self.coeffs_b)
            .chain(&self.coeffs_edu)
            .chain(&self.coeffs_home)
            .all(|v| v.is_finite());
        if !all_finite {
            return Err(ConfigError::NonFinite {
                field: "reward coefficients",
            });
        }
        for i in 0..4 {
            for j in 0..4 {
                let v = self.shocks_cholesky[i][j];
                if !v.is_finite() {
                    return Err(ConfigError::NonFinite {
                        field: "shocks_cholesky",
                    });
                }
                if j > i && v != 0.0 {
                    return Err(ConfigError::NotLowerTriangular {
                        row: i,
                        col: j,
                        value: v,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Σ = L·Lᵀ for a 4×4 factor.
pub fn covariance_from_cholesky(chol: &[[f64; 4]; 4]) -> [[f64; 4]; 4] {
    let mut cov = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            cov[i][j] = (0..4).map(|k| chol[i][k] * chol[j][k]).sum();
        }
    }
    cov
}

/// Assemble the Cholesky factor from its 10 lower-triangular entries.
///
/// Diagonals whose implied variance is below [`TINY_FLOAT`] are floored at
/// `sqrt(TINY_FLOAT)`. The all-zero factor is left untouched: it is the legal
/// point-mass case used for deterministic test models.
pub fn cholesky_from_lower(lower: &[f64; 10]) -> ([[f64; 4]; 4], CholeskyStatus) {
    let mut chol = [[0.0; 4]; 4];
    let mut pos = 0;
    for i in 0..4 {
        for j in 0..=i {
            chol[i][j] = lower[pos];
            pos += 1;
        }
    }

    let mut status = CholeskyStatus::Exact;
    if lower.iter().any(|&v| v != 0.0) {
        let cov = covariance_from_cholesky(&chol);
        for i in 0..4 {
            if cov[i][i].abs() < TINY_FLOAT {
                chol[i][i] = TINY_FLOAT.sqrt();
                status = CholeskyStatus::Adjusted;
            }
        }
    }
    (chol, status)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_vector() -> [f64; NUM_PARAMETERS] {
        let mut x = [0.0; NUM_PARAMETERS];
        x[0] = 0.1;
        x[1..7].copy_from_slice(&[9.21, 0.038, 0.033, -0.0005, 0.0, 0.0]);
        x[7..13].copy_from_slice(&[8.48, 0.07, 0.067, -0.001, 0.022, -0.0005]);
        x[13..16].copy_from_slice(&[0.0, 0.0, -4000.0]);
        x[16] = 17750.0;
        x[17..27].copy_from_slice(&[0.2, 0.0, 0.25, 0.0, 0.0, 1500.0, 0.0, 0.0, 0.0, 1500.0]);
        x
    }

    #[test]
    fn test_vector_round_trip() {
        let x = sample_vector();
        let (params, status) = ModelParameters::from_vector(&x).unwrap();
        assert_eq!(status, CholeskyStatus::Exact);
        assert_eq!(params.coeffs_a[0], 9.21);
        assert_eq!(params.coeffs_home[0], 17750.0);
        assert_eq!(params.shocks_cholesky[2][2], 1500.0);
        assert_eq!(params.to_vector(), x);
    }

    #[test]
    fn test_negative_level_truncated() {
        let mut x = sample_vector();
        x[0] = -0.3;
        let (params, _) = ModelParameters::from_vector(&x).unwrap();
        assert_eq!(params.level, 0.0);
    }

    #[test]
    fn test_wrong_length_rejected() {
        let err = ModelParameters::from_vector(&[0.0; 5]).unwrap_err();
        assert_eq!(
            err,
            ConfigError::ParameterLength {
                expected: NUM_PARAMETERS,
                actual: 5
            }
        );
    }

    #[test]
    fn test_tiny_diagonal_is_floored() {
        let mut lower = [0.0; 10];
        lower[0] = 0.5;
        lower[2] = 1e-6;
        let (chol, status) = cholesky_from_lower(&lower);
        assert_eq!(status, CholeskyStatus::Adjusted);
        assert_eq!(chol[0][0], 0.5);
        assert_eq!(chol[1][1], TINY_FLOAT.sqrt());
        assert_eq!(chol[2][2], TINY_FLOAT.sqrt());
        assert_eq!(chol[3][3], TINY_FLOAT.sqrt());
    }

    #[test]
    fn test_zero_factor_is_legal() {
        let (chol, status) = cholesky_from_lower(&[0.0; 10]);
        assert_eq!(status, CholeskyStatus::Exact);
        assert!(chol.iter().flatten().all(|&v| v == 0.0));
    }

    #[test]
    fn test_shock_coefficients() {
        let (params, _) = ModelParameters::from_vector(&sample_vector()).unwrap();
        let coeffs = params.shock_coefficients();
        assert!((coeffs[0] - 0.2).abs() < 1e-12);
        assert!((coeffs[4] - 0.25).abs() < 1e-12);
        assert!((coeffs[7] - 1500.0).abs() < 1e-9);
        assert!((coeffs[9] - 1500.0).abs() < 1e-9);
        assert_eq!(coeffs[1], 0.0);
    }

    #[test]
    fn test_upper_triangle_rejected() {
        let (mut params, _) = ModelParameters::from_vector(&sample_vector()).unwrap();
        params.shocks_cholesky[0][3] = 0.1;
        assert!(matches!(
            params.validate(),
            Err(ConfigError::NotLowerTriangular { row: 0, col: 3, .. })
        ));
    }
}
