//! Symmetric positive-definite solves on `ndarray` matrices.
//!
//! Every system the solver factorizes is symmetric positive definite: shock
//! covariances, the BFGS Hessian of the worst-case search and the normal
//! equations of the interpolation regression. They all go through faer's
//! Cholesky (LLᵀ) factorization; callers convert singularity into their own
//! fallback (block covariance, identity Hessian, ridge regression).

use faer::linalg::solvers::{Llt, Solve};
use faer::{Mat, Side};
use ndarray::{Array1, Array2};

/// Reduced pivots below this fraction of the original diagonal count as singular.
const PIVOT_EPS: f64 = 1.0e-12;

fn to_faer(a: &Array2<f64>) -> Mat<f64> {
    Mat::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

/// Cholesky factorization of a symmetric positive-definite matrix.
pub struct Cholesky {
    factor: Llt<f64>,
    dim: usize,
    log_det: f64,
}

impl Cholesky {
    /// Factorize `a`, or `None` when it is not numerically positive definite.
    pub fn new(a: &Array2<f64>) -> Option<Self> {
        let dim = a.nrows();
        if dim == 0 || dim != a.ncols() || a.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let factor = Llt::new(to_faer(a).as_ref(), Side::Lower).ok()?;
        let lower = factor.L();
        let mut log_det = 0.0;
        for i in 0..dim {
            let pivot = lower[(i, i)] * lower[(i, i)];
            if !(pivot > PIVOT_EPS * a[[i, i]].abs()) {
                return None;
            }
            log_det += pivot.ln();
        }
        Some(Self {
            factor,
            dim,
            log_det,
        })
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    /// `ln det A`.
    pub fn log_determinant(&self) -> f64 {
        self.log_det
    }

    /// Solve `A · x = b`.
    pub fn solve_vec(&self, b: &Array1<f64>) -> Array1<f64> {
        let rhs = Mat::from_fn(self.dim, 1, |i, _| b[i]);
        let x = self.factor.solve(rhs.as_ref());
        Array1::from_shape_fn(self.dim, |i| x[(i, 0)])
    }

    /// `A⁻¹`, solved column by column against the identity.
    pub fn inverse(&self) -> Array2<f64> {
        let eye = Mat::<f64>::identity(self.dim, self.dim);
        let x = self.factor.solve(eye.as_ref());
        Array2::from_shape_fn((self.dim, self.dim), |(i, j)| x[(i, j)])
    }
}

/// Solve `a · x = b` for symmetric positive-definite `a`.
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    Cholesky::new(a).map(|chol| chol.solve_vec(b))
}

/// Convert a fixed-size 4×4 array into an `ndarray` matrix.
pub fn from_4x4(m: &[[f64; 4]; 4]) -> Array2<f64> {
    Array2::from_shape_fn((4, 4), |(i, j)| m[i][j])
}
