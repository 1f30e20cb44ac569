//! Small-dimensional constrained minimization.
//!
//! The ambiguity engine solves, for every state, a problem of the form
//!
//! ```text
//! min f(x)   s.t.   c(x) = 0   or   c(x) ≥ 0
//! ```
//!
//! with a single scalar constraint, x ∈ ℝⁿ (n = 2 in practice) and x₀ = 0.
//! The problem is described by [`ConstrainedProblem`]; strategies implement
//! [`ConstrainedMinimizer`]. Two strategies exist:
//!
//! | Strategy | Method |
//! |----------|--------|
//! | [`Slsqp`] | SQP: one-constraint KKT step, damped BFGS Lagrangian Hessian, ℓ₁ merit backtracking |
//! | [`NelderMead`] | simplex search on `f + ρ·violation²` with an increasing penalty schedule |
//!
//! Gradients default to forward differences with step `eps`.

use ndarray::{Array1, Array2};

use crate::config::{OptimizerKind, OptimizerOptions};
use crate::linalg;

/// Type of the single scalar constraint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstraintKind {
    /// `c(x) = 0`
    Equality,
    /// `c(x) ≥ 0`
    Inequality,
}

impl ConstraintKind {
    /// Non-negative constraint violation.
    #[inline]
    pub fn violation(self, c: f64) -> f64 {
        match self {
            ConstraintKind::Equality => c.abs(),
            ConstraintKind::Inequality => (-c).max(0.0),
        }
    }
}

/// A smooth objective with one scalar constraint.
pub trait ConstrainedProblem {
    fn dim(&self) -> usize;

    fn objective(&self, x: &[f64]) -> f64;

    fn constraint(&self, x: &[f64]) -> f64;

    fn constraint_kind(&self) -> ConstraintKind;

    /// Gradient of the objective; `fx` is `objective(x)`.
    fn gradient(&self, x: &[f64], fx: f64, eps: f64) -> Vec<f64> {
        forward_difference(|y| self.objective(y), x, fx, eps)
    }

    /// Gradient of the constraint; `cx` is `constraint(x)`.
    fn constraint_gradient(&self, x: &[f64], cx: f64, eps: f64) -> Vec<f64> {
        forward_difference(|y| self.constraint(y), x, cx, eps)
    }
}

/// Outcome of a constrained minimization.
#[derive(Clone, Debug, PartialEq)]
pub struct Minimum {
    /// The solution when `converged`, otherwise the best iterate found.
    pub x: Vec<f64>,
    pub fun: f64,
    /// Constraint value at `x`.
    pub constraint: f64,
    pub converged: bool,
    pub iterations: usize,
    pub message: &'static str,
}

pub trait ConstrainedMinimizer {
    fn minimize(&self, problem: &dyn ConstrainedProblem, x0: &[f64]) -> Minimum;
}

/// One-sided finite-difference gradient.
pub fn forward_difference<F: Fn(&[f64]) -> f64>(f: F, x: &[f64], fx: f64, eps: f64) -> Vec<f64> {
    let mut y = x.to_vec();
    let mut grad = vec![0.0; x.len()];
    for i in 0..x.len() {
        y[i] = x[i] + eps;
        grad[i] = (f(&y) - fx) / eps;
        y[i] = x[i];
    }
    grad
}

/// Tracks the best point seen so far: feasible points beat infeasible ones,
/// then lower objective (feasible) or lower violation (infeasible).
struct BestPoint {
    x: Vec<f64>,
    fun: f64,
    constraint: f64,
    violation: f64,
}

impl BestPoint {
    fn new(x: &[f64], fun: f64, constraint: f64, violation: f64) -> Self {
        Self {
            x: x.to_vec(),
            fun,
            constraint,
            violation,
        }
    }

    fn offer(&mut self, x: &[f64], fun: f64, constraint: f64, violation: f64, feas_tol: f64) {
        if !fun.is_finite() {
            return;
        }
        let self_feasible = self.violation <= feas_tol;
        let new_feasible = violation <= feas_tol;
        let better = match (self_feasible, new_feasible) {
            (false, true) => true,
            (true, false) => false,
            (true, true) => fun < self.fun,
            (false, false) => violation < self.violation,
        };
        if better || !self.fun.is_finite() {
            *self = Self::new(x, fun, constraint, violation);
        }
    }

    fn finish(self, converged: bool, iterations: usize, message: &'static str) -> Minimum {
        Minimum {
            x: self.x,
            fun: self.fun,
            constraint: self.constraint,
            converged,
            iterations,
            message,
        }
    }
}

// ── SQP ─────────────────────────────────────────────────────────────────

/// Sequential quadratic programming for one scalar constraint.
#[derive(Clone, Debug, PartialEq)]
pub struct Slsqp {
    pub max_iter: usize,
    /// Converged when the objective changes by less than `ftol · max(1, |f|)`
    /// at a feasible point.
    pub ftol: f64,
    /// Finite-difference step.
    pub eps: f64,
}

/// Armijo sufficient-decrease constant for the merit line search.
const ARMIJO_C: f64 = 1.0e-4;
/// Smallest step length tried before the line search gives up.
const MIN_STEP: f64 = 1.0e-10;

impl Slsqp {
    fn feasibility_tol(&self) -> f64 {
        self.ftol.sqrt()
    }
}

impl ConstrainedMinimizer for Slsqp {
    fn minimize(&self, problem: &dyn ConstrainedProblem, x0: &[f64]) -> Minimum {
        let n = problem.dim();
        let kind = problem.constraint_kind();
        let feas_tol = self.feasibility_tol();

        let mut x = Array1::from(x0.to_vec());
        let mut f = problem.objective(x0);
        let mut c = problem.constraint(x0);
        let mut g = Array1::from(problem.gradient(x0, f, self.eps));
        let mut a = Array1::from(problem.constraint_gradient(x0, c, self.eps));
        let mut hess = Array2::<f64>::eye(n);
        let mut scaled = false;
        let mut mu = 0.0_f64;
        let mut best = BestPoint::new(x0, f, c, kind.violation(c));

        for iter in 1..=self.max_iter {
            let (d, lambda) = match qp_step(&hess, &g, &a, c, kind) {
                Some(step) => step,
                None => {
                    // Curvature estimate lost definiteness: restart from the identity.
                    hess = Array2::eye(n);
                    match qp_step(&hess, &g, &a, c, kind) {
                        Some(step) => step,
                        None => return best.finish(false, iter, "singular QP subproblem"),
                    }
                }
            };

            // Powell's rule, with a margin so the ℓ₁ merit has strict descent.
            let target = 2.0 * lambda.abs();
            mu = target.max(0.5 * (mu + target));
            let merit = |fv: f64, cv: f64| fv + mu * kind.violation(cv);
            let merit0 = merit(f, c);
            let slope = g.dot(&d) - mu * kind.violation(c);

            let mut alpha = 1.0;
            let (x_new, f_new, c_new) = loop {
                let trial = &x + &(&d * alpha);
                let trial_vec = trial.to_vec();
                let ft = problem.objective(&trial_vec);
                let ct = problem.constraint(&trial_vec);
                let mt = merit(ft, ct);
                if mt.is_finite() && mt <= merit0 + ARMIJO_C * alpha * slope.min(0.0) {
                    break (trial, ft, ct);
                }
                alpha *= 0.5;
                if alpha < MIN_STEP {
                    // A vanishing step at a feasible point is a stationary point.
                    if kind.violation(c) <= feas_tol && d.dot(&d).sqrt() <= self.eps.sqrt() {
                        return Minimum {
                            x: x.to_vec(),
                            fun: f,
                            constraint: c,
                            converged: true,
                            iterations: iter,
                            message: "optimization terminated successfully",
                        };
                    }
                    return best.finish(false, iter, "line search failed");
                }
            };

            let x_new_vec = x_new.to_vec();
            best.offer(&x_new_vec, f_new, c_new, kind.violation(c_new), feas_tol);

            let f_tol = self.ftol * f.abs().max(1.0);
            if (f_new - f).abs() < f_tol && kind.violation(c_new) <= feas_tol {
                return Minimum {
                    x: x_new_vec,
                    fun: f_new,
                    constraint: c_new,
                    converged: true,
                    iterations: iter,
                    message: "optimization terminated successfully",
                };
            }

            let g_new = Array1::from(problem.gradient(&x_new_vec, f_new, self.eps));
            let a_new = Array1::from(problem.constraint_gradient(&x_new_vec, c_new, self.eps));

            // Damped BFGS update of the Lagrangian Hessian.
            let s = &x_new - &x;
            let y = (&g_new - &(&a_new * lambda)) - (&g - &(&a * lambda));
            if !scaled {
                let sy = s.dot(&y);
                let yy = y.dot(&y);
                if sy > 0.0 && yy > 0.0 {
                    hess = Array2::eye(n) * (yy / sy);
                }
                scaled = true;
            }
            bfgs_update(&mut hess, &s, &y);

            x = x_new;
            f = f_new;
            c = c_new;
            g = g_new;
            a = a_new;
        }

        best.finish(false, self.max_iter, "iteration limit reached")
    }
}

/// Solve the QP `min ½dᵀBd + gᵀd` subject to the linearized constraint.
///
/// Returns the step and the multiplier λ (Lagrangian `f − λc`).
fn qp_step(
    hess: &Array2<f64>,
    g: &Array1<f64>,
    a: &Array1<f64>,
    c: f64,
    kind: ConstraintKind,
) -> Option<(Array1<f64>, f64)> {
    let binv_g = linalg::solve_spd(hess, g)?;
    let unconstrained = -&binv_g;
    if kind == ConstraintKind::Inequality && c + a.dot(&unconstrained) >= 0.0 {
        return Some((unconstrained, 0.0));
    }
    let binv_a = linalg::solve_spd(hess, a)?;
    let denom = a.dot(&binv_a);
    if denom.abs() < 1.0e-14 {
        return Some((unconstrained, 0.0));
    }
    let lambda = (a.dot(&binv_g) - c) / denom;
    let d = &binv_a * lambda - &binv_g;
    if !d.iter().all(|v| v.is_finite()) {
        return None;
    }
    Some((d, lambda))
}

/// BFGS update with Powell damping, which keeps the estimate positive definite.
fn bfgs_update(hess: &mut Array2<f64>, s: &Array1<f64>, y: &Array1<f64>) {
    let bs = hess.dot(s);
    let sbs = s.dot(&bs);
    if sbs <= 1.0e-16 {
        return;
    }
    let sy = s.dot(y);
    let r = if sy >= 0.2 * sbs {
        y.clone()
    } else {
        let theta = 0.8 * sbs / (sbs - sy);
        y * theta + &bs * (1.0 - theta)
    };
    let sr = s.dot(&r);
    if sr <= 1.0e-16 {
        return;
    }
    let n = s.len();
    for i in 0..n {
        for j in 0..n {
            hess[[i, j]] += r[i] * r[j] / sr - bs[i] * bs[j] / sbs;
        }
    }
}

// ── Nelder–Mead ─────────────────────────────────────────────────────────

/// Derivative-free simplex search on a quadratic-penalty objective.
#[derive(Clone, Debug, PartialEq)]
pub struct NelderMead {
    /// Iteration cap per penalty round.
    pub max_iter: usize,
    pub ftol: f64,
    /// Edge length of the initial simplex.
    pub initial_step: f64,
}

/// Penalty weights, relative to `max(1, |f(x₀)|)`.
const PENALTY_SCHEDULE: [f64; 4] = [1.0e1, 1.0e3, 1.0e5, 1.0e7];

impl ConstrainedMinimizer for NelderMead {
    fn minimize(&self, problem: &dyn ConstrainedProblem, x0: &[f64]) -> Minimum {
        let kind = problem.constraint_kind();
        let feas_tol = self.ftol.sqrt();
        let f0 = problem.objective(x0);
        let c0 = problem.constraint(x0);
        let scale = f0.abs().max(1.0);
        let mut last = BestPoint::new(x0, f0, c0, kind.violation(c0));

        let mut start = x0.to_vec();
        let mut iterations = 0;
        let mut inner_converged = false;
        for weight in PENALTY_SCHEDULE {
            let rho = weight * scale;
            let penalized = |x: &[f64]| {
                let v = kind.violation(problem.constraint(x));
                problem.objective(x) + rho * v * v
            };
            let (x, iters, ok) = self.simplex(&penalized, &start);
            iterations += iters;
            inner_converged = ok;
            let f = problem.objective(&x);
            let c = problem.constraint(&x);
            last = BestPoint::new(&x, f, c, kind.violation(c));
            start = x;
            if kind.violation(c) <= feas_tol * 1.0e-2 {
                break;
            }
        }

        let converged = inner_converged && last.violation <= feas_tol;
        let message = if converged {
            "optimization terminated successfully"
        } else {
            "penalty search did not reach a feasible optimum"
        };
        last.finish(converged, iterations, message)
    }
}

impl NelderMead {
    /// Unconstrained simplex search. Returns (best vertex, iterations, converged).
    fn simplex<F: Fn(&[f64]) -> f64>(&self, f: &F, x0: &[f64]) -> (Vec<f64>, usize, bool) {
        let n = x0.len();
        let mut vertices: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
        vertices.push(x0.to_vec());
        for i in 0..n {
            let mut v = x0.to_vec();
            v[i] += self.initial_step.max(0.05 * x0[i].abs());
            vertices.push(v);
        }
        let mut values: Vec<f64> = vertices.iter().map(|v| finite_or_huge(f(v))).collect();

        for iter in 1..=self.max_iter {
            let mut order: Vec<usize> = (0..=n).collect();
            order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
            vertices = order.iter().map(|&i| vertices[i].clone()).collect();
            values = order.iter().map(|&i| values[i]).collect();

            let spread = values[n] - values[0];
            let diameter = vertices[1..]
                .iter()
                .flat_map(|v| v.iter().zip(&vertices[0]).map(|(a, b)| (a - b).abs()))
                .fold(0.0, f64::max);
            if spread.abs() <= self.ftol && diameter <= self.ftol.sqrt() {
                return (vertices.swap_remove(0), iter, true);
            }

            let centroid: Vec<f64> = (0..n)
                .map(|k| vertices[..n].iter().map(|v| v[k]).sum::<f64>() / n as f64)
                .collect();
            let along = |t: f64| -> Vec<f64> {
                centroid
                    .iter()
                    .zip(&vertices[n])
                    .map(|(c, w)| c + t * (w - c))
                    .collect()
            };

            let reflected = along(-1.0);
            let fr = finite_or_huge(f(&reflected));
            if fr < values[0] {
                let expanded = along(-2.0);
                let fe = finite_or_huge(f(&expanded));
                if fe < fr {
                    vertices[n] = expanded;
                    values[n] = fe;
                } else {
                    vertices[n] = reflected;
                    values[n] = fr;
                }
                continue;
            }
            if fr < values[n - 1] {
                vertices[n] = reflected;
                values[n] = fr;
                continue;
            }

            let (contracted, fc) = if fr < values[n] {
                let p = along(-0.5);
                let fp = finite_or_huge(f(&p));
                (p, fp)
            } else {
                let p = along(0.5);
                let fp = finite_or_huge(f(&p));
                (p, fp)
            };
            if fc < values[n].min(fr) {
                vertices[n] = contracted;
                values[n] = fc;
                continue;
            }

            // Shrink towards the best vertex.
            for i in 1..=n {
                let shrunk: Vec<f64> = vertices[i]
                    .iter()
                    .zip(&vertices[0])
                    .map(|(v, b)| b + 0.5 * (v - b))
                    .collect();
                values[i] = finite_or_huge(f(&shrunk));
                vertices[i] = shrunk;
            }
        }

        let best = (0..=n)
            .min_by(|&i, &j| values[i].total_cmp(&values[j]))
            .unwrap_or(0);
        (vertices.swap_remove(best), self.max_iter, false)
    }
}

#[inline]
fn finite_or_huge(v: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        f64::MAX
    }
}

// ── Strategy selection ──────────────────────────────────────────────────

/// The configured strategy, resolved once per solve.
#[derive(Clone, Debug, PartialEq)]
pub enum Minimizer {
    Slsqp(Slsqp),
    NelderMead(NelderMead),
}

impl Minimizer {
    pub fn from_options(options: &OptimizerOptions) -> Self {
        match options.kind {
            OptimizerKind::Slsqp => Minimizer::Slsqp(Slsqp {
                max_iter: options.max_iter,
                ftol: options.ftol,
                eps: options.eps,
            }),
            OptimizerKind::NelderMead => Minimizer::NelderMead(NelderMead {
                max_iter: options.max_iter,
                ftol: options.ftol,
                initial_step: 0.1,
            }),
        }
    }
}

impl ConstrainedMinimizer for Minimizer {
    fn minimize(&self, problem: &dyn ConstrainedProblem, x0: &[f64]) -> Minimum {
        match self {
            Minimizer::Slsqp(m) => m.minimize(problem, x0),
            Minimizer::NelderMead(m) => m.minimize(problem, x0),
        }
    }
}
