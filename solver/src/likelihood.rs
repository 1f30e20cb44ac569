//! Aggregation of per-agent likelihood contributions.

use serde::Serialize;

use crate::constants::HUGE_FLOAT;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct LikelihoodValue {
    /// Negative mean log contribution.
    pub criterion: f64,
    /// Contributions whose logarithm had to be clipped to `±HUGE_FLOAT`.
    pub num_clipped: usize,
}

/// `−mean(clip(ln c, −HUGE_FLOAT, HUGE_FLOAT))` over all contributions.
///
/// Zero-probability agents would send the criterion to infinity; their log
/// contribution is clipped instead and counted, and a warning is logged.
pub fn log_likelihood_criterion(contribs: &[f64]) -> LikelihoodValue {
    if contribs.is_empty() {
        return LikelihoodValue {
            criterion: 0.0,
            num_clipped: 0,
        };
    }
    let mut num_clipped = 0;
    let mut sum = 0.0;
    for &c in contribs {
        let log_c = c.ln();
        if !(log_c.abs() <= HUGE_FLOAT) || c.abs() > HUGE_FLOAT {
            num_clipped += 1;
        }
        sum += if log_c.is_nan() {
            -HUGE_FLOAT
        } else {
            log_c.clamp(-HUGE_FLOAT, HUGE_FLOAT)
        };
    }
    if num_clipped > 0 {
        tracing::warn!(num_clipped, total = contribs.len(), "likelihood contributions truncated");
    }
    LikelihoodValue {
        criterion: -sum / contribs.len() as f64,
        num_clipped,
    }
}
