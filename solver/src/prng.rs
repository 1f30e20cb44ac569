//! Reproducible random streams.
//!
//! Every consumer of randomness (EMAX draws per period, interpolation subsets
//! per period, simulated agents) gets its own stream whose seed is derived from
//! the user seed and a stream identifier through a 64-bit avalanche mix.
//! Streams never depend on thread count or scheduling order.
//!
//! Normal deviates use the Box–Muller transform on `rand` uniforms, consumed in
//! pairs, so the first n values of a stream do not depend on how many values
//! are drawn afterwards.

use std::f64::consts::PI;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Stream tags keep the solution, interpolation and simulation streams disjoint.
pub const STREAM_EMAX: u64 = 0x01;
pub const STREAM_INTERPOLATION: u64 = 0x02;
pub const STREAM_SIMULATION: u64 = 0x03;

/// Odd constant separating the seed, tag and index words before mixing.
const WEYL: u64 = 0x9e37_79b9_7f4a_7c15;

/// 64-bit avalanche finalizer (MurmurHash3 `fmix64`).
#[inline]
fn mix64(mut z: u64) -> u64 {
    z ^= z >> 33;
    z = z.wrapping_mul(0xff51_afd7_ed55_8ccd);
    z ^= z >> 33;
    z = z.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    z ^ (z >> 33)
}

/// Seed for sub-stream `index` of stream `tag` under the user seed.
pub fn derive_seed(seed: u64, tag: u64, index: u64) -> u64 {
    let stream = mix64(seed.wrapping_add(WEYL.wrapping_mul(tag)));
    mix64(stream ^ index.wrapping_add(1).wrapping_mul(WEYL))
}

/// Independent RNG for sub-stream `index` of stream `tag`.
pub fn stream_rng(seed: u64, tag: u64, index: u64) -> StdRng {
    StdRng::seed_from_u64(derive_seed(seed, tag, index))
}

/// Two independent standard normal deviates (Box–Muller).
#[inline]
pub fn standard_normal_pair<R: Rng>(rng: &mut R) -> (f64, f64) {
    // 1 - U lies in (0, 1], so the logarithm is finite.
    let u1: f64 = 1.0 - rng.random::<f64>();
    let u2: f64 = rng.random::<f64>();
    let r = (-2.0 * u1.ln()).sqrt();
    let theta = 2.0 * PI * u2;
    (r * theta.cos(), r * theta.sin())
}

/// Draw a 4-vector of independent standard normals.
#[inline]
pub fn standard_normal_4<R: Rng>(rng: &mut R) -> [f64; 4] {
    let (z0, z1) = standard_normal_pair(rng);
    let (z2, z3) = standard_normal_pair(rng);
    [z0, z1, z2, z3]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbouring_indices_differ_in_many_bits() {
        for index in 0..64u64 {
            let a = derive_seed(456, STREAM_EMAX, index);
            let b = derive_seed(456, STREAM_EMAX, index + 1);
            let flipped = (a ^ b).count_ones();
            assert!((16..=48).contains(&flipped), "index {}: {} bits", index, flipped);
        }
        assert_eq!(mix64(0), 0);
        assert_ne!(derive_seed(0, STREAM_EMAX, 0), 0);
    }

    #[test]
    fn test_derived_seeds_are_distinct() {
        let a = derive_seed(7, STREAM_EMAX, 0);
        let b = derive_seed(7, STREAM_EMAX, 1);
        let c = derive_seed(7, STREAM_SIMULATION, 0);
        let d = derive_seed(8, STREAM_EMAX, 0);
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);
        assert_eq!(a, derive_seed(7, STREAM_EMAX, 0));
    }

    #[test]
    fn test_standard_normal_moments() {
        let mut rng = stream_rng(42, STREAM_EMAX, 0);
        let n = 50_000;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for _ in 0..n {
            for z in standard_normal_4(&mut rng) {
                assert!(z.is_finite());
                sum += z;
                sum_sq += z * z;
            }
        }
        let count = (4 * n) as f64;
        let mean = sum / count;
        let var = sum_sq / count - mean * mean;
        assert!(mean.abs() < 0.01, "mean={}", mean);
        assert!((var - 1.0).abs() < 0.02, "var={}", var);
    }
}
