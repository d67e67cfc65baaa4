//! Math/RNG core (component C1).
//!
//! A 32-bit Mersenne Twister (period 2^19937 - 1) feeds every sampling
//! routine in the simulation: uniform draws, the double-precision 53-bit
//! draw, the exponential free-path sampler and the Box-Muller Gaussian
//! sampler. State is explicit and serializable so a worker can checkpoint
//! and resume a substream (see [`RngState`]).

use crate::error::{PhgError, PhgResult};
use log::error;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

const N: usize = 624;
const M: usize = 397;
const MATRIX_A: u32 = 0x9908_b0df;
const UPPER_MASK: u32 = 0x8000_0000;
const LOWER_MASK: u32 = 0x7fff_ffff;

/// The full, checkpointable state of one RNG substream.
///
/// Mirrors the persisted layout described in the configuration surface:
/// the 624-word Mersenne Twister state array plus the current read index.
#[derive(Clone, Serialize, Deserialize)]
pub struct RngState {
    mt: [u32; N],
    index: usize,
    /// Cached second Box-Muller deviate, if one is pending.
    gauss_cache: Option<f64>,
}

/// Self-describing header written ahead of any persisted RNG/history blob.
///
/// Compatibility between reader and writer is decided by `kind` and
/// `version`, not by size alone.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistHeader {
    pub size: u64,
    pub kind: PersistKind,
    pub version: String,
}

/// Discriminates what a persisted blob contains.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PersistKind {
    RngState,
    History,
}

impl PersistHeader {
    pub fn for_rng_state(payload_size: u64) -> Self {
        PersistHeader {
            size: payload_size,
            kind: PersistKind::RngState,
            version: "1.00".to_string(),
        }
    }
}

/// A seedable, serializable random number generator.
///
/// `uniform01` and `uniform01_dp` never return 0.0 or 1.0; a raw draw of 0
/// is resampled.
pub struct Rng {
    mt: [u32; N],
    index: usize,
    gauss_cache: Option<f64>,
}

impl Rng {
    /// Seeds the generator. Seeds `<= 0` are replaced by the system clock
    /// masked to 32 bits, so the effective seed is never negative.
    pub fn seed(from: i64) -> Self {
        let effective = if from <= 0 {
            let nanos = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_nanos())
                .unwrap_or(0);
            (nanos & 0xFFFF_FFFF) as u32
        } else {
            (from as u64 & 0xFFFF_FFFF) as u32
        };
        Self::seed_mt(effective)
    }

    fn seed_mt(seed: u32) -> Self {
        let mut mt = [0u32; N];
        mt[0] = seed;
        for i in 1..N {
            mt[i] = 1_812_433_253u32
                .wrapping_mul(mt[i - 1] ^ (mt[i - 1] >> 30))
                .wrapping_add(i as u32);
        }
        Rng {
            mt,
            index: N,
            gauss_cache: None,
        }
    }

    /// Dumps the current substream state for checkpointing.
    pub fn serialize_state(&self) -> RngState {
        RngState {
            mt: self.mt,
            index: self.index,
            gauss_cache: self.gauss_cache,
        }
    }

    /// Restores a substream from a previously serialized state.
    pub fn restore_state(state: RngState) -> Self {
        Rng {
            mt: state.mt,
            index: state.index,
            gauss_cache: state.gauss_cache,
        }
    }

    fn regenerate(&mut self) {
        for i in 0..N {
            let y = (self.mt[i] & UPPER_MASK) | (self.mt[(i + 1) % N] & LOWER_MASK);
            let mut next = self.mt[(i + M) % N] ^ (y >> 1);
            if y & 1 != 0 {
                next ^= MATRIX_A;
            }
            self.mt[i] = next;
        }
        self.index = 0;
    }

    fn next_u32(&mut self) -> u32 {
        if self.index >= N {
            self.regenerate();
        }
        let mut y = self.mt[self.index];
        self.index += 1;

        y ^= y >> 11;
        y ^= (y << 7) & 0x9d2c_5680;
        y ^= (y << 15) & 0xefc6_0000;
        y ^= y >> 18;
        y
    }

    /// A single-precision-equivalent draw in the open interval `(0, 1)`.
    pub fn uniform01(&mut self) -> f64 {
        loop {
            let raw = self.next_u32();
            if raw != 0 {
                return raw as f64 * (1.0 / 4_294_967_296.0);
            }
        }
    }

    /// A 53-bit double-precision draw in `(0, 1)`.
    pub fn uniform01_dp(&mut self) -> f64 {
        loop {
            let a = self.next_u32() >> 5;
            let b = self.next_u32() >> 6;
            let value = (a as f64 * 67_108_864.0 + b as f64) * (1.0 / 9_007_199_254_740_992.0);
            if value > 0.0 {
                return value;
            }
        }
    }

    /// Exponential free-path sample with mean 1: `-ln(1 - U)`.
    pub fn exp_free_paths(&mut self) -> f64 {
        -(1.0 - self.uniform01()).ln()
    }

    /// Gaussian sample via polar Box-Muller. The second deviate generated
    /// by each pair of draws is cached and returned, unscaled work aside,
    /// by the very next call instead of drawing fresh uniforms.
    pub fn gaussian(&mut self, mean: f64, sd: f64) -> f64 {
        if let Some(cached) = self.gauss_cache.take() {
            return mean + sd * cached;
        }
        let (u, v) = loop {
            let u = 2.0 * self.uniform01() - 1.0;
            let v = 2.0 * self.uniform01() - 1.0;
            let s = u * u + v * v;
            if s > 0.0 && s < 1.0 {
                let factor = (-2.0 * s.ln() / s).sqrt();
                break (u * factor, v * factor);
            }
        };
        self.gauss_cache = Some(v);
        mean + sd * u
    }
}

/// Result of [`solve_quadratic`]: the number of real roots and the
/// ordered roots (`min <= max`); `min`/`max` are only meaningful if
/// `nroots > 0`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QuadraticRoots {
    pub nroots: u8,
    pub min_root: f64,
    pub max_root: f64,
}

/// Solves `a*x^2 + b*x + c = 0` using the numerically stable form
/// `q = -0.5*(b + sign(b)*sqrt(delta))`, avoiding cancellation when `b`
/// and `sqrt(delta)` are close in magnitude and similarly signed.
pub fn solve_quadratic(a: f64, b: f64, c: f64) -> QuadraticRoots {
    if a == 0.0 {
        if b == 0.0 {
            return QuadraticRoots {
                nroots: 0,
                min_root: 0.0,
                max_root: 0.0,
            };
        }
        let root = c / (-b);
        return QuadraticRoots {
            nroots: 1,
            min_root: root,
            max_root: root,
        };
    }

    let delta = b * b - 4.0 * a * c;
    if delta < 0.0 {
        return QuadraticRoots {
            nroots: 0,
            min_root: 0.0,
            max_root: 0.0,
        };
    }

    let sign_b = if b < 0.0 { -1.0 } else { 1.0 };
    let q = -0.5 * (b + sign_b * delta.sqrt());

    let (r0, r1) = if q == 0.0 {
        (0.0, 0.0)
    } else {
        (q / a, c / q)
    };

    let (min_root, max_root) = if r0 <= r1 { (r0, r1) } else { (r1, r0) };
    QuadraticRoots {
        nroots: 2,
        min_root,
        max_root,
    }
}

/// Tolerant float comparison: `true` iff `|x - y| <= 10^abs_mag`, and, when
/// `per_mag != 0`, also `|x - y| / x <= 10^per_mag`.
pub fn approx_eq(x: f64, y: f64, abs_mag: i32, per_mag: i32) -> bool {
    let diff = (x - y).abs();
    let abs_tol = 10f64.powi(abs_mag);
    if diff > abs_tol {
        return false;
    }
    if per_mag != 0 {
        if x == 0.0 {
            return diff <= abs_tol;
        }
        let per_tol = 10f64.powi(per_mag);
        diff / x.abs() <= per_tol
    } else {
        true
    }
}

/// Default tolerance used throughout the simulation for near-zero
/// discriminants and boundary comparisons.
pub const APPROX_EQ_TOLERANCE: i32 = -7;

pub fn load_rng_state(bytes: &[u8]) -> PhgResult<RngState> {
    bincode::deserialize(bytes).map_err(|e| {
        error!("corrupt rng state ({} bytes): {e}", bytes.len());
        PhgError::RuntimeInvariant(format!("corrupt rng state: {e}"))
    })
}

pub fn dump_rng_state(state: &RngState) -> PhgResult<Vec<u8>> {
    bincode::serialize(state).map_err(|e| {
        error!("failed to serialize rng state: {e}");
        PhgError::RuntimeInvariant(format!("failed to serialize rng state: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn uniform01_strictly_in_open_interval() {
        let mut rng = Rng::seed(42);
        for _ in 0..1_000_000 {
            let u = rng.uniform01();
            assert!(u > 0.0 && u < 1.0);
        }
    }

    #[test]
    fn uniform01_dp_strictly_in_open_interval() {
        let mut rng = Rng::seed(7);
        for _ in 0..100_000 {
            let u = rng.uniform01_dp();
            assert!(u > 0.0 && u < 1.0);
        }
    }

    #[test]
    fn serialize_restore_roundtrips_future_draws() {
        let mut rng = Rng::seed(123);
        // Burn some draws so mt/index/cache are non-trivial.
        for _ in 0..1000 {
            rng.uniform01();
        }
        rng.gaussian(0.0, 1.0);
        let state = rng.serialize_state();

        let expected: Vec<f64> = (0..1000).map(|_| rng.uniform01()).collect();

        let mut restored = Rng::restore_state(state);
        let actual: Vec<f64> = (0..1000).map(|_| restored.uniform01()).collect();

        assert_eq!(expected, actual);
    }

    #[test]
    fn rng_state_binary_roundtrip() {
        let mut rng = Rng::seed(9);
        for _ in 0..10 {
            rng.uniform01();
        }
        let state = rng.serialize_state();
        let bytes = dump_rng_state(&state).unwrap();
        let restored_state = load_rng_state(&bytes).unwrap();
        let mut a = Rng::restore_state(state);
        let mut b = Rng::restore_state(restored_state);
        for _ in 0..100 {
            assert_eq!(a.uniform01(), b.uniform01());
        }
    }

    #[test]
    fn seed_nonpositive_falls_back_to_clock() {
        // Two back-to-back clock-seeded RNGs should not panic and should
        // produce values in range; we cannot assert they differ (the clock
        // may alias), only that seeding never yields a negative effective
        // seed (checked implicitly: the generator does not panic).
        let mut rng = Rng::seed(0);
        let _ = rng.uniform01();
        let mut rng2 = Rng::seed(-5);
        let _ = rng2.uniform01();
    }

    #[test]
    fn gaussian_caches_second_deviate() {
        let mut rng = Rng::seed(55);
        let _first = rng.gaussian(0.0, 1.0);
        assert!(rng.gauss_cache.is_some());
        let cached = rng.gauss_cache.unwrap();
        let second = rng.gaussian(0.0, 1.0);
        assert_eq!(second, cached);
        assert!(rng.gauss_cache.is_none());
    }

    proptest! {
        #[test]
        fn quadratic_negative_discriminant_has_no_roots(
            a in -1000.0..1000.0f64,
            b in -1000.0..1000.0f64,
            c in -1000.0..1000.0f64,
        ) {
            prop_assume!(a != 0.0);
            let delta = b * b - 4.0 * a * c;
            prop_assume!(delta < 0.0);
            let roots = solve_quadratic(a, b, c);
            prop_assert_eq!(roots.nroots, 0);
        }

        #[test]
        fn quadratic_roots_satisfy_equation(
            a in -1000.0..1000.0f64,
            b in -1000.0..1000.0f64,
            c in -1000.0..1000.0f64,
        ) {
            prop_assume!(a != 0.0);
            let delta = b * b - 4.0 * a * c;
            prop_assume!(delta >= 0.0);
            let roots = solve_quadratic(a, b, c);
            prop_assert!(roots.nroots >= 1);
            prop_assert!(roots.min_root <= roots.max_root);
            let residual_min = a * roots.min_root * roots.min_root + b * roots.min_root + c;
            let residual_max = a * roots.max_root * roots.max_root + b * roots.max_root + c;
            prop_assert!(residual_min.abs() < 1e-4 || residual_min.abs() < 1e-4 * a.abs().max(1.0));
            prop_assert!(residual_max.abs() < 1e-4 || residual_max.abs() < 1e-4 * a.abs().max(1.0));
        }
    }

    #[test]
    fn approx_eq_absolute_only() {
        assert!(approx_eq(1.0, 1.0 + 1e-8, -7, 0));
        assert!(!approx_eq(1.0, 1.1, -7, 0));
    }

    #[test]
    fn approx_eq_relative_guard() {
        assert!(approx_eq(1000.0, 1000.0 + 1e-5, -7, -6));
        assert!(!approx_eq(1000.0, 1001.0, -7, -6));
    }
}
