//! Weight window (component C8): keeps a scatter photon's estimated
//! detected weight within `[minRatio, maxRatio] * scatter_target_weight`
//! by rouletting underweight photons and splitting overweight ones.

use log::debug;
use phg_core::rng::Rng;

/// `PHG_MAX_DETECTED_PHOTONS` in the system this design is grounded on:
/// the hard cap on photons detected from a single decay, which bounds
/// how far a split can be requested.
pub const MAX_DETECTED_PER_DECAY: usize = 50;

/// The outcome of [`apply_window`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum WindowDecision {
    Normal,
    /// Split into `n` forced-detection attempts, each at `weight / n`.
    Split(usize),
    /// Survived roulette; `scatter_weight` has already been renormalized.
    Rouletted { scatter_weight: f64 },
    Killed,
}

/// Applies the weight window to a photon whose current scatter weight is
/// `scatter_weight` and whose productivity-table cell is
/// `(slice_idx, angle_idx)`. `max_ratio` is the configured
/// `weight_window_ratio` (>= 1); `min_ratio` is its reciprocal.
pub fn apply_window(
    scatter_weight: f64,
    scatter_target_weight: f64,
    scat_productivity: f64,
    max_ratio: f64,
    rng: &mut Rng,
) -> WindowDecision {
    let min_ratio = 1.0 / max_ratio;
    let est_detected = scatter_weight * scat_productivity;

    if est_detected < min_ratio * scatter_target_weight {
        let p = est_detected / scatter_target_weight;
        if rng.uniform01() < p {
            debug!("weight window: roulette survived, renormalizing scatter weight by {:.3e}", scatter_target_weight / est_detected);
            WindowDecision::Rouletted {
                scatter_weight: scatter_weight * scatter_target_weight / est_detected,
            }
        } else {
            debug!("weight window: roulette killed a scatter at est_detected={est_detected:.3e}");
            WindowDecision::Killed
        }
    } else if est_detected > max_ratio * scatter_target_weight {
        let n = (est_detected / scatter_target_weight).floor() as usize;
        let n = n.min(MAX_DETECTED_PER_DECAY - 10);
        debug!("weight window: splitting an overweight scatter into {n} forced-detection attempts");
        WindowDecision::Split(n)
    } else {
        WindowDecision::Normal
    }
}
