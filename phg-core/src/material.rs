//! Material oracle (component C3, external collaborator). Given a material
//! id and energy, answers the queries the tracker needs to decide free
//! paths and interaction types. Two instances are normally held — one for
//! the object, one for the tomograph (collimator/detector) — sharing this
//! same interface.

use crate::voxel::MatIndex;

/// Oracle for linear attenuation and interaction-type probabilities.
///
/// Implementations are expected to be cheap to call (table lookups /
/// interpolation) since they sit on the hot path of every tracking step.
pub trait MaterialOracle: Send + Sync {
    /// Linear attenuation coefficient `mu` (1/cm) for `mat_idx` at `energy`
    /// keV.
    fn attenuation(&self, mat_idx: MatIndex, energy_kev: f64) -> f64;

    /// Probability that a photon of `energy_kev` in `mat_idx` scatters
    /// (Compton or, if `model_coherent`, coherent) rather than passing
    /// through without interaction.
    fn prob_scatter(&self, mat_idx: MatIndex, energy_kev: f64, model_coherent: bool) -> f64;

    /// Conditional probability of Compton (vs. coherent) scatter, given
    /// that a scatter occurs.
    fn prob_compton_conditional(&self, mat_idx: MatIndex, energy_kev: f64, model_coherent: bool) -> f64;

    /// Samples a coherent scattering angle (radians) for `mat_idx` at
    /// `energy_kev`.
    fn sample_coherent_theta(&self, mat_idx: MatIndex, energy_kev: f64, u: f64) -> f64;
}
