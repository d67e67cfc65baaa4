//! Emission list & decay engine (component C9, external collaborator).
//!
//! The decay engine itself is out of scope; only the operations the
//! tracker and the collimator tracker call on it are specified here, so
//! both can execute a real (non-forced) interaction without depending on
//! how decays, pair emission or non-collinearity are modeled.

use crate::photon::Photon;
use crate::voxel::MatIndex;

/// The interaction-execution side of the decay/emission engine.
///
/// `do_compton` and `do_coherent` are expected to mutate `photon.dir` and
/// `photon.energy_kev` in place (sampling a true Klein-Nishina angle, or a
/// material's coherent-angle distribution, respectively) and to call
/// [`Photon::register_scatter`] themselves since only they know whether
/// this is the photon's first scatter.
pub trait EmissionList {
    /// Executes a real Compton scatter: samples a new direction via the
    /// Klein-Nishina kernel and updates the photon's energy accordingly.
    fn do_compton(&self, photon: &mut Photon);

    /// Executes a coherent scatter in material `mat_idx`: samples a theta
    /// from the material oracle and rotates the photon's direction by it.
    fn do_coherent(&self, photon: &mut Photon, mat_idx: MatIndex);

    /// Called when a photon reaches a detectable exit; opaque to the
    /// tracker beyond "this photon is now handed to scoring".
    fn do_detection(&self, photon: &Photon);
}
