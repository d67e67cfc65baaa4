//! External-collaborator traits for the decay source and scoring sink
//! (§6): the per-decay loop calls through these but never implements
//! decay sampling or output formatting itself.

use phg_core::decay::Decay;
use phg_core::photon::Photon;
use phg_core::rng::Rng;

/// Emits the photon(s) of one decay: a single photon for SPECT, or a
/// blue/pink back-to-back pair for PET (with non-collinearity already
/// applied, and positron range already resolved via
/// [`phg_tracker::calc_range`] if the configuration calls for it — both
/// are the decay engine's responsibility, not the simulation loop's).
pub trait DecaySource: Send + Sync {
    /// Produces the next decay and its starting photon(s), or `None` once
    /// the configured decay budget is exhausted.
    fn next_decay(&self, rng: &mut Rng) -> Option<(Decay, Vec<Photon>)>;
}

/// Receives the photons that survived to detection from one decay,
/// already partitioned by their blue/pink tag. Opaque beyond the
/// contract: what happens to them (binning, history write) is not this
/// crate's concern.
pub trait ScoringSink: Send + Sync {
    fn score(&self, decay: &Decay, blue: &[Photon], pink: &[Photon]);
}
