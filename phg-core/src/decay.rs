//! Decay data model (§3). The decay source itself (C9) is an external
//! collaborator; this module only defines the record it emits.

use crate::geom::Position;

/// What kind of emission a [`Decay`] produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecayKind {
    /// PET positron annihilation: two back-to-back photons.
    Positron,
    /// SPECT single-photon emission.
    SinglePhoton,
    /// An isotope with more than one emitted photon per decay.
    MultiEmission,
}

/// One radioactive decay event.
#[derive(Clone, Copy, Debug)]
pub struct Decay {
    pub pos: Position,
    pub start_weight: f64,
    /// Nanoseconds since scan start.
    pub decay_time_ns: f64,
    pub kind: DecayKind,
}
