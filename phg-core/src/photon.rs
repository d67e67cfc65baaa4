//! Photon tracking state (part of the data model, §3) and the shared
//! interaction decision policy consulted by both the photon tracker (C6)
//! and the MC PET collimator tracker (C10).

use crate::geom::{Direction, Position};
use crate::voxel::VoxelIndex;
use bitflags::bitflags;

bitflags! {
    /// Per-photon tag bits: PET coincidence color and whether the photon
    /// is currently tracked as a scatter (vs. a never-scattered primary).
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct PhotonFlags: u8 {
        const BLUE          = 0b0000_0001;
        const PINK          = 0b0000_0010;
        const TRACK_SCATTER = 0b0000_0100;
    }
}

/// A photon in its tracking form: position, direction, energy and the
/// bookkeeping the variance-reduction machinery needs.
///
/// `(x_idx, y_idx, slice_idx)` always point to the voxel containing `pos`
/// unless the photon is outside the object, in which case they hold the
/// last voxel visited. `current_weight` equals `primary_weight` while the
/// photon has never scattered, `scatter_weight` after its first scatter.
#[derive(Clone, Copy, Debug)]
pub struct Photon {
    pub pos: Position,
    pub dir: Direction,
    pub energy_kev: f64,
    pub travel_distance: f64,
    pub voxel: Option<VoxelIndex>,
    pub angle_idx: usize,
    pub num_scatters_obj: u32,
    pub num_scatters_col: u32,
    pub decay_weight: f64,
    pub primary_weight: f64,
    pub scatter_weight: f64,
    pub current_weight: f64,
    pub scatter_target_weight: f64,
    pub flags: PhotonFlags,
}

impl Photon {
    pub fn new_primary(
        pos: Position,
        dir: Direction,
        energy_kev: f64,
        decay_weight: f64,
        flags: PhotonFlags,
    ) -> Self {
        Photon {
            pos,
            dir,
            energy_kev,
            travel_distance: 0.0,
            voxel: None,
            angle_idx: 0,
            num_scatters_obj: 0,
            num_scatters_col: 0,
            decay_weight,
            primary_weight: 1.0,
            scatter_weight: 1.0,
            current_weight: 1.0,
            scatter_target_weight: 1.0,
            flags,
        }
    }

    pub fn has_scattered(&self) -> bool {
        self.num_scatters_obj > 0 || self.num_scatters_col > 0
    }

    /// Records the photon's first scatter: switches `current_weight` from
    /// tracking `primary_weight` to tracking `scatter_weight`.
    pub fn register_scatter(&mut self) {
        if !self.flags.contains(PhotonFlags::TRACK_SCATTER) {
            self.flags.insert(PhotonFlags::TRACK_SCATTER);
            self.scatter_weight = self.primary_weight;
        }
        self.current_weight = self.scatter_weight;
    }
}

/// Outcome of the §4.5 interaction decision policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interaction {
    Absorb,
    CohScatter,
    ComptonScatter,
}

/// Modeling flags passed to [`decide_interaction`].
#[derive(Clone, Copy, Debug, Default)]
pub struct InteractionModel {
    pub model_absorption: bool,
    pub model_coherent: bool,
}

/// Given the probability of any scatter (`p_scat`) and the conditional
/// probability of Compton given a scatter occurred (`p_compton_cond`),
/// draws `u` and applies the §4.5 decision policy:
///
/// - if absorption is modeled and `u > p_scat`, absorb;
/// - else if coherent is modeled and `u > p_scat * p_compton_cond`, coherent scatter;
/// - else Compton scatter.
///
/// If absorption is not modeled, `p_scat` drops out of the comparison
/// entirely (the split becomes `u` vs `p_compton_cond`).
pub fn decide_interaction(u: f64, p_scat: f64, p_compton_cond: f64, model: InteractionModel) -> Interaction {
    if model.model_absorption {
        if u > p_scat {
            return Interaction::Absorb;
        }
        if model.model_coherent && u > p_scat * p_compton_cond {
            return Interaction::CohScatter;
        }
        Interaction::ComptonScatter
    } else if model.model_coherent && u > p_compton_cond {
        Interaction::CohScatter
    } else {
        Interaction::ComptonScatter
    }
}
