//! Configuration surface (§6): the values the core consumes, expressed as
//! a validated, serializable struct instead of a bag of process globals
//! (see `DESIGN.md`, "Globals per component").

use crate::error::{PhgError, PhgResult};
use log::warn;
use serde::{Deserialize, Serialize};

/// Mutually exclusive simulation modes; exactly one must be selected.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimulationMode {
    Spect,
    PetCoincidencesOnly,
    PetCoincPlusSingles,
}

/// The full configuration surface consumed by the simulation core.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub acceptance_angle_deg: f64,
    pub minimum_energy_kev: f64,
    pub weight_window_ratio: f64,
    pub random_seed: i64,
    pub model_coherent_in_obj: bool,
    pub model_coherent_in_tomo: bool,
    pub simulate_forced_detection: bool,
    pub forced_non_absorption: bool,
    pub adjust_for_positron_range: bool,
    pub adjust_for_collinearity: bool,
    pub point_source_voxels: bool,
    pub line_source_voxels: bool,
    pub simulate_stratification: bool,
    pub mode: SimulationMode,
}

impl Config {
    /// Validates the cross-field invariants spec.md's error handling
    /// design calls out explicitly: mode exclusivity is structural here
    /// (an enum, not three booleans), so the remaining checks are the
    /// numeric ones.
    ///
    /// `fd_table_minimum_energy_kev` is the floor baked into the
    /// forced-detection table at construction time; a user-supplied
    /// `minimum_energy_kev` below it is rejected here rather than at FD
    /// table init, since the config is validated first.
    pub fn validate(&self, fd_table_minimum_energy_kev: f64) -> PhgResult<()> {
        if self.minimum_energy_kev < fd_table_minimum_energy_kev {
            warn!(
                "rejecting config: minimum_energy ({} keV) is below the forced-detection table floor ({} keV)",
                self.minimum_energy_kev, fd_table_minimum_energy_kev
            );
            return Err(PhgError::Configuration(format!(
                "minimum_energy ({} keV) is below the forced-detection table floor ({} keV)",
                self.minimum_energy_kev, fd_table_minimum_energy_kev
            )));
        }
        if self.weight_window_ratio < 1.0 {
            warn!("rejecting config: weight_window_ratio must be >= 1, got {}", self.weight_window_ratio);
            return Err(PhgError::Configuration(format!(
                "weight_window_ratio must be >= 1, got {}",
                self.weight_window_ratio
            )));
        }
        Ok(())
    }

    /// Seeds <= 0 mean "derive from the clock"; this is not an error, it
    /// is a request, so it is surfaced as a plain predicate rather than
    /// folded into `validate`.
    pub fn seed_from_clock(&self) -> bool {
        self.random_seed <= 0
    }
}
