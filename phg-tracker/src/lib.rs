//! Photon tracker (component C6): voxel ray-marching, critical-zone
//! free-path decomposition, positron-range placement, and the weight
//! window that consults the productivity tables built in `phg-prodtbl`.

pub mod cell_list;
pub mod crit_zone;
pub mod positron_range;
pub mod track;
pub mod weight_window;

pub use cell_list::{Cell, CellList};
pub use crit_zone::{crit_zone_free_paths, CritZoneFreePaths};
pub use positron_range::{calc_range, RangeResult, POSITRON_RANGE_PROXY_ENERGY_KEV};
pub use track::{calc_new_position, TrackEvent, TrackerGeometry};
pub use weight_window::{apply_window, WindowDecision, MAX_DETECTED_PER_DECAY};
