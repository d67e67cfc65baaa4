//! Positron-range ray march: the same voxel traversal the photon tracker
//! uses, but for placing the annihilation site a finite distance from the
//! decay site rather than for photon transport.
//!
//! The attenuation lookup uses a fixed 1000 keV proxy energy regardless of
//! isotope (the material's density dominates positron range far more than
//! its exact endpoint energy); this is an approximation carried over from
//! the system this design is grounded on, not a physical law, and should
//! not be read as one.

use crate::cell_list::CellList;
use crate::track::{calc_new_position, TrackEvent, TrackerGeometry};
use phg_core::error::PhgResult;
use phg_core::geom::{Direction, Position};
use phg_core::material::MaterialOracle;
use phg_core::voxel::VoxelIndex;

/// The fixed proxy energy (keV) used for positron-range attenuation
/// lookups, independent of the emitting isotope.
pub const POSITRON_RANGE_PROXY_ENERGY_KEV: f64 = 1000.0;

/// Outcome of [`calc_range`]: the final position reached, whether the
/// positron left the object before exhausting its range budget, and the
/// voxel indices at that position (meaningful only when `discard` is
/// `false`).
#[derive(Clone, Copy, Debug)]
pub struct RangeResult {
    pub final_pos: Position,
    pub discard: bool,
    pub final_voxel: Option<VoxelIndex>,
}

/// Marches from `pos`/`dir` for `range_free_paths` free paths at the fixed
/// proxy energy, returning the annihilation site.
pub fn calc_range(
    pos: Position,
    dir: Direction,
    voxel: VoxelIndex,
    range_free_paths: f64,
    geometry: &TrackerGeometry,
    oracle: &dyn MaterialOracle,
) -> PhgResult<RangeResult> {
    let mut cell_list = CellList::new();
    let event = calc_new_position(
        pos,
        dir,
        voxel,
        range_free_paths,
        POSITRON_RANGE_PROXY_ENERGY_KEV,
        geometry,
        oracle,
        &mut cell_list,
    )?;

    match event {
        TrackEvent::Interact { pos, voxel, .. } => Ok(RangeResult {
            final_pos: pos,
            discard: false,
            final_voxel: Some(voxel),
        }),
        TrackEvent::LayerCross { pos, .. } => Ok(RangeResult {
            final_pos: pos,
            discard: true,
            final_voxel: None,
        }),
        TrackEvent::Detect { pos, .. } => Ok(RangeResult {
            final_pos: pos,
            discard: true,
            final_voxel: None,
        }),
        TrackEvent::Discard => Ok(RangeResult {
            final_pos: pos,
            discard: true,
            final_voxel: None,
        }),
    }
}
