//! Critical-zone free-path decomposition, used by the forced-detection
//! scatter sampler (C7) to weight a photon by its probability of
//! interacting between a scatter site and the critical zone's near and
//! far edges.

use crate::cell_list::CellList;
use crate::track::{step_one_voxel, StepOutcome};
use phg_core::error::PhgResult;
use phg_core::geom::{Direction, Intersection, Position};
use phg_core::material::MaterialOracle;
use phg_core::voxel::{VoxelIndex, VoxelObject};

/// Free paths consumed getting from the scatter site to the critical
/// zone's near edge (`fp_to_enter`) and far edge (`fp_to_exit`).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CritZoneFreePaths {
    pub fp_to_enter: f64,
    pub fp_to_exit: f64,
}

/// Sums `distance * mu` across `cells` up to `target_distance`,
/// apportioning the cell that straddles it. Distance beyond the last
/// recorded cell (the photon having already left the object's voxel
/// grid) contributes nothing further, matching the critical zone being
/// vacuum beyond the object's surface.
fn free_paths_up_to(cells: &CellList, target_distance: f64) -> f64 {
    let mut traveled = 0.0;
    let mut free_paths = 0.0;
    for cell in cells.iter() {
        if traveled + cell.distance > target_distance {
            free_paths += (target_distance - traveled) * cell.mu;
            return free_paths;
        }
        traveled += cell.distance;
        free_paths += cell.distance * cell.mu;
    }
    free_paths
}

/// Extends `cell_list` voxel by voxel from `pos`/`voxel` along `dir`
/// until its accumulated distance reaches `target_distance` or the
/// photon leaves the object. Used when no cached list exists yet.
fn march_to_distance(
    mut pos: Position,
    dir: Direction,
    mut voxel: VoxelIndex,
    object: &VoxelObject,
    oracle: &dyn MaterialOracle,
    energy_kev: f64,
    target_distance: f64,
    cell_list: &mut CellList,
) -> PhgResult<()> {
    while cell_list.total_distance() < target_distance {
        let mut budget = f64::MAX;
        match step_one_voxel(pos, dir, object, oracle, energy_kev, voxel, &mut budget, cell_list)? {
            StepOutcome::Interact { .. } => {
                unreachable!("an f64::MAX budget never exhausts inside a finite-mu voxel")
            }
            StepOutcome::CrossedSlice { pos: p, new_slice } => {
                pos = p;
                voxel = new_slice;
            }
            StepOutcome::CrossedWithinSlice { pos: p, new_voxel } => {
                pos = p;
                voxel = new_voxel;
            }
            StepOutcome::ExitedRadially { .. } | StepOutcome::ExitedAxially => break,
        }
    }
    Ok(())
}

/// Computes `fpToEnter`/`fpToExit` for `intersection`: reuses `cell_list`
/// when it already holds a march from this position, otherwise marches
/// fresh out to `intersection.dist_to_exit`, building the list as a side
/// effect so a subsequent call at the same scatter site can reuse it.
#[allow(clippy::too_many_arguments)]
pub fn crit_zone_free_paths(
    pos: Position,
    dir: Direction,
    voxel: VoxelIndex,
    object: &VoxelObject,
    oracle: &dyn MaterialOracle,
    energy_kev: f64,
    intersection: Intersection,
    cell_list: &mut CellList,
) -> PhgResult<CritZoneFreePaths> {
    if cell_list.is_empty() {
        march_to_distance(pos, dir, voxel, object, oracle, energy_kev, intersection.dist_to_exit, cell_list)?;
    }

    let fp_to_exit = free_paths_up_to(cell_list, intersection.dist_to_exit);
    let fp_to_enter = if intersection.dist_to_enter == 0.0 {
        0.0
    } else {
        free_paths_up_to(cell_list, intersection.dist_to_enter)
    };

    Ok(CritZoneFreePaths { fp_to_enter, fp_to_exit })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_list::Cell;
    use phg_core::voxel::Slice;

    struct ConstantMu(f64);
    impl MaterialOracle for ConstantMu {
        fn attenuation(&self, _mat: phg_core::voxel::MatIndex, _e: f64) -> f64 {
            self.0
        }
        fn prob_scatter(&self, _mat: phg_core::voxel::MatIndex, _e: f64, _c: bool) -> f64 {
            1.0
        }
        fn prob_compton_conditional(&self, _mat: phg_core::voxel::MatIndex, _e: f64, _c: bool) -> f64 {
            1.0
        }
        fn sample_coherent_theta(&self, _mat: phg_core::voxel::MatIndex, _e: f64, _u: f64) -> f64 {
            0.0
        }
    }

    fn slab(n: usize, mu_material: phg_core::voxel::MatIndex) -> VoxelObject {
        let slice = Slice::new(-5.0, 5.0, -5.0, 5.0, -5.0, 5.0, n, n, n, n, vec![mu_material; n * n], vec![mu_material; n * n]).unwrap();
        VoxelObject::new(vec![slice]).unwrap()
    }

    #[test]
    fn fresh_march_matches_constant_mu_over_distance() {
        let object = slab(4, 0);
        let oracle = ConstantMu(0.2);
        let pos = Position::new(-5.0, 0.0, 0.0);
        let dir = Direction::from_unit(1.0, 0.0, 0.0);
        let voxel = object.locate_attenuation(Position::new(-4.999, 0.0, 0.0)).unwrap();
        let intersection = Intersection { dist_to_enter: 2.0, dist_to_exit: 6.0 };
        let mut cell_list = CellList::new();
        let result = crit_zone_free_paths(pos, dir, voxel, &object, &oracle, 511.0, intersection, &mut cell_list).unwrap();
        assert!((result.fp_to_enter - 0.4).abs() < 1e-9);
        assert!((result.fp_to_exit - 1.2).abs() < 1e-9);
    }

    #[test]
    fn zero_dist_to_enter_means_already_inside() {
        let object = slab(2, 0);
        let oracle = ConstantMu(0.1);
        let pos = Position::new(-5.0, 0.0, 0.0);
        let dir = Direction::from_unit(1.0, 0.0, 0.0);
        let voxel = object.locate_attenuation(Position::new(-4.999, 0.0, 0.0)).unwrap();
        let intersection = Intersection { dist_to_enter: 0.0, dist_to_exit: 3.0 };
        let mut cell_list = CellList::new();
        let result = crit_zone_free_paths(pos, dir, voxel, &object, &oracle, 511.0, intersection, &mut cell_list).unwrap();
        assert_eq!(result.fp_to_enter, 0.0);
        assert!((result.fp_to_exit - 0.3).abs() < 1e-9);
    }

    #[test]
    fn reuses_a_nonempty_cached_cell_list_without_remarching() {
        let object = slab(2, 0);
        let oracle = ConstantMu(999.0);
        let pos = Position::new(0.0, 0.0, 0.0);
        let dir = Direction::from_unit(1.0, 0.0, 0.0);
        let voxel = object.locate_attenuation(pos).unwrap();
        let mut cell_list = CellList::new();
        cell_list.push(Cell { voxel, distance: 5.0, mu: 0.5 });
        let intersection = Intersection { dist_to_enter: 1.0, dist_to_exit: 5.0 };
        let result = crit_zone_free_paths(pos, dir, voxel, &object, &oracle, 511.0, intersection, &mut cell_list).unwrap();
        assert!((result.fp_to_enter - 0.5).abs() < 1e-9);
        assert!((result.fp_to_exit - 2.5).abs() < 1e-9);
    }
}
