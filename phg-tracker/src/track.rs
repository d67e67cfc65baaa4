//! Photon tracker (component C6): voxel ray-marching through the
//! attenuation map, free-path-limited, yielding one of the §4.5 step
//! outcomes.

use crate::cell_list::{Cell, CellList};
use log::error;
use phg_core::error::{PhgError, PhgResult};
use phg_core::geom::{self, Cylinder, Direction, Position};
use phg_core::material::MaterialOracle;
use phg_core::voxel::{self, MatIndex, NextFaceDistances, VoxelIndex, VoxelObject};

/// The outcome of one call to [`calc_new_position`].
#[derive(Clone, Copy, Debug)]
pub enum TrackEvent {
    /// The photon interacted at `pos`, in voxel `voxel`, with material
    /// `mat_idx`.
    Interact {
        pos: Position,
        voxel: VoxelIndex,
        mat_idx: MatIndex,
    },
    /// The photon reached the object's curved radial surface without
    /// exhausting its free-path budget and is handed onward (forced
    /// detection / collimator).
    LayerCross { pos: Position, traveled: f64 },
    /// The photon reached the target cylinder within its axial band and
    /// within the acceptance cone.
    Detect { pos: Position, traveled: f64 },
    /// The photon left the object cylinder outside the target's axial
    /// band, or its final direction fell outside the acceptance cone, or
    /// it left the object axially before reaching the curved surface.
    Discard,
}

/// One primitive voxel-to-voxel step, used internally by [`calc_new_position`]
/// and directly by the voxel-traversal property tests (§8 property 3).
#[derive(Clone, Copy, Debug, PartialEq)]
enum Axis {
    X,
    Y,
    Z,
    /// The ray crosses the object cylinder's curved surface before any
    /// voxel-grid face, i.e. the true circular boundary is reached while
    /// still short of the grid's rectangular extent (always true off-axis,
    /// since the grid's corners lie outside the inscribed circle).
    Surface,
}

pub(crate) enum StepOutcome {
    /// Budget exhausted inside the current voxel.
    Interact { pos: Position },
    /// Crossed into a new slice (still inside the object axially).
    CrossedSlice { pos: Position, new_slice: VoxelIndex },
    /// Crossed an x/y voxel boundary within the same slice.
    CrossedWithinSlice { pos: Position, new_voxel: VoxelIndex },
    /// Left the object's curved radial surface.
    ExitedRadially { pos: Position },
    /// Left the object's axial (z) extent entirely.
    ExitedAxially,
}

/// Reads the attenuation material at `voxel`, raising a `RuntimeInvariant`
/// error if it is [`voxel::MAT_OUTSIDE`] — a track should never still be
/// marching once it has stepped onto a voxel the object itself marks as
/// not part of it.
fn attenuation_material_checked(object: &VoxelObject, voxel: VoxelIndex) -> PhgResult<MatIndex> {
    let mat = object.slices()[voxel.slice].attenuation_at(voxel.x, voxel.y)?;
    if mat == voxel::MAT_OUTSIDE {
        error!("attenuation read at voxel {voxel:?} landed on a voxel marked outside the object");
        return Err(PhgError::RuntimeInvariant(format!(
            "attempted to read material for voxel {voxel:?}, which is marked outside the object"
        )));
    }
    Ok(mat)
}

/// Advances `pos` by one voxel face crossing (or an interaction), pushing
/// the traversed [`Cell`] onto `cell_list`. `budget` is the remaining
/// free-path allowance; it is decremented by `distance * mu` for the
/// segment traversed.
#[allow(clippy::too_many_arguments)]
pub(crate) fn step_one_voxel(
    pos: Position,
    dir: Direction,
    object: &VoxelObject,
    object_cylinder: &Cylinder,
    oracle: &dyn MaterialOracle,
    energy_kev: f64,
    voxel: VoxelIndex,
    budget: &mut f64,
    cell_list: &mut CellList,
) -> PhgResult<StepOutcome> {
    let slice = &object.slices()[voxel.slice];
    let mat = attenuation_material_checked(object, voxel)?;
    let mu = oracle.attenuation(mat, energy_kev);

    let nf: NextFaceDistances = voxel::next_face_distances(pos, dir, slice, voxel);
    let surface_dist = geom::distance_to_object_surface(pos, dir, object_cylinder);
    let candidates = [
        (nf.dist_to_next_x, Axis::X),
        (nf.dist_to_next_y, Axis::Y),
        (nf.dist_to_next_z, Axis::Z),
        (surface_dist, Axis::Surface),
    ];
    let (face_dist, axis) = candidates
        .into_iter()
        .filter(|(d, _)| d.is_finite() && *d > 0.0)
        .fold(None::<(f64, Axis)>, |acc, cur| match acc {
            None => Some(cur),
            Some(a) if cur.0 < a.0 => Some(cur),
            Some(a) => Some(a),
        })
        .ok_or_else(|| {
            error!("voxel march at {voxel:?} found no forward face or object-surface crossing");
            PhgError::RuntimeInvariant("voxel march found no forward face".into())
        })?;

    let free_paths_to_face = face_dist * mu;
    if mu > 0.0 && free_paths_to_face >= *budget {
        let dist = *budget / mu;
        cell_list.push(Cell { voxel, distance: dist, mu });
        *budget = 0.0;
        let interact_pos = Position::new(pos.x + dist * dir.cx, pos.y + dist * dir.cy, pos.z + dist * dir.cz);
        return Ok(StepOutcome::Interact { pos: interact_pos });
    }

    *budget -= free_paths_to_face;
    cell_list.push(Cell { voxel, distance: face_dist, mu });
    let next_pos = Position::new(
        pos.x + face_dist * dir.cx,
        pos.y + face_dist * dir.cy,
        pos.z + face_dist * dir.cz,
    );

    match axis {
        Axis::Surface => Ok(StepOutcome::ExitedRadially { pos: next_pos }),
        Axis::Z => {
            let next_slice_idx = if dir.cz > 0.0 {
                voxel.slice.checked_add(1)
            } else {
                voxel.slice.checked_sub(1)
            };
            match next_slice_idx {
                Some(si) if si < object.slices().len() => {
                    let new_slice = &object.slices()[si];
                    let x_idx = x_index_in_slice(new_slice, next_pos.x);
                    let y_idx = y_index_in_slice(new_slice, next_pos.y);
                    Ok(StepOutcome::CrossedSlice {
                        pos: next_pos,
                        new_slice: VoxelIndex { slice: si, x: x_idx, y: y_idx },
                    })
                }
                _ => Ok(StepOutcome::ExitedAxially),
            }
        }
        Axis::X => {
            let new_x = if dir.cx > 0.0 {
                voxel.x.checked_add(1)
            } else {
                voxel.x.checked_sub(1)
            };
            match new_x {
                Some(x) if x < slice.num_att_x => Ok(StepOutcome::CrossedWithinSlice {
                    pos: next_pos,
                    new_voxel: VoxelIndex { x, ..voxel },
                }),
                _ => Ok(StepOutcome::ExitedRadially { pos: next_pos }),
            }
        }
        Axis::Y => {
            // y decreases with row index, so moving in +y decrements the index.
            let new_y = if dir.cy > 0.0 {
                voxel.y.checked_sub(1)
            } else {
                voxel.y.checked_add(1)
            };
            match new_y {
                Some(y) if y < slice.num_att_y => Ok(StepOutcome::CrossedWithinSlice {
                    pos: next_pos,
                    new_voxel: VoxelIndex { y, ..voxel },
                }),
                _ => Ok(StepOutcome::ExitedRadially { pos: next_pos }),
            }
        }
    }
}

fn x_index_in_slice(slice: &phg_core::voxel::Slice, x: f64) -> usize {
    (((x - slice.x_min) / slice.att_voxel_width()) as isize).clamp(0, slice.num_att_x as isize - 1) as usize
}

fn y_index_in_slice(slice: &phg_core::voxel::Slice, y: f64) -> usize {
    (((slice.y_max - y) / slice.att_voxel_height()) as isize).clamp(0, slice.num_att_y as isize - 1) as usize
}

/// Geometry the tracker needs beyond the voxel object itself: the
/// bounding object cylinder, the target (detector) cylinder, and the
/// global acceptance angle.
pub struct TrackerGeometry<'a> {
    pub object: &'a VoxelObject,
    pub object_cylinder: Cylinder,
    pub target_cylinder: Cylinder,
    pub acceptance_angle_deg: f64,
}

/// Implements `calcNewPosition`: marches a photon from `pos`/`dir` in
/// `voxel` through the object, consuming `free_paths_budget`. Reuses a
/// nonempty `cell_list` from a prior call before falling through to a
/// fresh voxel march; on exhaustion without interaction, and when the
/// object surface is reached, projects onward to the target cylinder.
pub fn calc_new_position(
    pos: Position,
    dir: Direction,
    mut voxel: VoxelIndex,
    mut free_paths_budget: f64,
    energy_kev: f64,
    geometry: &TrackerGeometry,
    oracle: &dyn MaterialOracle,
    cell_list: &mut CellList,
) -> PhgResult<TrackEvent> {
    let mut current_pos = pos;

    if !cell_list.is_empty() {
        let mut consumed = Vec::new();
        for cell in cell_list.iter() {
            let fp = cell.distance * cell.mu;
            if fp >= free_paths_budget && cell.mu > 0.0 {
                let dist = free_paths_budget / cell.mu;
                let interact_pos = Position::new(
                    current_pos.x + dist * dir.cx,
                    current_pos.y + dist * dir.cy,
                    current_pos.z + dist * dir.cz,
                );
                let mat = attenuation_material_checked(geometry.object, cell.voxel)?;
                return Ok(TrackEvent::Interact {
                    pos: interact_pos,
                    voxel: cell.voxel,
                    mat_idx: mat,
                });
            }
            free_paths_budget -= fp;
            current_pos = Position::new(
                current_pos.x + cell.distance * dir.cx,
                current_pos.y + cell.distance * dir.cy,
                current_pos.z + cell.distance * dir.cz,
            );
            consumed.push(*cell);
        }
        voxel = consumed.last().map(|c| c.voxel).unwrap_or(voxel);
        cell_list.clear();
    }

    loop {
        match step_one_voxel(
            current_pos,
            dir,
            geometry.object,
            &geometry.object_cylinder,
            oracle,
            energy_kev,
            voxel,
            &mut free_paths_budget,
            cell_list,
        )? {
            StepOutcome::Interact { pos } => {
                let mat = attenuation_material_checked(geometry.object, voxel)?;
                return Ok(TrackEvent::Interact { pos, voxel, mat_idx: mat });
            }
            StepOutcome::CrossedSlice { pos, new_slice } => {
                current_pos = pos;
                voxel = new_slice;
            }
            StepOutcome::CrossedWithinSlice { pos, new_voxel } => {
                current_pos = pos;
                voxel = new_voxel;
            }
            StepOutcome::ExitedAxially => return Ok(TrackEvent::Discard),
            StepOutcome::ExitedRadially { pos } => {
                return resolve_object_exit(pos, dir, geometry);
            }
        }
    }
}

/// Projects a photon that just left the object's curved surface onward to
/// the target cylinder, checking the limit cylinder's z band and the
/// acceptance cone on the way.
///
/// When the target cylinder's radius is no larger than the object
/// cylinder's, the object surface itself already lies on or outside the
/// target, so the exit point is the detection point directly: projecting
/// onward would require resolving a degenerate `t=0` root of
/// [`geom::project_to_cylinder`] (the exit point's radius exactly equals
/// the target radius in the common case of the two cylinders coinciding),
/// which its strict `t > 0` root selection rejects.
fn resolve_object_exit(exit_pos: Position, dir: Direction, geometry: &TrackerGeometry) -> PhgResult<TrackEvent> {
    let accept_sine = geom::acceptance_angle_sine(geometry.acceptance_angle_deg);
    if dir.cz.abs() > accept_sine {
        return Ok(TrackEvent::Discard);
    }

    if geometry.target_cylinder.radius <= geometry.object_cylinder.radius {
        return if exit_pos.z < geometry.target_cylinder.z_min || exit_pos.z > geometry.target_cylinder.z_max {
            Ok(TrackEvent::Discard)
        } else {
            Ok(TrackEvent::Detect { pos: exit_pos, traveled: 0.0 })
        };
    }

    match geom::project_to_cylinder(exit_pos, dir, &geometry.target_cylinder) {
        Some((hit, dist)) => {
            if hit.z < geometry.target_cylinder.z_min || hit.z > geometry.target_cylinder.z_max {
                Ok(TrackEvent::Discard)
            } else {
                Ok(TrackEvent::Detect { pos: hit, traveled: dist })
            }
        }
        None => Ok(TrackEvent::LayerCross { pos: exit_pos, traveled: 0.0 }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use phg_core::voxel::Slice;

    struct ConstantMu(f64);
    impl MaterialOracle for ConstantMu {
        fn attenuation(&self, _mat: MatIndex, _e: f64) -> f64 {
            self.0
        }
        fn prob_scatter(&self, _mat: MatIndex, _e: f64, _c: bool) -> f64 {
            1.0
        }
        fn prob_compton_conditional(&self, _mat: MatIndex, _e: f64, _c: bool) -> f64 {
            1.0
        }
        fn sample_coherent_theta(&self, _mat: MatIndex, _e: f64, _u: f64) -> f64 {
            0.0
        }
    }

    fn slab(n: usize, mu_material: MatIndex) -> VoxelObject {
        let slice = Slice::new(-5.0, 5.0, -5.0, 5.0, -5.0, 5.0, n, n, n, n, vec![mu_material; n * n], vec![mu_material; n * n]).unwrap();
        VoxelObject::new(vec![slice]).unwrap()
    }

    #[test]
    fn straight_through_voxel_march_sums_to_geometric_distance() {
        let object = slab(4, 0);
        let oracle = ConstantMu(0.0);
        let geometry = TrackerGeometry {
            object: &object,
            object_cylinder: Cylinder::centered(100.0, -5.0, 5.0),
            // z band excludes the ray's constant z=0, so the curved-wall
            // projection misses axially and the exit is handed onward as a
            // LayerCross rather than a Detect.
            target_cylinder: Cylinder::centered(200.0, 1.0, 5.0),
            acceptance_angle_deg: 90.0,
        };
        let pos = Position::new(-5.0, 0.0, 0.0);
        let dir = Direction::from_unit(1.0, 0.0, 0.0);
        let voxel = object.locate_attenuation(Position::new(-4.999, 0.0, 0.0)).unwrap();
        let mut cell_list = CellList::new();
        let event = calc_new_position(pos, dir, voxel, 1e9, 511.0, &geometry, &oracle, &mut cell_list).unwrap();
        match event {
            TrackEvent::LayerCross { .. } => {
                assert!((cell_list.total_distance() - 10.0).abs() < 1e-9);
            }
            other => panic!("expected LayerCross, got {other:?}"),
        }
    }

    #[test]
    fn target_radius_not_exceeding_object_radius_detects_at_object_surface() {
        // spec's "target cylinder == object cylinder" configuration: the
        // object surface itself is the detection surface, so reaching it
        // must report Detect rather than falling through to a LayerCross
        // that silently discards the photon when no collimator is present.
        let object = slab(4, 0);
        let oracle = ConstantMu(0.0);
        let geometry = TrackerGeometry {
            object: &object,
            object_cylinder: Cylinder::centered(50.0, -5.0, 5.0),
            target_cylinder: Cylinder::centered(50.0, -5.0, 5.0),
            acceptance_angle_deg: 90.0,
        };
        let pos = Position::new(-5.0, 0.0, 0.0);
        let dir = Direction::from_unit(1.0, 0.0, 0.0);
        let voxel = object.locate_attenuation(Position::new(-4.999, 0.0, 0.0)).unwrap();
        let mut cell_list = CellList::new();
        let event = calc_new_position(pos, dir, voxel, 1e9, 511.0, &geometry, &oracle, &mut cell_list).unwrap();
        match event {
            TrackEvent::Detect { pos: p, .. } => {
                assert!((p.x - 5.0).abs() < 1e-9);
            }
            other => panic!("expected Detect, got {other:?}"),
        }
    }

    #[test]
    fn diagonal_ray_exits_at_object_cylinder_radius_not_grid_corner() {
        // A diagonal ray's voxel-grid exit corner lies outside the
        // inscribed object cylinder; the march must stop at the circle,
        // not the square, so the reported exit radius matches the
        // cylinder's radius rather than the corner's larger radius.
        let object = slab(4, 0);
        let oracle = ConstantMu(0.0);
        let object_cylinder = Cylinder::centered(4.0, -5.0, 5.0);
        let geometry = TrackerGeometry {
            object: &object,
            object_cylinder,
            target_cylinder: Cylinder::centered(4.0, -5.0, 5.0),
            acceptance_angle_deg: 90.0,
        };
        let pos = Position::new(0.0, 0.0, 0.0);
        let dir = Direction::new(1.0, 1.0, 0.0);
        let voxel = object.locate_attenuation(pos).unwrap();
        let mut cell_list = CellList::new();
        let event = calc_new_position(pos, dir, voxel, 1e9, 511.0, &geometry, &oracle, &mut cell_list).unwrap();
        match event {
            TrackEvent::Detect { pos: p, .. } => {
                assert!(
                    (p.radius() - 4.0).abs() < 1e-6,
                    "exit radius {} should match the object cylinder's radius, not an overshot grid corner",
                    p.radius()
                );
            }
            other => panic!("expected Detect, got {other:?}"),
        }
    }

    #[test]
    fn interaction_consumes_exact_budget() {
        let object = slab(2, 5);
        let oracle = ConstantMu(0.5);
        let geometry = TrackerGeometry {
            object: &object,
            object_cylinder: Cylinder::centered(100.0, -5.0, 5.0),
            target_cylinder: Cylinder::centered(200.0, -5.0, 5.0),
            acceptance_angle_deg: 90.0,
        };
        let pos = Position::new(-5.0, 0.0, 0.0);
        let dir = Direction::from_unit(1.0, 0.0, 0.0);
        let voxel = object.locate_attenuation(pos).unwrap();
        let mut cell_list = CellList::new();
        // mu=0.5, want interaction at distance 2 -> budget = 1.0
        let event = calc_new_position(pos, dir, voxel, 1.0, 511.0, &geometry, &oracle, &mut cell_list).unwrap();
        match event {
            TrackEvent::Interact { pos: p, .. } => {
                assert!((p.x - (-3.0)).abs() < 1e-6);
            }
            other => panic!("expected Interact, got {other:?}"),
        }
    }
}
