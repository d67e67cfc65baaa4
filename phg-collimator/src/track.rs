//! Monte-Carlo PET collimator tracking loop (§4.8): the same free-path and
//! interaction-decision physics as the object tracker, over the layered
//! cylinder-segment geometry instead of a voxel grid.

use crate::geometry::CollimatorGeometry;
use log::error;
use phg_core::emission::EmissionList;
use phg_core::error::{PhgError, PhgResult};
use phg_core::geom::{self, tapered_wall_intersection, Direction, Position};
use phg_core::material::MaterialOracle;
use phg_core::photon::{decide_interaction, Interaction, InteractionModel, Photon};
use phg_core::rng::Rng;

/// Outcome of tracking a photon through the full layer stack.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollimatorOutcome {
    /// Exited the outermost layer: `layer == layers.len()`.
    Detect,
    /// Left the geometry: `layer < 0`, or a segment index ran off either
    /// end, or energy dropped below the minimum after an interaction.
    Discard,
}

enum Event {
    InnerCylinder { dist: f64 },
    OuterCylinder { dist: f64 },
    WallLow { dist: f64 },
    WallHigh { dist: f64 },
}

fn event_distance(e: &Event) -> f64 {
    match e {
        Event::InnerCylinder { dist } | Event::OuterCylinder { dist } | Event::WallLow { dist } | Event::WallHigh { dist } => *dist,
    }
}

fn next_event(pos: Position, dir: Direction, geometry: &CollimatorGeometry, layer_idx: usize, seg_idx: usize, allow_inner: bool) -> Option<Event> {
    let layer = &geometry.layers[layer_idx];
    let mut candidates = Vec::new();

    if allow_inner {
        if let Some((_, dist)) = geom::project_to_cylinder(pos, dir, &layer.inner_bounding()) {
            candidates.push(Event::InnerCylinder { dist });
        }
    }
    if let Some((_, dist)) = geom::project_to_cylinder(pos, dir, &layer.outer_bounding()) {
        candidates.push(Event::OuterCylinder { dist });
    }
    let (lo_inner_z, lo_outer_z) = layer.wall_z(seg_idx, true);
    if let Some(dist) = tapered_wall_intersection(pos, dir, layer.inner_radius, layer.outer_radius, lo_inner_z, lo_outer_z) {
        candidates.push(Event::WallLow { dist });
    }
    let (hi_inner_z, hi_outer_z) = layer.wall_z(seg_idx, false);
    if let Some(dist) = tapered_wall_intersection(pos, dir, layer.inner_radius, layer.outer_radius, hi_inner_z, hi_outer_z) {
        candidates.push(Event::WallHigh { dist });
    }

    candidates
        .into_iter()
        .filter(|e| event_distance(e) > 1e-9)
        .fold(None, |acc, cur| match &acc {
            None => Some(cur),
            Some(a) if event_distance(&cur) < event_distance(a) => Some(cur),
            _ => acc,
        })
}

/// Tracks `photon` from the innermost layer's inner cylinder outward (or
/// inward, on a `LayerCross` decrement) through the whole layer stack.
///
/// Per the Open Question recorded in the design ledger, every call enters
/// at `layer = 0`: the collimator only ever receives a photon freshly
/// leaving the voxel object, never one resuming mid-stack.
pub fn track(
    photon: &mut Photon,
    geometry: &CollimatorGeometry,
    oracle: &dyn MaterialOracle,
    emission: &dyn EmissionList,
    model: InteractionModel,
    min_energy_kev: f64,
    rng: &mut Rng,
) -> PhgResult<CollimatorOutcome> {
    let mut layer_idx: usize = 0;
    let mut first_projection = true;

    loop {
        if layer_idx >= geometry.layers.len() {
            return Ok(CollimatorOutcome::Detect);
        }

        let layer = &geometry.layers[layer_idx];
        if !first_projection {
            let inner = layer.inner_bounding();
            if photon.pos.z < inner.z_min || photon.pos.z > inner.z_max {
                return Ok(CollimatorOutcome::Discard);
            }
        }

        let mut seg_idx = match layer.segment_at(photon.pos.radius(), photon.pos.z) {
            Some(idx) => idx,
            None => return Ok(CollimatorOutcome::Discard),
        };

        let mu = oracle.attenuation(layer.mat_idx, photon.energy_kev);
        let fp = rng.exp_free_paths();
        let mut interact_dist = if mu > 0.0 { fp / mu } else { f64::INFINITY };

        loop {
            let event = next_event(photon.pos, photon.dir, geometry, layer_idx, seg_idx, !first_projection)
                .ok_or_else(|| {
                    error!("collimator tracker found no forward geometric event at layer {layer_idx}, segment {seg_idx}");
                    PhgError::RuntimeInvariant("collimator tracker found no forward geometric event".into())
                })?;
            let geom_dist = event_distance(&event);

            if interact_dist < geom_dist {
                photon.pos = Position::new(
                    photon.pos.x + interact_dist * photon.dir.cx,
                    photon.pos.y + interact_dist * photon.dir.cy,
                    photon.pos.z + interact_dist * photon.dir.cz,
                );
                photon.travel_distance += interact_dist;

                let p_scat = oracle.prob_scatter(layer.mat_idx, photon.energy_kev, model.model_coherent);
                let p_compton_cond = oracle.prob_compton_conditional(layer.mat_idx, photon.energy_kev, model.model_coherent);
                let u = rng.uniform01();
                match decide_interaction(u, p_scat, p_compton_cond, model) {
                    Interaction::Absorb => return Ok(CollimatorOutcome::Discard),
                    Interaction::ComptonScatter => {
                        photon.num_scatters_col += 1;
                        emission.do_compton(photon);
                    }
                    Interaction::CohScatter => {
                        photon.num_scatters_col += 1;
                        emission.do_coherent(photon, layer.mat_idx);
                    }
                }
                if photon.energy_kev < min_energy_kev {
                    return Ok(CollimatorOutcome::Discard);
                }

                // Re-enter the segment-location loop with a fresh free
                // path at the (possibly new) direction/energy.
                break;
            }

            photon.pos = Position::new(
                photon.pos.x + geom_dist * photon.dir.cx,
                photon.pos.y + geom_dist * photon.dir.cy,
                photon.pos.z + geom_dist * photon.dir.cz,
            );
            photon.travel_distance += geom_dist;
            interact_dist -= geom_dist;

            match event {
                Event::InnerCylinder { .. } => {
                    if layer_idx == 0 {
                        return Ok(CollimatorOutcome::Discard);
                    }
                    layer_idx -= 1;
                    first_projection = false;
                    break;
                }
                Event::OuterCylinder { .. } => {
                    layer_idx += 1;
                    first_projection = false;
                    break;
                }
                Event::WallLow { .. } => {
                    if seg_idx == 0 {
                        return Ok(CollimatorOutcome::Discard);
                    }
                    seg_idx -= 1;
                }
                Event::WallHigh { .. } => {
                    seg_idx += 1;
                    if seg_idx >= layer.segments.len() {
                        return Ok(CollimatorOutcome::Discard);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Layer, Segment, SegmentKind};
    use phg_core::photon::PhotonFlags;
    use phg_core::voxel::MatIndex;

    struct Vacuum;
    impl MaterialOracle for Vacuum {
        fn attenuation(&self, _mat: MatIndex, _e: f64) -> f64 {
            0.0
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

    struct NoOpEmission;
    impl EmissionList for NoOpEmission {
        fn do_compton(&self, _photon: &mut Photon) {}
        fn do_coherent(&self, _photon: &mut Photon, _mat_idx: MatIndex) {}
        fn do_detection(&self, _photon: &Photon) {}
    }

    fn single_layer_geometry() -> CollimatorGeometry {
        let layer = Layer::new(10.0, 12.0, 1, vec![(Segment::parallel(-5.0, 5.0), SegmentKind::Parallel)]).unwrap();
        CollimatorGeometry::new(vec![layer]).unwrap()
    }

    #[test]
    fn non_interacting_ray_through_parallel_layer_detects() {
        let geometry = single_layer_geometry();
        let oracle = Vacuum;
        let emission = NoOpEmission;
        let model = InteractionModel { model_absorption: false, model_coherent: false };
        let mut rng = Rng::seed(42);

        let mut photon = Photon::new_primary(Position::new(10.0, 0.0, 0.0), Direction::from_unit(1.0, 0.0, 0.0), 511.0, 1.0, PhotonFlags::BLUE);

        let outcome = track(&mut photon, &geometry, &oracle, &emission, model, 50.0, &mut rng).unwrap();
        assert_eq!(outcome, CollimatorOutcome::Detect);
        assert!((photon.pos.x - 12.0).abs() < 1e-6);
    }

    #[test]
    fn ray_exiting_axially_before_outer_cylinder_is_discarded() {
        let geometry = single_layer_geometry();
        let oracle = Vacuum;
        let emission = NoOpEmission;
        let model = InteractionModel { model_absorption: false, model_coherent: false };
        let mut rng = Rng::seed(1);

        let mut photon = Photon::new_primary(Position::new(10.0, 0.0, 4.9), Direction::from_unit(0.0, 0.0, 1.0), 511.0, 1.0, PhotonFlags::BLUE);

        let outcome = track(&mut photon, &geometry, &oracle, &emission, model, 50.0, &mut rng).unwrap();
        assert_eq!(outcome, CollimatorOutcome::Discard);
    }
}
