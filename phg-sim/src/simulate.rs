//! Per-decay simulation loop (§4, §5): ties the object tracker (C6), the
//! forced-detection samplers (C7), the weight window (C8), the
//! productivity table (C5) and the MC PET collimator (C10) together, then
//! fans the work out across decays with rayon.

use crate::context::SimContext;
use crate::traits::{DecaySource, ScoringSink};
use phg_collimator::CollimatorOutcome;
use phg_core::decay::Decay;
use phg_core::emission::EmissionList;
use phg_core::error::PhgResult;
use phg_core::geom::{self, Direction, Position};
use phg_core::photon::{decide_interaction, Interaction, InteractionModel, Photon, PhotonFlags};
use phg_core::rng::Rng;
use phg_core::voxel::VoxelIndex;
use phg_forced_detection::{sample_scatter, sample_scatter_cbfd};
use phg_prodtbl::Population;
use phg_tracker::{calc_new_position, crit_zone_free_paths, CellList, TrackEvent};
use rayon::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};

/// Tallies returned by [`run`]: enough to report progress without handing
/// back every decay's photons (those already went to the [`ScoringSink`]).
#[derive(Clone, Copy, Debug, Default)]
pub struct RunStats {
    pub decays_processed: u64,
    pub photons_detected: u64,
    pub forced_detections: u64,
}

impl RunStats {
    fn merge(self, other: RunStats) -> RunStats {
        RunStats {
            decays_processed: self.decays_processed + other.decays_processed,
            photons_detected: self.photons_detected + other.photons_detected,
            forced_detections: self.forced_detections + other.forced_detections,
        }
    }
}

/// Runs up to `num_decays` decays drawn from `source`, scoring surviving
/// photons through `sink`. Splits the range into `num_workers` contiguous
/// chunks, each driven by its own RNG substream seeded deterministically
/// from the configured seed and the worker's index — reproducible given a
/// fixed worker count, and checkpointable per-worker via
/// [`phg_core::rng::Rng::serialize_state`] if a caller wants that later.
///
/// `cancel` is polled between decays, never inside a photon's track, so a
/// cancellation request lands within one decay's worth of latency instead
/// of needing to thread a check through every tracking step.
pub fn run(
    ctx: &SimContext,
    source: &dyn DecaySource,
    emission: &dyn EmissionList,
    sink: &dyn ScoringSink,
    num_decays: u64,
    num_workers: usize,
    cancel: &AtomicBool,
) -> PhgResult<RunStats> {
    let num_workers = num_workers.max(1);
    // A single clock-seeded draw decorrelates worker substreams even when
    // the configuration requests clock seeding; without it every worker
    // would call Rng::seed(0) within the same few microseconds and likely
    // collide on the same wall-clock nanosecond.
    let base_seed = if ctx.config.seed_from_clock() {
        (Rng::seed(0).uniform01() * 1e9) as i64
    } else {
        ctx.config.random_seed
    };
    let per_worker = (num_decays + num_workers as u64 - 1) / num_workers as u64;

    let worker_stats: Vec<RunStats> = (0..num_workers)
        .into_par_iter()
        .map(|worker| -> PhgResult<RunStats> {
            let mut rng = Rng::seed(base_seed.wrapping_add(worker as i64 * 7_919 + 1));
            let start = worker as u64 * per_worker;
            let end = (start + per_worker).min(num_decays);
            let mut stats = RunStats::default();

            for _ in start..end {
                if cancel.load(Ordering::Relaxed) {
                    break;
                }
                let Some((decay, photons)) = source.next_decay(&mut rng) else {
                    break;
                };
                let (blue, pink) = simulate_decay(ctx, &decay, photons, emission, &mut rng, &mut stats)?;
                stats.decays_processed += 1;
                stats.photons_detected += (blue.len() + pink.len()) as u64;
                sink.score(&decay, &blue, &pink);
            }
            Ok(stats)
        })
        .collect::<PhgResult<Vec<_>>>()?;

    Ok(worker_stats.into_iter().fold(RunStats::default(), RunStats::merge))
}

/// Tracks every photon of one decay to its conclusion, returning the
/// detected photons partitioned by PET coincidence color (both empty for
/// SPECT, which only ever tags [`PhotonFlags::BLUE`]).
fn simulate_decay(
    ctx: &SimContext,
    decay: &Decay,
    photons: Vec<Photon>,
    emission: &dyn EmissionList,
    rng: &mut Rng,
    stats: &mut RunStats,
) -> PhgResult<(Vec<Photon>, Vec<Photon>)> {
    let mut detected = Vec::new();
    for photon in photons {
        track_photon(ctx, photon, decay, emission, rng, &mut detected, stats)?;
    }
    let (blue, pink): (Vec<Photon>, Vec<Photon>) = detected.into_iter().partition(|p| p.flags.contains(PhotonFlags::BLUE));
    Ok((blue, pink))
}

/// Drives one photon through the object, and on to the collimator if one
/// is configured, pushing every photon that ultimately reaches the
/// detector — real or forced — onto `detected`.
fn track_photon(
    ctx: &SimContext,
    mut photon: Photon,
    decay: &Decay,
    emission: &dyn EmissionList,
    rng: &mut Rng,
    detected: &mut Vec<Photon>,
    stats: &mut RunStats,
) -> PhgResult<()> {
    let Some(mut voxel) = ctx.object.locate_attenuation(photon.pos) else {
        return Ok(());
    };

    let model = InteractionModel {
        model_absorption: !ctx.config.forced_non_absorption,
        model_coherent: ctx.config.model_coherent_in_obj,
    };

    let mut cell_list = CellList::new();
    loop {
        let budget = rng.exp_free_paths();
        let event = calc_new_position(photon.pos, photon.dir, voxel, budget, photon.energy_kev, &ctx.tracker_geometry(), ctx.object_oracle.as_ref(), &mut cell_list)?;

        match event {
            TrackEvent::Interact { pos, voxel: v, mat_idx } => {
                photon.pos = pos;
                voxel = v;
                photon.voxel = Some(voxel);

                let incoming_dir = photon.dir;
                let incoming_energy = photon.energy_kev;
                let first_scatter = !photon.has_scattered();

                let p_scat = ctx.object_oracle.prob_scatter(mat_idx, photon.energy_kev, model.model_coherent);
                let p_compton_cond = ctx.object_oracle.prob_compton_conditional(mat_idx, photon.energy_kev, model.model_coherent);
                let u = rng.uniform01();

                match decide_interaction(u, p_scat, p_compton_cond, model) {
                    Interaction::Absorb => return Ok(()),
                    Interaction::ComptonScatter => {
                        photon.num_scatters_obj += 1;
                        photon.register_scatter();
                        if first_scatter {
                            accumulate_scatter_start(ctx, &photon, decay);
                        }
                        if ctx.config.simulate_forced_detection {
                            try_forced_detection(ctx, photon.pos, incoming_dir, incoming_energy, &photon, voxel, decay, emission, rng, detected, stats)?;
                        }
                        emission.do_compton(&mut photon);
                    }
                    Interaction::CohScatter => {
                        photon.num_scatters_obj += 1;
                        photon.register_scatter();
                        if first_scatter {
                            accumulate_scatter_start(ctx, &photon, decay);
                        }
                        if ctx.config.simulate_forced_detection {
                            try_forced_detection(ctx, photon.pos, incoming_dir, incoming_energy, &photon, voxel, decay, emission, rng, detected, stats)?;
                        }
                        emission.do_coherent(&mut photon, mat_idx);
                    }
                }

                if photon.energy_kev < ctx.config.minimum_energy_kev {
                    return Ok(());
                }
                cell_list.clear();
            }
            TrackEvent::LayerCross { pos, .. } => {
                photon.pos = pos;
                match &ctx.collimator {
                    Some(geometry) => {
                        let col_model = InteractionModel {
                            model_absorption: !ctx.config.forced_non_absorption,
                            model_coherent: ctx.config.model_coherent_in_tomo,
                        };
                        let outcome = phg_collimator::track(&mut photon, geometry, ctx.tomo_oracle.as_ref(), emission, col_model, ctx.config.minimum_energy_kev, rng)?;
                        match outcome {
                            CollimatorOutcome::Detect => {
                                emission.do_detection(&photon);
                                accumulate_detected(ctx, &photon, decay, photon.pos);
                                detected.push(photon);
                                return Ok(());
                            }
                            CollimatorOutcome::Discard => return Ok(()),
                        }
                    }
                    None => return Ok(()),
                }
            }
            TrackEvent::Detect { pos, .. } => {
                photon.pos = pos;
                emission.do_detection(&photon);
                accumulate_detected(ctx, &photon, decay, photon.pos);
                detected.push(photon);
                return Ok(());
            }
            TrackEvent::Discard => return Ok(()),
        }
    }
}

fn accumulate_scatter_start(ctx: &SimContext, photon: &Photon, decay: &Decay) {
    let slice = ctx.object.slice_at_z(photon.pos.z).unwrap_or(0);
    let mut table = ctx.prod_table.lock().unwrap();
    let angle = table.angle_index(photon.dir.cz);
    table.accumulate_start(Population::Scatter, slice, angle, decay.start_weight, photon.current_weight);
}

fn accumulate_detected(ctx: &SimContext, photon: &Photon, decay: &Decay, pos: Position) {
    let population = if photon.has_scattered() { Population::Scatter } else { Population::Primary };
    let slice = ctx.object.slice_at_z(pos.z).unwrap_or(0);
    let mut table = ctx.prod_table.lock().unwrap();
    let angle = table.angle_index(photon.dir.cz);
    table.accumulate_detected(population, slice, angle, decay.start_weight, photon.current_weight);
}

/// Implements the §4.6/§4.7 forced-detection step at a scatter site: the
/// weight window decides how many forced-detection attempts this scatter
/// is worth (1 normally, `n` under splitting, 0 under roulette-death),
/// then each attempt samples an outgoing direction guaranteed to reach a
/// detectable exit and weights it by the probability of actually
/// surviving attenuation along that path.
///
/// The survival weight is not an explicit table lookup: it is
/// `exp(-totalFreePaths)` where `totalFreePaths` is the free-path integral
/// from the scatter site all the way to the critical zone's far edge.
/// [`crit_zone_free_paths`]'s `fp_to_exit` already covers both legs — the
/// remaining voxel-grid material between the scatter site and the
/// object's curved surface (from its internal march/cached cell list) and
/// the (by construction, vacuum) critical zone beyond it — so no separate
/// object-interior pass is needed; `fp_to_enter` is not used in this
/// weight, it marks the critical zone's own near edge for collimator
/// variants that need that boundary separately.
#[allow(clippy::too_many_arguments)]
fn try_forced_detection(
    ctx: &SimContext,
    pos: Position,
    incoming_dir: Direction,
    incoming_energy_kev: f64,
    photon: &Photon,
    voxel: VoxelIndex,
    decay: &Decay,
    emission: &dyn EmissionList,
    rng: &mut Rng,
    detected: &mut Vec<Photon>,
    stats: &mut RunStats,
) -> PhgResult<()> {
    let Some(fd_table) = &ctx.fd_table else { return Ok(()) };

    let slice = ctx.object.slice_at_z(pos.z).unwrap_or(0);
    let (n, child_weight) = {
        let mut table = ctx.prod_table.lock().unwrap();
        let angle = table.angle_index(incoming_dir.cz);
        let scat_productivity = table.productivity(Population::Scatter, slice, angle);
        match phg_tracker::apply_window(photon.scatter_weight, photon.scatter_target_weight, scat_productivity, ctx.config.weight_window_ratio, rng) {
            phg_tracker::WindowDecision::Killed => (0, 0.0),
            phg_tracker::WindowDecision::Normal => (1, photon.scatter_weight),
            phg_tracker::WindowDecision::Rouletted { scatter_weight } => (1, scatter_weight),
            phg_tracker::WindowDecision::Split(n) => (n, photon.scatter_weight / n as f64),
        }
    };

    for _ in 0..n {
        let sample = match &ctx.cbfd_table {
            Some(cbfd) => {
                let r = pos.radius();
                match cbfd.acceptance_window(r, pos.z) {
                    Some((min_cz, max_cz)) => sample_scatter_cbfd(fd_table, incoming_dir, incoming_energy_kev, min_cz, max_cz, ctx.config.minimum_energy_kev, rng),
                    None => None,
                }
            }
            None => sample_scatter(fd_table, pos, incoming_dir, incoming_energy_kev, &ctx.target_cylinder, ctx.config.acceptance_angle_deg, ctx.config.minimum_energy_kev, rng),
        };

        let Some(sample) = sample else { continue };

        let Some(intersection) = geom::will_intersect_crit_zone(pos, sample.new_dir, &ctx.object_cylinder, &ctx.limit_cylinder) else {
            continue;
        };

        let mut scratch = CellList::new();
        let crit = crit_zone_free_paths(pos, sample.new_dir, voxel, &ctx.object, ctx.object_oracle.as_ref(), incoming_energy_kev, intersection, &mut scratch)?;
        let survival = (-crit.fp_to_exit).exp();
        let weight = child_weight * sample.reweight * survival;
        if !weight.is_finite() || weight <= 0.0 {
            continue;
        }

        let hit_pos = Position::new(pos.x + intersection.dist_to_exit * sample.new_dir.cx, pos.y + intersection.dist_to_exit * sample.new_dir.cy, pos.z + intersection.dist_to_exit * sample.new_dir.cz);

        let mut detected_photon = *photon;
        detected_photon.pos = hit_pos;
        detected_photon.dir = sample.new_dir;
        detected_photon.energy_kev = sample.new_energy_kev;
        detected_photon.current_weight = weight;

        emission.do_detection(&detected_photon);
        accumulate_detected(ctx, &detected_photon, decay, hit_pos);
        detected.push(detected_photon);
        stats.forced_detections += 1;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use phg_core::config::{Config, SimulationMode};
    use phg_core::decay::DecayKind;
    use phg_core::geom::Cylinder;
    use phg_core::voxel::{MatIndex, Slice, VoxelObject};
    use phg_prodtbl::ProdTable;
    use std::sync::Mutex as StdMutex;

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

    struct FixedSource {
        decay: Decay,
        photons: StdMutex<Option<Vec<Photon>>>,
    }
    impl DecaySource for FixedSource {
        fn next_decay(&self, _rng: &mut Rng) -> Option<(Decay, Vec<Photon>)> {
            self.photons.lock().unwrap().take().map(|p| (self.decay, p))
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        blue_count: StdMutex<usize>,
        pink_count: StdMutex<usize>,
    }
    impl ScoringSink for RecordingSink {
        fn score(&self, _decay: &Decay, blue: &[Photon], pink: &[Photon]) {
            *self.blue_count.lock().unwrap() += blue.len();
            *self.pink_count.lock().unwrap() += pink.len();
        }
    }

    fn vacuum_slab() -> VoxelObject {
        let slice = Slice::new(-50.0, 50.0, -50.0, 50.0, -50.0, 50.0, 4, 4, 4, 4, vec![0; 16], vec![0; 16]).unwrap();
        VoxelObject::new(vec![slice]).unwrap()
    }

    fn base_config(mode: SimulationMode) -> Config {
        Config {
            acceptance_angle_deg: 90.0,
            minimum_energy_kev: 50.0,
            weight_window_ratio: 2.0,
            random_seed: 7,
            model_coherent_in_obj: false,
            model_coherent_in_tomo: false,
            simulate_forced_detection: false,
            forced_non_absorption: false,
            adjust_for_positron_range: false,
            adjust_for_collinearity: false,
            point_source_voxels: false,
            line_source_voxels: false,
            simulate_stratification: false,
            mode,
        }
    }

    fn vacuum_context(mode: SimulationMode) -> SimContext {
        let object = std::sync::Arc::new(vacuum_slab());
        let object_cylinder = Cylinder::centered(50.0, -50.0, 50.0);
        // spec's back-to-back-pair-in-vacuum scenario: target cylinder ==
        // object cylinder, so detection happens at the object's own
        // surface rather than past it.
        let target_cylinder = object_cylinder;
        let limit_cylinder = Cylinder::centered(60.0, -60.0, 60.0);
        SimContext::new(
            object,
            std::sync::Arc::new(Vacuum),
            std::sync::Arc::new(Vacuum),
            None,
            None,
            None,
            object_cylinder,
            target_cylinder,
            limit_cylinder,
            base_config(mode),
            ProdTable::flat(1, mode),
        )
    }

    #[test]
    fn pencil_beam_through_vacuum_slab_reaches_detection() {
        let ctx = vacuum_context(SimulationMode::Spect);
        let decay = Decay { pos: Position::new(0.0, 0.0, 0.0), start_weight: 1.0, decay_time_ns: 0.0, kind: DecayKind::SinglePhoton };
        let photon = Photon::new_primary(Position::new(0.0, 0.0, 0.0), Direction::from_unit(1.0, 0.0, 0.0), 511.0, 1.0, PhotonFlags::BLUE);
        let source = FixedSource { decay, photons: StdMutex::new(Some(vec![photon])) };
        let sink = RecordingSink::default();
        let emission = NoOpEmission;
        let cancel = AtomicBool::new(false);

        let stats = run(&ctx, &source, &emission, &sink, 1, 1, &cancel).unwrap();
        assert_eq!(stats.decays_processed, 1);
        assert_eq!(stats.photons_detected, 1);
        assert_eq!(*sink.blue_count.lock().unwrap(), 1);
        assert_eq!(*sink.pink_count.lock().unwrap(), 0);
    }

    #[test]
    fn back_to_back_pet_pair_in_vacuum_detects_both_colors() {
        let ctx = vacuum_context(SimulationMode::PetCoincidencesOnly);
        let decay = Decay { pos: Position::new(0.0, 0.0, 0.0), start_weight: 1.0, decay_time_ns: 0.0, kind: DecayKind::Positron };
        let blue = Photon::new_primary(Position::new(0.0, 0.0, 0.0), Direction::from_unit(1.0, 0.0, 0.0), 511.0, 1.0, PhotonFlags::BLUE);
        let pink = Photon::new_primary(Position::new(0.0, 0.0, 0.0), Direction::from_unit(-1.0, 0.0, 0.0), 511.0, 1.0, PhotonFlags::PINK);
        let source = FixedSource { decay, photons: StdMutex::new(Some(vec![blue, pink])) };
        let sink = RecordingSink::default();
        let emission = NoOpEmission;
        let cancel = AtomicBool::new(false);

        let stats = run(&ctx, &source, &emission, &sink, 1, 1, &cancel).unwrap();
        assert_eq!(stats.photons_detected, 2);
        assert_eq!(*sink.blue_count.lock().unwrap(), 1);
        assert_eq!(*sink.pink_count.lock().unwrap(), 1);
    }

    #[test]
    fn cancellation_flag_stops_before_exhausting_decays() {
        struct InfiniteSource;
        impl DecaySource for InfiniteSource {
            fn next_decay(&self, _rng: &mut Rng) -> Option<(Decay, Vec<Photon>)> {
                let decay = Decay { pos: Position::new(0.0, 0.0, 0.0), start_weight: 1.0, decay_time_ns: 0.0, kind: DecayKind::SinglePhoton };
                let photon = Photon::new_primary(Position::new(0.0, 0.0, 0.0), Direction::from_unit(0.0, 0.0, 1.0), 511.0, 1.0, PhotonFlags::BLUE);
                Some((decay, vec![photon]))
            }
        }

        let ctx = vacuum_context(SimulationMode::Spect);
        let source = InfiniteSource;
        let sink = RecordingSink::default();
        let emission = NoOpEmission;
        let cancel = AtomicBool::new(true);

        let stats = run(&ctx, &source, &emission, &sink, 1000, 1, &cancel).unwrap();
        assert_eq!(stats.decays_processed, 0);
    }
}
