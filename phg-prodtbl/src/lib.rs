//! Productivity / stratification table (component C5).
//!
//! Two populations (primary, scatter) are tracked per `(slice, angle)`
//! cell. During simulation the tracker accumulates squared-weight sums;
//! at close time the accumulated table is reduced to a productivity value
//! and a max table is derived for the weight window to consult.

pub mod grid;
pub mod partition;

use grid::Grid2;
use log::warn;
use partition::AnglePartition;
use phg_core::config::SimulationMode;
use phg_core::error::{PhgError, PhgResult};
use std::fmt::Write as _;

/// Which population a weight belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Population {
    Primary,
    Scatter,
}

/// Per-cell accumulators for one population.
#[derive(Clone, Debug)]
struct Accumulator {
    start_squared: Grid2<f64>,
    det_squared: Grid2<f64>,
    plain_sum: Grid2<f64>,
    hits: Grid2<u64>,
}

impl Accumulator {
    fn new(num_slices: usize, num_angles: usize) -> Self {
        Accumulator {
            start_squared: Grid2::filled(num_slices, num_angles, 0.0),
            det_squared: Grid2::filled(num_slices, num_angles, 0.0),
            plain_sum: Grid2::filled(num_slices, num_angles, 0.0),
            hits: Grid2::filled(num_slices, num_angles, 0),
        }
    }

    fn accumulate_start(&mut self, slice: usize, angle: usize, decay_weight: f64, photon_weight: f64) {
        let w2 = (decay_weight * photon_weight).powi(2);
        *self.start_squared.get_mut(slice, angle) += w2;
        *self.plain_sum.get_mut(slice, angle) += decay_weight * photon_weight;
    }

    fn accumulate_detected(&mut self, slice: usize, angle: usize, decay_weight: f64, photon_weight: f64) {
        let w2 = (decay_weight * photon_weight).powi(2);
        *self.det_squared.get_mut(slice, angle) += w2;
        *self.hits.get_mut(slice, angle) += 1;
    }
}

/// The productivity/stratification table: an immutable read side
/// consulted by the tracker and weight window, plus the accumulators the
/// tracker writes into during a run.
pub struct ProdTable {
    partition: AnglePartition,
    num_slices: usize,
    mode: SimulationMode,

    /// Read-side productivities in force *during* this run — either
    /// loaded from a prior dump, flat (disabled stratification), or
    /// freshly derived from the acceptance angle.
    read_primary: Grid2<f64>,
    read_scatter: Grid2<f64>,

    accum_primary: Accumulator,
    accum_scatter: Accumulator,
}

impl ProdTable {
    /// Creates a flat table (single cell, productivity 1) for use when
    /// stratification is disabled.
    pub fn flat(num_slices: usize, mode: SimulationMode) -> Self {
        let partition = AnglePartition::flat();
        let num_angles = partition.len();
        ProdTable {
            partition,
            num_slices,
            mode,
            read_primary: Grid2::filled(num_slices, num_angles, 1.0),
            read_scatter: Grid2::filled(num_slices, num_angles, 1.0),
            accum_primary: Accumulator::new(num_slices, num_angles),
            accum_scatter: Accumulator::new(num_slices, num_angles),
        }
    }

    /// Builds a fresh stratified table from the acceptance angle, with all
    /// read-side productivities initialized to 1 (uninformative prior).
    pub fn from_acceptance_angle(num_slices: usize, acceptance_angle_deg: f64, mode: SimulationMode) -> Self {
        let partition = AnglePartition::stratified(acceptance_angle_deg);
        let num_angles = partition.len();
        ProdTable {
            partition,
            num_slices,
            mode,
            read_primary: Grid2::filled(num_slices, num_angles, 1.0),
            read_scatter: Grid2::filled(num_slices, num_angles, 1.0),
            accum_primary: Accumulator::new(num_slices, num_angles),
            accum_scatter: Accumulator::new(num_slices, num_angles),
        }
    }

    /// Loads a table from a text dump previously written by [`ProdTable::close`],
    /// validating that its acceptance angle matches the current configuration.
    pub fn from_text_dump(dump: &str, expected_acceptance_angle_deg: f64, mode: SimulationMode) -> PhgResult<Self> {
        let mut lines = dump.lines();
        let header = lines.next().ok_or_else(|| {
            warn!("rejecting productivity table dump: empty");
            PhgError::Configuration("empty productivity table dump".into())
        })?;
        let mut parts = header.split_whitespace();
        let num_slices: usize = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                warn!("rejecting productivity table dump: malformed header {header:?}");
                PhgError::Configuration("malformed productivity table header".into())
            })?;
        let acceptance_angle_deg: f64 = parts
            .next()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| {
                warn!("rejecting productivity table dump: malformed header {header:?}");
                PhgError::Configuration("malformed productivity table header".into())
            })?;

        let partition = AnglePartition::stratified(acceptance_angle_deg);
        partition.validate_matches(expected_acceptance_angle_deg)?;
        let num_angles = partition.len();

        let mut read_primary = Grid2::filled(num_slices, num_angles, 1.0);
        let mut read_scatter = Grid2::filled(num_slices, num_angles, 1.0);

        for line in lines {
            let mut fields = line.split_whitespace();
            let slice: usize = fields
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| PhgError::Configuration("malformed productivity row".into()))?;
            let angle: usize = fields
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| PhgError::Configuration("malformed productivity row".into()))?;
            let prim: f64 = fields
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| PhgError::Configuration("malformed productivity row".into()))?;
            let scat: f64 = fields
                .next()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| PhgError::Configuration("malformed productivity row".into()))?;
            read_primary.set(slice, angle, prim);
            read_scatter.set(slice, angle, scat);
        }

        Ok(ProdTable {
            partition,
            num_slices,
            mode,
            read_primary,
            read_scatter,
            accum_primary: Accumulator::new(num_slices, num_angles),
            accum_scatter: Accumulator::new(num_slices, num_angles),
        })
    }

    pub fn angle_index(&self, cos_theta: f64) -> usize {
        self.partition.angle_index(cos_theta)
    }

    pub fn num_angles(&self) -> usize {
        self.partition.len()
    }

    pub fn num_slices(&self) -> usize {
        self.num_slices
    }

    /// The read-side productivity currently in force for `population` at
    /// `(slice, angle)` — what the weight window consults mid-run.
    pub fn productivity(&self, population: Population, slice: usize, angle: usize) -> f64 {
        match population {
            Population::Primary => *self.read_primary.get(slice, angle),
            Population::Scatter => *self.read_scatter.get(slice, angle),
        }
    }

    pub fn accumulate_start(&mut self, population: Population, slice: usize, angle: usize, decay_weight: f64, photon_weight: f64) {
        let accum = match population {
            Population::Primary => &mut self.accum_primary,
            Population::Scatter => &mut self.accum_scatter,
        };
        accum.accumulate_start(slice, angle, decay_weight, photon_weight);
    }

    pub fn accumulate_detected(&mut self, population: Population, slice: usize, angle: usize, decay_weight: f64, photon_weight: f64) {
        let accum = match population {
            Population::Primary => &mut self.accum_primary,
            Population::Scatter => &mut self.accum_scatter,
        };
        accum.accumulate_detected(slice, angle, decay_weight, photon_weight);
    }

    /// The max table consulted by the weight window: for SPECT, the
    /// per-cell maximum of the primary and scatter read-side
    /// productivities; for PET, the maximum of the mirror-cell products
    /// `prim(s,a)*prim(s,last-a)` and `scat(s,a)*scat(s,last-a)`.
    pub fn max_table(&self) -> Grid2<f64> {
        let num_angles = self.num_angles();
        let mut out = Grid2::filled(self.num_slices, num_angles, 0.0);
        for slice in 0..self.num_slices {
            for angle in 0..num_angles {
                let value = match self.mode {
                    SimulationMode::Spect => {
                        let prim = *self.read_primary.get(slice, angle);
                        let scat = *self.read_scatter.get(slice, angle);
                        prim.max(scat)
                    }
                    SimulationMode::PetCoincidencesOnly | SimulationMode::PetCoincPlusSingles => {
                        let mirror = num_angles - 1 - angle;
                        let prim = *self.read_primary.get(slice, angle) * *self.read_primary.get(slice, mirror);
                        let scat = *self.read_scatter.get(slice, angle) * *self.read_scatter.get(slice, mirror);
                        prim.max(scat)
                    }
                };
                out.set(slice, angle, value);
            }
        }
        out
    }

    /// Reduces the accumulators to the output productivity table and
    /// returns its text dump. Cells are floored at 1/10 of the global
    /// average productivity for their population; an input table loaded
    /// at construction is *not* recomputed here — this always represents
    /// the freshly detected productivities from this run's accumulators.
    pub fn close(&mut self) -> String {
        let prim_out = reduce_population(&self.accum_primary);
        let scat_out = reduce_population(&self.accum_scatter);

        self.read_primary = prim_out.clone();
        self.read_scatter = scat_out.clone();

        let mut dump = String::new();
        let acc_angle = self.partition.acceptance_angle_deg.unwrap_or(0.0);
        let _ = writeln!(dump, "{} {}", self.num_slices, acc_angle);
        for slice in 0..self.num_slices {
            for angle in 0..self.num_angles() {
                let prim = *prim_out.get(slice, angle);
                let scat = *scat_out.get(slice, angle);
                let _ = writeln!(dump, "{slice} {angle} {prim} {scat}");
            }
        }
        dump
    }
}

fn reduce_population(accum: &Accumulator) -> Grid2<f64> {
    let num_slices = accum.start_squared.num_slices();
    let num_angles = accum.start_squared.num_angles();
    let mut out = Grid2::filled(num_slices, num_angles, 0.0);

    let mut total = 0.0;
    let mut count = 0usize;
    for slice in 0..num_slices {
        for angle in 0..num_angles {
            let start = *accum.start_squared.get(slice, angle);
            let det = *accum.det_squared.get(slice, angle);
            let value = if start > 0.0 { (det / start).sqrt() } else { 0.0 };
            out.set(slice, angle, value);
            total += value;
            count += 1;
        }
    }

    let global_avg = if count > 0 { total / count as f64 } else { 0.0 };
    let floor = global_avg / 10.0;
    for slice in 0..num_slices {
        for angle in 0..num_angles {
            let value = *out.get(slice, angle);
            if value < floor {
                out.set(slice, angle, floor);
            }
        }
    }
    out
}
