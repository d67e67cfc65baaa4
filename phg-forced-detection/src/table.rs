//! Forced-detection table (§4.6): a dense, precomputed Klein-Nishina
//! density over `(incoming energy, incoming cosθ, outgoing cosθ, Δφ)`,
//! with its cumulative marginals, built once at startup and read many
//! times per decay.

use crate::bins::LinearAxis;
use crate::klein_nishina::{compton_energy_out, kn_density};
use log::warn;
use phg_core::error::{PhgError, PhgResult};

/// A small safety pad above the user's global minimum energy: outgoing
/// energies within this margin of the floor are treated as undetectable
/// when building the table, avoiding density entries right at a noisy
/// edge.
const ENERGY_FLOOR_PAD_KEV: f64 = 1.0;

/// Table resolution and range. Incoming/outgoing cosθ both span
/// `[-1, 1]`; Δφ spans `[0, 2π)`.
#[derive(Clone, Copy, Debug)]
pub struct FdTableConfig {
    pub min_incoming_energy_kev: f64,
    pub max_incoming_energy_kev: f64,
    pub num_incoming_energy_bins: usize,
    pub num_incoming_cosine_bins: usize,
    pub num_outgoing_cosine_bins: usize,
    pub num_azimuth_bins: usize,
    /// The configured global minimum energy (§6 `minimum_energy`); used
    /// to zero out density for outgoing energies that would be
    /// discarded downstream anyway.
    pub min_energy_kev: f64,
    /// Memory budget (bytes) the table's dense arrays must fit inside;
    /// construction fails rather than silently allocating past it (§9).
    pub max_table_bytes: usize,
}

#[derive(Clone, Copy, Debug)]
pub struct FdTableDims {
    pub iei: LinearAxis,
    pub iwi: LinearAxis,
    pub iwo: LinearAxis,
    pub ipo: LinearAxis,
}

/// The three dense arrays kept per `(iei, iwi)` cell: the raw density,
/// its cumulative over `(iwo, ipo)` flattened in row-major order (the
/// "cumulative over ipo at fixed iwo" marginal extended across rows),
/// and the cumulative of each row's total (the "cumulative over iwo of
/// the iwo-marginals").
#[derive(Clone, Debug)]
struct FdCell {
    ipo_table: Vec<f64>,
    ipo_cum_table: Vec<f64>,
    iwo_cum_table: Vec<f64>,
}

/// The forced-detection table (PET variant): incoming energy and cosθ
/// select a cell; within the cell a cumulative lookup picks an outgoing
/// cosθ/Δφ bin.
#[derive(Clone, Debug)]
pub struct FdTable {
    pub dims: FdTableDims,
    cells: Vec<FdCell>,
}

fn scatter_cosine(cos_in: f64, cos_out: f64, delta_phi: f64) -> f64 {
    let sin_in = (1.0 - cos_in * cos_in).max(0.0).sqrt();
    let sin_out = (1.0 - cos_out * cos_out).max(0.0).sqrt();
    cos_in * cos_out + sin_in * sin_out * delta_phi.cos()
}

impl FdTable {
    pub fn build(config: FdTableConfig) -> PhgResult<Self> {
        let dims = FdTableDims {
            iei: LinearAxis::new(config.min_incoming_energy_kev, config.max_incoming_energy_kev, config.num_incoming_energy_bins),
            iwi: LinearAxis::new(-1.0, 1.0, config.num_incoming_cosine_bins),
            iwo: LinearAxis::new(-1.0, 1.0, config.num_outgoing_cosine_bins),
            ipo: LinearAxis::new(0.0, 2.0 * std::f64::consts::PI, config.num_azimuth_bins),
        };

        let num_cells = dims.iei.num * dims.iwi.num;
        let cell_bytes = (dims.iwo.num * dims.ipo.num * 2 + dims.iwo.num) * std::mem::size_of::<f64>();
        let total_bytes = num_cells * cell_bytes;
        if total_bytes > config.max_table_bytes {
            warn!("rejecting fd table: would use {total_bytes} bytes, over the {}-byte budget", config.max_table_bytes);
            return Err(PhgError::Configuration(format!(
                "forced-detection table would use {total_bytes} bytes, over the {}-byte budget",
                config.max_table_bytes
            )));
        }

        let mut cells = Vec::with_capacity(num_cells);
        for iei in 0..dims.iei.num {
            let e_in = dims.iei.center(iei);
            for iwi in 0..dims.iwi.num {
                let cos_in = dims.iwi.center(iwi);
                cells.push(build_cell(&dims, e_in, cos_in, config.min_energy_kev));
            }
        }

        Ok(FdTable { dims, cells })
    }

    fn cell(&self, iei: usize, iwi: usize) -> &FdCell {
        &self.cells[iei * self.dims.iwi.num + iwi]
    }

    /// Everything the scatter sampler needs to draw one outgoing
    /// `(cosθ, Δφ)` bin for an incoming `(energy, cosθ)` and an
    /// acceptance window `[min_cz, max_cz]`. Returns `None` when the
    /// window contains no density (nothing in it can ever be forced).
    pub(crate) fn sample_bin(&self, incoming_energy_kev: f64, incoming_cos_z: f64, min_cz: f64, max_cz: f64, u: f64) -> Option<BinSample> {
        let iei = self.dims.iei.index_of(incoming_energy_kev);
        let iwi = self.dims.iwi.index_of(incoming_cos_z);
        let min_idx = self.dims.iwo.index_of(min_cz);
        let max_idx = self.dims.iwo.index_of(max_cz);
        let cell = self.cell(iei, iwi);

        let num_ipo = self.dims.ipo.num;
        let lo = min_idx * num_ipo;
        let hi = (max_idx + 1) * num_ipo;
        let baseline = cell.ipo_cum_table[lo];
        let range = cell.iwo_cum_table[max_idx] - baseline;
        if range <= 0.0 {
            return None;
        }

        let target = baseline + u * range;
        let rel_idx = lookup_cumulative_index(&cell.ipo_cum_table[lo..hi], target);
        let global_idx = lo + rel_idx;
        let zcos_out_idx = global_idx / num_ipo;
        let ipo_idx = global_idx % num_ipo;
        let density = cell.ipo_table[global_idx];

        Some(BinSample {
            zcos_out_idx,
            ipo_idx,
            density,
        })
    }
}

pub(crate) struct BinSample {
    pub zcos_out_idx: usize,
    pub ipo_idx: usize,
    pub density: f64,
}

fn build_cell(dims: &FdTableDims, e_in: f64, cos_in: f64, min_energy_kev: f64) -> FdCell {
    let num_iwo = dims.iwo.num;
    let num_ipo = dims.ipo.num;
    let mut ipo_table = vec![0.0; num_iwo * num_ipo];

    for iwo in 0..num_iwo {
        let cos_out = dims.iwo.center(iwo);
        for ipo in 0..num_ipo {
            let delta_phi = dims.ipo.center(ipo);
            let cos_scat = scatter_cosine(cos_in, cos_out, delta_phi);
            let e_out = compton_energy_out(e_in, cos_scat);
            let density = if e_out < min_energy_kev + ENERGY_FLOOR_PAD_KEV {
                0.0
            } else {
                kn_density(e_in, e_out, cos_scat)
            };
            ipo_table[iwo * num_ipo + ipo] = density;
        }
    }

    let mut ipo_cum_table = vec![0.0; num_iwo * num_ipo];
    let mut running = 0.0;
    for (i, &d) in ipo_table.iter().enumerate() {
        running += d;
        ipo_cum_table[i] = running;
    }

    let mut iwo_cum_table = vec![0.0; num_iwo];
    for (iwo, slot) in iwo_cum_table.iter_mut().enumerate() {
        *slot = ipo_cum_table[(iwo + 1) * num_ipo - 1];
    }

    FdCell { ipo_table, ipo_cum_table, iwo_cum_table }
}

/// Finds the bin a cumulative `target` falls into: the smallest index
/// whose cumulative value exceeds `target`, i.e. standard CDF inversion
/// by binary search (`slice::partition_point`). Runs of equal values
/// (zero-density bins sharing a cumulative plateau) are skipped over
/// automatically since the search lands on the first value that differs
/// from the plateau.
fn lookup_cumulative_index(cumulative: &[f64], target: f64) -> usize {
    let n = cumulative.len();
    let idx = cumulative.partition_point(|&v| v <= target);
    idx.min(n - 1)
}
