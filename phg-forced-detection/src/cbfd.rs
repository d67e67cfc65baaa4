//! Cone-beam forced detection (§4.6, cone-beam variant): a position-
//! dependent acceptance window for collimated SPECT geometries, where the
//! detectable solid angle narrows toward a focal circle instead of the
//! fixed cone used by the PET table.
//!
//! Built at the level the forced-detection table itself operates at
//! (`omegaMin(r,z)`, `deltaMuMin/Max(r,z)`) rather than the underlying
//! focal-circle root solve: the table only ever needs the resulting
//! acceptance window, and rebuilding it from first principles at sample
//! time would be both slower and no more precise than caching it on the
//! same `(r, z)` grid the PET table uses for `(iei, iwi)`.

use crate::bins::LinearAxis;
use crate::klein_nishina::{compton_energy_out, kn_density};
use crate::table::{FdTableConfig, FdTableDims};
use log::warn;
use phg_core::error::PhgResult;

/// Focal-circle collimator geometry the cone-beam acceptance window is
/// derived from.
#[derive(Clone, Copy, Debug)]
pub struct FocalGeometry {
    pub focal_radius_cm: f64,
    pub z_min_col: f64,
    pub z_max_col: f64,
    /// Maximum angular deviation from the central ray a collimator hole
    /// still passes, in degrees.
    pub theta_max_dev_deg: f64,
}

impl FocalGeometry {
    /// The central acceptance angle at radius `r`, axial position `z`:
    /// the angle subtended between `(r,z)` and the focal circle's rim,
    /// projected onto the collimator's axial slab.
    fn omega_min(&self, r: f64, z: f64) -> f64 {
        let dz = if z < self.z_min_col {
            self.z_min_col - z
        } else if z > self.z_max_col {
            z - self.z_max_col
        } else {
            0.0
        };
        let dr = self.focal_radius_cm - r;
        dr.atan2(dz.max(1e-9))
    }

    /// `(min, max)` half-aperture about `sin(omegaMin(r,z))`, clipped by
    /// `sin(thetaMaxDev)` and by whether the ray would miss the target
    /// slab entirely.
    fn delta_mu_range(&self, r: f64, z: f64) -> (f64, f64) {
        let sin_omega = self.omega_min(r, z).sin();
        let half_aperture = self.theta_max_dev_deg.to_radians().sin();
        let lo = (sin_omega - half_aperture).max(-1.0 - sin_omega);
        let hi = (sin_omega + half_aperture).min(1.0 - sin_omega);
        (lo, hi)
    }

    /// `phoTrkPositionIsAcceptable`-equivalent: whether a ray leaving
    /// `(r,z)` toward the focal-cone projection onto the collimator slab,
    /// augmented by `focal_radius_cm * sin(thetaMaxDev)` as a safety
    /// margin, can reach the slab at all.
    pub fn position_is_acceptable(&self, r: f64, z: f64) -> bool {
        let margin = self.focal_radius_cm * self.theta_max_dev_deg.to_radians().sin();
        if z < self.z_min_col - margin || z > self.z_max_col + margin {
            return false;
        }
        r <= self.focal_radius_cm + margin
    }
}

/// One cell's acceptance window, cached per `(r, z)` bin alongside the
/// PET table's own `(iei, iwi)` cells.
#[derive(Clone, Copy, Debug)]
struct CbfdCell {
    omega_min: f64,
    delta_mu_min: f64,
    delta_mu_max: f64,
}

/// The cone-beam forced-detection table: a dense `(r, z)` grid of
/// acceptance windows, read alongside the PET table's energy/cosine axes
/// at sample time.
#[derive(Clone, Debug)]
pub struct CbfdTable {
    pub r_axis: LinearAxis,
    pub z_axis: LinearAxis,
    geometry: FocalGeometry,
    cells: Vec<CbfdCell>,
}

impl CbfdTable {
    pub fn build(geometry: FocalGeometry, r_axis: LinearAxis, z_axis: LinearAxis, max_table_bytes: usize) -> PhgResult<Self> {
        let num_cells = r_axis.num * z_axis.num;
        let bytes = num_cells * std::mem::size_of::<CbfdCell>();
        if bytes > max_table_bytes {
            warn!("rejecting cbfd table: would use {bytes} bytes, over the {max_table_bytes}-byte budget");
            return Err(phg_core::error::PhgError::Configuration(format!(
                "cone-beam acceptance table would use {bytes} bytes, over the {max_table_bytes}-byte budget"
            )));
        }

        let mut cells = Vec::with_capacity(num_cells);
        for ir in 0..r_axis.num {
            let r = r_axis.center(ir);
            for iz in 0..z_axis.num {
                let z = z_axis.center(iz);
                let omega_min = geometry.omega_min(r, z);
                let (delta_mu_min, delta_mu_max) = geometry.delta_mu_range(r, z);
                cells.push(CbfdCell { omega_min, delta_mu_min, delta_mu_max });
            }
        }

        Ok(CbfdTable { r_axis, z_axis, geometry, cells })
    }

    fn cell(&self, r: f64, z: f64) -> &CbfdCell {
        let ir = self.r_axis.index_of(r);
        let iz = self.z_axis.index_of(z);
        &self.cells[ir * self.z_axis.num + iz]
    }

    /// The `(min_cz, max_cz)` window a scatter at radius `r`, height `z`
    /// must sample its outgoing `cosθ` from: `sin(omegaMin)` is the
    /// bin-center offset, and `deltaMuMin/Max` the half-aperture about it.
    pub fn acceptance_window(&self, r: f64, z: f64) -> Option<(f64, f64)> {
        if !self.geometry.position_is_acceptable(r, z) {
            return None;
        }
        let cell = self.cell(r, z);
        let center = cell.omega_min.sin();
        let min_cz = (center + cell.delta_mu_min).clamp(-1.0, 1.0);
        let max_cz = (center + cell.delta_mu_max).clamp(-1.0, 1.0);
        if min_cz >= max_cz {
            None
        } else {
            Some((min_cz, max_cz))
        }
    }
}

/// Builds the `(r, z)` axes a cone-beam table shares with an
/// energy/cosine-indexed PET table's dims, reusing the same outgoing
/// cosine resolution for the radial axis and the incoming-cosine
/// resolution for the axial one. This keeps memory accounting in one
/// place ([`FdTableConfig::max_table_bytes`]).
pub fn axes_from_dims(dims: &FdTableDims, max_r: f64, z_min: f64, z_max: f64) -> (LinearAxis, LinearAxis) {
    let r_axis = LinearAxis::new(0.0, max_r, dims.iwi.num);
    let z_axis = LinearAxis::new(z_min, z_max, dims.iwo.num);
    (r_axis, z_axis)
}

/// Reweights a cone-beam forced-detection sample the same way the PET
/// table does (§4.6 step 7): the continuous Klein-Nishina density at the
/// sampled scattering angle over the bin's stored (bin-center) density,
/// normalized by the total cross section.
pub fn cbfd_reweight(e_in_kev: f64, e_out_kev: f64, cos_scat: f64, bin_density: f64, total_kn_e_in: f64) -> f64 {
    kn_density(e_in_kev, e_out_kev, cos_scat) / (bin_density * total_kn_e_in)
}

/// Computes Compton energy-out for a cone-beam sample, mirroring the PET
/// table's own use of the same kinematics (kept here so callers don't
/// need to reach into the PET module for a cone-beam-only path).
pub fn cbfd_energy_out(e_in_kev: f64, cos_scat: f64) -> f64 {
    compton_energy_out(e_in_kev, cos_scat)
}

/// Convenience constructor mirroring [`FdTableConfig`]'s memory-budget
/// convention, for callers building a cone-beam table alongside a PET one.
pub fn default_max_bytes(config: &FdTableConfig) -> usize {
    config.max_table_bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry() -> FocalGeometry {
        FocalGeometry {
            focal_radius_cm: 40.0,
            z_min_col: -10.0,
            z_max_col: 10.0,
            theta_max_dev_deg: 5.0,
        }
    }

    #[test]
    fn position_is_acceptable_within_focal_radius_and_slab() {
        let geo = geometry();
        assert!(geo.position_is_acceptable(20.0, 0.0));
    }

    #[test]
    fn position_is_unacceptable_far_outside_focal_radius() {
        let geo = geometry();
        assert!(!geo.position_is_acceptable(1000.0, 0.0));
    }

    #[test]
    fn build_rejects_tables_over_the_memory_budget() {
        let geo = geometry();
        let r_axis = LinearAxis::new(0.0, 40.0, 8);
        let z_axis = LinearAxis::new(-10.0, 10.0, 8);
        assert!(CbfdTable::build(geo, r_axis, z_axis, 1).is_err());
    }

    #[test]
    fn acceptance_window_is_ordered_when_present() {
        let geo = geometry();
        let r_axis = LinearAxis::new(0.0, 40.0, 16);
        let z_axis = LinearAxis::new(-10.0, 10.0, 16);
        let table = CbfdTable::build(geo, r_axis, z_axis, 1 << 20).unwrap();
        if let Some((lo, hi)) = table.acceptance_window(10.0, 0.0) {
            assert!(lo < hi);
        }
    }
}
