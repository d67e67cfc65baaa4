//! Simulation context (§6): the read-mostly geometry, material oracles and
//! precomputed tables every decay's tracking shares, plus the one piece of
//! state every worker mutates — the productivity table's accumulators.

use phg_collimator::CollimatorGeometry;
use phg_core::config::Config;
use phg_core::geom::Cylinder;
use phg_core::material::MaterialOracle;
use phg_core::voxel::VoxelObject;
use phg_forced_detection::{CbfdTable, FdTable};
use phg_prodtbl::ProdTable;
use phg_tracker::TrackerGeometry;
use std::sync::{Arc, Mutex};

/// Everything a decay's tracking loop needs to run, shared read-only across
/// worker threads except for [`SimContext::prod_table`], which is
/// mutex-protected per §5's "implementer's choice" between a lock and a
/// lock-free atomic accumulator — a single `Mutex` is the simpler of the
/// two and the productivity update is not the hot path (it runs once per
/// scatter/detection, not per voxel crossing).
pub struct SimContext {
    pub object: Arc<VoxelObject>,
    pub object_oracle: Arc<dyn MaterialOracle>,
    pub tomo_oracle: Arc<dyn MaterialOracle>,
    pub fd_table: Option<Arc<FdTable>>,
    pub cbfd_table: Option<Arc<CbfdTable>>,
    pub collimator: Option<Arc<CollimatorGeometry>>,
    pub object_cylinder: Cylinder,
    pub target_cylinder: Cylinder,
    pub limit_cylinder: Cylinder,
    pub config: Config,
    pub prod_table: Mutex<ProdTable>,
}

impl SimContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        object: Arc<VoxelObject>,
        object_oracle: Arc<dyn MaterialOracle>,
        tomo_oracle: Arc<dyn MaterialOracle>,
        fd_table: Option<Arc<FdTable>>,
        cbfd_table: Option<Arc<CbfdTable>>,
        collimator: Option<Arc<CollimatorGeometry>>,
        object_cylinder: Cylinder,
        target_cylinder: Cylinder,
        limit_cylinder: Cylinder,
        config: Config,
        prod_table: ProdTable,
    ) -> Self {
        SimContext {
            object,
            object_oracle,
            tomo_oracle,
            fd_table,
            cbfd_table,
            collimator,
            object_cylinder,
            target_cylinder,
            limit_cylinder,
            config,
            prod_table: Mutex::new(prod_table),
        }
    }

    /// Borrowed geometry bundle for [`phg_tracker::calc_new_position`].
    pub fn tracker_geometry(&self) -> TrackerGeometry<'_> {
        TrackerGeometry {
            object: &self.object,
            object_cylinder: self.object_cylinder,
            target_cylinder: self.target_cylinder,
            acceptance_angle_deg: self.config.acceptance_angle_deg,
        }
    }
}
