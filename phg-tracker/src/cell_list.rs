//! Explicit cell-list scratch buffer (§9, replacing the tracker's hidden
//! "previous call's voxel list" mutable state with an argument the caller
//! owns and clears per photon).

use phg_core::voxel::VoxelIndex;

/// One voxel segment a photon's path has already crossed: its length and
/// the attenuation coefficient that applied across it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Cell {
    pub voxel: VoxelIndex,
    pub distance: f64,
    pub mu: f64,
}

/// A reusable buffer of [`Cell`]s built up while tracking one photon and
/// cleared before the next. Walking it lets the critical-zone free-path
/// decomposition and a resumed interaction search reuse work already done
/// by a prior voxel march instead of re-marching from the object surface.
#[derive(Clone, Debug, Default)]
pub struct CellList {
    cells: Vec<Cell>,
}

impl CellList {
    pub fn new() -> Self {
        CellList { cells: Vec::new() }
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }

    pub fn push(&mut self, cell: Cell) {
        self.cells.push(cell);
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Cell> {
        self.cells.iter()
    }

    pub fn total_distance(&self) -> f64 {
        self.cells.iter().map(|c| c.distance).sum()
    }

    pub fn total_free_paths(&self) -> f64 {
        self.cells.iter().map(|c| c.distance * c.mu).sum()
    }
}
