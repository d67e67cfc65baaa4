//! The angle-cell partition shared by the primary and scatter productivity
//! tables of a single slice (§4.4).

use log::warn;
use phg_core::error::{PhgError, PhgResult};

/// Number of fine cells placed inside the acceptance cone when
/// stratification is built from an acceptance angle.
pub const PRODTBL_ACC_STRAT_CELLS: usize = 48;

/// Number of coarse cells placed outside the acceptance cone.
pub const PRODTBL_NOTACC_STRAT_CELLS: usize = 12;

/// An ordered, disjoint partition of `cos(theta) in [-1, 1]` into cells.
#[derive(Clone, Debug, PartialEq)]
pub struct AnglePartition {
    /// `(start, end)` boundaries, ascending, covering `[-1, 1]` exactly.
    boundaries: Vec<(f64, f64)>,
    /// The acceptance angle (degrees) this partition was built from, if
    /// any — used to validate a loaded text dump against the current
    /// configuration.
    pub acceptance_angle_deg: Option<f64>,
}

impl AnglePartition {
    /// A single cell covering all of `[-1, 1]` — used when stratification
    /// is disabled.
    pub fn flat() -> Self {
        AnglePartition {
            boundaries: vec![(-1.0, 1.0)],
            acceptance_angle_deg: None,
        }
    }

    /// Builds the stratified partition: `PRODTBL_ACC_STRAT_CELLS` fine
    /// cells inside `[-sin(acc), +sin(acc)]` and `PRODTBL_NOTACC_STRAT_CELLS`
    /// coarse cells outside, evenly split and symmetric about 0.
    pub fn stratified(acceptance_angle_deg: f64) -> Self {
        let sine = acceptance_angle_deg.to_radians().sin();
        let mut boundaries = Vec::with_capacity(PRODTBL_ACC_STRAT_CELLS + PRODTBL_NOTACC_STRAT_CELLS);

        let outside_half = PRODTBL_NOTACC_STRAT_CELLS / 2;
        let outside_width = (1.0 - sine) / outside_half as f64;
        for i in 0..outside_half {
            let start = -1.0 + i as f64 * outside_width;
            let end = start + outside_width;
            boundaries.push((start, end));
        }

        let inside_width = (2.0 * sine) / PRODTBL_ACC_STRAT_CELLS as f64;
        for i in 0..PRODTBL_ACC_STRAT_CELLS {
            let start = -sine + i as f64 * inside_width;
            let end = start + inside_width;
            boundaries.push((start, end));
        }

        for i in 0..outside_half {
            let start = sine + i as f64 * outside_width;
            let end = start + outside_width;
            boundaries.push((start, end));
        }

        AnglePartition {
            boundaries,
            acceptance_angle_deg: Some(acceptance_angle_deg),
        }
    }

    pub fn len(&self) -> usize {
        self.boundaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boundaries.is_empty()
    }

    pub fn cell(&self, index: usize) -> (f64, f64) {
        self.boundaries[index]
    }

    /// Finds the cell index containing `cos_theta` via binary search over
    /// the ascending cell starts.
    pub fn angle_index(&self, cos_theta: f64) -> usize {
        let c = cos_theta.clamp(-1.0, 1.0);
        match self
            .boundaries
            .binary_search_by(|(start, end)| {
                if c < *start {
                    std::cmp::Ordering::Greater
                } else if c > *end {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            }) {
            Ok(idx) => idx,
            Err(idx) => idx.min(self.boundaries.len() - 1),
        }
    }

    /// Validates that a loaded partition's acceptance angle matches the
    /// configuration currently in force.
    pub fn validate_matches(&self, expected_acceptance_angle_deg: f64) -> PhgResult<()> {
        match self.acceptance_angle_deg {
            Some(angle) if (angle - expected_acceptance_angle_deg).abs() < 1e-6 => Ok(()),
            Some(angle) => {
                warn!(
                    "loaded productivity table acceptance angle ({angle}) does not match configured angle ({expected_acceptance_angle_deg})"
                );
                Err(PhgError::Configuration(format!(
                    "loaded productivity table acceptance angle ({angle}) does not match configured angle ({expected_acceptance_angle_deg})"
                )))
            }
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_partition_has_single_cell_covering_everything() {
        let p = AnglePartition::flat();
        assert_eq!(p.len(), 1);
        assert_eq!(p.angle_index(-1.0), 0);
        assert_eq!(p.angle_index(0.0), 0);
        assert_eq!(p.angle_index(1.0), 0);
    }

    #[test]
    fn stratified_partition_has_60_cells() {
        let p = AnglePartition::stratified(10.0);
        assert_eq!(p.len(), PRODTBL_ACC_STRAT_CELLS + PRODTBL_NOTACC_STRAT_CELLS);
    }

    #[test]
    fn stratified_partition_covers_full_range() {
        let p = AnglePartition::stratified(30.0);
        assert_eq!(p.cell(0).0, -1.0);
        assert_eq!(p.cell(p.len() - 1).1, 1.0);
    }

    #[test]
    fn angle_index_finds_fine_cells_near_zero() {
        let p = AnglePartition::stratified(10.0);
        let idx_zero = p.angle_index(0.0);
        let (start, end) = p.cell(idx_zero);
        assert!(start <= 0.0 && 0.0 <= end);
    }
}
