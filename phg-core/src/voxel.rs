//! Voxel object (component C4): an axial stack of uniform-in-slice
//! rectilinear grids, each carrying a separate activity and attenuation
//! material index map.

use crate::error::{PhgError, PhgResult};
use crate::geom::{Direction, Position};
use log::error;

/// A material index, as returned by [`Slice::activity_at`] /
/// [`Slice::attenuation_at`]. Negative values are reserved for "outside the
/// object" sentinel entries.
pub type MatIndex = i16;

/// Sentinel material index meaning "not part of the object".
pub const MAT_OUTSIDE: MatIndex = -1;

/// One axial slice of the voxel object: a uniform rectilinear grid in x,y
/// shared between the activity and attenuation maps (though their
/// resolutions may differ).
///
/// Row 0 of both grids is the row at `y_max` (y decreases with row index,
/// x increases with column index).
#[derive(Clone, Debug)]
pub struct Slice {
    pub z_min: f64,
    pub z_max: f64,
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
    pub num_act_x: usize,
    pub num_act_y: usize,
    pub num_att_x: usize,
    pub num_att_y: usize,
    activity: Vec<MatIndex>,
    attenuation: Vec<MatIndex>,
}

impl Slice {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        z_min: f64,
        z_max: f64,
        x_min: f64,
        x_max: f64,
        y_min: f64,
        y_max: f64,
        num_act_x: usize,
        num_act_y: usize,
        num_att_x: usize,
        num_att_y: usize,
        activity: Vec<MatIndex>,
        attenuation: Vec<MatIndex>,
    ) -> PhgResult<Self> {
        if activity.len() != num_act_x * num_act_y {
            return Err(PhgError::Configuration(format!(
                "activity grid has {} entries, expected {}",
                activity.len(),
                num_act_x * num_act_y
            )));
        }
        if attenuation.len() != num_att_x * num_att_y {
            return Err(PhgError::Configuration(format!(
                "attenuation grid has {} entries, expected {}",
                attenuation.len(),
                num_att_x * num_att_y
            )));
        }
        Ok(Slice {
            z_min,
            z_max,
            x_min,
            x_max,
            y_min,
            y_max,
            num_act_x,
            num_act_y,
            num_att_x,
            num_att_y,
            activity,
            attenuation,
        })
    }

    pub fn act_voxel_width(&self) -> f64 {
        (self.x_max - self.x_min) / self.num_act_x as f64
    }
    pub fn act_voxel_height(&self) -> f64 {
        (self.y_max - self.y_min) / self.num_act_y as f64
    }
    pub fn att_voxel_width(&self) -> f64 {
        (self.x_max - self.x_min) / self.num_att_x as f64
    }
    pub fn att_voxel_height(&self) -> f64 {
        (self.y_max - self.y_min) / self.num_att_y as f64
    }

    pub fn activity_at(&self, x_idx: usize, y_idx: usize) -> PhgResult<MatIndex> {
        if x_idx >= self.num_act_x || y_idx >= self.num_act_y {
            error!("activity voxel index ({x_idx},{y_idx}) out of range ({},{})", self.num_act_x, self.num_act_y);
            return Err(PhgError::RuntimeInvariant(format!(
                "activity voxel index ({x_idx},{y_idx}) out of range ({},{})",
                self.num_act_x, self.num_act_y
            )));
        }
        Ok(self.activity[y_idx * self.num_act_x + x_idx])
    }

    pub fn attenuation_at(&self, x_idx: usize, y_idx: usize) -> PhgResult<MatIndex> {
        if x_idx >= self.num_att_x || y_idx >= self.num_att_y {
            error!("attenuation voxel index ({x_idx},{y_idx}) out of range ({},{})", self.num_att_x, self.num_att_y);
            return Err(PhgError::RuntimeInvariant(format!(
                "attenuation voxel index ({x_idx},{y_idx}) out of range ({},{})",
                self.num_att_x, self.num_att_y
            )));
        }
        Ok(self.attenuation[y_idx * self.num_att_x + x_idx])
    }

    /// x index of the attenuation-grid column containing world x.
    fn att_x_index(&self, x: f64) -> usize {
        (((x - self.x_min) / self.att_voxel_width()) as isize)
            .clamp(0, self.num_att_x as isize - 1) as usize
    }

    /// y index of the attenuation-grid row containing world y (row 0 is at
    /// y_max).
    fn att_y_index(&self, y: f64) -> usize {
        (((self.y_max - y) / self.att_voxel_height()) as isize)
            .clamp(0, self.num_att_y as isize - 1) as usize
    }
}

/// `(sliceIdx, xIdx, yIdx)`, always pointing to the voxel containing the
/// photon's position unless it is outside the object, in which case it
/// holds the last voxel visited.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VoxelIndex {
    pub slice: usize,
    pub x: usize,
    pub y: usize,
}

/// The full voxel object: an axially contiguous stack of [`Slice`]s sharing
/// x/y extents.
#[derive(Clone, Debug)]
pub struct VoxelObject {
    slices: Vec<Slice>,
}

impl VoxelObject {
    pub fn new(slices: Vec<Slice>) -> PhgResult<Self> {
        if slices.is_empty() {
            return Err(PhgError::Configuration("voxel object has no slices".into()));
        }
        for i in 0..slices.len() - 1 {
            if !crate::rng::approx_eq(
                slices[i].z_max,
                slices[i + 1].z_min,
                crate::rng::APPROX_EQ_TOLERANCE,
                0,
            ) {
                return Err(PhgError::Configuration(format!(
                    "slice {i} z_max ({}) does not meet slice {} z_min ({})",
                    slices[i].z_max,
                    i + 1,
                    slices[i + 1].z_min
                )));
            }
        }
        let (x_min, x_max, y_min, y_max) = (
            slices[0].x_min,
            slices[0].x_max,
            slices[0].y_min,
            slices[0].y_max,
        );
        for (i, s) in slices.iter().enumerate() {
            if s.x_min != x_min || s.x_max != x_max || s.y_min != y_min || s.y_max != y_max {
                return Err(PhgError::Configuration(format!(
                    "slice {i} does not share the object's x/y extents"
                )));
            }
        }
        Ok(VoxelObject { slices })
    }

    pub fn slices(&self) -> &[Slice] {
        &self.slices
    }

    pub fn z_min(&self) -> f64 {
        self.slices[0].z_min
    }
    pub fn z_max(&self) -> f64 {
        self.slices[self.slices.len() - 1].z_max
    }

    pub fn slice_at_z(&self, z: f64) -> Option<usize> {
        self.slices
            .iter()
            .position(|s| z >= s.z_min && z <= s.z_max)
    }

    /// Locates the attenuation voxel containing `pos`, or `None` if `pos`
    /// is outside the object's axial extent.
    pub fn locate_attenuation(&self, pos: Position) -> Option<VoxelIndex> {
        let slice_idx = self.slice_at_z(pos.z)?;
        let slice = &self.slices[slice_idx];
        Some(VoxelIndex {
            slice: slice_idx,
            x: slice.att_x_index(pos.x),
            y: slice.att_y_index(pos.y),
        })
    }

    pub fn attenuation_material(&self, idx: VoxelIndex) -> PhgResult<MatIndex> {
        self.slices
            .get(idx.slice)
            .ok_or_else(|| {
                error!("slice index {} out of range ({} slices)", idx.slice, self.slices.len());
                PhgError::RuntimeInvariant(format!("slice index {} out of range", idx.slice))
            })?
            .attenuation_at(idx.x, idx.y)
    }
}

/// Distances, from the current position along `dir`, to the next plane the
/// ray would cross in each of x, y, z within the current voxel/slice —
/// step 1-2 of the voxel traversal algorithm. Cosines whose magnitude is
/// below `1e-7` are clamped to `+/-1e-7` before computing the axial step,
/// bounding the resulting position bias by a cell width over the path
/// length.
#[derive(Copy, Clone, Debug)]
pub struct NextFaceDistances {
    pub dist_to_next_x: f64,
    pub dist_to_next_y: f64,
    pub dist_to_next_z: f64,
}

const COSINE_CLAMP: f64 = 1e-7;

fn clamp_cosine(c: f64) -> f64 {
    if c.abs() < COSINE_CLAMP {
        COSINE_CLAMP.copysign(c)
    } else {
        c
    }
}

/// Computes the distances to the next x/y/z grid planes given the current
/// position, direction, slice and voxel indices.
pub fn next_face_distances(pos: Position, dir: Direction, slice: &Slice, idx: VoxelIndex) -> NextFaceDistances {
    let cx = clamp_cosine(dir.cx);
    let cy = clamp_cosine(dir.cy);
    let cz = clamp_cosine(dir.cz);

    let vw = slice.att_voxel_width();
    let vh = slice.att_voxel_height();

    let next_x_plane = if cx > 0.0 {
        slice.x_min + (idx.x + 1) as f64 * vw
    } else {
        slice.x_min + idx.x as f64 * vw
    };
    let next_y_plane = if cy > 0.0 {
        // y decreases with row index, so moving in +y means moving toward
        // a smaller row index, i.e. toward slice.y_max.
        slice.y_max - idx.y as f64 * vh
    } else {
        slice.y_max - (idx.y + 1) as f64 * vh
    };
    let next_z_plane = if cz > 0.0 { slice.z_max } else { slice.z_min };

    NextFaceDistances {
        dist_to_next_x: (next_x_plane - pos.x) / cx,
        dist_to_next_y: (next_y_plane - pos.y) / cy,
        dist_to_next_z: (next_z_plane - pos.z) / cz,
    }
}

/// Per-axis step size used once inside a voxel: `voxel_extent / |cosine|`,
/// with the same cosine clamp as [`next_face_distances`].
pub fn general_dist_to_step(voxel_extent: f64, cosine: f64) -> f64 {
    voxel_extent / clamp_cosine(cosine).abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_slice(z_min: f64, z_max: f64, n: usize, mat: MatIndex) -> Slice {
        Slice::new(
            z_min,
            z_max,
            -10.0,
            10.0,
            -10.0,
            10.0,
            n,
            n,
            n,
            n,
            vec![mat; n * n],
            vec![mat; n * n],
        )
        .unwrap()
    }

    #[test]
    fn locate_attenuation_respects_row_zero_at_y_max() {
        let obj = VoxelObject::new(vec![flat_slice(-5.0, 5.0, 2, 0)]).unwrap();
        let idx = obj.locate_attenuation(Position::new(5.0, 9.0, 0.0)).unwrap();
        assert_eq!(idx.y, 0);
        let idx2 = obj.locate_attenuation(Position::new(5.0, -9.0, 0.0)).unwrap();
        assert_eq!(idx2.y, 1);
    }

    #[test]
    fn non_contiguous_slices_rejected() {
        let s0 = flat_slice(-5.0, 0.0, 2, 0);
        let s1 = flat_slice(0.5, 5.0, 2, 0);
        assert!(VoxelObject::new(vec![s0, s1]).is_err());
    }

    #[test]
    fn cosine_clamp_bounded_bias() {
        let c = clamp_cosine(1e-12);
        assert!((c - COSINE_CLAMP).abs() < 1e-20);
    }
}
