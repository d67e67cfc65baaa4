//! Layered cylinder-segment geometry for the Monte-Carlo PET collimator
//! (§4.8): each layer is a shell between an inner and an outer cylinder,
//! subdivided axially into segments whose walls may be parallel
//! (cylindrical) or tapered (conical frustum).

use log::warn;
use phg_core::error::{PhgError, PhgResult};
use phg_core::geom::Cylinder;
use phg_core::voxel::MatIndex;

/// One axial segment of a layer. `inner_z_min/max` bound the segment
/// where it meets the layer's inner cylinder; `outer_z_min/max` where it
/// meets the outer cylinder. Equal inner/outer bounds make the segment's
/// axial walls flat planes (parallel); unequal bounds make them conical
/// frustums (tapered), consistent with
/// [`phg_core::geom::tapered_wall_intersection`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Segment {
    pub inner_z_min: f64,
    pub inner_z_max: f64,
    pub outer_z_min: f64,
    pub outer_z_max: f64,
}

impl Segment {
    pub fn parallel(z_min: f64, z_max: f64) -> Self {
        Segment {
            inner_z_min: z_min,
            inner_z_max: z_max,
            outer_z_min: z_min,
            outer_z_max: z_max,
        }
    }

    fn is_parallel(&self) -> bool {
        phg_core::rng::approx_eq(self.inner_z_min, self.outer_z_min, phg_core::rng::APPROX_EQ_TOLERANCE, 0)
            && phg_core::rng::approx_eq(self.inner_z_max, self.outer_z_max, phg_core::rng::APPROX_EQ_TOLERANCE, 0)
    }

    /// Linearly interpolates this segment's axial bounds at radius `r`
    /// between the layer's `inner_radius` and `outer_radius`.
    fn z_bounds_at_radius(&self, r: f64, inner_radius: f64, outer_radius: f64) -> (f64, f64) {
        let span = outer_radius - inner_radius;
        let t = if span.abs() < 1e-12 { 0.0 } else { (r - inner_radius) / span };
        let z_min = self.inner_z_min + t * (self.outer_z_min - self.inner_z_min);
        let z_max = self.inner_z_max + t * (self.outer_z_max - self.inner_z_max);
        (z_min, z_max)
    }
}

/// Whether a segment's construction was declared parallel or tapered;
/// checked against the actual z bounds at construction time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SegmentKind {
    Parallel,
    Tapered,
}

/// One layer of the collimator: a material-filled shell between
/// `inner_radius` and `outer_radius`, axially subdivided into segments.
#[derive(Clone, Debug)]
pub struct Layer {
    pub inner_radius: f64,
    pub outer_radius: f64,
    pub mat_idx: MatIndex,
    pub segments: Vec<Segment>,
}

impl Layer {
    /// Validates and builds a layer. Each `(segment, kind)` pair is
    /// checked: a `Parallel` segment whose inner/outer z bounds differ
    /// fails construction (§4.8: "the tracker must fail construction
    /// otherwise").
    pub fn new(inner_radius: f64, outer_radius: f64, mat_idx: MatIndex, segments: Vec<(Segment, SegmentKind)>) -> PhgResult<Self> {
        if outer_radius <= inner_radius {
            warn!("rejecting layer: outer radius {outer_radius} must exceed inner radius {inner_radius}");
            return Err(PhgError::Configuration(format!(
                "layer outer radius {outer_radius} must exceed inner radius {inner_radius}"
            )));
        }
        if segments.is_empty() {
            warn!("rejecting layer: no segments given");
            return Err(PhgError::Configuration("layer must have at least one segment".into()));
        }

        let mut built = Vec::with_capacity(segments.len());
        for (seg, kind) in segments {
            if kind == SegmentKind::Parallel && !seg.is_parallel() {
                warn!("rejecting layer: segment declared parallel but bounds differ: {seg:?}");
                return Err(PhgError::Configuration(format!(
                    "parallel segment requires innerMinZ==outerMinZ && innerMaxZ==outerMaxZ, got {seg:?}"
                )));
            }
            built.push(seg);
        }

        Ok(Layer { inner_radius, outer_radius, mat_idx, segments: built })
    }

    /// The layer-wide inner bounding cylinder: radius `inner_radius`,
    /// z spanning the min/max across every segment's inner bound.
    pub fn inner_bounding(&self) -> Cylinder {
        let z_min = self.segments.iter().map(|s| s.inner_z_min.min(s.inner_z_max)).fold(f64::INFINITY, f64::min);
        let z_max = self.segments.iter().map(|s| s.inner_z_min.max(s.inner_z_max)).fold(f64::NEG_INFINITY, f64::max);
        Cylinder::centered(self.inner_radius, z_min, z_max)
    }

    /// The layer-wide outer bounding cylinder.
    pub fn outer_bounding(&self) -> Cylinder {
        let z_min = self.segments.iter().map(|s| s.outer_z_min.min(s.outer_z_max)).fold(f64::INFINITY, f64::min);
        let z_max = self.segments.iter().map(|s| s.outer_z_min.max(s.outer_z_max)).fold(f64::NEG_INFINITY, f64::max);
        Cylinder::centered(self.outer_radius, z_min, z_max)
    }

    /// The index of the segment whose trapezoidal axial span contains
    /// `(r, z)`, interpolating each segment's bounds linearly in radius.
    pub fn segment_at(&self, r: f64, z: f64) -> Option<usize> {
        self.segments.iter().position(|seg| {
            let (lo, hi) = seg.z_bounds_at_radius(r, self.inner_radius, self.outer_radius);
            z >= lo - 1e-7 && z <= hi + 1e-7
        })
    }

    /// The conical-wall endpoints (inner-radius z, outer-radius z) of the
    /// low (`side = -1`) or high (`side = 1`) axial wall of segment
    /// `seg_idx`, for use with [`phg_core::geom::tapered_wall_intersection`].
    pub fn wall_z(&self, seg_idx: usize, low: bool) -> (f64, f64) {
        let seg = &self.segments[seg_idx];
        if low {
            (seg.inner_z_min, seg.outer_z_min)
        } else {
            (seg.inner_z_max, seg.outer_z_max)
        }
    }
}

/// The full stack of layers, innermost first.
#[derive(Clone, Debug)]
pub struct CollimatorGeometry {
    pub layers: Vec<Layer>,
}

impl CollimatorGeometry {
    pub fn new(layers: Vec<Layer>) -> PhgResult<Self> {
        if layers.is_empty() {
            warn!("rejecting collimator: no layers given");
            return Err(PhgError::Configuration("collimator must have at least one layer".into()));
        }
        Ok(CollimatorGeometry { layers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parallel_segment_with_mismatched_bounds_fails_construction() {
        let bad = Segment {
            inner_z_min: -5.0,
            inner_z_max: 5.0,
            outer_z_min: -4.0,
            outer_z_max: 5.0,
        };
        let err = Layer::new(10.0, 12.0, 1, vec![(bad, SegmentKind::Parallel)]);
        assert!(err.is_err());
    }

    #[test]
    fn tapered_segment_with_mismatched_bounds_is_accepted() {
        let tapered = Segment {
            inner_z_min: -5.0,
            inner_z_max: 5.0,
            outer_z_min: -3.0,
            outer_z_max: 3.0,
        };
        assert!(Layer::new(10.0, 12.0, 1, vec![(tapered, SegmentKind::Tapered)]).is_ok());
    }

    #[test]
    fn inner_bounding_spans_all_segments() {
        let layer = Layer::new(
            10.0,
            12.0,
            1,
            vec![
                (Segment::parallel(-5.0, 0.0), SegmentKind::Parallel),
                (Segment::parallel(0.0, 5.0), SegmentKind::Parallel),
            ],
        )
        .unwrap();
        let bound = layer.inner_bounding();
        assert_eq!(bound.z_min, -5.0);
        assert_eq!(bound.z_max, 5.0);
    }

    #[test]
    fn segment_at_finds_containing_segment_for_parallel_layer() {
        let layer = Layer::new(
            10.0,
            12.0,
            1,
            vec![
                (Segment::parallel(-5.0, 0.0), SegmentKind::Parallel),
                (Segment::parallel(0.0, 5.0), SegmentKind::Parallel),
            ],
        )
        .unwrap();
        assert_eq!(layer.segment_at(11.0, -2.5), Some(0));
        assert_eq!(layer.segment_at(11.0, 2.5), Some(1));
    }
}
