//! Monte-Carlo PET collimator tracker (C10): layered cylinder-segment
//! geometry with tapered walls, sharing the object tracker's interaction
//! decision policy but without a voxel grid.

pub mod geometry;
pub mod track;

pub use geometry::{CollimatorGeometry, Layer, Segment, SegmentKind};
pub use track::{track, CollimatorOutcome};
