//! Crate-wide error type.
//!
//! Per the error handling design, errors are grouped into the kinds the
//! simulation actually distinguishes: configuration mistakes and resource
//! exhaustion abort initialization, runtime invariant violations are fatal
//! mid-run. Sampling rejections (an empty forced-detection acceptance cone,
//! a forced-detection energy below threshold) and numerical near-zero
//! discriminants are *not* represented here — they are local, non-fatal
//! events the caller folds into counters instead of propagating.

use thiserror::Error;

/// A fatal error raised by any component of the simulation.
#[derive(Debug, Error)]
pub enum PhgError {
    /// An invalid or self-contradictory configuration was supplied.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A precomputed table or buffer could not be allocated within its
    /// declared memory budget.
    #[error("resource error: {0}")]
    Resource(String),

    /// A runtime invariant was violated (e.g. an out-of-range voxel index,
    /// a read of material for a voxel outside the object, an exhausted
    /// cell list when one was required to decide an interaction site).
    #[error("runtime invariant violated: {0}")]
    RuntimeInvariant(String),
}

/// Convenience alias used throughout the workspace.
pub type PhgResult<T> = Result<T, PhgError>;
