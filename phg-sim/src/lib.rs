//! Per-decay simulation orchestration (component C11, with C9 exposed
//! through [`traits::DecaySource`]): wires the object tracker, forced
//! detection, weight window, productivity table and MC PET collimator
//! into one decay-at-a-time loop, then fans decays out across a rayon
//! thread pool.

pub mod context;
pub mod simulate;
pub mod traits;

pub use context::SimContext;
pub use simulate::{run, RunStats};
pub use traits::{DecaySource, ScoringSink};
