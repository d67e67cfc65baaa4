//! Forced-detection scatter sampling (C7): the Klein-Nishina table build,
//! PET and cone-beam (CBFD) scatter samplers.

pub mod bins;
pub mod cbfd;
pub mod klein_nishina;
pub mod scatter;
pub mod table;

pub use bins::LinearAxis;
pub use cbfd::{CbfdTable, FocalGeometry};
pub use klein_nishina::{compton_energy_out, kn_density, total_kn};
pub use scatter::{sample_scatter, sample_scatter_cbfd, ScatterSample};
pub use table::{FdTable, FdTableConfig, FdTableDims};
