//! Numeric building blocks shared by the cube, preprocessing and model code.
//!
//! `MaskedArray` carries missing-value masks next to `ndarray` data; `linalg`
//! holds the small dense solvers used by PCA, the Gaussian process and the
//! local explainer.
pub mod linalg;
pub mod masked;

pub use masked::{Aggregation, MaskedArray};
