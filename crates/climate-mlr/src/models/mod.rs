pub mod gbdt;
pub mod gpr;
pub mod linear;
#[cfg(feature = "svm")]
pub mod svm;

pub mod factory;
pub mod regressor_trait;

pub use factory::{Capabilities, ModelEntry, ModelRegistry};
pub use regressor_trait::{Prediction, Regressor};
