//! climate-mlr: machine-learning regression for gridded climate diagnostics.
//!
//! Datasets (cube files with role attributes) are catalogued, loaded with
//! units normalised and flattened into a feature matrix and label vector.
//! A pipeline of imputation, scaling, optional PCA and a target-scaled
//! regressor is fitted on them, optionally tuned by grid search, and used to
//! predict new cubes, which are written next to optional area-weighted
//! aggregates.
//!
//! Regressors are registered in [`models::ModelRegistry`]; the SVR backend
//! needs the `svm` feature.
pub mod catalog;
pub mod config;
pub mod cube;
pub mod error;
pub mod explain;
pub mod extract;
pub mod io;
pub mod loader;
pub mod logging;
pub mod math;
pub mod mlr_model;
pub mod model_selection;
pub mod models;
pub mod params;
pub mod pipeline;
pub mod postprocess;
pub mod preprocessing;
pub mod stats;
pub mod units;

pub use error::{MlrError, Result};
pub use mlr_model::{MlrData, MlrModel};
