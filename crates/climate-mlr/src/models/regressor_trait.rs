use ndarray::{Array1, Array2};
use serde_json::Value;

use crate::config::{ParamMap, PredictOptions};
use crate::error::{MlrError, Result};

/// Mean prediction with optional predictive variance or covariance.
#[derive(Clone, Debug, PartialEq)]
pub struct Prediction {
    pub mean: Array1<f64>,
    pub var: Option<Array1<f64>>,
    pub cov: Option<Array2<f64>>,
}

impl Prediction {
    pub fn mean_only(mean: Array1<f64>) -> Self {
        Self {
            mean,
            var: None,
            cov: None,
        }
    }
}

/// Contract of the final estimator of a pipeline.
///
/// Hyperparameters are exposed as a flat JSON map so that pipelines can
/// route nested `stage__param` names to them.
pub trait Regressor: Send + Sync {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()>;

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;

    /// Predict with uncertainty. Regressors without probabilistic output
    /// reject `return_var`/`return_cov`.
    fn predict_dist(&self, x: &Array2<f64>, options: PredictOptions) -> Result<Prediction> {
        if options.return_var || options.return_cov {
            return Err(MlrError::Regressor(format!(
                "{} cannot return variances or covariances",
                self.name()
            )));
        }
        Ok(Prediction::mean_only(self.predict(x)?))
    }

    fn params(&self) -> ParamMap;

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()>;

    fn is_fitted(&self) -> bool;

    /// Unfitted regressor with the same hyperparameters.
    fn fresh(&self) -> Box<dyn Regressor>;

    fn name(&self) -> &str {
        "regressor"
    }
}

pub(crate) fn not_fitted(name: &str) -> MlrError {
    MlrError::NotFitted(format!("{} has not been fitted yet", name))
}

pub(crate) fn check_training_data(name: &str, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(MlrError::Shape(format!(
            "{} got {} samples but {} targets",
            name,
            x.nrows(),
            y.len()
        )));
    }
    if x.nrows() == 0 {
        return Err(MlrError::Regressor(format!("{} needs at least one sample", name)));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(MlrError::Regressor(format!(
            "{} got non-finite training data",
            name
        )));
    }
    Ok(())
}
