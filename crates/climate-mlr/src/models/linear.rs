use linfa::traits::{Fit, Predict};
use linfa::Dataset;
use linfa_linear::{FittedLinearRegression, LinearRegression};
use ndarray::{Array1, Array2};
use serde_json::Value;

use crate::config::ParamMap;
use crate::error::{MlrError, Result};
use crate::models::regressor_trait::{check_training_data, not_fitted, Regressor};
use crate::params;

/// Ordinary least squares.
pub struct LinearRegressor {
    fit_intercept: bool,
    model: Option<FittedLinearRegression<f64>>,
}

impl Default for LinearRegressor {
    fn default() -> Self {
        Self {
            fit_intercept: true,
            model: None,
        }
    }
}

impl LinearRegressor {
    /// Fitted `(coefficients, intercept)`.
    pub fn coefficients(&self) -> Option<(&Array1<f64>, f64)> {
        self.model.as_ref().map(|m| (m.params(), m.intercept()))
    }
}

impl Regressor for LinearRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_training_data(self.name(), x, y)?;
        let dataset = Dataset::new(x.clone(), y.clone());
        let model = LinearRegression::new()
            .with_intercept(self.fit_intercept)
            .fit(&dataset)
            .map_err(|err| MlrError::Regressor(format!("linear regression failed: {}", err)))?;
        self.model = Some(model);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let model = self.model.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        let prediction: Array1<f64> = model.predict(x);
        Ok(prediction)
    }

    fn params(&self) -> ParamMap {
        let mut p = ParamMap::new();
        p.insert("fit_intercept".to_string(), Value::from(self.fit_intercept));
        p
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "fit_intercept" => self.fit_intercept = params::as_bool(name, value)?,
            _ => return Err(params::unknown(self.name(), name)),
        }
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn fresh(&self) -> Box<dyn Regressor> {
        Box::new(Self {
            fit_intercept: self.fit_intercept,
            model: None,
        })
    }

    fn name(&self) -> &str {
        "LinearRegression"
    }
}
