use linfa::traits::{Fit, Predict};
use linfa::Dataset;
use linfa_svm::{Svm, SvmParams};
use ndarray::{Array1, Array2};
use serde_json::Value;

use crate::config::ParamMap;
use crate::error::{MlrError, Result};
use crate::models::regressor_trait::{check_training_data, not_fitted, Regressor};
use crate::params;

/// Epsilon support-vector regression.
pub struct SvrRegressor {
    c: f64,
    epsilon: f64,
    kernel: String,
    gamma: f64,
    degree: f64,
    model: Option<Svm<f64, f64>>,
}

impl Default for SvrRegressor {
    fn default() -> Self {
        Self {
            c: 1.0,
            epsilon: 0.1,
            kernel: "rbf".to_string(),
            gamma: 1.0,
            degree: 3.0,
            model: None,
        }
    }
}

impl SvrRegressor {
    fn build_params(&self) -> Result<SvmParams<f64, f64>> {
        let svm = Svm::<f64, f64>::params().c_svr(self.c, Some(self.epsilon));
        match self.kernel.as_str() {
            "linear" => Ok(svm.linear_kernel()),
            // linfa's gaussian kernel is exp(-|a - b|² / eps)
            "rbf" | "gauss" => Ok(svm.gaussian_kernel(1.0 / self.gamma)),
            "poly" => Ok(svm.polynomial_kernel(1.0, self.degree)),
            other => Err(MlrError::Config(format!(
                "Unsupported SVR kernel '{}'. Valid options are: linear, rbf, poly",
                other
            ))),
        }
    }
}

impl Regressor for SvrRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_training_data(self.name(), x, y)?;
        let dataset = Dataset::new(x.clone(), y.clone());
        let model = self
            .build_params()?
            .fit(&dataset)
            .map_err(|err| MlrError::Regressor(format!("SVR fit failed: {}", err)))?;
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
        p.insert("c".to_string(), Value::from(self.c));
        p.insert("epsilon".to_string(), Value::from(self.epsilon));
        p.insert("kernel".to_string(), Value::from(self.kernel.clone()));
        p.insert("gamma".to_string(), Value::from(self.gamma));
        p.insert("degree".to_string(), Value::from(self.degree));
        p
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "c" => self.c = params::as_positive_f64(name, value)?,
            "epsilon" => self.epsilon = params::as_f64(name, value)?.max(0.0),
            "kernel" => self.kernel = params::as_string(name, value)?,
            "gamma" => self.gamma = params::as_positive_f64(name, value)?,
            "degree" => self.degree = params::as_positive_f64(name, value)?,
            _ => return Err(params::unknown(self.name(), name)),
        }
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn fresh(&self) -> Box<dyn Regressor> {
        Box::new(Self {
            c: self.c,
            epsilon: self.epsilon,
            kernel: self.kernel.clone(),
            gamma: self.gamma,
            degree: self.degree,
            model: None,
        })
    }

    fn name(&self) -> &str {
        "SVR"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fits_a_linear_trend() {
        let x = Array2::from_shape_fn((20, 1), |(i, _)| i as f64 / 10.0);
        let y = x.column(0).mapv(|v| 2.0 * v);
        let mut svr = SvrRegressor::default();
        svr.set_param("kernel", &json!("linear")).unwrap();
        svr.set_param("c", &json!(10.0)).unwrap();
        svr.set_param("epsilon", &json!(0.01)).unwrap();
        svr.fit(&x, &y).unwrap();
        let pred = svr.predict(&x).unwrap();
        assert!((pred[19] - y[19]).abs() < 0.2, "{:?}", pred);
    }

    #[test]
    fn unknown_kernel_is_rejected_at_fit() {
        let mut svr = SvrRegressor::default();
        svr.set_param("kernel", &json!("sigmoid")).unwrap();
        let x = Array2::zeros((3, 1));
        assert!(svr.fit(&x, &Array1::zeros(3)).is_err());
    }
}
