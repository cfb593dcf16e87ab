use ndarray::{Array1, Array2, Axis};
use serde_json::Value;

use crate::config::{ParamMap, PredictOptions};
use crate::error::{MlrError, Result};
use crate::math::linalg::{cholesky, cholesky_solve, solve_lower};
use crate::models::regressor_trait::{check_training_data, not_fitted, Prediction, Regressor};
use crate::params;

struct FittedProcess {
    x_train: Array2<f64>,
    chol: Array2<f64>,
    weights: Array1<f64>,
}

/// Gaussian-process regression with a squared-exponential kernel.
///
/// `k(a, b) = signal_variance · exp(-|a - b|² / (2 length_scale²))`, with
/// `alpha` added to the diagonal of the training covariance.
pub struct GaussianProcessRegressor {
    length_scale: f64,
    signal_variance: f64,
    alpha: f64,
    fitted: Option<FittedProcess>,
}

impl Default for GaussianProcessRegressor {
    fn default() -> Self {
        Self {
            length_scale: 1.0,
            signal_variance: 1.0,
            alpha: 1e-6,
            fitted: None,
        }
    }
}

impl GaussianProcessRegressor {
    fn kernel(&self, a: &Array2<f64>, b: &Array2<f64>) -> Array2<f64> {
        let scale = 2.0 * self.length_scale * self.length_scale;
        Array2::from_shape_fn((a.nrows(), b.nrows()), |(i, j)| {
            let d2: f64 = a
                .row(i)
                .iter()
                .zip(b.row(j).iter())
                .map(|(p, q)| (p - q) * (p - q))
                .sum();
            self.signal_variance * (-d2 / scale).exp()
        })
    }
}

impl Regressor for GaussianProcessRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_training_data(self.name(), x, y)?;
        let mut k = self.kernel(x, x);
        for i in 0..k.nrows() {
            k[[i, i]] += self.alpha;
        }
        let chol = cholesky(&k).map_err(|err| {
            MlrError::Regressor(format!(
                "{} (try increasing 'alpha'): {}",
                self.name(),
                err
            ))
        })?;
        let weights = cholesky_solve(&chol, y);
        self.fitted = Some(FittedProcess {
            x_train: x.clone(),
            chol,
            weights,
        });
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let fitted = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        Ok(self.kernel(x, &fitted.x_train).dot(&fitted.weights))
    }

    fn predict_dist(&self, x: &Array2<f64>, options: PredictOptions) -> Result<Prediction> {
        let fitted = self.fitted.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        let k_star = self.kernel(x, &fitted.x_train);
        let mean = k_star.dot(&fitted.weights);
        if !options.return_var && !options.return_cov {
            return Ok(Prediction::mean_only(mean));
        }

        // v = L⁻¹ K*ᵀ, one column per prediction point
        let mut v = Array2::<f64>::zeros((fitted.x_train.nrows(), x.nrows()));
        for (j, row) in k_star.axis_iter(Axis(0)).enumerate() {
            v.column_mut(j).assign(&solve_lower(&fitted.chol, &row.to_owned()));
        }
        if options.return_cov {
            let cov = self.kernel(x, x) - v.t().dot(&v);
            return Ok(Prediction {
                mean,
                var: None,
                cov: Some(cov),
            });
        }
        let var = v
            .axis_iter(Axis(1))
            .map(|column| (self.signal_variance - column.dot(&column)).max(0.0))
            .collect();
        Ok(Prediction {
            mean,
            var: Some(var),
            cov: None,
        })
    }

    fn params(&self) -> ParamMap {
        let mut p = ParamMap::new();
        p.insert("length_scale".to_string(), Value::from(self.length_scale));
        p.insert("signal_variance".to_string(), Value::from(self.signal_variance));
        p.insert("alpha".to_string(), Value::from(self.alpha));
        p
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "length_scale" => self.length_scale = params::as_positive_f64(name, value)?,
            "signal_variance" => self.signal_variance = params::as_positive_f64(name, value)?,
            "alpha" => self.alpha = params::as_f64(name, value)?.max(0.0),
            _ => return Err(params::unknown(self.name(), name)),
        }
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.fitted.is_some()
    }

    fn fresh(&self) -> Box<dyn Regressor> {
        Box::new(Self {
            length_scale: self.length_scale,
            signal_variance: self.signal_variance,
            alpha: self.alpha,
            fitted: None,
        })
    }

    fn name(&self) -> &str {
        "GaussianProcessRegressor"
    }
}
