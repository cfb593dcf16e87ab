use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec};
use gbdt::gradient_boost::GBDT;
use ndarray::{Array1, Array2};
use serde_json::Value;

use crate::config::ParamMap;
use crate::error::Result;
use crate::models::regressor_trait::{check_training_data, not_fitted, Regressor};
use crate::params;

/// Gradient-boosted regression trees with squared-error loss.
pub struct GradientBoostingRegressor {
    n_estimators: usize,
    learning_rate: f64,
    max_depth: u32,
    min_samples_leaf: usize,
    subsample: f64,
    max_features: f64,
    verbose: i64,
    model: Option<GBDT>,
}

impl Default for GradientBoostingRegressor {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
            min_samples_leaf: 1,
            subsample: 1.0,
            max_features: 1.0,
            verbose: 0,
            model: None,
        }
    }
}

fn to_data(x: &Array2<f64>, y: Option<&Array1<f64>>) -> DataVec {
    let mut data = DataVec::with_capacity(x.nrows());
    for (i, row) in x.outer_iter().enumerate() {
        let features: Vec<f32> = row.iter().map(|&v| v as f32).collect();
        let label = y.map_or(0.0, |y| y[i] as f32);
        data.push(Data::new_training_data(features, 1.0, label, None));
    }
    data
}

impl Regressor for GradientBoostingRegressor {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_training_data(self.name(), x, y)?;
        let mut config = Config::new();
        config.set_feature_size(x.ncols());
        config.set_shrinkage(self.learning_rate as f32);
        config.set_max_depth(self.max_depth);
        config.set_iterations(self.n_estimators);
        config.set_min_leaf_size(self.min_samples_leaf);
        config.set_data_sample_ratio(self.subsample);
        config.set_feature_sample_ratio(self.max_features);
        config.set_debug(self.verbose > 1);
        config.set_loss("SquaredError");

        let mut gbdt = GBDT::new(&config);
        let mut train = to_data(x, Some(y));
        gbdt.fit(&mut train);
        log::debug!(
            "Fitted {} trees of depth {} on {} samples",
            self.n_estimators,
            self.max_depth,
            x.nrows()
        );
        self.model = Some(gbdt);
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let model = self.model.as_ref().ok_or_else(|| not_fitted(self.name()))?;
        let predictions = model.predict(&to_data(x, None));
        Ok(predictions.into_iter().map(|v| v as f64).collect())
    }

    fn params(&self) -> ParamMap {
        let mut p = ParamMap::new();
        p.insert("n_estimators".to_string(), Value::from(self.n_estimators));
        p.insert("learning_rate".to_string(), Value::from(self.learning_rate));
        p.insert("max_depth".to_string(), Value::from(self.max_depth));
        p.insert("min_samples_leaf".to_string(), Value::from(self.min_samples_leaf));
        p.insert("subsample".to_string(), Value::from(self.subsample));
        p.insert("max_features".to_string(), Value::from(self.max_features));
        p.insert("verbose".to_string(), Value::from(self.verbose));
        p
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "n_estimators" => self.n_estimators = params::as_usize(name, value)?,
            "learning_rate" => self.learning_rate = params::as_positive_f64(name, value)?,
            "max_depth" => self.max_depth = params::as_usize(name, value)? as u32,
            "min_samples_leaf" => self.min_samples_leaf = params::as_usize(name, value)?,
            "subsample" => self.subsample = params::as_positive_f64(name, value)?.min(1.0),
            "max_features" => self.max_features = params::as_positive_f64(name, value)?.min(1.0),
            "verbose" => {
                self.verbose = match value {
                    Value::Bool(b) => *b as i64,
                    other => params::as_usize(name, other)? as i64,
                }
            }
            _ => return Err(params::unknown(self.name(), name)),
        }
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.model.is_some()
    }

    fn fresh(&self) -> Box<dyn Regressor> {
        Box::new(Self {
            model: None,
            ..*self
        })
    }

    fn name(&self) -> &str {
        "GradientBoostingRegressor"
    }
}
