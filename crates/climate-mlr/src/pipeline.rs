//! The regression pipeline: preprocessing stages followed by a regressor
//! fitted on a standardized target.
//!
//! Parameters of every stage are addressed as `<stage>__<parameter>`; the
//! final stage nests once more, e.g.
//! `transformed_target_regressor__regressor__max_depth`.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::{debug, warn};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::{ImputationStrategy, MlrConfig, ParamMap, PredictOptions};
use crate::error::{MlrError, Result};
use crate::models::{Prediction, Regressor};
use crate::preprocessing::{Pca, SimpleImputer, StandardScaler, Transform};

pub const FINAL_STEP: &str = "transformed_target_regressor";
const SEPARATOR: &str = "__";

/// A preprocessing stage.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Step {
    Imputer(SimpleImputer),
    Scaler(StandardScaler),
    Pca(Pca),
}

impl Step {
    pub fn name(&self) -> &'static str {
        match self {
            Step::Imputer(_) => "imputer",
            Step::Scaler(_) => "x_scaler",
            Step::Pca(_) => "pca",
        }
    }

    fn stage(&self) -> &dyn Transform {
        match self {
            Step::Imputer(s) => s,
            Step::Scaler(s) => s,
            Step::Pca(s) => s,
        }
    }

    fn stage_mut(&mut self) -> &mut dyn Transform {
        match self {
            Step::Imputer(s) => s,
            Step::Scaler(s) => s,
            Step::Pca(s) => s,
        }
    }
}

/// Regressor trained on the standardized target.
///
/// Predictions are mapped back to label space; variances and covariances
/// are scaled by the squared target scale.
pub struct TransformedTargetRegressor {
    regressor: Box<dyn Regressor>,
    transformer: StandardScaler,
}

impl TransformedTargetRegressor {
    pub fn new(regressor: Box<dyn Regressor>, transformer: StandardScaler) -> Self {
        Self { regressor, transformer }
    }

    pub fn regressor(&self) -> &dyn Regressor {
        self.regressor.as_ref()
    }

    pub fn transformer(&self) -> &StandardScaler {
        &self.transformer
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let y_column = y.view().insert_axis(Axis(1)).to_owned();
        let y_trans = self.transformer.fit_transform(&y_column)?;
        self.regressor.fit(x, &y_trans.column(0).to_owned())
    }

    pub fn predict_dist(&self, x: &Array2<f64>, options: PredictOptions) -> Result<Prediction> {
        let prediction = self.regressor.predict_dist(x, options)?;
        let mean_column = prediction.mean.insert_axis(Axis(1));
        let mean = self
            .transformer
            .inverse_transform(&mean_column)?
            .column(0)
            .to_owned();
        let scale = match (self.transformer.with_std, self.transformer.scale()) {
            (true, Some(scale)) => scale[0],
            _ => 1.0,
        };
        let factor = scale * scale;
        Ok(Prediction {
            mean,
            var: prediction.var.map(|v| v * factor),
            cov: prediction.cov.map(|c| c * factor),
        })
    }

    fn params(&self) -> ParamMap {
        let mut p = ParamMap::new();
        for (name, value) in self.regressor.params() {
            p.insert(format!("regressor{}{}", SEPARATOR, name), value);
        }
        for (name, value) in self.transformer.params() {
            p.insert(format!("transformer{}{}", SEPARATOR, name), value);
        }
        p
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name.split_once(SEPARATOR) {
            Some(("regressor", inner)) => self.regressor.set_param(inner, value),
            Some(("transformer", inner)) => self.transformer.set_param(inner, value),
            _ => Err(crate::params::unknown(FINAL_STEP, name)),
        }
    }

    fn is_fitted(&self) -> bool {
        self.regressor.is_fitted() && self.transformer.is_fitted()
    }

    fn reset(&mut self) {
        self.regressor = self.regressor.fresh();
        self.transformer.reset();
    }

    fn fresh(&self) -> Self {
        let mut transformer = self.transformer.clone();
        transformer.reset();
        Self {
            regressor: self.regressor.fresh(),
            transformer,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct CachedStep {
    step: Step,
    output: Array2<f64>,
}

/// On-disk memo of fitted preprocessing stages, keyed by stage name,
/// stage parameters and input data.
#[derive(Clone, Debug)]
pub struct TransformCache {
    dir: PathBuf,
}

impl TransformCache {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key(step: &Step, x: &Array2<f64>) -> u64 {
        let mut hasher = DefaultHasher::new();
        step.name().hash(&mut hasher);
        serde_json::to_string(&step.stage().params())
            .unwrap_or_default()
            .hash(&mut hasher);
        x.shape().hash(&mut hasher);
        for v in x.iter() {
            v.to_bits().hash(&mut hasher);
        }
        hasher.finish()
    }

    fn path(&self, step: &Step, x: &Array2<f64>) -> PathBuf {
        self.dir
            .join(format!("{}_{:016x}.json", step.name(), Self::key(step, x)))
    }

    fn load(&self, step: &Step, x: &Array2<f64>) -> Option<CachedStep> {
        let path = self.path(step, x);
        let content = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&content) {
            Ok(cached) => {
                debug!("Loaded cached '{}' stage from {}", step.name(), path.display());
                Some(cached)
            }
            Err(err) => {
                debug!("Ignoring unreadable cache file {}: {}", path.display(), err);
                None
            }
        }
    }

    fn store(&self, input: &Array2<f64>, cached: &CachedStep) -> anyhow::Result<()> {
        if cached.output.iter().any(|v| !v.is_finite()) {
            return Ok(());
        }
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create cache dir: {}", self.dir.display()))?;
        let path = self.path(&cached.step, input);
        let content = serde_json::to_string(cached)?;
        std::fs::write(&path, content)
            .with_context(|| format!("Failed to write cache file: {}", path.display()))?;
        Ok(())
    }
}

/// Preprocessing stages plus the final [`TransformedTargetRegressor`].
pub struct Pipeline {
    steps: Vec<Step>,
    final_step: TransformedTargetRegressor,
    cache: Option<TransformCache>,
}

impl Pipeline {
    pub fn new(steps: Vec<Step>, final_step: TransformedTargetRegressor) -> Self {
        Self {
            steps,
            final_step,
            cache: None,
        }
    }

    /// Standard MLR pipeline for `config` around `regressor`.
    pub fn from_config(config: &MlrConfig, regressor: Box<dyn Regressor>) -> Self {
        let mut steps = Vec::new();
        if config.imputation_strategy != ImputationStrategy::Remove {
            steps.push(Step::Imputer(SimpleImputer::new(
                config.imputation_strategy,
                config.imputation_fill_value,
            )));
        }
        let standardize = config.standardize_data;
        steps.push(Step::Scaler(StandardScaler::new(standardize, standardize)));
        if config.pca {
            steps.push(Step::Pca(Pca::default()));
        }
        let final_step = TransformedTargetRegressor::new(
            regressor,
            StandardScaler::new(standardize, standardize),
        );
        let mut pipeline = Self::new(steps, final_step);
        if let Some(dir) = config.cache_dir() {
            pipeline.cache = Some(TransformCache::new(dir));
        }
        pipeline
    }

    pub fn with_cache(mut self, cache: Option<TransformCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn cache(&self) -> Option<&TransformCache> {
        self.cache.as_ref()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        let mut names: Vec<&'static str> = self.steps.iter().map(Step::name).collect();
        names.push(FINAL_STEP);
        names
    }

    pub fn final_step(&self) -> &TransformedTargetRegressor {
        &self.final_step
    }

    pub fn regressor(&self) -> &dyn Regressor {
        self.final_step.regressor()
    }

    /// Every valid parameter name with its current value.
    pub fn params(&self) -> ParamMap {
        let mut p = ParamMap::new();
        for step in &self.steps {
            for (name, value) in step.stage().params() {
                p.insert(format!("{}{}{}", step.name(), SEPARATOR, name), value);
            }
        }
        for (name, value) in self.final_step.params() {
            p.insert(format!("{}{}{}", FINAL_STEP, SEPARATOR, name), value);
        }
        p
    }

    /// Apply parameters; unknown names are an error and nothing is applied.
    /// A non-empty update leaves the pipeline unfitted.
    pub fn set_params(&mut self, params: &ParamMap) -> Result<()> {
        if params.is_empty() {
            return Ok(());
        }
        let valid = self.params();
        if let Some(unknown) = params.keys().find(|name| !valid.contains_key(*name)) {
            return Err(MlrError::Config(format!(
                "Invalid parameter '{}' for pipeline with steps {:?}",
                unknown,
                self.step_names()
            )));
        }
        for (name, value) in params {
            self.set_param(name, value)?;
        }
        self.reset();
        Ok(())
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        let (stage, inner) = name
            .split_once(SEPARATOR)
            .ok_or_else(|| crate::params::unknown("pipeline", name))?;
        if stage == FINAL_STEP {
            return self.final_step.set_param(inner, value);
        }
        match self.steps.iter_mut().find(|s| s.name() == stage) {
            Some(step) => step.stage_mut().set_param(inner, value),
            None => Err(crate::params::unknown("pipeline", name)),
        }
    }

    fn reset(&mut self) {
        for step in &mut self.steps {
            step.stage_mut().reset();
        }
        self.final_step.reset();
    }

    pub fn is_fitted(&self) -> bool {
        self.final_step.is_fitted() && self.steps.iter().all(|s| s.stage().is_fitted())
    }

    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(MlrError::Shape(format!(
                "pipeline got {} samples but {} targets",
                x.nrows(),
                y.len()
            )));
        }
        let mut current = x.clone();
        for step in self.steps.iter_mut() {
            if let Some(cache) = &self.cache {
                if let Some(cached) = cache.load(step, &current) {
                    *step = cached.step;
                    current = cached.output;
                    continue;
                }
                let output = step.stage_mut().fit_transform(&current)?;
                let cached = CachedStep {
                    step: step.clone(),
                    output,
                };
                if let Err(err) = cache.store(&current, &cached) {
                    warn!("Could not cache '{}' stage: {:#}", step.name(), err);
                }
                current = cached.output;
            } else {
                current = step.stage_mut().fit_transform(&current)?;
            }
        }
        self.final_step.fit(&current, y)
    }

    /// Apply the fitted preprocessing stages.
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let mut current = x.clone();
        for step in &self.steps {
            current = step.stage().transform(&current)?;
        }
        Ok(current)
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(self.predict_dist(x, PredictOptions::default())?.mean)
    }

    pub fn predict_dist(&self, x: &Array2<f64>, options: PredictOptions) -> Result<Prediction> {
        if !self.is_fitted() {
            return Err(MlrError::NotFitted("pipeline has not been fitted".to_string()));
        }
        let transformed = self.transform(x)?;
        self.final_step.predict_dist(&transformed, options)
    }

    /// Unfitted pipeline with identical parameters and cache.
    pub fn fresh(&self) -> Pipeline {
        let steps = self
            .steps
            .iter()
            .map(|step| {
                let mut step = step.clone();
                step.stage_mut().reset();
                step
            })
            .collect();
        Pipeline {
            steps,
            final_step: self.final_step.fresh(),
            cache: self.cache.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::gpr::GaussianProcessRegressor;
    use crate::models::linear::LinearRegressor;
    use approx::assert_abs_diff_eq;
    use serde_json::json;

    fn config() -> MlrConfig {
        MlrConfig {
            cache_intermediate_results: false,
            ..MlrConfig::default()
        }
    }

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((20, 2), |(i, j)| {
            if j == 0 {
                i as f64
            } else {
                ((i * 7) % 11) as f64
            }
        });
        let y = x.column(0).mapv(|v| 100.0 + 3.0 * v);
        (x, y)
    }

    #[test]
    fn stage_names_follow_configuration() {
        let pipeline = Pipeline::from_config(&config(), Box::new(LinearRegressor::default()));
        assert_eq!(pipeline.step_names(), vec!["x_scaler", "pca", FINAL_STEP]);

        let imputing = MlrConfig {
            imputation_strategy: ImputationStrategy::Mean,
            pca: false,
            ..config()
        };
        let pipeline = Pipeline::from_config(&imputing, Box::new(LinearRegressor::default()));
        assert_eq!(pipeline.step_names(), vec!["imputer", "x_scaler", FINAL_STEP]);
    }

    #[test]
    fn parameter_names_are_nested() {
        let pipeline = Pipeline::from_config(&config(), Box::new(LinearRegressor::default()));
        let params = pipeline.params();
        assert_eq!(params["x_scaler__with_mean"], json!(true));
        assert_eq!(params["pca__n_components"], json!(null));
        assert_eq!(
            params["transformed_target_regressor__regressor__fit_intercept"],
            json!(true)
        );
        assert_eq!(
            params["transformed_target_regressor__transformer__with_std"],
            json!(true)
        );
    }

    #[test]
    fn set_params_rejects_unknown_and_invalidates_fit() {
        let (x, y) = data();
        let mut pipeline = Pipeline::from_config(&config(), Box::new(LinearRegressor::default()));
        pipeline.fit(&x, &y).unwrap();
        assert!(pipeline.is_fitted());

        let mut bad = ParamMap::new();
        bad.insert("pca__bogus".to_string(), json!(1));
        assert!(pipeline.set_params(&bad).is_err());
        assert!(pipeline.is_fitted());

        pipeline.set_params(&ParamMap::new()).unwrap();
        assert!(pipeline.is_fitted());

        let mut good = ParamMap::new();
        good.insert("pca__n_components".to_string(), json!(1));
        pipeline.set_params(&good).unwrap();
        assert!(!pipeline.is_fitted());
        assert_eq!(pipeline.params()["pca__n_components"], json!(1));
        assert!(pipeline.predict(&x).is_err());
    }

    #[test]
    fn predictions_are_in_label_space() {
        let (x, y) = data();
        let mut pipeline = Pipeline::from_config(&config(), Box::new(LinearRegressor::default()));
        pipeline.fit(&x, &y).unwrap();
        let pred = pipeline.predict(&x).unwrap();
        for i in 0..y.len() {
            assert_abs_diff_eq!(pred[i], y[i], epsilon = 1e-6);
        }
        let fresh = pipeline.fresh();
        assert!(!fresh.is_fitted());
        assert_eq!(fresh.params(), pipeline.params());
    }

    #[test]
    fn variance_is_rescaled_to_label_units() {
        let (x, y) = data();
        let mut pipeline =
            Pipeline::from_config(&config(), Box::new(GaussianProcessRegressor::default()));
        pipeline.fit(&x, &y).unwrap();
        let options = PredictOptions { return_var: true, return_cov: false };
        let query = Array2::from_elem((1, 2), 1000.0);
        let prediction = pipeline.predict_dist(&query, options).unwrap();
        let scale = pipeline.final_step().transformer().scale().unwrap()[0];
        // far from the data the latent variance approaches the prior
        assert_abs_diff_eq!(prediction.var.unwrap()[0], scale * scale, epsilon = 1e-6 * scale * scale);
    }

    #[test]
    fn cache_reuses_fitted_stages() {
        let dir = tempfile::tempdir().unwrap();
        let (x, y) = data();
        let cache = Some(TransformCache::new(dir.path().join("pipeline_cache")));
        let mut first = Pipeline::from_config(&config(), Box::new(LinearRegressor::default()))
            .with_cache(cache.clone());
        first.fit(&x, &y).unwrap();
        let files = std::fs::read_dir(dir.path().join("pipeline_cache")).unwrap().count();
        assert_eq!(files, 2);

        let mut second = Pipeline::from_config(&config(), Box::new(LinearRegressor::default()))
            .with_cache(cache);
        second.fit(&x, &y).unwrap();
        let a = first.predict(&x).unwrap();
        let b = second.predict(&x).unwrap();
        for i in 0..a.len() {
            assert_abs_diff_eq!(a[i], b[i], epsilon = 1e-9);
        }
    }
}
