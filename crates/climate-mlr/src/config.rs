use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cube::Dtype;
use crate::error::{MlrError, Result};

/// Hyperparameters keyed by (possibly nested) parameter name.
pub type ParamMap = BTreeMap<String, Value>;

/// How missing feature values are handled.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ImputationStrategy {
    /// Drop every row with a missing feature.
    #[default]
    Remove,
    Mean,
    Median,
    MostFrequent,
    Constant,
}

impl ImputationStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ImputationStrategy::Remove => "remove",
            ImputationStrategy::Mean => "mean",
            ImputationStrategy::Median => "median",
            ImputationStrategy::MostFrequent => "most_frequent",
            ImputationStrategy::Constant => "constant",
        }
    }
}

/// Method used to estimate the squared prediction error.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ErrorEstimationType {
    /// Mean squared error on the held-out test split.
    Test,
    /// Cross-validated score on the training data.
    Cv,
}

impl ErrorEstimationType {
    pub fn name(&self) -> &'static str {
        match self {
            ErrorEstimationType::Test => "test",
            ErrorEstimationType::Cv => "cv",
        }
    }
}

/// Cross-validation splitting: a number of folds or `"loo"`.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum CvStrategy {
    Folds(usize),
    Named(String),
}

impl Default for CvStrategy {
    fn default() -> Self {
        CvStrategy::Folds(5)
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CrossValidationOptions {
    pub cv: CvStrategy,
    pub scoring: String,
}

impl Default for CrossValidationOptions {
    fn default() -> Self {
        Self {
            cv: CvStrategy::default(),
            scoring: "neg_mean_squared_error".to_string(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
pub struct PredictionErrorConfig {
    #[serde(rename = "type")]
    pub kind: ErrorEstimationType,
    #[serde(default)]
    pub kwargs: CrossValidationOptions,
}

#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct GridSearchOptions {
    pub cv: CvStrategy,
    /// Scorer name; `None` scores with R².
    pub scoring: Option<String>,
    /// Refit the best candidate on the whole training set.
    pub refit: bool,
}

impl Default for GridSearchOptions {
    fn default() -> Self {
        Self {
            cv: CvStrategy::default(),
            scoring: None,
            refit: true,
        }
    }
}

/// Candidate values per parameter name, or a list of such grids.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum ParamGrid {
    Single(BTreeMap<String, Vec<Value>>),
    Multiple(Vec<BTreeMap<String, Vec<Value>>>),
}

impl ParamGrid {
    pub fn grids(&self) -> Vec<&BTreeMap<String, Vec<Value>>> {
        match self {
            ParamGrid::Single(grid) => vec![grid],
            ParamGrid::Multiple(grids) => grids.iter().collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.grids().iter().all(|g| g.is_empty())
    }
}

/// Aggregation of prediction cubes after they are written.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PostprocessConfig {
    /// Coordinates to average over.
    pub mean: Vec<String>,
    /// Coordinates to sum over.
    pub sum: Vec<String>,
    pub area_weights: bool,
    /// Target units of the aggregated mean prediction.
    pub units: Option<String>,
}

impl Default for PostprocessConfig {
    fn default() -> Self {
        Self {
            mean: Vec::new(),
            sum: Vec::new(),
            area_weights: true,
            units: None,
        }
    }
}

/// Extra outputs requested from the regressor at prediction time.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PredictOptions {
    pub return_var: bool,
    pub return_cov: bool,
}

/// Options of an MLR model.
///
/// The configuration is fixed once a model is created; the `with_*`
/// methods return modified copies.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct MlrConfig {
    pub work_dir: PathBuf,
    /// Optional sub-directory of `work_dir` for all outputs; also prefixes
    /// prediction file names.
    pub root_dir: Option<String>,
    /// Directories holding outputs of earlier diagnostics.
    pub ancestors: Vec<PathBuf>,
    pub accept_only_scalar_data: bool,
    pub allow_missing_features: bool,
    pub cache_intermediate_results: bool,
    pub coords_as_features: Vec<String>,
    pub dtype: Dtype,
    pub estimate_prediction_error: Option<PredictionErrorConfig>,
    pub grid_search_cv_kwargs: GridSearchOptions,
    pub grid_search_cv_param_grid: Option<ParamGrid>,
    pub group_datasets_by_attributes: Vec<String>,
    pub imputation_strategy: ImputationStrategy,
    pub imputation_fill_value: f64,
    /// Worker threads; values below 1 use every available core.
    pub n_jobs: i32,
    pub parameters: ParamMap,
    pub parameters_final_regressor: ParamMap,
    pub pca: bool,
    pub predict_kwargs: PredictOptions,
    pub prediction_pp: Option<PostprocessConfig>,
    pub random_state: Option<u64>,
    pub return_lime_importance: bool,
    pub standardize_data: bool,
    pub test_size: f64,
}

impl Default for MlrConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            root_dir: None,
            ancestors: Vec::new(),
            accept_only_scalar_data: false,
            allow_missing_features: false,
            cache_intermediate_results: true,
            coords_as_features: Vec::new(),
            dtype: Dtype::Float64,
            estimate_prediction_error: None,
            grid_search_cv_kwargs: GridSearchOptions::default(),
            grid_search_cv_param_grid: None,
            group_datasets_by_attributes: Vec::new(),
            imputation_strategy: ImputationStrategy::Remove,
            imputation_fill_value: 0.0,
            n_jobs: 1,
            parameters: ParamMap::new(),
            parameters_final_regressor: ParamMap::new(),
            pca: true,
            predict_kwargs: PredictOptions::default(),
            prediction_pp: None,
            random_state: None,
            return_lime_importance: false,
            standardize_data: true,
            test_size: 0.25,
        }
    }
}

impl MlrConfig {
    /// Load a configuration from a JSON file; missing keys take defaults.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: MlrConfig = serde_json::from_str(&content)
            .with_context(|| format!("Invalid JSON format in config: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..1.0).contains(&self.test_size) {
            return Err(MlrError::Config(format!(
                "test_size must lie in [0, 1), got {}",
                self.test_size
            )));
        }
        if self.predict_kwargs.return_var && self.predict_kwargs.return_cov {
            return Err(MlrError::Config(
                "return_var and return_cov cannot be requested together".to_string(),
            ));
        }
        if !self.dtype.is_numeric() {
            return Err(MlrError::Config(format!(
                "working dtype must be numeric, got {}",
                self.dtype.name()
            )));
        }
        Ok(())
    }

    /// Apply derived defaults, returning the effective configuration.
    ///
    /// Scalar-only data without explicit grouping is grouped by `dataset`.
    pub fn resolved(&self) -> Self {
        let mut config = self.clone();
        if config.accept_only_scalar_data && config.group_datasets_by_attributes.is_empty() {
            warn!(
                "Using only scalar data without grouping attributes, grouping datasets by \
                 'dataset'"
            );
            config.group_datasets_by_attributes = vec!["dataset".to_string()];
        }
        config
    }

    /// Directory receiving every output of the model.
    pub fn mlr_work_dir(&self) -> PathBuf {
        match &self.root_dir {
            Some(root) => self.work_dir.join(root),
            None => self.work_dir.clone(),
        }
    }

    pub fn worker_count(&self) -> usize {
        if self.n_jobs >= 1 {
            self.n_jobs as usize
        } else {
            std::thread::available_parallelism().map_or(1, |n| n.get())
        }
    }

    /// Pipeline cache directory, if caching applies.
    pub fn cache_dir(&self) -> Option<PathBuf> {
        if !self.cache_intermediate_results {
            return None;
        }
        if self.worker_count() > 1 {
            log::debug!(
                "Not caching intermediate results with {} workers",
                self.worker_count()
            );
            return None;
        }
        Some(self.mlr_work_dir().join("pipeline_cache"))
    }

    pub fn with_work_dir<P: Into<PathBuf>>(&self, work_dir: P) -> Self {
        Self { work_dir: work_dir.into(), ..self.clone() }
    }

    pub fn with_group_attributes(&self, attributes: &[&str]) -> Self {
        Self {
            group_datasets_by_attributes: attributes.iter().map(|a| a.to_string()).collect(),
            ..self.clone()
        }
    }

    pub fn with_parameters(&self, parameters: ParamMap) -> Self {
        Self { parameters, ..self.clone() }
    }

    pub fn with_imputation_strategy(&self, strategy: ImputationStrategy) -> Self {
        Self { imputation_strategy: strategy, ..self.clone() }
    }

    pub fn with_test_size(&self, test_size: f64) -> Self {
        Self { test_size, ..self.clone() }
    }

    pub fn with_prediction_error(&self, estimate: PredictionErrorConfig) -> Self {
        Self { estimate_prediction_error: Some(estimate), ..self.clone() }
    }

    pub fn with_postprocessing(&self, pp: PostprocessConfig) -> Self {
        Self { prediction_pp: Some(pp), ..self.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_match_documented_values() {
        let config = MlrConfig::default();
        assert_eq!(config.imputation_strategy, ImputationStrategy::Remove);
        assert!(config.standardize_data);
        assert!(config.pca);
        assert!(config.cache_intermediate_results);
        assert_eq!(config.test_size, 0.25);
        assert_eq!(config.n_jobs, 1);
        assert_eq!(config.dtype, Dtype::Float64);
    }

    #[test]
    fn deserializes_partial_json() {
        let config: MlrConfig = serde_json::from_value(json!({
            "imputation_strategy": "most_frequent",
            "estimate_prediction_error": {"type": "cv", "kwargs": {"cv": "loo"}},
            "grid_search_cv_param_grid": {"transformed_target_regressor__regressor__max_depth": [2, 4]},
            "prediction_pp": {"mean": ["latitude", "longitude"]},
            "dtype": "float32"
        }))
        .unwrap();
        assert_eq!(config.imputation_strategy, ImputationStrategy::MostFrequent);
        let estimate = config.estimate_prediction_error.unwrap();
        assert_eq!(estimate.kind, ErrorEstimationType::Cv);
        assert_eq!(estimate.kwargs.cv, CvStrategy::Named("loo".to_string()));
        assert_eq!(estimate.kwargs.scoring, "neg_mean_squared_error");
        assert!(!config.grid_search_cv_param_grid.unwrap().is_empty());
        assert!(config.prediction_pp.unwrap().area_weights);
        assert_eq!(config.dtype, Dtype::Float32);
    }

    #[test]
    fn validate_rejects_bad_test_size() {
        let config = MlrConfig::default().with_test_size(1.5);
        assert!(matches!(config.validate(), Err(MlrError::Config(_))));
    }

    #[test]
    fn scalar_data_defaults_grouping_to_dataset() {
        let config = MlrConfig {
            accept_only_scalar_data: true,
            ..MlrConfig::default()
        };
        let resolved = config.resolved();
        assert_eq!(resolved.group_datasets_by_attributes, vec!["dataset".to_string()]);
        assert!(config.group_datasets_by_attributes.is_empty());
    }

    #[test]
    fn cache_is_disabled_with_several_workers() {
        let config = MlrConfig { n_jobs: 4, ..MlrConfig::default() };
        assert!(config.cache_dir().is_none());
        let single = MlrConfig::default().with_work_dir("/tmp/mlr");
        assert_eq!(single.cache_dir(), Some(PathBuf::from("/tmp/mlr/pipeline_cache")));
    }
}
