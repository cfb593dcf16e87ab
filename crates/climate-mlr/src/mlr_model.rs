//! The MLR model: training data, pipeline, fitting, search and prediction.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use chrono::Local;
use log::{debug, error, info, warn};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde_json::Value;

use crate::catalog::{value_to_string, Catalog, DatasetRecord, MetadataFilter, PredictionSet, VarType};
use crate::config::{
    ErrorEstimationType, GridSearchOptions, ImputationStrategy, MlrConfig, ParamGrid, ParamMap,
    PredictOptions,
};
use crate::cube::{Coord, Cube};
use crate::error::{MlrError, Result};
use crate::explain::{Interpreter, LocalExplanation, INSTANCE_SAMPLES};
use crate::extract::{Extractor, FeatureTable, FeatureType, Label};
use crate::io::{discover_ancestor_records, write_cube, CUBE_EXTENSION};
use crate::loader::CubeLoader;
use crate::math::MaskedArray;
use crate::model_selection::{self, cross_val_score, train_test_split, Scorer};
use crate::models::{ModelEntry, ModelRegistry};
use crate::pipeline::Pipeline;
use crate::postprocess::{PredictionKind, PredictionOutput, Postprocessor};
use crate::stats::{mean_squared_error, RegressionMetrics};
use crate::units::Units;

const DESCRIPTION: &str = "MLR model prediction";

/// Data held by a model. Missing values are NaN.
#[derive(Clone, Debug, Default)]
pub struct MlrData {
    pub x_train: Array2<f64>,
    pub y_train: Array1<f64>,
    pub x_test: Option<Array2<f64>>,
    pub y_test: Option<Array1<f64>>,
    /// Prediction input per prediction name.
    pub x_pred: BTreeMap<Option<String>, Array2<f64>>,
    /// Mean prediction per prediction name.
    pub y_pred: BTreeMap<Option<String>, Array1<f64>>,
}

/// Multiple linear regression style model around a registered regressor.
pub struct MlrModel {
    config: MlrConfig,
    entry: Option<&'static ModelEntry>,
    catalog: Catalog,
    loader: CubeLoader,
    features: FeatureTable,
    label: Label,
    group_attributes: Vec<Option<String>>,
    data: MlrData,
    pipeline: Option<Pipeline>,
    parameters: ParamMap,
    interpreter: Option<Interpreter>,
}

/// Indices of the rows of a prediction input that reach the regressor.
struct RowSelection {
    kept: Vec<usize>,
    n_rows: usize,
}

impl RowSelection {
    /// Full-length masked array with `values` at the kept rows.
    fn restore(&self, values: &Array1<f64>) -> Result<MaskedArray> {
        let mut data = Array1::from_elem(self.n_rows, f64::NAN);
        let mut valid = Array1::from_elem(self.n_rows, false);
        for (&row, &value) in self.kept.iter().zip(values.iter()) {
            data[row] = value;
            valid[row] = true;
        }
        MaskedArray::new(data.into_dyn(), valid.into_dyn())
    }
}

impl MlrModel {
    /// Create the model `name` from the registry.
    ///
    /// # Arguments
    ///
    /// * `name` - Registered model name; unknown names fall back to the first
    ///   registered model with a warning
    /// * `config` - Model configuration
    /// * `records` - Input dataset records (ancestor outputs are added)
    /// * `filter` - Attribute values training records must match
    ///
    /// # Returns
    ///
    /// The model with its training data extracted and parameters applied.
    pub fn create(
        name: &str,
        config: &MlrConfig,
        records: &[DatasetRecord],
        filter: &MetadataFilter,
    ) -> Result<Self> {
        let entry = ModelRegistry::global().lookup(name);
        info!("Creating MLR model '{}' ({})", entry.name, entry.description);
        Self::build(Some(entry), config, records, filter)
    }

    /// Model without a regressor. Data is extracted, but every operation
    /// needing a regressor logs an error and does nothing.
    pub fn new(config: &MlrConfig, records: &[DatasetRecord], filter: &MetadataFilter) -> Result<Self> {
        Self::build(None, config, records, filter)
    }

    fn build(
        entry: Option<&'static ModelEntry>,
        config: &MlrConfig,
        records: &[DatasetRecord],
        filter: &MetadataFilter,
    ) -> Result<Self> {
        config.validate()?;
        let config = config.resolved();
        let mut records = records.to_vec();
        if !config.ancestors.is_empty() {
            records.extend(discover_ancestor_records(&config.ancestors)?);
        }

        let catalog = Catalog::build(&records, &config, filter)?;
        let loader = CubeLoader::new(config.dtype);
        let features = FeatureTable::from_catalog(&catalog, &loader, &config)?;
        let label = Label::from_catalog(&catalog)?;
        let groups = catalog.group_attributes();

        let training = Extractor::new(&config, &loader, &features, &label)
            .training_data(catalog.training(), &groups)?;
        let group_attributes = if config.accept_only_scalar_data {
            let mut seen = BTreeSet::new();
            training
                .row_groups
                .iter()
                .filter(|g| seen.insert((*g).clone()))
                .cloned()
                .collect()
        } else {
            groups
        };

        let (train, test) =
            train_test_split(training.y.len(), config.test_size, config.random_state);
        let data = MlrData {
            x_train: training.x.select(Axis(0), &train),
            y_train: training.y.select(Axis(0), &train),
            x_test: (!test.is_empty()).then(|| training.x.select(Axis(0), &test)),
            y_test: (!test.is_empty()).then(|| training.y.select(Axis(0), &test)),
            ..MlrData::default()
        };
        info!(
            "Using {} training and {} test point(s)",
            train.len(),
            test.len()
        );

        let pipeline = match entry {
            Some(entry) => {
                let params = entry.regressor_parameters(&config.parameters_final_regressor);
                let regressor = entry.build(&params)?;
                Some(Pipeline::from_config(&config, regressor))
            }
            None => None,
        };
        let parameters = pipeline.as_ref().map(Pipeline::params).unwrap_or_default();

        let mut model = Self {
            config,
            entry,
            catalog,
            loader,
            features,
            label,
            group_attributes,
            data,
            pipeline,
            parameters,
            interpreter: None,
        };
        let initial = model.config.parameters.clone();
        model.update_parameters(&initial)?;
        Ok(model)
    }

    fn pipeline_or_log(&self, text: &str) -> Option<&Pipeline> {
        if self.pipeline.is_none() {
            error!(
                "{} not possible: no MLR model specified, use MlrModel::create with one of {:?}",
                text,
                ModelRegistry::global().names()
            );
        }
        self.pipeline.as_ref()
    }

    fn fitted_pipeline_or_log(&self, text: &str) -> Option<&Pipeline> {
        let pipeline = self.pipeline_or_log(text)?;
        if !pipeline.is_fitted() {
            error!("{} not possible, MLR model is not fitted yet", text);
            return None;
        }
        Some(pipeline)
    }

    /// Fit the pipeline on the training data.
    pub fn fit(&mut self) -> Result<()> {
        let pipeline = match self.pipeline.as_mut() {
            Some(pipeline) => pipeline,
            None => {
                self.pipeline_or_log("Fitting MLR model");
                return Ok(());
            }
        };
        info!(
            "Fitting MLR model with final regressor {} on {} training point(s)",
            pipeline.regressor().name(),
            self.data.y_train.len()
        );
        pipeline.fit(&self.data.x_train, &self.data.y_train)?;
        self.parameters = pipeline.params();
        info!("Successfully fitted MLR model");
        debug!("Pipeline parameters: {}", serde_json::to_string(&self.parameters)?);
        self.load_interpreter()
    }

    fn load_interpreter(&mut self) -> Result<()> {
        self.interpreter = Some(Interpreter::new(
            self.features.names(),
            &self.data.x_train,
            &self.data.y_train,
            self.config.random_state,
        )?);
        Ok(())
    }

    /// Exhaustive parameter search; adopts the best pipeline.
    ///
    /// `param_grid` and `options` default to the configured
    /// `grid_search_cv_param_grid` and `grid_search_cv_kwargs`.
    pub fn grid_search_cv(
        &mut self,
        param_grid: Option<&ParamGrid>,
        options: Option<&GridSearchOptions>,
    ) -> Result<()> {
        let pipeline = match self.pipeline_or_log("Grid search") {
            Some(pipeline) => pipeline,
            None => return Ok(()),
        };
        let grid = param_grid
            .or(self.config.grid_search_cv_param_grid.as_ref())
            .ok_or_else(|| {
                MlrError::Config(
                    "No parameter grid given (use 'grid_search_cv_param_grid')".to_string(),
                )
            })?;
        let options = options.unwrap_or(&self.config.grid_search_cv_kwargs);
        let (x, y) = (&self.data.x_train, &self.data.y_train);
        let result = model_selection::grid_search_cv(
            pipeline,
            x,
            y,
            grid,
            options,
            self.config.worker_count(),
        )?;

        let best = match (result.best_estimator, result.best_params) {
            (Some(best), Some(params)) => {
                info!(
                    "Best parameters {} with score {}",
                    serde_json::to_string(&params)?,
                    result.best_score
                );
                best
            }
            (_, Some(params)) => {
                info!(
                    "Refitting with best parameters {} (score {})",
                    serde_json::to_string(&params)?,
                    result.best_score
                );
                let mut best = pipeline.fresh();
                best.set_params(&params)?;
                best.fit(x, y)?;
                best
            }
            (_, None) => {
                return Err(MlrError::GridSearch(
                    "No best estimator or best parameters found, every candidate failed"
                        .to_string(),
                ))
            }
        };
        self.parameters = best.params();
        self.pipeline = Some(best);
        info!("Successfully fitted MLR model with grid search");
        self.load_interpreter()
    }

    /// Update pipeline parameters (`stage__param` names). Unknown names are
    /// dropped with a warning; the pipeline is not refitted.
    pub fn update_parameters(&mut self, params: &ParamMap) -> Result<()> {
        let pipeline = match self.pipeline.as_mut() {
            Some(pipeline) => pipeline,
            None => {
                if !params.is_empty() {
                    self.pipeline_or_log("Updating parameters of MLR model");
                }
                return Ok(());
            }
        };
        let allowed = pipeline.params();
        let mut new_params = ParamMap::new();
        for (name, value) in params {
            if allowed.contains_key(name) {
                new_params.insert(name.clone(), value.clone());
            } else {
                warn!("'{}' is not a valid parameter for the pipeline", name);
            }
        }
        if new_params.is_empty() {
            return Ok(());
        }
        pipeline.set_params(&new_params)?;
        self.parameters = pipeline.params();
        self.interpreter = None;
        info!(
            "Updated pipeline with parameters {}",
            serde_json::to_string(&new_params)?
        );
        Ok(())
    }

    /// Predict every prediction set, write the prediction cubes and their
    /// postprocessed versions.
    ///
    /// # Arguments
    ///
    /// * `options` - Extra outputs; `None` uses `predict_kwargs`
    ///
    /// # Returns
    ///
    /// Paths of every written file (empty when the model is not fitted).
    pub fn predict(&mut self, options: Option<PredictOptions>) -> Result<Vec<PathBuf>> {
        let entry = match (self.entry, self.fitted_pipeline_or_log("Prediction")) {
            (Some(entry), Some(_)) => entry,
            _ => return Ok(Vec::new()),
        };
        info!("Started prediction");
        let requested = options.unwrap_or(self.config.predict_kwargs);
        let options = entry.capabilities.restrict(requested, entry.regressor);
        if options.return_var || options.return_cov {
            info!("Using additional options {:?} for prediction", options);
        }
        if self.catalog.prediction_sets().is_empty() {
            error!("Prediction not possible, no 'prediction_input' datasets given");
            return Ok(Vec::new());
        }

        let label_cube = self.label_cube()?;
        let sets: Vec<PredictionSet> = self.catalog.prediction_sets().to_vec();
        let mut written = Vec::new();
        for set in &sets {
            if let Some(name) = &set.name {
                info!("Predicting '{}'", name);
            }
            written.extend(self.predict_set(set, options, &label_cube)?);
        }
        Ok(written)
    }

    fn predict_set(
        &mut self,
        set: &PredictionSet,
        options: PredictOptions,
        label_cube: &Cube,
    ) -> Result<Vec<PathBuf>> {
        let input = Extractor::new(&self.config, &self.loader, &self.features, &self.label)
            .prediction_input(set)?;
        let x_full = input.x_filled()?;
        let n_rows = x_full.nrows();
        let missing = input.x.rows_with_invalid();
        let kept: Vec<usize> = if self.config.imputation_strategy == ImputationStrategy::Remove {
            let kept: Vec<usize> = (0..n_rows).filter(|&i| !missing[i]).collect();
            if kept.len() < n_rows {
                info!(
                    "Removed {} prediction input point(s) where features were missing",
                    n_rows - kept.len()
                );
            }
            kept
        } else {
            (0..n_rows).collect()
        };
        let rows = RowSelection { kept, n_rows };
        let x_used = x_full.select(Axis(0), &rows.kept);

        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or_else(|| MlrError::NotFitted("no pipeline available".to_string()))?;
        info!("Predicting {} point(s)", x_used.nrows());
        let prediction = pipeline.predict_dist(&x_used, options)?;

        let mean = rows.restore(&prediction.mean)?;
        let mut outputs: Vec<(PredictionKind, MaskedArray)> = vec![(PredictionKind::Mean, mean.clone())];
        if let Some(var) = &prediction.var {
            outputs.push((PredictionKind::Var, rows.restore(var)?));
        }
        if let Some(cov) = prediction.cov {
            outputs.push((PredictionKind::Cov, MaskedArray::from_data(cov.into_dyn())));
        }
        if self.config.return_lime_importance {
            if let Some(interpreter) = &self.interpreter {
                match interpreter.most_important_features(
                    pipeline,
                    &x_used,
                    self.config.worker_count(),
                ) {
                    Ok(lime) => outputs.push((PredictionKind::Lime, rows.restore(&lime)?)),
                    Err(err) => warn!(
                        "Calculation of LIME feature importance failed, skipping it: {}",
                        err
                    ),
                }
            }
        }
        if let Some((kind, error)) = self.estimate_prediction_error()? {
            outputs.push((PredictionKind::SquaredErrorEstim(kind), mean.map_valid(|_| error)));
        }
        info!(
            "Successfully created prediction array with {} point(s)",
            n_rows
        );

        self.data.x_pred.insert(set.name.clone(), x_full);
        self.data
            .y_pred
            .insert(set.name.clone(), mean.filled(f64::NAN).into_dimensionality()?);

        let mut written = Vec::new();
        let mut cubes = Vec::with_capacity(outputs.len());
        for (kind, values) in outputs {
            let mut cube = self.prediction_cube(values, &input.reference)?;
            self.set_prediction_attributes(&mut cube, kind, &set.name, label_cube)?;
            let path = self.prediction_path(kind, &set.name);
            cube.attributes.insert(
                "filename".to_string(),
                Value::from(path.display().to_string()),
            );
            written.push(write_cube(&path, &cube, self.config.dtype)?);
            info!("Wrote prediction {}", path.display());
            cubes.push(PredictionOutput { kind, path, cube });
        }

        if let Some(pp) = &self.config.prediction_pp {
            let processor = Postprocessor::new(pp, self.config.dtype, options.return_cov);
            written.extend(processor.run(&cubes)?);
        }
        Ok(written)
    }

    /// Squared prediction error as configured by `estimate_prediction_error`
    /// together with the method actually used.
    pub fn estimate_prediction_error(&self) -> Result<Option<(ErrorEstimationType, f64)>> {
        let estimate = match &self.config.estimate_prediction_error {
            Some(estimate) => estimate,
            None => return Ok(None),
        };
        let pipeline = match self.fitted_pipeline_or_log("Estimating prediction error") {
            Some(pipeline) => pipeline,
            None => return Ok(None),
        };
        debug!("Estimating squared prediction error using {:?}", estimate);

        let (kind, error) = match (estimate.kind, &self.data.x_test, &self.data.y_test) {
            (ErrorEstimationType::Test, Some(x_test), Some(y_test)) => {
                let y_pred = pipeline.predict(x_test)?;
                (ErrorEstimationType::Test, mean_squared_error(y_test, &y_pred))
            }
            (kind, _, _) => {
                if kind == ErrorEstimationType::Test {
                    warn!(
                        "Cannot estimate squared prediction error using 'type: test', no test \
                         data set given (use 'test_size' option), using cross-validation instead"
                    );
                }
                let scorer = Scorer::from_name(&estimate.kwargs.scoring)?;
                let scores = cross_val_score(
                    pipeline,
                    &self.data.x_train,
                    &self.data.y_train,
                    &estimate.kwargs.cv,
                    scorer,
                    self.config.worker_count(),
                )?;
                let mut error = scores.iter().sum::<f64>() / scores.len().max(1) as f64;
                if scorer.is_negated() {
                    error = -error;
                }
                if !scorer.is_squared_error() {
                    error *= error;
                }
                (ErrorEstimationType::Cv, error)
            }
        };
        let units = self.label.units.pow(2.0)?;
        info!(
            "Estimated squared prediction error by {} {} using {} data",
            error,
            units,
            kind.name()
        );
        Ok(Some((kind, error)))
    }

    fn label_cube(&self) -> Result<Cube> {
        let label = self
            .catalog
            .training()
            .iter()
            .find(|d| d.var_type == VarType::Label)
            .ok_or_else(|| MlrError::Dataset("No label data found".to_string()))?;
        self.loader.load(label)
    }

    /// Cube on the reference grid when `values` covers it, otherwise on
    /// synthetic `idx_<n>` coordinates.
    fn prediction_cube(&self, values: MaskedArray, reference: &Cube) -> Result<Cube> {
        if values.len() == reference.data().len() {
            let mut data = values.reshape(reference.shape())?;
            if self.config.imputation_strategy == ImputationStrategy::Remove {
                data.mask_where(&reference.data().valid().mapv(|ok| !ok))?;
            }
            return reference.copy_with_data(data);
        }
        let shape = values.shape().to_vec();
        let mut cube = Cube::new(values, Units::unknown());
        for (dim, &size) in shape.iter().enumerate() {
            let points = Array1::range(0.0, size as f64, 1.0);
            cube.add_coord(Coord::new(
                &format!("idx_{}", dim),
                points,
                Units::dimensionless(),
                dim,
            ))?;
        }
        Ok(cube)
    }

    fn set_prediction_attributes(
        &self,
        cube: &mut Cube,
        kind: PredictionKind,
        prediction_name: &Option<String>,
        label_cube: &Cube,
    ) -> Result<()> {
        let mut attributes: BTreeMap<String, Value> = BTreeMap::new();
        let regressor = self.entry.map_or("unknown", |e| e.regressor);
        attributes.insert("regressor".to_string(), Value::from(regressor));
        attributes.insert("description".to_string(), Value::from(DESCRIPTION));
        attributes.insert("tag".to_string(), Value::from(self.label.tag.clone()));
        attributes.insert(
            "var_type".to_string(),
            Value::from(VarType::PredictionOutput.name()),
        );
        if let Some(name) = prediction_name {
            attributes.insert("prediction_name".to_string(), Value::from(name.clone()));
        }
        attributes.extend(self.prediction_properties());
        for (name, value) in &self.parameters {
            attributes.insert(
                name.clone(),
                Value::from(value_to_string(value).unwrap_or_else(|| "None".to_string())),
            );
        }
        attributes.insert(
            "creation_date".to_string(),
            Value::from(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        );
        cube.attributes = attributes;

        cube.standard_name = label_cube.standard_name.clone();
        cube.var_name = label_cube.var_name.clone();
        cube.long_name = label_cube.long_name.clone();
        cube.units = label_cube.units.clone();
        let var_name = cube.var_name.clone().unwrap_or_else(|| self.label.tag.clone());
        let long_name = cube.long_name.clone().unwrap_or_else(|| self.label.tag.clone());
        let suffix = kind.suffix().unwrap_or_default();
        match kind {
            PredictionKind::Mean => {}
            PredictionKind::Var | PredictionKind::Cov => {
                cube.var_name = Some(format!("{}_{}", var_name, suffix));
                let text = if kind == PredictionKind::Var {
                    "variance"
                } else {
                    "covariance"
                };
                cube.long_name = Some(format!("{} ({})", long_name, text));
                cube.units = cube.units.pow(2.0)?;
            }
            PredictionKind::SquaredErrorEstim(method) => {
                cube.var_name = Some(format!("{}_{}", var_name, suffix));
                let text = match method {
                    ErrorEstimationType::Cv => "cross-validation",
                    ErrorEstimationType::Test => "holdout test data set",
                };
                cube.long_name = Some(format!(
                    "{} (squared error estimation using {})",
                    long_name, text
                ));
                cube.units = cube.units.pow(2.0)?;
            }
            PredictionKind::Lime => {
                cube.standard_name = None;
                cube.var_name = Some("lime_feature_importance".to_string());
                cube.long_name = Some(format!(
                    "Most important feature for predicting {} given by LIME",
                    self.label.tag
                ));
                cube.units = Units::no_unit();
                let features: serde_json::Map<String, Value> = self
                    .features
                    .names()
                    .into_iter()
                    .enumerate()
                    .map(|(idx, name)| (idx.to_string(), Value::from(name)))
                    .collect();
                cube.attributes
                    .insert("features".to_string(), Value::Object(features));
                cube.attributes.insert("skip_for_pp".to_string(), Value::from(1));
            }
        }
        Ok(())
    }

    /// Provenance of the label datasets: distinct values joined with `|`,
    /// minimum start and maximum end year.
    fn prediction_properties(&self) -> BTreeMap<String, Value> {
        let labels: Vec<_> = self
            .catalog
            .training()
            .iter()
            .filter(|d| d.var_type == VarType::Label)
            .collect();
        let mut properties = BTreeMap::new();
        for attr in ["dataset", "exp", "project", "start_year", "end_year"] {
            let values: BTreeSet<String> = labels.iter().filter_map(|d| d.attribute(attr)).collect();
            if values.is_empty() {
                continue;
            }
            let value = match attr {
                "start_year" | "end_year" => {
                    let years: Vec<i64> = values.iter().filter_map(|v| v.parse().ok()).collect();
                    let year = if attr == "start_year" {
                        years.iter().min()
                    } else {
                        years.iter().max()
                    };
                    match year {
                        Some(year) => Value::from(*year),
                        None => Value::from(values.iter().cloned().collect::<Vec<_>>().join("|")),
                    }
                }
                _ => Value::from(values.iter().cloned().collect::<Vec<_>>().join("|")),
            };
            if values.len() > 1 {
                debug!(
                    "Attribute '{}' of label data is not unique, got values {:?}, using {} for \
                     prediction cubes",
                    attr, values, value
                );
            }
            properties.insert(attr.to_string(), value);
        }
        properties
    }

    /// `<root_dir>_prediction[_<name>][_<kind>].json` in the MLR work
    /// directory.
    fn prediction_path(&self, kind: PredictionKind, prediction_name: &Option<String>) -> PathBuf {
        let root = match &self.config.root_dir {
            Some(root) if !root.is_empty() => format!("{}_", root),
            _ => String::new(),
        };
        let name = prediction_name
            .as_ref()
            .map_or(String::new(), |n| format!("_{}", n));
        let suffix = kind.suffix().map_or(String::new(), |s| format!("_{}", s));
        self.config.mlr_work_dir().join(format!(
            "{}prediction{}{}.{}",
            root, name, suffix, CUBE_EXTENSION
        ))
    }

    /// Regression metrics of the training and (if present) test data.
    pub fn regression_metrics(&self) -> Result<Vec<(String, RegressionMetrics)>> {
        let pipeline = match self.fitted_pipeline_or_log("Calculating regression metrics") {
            Some(pipeline) => pipeline,
            None => return Ok(Vec::new()),
        };
        let mut splits = vec![("train", &self.data.x_train, &self.data.y_train)];
        if let (Some(x), Some(y)) = (&self.data.x_test, &self.data.y_test) {
            splits.push(("test", x, y));
        }
        let mut all = Vec::new();
        for (name, x, y) in splits {
            info!("Evaluating regression metrics for {} data", name);
            let metrics = RegressionMetrics::compute(y, &pipeline.predict(x)?);
            for (metric, value) in metrics.entries() {
                info!("{}: {}", metric, value);
            }
            all.push((name.to_string(), metrics));
        }
        Ok(all)
    }

    /// Relative permutation importance of every feature.
    pub fn feature_importance(&self) -> Result<Option<Vec<(String, f64)>>> {
        let pipeline = match self.fitted_pipeline_or_log("Calculating feature importance") {
            Some(pipeline) => pipeline,
            None => return Ok(None),
        };
        let interpreter = match &self.interpreter {
            Some(interpreter) => interpreter,
            None => return Ok(None),
        };
        let importance = interpreter.feature_importance(pipeline)?;
        for (feature, value) in &importance {
            info!("Importance of '{}': {:.4}", feature, value);
        }
        Ok(Some(importance))
    }

    /// Local linear explanation of the prediction at `instance`.
    pub fn explain_instance(&self, instance: ArrayView1<f64>) -> Result<Option<LocalExplanation>> {
        let pipeline = match self.fitted_pipeline_or_log("Explaining prediction") {
            Some(pipeline) => pipeline,
            None => return Ok(None),
        };
        match &self.interpreter {
            Some(interpreter) => Ok(Some(interpreter.explain_instance(
                pipeline,
                instance,
                INSTANCE_SAMPLES,
                self.config.random_state,
            )?)),
            None => Ok(None),
        }
    }

    pub fn config(&self) -> &MlrConfig {
        &self.config
    }

    pub fn data(&self) -> &MlrData {
        &self.data
    }

    pub fn features(&self) -> &FeatureTable {
        &self.features
    }

    pub fn feature_names(&self) -> Vec<String> {
        self.features.names()
    }

    pub fn features_units(&self) -> Vec<(String, Units)> {
        self.features.units()
    }

    pub fn features_types(&self) -> Vec<(String, FeatureType)> {
        self.features.types()
    }

    pub fn label(&self) -> &str {
        &self.label.tag
    }

    pub fn label_units(&self) -> &Units {
        &self.label.units
    }

    pub fn group_attributes(&self) -> &[Option<String>] {
        &self.group_attributes
    }

    pub fn parameters(&self) -> &ParamMap {
        &self.parameters
    }

    /// Registered model name, `None` without a regressor.
    pub fn model_name(&self) -> Option<&'static str> {
        self.entry.map(|e| e.name)
    }

    pub fn regressor_name(&self) -> Option<&'static str> {
        self.entry.map(|e| e.regressor)
    }

    pub fn pipeline(&self) -> Option<&Pipeline> {
        self.pipeline.as_ref()
    }

    pub fn is_fitted(&self) -> bool {
        self.pipeline.as_ref().map_or(false, Pipeline::is_fitted)
    }
}
