//! Data splitting, cross-validation and exhaustive grid search over
//! pipeline parameters.

use itertools::Itertools;
use log::{debug, info, warn};
use ndarray::{Array1, Array2, Axis};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;

use crate::config::{CvStrategy, GridSearchOptions, ParamGrid, ParamMap};
use crate::error::{MlrError, Result};
use crate::pipeline::Pipeline;
use crate::stats;

pub type Split = (Vec<usize>, Vec<usize>);

pub(crate) fn thread_pool(workers: usize) -> Result<rayon::ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .build()
        .map_err(|err| MlrError::Other(err.into()))
}

pub(crate) fn rng(random_state: Option<u64>) -> StdRng {
    match random_state {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// Shuffle `0..n` and hold out `ceil(test_size * n)` indices for testing.
///
/// Returns `(train, test)`; `test` is empty for `test_size == 0`.
pub fn train_test_split(n: usize, test_size: f64, random_state: Option<u64>) -> Split {
    let mut indices: Vec<usize> = (0..n).collect();
    if test_size <= 0.0 || n == 0 {
        return (indices, Vec::new());
    }
    indices.shuffle(&mut rng(random_state));
    let n_test = ((test_size * n as f64).ceil() as usize).min(n);
    let test = indices.split_off(n - n_test);
    (indices, test)
}

/// Train/test index pairs for k-fold (contiguous, unshuffled) or
/// leave-one-out cross-validation.
pub fn cv_splits(cv: &CvStrategy, n: usize) -> Result<Vec<Split>> {
    let folds = match cv {
        CvStrategy::Folds(k) => *k,
        CvStrategy::Named(name) if name.eq_ignore_ascii_case("loo") => n,
        CvStrategy::Named(name) => {
            return Err(MlrError::Config(format!(
                "Unknown cross-validation strategy '{}', expected a number of folds or 'loo'",
                name
            )))
        }
    };
    if folds < 2 || folds > n {
        return Err(MlrError::Config(format!(
            "Cannot split {} samples into {} folds",
            n, folds
        )));
    }
    let mut splits = Vec::with_capacity(folds);
    let mut start = 0;
    for fold in 0..folds {
        let size = n / folds + usize::from(fold < n % folds);
        let test: Vec<usize> = (start..start + size).collect();
        let train: Vec<usize> = (0..start).chain(start + size..n).collect();
        splits.push((train, test));
        start += size;
    }
    Ok(splits)
}

/// Named scoring function; greater is better for every scorer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scorer {
    R2,
    ExplainedVariance,
    NegMeanSquaredError,
    NegRootMeanSquaredError,
    NegMeanAbsoluteError,
    NegMedianAbsoluteError,
    MaxError,
}

impl Scorer {
    pub fn from_name(name: &str) -> Result<Self> {
        Ok(match name {
            "r2" => Scorer::R2,
            "explained_variance" => Scorer::ExplainedVariance,
            "neg_mean_squared_error" => Scorer::NegMeanSquaredError,
            "neg_root_mean_squared_error" => Scorer::NegRootMeanSquaredError,
            "neg_mean_absolute_error" => Scorer::NegMeanAbsoluteError,
            "neg_median_absolute_error" => Scorer::NegMedianAbsoluteError,
            "max_error" => Scorer::MaxError,
            other => {
                return Err(MlrError::Config(format!(
                    "Unknown scoring '{}'",
                    other
                )))
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Scorer::R2 => "r2",
            Scorer::ExplainedVariance => "explained_variance",
            Scorer::NegMeanSquaredError => "neg_mean_squared_error",
            Scorer::NegRootMeanSquaredError => "neg_root_mean_squared_error",
            Scorer::NegMeanAbsoluteError => "neg_mean_absolute_error",
            Scorer::NegMedianAbsoluteError => "neg_median_absolute_error",
            Scorer::MaxError => "max_error",
        }
    }

    /// Score reported as a negated error.
    pub fn is_negated(&self) -> bool {
        self.name().starts_with("neg_")
    }

    /// The underlying error is already a squared error. Root mean squared
    /// error is not, so its score is squared like any other error.
    pub fn is_squared_error(&self) -> bool {
        matches!(self, Scorer::NegMeanSquaredError)
    }

    pub fn score(&self, y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
        match self {
            Scorer::R2 => stats::r2_score(y_true, y_pred),
            Scorer::ExplainedVariance => stats::explained_variance_score(y_true, y_pred),
            Scorer::NegMeanSquaredError => -stats::mean_squared_error(y_true, y_pred),
            Scorer::NegRootMeanSquaredError => -stats::root_mean_squared_error(y_true, y_pred),
            Scorer::NegMeanAbsoluteError => -stats::mean_absolute_error(y_true, y_pred),
            Scorer::NegMedianAbsoluteError => -stats::median_absolute_error(y_true, y_pred),
            Scorer::MaxError => -stats::max_error(y_true, y_pred),
        }
    }
}

fn fit_and_score(
    estimator: &Pipeline,
    x: &Array2<f64>,
    y: &Array1<f64>,
    split: &Split,
    scorer: Scorer,
) -> Result<f64> {
    let (train, test) = split;
    let mut model = estimator.fresh();
    model.fit(&x.select(Axis(0), train), &y.select(Axis(0), train))?;
    let y_pred = model.predict(&x.select(Axis(0), test))?;
    Ok(scorer.score(&y.select(Axis(0), test), &y_pred))
}

/// Score `estimator` on every cross-validation fold, folds evaluated in
/// parallel on `workers` threads.
pub fn cross_val_score(
    estimator: &Pipeline,
    x: &Array2<f64>,
    y: &Array1<f64>,
    cv: &CvStrategy,
    scorer: Scorer,
    workers: usize,
) -> Result<Vec<f64>> {
    let splits = cv_splits(cv, x.nrows())?;
    debug!(
        "Cross-validating with {} folds using '{}' on {} thread(s)",
        splits.len(),
        scorer.name(),
        workers
    );
    let pool = thread_pool(workers)?;
    pool.install(|| {
        splits
            .par_iter()
            .map(|split| fit_and_score(estimator, x, y, split, scorer))
            .collect()
    })
}

/// Every parameter combination of every grid.
pub fn expand_grid(grid: &ParamGrid) -> Vec<ParamMap> {
    let mut candidates = Vec::new();
    for single in grid.grids() {
        if single.is_empty() {
            continue;
        }
        let names: Vec<&String> = single.keys().collect();
        for combination in single.values().map(|v| v.iter()).multi_cartesian_product() {
            let params: ParamMap = names
                .iter()
                .map(|name| name.to_string())
                .zip(combination.into_iter().cloned())
                .collect();
            candidates.push(params);
        }
    }
    candidates
}

#[derive(Debug, Clone)]
pub struct CandidateResult {
    pub params: ParamMap,
    pub scores: Vec<f64>,
    /// NaN when the candidate failed.
    pub mean_score: f64,
}

pub struct GridSearchResult {
    pub best_params: Option<ParamMap>,
    pub best_score: f64,
    /// Best candidate refitted on all data (when `refit` is set).
    pub best_estimator: Option<Pipeline>,
    pub cv_results: Vec<CandidateResult>,
}

fn candidate_scores(
    estimator: &Pipeline,
    params: &ParamMap,
    x: &Array2<f64>,
    y: &Array1<f64>,
    splits: &[Split],
    scorer: Scorer,
) -> Result<Vec<f64>> {
    let mut candidate = estimator.fresh();
    candidate.set_params(params)?;
    splits
        .iter()
        .map(|split| fit_and_score(&candidate, x, y, split, scorer))
        .collect()
}

fn evaluate_candidate(
    estimator: &Pipeline,
    params: &ParamMap,
    x: &Array2<f64>,
    y: &Array1<f64>,
    splits: &[Split],
    scorer: Scorer,
) -> CandidateResult {
    match candidate_scores(estimator, params, x, y, splits, scorer) {
        Ok(scores) => {
            let mean_score = scores.iter().sum::<f64>() / scores.len() as f64;
            CandidateResult {
                params: params.clone(),
                scores,
                mean_score,
            }
        }
        Err(err) => {
            warn!(
                "Candidate {} failed, assigning it a score of NaN: {}",
                serde_json::to_string(params).unwrap_or_default(),
                err
            );
            CandidateResult {
                params: params.clone(),
                scores: Vec::new(),
                mean_score: f64::NAN,
            }
        }
    }
}

/// Exhaustive search over `grid` with cross-validation, candidates
/// evaluated in parallel on `workers` threads.
pub fn grid_search_cv(
    estimator: &Pipeline,
    x: &Array2<f64>,
    y: &Array1<f64>,
    grid: &ParamGrid,
    options: &GridSearchOptions,
    workers: usize,
) -> Result<GridSearchResult> {
    let candidates = expand_grid(grid);
    if candidates.is_empty() {
        return Err(MlrError::Config(
            "Parameter grid for grid search is empty".to_string(),
        ));
    }
    let scorer = match &options.scoring {
        Some(name) => Scorer::from_name(name)?,
        None => Scorer::R2,
    };
    let splits = cv_splits(&options.cv, x.nrows())?;
    info!(
        "Grid search over {} candidate(s) with {} folds each, scoring '{}'",
        candidates.len(),
        splits.len(),
        scorer.name()
    );

    let pool = thread_pool(workers)?;
    let cv_results: Vec<CandidateResult> = pool.install(|| {
        candidates
            .par_iter()
            .map(|params| evaluate_candidate(estimator, params, x, y, &splits, scorer))
            .collect()
    });

    let best = cv_results
        .iter()
        .filter(|r| !r.mean_score.is_nan())
        .max_by(|a, b| a.mean_score.total_cmp(&b.mean_score));
    let (best_params, best_score) = match best {
        Some(r) => (Some(r.params.clone()), r.mean_score),
        None => (None, f64::NAN),
    };

    let mut best_estimator = None;
    if let (Some(params), true) = (&best_params, options.refit) {
        let mut refitted = estimator.fresh();
        match refitted.set_params(params).and_then(|_| refitted.fit(x, y)) {
            Ok(()) => best_estimator = Some(refitted),
            Err(err) => warn!("Refitting the best candidate failed: {}", err),
        }
    }

    Ok(GridSearchResult {
        best_params,
        best_score,
        best_estimator,
        cv_results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MlrConfig;
    use crate::models::linear::LinearRegressor;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn pipeline() -> Pipeline {
        let config = MlrConfig {
            cache_intermediate_results: false,
            pca: false,
            ..MlrConfig::default()
        };
        Pipeline::from_config(&config, Box::new(LinearRegressor::default()))
    }

    fn data() -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((30, 2), |(i, j)| {
            if j == 0 {
                i as f64
            } else {
                ((i * 13) % 7) as f64
            }
        });
        let y = x.column(0).mapv(|v| 0.5 * v) + &x.column(1) * 2.0 + 1.0;
        (x, y)
    }

    #[test]
    fn split_sizes() {
        let (train, test) = train_test_split(10, 0.25, Some(1));
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 7);
        let mut all: Vec<usize> = train.iter().chain(test.iter()).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
        assert_eq!(train_test_split(10, 0.25, Some(1)), (train, test));

        let (train, test) = train_test_split(10, 0.0, None);
        assert_eq!(train.len(), 10);
        assert!(test.is_empty());
    }

    #[test]
    fn folds_cover_every_sample_once() {
        let splits = cv_splits(&CvStrategy::Folds(3), 10).unwrap();
        let sizes: Vec<usize> = splits.iter().map(|(_, test)| test.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        let loo = cv_splits(&CvStrategy::Named("loo".to_string()), 4).unwrap();
        assert_eq!(loo.len(), 4);
        assert_eq!(loo[2], (vec![0, 1, 3], vec![2]));
        assert!(cv_splits(&CvStrategy::Folds(1), 10).is_err());
        assert!(cv_splits(&CvStrategy::Folds(11), 10).is_err());
        assert!(cv_splits(&CvStrategy::Named("shuffle".to_string()), 10).is_err());
    }

    #[test]
    fn scorers_are_greater_is_better() {
        let y = Array1::from(vec![1.0, 2.0, 3.0]);
        let off = Array1::from(vec![2.0, 3.0, 4.0]);
        for name in [
            "r2",
            "explained_variance",
            "neg_mean_squared_error",
            "neg_root_mean_squared_error",
            "neg_mean_absolute_error",
            "neg_median_absolute_error",
            "max_error",
        ] {
            let scorer = Scorer::from_name(name).unwrap();
            assert_eq!(scorer.name(), name);
            assert!(scorer.score(&y, &y) >= scorer.score(&y, &off), "{}", name);
        }
        assert!(Scorer::from_name("accuracy").is_err());
    }

    #[test]
    fn only_mean_squared_error_is_already_squared() {
        let squared: Vec<&str> = [
            Scorer::R2,
            Scorer::ExplainedVariance,
            Scorer::NegMeanSquaredError,
            Scorer::NegRootMeanSquaredError,
            Scorer::NegMeanAbsoluteError,
            Scorer::NegMedianAbsoluteError,
            Scorer::MaxError,
        ]
        .iter()
        .filter(|s| s.is_squared_error())
        .map(|s| s.name())
        .collect();
        assert_eq!(squared, vec!["neg_mean_squared_error"]);

        let y = Array1::from(vec![0.0, 0.0]);
        let off = Array1::from(vec![3.0, 3.0]);
        let rmse = Scorer::NegRootMeanSquaredError;
        assert!(rmse.is_negated());
        assert_eq!(rmse.score(&y, &off), -3.0);
        assert_eq!(Scorer::NegMeanSquaredError.score(&y, &off), -9.0);
    }

    #[test]
    fn cross_validation_of_exact_model() {
        let (x, y) = data();
        let scores = cross_val_score(
            &pipeline(),
            &x,
            &y,
            &CvStrategy::Folds(3),
            Scorer::NegMeanSquaredError,
            2,
        )
        .unwrap();
        assert_eq!(scores.len(), 3);
        assert!(scores.iter().all(|s| s.abs() < 1e-12), "{:?}", scores);
    }

    #[test]
    fn grid_expansion() {
        let mut grid = BTreeMap::new();
        grid.insert("a".to_string(), vec![json!(1), json!(2)]);
        grid.insert("b".to_string(), vec![json!(true), json!(false), json!(null)]);
        let candidates = expand_grid(&ParamGrid::Single(grid.clone()));
        assert_eq!(candidates.len(), 6);
        assert_eq!(candidates[0]["a"], json!(1));
        let multiple = ParamGrid::Multiple(vec![grid, BTreeMap::new()]);
        assert_eq!(expand_grid(&multiple).len(), 6);
    }

    #[test]
    fn failing_candidates_score_nan() {
        let (x, y) = data();
        let mut grid = BTreeMap::new();
        grid.insert(
            "transformed_target_regressor__regressor__fit_intercept".to_string(),
            vec![json!(true), json!("maybe")],
        );
        let result = grid_search_cv(
            &pipeline(),
            &x,
            &y,
            &ParamGrid::Single(grid),
            &GridSearchOptions::default(),
            1,
        )
        .unwrap();
        assert_eq!(result.cv_results.len(), 2);
        assert!(result.cv_results[1].mean_score.is_nan());
        assert_eq!(
            result.best_params.unwrap()["transformed_target_regressor__regressor__fit_intercept"],
            json!(true)
        );
        assert!(result.best_estimator.unwrap().is_fitted());
    }

    #[test]
    fn all_candidates_failing_yields_no_best() {
        let (x, y) = data();
        let mut grid = BTreeMap::new();
        grid.insert("x_scaler__with_mean".to_string(), vec![json!(3)]);
        let result = grid_search_cv(
            &pipeline(),
            &x,
            &y,
            &ParamGrid::Single(grid),
            &GridSearchOptions::default(),
            1,
        )
        .unwrap();
        assert!(result.best_params.is_none());
        assert!(result.best_estimator.is_none());
        assert!(grid_search_cv(
            &pipeline(),
            &x,
            &y,
            &ParamGrid::Single(BTreeMap::new()),
            &GridSearchOptions::default(),
            1,
        )
        .is_err());
    }
}
