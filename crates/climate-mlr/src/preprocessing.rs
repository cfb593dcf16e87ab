//! Preprocessing stages of the regression pipeline.
//!
//! Provides a missing-value imputer, a mean/variance standard scaler and a
//! principal component analysis. Each stage is fitted on a sample-by-feature
//! `Array2<f64>` and keeps its fitted state serializable so the pipeline
//! cache can store it.

use std::collections::BTreeMap;

use log::warn;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use statrs::statistics::{Data, Median, Statistics};

use crate::config::{ImputationStrategy, ParamMap};
use crate::error::{MlrError, Result};
use crate::math::linalg::symmetric_eigen;
use crate::params;

/// Common interface of the preprocessing stages.
pub trait Transform {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()>;

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    fn fit_transform(&mut self, x: &Array2<f64>) -> Result<Array2<f64>> {
        self.fit(x)?;
        self.transform(x)
    }

    fn params(&self) -> ParamMap;

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()>;

    fn is_fitted(&self) -> bool;

    /// Forget the fitted state, keeping the parameters.
    fn reset(&mut self);
}

fn not_fitted(stage: &str) -> MlrError {
    MlrError::NotFitted(format!("{} has not been fitted", stage))
}

fn check_columns(stage: &str, expected: usize, x: &Array2<f64>) -> Result<()> {
    if x.ncols() != expected {
        return Err(MlrError::Shape(format!(
            "{} was fitted on {} feature(s), got {}",
            stage,
            expected,
            x.ncols()
        )));
    }
    Ok(())
}

fn observed(column: ndarray::ArrayView1<f64>) -> Vec<f64> {
    column.iter().copied().filter(|v| !v.is_nan()).collect()
}

/// Replaces NaN entries column-wise.
///
/// Columns without a single observed value cannot be imputed by a statistic
/// and are dropped from the output (with a warning); the `constant` strategy
/// keeps them.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimpleImputer {
    pub strategy: ImputationStrategy,
    pub fill_value: f64,
    statistics: Option<Vec<f64>>,
}

impl SimpleImputer {
    pub fn new(strategy: ImputationStrategy, fill_value: f64) -> Self {
        Self {
            strategy,
            fill_value,
            statistics: None,
        }
    }

    /// Fitted replacement value per input column (NaN for dropped columns).
    pub fn statistics(&self) -> Option<&[f64]> {
        self.statistics.as_deref()
    }

    fn statistic(&self, values: Vec<f64>) -> Result<f64> {
        if values.is_empty() && self.strategy != ImputationStrategy::Constant {
            return Ok(f64::NAN);
        }
        Ok(match self.strategy {
            ImputationStrategy::Mean => values.iter().mean(),
            ImputationStrategy::Median => Data::new(values).median(),
            ImputationStrategy::MostFrequent => most_frequent(&values),
            ImputationStrategy::Constant => self.fill_value,
            ImputationStrategy::Remove => {
                return Err(MlrError::Config(
                    "the 'remove' strategy does not impute values".to_string(),
                ))
            }
        })
    }
}

/// Mode of `values`; ties resolve to the smallest value.
fn most_frequent(values: &[f64]) -> f64 {
    let mut counts: BTreeMap<u64, (f64, usize)> = BTreeMap::new();
    for &v in values {
        let key = if v == 0.0 { 0.0_f64.to_bits() } else { v.to_bits() };
        counts.entry(key).or_insert((v, 0)).1 += 1;
    }
    counts
        .values()
        .fold(None, |best: Option<(f64, usize)>, &(v, n)| match best {
            Some((bv, bn)) if bn > n || (bn == n && bv <= v) => Some((bv, bn)),
            _ => Some((v, n)),
        })
        .map_or(f64::NAN, |(v, _)| v)
}

impl Transform for SimpleImputer {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let mut statistics = Vec::with_capacity(x.ncols());
        for (j, column) in x.axis_iter(Axis(1)).enumerate() {
            let value = self.statistic(observed(column))?;
            if value.is_nan() {
                warn!(
                    "Skipping feature column {} without any observed value during imputation",
                    j
                );
            }
            statistics.push(value);
        }
        self.statistics = Some(statistics);
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let statistics = self.statistics.as_ref().ok_or_else(|| not_fitted("imputer"))?;
        check_columns("imputer", statistics.len(), x)?;
        let kept: Vec<usize> = (0..statistics.len())
            .filter(|&j| !statistics[j].is_nan())
            .collect();
        let mut out = x.select(Axis(1), &kept);
        for (mut column, &j) in out.axis_iter_mut(Axis(1)).zip(kept.iter()) {
            column.mapv_inplace(|v| if v.is_nan() { statistics[j] } else { v });
        }
        Ok(out)
    }

    fn params(&self) -> ParamMap {
        let mut p = ParamMap::new();
        p.insert("strategy".to_string(), Value::from(self.strategy.name()));
        p.insert("fill_value".to_string(), Value::from(self.fill_value));
        p
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "strategy" => {
                let strategy: ImputationStrategy = params::as_typed(name, value)?;
                if strategy == ImputationStrategy::Remove {
                    return Err(MlrError::Config(
                        "imputer strategy cannot be 'remove'".to_string(),
                    ));
                }
                self.strategy = strategy;
            }
            "fill_value" => self.fill_value = params::as_f64(name, value)?,
            _ => return Err(params::unknown("imputer", name)),
        }
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.statistics.is_some()
    }

    fn reset(&mut self) {
        self.statistics = None;
    }
}

/// Standardizes features by removing the mean and scaling to unit variance.
///
/// Either step can be switched off; with both off the scaler is the
/// identity. NaN entries are ignored when fitting and passed through.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StandardScaler {
    pub with_mean: bool,
    pub with_std: bool,
    mean: Option<Array1<f64>>,
    scale: Option<Array1<f64>>,
}

impl StandardScaler {
    /// Minimum stddev treated as non-constant.
    const MIN_STD: f64 = 1e-12;

    pub fn new(with_mean: bool, with_std: bool) -> Self {
        Self {
            with_mean,
            with_std,
            mean: None,
            scale: None,
        }
    }

    pub fn mean(&self) -> Option<&Array1<f64>> {
        self.mean.as_ref()
    }

    pub fn scale(&self) -> Option<&Array1<f64>> {
        self.scale.as_ref()
    }

    fn fitted(&self) -> Result<(&Array1<f64>, &Array1<f64>)> {
        match (&self.mean, &self.scale) {
            (Some(mean), Some(scale)) => Ok((mean, scale)),
            _ => Err(not_fitted("scaler")),
        }
    }

    /// Undo [`Transform::transform`].
    pub fn inverse_transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = self.fitted()?;
        check_columns("scaler", mean.len(), x)?;
        let mut out = x.clone();
        for (mut column, (&m, &s)) in out.axis_iter_mut(Axis(1)).zip(mean.iter().zip(scale.iter())) {
            column.mapv_inplace(|v| {
                let v = if self.with_std { v * s } else { v };
                if self.with_mean {
                    v + m
                } else {
                    v
                }
            });
        }
        Ok(out)
    }
}

impl Transform for StandardScaler {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let mut mean = Array1::<f64>::zeros(x.ncols());
        let mut scale = Array1::<f64>::ones(x.ncols());
        for (j, column) in x.axis_iter(Axis(1)).enumerate() {
            let values = observed(column);
            if values.is_empty() {
                continue;
            }
            let m = values.iter().mean();
            let std = values.iter().population_std_dev();
            mean[j] = m;
            scale[j] = if std > Self::MIN_STD { std } else { 1.0 };
        }
        self.mean = Some(mean);
        self.scale = Some(scale);
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, scale) = self.fitted()?;
        check_columns("scaler", mean.len(), x)?;
        let mut out = x.clone();
        for (mut column, (&m, &s)) in out.axis_iter_mut(Axis(1)).zip(mean.iter().zip(scale.iter())) {
            column.mapv_inplace(|v| {
                let v = if self.with_mean { v - m } else { v };
                if self.with_std {
                    v / s
                } else {
                    v
                }
            });
        }
        Ok(out)
    }

    fn params(&self) -> ParamMap {
        let mut p = ParamMap::new();
        p.insert("with_mean".to_string(), Value::from(self.with_mean));
        p.insert("with_std".to_string(), Value::from(self.with_std));
        p
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "with_mean" => self.with_mean = params::as_bool(name, value)?,
            "with_std" => self.with_std = params::as_bool(name, value)?,
            _ => return Err(params::unknown("scaler", name)),
        }
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.mean.is_some()
    }

    fn reset(&mut self) {
        self.mean = None;
        self.scale = None;
    }
}

/// Principal component analysis via eigen-decomposition of the covariance.
///
/// Components are ordered by explained variance. Without `n_components`
/// all `min(n_samples, n_features)` components are kept.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Pca {
    pub n_components: Option<usize>,
    pub whiten: bool,
    mean: Option<Array1<f64>>,
    components: Option<Array2<f64>>,
    explained_variance: Option<Array1<f64>>,
}

impl Default for Pca {
    fn default() -> Self {
        Self {
            n_components: None,
            whiten: false,
            mean: None,
            components: None,
            explained_variance: None,
        }
    }
}

impl Pca {
    const MIN_VARIANCE: f64 = 1e-12;

    /// Fitted components, one per row.
    pub fn components(&self) -> Option<&Array2<f64>> {
        self.components.as_ref()
    }

    pub fn explained_variance(&self) -> Option<&Array1<f64>> {
        self.explained_variance.as_ref()
    }
}

impl Transform for Pca {
    fn fit(&mut self, x: &Array2<f64>) -> Result<()> {
        let (n, p) = x.dim();
        if n == 0 || p == 0 {
            return Err(MlrError::Shape(format!("cannot fit PCA on shape ({}, {})", n, p)));
        }
        let mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| MlrError::Shape("empty input to PCA".to_string()))?;
        let centered = x - &mean.view().insert_axis(Axis(0));
        let dof = if n > 1 { (n - 1) as f64 } else { 1.0 };
        let covariance = centered.t().dot(&centered) / dof;
        let (values, vectors) = symmetric_eigen(&covariance)?;

        let max_components = n.min(p);
        let k = self.n_components.unwrap_or(max_components).min(max_components);
        if k == 0 {
            return Err(MlrError::Config("PCA needs at least one component".to_string()));
        }
        let order: Vec<usize> = (0..k).collect();
        self.components = Some(vectors.select(Axis(1), &order).reversed_axes());
        self.explained_variance = Some(values.select(Axis(0), &order).mapv(|v| v.max(0.0)));
        self.mean = Some(mean);
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (mean, components, variance) =
            match (&self.mean, &self.components, &self.explained_variance) {
                (Some(m), Some(c), Some(v)) => (m, c, v),
                _ => return Err(not_fitted("PCA")),
            };
        check_columns("PCA", mean.len(), x)?;
        let centered = x - &mean.view().insert_axis(Axis(0));
        let mut out = centered.dot(&components.t());
        if self.whiten {
            for (mut column, &var) in out.axis_iter_mut(Axis(1)).zip(variance.iter()) {
                let std = var.max(Self::MIN_VARIANCE).sqrt();
                column.mapv_inplace(|v| v / std);
            }
        }
        Ok(out)
    }

    fn params(&self) -> ParamMap {
        let mut p = ParamMap::new();
        p.insert(
            "n_components".to_string(),
            self.n_components.map_or(Value::Null, Value::from),
        );
        p.insert("whiten".to_string(), Value::from(self.whiten));
        p
    }

    fn set_param(&mut self, name: &str, value: &Value) -> Result<()> {
        match name {
            "n_components" => self.n_components = params::as_opt_usize(name, value)?,
            "whiten" => self.whiten = params::as_bool(name, value)?,
            _ => return Err(params::unknown("pca", name)),
        }
        Ok(())
    }

    fn is_fitted(&self) -> bool {
        self.components.is_some()
    }

    fn reset(&mut self) {
        self.mean = None;
        self.components = None;
        self.explained_variance = None;
    }
}
