//! Regression metrics.
//!
//! All functions take the true and the predicted target as 1D arrays of
//! equal length and follow the usual conventions of regression scoring:
//! R² and explained variance are 1 for perfect predictions, and a constant
//! true target scores 1 only when predicted perfectly (0 otherwise).

use ndarray::Array1;
use statrs::statistics::{Data, Median, Statistics};

pub fn mean_squared_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    (y_true - y_pred).mapv(|e| e * e).iter().mean()
}

pub fn root_mean_squared_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    mean_squared_error(y_true, y_pred).sqrt()
}

pub fn mean_absolute_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    (y_true - y_pred).mapv(f64::abs).iter().mean()
}

pub fn median_absolute_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    Data::new((y_true - y_pred).mapv(f64::abs).to_vec()).median()
}

pub fn max_error(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    (y_true - y_pred)
        .iter()
        .fold(0.0_f64, |acc, e| acc.max(e.abs()))
}

fn score_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 {
        if numerator == 0.0 {
            1.0
        } else {
            0.0
        }
    } else {
        1.0 - numerator / denominator
    }
}

/// Coefficient of determination.
pub fn r2_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let mean = y_true.iter().mean();
    let ss_res: f64 = (y_true - y_pred).mapv(|e| e * e).sum();
    let ss_tot: f64 = y_true.mapv(|v| (v - mean) * (v - mean)).sum();
    score_ratio(ss_res, ss_tot)
}

pub fn explained_variance_score(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> f64 {
    let residual = y_true - y_pred;
    score_ratio(
        residual.iter().population_variance(),
        y_true.iter().population_variance(),
    )
}

/// Population standard deviation.
pub fn std_dev(values: &Array1<f64>) -> f64 {
    values.iter().population_std_dev()
}

/// Named metrics of one data split, errors additionally normalized by the
/// standard deviation of the true target.
#[derive(Debug, Clone, PartialEq)]
pub struct RegressionMetrics {
    pub explained_variance_score: f64,
    pub mean_absolute_error: f64,
    pub root_mean_squared_error: f64,
    pub median_absolute_error: f64,
    pub r2_score: f64,
    pub y_std: f64,
}

impl RegressionMetrics {
    pub fn compute(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Self {
        Self {
            explained_variance_score: explained_variance_score(y_true, y_pred),
            mean_absolute_error: mean_absolute_error(y_true, y_pred),
            root_mean_squared_error: root_mean_squared_error(y_true, y_pred),
            median_absolute_error: median_absolute_error(y_true, y_pred),
            r2_score: r2_score(y_true, y_pred),
            y_std: std_dev(y_true),
        }
    }

    /// `(name, value)` pairs in reporting order; errors are normalized.
    pub fn entries(&self) -> Vec<(String, f64)> {
        let normalized = |v: f64| if self.y_std > 0.0 { v / self.y_std } else { f64::NAN };
        vec![
            ("explained_variance_score".to_string(), self.explained_variance_score),
            (
                "mean_absolute_error (normalized by std)".to_string(),
                normalized(self.mean_absolute_error),
            ),
            (
                "root_mean_squared_error (normalized by std)".to_string(),
                normalized(self.root_mean_squared_error),
            ),
            (
                "median_absolute_error (normalized by std)".to_string(),
                normalized(self.median_absolute_error),
            ),
            ("r2_score".to_string(), self.r2_score),
        ]
    }
}
