//! Model interpretation: permutation feature importance and local linear
//! explanations of single predictions.

use log::{debug, info};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use rand::seq::SliceRandom;
use rand::Rng;
use rand_distr::StandardNormal;
use rayon::prelude::*;

use crate::error::{MlrError, Result};
use crate::math::linalg::weighted_ridge;
use crate::model_selection::{rng, thread_pool};
use crate::pipeline::Pipeline;
use crate::stats::mean_squared_error;

/// Perturbation samples per explained row when explaining a whole
/// prediction input.
pub const ROW_SAMPLES: usize = 200;
/// Perturbation samples for a single explicit explanation.
pub const INSTANCE_SAMPLES: usize = 5000;
const RIDGE_ALPHA: f64 = 1.0;

/// Local linear surrogate of a prediction.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalExplanation {
    /// Feature index and surrogate weight, largest magnitude first.
    pub weights: Vec<(usize, f64)>,
    pub intercept: f64,
    /// Surrogate prediction at the explained point.
    pub local_prediction: f64,
}

impl LocalExplanation {
    pub fn most_important_feature(&self) -> Option<usize> {
        self.weights.first().map(|(idx, _)| *idx)
    }
}

/// Interpretation helper fitted on the training data of a model.
pub struct Interpreter {
    feature_names: Vec<String>,
    x_train: Array2<f64>,
    y_train: Array1<f64>,
    mean: Array1<f64>,
    scale: Array1<f64>,
    random_state: Option<u64>,
}

fn fill_with_column_means(x: &Array2<f64>) -> (Array2<f64>, Array1<f64>) {
    let mut filled = x.clone();
    let mut means = Array1::zeros(x.ncols());
    for (j, mut column) in filled.axis_iter_mut(Axis(1)).enumerate() {
        let observed: Vec<f64> = column.iter().copied().filter(|v| !v.is_nan()).collect();
        let mean = if observed.is_empty() {
            0.0
        } else {
            observed.iter().sum::<f64>() / observed.len() as f64
        };
        column.mapv_inplace(|v| if v.is_nan() { mean } else { v });
        means[j] = mean;
    }
    (filled, means)
}

impl Interpreter {
    /// Missing training values are replaced by column means.
    pub fn new(
        feature_names: Vec<String>,
        x_train: &Array2<f64>,
        y_train: &Array1<f64>,
        random_state: Option<u64>,
    ) -> Result<Self> {
        if feature_names.len() != x_train.ncols() || x_train.nrows() != y_train.len() {
            return Err(MlrError::Shape(format!(
                "interpreter got {} feature names for data of shape {:?} and {} labels",
                feature_names.len(),
                x_train.shape(),
                y_train.len()
            )));
        }
        let (x_train, mean) = fill_with_column_means(x_train);
        let scale = x_train
            .axis_iter(Axis(1))
            .zip(mean.iter())
            .map(|(column, &m)| {
                let var = column.iter().map(|v| (v - m) * (v - m)).sum::<f64>()
                    / column.len().max(1) as f64;
                if var.sqrt() > 0.0 {
                    var.sqrt()
                } else {
                    1.0
                }
            })
            .collect();
        debug!(
            "Loaded interpreter with {} training point(s) and {} feature(s)",
            x_train.nrows(),
            x_train.ncols()
        );
        Ok(Self {
            feature_names,
            x_train,
            y_train: y_train.clone(),
            mean,
            scale,
            random_state,
        })
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    /// Relative permutation importance of every feature (sums to 1 unless
    /// no feature matters).
    pub fn feature_importance(&self, pipeline: &Pipeline) -> Result<Vec<(String, f64)>> {
        info!("Calculating global feature importance by permutation");
        let baseline = mean_squared_error(&self.y_train, &pipeline.predict(&self.x_train)?);
        let mut rng = rng(self.random_state);
        let mut increases = Vec::with_capacity(self.feature_names.len());
        for j in 0..self.x_train.ncols() {
            let mut permuted = self.x_train.clone();
            let mut column: Vec<f64> = permuted.column(j).to_vec();
            column.shuffle(&mut rng);
            permuted.column_mut(j).assign(&Array1::from(column));
            let error = mean_squared_error(&self.y_train, &pipeline.predict(&permuted)?);
            increases.push((error - baseline).max(0.0));
        }
        let total: f64 = increases.iter().sum();
        Ok(self
            .feature_names
            .iter()
            .cloned()
            .zip(increases.into_iter().map(|inc| if total > 0.0 { inc / total } else { 0.0 }))
            .collect())
    }

    /// Fit a weighted linear surrogate around `instance`.
    pub fn explain_instance(
        &self,
        pipeline: &Pipeline,
        instance: ArrayView1<f64>,
        num_samples: usize,
        seed: Option<u64>,
    ) -> Result<LocalExplanation> {
        let p = self.mean.len();
        if instance.len() != p {
            return Err(MlrError::Shape(format!(
                "cannot explain instance with {} feature(s), expected {}",
                instance.len(),
                p
            )));
        }
        let num_samples = num_samples.max(2);
        let mut rng = rng(seed);

        // scaled samples around the training mean; the first one is the instance
        let mut scaled = Array2::<f64>::zeros((num_samples, p));
        for mut row in scaled.axis_iter_mut(Axis(0)).skip(1) {
            row.mapv_inplace(|_| rng.sample(StandardNormal));
        }
        // missing feature values sit at the training mean
        let instance: Array1<f64> = instance
            .iter()
            .zip(self.mean.iter())
            .map(|(&v, &m)| if v.is_nan() { m } else { v })
            .collect();
        let instance_scaled = (&instance - &self.mean) / &self.scale;
        scaled.row_mut(0).assign(&instance_scaled);
        let samples = &scaled * &self.scale.view().insert_axis(Axis(0))
            + &self.mean.view().insert_axis(Axis(0));

        let kernel_width = 0.75 * (p as f64).sqrt();
        let weights: Array1<f64> = scaled
            .axis_iter(Axis(0))
            .map(|row| {
                let d2: f64 = row
                    .iter()
                    .zip(instance_scaled.iter())
                    .map(|(a, b)| (a - b) * (a - b))
                    .sum();
                (-d2 / (kernel_width * kernel_width)).exp().sqrt()
            })
            .collect();
        let predictions = pipeline.predict(&samples)?;
        let (coef, intercept) = weighted_ridge(&scaled, &predictions, &weights, RIDGE_ALPHA)?;

        let mut ranked: Vec<(usize, f64)> = coef.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.abs().total_cmp(&a.1.abs()));
        Ok(LocalExplanation {
            weights: ranked,
            intercept,
            local_prediction: intercept + coef.dot(&instance_scaled),
        })
    }

    /// Index of the most important feature for every row of `x`, rows
    /// explained in parallel on `workers` threads.
    pub fn most_important_features(
        &self,
        pipeline: &Pipeline,
        x: &Array2<f64>,
        workers: usize,
    ) -> Result<Array1<f64>> {
        info!(
            "Calculating most important feature of {} point(s) with local explanations",
            x.nrows()
        );
        let pool = thread_pool(workers)?;
        let indices: Result<Vec<f64>> = pool.install(|| {
            (0..x.nrows())
                .into_par_iter()
                .map(|i| {
                    let seed = self.random_state.map(|s| s.wrapping_add(i as u64));
                    let explanation = self.explain_instance(pipeline, x.row(i), ROW_SAMPLES, seed)?;
                    Ok(explanation
                        .most_important_feature()
                        .map_or(f64::NAN, |idx| idx as f64))
                })
                .collect()
        });
        Ok(Array1::from(indices?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MlrConfig;
    use crate::models::linear::LinearRegressor;

    fn fitted() -> (Pipeline, Interpreter) {
        let x = Array2::from_shape_fn((40, 3), |(i, j)| match j {
            0 => i as f64,
            1 => ((i * 7) % 5) as f64,
            _ => ((i * 3) % 11) as f64,
        });
        let y = x.column(0).mapv(|v| 10.0 * v) + &x.column(1).mapv(|v| 0.1 * v);
        let config = MlrConfig {
            cache_intermediate_results: false,
            ..MlrConfig::default()
        };
        let mut pipeline = Pipeline::from_config(&config, Box::new(LinearRegressor::default()));
        pipeline.fit(&x, &y).unwrap();
        let names = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let interpreter = Interpreter::new(names, &x, &y, Some(3)).unwrap();
        (pipeline, interpreter)
    }

    #[test]
    fn permutation_importance_ranks_dominant_feature() {
        let (pipeline, interpreter) = fitted();
        let importance = interpreter.feature_importance(&pipeline).unwrap();
        assert_eq!(importance.len(), 3);
        assert_eq!(importance[0].0, "a");
        assert!(importance[0].1 > 0.9);
        let total: f64 = importance.iter().map(|(_, v)| v).sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn local_explanation_finds_dominant_feature() {
        let (pipeline, interpreter) = fitted();
        let x = Array2::from_shape_vec((2, 3), vec![5.0, 1.0, 2.0, 30.0, 4.0, 7.0]).unwrap();
        let explanation = interpreter
            .explain_instance(&pipeline, x.row(0), 500, Some(1))
            .unwrap();
        assert_eq!(explanation.most_important_feature(), Some(0));
        let features = interpreter.most_important_features(&pipeline, &x, 2).unwrap();
        assert_eq!(features.to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn missing_training_values_use_column_means() {
        let x = Array2::from_shape_vec((3, 1), vec![1.0, f64::NAN, 3.0]).unwrap();
        let y = Array1::from(vec![1.0, 2.0, 3.0]);
        let interpreter = Interpreter::new(vec!["a".to_string()], &x, &y, None).unwrap();
        assert_eq!(interpreter.x_train[[1, 0]], 2.0);
        assert!(Interpreter::new(vec![], &x, &y, None).is_err());
    }

    #[test]
    fn missing_instance_values_are_explained_at_the_mean() {
        let (pipeline, interpreter) = fitted();
        let x = Array2::from_shape_vec((2, 3), vec![5.0, f64::NAN, 2.0, f64::NAN, 4.0, 7.0])
            .unwrap();
        let explanation = interpreter
            .explain_instance(&pipeline, x.row(0), 500, Some(1))
            .unwrap();
        assert!(explanation.local_prediction.is_finite());
        assert_eq!(explanation.most_important_feature(), Some(0));

        let mut filled = x.row(0).to_owned();
        filled[1] = interpreter.mean[1];
        let reference = interpreter
            .explain_instance(&pipeline, filled.view(), 500, Some(1))
            .unwrap();
        assert_eq!(explanation, reference);

        let features = interpreter.most_important_features(&pipeline, &x, 2).unwrap();
        assert_eq!(features.to_vec(), vec![0.0, 0.0]);
    }
}
