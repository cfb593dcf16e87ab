//! Aggregation of written prediction cubes.
//!
//! The mean prediction is the reference: every other output with the same
//! shape is aggregated the same way, the covariance matrix is summed with
//! weights derived from the reference grid.

use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use ndarray::{Array1, Array2, ArrayD, Axis};
use serde_json::Value;

use crate::config::{ErrorEstimationType, PostprocessConfig};
use crate::cube::{Cube, Dtype};
use crate::error::{MlrError, Result};
use crate::io::{write_cube, CUBE_EXTENSION};
use crate::math::Aggregation;
use crate::units::Units;

/// Kind of a prediction output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredictionKind {
    Mean,
    Var,
    Cov,
    /// Broadcast squared prediction error with the method actually used.
    SquaredErrorEstim(ErrorEstimationType),
    /// Index of the locally most important feature.
    Lime,
}

impl PredictionKind {
    /// File/variable suffix; the mean prediction has none.
    pub fn suffix(&self) -> Option<String> {
        match self {
            PredictionKind::Mean => None,
            PredictionKind::Var => Some("var".to_string()),
            PredictionKind::Cov => Some("cov".to_string()),
            PredictionKind::SquaredErrorEstim(kind) => {
                Some(format!("squared_error_estim_{}", kind.name()))
            }
            PredictionKind::Lime => Some("lime".to_string()),
        }
    }

    /// Power of the label units carried by this kind.
    pub fn units_power(&self) -> i32 {
        match self {
            PredictionKind::Mean | PredictionKind::Lime => 1,
            PredictionKind::Var | PredictionKind::Cov | PredictionKind::SquaredErrorEstim(_) => 2,
        }
    }
}

impl fmt::Display for PredictionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.suffix() {
            Some(suffix) => f.write_str(&suffix),
            None => f.write_str("mean"),
        }
    }
}

/// A written prediction cube.
#[derive(Clone, Debug)]
pub struct PredictionOutput {
    pub kind: PredictionKind,
    pub path: PathBuf,
    pub cube: Cube,
}

impl PredictionOutput {
    fn skip_for_pp(&self) -> bool {
        match self.cube.attributes.get("skip_for_pp") {
            Some(Value::Bool(flag)) => *flag,
            Some(Value::Number(n)) => n.as_f64().map_or(false, |v| v != 0.0),
            Some(_) => true,
            None => false,
        }
    }
}

/// `<reference stem>_pp<suffix>.json`, where `<suffix>` is whatever the
/// stem of `path` adds to the stem of `reference`.
pub fn postprocessed_path(path: &Path, reference: &Path) -> PathBuf {
    let stem = |p: &Path| {
        p.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default()
    };
    let ref_stem = stem(reference);
    let own_stem = stem(path);
    let suffix = own_stem.strip_prefix(&ref_stem).unwrap_or(&own_stem);
    let name = format!("{}_pp{}.{}", ref_stem, suffix, CUBE_EXTENSION);
    match reference.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Convert `cube` to `target` raised to `power`; failures only warn.
fn convert_units(cube: &mut Cube, target: &str, power: i32, text: &str) {
    let units = match Units::parse(target).and_then(|u| u.pow(power as f64)) {
        Ok(units) => units,
        Err(err) => {
            warn!("Invalid target units '{}' of {}: {}", target, text, err);
            return;
        }
    };
    debug!("Converting units of {} from '{}' to '{}'", text, cube.units, units);
    if let Err(err) = cube.convert_units(&units) {
        warn!(
            "Units conversion of {} from '{}' to '{}' failed: {}",
            text, cube.units, units, err
        );
    }
}

/// Area weights of `cube` raised to `power`, `None` (with a warning) when
/// they cannot be computed.
fn area_weights(cube: &Cube, power: i32) -> Option<ArrayD<f64>> {
    match cube.area_weights() {
        Ok(weights) => Some(weights.mapv(|w| w.powi(power))),
        Err(err) => {
            warn!(
                "Calculation of area weights for prediction cube '{}' failed: {}",
                cube.summary_name(),
                err
            );
            None
        }
    }
}

/// Applies the `prediction_pp` settings to a family of prediction outputs.
pub struct Postprocessor<'a> {
    config: &'a PostprocessConfig,
    dtype: Dtype,
    covariance_requested: bool,
}

impl<'a> Postprocessor<'a> {
    pub fn new(config: &'a PostprocessConfig, dtype: Dtype, covariance_requested: bool) -> Self {
        Self {
            config,
            dtype,
            covariance_requested,
        }
    }

    /// Postprocess and write every output; returns the written paths.
    pub fn run(&self, outputs: &[PredictionOutput]) -> Result<Vec<PathBuf>> {
        let reference = outputs
            .iter()
            .find(|o| o.kind == PredictionKind::Mean)
            .ok_or_else(|| {
                MlrError::Dataset("No mean prediction available for postprocessing".to_string())
            })?;
        info!("Postprocessing prediction output using {:?}", self.config);
        debug!("Using reference cube at '{}'", reference.path.display());

        let mut written = Vec::new();
        let ref_shape = reference.cube.shape().to_vec();
        let (cube, cov_weights) = self.process_cube(&reference.cube, PredictionKind::Mean)?;
        written.push(self.save(cube, &reference.path, &reference.path)?);

        for output in outputs {
            if output.kind == PredictionKind::Mean || output.skip_for_pp() {
                continue;
            }
            let cube = if output.cube.shape() == ref_shape.as_slice() {
                self.process_cube(&output.cube, output.kind)?.0
            } else {
                if let Some(weights) = &cov_weights {
                    if output.cube.shape() != weights.shape() {
                        error!(
                            "Cannot postprocess all prediction cubes, expected shapes {:?} or \
                             {:?} (for covariance), got {:?}",
                            ref_shape,
                            weights.shape(),
                            output.cube.shape()
                        );
                        continue;
                    }
                }
                self.process_covariance(&output.cube, cov_weights.as_ref())?
            };
            written.push(self.save(cube, &output.path, &reference.path)?);
        }
        Ok(written)
    }

    fn save(&self, mut cube: Cube, path: &Path, reference: &Path) -> Result<PathBuf> {
        let new_path = postprocessed_path(path, reference);
        cube.attributes.insert(
            "source".to_string(),
            Value::from(path.display().to_string()),
        );
        let written = write_cube(&new_path, &cube, self.dtype)?;
        info!("Wrote postprocessed prediction {}", written.display());
        Ok(written)
    }

    /// Mean, then sum over the configured coordinates. For the mean
    /// prediction with a covariance request, also returns the weights for
    /// the covariance matrix.
    fn process_cube(&self, cube: &Cube, kind: PredictionKind) -> Result<(Cube, Option<Array2<f64>>)> {
        debug!("Postprocessing prediction cube of type '{}'", kind);
        let power = kind.units_power();
        let point_weights = if self.config.area_weights
            && kind == PredictionKind::Mean
            && self.covariance_requested
        {
            area_weights(cube, 1).map(|weights| {
                weights
                    .iter()
                    .zip(cube.data().valid().iter())
                    .filter(|(_, &ok)| ok)
                    .map(|(&w, _)| w)
                    .collect::<Array1<f64>>()
            })
        } else {
            None
        };

        let mut cube = cube.clone();
        let mut n_points_mean = None;
        let old_size = cube.data().len();
        for (aggregation, coords) in [
            (Aggregation::Mean, &self.config.mean),
            (Aggregation::Sum, &self.config.sum),
        ] {
            if coords.is_empty() {
                continue;
            }
            debug!("Calculating {} for coordinates {:?}", aggregation.name(), coords);
            let weighted = self.config.area_weights
                && coords.iter().any(|c| c == "latitude")
                && coords.iter().any(|c| c == "longitude");
            let weights = if weighted { area_weights(&cube, power) } else { None };
            cube = cube.collapsed(coords, aggregation, weights.as_ref())?;
            match aggregation {
                Aggregation::Mean => n_points_mean = Some(old_size / cube.data().len().max(1)),
                Aggregation::Sum if weights.is_some() => {
                    cube.units = cube.units.multiply(&Units::parse("m2")?.pow(power as f64)?)?;
                }
                Aggregation::Sum => {}
            }
        }

        if let Some(target) = &self.config.units {
            convert_units(
                &mut cube,
                target,
                power,
                &format!("postprocessed prediction output of type '{}'", kind),
            );
        }

        let cov_weights = point_weights.map(|w| {
            debug!("Calculating covariance weights for {} point(s)", w.len());
            let mut outer = w
                .view()
                .insert_axis(Axis(1))
                .dot(&w.view().insert_axis(Axis(0)));
            if let Some(n) = n_points_mean {
                let n = n as f64;
                outer.mapv_inplace(|v| v / (n * n));
            }
            outer
        });
        Ok((cube, cov_weights))
    }

    /// Sum the covariance matrix over all axes.
    fn process_covariance(&self, cube: &Cube, weights: Option<&Array2<f64>>) -> Result<Cube> {
        debug!("Postprocessing covariance matrix");
        let axes: Vec<String> = cube.dim_coords().iter().map(|c| c.name.clone()).collect();
        let weights = weights.map(|w| w.clone().into_dyn());
        let mut cube = cube.collapsed(&axes, Aggregation::Sum, weights.as_ref())?;
        if weights.is_some() {
            cube.units = cube.units.multiply(&Units::parse("m4")?)?;
        }
        if let Some(target) = &self.config.units {
            convert_units(&mut cube, target, 2, "postprocessed covariance");
        }
        Ok(cube)
    }
}
