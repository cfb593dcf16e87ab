//! Extraction of the feature matrix and label vector from catalog datasets.
//!
//! Every group of training datasets contributes the flattened grid of its
//! reference cube as rows; every feature contributes one column. Missing
//! values stay masked until the imputation strategy resolves them.

use std::collections::BTreeSet;
use std::fmt;

use log::{debug, info, warn};
use ndarray::{Array1, Array2, ArrayD, Ix1, Ix2, IxDyn};

use crate::catalog::{Catalog, DatasetDescriptor, PredictionSet, VarType};
use crate::config::{ImputationStrategy, MlrConfig};
use crate::cube::{Coord, Cube};
use crate::error::{MlrError, Result};
use crate::loader::CubeLoader;
use crate::math::MaskedArray;
use crate::units::Units;

/// How a feature column is obtained.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeatureType {
    /// Cube on the grid of the reference cube.
    Regular,
    /// Lower-dimensional cube broadcast onto the reference grid.
    Broadcasted,
    /// Coordinate of the reference cube.
    Coordinate,
}

impl FeatureType {
    pub fn name(&self) -> &'static str {
        match self {
            FeatureType::Regular => "regular",
            FeatureType::Broadcasted => "broadcasted",
            FeatureType::Coordinate => "coordinate",
        }
    }
}

impl fmt::Display for FeatureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    pub tag: String,
    pub units: Units,
    pub kind: FeatureType,
}

/// Features of a model, sorted by tag.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeatureTable {
    features: Vec<Feature>,
}

impl FeatureTable {
    pub fn new(mut features: Vec<Feature>) -> Self {
        features.sort_by(|a, b| a.tag.cmp(&b.tag));
        Self { features }
    }

    /// Collect the features of the first prediction set.
    pub fn from_catalog(catalog: &Catalog, loader: &CubeLoader, config: &MlrConfig) -> Result<Self> {
        let set = catalog.prediction_sets().first().ok_or_else(|| {
            MlrError::Dataset("No 'prediction_input' data found, cannot determine features".to_string())
        })?;
        Self::from_prediction_set(set, loader, config)
    }

    pub fn from_prediction_set(
        set: &PredictionSet,
        loader: &CubeLoader,
        config: &MlrConfig,
    ) -> Result<Self> {
        let msg = prediction_msg(&set.name);
        let mut features: Vec<Feature> = Vec::new();
        for dataset in &set.datasets {
            if features.iter().any(|f| f.tag == dataset.tag) {
                continue;
            }
            let kind = if dataset.broadcast_from.is_some() {
                FeatureType::Broadcasted
            } else {
                FeatureType::Regular
            };
            features.push(Feature {
                tag: dataset.tag.clone(),
                units: Units::parse(&dataset.units)?,
                kind,
            });
        }
        if features.is_empty() {
            return Err(MlrError::Dataset(format!(
                "No features for 'prediction_input' data{} found",
                msg
            )));
        }
        // same choice as the extractor: the regular feature first by tag
        let reference = set
            .datasets
            .iter()
            .filter(|d| d.broadcast_from.is_none())
            .min_by(|a, b| a.tag.cmp(&b.tag))
            .ok_or_else(|| {
                MlrError::Dataset(format!(
                    "Expected at least one 'prediction_input' dataset{} without the option \
                     'broadcast_from'",
                    msg
                ))
            })?;
        let reference = loader.load(reference)?;
        for name in &config.coords_as_features {
            let coord = reference.coord(name).ok_or_else(|| {
                MlrError::Dataset(format!(
                    "Coordinate '{}' given in 'coords_as_features' not found in \
                     'prediction_input' data{}",
                    name, msg
                ))
            })?;
            features.push(Feature {
                tag: name.clone(),
                units: coord.units.clone(),
                kind: FeatureType::Coordinate,
            });
        }

        if config.accept_only_scalar_data {
            for kind in [FeatureType::Broadcasted, FeatureType::Coordinate] {
                if features.iter().any(|f| f.kind == kind) {
                    return Err(MlrError::Config(format!(
                        "{} features are not possible if 'accept_only_scalar_data' is given",
                        kind
                    )));
                }
            }
        }

        let table = Self::new(features);
        info!(
            "Found {} feature(s) (defined in 'prediction_input' data{})",
            table.len(),
            msg
        );
        for feature in &table.features {
            debug!(
                "'{}' with units '{}' and type '{}'",
                feature.tag, feature.units, feature.kind
            );
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    pub fn get(&self, tag: &str) -> Option<&Feature> {
        self.features.iter().find(|f| f.tag == tag)
    }

    pub fn names(&self) -> Vec<String> {
        self.features.iter().map(|f| f.tag.clone()).collect()
    }

    pub fn units(&self) -> Vec<(String, Units)> {
        self.features
            .iter()
            .map(|f| (f.tag.clone(), f.units.clone()))
            .collect()
    }

    pub fn types(&self) -> Vec<(String, FeatureType)> {
        self.features.iter().map(|f| (f.tag.clone(), f.kind)).collect()
    }
}

/// The regression target.
#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub tag: String,
    pub units: Units,
}

impl Label {
    pub fn from_catalog(catalog: &Catalog) -> Result<Self> {
        let (tag, units) = catalog.label()?;
        let units = Units::parse(&units)?;
        info!("Found label '{}' with units '{}'", tag, units);
        Ok(Self { tag, units })
    }
}

/// Training table before splitting.
#[derive(Clone, Debug)]
pub struct TrainingData {
    /// Features, NaN where missing.
    pub x: Array2<f64>,
    pub y: Array1<f64>,
    /// Group key of every row.
    pub row_groups: Vec<Option<String>>,
}

/// Prediction input of one prediction set.
#[derive(Clone, Debug)]
pub struct PredictionInput {
    /// `(points, features)` with missing features masked.
    pub x: MaskedArray,
    /// Cube defining the output grid.
    pub reference: Cube,
}

impl PredictionInput {
    /// Features with NaN for missing values.
    pub fn x_filled(&self) -> Result<Array2<f64>> {
        Ok(self.x.filled(f64::NAN).into_dimensionality::<Ix2>()?)
    }
}

fn prediction_msg(name: &Option<String>) -> String {
    match name {
        Some(name) => format!(" for prediction '{}'", name),
        None => String::new(),
    }
}

fn group_msg(group: &Option<String>) -> String {
    match group {
        Some(group) => format!(" for '{}'", group),
        None => String::new(),
    }
}

/// Builds feature matrices and label vectors for one model.
pub struct Extractor<'a> {
    config: &'a MlrConfig,
    loader: &'a CubeLoader,
    features: &'a FeatureTable,
    label: &'a Label,
}

impl<'a> Extractor<'a> {
    pub fn new(
        config: &'a MlrConfig,
        loader: &'a CubeLoader,
        features: &'a FeatureTable,
        label: &'a Label,
    ) -> Self {
        Self {
            config,
            loader,
            features,
            label,
        }
    }

    /// Features and labels of every group, stacked row-wise, with rows of
    /// missing labels removed and (strategy `remove`) rows of missing
    /// features removed.
    pub fn training_data(
        &self,
        datasets: &[DatasetDescriptor],
        groups: &[Option<String>],
    ) -> Result<TrainingData> {
        let mut x_parts = Vec::with_capacity(groups.len());
        let mut y_parts = Vec::with_capacity(groups.len());
        let mut row_groups = Vec::new();
        for group in groups {
            if let Some(name) = group {
                info!("Loading training data of '{}'", name);
            }
            let group_datasets: Vec<&DatasetDescriptor> = datasets
                .iter()
                .filter(|d| &d.group_attribute == group)
                .collect();
            let (x, _) = self.x_for_group(&group_datasets, VarType::Feature, &group_msg(group))?;
            let y = self.y_for_group(&group_datasets, &group_msg(group))?;
            row_groups.extend(std::iter::repeat(group.clone()).take(y.len()));
            x_parts.push(x);
            y_parts.push(y);
        }
        let x = MaskedArray::concatenate(&x_parts)?;
        let y = MaskedArray::concatenate(&y_parts)?;
        if x.shape()[0] != y.len() {
            return Err(MlrError::Shape(format!(
                "Sizes of features and labels do not match, got {} points for the features \
                 and {} points for the label",
                x.shape()[0],
                y.len()
            )));
        }
        info!("Found {} raw input data point(s)", y.len());

        let (x, y, row_groups) = remove_missing_labels(x, y, row_groups);
        let (x, y, row_groups) =
            remove_missing_features(x, y, row_groups, self.config.imputation_strategy)?;
        if y.is_empty() {
            return Err(MlrError::Dataset(
                "No training data left after removing missing values".to_string(),
            ));
        }
        Ok(TrainingData { x, y, row_groups })
    }

    /// Masked feature input of one prediction set.
    pub fn prediction_input(&self, set: &PredictionSet) -> Result<PredictionInput> {
        let datasets: Vec<&DatasetDescriptor> = set.datasets.iter().collect();
        let (x, reference) =
            self.x_for_group(&datasets, VarType::PredictionInput, &prediction_msg(&set.name))?;
        info!(
            "Found {} raw prediction input data point(s)",
            x.shape()[0]
        );
        Ok(PredictionInput { x, reference })
    }

    fn x_for_group(
        &self,
        datasets: &[&DatasetDescriptor],
        var_type: VarType,
        msg: &str,
    ) -> Result<(MaskedArray, Cube)> {
        let datasets: Vec<&DatasetDescriptor> = datasets
            .iter()
            .copied()
            .filter(|d| d.var_type == var_type)
            .collect();
        if datasets.is_empty() {
            return Err(MlrError::Dataset(format!("No '{}' data{} found", var_type, msg)));
        }
        let reference = self.reference_cube(&datasets, var_type, msg)?;
        let n_points = reference.data().len();
        let reference_coords: Vec<Coord> = reference.dim_coords().into_iter().cloned().collect();

        let mut columns = Vec::with_capacity(self.features.len());
        for feature in self.features.iter() {
            let text = format!("{} '{}'{}", var_type, feature.tag, msg);
            let column = match feature.kind {
                FeatureType::Coordinate => coordinate_column(&reference, &feature.tag, &text)?,
                _ => match self.check_dataset(&datasets, var_type, &feature.tag, &feature.units, msg)? {
                    None => MaskedArray::fully_masked(&[n_points]),
                    Some(dataset) => {
                        let cube = match &dataset.broadcast_from {
                            Some(axes) => self.broadcast_cube(dataset, axes, &reference, &text)?,
                            None => self.loader.load(dataset)?,
                        };
                        self.check_cube_coords(&cube, Some(&reference_coords), &text)?;
                        let column = cube.data().ravel();
                        if column.len() != n_points {
                            return Err(MlrError::Shape(format!(
                                "Expected {} point(s) for {}, got {}",
                                n_points,
                                text,
                                column.len()
                            )));
                        }
                        column
                    }
                },
            };
            columns.push(column);
        }
        Ok((MaskedArray::column_stack(&columns)?, reference))
    }

    fn y_for_group(&self, datasets: &[&DatasetDescriptor], msg: &str) -> Result<MaskedArray> {
        let labels: Vec<&DatasetDescriptor> = datasets
            .iter()
            .copied()
            .filter(|d| d.var_type == VarType::Label)
            .collect();
        let dataset = self
            .check_dataset(&labels, VarType::Label, &self.label.tag, &self.label.units, msg)?
            .ok_or_else(|| {
                MlrError::Dataset(format!("Label '{}'{} not found", self.label.tag, msg))
            })?;
        let cube = self.loader.load(dataset)?;
        let text = format!("label '{}'{}", self.label.tag, msg);
        self.check_cube_coords(&cube, None, &text)?;
        Ok(cube.data().ravel())
    }

    /// First regular feature available in `datasets`.
    fn reference_cube(
        &self,
        datasets: &[&DatasetDescriptor],
        var_type: VarType,
        msg: &str,
    ) -> Result<Cube> {
        for feature in self.features.iter().filter(|f| f.kind == FeatureType::Regular) {
            if let Some(dataset) =
                self.check_dataset(datasets, var_type, &feature.tag, &feature.units, msg)?
            {
                let cube = self.loader.load(dataset)?;
                debug!(
                    "For var_type '{}'{}, use reference cube with tag '{}'",
                    var_type, msg, feature.tag
                );
                return Ok(cube);
            }
        }
        Err(MlrError::Dataset(format!(
            "No {} data{} without the option 'broadcast_from' found",
            var_type, msg
        )))
    }

    /// The unique dataset with `tag`, `None` when missing features are
    /// allowed and it is absent.
    fn check_dataset<'d>(
        &self,
        datasets: &[&'d DatasetDescriptor],
        var_type: VarType,
        tag: &str,
        units: &Units,
        msg: &str,
    ) -> Result<Option<&'d DatasetDescriptor>> {
        let matching: Vec<&DatasetDescriptor> =
            datasets.iter().copied().filter(|d| d.tag == tag).collect();
        match matching.as_slice() {
            [] => {
                if var_type == VarType::Label {
                    return Err(MlrError::Dataset(format!("Label '{}'{} not found", tag, msg)));
                }
                if !self.config.allow_missing_features {
                    return Err(MlrError::Dataset(format!(
                        "{} '{}'{} not found, use 'allow_missing_features' to ignore this",
                        var_type, tag, msg
                    )));
                }
                info!(
                    "Ignored missing {} '{}'{} since 'allow_missing_features' is set",
                    var_type, tag, msg
                );
                Ok(None)
            }
            [dataset] => {
                let declared = Units::parse(&dataset.units)?;
                if &declared != units {
                    return Err(MlrError::Dataset(format!(
                        "Expected units '{}' for {} '{}'{}, got '{}'",
                        units, var_type, tag, msg, dataset.units
                    )));
                }
                Ok(Some(*dataset))
            }
            _ => Err(MlrError::Dataset(format!(
                "{} '{}'{} not unique, consider selecting datasets with metadata or grouping \
                 them with 'group_datasets_by_attributes'",
                var_type, tag, msg
            ))),
        }
    }

    fn check_cube_coords(&self, cube: &Cube, expected: Option<&[Coord]>, text: &str) -> Result<()> {
        if self.config.accept_only_scalar_data {
            if !(cube.shape().is_empty() || cube.shape() == [1]) {
                return Err(MlrError::Dataset(format!(
                    "Expected only cubes with shapes () or (1,) when option \
                     'accept_only_scalar_data' is set, got {:?} for {}",
                    cube.shape(),
                    text
                )));
            }
            return Ok(());
        }
        let expected = match expected {
            Some(expected) => expected,
            None => return Ok(()),
        };
        let describe = |coords: &[&Coord]| -> Vec<String> {
            coords
                .iter()
                .map(|c| format!("{}, shape ({},)", c.name, c.len()))
                .collect()
        };
        let actual = cube.dim_coords();
        let expected_refs: Vec<&Coord> = expected.iter().collect();
        if describe(&actual) != describe(&expected_refs) {
            return Err(MlrError::Dataset(format!(
                "Expected field with coordinates {:?} for {}, got {:?}. Consider regridding, \
                 pre-selecting data or the options 'broadcast_from' or \
                 'group_datasets_by_attributes'",
                describe(&expected_refs),
                text,
                describe(&actual)
            )));
        }
        for (coord, reference) in actual.iter().zip(expected_refs.iter()) {
            if !coord.points_close(reference) {
                warn!(
                    "'{}' coordinate for different cubes does not match for {} (values differ \
                     by more than allowed tolerance, check input cubes)",
                    coord.name, text
                );
            }
        }
        Ok(())
    }

    fn broadcast_cube(
        &self,
        dataset: &DatasetDescriptor,
        axes: &[usize],
        reference: &Cube,
        text: &str,
    ) -> Result<Cube> {
        let source = self.loader.load(dataset)?;
        info!(
            "Broadcasting {} from {:?} to {:?}",
            text,
            source.shape(),
            reference.shape()
        );
        let data = source.data().broadcast_to(reference.shape(), axes).map_err(|err| {
            MlrError::Shape(format!(
                "Broadcasting to shape {:?} failed for {}: {}",
                reference.shape(),
                text,
                err
            ))
        })?;
        let mut cube = reference.copy_with_data(data)?;
        for (k, &axis) in axes.iter().enumerate() {
            let source_coord = source.dim_coords().into_iter().find(|c| c.dim == Some(k)).cloned();
            let target = reference.dim_coords().into_iter().find(|c| c.dim == Some(axis)).cloned();
            if let (Some(source_coord), Some(mut target)) = (source_coord, target) {
                target.points = source_coord.points;
                cube.add_coord(target)?;
            }
        }
        Ok(cube)
    }
}

/// Coordinate `tag` of `reference`, broadcast over the grid and flattened.
fn coordinate_column(reference: &Cube, tag: &str, text: &str) -> Result<MaskedArray> {
    let coord = reference.coord(tag).ok_or_else(|| {
        MlrError::Dataset(format!(
            "Coordinate '{}' given in 'coords_as_features' not found in reference cube for {}",
            tag, text
        ))
    })?;
    let data = match coord.dim {
        None => {
            warn!(
                "Coordinate '{}' is scalar, including it as feature does not add any \
                 information to the model (array is constant)",
                tag
            );
            MaskedArray::from_data(ArrayD::from_elem(IxDyn(reference.shape()), coord.points[0]))
        }
        Some(dim) => MaskedArray::from_data(coord.points.clone().into_dyn())
            .broadcast_to(reference.shape(), &[dim])?,
    };
    debug!("Added coordinate feature {}", text);
    Ok(data.ravel())
}

fn keep_rows(
    x: MaskedArray,
    y: MaskedArray,
    row_groups: Vec<Option<String>>,
    drop: &[bool],
) -> (MaskedArray, MaskedArray, Vec<Option<String>>) {
    let keep: Vec<usize> = (0..drop.len()).filter(|&i| !drop[i]).collect();
    let row_groups = keep.iter().map(|&i| row_groups[i].clone()).collect();
    (x.select_rows(&keep), y.select_rows(&keep), row_groups)
}

/// Drop rows whose label is missing; features, labels and row groups
/// shrink in lockstep.
pub fn remove_missing_labels(
    x: MaskedArray,
    y: MaskedArray,
    row_groups: Vec<Option<String>>,
) -> (MaskedArray, MaskedArray, Vec<Option<String>>) {
    let missing: Vec<bool> = y.valid().iter().map(|&ok| !ok).collect();
    let n_removed = missing.iter().filter(|&&m| m).count();
    if n_removed == 0 {
        return (x, y, row_groups);
    }
    info!("Removed {} training point(s) where labels were missing", n_removed);
    keep_rows(x, y, row_groups, &missing)
}

/// Resolve missing features for training: strategy `remove` drops the
/// rows, every other strategy keeps them as NaN for the imputer.
pub fn remove_missing_features(
    x: MaskedArray,
    y: MaskedArray,
    row_groups: Vec<Option<String>>,
    strategy: ImputationStrategy,
) -> Result<(Array2<f64>, Array1<f64>, Vec<Option<String>>)> {
    let (x, y, row_groups) = match strategy {
        ImputationStrategy::Remove => {
            let missing = x.rows_with_invalid();
            let n_removed = missing.iter().filter(|&&m| m).count();
            if n_removed > 0 {
                let groups: BTreeSet<&str> = missing
                    .iter()
                    .zip(row_groups.iter())
                    .filter(|(&m, _)| m)
                    .filter_map(|(_, g)| g.as_deref())
                    .collect();
                let groups: Vec<&str> = groups.into_iter().collect();
                info!(
                    "Removed {} training point(s) where features were missing{}",
                    n_removed,
                    if groups.is_empty() {
                        String::new()
                    } else {
                        format!(" ({})", groups.join(", "))
                    }
                );
                keep_rows(x, y, row_groups, &missing)
            } else {
                (x, y, row_groups)
            }
        }
        _ => (x, y, row_groups),
    };
    let x = x.filled(f64::NAN).into_dimensionality::<Ix2>()?;
    let y = y.filled(f64::NAN).into_dimensionality::<Ix1>()?;
    Ok((x, y, row_groups))
}
