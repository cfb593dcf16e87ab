//! Gridded data cubes.
//!
//! A [`Cube`] is a masked n-dimensional array with physical units, named
//! coordinates and free-form attributes. Dimension coordinates are bound to
//! one axis of the data; scalar coordinates describe a single value (for
//! instance the time span a climatology covers).

use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::str::FromStr;

use ndarray::{Array1, Array2, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{MlrError, Result};
use crate::math::{Aggregation, MaskedArray};
use crate::units::Units;

/// Radius of the spherical earth used for cell areas (m).
pub const EARTH_RADIUS: f64 = 6_367_470.0;

/// Storage types of cube data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dtype {
    Float32,
    Float64,
    Int8,
    Int16,
    Int32,
    Int64,
    Uint8,
    Uint16,
    Uint32,
    Uint64,
    Bool,
    Str,
}

impl Dtype {
    pub fn name(&self) -> &'static str {
        match self {
            Dtype::Float32 => "float32",
            Dtype::Float64 => "float64",
            Dtype::Int8 => "int8",
            Dtype::Int16 => "int16",
            Dtype::Int32 => "int32",
            Dtype::Int64 => "int64",
            Dtype::Uint8 => "uint8",
            Dtype::Uint16 => "uint16",
            Dtype::Uint32 => "uint32",
            Dtype::Uint64 => "uint64",
            Dtype::Bool => "bool",
            Dtype::Str => "str",
        }
    }

    /// 0 for unsigned, 1 for signed integers, 2 for floats, `None` otherwise.
    fn kind(&self) -> Option<u8> {
        match self {
            Dtype::Uint8 | Dtype::Uint16 | Dtype::Uint32 | Dtype::Uint64 => Some(0),
            Dtype::Int8 | Dtype::Int16 | Dtype::Int32 | Dtype::Int64 => Some(1),
            Dtype::Float32 | Dtype::Float64 => Some(2),
            Dtype::Bool | Dtype::Str => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        self.kind().is_some()
    }

    /// Whether a same-kind cast from `self` to `to` is allowed.
    pub fn can_cast_to(&self, to: Dtype) -> bool {
        match (self.kind(), to.kind()) {
            (Some(from), Some(into)) => from <= into,
            _ => false,
        }
    }

    /// Represent `value` as it would be stored in this type.
    pub fn round_value(&self, value: f64) -> f64 {
        match self {
            Dtype::Float32 => value as f32 as f64,
            _ => value,
        }
    }
}

impl FromStr for Dtype {
    type Err = MlrError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "float32" | "f4" | "single" => Ok(Dtype::Float32),
            "float64" | "f8" | "float" | "double" => Ok(Dtype::Float64),
            "int8" | "i1" => Ok(Dtype::Int8),
            "int16" | "i2" => Ok(Dtype::Int16),
            "int32" | "i4" => Ok(Dtype::Int32),
            "int64" | "i8" | "int" => Ok(Dtype::Int64),
            "uint8" | "u1" => Ok(Dtype::Uint8),
            "uint16" | "u2" => Ok(Dtype::Uint16),
            "uint32" | "u4" => Ok(Dtype::Uint32),
            "uint64" | "u8" => Ok(Dtype::Uint64),
            "bool" => Ok(Dtype::Bool),
            "str" | "string" | "object" => Ok(Dtype::Str),
            _ => Err(MlrError::Config(format!("Unknown dtype '{}'", s))),
        }
    }
}

/// A named coordinate of a cube.
#[derive(Clone, Debug)]
pub struct Coord {
    pub name: String,
    pub points: Array1<f64>,
    pub bounds: Option<Array2<f64>>,
    pub units: Units,
    /// Data axis this coordinate describes, `None` for scalar coordinates.
    pub dim: Option<usize>,
}

impl Coord {
    pub fn new(name: &str, points: Array1<f64>, units: Units, dim: usize) -> Self {
        Self {
            name: name.to_string(),
            points,
            bounds: None,
            units,
            dim: Some(dim),
        }
    }

    pub fn scalar(name: &str, value: f64, units: Units) -> Self {
        Self {
            name: name.to_string(),
            points: Array1::from_elem(1, value),
            bounds: None,
            units,
            dim: None,
        }
    }

    pub fn with_bounds(mut self, bounds: Array2<f64>) -> Result<Self> {
        if bounds.dim() != (self.points.len(), 2) {
            return Err(MlrError::Shape(format!(
                "bounds of coordinate '{}' have shape {:?}, expected ({}, 2)",
                self.name,
                bounds.shape(),
                self.points.len()
            )));
        }
        self.bounds = Some(bounds);
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn is_scalar(&self) -> bool {
        self.dim.is_none()
    }

    /// Contiguous bounds halfway between neighbouring points. The outer
    /// bounds mirror the first and last half cell; latitudes are clipped to
    /// the poles.
    pub fn guess_bounds(&mut self) -> Result<()> {
        let n = self.points.len();
        if n < 2 {
            return Err(MlrError::Shape(format!(
                "cannot guess bounds of coordinate '{}' with {} point(s)",
                self.name, n
            )));
        }
        let p = &self.points;
        let mut edges = Vec::with_capacity(n + 1);
        edges.push(p[0] - (p[1] - p[0]) / 2.0);
        for i in 1..n {
            edges.push((p[i - 1] + p[i]) / 2.0);
        }
        edges.push(p[n - 1] + (p[n - 1] - p[n - 2]) / 2.0);
        if self.name == "latitude" {
            for e in edges.iter_mut() {
                *e = e.clamp(-90.0, 90.0);
            }
        }
        let mut bounds = Array2::<f64>::zeros((n, 2));
        for i in 0..n {
            bounds[[i, 0]] = edges[i];
            bounds[[i, 1]] = edges[i + 1];
        }
        self.bounds = Some(bounds);
        Ok(())
    }

    /// Point values agree within floating tolerance.
    pub fn points_close(&self, other: &Coord) -> bool {
        self.points.len() == other.points.len()
            && self
                .points
                .iter()
                .zip(other.points.iter())
                .all(|(a, b)| (a - b).abs() <= 1e-8 + 1e-5 * b.abs())
    }

    fn in_radians(&self, value: f64) -> f64 {
        let radian = Units::dimensionless();
        match self.units.convert(value, &radian) {
            Ok(v) if !self.units.is_unknown() => v,
            _ => value * PI / 180.0,
        }
    }
}

/// Masked data with units, coordinates and metadata.
#[derive(Clone, Debug)]
pub struct Cube {
    pub var_name: Option<String>,
    pub standard_name: Option<String>,
    pub long_name: Option<String>,
    pub units: Units,
    pub attributes: BTreeMap<String, Value>,
    data: MaskedArray,
    coords: Vec<Coord>,
}

impl Cube {
    pub fn new(data: MaskedArray, units: Units) -> Self {
        Self {
            var_name: None,
            standard_name: None,
            long_name: None,
            units,
            attributes: BTreeMap::new(),
            data,
            coords: Vec::new(),
        }
    }

    pub fn with_var_name(mut self, var_name: &str) -> Self {
        self.var_name = Some(var_name.to_string());
        self
    }

    pub fn with_coord(mut self, coord: Coord) -> Result<Self> {
        self.add_coord(coord)?;
        Ok(self)
    }

    pub fn add_coord(&mut self, coord: Coord) -> Result<()> {
        match coord.dim {
            Some(dim) if dim >= self.ndim() || self.shape()[dim] != coord.len() => {
                Err(MlrError::Shape(format!(
                    "coordinate '{}' with {} points does not fit axis {} of shape {:?}",
                    coord.name,
                    coord.len(),
                    dim,
                    self.shape()
                )))
            }
            None if coord.len() != 1 => Err(MlrError::Shape(format!(
                "scalar coordinate '{}' has {} points",
                coord.name,
                coord.len()
            ))),
            _ => {
                self.coords.retain(|c| c.name != coord.name);
                self.coords.push(coord);
                Ok(())
            }
        }
    }

    pub fn data(&self) -> &MaskedArray {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    pub fn coords(&self) -> &[Coord] {
        &self.coords
    }

    pub fn coord(&self, name: &str) -> Option<&Coord> {
        self.coords.iter().find(|c| c.name == name)
    }

    /// Dimension coordinates ordered by axis.
    pub fn dim_coords(&self) -> Vec<&Coord> {
        let mut dims: Vec<&Coord> = self.coords.iter().filter(|c| c.dim.is_some()).collect();
        dims.sort_by_key(|c| c.dim);
        dims
    }

    /// Best available name for messages.
    pub fn summary_name(&self) -> String {
        self.var_name
            .clone()
            .or_else(|| self.standard_name.clone())
            .or_else(|| self.long_name.clone())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Copy of this cube holding `data` of the same shape.
    pub fn copy_with_data(&self, data: MaskedArray) -> Result<Cube> {
        if data.shape() != self.shape() {
            return Err(MlrError::Shape(format!(
                "new data shape {:?} differs from cube shape {:?}",
                data.shape(),
                self.shape()
            )));
        }
        let mut cube = self.clone();
        cube.data = data;
        Ok(cube)
    }

    pub fn convert_units(&mut self, to: &Units) -> Result<()> {
        let (factor, shift) = self.units.converter(to)?;
        self.data = self.data.map_valid(|v| v * factor + shift);
        self.units = to.clone();
        Ok(())
    }

    /// Round data to what `dtype` can represent.
    pub fn round_to(&mut self, dtype: Dtype) {
        self.data = self.data.map_valid(|v| dtype.round_value(v));
    }

    /// Horizontal cell areas (m²) broadcast to the shape of the cube.
    ///
    /// Needs one-dimensional `latitude` and `longitude` dimension
    /// coordinates; bounds are guessed when absent.
    pub fn area_weights(&self) -> Result<ArrayD<f64>> {
        let (lat_dim, lat_bounds) = self.horizontal_bounds("latitude")?;
        let (lon_dim, lon_bounds) = self.horizontal_bounds("longitude")?;
        let r2 = EARTH_RADIUS * EARTH_RADIUS;
        let lat_part: Vec<f64> = lat_bounds
            .iter()
            .map(|(lo, hi)| (hi.sin() - lo.sin()).abs())
            .collect();
        let lon_part: Vec<f64> = lon_bounds.iter().map(|(lo, hi)| (hi - lo).abs()).collect();
        Ok(ArrayD::from_shape_fn(IxDyn(self.shape()), |idx| {
            r2 * lat_part[idx[lat_dim]] * lon_part[idx[lon_dim]]
        }))
    }

    fn horizontal_bounds(&self, name: &str) -> Result<(usize, Vec<(f64, f64)>)> {
        let coord = self
            .coord(name)
            .ok_or_else(|| MlrError::Dataset(format!("cube has no '{}' coordinate", name)))?;
        let dim = coord.dim.ok_or_else(|| {
            MlrError::Dataset(format!("coordinate '{}' is not a dimension coordinate", name))
        })?;
        let mut coord = coord.clone();
        if coord.bounds.is_none() {
            coord.guess_bounds()?;
        }
        let bounds = coord
            .bounds
            .as_ref()
            .ok_or_else(|| MlrError::Dataset(format!("coordinate '{}' has no bounds", name)))?;
        let radians = bounds
            .outer_iter()
            .map(|b| (coord.in_radians(b[0]), coord.in_radians(b[1])))
            .collect();
        Ok((dim, radians))
    }

    /// Collapse the axes of the named dimension coordinates.
    ///
    /// Collapsed dimension coordinates are kept as scalar coordinates whose
    /// point is the centre of the collapsed range.
    pub fn collapsed(
        &self,
        coord_names: &[String],
        aggregation: Aggregation,
        weights: Option<&ArrayD<f64>>,
    ) -> Result<Cube> {
        let mut axes = Vec::new();
        for name in coord_names {
            let coord = self.coord(name).ok_or_else(|| {
                MlrError::Dataset(format!(
                    "cannot collapse '{}': cube '{}' has no such coordinate",
                    name,
                    self.summary_name()
                ))
            })?;
            match coord.dim {
                Some(dim) if !axes.contains(&dim) => axes.push(dim),
                Some(_) => {}
                None => log::debug!("Coordinate '{}' is already scalar", name),
            }
        }
        let data = self.data.collapse(&axes, aggregation, weights)?;

        let mut coords = Vec::with_capacity(self.coords.len());
        for coord in &self.coords {
            match coord.dim {
                Some(dim) if axes.contains(&dim) => coords.push(scalar_from_collapsed(coord)),
                Some(dim) => {
                    let shift = axes.iter().filter(|&&a| a < dim).count();
                    let mut kept = coord.clone();
                    kept.dim = Some(dim - shift);
                    coords.push(kept);
                }
                None => coords.push(coord.clone()),
            }
        }

        let mut cube = self.clone();
        cube.data = data;
        cube.coords = coords;
        Ok(cube)
    }
}

fn scalar_from_collapsed(coord: &Coord) -> Coord {
    let (lo, hi) = match &coord.bounds {
        Some(b) => (
            b.iter().copied().fold(f64::INFINITY, f64::min),
            b.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ),
        None => (
            coord.points.iter().copied().fold(f64::INFINITY, f64::min),
            coord.points.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        ),
    };
    let mut bounds = Array2::<f64>::zeros((1, 2));
    bounds[[0, 0]] = lo;
    bounds[[0, 1]] = hi;
    Coord {
        name: coord.name.clone(),
        points: Array1::from_elem(1, (lo + hi) / 2.0),
        bounds: Some(bounds),
        units: coord.units.clone(),
        dim: None,
    }
}
