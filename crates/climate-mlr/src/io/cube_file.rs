use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::cube::{Coord, Cube, Dtype};
use crate::error::MlrError;
use crate::math::MaskedArray;
use crate::units::Units;

/// File extension of cube files.
pub const CUBE_EXTENSION: &str = "json";

fn default_units() -> String {
    "unknown".to_string()
}

fn default_dtype() -> String {
    "float64".to_string()
}

/// On-disk form of a coordinate.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CoordFile {
    pub name: String,
    #[serde(default)]
    pub dim: Option<usize>,
    pub points: Vec<f64>,
    #[serde(default)]
    pub bounds: Option<Vec<[f64; 2]>>,
    #[serde(default = "default_units")]
    pub units: String,
    #[serde(default = "default_dtype")]
    pub dtype: String,
}

/// On-disk form of a cube: names, units, dtype, shape, row-major data with
/// `null` for missing values, coordinates and attributes.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CubeFile {
    #[serde(default)]
    pub var_name: Option<String>,
    #[serde(default)]
    pub standard_name: Option<String>,
    #[serde(default)]
    pub long_name: Option<String>,
    #[serde(default = "default_units")]
    pub units: String,
    #[serde(default = "default_dtype")]
    pub dtype: String,
    pub shape: Vec<usize>,
    pub data: Vec<Value>,
    #[serde(default)]
    pub coords: Vec<CoordFile>,
    #[serde(default)]
    pub attributes: BTreeMap<String, Value>,
}

impl CubeFile {
    /// Snapshot of `cube`, recording `dtype` as the storage type.
    pub fn from_cube(cube: &Cube, dtype: Dtype) -> Self {
        let data = cube
            .data()
            .to_options()
            .into_iter()
            .map(|v| match v {
                Some(x) if x.is_finite() => Value::from(x),
                _ => Value::Null,
            })
            .collect();
        let coords = cube
            .coords()
            .iter()
            .map(|c| CoordFile {
                name: c.name.clone(),
                dim: c.dim,
                points: c.points.to_vec(),
                bounds: c
                    .bounds
                    .as_ref()
                    .map(|b| b.outer_iter().map(|row| [row[0], row[1]]).collect()),
                units: c.units.to_string(),
                dtype: dtype.name().to_string(),
            })
            .collect();
        Self {
            var_name: cube.var_name.clone(),
            standard_name: cube.standard_name.clone(),
            long_name: cube.long_name.clone(),
            units: cube.units.to_string(),
            dtype: dtype.name().to_string(),
            shape: cube.shape().to_vec(),
            data,
            coords,
            attributes: cube.attributes.clone(),
        }
    }

    /// Build the in-memory cube. Only numeric data can be represented.
    pub fn to_cube(&self) -> crate::error::Result<Cube> {
        let values = self
            .data
            .iter()
            .map(|v| match v {
                Value::Null => Ok(None),
                Value::Number(n) => Ok(n.as_f64()),
                other => Err(MlrError::Type(format!(
                    "non-numeric value {} in cube '{}'",
                    other,
                    self.var_name.as_deref().unwrap_or("unknown")
                ))),
            })
            .collect::<crate::error::Result<Vec<Option<f64>>>>()?;
        let data = MaskedArray::from_options(&self.shape, &values)?;
        let mut cube = Cube::new(data, Units::parse(&self.units)?);
        cube.var_name = self.var_name.clone();
        cube.standard_name = self.standard_name.clone();
        cube.long_name = self.long_name.clone();
        cube.attributes = self.attributes.clone();
        for c in &self.coords {
            let mut coord = Coord {
                name: c.name.clone(),
                points: Array1::from(c.points.clone()),
                bounds: None,
                units: Units::parse(&c.units)?,
                dim: c.dim,
            };
            if let Some(bounds) = &c.bounds {
                let flat: Vec<f64> = bounds.iter().flat_map(|b| b.iter().copied()).collect();
                coord = coord.with_bounds(Array2::from_shape_vec((bounds.len(), 2), flat)?)?;
            }
            cube.add_coord(coord)?;
        }
        Ok(cube)
    }
}

/// Read a cube file.
pub fn read_cube_file<P: AsRef<Path>>(path: P) -> Result<CubeFile> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open cube file: {}", path.display()))?;
    let cube: CubeFile = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("Invalid cube file: {}", path.display()))?;
    Ok(cube)
}

/// Write `cube` to `path`, creating parent directories.
pub fn write_cube<P: AsRef<Path>>(path: P, cube: &Cube, dtype: Dtype) -> Result<PathBuf> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("Failed to create cube file: {}", path.display()))?;
    serde_json::to_writer(BufWriter::new(file), &CubeFile::from_cube(cube, dtype))
        .with_context(|| format!("Failed to write cube file: {}", path.display()))?;
    log::debug!("Wrote {}", path.display());
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cube_survives_a_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let data = MaskedArray::from_options(&[2, 2], &[Some(1.0), None, Some(3.0), Some(4.5)]).unwrap();
        let cube = Cube::new(data, Units::parse("W m-2").unwrap())
            .with_var_name("rsdt")
            .with_coord(Coord::new("latitude", Array1::from(vec![-45.0, 45.0]), Units::parse("degrees_north").unwrap(), 0))
            .unwrap()
            .with_coord(Coord::scalar("time", 10.0, Units::parse("days").unwrap()))
            .unwrap();
        let path = write_cube(dir.path().join("sub").join("rsdt.json"), &cube, Dtype::Float64).unwrap();

        let back = read_cube_file(&path).unwrap().to_cube().unwrap();
        assert_eq!(back.var_name.as_deref(), Some("rsdt"));
        assert_eq!(back.data(), cube.data());
        assert_eq!(back.units, cube.units);
        assert!(back.coord("time").unwrap().is_scalar());
        assert_eq!(back.dim_coords().len(), 1);
    }

    #[test]
    fn string_data_is_a_type_error() {
        let file = CubeFile {
            var_name: None,
            standard_name: None,
            long_name: None,
            units: "1".to_string(),
            dtype: "str".to_string(),
            shape: vec![1],
            data: vec![Value::from("a")],
            coords: Vec::new(),
            attributes: BTreeMap::new(),
        };
        assert!(matches!(file.to_cube(), Err(MlrError::Type(_))));
    }
}
