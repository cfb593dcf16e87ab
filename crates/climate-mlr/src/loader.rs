//! Loading cubes described by dataset descriptors.

use log::{debug, warn};

use crate::catalog::DatasetDescriptor;
use crate::cube::{Cube, Dtype};
use crate::error::{MlrError, Result};
use crate::io::read_cube_file;
use crate::units::Units;

/// Reads cubes, casts them to the working dtype and normalises their units.
#[derive(Clone, Debug)]
pub struct CubeLoader {
    dtype: Dtype,
}

impl CubeLoader {
    pub fn new(dtype: Dtype) -> Self {
        Self { dtype }
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// Load the cube of `descriptor`.
    ///
    /// Non-numeric data is a type error, data that cannot be cast to the
    /// working dtype with a same-kind cast too. A failed `convert_units_to`
    /// only warns; the cube's final units must equal the declared ones.
    pub fn load(&self, descriptor: &DatasetDescriptor) -> Result<Cube> {
        let path = &descriptor.filename;
        debug!("Loading {}", path.display());
        let file = read_cube_file(path)?;

        let source: Dtype = file.dtype.parse()?;
        if !source.is_numeric() {
            return Err(MlrError::Type(format!(
                "Data type of cube loaded from '{}' is '{}', at the moment only numeric \
                 data is supported",
                path.display(),
                source.name()
            )));
        }
        if !source.can_cast_to(self.dtype) {
            return Err(MlrError::Type(format!(
                "Cannot cast data of '{}' from '{}' to '{}'",
                path.display(),
                source.name(),
                self.dtype.name()
            )));
        }
        let mut cube = file.to_cube()?;
        cube.round_to(self.dtype);

        let mut coords = cube.coords().to_vec();
        for (coord, coord_file) in coords.iter_mut().zip(file.coords.iter()) {
            match coord_file.dtype.parse::<Dtype>() {
                Ok(dtype) if dtype.can_cast_to(self.dtype) => {
                    coord.points.mapv_inplace(|v| self.dtype.round_value(v));
                    if let Some(bounds) = coord.bounds.as_mut() {
                        bounds.mapv_inplace(|v| self.dtype.round_value(v));
                    }
                }
                _ => debug!(
                    "Cannot cast coordinate '{}' from '{}' to '{}', leaving it unchanged",
                    coord.name,
                    coord_file.dtype,
                    self.dtype.name()
                ),
            }
        }
        for coord in coords {
            cube.add_coord(coord)?;
        }

        if let Some(target) = &descriptor.convert_units_to {
            let converted = Units::parse(target).and_then(|to| cube.convert_units(&to));
            if let Err(err) = converted {
                warn!(
                    "Converting units of '{}' to '{}' failed: {}",
                    path.display(),
                    target,
                    err
                );
            }
        }

        let declared = Units::parse(&descriptor.units)?;
        if cube.units != declared {
            return Err(MlrError::Units(format!(
                "Units of cube '{}' for {} '{}' differ from those specified in the \
                 metadata ('{}' != '{}')",
                path.display(),
                descriptor.var_type,
                descriptor.tag,
                cube.units,
                descriptor.units
            )));
        }
        Ok(cube)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{DatasetRecord, VarType};
    use crate::io::{write_cube, CubeFile};
    use crate::math::MaskedArray;
    use ndarray::{ArrayD, IxDyn};
    use std::path::Path;

    fn descriptor(path: &Path, units: &str) -> DatasetDescriptor {
        DatasetDescriptor::from_record(
            &DatasetRecord::new()
                .with("var_type", "feature")
                .with("tag", "tas")
                .with("units", units)
                .with("filename", path.to_string_lossy().into_owned()),
        )
        .unwrap()
    }

    fn write(path: &Path, units: &str, dtype: Dtype) {
        let data = MaskedArray::from_data(ArrayD::from_elem(IxDyn(&[2]), 300.1));
        let cube = Cube::new(data, Units::parse(units).unwrap());
        write_cube(path, &cube, dtype).unwrap();
    }

    #[test]
    fn converts_units_before_checking() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tas.json");
        write(&path, "K", Dtype::Float64);
        let mut d = descriptor(&path, "degC");
        assert_eq!(d.var_type, VarType::Feature);
        d.convert_units_to = Some("degC".to_string());
        let cube = CubeLoader::new(Dtype::Float64).load(&d).unwrap();
        let value = cube.data().data()[[0]];
        assert!((value - 26.95).abs() < 1e-9, "{}", value);
    }

    #[test]
    fn unit_mismatch_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tas.json");
        write(&path, "K", Dtype::Float64);
        let err = CubeLoader::new(Dtype::Float64).load(&descriptor(&path, "degC")).unwrap_err();
        assert!(matches!(err, MlrError::Units(_)));
    }

    #[test]
    fn float_data_cannot_become_integer() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tas.json");
        write(&path, "K", Dtype::Float64);
        let err = CubeLoader::new(Dtype::Int32).load(&descriptor(&path, "K")).unwrap_err();
        assert!(matches!(err, MlrError::Type(_)));
    }

    #[test]
    fn float32_working_dtype_rounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tas.json");
        write(&path, "K", Dtype::Float64);
        let cube = CubeLoader::new(Dtype::Float32).load(&descriptor(&path, "K")).unwrap();
        assert_eq!(cube.data().data()[[0]], 300.1_f32 as f64);
    }

    #[test]
    fn string_cubes_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("names.json");
        let file = CubeFile {
            var_name: Some("names".to_string()),
            standard_name: None,
            long_name: None,
            units: "1".to_string(),
            dtype: "str".to_string(),
            shape: vec![1],
            data: vec![serde_json::Value::from("x")],
            coords: Vec::new(),
            attributes: Default::default(),
        };
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();
        let err = CubeLoader::new(Dtype::Float64).load(&descriptor(&path, "1")).unwrap_err();
        assert!(matches!(err, MlrError::Type(_)));
    }
}
