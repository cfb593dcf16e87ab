//! Cube files and discovery of ancestor outputs.
pub mod cube_file;

use std::path::PathBuf;

use log::{debug, info};
use serde_json::Value;
use walkdir::WalkDir;

pub use cube_file::{read_cube_file, write_cube, CoordFile, CubeFile, CUBE_EXTENSION};

use crate::catalog::DatasetRecord;
use crate::error::Result;

/// Attributes a cube file needs to take part in an MLR model.
const MLR_ATTRIBUTES: [&str; 2] = ["var_type", "tag"];

/// Collect dataset records from the cube files below `dirs`.
///
/// Each record holds the file's attributes plus `filename` and `units`.
/// Files that are not cube files, or lack `var_type`/`tag`, are skipped.
pub fn discover_ancestor_records(dirs: &[PathBuf]) -> Result<Vec<DatasetRecord>> {
    let mut records = Vec::new();
    for dir in dirs {
        let mut paths: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| path.extension().map_or(false, |ext| ext == CUBE_EXTENSION))
            .collect();
        paths.sort();

        for path in paths {
            let cube = match read_cube_file(&path) {
                Ok(cube) => cube,
                Err(err) => {
                    debug!("Skipping {}: {:#}", path.display(), err);
                    continue;
                }
            };
            if let Some(missing) = MLR_ATTRIBUTES
                .iter()
                .find(|key| !cube.attributes.contains_key(**key))
            {
                debug!(
                    "Skipping {}: attribute '{}' not available",
                    path.display(),
                    missing
                );
                continue;
            }
            let mut record = DatasetRecord::from_attributes(cube.attributes.clone());
            record.insert("filename", Value::from(path.to_string_lossy().into_owned()));
            if record.get("units").is_none() {
                record.insert("units", cube.units.clone());
            }
            records.push(record);
        }
    }
    info!("Found {} ancestor dataset(s)", records.len());
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cube::{Cube, Dtype};
    use crate::math::MaskedArray;
    use crate::units::Units;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn discovers_cubes_with_mlr_attributes() {
        let dir = tempfile::tempdir().unwrap();
        let data = MaskedArray::from_data(ArrayD::from_elem(IxDyn(&[1]), 2.0));
        let mut cube = Cube::new(data, Units::parse("K").unwrap());
        write_cube(dir.path().join("plain.json"), &cube, Dtype::Float64).unwrap();

        cube.attributes.insert("var_type".to_string(), Value::from("label"));
        cube.attributes.insert("tag".to_string(), Value::from("ECS"));
        write_cube(dir.path().join("nested").join("ecs.json"), &cube, Dtype::Float64).unwrap();
        std::fs::write(dir.path().join("notes.json"), "not a cube").unwrap();

        let records = discover_ancestor_records(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].get_str("tag").as_deref(), Some("ECS"));
        assert_eq!(records[0].get_str("units").as_deref(), Some("K"));
        assert!(records[0].get_str("filename").unwrap().ends_with("ecs.json"));
    }
}
