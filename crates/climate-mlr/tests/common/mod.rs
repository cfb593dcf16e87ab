//! Shared fixtures: cube files on small time/latitude/longitude grids and
//! the dataset records pointing at them.
#![allow(dead_code)]

use std::path::Path;

use climate_mlr::catalog::DatasetRecord;
use climate_mlr::config::MlrConfig;
use climate_mlr::cube::{Coord, Cube, Dtype};
use climate_mlr::io::write_cube;
use climate_mlr::math::MaskedArray;
use climate_mlr::units::Units;
use ndarray::Array1;
use serde_json::Value;

/// The grid of most scenarios: one time step, 12 latitudes, 17 longitudes.
pub const GRID: (usize, usize, usize) = (1, 12, 17);

/// Cube on a `(time, latitude, longitude)` grid; `f(t, i, j)` gives the
/// value at each point, `None` for missing.
pub fn grid_cube<F>(var_name: &str, units: &str, shape: (usize, usize, usize), f: F) -> Cube
where
    F: Fn(usize, usize, usize) -> Option<f64>,
{
    let (nt, nlat, nlon) = shape;
    let mut values = Vec::with_capacity(nt * nlat * nlon);
    for t in 0..nt {
        for i in 0..nlat {
            for j in 0..nlon {
                values.push(f(t, i, j));
            }
        }
    }
    let data = MaskedArray::from_options(&[nt, nlat, nlon], &values).unwrap();
    let dlat = 180.0 / nlat as f64;
    let dlon = 360.0 / nlon as f64;
    Cube::new(data, Units::parse(units).unwrap())
        .with_var_name(var_name)
        .with_coord(Coord::new(
            "time",
            Array1::range(0.0, nt as f64, 1.0),
            Units::parse("days").unwrap(),
            0,
        ))
        .unwrap()
        .with_coord(Coord::new(
            "latitude",
            Array1::from_shape_fn(nlat, |i| -90.0 + dlat * (i as f64 + 0.5)),
            Units::parse("degrees_north").unwrap(),
            1,
        ))
        .unwrap()
        .with_coord(Coord::new(
            "longitude",
            Array1::from_shape_fn(nlon, |j| dlon * (j as f64 + 0.5)),
            Units::parse("degrees_east").unwrap(),
            2,
        ))
        .unwrap()
}

/// Feature values used throughout: smooth in latitude and longitude.
pub fn feature_value(t: usize, i: usize, j: usize) -> f64 {
    280.0 + i as f64 + 0.1 * ((j * 7) % 17) as f64 + t as f64
}

/// Exactly linear label.
pub fn label_value(t: usize, i: usize, j: usize) -> f64 {
    2.0 * feature_value(t, i, j) - 500.0
}

/// Write `cube` below `dir` and return its record with `attributes`.
pub fn write_dataset(
    dir: &Path,
    file: &str,
    cube: &Cube,
    units: &str,
    attributes: &[(&str, Value)],
) -> DatasetRecord {
    let path = dir.join(file);
    write_cube(&path, cube, Dtype::Float64).unwrap();
    let mut record = DatasetRecord::new()
        .with("filename", path.to_string_lossy().into_owned())
        .with("units", units);
    for (key, value) in attributes {
        record.insert(key, value.clone());
    }
    record
}

pub fn attrs(var_type: &str, tag: &str, dataset: &str) -> Vec<(&'static str, Value)> {
    vec![
        ("var_type", Value::from(var_type)),
        ("tag", Value::from(tag.to_string())),
        ("dataset", Value::from(dataset.to_string())),
    ]
}

/// Feature `t1` and label `y` for each of `groups` plus one prediction
/// input of `t1` on `pred_shape`.
pub fn linear_records(
    dir: &Path,
    groups: &[&str],
    pred_shape: (usize, usize, usize),
) -> Vec<DatasetRecord> {
    let mut records = Vec::new();
    for (g, group) in groups.iter().enumerate() {
        let shift = g as f64;
        let feature = grid_cube("t1", "K", GRID, |t, i, j| Some(feature_value(t, i, j) + shift));
        let label = grid_cube("y", "K", GRID, |t, i, j| Some(label_value(t, i, j) + 2.0 * shift));
        let mut label_attrs = attrs("label", "y", group);
        label_attrs.push(("exp", Value::from("historical")));
        label_attrs.push(("start_year", Value::from(1980 + 10 * g as i64)));
        label_attrs.push(("end_year", Value::from(2000 + 5 * g as i64)));
        records.push(write_dataset(
            dir,
            &format!("t1_{}.json", group),
            &feature,
            "K",
            &attrs("feature", "t1", group),
        ));
        records.push(write_dataset(
            dir,
            &format!("y_{}.json", group),
            &label,
            "K",
            &label_attrs,
        ));
    }
    let prediction = grid_cube("t1", "K", pred_shape, |t, i, j| Some(feature_value(t, i, j)));
    records.push(write_dataset(
        dir,
        "t1_pred.json",
        &prediction,
        "K",
        &attrs("prediction_input", "t1", "future"),
    ));
    records
}

/// Like [`linear_records`], but the labels carry a deterministic
/// scatter of up to 6 K around the linear relation.
pub fn noisy_records(
    dir: &Path,
    groups: &[&str],
    pred_shape: (usize, usize, usize),
) -> Vec<DatasetRecord> {
    let records = linear_records(dir, groups, pred_shape);
    for (g, group) in groups.iter().enumerate() {
        let shift = 2.0 * g as f64;
        let label = grid_cube("y", "K", GRID, |t, i, j| {
            let scatter = 3.0 * (((i * 7 + j * 3) % 5) as f64 - 2.0);
            Some(label_value(t, i, j) + shift + scatter)
        });
        write_cube(dir.join(format!("y_{}.json", group)), &label, Dtype::Float64).unwrap();
    }
    records
}

/// Test configuration writing below `dir`, no cache, no test split.
pub fn config(dir: &Path) -> MlrConfig {
    MlrConfig {
        work_dir: dir.to_path_buf(),
        cache_intermediate_results: false,
        test_size: 0.0,
        random_state: Some(42),
        ..MlrConfig::default()
    }
}
