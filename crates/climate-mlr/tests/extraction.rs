//! Training and prediction data extraction through `MlrModel`.
//!
//! Every scenario writes small cube files into a temporary directory and
//! builds a model without a regressor, so only the extraction runs.

mod common;

use climate_mlr::catalog::MetadataFilter;
use climate_mlr::config::ImputationStrategy;
use climate_mlr::cube::{Coord, Cube};
use climate_mlr::extract::FeatureType;
use climate_mlr::math::MaskedArray;
use climate_mlr::units::Units;
use climate_mlr::{MlrError, MlrModel};
use common::{attrs, feature_value, grid_cube, label_value, linear_records, write_dataset, GRID};
use ndarray::Array1;
use serde_json::json;
use tempfile::tempdir;

// ---------------------------------------------------------------------------
// Grouped training data
// ---------------------------------------------------------------------------

#[test]
fn groups_are_stacked_in_sorted_order() {
    let dir = tempdir().unwrap();
    let records = linear_records(dir.path(), &["B", "A"], GRID);
    let config = common::config(dir.path()).with_group_attributes(&["dataset"]);

    let model = MlrModel::new(&config, &records, &MetadataFilter::new()).unwrap();

    assert_eq!(
        model.group_attributes(),
        &[Some("A".to_string()), Some("B".to_string())]
    );
    assert_eq!(model.feature_names(), vec!["t1".to_string()]);
    assert_eq!(model.label(), "y");
    assert_eq!(model.label_units().to_string(), "K");
    assert_eq!(model.data().x_train.dim(), (2 * 12 * 17, 1));
    assert!(model.data().x_test.is_none());
    // group A comes first and carries no shift
    assert_eq!(model.data().x_train[[0, 0]], feature_value(0, 0, 0));
    assert_eq!(model.data().x_train[[204, 0]], feature_value(0, 0, 0) + 1.0);
}

#[test]
fn ungrouped_training_data_needs_unique_tags() {
    let dir = tempdir().unwrap();
    let records = linear_records(dir.path(), &["A", "B"], GRID);
    let config = common::config(dir.path());

    let err = MlrModel::new(&config, &records, &MetadataFilter::new()).err().unwrap();
    assert!(matches!(err, MlrError::Dataset(_)), "{}", err);
}

#[test]
fn metadata_filter_selects_training_data() {
    let dir = tempdir().unwrap();
    let records = linear_records(dir.path(), &["A", "B"], GRID);
    let config = common::config(dir.path());
    let mut filter = MetadataFilter::new();
    filter.insert("dataset".to_string(), "B".to_string());

    let model = MlrModel::new(&config, &records, &filter).unwrap();
    assert_eq!(model.data().x_train.nrows(), 204);
    assert_eq!(model.group_attributes(), &[None]);
}

// ---------------------------------------------------------------------------
// Missing values
// ---------------------------------------------------------------------------

#[test]
fn masked_labels_remove_rows_in_lockstep() {
    let dir = tempdir().unwrap();
    let feature = grid_cube("t1", "K", GRID, |t, i, j| Some(feature_value(t, i, j)));
    let label = grid_cube("y", "K", GRID, |t, i, j| {
        (i != 0).then(|| label_value(t, i, j))
    });
    let prediction = grid_cube("t1", "K", GRID, |t, i, j| Some(feature_value(t, i, j)));
    let records = vec![
        write_dataset(dir.path(), "t1.json", &feature, "K", &attrs("feature", "t1", "A")),
        write_dataset(dir.path(), "y.json", &label, "K", &attrs("label", "y", "A")),
        write_dataset(
            dir.path(),
            "t1_pred.json",
            &prediction,
            "K",
            &attrs("prediction_input", "t1", "A"),
        ),
    ];
    let config = common::config(dir.path());

    let model = MlrModel::new(&config, &records, &MetadataFilter::new()).unwrap();
    let data = model.data();
    assert_eq!(data.y_train.len(), 11 * 17);
    assert_eq!(data.x_train.nrows(), data.y_train.len());
    for (x, y) in data.x_train.column(0).iter().zip(data.y_train.iter()) {
        assert!((y - (2.0 * x - 500.0)).abs() < 1e-9);
    }
}

fn records_with_missing_feature(dir: &std::path::Path) -> Vec<climate_mlr::catalog::DatasetRecord> {
    let mut records = linear_records(dir, &["A", "B"], GRID);
    let t2 = grid_cube("t2", "W m-2", GRID, |_, i, j| Some((i * j) as f64));
    records.push(write_dataset(dir, "t2_A.json", &t2, "W m-2", &attrs("feature", "t2", "A")));
    records.push(write_dataset(
        dir,
        "t2_pred.json",
        &t2,
        "W m-2",
        &attrs("prediction_input", "t2", "future"),
    ));
    records
}

#[test]
fn missing_feature_is_fatal_unless_allowed() {
    let dir = tempdir().unwrap();
    let records = records_with_missing_feature(dir.path());
    let config = common::config(dir.path()).with_group_attributes(&["dataset"]);

    let err = MlrModel::new(&config, &records, &MetadataFilter::new()).err().unwrap();
    assert!(matches!(err, MlrError::Dataset(_)), "{}", err);
    assert!(err.to_string().contains("t2"));
}

#[test]
fn allowed_missing_feature_is_imputed_or_removed() {
    let dir = tempdir().unwrap();
    let records = records_with_missing_feature(dir.path());
    let mut config = common::config(dir.path()).with_group_attributes(&["dataset"]);
    config.allow_missing_features = true;

    let imputed = MlrModel::new(
        &config.with_imputation_strategy(ImputationStrategy::Mean),
        &records,
        &MetadataFilter::new(),
    )
    .unwrap();
    assert_eq!(imputed.feature_names(), vec!["t1".to_string(), "t2".to_string()]);
    let x = &imputed.data().x_train;
    assert_eq!(x.nrows(), 408);
    assert_eq!(x.column(1).iter().filter(|v| v.is_nan()).count(), 204);
    assert!(x.column(1).iter().take(204).all(|v| !v.is_nan()));

    let removed = MlrModel::new(&config, &records, &MetadataFilter::new()).unwrap();
    assert_eq!(removed.data().x_train.nrows(), 204);
    assert!(removed.data().x_train.iter().all(|v| !v.is_nan()));
}

// ---------------------------------------------------------------------------
// Coordinate and broadcast features
// ---------------------------------------------------------------------------

#[test]
fn coordinates_become_features() {
    let dir = tempdir().unwrap();
    let records = linear_records(dir.path(), &["A"], GRID);
    let mut config = common::config(dir.path());
    config.coords_as_features = vec!["latitude".to_string()];

    let model = MlrModel::new(&config, &records, &MetadataFilter::new()).unwrap();
    assert_eq!(
        model.features_types(),
        vec![
            ("latitude".to_string(), FeatureType::Coordinate),
            ("t1".to_string(), FeatureType::Regular),
        ]
    );
    let units = model.features_units();
    assert_eq!(units[0].1, Units::parse("degrees_north").unwrap());

    let x = &model.data().x_train;
    assert_eq!(x.dim(), (204, 2));
    // row-major grid: 17 longitudes per latitude
    assert_eq!(x[[0, 0]], -82.5);
    assert_eq!(x[[16, 0]], -82.5);
    assert_eq!(x[[17, 0]], -67.5);
}

#[test]
fn coordinate_features_come_from_first_regular_feature_by_tag() {
    let dir = tempdir().unwrap();
    let mut records = linear_records(dir.path(), &["A"], GRID);
    // listed after `t1`, but sorts first and carries its latitude in radians
    let mut cube = grid_cube("a0", "K", GRID, |t, i, j| Some(feature_value(t, i, j) - 10.0));
    cube.add_coord(Coord::new(
        "latitude",
        Array1::from_shape_fn(12, |i| (-82.5 + 15.0 * i as f64).to_radians()),
        Units::parse("rad").unwrap(),
        1,
    ))
    .unwrap();
    for var_type in ["feature", "prediction_input"] {
        records.push(write_dataset(
            dir.path(),
            &format!("a0_{}.json", var_type),
            &cube,
            "K",
            &attrs(var_type, "a0", if var_type == "feature" { "A" } else { "future" }),
        ));
    }
    let mut config = common::config(dir.path());
    config.coords_as_features = vec!["latitude".to_string()];

    let model = MlrModel::new(&config, &records, &MetadataFilter::new()).unwrap();
    let units = model.features_units();
    assert_eq!(units[1].0, "latitude");
    assert_eq!(units[1].1, Units::parse("rad").unwrap());
    assert_ne!(units[1].1, Units::parse("degrees_north").unwrap());

    let x = &model.data().x_train;
    assert_eq!(x.dim(), (204, 3));
    assert!((x[[0, 1]] - (-82.5f64).to_radians()).abs() < 1e-12);
    assert!((x[[17, 1]] - (-67.5f64).to_radians()).abs() < 1e-12);
}

#[test]
fn unknown_coordinate_feature_is_rejected() {
    let dir = tempdir().unwrap();
    let records = linear_records(dir.path(), &["A"], GRID);
    let mut config = common::config(dir.path());
    config.coords_as_features = vec!["height".to_string()];

    let err = MlrModel::new(&config, &records, &MetadataFilter::new()).err().unwrap();
    assert!(matches!(err, MlrError::Dataset(_)), "{}", err);
}

fn zonal_cube() -> Cube {
    let values: Vec<Option<f64>> = (0..12).map(|i| Some(10.0 * i as f64)).collect();
    Cube::new(
        MaskedArray::from_options(&[12], &values).unwrap(),
        Units::parse("W m-2").unwrap(),
    )
    .with_var_name("rsut")
    .with_coord(Coord::new(
        "latitude",
        Array1::from_shape_fn(12, |i| -82.5 + 15.0 * i as f64),
        Units::parse("degrees_north").unwrap(),
        0,
    ))
    .unwrap()
}

#[test]
fn zonal_feature_is_broadcast_onto_the_grid() {
    let dir = tempdir().unwrap();
    let mut records = linear_records(dir.path(), &["A"], GRID);
    for var_type in ["feature", "prediction_input"] {
        let mut attributes = attrs(var_type, "rsut", "A");
        attributes.push(("broadcast_from", json!([1])));
        records.push(write_dataset(
            dir.path(),
            &format!("rsut_{}.json", var_type),
            &zonal_cube(),
            "W m-2",
            &attributes,
        ));
    }
    let config = common::config(dir.path());

    let model = MlrModel::new(&config, &records, &MetadataFilter::new()).unwrap();
    assert_eq!(
        model.features_types(),
        vec![
            ("rsut".to_string(), FeatureType::Broadcasted),
            ("t1".to_string(), FeatureType::Regular),
        ]
    );
    let x = &model.data().x_train;
    assert_eq!(x.dim(), (204, 2));
    for row in 0..204 {
        assert_eq!(x[[row, 0]], 10.0 * (row / 17) as f64);
    }
}

#[test]
fn broadcast_only_prediction_input_is_rejected() {
    let dir = tempdir().unwrap();
    let mut records = linear_records(dir.path(), &["A"], GRID);
    records.retain(|r| r.get_str("var_type").as_deref() != Some("prediction_input"));
    let mut attributes = attrs("prediction_input", "rsut", "A");
    attributes.push(("broadcast_from", json!([1])));
    records.push(write_dataset(dir.path(), "rsut.json", &zonal_cube(), "W m-2", &attributes));
    let config = common::config(dir.path());

    let err = MlrModel::new(&config, &records, &MetadataFilter::new()).err().unwrap();
    assert!(matches!(err, MlrError::Dataset(_)), "{}", err);
}

#[test]
fn no_prediction_input_is_an_error() {
    let dir = tempdir().unwrap();
    let mut records = linear_records(dir.path(), &["A"], GRID);
    records.retain(|r| r.get_str("var_type").as_deref() != Some("prediction_input"));
    let config = common::config(dir.path());

    assert!(MlrModel::new(&config, &records, &MetadataFilter::new()).is_err());
}
