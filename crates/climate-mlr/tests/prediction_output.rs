//! Prediction files written by `MlrModel::predict` and their postprocessed
//! versions.

mod common;

use std::path::Path;

use approx::assert_relative_eq;
use climate_mlr::catalog::MetadataFilter;
use climate_mlr::config::{
    CrossValidationOptions, CvStrategy, ErrorEstimationType, ImputationStrategy, MlrConfig,
    PostprocessConfig, PredictOptions, PredictionErrorConfig,
};
use climate_mlr::io::{read_cube_file, CubeFile};
use climate_mlr::MlrModel;
use common::{attrs, feature_value, grid_cube, linear_records, write_dataset, GRID};
use serde_json::{json, Value};
use tempfile::tempdir;

fn cv_error() -> PredictionErrorConfig {
    PredictionErrorConfig {
        kind: ErrorEstimationType::Cv,
        kwargs: CrossValidationOptions {
            cv: CvStrategy::Folds(3),
            ..CrossValidationOptions::default()
        },
    }
}

fn numbers(file: &CubeFile) -> Vec<Option<f64>> {
    file.data.iter().map(Value::as_f64).collect()
}

fn file_names(paths: &[std::path::PathBuf]) -> Vec<String> {
    paths
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect()
}

fn fitted(dir: &Path, name: &str, config: MlrConfig, pred_shape: (usize, usize, usize)) -> MlrModel {
    let records = linear_records(dir, &["A", "B"], pred_shape);
    let config = config.with_group_attributes(&["dataset"]);
    let mut model = MlrModel::create(name, &config, &records, &MetadataFilter::new()).unwrap();
    model.fit().unwrap();
    model
}

// ---------------------------------------------------------------------------
// Written outputs
// ---------------------------------------------------------------------------

#[test]
fn mean_error_and_lime_outputs() {
    let dir = tempdir().unwrap();
    let mut config = common::config(dir.path()).with_prediction_error(cv_error());
    config.return_lime_importance = true;
    let mut model = fitted(dir.path(), "linear", config, GRID);

    let written = model.predict(None).unwrap();
    assert_eq!(
        file_names(&written),
        vec![
            "prediction.json",
            "prediction_lime.json",
            "prediction_squared_error_estim_cv.json",
        ]
    );

    let mean = read_cube_file(&written[0]).unwrap();
    assert_eq!(mean.var_name.as_deref(), Some("y"));
    assert_eq!(mean.units, "K");
    assert_eq!(mean.shape, vec![1, 12, 17]);
    let attributes = &mean.attributes;
    assert_eq!(attributes["dataset"], json!("A|B"));
    assert_eq!(attributes["exp"], json!("historical"));
    assert_eq!(attributes["start_year"], json!(1980));
    assert_eq!(attributes["end_year"], json!(2005));
    assert_eq!(attributes["tag"], json!("y"));
    assert_eq!(attributes["var_type"], json!("prediction_output"));
    assert_eq!(attributes["regressor"], json!("LinearRegression"));
    assert_eq!(
        attributes["transformed_target_regressor__regressor__fit_intercept"],
        json!("true")
    );
    assert!(attributes.contains_key("creation_date"));
    assert!(!attributes.contains_key("prediction_name"));
    for (k, value) in numbers(&mean).into_iter().enumerate() {
        let (i, j) = (k / 17, k % 17);
        assert_relative_eq!(value.unwrap(), 2.0 * feature_value(0, i, j) - 500.0, epsilon = 1e-6);
    }

    let lime = read_cube_file(&written[1]).unwrap();
    assert_eq!(lime.var_name.as_deref(), Some("lime_feature_importance"));
    assert_eq!(lime.attributes["features"], json!({"0": "t1"}));
    assert!(numbers(&lime).iter().all(|v| *v == Some(0.0)));

    let error = read_cube_file(&written[2]).unwrap();
    assert_eq!(error.var_name.as_deref(), Some("y_squared_error_estim_cv"));
    assert_eq!(error.units, "K2");
    assert!(error.long_name.as_ref().unwrap().contains("cross-validation"));
    assert!(numbers(&error).iter().all(|v| v.unwrap() < 1e-6));

    let unnamed: Option<String> = None;
    assert_eq!(model.data().y_pred[&unnamed].len(), 204);
    assert_eq!(model.data().x_pred[&unnamed].dim(), (204, 1));
}

#[test]
fn missing_prediction_input_is_masked() {
    let dir = tempdir().unwrap();
    let mut records = linear_records(dir.path(), &["A"], GRID);
    records.retain(|r| r.get_str("var_type").as_deref() != Some("prediction_input"));
    let holey = grid_cube("t1", "K", GRID, |t, i, j| {
        (i + j != 0).then(|| feature_value(t, i, j))
    });
    let mut attributes = attrs("prediction_input", "t1", "future");
    attributes.push(("prediction_name", json!("future")));
    records.push(write_dataset(dir.path(), "t1_future.json", &holey, "K", &attributes));
    let mut config = common::config(dir.path());
    config.root_dir = Some("mlr".to_string());

    let mut model = MlrModel::create("linear", &config, &records, &MetadataFilter::new()).unwrap();
    model.fit().unwrap();
    let written = model.predict(None).unwrap();

    assert_eq!(written, vec![dir.path().join("mlr").join("mlr_prediction_future.json")]);
    let mean = read_cube_file(&written[0]).unwrap();
    assert_eq!(mean.attributes["prediction_name"], json!("future"));
    let values = numbers(&mean);
    assert_eq!(values[0], None);
    assert_eq!(values.iter().filter(|v| v.is_none()).count(), 1);

    let key = Some("future".to_string());
    assert_eq!(model.data().x_pred[&key].nrows(), 204);
    assert!(model.data().x_pred[&key][[0, 0]].is_nan());
    assert!(model.data().y_pred[&key][0].is_nan());
}

#[test]
fn lime_importance_survives_imputed_prediction_input() {
    let dir = tempdir().unwrap();
    let mut records = linear_records(dir.path(), &["A"], GRID);
    records.retain(|r| r.get_str("var_type").as_deref() != Some("prediction_input"));
    let holey = grid_cube("t1", "K", GRID, |t, i, j| {
        (i + j != 0).then(|| feature_value(t, i, j))
    });
    let mut attributes = attrs("prediction_input", "t1", "future");
    attributes.push(("prediction_name", json!("future")));
    records.push(write_dataset(dir.path(), "t1_future.json", &holey, "K", &attributes));
    let mut config = common::config(dir.path()).with_imputation_strategy(ImputationStrategy::Mean);
    config.return_lime_importance = true;

    let mut model = MlrModel::create("linear", &config, &records, &MetadataFilter::new()).unwrap();
    model.fit().unwrap();
    let written = model.predict(None).unwrap();

    assert_eq!(
        file_names(&written),
        vec!["prediction_future.json", "prediction_future_lime.json"]
    );
    let mean = read_cube_file(&written[0]).unwrap();
    assert!(numbers(&mean).iter().all(|v| v.map_or(false, f64::is_finite)));
    let lime = read_cube_file(&written[1]).unwrap();
    assert_eq!(lime.data.len(), 204);
    assert!(numbers(&lime).iter().all(|v| *v == Some(0.0)));
}

#[test]
fn unsupported_variance_request_is_ignored() {
    let dir = tempdir().unwrap();
    let config = common::config(dir.path());
    let mut model = fitted(dir.path(), "linear", config, GRID);
    let options = PredictOptions {
        return_var: true,
        return_cov: false,
    };
    let written = model.predict(Some(options)).unwrap();
    assert_eq!(file_names(&written), vec!["prediction.json"]);
}

// ---------------------------------------------------------------------------
// Postprocessing
// ---------------------------------------------------------------------------

#[test]
fn area_weighted_mean_is_converted() {
    let dir = tempdir().unwrap();
    let pp = PostprocessConfig {
        mean: vec!["latitude".to_string(), "longitude".to_string()],
        units: Some("degC".to_string()),
        ..PostprocessConfig::default()
    };
    let mut config = common::config(dir.path())
        .with_prediction_error(cv_error())
        .with_postprocessing(pp);
    config.return_lime_importance = true;
    let mut model = fitted(dir.path(), "linear", config, GRID);

    let written = model.predict(None).unwrap();
    let names = file_names(&written);
    assert!(names.contains(&"prediction_pp.json".to_string()));
    assert!(names.contains(&"prediction_pp_squared_error_estim_cv.json".to_string()));
    assert!(!names.iter().any(|n| n.starts_with("prediction_pp_lime")));

    let mean = read_cube_file(&written[0]).unwrap().to_cube().unwrap();
    let weights = mean.area_weights().unwrap();
    let expected = mean
        .data()
        .data()
        .iter()
        .zip(weights.iter())
        .map(|(v, w)| v * w)
        .sum::<f64>()
        / weights.sum();

    let pp_mean = read_cube_file(dir.path().join("prediction_pp.json")).unwrap();
    assert_eq!(pp_mean.shape, vec![1]);
    assert_eq!(pp_mean.units, "degC");
    assert_eq!(pp_mean.attributes["source"], json!(written[0].display().to_string()));
    assert_relative_eq!(numbers(&pp_mean)[0].unwrap(), expected - 273.15, epsilon = 1e-6);
}

#[test]
fn covariance_is_summed_with_area_weights() {
    let dir = tempdir().unwrap();
    let pp = PostprocessConfig {
        mean: vec!["latitude".to_string(), "longitude".to_string()],
        ..PostprocessConfig::default()
    };
    let mut config = common::config(dir.path()).with_postprocessing(pp);
    config.predict_kwargs.return_cov = true;
    let mut model = fitted(dir.path(), "gpr", config, (1, 3, 4));

    let written = model.predict(None).unwrap();
    assert_eq!(
        file_names(&written),
        vec![
            "prediction.json",
            "prediction_cov.json",
            "prediction_pp.json",
            "prediction_pp_cov.json",
        ]
    );

    let cov = read_cube_file(&written[1]).unwrap();
    assert_eq!(cov.shape, vec![12, 12]);
    assert_eq!(cov.var_name.as_deref(), Some("y_cov"));
    assert_eq!(cov.units, "K2");
    let values: Vec<f64> = numbers(&cov).into_iter().map(Option::unwrap).collect();
    for i in 0..12 {
        assert!(values[i * 12 + i] > -1e-9);
        for j in 0..12 {
            assert_relative_eq!(values[i * 12 + j], values[j * 12 + i], epsilon = 1e-6);
        }
    }

    let pp_cov = read_cube_file(&written[3]).unwrap();
    assert_eq!(pp_cov.units, "K2 m4");
    assert_eq!(pp_cov.data.len(), 1);
    assert!(numbers(&pp_cov)[0].unwrap().is_finite());
}
