//! Dataset records and their partition into training and prediction sets.
//!
//! Every input of an MLR model is described by a flat attribute record
//! (`var_type`, `tag`, `units`, `filename`, `dataset`, ...). The catalog
//! validates those records, applies metadata filters and unit directives,
//! assigns group keys to training data and groups prediction inputs by their
//! prediction name.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::MlrConfig;
use crate::error::{MlrError, Result};
use crate::units::Units;

/// Attribute filter applied to training records (attribute name → value).
pub type MetadataFilter = BTreeMap<String, String>;

/// Role of a dataset in the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarType {
    Feature,
    Label,
    PredictionInput,
    PredictionOutput,
}

impl VarType {
    pub fn name(&self) -> &'static str {
        match self {
            VarType::Feature => "feature",
            VarType::Label => "label",
            VarType::PredictionInput => "prediction_input",
            VarType::PredictionOutput => "prediction_output",
        }
    }
}

impl fmt::Display for VarType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for VarType {
    type Err = MlrError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "feature" => Ok(VarType::Feature),
            "label" => Ok(VarType::Label),
            "prediction_input" => Ok(VarType::PredictionInput),
            "prediction_output" => Ok(VarType::PredictionOutput),
            _ => Err(MlrError::Dataset(format!("Unknown var_type '{}'", s))),
        }
    }
}

/// Loose attribute record of one input file, as discovered.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetRecord(BTreeMap<String, Value>);

impl DatasetRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_attributes(attributes: BTreeMap<String, Value>) -> Self {
        Self(attributes)
    }

    /// Builder-style insert.
    pub fn with<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn insert<V: Into<Value>>(&mut self, key: &str, value: V) {
        self.0.insert(key.to_string(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String form of an attribute; numbers and booleans are formatted.
    pub fn get_str(&self, key: &str) -> Option<String> {
        value_to_string(self.0.get(key)?)
    }

    pub fn attributes(&self) -> &BTreeMap<String, Value> {
        &self.0
    }
}

pub(crate) fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

/// Validated description of one dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct DatasetDescriptor {
    pub var_type: VarType,
    pub tag: String,
    pub units: String,
    pub filename: PathBuf,
    /// Target axes the dataset's own dimensions map to when broadcast.
    pub broadcast_from: Option<Vec<usize>>,
    pub convert_units_to: Option<String>,
    pub prediction_name: Option<String>,
    pub group_attribute: Option<String>,
    /// Every attribute of the source record.
    pub attributes: BTreeMap<String, Value>,
}

impl DatasetDescriptor {
    pub fn from_record(record: &DatasetRecord) -> Result<Self> {
        let require = |key: &str| {
            record.get_str(key).ok_or_else(|| {
                MlrError::Dataset(format!(
                    "Dataset {} lacks the required attribute '{}'",
                    describe(record),
                    key
                ))
            })
        };
        let var_type: VarType = require("var_type")?.parse()?;
        let tag = require("tag")?;
        let units = require("units")?;
        let filename = PathBuf::from(require("filename")?);
        let broadcast_from = match record.get("broadcast_from") {
            None | Some(Value::Null) => None,
            Some(value) => Some(parse_axes(value).ok_or_else(|| {
                MlrError::Dataset(format!(
                    "Invalid broadcast_from {} in dataset {}",
                    value,
                    describe(record)
                ))
            })?),
        };
        Ok(Self {
            var_type,
            tag,
            units,
            filename,
            broadcast_from,
            convert_units_to: record.get_str("convert_units_to"),
            prediction_name: record.get_str("prediction_name"),
            group_attribute: None,
            attributes: record.attributes().clone(),
        })
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attributes.get(key).and_then(value_to_string)
    }
}

fn parse_axes(value: &Value) -> Option<Vec<usize>> {
    match value {
        Value::Number(n) => n.as_u64().map(|a| vec![a as usize]),
        Value::Array(items) => items
            .iter()
            .map(|v| v.as_u64().map(|a| a as usize))
            .collect(),
        _ => None,
    }
}

fn describe(record: &DatasetRecord) -> String {
    record
        .get_str("filename")
        .or_else(|| record.get_str("dataset"))
        .unwrap_or_else(|| format!("{:?}", record.attributes()))
}

/// Group key of a training record: the configured attributes joined with
/// `-`, or the `dataset` attribute if none of them is present.
fn group_key(record: &DatasetRecord, attributes: &[String]) -> Result<Option<String>> {
    if attributes.is_empty() {
        return Ok(None);
    }
    let parts: Vec<String> = attributes.iter().filter_map(|a| record.get_str(a)).collect();
    if !parts.is_empty() {
        return Ok(Some(parts.join("-")));
    }
    record.get_str("dataset").map(Some).ok_or_else(|| {
        MlrError::Dataset(format!(
            "Dataset {} has none of the grouping attributes {:?} and no 'dataset' attribute",
            describe(record),
            attributes
        ))
    })
}

/// One prediction set: the datasets sharing a prediction name.
#[derive(Clone, Debug, PartialEq)]
pub struct PredictionSet {
    pub name: Option<String>,
    pub datasets: Vec<DatasetDescriptor>,
}

/// Validated training and prediction datasets of a model.
#[derive(Clone, Debug, Default)]
pub struct Catalog {
    training: Vec<DatasetDescriptor>,
    prediction: Vec<PredictionSet>,
}

impl Catalog {
    /// Validate and partition `records`.
    ///
    /// # Arguments
    ///
    /// * `records` - Every known input record
    /// * `config` - Effective model configuration (grouping attributes)
    /// * `filter` - Attribute values training records must match
    ///
    /// # Returns
    ///
    /// The catalog, or a dataset error when training data is missing or a
    /// record lacks a required attribute.
    pub fn build(records: &[DatasetRecord], config: &MlrConfig, filter: &MetadataFilter) -> Result<Self> {
        let mut training = Vec::new();
        let mut prediction: Vec<PredictionSet> = Vec::new();

        for record in records {
            let var_type = match record.get_str("var_type") {
                Some(var_type) => var_type,
                None => {
                    warn!("Ignoring dataset {} without 'var_type'", describe(record));
                    continue;
                }
            };
            match var_type.as_str() {
                "feature" | "label" => {
                    if !matches_filter(record, filter) {
                        debug!("Dataset {} does not match metadata filter", describe(record));
                        continue;
                    }
                    let mut descriptor = DatasetDescriptor::from_record(record)?;
                    descriptor.group_attribute =
                        group_key(record, &config.group_datasets_by_attributes)?;
                    training.push(descriptor);
                }
                "prediction_input" => {
                    let descriptor = DatasetDescriptor::from_record(record)?;
                    match prediction
                        .iter_mut()
                        .find(|set| set.name == descriptor.prediction_name)
                    {
                        Some(set) => set.datasets.push(descriptor),
                        None => prediction.push(PredictionSet {
                            name: descriptor.prediction_name.clone(),
                            datasets: vec![descriptor],
                        }),
                    }
                }
                other => debug!("Skipping dataset {} with var_type '{}'", describe(record), other),
            }
        }

        if training.is_empty() {
            return Err(MlrError::Dataset(
                "No training data (features/labels) found".to_string(),
            ));
        }
        for descriptor in training
            .iter_mut()
            .chain(prediction.iter_mut().flat_map(|set| set.datasets.iter_mut()))
        {
            apply_unit_directive(descriptor);
        }
        info!(
            "Found {} training dataset(s) and {} prediction set(s)",
            training.len(),
            prediction.len()
        );
        Ok(Self { training, prediction })
    }

    pub fn training(&self) -> &[DatasetDescriptor] {
        &self.training
    }

    pub fn prediction_sets(&self) -> &[PredictionSet] {
        &self.prediction
    }

    pub fn prediction_set(&self, name: &Option<String>) -> Option<&PredictionSet> {
        self.prediction.iter().find(|set| &set.name == name)
    }

    /// Sorted distinct group keys of the label datasets.
    pub fn group_attributes(&self) -> Vec<Option<String>> {
        let keys: BTreeSet<Option<String>> = self
            .training
            .iter()
            .filter(|d| d.var_type == VarType::Label)
            .map(|d| d.group_attribute.clone())
            .collect();
        keys.into_iter().collect()
    }

    /// Tag and units of the (unique) label.
    pub fn label(&self) -> Result<(String, String)> {
        let labels: Vec<&DatasetDescriptor> = self
            .training
            .iter()
            .filter(|d| d.var_type == VarType::Label)
            .collect();
        let first = labels
            .first()
            .ok_or_else(|| MlrError::Dataset("No label data found".to_string()))?;
        let tags: BTreeSet<&str> = labels.iter().map(|d| d.tag.as_str()).collect();
        if tags.len() > 1 {
            return Err(MlrError::Dataset(format!(
                "Expected exactly one label tag, found {:?}",
                tags
            )));
        }
        Ok((first.tag.clone(), first.units.clone()))
    }
}

/// Datasets of a role with a tag, optionally restricted to one group.
pub fn select<'a>(
    datasets: &'a [DatasetDescriptor],
    var_type: VarType,
    tag: &str,
    group: Option<&Option<String>>,
) -> Vec<&'a DatasetDescriptor> {
    datasets
        .iter()
        .filter(|d| d.var_type == var_type && d.tag == tag)
        .filter(|d| group.map_or(true, |g| &d.group_attribute == g))
        .collect()
}

fn matches_filter(record: &DatasetRecord, filter: &MetadataFilter) -> bool {
    filter
        .iter()
        .all(|(key, value)| record.get_str(key).as_deref() == Some(value.as_str()))
}

/// Replace declared units by convertible `convert_units_to` targets; drop
/// directives that cannot be honoured.
fn apply_unit_directive(descriptor: &mut DatasetDescriptor) {
    let target = match &descriptor.convert_units_to {
        Some(target) => target.clone(),
        None => return,
    };
    let convertible = match (Units::parse(&descriptor.units), Units::parse(&target)) {
        (Ok(from), Ok(to)) => from.is_convertible(&to),
        _ => false,
    };
    if convertible {
        debug!(
            "Dataset '{}' will be converted from '{}' to '{}'",
            descriptor.tag, descriptor.units, target
        );
        descriptor.units = target;
    } else {
        warn!(
            "Cannot convert units of '{}' from '{}' to '{}', ignoring conversion",
            descriptor.tag, descriptor.units, target
        );
        descriptor.convert_units_to = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(var_type: &str, tag: &str, dataset: &str) -> DatasetRecord {
        DatasetRecord::new()
            .with("var_type", var_type)
            .with("tag", tag)
            .with("units", "K")
            .with("dataset", dataset)
            .with("filename", format!("/data/{}_{}.json", dataset, tag))
    }

    #[test]
    fn groups_training_data_by_attributes() {
        let records = vec![
            record("feature", "tas", "A").with("exp", "hist"),
            record("label", "ecs", "A").with("exp", "hist"),
            record("feature", "tas", "B"),
            record("label", "ecs", "B"),
        ];
        let config = MlrConfig::default().with_group_attributes(&["dataset", "exp"]);
        let catalog = Catalog::build(&records, &config, &MetadataFilter::new()).unwrap();
        assert_eq!(
            catalog.group_attributes(),
            vec![Some("A-hist".to_string()), Some("B".to_string())]
        );
        assert_eq!(catalog.label().unwrap(), ("ecs".to_string(), "K".to_string()));
    }

    #[test]
    fn without_grouping_the_key_is_none() {
        let records = vec![record("feature", "tas", "A"), record("label", "ecs", "A")];
        let catalog = Catalog::build(&records, &MlrConfig::default(), &MetadataFilter::new()).unwrap();
        assert_eq!(catalog.group_attributes(), vec![None]);
    }

    #[test]
    fn metadata_filter_applies_to_training_only() {
        let records = vec![
            record("feature", "tas", "A"),
            record("label", "ecs", "A"),
            record("feature", "tas", "B"),
            record("prediction_input", "tas", "OBS"),
        ];
        let mut filter = MetadataFilter::new();
        filter.insert("dataset".to_string(), "A".to_string());
        let catalog = Catalog::build(&records, &MlrConfig::default(), &filter).unwrap();
        assert_eq!(catalog.training().len(), 2);
        assert_eq!(catalog.prediction_sets().len(), 1);
    }

    #[test]
    fn prediction_sets_keep_first_seen_order() {
        let records = vec![
            record("feature", "tas", "A"),
            record("prediction_input", "tas", "X").with("prediction_name", "future"),
            record("prediction_input", "tas", "Y"),
            record("prediction_input", "pr", "X").with("prediction_name", "future"),
        ];
        let catalog = Catalog::build(&records, &MlrConfig::default(), &MetadataFilter::new()).unwrap();
        let names: Vec<_> = catalog.prediction_sets().iter().map(|s| s.name.clone()).collect();
        assert_eq!(names, vec![Some("future".to_string()), None]);
        assert_eq!(catalog.prediction_sets()[0].datasets.len(), 2);
    }

    #[test]
    fn missing_training_data_is_an_error() {
        let records = vec![record("prediction_input", "tas", "X")];
        let err = Catalog::build(&records, &MlrConfig::default(), &MetadataFilter::new()).unwrap_err();
        assert!(matches!(err, MlrError::Dataset(_)));
    }

    #[test]
    fn records_without_required_attributes_fail() {
        let records = vec![DatasetRecord::new().with("var_type", "feature").with("tag", "tas")];
        assert!(Catalog::build(&records, &MlrConfig::default(), &MetadataFilter::new()).is_err());
    }

    #[test]
    fn unit_directives_are_checked() {
        let records = vec![
            record("feature", "tas", "A").with("convert_units_to", "degC"),
            record("label", "ecs", "A").with("convert_units_to", "m s-1"),
        ];
        let catalog = Catalog::build(&records, &MlrConfig::default(), &MetadataFilter::new()).unwrap();
        let feature = &catalog.training()[0];
        assert_eq!(feature.units, "degC");
        assert_eq!(feature.convert_units_to.as_deref(), Some("degC"));
        let label = &catalog.training()[1];
        assert_eq!(label.units, "K");
        assert!(label.convert_units_to.is_none());
    }

    #[test]
    fn more_than_one_label_tag_is_an_error() {
        let records = vec![record("label", "ecs", "A"), record("label", "tcr", "B")];
        let catalog = Catalog::build(&records, &MlrConfig::default(), &MetadataFilter::new()).unwrap();
        assert!(catalog.label().is_err());
    }

    #[test]
    fn broadcast_axes_parse_from_numbers_and_lists() {
        let single = DatasetDescriptor::from_record(&record("feature", "a", "A").with("broadcast_from", 0)).unwrap();
        assert_eq!(single.broadcast_from, Some(vec![0]));
        let list = DatasetDescriptor::from_record(
            &record("feature", "a", "A").with("broadcast_from", serde_json::json!([1, 2])),
        )
        .unwrap();
        assert_eq!(list.broadcast_from, Some(vec![1, 2]));
    }
}
