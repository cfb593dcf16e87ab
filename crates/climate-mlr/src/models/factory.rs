use std::sync::OnceLock;

use log::LevelFilter;
use serde_json::Value;

use crate::config::{ParamMap, PredictOptions};
use crate::error::Result;
use crate::models::gbdt::GradientBoostingRegressor;
use crate::models::gpr::GaussianProcessRegressor;
use crate::models::linear::LinearRegressor;
use crate::models::regressor_trait::Regressor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityKind {
    Bool,
    Int,
}

/// Regressor parameter controlling its own progress output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verbosity {
    pub param: &'static str,
    pub kind: VerbosityKind,
}

impl Verbosity {
    /// Value matching the active log level.
    pub fn value_for(&self, level: LevelFilter) -> Value {
        let level = if level >= LevelFilter::Debug {
            2
        } else if level >= LevelFilter::Info {
            1
        } else {
            0
        };
        match self.kind {
            VerbosityKind::Bool => Value::from(level > 0),
            VerbosityKind::Int => Value::from(level),
        }
    }
}

/// What a regressor can do beyond point predictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub return_var: bool,
    pub return_cov: bool,
    pub verbosity: Option<Verbosity>,
}

impl Capabilities {
    /// Drop requested outputs the regressor cannot produce.
    pub fn restrict(&self, requested: PredictOptions, regressor: &str) -> PredictOptions {
        let mut options = requested;
        if options.return_var && !self.return_var {
            log::warn!(
                "Regressor {} does not support 'return_var', ignoring it",
                regressor
            );
            options.return_var = false;
        }
        if options.return_cov && !self.return_cov {
            log::warn!(
                "Regressor {} does not support 'return_cov', ignoring it",
                regressor
            );
            options.return_cov = false;
        }
        options
    }
}

/// A registered MLR model.
pub struct ModelEntry {
    pub name: &'static str,
    /// Name of the final regressor, as reported in output attributes.
    pub regressor: &'static str,
    pub description: &'static str,
    pub capabilities: Capabilities,
    constructor: fn() -> Box<dyn Regressor>,
}

impl ModelEntry {
    /// Construct the regressor and apply `params` to it.
    pub fn build(&self, params: &ParamMap) -> Result<Box<dyn Regressor>> {
        let mut regressor = (self.constructor)();
        for (name, value) in params {
            regressor.set_param(name, value)?;
        }
        Ok(regressor)
    }

    /// Final-regressor parameters with the verbosity flag injected from the
    /// current log level, unless it was given explicitly.
    pub fn regressor_parameters(&self, explicit: &ParamMap) -> ParamMap {
        let mut params = explicit.clone();
        if let Some(verbosity) = self.capabilities.verbosity {
            params
                .entry(verbosity.param.to_string())
                .or_insert_with(|| verbosity.value_for(log::max_level()));
        }
        params
    }
}

fn known_models() -> Vec<ModelEntry> {
    #[cfg_attr(not(feature = "svm"), allow(unused_mut))]
    let mut models = vec![
        ModelEntry {
            name: "gbr",
            regressor: "GradientBoostingRegressor",
            description: "Gradient Boosting Regression",
            capabilities: Capabilities {
                verbosity: Some(Verbosity {
                    param: "verbose",
                    kind: VerbosityKind::Int,
                }),
                ..Capabilities::default()
            },
            constructor: || Box::new(GradientBoostingRegressor::default()),
        },
        ModelEntry {
            name: "gpr",
            regressor: "GaussianProcessRegressor",
            description: "Gaussian Process Regression",
            capabilities: Capabilities {
                return_var: true,
                return_cov: true,
                verbosity: None,
            },
            constructor: || Box::new(GaussianProcessRegressor::default()),
        },
        ModelEntry {
            name: "linear",
            regressor: "LinearRegression",
            description: "Linear Regression",
            capabilities: Capabilities::default(),
            constructor: || Box::new(LinearRegressor::default()),
        },
    ];
    #[cfg(feature = "svm")]
    models.push(ModelEntry {
        name: "svr",
        regressor: "SVR",
        description: "Support Vector Regression",
        capabilities: Capabilities::default(),
        constructor: || Box::new(crate::models::svm::SvrRegressor::default()),
    });
    models
}

/// Registry of every MLR model compiled into the crate.
pub struct ModelRegistry {
    entries: Vec<ModelEntry>,
}

impl ModelRegistry {
    pub fn global() -> &'static ModelRegistry {
        static REGISTRY: OnceLock<ModelRegistry> = OnceLock::new();
        REGISTRY.get_or_init(|| {
            let entries = known_models();
            log::debug!(
                "Registered MLR models: {}",
                entries.iter().map(|e| e.name).collect::<Vec<_>>().join(", ")
            );
            ModelRegistry { entries }
        })
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|e| e.name).collect()
    }

    pub fn get(&self, name: &str) -> Option<&ModelEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// Entry for `name`, falling back to the first registered model.
    pub fn lookup(&self, name: &str) -> &ModelEntry {
        match self.get(name) {
            Some(entry) => entry,
            None => {
                let fallback = &self.entries[0];
                log::warn!(
                    "MLR model '{}' is not registered (available: {}), using '{}'",
                    name,
                    self.names().join(", "),
                    fallback.name
                );
                fallback
            }
        }
    }
}
