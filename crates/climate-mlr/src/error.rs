use thiserror::Error;

/// Errors raised by the MLR pipeline.
///
/// Variants follow the failure classes of the pipeline: configuration
/// problems, data-integrity problems (bad datasets, types, units, shapes),
/// search failures and regressor failures. File-level failures carry their
/// `anyhow` context chain through [`MlrError::Other`].
#[derive(Debug, Error)]
pub enum MlrError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid dataset: {0}")]
    Dataset(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("units error: {0}")]
    Units(String),

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("grid search failed: {0}")]
    GridSearch(String),

    #[error("not fitted: {0}")]
    NotFitted(String),

    #[error("regressor error: {0}")]
    Regressor(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ndarray::ShapeError> for MlrError {
    fn from(err: ndarray::ShapeError) -> Self {
        MlrError::Shape(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MlrError>;
