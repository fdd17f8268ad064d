use thiserror::Error;

/// Error type for the scalar autodiff engine and the networks built on it.
#[derive(Error, Debug)]
pub enum MlpError {
    #[error("Shape mismatch: expected {expected:?}, got {actual:?} during operation {operation}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
        operation: String,
    },

    #[error("Invalid network topology: {0}")]
    InvalidTopology(String),

    #[error("Cannot overwrite data of derived scalar #{index}; only leaves are mutable")]
    DerivedScalarMutation { index: usize },

    #[error("Scalar #{index} belongs to a different graph")]
    ForeignScalar { index: usize },

    #[error("stale scalar handle #{index}: its pass has been released")]
    StaleScalar { index: usize },

    #[error("Parameter count mismatch: expected {expected}, got {actual}")]
    ParameterCountMismatch { expected: usize, actual: usize },

    #[error("Cannot train on an empty batch")]
    EmptyBatch,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MlpError {
    pub(crate) fn shape(expected: usize, actual: usize, operation: &str) -> Self {
        MlpError::ShapeMismatch {
            expected: vec![expected],
            actual: vec![actual],
            operation: operation.to_string(),
        }
    }
}
