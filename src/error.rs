use std::path::PathBuf;

use thiserror::Error;

/// Problems with the run configuration. These are raised at startup,
/// before any posterior evaluation happens.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("parameter {name} is declared more than once")]
    DuplicateParameter { name: String },

    #[error("unknown parameter {name}")]
    UnknownParameter { name: String },

    #[error(
        "the order of parameters {first}, {second} in params_inference does not match \
         the order of parameters in the population. Order in the population is {expected:?}"
    )]
    ParamOrder {
        first: String,
        second: String,
        expected: Vec<String>,
    },

    #[error("unsupported dataset {0}, only 'mock' is available")]
    UnsupportedDataset(String),

    #[error("unsupported prior family {family} for parameter {name}")]
    UnsupportedPrior { name: String, family: String },

    #[error("no prior bounds available for parameter {0}")]
    MissingPrior(String),

    #[error("invalid prior for parameter {name}: {reason}")]
    InvalidPrior { name: String, reason: String },

    #[error("invalid sampler settings: {0}")]
    InvalidSettings(String),
}

/// Violations of the dataset invariants, detected at load time.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum DataError {
    #[error("{field} must be strictly positive, found {value} at {index:?}")]
    NonPositive {
        field: &'static str,
        index: (usize, usize),
        value: f64,
    },

    #[error("secondary mass {m2} exceeds primary mass {m1} at {index:?}")]
    SecondaryAbovePrimary {
        index: (usize, usize),
        m1: f64,
        m2: f64,
    },

    #[error("shape of {field} is {found:?}, expected {expected:?}")]
    ShapeMismatch {
        field: &'static str,
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("injection weight at index {index} is {value}, weights must be positive")]
    NonPositiveWeight { index: usize, value: f64 },

    #[error("total generated injections ({n_gen}) is smaller than the detected count ({n_det})")]
    TooFewGenerated { n_gen: u64, n_det: usize },

    #[error("dataset is empty")]
    Empty,

    #[error("could not read {path:?}")]
    Npy {
        path: PathBuf,
        #[source]
        source: ndarray_npy::ReadNpyError,
    },
}

/// Errors of the persisted chain store.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error in chain store")]
    Io(#[from] std::io::Error),

    #[error("could not (de)serialize chain metadata")]
    Json(#[from] serde_json::Error),

    #[error("malformed chain row at line {line}: {reason}")]
    Malformed { line: usize, reason: String },

    #[error("chain shape mismatch: expected {expected}, found {found}")]
    ShapeMismatch { expected: String, found: String },

    #[error("no checkpoint found at {path:?}")]
    MissingCheckpoint { path: PathBuf },

    #[error("chain store was not reset before appending")]
    NotInitialized,
}
