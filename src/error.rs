//! Error types for the motion sensor agent.
//!
//! None of these are fatal to a running session: each one degrades the
//! stream (a dropped update, a skipped feature row, a missing log) rather
//! than aborting collection.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by a [`Sensor`](crate::collector::Sensor).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("update carried {actual} values but the sensor has {expected} dimensions")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors raised while deriving a feature row from raw rows.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("column {column} is not numeric: {value:?}")]
    MalformedRow { column: usize, value: String },

    #[error("row has {actual} columns, at least {required} required")]
    TooFewColumns { required: usize, actual: usize },
}

/// Errors raised by the feature log.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("feature log {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("feature log has been released")]
    Released,
}

impl PersistenceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Serialize error: {0}")]
    Serialize(String),
}
