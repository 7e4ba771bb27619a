// rpgo_core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

use crate::types::Key;

/// Misconfiguration detected while building a solver. Never a runtime condition.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("undefined outlier removal method '{0}'")]
    UnknownOutlierRemoval(String),

    #[error("unsupported solver '{0}'")]
    UnknownSolver(String),

    #[error("invalid threshold {name} = {value}: must be positive and finite")]
    InvalidThreshold { name: &'static str, value: f64 },

    #[error("configuration file {0:?} not found")]
    MissingFile(PathBuf),

    #[error("failed to load configuration: {0}")]
    Load(#[from] figment::Error),
}

/// Failures reading or writing graph and log files.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("i/o error on {path:?}: {source}")]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path:?}, line {line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("{path:?}: key {key} has no g2o id (needs an ASCII prefix and a 56-bit index)")]
    UnencodableKey { path: PathBuf, key: Key },
}

impl IoError {
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        IoError::File {
            path: path.into(),
            source,
        }
    }
}

/// Crate-level error.
#[derive(Debug, Error)]
pub enum RpgoError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Io(#[from] IoError),
}
