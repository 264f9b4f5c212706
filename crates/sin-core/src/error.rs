use std::path::PathBuf;
use thiserror::Error;

/// Everything that can go wrong inside the assistant's bookkeeping
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to read dataset {path}: {reason}")]
    DatasetError { path: PathBuf, reason: String },

    #[error("No training data found in {0}")]
    NoTrainingData(PathBuf),

    #[error("Model registry error: {0}")]
    RegistryError(String),

    #[error("Training monitor error: {0}")]
    MonitorError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
