use thiserror::Error;

/// Result type for embedding and model operations
pub type Result<T> = std::result::Result<T, SemanticError>;

/// Errors that can occur while embedding text or running the model
#[derive(Error, Debug)]
pub enum SemanticError {
    #[error("Failed to load embedding model: {0}")]
    ModelLoadError(String),

    #[error("Failed to generate embeddings: {0}")]
    EmbeddingError(String),

    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Model file not found at {path}")]
    ModelNotFound { path: String },

    #[error("Model {path} was built with {built_with}, but the current embedder is {current}")]
    IncompatibleModel {
        path: String,
        built_with: String,
        current: String,
    },

    #[error("Model file is corrupted or invalid: {0}")]
    CorruptedModel(String),

    #[error("Model not initialized. Call initialize() first.")]
    ModelNotInitialized,

    #[error(transparent)]
    Core(#[from] sin_core::Error),
}
