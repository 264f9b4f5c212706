// Core bookkeeping for the Sin assistant: configuration, conversation memory,
// dialogue datasets, the training monitor, model snapshots and personality.
pub mod config;
pub mod dataset;
pub mod error;
pub mod memory;
pub mod monitor;
pub mod personality;
pub mod registry;

pub use config::{Config, EmbeddingBackend, SemanticConfig};
pub use dataset::{Dataset, DialoguePair};
pub use error::Error;
pub use memory::{ConversationMemory, Interaction};
pub use monitor::{render_sparkline, Metrics, TrainingLog, TrainingMonitor};
pub use personality::{Archetype, Personality};
pub use registry::ModelRegistry;

/// Result type alias because typing Result<T, Error> everywhere is tedious
pub type Result<T> = std::result::Result<T, Error>;
