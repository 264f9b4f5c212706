// Semantic dialogue engine for Sin
//
// Sentences are turned into embeddings and the assistant answers with the
// reply of the most similar prompt it has learned. This crate holds the
// embedders, the retrieval model with its trainer and evaluator, and the
// `Sin` assistant that ties them to memory, personality and the model registry.

pub mod assistant;
pub mod embeddings;
pub mod error;
pub mod evaluator;
pub mod model;
pub mod preprocessing;
pub mod trainer;

// Re-export main types
pub use assistant::{ModelComparison, Sin, ERROR_REPLY, FALLBACK_REPLY};
pub use embeddings::{
    cosine_similarity, embed_text, embedder_from_config, Embedder, EmbeddingGenerator,
    HashingEmbedder,
};
pub use error::{Result, SemanticError};
pub use evaluator::Evaluator;
pub use model::{MemoryEntry, RetrievalModel, EMPTY_RESPONSE};
pub use preprocessing::{clean_response, clean_text, extract_last_user_turn, preprocess_query};
pub use trainer::Trainer;
