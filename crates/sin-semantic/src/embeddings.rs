use crate::error::{Result, SemanticError};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use sin_core::{EmbeddingBackend, SemanticConfig};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use unicode_segmentation::UnicodeSegmentation;

/// Anything that turns sentences into fixed-size vectors
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Identifier stored alongside trained models
    fn model_name(&self) -> String;

    /// Vector dimension
    fn dimension(&self) -> usize;

    /// Generate embeddings for multiple texts in batch
    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>>;
}

/// Generate embedding for a single text
pub async fn embed_text(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    embedder
        .embed_batch(vec![text.to_string()])
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| SemanticError::EmbeddingError("No embeddings generated".to_string()))
}

/// Build the embedder selected in the config
pub fn embedder_from_config(config: &SemanticConfig) -> Arc<dyn Embedder> {
    match config.backend {
        EmbeddingBackend::Fastembed => Arc::new(EmbeddingGenerator::new(config.model.clone())),
        EmbeddingBackend::Hashing => Arc::new(HashingEmbedder::new(config.hashing_dimension)),
    }
}

/// Embedding generator using fastembed
pub struct EmbeddingGenerator {
    /// The underlying embedding model
    model: Arc<RwLock<Option<TextEmbedding>>>,

    /// Model name
    model_name: String,

    /// Vector dimension
    dimension: usize,
}

impl EmbeddingGenerator {
    /// Create a new embedding generator (lazy initialization)
    pub fn new(model_name: String) -> Self {
        let dimension = match model_name.as_str() {
            "sentence-transformers/all-MiniLM-L6-v2" => 384,
            "BAAI/bge-small-en-v1.5" => 384,
            "BAAI/bge-base-en-v1.5" => 768,
            _ => 384,
        };

        Self {
            model: Arc::new(RwLock::new(None)),
            model_name,
            dimension,
        }
    }

    /// Initialize the model (downloads if needed)
    pub async fn initialize(&self) -> Result<()> {
        let mut model_guard = self.model.write().await;

        if model_guard.is_some() {
            debug!("Embedding model already initialized");
            return Ok(());
        }

        info!("Initializing embedding model: {}", self.model_name);

        let model_type = match self.model_name.as_str() {
            "sentence-transformers/all-MiniLM-L6-v2" => EmbeddingModel::AllMiniLML6V2,
            "BAAI/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
            "BAAI/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
            _ => {
                warn!(
                    "Unknown model {}, defaulting to all-MiniLM-L6-v2",
                    self.model_name
                );
                EmbeddingModel::AllMiniLML6V2
            }
        };

        let init_options = InitOptions::new(model_type).with_show_download_progress(true);

        let embedding_model = TextEmbedding::try_new(init_options)
            .map_err(|e| SemanticError::ModelLoadError(e.to_string()))?;

        *model_guard = Some(embedding_model);

        info!("Embedding model initialized successfully");
        Ok(())
    }
}

#[async_trait]
impl Embedder for EmbeddingGenerator {
    fn model_name(&self) -> String {
        self.model_name.clone()
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        debug!("embed_batch called with {} texts", texts.len());
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        if self.model.read().await.is_none() {
            self.initialize().await?;
        }

        let model_guard = self.model.read().await;
        let model = model_guard
            .as_ref()
            .ok_or(SemanticError::ModelNotInitialized)?;

        let embeddings = model
            .embed(texts, None)
            .map_err(|e| SemanticError::EmbeddingError(e.to_string()))?;
        debug!("model.embed() returned {} embeddings", embeddings.len());

        Ok(embeddings)
    }
}

/// Offline embedder: signed feature hashing of word unigrams and bigrams.
///
/// Deterministic across runs and platforms so saved models stay valid.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        let words: Vec<String> = text.unicode_words().map(str::to_lowercase).collect();

        let mut add = |feature: &str, weight: f32| {
            let hash = fnv1a(feature.as_bytes());
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * weight;
        };

        for word in &words {
            add(word, 1.0);
        }
        for pair in words.windows(2) {
            add(&format!("{} {}", pair[0], pair[1]), 0.5);
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> String {
        format!("hashing-{}", self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}

/// 64-bit FNV-1a
fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}

/// Calculate cosine similarity between two vectors
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();

    let magnitude_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let magnitude_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if magnitude_a == 0.0 || magnitude_b == 0.0 {
        return 0.0;
    }

    dot_product / (magnitude_a * magnitude_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 0.001);

        let c = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &c).abs() < 0.001);

        let d = vec![1.0, 1.0, 0.0];
        let sim = cosine_similarity(&a, &d);
        assert!(sim > 0.7 && sim < 0.8); // Should be ~0.707

        assert_eq!(cosine_similarity(&a, &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_hashing_embedder_is_normalized_and_stable() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed_sync("Hello there, how are you?");
        let b = embedder.embed_sync("hello THERE how are you");

        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!((cosine_similarity(&a, &b) - 1.0).abs() < 1e-5);

        assert!(embedder.embed_sync("").iter().all(|x| *x == 0.0));
    }

    #[test]
    fn test_hashing_embedder_separates_topics() {
        let embedder = HashingEmbedder::new(256);
        let query = embedder.embed_sync("what is your name");
        let close = embedder.embed_sync("tell me your name");
        let far = embedder.embed_sync("the weather is rainy today");
        assert!(cosine_similarity(&query, &close) > cosine_similarity(&query, &far));
    }

    #[test]
    fn test_fnv1a_known_values() {
        assert_eq!(fnv1a(b""), 0xcbf2_9ce4_8422_2325);
        assert_eq!(fnv1a(b"a"), 0xaf63_dc4c_8601_ec8c);
    }

    #[tokio::test]
    async fn test_embed_text_uses_batch() {
        let embedder = HashingEmbedder::new(16);
        let single = embed_text(&embedder, "sin").await.unwrap();
        assert_eq!(single, embedder.embed_sync("sin"));
        assert_eq!(embedder.model_name(), "hashing-16");
    }

    #[tokio::test]
    async fn test_embed_text_reports_empty_batch() {
        let mut mock = MockEmbedder::new();
        mock.expect_embed_batch().returning(|_| Ok(Vec::new()));
        let err = embed_text(&mock, "anything").await.unwrap_err();
        assert!(matches!(err, SemanticError::EmbeddingError(_)));
    }
}
