use crate::embeddings::{cosine_similarity, embed_text, Embedder};
use crate::error::{Result, SemanticError};
use crate::preprocessing::{extract_last_user_turn, preprocess_query};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sin_core::DialoguePair;
use std::path::Path;
use tracing::{debug, info};

/// Reply used when nothing in the model is close enough to the query
pub const EMPTY_RESPONSE: &str = "Sin:";

/// One learned prompt and the reply it maps to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Cleaned prompt text; unique within a model
    pub key: String,

    /// Prompt as it appeared in the training data
    pub prompt: String,

    pub vector: Vec<f32>,

    pub response: String,
}

/// Retrieval-based dialogue model: answers with the response of the most
/// similar learned prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalModel {
    model_name: String,
    dimension: usize,
    entries: Vec<MemoryEntry>,
    trained_at: Option<DateTime<Utc>>,
}

impl RetrievalModel {
    pub fn new(model_name: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_name: model_name.into(),
            dimension,
            entries: Vec::new(),
            trained_at: None,
        }
    }

    /// Empty model matching an embedder's name and dimension
    pub fn for_embedder(embedder: &dyn Embedder) -> Self {
        Self::new(embedder.model_name(), embedder.dimension())
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn entries(&self) -> &[MemoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn trained_at(&self) -> Option<DateTime<Utc>> {
        self.trained_at
    }

    /// Whether vectors from `embedder` can be compared with this model's keys
    pub fn is_compatible_with(&self, embedder: &dyn Embedder) -> bool {
        self.model_name == embedder.model_name() && self.dimension == embedder.dimension()
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(SemanticError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        Ok(())
    }

    /// Best matching entry for an embedded query
    pub fn respond(&self, query_vector: &[f32]) -> Option<(&MemoryEntry, f32)> {
        self.entries
            .iter()
            .map(|entry| (entry, cosine_similarity(query_vector, &entry.vector)))
            .fold(None, |best, (entry, score)| match best {
                Some((_, b)) if b >= score => best,
                _ => Some((entry, score)),
            })
    }

    /// Learn a batch of dialogue pairs and return the batch loss.
    ///
    /// Loss of a pair is `1 - max cosine` against the keys known before the
    /// batch (1.0 on an empty model); the batch loss is the mean. A prompt whose
    /// cleaned key is already known replaces that entry's response.
    pub async fn train_step(
        &mut self,
        batch: &[DialoguePair],
        embedder: &dyn Embedder,
    ) -> Result<f32> {
        let pairs: Vec<(String, &DialoguePair)> = batch
            .iter()
            .map(|pair| (preprocess_query(&extract_last_user_turn(&pair.prompt)), pair))
            .filter(|(key, pair)| !key.is_empty() && !pair.response.trim().is_empty())
            .collect();

        if pairs.is_empty() {
            return Ok(0.0);
        }

        let keys: Vec<String> = pairs.iter().map(|(key, _)| key.clone()).collect();
        let vectors = embedder.embed_batch(keys).await?;
        if vectors.len() != pairs.len() {
            return Err(SemanticError::EmbeddingError(format!(
                "expected {} embeddings, got {}",
                pairs.len(),
                vectors.len()
            )));
        }
        for vector in &vectors {
            self.check_dimension(vector)?;
        }

        let counted = pairs.len();
        let known = self.entries.len();
        let mut total_loss = 0.0f32;

        for ((key, pair), vector) in pairs.into_iter().zip(vectors) {
            let best = self.entries[..known]
                .iter()
                .map(|entry| cosine_similarity(&vector, &entry.vector))
                .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))));
            total_loss += 1.0 - best.unwrap_or(0.0);

            let entry = MemoryEntry {
                key,
                prompt: pair.prompt.trim().to_string(),
                vector,
                response: pair.response.trim().to_string(),
            };

            match self.entries.iter_mut().find(|e| e.key == entry.key) {
                Some(existing) => {
                    debug!("Updating existing entry for {:?}", existing.key);
                    *existing = entry;
                }
                None => self.entries.push(entry),
            }
        }

        self.trained_at = Some(Utc::now());
        Ok(total_loss / counted as f32)
    }

    /// Answer a dialogue prompt.
    ///
    /// Returns `Sin: <response>` for the closest learned prompt when its
    /// similarity reaches `min_similarity`, otherwise a bare `Sin:`.
    pub async fn generate_response(
        &self,
        prompt: &str,
        embedder: &dyn Embedder,
        min_similarity: f32,
    ) -> Result<String> {
        let query = preprocess_query(&extract_last_user_turn(prompt));
        if query.is_empty() || self.entries.is_empty() {
            return Ok(EMPTY_RESPONSE.to_string());
        }

        let query_vector = embed_text(embedder, &query).await?;
        self.check_dimension(&query_vector)?;

        match self.respond(&query_vector) {
            Some((entry, score)) if score >= min_similarity => {
                debug!("Matched {:?} with similarity {:.3}", entry.key, score);
                Ok(format!("{} {}", EMPTY_RESPONSE, entry.response))
            }
            Some((_, score)) => {
                debug!("Best similarity {:.3} below threshold {:.3}", score, min_similarity);
                Ok(EMPTY_RESPONSE.to_string())
            }
            None => Ok(EMPTY_RESPONSE.to_string()),
        }
    }

    /// Save the model as MessagePack
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let data = rmp_serde::to_vec_named(self).map_err(|e| {
            SemanticError::SerializationError(format!("Failed to serialize model: {}", e))
        })?;
        std::fs::write(path, data)?;

        info!("Model with {} entries saved to {}", self.len(), path.display());
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SemanticError::ModelNotFound {
                path: path.to_string_lossy().to_string(),
            });
        }

        let data = std::fs::read(path)?;
        let model: RetrievalModel = rmp_serde::from_slice(&data)
            .map_err(|e| SemanticError::CorruptedModel(format!("{}: {}", path.display(), e)))?;

        if model.entries.iter().any(|e| e.vector.len() != model.dimension) {
            return Err(SemanticError::CorruptedModel(format!(
                "{}: vector dimension does not match {}",
                path.display(),
                model.dimension
            )));
        }

        info!("Loaded model with {} entries from {}", model.len(), path.display());
        Ok(model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{HashingEmbedder, MockEmbedder};

    fn pairs(items: &[(&str, &str)]) -> Vec<DialoguePair> {
        items.iter().map(|(p, r)| DialoguePair::new(*p, *r)).collect()
    }

    #[tokio::test]
    async fn test_train_step_loss_drops_on_repeat() {
        let embedder = HashingEmbedder::new(128);
        let mut model = RetrievalModel::for_embedder(&embedder);
        let batch = pairs(&[("hello there", "hi!"), ("what is your name", "I am Sin")]);

        let first = model.train_step(&batch, &embedder).await.unwrap();
        assert!((first - 1.0).abs() < 1e-6);
        assert_eq!(model.len(), 2);
        assert!(model.trained_at().is_some());

        let second = model.train_step(&batch, &embedder).await.unwrap();
        assert!(second.abs() < 1e-5);
        assert_eq!(model.len(), 2);
    }

    #[tokio::test]
    async fn test_same_key_updates_response() {
        let embedder = HashingEmbedder::new(64);
        let mut model = RetrievalModel::for_embedder(&embedder);

        model.train_step(&pairs(&[("Hello!", "old")]), &embedder).await.unwrap();
        model.train_step(&pairs(&[("hello", "new")]), &embedder).await.unwrap();

        assert_eq!(model.len(), 1);
        assert_eq!(model.entries()[0].response, "new");
    }

    #[tokio::test]
    async fn test_empty_pairs_are_skipped() {
        let embedder = HashingEmbedder::new(64);
        let mut model = RetrievalModel::for_embedder(&embedder);
        let loss = model
            .train_step(&pairs(&[("?!", "punctuation only"), ("hi", " ")]), &embedder)
            .await
            .unwrap();
        assert_eq!(loss, 0.0);
        assert!(model.is_empty());
    }

    #[tokio::test]
    async fn test_generate_response_threshold() {
        let embedder = HashingEmbedder::new(256);
        let mut model = RetrievalModel::for_embedder(&embedder);
        model
            .train_step(&pairs(&[("what is your name", "I am Sin")]), &embedder)
            .await
            .unwrap();

        let prompt = "User: hi\nSin: hello\nUser: what is your name?\nSin:";
        let answer = model.generate_response(prompt, &embedder, 0.5).await.unwrap();
        assert_eq!(answer, "Sin: I am Sin");

        let miss = model
            .generate_response("User: tell me about volcanoes\nSin:", &embedder, 0.5)
            .await
            .unwrap();
        assert_eq!(miss, EMPTY_RESPONSE);
    }

    #[tokio::test]
    async fn test_empty_model_does_not_embed() {
        let mut mock = MockEmbedder::new();
        mock.expect_model_name().return_const("mock".to_string());
        mock.expect_dimension().return_const(4usize);
        mock.expect_embed_batch().never();

        let model = RetrievalModel::for_embedder(&mock);
        let answer = model.generate_response("User: hi\nSin:", &mock, 0.0).await.unwrap();
        assert_eq!(answer, EMPTY_RESPONSE);
    }

    #[tokio::test]
    async fn test_dimension_mismatch() {
        let mut mock = MockEmbedder::new();
        mock.expect_embed_batch()
            .returning(|texts| Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect()));

        let mut model = RetrievalModel::new("mock", 3);
        let err = model
            .train_step(&pairs(&[("hi", "hello")]), &mock)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SemanticError::DimensionMismatch { expected: 3, actual: 2 }
        ));
        assert!(model.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("test.sinmodel");

        let embedder = HashingEmbedder::new(32);
        let mut model = RetrievalModel::for_embedder(&embedder);
        model.train_step(&pairs(&[("ping", "pong")]), &embedder).await.unwrap();
        model.save(&path).unwrap();

        let loaded = RetrievalModel::load(&path).unwrap();
        assert_eq!(loaded.entries(), model.entries());
        assert_eq!(loaded.model_name(), "hashing-32");
        assert!(loaded.is_compatible_with(&embedder));
        assert!(!loaded.is_compatible_with(&HashingEmbedder::new(16)));
    }

    #[test]
    fn test_load_errors() {
        let dir = tempfile::tempdir().unwrap();
        let missing = RetrievalModel::load(&dir.path().join("missing.sinmodel")).unwrap_err();
        assert!(matches!(missing, SemanticError::ModelNotFound { .. }));

        let garbage = dir.path().join("garbage.sinmodel");
        std::fs::write(&garbage, b"not msgpack").unwrap();
        let corrupted = RetrievalModel::load(&garbage).unwrap_err();
        assert!(matches!(corrupted, SemanticError::CorruptedModel(_)));
    }
}
