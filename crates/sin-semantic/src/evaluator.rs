use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::{Result, SemanticError};
use crate::model::RetrievalModel;
use crate::preprocessing::clean_response;
use sin_core::{Dataset, Metrics};
use tracing::debug;

/// Scores a model against held-out dialogue pairs
#[derive(Debug, Clone)]
pub struct Evaluator {
    sample_size: usize,
    min_similarity: f32,
}

impl Evaluator {
    pub fn new(sample_size: usize, min_similarity: f32) -> Self {
        Self {
            sample_size,
            min_similarity,
        }
    }

    /// Metrics over the first `sample_size` pairs:
    /// `accuracy` (exact reply match), `similarity` (mean cosine between the
    /// generated and expected reply) and `loss` (`1 - similarity`).
    ///
    /// An empty dataset yields an empty map.
    pub async fn evaluate(
        &self,
        model: &RetrievalModel,
        dataset: &Dataset,
        embedder: &dyn Embedder,
    ) -> Result<Metrics> {
        let sample = dataset.sample(self.sample_size);
        if sample.is_empty() {
            return Ok(Metrics::new());
        }

        let mut exact = 0usize;
        let mut generated = Vec::with_capacity(sample.len());
        for pair in sample.iter() {
            let raw = model
                .generate_response(&pair.prompt, embedder, self.min_similarity)
                .await?;
            let answer = clean_response(&raw);
            if answer == pair.response.trim() {
                exact += 1;
            }
            generated.push(answer);
        }

        // Embed generated and expected replies in one batch
        let mut texts: Vec<String> = generated.clone();
        texts.extend(sample.iter().map(|p| p.response.trim().to_string()));
        let vectors = embedder.embed_batch(texts).await?;
        if vectors.len() != 2 * sample.len() {
            return Err(SemanticError::EmbeddingError(format!(
                "expected {} embeddings, got {}",
                2 * sample.len(),
                vectors.len()
            )));
        }

        let (got, expected) = vectors.split_at(sample.len());
        let similarity_sum: f64 = generated
            .iter()
            .zip(got.iter().zip(expected))
            .map(|(answer, (g, e))| {
                if answer.is_empty() {
                    0.0
                } else {
                    f64::from(cosine_similarity(g, e))
                }
            })
            .sum();

        let n = sample.len() as f64;
        let accuracy = exact as f64 / n;
        let similarity = similarity_sum / n;
        debug!(
            "Evaluated {} samples: accuracy {:.3}, similarity {:.3}",
            sample.len(),
            accuracy,
            similarity
        );

        let mut metrics = Metrics::new();
        metrics.insert("accuracy".to_string(), accuracy);
        metrics.insert("similarity".to_string(), similarity);
        metrics.insert("loss".to_string(), 1.0 - similarity);
        Ok(metrics)
    }
}
