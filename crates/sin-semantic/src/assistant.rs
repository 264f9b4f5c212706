use crate::embeddings::Embedder;
use crate::error::{Result, SemanticError};
use crate::evaluator::Evaluator;
use crate::model::RetrievalModel;
use crate::preprocessing::clean_response;
use crate::trainer::Trainer;
use serde::{Deserialize, Serialize};
use sin_core::{
    Config, ConversationMemory, Dataset, Metrics, ModelRegistry, Personality, TrainingLog,
    TrainingMonitor,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Reply when the model has nothing to say
pub const FALLBACK_REPLY: &str = "I can't put an answer together yet.";

/// Reply when answering failed
pub const ERROR_REPLY: &str = "Something went wrong while generating a reply.";

/// Metrics of one snapshot in a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelComparison {
    /// Snapshot file name
    pub name: String,
    pub metrics: Metrics,
    /// Per-metric difference from the first snapshot; set when comparing more than one
    pub improvement: Option<Metrics>,
}

/// The assistant: model, memory, personality and the training bookkeeping around them
pub struct Sin {
    config: Config,
    embedder: Arc<dyn Embedder>,
    model: RetrievalModel,
    memory: ConversationMemory,
    registry: ModelRegistry,
    monitor: TrainingMonitor,
    personality: Personality,
    trainer: Trainer,
}

impl Sin {
    /// Create the data layout, then load the working model and saved memory
    pub fn open(config: Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let storage = &config.storage;
        std::fs::create_dir_all(storage.conversations_dir())?;

        info!("Initializing model...");
        let registry = ModelRegistry::new(storage.models_dir())?;
        let model = Self::load_working_model(&registry.working_model_path(), embedder.as_ref());

        info!("Initializing memory...");
        let memory = ConversationMemory::load_or_default(
            &storage.memory_path(),
            config.memory.max_interactions,
        );

        info!("Initializing monitor...");
        let monitor = TrainingMonitor::new(storage.logs_dir())?;

        let personality = Personality::from_config(&config.personality);
        let trainer = Trainer::from_config(&config.training);

        info!("Sin initialization complete");
        Ok(Self {
            config,
            embedder,
            model,
            memory,
            registry,
            monitor,
            personality,
            trainer,
        })
    }

    fn load_working_model(path: &Path, embedder: &dyn Embedder) -> RetrievalModel {
        if !path.exists() {
            debug!("No working model at {}, starting empty", path.display());
            return RetrievalModel::for_embedder(embedder);
        }

        match RetrievalModel::load(path) {
            Ok(model) if model.is_compatible_with(embedder) => model,
            Ok(model) => {
                warn!(
                    "Working model was built with {} ({} dims), current embedder is {} ({} dims); starting empty",
                    model.model_name(),
                    model.dimension(),
                    embedder.model_name(),
                    embedder.dimension()
                );
                RetrievalModel::for_embedder(embedder)
            }
            Err(e) => {
                error!("Failed to load working model: {}", e);
                RetrievalModel::for_embedder(embedder)
            }
        }
    }

    fn evaluator(&self, sample_size: usize) -> Evaluator {
        Evaluator::new(sample_size, self.config.semantic.min_similarity)
    }

    /// Answer a user message. Never fails: problems become a fallback reply.
    pub async fn chat(&mut self, user_input: &str) -> String {
        info!("Received user input: {}", user_input);

        let mut lines = self.memory.context(self.config.memory.context_window);
        lines.push(format!("User: {}", user_input));
        lines.push("Sin:".to_string());
        let prompt = lines.join("\n");
        debug!("Generated prompt: {:?}", prompt);

        let raw = match self
            .model
            .generate_response(&prompt, self.embedder.as_ref(), self.config.semantic.min_similarity)
            .await
        {
            Ok(raw) => raw,
            Err(e) => {
                error!("Error in chat: {}", e);
                return ERROR_REPLY.to_string();
            }
        };
        debug!("Raw response: {:?}", raw);

        let cleaned = clean_response(&raw);
        if cleaned.is_empty() {
            debug!("Empty answer, nothing to remember");
            return self.personality.format_response(FALLBACK_REPLY);
        }

        // Only real answers go into memory
        let reply = self.personality.format_response(&cleaned);
        self.remember(user_input, &reply);
        reply
    }

    fn remember(&mut self, user_input: &str, reply: &str) {
        self.memory.add_interaction(user_input, reply);
        if let Err(e) = self.memory.save(&self.config.storage.memory_path()) {
            warn!("Failed to save memory: {}", e);
        }
    }

    /// Train on every dataset in the conversations folder.
    ///
    /// With a validation set, metrics are computed before training and after
    /// each epoch. The model and memory are saved when done.
    pub async fn train(&mut self, epochs: u32, validation: Option<&Dataset>) -> Result<TrainingLog> {
        info!("Starting training for {} epochs", epochs);

        let conversations = self.config.storage.conversations_dir();
        let dataset = Dataset::load_conversations_dir(&conversations)?
            .ok_or_else(|| sin_core::Error::NoTrainingData(conversations.clone()))?;
        info!("Loaded dataset with {} samples", dataset.len());

        let validation = validation.filter(|v| !v.is_empty());
        if let Some(val) = validation {
            info!("Running initial validation...");
            let initial = self.evaluate(val, self.config.training.eval_sample_size).await?;
            info!("Initial metrics: {:?}", initial);
        }

        self.monitor.reset();
        for epoch in 1..=epochs {
            info!("Starting epoch {}/{}", epoch, epochs);
            let total_loss = self
                .trainer
                .run_epoch(&mut self.model, &dataset, self.embedder.as_ref(), epoch)
                .await
                .map_err(|e| {
                    error!("Error during epoch {}: {}", epoch, e);
                    e
                })?;

            let val_metrics = match validation {
                Some(val) => {
                    let metrics = self
                        .evaluate(val, self.config.training.eval_sample_size)
                        .await?;
                    info!("Validation metrics: {:?}", metrics);
                    Some(metrics)
                }
                None => None,
            };

            self.monitor
                .log_epoch(epoch, total_loss, val_metrics.as_ref())?;
            info!(
                "Epoch {} complete | Avg Loss: {:.4}",
                epoch,
                total_loss / dataset.len() as f64
            );
        }

        match self.monitor.best_epoch("accuracy") {
            Some(best) => info!("Training complete! Best epoch: {}", best),
            None => info!("Training complete!"),
        }

        self.save()?;
        Ok(self.monitor.current_log().clone())
    }

    /// Metrics of the current model on the first `sample_size` pairs
    pub async fn evaluate(&self, dataset: &Dataset, sample_size: usize) -> Result<Metrics> {
        self.evaluator(sample_size)
            .evaluate(&self.model, dataset, self.embedder.as_ref())
            .await
    }

    /// Write the working model and the conversation memory
    pub fn save(&self) -> Result<()> {
        let model_path = self.registry.working_model_path();
        self.model.save(&model_path).map_err(|e| {
            error!("Failed to save model: {}", e);
            e
        })?;

        let memory_path = self.config.storage.memory_path();
        self.memory.save(&memory_path)?;
        info!("Memory saved to {}", memory_path.display());
        Ok(())
    }

    /// Reload conversation memory from disk; an unreadable file leaves memory empty
    pub fn load(&mut self) {
        self.memory = ConversationMemory::load_or_default(
            &self.config.storage.memory_path(),
            self.config.memory.max_interactions,
        );
    }

    /// The log of the last training run, if one was written
    pub fn training_report(&self) -> Result<Option<TrainingLog>> {
        Ok(TrainingMonitor::load_report(self.monitor.log_dir())?)
    }

    /// Save a named (or timestamped) snapshot and prune old ones
    pub fn save_model(&self, name: Option<&str>) -> Result<PathBuf> {
        let path = self.registry.snapshot_path(name)?;
        self.model.save(&path)?;
        info!("Model manually saved to {}", path.display());

        self.registry.cleanup(self.config.training.keep_models)?;
        Ok(path)
    }

    /// Snapshot file names, newest first
    pub fn list_models(&self) -> Result<Vec<String>> {
        Ok(self.registry.list()?)
    }

    /// Evaluate each snapshot on `dataset`. The working model is left untouched.
    pub async fn compare_models(
        &self,
        paths: &[PathBuf],
        dataset: &Dataset,
    ) -> Result<Vec<ModelComparison>> {
        let evaluator = self.evaluator(self.config.training.eval_sample_size);
        let mut results = Vec::with_capacity(paths.len());

        for path in paths {
            let snapshot = RetrievalModel::load(path)?;
            // Keys from another embedder are not comparable even at equal dimension
            if !snapshot.is_compatible_with(self.embedder.as_ref()) {
                return Err(SemanticError::IncompatibleModel {
                    path: path.display().to_string(),
                    built_with: format!("{} ({} dims)", snapshot.model_name(), snapshot.dimension()),
                    current: format!(
                        "{} ({} dims)",
                        self.embedder.model_name(),
                        self.embedder.dimension()
                    ),
                });
            }

            let metrics = evaluator
                .evaluate(&snapshot, dataset, self.embedder.as_ref())
                .await?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string());
            results.push(ModelComparison {
                name,
                metrics,
                improvement: None,
            });
        }

        if results.len() > 1 {
            let base = results[0].metrics.clone();
            for result in &mut results {
                let delta = result
                    .metrics
                    .iter()
                    .map(|(k, v)| (k.clone(), v - base.get(k).copied().unwrap_or(0.0)))
                    .collect();
                result.improvement = Some(delta);
            }
        }

        Ok(results)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn model(&self) -> &RetrievalModel {
        &self.model
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    pub fn personality(&self) -> &Personality {
        &self.personality
    }

    pub fn personality_mut(&mut self) -> &mut Personality {
        &mut self.personality
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::{HashingEmbedder, MockEmbedder};
    use sin_core::EmbeddingBackend;

    fn test_config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.storage.data_dir = dir.to_path_buf();
        config.semantic.backend = EmbeddingBackend::Hashing;
        config
    }

    #[tokio::test]
    async fn test_chat_on_empty_model_uses_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let mut sin = Sin::open(test_config(dir.path()), Arc::new(HashingEmbedder::new(64))).unwrap();

        let reply = sin.chat("hello").await;
        assert_eq!(reply, FALLBACK_REPLY);
        assert!(sin.memory().is_empty());
        assert!(!dir.path().join("memory.json").exists());
    }

    #[tokio::test]
    async fn test_chat_error_becomes_error_reply() {
        let dir = tempfile::tempdir().unwrap();
        let mut mock = MockEmbedder::new();
        mock.expect_model_name().return_const("mock".to_string());
        mock.expect_dimension().return_const(2usize);
        mock.expect_embed_batch().returning(|texts| {
            if texts.len() == 1 && texts[0] == "hi" {
                Err(SemanticError::EmbeddingError("boom".to_string()))
            } else {
                Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
            }
        });

        let mut sin = Sin::open(test_config(dir.path()), Arc::new(mock)).unwrap();
        std::fs::write(
            dir.path().join("conversations").join("a.txt"),
            "hello\nhi there\n",
        )
        .unwrap();
        sin.train(1, None).await.unwrap();

        assert_eq!(sin.chat("hi").await, ERROR_REPLY);
        assert!(sin.memory().is_empty());
    }

    #[tokio::test]
    async fn test_compare_rejects_snapshot_from_other_embedder() {
        let dir = tempfile::tempdir().unwrap();
        let snapshot = dir.path().join("hashing.sinmodel");
        RetrievalModel::for_embedder(&HashingEmbedder::new(32))
            .save(&snapshot)
            .unwrap();

        let mut mock = MockEmbedder::new();
        mock.expect_model_name().return_const("other-32".to_string());
        mock.expect_dimension().return_const(32usize);
        mock.expect_embed_batch()
            .returning(|texts| Ok(texts.iter().map(|_| vec![1.0; 32]).collect()));

        let sin = Sin::open(test_config(dir.path()), Arc::new(mock)).unwrap();
        let dataset = Dataset::from_pairs(vec![sin_core::DialoguePair::new("hi", "hello")]);

        let err = sin.compare_models(&[snapshot], &dataset).await.unwrap_err();
        match err {
            SemanticError::IncompatibleModel {
                built_with, current, ..
            } => {
                assert!(built_with.contains("hashing-32"));
                assert!(current.contains("other-32"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_train_without_data() {
        let dir = tempfile::tempdir().unwrap();
        let mut sin = Sin::open(test_config(dir.path()), Arc::new(HashingEmbedder::new(64))).unwrap();

        let err = sin.train(1, None).await.unwrap_err();
        assert!(matches!(
            err,
            SemanticError::Core(sin_core::Error::NoTrainingData(_))
        ));
    }
}
