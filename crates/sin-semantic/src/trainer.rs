use crate::embeddings::Embedder;
use crate::error::Result;
use crate::model::RetrievalModel;
use sin_core::config::TrainingConfig;
use sin_core::Dataset;
use tracing::debug;

/// Feeds a dataset to the model batch by batch
#[derive(Debug, Clone)]
pub struct Trainer {
    batch_size: usize,
    log_every: usize,
}

impl Trainer {
    pub fn new(batch_size: usize, log_every: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            log_every: log_every.max(1),
        }
    }

    pub fn from_config(config: &TrainingConfig) -> Self {
        Self::new(config.batch_size, config.log_every)
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Run one pass over `dataset` and return the summed batch loss
    pub async fn run_epoch(
        &self,
        model: &mut RetrievalModel,
        dataset: &Dataset,
        embedder: &dyn Embedder,
        epoch: u32,
    ) -> Result<f64> {
        let mut total_loss = 0.0f64;

        for (batch_idx, batch) in dataset.batches(self.batch_size).enumerate() {
            let loss = model.train_step(batch, embedder).await?;
            total_loss += f64::from(loss);

            if batch_idx % self.log_every == 0 {
                debug!("Epoch {} | Batch {} | Loss: {:.4}", epoch, batch_idx, loss);
            }
        }

        Ok(total_loss)
    }
}

impl Default for Trainer {
    fn default() -> Self {
        Self::from_config(&TrainingConfig::default())
    }
}
