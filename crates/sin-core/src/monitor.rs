use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info};

/// Validation metrics keyed by name (accuracy, similarity, loss)
pub type Metrics = BTreeMap<String, f64>;

pub const LOG_FILE_NAME: &str = "training_log.json";
pub const PROGRESS_FILE_NAME: &str = "training_progress.txt";

/// Metric series tracked per epoch
const TRACKED_METRICS: [&str; 2] = ["accuracy", "similarity"];

/// Per-epoch history of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingLog {
    pub epochs: Vec<u32>,
    pub train_loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub metrics: BTreeMap<String, Vec<f64>>,
}

impl Default for TrainingLog {
    fn default() -> Self {
        Self {
            epochs: Vec::new(),
            train_loss: Vec::new(),
            val_loss: Vec::new(),
            metrics: TRACKED_METRICS
                .iter()
                .map(|m| (m.to_string(), Vec::new()))
                .collect(),
        }
    }
}

impl TrainingLog {
    /// 1-based epoch with the highest value of `metric`; first one wins ties
    pub fn best_epoch(&self, metric: &str) -> Option<u32> {
        let values = self.metrics.get(metric).filter(|v| !v.is_empty())?;
        let (idx, _) = values
            .iter()
            .enumerate()
            .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            })?;
        self.epochs.get(idx).copied().or(Some(idx as u32 + 1))
    }
}

/// Records epoch results and keeps the on-disk log and chart current
pub struct TrainingMonitor {
    log_dir: PathBuf,
    current_log: TrainingLog,
}

impl TrainingMonitor {
    pub fn new(log_dir: impl Into<PathBuf>) -> crate::Result<Self> {
        let log_dir = log_dir.into();
        std::fs::create_dir_all(&log_dir).map_err(|e| {
            error!("Failed to initialize monitor: {}", e);
            crate::Error::MonitorError(format!("cannot create {}: {}", log_dir.display(), e))
        })?;

        info!("Training monitor initialized");
        Ok(Self {
            log_dir,
            current_log: TrainingLog::default(),
        })
    }

    pub fn reset(&mut self) {
        self.current_log = TrainingLog::default();
    }

    pub fn current_log(&self) -> &TrainingLog {
        &self.current_log
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Append an epoch and rewrite the log and progress chart
    pub fn log_epoch(
        &mut self,
        epoch: u32,
        train_loss: f64,
        val_metrics: Option<&Metrics>,
    ) -> crate::Result<()> {
        self.current_log.epochs.push(epoch);
        self.current_log.train_loss.push(train_loss);

        if let Some(metrics) = val_metrics {
            for (name, value) in metrics {
                if name == "loss" {
                    self.current_log.val_loss.push(*value);
                } else if let Some(series) = self.current_log.metrics.get_mut(name) {
                    series.push(*value);
                }
            }
        }

        self.save_log()
            .and_then(|_| self.write_progress())
            .map_err(|e| {
                error!("Failed to log epoch {}: {}", epoch, e);
                e
            })?;

        debug!("Logged epoch {} data", epoch);
        Ok(())
    }

    pub fn best_epoch(&self, metric: &str) -> Option<u32> {
        self.current_log.best_epoch(metric)
    }

    /// The last log written to `log_dir`, if any
    pub fn load_report(log_dir: &Path) -> crate::Result<Option<TrainingLog>> {
        let path = log_dir.join(LOG_FILE_NAME);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&contents)?))
    }

    fn save_log(&self) -> crate::Result<()> {
        let path = self.log_dir.join(LOG_FILE_NAME);
        std::fs::write(path, serde_json::to_string_pretty(&self.current_log)?)?;
        Ok(())
    }

    fn write_progress(&self) -> crate::Result<()> {
        let path = self.log_dir.join(PROGRESS_FILE_NAME);
        std::fs::write(path, render_progress(&self.current_log))?;
        Ok(())
    }
}

/// Text chart of a training log: one sparkline per series
pub fn render_progress(log: &TrainingLog) -> String {
    let mut out = format!("Training progress ({} epochs)\n\n", log.epochs.len());

    let mut row = |label: &str, values: &[f64]| {
        if values.is_empty() {
            return;
        }
        let first = values[0];
        let last = values[values.len() - 1];
        out.push_str(&format!(
            "{:<12} {}  {:.4} -> {:.4}\n",
            label,
            render_sparkline(values),
            first,
            last
        ));
    };

    row("train loss", &log.train_loss);
    row("val loss", &log.val_loss);
    for (name, values) in &log.metrics {
        row(name, values);
    }

    out
}

/// Generate a sparkline using Unicode block characters
/// Characters: ▁ ▂ ▃ ▄ ▅ ▆ ▇ █
pub fn render_sparkline(data: &[f64]) -> String {
    if data.is_empty() {
        return String::new();
    }

    let chars = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];
    let max = data.iter().cloned().fold(0.0f64, f64::max);

    if max == 0.0 {
        return "▁".repeat(data.len());
    }

    data.iter()
        .map(|&v| {
            let ratio = (v / max * 7.0).clamp(0.0, 7.0);
            chars[ratio as usize]
        })
        .collect()
}
