use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that points at an alternative config file
pub const CONFIG_ENV_VAR: &str = "SIN_CONFIG";

/// Main configuration structure
///
/// Loaded from `$SIN_CONFIG` or the platform config dir; missing file means defaults.
/// Priority: CLI > Env > File > Defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub training: TrainingConfig,
    #[serde(default)]
    pub semantic: SemanticConfig,
    #[serde(default)]
    pub personality: PersonalityConfig,
}

impl Config {
    /// Load config from `$SIN_CONFIG`, the default location, or fall back to defaults
    pub fn load() -> crate::Result<Self> {
        let config_path = match std::env::var_os(CONFIG_ENV_VAR) {
            Some(path) => PathBuf::from(path),
            None => Self::config_path()?,
        };
        Self::load_from(&config_path)
    }

    /// Load config from an explicit path; a missing file yields defaults
    pub fn load_from(path: &Path) -> crate::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&contents)
                .map_err(|e| crate::Error::ConfigError(format!("Failed to parse config: {}", e)))?;
            tracing::debug!("Loaded config from {}", path.display());
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to the default location
    pub fn save(&self) -> crate::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| crate::Error::ConfigError(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Get the config file path (XDG on Linux, Application Support on macOS, AppData on Windows)
    pub fn config_path() -> crate::Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| crate::Error::ConfigError("Could not find config directory".into()))?
            .join("sin");

        Ok(config_dir.join("config.toml"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root of models/, conversations/, logs/ and memory.json
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl StorageConfig {
    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn conversations_dir(&self) -> PathBuf {
        self.data_dir.join("conversations")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    pub fn memory_path(&self) -> PathBuf {
        self.data_dir.join("memory.json")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// How many recent dialogue lines go into a prompt
    #[serde(default = "default_context_window")]
    pub context_window: usize,

    /// Oldest interactions are dropped beyond this
    #[serde(default = "default_max_interactions")]
    pub max_interactions: usize,
}

fn default_context_window() -> usize {
    4
}

fn default_max_interactions() -> usize {
    1000
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            context_window: default_context_window(),
            max_interactions: default_max_interactions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    #[serde(default = "default_epochs")]
    pub epochs: u32,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Emit a debug line every N batches
    #[serde(default = "default_log_every")]
    pub log_every: usize,

    /// Snapshots kept after a manual save
    #[serde(default = "default_keep_models")]
    pub keep_models: usize,

    /// Samples drawn from a validation set per evaluation
    #[serde(default = "default_eval_sample_size")]
    pub eval_sample_size: usize,
}

fn default_epochs() -> u32 {
    3
}

fn default_batch_size() -> usize {
    8
}

fn default_log_every() -> usize {
    50
}

fn default_keep_models() -> usize {
    5
}

fn default_eval_sample_size() -> usize {
    100
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            log_every: default_log_every(),
            keep_models: default_keep_models(),
            eval_sample_size: default_eval_sample_size(),
        }
    }
}

/// Which sentence encoder backs the assistant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackend {
    /// ONNX sentence-transformer via fastembed (downloads on first use)
    Fastembed,
    /// Offline feature hashing, no model download
    Hashing,
}

/// Configuration for the embedding model and retrieval
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticConfig {
    #[serde(default = "default_backend")]
    pub backend: EmbeddingBackend,

    /// Embedding model to use with the fastembed backend
    #[serde(default = "default_model")]
    pub model: String,

    /// Vector size for the hashing backend
    #[serde(default = "default_hashing_dimension")]
    pub hashing_dimension: usize,

    /// Below this cosine similarity the model has no answer
    #[serde(default = "default_min_similarity")]
    pub min_similarity: f32,
}

fn default_backend() -> EmbeddingBackend {
    EmbeddingBackend::Fastembed
}

fn default_model() -> String {
    "sentence-transformers/all-MiniLM-L6-v2".to_string()
}

fn default_hashing_dimension() -> usize {
    256
}

fn default_min_similarity() -> f32 {
    0.35
}

impl Default for SemanticConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            model: default_model(),
            hashing_dimension: default_hashing_dimension(),
            min_similarity: default_min_similarity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonalityConfig {
    /// neutral, scientist or artist
    #[serde(default = "default_archetype")]
    pub archetype: String,

    #[serde(default)]
    pub traits: Vec<String>,
}

fn default_archetype() -> String {
    "neutral".to_string()
}

impl Default for PersonalityConfig {
    fn default() -> Self {
        Self {
            archetype: default_archetype(),
            traits: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.memory.context_window, 4);
        assert_eq!(config.training.epochs, 3);
        assert_eq!(config.training.keep_models, 5);
        assert_eq!(config.semantic.backend, EmbeddingBackend::Fastembed);
        assert_eq!(config.storage.models_dir(), PathBuf::from("data/models"));
    }

    #[test]
    fn test_partial_config_file() {
        let config: Config = toml::from_str(
            r#"
[semantic]
backend = "hashing"

[training]
epochs = 7
"#,
        )
        .unwrap();
        assert_eq!(config.semantic.backend, EmbeddingBackend::Hashing);
        assert_eq!(config.semantic.hashing_dimension, 256);
        assert_eq!(config.training.epochs, 7);
        assert_eq!(config.training.batch_size, 8);
        assert_eq!(config.personality.archetype, "neutral");
    }

    #[test]
    fn test_config_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.personality.archetype = "scientist".to_string();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.personality.archetype, "scientist");
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.memory.max_interactions, 1000);
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[training]\nepochs = \"many\"\n").unwrap();
        assert!(matches!(
            Config::load_from(&path),
            Err(crate::Error::ConfigError(_))
        ));
    }
}
