use chrono::Local;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{error, info};

/// File extension of model snapshots
pub const MODEL_EXTENSION: &str = "sinmodel";

/// Name of the model the assistant loads on startup and saves after training
pub const WORKING_MODEL: &str = "sin_model.sinmodel";

/// Directory of saved model snapshots
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models_dir: PathBuf,
}

impl ModelRegistry {
    pub fn new(models_dir: impl Into<PathBuf>) -> crate::Result<Self> {
        let models_dir = models_dir.into();
        std::fs::create_dir_all(&models_dir)?;
        Ok(Self { models_dir })
    }

    pub fn models_dir(&self) -> &Path {
        &self.models_dir
    }

    pub fn working_model_path(&self) -> PathBuf {
        self.models_dir.join(WORKING_MODEL)
    }

    /// File name for a snapshot: timestamped when no name is given,
    /// otherwise the name with the model extension appended if missing.
    pub fn snapshot_name(name: Option<&str>) -> crate::Result<String> {
        let suffix = format!(".{}", MODEL_EXTENSION);
        let name = match name.map(str::trim).filter(|n| !n.is_empty()) {
            None => format!("sin_model_{}{}", Local::now().format("%Y%m%d_%H%M%S"), suffix),
            Some(n) if n.ends_with(&suffix) => n.to_string(),
            Some(n) => format!("{}{}", n, suffix),
        };

        if name.contains(['/', '\\']) || name.starts_with('.') {
            return Err(crate::Error::RegistryError(format!(
                "invalid snapshot name {:?}",
                name
            )));
        }
        Ok(name)
    }

    pub fn snapshot_path(&self, name: Option<&str>) -> crate::Result<PathBuf> {
        Ok(self.models_dir.join(Self::snapshot_name(name)?))
    }

    /// Snapshot files with their modification times, newest first
    fn snapshots(&self) -> crate::Result<Vec<(PathBuf, SystemTime)>> {
        let mut models = Vec::new();
        for entry in std::fs::read_dir(&self.models_dir)? {
            let path = entry?.path();
            let is_model = path.extension().and_then(|e| e.to_str()) == Some(MODEL_EXTENSION);
            if !is_model || !path.is_file() {
                continue;
            }
            let modified = std::fs::metadata(&path)?.modified()?;
            models.push((path, modified));
        }

        models.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| b.0.cmp(&a.0)));
        Ok(models)
    }

    /// Snapshot file names, newest first
    pub fn list(&self) -> crate::Result<Vec<String>> {
        Ok(self
            .snapshots()?
            .into_iter()
            .filter_map(|(path, _)| path.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect())
    }

    /// Delete all but the newest `keep` snapshots. The working model is never removed.
    pub fn cleanup(&self, keep: usize) -> crate::Result<Vec<PathBuf>> {
        let working = self.working_model_path();
        let mut removed = Vec::new();

        let candidates = self
            .snapshots()?
            .into_iter()
            .map(|(path, _)| path)
            .filter(|path| *path != working);

        for old_model in candidates.skip(keep) {
            match std::fs::remove_file(&old_model) {
                Ok(()) => {
                    info!("Removed old model: {}", old_model.display());
                    removed.push(old_model);
                }
                Err(e) => error!("Failed to remove {}: {}", old_model.display(), e),
            }
        }

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn touch(path: &Path, age_secs: u64) {
        let file = std::fs::File::create(path).unwrap();
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))
            .unwrap();
    }

    #[test]
    fn test_snapshot_names() {
        assert_eq!(
            ModelRegistry::snapshot_name(Some("best")).unwrap(),
            "best.sinmodel"
        );
        assert_eq!(
            ModelRegistry::snapshot_name(Some("best.sinmodel")).unwrap(),
            "best.sinmodel"
        );

        let generated = ModelRegistry::snapshot_name(None).unwrap();
        assert!(generated.starts_with("sin_model_"));
        assert!(generated.ends_with(".sinmodel"));
        assert_eq!(generated.len(), "sin_model_YYYYMMDD_HHMMSS.sinmodel".len());

        assert!(ModelRegistry::snapshot_name(Some("../escape")).is_err());
    }

    #[test]
    fn test_list_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path().join("models")).unwrap();

        touch(&registry.models_dir().join("old.sinmodel"), 300);
        touch(&registry.models_dir().join("new.sinmodel"), 10);
        touch(&registry.models_dir().join("mid.sinmodel"), 100);
        touch(&registry.models_dir().join("readme.txt"), 0);

        assert_eq!(
            registry.list().unwrap(),
            vec!["new.sinmodel", "mid.sinmodel", "old.sinmodel"]
        );
    }

    #[test]
    fn test_cleanup_keeps_newest_and_working_model() {
        let dir = tempfile::tempdir().unwrap();
        let registry = ModelRegistry::new(dir.path()).unwrap();

        touch(&registry.working_model_path(), 10_000);
        for i in 0..7u64 {
            touch(&registry.models_dir().join(format!("snap{i}.sinmodel")), i * 60);
        }

        let removed = registry.cleanup(5).unwrap();
        assert_eq!(removed.len(), 2);

        let remaining = registry.list().unwrap();
        assert_eq!(remaining.len(), 6);
        assert!(remaining.contains(&WORKING_MODEL.to_string()));
        assert!(!remaining.contains(&"snap6.sinmodel".to_string()));
        assert!(!remaining.contains(&"snap5.sinmodel".to_string()));
    }
}
