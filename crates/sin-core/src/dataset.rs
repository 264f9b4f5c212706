// Dialogue datasets: the prompt/response pairs the assistant learns from.
// Conversation folders hold `.json` files with a `dialogues` array and plain
// `.txt` transcripts with alternating user/assistant lines.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialoguePair {
    pub prompt: String,
    pub response: String,
}

impl DialoguePair {
    pub fn new(prompt: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            response: response.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dataset {
    pub pairs: Vec<DialoguePair>,
}

/// Accepted shapes of a single dialogue inside a JSON file
#[derive(Deserialize)]
#[serde(untagged)]
enum RawDialogue {
    Pair(String, String),
    Object {
        #[serde(alias = "user", alias = "input")]
        prompt: String,
        #[serde(alias = "reply", alias = "output")]
        response: String,
    },
}

#[derive(Deserialize)]
struct RawDialogueFile {
    dialogues: Option<Vec<RawDialogue>>,
}

impl Dataset {
    pub fn from_pairs(pairs: Vec<DialoguePair>) -> Self {
        Self { pairs }
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DialoguePair> {
        self.pairs.iter()
    }

    pub fn extend(&mut self, other: Dataset) {
        self.pairs.extend(other.pairs);
    }

    /// Consecutive batches of at most `size` pairs
    pub fn batches(&self, size: usize) -> std::slice::Chunks<'_, DialoguePair> {
        self.pairs.chunks(size.max(1))
    }

    /// The first `n` pairs; deterministic so evaluations are comparable
    pub fn sample(&self, n: usize) -> Dataset {
        Dataset::from_pairs(self.pairs.iter().take(n).cloned().collect())
    }

    /// Parse a JSON dialogue file. Files without a `dialogues` key yield `None`.
    pub fn from_json_str(content: &str, path: &Path) -> Result<Option<Self>> {
        let file: RawDialogueFile = serde_json::from_str(content).map_err(|e| Error::DatasetError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Ok(file.dialogues.map(|dialogues| {
            let pairs = dialogues
                .into_iter()
                .map(|d| match d {
                    RawDialogue::Pair(prompt, response) => DialoguePair { prompt, response },
                    RawDialogue::Object { prompt, response } => DialoguePair { prompt, response },
                })
                .filter(|p| !p.prompt.trim().is_empty() && !p.response.trim().is_empty())
                .collect();
            Dataset::from_pairs(pairs)
        }))
    }

    /// Parse a transcript: non-empty lines alternate between user and assistant.
    /// `User:` / `Sin:` prefixes are optional; an unpaired last line is ignored.
    pub fn from_text(content: &str) -> Self {
        let lines: Vec<&str> = content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(strip_speaker)
            .collect();

        let pairs = lines
            .chunks_exact(2)
            .map(|pair| DialoguePair::new(pair[0], pair[1]))
            .collect();
        Dataset::from_pairs(pairs)
    }

    pub fn load_json_file(path: &Path) -> Result<Option<Self>> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content, path)
    }

    pub fn load_text_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_text(&content))
    }

    /// Load a single dataset file, choosing the format by extension
    pub fn load_file(path: &Path) -> Result<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::load_json_file(path)?.ok_or_else(|| Error::DatasetError {
                path: path.to_path_buf(),
                reason: "missing `dialogues` array".to_string(),
            }),
            Some("txt") => Self::load_text_file(path),
            _ => Err(Error::DatasetError {
                path: path.to_path_buf(),
                reason: "expected a .json or .txt file".to_string(),
            }),
        }
    }

    /// Concatenate every dataset in a conversations folder, in file name order.
    ///
    /// Unreadable files are logged and skipped. Returns `None` when nothing was loaded.
    pub fn load_conversations_dir(dir: &Path) -> Result<Option<Self>> {
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        files.sort();

        let mut combined = Dataset::default();
        let mut loaded_any = false;

        for path in files {
            let loaded = match path.extension().and_then(|e| e.to_str()) {
                Some("json") => Self::load_json_file(&path),
                Some("txt") => Self::load_text_file(&path).map(Some),
                _ => {
                    debug!("Skipping {}", path.display());
                    continue;
                }
            };

            match loaded {
                Ok(Some(dataset)) => {
                    debug!("Loaded {} pairs from {}", dataset.len(), path.display());
                    loaded_any = true;
                    combined.extend(dataset);
                }
                Ok(None) => debug!("{} has no dialogues, skipping", path.display()),
                Err(e) => warn!("Error loading {}: {}", path.display(), e),
            }
        }

        if !loaded_any || combined.is_empty() {
            return Ok(None);
        }

        info!("Loaded dataset with {} samples", combined.len());
        Ok(Some(combined))
    }
}

fn strip_speaker(line: &str) -> &str {
    for prefix in ["User:", "Sin:"] {
        if let Some(rest) = line.strip_prefix(prefix) {
            return rest.trim();
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_dialogue_shapes() {
        let content = r#"{
            "dialogues": [
                {"prompt": "hi", "response": "hello"},
                {"user": "how are you?", "reply": "fine"},
                ["what is rust?", "a systems language"],
                {"input": "", "output": "dropped"}
            ]
        }"#;

        let dataset = Dataset::from_json_str(content, Path::new("test.json"))
            .unwrap()
            .unwrap();
        assert_eq!(dataset.len(), 3);
        assert_eq!(dataset.pairs[1], DialoguePair::new("how are you?", "fine"));
        assert_eq!(dataset.pairs[2].response, "a systems language");
    }

    #[test]
    fn test_json_without_dialogues() {
        let dataset = Dataset::from_json_str(r#"{"other": 1}"#, Path::new("x.json")).unwrap();
        assert!(dataset.is_none());
    }

    #[test]
    fn test_text_transcript() {
        let dataset = Dataset::from_text("User: hi\nSin: hello\n\nhow are you?\nfine\ndangling\n");
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.pairs[0], DialoguePair::new("hi", "hello"));
        assert_eq!(dataset.pairs[1], DialoguePair::new("how are you?", "fine"));
    }

    #[test]
    fn test_batches_and_sample() {
        let dataset = Dataset::from_pairs(
            (0..5).map(|i| DialoguePair::new(format!("q{i}"), format!("a{i}"))).collect(),
        );
        let sizes: Vec<usize> = dataset.batches(2).map(<[DialoguePair]>::len).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(dataset.batches(0).count(), 5);
        assert_eq!(dataset.sample(3).len(), 3);
        assert_eq!(dataset.sample(30).len(), 5);
    }

    #[test]
    fn test_conversations_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"dialogues": [["hi", "hello"]]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("b.txt"), "bye\nsee you\n").unwrap();
        std::fs::write(dir.path().join("c.json"), "{broken").unwrap();
        std::fs::write(dir.path().join("d.json"), r#"{"meta": true}"#).unwrap();
        std::fs::write(dir.path().join("notes.md"), "ignored").unwrap();

        let dataset = Dataset::load_conversations_dir(dir.path()).unwrap().unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.pairs[0].prompt, "hi");
        assert_eq!(dataset.pairs[1].prompt, "bye");
    }

    #[test]
    fn test_empty_conversations_dir() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Dataset::load_conversations_dir(dir.path()).unwrap().is_none());
    }
}
