use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use tracing::{debug, warn};

/// One user turn and the assistant's reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub user: String,
    pub response: String,
    pub at: DateTime<Utc>,
}

/// Rolling conversation history used to build prompts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMemory {
    interactions: VecDeque<Interaction>,
    #[serde(skip, default = "default_capacity")]
    max_interactions: usize,
}

fn default_capacity() -> usize {
    1000
}

impl Default for ConversationMemory {
    fn default() -> Self {
        Self::new(default_capacity())
    }
}

impl ConversationMemory {
    pub fn new(max_interactions: usize) -> Self {
        Self {
            interactions: VecDeque::new(),
            max_interactions: max_interactions.max(1),
        }
    }

    pub fn add_interaction(&mut self, user: &str, response: &str) {
        self.interactions.push_back(Interaction {
            user: user.to_string(),
            response: response.to_string(),
            at: Utc::now(),
        });

        while self.interactions.len() > self.max_interactions {
            self.interactions.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.interactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interactions.is_empty()
    }

    pub fn interactions(&self) -> impl Iterator<Item = &Interaction> {
        self.interactions.iter()
    }

    pub fn last(&self) -> Option<&Interaction> {
        self.interactions.back()
    }

    pub fn clear(&mut self) {
        self.interactions.clear();
    }

    /// The last `lines` rendered dialogue lines, oldest first
    pub fn context(&self, lines: usize) -> Vec<String> {
        let mut rendered: Vec<String> = Vec::new();
        for interaction in &self.interactions {
            rendered.push(format!("User: {}", interaction.user));
            if !interaction.response.is_empty() {
                rendered.push(format!("Sin: {}", interaction.response));
            }
        }

        let skip = rendered.len().saturating_sub(lines);
        rendered.split_off(skip)
    }

    pub fn save(&self, path: &Path) -> crate::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        debug!("Saved {} interactions to {}", self.len(), path.display());
        Ok(())
    }

    pub fn load(path: &Path, max_interactions: usize) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut memory: ConversationMemory = serde_json::from_str(&contents)?;
        memory.max_interactions = max_interactions.max(1);
        while memory.interactions.len() > memory.max_interactions {
            memory.interactions.pop_front();
        }
        Ok(memory)
    }

    /// Load saved memory, starting empty when the file is missing or unreadable
    pub fn load_or_default(path: &Path, max_interactions: usize) -> Self {
        if !path.exists() {
            return Self::new(max_interactions);
        }
        match Self::load(path, max_interactions) {
            Ok(memory) => {
                debug!("Memory loaded: {} interactions", memory.len());
                memory
            }
            Err(e) => {
                warn!("Failed to load memory from {}: {}. Starting empty.", path.display(), e);
                Self::new(max_interactions)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_uses_last_lines() {
        let mut memory = ConversationMemory::new(10);
        memory.add_interaction("hi", "hello");
        memory.add_interaction("how are you?", "fine");
        memory.add_interaction("bye", "");

        let context = memory.context(4);
        assert_eq!(
            context,
            vec!["Sin: hello", "User: how are you?", "Sin: fine", "User: bye"]
        );
        assert_eq!(memory.context(100).len(), 5);
        assert!(memory.context(0).is_empty());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut memory = ConversationMemory::new(2);
        memory.add_interaction("one", "1");
        memory.add_interaction("two", "2");
        memory.add_interaction("three", "3");
        assert_eq!(memory.len(), 2);
        assert_eq!(memory.interactions().next().unwrap().user, "two");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");

        let mut memory = ConversationMemory::new(10);
        memory.add_interaction("hi", "hello");
        memory.save(&path).unwrap();

        let loaded = ConversationMemory::load(&path, 10).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.last().unwrap().response, "hello");
    }

    #[test]
    fn test_corrupt_file_falls_back_to_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        std::fs::write(&path, "{not json").unwrap();

        let memory = ConversationMemory::load_or_default(&path, 10);
        assert!(memory.is_empty());
    }
}
