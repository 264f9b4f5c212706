use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Trait that makes the assistant prefix answers with a thinking face
pub const ANALYTICAL_TRAIT: &str = "analytical";

/// Built-in character presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Archetype {
    Neutral,
    Scientist,
    Artist,
}

impl Archetype {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "neutral" => Some(Archetype::Neutral),
            "scientist" => Some(Archetype::Scientist),
            "artist" => Some(Archetype::Artist),
            _ => None,
        }
    }

    pub fn traits(&self) -> &'static [&'static str] {
        match self {
            Archetype::Neutral => &[],
            Archetype::Scientist => &[ANALYTICAL_TRAIT, "curious"],
            Archetype::Artist => &["creative", "emotional"],
        }
    }

    pub fn phrases(&self) -> &'static [&'static str] {
        match self {
            Archetype::Neutral => &[],
            Archetype::Scientist => &[
                "By my calculations...",
                "That is interesting from a scientific point of view...",
            ],
            Archetype::Artist => &["I feel that...", "This is inspiring!"],
        }
    }
}

impl fmt::Display for Archetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Archetype::Neutral => write!(f, "neutral"),
            Archetype::Scientist => write!(f, "scientist"),
            Archetype::Artist => write!(f, "artist"),
        }
    }
}

/// Tone applied to every answer the assistant gives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Personality {
    archetype: Archetype,
    custom_traits: Vec<String>,
}

impl Default for Personality {
    fn default() -> Self {
        Self {
            archetype: Archetype::Neutral,
            custom_traits: Vec::new(),
        }
    }
}

impl Personality {
    pub fn from_config(config: &crate::config::PersonalityConfig) -> Self {
        let mut personality = Self::default();
        personality.set_archetype(&config.archetype);
        for t in &config.traits {
            personality.add_trait(t);
        }
        personality
    }

    pub fn archetype(&self) -> Archetype {
        self.archetype
    }

    /// Switch archetype; unknown names fall back to neutral
    pub fn set_archetype(&mut self, name: &str) {
        self.archetype = Archetype::from_name(name).unwrap_or_else(|| {
            warn!("Unknown archetype {:?}, using neutral", name);
            Archetype::Neutral
        });
    }

    pub fn add_trait(&mut self, name: &str) {
        let name = name.trim();
        if !name.is_empty() {
            self.custom_traits.push(name.to_lowercase());
        }
    }

    /// Archetype traits followed by custom ones
    pub fn traits(&self) -> Vec<&str> {
        self.archetype
            .traits()
            .iter()
            .copied()
            .chain(self.custom_traits.iter().map(String::as_str))
            .collect()
    }

    pub fn format_response(&self, message: &str) -> String {
        if self.traits().contains(&ANALYTICAL_TRAIT) {
            format!("🤔 {}", message)
        } else {
            message.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neutral_leaves_message_alone() {
        let personality = Personality::default();
        assert_eq!(personality.format_response("hello"), "hello");
        assert!(personality.traits().is_empty());
    }

    #[test]
    fn test_scientist_is_analytical() {
        let mut personality = Personality::default();
        personality.set_archetype("Scientist");
        assert_eq!(personality.archetype(), Archetype::Scientist);
        assert_eq!(personality.format_response("hello"), "🤔 hello");
    }

    #[test]
    fn test_custom_trait_and_unknown_archetype() {
        let mut personality = Personality::default();
        personality.set_archetype("pirate");
        assert_eq!(personality.archetype(), Archetype::Neutral);

        personality.add_trait("Analytical");
        assert_eq!(personality.traits(), vec!["analytical"]);
        assert_eq!(personality.format_response("hm"), "🤔 hm");
    }

    #[test]
    fn test_from_config() {
        let config = crate::config::PersonalityConfig {
            archetype: "artist".to_string(),
            traits: vec!["witty".to_string()],
        };
        let personality = Personality::from_config(&config);
        assert_eq!(personality.traits(), vec!["creative", "emotional", "witty"]);
        assert!(!Archetype::Artist.phrases().is_empty());
    }
}
