use lazy_static::lazy_static;
use regex::Regex;

/// Maximum tokens to use for embedding (BERT limit)
const MAX_TOKENS: usize = 512;

const USER_PREFIX: &str = "User:";
const SIN_PREFIX: &str = "Sin:";

lazy_static! {
    static ref URL_RE: Regex = Regex::new(r"https?://[^\s]+").unwrap();
    static ref MARKDOWN_RE: Regex = Regex::new(r"[#*`\[\]()_~]").unwrap();
    // Letters of any script survive, so Cyrillic dialogue is not wiped out
    static ref SPECIAL_CHARS_RE: Regex = Regex::new(r"[^\p{L}\p{N}\s\-]").unwrap();
    static ref WHITESPACE_RE: Regex = Regex::new(r"\s+").unwrap();
}

/// Preprocess a chat query before embedding
pub fn preprocess_query(query: &str) -> String {
    let cleaned = clean_text(query);
    truncate_to_tokens(&cleaned, MAX_TOKENS)
}

/// Clean text by removing special characters and normalizing whitespace
pub fn clean_text(text: &str) -> String {
    // Remove URLs
    let text = URL_RE.replace_all(text, "");

    // Remove markdown syntax
    let text = MARKDOWN_RE.replace_all(&text, " ");

    // Remove special characters but keep letters, numbers, spaces
    let text = SPECIAL_CHARS_RE.replace_all(&text, " ");

    // Normalize whitespace
    let text = WHITESPACE_RE.replace_all(&text, " ");

    // Lowercase for consistency
    text.trim().to_lowercase()
}

/// Truncate text to approximately N tokens
/// This is a simple word-based approximation (1 token ~= 1 word for English)
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();

    if words.len() <= max_tokens {
        return text.to_string();
    }

    words[..max_tokens].join(" ")
}

/// The text of the last `User:` line in a dialogue prompt.
///
/// Prompts without speaker lines are returned as-is, minus a trailing `Sin:` cue.
pub fn extract_last_user_turn(prompt: &str) -> String {
    let last_user = prompt
        .lines()
        .rev()
        .find_map(|line| line.trim_start().strip_prefix(USER_PREFIX));

    match last_user {
        Some(turn) => turn.trim().to_string(),
        None => {
            let trimmed = prompt.trim_end();
            trimmed
                .strip_suffix(SIN_PREFIX)
                .unwrap_or(trimmed)
                .trim()
                .to_string()
        }
    }
}

/// Extract the assistant's answer from raw model output: the text after the
/// last `Sin:` marker, up to the first newline.
pub fn clean_response(raw: &str) -> String {
    let answer = match raw.rfind(SIN_PREFIX) {
        Some(idx) => &raw[idx + SIN_PREFIX.len()..],
        None => raw,
    };

    answer
        .trim_start()
        .lines()
        .next()
        .unwrap_or("")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text() {
        let input = "Hello! This is a **test** with [links](http://example.com) and `code`.";
        let output = clean_text(input);
        assert!(!output.contains('!'));
        assert!(!output.contains('*'));
        assert!(!output.contains('['));
        assert!(!output.contains("http"));
        assert!(output.contains("hello"));
        assert!(output.contains("test"));
    }

    #[test]
    fn test_clean_text_keeps_other_scripts() {
        assert_eq!(clean_text("Привет,   МИР!"), "привет мир");
        assert_eq!(clean_text("  "), "");
    }

    #[test]
    fn test_truncate_to_tokens() {
        let text = (0..1000).map(|i| format!("word{}", i)).collect::<Vec<_>>().join(" ");
        let truncated = truncate_to_tokens(&text, 100);
        let word_count = truncated.split_whitespace().count();
        assert_eq!(word_count, 100);
        assert_eq!(truncate_to_tokens("short text", 5), "short text");
    }

    #[test]
    fn test_extract_last_user_turn() {
        let prompt = "User: hi\nSin: hello\nUser: what is rust?\nSin:";
        assert_eq!(extract_last_user_turn(prompt), "what is rust?");
        assert_eq!(extract_last_user_turn("plain question\nSin:"), "plain question");
        assert_eq!(extract_last_user_turn("plain question"), "plain question");
    }

    #[test]
    fn test_clean_response() {
        assert_eq!(clean_response("User: hi\nSin: hello there\nUser: more"), "hello there");
        assert_eq!(clean_response("Sin: a\nSin:  b  "), "b");
        assert_eq!(clean_response("Sin:"), "");
        assert_eq!(clean_response("no marker\nsecond line"), "no marker");
    }
}
