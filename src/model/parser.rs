use serde::{Deserialize, Serialize};
use std::fmt;

/// Index into the association table.
///
/// `Unknown` is reserved for prompt-less training and lookup misses; no
/// parser produces it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "phrase", rename_all = "snake_case")]
pub enum Key {
    Unknown,
    Phrase(String),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Unknown => f.write_str("<unknown>"),
            Key::Phrase(p) => write!(f, "{:?}", p),
        }
    }
}

/// Turns an utterance into a lookup key. Inputs that are equal under the
/// parser's own normalization must yield equal keys.
pub trait Parser: Send + Sync {
    fn parse(&self, text: &str) -> Key;
}

const STOP_WORDS: &[&str] = &[
    "a", "about", "after", "all", "am", "an", "and", "any", "are", "as", "at", "be", "been",
    "but", "by", "can", "could", "did", "do", "does", "for", "from", "had", "has", "have", "he",
    "her", "him", "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "me", "my",
    "of", "on", "or", "our", "she", "so", "that", "the", "their", "them", "then", "there",
    "they", "this", "to", "was", "we", "were", "what", "when", "where", "which", "who", "why",
    "will", "with", "would", "you", "your",
];

/// Keyword extraction: content words, lowercased, sorted and de-duplicated.
#[derive(Debug, Default, Clone)]
pub struct KeywordParser;

impl KeywordParser {
    pub fn new() -> Self {
        Self
    }

    fn words(text: &str) -> Vec<String> {
        text.split(|c: char| !(c.is_alphanumeric() || c == '\''))
            .map(|w| w.trim_matches('\'').to_lowercase())
            .filter(|w| !w.is_empty())
            .collect()
    }
}

impl Parser for KeywordParser {
    fn parse(&self, text: &str) -> Key {
        let words = Self::words(text);
        // Wordless input keys on its own text, never on the fallback bucket.
        if words.is_empty() {
            return Key::Phrase(text.trim().to_string());
        }

        let mut keywords: Vec<String> = words
            .iter()
            .filter(|w| !STOP_WORDS.contains(&w.as_str()))
            .cloned()
            .collect();
        // A sentence made only of stop words still deserves its own key.
        if keywords.is_empty() {
            keywords = words;
        }

        keywords.sort();
        keywords.dedup();
        Key::Phrase(keywords.join(" "))
    }
}
