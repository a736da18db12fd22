//! Regex fallback extractor (§4.4 point 1): used when no LLM extractor is
//! configured. Keyed to capitalized phrases, a known-technology lexicon, and
//! a handful of simple patterns (email, URL, phone). Produces mentions only
//! — relation inference for the regex path is left to the graph provider's
//! window-based co-occurrence pass, not this extractor.

use async_trait::async_trait;
use nexus_types::{EntityExtractor, EntityType, ExtractedMention, ExtractionResult, ExtractorError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

static CAPITALIZED_PHRASE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][\w'&-]*(?:\s+[A-Z][\w'&-]*){0,3}\b").unwrap());

static EMAIL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[\w.+-]+@[\w-]+\.[\w.-]+\b").unwrap());

static URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bhttps?://[^\s]+\b").unwrap());

static PHONE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\+?\d[\d\s().-]{7,}\d\b").unwrap());

/// Well-known technology names; matched case-insensitively against whole
/// words so "rust" and "Rust" both resolve to `EntityType::Technology`.
const TECH_LEXICON: &[&str] = &[
    "rust", "python", "javascript", "typescript", "golang", "java", "kubernetes", "docker",
    "postgresql", "postgres", "pgvector", "qdrant", "redis", "kafka", "tokio", "axum", "grpc",
    "graphql", "react", "tensorflow", "pytorch", "linux", "aws", "gcp", "azure", "sqlite",
    "prometheus", "opentelemetry", "nginx",
];

fn tech_lexicon() -> &'static HashSet<&'static str> {
    static SET: Lazy<HashSet<&'static str>> = Lazy::new(|| TECH_LEXICON.iter().copied().collect());
    &SET
}

/// Stopwords that would otherwise surface as bogus proper-noun mentions
/// when they start a sentence.
const LEADING_STOPWORDS: &[&str] = &["The", "A", "An", "This", "That", "These", "Those", "It"];

pub struct RegexEntityExtractor;

impl RegexEntityExtractor {
    pub fn new() -> Self {
        Self
    }

    fn capitalized_mentions(text: &str) -> Vec<ExtractedMention> {
        CAPITALIZED_PHRASE
            .find_iter(text)
            .filter(|m| !LEADING_STOPWORDS.contains(&m.as_str()))
            .map(|m| ExtractedMention {
                entity_type: EntityType::Other,
                surface_form: m.as_str().to_string(),
                char_start: m.start(),
                char_end: m.end(),
                confidence: 0.55,
            })
            .collect()
    }

    fn technology_mentions(text: &str) -> Vec<ExtractedMention> {
        let lexicon = tech_lexicon();
        text.split_word_bounds_ascii()
            .filter(|(_, _, word)| lexicon.contains(word.to_lowercase().as_str()))
            .map(|(start, end, word)| ExtractedMention {
                entity_type: EntityType::Technology,
                surface_form: word.to_string(),
                char_start: start,
                char_end: end,
                confidence: 0.8,
            })
            .collect()
    }

    fn simple_pattern_mentions(text: &str) -> Vec<ExtractedMention> {
        let mut out = Vec::new();
        for re in [&*EMAIL, &*URL, &*PHONE] {
            for m in re.find_iter(text) {
                out.push(ExtractedMention {
                    entity_type: EntityType::Other,
                    surface_form: m.as_str().to_string(),
                    char_start: m.start(),
                    char_end: m.end(),
                    confidence: 0.9,
                });
            }
        }
        out
    }
}

impl Default for RegexEntityExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EntityExtractor for RegexEntityExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ExtractorError> {
        let mut mentions = Self::simple_pattern_mentions(text);
        mentions.extend(Self::technology_mentions(text));
        mentions.extend(Self::capitalized_mentions(text));
        mentions.sort_by_key(|m| m.char_start);
        Ok(ExtractionResult { mentions, relations: Vec::new() })
    }
}

/// Tiny ASCII word-boundary splitter returning `(start, end, word)` so
/// technology names can be matched against exact word spans, not substrings.
trait SplitWordBoundsAscii {
    fn split_word_bounds_ascii(&self) -> Vec<(usize, usize, &str)>;
}

impl SplitWordBoundsAscii for str {
    fn split_word_bounds_ascii(&self) -> Vec<(usize, usize, &str)> {
        let mut out = Vec::new();
        let mut start = None;
        for (i, c) in self.char_indices() {
            if c.is_alphanumeric() {
                if start.is_none() {
                    start = Some(i);
                }
            } else if let Some(s) = start.take() {
                out.push((s, i, &self[s..i]));
            }
        }
        if let Some(s) = start {
            out.push((s, self.len(), &self[s..]));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn detects_known_technology_case_insensitively() {
        let extractor = RegexEntityExtractor::new();
        let result = extractor.extract("We run postgres and Rust in production.").await.unwrap();
        let techs: Vec<_> = result
            .mentions
            .iter()
            .filter(|m| m.entity_type == EntityType::Technology)
            .map(|m| m.surface_form.as_str())
            .collect();
        assert!(techs.contains(&"postgres"));
        assert!(techs.contains(&"Rust"));
    }

    #[tokio::test]
    async fn detects_capitalized_phrase_as_candidate_entity() {
        let extractor = RegexEntityExtractor::new();
        let result = extractor.extract("Ada Lovelace met Charles Babbage.").await.unwrap();
        let surfaces: Vec<_> = result.mentions.iter().map(|m| m.surface_form.as_str()).collect();
        assert!(surfaces.contains(&"Ada Lovelace"));
        assert!(surfaces.contains(&"Charles Babbage"));
    }

    #[tokio::test]
    async fn leading_stopword_is_not_a_mention() {
        let extractor = RegexEntityExtractor::new();
        let result = extractor.extract("The weather is nice today.").await.unwrap();
        assert!(result.mentions.iter().all(|m| m.surface_form != "The"));
    }

    #[tokio::test]
    async fn detects_email_addresses() {
        let extractor = RegexEntityExtractor::new();
        let result = extractor.extract("Contact ada@example.com for details.").await.unwrap();
        assert!(result.mentions.iter().any(|m| m.surface_form == "ada@example.com"));
    }
}
