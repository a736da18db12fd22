//! The three pure sub-score functions (§4.3). Each is a deterministic
//! function of its inputs only: same input, same float output, no clocks
//! or randomness, so the composite score reproduces to 1e-6 across
//! processes as required.

/// DQ — Data Quality: length within sane bounds, non-whitespace structure,
/// unique-token ratio, absence of obvious noise markers.
pub fn score_data_quality(content: &str) -> f32 {
    let trimmed = content.trim();
    let char_len = trimmed.chars().count();

    let length_score = if char_len == 0 {
        0.0
    } else if char_len < 10 {
        char_len as f32 / 10.0
    } else if char_len > 4000 {
        (4000.0 / char_len as f32).clamp(0.3, 1.0)
    } else {
        1.0
    };

    let tokens: Vec<String> = trimmed.split_whitespace().map(|t| t.to_lowercase()).collect();
    let diversity = if tokens.is_empty() {
        0.0
    } else {
        let mut unique = std::collections::HashSet::with_capacity(tokens.len());
        for t in &tokens {
            unique.insert(t.as_str());
        }
        unique.len() as f32 / tokens.len() as f32
    };

    let has_structure = if trimmed.chars().any(|c| c.is_alphabetic()) { 1.0 } else { 0.0 };

    let noise_ratio = {
        let total = trimmed.chars().count().max(1);
        let noisy = trimmed
            .chars()
            .filter(|c| !c.is_alphanumeric() && !c.is_whitespace() && !".,!?;:'\"-()/".contains(*c))
            .count();
        noisy as f32 / total as f32
    };
    let noise_penalty = (1.0 - noise_ratio * 3.0).clamp(0.0, 1.0);

    (length_score * 0.4 + diversity * 0.3 + has_structure * 0.1 + noise_penalty * 0.2).clamp(0.0, 1.0)
}

/// DI — Data Intelligence: heuristic information density from recognized
/// entities (proper-noun ratio used as a cheap proxy when no extractor
/// output is available), numerals, and normalized mean sentence length.
pub fn score_data_intelligence(content: &str) -> f32 {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }

    let numerals = content.chars().filter(|c| c.is_ascii_digit()).count();
    let numeral_density = (numerals as f32 / content.chars().count().max(1) as f32 * 20.0).clamp(0.0, 1.0);

    let proper_nouns = words
        .iter()
        .filter(|w| w.chars().next().map(|c| c.is_uppercase()).unwrap_or(false))
        .count();
    let proper_noun_ratio = (proper_nouns as f32 / words.len() as f32).clamp(0.0, 1.0);

    let sentences: Vec<&str> = content
        .split(['.', '!', '?'])
        .filter(|s| !s.trim().is_empty())
        .collect();
    let mean_sentence_len = if sentences.is_empty() {
        words.len() as f32
    } else {
        sentences.iter().map(|s| s.split_whitespace().count()).sum::<usize>() as f32 / sentences.len() as f32
    };
    // Sigmoid centered on ~15 words/sentence: neither fragments nor run-ons score well.
    let sentence_score = 1.0 / (1.0 + (-(mean_sentence_len - 15.0) / 5.0).exp());

    (proper_noun_ratio * 0.4 + numeral_density * 0.3 + sentence_score * 0.3).clamp(0.0, 1.0)
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| (*x as f64) * (*y as f64)).sum();
    let na: f64 = a.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    let nb: f64 = b.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    ((dot / (na * nb)) as f32).clamp(-1.0, 1.0)
}

/// DR — Data Relevance: maximum cosine similarity between `embedding` and
/// any vector in `context`, capped at 1. Defaults to 0.5 (neutral) when
/// there is no embedding or no context to compare against.
pub fn score_data_relevance(embedding: Option<&[f32]>, context: &[Vec<f32>]) -> f32 {
    let Some(embedding) = embedding else { return 0.5 };
    if context.is_empty() {
        return 0.5;
    }
    context
        .iter()
        .map(|c| cosine_similarity(embedding, c).max(0.0))
        .fold(0.0_f32, f32::max)
        .clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_scores_zero_quality() {
        assert_eq!(score_data_quality(""), 0.0);
    }

    #[test]
    fn short_noisy_content_scores_low() {
        let q = score_data_quality("!!!???***");
        assert!(q < 0.3, "got {q}");
    }

    #[test]
    fn well_formed_sentence_scores_reasonably_high() {
        let q = score_data_quality(
            "Alice works at Acme Corporation and leads the platform engineering team there.",
        );
        assert!(q > 0.6, "got {q}");
    }

    #[test]
    fn relevance_defaults_neutral_without_context() {
        assert_eq!(score_data_relevance(Some(&[1.0, 0.0]), &[]), 0.5);
        assert_eq!(score_data_relevance(None, &[vec![1.0, 0.0]]), 0.5);
    }

    #[test]
    fn relevance_is_max_similarity_capped_at_one() {
        let ctx = vec![vec![0.0, 1.0], vec![1.0, 0.0]];
        let r = score_data_relevance(Some(&[1.0, 0.0]), &ctx);
        assert!((r - 1.0).abs() < 1e-6);
    }

    #[test]
    fn determinism_same_input_same_output() {
        let c = "Acme uses Python 3 for its 12 microservices.";
        let a = (score_data_quality(c), score_data_intelligence(c));
        let b = (score_data_quality(c), score_data_intelligence(c));
        assert_eq!(a, b);
    }
}
