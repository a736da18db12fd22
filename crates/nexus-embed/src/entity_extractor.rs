//! Caching and fallback-composition wrappers around `EntityExtractor`.

use async_trait::async_trait;
use nexus_types::{EntityExtractor, ExtractionResult, ExtractorError};
use std::num::NonZeroUsize;
use std::sync::Mutex;

/// Adds an LRU cache keyed on a content hash in front of any extractor.
/// Grounded on the bulk extractor's own request/response shape: extraction
/// is deterministic for a given text, so a cache hit skips the network or
/// regex pass entirely.
pub struct CachedExtractor<E: EntityExtractor> {
    inner: E,
    cache: Mutex<lru::LruCache<String, ExtractionResult>>,
}

impl<E: EntityExtractor> CachedExtractor<E> {
    pub fn new(inner: E, cache_size: usize) -> Self {
        Self {
            inner,
            cache: Mutex::new(lru::LruCache::new(
                NonZeroUsize::new(cache_size).unwrap_or(NonZeroUsize::new(1).unwrap()),
            )),
        }
    }

    fn key(text: &str) -> String {
        format!("{:x}", md5::compute(text))
    }
}

#[async_trait]
impl<E: EntityExtractor> EntityExtractor for CachedExtractor<E> {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ExtractorError> {
        let key = Self::key(text);
        if let Some(cached) = self.cache.lock().unwrap().get(&key) {
            return Ok(cached.clone());
        }
        let result = self.inner.extract(text).await?;
        self.cache.lock().unwrap().put(key, result.clone());
        Ok(result)
    }

    async fn extract_batch(&self, texts: &[String]) -> Result<Vec<ExtractionResult>, ExtractorError> {
        let mut results = vec![None; texts.len()];
        let mut missing_idx = Vec::new();
        let mut missing_texts = Vec::new();

        for (i, text) in texts.iter().enumerate() {
            let key = Self::key(text);
            if let Some(cached) = self.cache.lock().unwrap().get(&key) {
                results[i] = Some(cached.clone());
            } else {
                missing_idx.push(i);
                missing_texts.push(text.clone());
            }
        }

        if !missing_texts.is_empty() {
            let fetched = self.inner.extract_batch(&missing_texts).await?;
            for (idx, result) in missing_idx.into_iter().zip(fetched.into_iter()) {
                self.cache.lock().unwrap().put(Self::key(&texts[idx]), result.clone());
                results[idx] = Some(result);
            }
        }

        Ok(results.into_iter().map(|r| r.expect("every index filled")).collect())
    }
}

/// Tries each extractor in order, falling back to the next on error. The
/// graph provider wires this as `[configured LLM extractor, regex fallback]`
/// so a transient extractor outage degrades to the regex path instead of
/// failing ingestion.
pub struct CompositeExtractor {
    extractors: Vec<Box<dyn EntityExtractor>>,
}

impl CompositeExtractor {
    pub fn new(extractors: Vec<Box<dyn EntityExtractor>>) -> Self {
        Self { extractors }
    }
}

#[async_trait]
impl EntityExtractor for CompositeExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ExtractorError> {
        let mut last_err = None;
        for extractor in &self.extractors {
            match extractor.extract(text).await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    tracing::warn!(error = %e, "extractor failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ExtractorError::Other("no extractors configured".to_string())))
    }

    async fn extract_batch(&self, texts: &[String]) -> Result<Vec<ExtractionResult>, ExtractorError> {
        let mut last_err = None;
        for extractor in &self.extractors {
            match extractor.extract_batch(texts).await {
                Ok(results) => return Ok(results),
                Err(e) => {
                    tracing::warn!(error = %e, "batch extractor failed, trying next");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ExtractorError::Other("no extractors configured".to_string())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nexus_types::{ExtractedMention, EntityType};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingExtractor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EntityExtractor for CountingExtractor {
        async fn extract(&self, _text: &str) -> Result<ExtractionResult, ExtractorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ExtractionResult {
                mentions: vec![ExtractedMention {
                    entity_type: EntityType::Person,
                    surface_form: "Ada".to_string(),
                    char_start: 0,
                    char_end: 3,
                    confidence: 0.9,
                }],
                relations: vec![],
            })
        }
    }

    struct FailingExtractor;

    #[async_trait]
    impl EntityExtractor for FailingExtractor {
        async fn extract(&self, _text: &str) -> Result<ExtractionResult, ExtractorError> {
            Err(ExtractorError::Other("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn cache_hit_skips_inner_call() {
        let inner = CountingExtractor { calls: AtomicUsize::new(0) };
        let cached = CachedExtractor::new(inner, 10);
        cached.extract("same text").await.unwrap();
        cached.extract("same text").await.unwrap();
        assert_eq!(cached.inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn composite_falls_back_on_error() {
        let composite = CompositeExtractor::new(vec![
            Box::new(FailingExtractor),
            Box::new(CountingExtractor { calls: AtomicUsize::new(0) }),
        ]);
        let result = composite.extract("text").await.unwrap();
        assert_eq!(result.mentions.len(), 1);
    }

    #[tokio::test]
    async fn composite_errors_when_all_fail() {
        let composite = CompositeExtractor::new(vec![Box::new(FailingExtractor), Box::new(FailingExtractor)]);
        assert!(composite.extract("text").await.is_err());
    }
}
