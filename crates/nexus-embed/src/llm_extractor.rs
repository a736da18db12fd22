//! LLM-backed bulk entity/relation extractor (§4.4 "bulk path"): calls an
//! OpenAI-compatible chat-completion endpoint and asks it to return named
//! entities and candidate relations as JSON.

use async_trait::async_trait;
use nexus_types::{EntityType, ExtractedMention, ExtractedRelation, ExtractionResult, ExtractorError};
use serde::{Deserialize, Serialize};

const DEFAULT_SYSTEM_PROMPT: &str = r#"You are an expert named entity recognition system.
Extract all named entities and relationships between them from the given text.

Entity types: person, organization, technology, location, concept, event, product, other.
Relationship types: works_for, uses, part_of, mentions, relates_to, caused_by, located_in, created_by
(anything else is accepted verbatim as a custom type).

Output strict JSON, no prose:
{
  "entities": [
    {"text": "original surface form", "entity_type": "person", "start": 0, "end": 10, "confidence": 0.95}
  ],
  "relations": [
    {"source_text": "entity A", "target_text": "entity B", "relation_type": "works_for", "confidence": 0.9}
  ]
}
"#;

#[derive(Debug, Clone)]
pub struct LlmExtractorConfig {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f64,
    pub system_prompt: String,
    /// Memories per batch sent to the API concurrently (§4.4 bulk path).
    pub batch_size: usize,
}

impl Default for LlmExtractorConfig {
    fn default() -> Self {
        Self {
            api_url: "https://api.openai.com/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-4o".to_string(),
            temperature: 0.0,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            batch_size: 10,
        }
    }
}

/// LLM-backed extractor used as the primary path when an API key is configured.
pub struct LlmEntityExtractor {
    client: reqwest::Client,
    config: LlmExtractorConfig,
}

impl LlmEntityExtractor {
    pub fn new(config: LlmExtractorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Reads `NER_API_URL`, `NER_API_KEY`, `NER_MODEL`. Returns `None` if no
    /// key is configured — callers fall back to the regex extractor.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("NER_API_KEY").ok()?;
        let api_url = std::env::var("NER_API_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1/chat/completions".to_string());
        let model = std::env::var("NER_MODEL").unwrap_or_else(|_| "gpt-4o".to_string());
        Some(Self::new(LlmExtractorConfig {
            api_url,
            api_key: Some(api_key),
            model,
            ..LlmExtractorConfig::default()
        }))
    }

    fn build_prompt(text: &str) -> String {
        format!("Extract named entities and relations from this text:\n\n{text}\n\nRespond with JSON only.")
    }

    async fn call(&self, text: &str) -> Result<ExtractionResult, ExtractorError> {
        let messages = vec![
            ChatMessage { role: "system", content: &self.config.system_prompt },
            ChatMessage { role: "user", content: &Self::build_prompt(text) },
        ];
        let request = ChatRequest {
            model: &self.config.model,
            messages: &messages,
            temperature: Some(self.config.temperature),
            response_format: ResponseFormat { kind: "json_object" },
        };

        let mut req = self.client.post(&self.config.api_url);
        if let Some(ref key) = self.config.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractorError::Other(format!("NER API request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractorError::Other(format!("NER API error {status}: {body}")));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractorError::Other(format!("NER API response parse error: {e}")))?;

        let content = parsed
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| ExtractorError::Other("empty NER API response".to_string()))?;

        let json_str = extract_json_object(content)
            .ok_or_else(|| ExtractorError::Other("no JSON object in NER API response".to_string()))?;
        let api: NerApiResponse = serde_json::from_str(json_str)
            .map_err(|e| ExtractorError::Other(format!("NER JSON parse error: {e}")))?;

        let mentions = api
            .entities
            .into_iter()
            .map(|e| ExtractedMention {
                entity_type: EntityType::from_str_loose(&e.entity_type),
                surface_form: e.text,
                char_start: e.start,
                char_end: e.end,
                confidence: e.confidence as f32,
            })
            .collect();
        let relations = api
            .relations
            .into_iter()
            .map(|r| ExtractedRelation {
                from_surface: r.source_text,
                to_surface: r.target_text,
                relationship_type: nexus_types::RelationshipType::from_str_loose(&r.relation_type),
                confidence: r.confidence as f32,
            })
            .collect();

        Ok(ExtractionResult { mentions, relations })
    }
}

#[async_trait]
impl nexus_types::EntityExtractor for LlmEntityExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractionResult, ExtractorError> {
        self.call(text).await
    }

    /// Batches of `batch_size` run concurrently; a single item's failure is
    /// logged and contributes an empty extraction rather than failing the batch.
    async fn extract_batch(&self, texts: &[String]) -> Result<Vec<ExtractionResult>, ExtractorError> {
        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.config.batch_size) {
            let futures: Vec<_> = chunk.iter().map(|t| self.call(t)).collect();
            for outcome in futures::future::join_all(futures).await {
                match outcome {
                    Ok(r) => results.push(r),
                    Err(e) => {
                        tracing::error!(error = %e, "bulk extraction failed for item, continuing");
                        results.push(ExtractionResult::default());
                    }
                }
            }
        }
        Ok(results)
    }
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage<'a>],
    temperature: Option<f64>,
    response_format: ResponseFormat,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NerApiResponse {
    entities: Vec<NerApiEntity>,
    #[serde(default)]
    relations: Vec<NerApiRelation>,
}

#[derive(Debug, Deserialize)]
struct NerApiEntity {
    text: String,
    entity_type: String,
    start: usize,
    end: usize,
    confidence: f64,
}

#[derive(Debug, Deserialize)]
struct NerApiRelation {
    source_text: String,
    target_text: String,
    relation_type: String,
    confidence: f64,
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_wrapped_in_prose() {
        let text = "Here you go:\n{\"entities\": [], \"relations\": []}\nDone.";
        assert_eq!(extract_json_object(text), Some("{\"entities\": [], \"relations\": []}"));
    }

    #[test]
    fn no_json_returns_none() {
        assert_eq!(extract_json_object("no braces here"), None);
    }
}
