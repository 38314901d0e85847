//! Embedding and completion providers
//!
//! The pipeline only sees two traits: `EmbeddingProvider` (ordered batch of
//! texts -> ordered batch of vectors) and `CompletionProvider` (chat messages ->
//! short trimmed text). `OpenAiClient` implements both against any
//! OpenAI-compatible endpoint; tests inject counting fakes.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{cache_key, get_typed, put_typed, CacheNamespace, CacheStore};
use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::utils::safe_truncate;

/// Chat-style message
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed an ordered batch; the result has one vector per input, in order.
    async fn fetch_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Run a chat completion and return the trimmed text content.
    async fn fetch_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String>;
}

// ==================== Timeouts ====================

/// Bound a fallible call; expiry becomes `Error::Timeout`
pub async fn bounded<T, F>(limit: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::Timeout(limit.as_millis() as u64)),
    }
}

/// Bound an optional enrichment step; expiry yields `fallback` instead of blocking
pub async fn with_timeout_or<T, F>(limit: Duration, fallback: T, fut: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, fut).await.unwrap_or(fallback)
}

// ==================== Response parsing ====================

/// Parse a JSON payload out of free-form model output.
///
/// Tries the raw text, then the body of a markdown code fence, then the outermost
/// `{...}` span.
pub fn extract_json<T: DeserializeOwned>(text: &str) -> Result<T> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    if trimmed.starts_with("```") {
        let fenced = trimmed
            .lines()
            .skip(1)
            .take_while(|l| !l.starts_with("```"))
            .collect::<Vec<_>>()
            .join("\n");
        if let Ok(value) = serde_json::from_str::<T>(&fenced) {
            return Ok(value);
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<T>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    Err(Error::MalformedResponse(format!(
        "no JSON object found in: {}",
        safe_truncate(trimmed, 120)
    )))
}

// ==================== OpenAI-compatible client ====================

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    embedding_model: String,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(api_key: &str, base_url: &str, embedding_model: &str, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            embedding_model: embedding_model.to_string(),
            timeout,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let api_key = settings
            .api_key()
            .ok_or_else(|| Error::Config(format!("{} not set", crate::settings::API_KEY_ENV)))?;
        Ok(Self::new(
            &api_key,
            &settings.api_base_url,
            &settings.embedding_model,
            settings.request_timeout(),
        ))
    }

    async fn post_json<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        path: &str,
        body: &Req,
    ) -> Result<Resp> {
        let response = self
            .http
            .post(format!("{}/{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "API error {}: {}",
                status,
                safe_truncate(&body, 200)
            )));
        }

        let text = response.text().await?;
        serde_json::from_str(&text)
            .map_err(|e| Error::MalformedResponse(format!("{}: {}", e, safe_truncate(&text, 120))))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    async fn fetch_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(Error::InvalidInput("embedding batch is empty".into()));
        }

        let request = EmbeddingRequest {
            model: &self.embedding_model,
            input: texts,
        };
        let response: EmbeddingResponse =
            bounded(self.timeout, self.post_json("embeddings", &request)).await?;

        let mut data = response.data;
        if data.len() != texts.len() {
            return Err(Error::Provider(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                data.len()
            )));
        }
        data.sort_by_key(|d| d.index);
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl CompletionProvider for OpenAiClient {
    async fn fetch_completion(
        &self,
        model: &str,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String> {
        let request = ChatRequest {
            model,
            messages,
            max_tokens,
            temperature: 0.0,
        };
        let response: ChatResponse =
            bounded(self.timeout, self.post_json("chat/completions", &request)).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| Error::Provider("no completion content in response".into()))
    }
}

// ==================== Cached embeddings ====================

/// Memoizes whole embedding batches, keyed by the exact text array
pub struct CachedEmbedder {
    inner: Arc<dyn EmbeddingProvider>,
    cache: Arc<dyn CacheStore>,
}

impl CachedEmbedder {
    pub fn new(inner: Arc<dyn EmbeddingProvider>, cache: Arc<dyn CacheStore>) -> Self {
        Self { inner, cache }
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbedder {
    async fn fetch_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let key = cache_key(texts)?;
        if let Some(hit) =
            get_typed::<Vec<Vec<f32>>>(self.cache.as_ref(), CacheNamespace::Embedding, &key).await
        {
            if hit.len() == texts.len() {
                tracing::debug!("Embedding cache hit for {} texts", texts.len());
                return Ok(hit);
            }
        }

        let vectors = self.inner.fetch_embeddings(texts).await?;
        if vectors.len() != texts.len() {
            return Err(Error::Provider(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        put_typed(self.cache.as_ref(), CacheNamespace::Embedding, &key, &vectors).await;
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Deserialize)]
    struct Label {
        label: String,
    }

    #[test]
    fn test_extract_json_direct() {
        let parsed: Label = extract_json(r#"{"label": "Rust Docs"}"#).unwrap();
        assert_eq!(parsed.label, "Rust Docs");
    }

    #[test]
    fn test_extract_json_markdown_fence() {
        let parsed: Label = extract_json("```json\n{\"label\": \"Recipes\"}\n```").unwrap();
        assert_eq!(parsed.label, "Recipes");
    }

    #[test]
    fn test_extract_json_embedded_in_prose() {
        let parsed: Value =
            extract_json("Sure! Here you go: {\"groups\": {\"news\": [1, 2]}} Hope that helps.").unwrap();
        assert_eq!(parsed["groups"]["news"][1], 2);
    }

    #[test]
    fn test_extract_json_failure_is_descriptive() {
        let err = extract_json::<Label>("no json here").unwrap_err();
        match err {
            Error::MalformedResponse(msg) => assert!(msg.contains("no json here")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_with_timeout_or_returns_fallback() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            "late".to_string()
        };
        let value = with_timeout_or(Duration::from_millis(10), String::new(), slow).await;
        assert!(value.is_empty());
    }

    #[tokio::test]
    async fn test_bounded_maps_expiry_to_timeout() {
        let slow = async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, Error>(1)
        };
        let err = bounded(Duration::from_millis(10), slow).await.unwrap_err();
        assert!(matches!(err, Error::Timeout(10)));
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingEmbedder {
        async fn fetch_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[tokio::test]
    async fn test_cached_embedder_reuses_batches() {
        let inner = Arc::new(CountingEmbedder { calls: AtomicUsize::new(0) });
        let cached = CachedEmbedder::new(inner.clone(), Arc::new(MemoryCache::new()));
        let texts = vec!["a".to_string(), "bb".to_string()];

        let first = cached.fetch_embeddings(&texts).await.unwrap();
        let second = cached.fetch_embeddings(&texts).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);

        // A different batch is a different key
        cached.fetch_embeddings(&texts[..1]).await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_chat_message_constructors() {
        assert_eq!(ChatMessage::user("hi").role, "user");
        assert_eq!(ChatMessage::system("rules").role, "system");
    }
}
