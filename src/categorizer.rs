//! Single-tab categorization against a known category list
//!
//! Embeddings first: the tab text and every category are embedded in one batch
//! and the closest category wins if it clears the acceptance threshold. Anything
//! else (provider failure or a low-confidence best match) falls through to one
//! short LLM classification call. Decisions, including "none", are memoized per
//! normalized (url, title, aux text, categories) tuple.

use serde::Serialize;
use std::sync::Arc;

use crate::ai_client::{ChatMessage, CompletionProvider, EmbeddingProvider};
use crate::cache::{cache_key, get_typed, put_typed, CacheNamespace, CacheStore};
use crate::error::{Error, Result};
use crate::settings::Settings;
use crate::similarity::best_match;
use crate::tabs::{normalize_category, TabDescriptor};
use crate::utils::truncate_chars;

/// Sentinel decision for "no category fits"
pub const NONE_CATEGORY: &str = "none";

/// Only a category name is expected back
const CLASSIFY_MAX_TOKENS: u32 = 10;

/// Aux text beyond this adds cost without helping the match
const MAX_AUX_CHARS: usize = 500;

/// Canonical cache key material; field order is part of the key
#[derive(Serialize)]
struct DecisionKey<'a> {
    url: &'a str,
    title: &'a str,
    aux: &'a str,
    categories: &'a [String],
}

pub struct Categorizer {
    embedder: Arc<dyn EmbeddingProvider>,
    completer: Arc<dyn CompletionProvider>,
    cache: Arc<dyn CacheStore>,
    model: Option<String>,
    has_api_key: bool,
    threshold: f32,
}

impl Categorizer {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
        cache: Arc<dyn CacheStore>,
        settings: &Settings,
    ) -> Self {
        Self {
            embedder,
            completer,
            cache,
            model: settings.model(),
            has_api_key: settings.api_key().is_some(),
            threshold: settings.categorize_threshold,
        }
    }

    /// Category for a tab, or `None` when nothing fits.
    ///
    /// Missing credentials/model or an empty category list skip categorization
    /// without touching the network.
    pub async fn categorize(
        &self,
        url: &str,
        title: &str,
        aux_text: &str,
        categories: &[String],
    ) -> Option<String> {
        if !self.has_api_key || self.model.is_none() {
            tracing::debug!("Categorization skipped: API key or model not configured");
            return None;
        }
        if categories.is_empty() {
            tracing::debug!("Categorization skipped: no categories");
            return None;
        }

        match self.decide(url, title, aux_text, categories).await {
            Ok(decision) if decision.eq_ignore_ascii_case(NONE_CATEGORY) => None,
            Ok(decision) if decision.is_empty() => None,
            Ok(decision) => Some(decision),
            Err(e) => {
                tracing::warn!("Categorization failed for '{}': {}", title, e);
                None
            }
        }
    }

    pub async fn categorize_tab(&self, tab: &TabDescriptor, categories: &[String]) -> Option<String> {
        self.categorize(&tab.url, &tab.title, &tab.meta_text, categories).await
    }

    /// Raw decision: a category name or `NONE_CATEGORY`.
    ///
    /// Provider failures degrade (embedding -> LLM -> "none"); only an empty
    /// category list is an error.
    pub async fn decide(
        &self,
        url: &str,
        title: &str,
        aux_text: &str,
        categories: &[String],
    ) -> Result<String> {
        let categories: Vec<String> = categories
            .iter()
            .map(|c| normalize_category(c))
            .filter(|c| !c.is_empty())
            .collect();
        if categories.is_empty() {
            return Err(Error::InvalidInput("category list is empty".into()));
        }

        let url = url.trim().to_lowercase();
        let title = title.trim().to_lowercase();
        let aux = truncate_chars(aux_text.trim(), MAX_AUX_CHARS).to_lowercase();

        let key = cache_key(&DecisionKey {
            url: &url,
            title: &title,
            aux: &aux,
            categories: &categories,
        })?;
        if let Some(cached) = get_typed::<String>(self.cache.as_ref(), CacheNamespace::Category, &key).await {
            tracing::debug!("Category cache hit for '{}': {}", title, cached);
            return Ok(cached);
        }

        if let Some(category) = self.match_by_embedding(&url, &title, &aux, &categories).await {
            put_typed(self.cache.as_ref(), CacheNamespace::Category, &key, &category).await;
            return Ok(category);
        }

        match self.classify_with_llm(&url, &title, &aux, &categories).await {
            Ok(decision) => {
                put_typed(self.cache.as_ref(), CacheNamespace::Category, &key, &decision).await;
                Ok(decision)
            }
            Err(e) => {
                // Provider failures are not memoized; the next pass may succeed
                tracing::warn!("LLM categorization failed for '{}': {}", title, e);
                Ok(NONE_CATEGORY.to_string())
            }
        }
    }

    /// Closest category when it clears the threshold
    async fn match_by_embedding(
        &self,
        url: &str,
        title: &str,
        aux: &str,
        categories: &[String],
    ) -> Option<String> {
        let mut texts = Vec::with_capacity(categories.len() + 1);
        texts.push(combined_text(url, title, aux));
        texts.extend(categories.iter().cloned());

        let vectors = match self.embedder.fetch_embeddings(&texts).await {
            Ok(v) if v.len() == texts.len() => v,
            Ok(v) => {
                tracing::warn!("Embedding batch size mismatch: sent {}, got {}", texts.len(), v.len());
                return None;
            }
            Err(e) => {
                tracing::warn!("Embedding phase failed for '{}': {}", title, e);
                return None;
            }
        };

        let (idx, sim) = best_match(&vectors[0], &vectors[1..])?;
        tracing::debug!("Best embedding match for '{}': {} ({:.3})", title, categories[idx], sim);
        if sim > self.threshold {
            Some(categories[idx].clone())
        } else {
            None
        }
    }

    async fn classify_with_llm(
        &self,
        url: &str,
        title: &str,
        aux: &str,
        categories: &[String],
    ) -> Result<String> {
        let model = self
            .model
            .as_deref()
            .ok_or_else(|| Error::Config("completion model not set".into()))?;
        let messages = build_classification_messages(url, title, aux, categories);
        let reply = self
            .completer
            .fetch_completion(model, &messages, CLASSIFY_MAX_TOKENS)
            .await?;
        Ok(interpret_reply(&reply, categories))
    }
}

/// Text embedded for the tab side of the comparison
fn combined_text(url: &str, title: &str, aux: &str) -> String {
    [title, url, aux]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("\n")
}

fn build_classification_messages(url: &str, title: &str, aux: &str, categories: &[String]) -> Vec<ChatMessage> {
    let system = format!(
        "You sort browser tabs into categories. Reply with exactly one category from this list: {}. \
         If none of them fits, reply \"{}\". Reply with the category name only.",
        categories.join(", "),
        NONE_CATEGORY
    );

    let mut user = format!("Title: {}\nURL: {}", title, url);
    if !aux.is_empty() {
        user.push_str(&format!("\nPage description: {}", aux));
    }

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Normalize a model reply into a decision
///
/// Exact category names win; otherwise a reply mentioning exactly one category maps
/// to it. Anything else is returned normalized, as the model said it.
fn interpret_reply(reply: &str, categories: &[String]) -> String {
    let cleaned = normalize_category(
        reply
            .trim()
            .trim_matches(|c: char| c == '"' || c == '\'' || c == '`')
            .trim_end_matches('.'),
    );

    if cleaned.is_empty() || cleaned == NONE_CATEGORY {
        return NONE_CATEGORY.to_string();
    }
    if categories.iter().any(|c| *c == cleaned) {
        return cleaned;
    }

    let mentioned: Vec<&String> = categories.iter().filter(|c| cleaned.contains(c.as_str())).collect();
    if mentioned.len() == 1 {
        return mentioned[0].clone();
    }

    cleaned
}
