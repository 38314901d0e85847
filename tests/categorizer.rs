//! Categorizer against fake providers: embedding match, LLM fallback, memoization

mod common;

use std::sync::Arc;

use common::{categories, configured_settings, KeywordEmbedder, ScriptedCompleter};
use tabgrove_lib::cache::{CacheNamespace, MemoryCache};
use tabgrove_lib::categorizer::{Categorizer, NONE_CATEGORY};
use tabgrove_lib::settings::MODEL_ENV;
use tabgrove_lib::Error;

fn categorizer(
    embedder: &Arc<KeywordEmbedder>,
    completer: &Arc<ScriptedCompleter>,
    cache: &Arc<MemoryCache>,
) -> Categorizer {
    let settings = configured_settings(&["News", "Sports"]);
    Categorizer::new(embedder.clone(), completer.clone(), cache.clone(), &settings)
}

#[tokio::test]
async fn test_confident_embedding_match_skips_llm() {
    let embedder = KeywordEmbedder::new(&["news", "sports"]);
    let completer = ScriptedCompleter::constant("sports");
    let cache = Arc::new(MemoryCache::new());
    let c = categorizer(&embedder, &completer, &cache);

    let result = c
        .categorize("https://bbc.com/news", "BBC News - World", "", &categories(&["News", "Sports"]))
        .await;

    assert_eq!(result.as_deref(), Some("news"));
    assert_eq!(embedder.calls(), 1);
    assert_eq!(completer.calls(), 0);
}

#[tokio::test]
async fn test_embedding_failure_falls_back_to_llm_once() {
    let embedder = KeywordEmbedder::new(&["news", "sports"]);
    embedder.set_failing(true);
    let completer = ScriptedCompleter::constant("  Sports \n");
    let cache = Arc::new(MemoryCache::new());
    let c = categorizer(&embedder, &completer, &cache);

    let result = c
        .categorize("https://espn.com", "Scores", "", &categories(&["News", "Sports"]))
        .await;

    assert_eq!(result.as_deref(), Some("sports"));
    assert_eq!(completer.calls(), 1);
}

#[tokio::test]
async fn test_both_providers_down_yields_none_and_is_not_memoized() {
    let embedder = KeywordEmbedder::new(&["news", "sports"]);
    embedder.set_failing(true);
    let completer = ScriptedCompleter::failing();
    let cache = Arc::new(MemoryCache::new());
    let c = categorizer(&embedder, &completer, &cache);

    let cats = categories(&["News", "Sports"]);
    assert_eq!(c.categorize("https://a.example", "Something", "", &cats).await, None);
    assert_eq!(cache.len(CacheNamespace::Category).await, 0);

    // Still retried on the next call
    assert_eq!(c.categorize("https://a.example", "Something", "", &cats).await, None);
    assert_eq!(completer.calls(), 2);
}

#[tokio::test]
async fn test_second_identical_call_is_pure_cache_hit() {
    let embedder = KeywordEmbedder::new(&["news", "sports"]);
    let completer = ScriptedCompleter::constant("news");
    let cache = Arc::new(MemoryCache::new());
    let c = categorizer(&embedder, &completer, &cache);
    let cats = categories(&["News", "Sports"]);

    // Low-confidence embedding, so both providers are used once
    let first = c.categorize("https://example.org/page", "Weekly digest", "", &cats).await;
    assert_eq!(first.as_deref(), Some("news"));
    assert_eq!(embedder.calls() + completer.calls(), 2);

    let second = c.categorize("https://example.org/page", "Weekly digest", "", &cats).await;
    assert_eq!(second, first);
    assert_eq!(embedder.calls() + completer.calls(), 2);
}

#[tokio::test]
async fn test_cache_key_ignores_case_and_whitespace() {
    let embedder = KeywordEmbedder::new(&["news", "sports"]);
    let completer = ScriptedCompleter::constant("none");
    let cache = Arc::new(MemoryCache::new());
    let c = categorizer(&embedder, &completer, &cache);

    assert_eq!(
        c.categorize("HTTPS://Example.org/Page", "  Weekly Digest ", "", &categories(&["NEWS", "sports"]))
            .await,
        None
    );
    let calls = embedder.calls() + completer.calls();

    assert_eq!(
        c.categorize("https://example.org/page", "weekly digest", "", &categories(&["news", "Sports"]))
            .await,
        None
    );
    assert_eq!(embedder.calls() + completer.calls(), calls);
}

#[tokio::test]
async fn test_none_decision_is_memoized() {
    let embedder = KeywordEmbedder::new(&["news", "sports"]);
    let completer = ScriptedCompleter::constant("None");
    let cache = Arc::new(MemoryCache::new());
    let c = categorizer(&embedder, &completer, &cache);
    let cats = categories(&["News", "Sports"]);

    let raw = c.decide("https://recipes.example", "Pasta", "", &cats).await.unwrap();
    assert_eq!(raw, NONE_CATEGORY);
    assert_eq!(cache.len(CacheNamespace::Category).await, 1);

    assert_eq!(c.categorize("https://recipes.example", "Pasta", "", &cats).await, None);
    assert_eq!(completer.calls(), 1);
}

#[tokio::test]
async fn test_low_confidence_match_still_consults_llm() {
    // The tab mentions neither keyword: best similarity is below the threshold
    let embedder = KeywordEmbedder::new(&["news", "sports"]);
    let completer = ScriptedCompleter::constant("Sports");
    let cache = Arc::new(MemoryCache::new());
    let c = categorizer(&embedder, &completer, &cache);

    let result = c
        .categorize("https://nba.com/scores", "Lakers box score", "", &categories(&["News", "Sports"]))
        .await;
    assert_eq!(result.as_deref(), Some("sports"));
    assert_eq!(embedder.calls(), 1);
    assert_eq!(completer.calls(), 1);
}

#[tokio::test]
async fn test_aux_text_reaches_prompt() {
    let embedder = KeywordEmbedder::new(&["news", "sports"]);
    let completer = ScriptedCompleter::constant("none");
    let cache = Arc::new(MemoryCache::new());
    let c = categorizer(&embedder, &completer, &cache);

    c.categorize("https://bank.example", "Mortgage calculator", "Current Rates", &categories(&["News"]))
        .await;

    let prompts = completer.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0][1].content.contains("Page description: current rates"));
}

#[tokio::test]
async fn test_missing_model_skips_network() {
    if std::env::var(MODEL_ENV).is_ok() {
        return;
    }
    let embedder = KeywordEmbedder::new(&["news"]);
    let completer = ScriptedCompleter::constant("news");
    let cache = Arc::new(MemoryCache::new());
    let mut settings = configured_settings(&["News"]);
    settings.model = None;
    let c = Categorizer::new(embedder.clone(), completer.clone(), cache, &settings);

    let result = c.categorize("https://bbc.com/news", "BBC News", "", &categories(&["News"])).await;
    assert_eq!(result, None);
    assert_eq!(embedder.calls(), 0);
    assert_eq!(completer.calls(), 0);
}

#[tokio::test]
async fn test_empty_category_list() {
    let embedder = KeywordEmbedder::new(&["news"]);
    let completer = ScriptedCompleter::constant("news");
    let cache = Arc::new(MemoryCache::new());
    let c = categorizer(&embedder, &completer, &cache);

    assert_eq!(c.categorize("https://bbc.com/news", "BBC News", "", &[]).await, None);
    assert!(matches!(
        c.decide("https://bbc.com/news", "BBC News", "", &categories(&["  "])).await,
        Err(Error::InvalidInput(_))
    ));
    assert_eq!(embedder.calls() + completer.calls(), 0);
}

#[tokio::test]
async fn test_concurrent_categorization() {
    let embedder = KeywordEmbedder::new(&["news", "sports"]);
    let completer = ScriptedCompleter::constant("none");
    let cache = Arc::new(MemoryCache::new());
    let c = categorizer(&embedder, &completer, &cache);
    let cats = categories(&["News", "Sports"]);

    let (a, b, d) = tokio::join!(
        c.categorize("https://bbc.com/news", "BBC News", "", &cats),
        c.categorize("https://espn.com/sports", "ESPN Sports", "", &cats),
        c.categorize("https://kernel.org", "Linux kernel", "", &cats),
    );
    assert_eq!(a.as_deref(), Some("news"));
    assert_eq!(b.as_deref(), Some("sports"));
    assert_eq!(d, None);
}
