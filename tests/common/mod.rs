//! Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tabgrove_lib::ai_client::{ChatMessage, CompletionProvider, EmbeddingProvider};
use tabgrove_lib::settings::Settings;
use tabgrove_lib::tabs::{GroupColor, GroupId, NativeGroup, TabDescriptor, TabId, WindowId};
use tabgrove_lib::{Error, Result};

const NOISE_DIMS: usize = 256;

/// Deterministic embedder: one axis per keyword; texts matching no keyword get
/// their own private axis, so unrelated texts are orthogonal.
pub struct KeywordEmbedder {
    keywords: Vec<String>,
    noise_axes: Mutex<HashMap<String, usize>>,
    calls: AtomicUsize,
    failing: AtomicBool,
    delay: Option<Duration>,
}

impl KeywordEmbedder {
    pub fn new(keywords: &[&str]) -> Arc<Self> {
        Arc::new(Self::build(keywords, None))
    }

    pub fn slow(keywords: &[&str], delay: Duration) -> Arc<Self> {
        Arc::new(Self::build(keywords, Some(delay)))
    }

    fn build(keywords: &[&str], delay: Option<Duration>) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            noise_axes: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            delay,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn embed(&self, text: &str) -> Vec<f32> {
        let lower = text.to_lowercase();
        let mut v = vec![0.0f32; self.keywords.len() + NOISE_DIMS];
        let mut matched = false;
        for (i, k) in self.keywords.iter().enumerate() {
            if lower.contains(k.as_str()) {
                v[i] = 1.0;
                matched = true;
            }
        }
        if !matched {
            let mut axes = self.noise_axes.lock().unwrap();
            let next = axes.len() % NOISE_DIMS;
            let axis = *axes.entry(lower).or_insert(next);
            v[self.keywords.len() + axis] = 1.0;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    async fn fetch_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Provider("embedding endpoint unavailable".into()));
        }
        Ok(texts.iter().map(|t| self.embed(t)).collect())
    }
}

/// Is this a cluster-naming prompt (vs. a classification prompt)?
pub fn is_label_prompt(messages: &[ChatMessage]) -> bool {
    messages.iter().any(|m| m.content.contains("name groups of related browser tabs"))
}

type Responder = Box<dyn Fn(&[ChatMessage], usize) -> Result<String> + Send + Sync>;

/// Completion fake driven by a closure over (messages, call index)
pub struct ScriptedCompleter {
    responder: Responder,
    calls: AtomicUsize,
    prompts: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedCompleter {
    pub fn new<F>(responder: F) -> Arc<Self>
    where
        F: Fn(&[ChatMessage], usize) -> Result<String> + Send + Sync + 'static,
    {
        Arc::new(Self {
            responder: Box::new(responder),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// Always answers `reply`
    pub fn constant(reply: &str) -> Arc<Self> {
        let reply = reply.to_string();
        Self::new(move |_, _| Ok(reply.clone()))
    }

    /// Always fails
    pub fn failing() -> Arc<Self> {
        Self::new(|_, _| Err(Error::Provider("completion endpoint unavailable".into())))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<Vec<ChatMessage>> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl CompletionProvider for ScriptedCompleter {
    async fn fetch_completion(&self, _model: &str, messages: &[ChatMessage], _max_tokens: u32) -> Result<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages.to_vec());
        (self.responder)(messages, n).map(|s| s.trim().to_string())
    }
}

pub fn configured_settings(categories: &[&str]) -> Settings {
    let mut settings = Settings::default();
    settings.api_key = Some("test-key".into());
    settings.model = Some("test-model".into());
    settings.category_list = categories.iter().map(|c| c.to_string()).collect();
    settings
}

pub fn tab(id: i64, title: &str, url: &str) -> TabDescriptor {
    TabDescriptor::new(TabId(id), WindowId(1), title, url)
}

pub fn group(id: i64, title: &str) -> NativeGroup {
    NativeGroup {
        id: GroupId(id),
        window_id: WindowId(1),
        title: title.to_string(),
        color: GroupColor::Blue,
    }
}

pub fn categories(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}
