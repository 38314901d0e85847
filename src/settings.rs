//! Application settings storage
//!
//! Stores the provider credentials, category list and tuning thresholds in a JSON
//! file. Environment variables take precedence over stored credentials.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tabs::normalize_category;
use crate::utils::truncate_chars;

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const MODEL_ENV: &str = "TABGROVE_MODEL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub api_key: Option<String>,
    /// Completion model; categorization is skipped when unset
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    /// User-defined categories (empty = use existing group titles)
    #[serde(default)]
    pub category_list: Vec<String>,
    /// Minimum tab/category similarity accepted without asking the LLM
    #[serde(default = "default_categorize_threshold")]
    pub categorize_threshold: f32,
    /// Minimum category/group-title similarity for joining an existing group
    #[serde(default = "default_placement_threshold")]
    pub placement_threshold: f32,
    /// Maximum average-linkage distance at which leftover clusters merge
    #[serde(default = "default_cluster_distance_threshold")]
    pub cluster_distance_threshold: f32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_meta_timeout_ms")]
    pub meta_timeout_ms: u64,
    /// Labeling attempts per cluster before falling back to a numeric suffix
    #[serde(default = "default_label_attempts")]
    pub label_attempts: usize,
    /// Host exposes native tab groups
    #[serde(default = "default_true")]
    pub tab_groups_supported: bool,
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_api_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_categorize_threshold() -> f32 {
    0.6
}

fn default_placement_threshold() -> f32 {
    0.7
}

fn default_cluster_distance_threshold() -> f32 {
    0.3
}

fn default_request_timeout_secs() -> u64 {
    20
}

fn default_meta_timeout_ms() -> u64 {
    100
}

fn default_label_attempts() -> usize {
    5
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            model: None,
            embedding_model: default_embedding_model(),
            api_base_url: default_api_base_url(),
            category_list: Vec::new(),
            categorize_threshold: default_categorize_threshold(),
            placement_threshold: default_placement_threshold(),
            cluster_distance_threshold: default_cluster_distance_threshold(),
            request_timeout_secs: default_request_timeout_secs(),
            meta_timeout_ms: default_meta_timeout_ms(),
            label_attempts: default_label_attempts(),
            tab_groups_supported: true,
        }
    }
}

impl Settings {
    /// Default settings file: `<config dir>/tabgrove/settings.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tabgrove")
            .join("settings.json")
    }

    /// Load settings from disk or fall back to defaults
    pub fn load(path: &Path) -> Self {
        if !path.exists() {
            return Settings::default();
        }
        match fs::read_to_string(path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                tracing::warn!("Ignoring unreadable settings {}: {}", path.display(), e);
                Settings::default()
            }),
            Err(_) => Settings::default(),
        }
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, content)?;
        Ok(())
    }

    /// API key (env var first, then stored setting)
    pub fn api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.is_empty() {
                return Some(key);
            }
        }
        self.api_key.clone().filter(|k| !k.is_empty())
    }

    /// Completion model (env var first, then stored setting)
    pub fn model(&self) -> Option<String> {
        if let Ok(model) = std::env::var(MODEL_ENV) {
            if !model.is_empty() {
                return Some(model);
            }
        }
        self.model.clone().filter(|m| !m.is_empty())
    }

    /// Both an API key and a completion model are configured
    pub fn is_configured(&self) -> bool {
        self.api_key().is_some() && self.model().is_some()
    }

    /// Masked API key for display
    pub fn masked_api_key(&self) -> Option<String> {
        self.api_key().map(|key| mask_key(&key))
    }

    /// Normalized, de-duplicated user categories
    pub fn categories(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for name in &self.category_list {
            let name = normalize_category(name);
            if !name.is_empty() && !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn meta_timeout(&self) -> Duration {
        Duration::from_millis(self.meta_timeout_ms)
    }

    /// Reject thresholds outside their meaningful ranges
    pub fn validate(&self) -> Result<()> {
        let in_unit = |v: f32| (0.0..=1.0).contains(&v);
        if !in_unit(self.categorize_threshold) || !in_unit(self.placement_threshold) {
            return Err(Error::Config("similarity thresholds must be within 0.0..=1.0".into()));
        }
        if !(0.0..=2.0).contains(&self.cluster_distance_threshold) {
            return Err(Error::Config("cluster distance threshold must be within 0.0..=2.0".into()));
        }
        if self.label_attempts == 0 {
            return Err(Error::Config("label_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// First 8 / last 4 characters of a key, or all stars for short keys
fn mask_key(key: &str) -> String {
    let chars = key.chars().count();
    if chars <= 12 {
        return "*".repeat(chars);
    }
    let head = truncate_chars(key, 8);
    let tail = key
        .char_indices()
        .rev()
        .nth(3)
        .map(|(idx, _)| &key[idx..])
        .unwrap_or(key);
    format!("{}...{}", head, tail)
}
