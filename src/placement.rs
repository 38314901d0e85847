//! Existing-group placement
//!
//! A categorized tab joins an existing native group when the category name embeds
//! close enough to the group's title (similarity above 0.7 by default, stricter
//! than the categorization threshold). Only groups in the tab's own window count.

use std::sync::Arc;

use crate::ai_client::EmbeddingProvider;
use crate::host::TabHost;
use crate::similarity::best_match;
use crate::tabs::{normalize_category, NativeGroup, TabDescriptor, TabScope};

pub struct GroupPlacer {
    host: Arc<dyn TabHost>,
    embedder: Arc<dyn EmbeddingProvider>,
    threshold: f32,
}

impl GroupPlacer {
    pub fn new(host: Arc<dyn TabHost>, embedder: Arc<dyn EmbeddingProvider>, threshold: f32) -> Self {
        Self { host, embedder, threshold }
    }

    /// Existing group in the tab's window whose title best matches `category`,
    /// if it clears the threshold
    pub async fn find_matching_group(&self, tab: &TabDescriptor, category: &str) -> Option<(NativeGroup, f32)> {
        let groups: Vec<NativeGroup> = match self.host.get_groups(TabScope::Window(tab.window_id)).await {
            Ok(groups) => groups.into_iter().filter(|g| !g.title.trim().is_empty()).collect(),
            Err(e) => {
                tracing::warn!("Could not list groups for '{}': {}", tab.title, e);
                return None;
            }
        };
        if groups.is_empty() {
            return None;
        }

        let mut texts = Vec::with_capacity(groups.len() + 1);
        texts.push(normalize_category(category));
        texts.extend(groups.iter().map(|g| normalize_category(&g.title)));

        let vectors = match self.embedder.fetch_embeddings(&texts).await {
            Ok(v) if v.len() == texts.len() => v,
            Ok(_) => {
                tracing::warn!("Embedding batch size mismatch while placing '{}'", tab.title);
                return None;
            }
            Err(e) => {
                tracing::warn!("Embedding group titles failed for '{}': {}", tab.title, e);
                return None;
            }
        };

        let (idx, sim) = best_match(&vectors[0], &vectors[1..])?;
        tracing::debug!("Best group for '{}' ({}): '{}' ({:.3})", tab.title, category, groups[idx].title, sim);
        if sim > self.threshold {
            Some((groups[idx].clone(), sim))
        } else {
            None
        }
    }

    /// Put `tab` into an existing group matching `category`.
    ///
    /// Returns false when the caller should create a new group instead: no groups,
    /// embedding failure, no confident match, or a failed host mutation.
    pub async fn place_in_existing_group(&self, tab: &TabDescriptor, category: &str) -> bool {
        let Some((group, _)) = self.find_matching_group(tab, category).await else {
            return false;
        };

        if tab.group_id == Some(group.id) {
            tracing::debug!("'{}' already in group '{}'", tab.title, group.title);
            return true;
        }

        match self.host.group_tabs(&[tab.id], Some(group.id)).await {
            Ok(_) => {
                tracing::info!("Placed '{}' into existing group '{}'", tab.title, group.title);
                true
            }
            Err(e) => {
                tracing::warn!("Could not add '{}' to group '{}': {}", tab.title, group.title, e);
                false
            }
        }
    }
}
