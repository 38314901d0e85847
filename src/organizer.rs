//! One organizing pass over the live tab set
//!
//! 1. Ungrouped tabs are categorized concurrently against the configured
//!    categories (or, if none are configured, the titles of existing groups).
//! 2. In tab order, each categorized tab joins a matching existing group or gets
//!    a new group named after its category. Running this step sequentially lets a
//!    group created for one tab absorb later tabs of the same category.
//! 3. Uncategorized leftovers are clustered and labeled, unless the leftover set
//!    is unchanged since the previous pass.

use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;

use crate::ai_client::{with_timeout_or, CachedEmbedder, CompletionProvider, EmbeddingProvider};
use crate::cache::CacheStore;
use crate::categorizer::Categorizer;
use crate::clustering::{ClusterLabeler, HierarchicalClusterer, LabeledCluster};
use crate::error::Result;
use crate::host::{GroupUpdate, HostCapabilities, TabHost};
use crate::placement::GroupPlacer;
use crate::settings::Settings;
use crate::snapshot::{LeftoverSnapshot, SnapshotTracker};
use crate::tabs::{normalize_category, GroupColor, GroupId, TabDescriptor, TabId, TabScope, WindowId};

/// A group created for a categorized tab
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedGroup {
    pub title: String,
    pub group_id: GroupId,
    pub window_id: WindowId,
    pub tab_ids: Vec<TabId>,
}

/// Summary of one pass
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizeReport {
    /// Ungrouped tabs considered this pass
    pub candidates: usize,
    pub categorized: usize,
    /// Tabs added to groups that already existed before they were placed
    pub placed_existing: Vec<TabId>,
    pub created_groups: Vec<CreatedGroup>,
    pub clustered: Vec<LabeledCluster>,
    /// Tabs still ungrouped after the pass
    pub ungrouped: Vec<TabId>,
    /// Clustering skipped: leftover set unchanged or a pass already running
    pub clustering_skipped: bool,
}

pub struct TabOrganizer {
    host: Arc<dyn TabHost>,
    cache: Arc<dyn CacheStore>,
    categorizer: Categorizer,
    placer: GroupPlacer,
    clusterer: HierarchicalClusterer,
    snapshots: SnapshotTracker,
    settings: Settings,
    capabilities: HostCapabilities,
}

impl TabOrganizer {
    pub fn new(
        host: Arc<dyn TabHost>,
        embedder: Arc<dyn EmbeddingProvider>,
        completer: Arc<dyn CompletionProvider>,
        cache: Arc<dyn CacheStore>,
        settings: Settings,
        capabilities: HostCapabilities,
    ) -> Self {
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(CachedEmbedder::new(embedder, cache.clone()));

        let categorizer = Categorizer::new(embedder.clone(), completer.clone(), cache.clone(), &settings);
        let placer = GroupPlacer::new(host.clone(), embedder.clone(), settings.placement_threshold);
        let labeler = ClusterLabeler::new(completer, settings.model(), settings.label_attempts);
        let clusterer = HierarchicalClusterer::new(host.clone(), embedder, labeler);
        let snapshots = SnapshotTracker::new(cache.clone());

        Self {
            host,
            cache,
            categorizer,
            placer,
            clusterer,
            snapshots,
            settings,
            capabilities,
        }
    }

    /// Reset memoized state; call once at (re)initialization
    pub async fn initialize(&self) -> Result<()> {
        self.cache.clear().await?;
        tracing::info!("Caches cleared");
        Ok(())
    }

    pub fn categorizer(&self) -> &Categorizer {
        &self.categorizer
    }

    /// Categories for this pass: configured ones, else existing group titles
    pub async fn category_list(&self, scope: TabScope) -> Vec<String> {
        let configured = self.settings.categories();
        if !configured.is_empty() {
            return configured;
        }

        let groups = match self.host.get_groups(scope).await {
            Ok(groups) => groups,
            Err(e) => {
                tracing::warn!("Could not list groups for category fallback: {}", e);
                return Vec::new();
            }
        };
        let mut titles: Vec<String> = Vec::new();
        for group in groups {
            let title = normalize_category(&group.title);
            if !title.is_empty() && !titles.contains(&title) {
                titles.push(title);
            }
        }
        titles
    }

    /// Run one organizing pass over `scope`
    pub async fn organize(&self, scope: TabScope) -> Result<OrganizeReport> {
        let mut report = OrganizeReport::default();
        if !self.capabilities.tab_groups {
            tracing::warn!("Host has no tab groups; nothing to organize");
            return Ok(report);
        }

        let tabs = self.host.list_tabs(scope).await?;
        let candidates: Vec<TabDescriptor> = tabs.into_iter().filter(|t| !t.is_grouped()).collect();
        report.candidates = candidates.len();
        if candidates.is_empty() {
            return Ok(report);
        }

        let candidates = self.enrich_meta_text(candidates).await;
        let categories = self.category_list(scope).await;

        let decisions: Vec<Option<String>> = if categories.is_empty() {
            tracing::info!("No categories available; all {} tabs go to clustering", candidates.len());
            vec![None; candidates.len()]
        } else {
            join_all(
                candidates
                    .iter()
                    .map(|tab| self.categorizer.categorize_tab(tab, &categories)),
            )
            .await
        };

        let mut leftovers: Vec<TabDescriptor> = Vec::new();
        for (tab, decision) in candidates.into_iter().zip(decisions) {
            match decision {
                Some(category) => {
                    report.categorized += 1;
                    self.assign(&tab, &category, &mut report).await;
                }
                None => leftovers.push(tab),
            }
        }

        self.cluster_leftovers(scope, &leftovers, &mut report).await?;

        tracing::info!(
            "Pass complete: {} candidates, {} categorized, {} into existing groups, {} new groups, {} clusters, {} ungrouped",
            report.candidates,
            report.categorized,
            report.placed_existing.len(),
            report.created_groups.len(),
            report.clustered.len(),
            report.ungrouped.len()
        );
        Ok(report)
    }

    /// Fill empty meta text from the host, bounded so a slow page never stalls the pass
    async fn enrich_meta_text(&self, tabs: Vec<TabDescriptor>) -> Vec<TabDescriptor> {
        let limit = self.settings.meta_timeout();
        join_all(tabs.into_iter().map(|tab| async move {
            if !tab.meta_text.is_empty() {
                return tab;
            }
            let fetch = async {
                self.host.page_meta_text(tab.id).await.unwrap_or_else(|e| {
                    tracing::debug!("No meta text for '{}': {}", tab.title, e);
                    String::new()
                })
            };
            let meta = with_timeout_or(limit, String::new(), fetch).await;
            tab.with_meta_text(&meta)
        }))
        .await
    }

    async fn assign(&self, tab: &TabDescriptor, category: &str, report: &mut OrganizeReport) {
        if let Some(created) = report
            .created_groups
            .iter_mut()
            .find(|g| g.title == category && g.window_id == tab.window_id)
        {
            // Same-pass group for this category in this window: join it directly
            match self.host.group_tabs(&[tab.id], Some(created.group_id)).await {
                Ok(_) => {
                    created.tab_ids.push(tab.id);
                    return;
                }
                Err(e) => {
                    tracing::warn!("Could not add '{}' to new group '{}': {}", tab.title, category, e);
                }
            }
        }

        if self.placer.place_in_existing_group(tab, category).await {
            report.placed_existing.push(tab.id);
            return;
        }

        match self.create_group(tab, category).await {
            Ok(group_id) => report.created_groups.push(CreatedGroup {
                title: category.to_string(),
                group_id,
                window_id: tab.window_id,
                tab_ids: vec![tab.id],
            }),
            Err(e) => {
                tracing::warn!("Could not create group '{}' for '{}': {}", category, tab.title, e);
                report.ungrouped.push(tab.id);
            }
        }
    }

    async fn create_group(&self, tab: &TabDescriptor, category: &str) -> Result<GroupId> {
        let group_id = self.host.group_tabs(&[tab.id], None).await?;
        let update = GroupUpdate {
            title: Some(category.to_string()),
            color: Some(GroupColor::for_label(category)),
        };
        if let Err(e) = self.host.update_group(group_id, update).await {
            tracing::warn!("Could not title new group '{}': {}", category, e);
        }
        tracing::info!("Created group '{}' for '{}'", category, tab.title);
        Ok(group_id)
    }

    async fn cluster_leftovers(
        &self,
        scope: TabScope,
        leftovers: &[TabDescriptor],
        report: &mut OrganizeReport,
    ) -> Result<()> {
        if leftovers.len() < 2 {
            report.ungrouped.extend(leftovers.iter().map(|t| t.id));
            return Ok(());
        }

        let snapshot = LeftoverSnapshot::from_tabs(leftovers);
        if !self.snapshots.has_changed(scope, &snapshot).await {
            tracing::info!("Leftover set unchanged ({} tabs), skipping clustering", snapshot.len());
            report.clustering_skipped = true;
            report.ungrouped.extend(leftovers.iter().map(|t| t.id));
            return Ok(());
        }

        let outcome = self
            .clusterer
            .cluster_and_label(leftovers, self.settings.cluster_distance_threshold)
            .await?;
        if outcome.skipped {
            report.clustering_skipped = true;
            report.ungrouped.extend(leftovers.iter().map(|t| t.id));
            return Ok(());
        }

        if outcome.embedding_failed {
            // Not recorded: the next pass retries once the provider is back
            report.ungrouped.extend(outcome.ungrouped);
            return Ok(());
        }

        // Tabs of clusters the host refused to group are still loose
        let mut remaining: Vec<TabId> = outcome.ungrouped.clone();
        for cluster in &outcome.clusters {
            if cluster.group_id.is_none() {
                remaining.extend(cluster.tab_ids.iter().copied());
            }
        }
        let remaining_tabs = leftovers.iter().filter(|t| remaining.contains(&t.id));
        self.snapshots.record(scope, &LeftoverSnapshot::from_tabs(remaining_tabs)).await;

        report.ungrouped.extend(remaining);
        report.clustered.extend(outcome.clusters.into_iter().filter(|c| c.group_id.is_some()));
        Ok(())
    }
}
