//! Leftover-tab clustering - embedding-based, average linkage
//!
//! Tabs that matched no category are embedded (title + url), merged bottom-up
//! while the closest pair of clusters is nearer than the distance threshold, and
//! each multi-member cluster is named by the LLM and materialized as a native
//! group. Labels are unique within one run.
//!
//! The merge loop rescans every cluster pair after each merge: O(n^3) over n
//! leftover tabs. Fine for a browser's worth of tabs (low hundreds); past
//! `LARGE_LEFTOVER_SET` a warning is logged so slow passes are explainable.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ai_client::{extract_json, ChatMessage, CompletionProvider, EmbeddingProvider};
use crate::error::Result;
use crate::host::{GroupUpdate, TabHost};
use crate::similarity::cosine_distance;
use crate::tabs::{normalize_category, GroupColor, GroupId, TabDescriptor, TabId};
use crate::utils::truncate_chars;

const LARGE_LEFTOVER_SET: usize = 300;

/// Short label: a couple of words
const LABEL_MAX_TOKENS: u32 = 12;

/// Labels that say nothing about the tabs; treated like collisions
const GENERIC_LABELS: &[&str] = &[
    "misc", "miscellaneous", "other", "others", "general", "various", "tabs", "browsing",
    "websites", "web", "none", "untitled",
];

/// Stop words ignored when deriving a fallback label from titles
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with",
    "is", "are", "was", "were", "be", "how", "what", "why", "when", "your", "you", "my",
    "this", "that", "from", "by", "as", "it", "its", "new", "best", "top", "vs", "com",
    "www", "http", "https", "html", "home", "page", "official", "site", "login", "sign",
];

// ==================== Agglomerative clustering ====================

/// Average-linkage agglomerative clustering over an arbitrary distance.
///
/// Starts from singletons; repeatedly merges the globally closest pair while
/// its average cross-pair distance is below `threshold`. Returned clusters list
/// member indices in ascending order; clusters are ordered by first member.
pub fn agglomerative_cluster_by<F>(n: usize, distance: F, threshold: f32) -> Vec<Vec<usize>>
where
    F: Fn(usize, usize) -> f32,
{
    if n == 0 {
        return vec![];
    }

    // Precompute distance matrix
    let mut distances = vec![vec![0.0f32; n]; n];
    for i in 0..n {
        for j in (i + 1)..n {
            let d = distance(i, j);
            // NaN distances never merge
            let d = if d.is_nan() { f32::INFINITY } else { d };
            distances[i][j] = d;
            distances[j][i] = d;
        }
    }

    let mut clusters: Vec<Vec<usize>> = (0..n).map(|i| vec![i]).collect();

    while clusters.len() > 1 {
        let mut best: Option<(usize, usize, f32)> = None;

        for a in 0..clusters.len() {
            for b in (a + 1)..clusters.len() {
                let avg = average_linkage(&clusters[a], &clusters[b], &distances);
                match best {
                    Some((_, _, best_d)) if avg >= best_d => {}
                    _ => best = Some((a, b, avg)),
                }
            }
        }

        match best {
            Some((a, b, d)) if d < threshold => {
                let absorbed = clusters.remove(b);
                clusters[a].extend(absorbed);
                clusters[a].sort_unstable();
            }
            _ => break,
        }
    }

    clusters
}

/// Mean distance over all cross-cluster member pairs
fn average_linkage(a: &[usize], b: &[usize], distances: &[Vec<f32>]) -> f32 {
    let mut total = 0.0f64;
    for &i in a {
        for &j in b {
            total += distances[i][j] as f64;
        }
    }
    (total / (a.len() * b.len()) as f64) as f32
}

/// Agglomerative clustering of embeddings by cosine distance
pub fn agglomerative_cluster(embeddings: &[Vec<f32>], distance_threshold: f32) -> Vec<Vec<usize>> {
    agglomerative_cluster_by(
        embeddings.len(),
        |i, j| cosine_distance(&embeddings[i], &embeddings[j]),
        distance_threshold,
    )
}

// ==================== Labeling ====================

/// Asks the LLM for short, run-unique cluster names
pub struct ClusterLabeler {
    completer: Arc<dyn CompletionProvider>,
    model: Option<String>,
    max_attempts: usize,
}

#[derive(Deserialize)]
struct LabelReply {
    #[serde(alias = "title", alias = "name")]
    label: String,
}

impl ClusterLabeler {
    pub fn new(completer: Arc<dyn CompletionProvider>, model: Option<String>, max_attempts: usize) -> Self {
        Self {
            completer,
            model,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Label for `members`, distinct from every label in `used`.
    ///
    /// Re-asks on collision up to `max_attempts` times, then falls back to a
    /// keyword label with a numeric suffix. Never fails.
    pub async fn label(&self, members: &[TabDescriptor], used: &[String]) -> String {
        let messages = build_label_messages(members, used);
        let mut last_candidate: Option<String> = None;

        if let Some(model) = self.model.as_deref() {
            for attempt in 1..=self.max_attempts {
                let reply = match self.completer.fetch_completion(model, &messages, LABEL_MAX_TOKENS).await {
                    Ok(reply) => reply,
                    Err(e) => {
                        tracing::warn!("Cluster labeling failed on attempt {}: {}", attempt, e);
                        break;
                    }
                };

                let candidate = clean_label(&reply);
                if is_usable_label(&candidate, used) {
                    return candidate;
                }
                tracing::debug!("Label '{}' rejected on attempt {} (duplicate or generic)", candidate, attempt);
                if !candidate.is_empty() {
                    last_candidate = Some(candidate);
                }
            }
        }

        let base = last_candidate
            .filter(|c| !GENERIC_LABELS.contains(&c.as_str()))
            .unwrap_or_else(|| fallback_label(members));
        unique_with_suffix(&base, used)
    }
}

fn build_label_messages(members: &[TabDescriptor], used: &[String]) -> Vec<ChatMessage> {
    let titles = members
        .iter()
        .take(15)
        .map(|t| format!("- {}", truncate_chars(&t.title, 80)))
        .collect::<Vec<_>>()
        .join("\n");

    let mut hosts: Vec<&str> = Vec::new();
    for tab in members {
        if !tab.domain.is_empty() && !hosts.contains(&tab.domain.as_str()) {
            hosts.push(&tab.domain);
        }
    }

    let used_str = if used.is_empty() {
        "None".to_string()
    } else {
        used.join(", ")
    };

    let system = "You name groups of related browser tabs. Reply with a distinctive 1-2 word title \
                  and nothing else. Avoid generic names like \"Misc\", \"Other\" or \"General\"."
        .to_string();
    let user = format!(
        "Tab titles:\n{}\n\nSites: {}\n\nTitles already used (pick something different): {}",
        titles,
        hosts.join(", "),
        used_str
    );

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}

/// Normalize a model reply into a label: JSON or plain text, quotes and
/// punctuation stripped, at most two words, lower-cased
fn clean_label(reply: &str) -> String {
    let raw = match extract_json::<LabelReply>(reply) {
        Ok(parsed) => parsed.label,
        Err(_) => reply.lines().next().unwrap_or("").to_string(),
    };

    let stripped = raw
        .trim()
        .trim_start_matches(|c: char| c == '-' || c == '*' || c.is_whitespace())
        .trim_matches(|c: char| c == '"' || c == '\'' || c == '`' || c == '*')
        .trim_end_matches(|c: char| c == '.' || c == '!' || c == ':');

    let words: Vec<&str> = stripped.split_whitespace().take(2).collect();
    normalize_category(&words.join(" "))
}

fn is_usable_label(label: &str, used: &[String]) -> bool {
    !label.is_empty()
        && !GENERIC_LABELS.contains(&label)
        && !used.iter().any(|u| u == label)
}

/// Most frequent meaningful title word, else the most common site name
fn fallback_label(members: &[TabDescriptor]) -> String {
    let stop_set: HashSet<&str> = STOP_WORDS.iter().copied().collect();
    let mut counts: HashMap<String, usize> = HashMap::new();

    for tab in members {
        let words: HashSet<String> = tab
            .title
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() >= 3 && w.len() <= 25)
            .filter(|w| !stop_set.contains(w))
            .filter(|w| !w.chars().all(|c| c.is_numeric()))
            .map(String::from)
            .collect();
        for word in words {
            *counts.entry(word).or_insert(0) += 1;
        }
    }

    // Highest count, then alphabetical for determinism
    let best_word = counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map(|(w, _)| w);
    if let Some(word) = best_word {
        return word;
    }

    members
        .iter()
        .find_map(|t| t.domain.split('.').next().filter(|s| !s.is_empty()).map(String::from))
        .unwrap_or_else(|| "group".to_string())
}

/// `base`, or `base 2`, `base 3`, ... whichever is first unused
fn unique_with_suffix(base: &str, used: &[String]) -> String {
    if is_usable_label(base, used) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{} {}", base, n))
        .find(|candidate| !used.iter().any(|u| u == candidate))
        .unwrap_or_else(|| base.to_string())
}

// ==================== Orchestration ====================

/// One labeled multi-member cluster
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LabeledCluster {
    pub title: String,
    pub tab_ids: Vec<TabId>,
    /// None when the host refused to create the group
    pub group_id: Option<GroupId>,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusteringOutcome {
    pub clusters: Vec<LabeledCluster>,
    /// Leftovers that stayed alone (singleton clusters)
    pub ungrouped: Vec<TabId>,
    /// Another clustering pass was already running
    pub skipped: bool,
    /// Leftovers could not be embedded; nothing was clustered
    pub embedding_failed: bool,
}

/// Resets the in-flight flag when a pass ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct HierarchicalClusterer {
    host: Arc<dyn TabHost>,
    embedder: Arc<dyn EmbeddingProvider>,
    labeler: ClusterLabeler,
    in_flight: AtomicBool,
}

impl HierarchicalClusterer {
    pub fn new(host: Arc<dyn TabHost>, embedder: Arc<dyn EmbeddingProvider>, labeler: ClusterLabeler) -> Self {
        Self {
            host,
            embedder,
            labeler,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Cluster leftover tabs, label clusters, create a group per multi-member cluster.
    ///
    /// Fewer than two leftovers is a no-op. A second call while one is running is
    /// skipped rather than duplicating groups. Provider and host failures are
    /// logged; a failed cluster never stops the others.
    pub async fn cluster_and_label(
        &self,
        leftovers: &[TabDescriptor],
        distance_threshold: f32,
    ) -> Result<ClusteringOutcome> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!("Clustering already in progress, skipping");
            return Ok(ClusteringOutcome { skipped: true, ..Default::default() });
        }
        let _guard = InFlight(&self.in_flight);

        let mut outcome = ClusteringOutcome::default();
        if leftovers.len() < 2 {
            outcome.ungrouped = leftovers.iter().map(|t| t.id).collect();
            return Ok(outcome);
        }
        if leftovers.len() > LARGE_LEFTOVER_SET {
            tracing::warn!(
                "Clustering {} leftover tabs; the O(n^3) merge loop will be slow",
                leftovers.len()
            );
        }

        let texts: Vec<String> = leftovers
            .iter()
            .map(|t| format!("{}\n{}", t.title, t.url))
            .collect();
        let embeddings = match self.embedder.fetch_embeddings(&texts).await {
            Ok(v) if v.len() == texts.len() => v,
            Ok(v) => {
                tracing::warn!("Leftover embedding size mismatch: sent {}, got {}", texts.len(), v.len());
                outcome.ungrouped = leftovers.iter().map(|t| t.id).collect();
                outcome.embedding_failed = true;
                return Ok(outcome);
            }
            Err(e) => {
                tracing::warn!("Leftover embedding failed, leaving {} tabs ungrouped: {}", leftovers.len(), e);
                outcome.ungrouped = leftovers.iter().map(|t| t.id).collect();
                outcome.embedding_failed = true;
                return Ok(outcome);
            }
        };

        let clusters = agglomerative_cluster(&embeddings, distance_threshold);
        tracing::info!("Formed {} clusters from {} leftover tabs", clusters.len(), leftovers.len());

        let mut used_labels: Vec<String> = Vec::new();
        for indices in clusters {
            if indices.len() < 2 {
                outcome.ungrouped.extend(indices.iter().map(|&i| leftovers[i].id));
                continue;
            }

            let members: Vec<TabDescriptor> = indices.iter().map(|&i| leftovers[i].clone()).collect();
            let title = self.labeler.label(&members, &used_labels).await;
            used_labels.push(title.clone());

            let tab_ids: Vec<TabId> = members.iter().map(|t| t.id).collect();
            let group_id = self.materialize(&members, &tab_ids, &title).await;
            outcome.clusters.push(LabeledCluster { title, tab_ids, group_id });
        }

        Ok(outcome)
    }

    async fn materialize(&self, members: &[TabDescriptor], tab_ids: &[TabId], title: &str) -> Option<GroupId> {
        let member_titles = || {
            members.iter().map(|t| t.title.as_str()).collect::<Vec<_>>().join(", ")
        };

        let group_id = match self.host.group_tabs(tab_ids, None).await {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!("Could not create group '{}' for [{}]: {}", title, member_titles(), e);
                return None;
            }
        };

        let update = GroupUpdate {
            title: Some(title.to_string()),
            color: Some(GroupColor::for_label(title)),
        };
        if let Err(e) = self.host.update_group(group_id, update).await {
            tracing::warn!("Could not title group '{}' for [{}]: {}", title, member_titles(), e);
        }

        tracing::info!("Created group '{}' with {} tabs", title, tab_ids.len());
        Some(group_id)
    }
}
