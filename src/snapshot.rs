//! Leftover-set change detection
//!
//! Clustering costs one embedding batch plus an LLM call per cluster. A pass
//! stores a canonical summary (sorted id/url pairs) of the tabs it left
//! ungrouped; the next pass skips clustering when the leftover set matches.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::cache::{get_typed, put_typed, CacheNamespace, CacheStore};
use crate::tabs::{TabDescriptor, TabId, TabScope};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeftoverSnapshot {
    entries: Vec<(TabId, String)>,
}

impl LeftoverSnapshot {
    pub fn from_tabs<'a, I>(tabs: I) -> Self
    where
        I: IntoIterator<Item = &'a TabDescriptor>,
    {
        let mut entries: Vec<(TabId, String)> = tabs.into_iter().map(|t| (t.id, t.url.clone())).collect();
        entries.sort();
        entries.dedup();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Remembers the last leftover snapshot per scope
pub struct SnapshotTracker {
    cache: Arc<dyn CacheStore>,
}

impl SnapshotTracker {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }

    fn key(scope: TabScope) -> String {
        match scope {
            TabScope::Window(w) => format!("window:{}", w.0),
            TabScope::AllWindows => "all".to_string(),
        }
    }

    /// True unless `snapshot` equals the last recorded snapshot for `scope`
    pub async fn has_changed(&self, scope: TabScope, snapshot: &LeftoverSnapshot) -> bool {
        let previous: Option<LeftoverSnapshot> =
            get_typed(self.cache.as_ref(), CacheNamespace::LeftoverSnapshot, &Self::key(scope)).await;
        previous.as_ref() != Some(snapshot)
    }

    pub async fn record(&self, scope: TabScope, snapshot: &LeftoverSnapshot) {
        put_typed(self.cache.as_ref(), CacheNamespace::LeftoverSnapshot, &Self::key(scope), snapshot).await;
    }
}
