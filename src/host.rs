//! Host browser collaborator: tab enumeration and native-group mutation
//!
//! Real hosts (a browser extension bridge, a remote-debugging adapter) implement
//! `TabHost`. `MemoryTabHost` keeps the same semantics in memory: used for
//! offline dry runs from a tab snapshot, and by the test suite.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::tabs::{GroupColor, GroupId, NativeGroup, TabDescriptor, TabId, TabScope, WindowId};

/// What the host environment supports, decided at construction time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostCapabilities {
    pub tab_groups: bool,
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self { tab_groups: true }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GroupUpdate {
    pub title: Option<String>,
    pub color: Option<GroupColor>,
}

#[async_trait]
pub trait TabHost: Send + Sync {
    async fn list_tabs(&self, scope: TabScope) -> Result<Vec<TabDescriptor>>;

    async fn get_groups(&self, scope: TabScope) -> Result<Vec<NativeGroup>>;

    /// Add tabs to `group_id`, or to a brand-new group when `None`.
    /// Grouping zero tabs is `Error::InvalidInput`.
    async fn group_tabs(&self, tab_ids: &[TabId], group_id: Option<GroupId>) -> Result<GroupId>;

    async fn update_group(&self, group_id: GroupId, update: GroupUpdate) -> Result<()>;

    /// Auxiliary page text (meta description etc.). Optional; may be slow.
    async fn page_meta_text(&self, _tab_id: TabId) -> Result<String> {
        Ok(String::new())
    }
}

/// A recorded host mutation
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mutation {
    GroupTabs {
        tab_ids: Vec<TabId>,
        group_id: GroupId,
        created: bool,
    },
    UpdateGroup {
        group_id: GroupId,
        update: GroupUpdate,
    },
}

/// Serialized host state
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostSnapshot {
    #[serde(default)]
    pub tabs: Vec<TabDescriptor>,
    #[serde(default)]
    pub groups: Vec<NativeGroup>,
    /// Windows that refuse grouping (popups, app windows)
    #[serde(default, rename = "ineligibleWindows")]
    pub ineligible_windows: Vec<WindowId>,
    /// Per-tab auxiliary text served by `page_meta_text`
    #[serde(default, rename = "metaText")]
    pub meta_text: HashMap<TabId, String>,
}

impl HostSnapshot {
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}

struct HostState {
    tabs: Vec<TabDescriptor>,
    groups: Vec<NativeGroup>,
    ineligible_windows: HashSet<WindowId>,
    meta_text: HashMap<TabId, String>,
    next_group_id: i64,
    mutations: Vec<Mutation>,
}

pub struct MemoryTabHost {
    state: Mutex<HostState>,
    meta_delay: Option<Duration>,
}

impl MemoryTabHost {
    pub fn new(snapshot: HostSnapshot) -> Self {
        let next_group_id = snapshot.groups.iter().map(|g| g.id.0).max().unwrap_or(0) + 1;
        Self {
            state: Mutex::new(HostState {
                tabs: snapshot.tabs,
                groups: snapshot.groups,
                ineligible_windows: snapshot.ineligible_windows.into_iter().collect(),
                meta_text: snapshot.meta_text,
                next_group_id,
                mutations: Vec::new(),
            }),
            meta_delay: None,
        }
    }

    /// Make `page_meta_text` sleep before answering
    pub fn with_meta_delay(mut self, delay: Duration) -> Self {
        self.meta_delay = Some(delay);
        self
    }

    fn state(&self) -> Result<MutexGuard<'_, HostState>> {
        self.state
            .lock()
            .map_err(|_| Error::Host("host state lock poisoned".into()))
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state().map(|s| s.mutations.clone()).unwrap_or_default()
    }

    pub fn snapshot(&self) -> HostSnapshot {
        match self.state() {
            Ok(s) => HostSnapshot {
                tabs: s.tabs.clone(),
                groups: s.groups.clone(),
                ineligible_windows: s.ineligible_windows.iter().copied().collect(),
                meta_text: s.meta_text.clone(),
            },
            Err(_) => HostSnapshot::default(),
        }
    }

    /// Tabs currently in `group_id`
    pub fn tabs_in_group(&self, group_id: GroupId) -> Vec<TabId> {
        self.state()
            .map(|s| {
                s.tabs
                    .iter()
                    .filter(|t| t.group_id == Some(group_id))
                    .map(|t| t.id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl HostState {
    /// Groups disappear once their last tab leaves, as in the browser
    fn prune_empty_groups(&mut self) {
        let occupied: HashSet<GroupId> = self.tabs.iter().filter_map(|t| t.group_id).collect();
        self.groups.retain(|g| occupied.contains(&g.id));
    }
}

#[async_trait]
impl TabHost for MemoryTabHost {
    async fn list_tabs(&self, scope: TabScope) -> Result<Vec<TabDescriptor>> {
        let state = self.state()?;
        Ok(state
            .tabs
            .iter()
            .filter(|t| scope.contains(t.window_id))
            .cloned()
            .collect())
    }

    async fn get_groups(&self, scope: TabScope) -> Result<Vec<NativeGroup>> {
        let state = self.state()?;
        Ok(state
            .groups
            .iter()
            .filter(|g| scope.contains(g.window_id))
            .cloned()
            .collect())
    }

    async fn group_tabs(&self, tab_ids: &[TabId], group_id: Option<GroupId>) -> Result<GroupId> {
        if tab_ids.is_empty() {
            return Err(Error::InvalidInput("cannot group zero tabs".into()));
        }

        let mut state = self.state()?;

        let mut windows = Vec::with_capacity(tab_ids.len());
        for id in tab_ids {
            let tab = state
                .tabs
                .iter()
                .find(|t| t.id == *id)
                .ok_or_else(|| Error::Host(format!("no tab with id {}", id)))?;
            if state.ineligible_windows.contains(&tab.window_id) {
                return Err(Error::Host(format!(
                    "tabs can only be grouped in normal windows ({} is not)",
                    tab.window_id.0
                )));
            }
            windows.push(tab.window_id);
        }

        let (target, target_window, created) = match group_id {
            Some(gid) => {
                let group = state
                    .groups
                    .iter()
                    .find(|g| g.id == gid)
                    .ok_or_else(|| Error::Host(format!("no group with id {}", gid)))?;
                (gid, group.window_id, false)
            }
            None => {
                let gid = GroupId(state.next_group_id);
                state.next_group_id += 1;
                let window_id = windows[0];
                state.groups.push(NativeGroup {
                    id: gid,
                    window_id,
                    title: String::new(),
                    color: GroupColor::Grey,
                });
                (gid, window_id, true)
            }
        };

        for tab in state.tabs.iter_mut().filter(|t| tab_ids.contains(&t.id)) {
            tab.group_id = Some(target);
            tab.window_id = target_window;
        }
        state.prune_empty_groups();
        state.mutations.push(Mutation::GroupTabs {
            tab_ids: tab_ids.to_vec(),
            group_id: target,
            created,
        });

        Ok(target)
    }

    async fn update_group(&self, group_id: GroupId, update: GroupUpdate) -> Result<()> {
        let mut state = self.state()?;
        let group = state
            .groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| Error::Host(format!("no group with id {}", group_id)))?;

        if let Some(title) = &update.title {
            group.title = title.clone();
        }
        if let Some(color) = update.color {
            group.color = color;
        }
        state.mutations.push(Mutation::UpdateGroup { group_id, update });
        Ok(())
    }

    async fn page_meta_text(&self, tab_id: TabId) -> Result<String> {
        if let Some(delay) = self.meta_delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state()?;
        Ok(state.meta_text.get(&tab_id).cloned().unwrap_or_default())
    }
}
