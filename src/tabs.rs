use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque host tab handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub i64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub i64);

/// Opaque host group handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub i64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab#{}", self.0)
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// A browser tab as seen by one categorization pass.
/// Recreated from live host state every pass; never mutated during it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(from = "TabRecord")]
pub struct TabDescriptor {
    pub id: TabId,
    #[serde(rename = "windowId")]
    pub window_id: WindowId,
    pub title: String,
    pub url: String,
    /// Derived from `url`
    pub domain: String,
    /// Optional auxiliary page content (meta description, keywords)
    #[serde(rename = "metaText")]
    pub meta_text: String,
    #[serde(rename = "groupId")]
    pub group_id: Option<GroupId>,
}

/// Wire shape of a tab: the domain is always re-derived on load
#[derive(Deserialize)]
struct TabRecord {
    id: TabId,
    #[serde(rename = "windowId", default = "default_window")]
    window_id: WindowId,
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(rename = "metaText", default)]
    meta_text: String,
    #[serde(rename = "groupId", default)]
    group_id: Option<GroupId>,
}

fn default_window() -> WindowId {
    WindowId(1)
}

impl From<TabRecord> for TabDescriptor {
    fn from(record: TabRecord) -> Self {
        TabDescriptor::new(record.id, record.window_id, &record.title, &record.url)
            .with_meta_text(&record.meta_text)
            .with_group(record.group_id)
    }
}

impl TabDescriptor {
    pub fn new(id: TabId, window_id: WindowId, title: &str, url: &str) -> Self {
        Self {
            id,
            window_id,
            title: title.to_string(),
            url: url.to_string(),
            domain: extract_domain(url),
            meta_text: String::new(),
            group_id: None,
        }
    }

    pub fn with_meta_text(mut self, meta_text: &str) -> Self {
        self.meta_text = meta_text.to_string();
        self
    }

    pub fn with_group(mut self, group_id: Option<GroupId>) -> Self {
        self.group_id = group_id;
        self
    }

    pub fn is_grouped(&self) -> bool {
        self.group_id.is_some()
    }
}

/// Host name without a leading "www.", or empty for unparseable URLs
pub fn extract_domain(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()))
        .unwrap_or_default()
}

/// Lower-case, trimmed category name
pub fn normalize_category(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Host tab-group colors
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GroupColor {
    Grey,
    Blue,
    Red,
    Yellow,
    Green,
    Pink,
    Purple,
    Cyan,
    Orange,
}

const ALL_COLORS: [GroupColor; 9] = [
    GroupColor::Grey,
    GroupColor::Blue,
    GroupColor::Red,
    GroupColor::Yellow,
    GroupColor::Green,
    GroupColor::Pink,
    GroupColor::Purple,
    GroupColor::Cyan,
    GroupColor::Orange,
];

impl GroupColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupColor::Grey => "grey",
            GroupColor::Blue => "blue",
            GroupColor::Red => "red",
            GroupColor::Yellow => "yellow",
            GroupColor::Green => "green",
            GroupColor::Pink => "pink",
            GroupColor::Purple => "purple",
            GroupColor::Cyan => "cyan",
            GroupColor::Orange => "orange",
        }
    }

    /// Stable color for a group title, so re-running a pass never recolors a group
    pub fn for_label(label: &str) -> Self {
        let digest = Sha256::digest(normalize_category(label).as_bytes());
        ALL_COLORS[digest[0] as usize % ALL_COLORS.len()]
    }
}

/// A host-native tab group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NativeGroup {
    pub id: GroupId,
    #[serde(rename = "windowId")]
    pub window_id: WindowId,
    pub title: String,
    pub color: GroupColor,
}

/// Which tabs/groups a host query covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabScope {
    Window(WindowId),
    AllWindows,
}

impl TabScope {
    pub fn contains(&self, window_id: WindowId) -> bool {
        match self {
            TabScope::Window(w) => *w == window_id,
            TabScope::AllWindows => true,
        }
    }
}
