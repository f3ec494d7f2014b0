//! Persisted index rows and the in-memory index they live in.
//!
//! Media entries are identified by the pair `(hash, page)`: the same content
//! hash can appear once per referencing page, or once with an empty page when
//! it is globally unreferenced. Linked-content entries (fragments, PDFs,
//! SVGs) have no content hash, so the file path is stored in `hash` and is
//! the whole identity; `page` holds the comma-joined referencing pages.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::events::MediaEvent;

/// Reference state of an index row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    /// At least one page references the asset
    #[serde(rename = "referenced")]
    Referenced,

    /// Media asset with no referencing page and no delete event
    #[serde(rename = "unused")]
    Unused,

    /// Linked-content file with no referencing page
    #[serde(rename = "file-unused")]
    FileUnused,
}

/// Category of a linked-content file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LinkedKind {
    Fragment,
    Pdf,
    Svg,
}

impl LinkedKind {
    /// The `type` label persisted for this kind of file.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Fragment => "fragment",
            Self::Pdf => "document > pdf",
            Self::Svg => "image > svg",
        }
    }
}

/// One row of the persisted media usage index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexEntry {
    /// Content hash for media assets; file path for linked content
    pub hash: String,

    /// Referencing page, "" when unreferenced; comma-joined list for
    /// linked content
    #[serde(default)]
    pub page: String,

    /// Asset URL or stored path
    #[serde(default)]
    pub url: String,

    /// Display name (upload filename or URL basename)
    #[serde(default)]
    pub name: String,

    /// Timestamp of the most recent contributing event (epoch ms)
    pub timestamp: i64,

    /// User behind the most recent contributing event
    #[serde(default)]
    pub user: String,

    /// Operation of the most recent contributing event
    #[serde(default)]
    pub operation: String,

    /// Category label, e.g. "image > png" or "document > pdf"
    #[serde(rename = "type", default)]
    pub kind: String,

    pub status: EntryStatus,

    /// Where the entry came from, when known (e.g. the upload resource path)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl IndexEntry {
    /// Build a media entry from an upload event matched to `page`.
    pub fn from_media(event: &MediaEvent, page: &str, kind: String, name: String) -> Self {
        Self {
            hash: event.media_hash.clone(),
            page: page.to_string(),
            url: event.path.clone(),
            name,
            timestamp: event.timestamp,
            user: event.user.clone(),
            operation: event.operation.clone(),
            kind,
            status: if page.is_empty() {
                EntryStatus::Unused
            } else {
                EntryStatus::Referenced
            },
            source: event.resource_path.clone(),
        }
    }

    /// Build a linked-content entry for `path` referenced by `pages`.
    ///
    /// An empty page list produces a `file-unused` row.
    pub fn linked(path: &str, pages: &[String], kind: LinkedKind, timestamp: i64) -> Self {
        let name = path.rsplit('/').next().unwrap_or(path).to_string();
        Self {
            hash: path.to_string(),
            page: pages.join(","),
            url: path.to_string(),
            name,
            timestamp,
            user: String::new(),
            operation: String::new(),
            kind: kind.label().to_string(),
            status: if pages.is_empty() {
                EntryStatus::FileUnused
            } else {
                EntryStatus::Referenced
            },
            source: None,
        }
    }

    /// Whether this is a linked-content row. Media hashes are content
    /// digests; linked-content "hashes" are the file paths themselves.
    pub fn is_linked(&self) -> bool {
        self.hash.starts_with('/')
    }

    /// Referencing pages recorded on this row. For linked-content rows the
    /// `page` field holds a comma-joined list.
    pub fn pages(&self) -> impl Iterator<Item = &str> {
        self.page.split(',').filter(|p| !p.is_empty())
    }

    /// Convert a removed media entry into its orphan row.
    pub fn into_orphan(mut self) -> Self {
        self.page = String::new();
        self.status = EntryStatus::Unused;
        self
    }
}

/// The in-memory media usage index.
///
/// Enforces the identity invariants: at most one media row per
/// `(hash, page)` pair, at most one linked-content row per path, at most
/// one orphan row per hash.
#[derive(Debug, Clone, Default)]
pub struct MediaIndex {
    entries: Vec<IndexEntry>,
}

impl MediaIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<IndexEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn into_entries(self) -> Vec<IndexEntry> {
        self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert or update a media entry keyed by `(hash, page)`.
    ///
    /// When the key already exists the row with the larger timestamp wins.
    pub fn upsert_media(&mut self, entry: IndexEntry) {
        match self
            .entries
            .iter_mut()
            .find(|e| e.hash == entry.hash && e.page == entry.page)
        {
            Some(existing) => {
                if entry.timestamp > existing.timestamp {
                    *existing = entry;
                }
            }
            None => self.entries.push(entry),
        }
    }

    /// Insert or replace a linked-content entry keyed by path (`hash`).
    pub fn upsert_linked(&mut self, entry: IndexEntry) {
        match self.entries.iter_mut().find(|e| e.hash == entry.hash) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
    }

    /// All pages currently referencing `hash` (orphan rows excluded).
    pub fn pages_for_hash(&self, hash: &str) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.hash == hash && !e.page.is_empty())
            .map(|e| e.page.as_str())
            .collect()
    }

    /// Media hashes currently indexed against `page`. Linked-content rows
    /// are excluded; they diff by path, not by `(hash, page)`.
    pub fn hashes_for_page(&self, page: &str) -> BTreeSet<String> {
        self.entries
            .iter()
            .filter(|e| e.page == page && !page.is_empty() && !e.is_linked())
            .map(|e| e.hash.clone())
            .collect()
    }

    /// Remove the `(hash, page)` row, returning it if it existed.
    pub fn remove_media(&mut self, hash: &str, page: &str) -> Option<IndexEntry> {
        let pos = self
            .entries
            .iter()
            .position(|e| e.hash == hash && e.page == page)?;
        Some(self.entries.remove(pos))
    }

    /// Remove every row for `hash`, orphan rows included.
    pub fn remove_all_for_hash(&mut self, hash: &str) {
        self.entries.retain(|e| e.hash != hash);
    }

    /// Whether an orphan row (empty page) exists for `hash`.
    pub fn has_orphan(&self, hash: &str) -> bool {
        self.entries
            .iter()
            .any(|e| e.hash == hash && e.page.is_empty())
    }

    /// Insert an orphan row unless one already exists for the hash.
    pub fn add_orphan(&mut self, entry: IndexEntry) {
        if !self.has_orphan(&entry.hash) {
            self.entries.push(entry);
        }
    }
}

/// Usage of linked-content files discovered by parsing page markup:
/// referenced path to the pages referencing it, per category.
#[derive(Debug, Clone, Default)]
pub struct UsageMap {
    pub fragments: BTreeMap<String, Vec<String>>,
    pub pdfs: BTreeMap<String, Vec<String>>,
    pub svgs: BTreeMap<String, Vec<String>>,
}

impl UsageMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `page` references `path`. Duplicate pages collapse.
    pub fn add(&mut self, kind: LinkedKind, path: &str, page: &str) {
        let bucket = match kind {
            LinkedKind::Fragment => &mut self.fragments,
            LinkedKind::Pdf => &mut self.pdfs,
            LinkedKind::Svg => &mut self.svgs,
        };
        let pages = bucket.entry(path.to_string()).or_default();
        if !pages.iter().any(|p| p == page) {
            pages.push(page.to_string());
        }
    }

    /// Referencing pages for `path`, regardless of category.
    pub fn pages_for(&self, path: &str) -> Option<&Vec<String>> {
        self.fragments
            .get(path)
            .or_else(|| self.pdfs.get(path))
            .or_else(|| self.svgs.get(path))
    }

    /// Iterate all `(path, pages, kind)` triples across the three maps.
    pub fn iter_all(&self) -> impl Iterator<Item = (&String, &Vec<String>, LinkedKind)> {
        self.fragments
            .iter()
            .map(|(p, pages)| (p, pages, LinkedKind::Fragment))
            .chain(self.pdfs.iter().map(|(p, pages)| (p, pages, LinkedKind::Pdf)))
            .chain(self.svgs.iter().map(|(p, pages)| (p, pages, LinkedKind::Svg)))
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty() && self.pdfs.is_empty() && self.svgs.is_empty()
    }
}

/// How a build walked the logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildMode {
    Full,
    Incremental,
}

/// Persisted metadata about the last successful build, used to choose the
/// next build's mode and to bound incremental `since` queries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildMeta {
    #[serde(default)]
    pub last_fetch_time: Option<i64>,

    #[serde(default)]
    pub entries_count: usize,

    #[serde(default)]
    pub last_build_mode: Option<BuildMode>,
}

/// Outcome of one build, including non-fatal errors accumulated along the
/// way (failed markup fetches and the like).
#[derive(Debug, Clone)]
pub struct BuildReport {
    pub build_id: Uuid,
    pub mode: BuildMode,
    pub entries_count: usize,
    pub pages_seen: usize,
    pub errors: Vec<String>,
    pub duration_ms: u64,
}
