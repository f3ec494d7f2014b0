//! Page–media association for full builds.
//!
//! Media-log entries carrying a `resourcePath` are matched against the page
//! events that preceded them inside a fixed window: the upload follows the
//! preview, so the page event qualifies when
//! `page_t <= media_t && page_t > media_t - FULL_ASSOC_WINDOW_MS`.
//! Entries are keyed by `(hash, page)`; on a repeat key the newer event wins.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::debug;

use crate::core::classify;
use crate::core::FULL_ASSOC_WINDOW_MS;
use crate::domain::{AuditEvent, IndexEntry, MediaEvent, MediaIndex};

/// Page activity folded out of the audit log: preview/publish timestamps
/// per normalized page path, most recent first. A page whose latest event
/// is a delete no longer exists and must not match any media event.
#[derive(Debug, Default)]
pub struct PageActivity {
    previews: BTreeMap<String, Vec<i64>>,
    /// page -> (timestamp, was_delete) of the latest event seen
    latest_op: BTreeMap<String, (i64, bool)>,
}

impl PageActivity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one audit event in. Non-page paths are ignored; deletes mark
    /// the page gone without contributing a preview timestamp.
    pub fn record(&mut self, event: &AuditEvent) {
        let path = classify::normalize_path(&event.path);
        if !classify::is_page(&path) {
            return;
        }
        let op = self
            .latest_op
            .entry(path.clone())
            .or_insert((i64::MIN, false));
        if event.timestamp >= op.0 {
            *op = (event.timestamp, event.is_delete());
        }
        if !event.is_delete() {
            self.previews.entry(path).or_default().push(event.timestamp);
        }
    }

    /// Sort each page's timestamps descending. Call once after all chunks
    /// have been folded in.
    pub fn finish(&mut self) {
        for timestamps in self.previews.values_mut() {
            timestamps.sort_unstable_by(|a, b| b.cmp(a));
        }
    }

    /// Pages with live activity; pages whose latest event is a delete are
    /// excluded.
    pub fn pages(&self) -> impl Iterator<Item = &String> {
        self.previews.keys().filter(|page| !self.is_deleted(page))
    }

    /// Pages whose latest audit event is a delete.
    pub fn deleted_pages(&self) -> impl Iterator<Item = &String> {
        self.latest_op
            .iter()
            .filter(|(_, (_, deleted))| *deleted)
            .map(|(page, _)| page)
    }

    pub fn is_deleted(&self, page: &str) -> bool {
        self.latest_op
            .get(page)
            .is_some_and(|(_, deleted)| *deleted)
    }

    pub fn is_empty(&self) -> bool {
        self.latest_op.is_empty()
    }

    /// Most recent preview timestamp for a page.
    pub fn latest(&self, page: &str) -> Option<i64> {
        self.previews.get(page).and_then(|ts| ts.iter().max()).copied()
    }

    /// Whether any page event at `page` falls in the backward window
    /// ending at `media_t`. A deleted page never matches.
    pub fn has_event_in_window(&self, page: &str, media_t: i64) -> bool {
        if self.is_deleted(page) {
            return false;
        }
        self.previews.get(page).is_some_and(|timestamps| {
            timestamps
                .iter()
                .any(|&t| t <= media_t && t > media_t - FULL_ASSOC_WINDOW_MS)
        })
    }
}

/// Streaming full-build associator. Media-log chunks are folded in as they
/// arrive; `finish` resolves deletes and standalone uploads.
pub struct Associator<'a> {
    activity: &'a PageActivity,
    index: MediaIndex,
    matched: HashSet<String>,
    standalone: Vec<MediaEvent>,
    /// hash -> (timestamp, was_delete) of the latest operation seen
    latest_op: HashMap<String, (i64, bool)>,
}

impl<'a> Associator<'a> {
    pub fn new(activity: &'a PageActivity) -> Self {
        Self {
            activity,
            index: MediaIndex::new(),
            matched: HashSet::new(),
            standalone: Vec::new(),
            latest_op: HashMap::new(),
        }
    }

    pub fn observe_chunk(&mut self, events: Vec<MediaEvent>) {
        for event in events {
            self.observe(event);
        }
    }

    fn observe(&mut self, event: MediaEvent) {
        let op = self
            .latest_op
            .entry(event.media_hash.clone())
            .or_insert((i64::MIN, false));
        if event.timestamp >= op.0 {
            *op = (event.timestamp, event.is_delete());
        }

        if event.is_delete() {
            return;
        }

        if let Some(resource_path) = event.resource_path.as_deref() {
            let page = classify::normalize_path(resource_path);
            if self.activity.has_event_in_window(&page, event.timestamp) {
                self.matched.insert(event.media_hash.clone());
                let kind = classify::detect_media_type(&event.content_type);
                let name = classify::extract_name(event.original_filename.as_deref(), &event.path);
                self.index
                    .upsert_media(IndexEntry::from_media(&event, &page, kind, name));
            } else if event.original_filename.is_some() {
                // Missed every window; still must not be silently dropped
                self.standalone.push(event);
            }
        } else if event.original_filename.is_some() {
            self.standalone.push(event);
        }
    }

    /// Resolve the stream: drop hashes whose latest operation is a delete,
    /// then add each never-matched standalone upload as a single orphan row.
    pub fn finish(mut self) -> MediaIndex {
        let deleted: HashSet<String> = self
            .latest_op
            .iter()
            .filter(|(_, (_, is_delete))| *is_delete)
            .map(|(hash, _)| hash.clone())
            .collect();

        for hash in &deleted {
            self.index.remove_all_for_hash(hash);
        }

        for event in self.standalone {
            if self.matched.contains(&event.media_hash) || deleted.contains(&event.media_hash) {
                continue;
            }
            let kind = classify::detect_media_type(&event.content_type);
            let name = classify::extract_name(event.original_filename.as_deref(), &event.path);
            debug!(hash = %event.media_hash, "standalone upload never referenced");
            self.index
                .add_orphan(IndexEntry::from_media(&event, "", kind, name));
        }

        self.index
    }
}
