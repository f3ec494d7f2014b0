//! Incremental reconciliation of a persisted index against new log activity.
//!
//! Per repreviewed page: the matching window is anchored at the page's
//! latest preview timestamp `T`, and media events qualify when
//! `T <= t < T + INCR_ASSOC_WINDOW_MS` (the upload follows the preview in a
//! fresh editing session). The old and new hash sets are diffed; removals
//! route through the orphan rule so an asset never silently drops out of
//! the index.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::core::associate::PageActivity;
use crate::core::classify;
use crate::core::usage::{merge_linked_entries, LinkedFiles};
use crate::core::INCR_ASSOC_WINDOW_MS;
use crate::domain::{IndexEntry, MediaEvent, MediaIndex, UsageMap};

/// Applies an incremental log slice to a loaded index.
pub struct DiffEngine {
    index: MediaIndex,
}

impl DiffEngine {
    pub fn new(index: MediaIndex) -> Self {
        Self { index }
    }

    /// Reconcile media entries against the new slice.
    ///
    /// `activity` holds the pages repreviewed in the slice; `media` is the
    /// media-log slice itself.
    pub fn apply_media(&mut self, activity: &PageActivity, media: &[MediaEvent]) {
        // Hashes explicitly deleted in this slice drop out entirely and
        // never become orphans.
        let deleted: HashSet<&str> = media
            .iter()
            .filter(|e| e.is_delete())
            .map(|e| e.media_hash.as_str())
            .collect();
        for hash in &deleted {
            self.index.remove_all_for_hash(hash);
        }

        // A deleted page is a cleared page: every hash it held routes
        // through the orphan rule.
        for page in activity.deleted_pages() {
            for hash in self.index.hashes_for_page(page) {
                debug!(%page, %hash, "page deleted, media reference removed");
                self.remove_media_maybe_add_orphan(&hash, page, &deleted);
            }
        }

        for page in activity.pages() {
            let Some(anchor) = activity.latest(page) else {
                continue;
            };

            // hash -> newest qualifying event in the window
            let mut fresh: HashMap<&str, &MediaEvent> = HashMap::new();
            for event in media {
                if event.is_delete() {
                    continue;
                }
                let Some(resource_path) = event.resource_path.as_deref() else {
                    continue;
                };
                if classify::normalize_path(resource_path) != *page {
                    continue;
                }
                if event.timestamp < anchor || event.timestamp >= anchor + INCR_ASSOC_WINDOW_MS {
                    continue;
                }
                match fresh.get(event.media_hash.as_str()) {
                    Some(existing) if existing.timestamp >= event.timestamp => {}
                    _ => {
                        fresh.insert(&event.media_hash, event);
                    }
                }
            }

            let old_hashes = self.index.hashes_for_page(page);
            let new_hashes: BTreeSet<String> =
                fresh.keys().map(|h| h.to_string()).collect();

            // A repreview with zero qualifying media clears the page:
            // to_remove is then the whole old set.
            for hash in old_hashes.difference(&new_hashes) {
                debug!(%page, %hash, "media reference removed");
                self.remove_media_maybe_add_orphan(hash, page, &deleted);
            }

            // Additions and refreshed timestamps both go through upsert
            for event in fresh.values() {
                let kind = classify::detect_media_type(&event.content_type);
                let name =
                    classify::extract_name(event.original_filename.as_deref(), &event.path);
                self.index
                    .upsert_media(IndexEntry::from_media(event, page, kind, name));
            }
        }

        // New standalone uploads surface as orphans, same rule as a full
        // build, so nothing in the slice is silently dropped.
        for event in media {
            if event.is_delete()
                || event.resource_path.is_some()
                || event.original_filename.is_none()
                || deleted.contains(event.media_hash.as_str())
            {
                continue;
            }
            if !self.index.pages_for_hash(&event.media_hash).is_empty() {
                continue;
            }
            let kind = classify::detect_media_type(&event.content_type);
            let name = classify::extract_name(event.original_filename.as_deref(), &event.path);
            self.index
                .add_orphan(IndexEntry::from_media(event, "", kind, name));
        }
    }

    /// Remove a `(hash, page)` row. If that was the hash's last referencing
    /// page, no delete was logged for it, and no orphan row exists yet,
    /// insert exactly one orphan row.
    fn remove_media_maybe_add_orphan(&mut self, hash: &str, page: &str, deleted: &HashSet<&str>) {
        let Some(removed) = self.index.remove_media(hash, page) else {
            return;
        };
        if self.index.pages_for_hash(hash).is_empty()
            && !deleted.contains(hash)
            && !self.index.has_orphan(hash)
        {
            debug!(%hash, "last reference removed, keeping orphan row");
            self.index.add_orphan(removed.into_orphan());
        }
    }

    /// Reconcile linked-content entries: recompute the page lists of the
    /// pages in `touched`, carry the rest forward, and drop files whose
    /// latest audit event is a delete.
    pub fn apply_linked(
        &mut self,
        usage: &UsageMap,
        observed: &LinkedFiles,
        touched: &BTreeSet<String>,
        now: i64,
    ) {
        merge_linked_entries(usage, observed, touched, &mut self.index, now);
    }

    pub fn finish(self) -> MediaIndex {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AuditEvent, EntryStatus};

    fn preview(path: &str, timestamp: i64) -> AuditEvent {
        AuditEvent {
            path: path.to_string(),
            timestamp,
            route: "preview".to_string(),
            method: "POST".to_string(),
            user: "u".to_string(),
        }
    }

    fn upload(hash: &str, resource_path: Option<&str>, timestamp: i64) -> MediaEvent {
        MediaEvent {
            media_hash: hash.to_string(),
            resource_path: resource_path.map(str::to_string),
            original_filename: Some(format!("{hash}.png")),
            path: format!("/media_{hash}.png"),
            timestamp,
            user: "u".to_string(),
            operation: "upload".to_string(),
            content_type: "image/png".to_string(),
        }
    }

    fn indexed(hash: &str, page: &str, timestamp: i64) -> IndexEntry {
        IndexEntry::from_media(&upload(hash, Some(page), timestamp), page, "image > png".to_string(), format!("{hash}.png"))
    }

    fn activity_for(events: &[AuditEvent]) -> PageActivity {
        let mut activity = PageActivity::new();
        for event in events {
            activity.record(event);
        }
        activity.finish();
        activity
    }

    #[test]
    fn test_repreview_with_no_media_clears_page_into_orphan() {
        let mut engine = DiffEngine::new(MediaIndex::from_entries(vec![indexed(
            "h1", "/a.md", 1003,
        )]));

        let activity = activity_for(&[preview("/a", 2000)]);
        engine.apply_media(&activity, &[]);

        let index = engine.finish();
        assert_eq!(index.len(), 1);
        let entry = &index.entries()[0];
        assert_eq!(entry.hash, "h1");
        assert_eq!(entry.page, "");
        assert_eq!(entry.status, EntryStatus::Unused);
    }

    #[test]
    fn test_page_delete_in_slice_orphans_its_media() {
        let mut engine = DiffEngine::new(MediaIndex::from_entries(vec![indexed(
            "h1", "/a.md", 1003,
        )]));

        let mut delete = preview("/a", 2000);
        delete.method = "DELETE".to_string();
        let activity = activity_for(&[delete]);
        engine.apply_media(&activity, &[]);

        let index = engine.finish();
        assert_eq!(index.len(), 1);
        assert!(index.pages_for_hash("h1").is_empty());
        assert!(index.has_orphan("h1"));
    }

    #[test]
    fn test_forward_window_boundaries() {
        let old = MediaIndex::new();
        let activity = activity_for(&[preview("/a", 2000)]);

        // t == anchor qualifies, t == anchor + window does not
        let mut engine = DiffEngine::new(old.clone());
        engine.apply_media(&activity, &[upload("h1", Some("/a"), 2000)]);
        assert_eq!(engine.finish().pages_for_hash("h1"), vec!["/a.md"]);

        let mut engine = DiffEngine::new(old.clone());
        engine.apply_media(&activity, &[upload("h1", Some("/a"), 11_999)]);
        assert_eq!(engine.finish().pages_for_hash("h1"), vec!["/a.md"]);

        let mut engine = DiffEngine::new(old);
        engine.apply_media(&activity, &[upload("h1", Some("/a"), 12_000)]);
        assert!(engine.finish().is_empty());
    }

    #[test]
    fn test_orphan_inserted_exactly_once() {
        // Same hash on one page, removed across two successive slices
        let mut engine = DiffEngine::new(MediaIndex::from_entries(vec![indexed(
            "h1", "/a.md", 1003,
        )]));

        let activity = activity_for(&[preview("/a", 2000)]);
        engine.apply_media(&activity, &[]);

        let activity = activity_for(&[preview("/a", 20_000)]);
        engine.apply_media(&activity, &[]);

        let index = engine.finish();
        assert_eq!(index.len(), 1);
        assert!(index.has_orphan("h1"));
    }

    #[test]
    fn test_no_orphan_while_other_page_still_references() {
        let mut engine = DiffEngine::new(MediaIndex::from_entries(vec![
            indexed("h1", "/a.md", 1003),
            indexed("h1", "/b.md", 1005),
        ]));

        let activity = activity_for(&[preview("/a", 2000)]);
        engine.apply_media(&activity, &[]);

        let index = engine.finish();
        assert_eq!(index.len(), 1);
        assert_eq!(index.pages_for_hash("h1"), vec!["/b.md"]);
        assert!(!index.has_orphan("h1"));
    }

    #[test]
    fn test_explicit_delete_removes_without_orphan() {
        let mut engine = DiffEngine::new(MediaIndex::from_entries(vec![indexed(
            "h1", "/a.md", 1003,
        )]));

        let mut delete = upload("h1", None, 2500);
        delete.operation = "delete".to_string();

        let activity = activity_for(&[preview("/a", 2000)]);
        engine.apply_media(&activity, &[delete]);

        assert!(engine.finish().is_empty());
    }

    #[test]
    fn test_new_upload_added_and_old_removed() {
        let mut engine = DiffEngine::new(MediaIndex::from_entries(vec![indexed(
            "h1", "/a.md", 1003,
        )]));

        let activity = activity_for(&[preview("/a", 2000)]);
        engine.apply_media(&activity, &[upload("h2", Some("/a"), 2004)]);

        let index = engine.finish();
        assert_eq!(index.pages_for_hash("h2"), vec!["/a.md"]);
        assert!(index.pages_for_hash("h1").is_empty());
        assert!(index.has_orphan("h1"));
    }

    #[test]
    fn test_unchanged_hash_keeps_newer_timestamp() {
        let mut engine = DiffEngine::new(MediaIndex::from_entries(vec![indexed(
            "h1", "/a.md", 1003,
        )]));

        let activity = activity_for(&[preview("/a", 2000)]);
        engine.apply_media(&activity, &[upload("h1", Some("/a"), 2004)]);

        let index = engine.finish();
        assert_eq!(index.len(), 1);
        assert_eq!(index.entries()[0].timestamp, 2004);
        assert_eq!(index.entries()[0].status, EntryStatus::Referenced);
    }

    #[test]
    fn test_untouched_pages_persist() {
        let mut engine = DiffEngine::new(MediaIndex::from_entries(vec![
            indexed("h1", "/a.md", 1003),
            indexed("h2", "/b.md", 1005),
        ]));

        // Only /a was repreviewed; /b's entries must survive untouched
        let activity = activity_for(&[preview("/a", 2000)]);
        engine.apply_media(&activity, &[upload("h1", Some("/a"), 2004)]);

        let index = engine.finish();
        assert_eq!(index.pages_for_hash("h2"), vec!["/b.md"]);
    }

    #[test]
    fn test_standalone_upload_in_slice_becomes_orphan() {
        let mut engine = DiffEngine::new(MediaIndex::new());
        let activity = activity_for(&[]);
        engine.apply_media(&activity, &[upload("h9", None, 3000)]);

        let index = engine.finish();
        assert_eq!(index.len(), 1);
        assert!(index.has_orphan("h9"));
    }
}
