//! Linked-content usage extraction.
//!
//! Fetches the rendered markup of every page touched by the build, bounded
//! to a fixed number of in-flight requests, and parses it for fragment,
//! PDF, SVG, and icon references. The resulting usage map is merged with
//! the linked-content files observed directly in the audit log, so files
//! nobody links to still surface as `file-unused` rows.

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::adapters::MarkupClient;
use crate::config::BuildContext;
use crate::core::classify;
use crate::domain::{AuditEvent, IndexEntry, MediaIndex, UsageMap};

/// Linked-content files seen directly in the audit log: path to the latest
/// event's `(timestamp, was_delete)`.
#[derive(Debug, Default)]
pub struct LinkedFiles {
    latest: std::collections::BTreeMap<String, (i64, bool)>,
}

impl LinkedFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one audit event in; non-linked-content paths are ignored.
    ///
    /// Only query/fragment are stripped here: linked-content paths keep
    /// their own extensions (or none, for fragments), matching the
    /// verbatim link targets the usage map is keyed by.
    pub fn record(&mut self, event: &AuditEvent) {
        let end = event.path.find(['?', '#']).unwrap_or(event.path.len());
        let path = event.path[..end].to_string();
        if !classify::is_linked_content_path(&path) {
            return;
        }
        let entry = self.latest.entry(path).or_insert((i64::MIN, false));
        if event.timestamp >= entry.0 {
            *entry = (event.timestamp, event.is_delete());
        }
    }

    /// Paths whose latest audit event is not a delete.
    pub fn live_paths(&self) -> impl Iterator<Item = (&String, i64)> {
        self.latest
            .iter()
            .filter(|(_, (_, deleted))| !deleted)
            .map(|(path, (timestamp, _))| (path, *timestamp))
    }

    /// Paths whose latest audit event is a delete.
    pub fn deleted_paths(&self) -> impl Iterator<Item = &String> {
        self.latest
            .iter()
            .filter(|(_, (_, deleted))| *deleted)
            .map(|(path, _)| path)
    }

    pub fn is_empty(&self) -> bool {
        self.latest.is_empty()
    }
}

/// Parse one page's markup into the usage map: PDF and SVG link targets,
/// fragment references, and icon shorthand.
pub fn parse_page_usage(page: &str, markdown: &str, map: &mut UsageMap) {
    use crate::domain::LinkedKind;

    for path in classify::extract_links(markdown, ".pdf") {
        map.add(LinkedKind::Pdf, &path, page);
    }
    for path in classify::extract_links(markdown, ".svg") {
        map.add(LinkedKind::Svg, &path, page);
    }
    for path in classify::extract_icon_references(markdown) {
        map.add(LinkedKind::Svg, &path, page);
    }
    for path in classify::extract_fragment_references(markdown) {
        map.add(LinkedKind::Fragment, &path, page);
    }
}

/// Fetches page markup with bounded concurrency and extracts usage.
pub struct UsageExtractor {
    markup: MarkupClient,
    concurrency: usize,
}

impl UsageExtractor {
    pub fn new(markup: MarkupClient, concurrency: usize) -> Self {
        Self {
            markup,
            concurrency: concurrency.max(1),
        }
    }

    /// Build the usage map for the given pages. Individual fetch failures
    /// are non-fatal: they are returned as error strings and the page
    /// contributes no usage data.
    pub async fn collect(
        &self,
        ctx: &BuildContext,
        pages: &BTreeSet<String>,
    ) -> (UsageMap, Vec<String>) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut join_set: JoinSet<(String, anyhow::Result<String>)> = JoinSet::new();

        for page in pages {
            let permit_source = Arc::clone(&semaphore);
            let markup = self.markup.clone();
            let ctx = ctx.clone();
            let page = page.clone();

            join_set.spawn(async move {
                // Closed only when the semaphore is dropped, which outlives
                // every task here.
                let _permit = permit_source.acquire().await;
                let result = markup.fetch_markup(&ctx, &page).await;
                (page, result)
            });
        }

        let mut map = UsageMap::new();
        let mut errors = Vec::new();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((page, Ok(markdown))) => {
                    debug!(%page, bytes = markdown.len(), "parsed page markup");
                    parse_page_usage(&page, &markdown, &mut map);
                }
                Ok((page, Err(e))) => {
                    warn!(%page, error = %e, "markup fetch failed, skipping page");
                    errors.push(format!("{page}: {e}"));
                }
                Err(e) => {
                    warn!(error = %e, "markup task panicked");
                    errors.push(format!("markup task failed: {e}"));
                }
            }
        }

        (map, errors)
    }
}

/// Union the usage map with linked files observed in the audit log and
/// upsert one entry per linked-content path into the index.
///
/// `touched` holds the pages whose markup was parsed into `map` this run,
/// so only their links are recomputed: each path's new page list is
/// `(old pages − touched) ∪ fresh usage pages`. References held by pages
/// outside the run are carried forward unchanged.
///
/// Files with referencing pages become `referenced` rows whose `page` is
/// the joined list; live files nobody links to, and files whose list
/// empties, become `file-unused`.
pub fn merge_linked_entries(
    map: &UsageMap,
    observed: &LinkedFiles,
    touched: &BTreeSet<String>,
    index: &mut MediaIndex,
    now: i64,
) {
    use crate::domain::LinkedKind;

    for path in observed.deleted_paths() {
        index.remove_all_for_hash(path);
    }

    let deleted: BTreeSet<&String> = observed.deleted_paths().collect();

    // path -> (page list, kind, timestamp to fall back on)
    let mut merged: std::collections::BTreeMap<String, (Vec<String>, LinkedKind, i64)> =
        std::collections::BTreeMap::new();

    for entry in index.entries().iter().filter(|e| e.is_linked()) {
        let Some(kind) = classify::linked_kind(&entry.hash) else {
            continue;
        };
        let kept: Vec<String> = entry
            .pages()
            .filter(|p| !touched.contains(*p))
            .map(str::to_string)
            .collect();
        merged.insert(entry.hash.clone(), (kept, kind, entry.timestamp));
    }

    for (path, pages, kind) in map.iter_all() {
        let slot = merged
            .entry(path.clone())
            .or_insert_with(|| (Vec::new(), kind, now));
        for page in pages {
            if !slot.0.iter().any(|p| p == page) {
                slot.0.push(page.clone());
            }
        }
    }

    for (path, (pages, kind, previous)) in &merged {
        if deleted.contains(path) {
            continue;
        }
        let timestamp = observed
            .live_paths()
            .find(|(p, _)| *p == path)
            .map(|(_, t)| t)
            .unwrap_or(*previous);
        index.upsert_linked(IndexEntry::linked(path, pages, *kind, timestamp));
    }

    // Files the audit log knows about but no page references
    for (path, timestamp) in observed.live_paths() {
        if merged.contains_key(path) {
            continue;
        }
        let Some(kind) = classify::linked_kind(path) else {
            continue;
        };
        index.upsert_linked(IndexEntry::linked(path, &[], kind, timestamp));
    }
}
