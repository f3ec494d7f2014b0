//! Build orchestration: mode decision, stage sequencing, persistence.
//!
//! A build streams the audit log into page activity, correlates the media
//! log against it (full) or diffs it against the loaded index
//! (incremental), augments with linked-content usage extracted from page
//! markup, and writes the index sheet plus build metadata.
//!
//! Concurrent builds race on the persisted index (last writer wins); the
//! caller is responsible for serializing them.

use std::collections::BTreeSet;
use std::time::Instant;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::adapters::{LogClient, MarkupClient, SheetClient};
use crate::config::{BuildContext, ResolvedConfig};
use crate::core::associate::{Associator, PageActivity};
use crate::core::diff::DiffEngine;
use crate::core::usage::{LinkedFiles, UsageExtractor};
use crate::core::{MEMORY_PRESSURE_RATIO, OUT_OF_BAND_DRIFT_MS};
use crate::domain::{BuildMeta, BuildMode, BuildReport, IndexEntry, MediaIndex};

/// Decide whether the next build can run incrementally.
///
/// Anything that undermines trust in the persisted state forces a full
/// rebuild: missing metadata, missing index, unknown last-modified, or an
/// index modified out-of-band since the last fetch.
pub fn should_run_incremental(
    meta: Option<&BuildMeta>,
    index_exists: bool,
    index_last_modified: Option<i64>,
) -> bool {
    let Some(last_fetch) = meta.and_then(|m| m.last_fetch_time) else {
        return false;
    };
    if !index_exists {
        return false;
    }
    let Some(last_modified) = index_last_modified else {
        return false;
    };
    (last_fetch - last_modified).abs() <= OUT_OF_BAND_DRIFT_MS
}

/// Drives a single build end to end.
pub struct Orchestrator {
    logs: LogClient,
    storage: SheetClient,
    usage: UsageExtractor,
    index_path: String,
    meta_path: String,
    page_size: usize,
    memory_soft_limit: u64,
}

impl Orchestrator {
    pub fn new(config: &ResolvedConfig) -> Self {
        Self {
            logs: LogClient::new(
                config.log_host.clone(),
                std::time::Duration::from_millis(config.page_delay_ms),
            ),
            storage: SheetClient::new(config.admin_host.clone()),
            usage: UsageExtractor::new(
                MarkupClient::new(config.preview_host.clone()),
                config.markup_concurrency,
            ),
            index_path: config.index_path.clone(),
            meta_path: config.meta_path.clone(),
            page_size: config.page_size,
            memory_soft_limit: config.memory_soft_limit_bytes,
        }
    }

    /// Read the persisted build metadata, if any.
    pub async fn read_meta(&self, ctx: &BuildContext) -> Result<Option<BuildMeta>> {
        let sheet = self.storage.read_sheet::<BuildMeta>(ctx, &self.meta_path).await?;
        Ok(sheet.and_then(|s| s.data.into_iter().next()))
    }

    /// Run one build: decide mode, index, persist, report.
    #[instrument(skip(self, ctx), fields(org = %ctx.org, repo = %ctx.repo, ref_name = %ctx.ref_name))]
    pub async fn build(&self, ctx: &BuildContext, force_full: bool) -> Result<BuildReport> {
        let build_id = Uuid::new_v4();
        let started = Instant::now();
        info!(%build_id, "starting index build");

        let meta = self.read_meta(ctx).await?;
        let existing = self
            .storage
            .read_sheet::<IndexEntry>(ctx, &self.index_path)
            .await?;
        let last_modified = self.storage.last_modified(ctx, &self.index_path).await?;

        let incremental = !force_full
            && should_run_incremental(meta.as_ref(), existing.is_some(), last_modified);

        let (mode, index, pages_seen, errors) = if incremental {
            let loaded = MediaIndex::from_entries(
                existing.map(|s| s.data).unwrap_or_default(),
            );
            let since = meta.as_ref().and_then(|m| m.last_fetch_time);
            let (index, pages, errors) = self.run_incremental(ctx, loaded, since).await?;
            (BuildMode::Incremental, index, pages, errors)
        } else {
            let (index, pages, errors) = self.run_full(ctx).await?;
            (BuildMode::Full, index, pages, errors)
        };

        let entries_count = index.len();
        self.persist(ctx, index, mode, entries_count).await?;

        let report = BuildReport {
            build_id,
            mode,
            entries_count,
            pages_seen,
            errors,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            %build_id,
            mode = ?report.mode,
            entries = report.entries_count,
            pages = report.pages_seen,
            errors = report.errors.len(),
            duration_ms = report.duration_ms,
            "index build finished"
        );
        Ok(report)
    }

    /// Full rebuild: correlate the complete media log against the complete
    /// audit history.
    async fn run_full(
        &self,
        ctx: &BuildContext,
    ) -> Result<(MediaIndex, usize, Vec<String>)> {
        let mut activity = PageActivity::new();
        let mut linked = LinkedFiles::new();

        let audit_count = self
            .logs
            .fetch_audit_log(ctx, None, self.page_size, |events| {
                for event in &events {
                    activity.record(event);
                    linked.record(event);
                }
                self.check_memory_pressure();
            })
            .await
            .context("audit log fetch failed")?;
        activity.finish();

        // Deleted pages drop out of pages() and are never fetched
        let pages_touched: BTreeSet<String> = activity.pages().cloned().collect();
        info!(events = audit_count, pages = pages_touched.len(), "audit log consumed");

        let mut associator = Associator::new(&activity);
        let media_count = self
            .logs
            .fetch_media_log(ctx, None, self.page_size, |events| {
                associator.observe_chunk(events);
            })
            .await
            .context("media log fetch failed")?;
        info!(events = media_count, "media log consumed");

        let mut index = associator.finish();

        let (usage_map, errors) = self.usage.collect(ctx, &pages_touched).await;
        let now = chrono::Utc::now().timestamp_millis();
        crate::core::usage::merge_linked_entries(
            &usage_map,
            &linked,
            &pages_touched,
            &mut index,
            now,
        );

        Ok((index, pages_touched.len(), errors))
    }

    /// Incremental run: reconcile the loaded index against the log slices
    /// since the last fetch.
    async fn run_incremental(
        &self,
        ctx: &BuildContext,
        loaded: MediaIndex,
        since: Option<i64>,
    ) -> Result<(MediaIndex, usize, Vec<String>)> {
        let mut activity = PageActivity::new();
        let mut linked = LinkedFiles::new();

        self.logs
            .fetch_audit_log(ctx, since, self.page_size, |events| {
                for event in &events {
                    activity.record(event);
                    linked.record(event);
                }
            })
            .await
            .context("audit log fetch failed")?;
        activity.finish();

        // Markup is fetched only for live pages, but deleted pages still
        // count as touched so their linked references are diffed out.
        let fetch_pages: BTreeSet<String> = activity.pages().cloned().collect();
        let mut pages_touched = fetch_pages.clone();
        pages_touched.extend(activity.deleted_pages().cloned());

        let mut media_slice = Vec::new();
        self.logs
            .fetch_media_log(ctx, since, self.page_size, |events| {
                media_slice.extend(events);
            })
            .await
            .context("media log fetch failed")?;
        info!(
            pages = pages_touched.len(),
            media_events = media_slice.len(),
            "incremental slice fetched"
        );

        let mut engine = DiffEngine::new(loaded);
        engine.apply_media(&activity, &media_slice);

        let (usage_map, errors) = self.usage.collect(ctx, &fetch_pages).await;
        let now = chrono::Utc::now().timestamp_millis();
        engine.apply_linked(&usage_map, &linked, &pages_touched, now);

        Ok((engine.finish(), pages_touched.len(), errors))
    }

    /// Write the index sheet, then the metadata sheet. Both writes are
    /// fatal on failure; nothing is retried.
    async fn persist(
        &self,
        ctx: &BuildContext,
        index: MediaIndex,
        mode: BuildMode,
        entries_count: usize,
    ) -> Result<()> {
        self.storage
            .write_sheet(ctx, &self.index_path, index.into_entries())
            .await
            .context("failed to persist index")?;

        let meta = BuildMeta {
            last_fetch_time: Some(chrono::Utc::now().timestamp_millis()),
            entries_count,
            last_build_mode: Some(mode),
        };
        self.storage
            .write_sheet(ctx, &self.meta_path, vec![meta])
            .await
            .context("failed to persist build metadata")?;
        Ok(())
    }

    /// Advisory memory probe: warns past the soft limit, never throttles.
    fn check_memory_pressure(&self) {
        if let Some(resident) = resident_bytes() {
            let ratio = resident as f64 / self.memory_soft_limit as f64;
            if ratio > MEMORY_PRESSURE_RATIO {
                warn!(
                    resident_mb = resident / (1024 * 1024),
                    ratio = format!("{ratio:.2}"),
                    "memory use above soft limit"
                );
            }
        }
    }
}

#[cfg(target_os = "linux")]
fn resident_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(pages * 4096)
}

#[cfg(not(target_os = "linux"))]
fn resident_bytes() -> Option<u64> {
    None
}
