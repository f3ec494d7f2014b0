//! Indexing engine: classification, association, usage extraction,
//! incremental diffing, and build orchestration.

pub mod associate;
pub mod classify;
pub mod diff;
pub mod orchestrator;
pub mod usage;

/// Full-build association window: a media upload matches page events in
/// the 5 s looking backward from the upload.
pub const FULL_ASSOC_WINDOW_MS: i64 = 5000;

/// Incremental association window: media uploads match for 10 s looking
/// forward from the page's latest preview.
pub const INCR_ASSOC_WINDOW_MS: i64 = 10_000;

/// Gap between the recorded fetch time and the index's last-modified time
/// past which an out-of-band edit is suspected and a full rebuild runs.
pub const OUT_OF_BAND_DRIFT_MS: i64 = 120_000;

/// Advisory threshold for the memory probe (resident / soft limit).
pub const MEMORY_PRESSURE_RATIO: f64 = 0.8;

pub use associate::{Associator, PageActivity};
pub use diff::DiffEngine;
pub use orchestrator::{should_run_incremental, Orchestrator};
pub use usage::{merge_linked_entries, parse_page_usage, LinkedFiles, UsageExtractor};
