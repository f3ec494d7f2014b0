//! mediadex - media usage index builder
//!
//! Maintains a derived index of media usage for a published site: for every
//! asset, PDF, SVG, or fragment, which pages currently reference it, when it
//! was last touched, and whether it is orphaned. The index is rebuilt or
//! incrementally refreshed from the platform's two append-only logs.
//!
//! # Architecture
//!
//! - The audit log (page publish/preview/delete) and media log (asset
//!   upload/delete) are streamed in bounded pages, never materialized whole
//! - Full builds correlate uploads to the page previews they followed
//!   inside a 5 s window; incremental builds diff new activity against the
//!   persisted index
//! - Linked content (fragments, PDFs, SVGs, icons) is discovered by parsing
//!   page markup with a bounded-concurrency fetch pool
//!
//! # Modules
//!
//! - `adapters`: External service clients (log API, sheet storage, markup)
//! - `core`: Indexing engine (classify, associate, usage, diff, orchestrate)
//! - `domain`: Data structures (events, index entries, build metadata)
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Build (or refresh) the index
//! mediadex build --org acme --repo website
//!
//! # Force a full rebuild
//! mediadex build --org acme --repo website --full
//!
//! # Inspect the last build
//! mediadex status --org acme --repo website
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;

// Re-export main types at crate root for convenience
pub use config::BuildContext;
pub use crate::core::{Associator, DiffEngine, Orchestrator, PageActivity, UsageExtractor};
pub use domain::{
    AuditEvent, BuildMeta, BuildMode, BuildReport, EntryStatus, IndexEntry, LinkedKind,
    MediaEvent, MediaIndex, UsageMap,
};
