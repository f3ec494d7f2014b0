//! Data structures for the media usage index.

pub mod entry;
pub mod events;

pub use entry::{
    BuildMeta, BuildMode, BuildReport, EntryStatus, IndexEntry, LinkedKind, MediaIndex, UsageMap,
};
pub use events::{AuditEvent, MediaEvent};
