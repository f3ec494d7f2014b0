//! Log record types for the two append-only platform logs.
//!
//! Both logs are read-only inputs: the audit log records publish/preview/
//! delete actions on site paths, the media log records asset uploads and
//! deletes. Timestamps are epoch milliseconds throughout because every
//! association window is millisecond-denominated.

use serde::{Deserialize, Serialize};

/// A publish/preview/delete action on a site path, from the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Site path the action touched
    pub path: String,

    /// When the action happened (epoch ms)
    pub timestamp: i64,

    /// API route that produced the event (e.g. "preview", "live")
    #[serde(default)]
    pub route: String,

    /// HTTP method of the action; "DELETE" marks a removal
    #[serde(default)]
    pub method: String,

    /// Acting user
    #[serde(default)]
    pub user: String,
}

impl AuditEvent {
    /// Whether this event removed the path.
    pub fn is_delete(&self) -> bool {
        self.method.eq_ignore_ascii_case("DELETE")
    }
}

/// An asset upload or delete, from the media log.
///
/// `resource_path` present means the asset was uploaded while editing a
/// specific page; absent means a standalone upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEvent {
    /// Content hash identifying the asset
    pub media_hash: String,

    /// Page the upload happened against, if any
    #[serde(default)]
    pub resource_path: Option<String>,

    /// Filename as uploaded, if known
    #[serde(default)]
    pub original_filename: Option<String>,

    /// Stored asset path/URL
    #[serde(default)]
    pub path: String,

    /// When the operation happened (epoch ms)
    pub timestamp: i64,

    /// Acting user
    #[serde(default)]
    pub user: String,

    /// Operation name; "delete" marks an explicit asset removal
    #[serde(default)]
    pub operation: String,

    /// MIME content type of the asset
    #[serde(default)]
    pub content_type: String,
}

impl MediaEvent {
    /// Whether this event explicitly deleted the asset.
    pub fn is_delete(&self) -> bool {
        self.operation.eq_ignore_ascii_case("delete")
    }
}
