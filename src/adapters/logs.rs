//! Paginated, rate-limited retrieval of the platform's audit and media logs.
//!
//! The log API returns bounded pages plus either a `nextToken` or a
//! `links.next` URL. The fetcher follows whichever is present in an explicit
//! loop, sleeping a fixed delay between pages, and hands each page to the
//! caller's chunk callback so the full history is never held in memory.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::BuildContext;
use crate::domain::{AuditEvent, MediaEvent};

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 86_400_000;

/// Longest bounded `since` window; older activity needs a full-history pull.
const MAX_SINCE_DAYS: i64 = 365;

/// `since` value for a full-history pull.
const FULL_HISTORY_SINCE: &str = "9999d";

/// Errors from the log source API. All of them abort the build.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("log request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("log API returned {status} for {url}")]
    Status { status: u16, url: String },
}

/// Which of the two platform logs to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Audit,
    Media,
}

impl LogKind {
    fn segment(&self) -> &'static str {
        match self {
            Self::Audit => "log",
            Self::Media => "medialog",
        }
    }
}

/// One page of the log API response envelope.
#[derive(Debug, Deserialize)]
struct LogPage {
    #[serde(default)]
    entries: Option<Vec<Value>>,

    // Some deployments name the payload field `data` instead.
    #[serde(default)]
    data: Option<Vec<Value>>,

    #[serde(default, rename = "nextToken")]
    next_token: Option<String>,

    #[serde(default)]
    links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
    #[serde(default)]
    next: Option<String>,
}

enum Continuation {
    Token(String),
    Url(String),
}

/// Convert a `since` timestamp into the bounded duration string the log API
/// expects: hours under a day, days otherwise, capped; `None` asks for the
/// full history.
pub fn since_param(since: Option<i64>, now: i64) -> String {
    let Some(since) = since else {
        return FULL_HISTORY_SINCE.to_string();
    };

    let age = (now - since).max(0);
    if age < MS_PER_DAY {
        format!("{}h", age / MS_PER_HOUR + 1)
    } else {
        let days = (age / MS_PER_DAY + 1).min(MAX_SINCE_DAYS);
        format!("{days}d")
    }
}

/// Client for the append-only log endpoints.
pub struct LogClient {
    client: reqwest::Client,
    log_host: String,
    page_delay: Duration,
}

impl LogClient {
    pub fn new(log_host: String, page_delay: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            log_host,
            page_delay,
        }
    }

    fn log_url(&self, kind: LogKind, ctx: &BuildContext) -> String {
        format!(
            "{}/{}/{}/{}/{}",
            self.log_host,
            kind.segment(),
            ctx.org,
            ctx.repo,
            ctx.ref_name
        )
    }

    /// Stream raw log pages, invoking `on_chunk` per page. Returns the total
    /// number of entries delivered.
    async fn fetch_raw(
        &self,
        kind: LogKind,
        ctx: &BuildContext,
        since: Option<i64>,
        page_size: usize,
        mut on_chunk: impl FnMut(Vec<Value>),
    ) -> Result<usize, FetchError> {
        let base_url = self.log_url(kind, ctx);
        let since = since_param(since, chrono::Utc::now().timestamp_millis());
        let mut next: Option<Continuation> = None;
        let mut total = 0usize;
        let mut pages = 0usize;

        loop {
            let mut request = match &next {
                // links.next is an absolute URL, used verbatim
                Some(Continuation::Url(url)) => self.client.get(url),
                Some(Continuation::Token(token)) => self
                    .client
                    .get(&base_url)
                    .query(&[("limit", page_size.to_string())])
                    .query(&[("since", since.clone()), ("nextToken", token.clone())]),
                None => self
                    .client
                    .get(&base_url)
                    .query(&[("limit", page_size.to_string())])
                    .query(&[("since", since.clone())]),
            };
            if let Some(token) = &ctx.token {
                request = request.header("authorization", format!("token {token}"));
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status {
                    status: status.as_u16(),
                    url: response.url().to_string(),
                });
            }

            let page: LogPage = response.json().await?;
            let entries = page.entries.or(page.data).unwrap_or_default();
            total += entries.len();
            pages += 1;
            debug!(kind = kind.segment(), page = pages, entries = entries.len(), "log page");
            on_chunk(entries);

            next = match (page.next_token, page.links.and_then(|l| l.next)) {
                (Some(token), _) => Some(Continuation::Token(token)),
                (None, Some(url)) => Some(Continuation::Url(url)),
                (None, None) => break,
            };

            tokio::time::sleep(self.page_delay).await;
        }

        Ok(total)
    }

    /// Stream the audit log as typed events. Rows that fail to decode are
    /// skipped with a warning; a malformed row must not kill the build.
    pub async fn fetch_audit_log(
        &self,
        ctx: &BuildContext,
        since: Option<i64>,
        page_size: usize,
        mut on_chunk: impl FnMut(Vec<AuditEvent>),
    ) -> Result<usize, FetchError> {
        self.fetch_raw(LogKind::Audit, ctx, since, page_size, |rows| {
            on_chunk(decode_rows(rows, "audit"))
        })
        .await
    }

    /// Stream the media log as typed events, same decode policy.
    pub async fn fetch_media_log(
        &self,
        ctx: &BuildContext,
        since: Option<i64>,
        page_size: usize,
        mut on_chunk: impl FnMut(Vec<MediaEvent>),
    ) -> Result<usize, FetchError> {
        self.fetch_raw(LogKind::Media, ctx, since, page_size, |rows| {
            on_chunk(decode_rows(rows, "media"))
        })
        .await
    }
}

fn decode_rows<T: serde::de::DeserializeOwned>(rows: Vec<Value>, log: &str) -> Vec<T> {
    rows.into_iter()
        .filter_map(|row| match serde_json::from_value(row) {
            Ok(event) => Some(event),
            Err(e) => {
                warn!(log, error = %e, "skipping undecodable log row");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> BuildContext {
        BuildContext {
            org: "org".to_string(),
            repo: "site".to_string(),
            ref_name: "main".to_string(),
            token: None,
        }
    }

    #[test]
    fn test_log_url() {
        let client = LogClient::new("https://admin.hlx.page".to_string(), Duration::ZERO);
        assert_eq!(
            client.log_url(LogKind::Audit, &ctx()),
            "https://admin.hlx.page/log/org/site/main"
        );
        assert_eq!(
            client.log_url(LogKind::Media, &ctx()),
            "https://admin.hlx.page/medialog/org/site/main"
        );
    }

    #[test]
    fn test_since_param_full_history() {
        assert_eq!(since_param(None, 0), "9999d");
    }

    #[test]
    fn test_since_param_hours_under_a_day() {
        let now = 1_700_000_000_000;
        assert_eq!(since_param(Some(now - 2 * MS_PER_HOUR), now), "3h");
        assert_eq!(since_param(Some(now), now), "1h");
    }

    #[test]
    fn test_since_param_days_capped() {
        let now = 1_700_000_000_000;
        assert_eq!(since_param(Some(now - 3 * MS_PER_DAY), now), "4d");
        assert_eq!(since_param(Some(now - 4000 * MS_PER_DAY), now), "365d");
    }

    #[test]
    fn test_decode_rows_skips_malformed() {
        let rows = vec![
            serde_json::json!({"path": "/a", "timestamp": 1000, "method": "POST"}),
            serde_json::json!({"nonsense": true}),
        ];
        let events: Vec<AuditEvent> = decode_rows(rows, "audit");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].path, "/a");
    }
}
