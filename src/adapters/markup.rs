//! Rendered page markup fetch via the preview host.
//!
//! Pages live at `https://{ref}--{repo}--{org}.{preview_host}{path}`. The
//! original tooling routed these through a CORS relay; a native client has
//! no same-origin restriction and fetches directly.

use anyhow::{bail, Context, Result};

use crate::config::BuildContext;

/// Client for fetching page markdown from the preview host.
#[derive(Clone)]
pub struct MarkupClient {
    client: reqwest::Client,
    preview_host: String,
}

impl MarkupClient {
    pub fn new(preview_host: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            preview_host,
        }
    }

    fn page_url(&self, ctx: &BuildContext, path: &str) -> String {
        format!(
            "https://{}--{}--{}.{}{}",
            ctx.ref_name, ctx.repo, ctx.org, self.preview_host, path
        )
    }

    /// Fetch the raw markup of one page. Callers treat failures here as
    /// non-fatal; the page simply contributes no usage data.
    pub async fn fetch_markup(&self, ctx: &BuildContext, path: &str) -> Result<String> {
        let url = self.page_url(ctx, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("failed to fetch markup for {path}"))?;

        if !response.status().is_success() {
            bail!("markup fetch returned {} for {url}", response.status());
        }

        response
            .text()
            .await
            .with_context(|| format!("failed to read markup body for {path}"))
    }
}
