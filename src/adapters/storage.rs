//! Sheet-backed persistence for the index and its build metadata.
//!
//! The storage service exposes JSON "sheets": `GET /source{path}` returns
//! `{total, limit, offset, data}`, `POST /source{path}` overwrites the file
//! with a multipart `data` field holding the JSON blob. A directory listing
//! endpoint reports last-modified times, used to detect out-of-band edits.

use anyhow::{bail, Context, Result};
use reqwest::multipart::Form;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::BuildContext;

/// A JSON sheet envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sheet<T> {
    #[serde(default)]
    pub total: usize,

    #[serde(default)]
    pub limit: usize,

    #[serde(default)]
    pub offset: usize,

    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

impl<T> Sheet<T> {
    pub fn from_rows(data: Vec<T>) -> Self {
        let total = data.len();
        Self {
            total,
            limit: total,
            offset: 0,
            data,
        }
    }
}

/// One item of a directory listing.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItem {
    #[serde(default)]
    pub path: Option<String>,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub ext: Option<String>,

    #[serde(default)]
    pub last_modified: Option<i64>,
}

/// Client for the sheet storage service.
pub struct SheetClient {
    client: reqwest::Client,
    admin_host: String,
}

impl SheetClient {
    pub fn new(admin_host: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            admin_host,
        }
    }

    fn source_url(&self, ctx: &BuildContext, path: &str) -> String {
        format!(
            "{}/source/{}/{}/{}{}",
            self.admin_host, ctx.org, ctx.repo, ctx.ref_name, path
        )
    }

    fn list_url(&self, ctx: &BuildContext, dir: &str) -> String {
        format!(
            "{}/list/{}/{}/{}",
            self.admin_host,
            ctx.org,
            ctx.repo,
            dir.trim_start_matches('/')
        )
    }

    fn authorize(&self, request: reqwest::RequestBuilder, ctx: &BuildContext) -> reqwest::RequestBuilder {
        match &ctx.token {
            Some(token) => request.header("authorization", format!("token {token}")),
            None => request,
        }
    }

    /// Read a sheet. `Ok(None)` means the file does not exist yet.
    pub async fn read_sheet<T: DeserializeOwned>(
        &self,
        ctx: &BuildContext,
        path: &str,
    ) -> Result<Option<Sheet<T>>> {
        let url = self.source_url(ctx, path);
        let response = self
            .authorize(self.client.get(&url), ctx)
            .send()
            .await
            .with_context(|| format!("failed to read sheet {path}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            bail!("sheet read returned {} for {url}", response.status());
        }

        let sheet = response
            .json()
            .await
            .with_context(|| format!("failed to parse sheet {path}"))?;
        Ok(Some(sheet))
    }

    /// Overwrite a sheet with the given rows. Last writer wins.
    pub async fn write_sheet<T: Serialize>(
        &self,
        ctx: &BuildContext,
        path: &str,
        rows: Vec<T>,
    ) -> Result<()> {
        let url = self.source_url(ctx, path);
        let body = serde_json::to_string(&Sheet::from_rows(rows))
            .context("failed to serialize sheet")?;
        let form = Form::new().text("data", body);

        let response = self
            .authorize(self.client.post(&url), ctx)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("failed to write sheet {path}"))?;

        if !response.status().is_success() {
            bail!("sheet write returned {} for {url}", response.status());
        }
        Ok(())
    }

    /// Last-modified time of a stored file, from its directory listing.
    /// `Ok(None)` when the listing does not expose it.
    pub async fn last_modified(&self, ctx: &BuildContext, path: &str) -> Result<Option<i64>> {
        let (dir, file) = match path.rfind('/') {
            Some(pos) => (&path[..pos], &path[pos + 1..]),
            None => ("", path),
        };

        let url = self.list_url(ctx, dir);
        let response = self
            .authorize(self.client.get(&url), ctx)
            .send()
            .await
            .with_context(|| format!("failed to list {dir}"))?;

        if !response.status().is_success() {
            return Ok(None);
        }

        let items: Vec<ListItem> = response
            .json()
            .await
            .with_context(|| format!("failed to parse listing of {dir}"))?;

        Ok(items
            .iter()
            .find(|item| {
                item.path.as_deref() == Some(path)
                    || item.name.as_deref() == Some(file)
            })
            .and_then(|item| item.last_modified))
    }
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
    fn test_source_url() {
        let client = SheetClient::new("https://admin.hlx.page".to_string());
        assert_eq!(
            client.source_url(&ctx(), "/.index/media-usage.json"),
            "https://admin.hlx.page/source/org/site/main/.index/media-usage.json"
        );
    }

    #[test]
    fn test_list_url() {
        let client = SheetClient::new("https://admin.hlx.page".to_string());
        assert_eq!(
            client.list_url(&ctx(), "/.index"),
            "https://admin.hlx.page/list/org/site/.index"
        );
    }

    #[test]
    fn test_sheet_from_rows_counts() {
        let sheet = Sheet::from_rows(vec![1, 2, 3]);
        assert_eq!(sheet.total, 3);
        assert_eq!(sheet.limit, 3);
        assert_eq!(sheet.offset, 0);
    }

    #[test]
    fn test_sheet_parses_sparse_envelope() {
        let sheet: Sheet<serde_json::Value> =
            serde_json::from_str(r#"{"data": [{"hash": "h"}]}"#).unwrap();
        assert_eq!(sheet.data.len(), 1);
        assert_eq!(sheet.total, 0);
    }
}
